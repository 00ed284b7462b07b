// Copyright (c) 2022 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

//! Session-bound advisory lock.
//!
//! Acquisition creates a coordinator session, binds the key to it and
//! keeps the session renewed in the background. Loss of the binding for
//! any reason (expiry, forced release, renewal failure) fires the
//! leader-lost token handed back to the caller.

use crate::{transient_policy, ConsulClient, Error};
use lcm_request_retry::retry_future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct LockOptions {
    /// KV key the lock is taken on.
    pub key: String,
    /// Value written under the key while held; compared only for equality
    /// by observers.
    pub value: String,
    /// Human-readable session name, shown by the coordinator UI.
    pub session_name: String,
    /// Session TTL; also the cadence of the acquisition wait.
    pub ttl: Duration,
}

pub struct Lock {
    client: ConsulClient,
    opts: LockOptions,
    held: Option<Held>,
}

struct Held {
    session: String,
    lost: CancellationToken,
    renew: JoinHandle<()>,
    monitor: JoinHandle<()>,
}

impl Lock {
    pub fn new(client: ConsulClient, opts: LockOptions) -> Self {
        Self {
            client,
            opts,
            held: None,
        }
    }

    /// Block until the lock is acquired, returning the leader-lost token.
    /// `Ok(None)` means the wait was cancelled.
    pub async fn lock(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<CancellationToken>, Error> {
        if self.held.is_some() {
            return Err(Error::LockHeld);
        }

        let session = retry_future(
            |_| {
                self.client
                    .session_create(&self.opts.session_name, self.opts.ttl)
            },
            transient_policy(),
        )
        .await?;

        let mut wait_index = 0;

        loop {
            if cancel.is_cancelled() {
                let _ = self.client.session_destroy(&session).await;

                return Ok(None);
            }

            let acquired = match self
                .client
                .kv_acquire(&self.opts.key, &session, &self.opts.value)
                .await
            {
                Ok(x) => x,
                Err(e) => {
                    let _ = self.client.session_destroy(&session).await;

                    return Err(e);
                }
            };

            if acquired {
                break;
            }

            // Held elsewhere; wait for the key to change before retrying.
            let wait = tokio::select! {
                r = self
                    .client
                    .kv_get_blocking(&self.opts.key, wait_index, self.opts.ttl) => r,
                _ = cancel.cancelled() => {
                    let _ = self.client.session_destroy(&session).await;

                    return Ok(None);
                }
            };

            match wait {
                Ok((_, idx)) => {
                    wait_index = if idx < wait_index { 0 } else { idx };
                }
                Err(e) => {
                    let _ = self.client.session_destroy(&session).await;

                    return Err(e);
                }
            }
        }

        let lost = CancellationToken::new();

        let renew = tokio::spawn(renew_session(
            self.client.clone(),
            session.clone(),
            self.opts.ttl,
            lost.clone(),
        ));

        let monitor = tokio::spawn(monitor_holder(
            self.client.clone(),
            self.opts.key.clone(),
            session.clone(),
            self.opts.ttl,
            lost.clone(),
        ));

        self.held = Some(Held {
            session,
            lost: lost.clone(),
            renew,
            monitor,
        });

        Ok(Some(lost))
    }

    /// Release the lock and destroy its session. A no-op when not held.
    pub async fn unlock(&mut self) -> Result<(), Error> {
        let held = match self.held.take() {
            Some(x) => x,
            None => return Ok(()),
        };

        held.lost.cancel();

        let _ = held.renew.await;
        let _ = held.monitor.await;

        let release = self.client.kv_release(&self.opts.key, &held.session).await;
        let destroy = self.client.session_destroy(&held.session).await;

        release?;
        destroy?;

        Ok(())
    }
}

async fn renew_session(
    client: ConsulClient,
    session: String,
    ttl: Duration,
    lost: CancellationToken,
) {
    let period = ttl / 2;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = lost.cancelled() => return,
        }

        let r = retry_future(|_| client.session_renew(&session), transient_policy()).await;

        if let Err(e) = r {
            tracing::error!("Failed to renew coordinator session [{}]: {}", session, e);

            lost.cancel();

            return;
        }
    }
}

async fn monitor_holder(
    client: ConsulClient,
    key: String,
    session: String,
    ttl: Duration,
    lost: CancellationToken,
) {
    let mut index = 0;

    loop {
        let r = tokio::select! {
            r = retry_future(
                |_| client.kv_get_blocking(&key, index, ttl),
                transient_policy(),
            ) => r,
            _ = lost.cancelled() => return,
        };

        match r {
            Ok((Some(pair), idx)) if pair.session.as_deref() == Some(session.as_str()) => {
                index = if idx < index { 0 } else { idx };
            }
            Ok(_) => {
                lost.cancel();

                return;
            }
            Err(e) => {
                tracing::error!("Failed to monitor lock [{}]: {}", key, e);

                lost.cancel();

                return;
            }
        }
    }
}
