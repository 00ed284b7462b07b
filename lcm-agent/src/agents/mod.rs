// Copyright (c) 2022 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

//! Leader-elected supervision of services and hosts.
//!
//! Service and host agents run the same election and maintenance loop and
//! differ only in their coordinator keys, the management command they
//! drive and the wording of their statuses; the `Supervisable` trait
//! captures that surface and `Agent` drives it.

pub mod host;
pub mod service;

pub use host::{create_host_agents, HostStatus, WatchedHost};
pub use service::{create_service_agents, ServiceStatus, ServiceTarget};

use crate::runtime_config::{watch_runtime_config, AutostartFlag};
use crate::util::escape_newlines;
use crate::SESSION_TTL_SECONDS;
use lcm_cmd::{Command, OutputExt};
use lcm_consul::{ConsulClient, Lock, LockOptions};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub(crate) const CONSUL_LOCK_KEY: &str = "lock";
pub(crate) const CONSUL_CONFIG_KEY: &str = "config";

/// The per-kind surface of a supervised resource.
pub trait Supervisable: Send + Sync + 'static {
    type Status: Copy + PartialEq + fmt::Display + Send + Sync + 'static;

    /// "service" or "host"; only used in log records.
    fn kind(&self) -> &'static str;
    /// The service name or hostname.
    fn label(&self) -> &str;
    fn lock_key(&self) -> String;
    fn config_key(&self) -> String;
    /// The management command that idempotently brings the resource up.
    fn action_command(&self) -> Command;
    /// Stdout produced by the action when the resource was already up.
    fn already_ok_marker(&self) -> &'static str;
    fn unknown_status(&self) -> Self::Status;
    fn ok_status(&self) -> Self::Status;
    fn failed_status(&self) -> Self::Status;
}

enum Outcome {
    LostLeadership,
    Shutdown,
}

enum LeaderRead {
    Leader(String),
    Unresolved,
    Cancelled,
}

pub struct Agent<S: Supervisable> {
    profile: Arc<S>,
    consul: ConsulClient,
    lock: Lock,
    uuid: String,
    session_ttl: Duration,
    autostart: AutostartFlag,
}

impl<S: Supervisable> Agent<S> {
    pub fn new(profile: S, consul: ConsulClient, session_name: &str) -> Self {
        let uuid = uuid::Uuid::new_v4().to_string();
        let session_ttl = Duration::from_secs(SESSION_TTL_SECONDS);

        let lock = Lock::new(
            consul.clone(),
            LockOptions {
                key: profile.lock_key(),
                value: uuid.clone(),
                session_name: session_name.to_string(),
                ttl: session_ttl,
            },
        );

        Self {
            profile: Arc::new(profile),
            consul,
            lock,
            uuid,
            session_ttl,
            autostart: AutostartFlag::default(),
        }
    }

    pub fn label(&self) -> &str {
        self.profile.label()
    }

    /// Supervisory task for one agent; runs until shutdown, re-entering
    /// the election whenever leadership is lost.
    pub async fn supervise(mut self, cancel: CancellationToken) {
        let watcher = tokio::spawn(watch_runtime_config(
            self.consul.clone(),
            self.profile.config_key(),
            self.autostart.clone(),
            self.profile.kind(),
            self.profile.label().to_string(),
            cancel.child_token(),
        ));

        loop {
            match self.monitor_once(&cancel).await {
                Outcome::LostLeadership => continue,
                Outcome::Shutdown => break,
            }
        }

        let _ = watcher.await;
    }

    /// One pass of the election loop: observe the current leader, block
    /// for the lock, maintain the resource while leading, release on loss
    /// or shutdown.
    async fn monitor_once(&mut self, cancel: &CancellationToken) -> Outcome {
        let kind = self.profile.kind();
        let label = self.profile.label().to_string();

        match self.leader_uuid_wait(cancel).await {
            LeaderRead::Cancelled => {
                tracing::info!(
                    "Exiting while resolving the current leader of {} [{}]",
                    kind,
                    label
                );

                return Outcome::Shutdown;
            }
            LeaderRead::Unresolved => {
                tracing::info!(
                    "Could not resolve the current leader of {} [{}]",
                    kind,
                    label
                );
            }
            LeaderRead::Leader(x) => {
                if x != self.uuid {
                    tracing::info!("The current leader of {} [{}] is someone else", kind, label);
                }
            }
        }

        tracing::info!("Trying to get the leadership lock of {} [{}]", kind, label);

        let lost = loop {
            match self.lock.lock(cancel).await {
                Ok(Some(lost)) => break lost,
                Ok(None) => {
                    tracing::info!(
                        "Exiting while acquiring the leadership lock of {} [{}]",
                        kind,
                        label
                    );

                    return Outcome::Shutdown;
                }
                Err(e) => {
                    tracing::info!(
                        "Failed to acquire the leadership lock of {} [{}]: {}",
                        kind,
                        label,
                        e
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(self.session_ttl) => {}
                        _ = cancel.cancelled() => {
                            tracing::info!(
                                "Exiting while acquiring the leadership lock of {} [{}]",
                                kind,
                                label
                            );

                            return Outcome::Shutdown;
                        }
                    }
                }
            }
        };

        tracing::info!("Got the leadership lock of {} [{}]", kind, label);

        let stop = cancel.child_token();

        let maintain = tokio::spawn(maintain_loop(
            Arc::clone(&self.profile),
            self.autostart.clone(),
            self.session_ttl,
            stop.clone(),
        ));

        let shutdown = tokio::select! {
            _ = lost.cancelled() => {
                tracing::info!("Lost the leadership of {} [{}]", kind, label);

                false
            }
            _ = cancel.cancelled() => {
                tracing::info!(
                    "Exiting while holding the leadership lock of {} [{}]",
                    kind,
                    label
                );

                true
            }
        };

        // Let an in-flight management command finish before unlocking.
        stop.cancel();
        let _ = maintain.await;

        if let Err(e) = self.lock.unlock().await {
            tracing::error!(
                "Failed to release the leadership lock of {} [{}]: {}",
                kind,
                label,
                e
            );
        }

        if shutdown {
            Outcome::Shutdown
        } else {
            Outcome::LostLeadership
        }
    }

    /// Observational read of the current leader before contending for the
    /// lock. Retried once per second for up to one session TTL; the value
    /// only feeds log records.
    async fn leader_uuid_wait(&self, cancel: &CancellationToken) -> LeaderRead {
        for _ in 0..SESSION_TTL_SECONDS {
            match self.lock_value(&self.profile.lock_key()).await {
                Ok((true, value)) => return LeaderRead::Leader(value),
                Ok((false, _)) => {}
                Err(e) => {
                    tracing::debug!(
                        "Failed to read the lock of {} [{}]: {}",
                        self.profile.kind(),
                        self.profile.label(),
                        e
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                _ = cancel.cancelled() => return LeaderRead::Cancelled,
            }
        }

        LeaderRead::Unresolved
    }

    /// Consistent read of a lock key: whether any session holds it, and
    /// the stored value.
    async fn lock_value(&self, key: &str) -> Result<(bool, String), lcm_consul::Error> {
        let pair = self.consul.kv_get(key, true).await?;

        Ok(match pair {
            None => (false, String::new()),
            Some(pair) => (
                pair.session.is_some(),
                String::from_utf8_lossy(&pair.value).to_string(),
            ),
        })
    }
}

/// Tick the management action while leading. Runs until `stop` fires;
/// a command that is already running is awaited, never killed.
async fn maintain_loop<S: Supervisable>(
    profile: Arc<S>,
    autostart: AutostartFlag,
    tick: Duration,
    stop: CancellationToken,
) {
    let mut status = profile.unknown_status();
    let mut first = true;
    let mut was_enabled = false;

    loop {
        let enabled = autostart.get();

        if first || was_enabled != enabled {
            if enabled {
                tracing::info!(
                    "Autostart is enabled for {} [{}]",
                    profile.kind(),
                    profile.label()
                );
            } else {
                tracing::info!(
                    "Autostart is disabled for {} [{}]",
                    profile.kind(),
                    profile.label()
                );
            }

            first = false;
        }

        was_enabled = enabled;

        if enabled {
            status = run_action(&*profile, status).await;
        }

        tokio::select! {
            _ = tokio::time::sleep(tick) => {}
            _ = stop.cancelled() => {
                tracing::info!(
                    "Exiting from maintaining {} [{}]",
                    profile.kind(),
                    profile.label()
                );

                return;
            }
        }
    }
}

/// Run the management action once, log transitions and anomalies, and
/// return the resulting status.
async fn run_action<S: Supervisable>(profile: &S, status: S::Status) -> S::Status {
    if status == profile.unknown_status() || status == profile.failed_status() {
        tracing::info!("Starting {} [{}]", profile.kind(), profile.label());
    }

    let started_at = Instant::now();
    let result = profile.action_command().output().await;
    let duration = started_at.elapsed().as_secs();

    let (new_status, stdout, stderr) = match result {
        Ok(output) => {
            let stdout = output.stdout_string_lossy();
            let stderr = output.stderr_string_lossy();

            if output.status.success() {
                (profile.ok_status(), stdout, stderr)
            } else {
                tracing::error!(
                    stdout = %escape_newlines(&stdout),
                    stderr = %escape_newlines(&stderr),
                    duration,
                    "Failed to start {} [{}]: {}",
                    profile.kind(),
                    profile.label(),
                    output.status,
                );

                (profile.failed_status(), stdout, stderr)
            }
        }
        Err(e) => {
            tracing::error!(
                duration,
                "Failed to run the start command of {} [{}]: {}",
                profile.kind(),
                profile.label(),
                e
            );

            (profile.failed_status(), String::new(), String::new())
        }
    };

    if new_status != status {
        tracing::info!(
            old = %status,
            new = %new_status,
            stdout = %escape_newlines(&stdout),
            stderr = %escape_newlines(&stderr),
            duration,
            "Status change of {} [{}]",
            profile.kind(),
            profile.label(),
        );
    } else if new_status == profile.ok_status() && stdout != profile.already_ok_marker() {
        // Same status but the command actually did work: something outside
        // this agent took the resource down since the last tick.
        tracing::info!(
            stdout = %escape_newlines(&stdout),
            stderr = %escape_newlines(&stderr),
            duration,
            "Started {} [{}] that had a stale status of {}",
            profile.kind(),
            profile.label(),
            new_status,
        );
    }

    new_status
}
