// Copyright (c) 2022 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

//! Blocking-query watch on a single KV key, delivered over a channel so
//! the consumer owns its own loop.

use crate::{ConsulClient, KvPair};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const WATCH_WAIT: Duration = Duration::from_secs(10);
const WATCH_ERROR_BACKOFF: Duration = Duration::from_secs(10);

impl ConsulClient {
    /// Watch `key`, sending the current state on subscription and again on
    /// every change, including deletion (`None`). The watch ends when
    /// `cancel` fires or the receiver is dropped; transport errors are
    /// logged and retried, never surfaced.
    pub fn watch_key(
        &self,
        key: String,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Option<KvPair>> {
        let (tx, rx) = mpsc::channel(16);
        let client = self.clone();

        tokio::spawn(async move {
            let mut index = 0;

            loop {
                let r = tokio::select! {
                    r = client.kv_get_blocking(&key, index, WATCH_WAIT) => r,
                    _ = cancel.cancelled() => return,
                };

                match r {
                    Ok((pair, new_index)) => {
                        if new_index == index {
                            continue;
                        }

                        if new_index < index {
                            // The coordinator's index went backwards;
                            // restart the query from scratch.
                            index = 0;

                            continue;
                        }

                        index = new_index;

                        if tx.send(pair).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to watch key [{}]: {}", key, e);

                        tokio::select! {
                            _ = tokio::time::sleep(WATCH_ERROR_BACKOFF) => {}
                            _ = cancel.cancelled() => return,
                        }
                    }
                }
            }
        });

        rx
    }
}
