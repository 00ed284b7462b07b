// Copyright (c) 2022 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

//! Runtime-toggleable agent behaviour, read from the coordinator KV.
//!
//! The config under a watched key is YAML written by the management CLI;
//! it carries comment banners and keys the agent does not consume
//! (e.g. `disabled_hosts`), so parsing must be tolerant of extras.

use lcm_consul::ConsulClient;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub autostart: bool,
}

/// Published copy of the runtime config: single writer (the watcher),
/// single reader (the maintenance loop).
#[derive(Debug, Clone, Default)]
pub struct AutostartFlag(Arc<AtomicBool>);

impl AutostartFlag {
    pub fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, x: bool) {
        self.0.store(x, Ordering::SeqCst)
    }
}

/// Keep `flag` in sync with the YAML under `key` until cancelled.
///
/// A malformed value is logged and discarded, keeping whatever was
/// published last; an absent or deleted key also keeps the current value,
/// which starts out as the default (autostart off).
pub async fn watch_runtime_config(
    consul: ConsulClient,
    key: String,
    flag: AutostartFlag,
    kind: &'static str,
    label: String,
    cancel: CancellationToken,
) {
    let mut rx = consul.watch_key(key, cancel);

    while let Some(update) = rx.recv().await {
        let pair = match update {
            Some(x) => x,
            None => continue,
        };

        match serde_yaml::from_slice::<RuntimeConfig>(&pair.value) {
            Ok(conf) => {
                flag.set(conf.autostart);

                tracing::info!(
                    autostart = conf.autostart,
                    "Runtime config change for {} [{}]",
                    kind,
                    label
                );
            }
            Err(e) => {
                tracing::error!(
                    "Ignoring malformed runtime config for {} [{}]: {}",
                    kind,
                    label,
                    e
                );
            }
        }
    }
}
