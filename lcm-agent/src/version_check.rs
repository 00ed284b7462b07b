// Copyright (c) 2022 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

//! Daily, jittered invocation of the management CLI's version check.

use crate::util::{manager_cmd, random_stagger, random_stagger_quarter};
use lcm_cmd::OutputExt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const VERSION_CHECK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub async fn version_check(cancel: CancellationToken) {
    // The first check lands within 30 seconds of startup so a fleet
    // booting together does not dogpile the repository.
    tokio::select! {
        _ = tokio::time::sleep(random_stagger(Duration::from_secs(30))) => {}
        _ = cancel.cancelled() => return,
    }

    version_check_once().await;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(random_stagger_quarter(VERSION_CHECK_INTERVAL)) => {
                version_check_once().await
            }
            _ = cancel.cancelled() => {
                tracing::info!("Exiting from version checking");

                return;
            }
        }
    }
}

async fn version_check_once() {
    let started_at = Instant::now();

    let output = manager_cmd()
        .arg("version_check")
        .arg("--no_log_prefix")
        .output()
        .await;

    let duration = started_at.elapsed().as_secs();

    let output = match output {
        Ok(x) => x,
        Err(e) => {
            tracing::error!(duration, "Failed to run the version check: {}", e);

            return;
        }
    };

    tracing::debug!(status = %output.status, duration, "Finished the version check");

    let stdout = output.stdout_string_lossy();

    if !stdout.is_empty() {
        tracing::info!("{}", stdout);
    }

    let stderr = output.stderr_string_lossy();

    if !stderr.is_empty() {
        tracing::error!("{}", stderr);
    }
}
