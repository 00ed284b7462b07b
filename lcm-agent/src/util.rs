// Copyright (c) 2022 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

use crate::agent_error::Result;
use futures::{future::select, FutureExt};
use lcm_cmd::{CheckedCommandExt, Command, OutputExt};
use rand::Rng;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};

static MANAGER_PATH: &str = "lcm";

/// Management CLI command with the usual kill-on-drop guard.
pub fn manager_cmd() -> Command {
    let mut cmd = Command::new(MANAGER_PATH);

    cmd.kill_on_drop(true);

    cmd
}

/// The hostname the cluster configuration knows this node by.
pub async fn local_hostname() -> Result<String> {
    let output = Command::new("hostname")
        .kill_on_drop(true)
        .checked_output()
        .await?;

    Ok(output.stdout_string_lossy().trim().to_string())
}

/// Process output goes into single-line log records.
pub fn escape_newlines(x: &str) -> String {
    x.replace('\n', "\\n")
}

/// Uniform interval in `[0, d)`.
pub fn random_stagger(d: Duration) -> Duration {
    if d == Duration::from_secs(0) {
        return d;
    }

    Duration::from_nanos(rand::thread_rng().gen_range(0..d.as_nanos() as u64))
}

/// Interval in `[3d/4, 5d/4)`; the expected value is `d`.
pub fn random_stagger_quarter(d: Duration) -> Duration {
    3 * (d / 4) + random_stagger(d / 2)
}

pub async fn wait_for_termination() {
    let mut sigterm = signal(SignalKind::terminate()).expect("Could not listen to SIGTERM");
    let mut sigint = signal(SignalKind::interrupt()).expect("Could not listen to SIGINT");

    select(sigterm.recv().boxed(), sigint.recv().boxed()).await;
}
