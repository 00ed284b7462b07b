// Copyright (c) 2022 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

use super::{Agent, Supervisable, CONSUL_CONFIG_KEY, CONSUL_LOCK_KEY};
use crate::agent_error::Result;
use crate::config::{SshHost, Topology};
use crate::topology::neighbour_hosts;
use crate::util::manager_cmd;
use crate::WATCH_FANOUT;
use lcm_cmd::Command;
use lcm_consul::ConsulClient;
use std::fmt;

pub(crate) const CONSUL_HOST_PATH: &str = "lcm/hosts";

/// Stdout of `lcm host start` when the host was already up.
pub const MSG_ALREADY_STARTED: &str = "Already started\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    Unknown,
    Started,
    StartFailed,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let x = match self {
            HostStatus::Unknown => "unknown",
            HostStatus::Started => "started",
            HostStatus::StartFailed => "start failed",
        };

        write!(f, "{}", x)
    }
}

/// A peer host on the monitor ring this node is responsible for.
#[derive(Debug, Clone)]
pub struct WatchedHost {
    host: SshHost,
}

impl WatchedHost {
    pub fn new(host: SshHost) -> Self {
        Self { host }
    }
}

impl Supervisable for WatchedHost {
    type Status = HostStatus;

    fn kind(&self) -> &'static str {
        "host"
    }

    fn label(&self) -> &str {
        &self.host.hostname
    }

    fn lock_key(&self) -> String {
        format!(
            "{}/{}/{}",
            CONSUL_HOST_PATH, self.host.hostname, CONSUL_LOCK_KEY
        )
    }

    fn config_key(&self) -> String {
        format!(
            "{}/{}/{}",
            CONSUL_HOST_PATH, self.host.hostname, CONSUL_CONFIG_KEY
        )
    }

    fn action_command(&self) -> Command {
        let mut cmd = manager_cmd();

        cmd.arg("host").arg("start").arg(&self.host.hostname);

        cmd
    }

    fn already_ok_marker(&self) -> &'static str {
        MSG_ALREADY_STARTED
    }

    fn unknown_status(&self) -> HostStatus {
        HostStatus::Unknown
    }

    fn ok_status(&self) -> HostStatus {
        HostStatus::Started
    }

    fn failed_status(&self) -> HostStatus {
        HostStatus::StartFailed
    }
}

/// One agent per host on this node's monitor ring. Fails fast when the
/// local host is not part of the cluster configuration.
pub fn create_host_agents(
    consul: &ConsulClient,
    topology: &Topology,
    hostname: &str,
) -> Result<Vec<Agent<WatchedHost>>> {
    let hosts = neighbour_hosts(topology, hostname, WATCH_FANOUT)?;

    Ok(hosts
        .into_iter()
        .map(|x| Agent::new(WatchedHost::new(x), consul.clone(), "lcm host lock"))
        .collect())
}
