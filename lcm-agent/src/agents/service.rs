// Copyright (c) 2022 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

use super::{Agent, Supervisable, CONSUL_CONFIG_KEY, CONSUL_LOCK_KEY};
use crate::config::Topology;
use crate::topology::local_services;
use crate::util::manager_cmd;
use lcm_cmd::Command;
use lcm_consul::ConsulClient;
use std::fmt;

pub(crate) const CONSUL_SERVICE_PATH: &str = "lcm/services";

/// Stdout of `lcm service mount` when the service did not need mounting.
pub const MSG_ALREADY_MOUNTED: &str = "Already mounted\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Unknown,
    Mounted,
    MountFailed,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let x = match self {
            ServiceStatus::Unknown => "unknown",
            ServiceStatus::Mounted => "mounted",
            ServiceStatus::MountFailed => "mount failed",
        };

        write!(f, "{}", x)
    }
}

/// One Lustre service this node is a hosting candidate for.
#[derive(Debug, Clone)]
pub struct ServiceTarget {
    service_name: String,
}

impl ServiceTarget {
    pub fn new(service_name: String) -> Self {
        Self { service_name }
    }
}

impl Supervisable for ServiceTarget {
    type Status = ServiceStatus;

    fn kind(&self) -> &'static str {
        "service"
    }

    fn label(&self) -> &str {
        &self.service_name
    }

    fn lock_key(&self) -> String {
        format!(
            "{}/{}/{}",
            CONSUL_SERVICE_PATH, self.service_name, CONSUL_LOCK_KEY
        )
    }

    fn config_key(&self) -> String {
        format!(
            "{}/{}/{}",
            CONSUL_SERVICE_PATH, self.service_name, CONSUL_CONFIG_KEY
        )
    }

    fn action_command(&self) -> Command {
        let mut cmd = manager_cmd();

        cmd.arg("service").arg("mount").arg(&self.service_name);

        cmd
    }

    fn already_ok_marker(&self) -> &'static str {
        MSG_ALREADY_MOUNTED
    }

    fn unknown_status(&self) -> ServiceStatus {
        ServiceStatus::Unknown
    }

    fn ok_status(&self) -> ServiceStatus {
        ServiceStatus::Mounted
    }

    fn failed_status(&self) -> ServiceStatus {
        ServiceStatus::MountFailed
    }
}

/// One agent per service instance hosted on `hostname`.
pub fn create_service_agents(
    consul: &ConsulClient,
    topology: &Topology,
    hostname: &str,
) -> Vec<Agent<ServiceTarget>> {
    local_services(topology, hostname)
        .into_iter()
        .map(|x| {
            Agent::new(
                ServiceTarget::new(x.service_name),
                consul.clone(),
                "lcm service lock",
            )
        })
        .collect()
}
