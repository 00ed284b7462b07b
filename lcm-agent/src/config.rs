// Copyright (c) 2022 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

//! In-memory topology of the cluster, loaded from the management CLI's
//! `simple_config` subcommand.
//!
//! The TOML produced by the manager is the externally fixed wire; the
//! structs below only pick out the fields the agent consumes and ignore
//! the rest.

use crate::agent_error::{LcmAgentError, Result};
use crate::util::{escape_newlines, manager_cmd};
use lcm_cmd::{CmdError, OutputExt};

pub const TARGET_INDEX_MAX: u32 = 0xffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Mdt,
    Ost,
}

impl TargetKind {
    pub fn prefix(self) -> &'static str {
        match self {
            TargetKind::Mdt => "MDT",
            TargetKind::Ost => "OST",
        }
    }
}

/// The canonical target half of a service name, e.g. `OST000a`.
pub fn target_index_to_string(kind: TargetKind, index: u32) -> Result<String> {
    if index > TARGET_INDEX_MAX {
        return Err(LcmAgentError::TargetIndexTooBig(index));
    }

    Ok(format!("{}{:04x}", kind.prefix(), index))
}

/// One placement of a Lustre service on a host.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct ServiceInstance {
    pub hostname: String,
    pub device: String,
    pub nid: String,
    pub mnt: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct Target {
    pub index: u32,
    #[serde(default)]
    pub instances: Vec<ServiceInstance>,
    /// Canonical service name, filled in after parsing.
    #[serde(skip)]
    pub service_name: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct Mgs {
    pub mgs_id: String,
    #[serde(default)]
    pub instances: Vec<ServiceInstance>,
    #[serde(skip)]
    pub service_name: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct Filesystem {
    pub fsname: String,
    #[serde(default)]
    pub mdts: Vec<Target>,
    #[serde(default)]
    pub osts: Vec<Target>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct SshHost {
    pub hostname: String,
    #[serde(default)]
    pub standalone: bool,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub filesystems: Vec<Filesystem>,
    #[serde(default)]
    pub mgs_list: Vec<Mgs>,
    #[serde(default)]
    pub hosts: Vec<SshHost>,
}

/// Ask the management CLI for the simplified cluster configuration and
/// parse it. Any failure here is fatal; the agent must not start with a
/// partial view of the cluster.
pub async fn load_topology() -> Result<Topology> {
    let output = manager_cmd().arg("simple_config").output().await?;

    if !output.status.success() {
        tracing::error!(
            stdout = %escape_newlines(&output.stdout_string_lossy()),
            stderr = %escape_newlines(&output.stderr_string_lossy()),
            "Failed to read the simplified cluster configuration"
        );

        return Err(CmdError::from(output).into());
    }

    let mut topology: Topology = toml::from_slice(&output.stdout)?;

    enrich(&mut topology)?;

    Ok(topology)
}

/// Derive the canonical service names. Rejects out-of-range target
/// indices.
fn enrich(topology: &mut Topology) -> Result<()> {
    for fs in &mut topology.filesystems {
        for mdt in &mut fs.mdts {
            mdt.service_name = format!(
                "{}-{}",
                fs.fsname,
                target_index_to_string(TargetKind::Mdt, mdt.index)?
            );
        }

        for ost in &mut fs.osts {
            ost.service_name = format!(
                "{}-{}",
                fs.fsname,
                target_index_to_string(TargetKind::Ost, ost.index)?
            );
        }
    }

    for mgs in &mut topology.mgs_list {
        mgs.service_name = mgs.mgs_id.clone();
    }

    Ok(())
}
