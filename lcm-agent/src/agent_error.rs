// Copyright (c) 2022 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

use lcm_cmd::CmdError;
use std::process::Output;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LcmAgentError>;

#[derive(Debug, Error)]
pub enum LcmAgentError {
    #[error(transparent)]
    CmdError(#[from] CmdError),
    #[error(transparent)]
    ConsulError(#[from] lcm_consul::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    TomlError(#[from] toml::de::Error),
    #[error("index [{0}] is too big for a Lustre target")]
    TargetIndexTooBig(u32),
    #[error("local host [{0}] is missing from the cluster configuration")]
    LocalHostMissing(String),
}

impl From<Output> for LcmAgentError {
    fn from(output: Output) -> Self {
        LcmAgentError::CmdError(output.into())
    }
}
