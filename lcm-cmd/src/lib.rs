// Copyright (c) 2022 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

use futures::{future::BoxFuture, FutureExt, TryFutureExt};
use std::{error, fmt, io, process::Output};
pub use tokio::process::{Child, Command};

#[derive(Debug)]
pub enum CmdError {
    Io(io::Error),
    Output(Output),
}

impl fmt::Display for CmdError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            CmdError::Io(ref err) => write!(f, "{}", err),
            CmdError::Output(ref err) => write!(
                f,
                "{}, stdout: {}, stderr: {}",
                err.status,
                err.stdout_string_lossy(),
                err.stderr_string_lossy()
            ),
        }
    }
}

impl error::Error for CmdError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            CmdError::Io(ref err) => Some(err),
            CmdError::Output(_) => None,
        }
    }
}

impl From<io::Error> for CmdError {
    fn from(err: io::Error) -> Self {
        CmdError::Io(err)
    }
}

impl From<Output> for CmdError {
    fn from(output: Output) -> Self {
        CmdError::Output(output)
    }
}

/// Lossy string views over captured process output.
pub trait OutputExt {
    fn stdout_string_lossy(&self) -> String;
    fn stderr_string_lossy(&self) -> String;
}

impl OutputExt for Output {
    fn stdout_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }
    fn stderr_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

pub trait CheckedCommandExt {
    fn checked_output(&mut self) -> BoxFuture<Result<Output, CmdError>>;
}

impl CheckedCommandExt for Command {
    /// Similar to `output`, but returns `Err` if the exit code is non-zero.
    #[tracing::instrument]
    fn checked_output(&mut self) -> BoxFuture<Result<Output, CmdError>> {
        self.output()
            .err_into()
            .and_then(|x| async {
                tracing::debug!(result=?x);

                if x.status.success() {
                    Ok(x)
                } else {
                    Err(x.into())
                }
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_checked_output_success() -> Result<(), CmdError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg("printf foo")
            .kill_on_drop(true)
            .checked_output()
            .await?;

        assert_eq!(output.stdout_string_lossy(), "foo");

        Ok(())
    }

    #[tokio::test]
    async fn test_checked_output_failure() {
        let r = Command::new("sh")
            .arg("-c")
            .arg("printf bar >&2; exit 2")
            .kill_on_drop(true)
            .checked_output()
            .await;

        match r {
            Err(CmdError::Output(output)) => {
                assert_eq!(output.status.code(), Some(2));
                assert_eq!(output.stderr_string_lossy(), "bar");
            }
            x => panic!("expected an output error, got {:?}", x),
        }
    }
}
