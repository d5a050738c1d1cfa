// SWEEPLAB: Factorial Throughput Experiments on Emulated Networks
// Copyright (C) 2024-2025 Roland Schmid <roschmi@ethz.ch> and Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Boundary between the harness and the host. Every external command (the emulator, the link
//! shaping tool, and everything that runs inside a node) goes through an [`Executor`], which makes
//! the whole harness testable with a scripted executor.

use std::{process::Stdio, time::Duration};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::config::ToolConfig;

/// Node of a running environment, addressed as `<node>@<experiment id>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(node: impl AsRef<str>, eid: impl AsRef<str>) -> Self {
        Self(format!("{}@{}", node.as_ref(), eid.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the node without the experiment id.
    pub fn node(&self) -> &str {
        self.0.split('@').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Captured result of a command that ran to completion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` if the process was terminated by a signal.
    pub status: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Cannot launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Lost `{command}` while waiting for it: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

impl ExecError {
    /// Whether the command never started. Every other error means that the command may have
    /// changed the state of the host.
    pub fn never_started(&self) -> bool {
        matches!(self, Self::Launch { .. })
    }
}

/// Runs commands, either on the host (`endpoint` is `None`) or inside a node of the environment.
#[async_trait::async_trait]
pub trait Executor: Send + Sync + 'static {
    /// Run `command` to completion. A command exceeding `timeout` is killed and reported as
    /// [`ExecError::Timeout`]. A non-zero exit status is *not* an error.
    async fn execute(
        &self,
        endpoint: Option<&Endpoint>,
        command: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError>;
}

/// Format a command for logging.
pub fn format_command(endpoint: Option<&Endpoint>, command: &[String]) -> String {
    match endpoint {
        Some(e) => format!("[{e}] {}", command.iter().join(" ")),
        None => command.iter().join(" "),
    }
}

/// Executor running commands on the local host, entering nodes with the configured tool.
#[derive(Clone, Debug)]
pub struct LocalExecutor {
    tools: ToolConfig,
}

impl LocalExecutor {
    pub fn new(tools: ToolConfig) -> Self {
        Self { tools }
    }

    /// Full argument vector of the process to spawn.
    pub fn argv(&self, endpoint: Option<&Endpoint>, command: &[String]) -> Vec<String> {
        let mut argv = Vec::with_capacity(command.len() + 3);
        if self.tools.sudo {
            argv.push("sudo".to_string());
        }
        if let Some(endpoint) = endpoint {
            argv.push(self.tools.node_exec.clone());
            argv.push(endpoint.to_string());
        }
        argv.extend(command.iter().cloned());
        argv
    }
}

#[async_trait::async_trait]
impl Executor for LocalExecutor {
    async fn execute(
        &self,
        endpoint: Option<&Endpoint>,
        command: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        let argv = self.argv(endpoint, command);
        let line = argv.join(" ");
        let Some((program, args)) = argv.split_first() else {
            return Err(ExecError::Launch {
                command: line,
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
            });
        };
        log::debug!("exec: {line}");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Launch {
                command: line.clone(),
                source,
            })?;

        // dropping the future on timeout drops the child, which kills it.
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                status: output.status.code(),
            }),
            Ok(Err(source)) => Err(ExecError::Io {
                command: line,
                source,
            }),
            Err(_) => Err(ExecError::Timeout {
                command: line,
                timeout,
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn local() -> LocalExecutor {
        LocalExecutor::new(ToolConfig {
            sudo: false,
            ..Default::default()
        })
    }

    fn cmd(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn argv_prefixes() {
        let endpoint = Endpoint::new("pc3", "i1234");
        assert_eq!(endpoint.as_str(), "pc3@i1234");
        assert_eq!(endpoint.node(), "pc3");

        let sudo = LocalExecutor::new(ToolConfig::default());
        assert_eq!(
            sudo.argv(Some(&endpoint), &cmd(&["iperf", "-s"])),
            cmd(&["sudo", "himage", "pc3@i1234", "iperf", "-s"])
        );
        assert_eq!(
            sudo.argv(None, &cmd(&["vlink", "-s"])),
            cmd(&["sudo", "vlink", "-s"])
        );
        assert_eq!(local().argv(None, &cmd(&["true"])), cmd(&["true"]));
        assert_eq!(
            format_command(Some(&endpoint), &cmd(&["iperf", "-s"])),
            "[pc3@i1234] iperf -s"
        );
    }

    #[tokio::test]
    async fn captures_output_and_status() {
        let out = local()
            .execute(
                None,
                &cmd(&["sh", "-c", "echo hello; echo oops >&2; exit 3"]),
                Duration::from_secs(10),
            )
            .await
            .unwrap();
        assert_eq!(out.stdout, "hello\n");
        assert_eq!(out.stderr, "oops\n");
        assert_eq!(out.status, Some(3));
        assert!(!out.success());
    }

    #[tokio::test]
    async fn timeout_kills_command() {
        let err = local()
            .execute(None, &cmd(&["sleep", "10"]), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
        assert!(!err.never_started());
    }

    #[tokio::test]
    async fn missing_program() {
        let err = local()
            .execute(
                None,
                &cmd(&["sweeplab-no-such-program"]),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(err.never_started());

        let err = local()
            .execute(None, &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.never_started());
    }
}
