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
//! Long-running processes inside a node, e.g., the measurement responder or the background traffic.
//!
//! A process is started in the background of a shell that prints its PID. Stopping only ever
//! signals that PID, never processes matched by name, as other processes of the same tool may run
//! on the same node.

use std::time::Duration;

use itertools::Itertools;

use crate::executor::{CommandOutput, Endpoint, ExecError, Executor};

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("{0}")]
    Exec(#[from] ExecError),
    #[error("Cannot start {label} on {endpoint} (status {status:?}): {stderr}")]
    Start {
        label: String,
        endpoint: Endpoint,
        status: Option<i32>,
        stderr: String,
    },
    #[error("Started {label} on {endpoint}, but did not get its PID from {stdout:?}")]
    NoPid {
        label: String,
        endpoint: Endpoint,
        stdout: String,
    },
}

/// Handle of a process running in the background of a node.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a started process must be stopped"]
pub struct NodeProcess {
    label: String,
    endpoint: Endpoint,
    pid: u32,
}

impl NodeProcess {
    /// Start `command` in the background on `endpoint`.
    pub async fn start<E: Executor + ?Sized>(
        executor: &E,
        endpoint: &Endpoint,
        label: impl Into<String>,
        command: &[String],
        timeout: Duration,
    ) -> Result<Self, ProcessError> {
        let label = label.into();
        let script = format!(
            "{} >/dev/null 2>&1 & echo $!",
            command.iter().map(|x| shell_quote(x)).join(" ")
        );
        let shell = ["sh".to_string(), "-c".to_string(), script];
        let output = executor.execute(Some(endpoint), &shell, timeout).await?;
        if !output.success() {
            return Err(ProcessError::Start {
                label,
                endpoint: endpoint.clone(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }
        let Some(pid) = parse_pid(&output) else {
            return Err(ProcessError::NoPid {
                label,
                endpoint: endpoint.clone(),
                stdout: output.stdout,
            });
        };
        log::debug!("Started {label} on {endpoint} with PID {pid}");
        Ok(Self {
            label,
            endpoint: endpoint.clone(),
            pid,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Stop the process: send `SIGTERM`, wait for `grace`, and send `SIGKILL` if it is still
    /// alive. A process that already exited is not an error.
    pub async fn stop<E: Executor + ?Sized>(
        self,
        executor: &E,
        grace: Duration,
        timeout: Duration,
    ) -> Result<(), ProcessError> {
        let pid = self.pid.to_string();
        let kill = |signal: &str| ["kill".to_string(), signal.to_string(), pid.clone()];

        let term = executor
            .execute(Some(&self.endpoint), &kill("-TERM"), timeout)
            .await?;
        if !term.success() {
            log::debug!("{} (PID {}) already exited", self.label, self.pid);
            return Ok(());
        }

        tokio::time::sleep(grace).await;

        let alive = executor
            .execute(Some(&self.endpoint), &kill("-0"), timeout)
            .await?
            .success();
        if alive {
            log::warn!(
                "{} (PID {}) on {} ignored SIGTERM, killing it",
                self.label,
                self.pid,
                self.endpoint
            );
            executor
                .execute(Some(&self.endpoint), &kill("-KILL"), timeout)
                .await?;
        }
        log::debug!("Stopped {} on {}", self.label, self.endpoint);
        Ok(())
    }
}

fn parse_pid(output: &CommandOutput) -> Option<u32> {
    output.stdout.lines().rev().find_map(|l| l.trim().parse().ok())
}

/// Quote a single argument for `sh`.
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:@=,+%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn quoting() {
        assert_eq!(shell_quote("iperf"), "iperf");
        assert_eq!(shell_quote("10.0.4.20"), "10.0.4.20");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("$HOME"), "'$HOME'");
    }

    #[test]
    fn pid_is_last_number() {
        let output = |stdout: &str| CommandOutput {
            stdout: stdout.to_string(),
            ..Default::default()
        };
        assert_eq!(parse_pid(&output("4242\n")), Some(4242));
        assert_eq!(parse_pid(&output("warning\n 17 \n")), Some(17));
        assert_eq!(parse_pid(&output("")), None);
        assert_eq!(parse_pid(&output("no pid\n")), None);
    }
}
