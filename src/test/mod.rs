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
//! Tests of the complete harness against a scripted executor.
//!
//! The [`ScriptedExecutor`] records every command and answers with a script that imitates the
//! emulator, the link shaping tool and the traffic generator.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use crate::{
    config::{ExperimentConfig, Timing, ToolConfig},
    executor::{CommandOutput, Endpoint, ExecError, Executor},
};


/// Throughput reported by the healthy script.
pub const HEALTHY_MBPS: f64 = 94.1;
pub const EID: &str = "i0001";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub endpoint: Option<String>,
    pub command: Vec<String>,
}

impl Call {
    pub fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or_default()
    }

    pub fn on(&self, node: &str) -> bool {
        self.endpoint.as_deref() == Some(format!("{node}@{EID}").as_str())
    }

    pub fn is_env_start(&self) -> bool {
        self.program() == "imunes" && self.command.last().map(String::as_str) != Some("-c")
    }

    pub fn is_env_stop(&self) -> bool {
        self.program() == "imunes" && self.command.last().map(String::as_str) == Some("-c")
    }

    pub fn is_link_apply(&self) -> bool {
        self.program() == "vlink" && self.command.iter().any(|x| x == "-bw")
    }

    pub fn is_client(&self) -> bool {
        self.program() == "iperf" && self.command.iter().any(|x| x == "-c")
    }

    pub fn is_process_start(&self) -> bool {
        self.program() == "sh"
    }

    pub fn is_kill(&self, signal: &str) -> bool {
        self.program() == "kill" && self.command.get(1).map(String::as_str) == Some(signal)
    }
}

type Script = dyn Fn(&Call) -> Result<CommandOutput, ExecError> + Send + Sync;
type Delay = dyn Fn(&Call) -> Duration + Send + Sync;

pub struct ScriptedExecutor {
    calls: Mutex<Vec<Call>>,
    script: Box<Script>,
    delay: Box<Delay>,
}

impl ScriptedExecutor {
    pub fn new(
        script: impl Fn(&Call) -> Result<CommandOutput, ExecError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            script: Box::new(script),
            delay: Box::new(|_| Duration::ZERO),
        }
    }

    /// Let every call take the time returned by `delay` before it is answered. The call is
    /// recorded immediately.
    pub fn with_delay(mut self, delay: impl Fn(&Call) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Box::new(delay);
        self
    }

    /// Every command succeeds, and every measurement reports [`HEALTHY_MBPS`].
    pub fn healthy() -> Self {
        Self::new(healthy)
    }

    /// Like [`ScriptedExecutor::healthy`], but the n-th client call (zero-based) is answered by
    /// `client`.
    pub fn with_client(
        client: impl Fn(usize) -> Result<CommandOutput, ExecError> + Send + Sync + 'static,
    ) -> Self {
        let counter = AtomicUsize::new(0);
        Self::new(move |call| {
            if call.is_client() {
                client(counter.fetch_add(1, Ordering::SeqCst))
            } else {
                healthy(call)
            }
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, f: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| f(c)).count()
    }
}

#[async_trait::async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(
        &self,
        endpoint: Option<&Endpoint>,
        command: &[String],
        _timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        let call = Call {
            endpoint: endpoint.map(|e| e.to_string()),
            command: command.to_vec(),
        };
        self.calls.lock().unwrap().push(call.clone());
        let delay = (self.delay)(&call);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        (self.script)(&call)
    }
}

pub fn ok(stdout: impl Into<String>) -> Result<CommandOutput, ExecError> {
    Ok(CommandOutput {
        stdout: stdout.into(),
        stderr: String::new(),
        status: Some(0),
    })
}

pub fn exit(status: i32, stderr: &str) -> Result<CommandOutput, ExecError> {
    Ok(CommandOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        status: Some(status),
    })
}

pub fn timeout(call: &Call) -> Result<CommandOutput, ExecError> {
    Err(ExecError::Timeout {
        command: call.command.join(" "),
        timeout: Duration::from_secs(600),
    })
}

pub fn launch_failure(call: &Call) -> Result<CommandOutput, ExecError> {
    Err(ExecError::Launch {
        command: call.command.join(" "),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
    })
}

/// Report of a client run with the given throughput.
pub fn report(mbps: f64) -> String {
    format!(
        "[  3] local 10.0.3.20 port 41234 connected with 10.0.4.20 port 5001\n\
         [ ID] Interval       Transfer     Bandwidth\n\
         [  3]  0.0- 8.9 sec   100 MBytes  {mbps:.1} Mbits/sec\n"
    )
}

pub fn healthy(call: &Call) -> Result<CommandOutput, ExecError> {
    if call.is_process_start() {
        ok("4242\n")
    } else if call.is_kill("-0") {
        // the process exited after SIGTERM
        exit(1, "kill: (4242) - No such process")
    } else if call.is_client() {
        ok(report(HEALTHY_MBPS))
    } else if call.program() == "vlink" && call.command.get(1).map(String::as_str) == Some("-s") {
        ok("bandwidth 100000000 delay 5000")
    } else {
        ok("")
    }
}

/// Default configuration without sudo, without any waiting, and with a fixed experiment id.
pub fn fast_config() -> ExperimentConfig {
    ExperimentConfig {
        experiment_id: Some(EID.to_string()),
        timing: Timing {
            environment_settle_ms: 0,
            link_settle_ms: 0,
            responder_settle_ms: 0,
            stop_grace_ms: 0,
            ..Default::default()
        },
        tools: ToolConfig {
            sudo: false,
            ..Default::default()
        },
        ..Default::default()
    }
}
