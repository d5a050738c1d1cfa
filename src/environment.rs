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
//! Lifecycle of the emulated environment.

use std::{path::Path, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    config::{Timing, ToolConfig},
    executor::{format_command, Endpoint, ExecError, Executor},
};

/// A running emulated environment.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct EnvironmentHandle {
    pub eid: String,
}

impl EnvironmentHandle {
    pub fn new(eid: impl Into<String>) -> Self {
        Self { eid: eid.into() }
    }

    pub fn endpoint(&self, node: impl AsRef<str>) -> Endpoint {
        Endpoint::new(node, &self.eid)
    }

    /// Link name as understood by the link shaping tool, e.g., `router1:pc1@i1234`.
    pub fn link(&self, link: impl AsRef<str>) -> String {
        format!("{}@{}", link.as_ref(), self.eid)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error("Cannot run the emulator: {0}")]
    Launch(#[source] ExecError),
    #[error("Emulator did not complete: {0}")]
    Interrupted(#[source] ExecError),
    #[error("Emulator failed on experiment {eid} (status {status:?}): {stderr}")]
    Exit {
        eid: String,
        status: Option<i32>,
        stderr: String,
    },
}

impl EnvironmentError {
    /// Whether the emulator was invoked. If so, it may have left a partial environment behind
    /// that must be stopped.
    pub fn reached_emulator(&self) -> bool {
        !matches!(self, Self::Launch(_))
    }
}

impl From<ExecError> for EnvironmentError {
    fn from(e: ExecError) -> Self {
        if e.never_started() {
            Self::Launch(e)
        } else {
            Self::Interrupted(e)
        }
    }
}

/// Starts and stops the emulated environment.
pub struct Lifecycle<E> {
    executor: Arc<E>,
    tools: ToolConfig,
    timing: Timing,
}

impl<E: Executor> Lifecycle<E> {
    pub fn new(executor: Arc<E>, tools: ToolConfig, timing: Timing) -> Self {
        Self {
            executor,
            tools,
            timing,
        }
    }

    pub fn start_command(&self, eid: &str, topology: &Path) -> Vec<String> {
        vec![
            self.tools.emulator.clone(),
            "-b".to_string(),
            "-e".to_string(),
            eid.to_string(),
            topology.display().to_string(),
        ]
    }

    pub fn stop_command(&self, eid: &str) -> Vec<String> {
        vec![
            self.tools.emulator.clone(),
            "-b".to_string(),
            "-e".to_string(),
            eid.to_string(),
            "-c".to_string(),
        ]
    }

    /// Start the environment and wait until it has settled.
    pub async fn start(
        &self,
        eid: &str,
        topology: &Path,
    ) -> Result<EnvironmentHandle, EnvironmentError> {
        let command = self.start_command(eid, topology);
        log::info!("Starting the environment: {}", format_command(None, &command));
        self.run(eid, &command, self.timing.environment_timeout())
            .await?;

        let settle = self.timing.environment_settle();
        if !settle.is_zero() {
            log::debug!("Waiting {settle:?} for the environment to settle");
            tokio::time::sleep(settle).await;
        }
        log::info!("Environment {eid} is up");
        Ok(EnvironmentHandle::new(eid))
    }

    /// Tear down the environment with the given experiment id. Works on partially started
    /// environments as well.
    pub async fn stop(&self, eid: &str) -> Result<(), EnvironmentError> {
        let command = self.stop_command(eid);
        log::info!("Stopping the environment: {}", format_command(None, &command));
        self.run(eid, &command, self.timing.environment_timeout())
            .await?;
        log::info!("Environment {eid} is down");
        Ok(())
    }

    async fn run(
        &self,
        eid: &str,
        command: &[String],
        timeout: Duration,
    ) -> Result<(), EnvironmentError> {
        let output = self.executor.execute(None, command, timeout).await?;
        if output.success() {
            Ok(())
        } else {
            Err(EnvironmentError::Exit {
                eid: eid.to_string(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}
