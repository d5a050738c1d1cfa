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
//! Shapes the emulated links before every cell of the sweep.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    config::ToolConfig,
    environment::EnvironmentHandle,
    executor::{format_command, ExecError, Executor},
    factors::Treatment,
};

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("{0}")]
    Exec(#[from] ExecError),
    #[error("{link} rejected the configuration (status {status:?}): {stderr}")]
    Rejected {
        link: String,
        status: Option<i32>,
        stderr: String,
    },
}

/// Outcome of configuring all links for a cell.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LinkReport {
    /// Links that could not be configured, with the reason.
    pub failed: Vec<(String, String)>,
    /// State of each link as reported by the shaping tool after configuration.
    pub state: Vec<(String, String)>,
    /// Links whose state could not be read back. Recorded for diagnostics only.
    pub unverified: Vec<(String, String)>,
}

impl LinkReport {
    /// The measurements of a cell are suspect if any link kept its previous configuration.
    pub fn suspect(&self) -> bool {
        !self.failed.is_empty()
    }
}

pub struct LinkConfigurator<E> {
    executor: Arc<E>,
    tools: ToolConfig,
    timeout: Duration,
}

impl<E: Executor> LinkConfigurator<E> {
    pub fn new(executor: Arc<E>, tools: ToolConfig, timeout: Duration) -> Self {
        Self {
            executor,
            tools,
            timeout,
        }
    }

    pub fn apply_command(&self, link: &str, bandwidth_bps: u64, delay_us: u64) -> Vec<String> {
        vec![
            self.tools.link_tool.clone(),
            "-bw".to_string(),
            bandwidth_bps.to_string(),
            "-dly".to_string(),
            delay_us.to_string(),
            link.to_string(),
        ]
    }

    pub fn verify_command(&self, link: &str) -> Vec<String> {
        vec![
            self.tools.link_tool.clone(),
            "-s".to_string(),
            link.to_string(),
        ]
    }

    /// Configure bandwidth and delay of a single link. `link` includes the experiment id.
    pub async fn apply(
        &self,
        link: &str,
        bandwidth_bps: u64,
        delay_us: u64,
    ) -> Result<(), LinkError> {
        let command = self.apply_command(link, bandwidth_bps, delay_us);
        log::debug!("{}", format_command(None, &command));
        let output = self.executor.execute(None, &command, self.timeout).await?;
        if output.success() {
            Ok(())
        } else {
            Err(LinkError::Rejected {
                link: link.to_string(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// Read back the current state of a link.
    pub async fn verify(&self, link: &str) -> Result<String, LinkError> {
        let command = self.verify_command(link);
        let output = self.executor.execute(None, &command, self.timeout).await?;
        if output.success() {
            Ok(output.stdout.trim().to_string())
        } else {
            Err(LinkError::Rejected {
                link: link.to_string(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// Configure every link for the given treatment and read back their state. Failures do not
    /// abort: they are logged and recorded in the report.
    pub async fn apply_all(
        &self,
        environment: &EnvironmentHandle,
        links: &[String],
        bandwidth_bps: u64,
        treatment: &Treatment,
    ) -> LinkReport {
        let mut report = LinkReport::default();
        let delay_us = treatment.delay_us();

        for link in links {
            let link = environment.link(link);
            if let Err(e) = self.apply(&link, bandwidth_bps, delay_us).await {
                log::error!("Failed to configure {link}: {e}");
                report.failed.push((link, e.to_string()));
            }
        }

        for link in links {
            let link = environment.link(link);
            match self.verify(&link).await {
                Ok(state) => {
                    log::debug!("{link}: {state}");
                    report.state.push((link, state));
                }
                Err(e) => {
                    log::warn!("Cannot read back the state of {link}: {e}");
                    report.unverified.push((link, e.to_string()));
                }
            }
        }

        report
    }
}
