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
//! Module that executes a single measurement and turns its output into a trial.

use std::{sync::Arc, time::Instant};

use crate::{
    config::{MeasurementConfig, ReportFormat, Timing, ToolConfig},
    environment::EnvironmentHandle,
    executor::{format_command, ExecError, Executor},
    factors::{Cell, Treatment},
    parser,
    process::NodeProcess,
};

use super::{MeasurementFailure, Trial, TrialOutcome};

pub struct MeasurementRunner<E> {
    executor: Arc<E>,
    environment: EnvironmentHandle,
    measurement: MeasurementConfig,
    tools: ToolConfig,
    timing: Timing,
    base: Treatment,
}

impl<E: Executor> MeasurementRunner<E> {
    pub fn new(
        executor: Arc<E>,
        environment: EnvironmentHandle,
        measurement: MeasurementConfig,
        tools: ToolConfig,
        timing: Timing,
        base: Treatment,
    ) -> Self {
        Self {
            executor,
            environment,
            measurement,
            tools,
            timing,
            base,
        }
    }

    /// Command of the traffic-generating client for a treatment.
    pub fn client_command(&self, treatment: &Treatment) -> Vec<String> {
        let mut command = vec![
            self.tools.traffic.clone(),
            "-c".to_string(),
            self.measurement.server_address.clone(),
            "-n".to_string(),
            self.measurement.transfer.clone(),
            "-i".to_string(),
            self.measurement.interval_s.to_string(),
            "-w".to_string(),
            treatment.buffer_bytes.to_string(),
            "-P".to_string(),
            treatment.parallel_flows.to_string(),
        ];
        if self.measurement.report_format == ReportFormat::Csv {
            command.extend(["-y".to_string(), "C".to_string()]);
        }
        command.extend(self.measurement.extra_args.iter().cloned());
        command
    }

    pub fn responder_command(&self) -> Vec<String> {
        vec![self.tools.traffic.clone(), "-s".to_string()]
    }

    /// Execute one repetition (one-based) of the measurement for `cell`.
    ///
    /// Never fails: every failure is recorded in the returned trial. The responder started for
    /// this trial is stopped before returning, whatever the outcome of the client.
    pub async fn run(&self, cell: &Cell, repetition: usize) -> Trial {
        let start = Instant::now();
        let treatment = Treatment::resolve(cell, &self.base);
        let ctx = format!("[{} rep {repetition}]", cell.id());

        let responder = match &self.measurement.responder {
            Some(node) => {
                let endpoint = self.environment.endpoint(node);
                match NodeProcess::start(
                    self.executor.as_ref(),
                    &endpoint,
                    "responder",
                    &self.responder_command(),
                    self.timing.command_timeout(),
                )
                .await
                {
                    Ok(p) => Some(p),
                    Err(e) => {
                        log::error!("{ctx} {e}");
                        return Trial {
                            repetition,
                            raw_output: String::new(),
                            outcome: TrialOutcome::MeasurementFailed(
                                MeasurementFailure::Responder(e.to_string()),
                            ),
                            duration: start.elapsed(),
                        };
                    }
                }
            }
            None => None,
        };
        if responder.is_some() {
            tokio::time::sleep(self.timing.responder_settle()).await;
        }

        let client = self.environment.endpoint(&self.measurement.client);
        let command = self.client_command(&treatment);
        log::debug!("{ctx} {}", format_command(Some(&client), &command));
        let result = self
            .executor
            .execute(Some(&client), &command, self.timing.measurement_timeout())
            .await;

        if let Some(responder) = responder {
            if let Err(e) = responder
                .stop(
                    self.executor.as_ref(),
                    self.timing.stop_grace(),
                    self.timing.command_timeout(),
                )
                .await
            {
                log::error!("{ctx} Failed to stop the responder: {e}");
            }
        }

        let (raw_output, outcome) = match result {
            Ok(output) if output.success() => {
                let outcome = match parser::extract(&output.stdout) {
                    Ok(sample) => {
                        log::info!("{ctx} {:.2} Mbps", sample.mbps());
                        TrialOutcome::Sample(sample.mbps())
                    }
                    Err(e) => {
                        log::warn!("{ctx} Unparseable output: {e}");
                        TrialOutcome::Unparseable(e)
                    }
                };
                (output.stdout, outcome)
            }
            Ok(output) => {
                let failure = MeasurementFailure::Exit {
                    status: output.status,
                    stderr: output.stderr.trim().to_string(),
                };
                log::error!("{ctx} {failure}");
                (output.stdout, TrialOutcome::MeasurementFailed(failure))
            }
            Err(ExecError::Timeout { timeout, .. }) => {
                let failure = MeasurementFailure::Timeout(timeout);
                log::error!("{ctx} {failure}");
                (String::new(), TrialOutcome::MeasurementFailed(failure))
            }
            Err(e) => {
                log::error!("{ctx} {e}");
                let failure = MeasurementFailure::Client(e.to_string());
                (String::new(), TrialOutcome::MeasurementFailed(failure))
            }
        };

        Trial {
            repetition,
            raw_output,
            outcome,
            duration: start.elapsed(),
        }
    }
}
