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
//! Module running a factorial sweep of throughput measurements on the emulated environment.

pub mod harness;
pub mod runner;
pub mod sweep;

pub use harness::*;
pub use runner::*;
pub use sweep::*;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    environment::EnvironmentHandle,
    factors::{Cell, Treatment},
    link::LinkReport,
    parser::ParseFailure,
    statistics::Summary,
    util::RunContext,
};

/// Reason why a measurement did not produce any output worth parsing.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MeasurementFailure {
    #[error("Cannot start the responder: {0}")]
    Responder(String),
    #[error("Cannot run the client: {0}")]
    Client(String),
    #[error("The client did not finish within {0:?}")]
    Timeout(Duration),
    #[error("The client exited with status {status:?}: {stderr}")]
    Exit { status: Option<i32>, stderr: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum TrialOutcome {
    /// Valid throughput sample in Mbps.
    Sample(f64),
    MeasurementFailed(MeasurementFailure),
    Unparseable(ParseFailure),
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TrialStatus {
    Ok,
    MeasurementFailed,
    Unparseable,
}

/// One repetition of the measurement in one cell.
#[derive(Clone, Debug, PartialEq)]
pub struct Trial {
    /// One-based repetition index within the cell.
    pub repetition: usize,
    /// Everything the client printed on stdout, kept even if it could not be parsed.
    pub raw_output: String,
    pub outcome: TrialOutcome,
    pub duration: Duration,
}

impl Trial {
    pub fn throughput_mbps(&self) -> Option<f64> {
        match self.outcome {
            TrialOutcome::Sample(x) => Some(x),
            _ => None,
        }
    }

    pub fn status(&self) -> TrialStatus {
        match self.outcome {
            TrialOutcome::Sample(_) => TrialStatus::Ok,
            TrialOutcome::MeasurementFailed(_) => TrialStatus::MeasurementFailed,
            TrialOutcome::Unparseable(_) => TrialStatus::Unparseable,
        }
    }

    /// Reason of the failure, empty for valid samples.
    pub fn detail(&self) -> String {
        match &self.outcome {
            TrialOutcome::Sample(_) => String::new(),
            TrialOutcome::MeasurementFailed(e) => e.to_string(),
            TrialOutcome::Unparseable(e) => e.to_string(),
        }
    }
}

/// All trials of one cell, together with their summary.
#[derive(Clone, Debug, PartialEq)]
pub struct CellResult {
    pub cell: Cell,
    pub treatment: Treatment,
    pub link_report: LinkReport,
    pub trials: Vec<Trial>,
    pub summary: Summary,
}

impl CellResult {
    pub fn samples(&self) -> Vec<f64> {
        self.trials
            .iter()
            .filter_map(Trial::throughput_mbps)
            .collect()
    }

    pub fn failed_trials(&self) -> usize {
        self.trials
            .iter()
            .filter(|t| t.throughput_mbps().is_none())
            .count()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed(String),
    Cancelled,
}

/// Complete record of a run of the harness.
#[derive(Clone, Debug, PartialEq)]
pub struct ExperimentRun {
    /// Identifier and output locations of the run.
    pub context: RunContext,
    pub environment: EnvironmentHandle,
    pub cells: Vec<CellResult>,
    pub status: RunStatus,
    /// Set if the background traffic could not be started.
    pub background_failure: Option<String>,
}

impl ExperimentRun {
    pub fn new(context: RunContext, environment: EnvironmentHandle) -> Self {
        Self {
            context,
            environment,
            cells: Vec::new(),
            status: RunStatus::Running,
            background_failure: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.context.run_id
    }

    pub fn num_trials(&self) -> usize {
        self.cells.iter().map(|c| c.trials.len()).sum()
    }

    pub fn num_failed_trials(&self) -> usize {
        self.cells.iter().map(CellResult::failed_trials).sum()
    }
}
