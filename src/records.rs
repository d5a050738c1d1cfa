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
//! Module defining record data types to (de-)serialize trials and cell summaries to CSV.
use serde::{Deserialize, Serialize};

use crate::{
    experiments::{CellResult, Trial, TrialStatus},
    factors::{Cell, Treatment},
    statistics::Summary,
};

/// One row of `trials_<ts>.csv`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TrialRecord {
    pub run_id: String,
    pub cell: String,
    pub buffer_bytes: u64,
    pub buffer_kib: f64,
    pub delay_ms: u64,
    pub rtt_ms: u64,
    pub parallel_flows: u64,
    pub repetition: usize,
    pub throughput_mbps: Option<f64>,
    pub status: TrialStatus,
    pub detail: String,
    pub link_suspect: bool,
}

impl TrialRecord {
    pub fn new(
        run_id: impl Into<String>,
        cell: &Cell,
        treatment: &Treatment,
        link_suspect: bool,
        trial: &Trial,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            cell: cell.id(),
            buffer_bytes: treatment.buffer_bytes,
            buffer_kib: treatment.buffer_kib(),
            delay_ms: treatment.delay_ms,
            rtt_ms: treatment.rtt_ms(),
            parallel_flows: treatment.parallel_flows,
            repetition: trial.repetition,
            throughput_mbps: trial.throughput_mbps(),
            status: trial.status(),
            detail: trial.detail(),
            link_suspect,
        }
    }

    pub fn treatment(&self) -> Treatment {
        Treatment {
            buffer_bytes: self.buffer_bytes,
            delay_ms: self.delay_ms,
            parallel_flows: self.parallel_flows,
        }
    }
}

/// One row of `summary_<ts>.csv`. All statistics are empty for cells without any valid sample.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SummaryRecord {
    pub cell: String,
    pub buffer_bytes: u64,
    pub buffer_kib: f64,
    pub delay_ms: u64,
    pub rtt_ms: u64,
    pub parallel_flows: u64,
    pub sample_count: usize,
    pub failed_trials: usize,
    pub mean_mbps: Option<f64>,
    pub std_dev_mbps: Option<f64>,
    pub margin_of_error_mbps: Option<f64>,
    pub ci_lower_mbps: Option<f64>,
    pub ci_upper_mbps: Option<f64>,
    pub min_mbps: Option<f64>,
    pub max_mbps: Option<f64>,
    pub confidence: f64,
    pub link_suspect: bool,
}

impl SummaryRecord {
    pub fn new(
        cell: impl Into<String>,
        treatment: &Treatment,
        summary: &Summary,
        failed_trials: usize,
        confidence: f64,
        link_suspect: bool,
    ) -> Self {
        let s = summary.statistics();
        Self {
            cell: cell.into(),
            buffer_bytes: treatment.buffer_bytes,
            buffer_kib: treatment.buffer_kib(),
            delay_ms: treatment.delay_ms,
            rtt_ms: treatment.rtt_ms(),
            parallel_flows: treatment.parallel_flows,
            sample_count: summary.sample_count(),
            failed_trials,
            mean_mbps: s.map(|s| s.mean),
            std_dev_mbps: s.map(|s| s.std_dev),
            margin_of_error_mbps: s.map(|s| s.margin_of_error),
            ci_lower_mbps: s.map(|s| s.ci_lower),
            ci_upper_mbps: s.map(|s| s.ci_upper),
            min_mbps: s.map(|s| s.min),
            max_mbps: s.map(|s| s.max),
            confidence: s.map(|s| s.confidence).unwrap_or(confidence),
            link_suspect,
        }
    }

    pub fn from_cell(cell: &CellResult, confidence: f64) -> Self {
        Self::new(
            cell.cell.id(),
            &cell.treatment,
            &cell.summary,
            cell.failed_trials(),
            confidence,
            cell.link_report.suspect(),
        )
    }

    pub fn treatment(&self) -> Treatment {
        Treatment {
            buffer_bytes: self.buffer_bytes,
            delay_ms: self.delay_ms,
            parallel_flows: self.parallel_flows,
        }
    }
}

/// Throughput parsed from one raw output file of a results directory. Levels
/// missing from the file name are left empty.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConsolidatedRecord {
    pub buffer_kib: Option<f64>,
    pub delay_ms: Option<u64>,
    pub parallel_flows: Option<u64>,
    pub repetition: Option<usize>,
    pub throughput_mbps: f64,
}
