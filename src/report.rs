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
//! Persists the trials, the cell summaries, the chart and the manifest of a run.

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use itertools::Itertools;
use plotly::{
    common::{ErrorData, ErrorType},
    layout::{Axis, BarMode},
    Bar, Layout, Plot,
};
use serde::Serialize;

use crate::{
    config::ExperimentConfig,
    experiments::{ExperimentRun, RunStatus, Trial, TrialStatus},
    factors::{Cell, FactorKind, Treatment},
    link::LinkReport,
    parser,
    records::{ConsolidatedRecord, SummaryRecord, TrialRecord},
    statistics::summarize,
    util::RunContext,
};

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// Append-only log of the trials of a run. Every trial is on disk before the next one starts.
pub struct ReportWriter {
    context: RunContext,
    trials: csv::Writer<File>,
}

impl ReportWriter {
    pub fn create(context: &RunContext) -> Result<Self, ReportError> {
        fs::create_dir_all(&context.raw_dir)?;
        let trials = csv::Writer::from_path(&context.trials_csv)?;
        Ok(Self {
            context: context.clone(),
            trials,
        })
    }

    pub fn write_trial(
        &mut self,
        cell: &Cell,
        treatment: &Treatment,
        link_suspect: bool,
        trial: &Trial,
    ) -> Result<(), ReportError> {
        fs::write(
            self.context.raw_output(&cell.id(), trial.repetition),
            &trial.raw_output,
        )?;
        self.trials.serialize(TrialRecord::new(
            &self.context.run_id,
            cell,
            treatment,
            link_suspect,
            trial,
        ))?;
        self.trials.flush()?;
        self.trials.get_ref().sync_data()?;
        Ok(())
    }
}

pub fn write_summary(path: impl AsRef<Path>, records: &[SummaryRecord]) -> Result<(), ReportError> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_trials(path: impl AsRef<Path>) -> Result<Vec<TrialRecord>, ReportError> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;
    Ok(reader.deserialize().collect::<Result<Vec<_>, _>>()?)
}

/// Recompute the cell summaries from stored trial rows. Cells keep the order of their first trial.
pub fn summaries_from_trials(rows: &[TrialRecord], confidence: f64) -> Vec<SummaryRecord> {
    let cells = rows.iter().map(|r| r.cell.as_str()).unique().collect_vec();
    cells
        .into_iter()
        .map(|cell| {
            let trials = rows.iter().filter(|r| r.cell == cell).collect_vec();
            let samples = trials
                .iter()
                .filter(|r| r.status == TrialStatus::Ok)
                .filter_map(|r| r.throughput_mbps)
                .collect_vec();
            SummaryRecord::new(
                cell,
                &trials[0].treatment(),
                &summarize(&samples, confidence),
                trials.len() - samples.len(),
                confidence,
                trials.iter().any(|r| r.link_suspect),
            )
        })
        .collect()
}

/// Factors that take more than one value among the records, in the order of `FactorKind`.
pub fn swept_factors(records: &[SummaryRecord]) -> Vec<FactorKind> {
    use strum::IntoEnumIterator;
    FactorKind::iter()
        .filter(|k| records.iter().map(|r| r.treatment().get(*k)).unique().count() > 1)
        .collect()
}

/// Render a grouped bar chart of the mean throughput with the margin of error as error bars. The
/// first swept factor is on the x axis, and every combination of the remaining factors is a
/// separate trace. Cells without data are omitted.
pub fn render_chart(
    path: impl AsRef<Path>,
    records: &[SummaryRecord],
    swept: &[FactorKind],
) -> Result<PathBuf, ReportError> {
    let (x_kind, series_kinds) = match swept.split_first() {
        Some((x, rest)) => (*x, rest),
        None => (FactorKind::BufferSize, &[][..]),
    };
    let confidence = records.first().map(|r| r.confidence).unwrap_or_default();

    let mut series: Vec<(String, Vec<&SummaryRecord>)> = Vec::new();
    for record in records.iter().filter(|r| r.mean_mbps.is_some()) {
        let t = record.treatment();
        let name = if series_kinds.is_empty() {
            "mean throughput".to_string()
        } else {
            series_kinds
                .iter()
                .map(|k| k.display_level(t.get(*k)))
                .join(", ")
        };
        match series.iter_mut().find(|(n, _)| *n == name) {
            Some((_, group)) => group.push(record),
            None => series.push((name, vec![record])),
        }
    }

    let mut plot = Plot::new();
    for (name, group) in series {
        let x = group
            .iter()
            .map(|r| x_kind.display_level(r.treatment().get(x_kind)))
            .collect_vec();
        let y = group.iter().filter_map(|r| r.mean_mbps).collect_vec();
        let err = group
            .iter()
            .map(|r| r.margin_of_error_mbps.unwrap_or_default())
            .collect_vec();
        let trace = Bar::new(x, y)
            .name(&name)
            .error_y(ErrorData::new(ErrorType::Data).array(err));
        plot.add_trace(trace);
    }
    plot.set_layout(
        Layout::new()
            .title(format!(
                "<b>Throughput per configuration ({:.0}% confidence interval)</b>",
                confidence * 100.0
            ))
            .x_axis(Axis::new().title(x_kind.axis_title()))
            .y_axis(Axis::new().title("Throughput [Mbps]"))
            .bar_mode(BarMode::Group),
    );

    let path = path.as_ref().to_path_buf();
    log::debug!("Plotting {path:?}");
    fs::write(&path, plot.to_html())?;
    Ok(path)
}

/// Summary of a run stored next to its other artifacts.
#[derive(Debug, Serialize)]
pub struct RunManifest<'a> {
    pub run_id: &'a str,
    pub experiment_id: &'a str,
    pub status: &'a RunStatus,
    pub num_trials: usize,
    pub failed_trials: usize,
    pub background_failure: Option<&'a str>,
    /// Link configuration of every finished cell, including links that could not be read back.
    pub links: Vec<CellLinks<'a>>,
    pub artifacts: &'a RunContext,
    pub config: &'a ExperimentConfig,
}

#[derive(Debug, Serialize)]
pub struct CellLinks<'a> {
    pub cell: String,
    pub suspect: bool,
    #[serde(flatten)]
    pub report: &'a LinkReport,
}

impl<'a> RunManifest<'a> {
    pub fn from_run(run: &'a ExperimentRun, config: &'a ExperimentConfig) -> Self {
        Self {
            run_id: run.run_id(),
            experiment_id: &run.environment.eid,
            status: &run.status,
            num_trials: run.num_trials(),
            failed_trials: run.num_failed_trials(),
            background_failure: run.background_failure.as_deref(),
            links: run
                .cells
                .iter()
                .map(|c| CellLinks {
                    cell: c.cell.id(),
                    suspect: c.link_report.suspect(),
                    report: &c.link_report,
                })
                .collect(),
            artifacts: &run.context,
            config,
        }
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Re-parse every raw output (`iperf_*.txt`) in `dir`. The levels and the repetition are taken
/// from the file name. Files that cannot be parsed are skipped.
pub fn consolidate_raw_outputs(dir: impl AsRef<Path>) -> Result<Vec<ConsolidatedRecord>, ReportError> {
    let pattern = dir.as_ref().join("iperf_*.txt");
    let mut files = glob::glob(&pattern.to_string_lossy())?
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!("Skipping unreadable entry: {e}");
                None
            }
        })
        .collect_vec();
    files.sort_by(|a, b| human_sort::compare(&a.to_string_lossy(), &b.to_string_lossy()));

    let mut records = Vec::new();
    for file in files {
        let raw = fs::read(&file)?;
        let sample = match parser::extract(&String::from_utf8_lossy(&raw)) {
            Ok(sample) => sample,
            Err(e) => {
                log::warn!("Skipping {file:?}: {e}");
                continue;
            }
        };
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut record = ConsolidatedRecord {
            buffer_kib: None,
            delay_ms: None,
            parallel_flows: None,
            repetition: None,
            throughput_mbps: sample.mbps(),
        };
        for part in stem.trim_start_matches("iperf_").split('_') {
            if let Some(rep) = part.strip_prefix("rep").and_then(|r| r.parse().ok()) {
                record.repetition = Some(rep);
                continue;
            }
            match FactorKind::parse_label(part) {
                Some((FactorKind::BufferSize, b)) => record.buffer_kib = Some(b as f64 / 1024.0),
                Some((FactorKind::Delay, d)) => record.delay_ms = Some(d),
                Some((FactorKind::ParallelFlows, f)) => record.parallel_flows = Some(f),
                None => log::trace!("Ignoring {part:?} in {file:?}"),
            }
        }
        records.push(record);
    }
    Ok(records)
}
