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
//! Module that iterates the cells of the factorial design, configures the links for each cell and
//! collects the repetitions of the measurement.

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use crate::{
    config::ExperimentConfig,
    environment::EnvironmentHandle,
    executor::Executor,
    factors::{self, enumerate_cells, Cell, DesignError, Factor, Treatment},
    link::{LinkConfigurator, LinkReport},
    report::{ReportError, ReportWriter},
    statistics::summarize,
};

use super::{CellResult, ExperimentRun, MeasurementRunner, Trial};

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("Invalid design: {0}")]
    Design(#[from] DesignError),
    #[error("Cannot record a trial: {0}")]
    Report(#[from] ReportError),
}

/// Progress of the sweep. Cells are processed strictly one after the other: a cell is configured,
/// measured and summarized before the next one is configured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SweepState {
    Idle,
    Configuring { cell: usize },
    Measuring { cell: usize, repetition: usize },
    Summarizing { cell: usize },
    Done,
}

pub struct SweepEngine<E> {
    configurator: LinkConfigurator<E>,
    runner: MeasurementRunner<E>,
    environment: EnvironmentHandle,
    links: Vec<String>,
    bandwidth_bps: u64,
    base: Treatment,
    confidence: f64,
    link_settle: std::time::Duration,
    state: SweepState,
    progress: ProgressBar,
    results: Option<mpsc::UnboundedSender<CellResult>>,
}

impl<E: Executor> SweepEngine<E> {
    pub fn new(executor: Arc<E>, config: &ExperimentConfig, environment: EnvironmentHandle) -> Self {
        Self {
            configurator: LinkConfigurator::new(
                executor.clone(),
                config.tools.clone(),
                config.timing.command_timeout(),
            ),
            runner: MeasurementRunner::new(
                executor,
                environment.clone(),
                config.measurement.clone(),
                config.tools.clone(),
                config.timing.clone(),
                config.base,
            ),
            environment,
            links: config.links.clone(),
            bandwidth_bps: config.bandwidth_bps,
            base: config.base,
            confidence: config.confidence,
            link_settle: config.timing.link_settle(),
            state: SweepState::Idle,
            progress: ProgressBar::hidden(),
            results: None,
        }
    }

    /// Also send every finished cell to `results`, such that finished cells survive an aborted
    /// sweep.
    pub fn with_results(mut self, results: mpsc::UnboundedSender<CellResult>) -> Self {
        self.results = Some(results);
        self
    }

    /// Report progress on `progress`. Its length is set when the sweep starts.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        progress.set_style(
            ProgressStyle::with_template(
                "{spinner} [{elapsed_precise}] {wide_bar} {pos}/{len} trials, eta: {eta} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        self.progress = progress;
        self
    }

    pub fn state(&self) -> &SweepState {
        &self.state
    }

    fn transition(&mut self, next: SweepState) {
        log::trace!("sweep: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run the complete sweep, appending every finished cell to `run`. Every trial is written to
    /// `writer` as soon as it is complete. A failed trial never aborts the sweep; only a failure
    /// to persist a trial does, after appending the trials of the current cell that were persisted.
    pub async fn run(
        &mut self,
        run: &mut ExperimentRun,
        factors: &[Factor],
        repetitions: usize,
        writer: &mut ReportWriter,
    ) -> Result<(), SweepError> {
        factors::validate(factors)?;
        let cells = enumerate_cells(factors);
        let num_cells = cells.len();
        self.progress.set_length((num_cells * repetitions) as u64);
        log::info!(
            "Sweeping {num_cells} cells with {repetitions} repetitions each ({} trials)",
            num_cells * repetitions
        );

        for cell in cells {
            let treatment = Treatment::resolve(&cell, &self.base);
            log::info!("Starting {cell}");
            self.progress.set_message(cell.id());

            self.transition(SweepState::Configuring { cell: cell.index });
            let link_report = self
                .configurator
                .apply_all(&self.environment, &self.links, self.bandwidth_bps, &treatment)
                .await;
            let link_suspect = link_report.suspect();
            if link_suspect {
                log::warn!(
                    "{} of {} links of {cell} keep their previous configuration, measurements are suspect",
                    link_report.failed.len(),
                    self.links.len()
                );
            }
            tokio::time::sleep(self.link_settle).await;

            let mut trials = Vec::with_capacity(repetitions);
            for repetition in 1..=repetitions {
                self.transition(SweepState::Measuring {
                    cell: cell.index,
                    repetition,
                });
                let trial = self.runner.run(&cell, repetition).await;
                if let Err(e) = writer.write_trial(&cell, &treatment, link_suspect, &trial) {
                    // keep the trials of this cell that are already on disk
                    self.finish_cell(run, cell, treatment, link_report, trials);
                    return Err(e.into());
                }
                trials.push(trial);
                self.progress.inc(1);
            }

            self.finish_cell(run, cell, treatment, link_report, trials);
        }

        self.transition(SweepState::Done);
        self.progress.finish_and_clear();
        Ok(())
    }

    fn finish_cell(
        &mut self,
        run: &mut ExperimentRun,
        cell: Cell,
        treatment: Treatment,
        link_report: LinkReport,
        trials: Vec<Trial>,
    ) {
        self.transition(SweepState::Summarizing { cell: cell.index });
        let samples = trials.iter().filter_map(Trial::throughput_mbps).collect::<Vec<_>>();
        let result = CellResult {
            cell,
            treatment,
            link_report,
            trials,
            summary: summarize(&samples, self.confidence),
        };
        match result.summary.statistics() {
            Some(s) => log::info!(
                "{}: {:.2} ± {:.2} Mbps over {} samples ({} failed)",
                result.cell,
                s.mean,
                s.margin_of_error,
                s.sample_count,
                result.failed_trials()
            ),
            None => log::warn!("{}: no valid sample", result.cell),
        }
        if let Some(tx) = &self.results {
            // the receiver only goes away together with the harness
            let _ = tx.send(result.clone());
        }
        run.cells.push(result);
    }
}
