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
//! Module orchestrating a complete run: start the environment, run the sweep, write the reports,
//! and tear everything down again.
//!
//! Once the environment is started, it is stopped exactly once, whatever happens afterwards: a
//! failed report, a panic, or a cancellation by the user, even while the environment is still
//! starting.

use std::{future::Future, sync::Arc};

use indicatif::{MultiProgress, ProgressBar};
use itertools::Itertools;
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::mpsc,
};

use crate::{
    config::{generate_experiment_id, ConfigError, ExperimentConfig},
    environment::{EnvironmentError, EnvironmentHandle, Lifecycle},
    executor::{Executor, LocalExecutor},
    factors::{enumerate_cells, FactorKind, Treatment},
    link::LinkConfigurator,
    process::NodeProcess,
    records::SummaryRecord,
    report::{render_chart, write_summary, ReportError, ReportWriter, RunManifest},
    util::RunContext,
};

use super::{ExperimentRun, MeasurementRunner, RunStatus, SweepEngine};

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Cannot create the reports: {0}")]
    Report(#[from] ReportError),
    #[error("Cannot listen for Ctrl-C: {0}")]
    Signal(#[source] std::io::Error),
    #[error("Cannot start the environment: {0}")]
    EnvironmentStart(#[source] EnvironmentError),
    #[error("The sweep panicked")]
    Panicked,
    #[error("The run was cancelled")]
    Cancelled,
}

pub struct Harness<E> {
    executor: Arc<E>,
    config: ExperimentConfig,
    context: RunContext,
    progress: Option<MultiProgress>,
}

impl<E: Executor> Harness<E> {
    pub fn new(executor: Arc<E>, config: ExperimentConfig, context: RunContext) -> Self {
        Self {
            executor,
            config,
            context,
            progress: None,
        }
    }

    /// Show the progress of the sweep as part of `multi`.
    pub fn with_progress(mut self, multi: MultiProgress) -> Self {
        self.progress = Some(multi);
        self
    }

    /// Run the experiment until it is done or the user presses Ctrl-C.
    pub async fn run(self) -> Result<ExperimentRun, HarnessError> {
        // The handler is installed here, before the environment is started. Until then, Ctrl-C
        // terminates the process.
        let mut interrupt = signal(SignalKind::interrupt()).map_err(HarnessError::Signal)?;
        self.run_until(async move {
            if interrupt.recv().await.is_none() {
                std::future::pending::<()>().await
            }
        })
        .await
    }

    /// Run the experiment until it is done or `cancel` completes.
    ///
    /// Every run that passed validation leaves a manifest, and the summary and chart of all cells
    /// that were completely measured. A sweep that aborted (e.g., because a trial could not be
    /// persisted) still returns the run, with the status set to [`RunStatus::Failed`].
    pub async fn run_until(
        self,
        cancel: impl Future<Output = ()>,
    ) -> Result<ExperimentRun, HarnessError> {
        self.config.validate()?;
        let eid = self
            .config
            .experiment_id
            .clone()
            .unwrap_or_else(generate_experiment_id);
        let writer = ReportWriter::create(&self.context)?;
        let lifecycle = Lifecycle::new(
            self.executor.clone(),
            self.config.tools.clone(),
            self.config.timing.clone(),
        );
        let mut run = ExperimentRun::new(self.context.clone(), EnvironmentHandle::new(&eid));
        let mut background = Vec::new();
        tokio::pin!(cancel);

        let mut result = tokio::select! {
            started = lifecycle.start(&eid, &self.config.topology) => {
                started.map(|_| ()).map_err(HarnessError::EnvironmentStart)
            }
            _ = &mut cancel => {
                log::warn!("Cancelled while starting environment {eid}");
                Err(HarnessError::Cancelled)
            }
        };
        // a partially started environment must be stopped as well
        let stop_environment = match &result {
            Err(HarnessError::EnvironmentStart(e)) => {
                log::error!("Cannot start environment {eid}: {e}");
                e.reached_emulator()
            }
            _ => true,
        };

        if result.is_ok() {
            let cancelled = tokio::select! {
                failure = self.start_background(&run.environment, &mut background) => {
                    run.background_failure = failure;
                    false
                }
                _ = &mut cancel => {
                    log::warn!("Cancelled while starting the background traffic");
                    true
                }
            };
            result = if cancelled {
                Err(HarnessError::Cancelled)
            } else {
                self.sweep(&mut run, writer, &mut cancel).await
            };
        }

        self.stop_background(background).await;
        if stop_environment {
            if let Err(e) = lifecycle.stop(&eid).await {
                log::error!("Failed to stop environment {eid}: {e}");
            }
        }

        match &result {
            Ok(()) => {}
            Err(HarnessError::Cancelled) => run.status = RunStatus::Cancelled,
            Err(e) => run.status = RunStatus::Failed(e.to_string()),
        }
        if !run.cells.is_empty() || result.is_ok() {
            finalize(&mut run, self.config.confidence, &self.config.swept());
        }
        if let Err(e) = RunManifest::from_run(&run, &self.config).write(&self.context.manifest) {
            log::error!("Cannot write the run manifest: {e}");
        }
        result.map(|()| run)
    }

    /// Run the sweep in a separate task, such that a panic or a cancellation does not prevent the
    /// teardown. Every cell finished before the sweep ended is appended to `run`.
    async fn sweep(
        &self,
        run: &mut ExperimentRun,
        mut writer: ReportWriter,
        cancel: impl Future<Output = ()> + Unpin,
    ) -> Result<(), HarnessError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut engine = SweepEngine::new(
            self.executor.clone(),
            &self.config,
            run.environment.clone(),
        )
        .with_results(tx);
        if let Some(multi) = &self.progress {
            engine = engine.with_progress(multi.add(ProgressBar::new(0)));
        }
        let factors = self.config.factors.clone();
        let repetitions = self.config.repetitions;
        let mut scratch = run.clone();

        let mut task = tokio::spawn(async move {
            engine
                .run(&mut scratch, &factors, repetitions, &mut writer)
                .await
        });

        let joined = tokio::select! {
            joined = &mut task => Some(joined),
            _ = cancel => None,
        };

        let result = match joined {
            Some(Ok(Ok(()))) => Ok(()),
            Some(Ok(Err(e))) => {
                log::error!("The sweep aborted: {e}");
                run.status = RunStatus::Failed(e.to_string());
                Ok(())
            }
            Some(Err(e)) if e.is_panic() => {
                log::error!("The sweep panicked: {e}");
                Err(HarnessError::Panicked)
            }
            Some(Err(_)) => Err(HarnessError::Cancelled),
            None => {
                log::warn!("Cancelled by the user, aborting the sweep");
                task.abort();
                let _ = task.await;
                Err(HarnessError::Cancelled)
            }
        };

        // the engine and its sender are gone, so every finished cell is in the channel
        while let Ok(cell) = rx.try_recv() {
            run.cells.push(cell);
        }
        result
    }

    /// Start the background traffic, pushing every started process to `processes`. Returns the
    /// reason if it cannot be started; the run continues without it.
    async fn start_background(
        &self,
        environment: &EnvironmentHandle,
        processes: &mut Vec<NodeProcess>,
    ) -> Option<String> {
        let bg = self.config.background.as_ref()?;
        let traffic = &self.config.tools.traffic;
        let responder = vec![traffic.clone(), "-s".to_string(), "-u".to_string()];
        let generator = vec![
            traffic.clone(),
            "-c".to_string(),
            bg.target_address.clone(),
            "-u".to_string(),
            "-t".to_string(),
            bg.duration_s.to_string(),
            "-b".to_string(),
            bg.rate.clone(),
        ];

        for (node, label, command) in [
            (&bg.responder, "background responder", responder),
            (&bg.generator, "background generator", generator),
        ] {
            match NodeProcess::start(
                self.executor.as_ref(),
                &environment.endpoint(node),
                label,
                &command,
                self.config.timing.command_timeout(),
            )
            .await
            {
                Ok(p) => processes.push(p),
                Err(e) => {
                    log::warn!("Continuing without background traffic: {e}");
                    return Some(e.to_string());
                }
            }
        }
        log::info!(
            "Background traffic from {} to {} at {}bps",
            bg.generator,
            bg.target_address,
            bg.rate
        );
        None
    }

    async fn stop_background(&self, processes: Vec<NodeProcess>) {
        for process in processes.into_iter().rev() {
            let label = process.label().to_string();
            if let Err(e) = process
                .stop(
                    self.executor.as_ref(),
                    self.config.timing.stop_grace(),
                    self.config.timing.command_timeout(),
                )
                .await
            {
                log::error!("Failed to stop the {label}: {e}");
            }
        }
    }
}

/// Write the summary and the chart of all finished cells. Only cells that were completely
/// measured are part of the summary.
fn finalize(run: &mut ExperimentRun, confidence: f64, swept: &[FactorKind]) {
    let records = run
        .cells
        .iter()
        .map(|c| SummaryRecord::from_cell(c, confidence))
        .collect_vec();
    let written = write_summary(&run.context.summary_csv, &records)
        .and_then(|_| render_chart(&run.context.chart, &records, swept));
    match written {
        Ok(chart) => log::info!(
            "Wrote {:?} and {chart:?}",
            run.context.summary_csv
        ),
        Err(e) => {
            log::error!("Cannot write the summary: {e}");
            if run.status == RunStatus::Running {
                run.status = RunStatus::Failed(format!("Cannot write the summary: {e}"));
            }
        }
    }
    if run.status == RunStatus::Running {
        run.status = RunStatus::Completed;
    }
}

/// Describe every command line the harness would execute on this host, without executing
/// anything.
pub fn describe_plan(config: &ExperimentConfig) -> Vec<String> {
    let eid = config
        .experiment_id
        .clone()
        .unwrap_or_else(|| "<eid>".to_string());
    let environment = EnvironmentHandle::new(&eid);
    let executor = Arc::new(LocalExecutor::new(config.tools.clone()));
    let lifecycle = Lifecycle::new(executor.clone(), config.tools.clone(), config.timing.clone());
    let links = LinkConfigurator::new(
        executor.clone(),
        config.tools.clone(),
        config.timing.command_timeout(),
    );
    let runner = MeasurementRunner::new(
        executor.clone(),
        environment.clone(),
        config.measurement.clone(),
        config.tools.clone(),
        config.timing.clone(),
        config.base,
    );
    let line = |endpoint: Option<&str>, command: &[String]| {
        let endpoint = endpoint.map(|node| environment.endpoint(node));
        executor.argv(endpoint.as_ref(), command).join(" ")
    };

    let mut plan = vec![line(None, &lifecycle.start_command(&eid, &config.topology))];
    for cell in enumerate_cells(&config.factors) {
        let treatment = Treatment::resolve(&cell, &config.base);
        plan.push(format!("# {cell}, {} repetitions", config.repetitions));
        for link in &config.links {
            plan.push(line(
                None,
                &links.apply_command(
                    &environment.link(link),
                    config.bandwidth_bps,
                    treatment.delay_us(),
                ),
            ));
        }
        if let Some(node) = &config.measurement.responder {
            plan.push(line(Some(node), &runner.responder_command()));
        }
        plan.push(line(
            Some(&config.measurement.client),
            &runner.client_command(&treatment),
        ));
    }
    plan.push(line(None, &lifecycle.stop_command(&eid)));
    plan
}
