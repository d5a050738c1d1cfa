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
use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use log::LevelFilter;

use sweeplab::{experiments::describe_plan, prelude::*, util};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// JSON configuration file. Missing fields take their default value.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Overwrite the number of repetitions per cell.
    #[arg(short, long)]
    repetitions: Option<usize>,
    /// Overwrite the confidence level of the intervals, e.g., 0.95.
    #[arg(long)]
    confidence: Option<f64>,
    /// Overwrite the directory for all artifacts.
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
    /// Overwrite the topology descriptor passed to the emulator.
    #[arg(short, long)]
    topology: Option<PathBuf>,
    /// Use this experiment id instead of a random one.
    #[arg(short, long)]
    experiment_id: Option<String>,
    /// Sweep these socket buffer sizes (in bytes).
    #[arg(long, value_delimiter = ',')]
    buffer_sizes: Option<Vec<u64>>,
    /// Sweep these one-way link delays (in milliseconds).
    #[arg(long, value_delimiter = ',')]
    delays: Option<Vec<u64>>,
    /// Sweep these numbers of parallel flows.
    #[arg(long, value_delimiter = ',')]
    flows: Option<Vec<u64>>,
    /// Run without background traffic.
    #[arg(long)]
    no_background: bool,
    /// Print the cells and the commands, but do not execute anything.
    #[arg(long)]
    dry_run: bool,
    /// Log debug messages on the console. Repeat for trace messages.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ExperimentConfig> {
        let mut config = match &self.config {
            Some(path) => ExperimentConfig::from_file(path)
                .with_context(|| format!("Cannot read the configuration from {path:?}"))?,
            None => ExperimentConfig::default(),
        };
        if let Some(x) = self.repetitions {
            config.repetitions = x;
        }
        if let Some(x) = self.confidence {
            config.confidence = x;
        }
        if let Some(x) = self.output_dir {
            config.output_dir = x;
        }
        if let Some(x) = self.topology {
            config.topology = x;
        }
        if let Some(x) = self.experiment_id {
            config.experiment_id = Some(x);
        }
        if let Some(x) = self.buffer_sizes {
            config.set_levels(FactorKind::BufferSize, x);
        }
        if let Some(x) = self.delays {
            config.set_levels(FactorKind::Delay, x);
        }
        if let Some(x) = self.flows {
            config.set_levels(FactorKind::ParallelFlows, x);
        }
        if self.no_background {
            config.background = None;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let dry_run = args.dry_run;
    let level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let config = args.into_config()?;

    if dry_run {
        println!(
            "{} cells, {} trials",
            config.num_trials() / config.repetitions,
            config.num_trials()
        );
        for line in describe_plan(&config) {
            println!("{line}");
        }
        return Ok(());
    }

    let context = RunContext::create(&config.output_dir)
        .with_context(|| format!("Cannot create {:?}", config.output_dir))?;
    let multi = util::init_logging(&context.log_file, level)
        .map_err(|e| anyhow::anyhow!("Cannot initialize logging: {e}"))?;
    log::info!("Run {} writes to {:?}", context.run_id, context.output_dir);

    let executor = Arc::new(LocalExecutor::new(config.tools.clone()));
    let harness = Harness::new(executor, config, context).with_progress(multi);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let run = runtime.block_on(harness.run())?;

    log::info!(
        "{} trials in {} cells, {} failed",
        run.num_trials(),
        run.cells.len(),
        run.num_failed_trials()
    );
    match run.status {
        RunStatus::Failed(reason) => Err(anyhow::anyhow!("The run failed: {reason}")),
        _ => Ok(()),
    }
}
