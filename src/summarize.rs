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
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use sweeplab::{
    report::{read_trials, render_chart, summaries_from_trials, swept_factors, write_summary},
    statistics::DEFAULT_CONFIDENCE,
    util::{get_timestamp, PathBufExt},
};

#[derive(Parser, Debug)]
#[command(about = "Recompute the cell summaries and the chart from a stored trial log")]
struct Args {
    /// Trial log, e.g., `results/trials_<ts>.csv`.
    trials: PathBuf,
    /// Confidence level of the intervals.
    #[arg(short, long, default_value_t = DEFAULT_CONFIDENCE)]
    confidence: f64,
    /// Output directory. Defaults to the directory of the trial log.
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();
    if !(args.confidence > 0.0 && args.confidence < 1.0) {
        anyhow::bail!("Confidence level {} is not in (0, 1)", args.confidence);
    }

    let rows = read_trials(&args.trials)
        .with_context(|| format!("Cannot read the trials from {:?}", args.trials))?;
    let summaries = summaries_from_trials(&rows, args.confidence);
    log::info!("{} trials in {} cells", rows.len(), summaries.len());

    let output_dir = args
        .output_dir
        .or_else(|| args.trials.parent().map(|p| p.to_path_buf()))
        .unwrap_or_default();
    std::fs::create_dir_all(&output_dir)?;
    let ts = get_timestamp();

    let summary_csv = output_dir.clone().then_ts("summary_{}.csv", &ts);
    write_summary(&summary_csv, &summaries)?;
    let chart = render_chart(
        output_dir.then_ts("throughput_{}.html", &ts),
        &summaries,
        &swept_factors(&summaries),
    )?;
    log::info!("Wrote {summary_csv:?} and {chart:?}");
    Ok(())
}
