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

use sweeplab::report::consolidate_raw_outputs;

#[derive(Parser, Debug)]
#[command(about = "Re-parse the raw measurement outputs of a directory into a single CSV")]
struct Args {
    /// Directory containing `iperf_<cell>_rep<n>.txt` files.
    raw_dir: PathBuf,
    /// Output file. Prints to stdout if omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    let records = consolidate_raw_outputs(&args.raw_dir)
        .with_context(|| format!("Cannot consolidate {:?}", args.raw_dir))?;
    log::info!("Consolidated {} measurements", records.len());

    let mut writer: csv::Writer<Box<dyn std::io::Write>> = match &args.output {
        Some(path) => csv::Writer::from_writer(Box::new(
            std::fs::File::create(path).with_context(|| format!("Cannot create {path:?}"))?,
        )),
        None => csv::Writer::from_writer(Box::new(std::io::stdout())),
    };
    for record in &records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}
