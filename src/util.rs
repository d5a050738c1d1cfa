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
//! Utility module collection of functions

use std::{
    fs,
    path::{Path, PathBuf},
};

use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use log::LevelFilter;
use log4rs::{
    append::{console::ConsoleAppender, file::FileAppender},
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
};
use serde::{Deserialize, Serialize};
use time::{format_description::FormatItem, macros::format_description, OffsetDateTime};

const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");

/// Log to the console at `level` and to `log_file` at debug level or finer. Log lines are routed
/// around the progress bars of the returned [`MultiProgress`].
pub fn init_logging(
    log_file: impl AsRef<Path>,
    level: LevelFilter,
) -> Result<MultiProgress, Box<dyn std::error::Error>> {
    let console = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{h({l:<5})} {m}{n}")))
        .build();
    let file = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S%.3f)} {l:<5} {t} - {m}{n}",
        )))
        .build(log_file.as_ref())?;
    let root_level = level.max(LevelFilter::Debug);

    let config = Config::builder()
        .appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(level)))
                .build("console", Box::new(console)),
        )
        .appender(Appender::builder().build("file", Box::new(file)))
        .build(
            Root::builder()
                .appender("console")
                .appender("file")
                .build(root_level),
        )?;

    let multi = MultiProgress::new();
    LogWrapper::new(multi.clone(), log4rs::Logger::new(config)).try_init()?;
    log::set_max_level(root_level);
    Ok(multi)
}

/// Local time formatted to be used in file names, e.g., `2024-03-01_14-05-59`.
pub fn get_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(TIMESTAMP_FORMAT)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

pub trait PathBufExt: Sized {
    fn then(self, p: impl AsRef<Path>) -> PathBuf;

    fn then_ts(self, p: impl AsRef<str>, ts: &str) -> PathBuf {
        self.then(p.as_ref().replacen("{}", ts, 1))
    }
}

impl PathBufExt for PathBuf {
    fn then(mut self, p: impl AsRef<Path>) -> PathBuf {
        self.push(p);
        self
    }
}

impl PathBufExt for &Path {
    fn then(self, p: impl AsRef<Path>) -> PathBuf {
        let mut path = self.to_path_buf();
        path.push(p);
        path
    }
}

/// Identifier of a run and the location of all its artifacts. All artifacts of a run share the
/// same timestamp.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RunContext {
    pub run_id: String,
    pub output_dir: PathBuf,
    pub trials_csv: PathBuf,
    pub summary_csv: PathBuf,
    pub chart: PathBuf,
    pub manifest: PathBuf,
    pub raw_dir: PathBuf,
    pub log_file: PathBuf,
}

impl RunContext {
    pub fn new(output_dir: impl AsRef<Path>, run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        let root = output_dir.as_ref();
        Self {
            trials_csv: root.then_ts("trials_{}.csv", &run_id),
            summary_csv: root.then_ts("summary_{}.csv", &run_id),
            chart: root.then_ts("throughput_{}.html", &run_id),
            manifest: root.then_ts("run_{}.json", &run_id),
            raw_dir: root.then_ts("raw_{}", &run_id),
            log_file: root.then("logs").then_ts("experiment_{}.log", &run_id),
            output_dir: root.to_path_buf(),
            run_id,
        }
    }

    /// Create a context for a new run, creating the output directories.
    pub fn create(output_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let ctx = Self::new(output_dir, get_timestamp());
        fs::create_dir_all(&ctx.raw_dir)?;
        if let Some(logs) = ctx.log_file.parent() {
            fs::create_dir_all(logs)?;
        }
        Ok(ctx)
    }

    /// File storing the raw output of a trial, e.g., `raw_<ts>/iperf_buffer64K_delay5ms_rep3.txt`.
    pub fn raw_output(&self, cell_id: &str, repetition: usize) -> PathBuf {
        self.raw_dir
            .as_path()
            .then(format!("iperf_{cell_id}_rep{repetition}.txt"))
    }
}
