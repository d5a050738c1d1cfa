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
//! Library for running factorial throughput experiments on an emulated network and summarizing
//! their results with confidence intervals.

pub mod config;
pub mod environment;
pub mod executor;
pub mod experiments;
pub mod factors;
pub mod link;
pub mod parser;
pub mod process;
pub mod records;
pub mod report;
pub mod statistics;
pub mod util;

#[cfg(test)]
mod test;

pub mod prelude {
    pub use super::{
        config::ExperimentConfig,
        executor::{Executor, LocalExecutor},
        experiments::{ExperimentRun, Harness, HarnessError, RunStatus},
        factors::{Factor, FactorKind},
        util::RunContext,
    };
}
