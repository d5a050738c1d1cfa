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
//! Configuration of an experiment. Every value defaults to the reference scenario: a 100 Mbps
//! topology with two routers and four hosts, sweeping the socket buffer size and the link delay.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    factors::{self, DesignError, Factor, FactorKind, Treatment},
    statistics::DEFAULT_CONFIDENCE,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot parse the configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid design: {0}")]
    Design(#[from] DesignError),
    #[error("At least one repetition is required")]
    NoRepetitions,
    #[error("Confidence level {0} is not in (0, 1)")]
    Confidence(f64),
    #[error("The bandwidth must be positive")]
    Bandwidth,
    #[error("No link to configure")]
    NoLinks,
}

/// Complete description of an experiment.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentConfig {
    /// Identifier of the emulated experiment. Generated if missing.
    pub experiment_id: Option<String>,
    /// Topology descriptor passed to the emulator.
    pub topology: PathBuf,
    /// Bandwidth applied to every link, constant for the whole run.
    pub bandwidth_bps: u64,
    /// Factors to sweep, outermost first.
    pub factors: Vec<Factor>,
    /// Levels used for factors that are not swept.
    pub base: Treatment,
    pub repetitions: usize,
    pub confidence: f64,
    pub output_dir: PathBuf,
    /// Links on the path under test, as `node:node`. Every link is reconfigured for every cell.
    pub links: Vec<String>,
    pub measurement: MeasurementConfig,
    /// Optional cross-traffic that runs during the whole sweep.
    pub background: Option<BackgroundTraffic>,
    pub timing: Timing,
    pub tools: ToolConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            experiment_id: None,
            topology: PathBuf::from("scenario.imn"),
            bandwidth_bps: 100_000_000,
            factors: vec![
                Factor::new(FactorKind::BufferSize, [65536, 212992]),
                Factor::new(FactorKind::Delay, [5, 50]),
            ],
            base: Treatment::default(),
            repetitions: 5,
            confidence: DEFAULT_CONFIDENCE,
            output_dir: PathBuf::from("./results"),
            links: [
                "router1:pc1",
                "router1:pc3",
                "router2:pc2",
                "router2:pc4",
                "router2:router1",
            ]
            .map(String::from)
            .to_vec(),
            measurement: MeasurementConfig::default(),
            background: Some(BackgroundTraffic::default()),
            timing: Timing::default(),
            tools: ToolConfig::default(),
        }
    }
}

impl ExperimentConfig {
    /// Read the configuration from a JSON file. Missing fields keep their default value.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = File::open(path.as_ref())?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        factors::validate(&self.factors)?;
        self.base.validate()?;
        if self.repetitions == 0 {
            return Err(ConfigError::NoRepetitions);
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(ConfigError::Confidence(self.confidence));
        }
        if self.bandwidth_bps == 0 {
            return Err(ConfigError::Bandwidth);
        }
        if self.links.is_empty() {
            return Err(ConfigError::NoLinks);
        }
        Ok(())
    }

    /// Kinds of the swept factors, in declared order.
    pub fn swept(&self) -> Vec<FactorKind> {
        self.factors.iter().map(|f| f.kind).collect()
    }

    /// Total number of trials of the sweep.
    pub fn num_trials(&self) -> usize {
        self.factors.iter().map(|f| f.levels.len()).product::<usize>() * self.repetitions
    }

    /// Replace the levels of a factor, or append the factor if it is not swept yet.
    pub fn set_levels(&mut self, kind: FactorKind, levels: Vec<u64>) {
        match self.factors.iter_mut().find(|f| f.kind == kind) {
            Some(f) => f.levels = levels,
            None => self.factors.push(Factor { kind, levels }),
        }
    }
}

/// Report shape requested from the traffic generator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    /// Human-readable report, rate in `Mbits/sec`.
    #[default]
    Human,
    /// Delimited report (`-y C`), rate in bits per second.
    Csv,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MeasurementConfig {
    /// Node running the traffic-generating client.
    pub client: String,
    /// Node running the responder, or `None` if the responder is managed outside the harness.
    pub responder: Option<String>,
    /// Address the client connects to.
    pub server_address: String,
    /// Amount of data to transfer, as understood by the traffic generator (e.g., `100M`).
    pub transfer: String,
    /// Reporting interval in seconds.
    pub interval_s: u64,
    pub report_format: ReportFormat,
    /// Additional arguments appended to the client command.
    pub extra_args: Vec<String>,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            client: "pc3".to_string(),
            responder: Some("pc4".to_string()),
            server_address: "10.0.4.20".to_string(),
            transfer: "100M".to_string(),
            interval_s: 1,
            report_format: ReportFormat::Human,
            extra_args: Vec::new(),
        }
    }
}

/// UDP cross-traffic between two other hosts of the topology.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackgroundTraffic {
    pub responder: String,
    pub generator: String,
    pub target_address: String,
    /// Sending rate, e.g., `10M`.
    pub rate: String,
    pub duration_s: u64,
}

impl Default for BackgroundTraffic {
    fn default() -> Self {
        Self {
            responder: "pc2".to_string(),
            generator: "pc1".to_string(),
            target_address: "10.0.3.20".to_string(),
            rate: "10M".to_string(),
            duration_s: 100_000,
        }
    }
}

/// Settling delays and timeouts. Increase the settling delays if the emulated links take longer
/// to settle.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Timing {
    pub environment_settle_ms: u64,
    pub link_settle_ms: u64,
    pub responder_settle_ms: u64,
    pub environment_timeout_s: u64,
    pub command_timeout_s: u64,
    pub measurement_timeout_s: u64,
    /// Time a process gets to exit after `SIGTERM` before it is killed.
    pub stop_grace_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            environment_settle_ms: 5_000,
            link_settle_ms: 1_000,
            responder_settle_ms: 1_000,
            environment_timeout_s: 300,
            command_timeout_s: 60,
            measurement_timeout_s: 600,
            stop_grace_ms: 2_000,
        }
    }
}

impl Timing {
    pub fn environment_settle(&self) -> Duration {
        Duration::from_millis(self.environment_settle_ms)
    }

    pub fn link_settle(&self) -> Duration {
        Duration::from_millis(self.link_settle_ms)
    }

    pub fn responder_settle(&self) -> Duration {
        Duration::from_millis(self.responder_settle_ms)
    }

    pub fn environment_timeout(&self) -> Duration {
        Duration::from_secs(self.environment_timeout_s)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_s)
    }

    pub fn measurement_timeout(&self) -> Duration {
        Duration::from_secs(self.measurement_timeout_s)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// External tools driven by the harness.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Prefix every command with `sudo`.
    pub sudo: bool,
    /// Network emulator, started as `<emulator> -b -e <eid> <topology>`.
    pub emulator: String,
    /// Runs a command on a node, as `<node_exec> <node>@<eid> <command...>`.
    pub node_exec: String,
    /// Link shaping tool, as `<link_tool> -bw <bps> -dly <us> <link>@<eid>`.
    pub link_tool: String,
    /// Traffic generator used for the measurement and the background traffic.
    pub traffic: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            sudo: true,
            emulator: "imunes".to_string(),
            node_exec: "himage".to_string(),
            link_tool: "vlink".to_string(),
            traffic: "iperf".to_string(),
        }
    }
}

/// Generate an experiment identifier in the format of the emulator, e.g., `i3f2a`.
pub fn generate_experiment_id() -> String {
    format!("i{:04x}", rand::random::<u16>())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_describe_reference_scenario() {
        let config = ExperimentConfig::default();
        config.validate().unwrap();
        assert_eq!(config.bandwidth_bps, 100_000_000);
        assert_eq!(config.links.len(), 5);
        assert_eq!(config.repetitions, 5);
        assert_eq!(config.confidence, 0.95);
        assert_eq!(config.num_trials(), 20);
        assert_eq!(
            config.swept(),
            vec![FactorKind::BufferSize, FactorKind::Delay]
        );
    }

    #[test]
    fn partial_json() {
        let json = r#"
        {
            "repetitions": 8,
            "factors": [
                { "kind": "delay", "levels": [10, 100] },
                { "kind": "parallel_flows", "levels": [1, 4] }
            ],
            "base": { "buffer_bytes": 131072 },
            "measurement": { "report_format": "csv" },
            "background": null,
            "tools": { "sudo": false }
        }"#;
        let config: ExperimentConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.repetitions, 8);
        assert_eq!(config.num_trials(), 32);
        assert_eq!(config.base.buffer_bytes, 131072);
        assert_eq!(config.base.delay_ms, 5);
        assert_eq!(config.measurement.report_format, ReportFormat::Csv);
        assert_eq!(config.measurement.client, "pc3");
        assert_eq!(config.background, None);
        assert!(!config.tools.sudo);
        assert_eq!(config.tools.link_tool, "vlink");
        assert_eq!(config.timing, Timing::default());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_json::from_str::<ExperimentConfig>(r#"{ "repetition": 3 }"#).is_err());
    }

    #[test]
    fn invalid_configs() {
        let mut config = ExperimentConfig {
            repetitions: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoRepetitions)));

        config.repetitions = 1;
        for confidence in [0.0, 1.0, -0.5, f64::NAN] {
            config.confidence = confidence;
            assert!(matches!(config.validate(), Err(ConfigError::Confidence(_))));
        }

        config.confidence = 0.9;
        config.links.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoLinks)));

        let config = ExperimentConfig {
            factors: vec![Factor::new(FactorKind::Delay, [5, 5])],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Design(DesignError::DuplicateLevel(
                FactorKind::Delay,
                5
            )))
        ));

        let mut config = ExperimentConfig::default();
        config.set_levels(FactorKind::Delay, vec![10, 10_000_000_000_000_000]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Design(DesignError::OutOfRange(FactorKind::Delay, _)))
        ));

        let mut config = ExperimentConfig::default();
        config.base.delay_ms = u64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Design(DesignError::OutOfRange(FactorKind::Delay, _)))
        ));
    }

    #[test]
    fn set_levels() {
        let mut config = ExperimentConfig::default();
        config.set_levels(FactorKind::Delay, vec![1, 2, 3]);
        config.set_levels(FactorKind::ParallelFlows, vec![2]);
        assert_eq!(config.factors[1].levels, vec![1, 2, 3]);
        assert_eq!(config.factors[2], Factor::new(FactorKind::ParallelFlows, [2]));
        assert_eq!(config.num_trials(), 2 * 3 * 5);
    }

    #[test]
    fn experiment_id() {
        let id = generate_experiment_id();
        assert_eq!(id.len(), 5);
        assert!(id.starts_with('i'));
    }
}
