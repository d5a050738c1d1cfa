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
//! Extracts a throughput sample from the textual report of the traffic generator.
//!
//! Two report shapes are understood:
//!
//! - the human-readable summary line, e.g. `[  3]  0.0-10.0 sec   112 MBytes  94.1 Mbits/sec`,
//! - the delimited report printed with `iperf -y C`, e.g.
//!   `20240101120000,10.0.3.20,5001,10.0.4.20,41234,3,0.0-10.0,117964800,94371840`, carrying the
//!   rate in bits per second in column [`DELIMITED_RATE_COLUMN`].
//!
//! Lines are scanned from the end towards the start, as the terminal summary of a report is
//! printed last. The parser never panics on malformed input; every failure keeps the offending
//! line for diagnostics.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Number of columns of a delimited report line.
pub const DELIMITED_COLUMNS: usize = 9;
/// Zero-based column of a delimited report line holding the rate in bits per second.
pub const DELIMITED_RATE_COLUMN: usize = 8;
/// Zero-based column of a delimited report line holding the number of transferred bytes.
pub const DELIMITED_BYTES_COLUMN: usize = 7;

lazy_static! {
    static ref RATE_UNIT: Regex = Regex::new(r"^(?P<prefix>[KMG]?)bits/sec$").unwrap();
}

/// Unit in which the traffic generator reported the rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum RateUnit {
    #[strum(serialize = "bits/sec")]
    BitsPerSec,
    #[strum(serialize = "Kbits/sec")]
    KbitsPerSec,
    #[strum(serialize = "Mbits/sec")]
    MbitsPerSec,
    #[strum(serialize = "Gbits/sec")]
    GbitsPerSec,
}

impl RateUnit {
    fn from_prefix(prefix: &str) -> Self {
        match prefix {
            "K" => Self::KbitsPerSec,
            "M" => Self::MbitsPerSec,
            "G" => Self::GbitsPerSec,
            _ => Self::BitsPerSec,
        }
    }
}

/// Throughput value as reported by the tool, in its native unit.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: f64,
    pub unit: RateUnit,
    /// Transferred bytes, only available in the delimited report.
    pub transferred_bytes: Option<u64>,
}

impl Sample {
    /// Convert the sample into Mbps, the unit used everywhere after the parser.
    ///
    /// This must be the only place where a conversion happens. A rate in bits per second is
    /// divided by 1'000'000 exactly once.
    pub fn mbps(&self) -> f64 {
        match self.unit {
            RateUnit::BitsPerSec => self.value / 1_000_000.0,
            RateUnit::KbitsPerSec => self.value / 1_000.0,
            RateUnit::MbitsPerSec => self.value,
            RateUnit::GbitsPerSec => self.value * 1_000.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseFailure {
    #[error("No line in the output looks like a throughput report")]
    NoMatchingLine,
    #[error("Expected {expected} columns but found {found} in {line:?}")]
    ColumnCount {
        expected: usize,
        found: usize,
        line: String,
    },
    #[error("Cannot read {token:?} as a throughput value in {line:?}")]
    InvalidNumber { token: String, line: String },
    #[error("Rate unit without a value in {line:?}")]
    MissingValue { line: String },
}

impl ParseFailure {
    /// The line that was selected as the report, if any.
    pub fn line(&self) -> Option<&str> {
        match self {
            Self::NoMatchingLine => None,
            Self::ColumnCount { line, .. }
            | Self::InvalidNumber { line, .. }
            | Self::MissingValue { line } => Some(line),
        }
    }
}

/// Extract the throughput sample from the complete output of one measurement.
pub fn extract(raw: &str) -> Result<Sample, ParseFailure> {
    let line = raw
        .lines()
        .rev()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .find(|l| rate_token(l).is_some() || l.contains(','))
        .ok_or(ParseFailure::NoMatchingLine)?;

    match rate_token(line) {
        Some((idx, unit)) => parse_human(line, idx, unit),
        None => parse_delimited(line),
    }
}

/// Position and unit of the first rate-unit token in the line.
fn rate_token(line: &str) -> Option<(usize, RateUnit)> {
    line.split_whitespace().enumerate().find_map(|(i, token)| {
        RATE_UNIT
            .captures(token)
            .map(|c| (i, RateUnit::from_prefix(c.name("prefix").map_or("", |m| m.as_str()))))
    })
}

fn parse_human(line: &str, unit_idx: usize, unit: RateUnit) -> Result<Sample, ParseFailure> {
    let token = unit_idx
        .checked_sub(1)
        .and_then(|i| line.split_whitespace().nth(i))
        .ok_or_else(|| ParseFailure::MissingValue {
            line: line.to_string(),
        })?;
    Ok(Sample {
        value: parse_rate(token, line)?,
        unit,
        transferred_bytes: None,
    })
}

fn parse_delimited(line: &str) -> Result<Sample, ParseFailure> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != DELIMITED_COLUMNS {
        return Err(ParseFailure::ColumnCount {
            expected: DELIMITED_COLUMNS,
            found: fields.len(),
            line: line.to_string(),
        });
    }
    Ok(Sample {
        value: parse_rate(fields[DELIMITED_RATE_COLUMN], line)?,
        unit: RateUnit::BitsPerSec,
        transferred_bytes: fields[DELIMITED_BYTES_COLUMN].parse().ok(),
    })
}

fn parse_rate(token: &str, line: &str) -> Result<f64, ParseFailure> {
    match token.parse::<f64>() {
        Ok(x) if x.is_finite() && x >= 0.0 => Ok(x),
        _ => Err(ParseFailure::InvalidNumber {
            token: token.to_string(),
            line: line.to_string(),
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const HUMAN_REPORT: &str = "\
------------------------------------------------------------
Client connecting to 10.0.4.20, TCP port 5001
TCP window size:  416 KByte (WARNING: requested  208 KByte)
------------------------------------------------------------
[  3] local 10.0.3.20 port 41234 connected with 10.0.4.20 port 5001
[ ID] Interval       Transfer     Bandwidth
[  3]  0.0- 1.0 sec  11.2 MBytes  94.4 Mbits/sec
[  3]  1.0- 2.0 sec  11.1 MBytes  93.3 Mbits/sec
[  3]  0.0- 8.9 sec   100 MBytes  94.1 Mbits/sec
";

    #[test]
    fn human_report_uses_last_summary() {
        let sample = extract(HUMAN_REPORT).unwrap();
        assert_eq!(sample.unit, RateUnit::MbitsPerSec);
        assert_eq!(sample.value, 94.1);
        assert_eq!(sample.mbps(), 94.1);
        assert_eq!(sample.transferred_bytes, None);
    }

    #[test]
    fn human_report_with_trailer() {
        let raw = "[  5]   0.00-10.00  sec   112 MBytes  94.0 Mbits/sec  receiver\n\niperf Done.\n";
        let sample = extract(raw).unwrap();
        assert_eq!(sample.mbps(), 94.0);
    }

    #[test]
    fn human_report_other_units() {
        let sample = extract("[  3]  0.0-10.0 sec  1.10 GBytes   945 Kbits/sec").unwrap();
        assert_eq!(sample.unit, RateUnit::KbitsPerSec);
        assert_eq!(sample.mbps(), 0.945);

        let sample = extract("[SUM]  0.0-10.0 sec  11.0 GBytes  9.41 Gbits/sec").unwrap();
        assert_eq!(sample.unit, RateUnit::GbitsPerSec);
        assert!((sample.mbps() - 9410.0).abs() < 1e-9);
    }

    #[test]
    fn delimited_report_in_bits_per_second() {
        let sample = extract("...,...,...,...,...,...,...,...,45200000\n").unwrap();
        assert_eq!(sample.unit, RateUnit::BitsPerSec);
        assert_eq!(sample.value, 45200000.0);
        assert_eq!(sample.mbps(), 45.2);
    }

    #[test]
    fn delimited_report_with_bytes() {
        let raw = "20240101120000,10.0.3.20,41234,10.0.4.20,5001,3,0.0-8.9,104857600,94371840\n";
        let sample = extract(raw).unwrap();
        assert_eq!(sample.transferred_bytes, Some(104857600));
        assert_eq!(sample.mbps(), 94.37184);
    }

    #[test]
    fn delimited_report_wrong_column_count() {
        let raw = "20240101120000,10.0.3.20,41234,10.0.4.20,5001,3,0.0-8.9,104857600\n";
        match extract(raw) {
            Err(ParseFailure::ColumnCount {
                expected, found, ..
            }) => {
                assert_eq!(expected, DELIMITED_COLUMNS);
                assert_eq!(found, 8);
            }
            x => panic!("unexpected result {x:?}"),
        }
    }

    #[test]
    fn invalid_number_keeps_line() {
        let err = extract("a,b,c,d,e,f,g,h,fast\n").unwrap_err();
        assert!(matches!(err, ParseFailure::InvalidNumber { ref token, .. } if token == "fast"));
        assert_eq!(err.line(), Some("a,b,c,d,e,f,g,h,fast"));

        let err = extract("[  3] 0.0-10.0 sec 100 MBytes NaN Mbits/sec").unwrap_err();
        assert!(matches!(err, ParseFailure::InvalidNumber { .. }));
    }

    #[test]
    fn missing_value() {
        let err = extract("Mbits/sec\n").unwrap_err();
        assert_eq!(
            err,
            ParseFailure::MissingValue {
                line: "Mbits/sec".to_string()
            }
        );
    }

    #[test]
    fn no_matching_line() {
        assert_eq!(extract(""), Err(ParseFailure::NoMatchingLine));
        assert_eq!(
            extract("connect failed: Connection refused\n"),
            Err(ParseFailure::NoMatchingLine)
        );
        assert_eq!(ParseFailure::NoMatchingLine.line(), None);
    }
}
