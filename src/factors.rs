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
//! Module describing the factorial design: factors, their levels, and the cells of the cartesian
//! product.

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Experimental dimension that can be swept.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FactorKind {
    /// Socket buffer size of the measurement client, in bytes.
    BufferSize,
    /// One-way delay of every shaped link, in milliseconds.
    Delay,
    /// Number of parallel flows of the measurement client.
    ParallelFlows,
}

impl FactorKind {
    /// Filename-compatible label of a level, e.g., `buffer208K` or `delay50ms`.
    pub fn label(&self, level: u64) -> String {
        match self {
            Self::BufferSize if level % 1024 == 0 => format!("buffer{}K", level / 1024),
            Self::BufferSize => format!("buffer{level}B"),
            Self::Delay => format!("delay{level}ms"),
            Self::ParallelFlows => format!("flows{level}"),
        }
    }

    /// Inverse of [`FactorKind::label`].
    pub fn parse_label(label: &str) -> Option<(Self, u64)> {
        if let Some(x) = label.strip_prefix("buffer") {
            if let Some(kib) = x.strip_suffix('K') {
                return kib.parse::<u64>().ok().map(|k| (Self::BufferSize, k * 1024));
            }
            return x
                .strip_suffix('B')
                .and_then(|b| b.parse().ok())
                .map(|b| (Self::BufferSize, b));
        }
        if let Some(x) = label.strip_prefix("delay") {
            return x
                .strip_suffix("ms")
                .and_then(|ms| ms.parse().ok())
                .map(|ms| (Self::Delay, ms));
        }
        label
            .strip_prefix("flows")
            .and_then(|f| f.parse().ok())
            .map(|f| (Self::ParallelFlows, f))
    }

    /// Human-readable level, used in charts.
    pub fn display_level(&self, level: u64) -> String {
        match self {
            Self::BufferSize => format!("{} KiB", level as f64 / 1024.0),
            Self::Delay => format!("{level} ms"),
            Self::ParallelFlows => format!("{level} flows"),
        }
    }

    /// Whether `level` is a valid level of this factor.
    pub fn accepts(&self, level: u64) -> bool {
        match self {
            Self::BufferSize | Self::ParallelFlows => level > 0,
            Self::Delay => level <= MAX_DELAY_MS,
        }
    }

    pub fn axis_title(&self) -> &'static str {
        match self {
            Self::BufferSize => "Socket buffer size",
            Self::Delay => "One-way link delay",
            Self::ParallelFlows => "Parallel flows",
        }
    }
}

/// A factor with its ordered set of levels. The order only matters for reporting.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Factor {
    pub kind: FactorKind,
    pub levels: Vec<u64>,
}

impl Factor {
    pub fn new(kind: FactorKind, levels: impl IntoIterator<Item = u64>) -> Self {
        Self {
            kind,
            levels: levels.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DesignError {
    #[error("The design has no factor")]
    NoFactors,
    #[error("Factor {0} has no levels")]
    NoLevels(FactorKind),
    #[error("Factor {0} has level {1} more than once")]
    DuplicateLevel(FactorKind, u64),
    #[error("Factor {0} is declared more than once")]
    DuplicateFactor(FactorKind),
    #[error("Level {1} of factor {0} is out of range")]
    OutOfRange(FactorKind, u64),
}

/// Largest accepted one-way delay, in milliseconds.
pub const MAX_DELAY_MS: u64 = 60_000;

/// Check that the factors describe a proper full-factorial design.
pub fn validate(factors: &[Factor]) -> Result<(), DesignError> {
    if factors.is_empty() {
        return Err(DesignError::NoFactors);
    }
    if let Some(kind) = factors.iter().map(|f| f.kind).duplicates().next() {
        return Err(DesignError::DuplicateFactor(kind));
    }
    for factor in factors {
        if factor.levels.is_empty() {
            return Err(DesignError::NoLevels(factor.kind));
        }
        if let Some(level) = factor.levels.iter().duplicates().next() {
            return Err(DesignError::DuplicateLevel(factor.kind, *level));
        }
        if let Some(level) = factor.levels.iter().find(|l| !factor.kind.accepts(**l)) {
            return Err(DesignError::OutOfRange(factor.kind, *level));
        }
    }
    Ok(())
}

/// One point of the factorial design, assigning exactly one level to every factor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Cell {
    /// Position of the cell in the sweep.
    pub index: usize,
    pub levels: Vec<(FactorKind, u64)>,
}

impl Cell {
    pub fn level(&self, kind: FactorKind) -> Option<u64> {
        self.levels
            .iter()
            .find_map(|(k, level)| (*k == kind).then_some(*level))
    }

    /// Identifier of the cell built from the labels of its levels, e.g., `buffer64K_delay5ms`.
    pub fn id(&self) -> String {
        self.levels.iter().map(|(k, l)| k.label(*l)).join("_")
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cell {} ({})",
            self.index + 1,
            self.levels
                .iter()
                .map(|(k, l)| format!("{k}={}", k.display_level(*l)))
                .join(", ")
        )
    }
}

/// Enumerate all cells of the cartesian product. The first factor is the outermost loop.
pub fn enumerate_cells(factors: &[Factor]) -> Vec<Cell> {
    if factors.is_empty() {
        return Vec::new();
    }
    factors
        .iter()
        .map(|f| f.levels.iter().map(move |l| (f.kind, *l)))
        .multi_cartesian_product()
        .enumerate()
        .map(|(index, levels)| Cell { index, levels })
        .collect()
}

/// Fully resolved configuration of a measurement: the levels of a cell, completed with the base
/// levels for every factor that is not swept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Treatment {
    pub buffer_bytes: u64,
    pub delay_ms: u64,
    pub parallel_flows: u64,
}

impl Default for Treatment {
    fn default() -> Self {
        Self {
            buffer_bytes: 65536,
            delay_ms: 5,
            parallel_flows: 1,
        }
    }
}

impl Treatment {
    pub fn resolve(cell: &Cell, base: &Treatment) -> Self {
        Self {
            buffer_bytes: cell
                .level(FactorKind::BufferSize)
                .unwrap_or(base.buffer_bytes),
            delay_ms: cell.level(FactorKind::Delay).unwrap_or(base.delay_ms),
            parallel_flows: cell
                .level(FactorKind::ParallelFlows)
                .unwrap_or(base.parallel_flows),
        }
    }

    /// Check every level against [`FactorKind::accepts`].
    pub fn validate(&self) -> Result<(), DesignError> {
        use strum::IntoEnumIterator;
        match FactorKind::iter().find(|k| !k.accepts(self.get(*k))) {
            Some(kind) => Err(DesignError::OutOfRange(kind, self.get(kind))),
            None => Ok(()),
        }
    }

    pub fn get(&self, kind: FactorKind) -> u64 {
        match kind {
            FactorKind::BufferSize => self.buffer_bytes,
            FactorKind::Delay => self.delay_ms,
            FactorKind::ParallelFlows => self.parallel_flows,
        }
    }

    /// Delay as expressed at the link-shaping boundary.
    pub fn delay_us(&self) -> u64 {
        self.delay_ms.saturating_mul(1000)
    }

    /// Round-trip time over the shaped path, assuming one shaped hop in each direction.
    pub fn rtt_ms(&self) -> u64 {
        self.delay_ms.saturating_mul(2)
    }

    pub fn buffer_kib(&self) -> f64 {
        self.buffer_bytes as f64 / 1024.0
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use super::*;

    fn two_by_two() -> Vec<Factor> {
        vec![
            Factor::new(FactorKind::BufferSize, [65536, 212992]),
            Factor::new(FactorKind::Delay, [5, 50]),
        ]
    }

    #[test]
    fn cartesian_product() {
        let cells = enumerate_cells(&two_by_two());
        assert_eq!(cells.len(), 4);
        assert_eq!(
            cells.iter().map(|c| c.id()).collect::<Vec<_>>(),
            vec![
                "buffer64K_delay5ms",
                "buffer64K_delay50ms",
                "buffer208K_delay5ms",
                "buffer208K_delay50ms",
            ]
        );
        assert_eq!(
            cells.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
    }

    #[test]
    fn declared_order_only_changes_the_order() {
        let mut reversed = two_by_two();
        reversed.reverse();
        let a: HashSet<Vec<(FactorKind, u64)>> = enumerate_cells(&two_by_two())
            .into_iter()
            .map(|c| c.levels.into_iter().sorted().collect())
            .collect();
        let b: HashSet<Vec<(FactorKind, u64)>> = enumerate_cells(&reversed)
            .into_iter()
            .map(|c| c.levels.into_iter().sorted().collect())
            .collect();
        assert_eq!(a.len(), 4);
        assert_eq!(a, b);
    }

    #[test]
    fn three_factors() {
        let mut factors = two_by_two();
        factors.push(Factor::new(FactorKind::ParallelFlows, [1, 2, 4]));
        let cells = enumerate_cells(&factors);
        assert_eq!(cells.len(), 12);
        assert_eq!(cells.iter().map(|c| c.id()).unique().count(), 12);
        assert_eq!(cells[0].level(FactorKind::ParallelFlows), Some(1));
        assert_eq!(cells[1].level(FactorKind::ParallelFlows), Some(2));
    }

    #[test]
    fn single_factor_uses_base() {
        let cells = enumerate_cells(&[Factor::new(FactorKind::Delay, [10, 20])]);
        assert_eq!(cells.len(), 2);
        let t = Treatment::resolve(&cells[1], &Treatment::default());
        assert_eq!(t.buffer_bytes, 65536);
        assert_eq!(t.delay_ms, 20);
        assert_eq!(t.delay_us(), 20_000);
        assert_eq!(t.rtt_ms(), 40);
        assert_eq!(t.parallel_flows, 1);
    }

    #[test]
    fn validation() {
        assert_eq!(validate(&two_by_two()), Ok(()));
        assert_eq!(validate(&[]), Err(DesignError::NoFactors));
        assert_eq!(
            validate(&[Factor::new(FactorKind::Delay, [])]),
            Err(DesignError::NoLevels(FactorKind::Delay))
        );
        assert_eq!(
            validate(&[Factor::new(FactorKind::Delay, [5, 10, 5])]),
            Err(DesignError::DuplicateLevel(FactorKind::Delay, 5))
        );
        assert_eq!(
            validate(&[
                Factor::new(FactorKind::Delay, [5]),
                Factor::new(FactorKind::Delay, [10]),
            ]),
            Err(DesignError::DuplicateFactor(FactorKind::Delay))
        );
        assert_eq!(
            validate(&[Factor::new(FactorKind::Delay, [5, u64::MAX / 2])]),
            Err(DesignError::OutOfRange(FactorKind::Delay, u64::MAX / 2))
        );
        assert_eq!(
            validate(&[Factor::new(FactorKind::ParallelFlows, [0, 1])]),
            Err(DesignError::OutOfRange(FactorKind::ParallelFlows, 0))
        );
        assert_eq!(
            validate(&[Factor::new(FactorKind::Delay, [0, MAX_DELAY_MS])]),
            Ok(())
        );
    }

    #[test]
    fn huge_delays_saturate() {
        let t = Treatment {
            delay_ms: u64::MAX,
            ..Default::default()
        };
        assert_eq!(t.delay_us(), u64::MAX);
        assert_eq!(t.rtt_ms(), u64::MAX);
        assert_eq!(
            t.validate(),
            Err(DesignError::OutOfRange(FactorKind::Delay, u64::MAX))
        );
        assert_eq!(Treatment::default().validate(), Ok(()));
    }

    #[test]
    fn labels() {
        for (kind, level) in [
            (FactorKind::BufferSize, 212992),
            (FactorKind::BufferSize, 1000),
            (FactorKind::Delay, 50),
            (FactorKind::ParallelFlows, 4),
        ] {
            assert_eq!(FactorKind::parse_label(&kind.label(level)), Some((kind, level)));
        }
        assert_eq!(FactorKind::BufferSize.label(212992), "buffer208K");
        assert_eq!(FactorKind::parse_label("rep3"), None);
        assert_eq!(FactorKind::parse_label("delayXms"), None);
    }
}
