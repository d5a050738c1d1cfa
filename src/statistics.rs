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
//! Aggregation of the samples of one cell into mean and confidence interval.

use serde::{Deserialize, Serialize};
use statrs::{
    distribution::{ContinuousCDF, StudentsT},
    statistics::Statistics as _,
};

/// Confidence level used when nothing else is configured.
pub const DEFAULT_CONFIDENCE: f64 = 0.95;

/// Descriptive statistics of a non-empty set of samples, all values in Mbps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub sample_count: usize,
    pub mean: f64,
    /// Unbiased sample standard deviation, `0` for a single sample.
    pub std_dev: f64,
    /// Half-width of the confidence interval.
    pub margin_of_error: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub min: f64,
    pub max: f64,
    pub confidence: f64,
}

/// Summary of a cell. A cell without any valid sample has no numeric summary at all.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Summary {
    NoData,
    Observed(Statistics),
}

impl Summary {
    pub fn statistics(&self) -> Option<&Statistics> {
        match self {
            Self::NoData => None,
            Self::Observed(s) => Some(s),
        }
    }

    pub fn sample_count(&self) -> usize {
        self.statistics().map(|s| s.sample_count).unwrap_or(0)
    }
}

/// Two-sided critical value of the Student-t distribution with `df` degrees of freedom.
pub fn t_critical(confidence: f64, df: usize) -> f64 {
    let p = 1.0 - (1.0 - confidence) / 2.0;
    StudentsT::new(0.0, 1.0, df as f64)
        .map(|t| t.inverse_cdf(p))
        .unwrap_or(f64::NAN)
}

/// Summarize the samples of a cell at the given confidence level (e.g., `0.95`).
///
/// The result does not depend on the order of `samples`: they are sorted before any
/// floating-point accumulation.
pub fn summarize(samples: &[f64], confidence: f64) -> Summary {
    if samples.is_empty() {
        return Summary::NoData;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    let mean = sorted.iter().mean();
    let min = sorted[0];
    let max = sorted[n - 1];

    let (std_dev, margin_of_error) = if n < 2 {
        (0.0, 0.0)
    } else {
        let std_dev = sorted.iter().std_dev();
        let margin = t_critical(confidence, n - 1) * std_dev / (n as f64).sqrt();
        (std_dev, margin)
    };

    Summary::Observed(Statistics {
        sample_count: n,
        mean,
        std_dev,
        margin_of_error,
        ci_lower: mean - margin_of_error,
        ci_upper: mean + margin_of_error,
        min,
        max,
        confidence,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn no_samples_is_no_data() {
        assert_eq!(summarize(&[], DEFAULT_CONFIDENCE), Summary::NoData);
        assert_eq!(Summary::NoData.sample_count(), 0);
    }

    #[test]
    fn single_sample_has_no_interval() {
        let s = summarize(&[42.5], DEFAULT_CONFIDENCE);
        let s = s.statistics().unwrap();
        assert_eq!(s.sample_count, 1);
        assert_eq!(s.mean, 42.5);
        assert_eq!(s.std_dev, 0.0);
        assert_eq!(s.margin_of_error, 0.0);
        assert_eq!(s.ci_lower, 42.5);
        assert_eq!(s.ci_upper, 42.5);
    }

    #[test]
    fn critical_values() {
        assert!((t_critical(0.95, 1) - 12.7062).abs() < 1e-3);
        assert!((t_critical(0.95, 4) - 2.7764).abs() < 1e-3);
        assert!((t_critical(0.99, 7) - 3.4995).abs() < 1e-3);
    }

    #[test]
    fn two_samples() {
        // mean 2, std_dev sqrt(2), standard error 1
        let s = summarize(&[1.0, 3.0], 0.95);
        let s = s.statistics().unwrap();
        assert_eq!(s.mean, 2.0);
        assert!((s.std_dev - 2f64.sqrt()).abs() < 1e-12);
        assert!((s.margin_of_error - 12.7062).abs() < 1e-3);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 3.0);
    }

    #[test]
    fn five_samples() {
        let s = summarize(&[94.1, 93.8, 94.5, 92.9, 94.2], 0.95);
        let s = s.statistics().unwrap();
        assert!((s.mean - 93.9).abs() < 1e-9);
        // sum of squared deviations: 0.04 + 0.01 + 0.36 + 1.0 + 0.09 = 1.5
        let std_dev = (1.5f64 / 4.0).sqrt();
        assert!((s.std_dev - std_dev).abs() < 1e-9);
        let margin = 2.7764 * std_dev / 5f64.sqrt();
        assert!((s.margin_of_error - margin).abs() < 1e-3);
        assert!((s.ci_upper - s.ci_lower - 2.0 * s.margin_of_error).abs() < 1e-9);
    }

    #[test]
    fn identical_samples_have_zero_margin() {
        let s = summarize(&[10.0, 10.0, 10.0], 0.95);
        let s = s.statistics().unwrap();
        assert_eq!(s.margin_of_error, 0.0);
        assert_eq!(s.ci_lower, 10.0);
        assert_eq!(s.ci_upper, 10.0);
    }

    proptest! {
        #[test]
        fn interval_contains_mean(samples in prop::collection::vec(0.0f64..10_000.0, 2..40)) {
            let summary = summarize(&samples, 0.95);
            let s = summary.statistics().unwrap();
            prop_assert!(s.margin_of_error >= 0.0);
            prop_assert!(s.ci_lower <= s.mean);
            prop_assert!(s.mean <= s.ci_upper);
        }

        #[test]
        fn order_does_not_matter(
            samples in prop::collection::vec(0.0f64..10_000.0, 0..40),
            seed in any::<u64>(),
        ) {
            let mut shuffled = samples.clone();
            // deterministic permutation driven by the seed
            let len = shuffled.len();
            for i in (1..len).rev() {
                let j = (seed.wrapping_mul(i as u64 + 1).rotate_left(i as u32 % 64) % (i as u64 + 1)) as usize;
                shuffled.swap(i, j);
            }
            shuffled.reverse();
            prop_assert_eq!(summarize(&samples, 0.95), summarize(&shuffled, 0.95));
        }
    }
}
