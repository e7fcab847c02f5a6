//! Volatility-scaled detection thresholds.
//!
//! `threshold[i] = lambda * s(i)` where `s(i)` is the sample standard deviation
//! of the trailing `window_size` returns ending at `i`. Positions before the
//! first full window have no threshold.

use crate::config::{MAX_LAMBDA, MIN_LAMBDA};
use crate::errors::{validate_parameter, EffectAnalysisError, EffectResult};
use crate::math_utils::{calculate_variance, mean, sample_std_dev};
use crate::series_store::AssetSeries;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Per-position detection threshold aligned 1:1 with a return series.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Threshold {
    window_size: usize,
    lambda: f64,
    values: Vec<Option<f64>>,
}

impl Threshold {
    /// Threshold from precomputed per-position values.
    pub fn from_values(window_size: usize, lambda: f64, values: Vec<Option<f64>>) -> Self {
        Self {
            window_size,
            lambda,
            values,
        }
    }

    /// Rolling window the dispersion was estimated over
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Sensitivity multiplier
    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Threshold at `index`, `None` before the first full window
    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied().flatten()
    }

    /// All positions, including the undefined prefix
    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    /// Length of the underlying series
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the underlying series is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of positions with a defined threshold
    pub fn defined_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// Defined threshold values in order
    pub fn defined(&self) -> Vec<f64> {
        self.values.iter().flatten().copied().collect()
    }

    /// Mean of the defined values (0.0 if none)
    pub fn mean(&self) -> f64 {
        mean(&self.defined())
    }

    /// Sample standard deviation of the defined values
    pub fn std_dev(&self) -> f64 {
        sample_std_dev(&self.defined())
    }
}

/// Estimate the threshold for a series.
pub fn estimate(series: &AssetSeries, window_size: usize, lambda: f64) -> EffectResult<Threshold> {
    estimate_from_returns(series.returns(), window_size, lambda)
}

/// Estimate the threshold for a bare return slice.
///
/// Fails with `InvalidParameter` when lambda is outside `[1.0, 3.0]` and with
/// `InvalidWindow` when `window_size < 2`. A series shorter than the window
/// produces a threshold with no defined positions.
pub fn estimate_from_returns(
    returns: &[f64],
    window_size: usize,
    lambda: f64,
) -> EffectResult<Threshold> {
    validate_parameter(lambda, MIN_LAMBDA, MAX_LAMBDA, "lambda")?;
    let values = rolling_volatility(returns, window_size)?
        .into_iter()
        .map(|s| s.map(|s| lambda * s))
        .collect();

    Ok(Threshold {
        window_size,
        lambda,
        values,
    })
}

/// Trailing sample standard deviation over `window_size` returns.
///
/// Positions before the first full window are `None`.
pub fn rolling_volatility(returns: &[f64], window_size: usize) -> EffectResult<Vec<Option<f64>>> {
    if window_size < 2 {
        return Err(EffectAnalysisError::InvalidWindow {
            window_size,
            constraint: "at least 2".to_string(),
        });
    }

    Ok((0..returns.len())
        .map(|i| {
            if i + 1 < window_size {
                None
            } else {
                Some(calculate_variance(&returns[i + 1 - window_size..=i]).sqrt())
            }
        })
        .collect())
}
