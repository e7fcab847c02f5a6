//! Lead-lag correlation profiles between two aligned return series.
//!
//! A positive lag `k` correlates `a[t - k]` with `b[t]`, so a peak at a
//! positive lag means `a` moves first. A negative lag `-k` correlates `a[t]`
//! with `b[t - k]`.

use crate::errors::{EffectAnalysisError, EffectResult};
use crate::math_utils::pearson_correlation;
use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Correlation at each lag in `[-max_lag, max_lag]`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LeadLagProfile {
    max_lag: usize,
    correlations: BTreeMap<i64, Option<f64>>,
}

impl LeadLagProfile {
    /// Largest absolute lag evaluated
    pub fn max_lag(&self) -> usize {
        self.max_lag
    }

    /// Correlation at `lag`; `None` if undefined or outside the profile
    pub fn at(&self, lag: i64) -> Option<f64> {
        self.correlations.get(&lag).copied().flatten()
    }

    /// All lags in ascending order
    pub fn correlations(&self) -> &BTreeMap<i64, Option<f64>> {
        &self.correlations
    }

    /// Lag with the largest absolute correlation.
    ///
    /// Ties resolve to the smallest absolute lag, then the negative side.
    pub fn peak(&self) -> Option<(i64, f64)> {
        self.correlations
            .iter()
            .filter_map(|(&lag, &corr)| corr.map(|c| (lag, c)))
            .fold(None, |best: Option<(i64, f64)>, (lag, c)| match best {
                Some((best_lag, best_c))
                    if best_c.abs() > c.abs()
                        || (best_c.abs() == c.abs() && best_lag.abs() <= lag.abs()) =>
                {
                    Some((best_lag, best_c))
                }
                _ => Some((lag, c)),
            })
    }
}

/// Correlate `a` against `b` at every lag in `[-max_lag, max_lag]`.
pub fn lead_lag_profile(a: &[f64], b: &[f64], max_lag: usize) -> EffectResult<LeadLagProfile> {
    if a.len() != b.len() {
        return Err(EffectAnalysisError::InvalidParameter {
            parameter: "series length".to_string(),
            value: b.len() as f64,
            constraint: format!("equal to the leading series ({})", a.len()),
        });
    }

    let n = a.len();
    let max = max_lag as i64;
    let correlations = (-max..=max)
        .map(|lag| {
            let shift = lag.unsigned_abs() as usize;
            let corr = if shift >= n {
                None
            } else if lag >= 0 {
                pearson_correlation(&a[..n - shift], &b[shift..])
            } else {
                pearson_correlation(&a[shift..], &b[..n - shift])
            };
            (lag, corr)
        })
        .collect();

    Ok(LeadLagProfile {
        max_lag,
        correlations,
    })
}
