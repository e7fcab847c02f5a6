//! High-volatility clusters on an asset's rolling standard deviation.
//!
//! A row is *high* when its rolling volatility is strictly above
//! `mean + threshold_std * std` of all defined volatilities. A cluster opens on
//! the first high row and closes on the first row that is not high. A cluster
//! still open at the end of the data is not reported.

use crate::errors::{EffectAnalysisError, EffectResult};
use crate::math_utils::{mean, sample_std_dev};
use crate::series_store::Timestamp;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default multiplier on the standard deviation of the volatility series.
pub const DEFAULT_CLUSTER_STD: f64 = 2.0;

/// One closed run of high rolling volatility
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct VolatilityCluster {
    /// First high row
    pub start_index: usize,
    /// First row back below the cutoff (exclusive end)
    pub end_index: usize,
    /// Timestamp of `start_index`
    pub start: Timestamp,
    /// Timestamp of `end_index`
    pub end: Timestamp,
    /// High rows in the cluster
    pub duration: usize,
    /// Mean volatility from `start_index` through `end_index` inclusive
    pub mean_volatility: f64,
}

/// Cutoff above which a volatility counts as high.
///
/// `None` when no position has a defined volatility.
pub fn cluster_cutoff(volatility: &[Option<f64>], threshold_std: f64) -> Option<f64> {
    let defined: Vec<f64> = volatility.iter().flatten().copied().collect();
    if defined.is_empty() {
        return None;
    }
    Some(mean(&defined) + threshold_std * sample_std_dev(&defined))
}

/// Scan a rolling volatility series for closed high-volatility clusters.
///
/// `volatility` and `timestamps` must be aligned row for row. Undefined
/// positions never open or close a cluster.
pub fn detect_volatility_clusters(
    volatility: &[Option<f64>],
    timestamps: &[Timestamp],
    threshold_std: f64,
) -> EffectResult<Vec<VolatilityCluster>> {
    validate_cluster_std(threshold_std)?;
    if volatility.len() != timestamps.len() {
        return Err(EffectAnalysisError::InvalidParameter {
            parameter: "timestamps".to_string(),
            value: timestamps.len() as f64,
            constraint: format!("length equal to the volatility series ({})", volatility.len()),
        });
    }

    let Some(cutoff) = cluster_cutoff(volatility, threshold_std) else {
        return Ok(Vec::new());
    };

    let mut clusters = Vec::new();
    let mut open: Option<usize> = None;
    for (i, vol) in volatility.iter().enumerate() {
        let Some(vol) = *vol else { continue };
        match (open, vol > cutoff) {
            (None, true) => open = Some(i),
            (Some(start), false) => {
                let inside: Vec<f64> = volatility[start..=i].iter().flatten().copied().collect();
                clusters.push(VolatilityCluster {
                    start_index: start,
                    end_index: i,
                    start: timestamps[start],
                    end: timestamps[i],
                    duration: i - start,
                    mean_volatility: mean(&inside),
                });
                open = None;
            }
            _ => {}
        }
    }

    if let Some(start) = open {
        log::trace!("dropping unterminated volatility cluster at row {}", start);
    }
    Ok(clusters)
}

/// Reject multipliers that are negative or not finite.
pub fn validate_cluster_std(threshold_std: f64) -> EffectResult<()> {
    if threshold_std.is_finite() && threshold_std >= 0.0 {
        Ok(())
    } else {
        Err(EffectAnalysisError::InvalidParameter {
            parameter: "volatility_cluster_std".to_string(),
            value: threshold_std,
            constraint: "finite and non-negative".to_string(),
        })
    }
}
