//! Lambda calibration.
//!
//! Searches the sensitivity multiplier in `[MIN_LAMBDA, MAX_LAMBDA]` for the
//! value whose effect ratio lands closest to a target share of rows.

use crate::config::{MAX_LAMBDA, MIN_LAMBDA};
use crate::effect_detection::{detect_effects, AnalysisType};
use crate::errors::{validate_all_finite, validate_parameter, EffectResult};
use crate::threshold::estimate_from_returns;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Effect ratio the calibrator aims for when none is given
pub const DEFAULT_TARGET_RATIO: f64 = 0.1;

const GOLDEN_RATIO_CONJUGATE: f64 = 0.618_033_988_749_894_8;
const SEARCH_TOLERANCE: f64 = 1e-4;
const MAX_ITERATIONS: usize = 64;

/// Outcome of a calibration run
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LambdaCalibration {
    /// Selected multiplier
    pub lambda: f64,
    /// Effect ratio produced by `lambda`
    pub achieved_ratio: f64,
    /// Requested effect ratio
    pub target_ratio: f64,
    /// Objective evaluations performed
    pub evaluations: usize,
}

/// Share of evaluated rows that fall inside any selected effect.
pub fn effect_ratio(
    returns: &[f64],
    window_size: usize,
    lambda: f64,
    analysis_type: AnalysisType,
) -> EffectResult<f64> {
    let threshold = estimate_from_returns(returns, window_size, lambda)?;
    let segments = detect_effects("", returns, &threshold, analysis_type)?;

    let mut covered = vec![false; returns.len()];
    for segment in &segments {
        for flag in &mut covered[segment.start_index..segment.end_or(returns.len())] {
            *flag = true;
        }
    }
    let rows = covered.iter().filter(|&&c| c).count();
    Ok(rows as f64 / threshold.defined_count().max(1) as f64)
}

/// Find the lambda whose effect ratio is closest to `target_ratio`.
///
/// Golden-section search on `|ratio(lambda) - target|`, then the result is
/// compared against both interval bounds since the ratio is a step function.
pub fn calibrate_lambda(
    returns: &[f64],
    window_size: usize,
    target_ratio: f64,
    analysis_type: AnalysisType,
) -> EffectResult<LambdaCalibration> {
    validate_parameter(target_ratio, 0.0, 1.0, "target_ratio")?;
    validate_all_finite(returns, "returns")?;

    let mut evaluations = 0;
    let mut objective = |lambda: f64| -> EffectResult<(f64, f64)> {
        evaluations += 1;
        let ratio = effect_ratio(returns, window_size, lambda, analysis_type)?;
        Ok(((ratio - target_ratio).abs(), ratio))
    };

    let (mut lo, mut hi) = (MIN_LAMBDA, MAX_LAMBDA);
    let mut x1 = hi - GOLDEN_RATIO_CONJUGATE * (hi - lo);
    let mut x2 = lo + GOLDEN_RATIO_CONJUGATE * (hi - lo);
    let mut f1 = objective(x1)?.0;
    let mut f2 = objective(x2)?.0;

    for _ in 0..MAX_ITERATIONS {
        if hi - lo < SEARCH_TOLERANCE {
            break;
        }
        if f1 <= f2 {
            hi = x2;
            x2 = x1;
            f2 = f1;
            x1 = hi - GOLDEN_RATIO_CONJUGATE * (hi - lo);
            f1 = objective(x1)?.0;
        } else {
            lo = x1;
            x1 = x2;
            f1 = f2;
            x2 = lo + GOLDEN_RATIO_CONJUGATE * (hi - lo);
            f2 = objective(x2)?.0;
        }
    }

    let mut best_lambda = 0.5 * (lo + hi);
    let (mut best_error, mut best_ratio) = objective(best_lambda)?;
    for bound in [MIN_LAMBDA, MAX_LAMBDA] {
        let (error, ratio) = objective(bound)?;
        if error < best_error {
            best_lambda = bound;
            best_error = error;
            best_ratio = ratio;
        }
    }

    log::debug!(
        "Calibrated lambda {:.4} (ratio {:.4}, target {:.4}, error {:.4})",
        best_lambda,
        best_ratio,
        target_ratio,
        best_error
    );

    Ok(LambdaCalibration {
        lambda: best_lambda,
        achieved_ratio: best_ratio,
        target_ratio,
        evaluations,
    })
}
