//! # Effect Detection
//!
//! Segments a return series into contiguous effect runs by comparing each
//! return with its threshold.
//!
//! Detection is a two-state machine per asset and effect type:
//!
//! ```text
//!            condition holds
//!   Outside ─────────────────▶ InsideEffect
//!      ▲                            │
//!      └────────────────────────────┘
//!           condition fails (segment closes, end exclusive)
//! ```
//!
//! - **heat wave**: one-sided, `r > t` (sustained upward moves)
//! - **meteor shower**: two-sided, `|r| > t`
//!
//! Positions without a threshold never change the state. A run still open at
//! the end of the series keeps `end_index = None`.

use crate::errors::{EffectAnalysisError, EffectResult};
use crate::math_utils::mean;
use crate::series_store::Timestamp;
use crate::threshold::Threshold;
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Kind of effect a segment represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum EffectType {
    /// Return above the threshold
    HeatWave,
    /// Absolute return above the threshold
    MeteorShower,
}

impl EffectType {
    /// Whether a return triggers this effect against `threshold`
    #[inline]
    pub fn triggers(self, value: f64, threshold: f64) -> bool {
        match self {
            EffectType::HeatWave => value > threshold,
            EffectType::MeteorShower => value.abs() > threshold,
        }
    }

    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            EffectType::HeatWave => "heat_wave",
            EffectType::MeteorShower => "meteor_shower",
        }
    }
}

impl fmt::Display for EffectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which detection rules a request runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AnalysisType {
    /// Both rules, run independently
    #[default]
    Both,
    /// Heat wave rule only
    HeatWave,
    /// Meteor shower rule only
    MeteorShower,
}

impl AnalysisType {
    /// Effect types scanned for this analysis
    pub fn effect_types(self) -> &'static [EffectType] {
        match self {
            AnalysisType::Both => &[EffectType::HeatWave, EffectType::MeteorShower],
            AnalysisType::HeatWave => &[EffectType::HeatWave],
            AnalysisType::MeteorShower => &[EffectType::MeteorShower],
        }
    }

    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisType::Both => "both",
            AnalysisType::HeatWave => "heat_wave",
            AnalysisType::MeteorShower => "meteor_shower",
        }
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisType {
    type Err = EffectAnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "both" => Ok(AnalysisType::Both),
            "heat_wave" => Ok(AnalysisType::HeatWave),
            "meteor_shower" => Ok(AnalysisType::MeteorShower),
            other => Err(EffectAnalysisError::InvalidRequest {
                parameter: "analysis_type".to_string(),
                reason: format!(
                    "expected one of both, heat_wave, meteor_shower; got {:?}",
                    other
                ),
            }),
        }
    }
}

/// A maximal run of indices where the detection condition holds.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct EffectSegment {
    /// Asset the segment belongs to
    pub asset_id: String,
    /// Rule that produced the segment
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub effect_type: EffectType,
    /// First index inside the effect
    pub start_index: usize,
    /// First index after the effect; `None` if the effect runs to the end of the series
    pub end_index: Option<usize>,
}

impl EffectSegment {
    /// Whether the effect may still be ongoing
    pub fn is_open(&self) -> bool {
        self.end_index.is_none()
    }

    /// Whether `index` falls inside the segment
    pub fn contains(&self, index: usize) -> bool {
        index >= self.start_index && self.end_index.map_or(true, |end| index < end)
    }

    /// Exclusive end, resolving an open segment against the series length
    pub fn end_or(&self, series_len: usize) -> usize {
        self.end_index.unwrap_or(series_len)
    }

    /// Number of rows covered, resolving an open segment against the series length
    pub fn duration(&self, series_len: usize) -> usize {
        self.end_or(series_len).saturating_sub(self.start_index)
    }
}

/// State of an [`EffectDetector`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// No effect in progress
    Outside,
    /// Effect in progress since `start`
    InsideEffect {
        /// Index where the current effect began
        start: usize,
    },
}

/// Streaming two-state detector for one asset and one effect type.
#[derive(Debug, Clone)]
pub struct EffectDetector {
    asset_id: String,
    effect_type: EffectType,
    state: DetectorState,
    index: usize,
    segments: Vec<EffectSegment>,
}

impl EffectDetector {
    /// Detector in the `Outside` state at index 0
    pub fn new(asset_id: impl Into<String>, effect_type: EffectType) -> Self {
        Self {
            asset_id: asset_id.into(),
            effect_type,
            state: DetectorState::Outside,
            index: 0,
            segments: Vec::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> DetectorState {
        self.state
    }

    /// Segments closed so far
    pub fn closed_segments(&self) -> &[EffectSegment] {
        &self.segments
    }

    /// Feed the next observation.
    pub fn step(&mut self, value: f64, threshold: Option<f64>) {
        let index = self.index;
        self.index += 1;

        let Some(threshold) = threshold else {
            return;
        };
        let holds = self.effect_type.triggers(value, threshold);

        match (self.state, holds) {
            (DetectorState::Outside, true) => {
                self.state = DetectorState::InsideEffect { start: index };
            }
            (DetectorState::InsideEffect { start }, false) => {
                self.segments.push(EffectSegment {
                    asset_id: self.asset_id.clone(),
                    effect_type: self.effect_type,
                    start_index: start,
                    end_index: Some(index),
                });
                self.state = DetectorState::Outside;
            }
            _ => {}
        }
    }

    /// End of input: emit any open segment and return every segment found.
    pub fn finish(mut self) -> Vec<EffectSegment> {
        if let DetectorState::InsideEffect { start } = self.state {
            self.segments.push(EffectSegment {
                asset_id: self.asset_id,
                effect_type: self.effect_type,
                start_index: start,
                end_index: None,
            });
        }
        self.segments
    }
}

fn check_lengths(returns: &[f64], threshold: &Threshold) -> EffectResult<()> {
    if returns.len() != threshold.len() {
        return Err(EffectAnalysisError::InvalidParameter {
            parameter: "threshold".to_string(),
            value: threshold.len() as f64,
            constraint: format!("length equal to the series ({})", returns.len()),
        });
    }
    Ok(())
}

/// Scan `returns` with a single rule.
pub fn detect_effect(
    asset_id: &str,
    returns: &[f64],
    threshold: &Threshold,
    effect_type: EffectType,
) -> EffectResult<Vec<EffectSegment>> {
    check_lengths(returns, threshold)?;

    let mut detector = EffectDetector::new(asset_id, effect_type);
    for (&value, &t) in returns.iter().zip(threshold.values()) {
        detector.step(value, t);
    }
    Ok(detector.finish())
}

/// Scan `returns` with every rule selected by `analysis_type`.
///
/// Segments are ordered by start index, then effect type. Segments of
/// different types may overlap.
pub fn detect_effects(
    asset_id: &str,
    returns: &[f64],
    threshold: &Threshold,
    analysis_type: AnalysisType,
) -> EffectResult<Vec<EffectSegment>> {
    let mut segments = Vec::new();
    for &effect_type in analysis_type.effect_types() {
        segments.extend(detect_effect(asset_id, returns, threshold, effect_type)?);
    }
    segments.sort_by_key(|s| (s.start_index, s.effect_type));
    Ok(segments)
}

/// Presentation summary of one effect period.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct EffectPeriodSummary {
    /// Rule that produced the period
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub effect_type: EffectType,
    /// First index inside the effect
    pub start_index: usize,
    /// Exclusive end index, `None` if ongoing
    pub end_index: Option<usize>,
    /// Timestamp of the first row inside the effect
    pub start: Timestamp,
    /// Timestamp of the last row inside the effect
    pub end: Timestamp,
    /// Rows covered
    pub duration: usize,
    /// Largest absolute return inside the period
    pub peak_abs_return: f64,
    /// Mean return inside the period
    pub mean_return: f64,
    /// Whether the period runs to the end of the data
    pub ongoing: bool,
}

/// Summarize segments against the returns and timestamps they index.
pub fn summarize_segments(
    segments: &[EffectSegment],
    returns: &[f64],
    timestamps: &[Timestamp],
) -> EffectResult<Vec<EffectPeriodSummary>> {
    if returns.len() != timestamps.len() {
        return Err(EffectAnalysisError::InvalidParameter {
            parameter: "timestamps".to_string(),
            value: timestamps.len() as f64,
            constraint: format!("length equal to the series ({})", returns.len()),
        });
    }

    segments
        .iter()
        .map(|segment| {
            let end = segment.end_or(returns.len());
            if segment.start_index >= end || end > returns.len() {
                return Err(EffectAnalysisError::InvalidParameter {
                    parameter: "segment".to_string(),
                    value: segment.start_index as f64,
                    constraint: format!("a non-empty range inside 0..{}", returns.len()),
                });
            }
            let slice = &returns[segment.start_index..end];
            Ok(EffectPeriodSummary {
                effect_type: segment.effect_type,
                start_index: segment.start_index,
                end_index: segment.end_index,
                start: timestamps[segment.start_index],
                end: timestamps[end - 1],
                duration: slice.len(),
                peak_abs_return: slice.iter().fold(0.0_f64, |acc, r| acc.max(r.abs())),
                mean_return: mean(slice),
                ongoing: segment.is_open(),
            })
        })
        .collect()
}

/// Detection statistics for one asset and effect type.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct EffectStatistics {
    /// Rule the statistics describe
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub effect_type: EffectType,
    /// Positions where `|r| > t`
    pub total_triggers: usize,
    /// Rows inside segments of this type
    pub effect_rows: usize,
    /// Positions with a defined threshold
    pub evaluated_rows: usize,
    /// `effect_rows / max(evaluated_rows, 1)`
    pub effect_ratio: f64,
    /// Number of segments of this type
    pub segment_count: usize,
    /// Mean of the defined threshold values
    pub mean_threshold: f64,
    /// Standard deviation of the defined threshold values
    pub threshold_std: f64,
}

/// Compute detection statistics for `effect_type` from its segments.
pub fn effect_statistics(
    returns: &[f64],
    threshold: &Threshold,
    effect_type: EffectType,
    segments: &[EffectSegment],
) -> EffectResult<EffectStatistics> {
    check_lengths(returns, threshold)?;

    let total_triggers = returns
        .iter()
        .zip(threshold.values())
        .filter(|(r, t)| t.map_or(false, |t| r.abs() > t))
        .count();

    let of_type: Vec<&EffectSegment> = segments
        .iter()
        .filter(|s| s.effect_type == effect_type)
        .collect();
    let effect_rows: usize = of_type.iter().map(|s| s.duration(returns.len())).sum();
    let evaluated_rows = threshold.defined_count();

    Ok(EffectStatistics {
        effect_type,
        total_triggers,
        effect_rows,
        evaluated_rows,
        effect_ratio: effect_rows as f64 / evaluated_rows.max(1) as f64,
        segment_count: of_type.len(),
        mean_threshold: threshold.mean(),
        threshold_std: threshold.std_dev(),
    })
}
