//! # Analysis Results Structures
//!
//! Outputs of a full analysis run and the outbound payload derived from them.

use crate::{
    analysis::AnalysisRequest,
    effect_detection::{EffectPeriodSummary, EffectSegment, EffectStatistics, EffectType},
    lead_lag::LeadLagProfile,
    rolling_correlation::CorrelationMatrix,
    series_store::Timestamp,
    volatility_clusters::VolatilityCluster,
};
use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Complete result of one analysis request
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AnalysisResult {
    /// Request that produced this result
    pub request: AnalysisRequest,
    /// Asset ids in matrix order (request order)
    pub assets: Vec<String>,
    /// Timestamps of the aligned panel rows that segment indices refer to
    pub timestamps: Vec<Timestamp>,
    /// Correlation matrix for the final window
    pub correlation_matrix: CorrelationMatrix,
    /// Effect segments per asset, ordered by (start index, type)
    pub effects: BTreeMap<String, Vec<EffectSegment>>,
    /// Presentation summaries per asset, in segment order
    pub summaries: BTreeMap<String, Vec<EffectPeriodSummary>>,
    /// Detection statistics per asset, one entry per scanned effect type
    pub statistics: BTreeMap<String, Vec<EffectStatistics>>,
    /// Closed high-volatility clusters per asset, in row order
    pub volatility_clusters: BTreeMap<String, Vec<VolatilityCluster>>,
    /// Lead-lag profiles for every asset pair (empty when disabled)
    pub lead_lag: Vec<PairLeadLag>,
}

/// Lead-lag profile of one ordered asset pair
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PairLeadLag {
    /// Series shifted by positive lags
    pub first: String,
    /// Reference series
    pub second: String,
    /// Correlation per lag
    pub profile: LeadLagProfile,
}

impl AnalysisResult {
    /// Segments for one asset (empty slice for unknown ids)
    pub fn effects_for(&self, asset_id: &str) -> &[EffectSegment] {
        self.effects.get(asset_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Segments of one type across all assets
    pub fn segments_of_type(&self, effect_type: EffectType) -> impl Iterator<Item = &EffectSegment> {
        self.effects
            .values()
            .flatten()
            .filter(move |s| s.effect_type == effect_type)
    }

    /// Total number of segments across all assets
    pub fn segment_count(&self) -> usize {
        self.effects.values().map(Vec::len).sum()
    }

    /// Number of aligned rows analysed
    pub fn n_rows(&self) -> usize {
        self.timestamps.len()
    }

    /// Outbound payload
    pub fn to_response(&self) -> AnalysisResponse {
        AnalysisResponse {
            assets: self.assets.clone(),
            correlation_matrix: self.correlation_matrix.to_rows(),
            effects: self
                .effects
                .iter()
                .map(|(asset, segments)| {
                    let payload = segments.iter().map(EffectPayload::from).collect();
                    (asset.clone(), payload)
                })
                .collect(),
        }
    }
}

/// Outbound payload consumed by the presentation layer
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct AnalysisResponse {
    /// Asset ids in matrix order
    pub assets: Vec<String>,
    /// Square correlation matrix as rows
    pub correlation_matrix: Vec<Vec<f64>>,
    /// Effect segments per asset id
    pub effects: BTreeMap<String, Vec<EffectPayload>>,
}

/// One segment as sent to the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct EffectPayload {
    /// Effect kind
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub effect_type: EffectType,
    /// First index inside the effect
    pub start_index: usize,
    /// Exclusive end, `null` when ongoing
    pub end_index: Option<usize>,
}

impl From<&EffectSegment> for EffectPayload {
    fn from(segment: &EffectSegment) -> Self {
        Self {
            effect_type: segment.effect_type,
            start_index: segment.start_index,
            end_index: segment.end_index,
        }
    }
}
