//! # Effect Analyzer
//!
//! [`EffectAnalyzer`] is the entry point for a full analysis request. It
//! validates the request, loads and aligns the series, computes the
//! correlation matrix, and runs threshold estimation and effect detection for
//! every asset on the aligned panel.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use chrono::NaiveDate;
//! use market_effects::{
//!     AnalysisRequest, AnalysisType, AssetSeries, EffectAnalyzer, EngineConfig,
//!     InMemorySeriesStore,
//! };
//! use market_effects::errors::EffectAnalysisError;
//!
//! # fn main() -> Result<(), EffectAnalysisError> {
//! let day = |d: u32| NaiveDate::from_ymd_opt(2024, 1, d).unwrap().and_hms_opt(0, 0, 0).unwrap();
//! let store = InMemorySeriesStore::new();
//! for (id, sign) in [("BTC", 1.0), ("ETH", -1.0)] {
//!     let points = (1..=20).map(|d| (day(d), sign * (d as f64 * 0.7).sin() * 0.02)).collect();
//!     store.insert(AssetSeries::new(id, points)?);
//! }
//!
//! let analyzer = EffectAnalyzer::new(store, EngineConfig::standard())?;
//! let request = AnalysisRequest::new(vec!["BTC".into(), "ETH".into()], day(1), day(20), 10)
//!     .with_analysis_type(AnalysisType::MeteorShower);
//! let result = analyzer.analyze(&request)?;
//! println!("{:?}", result.to_response());
//! # Ok(())
//! # }
//! ```

use crate::{
    computation_cache::{AnalysisCache, RequestFingerprint},
    config::{EngineConfig, MAX_LAMBDA, MIN_LAMBDA},
    effect_detection::{
        detect_effects, effect_statistics, summarize_segments, AnalysisType, EffectPeriodSummary,
        EffectSegment, EffectStatistics,
    },
    errors::{EffectAnalysisError, EffectResult},
    lambda_calibration::{calibrate_lambda, LambdaCalibration},
    lead_lag::lead_lag_profile,
    results::{AnalysisResult, PairLeadLag},
    rolling_correlation::rolling_correlation,
    series_store::{AlignedPanel, TimeSeriesStore, Timestamp},
    threshold::{estimate_from_returns, rolling_volatility},
    volatility_clusters::{detect_volatility_clusters, VolatilityCluster},
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Window over which the reported correlation matrix is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CorrelationScope {
    /// Final trailing window of `window_size` rows
    #[default]
    Rolling,
    /// Every aligned row
    FullRange,
}

/// Inbound analysis request
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct AnalysisRequest {
    /// Assets to analyse; order fixes the matrix layout
    pub asset_ids: Vec<String>,
    /// Inclusive start of the range
    pub start_date: Timestamp,
    /// Inclusive end of the range
    pub end_date: Timestamp,
    /// Rolling window in rows
    pub window_size: usize,
    /// Detection rules to run
    #[cfg_attr(feature = "serde", serde(default))]
    pub analysis_type: AnalysisType,
    /// Threshold sensitivity multiplier
    pub lambda: f64,
    /// Correlation matrix window
    #[cfg_attr(feature = "serde", serde(default))]
    pub correlation_scope: CorrelationScope,
}

impl AnalysisRequest {
    /// Request with both rules, lambda 2.0 and a rolling correlation scope
    pub fn new(
        asset_ids: Vec<String>,
        start_date: Timestamp,
        end_date: Timestamp,
        window_size: usize,
    ) -> Self {
        Self {
            asset_ids,
            start_date,
            end_date,
            window_size,
            analysis_type: AnalysisType::Both,
            lambda: 2.0,
            correlation_scope: CorrelationScope::Rolling,
        }
    }

    /// Set the detection rules
    pub fn with_analysis_type(mut self, analysis_type: AnalysisType) -> Self {
        self.analysis_type = analysis_type;
        self
    }

    /// Set lambda
    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.lambda = lambda;
        self
    }

    /// Set the correlation scope
    pub fn with_correlation_scope(mut self, scope: CorrelationScope) -> Self {
        self.correlation_scope = scope;
        self
    }

    /// Cache key for this request
    pub fn fingerprint(&self) -> RequestFingerprint {
        RequestFingerprint::of(self)
    }
}

fn invalid(parameter: &str, reason: impl Into<String>) -> EffectAnalysisError {
    EffectAnalysisError::InvalidRequest {
        parameter: parameter.to_string(),
        reason: reason.into(),
    }
}

/// Check a request against the configured bounds without touching any data.
pub fn validate_request(request: &AnalysisRequest, config: &EngineConfig) -> EffectResult<()> {
    if request.asset_ids.is_empty() {
        return Err(invalid("asset_ids", "at least one asset is required"));
    }
    let mut seen = HashSet::with_capacity(request.asset_ids.len());
    for id in &request.asset_ids {
        if id.trim().is_empty() {
            return Err(invalid("asset_ids", "asset ids must be non-empty"));
        }
        if !seen.insert(id.as_str()) {
            return Err(invalid("asset_ids", format!("duplicate asset id {}", id)));
        }
    }

    if request.start_date >= request.end_date {
        return Err(invalid(
            "start_date",
            format!(
                "must be before end_date ({} >= {})",
                request.start_date, request.end_date
            ),
        ));
    }

    if request.window_size < config.min_window_size || request.window_size > config.max_window_size
    {
        return Err(invalid(
            "window_size",
            format!(
                "{} is outside [{}, {}]",
                request.window_size, config.min_window_size, config.max_window_size
            ),
        ));
    }

    if !request.lambda.is_finite() || !(MIN_LAMBDA..=MAX_LAMBDA).contains(&request.lambda) {
        return Err(invalid(
            "lambda",
            format!("{} is outside [{}, {}]", request.lambda, MIN_LAMBDA, MAX_LAMBDA),
        ));
    }

    Ok(())
}

/// Per-asset detection output
struct AssetEffects {
    asset_id: String,
    segments: Vec<EffectSegment>,
    summaries: Vec<EffectPeriodSummary>,
    statistics: Vec<EffectStatistics>,
    volatility_clusters: Vec<VolatilityCluster>,
}

/// Orchestrates correlation and effect analysis over a series store
pub struct EffectAnalyzer<S> {
    store: S,
    config: EngineConfig,
}

impl<S: TimeSeriesStore> EffectAnalyzer<S> {
    /// Create an analyzer after validating the configuration.
    pub fn new(store: S, config: EngineConfig) -> EffectResult<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    /// Underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a full analysis.
    ///
    /// Either every component succeeds and a complete result is returned, or
    /// the first error is returned.
    pub fn analyze(&self, request: &AnalysisRequest) -> EffectResult<AnalysisResult> {
        validate_request(request, &self.config)?;
        let started = Instant::now();
        log::info!(
            "Analyzing {} assets from {} to {} (window {}, {}, lambda {})",
            request.asset_ids.len(),
            request.start_date,
            request.end_date,
            request.window_size,
            request.analysis_type,
            request.lambda
        );

        let panel = self.load_panel(request)?;

        let correlation_window = match request.correlation_scope {
            CorrelationScope::Rolling => request.window_size,
            CorrelationScope::FullRange => panel.n_rows(),
        };
        let correlation_matrix = rolling_correlation(&panel, correlation_window)?.last();

        let per_asset = self.detect_all(&panel, request)?;

        let mut effects = BTreeMap::new();
        let mut summaries = BTreeMap::new();
        let mut statistics = BTreeMap::new();
        let mut volatility_clusters = BTreeMap::new();
        for asset in per_asset {
            effects.insert(asset.asset_id.clone(), asset.segments);
            summaries.insert(asset.asset_id.clone(), asset.summaries);
            statistics.insert(asset.asset_id.clone(), asset.statistics);
            volatility_clusters.insert(asset.asset_id, asset.volatility_clusters);
        }

        let lead_lag = if self.config.is_lead_lag_enabled() {
            pairwise_lead_lag(&panel, self.config.lead_lag_max_lag)?
        } else {
            Vec::new()
        };

        let result = AnalysisResult {
            request: request.clone(),
            assets: panel.asset_ids().to_vec(),
            timestamps: panel.timestamps().to_vec(),
            correlation_matrix,
            effects,
            summaries,
            statistics,
            volatility_clusters,
            lead_lag,
        };

        log::info!(
            "Analysis finished: {} rows, {} segments in {:?}",
            result.n_rows(),
            result.segment_count(),
            started.elapsed()
        );
        Ok(result)
    }

    /// Run [`analyze`](Self::analyze) through `cache`.
    ///
    /// Invalid requests fail before the cache is consulted.
    pub fn analyze_cached(
        &self,
        request: &AnalysisRequest,
        cache: &AnalysisCache<Arc<AnalysisResult>>,
    ) -> EffectResult<Arc<AnalysisResult>> {
        validate_request(request, &self.config)?;
        cache.get_or_compute(request.fingerprint(), || self.analyze(request).map(Arc::new))
    }

    /// Calibrate lambda per asset toward `target_ratio` over the request range.
    pub fn calibrate_lambdas(
        &self,
        request: &AnalysisRequest,
        target_ratio: f64,
    ) -> EffectResult<BTreeMap<String, LambdaCalibration>> {
        validate_request(request, &self.config)?;
        let panel = self.load_panel(request)?;

        panel
            .asset_ids()
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let calibration = calibrate_lambda(
                    panel.column(i),
                    request.window_size,
                    target_ratio,
                    request.analysis_type,
                )?;
                log::debug!("{}: lambda {:.3}", id, calibration.lambda);
                Ok((id.clone(), calibration))
            })
            .collect()
    }

    fn load_panel(&self, request: &AnalysisRequest) -> EffectResult<AlignedPanel> {
        let loaded = self.store.load(&request.asset_ids)?;
        self.store
            .align(&loaded, &request.asset_ids, request.start_date, request.end_date)
    }

    fn detect_all(
        &self,
        panel: &AlignedPanel,
        request: &AnalysisRequest,
    ) -> EffectResult<Vec<AssetEffects>> {
        let cluster_std = self.config.volatility_cluster_std;

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;

            (0..panel.n_assets())
                .into_par_iter()
                .map(|i| detect_asset(panel, i, request, cluster_std))
                .collect()
        }

        #[cfg(not(feature = "parallel"))]
        {
            (0..panel.n_assets())
                .map(|i| detect_asset(panel, i, request, cluster_std))
                .collect()
        }
    }
}

fn detect_asset(
    panel: &AlignedPanel,
    index: usize,
    request: &AnalysisRequest,
    cluster_std: f64,
) -> EffectResult<AssetEffects> {
    let asset_id = &panel.asset_ids()[index];
    let returns = panel.column(index);

    let threshold = estimate_from_returns(returns, request.window_size, request.lambda)?;
    let volatility = rolling_volatility(returns, request.window_size)?;
    let volatility_clusters =
        detect_volatility_clusters(&volatility, panel.timestamps(), cluster_std)?;
    let segments = detect_effects(asset_id, returns, &threshold, request.analysis_type)?;
    let summaries = summarize_segments(&segments, returns, panel.timestamps())?;
    let statistics = request
        .analysis_type
        .effect_types()
        .iter()
        .map(|&effect_type| effect_statistics(returns, &threshold, effect_type, &segments))
        .collect::<EffectResult<Vec<_>>>()?;

    log::debug!(
        "{}: {} segments, {} volatility clusters over {} rows ({} with a threshold)",
        asset_id,
        segments.len(),
        volatility_clusters.len(),
        returns.len(),
        threshold.defined_count()
    );

    Ok(AssetEffects {
        asset_id: asset_id.clone(),
        segments,
        summaries,
        statistics,
        volatility_clusters,
    })
}

fn pairwise_lead_lag(panel: &AlignedPanel, max_lag: usize) -> EffectResult<Vec<PairLeadLag>> {
    let ids = panel.asset_ids();
    let mut pairs = Vec::new();
    for i in 0..ids.len() {
        for j in i + 1..ids.len() {
            pairs.push(PairLeadLag {
                first: ids[i].clone(),
                second: ids[j].clone(),
                profile: lead_lag_profile(panel.column(i), panel.column(j), max_lag)?,
            });
        }
    }
    Ok(pairs)
}
