//! # Market Effects
//!
//! Rolling cross-asset correlation and volatility-scaled effect detection for
//! financial return series.
//!
//! Given a set of asset return series, the crate aligns them on their common
//! timestamps, computes pairwise Pearson correlation matrices over a rolling
//! window, and flags contiguous periods where an asset's returns exceed a
//! threshold proportional to its own rolling volatility.
//!
//! ## Key Features
//!
//! - **Rolling Correlation**: lazy, restartable sequence of correlation matrices
//! - **Adaptive Thresholds**: `lambda` times the trailing sample standard deviation
//! - **Effect Detection**: explicit two-state machine for heat waves (`r > t`)
//!   and meteor showers (`|r| > t`)
//! - **Volatility Clusters**: runs where rolling volatility sits far above its mean
//! - **Lead-Lag Profiles**: shifted pairwise correlations
//! - **Lambda Calibration**: search for the multiplier that hits a target effect ratio
//! - **Result Cache**: single-flight cache keyed by request fingerprint
//! - **CSV Store**: directory of `timestamp,close` files converted to returns
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use market_effects::{AnalysisRequest, CsvSeriesStore, EffectAnalyzer, EngineConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::from_env()?;
//!     let store = CsvSeriesStore::open(&config.data_dir)?;
//!     let analyzer = EffectAnalyzer::new(store, config)?;
//!
//!     let start = "2024-01-01".parse::<chrono::NaiveDate>()?.and_hms_opt(0, 0, 0).unwrap();
//!     let end = "2024-06-30".parse::<chrono::NaiveDate>()?.and_hms_opt(0, 0, 0).unwrap();
//!     let request = AnalysisRequest::new(vec!["BTCUSDT".into(), "ETHUSDT".into()], start, end, 30);
//!
//!     let result = analyzer.analyze(&request)?;
//!     for (asset, segments) in &result.effects {
//!         println!("{}: {} effect periods", asset, segments.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Cargo Features
//!
//! - `serde` (default): serialization of requests, results and configuration
//! - `parallel` (default): rayon-parallel per-asset detection and matrix materialization

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod computation_cache;
pub mod config;
pub mod errors;
pub mod math_utils;
pub mod results;

// Data access
pub mod csv_store;
pub mod series_store;

// Analysis components
pub mod analysis;
pub mod effect_detection;
pub mod lambda_calibration;
pub mod lead_lag;
pub mod rolling_correlation;
pub mod threshold;
pub mod volatility_clusters;

// Re-exports for convenience - main public API
pub use analysis::{validate_request, AnalysisRequest, CorrelationScope, EffectAnalyzer};
pub use computation_cache::{AnalysisCache, CacheStats, RequestFingerprint};
pub use config::EngineConfig;
pub use errors::{EffectAnalysisError, EffectResult};
pub use results::{AnalysisResponse, AnalysisResult, EffectPayload, PairLeadLag};

// Data access exports
pub use csv_store::CsvSeriesStore;
pub use series_store::{
    align_series, AlignedPanel, AssetSeries, InMemorySeriesStore, LoadedSeries, TimeSeriesStore,
    Timestamp,
};

// Component exports
pub use effect_detection::{
    detect_effect, detect_effects, effect_statistics, summarize_segments, AnalysisType,
    DetectorState, EffectDetector, EffectPeriodSummary, EffectSegment, EffectStatistics,
    EffectType,
};
pub use lambda_calibration::{calibrate_lambda, effect_ratio, LambdaCalibration};
pub use lead_lag::{lead_lag_profile, LeadLagProfile};
pub use rolling_correlation::{
    rolling_correlation, CorrelationMatrix, RollingCorrelation, RollingCorrelationIter,
};
pub use threshold::{estimate, estimate_from_returns, rolling_volatility, Threshold};
pub use volatility_clusters::{detect_volatility_clusters, VolatilityCluster};
