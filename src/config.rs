//! # Engine Configuration
//!
//! Bounds and defaults that govern request validation and the optional
//! analysis components. Values can be overridden from the environment with
//! [`EngineConfig::from_env`].

use crate::errors::{EffectAnalysisError, EffectResult};
use crate::volatility_clusters::{validate_cluster_std, DEFAULT_CLUSTER_STD};
use std::path::PathBuf;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Smallest lambda accepted by the threshold estimator.
pub const MIN_LAMBDA: f64 = 1.0;
/// Largest lambda accepted by the threshold estimator.
pub const MAX_LAMBDA: f64 = 3.0;

/// Configuration for the analysis engine
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EngineConfig {
    /// Smallest rolling window a request may ask for
    pub min_window_size: usize,
    /// Largest rolling window a request may ask for
    pub max_window_size: usize,
    /// Window used when a caller has no preference
    pub default_window_size: usize,
    /// Lambda used when a caller has no preference
    pub default_lambda: f64,
    /// Window presets offered to the presentation layer
    pub rolling_window_presets: Vec<usize>,
    /// Maximum lag for pairwise lead-lag profiles (0 disables them)
    pub lead_lag_max_lag: usize,
    /// Standard deviations above the mean rolling volatility that mark a
    /// volatility cluster
    pub volatility_cluster_std: f64,
    /// Directory scanned by the CSV store
    pub data_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl EngineConfig {
    /// Standard configuration: lead-lag profiles over +/- 5 rows
    pub fn standard() -> Self {
        Self {
            min_window_size: 2,
            max_window_size: 500,
            default_window_size: 30,
            default_lambda: 2.0,
            rolling_window_presets: vec![30, 60, 90, 180, 360],
            lead_lag_max_lag: 5,
            volatility_cluster_std: DEFAULT_CLUSTER_STD,
            data_dir: PathBuf::from("data"),
        }
    }

    /// Light configuration: correlation and detection only
    pub fn light() -> Self {
        Self {
            lead_lag_max_lag: 0,
            ..Self::standard()
        }
    }

    /// Standard configuration with overrides read from the environment.
    ///
    /// Recognized variables: `DEFAULT_WINDOW_SIZE`, `MIN_WINDOW_SIZE`,
    /// `MAX_WINDOW_SIZE`, `DEFAULT_LAMBDA`, `LEAD_LAG_MAX_LAG`,
    /// `VOLATILITY_CLUSTER_STD` and `DATA_DIR`.
    /// Unparseable values are rejected rather than ignored.
    pub fn from_env() -> EffectResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> EffectResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::standard();

        if let Some(v) = lookup("DEFAULT_WINDOW_SIZE") {
            config.default_window_size = parse_env("DEFAULT_WINDOW_SIZE", &v)?;
        }
        if let Some(v) = lookup("MIN_WINDOW_SIZE") {
            config.min_window_size = parse_env("MIN_WINDOW_SIZE", &v)?;
        }
        if let Some(v) = lookup("MAX_WINDOW_SIZE") {
            config.max_window_size = parse_env("MAX_WINDOW_SIZE", &v)?;
        }
        if let Some(v) = lookup("DEFAULT_LAMBDA") {
            config.default_lambda = parse_env("DEFAULT_LAMBDA", &v)?;
        }
        if let Some(v) = lookup("LEAD_LAG_MAX_LAG") {
            config.lead_lag_max_lag = parse_env("LEAD_LAG_MAX_LAG", &v)?;
        }
        if let Some(v) = lookup("VOLATILITY_CLUSTER_STD") {
            config.volatility_cluster_std = parse_env("VOLATILITY_CLUSTER_STD", &v)?;
        }
        if let Some(v) = lookup("DATA_DIR") {
            config.data_dir = PathBuf::from(v);
        }

        config.validate()?;
        log::debug!("engine configuration loaded: {:?}", config);
        Ok(config)
    }

    /// Check internal consistency of the bounds and defaults
    pub fn validate(&self) -> EffectResult<()> {
        if self.min_window_size < 2 {
            return Err(EffectAnalysisError::InvalidParameter {
                parameter: "min_window_size".to_string(),
                value: self.min_window_size as f64,
                constraint: "at least 2".to_string(),
            });
        }
        if !(self.min_window_size..=self.max_window_size).contains(&self.default_window_size) {
            return Err(EffectAnalysisError::InvalidParameter {
                parameter: "default_window_size".to_string(),
                value: self.default_window_size as f64,
                constraint: format!("[{}, {}]", self.min_window_size, self.max_window_size),
            });
        }
        if !(MIN_LAMBDA..=MAX_LAMBDA).contains(&self.default_lambda) {
            return Err(EffectAnalysisError::InvalidParameter {
                parameter: "default_lambda".to_string(),
                value: self.default_lambda,
                constraint: format!("[{}, {}]", MIN_LAMBDA, MAX_LAMBDA),
            });
        }
        validate_cluster_std(self.volatility_cluster_std)
    }

    /// Whether pairwise lead-lag profiles are computed
    pub fn is_lead_lag_enabled(&self) -> bool {
        self.lead_lag_max_lag > 0
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> EffectResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| EffectAnalysisError::InvalidParameter {
            parameter: key.to_string(),
            value: f64::NAN,
            constraint: format!("parseable value, got {:?}", raw),
        })
}
