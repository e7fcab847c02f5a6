//! Error types and validation functions for correlation and effect analysis.
//!
//! Every failure in the crate is a local, synchronous error. Nothing is retried
//! internally and no error is downgraded to a default result: callers receive a
//! structured error naming the failing parameter where one applies.

use std::sync::Arc;
use thiserror::Error;

/// Error types for correlation and effect analysis operations.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum EffectAnalysisError {
    /// Request parameters are invalid (caller's fault, not retryable).
    #[error("Invalid request: {parameter}: {reason}")]
    InvalidRequest {
        /// Name of the offending request field
        parameter: String,
        /// What is wrong with it
        reason: String,
    },

    /// A requested asset has no loaded series.
    #[error("Unknown asset: {asset_id}")]
    UnknownAsset {
        /// Identifier that could not be resolved
        asset_id: String,
    },

    /// The requested assets share no timestamps inside the requested range.
    #[error("Data gap between {start} and {end}: {reason}")]
    DataGap {
        /// Start of the requested range
        start: String,
        /// End of the requested range
        end: String,
        /// Detail about the gap
        reason: String,
    },

    /// Rolling window size outside the allowed range.
    #[error("Invalid window size {window_size}: expected {constraint}")]
    InvalidWindow {
        /// Window size provided
        window_size: usize,
        /// Valid range description
        constraint: String,
    },

    /// Invalid numeric parameter value.
    #[error("Invalid parameter: {parameter} = {value}, expected {constraint}")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value provided
        value: f64,
        /// Valid range or constraint description
        constraint: String,
    },

    /// A series violates the data model (non-finite values, unordered timestamps).
    #[error("Invalid series {asset_id}: {reason}")]
    InvalidSeries {
        /// Series identifier
        asset_id: String,
        /// Violated invariant
        reason: String,
    },

    /// Persisted data could not be parsed.
    #[error("Malformed data in {source_name} at line {line}: {reason}")]
    DataFormat {
        /// File or source the record came from
        source_name: String,
        /// 1-based line number (0 when unknown)
        line: u64,
        /// Parse failure detail
        reason: String,
    },

    /// I/O operation error.
    #[error("I/O operation failed: {operation}")]
    IoError {
        /// I/O operation that failed
        operation: String,
        /// Underlying error if available
        #[source]
        source: Option<Arc<std::io::Error>>,
    },

    /// Numerical computation error.
    #[error("Numerical computation failed: {reason}")]
    NumericalError {
        /// Detailed reason for numerical failure
        reason: String,
        /// Operation that failed
        operation: Option<String>,
    },
}

impl EffectAnalysisError {
    /// Name of the parameter the error refers to, when there is one.
    pub fn parameter(&self) -> Option<&str> {
        match self {
            Self::InvalidRequest { parameter, .. } | Self::InvalidParameter { parameter, .. } => {
                Some(parameter)
            }
            Self::InvalidWindow { .. } => Some("window_size"),
            Self::UnknownAsset { .. } => Some("asset_ids"),
            _ => None,
        }
    }

    /// Whether the error is the caller's fault (a 4xx-equivalent).
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::IoError { .. } | Self::NumericalError { .. } | Self::DataFormat { .. }
        )
    }
}

/// Result type for effect analysis operations.
pub type EffectResult<T> = Result<T, EffectAnalysisError>;

/// Validates that a parameter is within inclusive bounds.
///
/// # Example
/// ```rust
/// use market_effects::errors::validate_parameter;
///
/// assert!(validate_parameter(2.0, 1.0, 3.0, "lambda").is_ok());
/// assert!(validate_parameter(3.5, 1.0, 3.0, "lambda").is_err());
/// ```
pub fn validate_parameter(value: f64, min: f64, max: f64, name: &str) -> EffectResult<()> {
    if value.is_nan() {
        return Err(EffectAnalysisError::InvalidParameter {
            parameter: name.to_string(),
            value,
            constraint: "must not be NaN".to_string(),
        });
    }

    if min.is_nan() || max.is_nan() || min > max {
        return Err(EffectAnalysisError::NumericalError {
            reason: format!(
                "Invalid bounds for parameter {}: min={}, max={}",
                name, min, max
            ),
            operation: None,
        });
    }

    if value < min || value > max {
        Err(EffectAnalysisError::InvalidParameter {
            parameter: name.to_string(),
            value,
            constraint: format!("[{}, {}]", min, max),
        })
    } else {
        Ok(())
    }
}

/// Validates a rolling window size against `[2, available]`.
pub fn validate_window_size(window_size: usize, available: usize) -> EffectResult<()> {
    if window_size < 2 || window_size > available {
        return Err(EffectAnalysisError::InvalidWindow {
            window_size,
            constraint: if available < 2 {
                format!("at least 2 rows, but only {} available", available)
            } else {
                format!("[2, {}]", available)
            },
        });
    }
    Ok(())
}

/// Validates that all values in a slice are finite.
///
/// Returns on the first non-finite value, naming its index.
///
/// # Example
/// ```rust
/// use market_effects::errors::validate_all_finite;
///
/// assert!(validate_all_finite(&[0.01, -0.02], "returns").is_ok());
/// assert!(validate_all_finite(&[0.01, f64::NAN], "returns").is_err());
/// ```
pub fn validate_all_finite(data: &[f64], name: &str) -> EffectResult<()> {
    if let Some((i, &value)) = data.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        let value_desc = if value.is_nan() {
            "NaN".to_string()
        } else if value.is_sign_positive() {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        };

        return Err(EffectAnalysisError::NumericalError {
            reason: format!(
                "{} contains non-finite value at index {}: {}",
                name, i, value_desc
            ),
            operation: None,
        });
    }

    Ok(())
}

impl From<std::io::Error> for EffectAnalysisError {
    fn from(err: std::io::Error) -> Self {
        EffectAnalysisError::IoError {
            operation: err.kind().to_string(),
            source: Some(Arc::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_parameter_valid_range() {
        assert!(validate_parameter(2.0, 1.0, 3.0, "lambda").is_ok());
        // Boundaries are inclusive
        assert!(validate_parameter(1.0, 1.0, 3.0, "lambda").is_ok());
        assert!(validate_parameter(3.0, 1.0, 3.0, "lambda").is_ok());
    }

    #[test]
    fn test_validate_parameter_out_of_range() {
        match validate_parameter(0.5, 1.0, 3.0, "lambda") {
            Err(EffectAnalysisError::InvalidParameter {
                parameter,
                value,
                constraint,
            }) => {
                assert_eq!(parameter, "lambda");
                assert_eq!(value, 0.5);
                assert_eq!(constraint, "[1, 3]");
            }
            other => panic!("Expected InvalidParameter error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_parameter_nan_inputs() {
        assert!(matches!(
            validate_parameter(f64::NAN, 1.0, 3.0, "lambda"),
            Err(EffectAnalysisError::InvalidParameter { .. })
        ));
        assert!(matches!(
            validate_parameter(2.0, f64::NAN, 3.0, "lambda"),
            Err(EffectAnalysisError::NumericalError { .. })
        ));
        assert!(matches!(
            validate_parameter(2.0, 3.0, 1.0, "lambda"),
            Err(EffectAnalysisError::NumericalError { .. })
        ));
    }

    #[test]
    fn test_validate_window_size() {
        assert!(validate_window_size(2, 10).is_ok());
        assert!(validate_window_size(10, 10).is_ok());

        match validate_window_size(11, 10) {
            Err(EffectAnalysisError::InvalidWindow {
                window_size,
                constraint,
            }) => {
                assert_eq!(window_size, 11);
                assert_eq!(constraint, "[2, 10]");
            }
            other => panic!("Expected InvalidWindow error, got {:?}", other),
        }

        assert!(matches!(
            validate_window_size(1, 10),
            Err(EffectAnalysisError::InvalidWindow { window_size: 1, .. })
        ));
        assert!(validate_window_size(2, 1).is_err());
    }

    #[test]
    fn test_validate_all_finite() {
        assert!(validate_all_finite(&[], "empty").is_ok());
        assert!(validate_all_finite(&[1.0, -1.0, 0.0], "returns").is_ok());

        match validate_all_finite(&[1.0, 2.0, f64::NAN, 4.0], "returns") {
            Err(EffectAnalysisError::NumericalError { reason, .. }) => {
                assert!(reason.contains("returns"));
                assert!(reason.contains("index 2"));
                assert!(reason.contains("NaN"));
            }
            other => panic!("Expected NumericalError, got {:?}", other),
        }

        match validate_all_finite(&[f64::NEG_INFINITY], "returns") {
            Err(EffectAnalysisError::NumericalError { reason, .. }) => {
                assert!(reason.contains("-Infinity"));
            }
            other => panic!("Expected NumericalError, got {:?}", other),
        }
    }

    #[test]
    fn test_error_parameter_names() {
        let err = EffectAnalysisError::InvalidRequest {
            parameter: "start_date".to_string(),
            reason: "must precede end_date".to_string(),
        };
        assert_eq!(err.parameter(), Some("start_date"));
        assert!(err.is_client_error());

        let err = EffectAnalysisError::InvalidWindow {
            window_size: 1,
            constraint: "[2, 10]".to_string(),
        };
        assert_eq!(err.parameter(), Some("window_size"));

        let err = EffectAnalysisError::IoError {
            operation: "read".to_string(),
            source: None,
        };
        assert_eq!(err.parameter(), None);
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_error_display_formatting() {
        let err = EffectAnalysisError::UnknownAsset {
            asset_id: "DOGEUSDT".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown asset: DOGEUSDT");

        let err = EffectAnalysisError::InvalidParameter {
            parameter: "lambda".to_string(),
            value: 3.5,
            constraint: "[1, 3]".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("lambda"));
        assert!(message.contains("3.5"));
        assert!(message.contains("[1, 3]"));
    }

    #[test]
    fn test_io_error_conversion_keeps_source() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.csv");
        let err: EffectAnalysisError = io.into();
        assert!(matches!(err, EffectAnalysisError::IoError { .. }));
        assert!(err.source().is_some());
    }
}
