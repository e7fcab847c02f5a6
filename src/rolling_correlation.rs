//! # Rolling Correlation
//!
//! Pairwise sample Pearson correlation matrices over trailing windows of an
//! [`AlignedPanel`].
//!
//! The sequence is lazy: [`RollingCorrelation::iter`] computes one matrix per
//! window end on demand and can be restarted any number of times, while
//! [`RollingCorrelation::last`] computes only the final matrix.
//!
//! An asset whose returns are constant inside a window has no defined
//! correlation there. It is reported as 0 against every other asset, and its
//! diagonal entry stays 1.

use crate::errors::{
    validate_all_finite, validate_window_size, EffectAnalysisError, EffectResult,
};
use crate::math_utils::{constants::CORRELATION_TOLERANCE, float_ops, is_degenerate, mean};
use crate::series_store::{AlignedPanel, Timestamp};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Square, symmetric correlation matrix for one window end.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawCorrelationMatrix"))]
pub struct CorrelationMatrix {
    /// Timestamp of the last row in the window
    timestamp: Timestamp,
    /// Number of assets
    size: usize,
    /// Row-major values, `size * size`
    values: Vec<f64>,
}

impl CorrelationMatrix {
    /// Identity matrix (every off-diagonal entry 0)
    pub fn identity(size: usize, timestamp: Timestamp) -> Self {
        let mut values = vec![0.0; size * size];
        for i in 0..size {
            values[i * size + i] = 1.0;
        }
        Self {
            timestamp,
            size,
            values,
        }
    }

    /// Matrix from row-major values.
    ///
    /// Fails unless `values` holds `size * size` finite entries.
    pub fn from_values(size: usize, timestamp: Timestamp, values: Vec<f64>) -> EffectResult<Self> {
        let expected = size.checked_mul(size);
        if expected != Some(values.len()) {
            return Err(EffectAnalysisError::InvalidParameter {
                parameter: "values".to_string(),
                value: values.len() as f64,
                constraint: format!("exactly {} x {} entries", size, size),
            });
        }
        validate_all_finite(&values, "correlation matrix")?;
        Ok(Self {
            timestamp,
            size,
            values,
        })
    }

    /// Timestamp of the window end
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Number of assets
    pub fn size(&self) -> usize {
        self.size
    }

    /// Correlation between assets `i` and `j`
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        debug_assert!(i < self.size && j < self.size);
        self.values[i * self.size + j]
    }

    /// Set the correlation of a pair; the diagonal is fixed at 1.
    #[inline]
    fn set_pair(&mut self, i: usize, j: usize, value: f64) {
        if i == j {
            return;
        }
        self.values[i * self.size + j] = value;
        self.values[j * self.size + i] = value;
    }

    /// Nested-row representation for serialization to the presentation layer
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.values
            .chunks(self.size.max(1))
            .take(self.size)
            .map(|row| row.to_vec())
            .collect()
    }

    /// Whether `m[i][j] == m[j][i]` within `tolerance` for every pair
    pub fn is_symmetric(&self, tolerance: f64) -> bool {
        (0..self.size).all(|i| {
            (i + 1..self.size)
                .all(|j| float_ops::approx_eq_eps(self.get(i, j), self.get(j, i), tolerance))
        })
    }

    /// Whether every diagonal entry is within `tolerance` of 1
    pub fn has_unit_diagonal(&self, tolerance: f64) -> bool {
        (0..self.size).all(|i| float_ops::approx_eq_eps(self.get(i, i), 1.0, tolerance))
    }

    /// Whether every entry lies in `[-1, 1]` (widened by the default tolerance)
    pub fn is_bounded(&self) -> bool {
        let limit = 1.0 + CORRELATION_TOLERANCE;
        self.values.iter().all(|v| v.abs() <= limit)
    }
}

/// Unvalidated wire form of [`CorrelationMatrix`].
#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct RawCorrelationMatrix {
    timestamp: Timestamp,
    size: usize,
    values: Vec<f64>,
}

#[cfg(feature = "serde")]
impl TryFrom<RawCorrelationMatrix> for CorrelationMatrix {
    type Error = EffectAnalysisError;

    fn try_from(raw: RawCorrelationMatrix) -> Result<Self, Self::Error> {
        Self::from_values(raw.size, raw.timestamp, raw.values)
    }
}

/// Lazy sequence of correlation matrices, one per full trailing window.
#[derive(Debug, Clone, Copy)]
pub struct RollingCorrelation<'a> {
    panel: &'a AlignedPanel,
    window_size: usize,
}

/// Validate the window against the panel and build the rolling sequence.
///
/// Fails with `InvalidWindow` unless `2 <= window_size <= panel.n_rows()`.
pub fn rolling_correlation(
    panel: &AlignedPanel,
    window_size: usize,
) -> EffectResult<RollingCorrelation<'_>> {
    validate_window_size(window_size, panel.n_rows())?;
    Ok(RollingCorrelation { panel, window_size })
}

impl<'a> RollingCorrelation<'a> {
    /// Window length in rows
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Number of matrices in the sequence
    pub fn len(&self) -> usize {
        self.panel.n_rows() - self.window_size + 1
    }

    /// Always false: a validated window yields at least one matrix
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fresh iterator over every window end, oldest first
    pub fn iter(&self) -> RollingCorrelationIter<'a> {
        RollingCorrelationIter {
            panel: self.panel,
            window_size: self.window_size,
            next_end: self.window_size - 1,
            stop: self.panel.n_rows(),
        }
    }

    /// Matrix for the window ending at row `end` (inclusive)
    pub fn matrix_at(&self, end: usize) -> Option<CorrelationMatrix> {
        if end + 1 < self.window_size || end >= self.panel.n_rows() {
            return None;
        }
        Some(window_correlation(self.panel, end, self.window_size))
    }

    /// Matrix for the final window only
    pub fn last(&self) -> CorrelationMatrix {
        window_correlation(self.panel, self.panel.n_rows() - 1, self.window_size)
    }

    /// Materialize every matrix in order.
    pub fn collect_all(&self) -> Vec<CorrelationMatrix> {
        let ends = self.window_size - 1..self.panel.n_rows();

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;

            ends.into_par_iter()
                .map(|end| window_correlation(self.panel, end, self.window_size))
                .collect()
        }

        #[cfg(not(feature = "parallel"))]
        {
            ends.map(|end| window_correlation(self.panel, end, self.window_size))
                .collect()
        }
    }
}

impl<'a> IntoIterator for &RollingCorrelation<'a> {
    type Item = CorrelationMatrix;
    type IntoIter = RollingCorrelationIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator produced by [`RollingCorrelation::iter`].
#[derive(Debug, Clone)]
pub struct RollingCorrelationIter<'a> {
    panel: &'a AlignedPanel,
    window_size: usize,
    next_end: usize,
    stop: usize,
}

impl Iterator for RollingCorrelationIter<'_> {
    type Item = CorrelationMatrix;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_end >= self.stop {
            return None;
        }
        let matrix = window_correlation(self.panel, self.next_end, self.window_size);
        self.next_end += 1;
        Some(matrix)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.stop.saturating_sub(self.next_end);
        (remaining, Some(remaining))
    }
}

impl DoubleEndedIterator for RollingCorrelationIter<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.next_end >= self.stop {
            return None;
        }
        self.stop -= 1;
        Some(window_correlation(self.panel, self.stop, self.window_size))
    }
}

impl ExactSizeIterator for RollingCorrelationIter<'_> {}

impl std::iter::FusedIterator for RollingCorrelationIter<'_> {}

/// Correlation matrix over rows `end + 1 - window_size ..= end`.
fn window_correlation(panel: &AlignedPanel, end: usize, window_size: usize) -> CorrelationMatrix {
    let start = end + 1 - window_size;
    let n_assets = panel.n_assets();

    // Centre every column once; degenerate columns stay out of the pair loop.
    let centred: Vec<Option<(Vec<f64>, f64)>> = panel
        .columns()
        .iter()
        .map(|column| {
            let window = &column[start..=end];
            if is_degenerate(window) {
                return None;
            }
            let m = mean(window);
            let deviations: Vec<f64> = window.iter().map(|x| x - m).collect();
            let norm = deviations.iter().map(|d| d * d).sum::<f64>().sqrt();
            Some((deviations, norm))
        })
        .collect();

    let mut matrix = CorrelationMatrix::identity(n_assets, panel.timestamps()[end]);

    for i in 0..n_assets {
        let Some((dev_i, norm_i)) = &centred[i] else {
            continue;
        };
        for j in (i + 1)..n_assets {
            let Some((dev_j, norm_j)) = &centred[j] else {
                continue;
            };
            let cov: f64 = dev_i.iter().zip(dev_j).map(|(a, b)| a * b).sum();
            let r = float_ops::safe_div(cov, norm_i * norm_j)
                .map(|r| r.clamp(-1.0, 1.0))
                .unwrap_or(0.0);
            matrix.set_pair(i, j, r);
        }
    }

    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series_store::{align_series, AssetSeries, LoadedSeries};
    use assert_approx_eq::assert_approx_eq;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn day(d: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + chrono::Duration::days(d as i64)
    }

    fn panel(columns: &[(&str, Vec<f64>)]) -> AlignedPanel {
        let mut loaded = LoadedSeries::new();
        for (id, values) in columns {
            let points = values
                .iter()
                .enumerate()
                .map(|(i, &v)| (day(i as u32), v))
                .collect();
            loaded.insert(id.to_string(), Arc::new(AssetSeries::new(*id, points).unwrap()));
        }
        let ids: Vec<String> = columns.iter().map(|(id, _)| id.to_string()).collect();
        align_series(&loaded, &ids, day(0), day(10_000)).unwrap()
    }

    #[test]
    fn test_anti_correlated_offset_series() {
        let a = vec![0.01, 0.03, -0.02, 0.05, 0.00];
        let b: Vec<f64> = a.iter().map(|x| 0.5 - x).collect();
        let p = panel(&[("A", a), ("B", b)]);

        let rolling = rolling_correlation(&p, 5).unwrap();
        assert_eq!(rolling.len(), 1);

        let m = rolling.last();
        assert_approx_eq!(m.get(0, 1), -1.0, 1e-9);
        assert_approx_eq!(m.get(1, 0), -1.0, 1e-9);
        assert_eq!(m.get(0, 0), 1.0);
        assert_eq!(m.get(1, 1), 1.0);
        assert_eq!(m.timestamp(), day(4));
    }

    #[test]
    fn test_constant_window_correlates_zero() {
        let p = panel(&[
            ("FLAT", vec![0.02; 6]),
            ("UP", vec![0.01, 0.02, 0.03, 0.04, 0.05, 0.06]),
            ("DOWN", vec![0.06, 0.05, 0.04, 0.03, 0.02, 0.01]),
        ]);
        let m = rolling_correlation(&p, 4).unwrap().last();

        assert_eq!(m.get(0, 0), 1.0);
        assert_eq!(m.get(0, 1), 0.0);
        assert_eq!(m.get(2, 0), 0.0);
        assert_approx_eq!(m.get(1, 2), -1.0, 1e-9);
        assert!(m.is_symmetric(1e-12));
    }

    #[test]
    fn test_tiny_scale_series_stay_correlated() {
        let base = [1.0, 3.0, 2.0, 5.0, 4.0];
        for scale in [1e-6, 1e-7, 1e-10] {
            let a: Vec<f64> = base.iter().map(|v| v * scale).collect();
            let b: Vec<f64> = a.iter().map(|v| 2.0 * v).collect();
            let m = rolling_correlation(&panel(&[("A", a), ("B", b)]), 5)
                .unwrap()
                .last();
            assert_approx_eq!(m.get(0, 1), 1.0, 1e-12);
        }
    }

    #[test]
    fn test_from_values_checks_shape() {
        let ok = CorrelationMatrix::from_values(2, day(0), vec![1.0, 0.5, 0.5, 1.0]).unwrap();
        assert_eq!(ok.get(1, 0), 0.5);

        assert!(matches!(
            CorrelationMatrix::from_values(2, day(0), vec![1.0, 0.5, 0.5]),
            Err(EffectAnalysisError::InvalidParameter { .. })
        ));
        assert!(CorrelationMatrix::from_values(1, day(0), vec![f64::NAN]).is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialize_rejects_malformed_matrix() {
        let good = CorrelationMatrix::identity(2, day(3));
        let json = serde_json::to_string(&good).unwrap();
        let back: CorrelationMatrix = serde_json::from_str(&json).unwrap();
        assert_eq!(back, good);

        let bad = json.replace("[1.0,0.0,0.0,1.0]", "[1.0,0.0,0.0]");
        assert_ne!(bad, json);
        assert!(serde_json::from_str::<CorrelationMatrix>(&bad).is_err());
    }

    #[test]
    fn test_window_bounds() {
        let p = panel(&[("A", vec![0.1, 0.2, 0.3]), ("B", vec![0.3, 0.1, 0.2])]);

        assert_eq!(rolling_correlation(&p, 3).unwrap().len(), 1);
        assert!(matches!(
            rolling_correlation(&p, 4),
            Err(EffectAnalysisError::InvalidWindow { window_size: 4, .. })
        ));
        assert!(matches!(
            rolling_correlation(&p, 1),
            Err(EffectAnalysisError::InvalidWindow { window_size: 1, .. })
        ));
    }

    #[test]
    fn test_iterator_is_restartable_and_exact() {
        let p = panel(&[
            ("A", vec![0.01, -0.02, 0.03, 0.00, 0.02, -0.01, 0.04]),
            ("B", vec![0.02, -0.01, 0.01, 0.01, -0.03, 0.00, 0.02]),
        ]);
        let rolling = rolling_correlation(&p, 3).unwrap();

        let first: Vec<_> = rolling.iter().collect();
        let second: Vec<_> = rolling.iter().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 5);
        assert_eq!(rolling.iter().len(), 5);

        assert_eq!(rolling.collect_all(), first);
        assert_eq!(rolling.iter().next_back(), Some(rolling.last()));
        assert_eq!(rolling.matrix_at(2), Some(first[0].clone()));
        assert_eq!(rolling.matrix_at(1), None);
        assert_eq!(rolling.matrix_at(7), None);

        let timestamps: Vec<_> = (&rolling).into_iter().map(|m| m.timestamp()).collect();
        assert_eq!(timestamps, p.timestamps()[2..].to_vec());
    }

    #[test]
    fn test_to_rows_shape() {
        let p = panel(&[
            ("A", vec![0.01, 0.02, 0.04]),
            ("B", vec![0.02, 0.01, 0.03]),
            ("C", vec![0.00, 0.05, 0.01]),
        ]);
        let rows = rolling_correlation(&p, 3).unwrap().last().to_rows();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.len() == 3));
        assert_eq!(rows[1][1], 1.0);
    }
}
