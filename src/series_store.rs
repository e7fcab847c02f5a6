//! # Time Series Store
//!
//! Return series per asset and the aligned panel view the engine computes on.
//!
//! The store is the single I/O boundary of the crate: data is loaded once per
//! request and then treated as an immutable snapshot. [`TimeSeriesStore`] is the
//! collaborator interface; [`InMemorySeriesStore`] keeps series inserted
//! programmatically and [`crate::csv_store::CsvSeriesStore`] reads a directory
//! of CSV files.

use crate::errors::{validate_all_finite, EffectAnalysisError, EffectResult};
use chrono::NaiveDateTime;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Observation timestamp.
pub type Timestamp = NaiveDateTime;

/// Series loaded for one request, keyed by asset id (deterministic ordering).
pub type LoadedSeries = BTreeMap<String, Arc<AssetSeries>>;

/// Ordered return observations for a single asset.
///
/// Timestamps are strictly increasing and every return is finite; both are
/// checked on construction and the series is immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AssetSeries {
    id: String,
    timestamps: Vec<Timestamp>,
    returns: Vec<f64>,
}

impl AssetSeries {
    /// Build a series from `(timestamp, return)` pairs.
    pub fn new(id: impl Into<String>, points: Vec<(Timestamp, f64)>) -> EffectResult<Self> {
        let (timestamps, returns) = points.into_iter().unzip();
        Self::from_parts(id, timestamps, returns)
    }

    /// Build a series from parallel timestamp and return vectors.
    pub fn from_parts(
        id: impl Into<String>,
        timestamps: Vec<Timestamp>,
        returns: Vec<f64>,
    ) -> EffectResult<Self> {
        let id = id.into();

        if timestamps.len() != returns.len() {
            return Err(EffectAnalysisError::InvalidSeries {
                asset_id: id,
                reason: format!(
                    "{} timestamps but {} returns",
                    timestamps.len(),
                    returns.len()
                ),
            });
        }

        validate_all_finite(&returns, &id).map_err(|e| EffectAnalysisError::InvalidSeries {
            asset_id: id.clone(),
            reason: e.to_string(),
        })?;

        if let Some(pos) = timestamps.windows(2).position(|w| w[0] >= w[1]) {
            return Err(EffectAnalysisError::InvalidSeries {
                asset_id: id,
                reason: format!(
                    "timestamps not strictly increasing at index {} ({} then {})",
                    pos + 1,
                    timestamps[pos],
                    timestamps[pos + 1]
                ),
            });
        }

        Ok(Self {
            id,
            timestamps,
            returns,
        })
    }

    /// Asset identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Observation timestamps, ascending
    pub fn timestamps(&self) -> &[Timestamp] {
        &self.timestamps
    }

    /// Return values, aligned with [`Self::timestamps`]
    pub fn returns(&self) -> &[f64] {
        &self.returns
    }

    /// Number of observations
    pub fn len(&self) -> usize {
        self.returns.len()
    }

    /// Whether the series has no observations
    pub fn is_empty(&self) -> bool {
        self.returns.is_empty()
    }

    /// Index range of observations inside `[start, end]`.
    fn range_indices(&self, start: Timestamp, end: Timestamp) -> std::ops::Range<usize> {
        let lo = self.timestamps.partition_point(|t| *t < start);
        let hi = self.timestamps.partition_point(|t| *t <= end);
        lo..hi.max(lo)
    }

    fn value_at(&self, ts: &Timestamp) -> Option<f64> {
        self.timestamps
            .binary_search(ts)
            .ok()
            .map(|i| self.returns[i])
    }
}

/// Returns of several assets restricted to their common timestamps.
///
/// Columns follow the requested asset order; every row holds exactly one value
/// per asset.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AlignedPanel {
    asset_ids: Vec<String>,
    timestamps: Vec<Timestamp>,
    columns: Vec<Vec<f64>>,
}

impl AlignedPanel {
    /// Asset ids in column order
    pub fn asset_ids(&self) -> &[String] {
        &self.asset_ids
    }

    /// Row timestamps, ascending
    pub fn timestamps(&self) -> &[Timestamp] {
        &self.timestamps
    }

    /// Number of aligned rows
    pub fn n_rows(&self) -> usize {
        self.timestamps.len()
    }

    /// Number of assets (columns)
    pub fn n_assets(&self) -> usize {
        self.asset_ids.len()
    }

    /// Column of returns for the asset at `index`
    pub fn column(&self, index: usize) -> &[f64] {
        &self.columns[index]
    }

    /// Column of returns for `asset_id`
    pub fn column_by_id(&self, asset_id: &str) -> Option<&[f64]> {
        self.asset_ids
            .iter()
            .position(|id| id == asset_id)
            .map(|i| self.columns[i].as_slice())
    }

    /// All columns in asset order
    pub fn columns(&self) -> &[Vec<f64>] {
        &self.columns
    }

    /// Values of every asset at `row`
    pub fn row(&self, row: usize) -> Vec<f64> {
        self.columns.iter().map(|c| c[row]).collect()
    }

    /// The column as an [`AssetSeries`] carrying the panel timestamps.
    pub fn to_series(&self, index: usize) -> AssetSeries {
        AssetSeries {
            id: self.asset_ids[index].clone(),
            timestamps: self.timestamps.clone(),
            returns: self.columns[index].clone(),
        }
    }
}

/// Align `asset_ids` (in that order) over the inclusive range `[start, end]`.
///
/// Fails with `UnknownAsset` when an id is missing from `series` and with
/// `DataGap` when the assets share no timestamp inside the range.
pub fn align_series(
    series: &LoadedSeries,
    asset_ids: &[String],
    start: Timestamp,
    end: Timestamp,
) -> EffectResult<AlignedPanel> {
    if asset_ids.is_empty() {
        return Err(EffectAnalysisError::InvalidRequest {
            parameter: "asset_ids".to_string(),
            reason: "at least one asset is required".to_string(),
        });
    }

    let selected: Vec<&AssetSeries> = asset_ids
        .iter()
        .map(|id| {
            series
                .get(id)
                .map(|s| s.as_ref())
                .ok_or_else(|| EffectAnalysisError::UnknownAsset {
                    asset_id: id.clone(),
                })
        })
        .collect::<EffectResult<_>>()?;

    let gap = |reason: String| EffectAnalysisError::DataGap {
        start: start.to_string(),
        end: end.to_string(),
        reason,
    };

    if start > end {
        return Err(gap("range is empty".to_string()));
    }

    // Drive the intersection from the asset with the fewest in-range rows.
    let (pivot_idx, pivot_range) = selected
        .iter()
        .enumerate()
        .map(|(i, s)| (i, s.range_indices(start, end)))
        .min_by_key(|(_, r)| r.len())
        .unwrap_or((0, 0..0));

    if pivot_range.is_empty() {
        return Err(gap(format!(
            "{} has no observations in range",
            selected[pivot_idx].id()
        )));
    }

    let pivot = selected[pivot_idx];
    let mut timestamps = Vec::with_capacity(pivot_range.len());
    let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(pivot_range.len()); selected.len()];
    let mut row = vec![0.0; selected.len()];

    'rows: for ts in &pivot.timestamps()[pivot_range] {
        for (col, s) in selected.iter().enumerate() {
            match s.value_at(ts) {
                Some(v) => row[col] = v,
                None => continue 'rows,
            }
        }
        timestamps.push(*ts);
        for (column, &v) in columns.iter_mut().zip(&row) {
            column.push(v);
        }
    }

    if timestamps.is_empty() {
        return Err(gap(format!(
            "no common timestamps across {}",
            asset_ids.join(", ")
        )));
    }

    log::debug!(
        "aligned {} assets over {} common rows ({} .. {})",
        asset_ids.len(),
        timestamps.len(),
        timestamps[0],
        timestamps[timestamps.len() - 1]
    );

    Ok(AlignedPanel {
        asset_ids: asset_ids.to_vec(),
        timestamps,
        columns,
    })
}

/// Source of asset return series.
pub trait TimeSeriesStore: Send + Sync {
    /// Load the series for every requested id.
    ///
    /// Fails with `UnknownAsset` for the first id that has no series.
    fn load(&self, asset_ids: &[String]) -> EffectResult<LoadedSeries>;

    /// Ids the store can serve, sorted.
    fn available_assets(&self) -> Vec<String>;

    /// Align loaded series over `[start, end]`.
    fn align(
        &self,
        series: &LoadedSeries,
        asset_ids: &[String],
        start: Timestamp,
        end: Timestamp,
    ) -> EffectResult<AlignedPanel> {
        align_series(series, asset_ids, start, end)
    }
}

/// Store holding series inserted at runtime.
#[derive(Debug, Default)]
pub struct InMemorySeriesStore {
    series: RwLock<BTreeMap<String, Arc<AssetSeries>>>,
}

impl InMemorySeriesStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a series.
    ///
    /// # Returns
    /// `true` if a new series was inserted, `false` if an existing one was replaced
    pub fn insert(&self, series: AssetSeries) -> bool {
        let id = series.id().to_string();
        let len = series.len();
        let is_new = self
            .series
            .write()
            .insert(id.clone(), Arc::new(series))
            .is_none();
        log::debug!(
            "{} series {} with {} points",
            if is_new { "added" } else { "replaced" },
            id,
            len
        );
        is_new
    }

    /// Remove a series, returning whether it existed
    pub fn remove(&self, asset_id: &str) -> bool {
        self.series.write().remove(asset_id).is_some()
    }

    /// Number of stored series
    pub fn len(&self) -> usize {
        self.series.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.series.read().is_empty()
    }
}

impl TimeSeriesStore for InMemorySeriesStore {
    fn load(&self, asset_ids: &[String]) -> EffectResult<LoadedSeries> {
        let guard = self.series.read();
        asset_ids
            .iter()
            .map(|id| {
                guard
                    .get(id)
                    .map(|s| (id.clone(), Arc::clone(s)))
                    .ok_or_else(|| EffectAnalysisError::UnknownAsset {
                        asset_id: id.clone(),
                    })
            })
            .collect()
    }

    fn available_assets(&self) -> Vec<String> {
        self.series.read().keys().cloned().collect()
    }
}
