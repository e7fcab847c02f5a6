//! CSV-backed [`TimeSeriesStore`].
//!
//! Every `*.csv` file in the data directory is one asset; the file stem is the
//! asset id. Files carry at least a `timestamp` and a `close` column. Closing
//! prices are turned into simple returns on load, so the first row of every
//! file produces no observation.

use crate::errors::{EffectAnalysisError, EffectResult};
use crate::series_store::{AssetSeries, LoadedSeries, TimeSeriesStore, Timestamp};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const TIMESTAMP_COLUMN: &str = "timestamp";
const CLOSE_COLUMN: &str = "close";

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Store reading closing prices from a directory of CSV files.
#[derive(Debug)]
pub struct CsvSeriesStore {
    data_dir: PathBuf,
    datasets: RwLock<BTreeMap<String, PathBuf>>,
}

impl CsvSeriesStore {
    /// Open a data directory and index the CSV files it contains.
    pub fn open(data_dir: impl Into<PathBuf>) -> EffectResult<Self> {
        let store = Self {
            data_dir: data_dir.into(),
            datasets: RwLock::new(BTreeMap::new()),
        };
        store.refresh()?;
        Ok(store)
    }

    /// Directory this store reads from
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Rescan the data directory, returning the number of datasets found.
    pub fn refresh(&self) -> EffectResult<usize> {
        let entries = std::fs::read_dir(&self.data_dir).map_err(|e| {
            EffectAnalysisError::IoError {
                operation: format!("scan {}", self.data_dir.display()),
                source: Some(Arc::new(e)),
            }
        })?;

        let mut datasets = BTreeMap::new();
        for entry in entries {
            let path = entry?.path();
            let is_csv = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("csv"))
                .unwrap_or(false);
            if !is_csv {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                datasets.insert(stem.to_string(), path.clone());
            }
        }

        let count = datasets.len();
        log::info!(
            "indexed {} datasets in {}",
            count,
            self.data_dir.display()
        );
        *self.datasets.write() = datasets;
        Ok(count)
    }

    /// Column names of a dataset's header row
    pub fn columns(&self, asset_id: &str) -> EffectResult<Vec<String>> {
        let path = self.path_for(asset_id)?;
        let mut reader = open_reader(&path)?;
        let headers = reader
            .headers()
            .map_err(|e| csv_error(&path, e))?
            .iter()
            .map(|h| h.to_string())
            .collect();
        Ok(headers)
    }

    /// Read one dataset and convert its closing prices to returns.
    pub fn read_series(&self, asset_id: &str) -> EffectResult<AssetSeries> {
        let path = self.path_for(asset_id)?;
        let prices = read_close_prices(&path)?;
        let (timestamps, returns) = prices_to_returns(asset_id, &prices);
        log::debug!(
            "loaded {} returns for {} from {}",
            returns.len(),
            asset_id,
            path.display()
        );
        AssetSeries::from_parts(asset_id, timestamps, returns)
    }

    fn path_for(&self, asset_id: &str) -> EffectResult<PathBuf> {
        self.datasets
            .read()
            .get(asset_id)
            .cloned()
            .ok_or_else(|| EffectAnalysisError::UnknownAsset {
                asset_id: asset_id.to_string(),
            })
    }
}

impl TimeSeriesStore for CsvSeriesStore {
    fn load(&self, asset_ids: &[String]) -> EffectResult<LoadedSeries> {
        asset_ids
            .iter()
            .map(|id| Ok((id.clone(), Arc::new(self.read_series(id)?))))
            .collect()
    }

    fn available_assets(&self) -> Vec<String> {
        self.datasets.read().keys().cloned().collect()
    }
}

fn open_reader(path: &Path) -> EffectResult<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| csv_error(path, e))
}

fn csv_error(path: &Path, err: csv::Error) -> EffectAnalysisError {
    let line = err.position().map(|p| p.line()).unwrap_or(0);
    match err.into_kind() {
        csv::ErrorKind::Io(io) => EffectAnalysisError::IoError {
            operation: format!("read {}", path.display()),
            source: Some(Arc::new(io)),
        },
        other => EffectAnalysisError::DataFormat {
            source_name: path.display().to_string(),
            line,
            reason: format!("{:?}", other),
        },
    }
}

/// Read `(timestamp, close)` pairs sorted by timestamp with duplicates and
/// missing closes removed.
fn read_close_prices(path: &Path) -> EffectResult<Vec<(Timestamp, f64)>> {
    let mut reader = open_reader(path)?;
    let source_name = path.display().to_string();

    let headers = reader.headers().map_err(|e| csv_error(path, e))?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| EffectAnalysisError::DataFormat {
                source_name: source_name.clone(),
                line: 1,
                reason: format!("missing required column: {}", name),
            })
    };
    let ts_idx = column(TIMESTAMP_COLUMN)?;
    let close_idx = column(CLOSE_COLUMN)?;

    let mut prices = Vec::new();
    let mut dropped = 0usize;

    for record in reader.records() {
        let record = record.map_err(|e| csv_error(path, e))?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let format_err = |reason: String| EffectAnalysisError::DataFormat {
            source_name: source_name.clone(),
            line,
            reason,
        };

        let raw_ts = record.get(ts_idx).unwrap_or("");
        let raw_close = record.get(close_idx).unwrap_or("");

        if is_missing(raw_ts) || is_missing(raw_close) {
            dropped += 1;
            continue;
        }

        let ts = parse_timestamp(raw_ts)
            .ok_or_else(|| format_err(format!("unparseable timestamp {:?}", raw_ts)))?;
        let close: f64 = raw_close
            .parse()
            .map_err(|_| format_err(format!("unparseable close {:?}", raw_close)))?;
        if !close.is_finite() {
            dropped += 1;
            continue;
        }

        prices.push((ts, close));
    }

    prices.sort_by_key(|(ts, _)| *ts);
    let before = prices.len();
    prices.dedup_by_key(|(ts, _)| *ts);
    dropped += before - prices.len();

    if dropped > 0 {
        log::warn!(
            "{}: dropped {} rows with missing values or duplicate timestamps",
            source_name,
            dropped
        );
    }

    Ok(prices)
}

fn is_missing(raw: &str) -> bool {
    raw.is_empty() || raw.eq_ignore_ascii_case("nan") || raw.eq_ignore_ascii_case("null")
}

/// Simple returns `close[t] / close[t-1] - 1`; non-finite returns are skipped.
fn prices_to_returns(asset_id: &str, prices: &[(Timestamp, f64)]) -> (Vec<Timestamp>, Vec<f64>) {
    let mut timestamps = Vec::with_capacity(prices.len().saturating_sub(1));
    let mut returns = Vec::with_capacity(prices.len().saturating_sub(1));

    for pair in prices.windows(2) {
        let (_, prev) = pair[0];
        let (ts, close) = pair[1];
        let r = close / prev - 1.0;
        if r.is_finite() {
            timestamps.push(ts);
            returns.push(r);
        } else {
            log::warn!("{}: skipping non-finite return at {}", asset_id, ts);
        }
    }

    (timestamps, returns)
}

/// Parse a date, a date-time, or integer epoch milliseconds.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    if let Ok(millis) = raw.parse::<i64>() {
        return DateTime::from_timestamp_millis(millis).map(|dt| dt.naive_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}
