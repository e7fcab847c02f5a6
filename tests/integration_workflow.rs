//! Integration tests for the complete analysis workflow
//!
//! These tests drive the EffectAnalyzer end to end: store, alignment, rolling
//! correlation, thresholds and effect detection.

use assert_approx_eq::assert_approx_eq;
use chrono::{Duration, NaiveDate};
use market_effects::{
    AnalysisCache, AnalysisRequest, AnalysisResult, AnalysisType, AssetSeries, CorrelationScope,
    CsvSeriesStore, EffectAnalyzer, EffectType, EngineConfig, InMemorySeriesStore, TimeSeriesStore,
    Timestamp,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Write;
use std::sync::Arc;

fn day(offset: i64) -> Timestamp {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + Duration::days(offset)
}

fn series(id: &str, returns: &[f64]) -> AssetSeries {
    let points = returns
        .iter()
        .enumerate()
        .map(|(i, &r)| (day(i as i64), r))
        .collect();
    AssetSeries::new(id, points).unwrap()
}

fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn alternating_with_spike(n: usize, spike_at: usize) -> Vec<f64> {
    (0..n)
        .map(|i| {
            if i == spike_at {
                0.1
            } else if i % 2 == 0 {
                0.01
            } else {
                -0.01
            }
        })
        .collect()
}

/// Test scenario: Two perfectly anti-correlated assets
///
/// Five aligned rows with one asset rising while the other falls by the same
/// amount must give a correlation of -1.
#[test]
fn test_anti_correlated_pair() {
    let store = InMemorySeriesStore::new();
    store.insert(series("UP", &[0.01, 0.02, 0.03, 0.04, 0.05]));
    store.insert(series("DOWN", &[0.05, 0.04, 0.03, 0.02, 0.01]));

    let analyzer = EffectAnalyzer::new(store, EngineConfig::light()).unwrap();
    let request = AnalysisRequest::new(ids(&["UP", "DOWN"]), day(0), day(4), 5);
    let result = analyzer.analyze(&request).unwrap();

    let matrix = &result.correlation_matrix;
    assert_approx_eq!(matrix.get(0, 1), -1.0, 1e-9);
    assert_approx_eq!(matrix.get(1, 0), -1.0, 1e-9);
    assert_approx_eq!(matrix.get(0, 0), 1.0, 1e-12);
    assert!(result.lead_lag.is_empty());
}

/// Test scenario: Single 10x spike in otherwise quiet returns
///
/// With lambda 2 the spike exceeds its threshold (the trailing window includes
/// it) while every other row stays below. Exactly one meteor shower segment
/// must cover the spike.
#[test]
fn test_single_spike_produces_one_segment() {
    let returns = alternating_with_spike(60, 40);
    let store = InMemorySeriesStore::new();
    store.insert(series("SPIKE", &returns));

    let analyzer = EffectAnalyzer::new(store, EngineConfig::light()).unwrap();
    let request = AnalysisRequest::new(ids(&["SPIKE"]), day(0), day(59), 10)
        .with_analysis_type(AnalysisType::MeteorShower)
        .with_lambda(2.0);
    let result = analyzer.analyze(&request).unwrap();

    let segments = result.effects_for("SPIKE");
    assert_eq!(segments.len(), 1, "segments: {:?}", segments);
    assert_eq!(segments[0].effect_type, EffectType::MeteorShower);
    assert!(segments[0].contains(40));
    assert_eq!(segments[0].start_index, 40);
    assert_eq!(segments[0].end_index, Some(41));

    let summary = &result.summaries["SPIKE"][0];
    assert_eq!(summary.start, day(40));
    assert_eq!(summary.duration, 1);
    assert_approx_eq!(summary.peak_abs_return, 0.1, 1e-12);

    let stats = &result.statistics["SPIKE"][0];
    assert_eq!(stats.effect_type, EffectType::MeteorShower);
    assert_eq!(stats.total_triggers, 1);
    assert_eq!(stats.evaluated_rows, 51);
}

/// Test scenario: Both rules on a spike followed by a crash
///
/// A positive spike triggers both rules; a negative crash only the two-sided
/// rule. The union must be ordered by start index, then type.
#[test]
fn test_both_rules_union() {
    let mut returns = alternating_with_spike(80, 40);
    returns[65] = -0.1;
    let store = InMemorySeriesStore::new();
    store.insert(series("X", &returns));

    let analyzer = EffectAnalyzer::new(store, EngineConfig::light()).unwrap();
    let request = AnalysisRequest::new(ids(&["X"]), day(0), day(79), 10);
    let result = analyzer.analyze(&request).unwrap();

    let summary: Vec<_> = result
        .effects_for("X")
        .iter()
        .map(|s| (s.start_index, s.effect_type))
        .collect();
    assert_eq!(
        summary,
        vec![
            (40, EffectType::HeatWave),
            (40, EffectType::MeteorShower),
            (65, EffectType::MeteorShower),
        ]
    );
    assert_eq!(result.segments_of_type(EffectType::HeatWave).count(), 1);
}

/// Test scenario: Full workflow on random data
///
/// Checks matrix and segment invariants on seeded random returns and that
/// repeated analysis is deterministic.
#[test]
fn test_random_panel_invariants() {
    let mut rng = StdRng::seed_from_u64(2024);
    let names = ["AAA", "BBB", "CCC"];
    let store = InMemorySeriesStore::new();
    let mut columns = Vec::new();
    for name in names {
        let returns: Vec<f64> = (0..150).map(|_| rng.gen_range(-0.03..0.03)).collect();
        store.insert(series(name, &returns));
        columns.push(returns);
    }

    let analyzer = EffectAnalyzer::new(store, EngineConfig::standard()).unwrap();
    let request = AnalysisRequest::new(ids(&names), day(0), day(149), 20).with_lambda(1.5);
    let result = analyzer.analyze(&request).unwrap();
    let again = analyzer.analyze(&request).unwrap();
    assert_eq!(result, again, "analysis must be deterministic");

    let matrix = &result.correlation_matrix;
    assert!(matrix.is_symmetric(1e-12));
    assert!(matrix.has_unit_diagonal(1e-9));
    assert!(matrix.is_bounded());

    for (name, returns) in names.iter().zip(&columns) {
        let threshold = market_effects::estimate_from_returns(returns, 20, 1.5).unwrap();
        for effect_type in [EffectType::HeatWave, EffectType::MeteorShower] {
            let segments: Vec<_> = result
                .effects_for(name)
                .iter()
                .filter(|s| s.effect_type == effect_type)
                .collect();

            for pair in segments.windows(2) {
                assert!(pair[0].end_or(returns.len()) <= pair[1].start_index);
            }
            for segment in &segments {
                let end = segment.end_or(returns.len());
                for i in segment.start_index..end {
                    let t = threshold.get(i).unwrap();
                    assert!(effect_type.triggers(returns[i], t));
                }
                if let Some(end) = segment.end_index {
                    let t = threshold.get(end).unwrap();
                    assert!(!effect_type.triggers(returns[end], t));
                }
            }
        }
    }

    assert_eq!(result.lead_lag.len(), 3);
}

/// Test scenario: Window equal to the aligned row count
#[test]
fn test_window_equal_to_rows_and_full_range_scope() {
    let mut rng = StdRng::seed_from_u64(5);
    let store = InMemorySeriesStore::new();
    for name in ["P", "Q"] {
        let returns: Vec<f64> = (0..30).map(|_| rng.gen_range(-0.02..0.02)).collect();
        store.insert(series(name, &returns));
    }
    let analyzer = EffectAnalyzer::new(store, EngineConfig::light()).unwrap();

    let rolling = analyzer
        .analyze(&AnalysisRequest::new(ids(&["P", "Q"]), day(0), day(29), 30))
        .unwrap();
    let full = analyzer
        .analyze(
            &AnalysisRequest::new(ids(&["P", "Q"]), day(0), day(29), 10)
                .with_correlation_scope(CorrelationScope::FullRange),
        )
        .unwrap();

    assert_approx_eq!(
        rolling.correlation_matrix.get(0, 1),
        full.correlation_matrix.get(0, 1),
        1e-12
    );
}

/// Test scenario: Cached analysis under concurrent callers
#[test]
fn test_cached_analysis_across_threads() {
    let store = InMemorySeriesStore::new();
    store.insert(series("A", &alternating_with_spike(40, 30)));
    store.insert(series("B", &alternating_with_spike(40, 12)));
    let analyzer = Arc::new(EffectAnalyzer::new(store, EngineConfig::standard()).unwrap());
    let cache: Arc<AnalysisCache<Arc<AnalysisResult>>> = Arc::new(AnalysisCache::new());
    let request = AnalysisRequest::new(ids(&["A", "B"]), day(0), day(39), 8);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let analyzer = Arc::clone(&analyzer);
            let cache = Arc::clone(&cache);
            let request = request.clone();
            std::thread::spawn(move || analyzer.analyze_cached(&request, &cache).unwrap())
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for result in &results[1..] {
        assert!(Arc::ptr_eq(&results[0], result));
    }
    assert_eq!(cache.stats().misses, 1);
    assert_eq!(cache.len(), 1);
}

/// Test scenario: CSV directory through the full pipeline
#[test]
fn test_csv_store_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(9);
    for name in ["BTCUSDT", "ETHUSDT"] {
        let mut file = std::fs::File::create(dir.path().join(format!("{}.csv", name))).unwrap();
        writeln!(file, "timestamp,open,close,volume").unwrap();
        let mut price = 100.0;
        for i in 0..50 {
            price *= 1.0 + rng.gen_range(-0.02..0.02);
            writeln!(file, "{},0,{:.6},1", day(i).format("%Y-%m-%d"), price).unwrap();
        }
    }

    let store = CsvSeriesStore::open(dir.path()).unwrap();
    assert_eq!(store.available_assets(), ids(&["BTCUSDT", "ETHUSDT"]));

    let analyzer = EffectAnalyzer::new(store, EngineConfig::standard()).unwrap();
    let request = AnalysisRequest::new(ids(&["BTCUSDT", "ETHUSDT"]), day(0), day(49), 10);
    let result = analyzer.analyze(&request).unwrap();

    // First price row has no return.
    assert_eq!(result.n_rows(), 49);
    assert_eq!(result.timestamps[0], day(1));
    assert!(result.correlation_matrix.is_bounded());
}

/// Test scenario: Outbound payload shape
#[cfg(feature = "serde")]
#[test]
fn test_response_json_shape() {
    let mut returns = alternating_with_spike(30, 29);
    returns[29] = 0.2;
    let store = InMemorySeriesStore::new();
    store.insert(series("OPEN", &returns));
    let analyzer = EffectAnalyzer::new(store, EngineConfig::light()).unwrap();
    let request = AnalysisRequest::new(ids(&["OPEN"]), day(0), day(29), 10)
        .with_analysis_type(AnalysisType::HeatWave);

    let response = analyzer.analyze(&request).unwrap().to_response();
    let json = serde_json::to_value(&response).unwrap();

    assert_eq!(json["assets"], serde_json::json!(["OPEN"]));
    assert_eq!(json["correlationMatrix"], serde_json::json!([[1.0]]));
    assert_eq!(
        json["effects"]["OPEN"],
        serde_json::json!([{"type": "heat_wave", "startIndex": 29, "endIndex": null}])
    );
}

/// Test scenario: Inbound request parsing
#[cfg(feature = "serde")]
#[test]
fn test_request_from_json() {
    let request: AnalysisRequest = serde_json::from_value(serde_json::json!({
        "assetIds": ["BTC", "ETH"],
        "startDate": "2024-01-01T00:00:00",
        "endDate": "2024-03-01T00:00:00",
        "windowSize": 30,
        "analysisType": "meteor_shower",
        "lambda": 2.5
    }))
    .unwrap();

    assert_eq!(request.asset_ids, ids(&["BTC", "ETH"]));
    assert_eq!(request.analysis_type, AnalysisType::MeteorShower);
    assert_eq!(request.correlation_scope, CorrelationScope::Rolling);
    assert_eq!(request.window_size, 30);
    assert_approx_eq!(request.lambda, 2.5, 1e-12);
}
