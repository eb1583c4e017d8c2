//! Extraction pipeline tests: frozen Yahoo fixture, fake providers, and the
//! extract → normalize → replace path against the in-memory sink.

use chrono::NaiveDate;
use elt_core::data::yahoo::parse_chart;
use elt_core::data::{
    extract_symbols, normalize, CircuitBreaker, DataError, DataSource, ExtractProgress,
    FetchResult, PriceObservation, PriceProvider,
};
use elt_core::warehouse::{MemorySink, RawSink, RawTable};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn fixture(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name);
    std::fs::read_to_string(path).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn obs(symbol: &str, day: u32, close: f64) -> PriceObservation {
    PriceObservation {
        date: date(2024, 1, day),
        close,
        symbol: symbol.to_string(),
    }
}

/// Canned provider. A symbol answered with `CircuitBreakerTripped` trips the
/// shared breaker, the way a 403 does for Yahoo.
struct FixtureProvider {
    responses: HashMap<String, Result<Vec<PriceObservation>, DataError>>,
    breaker: Arc<CircuitBreaker>,
    requested: std::sync::Mutex<Vec<String>>,
}

impl FixtureProvider {
    fn new() -> Self {
        Self {
            responses: HashMap::new(),
            breaker: Arc::new(CircuitBreaker::new(Duration::from_secs(600), 3)),
            requested: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn with(mut self, symbol: &str, response: Result<Vec<PriceObservation>, DataError>) -> Self {
        self.responses.insert(symbol.to_string(), response);
        self
    }

    fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

impl PriceProvider for FixtureProvider {
    fn name(&self) -> &str {
        "fixture"
    }

    fn fetch(
        &self,
        symbol: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<FetchResult, DataError> {
        self.requested.lock().unwrap().push(symbol.to_string());
        match self.responses.get(symbol) {
            Some(Ok(observations)) => Ok(FetchResult {
                symbol: symbol.to_string(),
                observations: observations.clone(),
                source: DataSource::Fixture,
            }),
            Some(Err(DataError::CircuitBreakerTripped)) => {
                self.breaker.trip();
                Err(DataError::CircuitBreakerTripped)
            }
            Some(Err(e)) => Err(e.clone()),
            None => Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            }),
        }
    }

    fn is_available(&self) -> bool {
        self.breaker.is_allowed()
    }
}

#[derive(Default)]
struct RecordingProgress {
    events: RefCell<Vec<String>>,
}

impl ExtractProgress for RecordingProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize) {
        self.events
            .borrow_mut()
            .push(format!("start {symbol} {}/{total}", index + 1));
    }

    fn on_complete(
        &self,
        symbol: &str,
        _index: usize,
        _total: usize,
        result: &Result<usize, DataError>,
    ) {
        let outcome = match result {
            Ok(rows) => format!("{rows} rows"),
            Err(_) => "failed".to_string(),
        };
        self.events.borrow_mut().push(format!("done {symbol} {outcome}"));
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        self.events
            .borrow_mut()
            .push(format!("batch {succeeded}/{total} ok, {failed} failed"));
    }
}

#[test]
fn frozen_gold_fixture_parses_to_session_dates() {
    let observations = parse_chart("GC=F", &fixture("gc_f_2024_01.json")).unwrap();

    // Jan 5 has no close and is skipped.
    let dates: Vec<NaiveDate> = observations.iter().map(|o| o.date).collect();
    assert_eq!(
        dates,
        vec![date(2024, 1, 2), date(2024, 1, 3), date(2024, 1, 4), date(2024, 1, 8)]
    );
    assert_eq!(observations[0].close, 2064.4);
    assert_eq!(observations[3].close, 2026.6);
    assert!(observations.iter().all(|o| o.symbol == "GC=F"));
}

#[test]
fn extraction_collects_failures_without_stopping() {
    let provider = FixtureProvider::new()
        .with("GC=F", Ok(vec![obs("GC=F", 2, 2064.4), obs("GC=F", 3, 2034.2)]))
        .with("SI=F", Err(DataError::NetworkUnreachable("timed out".into())))
        .with("HG=F", Ok(vec![obs("HG=F", 2, 3.89)]));
    let progress = RecordingProgress::default();

    let summary = extract_symbols(
        &provider,
        &["GC=F", "SI=F", "HG=F"],
        date(2024, 1, 1),
        date(2024, 1, 31),
        &progress,
    );

    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert!(!summary.all_succeeded());
    assert_eq!(summary.errors[0].0, "SI=F");
    assert_eq!(summary.observations.len(), 3);
    assert_eq!(provider.requested(), vec!["GC=F", "SI=F", "HG=F"]);

    let events = progress.events.borrow();
    assert_eq!(events[0], "start GC=F 1/3");
    assert_eq!(events[1], "done GC=F 2 rows");
    assert_eq!(events[3], "done SI=F failed");
    assert_eq!(events.last().unwrap(), "batch 2/3 ok, 1 failed");
}

#[test]
fn tripped_breaker_stops_remaining_requests() {
    let provider = FixtureProvider::new()
        .with("CL=F", Ok(vec![obs("CL=F", 2, 70.38)]))
        .with("NG=F", Err(DataError::CircuitBreakerTripped))
        .with("HO=F", Ok(vec![obs("HO=F", 2, 2.53)]));

    let summary = extract_symbols(
        &provider,
        &["CL=F", "NG=F", "HO=F", "RB=F"],
        date(2024, 1, 1),
        date(2024, 1, 31),
        &RecordingProgress::default(),
    );

    assert_eq!(provider.requested(), vec!["CL=F", "NG=F"]);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 3);
    let skipped: Vec<&str> = summary.errors[1..].iter().map(|(s, _)| s.as_str()).collect();
    assert_eq!(skipped, vec!["HO=F", "RB=F"]);
    assert!(summary.errors[1..]
        .iter()
        .all(|(_, e)| matches!(e, DataError::CircuitBreakerTripped)));
}

#[test]
fn extracted_rows_replace_the_raw_table() {
    let provider = FixtureProvider::new()
        .with("SI=F", Ok(vec![obs("SI=F", 3, 23.1), obs("SI=F", 2, 23.7)]))
        .with(
            "GC=F",
            Ok(vec![obs("GC=F", 2, 2064.4), obs("GC=F", 2, 2064.4), obs("GC=F", 3, f64::NAN)]),
        );
    let summary = extract_symbols(
        &provider,
        &["SI=F", "GC=F"],
        date(2024, 1, 1),
        date(2024, 1, 31),
        &RecordingProgress::default(),
    );
    assert!(summary.all_succeeded());

    let (rows, report) = normalize(summary.observations).unwrap();
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.invalid_closes, 1);

    let table = RawTable::new("raw", "commodity_prices").unwrap();
    let mut sink = MemorySink::new();
    sink.replace(&table, &[obs("OLD", 1, 1.0)]).unwrap();
    let loaded = sink.replace(&table, &rows).unwrap();

    assert_eq!(loaded.rows, 3);
    let stored = sink.rows(&table).unwrap();
    let keys: Vec<(&str, NaiveDate)> = stored.iter().map(|o| (o.symbol.as_str(), o.date)).collect();
    assert_eq!(
        keys,
        vec![
            ("GC=F", date(2024, 1, 2)),
            ("SI=F", date(2024, 1, 2)),
            ("SI=F", date(2024, 1, 3)),
        ]
    );
}
