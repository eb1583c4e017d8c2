//! Price provider trait and structured error types.
//!
//! The PriceProvider trait abstracts over market-data sources so the extraction
//! step can be driven against Yahoo Finance in production and a canned provider
//! in tests.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One daily closing price for one commodity symbol.
///
/// This is the only entity the pipeline moves: it is written verbatim into the
/// raw table and later reshaped by the staging model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub date: NaiveDate,
    pub close: f64,
    pub symbol: String,
}

/// Structured error types for extraction.
#[derive(Debug, Clone, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("data error: {0}")]
    Other(String),
}

/// Result of a successful fetch for a single symbol.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub symbol: String,
    pub observations: Vec<PriceObservation>,
    pub source: DataSource,
}

/// Where the observations came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    YahooFinance,
    Fixture,
}

/// A market-data source that can return daily closes for a symbol.
///
/// Implementations own retries and rate limiting. They know nothing about the
/// warehouse: loading is a separate step.
pub trait PriceProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch daily closes for a symbol over an inclusive date range.
    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchResult, DataError>;

    /// Whether the provider will currently accept requests.
    fn is_available(&self) -> bool;
}

/// Progress callbacks for multi-symbol extraction.
pub trait ExtractProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize);

    fn on_complete(
        &self,
        symbol: &str,
        index: usize,
        total: usize,
        result: &Result<usize, DataError>,
    );

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Progress reporter that emits tracing events.
pub struct LogProgress;

impl ExtractProgress for LogProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize) {
        tracing::info!(symbol, "[{}/{}] fetching", index + 1, total);
    }

    fn on_complete(
        &self,
        symbol: &str,
        _index: usize,
        _total: usize,
        result: &Result<usize, DataError>,
    ) {
        match result {
            Ok(rows) => tracing::info!(symbol, rows, "fetched"),
            Err(e) => tracing::warn!(symbol, error = %e, "fetch failed"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        tracing::info!(succeeded, failed, total, "extraction complete");
    }
}
