//! Yahoo Finance price provider.
//!
//! Fetches daily closes from Yahoo's v8 chart API. Commodity futures use the
//! continuous front-month tickers (`CL=F`, `GC=F`, ...). Handles rate limiting,
//! retries with exponential backoff, response parsing, and the circuit breaker.
//!
//! Yahoo Finance has no official API and is subject to unannounced format changes.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{DataError, DataSource, FetchResult, PriceObservation, PriceProvider};
use chrono::{Duration as DateSpan, NaiveDate, NaiveTime};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const CHART_ENDPOINT: &str = "https://query2.finance.yahoo.com/v8/finance/chart";

/// Upper bound on a server-requested `retry-after` wait.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    gmtoffset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

/// Yahoo Finance chart API provider.
pub struct YahooProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    base_url: String,
    max_retries: u32,
    base_delay: Duration,
}

impl YahooProvider {
    /// Create a provider sharing `circuit_breaker` with the caller.
    pub fn new(circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            circuit_breaker,
            base_url: CHART_ENDPOINT.to_string(),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        })
    }

    /// Override the retry policy (tests and impatient CI jobs).
    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }

    /// Point at another chart endpoint (a mirror or a local test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Chart API URL for a symbol. `period2` is exclusive, so it points at the
    /// midnight after `end`.
    pub fn chart_url(symbol: &str, start: NaiveDate, end: NaiveDate) -> String {
        chart_url_at(CHART_ENDPOINT, symbol, start, end)
    }

    /// Execute a request with retry and circuit breaker logic.
    fn fetch_with_retry(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceObservation>, DataError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }

        let url = chart_url_at(&self.base_url, symbol, start, end);
        let mut last_error = None;
        // Set by a 429; the next attempt waits at least this long.
        let mut retry_after = Duration::ZERO;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.base_delay * 2u32.pow(attempt - 1);
                let delay = backoff.max(retry_after);
                retry_after = Duration::ZERO;
                tracing::debug!(symbol, attempt, ?delay, "backing off before retry");
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(DataError::CircuitBreakerTripped);
            }

            match self.client.get(&url).send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::FORBIDDEN {
                        self.circuit_breaker.trip();
                        return Err(DataError::CircuitBreakerTripped);
                    }

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        self.circuit_breaker.record_failure();
                        let retry_after_secs = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.trim().parse::<u64>().ok())
                            .unwrap_or(60);
                        retry_after = Duration::from_secs(retry_after_secs).min(MAX_RETRY_AFTER);
                        tracing::warn!(symbol, retry_after_secs, "rate limited");
                        last_error = Some(DataError::RateLimited { retry_after_secs });
                        continue;
                    }

                    if status == reqwest::StatusCode::UNAUTHORIZED {
                        return Err(DataError::AuthenticationRequired(
                            "Yahoo Finance requires authentication".into(),
                        ));
                    }

                    // Yahoo answers unknown tickers with a 404 carrying a chart error body.
                    if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
                        self.circuit_breaker.record_failure();
                        last_error = Some(DataError::Other(format!("HTTP {status} for {symbol}")));
                        continue;
                    }

                    let body = resp.text().map_err(|e| {
                        DataError::NetworkUnreachable(format!("reading body for {symbol}: {e}"))
                    })?;
                    let observations = parse_chart(symbol, &body)?;
                    self.circuit_breaker.record_success();
                    return Ok(observations);
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                        continue;
                    }
                    return Err(DataError::NetworkUnreachable(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DataError::Other("max retries exceeded".into())))
    }
}

impl PriceProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchResult, DataError> {
        let observations = self.fetch_with_retry(symbol, start, end)?;
        Ok(FetchResult {
            symbol: symbol.to_string(),
            observations,
            source: DataSource::YahooFinance,
        })
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

fn chart_url_at(base: &str, symbol: &str, start: NaiveDate, end: NaiveDate) -> String {
    let start_ts = start.and_time(NaiveTime::MIN).and_utc().timestamp();
    let end_ts = (end + DateSpan::days(1))
        .and_time(NaiveTime::MIN)
        .and_utc()
        .timestamp();
    format!("{base}/{symbol}?period1={start_ts}&period2={end_ts}&interval=1d&events=history")
}

/// Parse a chart API body into daily closes.
///
/// Timestamps are shifted by the exchange's GMT offset before taking the date,
/// so a 00:00 exchange-local session start never lands on the previous day.
/// Entries without a close (holidays, the in-progress session) are skipped.
pub fn parse_chart(symbol: &str, body: &str) -> Result<Vec<PriceObservation>, DataError> {
    let resp: ChartResponse = serde_json::from_str(body).map_err(|e| {
        DataError::ResponseFormatChanged(format!("failed to parse response for {symbol}: {e}"))
    })?;

    let result = match (resp.chart.result, resp.chart.error) {
        (_, Some(err)) if err.code == "Not Found" => {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            })
        }
        (_, Some(err)) => {
            return Err(DataError::ResponseFormatChanged(format!(
                "{}: {}",
                err.code, err.description
            )))
        }
        (Some(result), None) => result,
        (None, None) => {
            return Err(DataError::ResponseFormatChanged(
                "empty result with no error".into(),
            ))
        }
    };

    let data = result
        .into_iter()
        .next()
        .ok_or_else(|| DataError::ResponseFormatChanged("result array is empty".into()))?;

    let offset = data.meta.and_then(|m| m.gmtoffset).unwrap_or(0);
    // A symbol with no trading history comes back without timestamps.
    let timestamps = data.timestamp.unwrap_or_default();

    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| DataError::ResponseFormatChanged("no quote data".into()))?;

    let mut observations = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let Some(close) = quote.close.get(i).copied().flatten() else {
            continue;
        };

        let date = chrono::DateTime::from_timestamp(ts + offset, 0)
            .map(|dt| dt.date_naive())
            .ok_or_else(|| DataError::ResponseFormatChanged(format!("invalid timestamp: {ts}")))?;

        observations.push(PriceObservation {
            date,
            close,
            symbol: symbol.to_string(),
        });
    }

    if observations.is_empty() {
        return Err(DataError::SymbolNotFound {
            symbol: symbol.to_string(),
        });
    }

    Ok(observations)
}
