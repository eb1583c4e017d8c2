//! Extraction: market-data providers and the multi-symbol fetch loop.

pub mod catalog;
pub mod circuit_breaker;
pub mod extract;
pub mod provider;
pub mod yahoo;

pub use catalog::{Catalog, CatalogError};
pub use circuit_breaker::CircuitBreaker;
pub use extract::{extract_symbols, normalize, ExtractSummary, NormalizeReport};
pub use provider::{
    DataError, DataSource, ExtractProgress, FetchResult, LogProgress, PriceObservation,
    PriceProvider,
};
pub use yahoo::YahooProvider;
