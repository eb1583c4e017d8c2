//! Loading: replace the raw table with a fresh extraction.

pub mod postgres;
pub mod table;

pub use self::postgres::PostgresSink;
pub use table::{encode_csv, RawTable};

use crate::data::PriceObservation;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid SQL identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("refusing to replace {table} with zero rows")]
    Empty { table: String },

    #[error("encode COPY payload: {0}")]
    Encode(String),

    #[error("database connection failed: {0}")]
    Connect(String),

    #[error("database error: {0}")]
    Database(#[from] ::postgres::Error),

    #[error("COPY stream error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a replace wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub table: String,
    pub rows: u64,
}

/// Destination for raw observations.
///
/// `replace` is all-or-nothing: either the table holds exactly `observations`
/// afterwards, or it still holds what it held before.
pub trait RawSink {
    fn replace(
        &mut self,
        table: &RawTable,
        observations: &[PriceObservation],
    ) -> Result<LoadSummary, LoadError>;
}

/// In-memory sink, used by `--dry-run` and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: HashMap<String, Vec<PriceObservation>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self, table: &RawTable) -> Option<&[PriceObservation]> {
        self.tables.get(&table.to_string()).map(|v| v.as_slice())
    }
}

impl RawSink for MemorySink {
    fn replace(
        &mut self,
        table: &RawTable,
        observations: &[PriceObservation],
    ) -> Result<LoadSummary, LoadError> {
        if observations.is_empty() {
            return Err(LoadError::Empty {
                table: table.to_string(),
            });
        }
        // Encode anyway so a dry run catches payload problems too.
        encode_csv(observations)?;
        self.tables
            .insert(table.to_string(), observations.to_vec());
        Ok(LoadSummary {
            table: table.to_string(),
            rows: observations.len() as u64,
        })
    }
}
