//! Raw table layout and the statements that replace it.
//!
//! Columns keep the provider's names (`"Date"`, `"Close"`, `"Symbol"`) so the
//! raw schema mirrors what was fetched; renaming happens in the staging model.

use super::LoadError;
use crate::data::PriceObservation;

const MAX_IDENTIFIER_LEN: usize = 63;

/// Column list shared by the DDL and the COPY statement.
pub const RAW_COLUMNS: [(&str, &str); 3] = [
    ("Date", "TIMESTAMP NOT NULL"),
    ("Close", "DOUBLE PRECISION NOT NULL"),
    ("Symbol", "TEXT NOT NULL"),
];

/// A schema-qualified raw table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    schema: String,
    table: String,
}

impl RawTable {
    /// Both names must be plain identifiers: ASCII letters, digits and `_`,
    /// not starting with a digit, at most 63 bytes.
    pub fn new(schema: &str, table: &str) -> Result<Self, LoadError> {
        validate_identifier(schema)?;
        validate_identifier(table)?;
        Ok(Self {
            schema: schema.to_string(),
            table: table.to_string(),
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// `"schema"."table"`
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote(&self.schema), quote(&self.table))
    }

    /// Script run at the start of every replace: ensure the table exists, then
    /// empty it. The table is never dropped, so views built on it survive.
    pub fn replace_ddl(&self) -> String {
        let columns: Vec<String> = RAW_COLUMNS
            .iter()
            .map(|(name, ty)| format!("{} {ty}", quote(name)))
            .collect();
        format!(
            "CREATE SCHEMA IF NOT EXISTS {schema};\n\
             CREATE TABLE IF NOT EXISTS {table} ({columns});\n\
             TRUNCATE TABLE {table};",
            schema = quote(&self.schema),
            table = self.qualified(),
            columns = columns.join(", "),
        )
    }

    pub fn copy_statement(&self) -> String {
        let columns: Vec<String> = RAW_COLUMNS.iter().map(|(name, _)| quote(name)).collect();
        format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT csv)",
            self.qualified(),
            columns.join(", ")
        )
    }
}

impl std::fmt::Display for RawTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

fn validate_identifier(name: &str) -> Result<(), LoadError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_rest && name.len() <= MAX_IDENTIFIER_LEN {
        Ok(())
    } else {
        Err(LoadError::InvalidIdentifier(name.to_string()))
    }
}

fn quote(ident: &str) -> String {
    format!("\"{ident}\"")
}

/// Encode observations as the CSV payload for `COPY ... FROM STDIN`.
///
/// No header row; dates are written as midnight timestamps.
pub fn encode_csv(observations: &[PriceObservation]) -> Result<Vec<u8>, LoadError> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::with_capacity(observations.len() * 32));

    for obs in observations {
        let date = format!("{} 00:00:00", obs.date.format("%Y-%m-%d"));
        let close = obs.close.to_string();
        wtr.write_record([date.as_str(), close.as_str(), obs.symbol.as_str()])
            .map_err(|e| LoadError::Encode(e.to_string()))?;
    }

    wtr.into_inner()
        .map_err(|e| LoadError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn rejects_unsafe_identifiers() {
        assert!(RawTable::new("raw", "commodity_prices").is_ok());
        assert!(RawTable::new("raw", "prices; DROP TABLE x").is_err());
        assert!(RawTable::new("1raw", "prices").is_err());
        assert!(RawTable::new("", "prices").is_err());
        assert!(RawTable::new("raw", &"p".repeat(64)).is_err());
    }

    #[test]
    fn ddl_empties_table_without_dropping_it() {
        let t = RawTable::new("raw", "commodity_prices").unwrap();
        let ddl = t.replace_ddl();
        assert!(ddl.starts_with("CREATE SCHEMA IF NOT EXISTS \"raw\";"));
        assert!(ddl.contains("CREATE TABLE IF NOT EXISTS \"raw\".\"commodity_prices\" ("));
        assert!(ddl.ends_with("TRUNCATE TABLE \"raw\".\"commodity_prices\";"));
        assert!(!ddl.contains("DROP"));
        assert!(ddl.contains("\"Date\" TIMESTAMP NOT NULL"));
        assert!(ddl.contains("\"Symbol\" TEXT NOT NULL"));
    }

    #[test]
    fn copy_statement_lists_columns() {
        let t = RawTable::new("raw", "commodity_prices").unwrap();
        assert_eq!(
            t.copy_statement(),
            "COPY \"raw\".\"commodity_prices\" (\"Date\", \"Close\", \"Symbol\") FROM STDIN WITH (FORMAT csv)"
        );
    }

    #[test]
    fn csv_payload_has_one_line_per_observation() {
        let rows = vec![
            PriceObservation {
                date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                close: 2064.4,
                symbol: "GC=F".into(),
            },
            PriceObservation {
                date: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
                close: 72.7,
                symbol: "CL=F".into(),
            },
        ];
        let payload = String::from_utf8(encode_csv(&rows).unwrap()).unwrap();
        assert_eq!(
            payload,
            "2024-01-02 00:00:00,2064.4,GC=F\n2024-01-03 00:00:00,72.7,CL=F\n"
        );
    }
}
