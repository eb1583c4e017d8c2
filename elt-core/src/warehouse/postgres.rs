//! PostgreSQL sink over the synchronous `postgres` client.

use super::table::{encode_csv, RawTable};
use super::{LoadError, LoadSummary, RawSink};
use crate::config::DatabaseConfig;
use crate::data::PriceObservation;
use postgres::{Client, NoTls};
use std::io::Write;
use std::time::Duration;

pub struct PostgresSink {
    client: Client,
}

impl PostgresSink {
    /// Connect with the pipeline's database settings.
    pub fn connect(db: &DatabaseConfig) -> Result<Self, LoadError> {
        let mut pg = postgres::Config::new();
        pg.host(&db.host)
            .port(db.port)
            .dbname(&db.name)
            .user(&db.user)
            .application_name("elt")
            .connect_timeout(Duration::from_secs(db.connect_timeout_secs));
        if let Some(password) = &db.password {
            pg.password(password);
        }

        tracing::debug!(host = %db.host, port = db.port, database = %db.name, "connecting");
        let client = pg
            .connect(NoTls)
            .map_err(|e| LoadError::Connect(format!("{}@{}:{}: {e}", db.user, db.host, db.port)))?;
        Ok(Self { client })
    }

    /// Wrap an already connected client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Connect from a `postgres://` URL or key/value connection string.
    pub fn connect_url(url: &str) -> Result<Self, LoadError> {
        let client = Client::connect(url, NoTls).map_err(|e| LoadError::Connect(e.to_string()))?;
        Ok(Self { client })
    }
}

impl RawSink for PostgresSink {
    /// Create-if-missing, truncate and COPY inside one transaction. Any error
    /// rolls back, leaving the previous rows in place. Dependent views (the
    /// dbt staging model) are untouched.
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

        let payload = encode_csv(observations)?;

        let mut tx = self.client.transaction()?;
        tx.batch_execute(&table.replace_ddl())?;

        let mut writer = tx.copy_in(table.copy_statement().as_str())?;
        writer.write_all(&payload)?;
        let rows = writer.finish()?;

        tx.commit()?;
        tracing::info!(
            schema = table.schema(),
            table = table.table(),
            rows,
            "raw table replaced"
        );

        Ok(LoadSummary {
            table: table.to_string(),
            rows,
        })
    }
}
