use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::pin_mut;
use tokio_postgres::binary_copy::BinaryCopyInWriter;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Config, NoTls};
use tracing::{debug, error, info};

use crate::config::EtlConfig;
use crate::models::{TRIP_COLUMNS, TripRecord};
use crate::storage::TripStore;

pub const TRIP_TABLE: &str = "TripData";

const MAINTENANCE_DATABASE: &str = "postgres";
const APPLICATION_NAME: &str = "trip-etl";

/// SQL types of the `TripData` columns, positionally aligned with [`TRIP_COLUMNS`].
const COLUMN_SQL_TYPES: [&str; 9] = [
    "TIMESTAMP",
    "TIMESTAMP",
    "INT",
    "DECIMAL(10, 2)",
    "VARCHAR(3)",
    "INT",
    "INT",
    "DECIMAL(10, 2)",
    "DECIMAL(10, 2)",
];

/// Wire types for the binary COPY, same order again.
const COPY_TYPES: [Type; 9] = [
    Type::TIMESTAMP,
    Type::TIMESTAMP,
    Type::INT4,
    Type::NUMERIC,
    Type::VARCHAR,
    Type::INT4,
    Type::INT4,
    Type::NUMERIC,
    Type::NUMERIC,
];

pub struct PostgresStorage {
    server_config: Config,
    database_config: Config,
    database_name: String,
    batch_size: usize,
}

impl PostgresStorage {
    pub fn from_config(config: &EtlConfig) -> Result<Self> {
        config.validate()?;

        let mut server_config: Config = config
            .connection_target
            .parse()
            .context("Failed to parse PostgreSQL connection target")?;
        server_config.application_name(APPLICATION_NAME);
        if server_config.get_dbname().is_none() {
            server_config.dbname(MAINTENANCE_DATABASE);
        }

        let mut database_config = server_config.clone();
        database_config.dbname(&config.database_name);

        Ok(PostgresStorage {
            server_config,
            database_config,
            database_name: config.database_name.clone(),
            batch_size: config.batch_size,
        })
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// Opens a connection whose driver task lives only as long as the
    /// returned client.
    async fn connect(config: &Config) -> Result<Client> {
        let (client, connection) = config
            .connect(NoTls)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to PostgreSQL database {}",
                    config.get_dbname().unwrap_or("<default>")
                )
            })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(client)
    }

    /// `CREATE DATABASE` has no `IF NOT EXISTS`, so the create is attempted
    /// unconditionally and "already exists" counts as success. Two runs racing
    /// here both succeed.
    pub async fn ensure_database(&self) -> Result<()> {
        let client = Self::connect(&self.server_config).await?;

        let statement = format!("CREATE DATABASE {}", quote_ident(&self.database_name));
        match client.batch_execute(&statement).await {
            Ok(()) => info!("Database '{}' created", self.database_name),
            Err(e) if is_already_exists(&e) => {
                debug!("Database '{}' already exists", self.database_name)
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to create database '{}'", self.database_name)
                });
            }
        }

        Ok(())
    }

    /// Drops and recreates the trip table; any rows from a previous run are lost.
    pub async fn ensure_table(&self) -> Result<()> {
        let client = Self::connect(&self.database_config).await?;

        client
            .batch_execute(&recreate_table_sql())
            .await
            .with_context(|| format!("Failed to recreate table {}", TRIP_TABLE))?;

        info!("Recreated table {} in '{}'", TRIP_TABLE, self.database_name);
        Ok(())
    }

    /// Streams every record through binary COPY, `batch_size` rows per COPY,
    /// inside a single transaction holding an exclusive table lock. Nothing is
    /// visible unless every batch succeeds; on error the transaction is dropped
    /// and rolled back.
    pub async fn bulk_insert(&self, records: &[TripRecord]) -> Result<u64> {
        let mut client = Self::connect(&self.database_config).await?;
        let transaction = client
            .transaction()
            .await
            .context("Failed to begin bulk load transaction")?;

        transaction
            .batch_execute(&format!(
                "LOCK TABLE {} IN ACCESS EXCLUSIVE MODE",
                quote_ident(TRIP_TABLE)
            ))
            .await
            .with_context(|| format!("Failed to lock table {}", TRIP_TABLE))?;

        let copy_statement = copy_sql();
        let mut written = 0u64;

        for (batch_number, batch) in records.chunks(self.batch_size).enumerate() {
            let sink = transaction
                .copy_in(copy_statement.as_str())
                .await
                .context("Failed to start COPY into trip table")?;
            let writer = BinaryCopyInWriter::new(sink, &COPY_TYPES);
            pin_mut!(writer);

            for record in batch {
                let row: [&(dyn ToSql + Sync); 9] = [
                    &record.pickup_datetime,
                    &record.dropoff_datetime,
                    &record.passenger_count,
                    &record.trip_distance,
                    &record.store_and_fwd_flag,
                    &record.pu_location_id,
                    &record.do_location_id,
                    &record.fare_amount,
                    &record.tip_amount,
                ];
                writer
                    .as_mut()
                    .write(&row)
                    .await
                    .with_context(|| format!("Failed to write row in batch {}", batch_number + 1))?;
            }

            let copied = writer
                .finish()
                .await
                .with_context(|| format!("Failed to finish batch {}", batch_number + 1))?;
            debug!("Copied batch {} ({} rows)", batch_number + 1, copied);
            written += copied;
        }

        transaction
            .commit()
            .await
            .context("Failed to commit bulk load transaction")?;

        info!("Bulk loaded {} rows into {}", written, TRIP_TABLE);
        Ok(written)
    }

    pub async fn row_count(&self) -> Result<i64> {
        let client = Self::connect(&self.database_config).await?;
        let statement = format!("SELECT COUNT(*) FROM {}", quote_ident(TRIP_TABLE));
        let row = client
            .query_one(statement.as_str(), &[])
            .await
            .with_context(|| format!("Failed to count rows in {}", TRIP_TABLE))?;

        let count: i64 = row.try_get(0)?;
        Ok(count)
    }
}

#[async_trait]
impl TripStore for PostgresStorage {
    async fn provision(&self) -> Result<()> {
        self.ensure_database().await?;
        self.ensure_table().await
    }

    async fn bulk_insert(&self, records: &[TripRecord]) -> Result<u64> {
        PostgresStorage::bulk_insert(self, records).await
    }

    async fn row_count(&self) -> Result<i64> {
        PostgresStorage::row_count(self).await
    }
}

fn is_already_exists(e: &tokio_postgres::Error) -> bool {
    // unique_violation shows up when two sessions create the same name at once
    matches!(
        e.code(),
        Some(code) if *code == SqlState::DUPLICATE_DATABASE || *code == SqlState::UNIQUE_VIOLATION
    )
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quoted_columns() -> String {
    TRIP_COLUMNS
        .iter()
        .map(|column| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ")
}

fn recreate_table_sql() -> String {
    let columns = TRIP_COLUMNS
        .iter()
        .zip(COLUMN_SQL_TYPES.iter())
        .map(|(column, sql_type)| format!("    {} {}", quote_ident(column), sql_type))
        .collect::<Vec<_>>()
        .join(",\n");

    format!(
        "DROP TABLE IF EXISTS {table};\nCREATE TABLE {table} (\n{columns}\n);",
        table = quote_ident(TRIP_TABLE),
        columns = columns
    )
}

fn copy_sql() -> String {
    format!(
        "COPY {} ({}) FROM STDIN (FORMAT binary)",
        quote_ident(TRIP_TABLE),
        quoted_columns()
    )
}
