//! The durable store (spec.md §4.1): transactional reads/writes over every
//! entity in §3, with transition validation and uniqueness enforcement.
//! Backed by `sqlx` over SQLite so the crate is runnable without external
//! infrastructure; every repository method takes the pool directly so a
//! future Postgres backend only needs a different `Store::connect`.

pub mod alerts;
pub mod audit;
pub mod error;
pub mod executions;
pub mod models;
pub mod rules;
pub mod secrets;
pub mod runbooks;
pub mod safety;
pub mod schedules;
pub mod servers;

pub use error::StoreError;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

#[derive(Clone)]
pub struct Store {
    pub pool: SqlitePool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|err| StoreError::Validation(err.to_string()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| StoreError::Validation(err.to_string()))?;
        Ok(())
    }

    /// An unmigrated-schema-free in-memory store, for this crate's own
    /// tests and for the other workspace crates that exercise repository
    /// behavior against a real (if ephemeral) database.
    pub async fn in_memory() -> Self {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        store.migrate().await.unwrap();
        store
    }
}

pub(crate) fn parse_json_map<T: serde::de::DeserializeOwned + Default>(raw: &str) -> T {
    serde_json::from_str(raw).unwrap_or_default()
}

pub(crate) fn to_json_string<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Renders a unit-variant enum (`#[serde(rename_all = "snake_case")]`) to the
/// bare column value, e.g. `CircuitState::HalfOpen` -> `half_open`.
pub(crate) fn enum_to_col<T: serde::Serialize>(value: T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => String::new(),
    }
}

pub(crate) fn col_to_enum<T: serde::de::DeserializeOwned>(raw: &str) -> T {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .expect("column holds a value outside the enum's vocabulary")
}
