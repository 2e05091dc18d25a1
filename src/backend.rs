use std::sync::Arc;

use outlay_core::{ExpenseStore, StoreError};
use outlay_json::JsonStore;
use outlay_postgres::{ConnectionOptions, PostgresStore};

use crate::config::{StorageConfig, StorageKind};

/// Opens the store selected by `config`.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn ExpenseStore>, StoreError> {
    match config.kind {
        StorageKind::Json => {
            tracing::info!(dir = %config.url, "Using JSON file storage");
            Ok(Arc::new(JsonStore::open(&config.url)?))
        }
        StorageKind::Postgres => {
            tracing::info!(location = %config.url, ssl = %config.ssl, "Using PostgreSQL storage");
            Ok(Arc::new(PostgresStore::connect(&connection_options(config))?))
        }
    }
}

pub fn connection_options(config: &StorageConfig) -> ConnectionOptions {
    ConnectionOptions {
        location: config.url.clone(),
        user: config.user.clone(),
        password: config.password.clone(),
        ssl: Some(config.ssl.clone()),
    }
}
