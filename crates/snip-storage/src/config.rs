use crate::{FileStore, MemoryStore, PgStore, TimeoutStore};
use snip_core::{Result, Store, StoreError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use typed_builder::TypedBuilder;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Which backend to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Memory,
    File { path: PathBuf },
    Postgres { dsn: String, max_connections: u32 },
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Memory => "memory",
            Backend::File { .. } => "file",
            Backend::Postgres { .. } => "postgres",
        }
    }
}

/// Immutable store settings, built once at startup.
#[derive(Debug, Clone, TypedBuilder)]
pub struct StoreConfig {
    pub backend: Backend,
    /// Deadline applied to every store call. `None` disables it.
    #[builder(default, setter(strip_option))]
    pub op_timeout: Option<Duration>,
}

/// Opens the configured backend.
///
/// The Postgres schema is bootstrapped on open.
pub async fn open(config: &StoreConfig) -> Result<Arc<dyn Store>> {
    info!(
        backend = config.backend.name(),
        op_timeout = ?config.op_timeout,
        "opening store"
    );

    match &config.backend {
        Backend::Memory => Ok(finish(MemoryStore::new(), config.op_timeout)),
        Backend::File { path } => {
            let path = path.clone();
            let store = tokio::task::spawn_blocking(move || FileStore::open(path))
                .await
                .map_err(|e| StoreError::Unavailable(format!("file store open failed: {e}")))??;
            Ok(finish(store, config.op_timeout))
        }
        Backend::Postgres {
            dsn,
            max_connections,
        } => {
            let store = PgStore::connect(dsn, *max_connections).await?;
            store.bootstrap().await?;
            Ok(finish(store, config.op_timeout))
        }
    }
}

fn finish<S: Store>(store: S, op_timeout: Option<Duration>) -> Arc<dyn Store> {
    match op_timeout {
        Some(timeout) => Arc::new(TimeoutStore::new(store, timeout)),
        None => Arc::new(store),
    }
}
