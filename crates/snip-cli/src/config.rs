use crate::cli::{Cli, StorageArg};
use anyhow::{bail, Result};
use snip_deleter::DeleterSettings;
use snip_storage::{Backend, StoreConfig};
use std::time::Duration;

/// Immutable settings for one `snip` run, derived from the command line.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub deleter: DeleterSettings,
    pub drain_timeout: Duration,
    /// Short URL prefix, without a trailing slash.
    pub base_url: String,
}

impl AppConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let storage = cli.storage.unwrap_or_else(|| {
            if cli.database_dsn.is_some() {
                StorageArg::Postgres
            } else if cli.file_storage_path.is_some() {
                StorageArg::File
            } else {
                StorageArg::Memory
            }
        });

        let backend = match storage {
            StorageArg::Memory => Backend::Memory,
            StorageArg::File => {
                let Some(path) = cli.file_storage_path.clone() else {
                    bail!("file storage needs --file-storage-path");
                };
                Backend::File { path }
            }
            StorageArg::Postgres => {
                let Some(dsn) = cli.database_dsn.clone() else {
                    bail!("postgres storage needs --database-dsn");
                };
                Backend::Postgres {
                    dsn,
                    max_connections: cli.max_connections,
                }
            }
        };

        let defaults = DeleterSettings::default();
        let deleter = DeleterSettings {
            workers: cli.delete_workers.unwrap_or(defaults.workers),
            queue_capacity: cli.delete_queue.unwrap_or(defaults.queue_capacity),
            chunk_size: cli.delete_chunk.unwrap_or(defaults.chunk_size),
            ..defaults
        };
        if deleter.workers == 0 || deleter.queue_capacity == 0 || deleter.chunk_size == 0 {
            bail!("deletion workers, queue and chunk size must be positive");
        }

        Ok(Self {
            store: StoreConfig {
                backend,
                op_timeout: cli.op_timeout_ms.map(Duration::from_millis),
            },
            deleter,
            drain_timeout: Duration::from_millis(cli.drain_timeout_ms),
            base_url: cli.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn short_url(&self, id: &str) -> String {
        format!("{}/{}", self.base_url, id)
    }
}
