use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use uuid::Uuid;

pub const STORAGE_ENV: &str = "SNIP_STORAGE";
pub const FILE_STORAGE_PATH_ENV: &str = "FILE_STORAGE_PATH";
pub const DATABASE_DSN_ENV: &str = "DATABASE_DSN";
pub const MAX_CONNECTIONS_ENV: &str = "SNIP_DB_MAX_CONNECTIONS";
pub const BASE_URL_ENV: &str = "BASE_URL";
pub const OP_TIMEOUT_ENV: &str = "SNIP_OP_TIMEOUT_MS";
pub const DELETE_WORKERS_ENV: &str = "SNIP_DELETE_WORKERS";
pub const DELETE_QUEUE_ENV: &str = "SNIP_DELETE_QUEUE";
pub const DELETE_CHUNK_ENV: &str = "SNIP_DELETE_CHUNK";
pub const DRAIN_TIMEOUT_ENV: &str = "SNIP_DRAIN_TIMEOUT_MS";
pub const LOG_FORMAT_ENV: &str = "SNIP_LOG_FORMAT";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageArg {
    #[value(name = "memory")]
    Memory,
    #[value(name = "file")]
    File,
    #[value(name = "postgres")]
    Postgres,
}

impl Display for StorageArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageArg::Memory => write!(f, "memory"),
            StorageArg::File => write!(f, "file"),
            StorageArg::Postgres => write!(f, "postgres"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "snip", version, about = "Operate a snip URL store")]
pub struct Cli {
    /// Backend to use. When unset, a DSN selects postgres and a file path
    /// selects the file backend; otherwise the store lives in memory.
    #[arg(long, env = STORAGE_ENV, value_enum)]
    pub storage: Option<StorageArg>,

    #[arg(short = 'f', long, env = FILE_STORAGE_PATH_ENV)]
    pub file_storage_path: Option<PathBuf>,

    #[arg(short = 'd', long, env = DATABASE_DSN_ENV)]
    pub database_dsn: Option<String>,

    #[arg(long, env = MAX_CONNECTIONS_ENV, default_value_t = snip_storage::config::DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: u32,

    /// Prefix for printed short URLs.
    #[arg(short = 'b', long, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Deadline for each store call, in milliseconds.
    #[arg(long, env = OP_TIMEOUT_ENV)]
    pub op_timeout_ms: Option<u64>,

    #[arg(long, env = DELETE_WORKERS_ENV)]
    pub delete_workers: Option<usize>,

    #[arg(long, env = DELETE_QUEUE_ENV)]
    pub delete_queue: Option<usize>,

    #[arg(long, env = DELETE_CHUNK_ENV)]
    pub delete_chunk: Option<usize>,

    /// How long to wait for pending deletions before exiting, in milliseconds.
    #[arg(long, env = DRAIN_TIMEOUT_ENV, default_value_t = DEFAULT_DRAIN_TIMEOUT_MS)]
    pub drain_timeout_ms: u64,

    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Shorten one or more URLs. Several URLs are saved as one batch.
    Shorten {
        #[arg(required = true)]
        urls: Vec<String>,
        #[arg(long)]
        owner: Option<Uuid>,
    },
    /// Print the URL behind an id.
    Resolve {
        id: String,
        #[arg(long)]
        owner: Option<Uuid>,
    },
    /// List an owner's active URLs.
    List {
        #[arg(long)]
        owner: Uuid,
    },
    /// Queue ids for deletion. Pending deletions are drained before exit.
    Delete {
        #[arg(long)]
        owner: Uuid,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Print owner and URL counts.
    Stats,
    /// Check that the backend is reachable.
    Ping,
}
