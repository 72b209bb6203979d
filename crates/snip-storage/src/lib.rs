//! Store backends.
//!
//! Three independent implementations of the [`Store`] contract: an
//! in-process slot table, a JSON snapshot file and Postgres. A backend is
//! picked at construction time through [`StoreConfig`] and [`open`].

pub mod config;
pub mod file;
pub mod memory;
pub mod postgres;
pub mod timeout;

pub use config::{open, Backend, StoreConfig};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use snip_core::{
    PartitionIndex, RecordStore, Result, SaveOutcome, Statistics, Store, StoreError,
};
pub use timeout::TimeoutStore;
