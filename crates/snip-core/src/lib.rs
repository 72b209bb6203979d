//! Core types and traits for the snip URL store.
//!
//! This crate holds the store contract shared by every backend and by the
//! deletion pipeline: ids, save outcomes, the error taxonomy and the
//! capability traits.

pub mod error;
pub mod id;
pub mod record;
pub mod store;

pub use error::{Result, StoreError};
pub use record::{DeletionRequest, OwnerId, SaveOutcome};
pub use store::{PartitionIndex, RecordStore, Statistics, Store};
