//! Background deletion pipeline.
//!
//! Callers hand a [`DeletionRequest`] to [`Deleter::submit`] and get control
//! back immediately; a fixed pool of workers applies the request to the
//! store later. [`Deleter::shutdown`] stops admission and waits for queued
//! work to finish.

mod deleter;
mod error;
mod settings;

pub use deleter::{Deleter, DeleterStats};
pub use error::{DrainError, SubmitError};
pub use settings::DeleterSettings;
pub use snip_core::DeletionRequest;
