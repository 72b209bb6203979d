use crate::DeleterStats;
use thiserror::Error;

/// Why a deletion request was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// The queue and every overflow slot are taken.
    #[error("deletion queue is saturated")]
    Saturated,
    #[error("deletion pipeline is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrainError {
    /// Workers were still busy when the drain deadline passed.
    #[error("deletion pipeline did not drain in time ({stats:?})")]
    TimedOut { stats: DeleterStats },
}
