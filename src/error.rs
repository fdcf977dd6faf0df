use thiserror::Error;

use crate::report::RunState;

/// Errors surfaced by the engine.
///
/// Per-request transport failures are normally converted into sentinel
/// records by the controller and never reach the caller; the remaining
/// variants describe configuration problems and run-level aborts.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("cannot move run from {from:?} to {to:?}")]
    InvalidState { from: RunState, to: RunState },

    #[error("{0} closed")]
    Closed(&'static str),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
