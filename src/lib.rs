//! Volley: a staged HTTP load-testing engine.
//!
//! Give Volley a pool of target URLs and an ordered list of stages (how many
//! requests, how many at once) and it drives concurrent GET requests against
//! the targets, records how each one went, and summarizes latency and status
//! codes per target and stage.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`LoadController`]: sequences the stages, caps in-flight requests at each
//!   stage's virtual users, handles cancellation and inter-stage delays.
//! - [`RequestExecutor`]: the transport seam. [`HttpExecutor`] is the
//!   reqwest-backed implementation; tests and alternative transports plug in
//!   their own.
//! - [`ValueProvider`]: the seeded random source used for URL selection, so
//!   runs are reproducible.
//! - [`RequestRecord`]: one resolved attempt, successful or not.
//! - [`Aggregator`]: owns every record of a run and derives a
//!   [`GroupSummary`] per `(stage, url)` pair on demand.
//! - [`RunSummary`]: timestamps, terminal status and the groups.
//! - [`Reporter`]: sends a `RunSummary` somewhere (JSON file, log).
//!
//! # Guarantees
//!
//! - Never more than `virtual_users` requests in flight for a stage.
//! - A stage that is not cancelled produces exactly `requests` records.
//! - A failed request is recorded with status `0`, it never aborts the run.
//! - Every run ends with a `RunSummary`, also when it failed or was cancelled.
//! - The same seed and configuration select the same URLs in the same order.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use volley::{
//!     CancelSignal, HttpExecutor, JsonReporter, LoadController, SeededValueProvider, Stage,
//!     publish,
//! };
//!
//! #[tokio::main]
//! async fn main() -> volley::Result<()> {
//!     // Build the client once; it is shared by every request.
//!     let executor = HttpExecutor::new(Duration::from_secs(10))?;
//!
//!     let summary = LoadController::builder()
//!         .executor(executor)
//!         .values(SeededValueProvider::new(42))
//!         .urls(vec![
//!             "http://localhost:3000/a".to_string(),
//!             "http://localhost:3000/b".to_string(),
//!         ])
//!         // Warm up, then push harder.
//!         .stages(vec![Stage::new(100, 5), Stage::new(1_000, 50)])
//!         .stage_delay(Duration::from_secs(2))
//!         .build()
//!         .run(CancelSignal::never())
//!         .await?;
//!
//!     publish(&JsonReporter::new("data.json"), &summary).await;
//!     Ok(())
//! }
//! ```
//!
//! # Distributed mode
//!
//! The [`queue`] module carries the wire schema for spreading requests over
//! a worker pool through a message queue, plus an in-process queue and a
//! consumer loop. Broker clients are not part of this crate.

/// Record aggregation and per-group statistics
pub mod aggregate;
/// Cooperative cancellation
pub mod cancel;
/// Request transport
pub mod client;
/// Run configuration
pub mod config;
/// Stage sequencing and concurrency gating
pub mod controller;
/// Error type
pub mod error;
/// Distributed task queue
pub mod queue;
/// Single request observations
pub mod record;
/// Run summaries and reporters
pub mod report;
/// Stage definitions
pub mod stage;
/// Percentiles, deviation, rounding
pub mod stats;
/// Seeded randomness
pub mod value;

pub use aggregate::{Aggregator, GroupSummary};
pub use cancel::{CancelHandle, CancelSignal};
pub use client::{Headers, HttpExecutor, Outcome, RequestExecutor};
pub use config::Config;
pub use controller::{BatchSizing, Dispatch, LoadController};
pub use error::{Error, Result};
pub use record::{FAILED_STATUS, RequestRecord};
pub use report::{
    ConsoleReporter, JsonReporter, Reporter, RunState, RunSummary, RunTracker, TerminalStatus,
    publish,
};
pub use stage::Stage;
pub use value::{SeededValueProvider, ValueProvider};
