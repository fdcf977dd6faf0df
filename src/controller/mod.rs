//! Controller: stage sequencing and concurrency gating
//!
//! The [`LoadController`] runs a list of [`Stage`]s one after the other. For
//! each stage it issues exactly `stage.requests` attempts against URLs drawn
//! from the pool by the [`ValueProvider`], never letting more than
//! `stage.virtual_users` of them be in flight, and appends one
//! [`RequestRecord`] per resolved attempt to the shared [`Aggregator`].
//!
//! # High-level flow
//! 1. The controller moves to `Running` and stamps the test start.
//! 2. For every stage, in order:
//!    - check the cancel signal,
//!    - hand the stage to the configured [`Dispatch`] strategy,
//!    - sleep for the inter-stage delay (cancellable), unless it was the last.
//! 3. Whatever happened, the aggregator computes its groups and the run is
//!    closed as `Success` or `Failed` exactly once.
//!
//! # Dispatch strategies
//! - [`Dispatch::Batched`] (default): issue a batch, wait for the whole batch
//!   to resolve, repeat. The batch size comes from [`BatchSizing`].
//! - [`Dispatch::Pipelined`]: one producer enqueues request plans into a
//!   bounded channel and several consumers drain it. A semaphore with
//!   `virtual_users` permits is acquired *before* each request starts, so the
//!   cap holds at issuance time no matter how many consumers are draining.
//!
//! # Determinism
//! URLs are always drawn on the controller task, in issuance order, before
//! the corresponding requests are started. Two runs with the same seed and
//! configuration therefore select the same URL sequence no matter how long
//! individual requests take.
//!
//! # Failures
//! - A failing request (timeout, refused connection, cancelled) becomes a
//!   record with status [`FAILED_STATUS`]. It never aborts the stage.
//! - A failure of the dispatch machinery itself (a panicking worker, a closed
//!   channel) or a cancellation aborts the run. Remaining stages are skipped,
//!   the run ends `Failed`, and the records collected so far are still
//!   summarized.
pub mod batch;
pub mod pipeline;

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::{
    aggregate::Aggregator,
    cancel::CancelSignal,
    client::{Headers, RequestExecutor, elapsed_ms},
    error::{Error, Result},
    record::{FAILED_STATUS, RequestRecord},
    report::{RunState, RunSummary, RunTracker, TerminalStatus},
    stage::{Stage, validate_plan},
    value::ValueProvider,
};

/// How a stage's requests are issued.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Dispatch {
    /// Successive batches, each fully resolved before the next one starts.
    #[default]
    Batched,
    /// Producer/consumer pipeline gated by a semaphore.
    Pipelined {
        #[serde(default = "default_consumers")]
        consumers: usize,
    },
}

fn default_consumers() -> usize {
    num_cpus::get()
}

/// How large each batch is in [`Dispatch::Batched`] mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BatchSizing {
    /// `min(virtual_users, remaining)`.
    #[default]
    Fixed,
    /// A random size in `1..=min(virtual_users, remaining)`, drawn from the
    /// value provider, so still reproducible under a fixed seed.
    Randomized,
}

impl BatchSizing {
    pub fn batch_size<V: ValueProvider>(
        &self,
        virtual_users: u32,
        remaining: u32,
        values: &mut V,
    ) -> u32 {
        let cap = virtual_users.min(remaining);
        match self {
            Self::Fixed => cap,
            Self::Randomized if cap == 0 => 0,
            Self::Randomized => 1 + values.random_int(cap as usize) as u32,
        }
    }
}

/// Everything a dispatch strategy needs to run one stage.
pub(crate) struct StageContext<E> {
    pub index: usize,
    pub stage: Stage,
    pub urls: Arc<[String]>,
    pub headers: Arc<Headers>,
    pub executor: Arc<E>,
    pub aggregator: Arc<Aggregator>,
    pub cancel: CancelSignal,
}

impl<E> StageContext<E> {
    pub fn pick_url<V: ValueProvider>(&self, values: &mut V) -> String {
        self.urls[values.random_int(self.urls.len())].clone()
    }
}

/// Runs one request and appends its record, whatever the outcome.
pub(crate) async fn attempt<E: RequestExecutor>(
    executor: &E,
    aggregator: &Aggregator,
    stage_index: usize,
    url: String,
    headers: &Headers,
    cancel: CancelSignal,
) {
    let started_at = Utc::now();
    let clock = Instant::now();
    let result = executor.execute(&url, headers, cancel).await;
    let ended_at = Utc::now();

    let (status_code, duration_ms) = match result {
        Ok(outcome) => (outcome.status_code, outcome.duration_ms),
        Err(Error::Cancelled) => {
            tracing::debug!("Request to {url} cancelled in flight.");
            (FAILED_STATUS, elapsed_ms(clock))
        }
        Err(e) => {
            tracing::warn!("Request to {url} failed: {e}");
            (FAILED_STATUS, elapsed_ms(clock))
        }
    };

    let record = RequestRecord {
        id: Uuid::new_v4(),
        stage_index,
        url,
        status_code,
        duration_ms,
        started_at,
        ended_at,
    };
    tracing::trace!("Request resolved: {} {} {}ms", record.url, status_code, duration_ms);
    aggregator.add_record(record);
}

/// Drives a whole run: every stage, the inter-stage delays, and the final
/// summary.
///
/// # Example
/// ```rust,no_run
/// use std::time::Duration;
///
/// use volley::{CancelSignal, HttpExecutor, LoadController, SeededValueProvider, Stage};
///
/// # async fn demo() -> volley::Result<()> {
/// let mut controller = LoadController::builder()
///     .executor(HttpExecutor::new(Duration::from_secs(10))?)
///     .values(SeededValueProvider::new(42))
///     .urls(vec!["http://localhost:3000".to_string()])
///     .stages(vec![Stage::new(100, 10), Stage::new(1000, 50)])
///     .stage_delay(Duration::from_secs(5))
///     .build();
///
/// let summary = controller.run(CancelSignal::never()).await?;
/// println!("{}", serde_json::to_string_pretty(&summary).unwrap());
/// # Ok(())
/// # }
/// ```
#[derive(TypedBuilder)]
pub struct LoadController<E, V> {
    /// Transport used for every request.
    #[builder(setter(into))]
    pub executor: Arc<E>,
    /// Random source for URL selection and randomized batch sizes.
    pub values: V,
    /// Where records end up. Pass one in to inspect records after the run.
    #[builder(default = Arc::new(Aggregator::new()))]
    pub aggregator: Arc<Aggregator>,
    /// Target URLs, drawn uniformly.
    pub urls: Vec<String>,
    /// Stages, run in order.
    pub stages: Vec<Stage>,
    #[builder(default)]
    pub headers: Headers,
    /// Pause between consecutive stages.
    #[builder(default = Duration::ZERO)]
    pub stage_delay: Duration,
    #[builder(default)]
    pub dispatch: Dispatch,
    #[builder(default)]
    pub batch_sizing: BatchSizing,
    #[builder(default, setter(skip))]
    state: RunState,
}

impl<E, V> LoadController<E, V>
where
    E: RequestExecutor,
    V: ValueProvider,
{
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Runs every stage and returns the run summary.
    ///
    /// Stage failures and cancellation do not surface as errors: they end
    /// the run as `Failed` and the partial summary is returned. The only
    /// error is calling `run` on a controller that already ran.
    pub async fn run(&mut self, cancel: CancelSignal) -> Result<RunSummary> {
        if self.state != RunState::NotStarted {
            return Err(Error::InvalidState {
                from: self.state,
                to: RunState::Running,
            });
        }
        let tracker = RunTracker::start();
        self.state = RunState::Running;
        tracing::info!("Starting run with {} stages.", self.stages.len());

        let status = match self.run_stages(cancel).await {
            Ok(()) => TerminalStatus::Success,
            Err(Error::Cancelled) => {
                tracing::warn!("Run cancelled, skipping remaining stages.");
                TerminalStatus::Failed
            }
            Err(e) => {
                tracing::error!("There was an error running the stages: {e}");
                TerminalStatus::Failed
            }
        };

        tracing::info!("Processing {} records...", self.aggregator.len());
        let summary = tracker.finish(status, self.aggregator.compute_groups_with(&self.stages));
        self.state = summary.terminal_status.into();
        tracing::info!("Run finished: {:?}", summary.terminal_status);
        Ok(summary)
    }

    async fn run_stages(&mut self, mut cancel: CancelSignal) -> Result<()> {
        validate_plan(&self.stages, &self.urls)?;

        let urls: Arc<[String]> = self.urls.clone().into();
        let headers = Arc::new(self.headers.clone());
        let j = self.stages.len();

        for (index, stage) in self.stages.clone().into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            tracing::info!("Starting stage: {}/{j} ({stage})", index + 1);

            let ctx = StageContext {
                index,
                stage,
                urls: urls.clone(),
                headers: headers.clone(),
                executor: self.executor.clone(),
                aggregator: self.aggregator.clone(),
                cancel: cancel.clone(),
            };
            let resolved = match self.dispatch {
                Dispatch::Batched => batch::run(&ctx, &mut self.values, self.batch_sizing).await?,
                Dispatch::Pipelined { consumers } => {
                    pipeline::run(&ctx, &mut self.values, consumers).await?
                }
            };
            tracing::info!("Finishing stage: {}/{j}, {resolved} requests resolved", index + 1);

            if index + 1 < j && !self.stage_delay.is_zero() {
                tracing::debug!("Sleeping {:?} before next stage.", self.stage_delay);
                tokio::select! {
                    _ = tokio::time::sleep(self.stage_delay) => {}
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                }
            }
        }
        Ok(())
    }
}
