use std::{future::Future, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{aggregate::GroupSummary, error::Result};

/// Final classification of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalStatus {
    Success,
    Failed,
}

/// Lifecycle of a run: `NotStarted -> Running -> {Succeeded, Failed}`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunState {
    #[default]
    NotStarted,
    Running,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl From<TerminalStatus> for RunState {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Success => Self::Succeeded,
            TerminalStatus::Failed => Self::Failed,
        }
    }
}

/// The processed outcome of a whole run.
///
/// A `RunSummary` is pure data: timestamps, terminal status, and one
/// [`GroupSummary`] per `(stage, url)` pair. It is produced even when the
/// run failed, in which case the groups cover whatever was collected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub test_start: DateTime<Utc>,
    pub test_end: DateTime<Utc>,
    pub terminal_status: TerminalStatus,
    pub groups: Vec<GroupSummary>,
}

impl RunSummary {
    pub fn total_requests(&self) -> usize {
        self.groups.iter().map(|g| g.requests).sum()
    }

    pub fn is_success(&self) -> bool {
        self.terminal_status == TerminalStatus::Success
    }
}

/// Stamps the start of a run and closes it exactly once.
///
/// `finish` consumes the tracker, so a run cannot be closed twice or have
/// its end timestamp rewritten.
#[derive(Debug)]
pub struct RunTracker {
    test_start: DateTime<Utc>,
}

impl RunTracker {
    pub fn start() -> Self {
        Self {
            test_start: Utc::now(),
        }
    }

    pub fn test_start(&self) -> DateTime<Utc> {
        self.test_start
    }

    pub fn finish(self, status: TerminalStatus, groups: Vec<GroupSummary>) -> RunSummary {
        RunSummary {
            test_start: self.test_start,
            test_end: Utc::now(),
            terminal_status: status,
            groups,
        }
    }
}

/// A [`Reporter`] takes a finished [`RunSummary`] and sends it somewhere:
/// a file, the log, a remote service.
///
/// Reporters are the I/O boundary of the engine. Their failures never
/// change the outcome of a run; use [`publish`] to log and drop them.
///
/// # Example
/// ```rust
/// use volley::{Reporter, Result, RunSummary};
///
/// struct CountReporter;
///
/// impl Reporter for CountReporter {
///     async fn report(&self, summary: &RunSummary) -> Result<()> {
///         println!("{} requests", summary.total_requests());
///         Ok(())
///     }
/// }
/// ```
pub trait Reporter: Send + Sync {
    fn report(&self, summary: &RunSummary) -> impl Future<Output = Result<()>> + Send;
}

/// Runs a reporter, logging instead of propagating any failure.
pub async fn publish<R: Reporter>(reporter: &R, summary: &RunSummary) {
    if let Err(e) = reporter.report(summary).await {
        tracing::warn!("Failed to write report: {e}");
    }
}

/// Writes the summary as pretty-printed JSON to `path`.
#[derive(Clone, Debug)]
pub struct JsonReporter {
    pub path: PathBuf,
}

impl JsonReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Reporter for JsonReporter {
    async fn report(&self, summary: &RunSummary) -> Result<()> {
        let json = serde_json::to_vec_pretty(summary)?;
        tokio::fs::write(&self.path, json).await?;
        tracing::info!("Report written to {}", self.path.display());
        Ok(())
    }
}

/// Logs one line per group through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    async fn report(&self, summary: &RunSummary) -> Result<()> {
        tracing::info!(
            "Run {:?}: {} requests between {} and {}",
            summary.terminal_status,
            summary.total_requests(),
            summary.test_start,
            summary.test_end
        );
        for g in &summary.groups {
            tracing::info!("Results for stage: {}; url: {}", g.stage_index, g.url);
            tracing::info!(
                "requests={} 2xx={} 3xx={} 4xx={} 5xx={} other={} min={}ms avg={}ms max={}ms \
                 stddev={} p50={} p66={} p75={} p80={} p90={} p95={} p98={} p99={}",
                g.requests,
                g.http2xx,
                g.http3xx,
                g.http4xx,
                g.http5xx,
                g.unclassified,
                g.minimum,
                g.average,
                g.maximum,
                g.std_dev,
                g.percentile50,
                g.percentile66,
                g.percentile75,
                g.percentile80,
                g.percentile90,
                g.percentile95,
                g.percentile98,
                g.percentile99,
            );
        }
        Ok(())
    }
}
