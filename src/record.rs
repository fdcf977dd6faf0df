use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status code recorded for attempts that never got an HTTP response
/// (timeouts, refused connections, DNS failures, cancelled requests).
pub const FAILED_STATUS: u16 = 0;

/// A `RequestRecord` is the single observation produced by one resolved
/// request attempt.
///
/// Records are created exactly once, when the attempt resolves, and are
/// handed to the [`crate::Aggregator`] which owns them from then on. They
/// arrive in completion order, not issuance order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub id: Uuid,
    pub stage_index: usize,
    pub url: String,
    pub status_code: u16,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl RequestRecord {
    pub fn status_class(&self) -> u16 {
        status_class(self.status_code)
    }

    pub fn is_failure(&self) -> bool {
        self.status_code == FAILED_STATUS
    }
}

/// Buckets a status code into its class: `404 -> 400`, `201 -> 200`.
pub fn status_class(code: u16) -> u16 {
    code / 100 * 100
}
