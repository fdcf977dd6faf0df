use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A stage defines how many requests to issue and how many of them may be
/// in flight at once.
///
/// Stages run strictly in the order they are configured and never overlap.
/// Use `Stage::new(100, 10)` for 100 requests with at most 10 concurrent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    /// Total requests issued by this stage.
    pub requests: u32,
    /// Concurrency cap: the maximum number of requests in flight.
    pub virtual_users: u32,
}

impl Stage {
    pub fn new(requests: u32, virtual_users: u32) -> Self {
        Self {
            requests,
            virtual_users,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.virtual_users == 0 {
            return Err(Error::Config(format!(
                "stage with {} requests must have at least one virtual user",
                self.requests
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "requests: {}; virtual users: {}",
            self.requests, self.virtual_users
        )
    }
}

/// Checks a whole stage plan against a URL pool.
pub fn validate_plan(stages: &[Stage], urls: &[String]) -> Result<()> {
    if urls.is_empty() {
        return Err(Error::Config("at least one url is required".into()));
    }
    if stages.is_empty() {
        return Err(Error::Config("at least one stage is required".into()));
    }
    stages.iter().try_for_each(Stage::validate)
}
