use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    client::Headers,
    controller::{BatchSizing, Dispatch},
    error::{Error, Result},
    stage::{Stage, validate_plan},
};

/// Run configuration, loaded from JSON or TOML.
///
/// Keys are camelCase in both formats:
///
/// ```json
/// {
///   "urls": ["http://localhost:3000/health"],
///   "stages": [{ "requests": 100, "virtualUsers": 10 }],
///   "secondsDelayBetweenStages": 5,
///   "randomSeed": 42,
///   "headers": { "Accept": "application/json" },
///   "consoleLog": true
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub urls: Vec<String>,
    pub stages: Vec<Stage>,
    /// Pause between consecutive stages.
    #[serde(default)]
    pub seconds_delay_between_stages: u64,
    /// Seed for URL selection; the same seed reproduces the same run.
    #[serde(default)]
    pub random_seed: u64,
    #[serde(default)]
    pub headers: Headers,
    /// Log per-group results once the run finishes.
    #[serde(default)]
    pub console_log: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub dispatch: Dispatch,
    #[serde(default)]
    pub batch_sizing: BatchSizing,
    #[serde(default)]
    pub report: ReportConfig,
}

fn default_request_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportConfig {
    /// Write the JSON summary file.
    pub enabled: bool,
    pub path: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "data.json".to_string(),
        }
    }
}

impl Config {
    /// Loads and validates a config file. `.toml` files are parsed as TOML,
    /// anything else as JSON.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            Self::from_toml_str(&contents)
        } else {
            Self::from_json_str(&contents)
        }
    }

    pub fn from_json_str(contents: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_plan(&self.stages, &self.urls)?;
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("requestTimeoutSecs must be positive".into()));
        }
        if let Dispatch::Pipelined { consumers: 0 } = self.dispatch {
            return Err(Error::Config("pipelined dispatch needs at least one consumer".into()));
        }
        Ok(())
    }

    pub fn stage_delay(&self) -> Duration {
        Duration::from_secs(self.seconds_delay_between_stages)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn total_requests(&self) -> u64 {
        self.stages.iter().map(|s| u64::from(s.requests)).sum()
    }
}
