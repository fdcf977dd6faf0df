use std::{collections::BTreeMap, future::Future, time::Duration};

use reqwest::Client;
use tokio::time::Instant;

use crate::{
    cancel::CancelSignal,
    error::{Error, Result},
};

/// Request headers, applied in key order.
pub type Headers = BTreeMap<String, String>;

/// What a successful request attempt reports back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub status_code: u16,
    pub duration_ms: u64,
}

/// Performs a single GET against a URL.
///
/// This is the transport seam of the engine: the controller only needs a
/// status code and an elapsed time, or an error it can turn into a failed
/// record. Implementations should resolve promptly once `cancel` fires
/// instead of waiting out their own timeouts.
///
/// # Example
/// ```rust
/// use volley::{CancelSignal, Headers, Outcome, RequestExecutor, Result};
///
/// struct AlwaysOk;
///
/// impl RequestExecutor for AlwaysOk {
///     async fn execute(&self, _: &str, _: &Headers, _: CancelSignal) -> Result<Outcome> {
///         Ok(Outcome { status_code: 200, duration_ms: 1 })
///     }
/// }
/// ```
pub trait RequestExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        url: &str,
        headers: &Headers,
        cancel: CancelSignal,
    ) -> impl Future<Output = Result<Outcome>> + Send;
}

/// [`RequestExecutor`] backed by a shared [`reqwest::Client`].
///
/// The client is built once and cloned cheaply; never build one per request.
/// Timing stops as soon as response headers arrive, the body is not read.
#[derive(Clone, Debug)]
pub struct HttpExecutor {
    client: Client,
}

impl HttpExecutor {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

impl RequestExecutor for HttpExecutor {
    async fn execute(
        &self,
        url: &str,
        headers: &Headers,
        mut cancel: CancelSignal,
    ) -> Result<Outcome> {
        let mut request = self.client.get(url);
        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let start = Instant::now();
        tokio::select! {
            response = request.send() => {
                let response = response.map_err(|e| Error::Transport(e.to_string()))?;
                Ok(Outcome {
                    status_code: response.status().as_u16(),
                    duration_ms: elapsed_ms(start),
                })
            }
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}

pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
