//! Distributed task queue: wire schema, producer plan and a prefetch-1
//! consumer loop.
//!
//! In distributed mode requests are not issued by a local controller.
//! A producer publishes one [`TaskMessage`] per request to a durable queue
//! and any number of workers consume them one at a time, acknowledging each
//! message only after its record has been stored. The broker client itself
//! lives outside this crate; anything implementing [`TaskQueue`] can be
//! plugged in. [`MemoryQueue`] is an in-process implementation.

use std::{
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    aggregate::Aggregator,
    cancel::CancelSignal,
    client::{Headers, RequestExecutor},
    controller::attempt,
    error::{Error, Result},
    stage::Stage,
    value::ValueProvider,
};

/// Name of the queue both sides declare.
pub const TASK_QUEUE: &str = "task_queue";

/// Declaration a broker-backed [`TaskQueue`] is expected to apply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueSettings {
    pub name: String,
    /// Survive broker restarts.
    pub durable: bool,
    /// Unacknowledged messages a consumer may hold.
    pub prefetch: u16,
    /// Messages are acknowledged explicitly after processing.
    pub manual_ack: bool,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            name: TASK_QUEUE.to_string(),
            durable: true,
            prefetch: 1,
            manual_ack: true,
        }
    }
}

/// One unit of work on the queue: a GET against `url` with `headers`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub url: String,
    #[serde(default)]
    pub headers: Headers,
}

impl TaskMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Builds the messages a producer publishes for a stage plan: one per
/// request across all stages, URLs drawn in order from `values`.
pub fn plan_tasks<V: ValueProvider>(
    urls: &[String],
    headers: &Headers,
    stages: &[Stage],
    values: &mut V,
) -> Vec<TaskMessage> {
    if urls.is_empty() {
        return Vec::new();
    }
    let total: u64 = stages.iter().map(|s| u64::from(s.requests)).sum();
    (0..total)
        .map(|_| TaskMessage {
            url: urls[values.random_int(urls.len())].clone(),
            headers: headers.clone(),
        })
        .collect()
}

/// A message handed to a consumer, identified by its delivery tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub tag: u64,
    pub body: Vec<u8>,
}

/// Consumer side of a task queue.
pub trait TaskQueue: Send {
    /// Waits for the next delivery. `None` once the queue is closed and empty.
    fn next(&mut self) -> impl Future<Output = Option<Delivery>> + Send;

    /// Acknowledges a processed delivery.
    fn ack(&mut self, tag: u64) -> impl Future<Output = Result<()>> + Send;
}

/// Creates an in-process queue holding at most `capacity` pending messages.
pub fn memory_queue(capacity: usize) -> (MemoryPublisher, MemoryQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        MemoryPublisher {
            tx,
            next_tag: AtomicU64::new(1),
        },
        MemoryQueue {
            rx,
            acked: Vec::new(),
        },
    )
}

#[derive(Debug)]
pub struct MemoryPublisher {
    tx: mpsc::Sender<Delivery>,
    next_tag: AtomicU64,
}

impl MemoryPublisher {
    /// Publishes a message and returns its delivery tag.
    pub async fn publish(&self, message: &TaskMessage) -> Result<u64> {
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        let body = message.to_bytes()?;
        self.tx
            .send(Delivery { tag, body })
            .await
            .map_err(|_| Error::Closed("task queue"))?;
        Ok(tag)
    }
}

#[derive(Debug)]
pub struct MemoryQueue {
    rx: mpsc::Receiver<Delivery>,
    acked: Vec<u64>,
}

impl MemoryQueue {
    /// Tags acknowledged so far, in acknowledgement order.
    pub fn acked(&self) -> &[u64] {
        &self.acked
    }
}

impl TaskQueue for MemoryQueue {
    async fn next(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    async fn ack(&mut self, tag: u64) -> Result<()> {
        self.acked.push(tag);
        Ok(())
    }
}

/// Processes deliveries one at a time until the queue closes.
///
/// Every message is executed and recorded under `stage_index`, then
/// acknowledged. Messages that cannot be decoded are logged and
/// acknowledged so they are not redelivered forever. Returns the number of
/// requests recorded.
pub async fn consume<Q, E>(
    queue: &mut Q,
    executor: &E,
    aggregator: &Aggregator,
    stage_index: usize,
    mut cancel: CancelSignal,
) -> Result<usize>
where
    Q: TaskQueue,
    E: RequestExecutor,
{
    let mut processed = 0;
    tracing::info!("Waiting for tasks...");
    loop {
        let delivery = tokio::select! {
            delivery = queue.next() => delivery,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };
        let Some(delivery) = delivery else {
            break;
        };

        match TaskMessage::from_bytes(&delivery.body) {
            Ok(task) => {
                tracing::debug!("Received task {}: {}", delivery.tag, task.url);
                attempt(
                    executor,
                    aggregator,
                    stage_index,
                    task.url,
                    &task.headers,
                    cancel.clone(),
                )
                .await;
                processed += 1;
            }
            Err(e) => tracing::warn!("Dropping undecodable task {}: {e}", delivery.tag),
        }
        queue.ack(delivery.tag).await?;
    }
    tracing::info!("Task queue drained after {processed} tasks.");
    Ok(processed)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{cancel, client::Outcome, value::SeededValueProvider};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, Headers)>>,
    }

    impl RequestExecutor for Recorder {
        async fn execute(&self, url: &str, headers: &Headers, _: CancelSignal) -> Result<Outcome> {
            self.seen.lock().unwrap().push((url.to_string(), headers.clone()));
            Ok(Outcome {
                status_code: 204,
                duration_ms: 3,
            })
        }
    }

    fn urls() -> Vec<String> {
        vec!["http://a".to_string(), "http://b".to_string()]
    }

    #[test]
    fn defaults_match_worker_pool_contract() {
        let settings = QueueSettings::default();
        assert_eq!(settings.name, "task_queue");
        assert!(settings.durable);
        assert_eq!(settings.prefetch, 1);
        assert!(settings.manual_ack);
    }

    #[test]
    fn wire_format_is_url_and_headers() {
        let message = TaskMessage {
            url: "http://a".to_string(),
            headers: Headers::from([("Accept".to_string(), "text/plain".to_string())]),
        };
        let value: serde_json::Value = serde_json::from_slice(&message.to_bytes().unwrap()).unwrap();
        assert_eq!(value["url"], "http://a");
        assert_eq!(value["headers"]["Accept"], "text/plain");

        let bare = TaskMessage::from_bytes(br#"{"url": "http://b"}"#).unwrap();
        assert!(bare.headers.is_empty());
    }

    #[test]
    fn plan_covers_every_stage_request() {
        let stages = [Stage::new(3, 1), Stage::new(4, 2)];
        let headers = Headers::from([("X-Run".to_string(), "1".to_string())]);

        let a = plan_tasks(&urls(), &headers, &stages, &mut SeededValueProvider::new(9));
        let b = plan_tasks(&urls(), &headers, &stages, &mut SeededValueProvider::new(9));

        assert_eq!(a.len(), 7);
        assert_eq!(a, b);
        assert!(a.iter().all(|t| t.headers == headers));
        assert!(plan_tasks(&[], &headers, &stages, &mut SeededValueProvider::new(9)).is_empty());
    }

    #[tokio::test]
    async fn consumer_records_and_acks_each_task() {
        let (publisher, mut queue) = memory_queue(16);
        let tasks = plan_tasks(&urls(), &Headers::new(), &[Stage::new(5, 1)], &mut SeededValueProvider::new(3));
        for task in &tasks {
            publisher.publish(task).await.unwrap();
        }
        drop(publisher);

        let executor = Recorder::default();
        let aggregator = Aggregator::new();
        let processed = consume(&mut queue, &executor, &aggregator, 0, CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(processed, 5);
        assert_eq!(aggregator.len(), 5);
        assert_eq!(queue.acked(), &[1, 2, 3, 4, 5]);
        let seen: Vec<String> = executor.seen.lock().unwrap().iter().map(|(u, _)| u.clone()).collect();
        let planned: Vec<String> = tasks.into_iter().map(|t| t.url).collect();
        assert_eq!(seen, planned);
    }

    #[tokio::test]
    async fn undecodable_tasks_are_acked_and_skipped() {
        let (publisher, mut queue) = memory_queue(4);
        publisher.tx.send(Delivery { tag: 42, body: b"not json".to_vec() }).await.unwrap();
        drop(publisher);

        let aggregator = Aggregator::new();
        let processed = consume(&mut queue, &Recorder::default(), &aggregator, 0, CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(processed, 0);
        assert!(aggregator.is_empty());
        assert_eq!(queue.acked(), &[42]);
    }

    #[tokio::test]
    async fn cancellation_ends_an_idle_consumer() {
        let (_publisher, mut queue) = memory_queue(4);
        let (handle, signal) = cancel::channel();
        handle.cancel();

        let result = consume(&mut queue, &Recorder::default(), &Aggregator::new(), 0, signal).await;

        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
