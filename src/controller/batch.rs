//! Batched dispatch: issue up to `virtual_users` requests, wait for all of
//! them, repeat.
//!
//! Batch N+1 is only issued once every request of batch N has resolved, so
//! there is never more than one batch in flight.

use futures::future::join_all;
use tokio::task::JoinHandle;

use super::{BatchSizing, StageContext, attempt};
use crate::{
    client::RequestExecutor,
    error::{Error, Result},
    value::ValueProvider,
};

/// Runs one stage in batches and returns the number of resolved attempts.
pub(crate) async fn run<E, V>(
    ctx: &StageContext<E>,
    values: &mut V,
    sizing: BatchSizing,
) -> Result<usize>
where
    E: RequestExecutor,
    V: ValueProvider,
{
    let mut remaining = ctx.stage.requests;
    let mut resolved = 0;
    let mut batch_no = 0usize;

    while remaining > 0 {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let size = sizing.batch_size(ctx.stage.virtual_users, remaining, values);
        let urls: Vec<String> = (0..size).map(|_| ctx.pick_url(values)).collect();
        tracing::debug!("Stage {} batch {batch_no}: issuing {size} requests.", ctx.index);

        let handles = spawn_batch(ctx, urls);
        // Join every handle before looking at failures so no request is
        // left running behind the next batch.
        let mut first_failure = None;
        for joined in join_all(handles).await {
            if let Err(e) = joined {
                tracing::error!("Request task in stage {} failed: {e}", ctx.index);
                first_failure.get_or_insert(e);
            }
        }
        if let Some(e) = first_failure {
            return Err(Error::Task(e));
        }
        // Requests aborted by a cancel still resolve as records, so a
        // finished batch is not proof that the stage completed.
        if ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        resolved += size as usize;
        remaining -= size;
        batch_no += 1;
    }

    Ok(resolved)
}

fn spawn_batch<E: RequestExecutor>(ctx: &StageContext<E>, urls: Vec<String>) -> Vec<JoinHandle<()>> {
    urls.into_iter()
        .map(|url| {
            let executor = ctx.executor.clone();
            let aggregator = ctx.aggregator.clone();
            let headers = ctx.headers.clone();
            let cancel = ctx.cancel.clone();
            let stage_index = ctx.index;
            tokio::spawn(async move {
                attempt(&*executor, &aggregator, stage_index, url, &headers, cancel).await;
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use super::*;
    use crate::{
        aggregate::Aggregator,
        cancel::{self, CancelSignal},
        client::{Headers, Outcome},
        stage::Stage,
        value::SeededValueProvider,
    };

    /// Sleeps a little per request and tracks how many run at once.
    #[derive(Default)]
    struct Gauge {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl RequestExecutor for Gauge {
        async fn execute(&self, _: &str, _: &Headers, _: CancelSignal) -> Result<Outcome> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Outcome {
                status_code: 200,
                duration_ms: 5,
            })
        }
    }

    fn context(stage: Stage, executor: Arc<Gauge>, cancel: CancelSignal) -> StageContext<Gauge> {
        StageContext {
            index: 0,
            stage,
            urls: vec!["a".to_string(), "b".to_string()].into(),
            headers: Arc::new(Headers::new()),
            executor,
            aggregator: Arc::new(Aggregator::new()),
            cancel,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn issues_exactly_the_stage_requests() {
        let gauge = Arc::new(Gauge::default());
        let ctx = context(Stage::new(23, 4), gauge.clone(), CancelSignal::never());
        let mut values = SeededValueProvider::new(1);

        let resolved = run(&ctx, &mut values, BatchSizing::Fixed).await.unwrap();

        assert_eq!(resolved, 23);
        assert_eq!(ctx.aggregator.len(), 23);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn randomized_batches_respect_the_cap() {
        let gauge = Arc::new(Gauge::default());
        let ctx = context(Stage::new(40, 3), gauge.clone(), CancelSignal::never());
        let mut values = SeededValueProvider::new(99);

        let resolved = run(&ctx, &mut values, BatchSizing::Randomized).await.unwrap();

        assert_eq!(resolved, 40);
        assert_eq!(ctx.aggregator.len(), 40);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn zero_requests_is_a_no_op() {
        let gauge = Arc::new(Gauge::default());
        let ctx = context(Stage::new(0, 5), gauge, CancelSignal::never());
        let mut values = SeededValueProvider::new(1);

        assert_eq!(run(&ctx, &mut values, BatchSizing::Fixed).await.unwrap(), 0);
        assert!(ctx.aggregator.is_empty());
    }

    /// Holds every request until cancelled.
    struct Stalls;

    impl RequestExecutor for Stalls {
        async fn execute(&self, _: &str, _: &Headers, mut cancel: CancelSignal) -> Result<Outcome> {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(5)) => Ok(Outcome {
                    status_code: 200,
                    duration_ms: 5_000,
                }),
                _ = cancel.cancelled() => Err(Error::Cancelled),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_the_last_batch_fails_the_stage() {
        let (handle, signal) = cancel::channel();
        let ctx = StageContext {
            index: 0,
            stage: Stage::new(4, 4),
            urls: vec!["a".to_string()].into(),
            headers: Arc::new(Headers::new()),
            executor: Arc::new(Stalls),
            aggregator: Arc::new(Aggregator::new()),
            cancel: signal,
        };
        let mut values = SeededValueProvider::new(1);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.cancel();
        });
        let result = run(&ctx, &mut values, BatchSizing::Fixed).await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(ctx.aggregator.len(), 4);
        assert!(ctx.aggregator.records().iter().all(|r| r.is_failure()));
    }

    #[tokio::test]
    async fn stops_before_the_next_batch_once_cancelled() {
        let (handle, signal) = cancel::channel();
        handle.cancel();
        let gauge = Arc::new(Gauge::default());
        let ctx = context(Stage::new(10, 2), gauge, signal);
        let mut values = SeededValueProvider::new(1);

        let result = run(&ctx, &mut values, BatchSizing::Fixed).await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(ctx.aggregator.is_empty());
    }

    struct Panics;

    impl RequestExecutor for Panics {
        async fn execute(&self, url: &str, _: &Headers, _: CancelSignal) -> Result<Outcome> {
            if url == "boom" {
                panic!("executor bug");
            }
            Ok(Outcome {
                status_code: 200,
                duration_ms: 1,
            })
        }
    }

    #[tokio::test]
    async fn panicking_request_task_fails_the_stage() {
        let ctx = StageContext {
            index: 0,
            stage: Stage::new(4, 4),
            urls: vec!["boom".to_string()].into(),
            headers: Arc::new(Headers::new()),
            executor: Arc::new(Panics),
            aggregator: Arc::new(Aggregator::new()),
            cancel: CancelSignal::never(),
        };
        let mut values = SeededValueProvider::new(1);

        let result = run(&ctx, &mut values, BatchSizing::Fixed).await;

        assert!(matches!(result, Err(Error::Task(_))));
    }
}
