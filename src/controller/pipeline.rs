//! Pipelined dispatch: a single producer feeds request plans into a bounded
//! channel, a pool of consumers drains it.
//!
//! Draining alone does not bound concurrency, a fast consumer pool would
//! happily start every queued request at once. Each consumer therefore
//! acquires a permit from a semaphore sized to `virtual_users` before it
//! starts a request and releases it when the request resolves.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Mutex, Semaphore, mpsc};

use super::{StageContext, attempt};
use crate::{
    client::RequestExecutor,
    error::{Error, Result},
    value::ValueProvider,
};

/// Runs one stage through the pipeline and returns the number of resolved
/// attempts.
pub(crate) async fn run<E, V>(
    ctx: &StageContext<E>,
    values: &mut V,
    consumers: usize,
) -> Result<usize>
where
    E: RequestExecutor,
    V: ValueProvider,
{
    let total = ctx.stage.requests as usize;
    if total == 0 {
        return Ok(0);
    }
    if ctx.cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    // URLs are drawn here, on the controller task, to keep the selection
    // order independent of scheduling.
    let plan: Vec<String> = (0..total).map(|_| ctx.pick_url(values)).collect();
    let (tx, rx) = mpsc::channel::<String>(total);
    let rx = Arc::new(Mutex::new(rx));
    let gate = Arc::new(Semaphore::new(ctx.stage.virtual_users as usize));

    tracing::debug!(
        "Stage {}: pipelining {total} requests through {consumers} consumers.",
        ctx.index
    );

    let producer = {
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            for url in plan {
                if cancel.is_cancelled() || tx.send(url).await.is_err() {
                    break;
                }
            }
        })
    };

    let workers: Vec<_> = (0..consumers.max(1))
        .map(|i| {
            let rx = rx.clone();
            let gate = gate.clone();
            let executor = ctx.executor.clone();
            let aggregator = ctx.aggregator.clone();
            let headers = ctx.headers.clone();
            let cancel = ctx.cancel.clone();
            let stage_index = ctx.index;
            tokio::spawn(async move {
                let mut resolved = 0usize;
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(url) = next else {
                        break;
                    };
                    if cancel.is_cancelled() {
                        tracing::debug!("Consumer {i} observed cancellation.");
                        break;
                    }
                    let _permit = gate
                        .acquire()
                        .await
                        .map_err(|_| Error::Closed("request gate"))?;
                    attempt(&*executor, &aggregator, stage_index, url, &headers, cancel.clone())
                        .await;
                    resolved += 1;
                }
                Ok::<usize, Error>(resolved)
            })
        })
        .collect();

    let (produced, consumed) = tokio::join!(producer, join_all(workers));

    let mut resolved = 0;
    let mut first_failure = produced.err().map(Error::Task);
    for joined in consumed {
        match joined {
            Ok(Ok(n)) => resolved += n,
            Ok(Err(e)) => {
                first_failure.get_or_insert(e);
            }
            Err(e) => {
                tracing::error!("Consumer task in stage {} failed: {e}", ctx.index);
                first_failure.get_or_insert(Error::Task(e));
            }
        }
    }
    if let Some(e) = first_failure {
        return Err(e);
    }
    if ctx.cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(resolved)
}
