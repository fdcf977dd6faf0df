use std::sync::Arc;

use tokio::sync::watch::{self, Receiver, Sender};

/// Creates a linked cancellation pair.
///
/// The [`CancelHandle`] stops a run, every [`CancelSignal`] observes it.
/// Signals are cheap to clone and are handed to each in-flight request.
pub fn channel() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
}

#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: Arc<Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Cooperative cancellation signal, checked at stage and batch boundaries
/// and raced against sleeps and requests.
#[derive(Clone, Debug)]
pub struct CancelSignal {
    rx: Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, signal) = channel();
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested.
    ///
    /// If every handle was dropped without cancelling, this never resolves.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
