//! ABOUTME: RunHandle: completion future, cancellation, and the event stream
//! ABOUTME: The stream closes after the single RunFinished event

use floe_core::error::{FloeError, Result};
use floe_core::events::RunEvent;
use floe_core::result::RunResult;
use floe_core::types::RunId;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

/// A started run: await it, cancel it, or stream its events.
pub struct RunHandle {
    run_id: RunId,
    join: JoinHandle<RunResult>,
    cancel: CancellationToken,
    cancel_reason: Arc<Mutex<Option<String>>>,
    events_rx: Mutex<Option<UnboundedReceiver<RunEvent>>>,
    depth: Arc<AtomicUsize>,
    dropped: Arc<AtomicU64>,
}

impl RunHandle {
    pub(crate) fn new(
        run_id: RunId,
        join: JoinHandle<RunResult>,
        cancel: CancellationToken,
        cancel_reason: Arc<Mutex<Option<String>>>,
        events_rx: UnboundedReceiver<RunEvent>,
        depth: Arc<AtomicUsize>,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        Self {
            run_id,
            join,
            cancel,
            cancel_reason,
            events_rx: Mutex::new(Some(events_rx)),
            depth,
            dropped,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Wait for the run to reach its terminal state.
    pub async fn await_completion(self) -> Result<RunResult> {
        self.join.await.map_err(|e| FloeError::Internal {
            message: format!("run driver task failed: {e}"),
        })
    }

    /// Request cooperative cancellation. In-flight nodes receive the signal;
    /// pending nodes are not started.
    pub fn cancel(&self, reason: impl Into<String>) {
        *self.cancel_reason.lock() = Some(reason.into());
        self.cancel.cancel();
    }

    /// The run's event stream. May be taken once; the stream ends after
    /// `RunFinished`. A second call yields an empty stream.
    pub fn events(&self) -> Pin<Box<dyn Stream<Item = RunEvent> + Send>> {
        match self.events_rx.lock().take() {
            Some(rx) => {
                let depth = Arc::clone(&self.depth);
                Box::pin(UnboundedReceiverStream::new(rx).map(move |event| {
                    depth.fetch_sub(1, Ordering::Relaxed);
                    event
                }))
            }
            None => Box::pin(futures::stream::empty()),
        }
    }

    /// Events dropped by the overflow policy so far.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
