//! ABOUTME: Per-run event queue with soft-limit overflow handling
//! ABOUTME: Lowest-priority events drop first; criticals always get through

use floe_core::events::{EventPriority, EventSink, RunEvent};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// What to do when the per-run event queue passes its soft limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventOverflow {
    /// Drop sub-critical events, lowest priority class first, and count
    /// them. The default.
    #[default]
    DropLowest,
    /// Keep enqueueing regardless of depth (the queue is unbounded; memory
    /// is the caller's problem).
    Block,
}

/// Fan-out point for run events: every event goes to the external sink
/// immediately and, subject to the overflow policy, onto the `events()`
/// stream queue.
#[derive(Clone)]
pub struct EventEmitter {
    sink: Arc<dyn EventSink>,
    tx: mpsc::UnboundedSender<RunEvent>,
    depth: Arc<AtomicUsize>,
    dropped: Arc<AtomicU64>,
    soft_limit: usize,
    overflow: EventOverflow,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("soft_limit", &self.soft_limit)
            .field("overflow", &self.overflow)
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    pub fn new(
        sink: Arc<dyn EventSink>,
        soft_limit: usize,
        overflow: EventOverflow,
    ) -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                sink,
                tx,
                depth: Arc::new(AtomicUsize::new(0)),
                dropped: Arc::new(AtomicU64::new(0)),
                soft_limit,
                overflow,
            },
            rx,
        )
    }

    /// Emit an event. Never blocks.
    pub fn emit(&self, event: RunEvent) {
        self.sink.emit(&event);

        if self.overflow == EventOverflow::DropLowest
            && self.depth.load(Ordering::Relaxed) >= self.soft_limit
            && event.event_type.priority() < EventPriority::Critical
        {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped == 1 || dropped % 1000 == 0 {
                warn!(
                    dropped,
                    soft_limit = self.soft_limit,
                    "event queue past soft limit, dropping low-priority events"
                );
            }
            return;
        }

        if self.tx.send(event).is_ok() {
            self.depth.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn depth_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.depth)
    }

    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }
}
