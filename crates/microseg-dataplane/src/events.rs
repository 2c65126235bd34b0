//! Flow Event Reporter
//!
//! Bounded, lossy channel from the data plane to the control plane. A full
//! queue drops the new event; publishing never blocks.

use crate::{FilterError, FilterResult};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use microseg_common::{AtomicCounter, EventQueueFull, FlowEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Producer side, owned by the filter
pub struct EventReporter {
    sender: Sender<FlowEvent>,
    receiver: Receiver<FlowEvent>,
    published: AtomicCounter,
    dropped: AtomicCounter,
    under_pressure: AtomicBool,
}

impl EventReporter {
    /// Create reporter buffering up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            published: AtomicCounter::new(0),
            dropped: AtomicCounter::new(0),
            under_pressure: AtomicBool::new(false),
        }
    }

    /// Enqueue an event without blocking
    #[inline]
    pub fn publish(&self, event: FlowEvent) -> Result<(), EventQueueFull> {
        match self.sender.try_send(event) {
            Ok(()) => {
                self.published.inc();
                if self.under_pressure.load(Ordering::Relaxed) {
                    self.under_pressure.store(false, Ordering::Relaxed);
                }
                Ok(())
            }
            Err(_) => {
                self.dropped.inc();
                if !self.under_pressure.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        capacity = self.capacity(),
                        dropped = self.dropped.get(),
                        "flow event queue full, dropping events"
                    );
                }
                Err(EventQueueFull)
            }
        }
    }

    /// New consumer handle
    ///
    /// All handles share one queue; each event goes to exactly one of them.
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            receiver: self.receiver.clone(),
        }
    }

    /// Events accepted into the queue
    pub fn published(&self) -> u64 {
        self.published.get()
    }

    /// Events lost to a full queue
    pub fn dropped(&self) -> u64 {
        self.dropped.get()
    }

    /// Events waiting to be consumed
    pub fn pending(&self) -> usize {
        self.sender.len()
    }

    /// Queue depth
    pub fn capacity(&self) -> usize {
        self.sender.capacity().unwrap_or_default()
    }
}

/// Consumer side of the flow event queue
///
/// Ordered per producer, best-effort overall: consumers must tolerate gaps.
#[derive(Clone)]
pub struct EventStream {
    receiver: Receiver<FlowEvent>,
}

impl EventStream {
    /// Next event, if one is ready
    pub fn try_next(&self) -> Option<FlowEvent> {
        self.receiver.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event
    pub fn next_timeout(&self, timeout: Duration) -> Option<FlowEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Up to `max` ready events
    pub fn drain(&self, max: usize) -> Vec<FlowEvent> {
        self.receiver.try_iter().take(max).collect()
    }

    /// Log every event on a background thread
    ///
    /// The thread exits once the reporter is dropped and the queue is empty.
    pub fn spawn_logger(self) -> FilterResult<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("microseg-events".into())
            .spawn(move || {
                tracing::debug!("flow event logger starting");
                for event in self.receiver.iter() {
                    tracing::info!(
                        rule_id = event.rule_id,
                        packets = event.packets,
                        bytes = event.bytes,
                        event_type = ?event.event_type,
                        "flow event: {}",
                        event
                    );
                }
                tracing::debug!("flow event logger stopped");
            })
            .map_err(|e| FilterError::SpawnFailed(e.to_string()))
    }
}
