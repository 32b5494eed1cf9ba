//! Change notifications published by the measurement core.
//!
//! Every mutator of the core returns the [`VnaEvent`]s it caused; the application
//! root forwards them to an [`EventBus`]. Subscribers are an explicit, injected
//! list of handlers plus an optional `tokio::sync::broadcast` fan-out for async
//! consumers (plot and UI tasks). There is no global registry of listeners.
//!
//! Events only carry identity (trace id, marker id, calibration type). Consumers
//! re-query the store for the data they need.
//!
//! # Example
//!
//! ```
//! use rust_vna::events::{EventBus, VnaEvent};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let bus = EventBus::default();
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = seen.clone();
//! bus.subscribe(move |event| {
//!     if matches!(event, VnaEvent::CalibrationDisabled) {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!     }
//! });
//! bus.publish(VnaEvent::CalibrationDisabled);
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//! ```

use crate::calibration::{CalibrationMeasurement, CalibrationType};
use crate::data::markers::MarkerId;
use crate::data::trace::TraceId;
use crate::measurement_types::Sample;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default capacity of the broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A change notification.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum VnaEvent {
    /// A trace was registered.
    TraceAdded(TraceId),
    /// A trace was removed. Its markers were removed before this event.
    TraceRemoved(TraceId),
    /// A sample was inserted into or replaced in a trace.
    SampleAdded {
        /// Trace that changed
        trace: TraceId,
        /// The committed sample
        sample: Sample,
    },
    /// The sample sequence of a trace changed.
    TraceDataChanged(TraceId),
    /// A trace was emptied.
    TraceCleared(TraceId),
    /// Origin, parameter or live policy of a trace changed.
    TraceTypeChanged(TraceId),
    /// Trace renamed.
    TraceNameChanged(TraceId),
    /// Trace colour changed.
    TraceColorChanged(TraceId),
    /// Trace shown or hidden.
    TraceVisibilityChanged(TraceId),
    /// A marker was bound to a trace.
    MarkerAdded {
        /// New marker
        marker: MarkerId,
        /// Trace it is bound to
        trace: TraceId,
    },
    /// A marker was removed, either explicitly or because its trace went away.
    MarkerRemoved {
        /// Removed marker
        marker: MarkerId,
        /// Trace it was bound to
        trace: TraceId,
    },
    /// Marker moved or its trace data changed.
    MarkerDataChanged(MarkerId),
    /// Calibration became valid and is applied to incoming data.
    CalibrationApplied(CalibrationType),
    /// Calibration is no longer applied.
    CalibrationDisabled,
    /// The solver rejected the measured standards.
    CalibrationFailed {
        /// Human-readable reason
        reason: String,
    },
    /// All points of a calibration standard were acquired.
    CalibrationMeasurementComplete(CalibrationMeasurement),
    /// Sweep span changed (start, stop in Hz).
    SpanChanged {
        /// Start frequency in Hz
        start: f64,
        /// Stop frequency in Hz
        stop: f64,
    },
    /// Any sweep setting changed; averaging and live traces were reset.
    SweepSettingsChanged,
    /// The last point of a sweep was committed.
    SweepCompleted {
        /// Completed averaging sweeps (capped at target)
        averaging_level: u32,
        /// Requested number of averages
        averaging_target: u32,
    },
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&VnaEvent) + Send + Sync>;

/// Publish/subscribe hub owned by the application root.
pub struct EventBus {
    handlers: RwLock<Vec<(SubscriptionId, Handler)>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<VnaEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.read().len())
            .field("channel_receivers", &self.sender.receiver_count())
            .finish()
    }
}

impl EventBus {
    /// Create a bus whose broadcast channel buffers `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            sender,
        }
    }

    /// Register a synchronous handler. It runs on the publishing thread.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&VnaEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns false if the id was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(sid, _)| *sid != id);
        handlers.len() != before
    }

    /// Receiver for async consumers. Lagging receivers lose the oldest events.
    pub fn subscribe_channel(&self) -> broadcast::Receiver<VnaEvent> {
        self.sender.subscribe()
    }

    /// Number of registered synchronous handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Deliver one event to all handlers and channel receivers.
    pub fn publish(&self, event: VnaEvent) {
        // Clone the list so handlers may subscribe/unsubscribe re-entrantly.
        let handlers: Vec<Handler> = self.handlers.read().iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler(&event);
        }
        // No receivers is not an error.
        let _ = self.sender.send(event);
    }

    /// Deliver a batch of events in order.
    pub fn publish_all<I>(&self, events: I)
    where
        I: IntoIterator<Item = VnaEvent>,
    {
        for event in events {
            self.publish(event);
        }
    }
}
