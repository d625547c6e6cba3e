// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Event bus: fan-out of decoded telemetry and connection changes.
//!
//! Delivery is synchronous with [`EventBus::publish`]. Handlers must return
//! promptly; consumers doing longer work should use
//! [`EventBus::subscribe_channel`] and process events on their own task.

use anyhow::Result;
use parking_lot::{Mutex, ReentrantMutex};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::bluetooth::{Device, TelemetryEvent};
use crate::state::ConnectionState;

/// Subscription topics. Every [`BusEvent`] belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Battery,
    Temperature,
    Status,
    Umbrella,
    Sms,
    Unrecognized,
    Connection,
}

impl Topic {
    pub const ALL: [Topic; 7] = [
        Topic::Battery,
        Topic::Temperature,
        Topic::Status,
        Topic::Umbrella,
        Topic::Sms,
        Topic::Unrecognized,
        Topic::Connection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Battery => "battery",
            Topic::Temperature => "temperature",
            Topic::Status => "status",
            Topic::Umbrella => "umbrella",
            Topic::Sms => "sms",
            Topic::Unrecognized => "unrecognized",
            Topic::Connection => "connection",
        }
    }
}

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The connection state machine moved to a new state.
    StateChanged {
        state: ConnectionState,
        device: Option<Device>,
    },
    /// The link failed or was closed by the remote.
    Lost { device: Device, reason: String },
}

/// Everything carried by the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Telemetry(TelemetryEvent),
    Connection(ConnectionEvent),
}

impl BusEvent {
    pub fn topic(&self) -> Topic {
        match self {
            BusEvent::Telemetry(TelemetryEvent::BatteryLevel(_)) => Topic::Battery,
            BusEvent::Telemetry(TelemetryEvent::Temperature(_)) => Topic::Temperature,
            BusEvent::Telemetry(TelemetryEvent::Status(_)) => Topic::Status,
            BusEvent::Telemetry(TelemetryEvent::UmbrellaStatus(_)) => Topic::Umbrella,
            BusEvent::Telemetry(TelemetryEvent::SmsNumber(_)) => Topic::Sms,
            BusEvent::Telemetry(TelemetryEvent::RawUnrecognized(_)) => Topic::Unrecognized,
            BusEvent::Connection(_) => Topic::Connection,
        }
    }
}

impl From<TelemetryEvent> for BusEvent {
    fn from(event: TelemetryEvent) -> Self {
        BusEvent::Telemetry(event)
    }
}

impl From<ConnectionEvent> for BusEvent {
    fn from(event: ConnectionEvent) -> Self {
        BusEvent::Connection(event)
    }
}

/// Event handler. An `Err` or a panic is logged and does not affect other
/// subscribers.
pub type Handler = Arc<dyn Fn(&BusEvent) -> Result<()> + Send + Sync>;

/// Identifies a subscription for [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    topic: Topic,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

struct Subscriber {
    handle: SubscriptionHandle,
    handler: Handler,
    active: AtomicBool,
}

/// Publish/subscribe fan-out.
pub struct EventBus {
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
    // Held for the whole of a delivery and by unsubscribe, so removal waits
    // for in-flight deliveries. Reentrant so handlers may (un)subscribe.
    delivery: ReentrantMutex<()>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a handler for a topic. Handlers of the same topic run in
    /// subscription order.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionHandle
    where
        F: Fn(&BusEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.subscribe_arc(topic, Arc::new(handler))
    }

    fn subscribe_arc(&self, topic: Topic, handler: Handler) -> SubscriptionHandle {
        let handle = SubscriptionHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            topic,
        };

        self.subscribers.lock().push(Arc::new(Subscriber {
            handle,
            handler,
            active: AtomicBool::new(true),
        }));

        debug!("Subscribed #{} to {}", handle.id, topic.as_str());
        handle
    }

    /// Register one handler for every topic.
    pub fn subscribe_all<F>(&self, handler: F) -> Vec<SubscriptionHandle>
    where
        F: Fn(&BusEvent) -> Result<()> + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        Topic::ALL
            .iter()
            .map(|topic| self.subscribe_arc(*topic, handler.clone()))
            .collect()
    }

    /// Forward events of a topic into a bounded channel.
    ///
    /// When the channel is full the event is dropped, so a slow consumer
    /// never stalls the publisher.
    pub fn subscribe_channel(
        &self,
        topic: Topic,
        capacity: usize,
    ) -> (SubscriptionHandle, async_channel::Receiver<BusEvent>) {
        let (tx, rx) = async_channel::bounded(capacity.max(1));

        let handle = self.subscribe(topic, move |event| {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(async_channel::TrySendError::Full(_)) => {
                    warn!("Subscriber channel for {} is full, dropping event", topic.as_str());
                }
                Err(async_channel::TrySendError::Closed(_)) => {
                    debug!("Subscriber channel for {} is closed", topic.as_str());
                }
            }
            Ok(())
        });

        (handle, rx)
    }

    /// Remove a subscription. Once this returns the handler is never invoked
    /// again. Returns `false` if the handle was already removed.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let _delivery = self.delivery.lock();

        let removed = {
            let mut subscribers = self.subscribers.lock();
            subscribers
                .iter()
                .position(|s| s.handle == handle)
                .map(|pos| subscribers.remove(pos))
        };

        match removed {
            Some(subscriber) => {
                subscriber.active.store(false, Ordering::Release);
                debug!("Unsubscribed #{} from {}", handle.id, handle.topic.as_str());
                true
            }
            None => false,
        }
    }

    /// Deliver an event to every current subscriber of its topic.
    pub fn publish(&self, event: BusEvent) {
        self.publish_if(event, || true);
    }

    /// Deliver an event only if `condition` holds.
    ///
    /// The condition is evaluated under the delivery lock, so nothing else
    /// is delivered between the check and this delivery. Returns whether the
    /// event was delivered.
    pub fn publish_if<C>(&self, event: BusEvent, condition: C) -> bool
    where
        C: FnOnce() -> bool,
    {
        let topic = event.topic();
        let _delivery = self.delivery.lock();

        if !condition() {
            return false;
        }

        let targets: Vec<Arc<Subscriber>> = self
            .subscribers
            .lock()
            .iter()
            .filter(|s| s.handle.topic == topic)
            .cloned()
            .collect();

        for subscriber in targets {
            // May have been removed by an earlier handler of this delivery.
            if !subscriber.active.load(Ordering::Acquire) {
                continue;
            }

            match catch_unwind(AssertUnwindSafe(|| (subscriber.handler)(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        "Subscriber #{} failed handling {} event: {}",
                        subscriber.handle.id,
                        topic.as_str(),
                        e
                    );
                }
                Err(panic) => {
                    error!(
                        "Subscriber #{} panicked handling {} event: {}",
                        subscriber.handle.id,
                        topic.as_str(),
                        panic_message(panic.as_ref())
                    );
                }
            }
        }

        true
    }

    /// Number of subscribers for a topic.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .lock()
            .iter()
            .filter(|s| s.handle.topic == topic)
            .count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            delivery: ReentrantMutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "???".to_string()
    }
}
