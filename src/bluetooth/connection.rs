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

//! Connection lifecycle and the background receive loop.
//!
//! State machine:
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Connected
//!      ^                        |                  |
//!      +--------failure---------+----disconnect----+
//!                                    or link loss
//! ```
//!
//! Each connect attempt gets a new generation. The receive loop of a
//! generation only publishes while that generation is current and connected.

use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::framing::{LineFramer, DEFAULT_MAX_LINE_LENGTH};
use super::protocol::{self, Command};
use super::transport::{Device, InboundStream, Transport};
use crate::error::{ConnectionError, TransportError};
use crate::events::{BusEvent, ConnectionEvent, EventBus};
use crate::state::ConnectionState;

/// Default time allowed for the transport to open a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed for a single write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection manager settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub max_line_length: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

struct ReceiveLoop {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    active: Option<Device>,
    generation: u64,
    /// Cancels the in-flight connect attempt.
    pending: Option<CancellationToken>,
    receiver: Option<ReceiveLoop>,
    /// The link was lost and the transport has not been closed yet.
    needs_close: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    /// Serializes connect, disconnect and link teardown.
    lifecycle: tokio::sync::Mutex<()>,
    /// Single writer on the transport.
    writer: tokio::sync::Mutex<()>,
    bus: Arc<EventBus>,
    transport: Arc<dyn Transport>,
}

impl Shared {
    fn publish_state(&self, state: ConnectionState, device: Option<Device>) {
        self.bus
            .publish(ConnectionEvent::StateChanged { state, device }.into());
    }

    /// Publish on behalf of a receive loop. Returns `false` and drops the
    /// event if the generation is stale.
    ///
    /// The check runs under the bus delivery lock, so an event of an old
    /// generation is either delivered before the `Lost`/`StateChanged` events
    /// that end it, or not at all.
    fn publish_if_current(&self, generation: u64, event: BusEvent) -> bool {
        self.bus.publish_if(event, || {
            let inner = self.inner.lock();
            let current =
                inner.generation == generation && inner.state == ConnectionState::Connected;
            if !current {
                debug!(
                    "Discarding event from stale generation {} (current {})",
                    generation, inner.generation
                );
            }
            current
        })
    }

    /// Drive the state machine to `Disconnected` after a link failure.
    ///
    /// Returns `false` if the generation is no longer the connected one.
    fn connection_lost(self: &Arc<Self>, generation: u64, reason: String) -> bool {
        let (device, receiver) = {
            let mut inner = self.inner.lock();
            if inner.generation != generation || inner.state != ConnectionState::Connected {
                return false;
            }
            inner.state = ConnectionState::Disconnected;
            inner.needs_close = true;
            (inner.active.take(), inner.receiver.take())
        };

        // Detached: the loop may be the caller.
        if let Some(receiver) = receiver {
            receiver.cancel.cancel();
        }

        warn!("Connection lost (generation {}): {}", generation, reason);

        if let Some(device) = device {
            self.bus
                .publish(ConnectionEvent::Lost { device, reason }.into());
        }
        self.publish_state(ConnectionState::Disconnected, None);

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let _lifecycle = shared.lifecycle.lock().await;
            shared.close_stale_link().await;
        });

        true
    }

    /// Close a transport left open by a lost connection.
    async fn close_stale_link(&self) {
        let needs_close = std::mem::take(&mut self.inner.lock().needs_close);
        if needs_close {
            debug!("Closing transport of lost connection");
            if let Err(e) = self.transport.disconnect().await {
                warn!("Failed to close lost connection: {}", e);
            }
        }
    }
}

/// Owner of the single device connection.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    config: ConnectionConfig,
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new(transport: Arc<dyn Transport>, bus: Arc<EventBus>, config: ConnectionConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                lifecycle: tokio::sync::Mutex::new(()),
                writer: tokio::sync::Mutex::new(()),
                bus,
                transport,
            }),
            config,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    pub fn active_device(&self) -> Option<Device> {
        self.shared.inner.lock().active.clone()
    }

    /// State and active device, read atomically.
    pub fn status(&self) -> (ConnectionState, Option<Device>) {
        let inner = self.shared.inner.lock();
        (inner.state, inner.active.clone())
    }

    /// Number of connect attempts so far.
    pub fn generation(&self) -> u64 {
        self.shared.inner.lock().generation
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.shared.bus
    }

    /// Connect to a device.
    ///
    /// Reconnects if the same device is already connected; fails with
    /// `AlreadyConnected` if a different one is.
    pub async fn connect(&self, device: &Device) -> Result<(), ConnectionError> {
        let _lifecycle = self.shared.lifecycle.lock().await;

        let reconnect = {
            let inner = self.shared.inner.lock();
            match (&inner.state, &inner.active) {
                (ConnectionState::Connected, Some(active)) if active.id == device.id => true,
                (ConnectionState::Connected, Some(active)) => {
                    return Err(ConnectionError::AlreadyConnected {
                        active: active.id.clone(),
                    });
                }
                _ => false,
            }
        };

        if reconnect {
            info!("Already connected to {}, reconnecting", device);
            if let Err(e) = self.disconnect_locked().await {
                warn!("Error closing previous connection: {}", e);
            }
        }

        self.shared.close_stale_link().await;

        let cancel = CancellationToken::new();
        let generation = {
            let mut inner = self.shared.inner.lock();
            inner.generation += 1;
            inner.state = ConnectionState::Connecting;
            inner.active = Some(device.clone());
            inner.pending = Some(cancel.clone());
            inner.generation
        };
        self.shared
            .publish_state(ConnectionState::Connecting, Some(device.clone()));

        info!("Connecting to {} (generation {})...", device, generation);

        let timeout = self.config.connect_timeout;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ConnectionError::ConnectCancelled {
                device: device.id.clone(),
            }),
            opened = tokio::time::timeout(timeout, self.shared.transport.connect(device)) => {
                match opened {
                    Ok(Ok(stream)) => Ok(stream),
                    Ok(Err(source)) => Err(ConnectionError::ConnectionFailed {
                        device: device.id.clone(),
                        source,
                    }),
                    Err(_) => Err(ConnectionError::ConnectionFailed {
                        device: device.id.clone(),
                        source: TransportError::Timeout(timeout),
                    }),
                }
            }
        };

        let started = match result {
            Ok(stream) => self.start_receiving(device, generation, &cancel, stream),
            Err(e) => Err(e),
        };

        let start = match started {
            Ok(start) => start,
            Err(e) => {
                warn!("Connection to {} failed: {}", device, e);
                {
                    let mut inner = self.shared.inner.lock();
                    inner.pending = None;
                    inner.state = ConnectionState::Disconnected;
                    inner.active = None;
                }
                if let Err(close_err) = self.shared.transport.disconnect().await {
                    debug!("Failed to tear down partial connection: {}", close_err);
                }
                self.shared.publish_state(ConnectionState::Disconnected, None);
                return Err(e);
            }
        };

        info!("Connected to {}", device);
        self.shared
            .publish_state(ConnectionState::Connected, Some(device.clone()));
        // The loop reads only after `Connected` is out, so its events and a
        // possible `Lost` follow it.
        let _ = start.send(());
        Ok(())
    }

    /// Spawn the receive loop and enter `Connected`, unless the attempt was
    /// cancelled while the transport was opening.
    ///
    /// The loop waits for the returned start signal before reading.
    fn start_receiving(
        &self,
        device: &Device,
        generation: u64,
        cancel: &CancellationToken,
        stream: InboundStream,
    ) -> Result<oneshot::Sender<()>, ConnectionError> {
        let mut inner = self.shared.inner.lock();
        if cancel.is_cancelled() || inner.generation != generation {
            return Err(ConnectionError::ConnectCancelled {
                device: device.id.clone(),
            });
        }

        let (start, started) = oneshot::channel();
        let loop_cancel = CancellationToken::new();
        let handle = tokio::spawn(receive_loop(
            Arc::clone(&self.shared),
            generation,
            stream,
            started,
            loop_cancel.clone(),
            self.config.max_line_length,
        ));

        inner.pending = None;
        inner.receiver = Some(ReceiveLoop {
            generation,
            cancel: loop_cancel,
            handle,
        });
        inner.state = ConnectionState::Connected;
        Ok(start)
    }

    /// Disconnect from the current device. A no-op when already disconnected.
    ///
    /// Cancels an in-flight connect attempt.
    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        if let Some(pending) = &self.shared.inner.lock().pending {
            pending.cancel();
        }

        let _lifecycle = self.shared.lifecycle.lock().await;
        self.disconnect_locked().await
    }

    async fn disconnect_locked(&self) -> Result<(), ConnectionError> {
        let (previous, receiver, close_link) = {
            let mut inner = self.shared.inner.lock();
            if inner.state == ConnectionState::Disconnected
                && inner.receiver.is_none()
                && !inner.needs_close
            {
                return Ok(());
            }

            let previous = inner.state;
            inner.state = ConnectionState::Disconnected;
            inner.active = None;
            inner.pending = None;
            let close_link =
                std::mem::take(&mut inner.needs_close) || previous != ConnectionState::Disconnected;
            (previous, inner.receiver.take(), close_link)
        };

        if let Some(receiver) = receiver {
            debug!("Stopping receive loop (generation {})", receiver.generation);
            receiver.cancel.cancel();
            if let Err(e) = receiver.handle.await {
                error!("Receive loop task failed: {}", e);
            }
        }

        let closed = if close_link {
            self.shared.transport.disconnect().await
        } else {
            Ok(())
        };

        if previous != ConnectionState::Disconnected {
            info!("Disconnected from device");
            self.shared.publish_state(ConnectionState::Disconnected, None);
        }

        closed.map_err(ConnectionError::from)
    }

    /// Encode and write a command.
    ///
    /// Writes are serialized; there is no reply correlation, replies arrive
    /// as telemetry on the event bus.
    pub async fn send(&self, command: &Command) -> Result<(), ConnectionError> {
        let generation = {
            let inner = self.shared.inner.lock();
            if inner.state != ConnectionState::Connected {
                return Err(ConnectionError::NotConnected);
            }
            inner.generation
        };

        let bytes = protocol::encode(command)?;

        let _writer = self.shared.writer.lock().await;

        {
            let inner = self.shared.inner.lock();
            if inner.generation != generation || inner.state != ConnectionState::Connected {
                return Err(ConnectionError::NotConnected);
            }
        }

        let timeout = self.config.write_timeout;
        let write = self.shared.transport.write_bytes(&bytes);
        let written = match tokio::time::timeout(timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        };

        match written {
            Ok(()) => {
                debug!("Sent command: {}", command);
                Ok(())
            }
            Err(e) => {
                error!("Send command error: {}", e);
                self.shared.connection_lost(generation, format!("write failed: {}", e));
                Err(ConnectionError::Transport(e))
            }
        }
    }
}

async fn receive_loop(
    shared: Arc<Shared>,
    generation: u64,
    mut stream: InboundStream,
    started: oneshot::Receiver<()>,
    cancel: CancellationToken,
    max_line_length: usize,
) {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        signal = started => {
            if signal.is_err() {
                debug!("Receive loop abandoned before start (generation {})", generation);
                return;
            }
        }
    }

    debug!("Receive loop started (generation {})", generation);
    let mut framer = LineFramer::new(max_line_length);

    let reason = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Receive loop cancelled (generation {})", generation);
                return;
            }
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    for line in framer.process_chunk(&bytes) {
                        debug!("Received: {}", line);
                        let event = protocol::decode(&line);
                        if !shared.publish_if_current(generation, event.into()) {
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    error!("Read error: {}", e);
                    break e.to_string();
                }
                None => {
                    info!("Connection closed by remote");
                    break "connection closed by remote".to_string();
                }
            }
        }
    };

    shared.connection_lost(generation, reason);
}
