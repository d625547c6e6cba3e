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

//! In-memory transport.
//!
//! Records the exact bytes written to the wire and lets the owner inject
//! inbound data, failures and delays. Backs the simulator backend.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::transport::{Device, DeviceEnumerator, InboundStream, Transport};
use crate::error::TransportError;

type InboundSender = mpsc::UnboundedSender<Result<Vec<u8>, TransportError>>;

#[derive(Default)]
struct MemoryInner {
    inbound: Option<InboundSender>,
    connected: Option<Device>,
    connect_error: Option<String>,
    connect_delay: Duration,
    write_error: Option<String>,
    write_delay: Duration,
    connect_count: usize,
    disconnect_count: usize,
    bonded: Vec<Device>,
    discovered: Vec<Device>,
}

/// Transport that keeps everything in memory.
pub struct MemoryTransport {
    inner: Mutex<MemoryInner>,
    wire: Mutex<Vec<u8>>,
    outbound: Mutex<Option<async_channel::Sender<Vec<u8>>>>,
    enabled: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_bonded(&self, devices: Vec<Device>) {
        self.inner.lock().bonded = devices;
    }

    pub fn set_discovered(&self, devices: Vec<Device>) {
        self.inner.lock().discovered = devices;
    }

    /// Make every subsequent connect fail with this reason.
    pub fn set_connect_error(&self, reason: Option<&str>) {
        self.inner.lock().connect_error = reason.map(str::to_string);
    }

    /// Delay every subsequent connect.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.inner.lock().connect_delay = delay;
    }

    /// Make every subsequent write fail with this reason.
    pub fn set_write_error(&self, reason: Option<&str>) {
        self.inner.lock().write_error = reason.map(str::to_string);
    }

    /// Stall every subsequent write before any byte reaches the wire.
    pub fn set_write_delay(&self, delay: Duration) {
        self.inner.lock().write_delay = delay;
    }

    /// Deliver bytes on the open connection. Returns `false` if not connected.
    pub fn push_inbound(&self, bytes: &[u8]) -> bool {
        match &self.inner.lock().inbound {
            Some(tx) => tx.unbounded_send(Ok(bytes.to_vec())).is_ok(),
            None => false,
        }
    }

    /// Fail the inbound stream of the open connection.
    pub fn fail_inbound(&self, reason: &str) -> bool {
        match &self.inner.lock().inbound {
            Some(tx) => tx
                .unbounded_send(Err(TransportError::Backend(reason.to_string())))
                .is_ok(),
            None => false,
        }
    }

    /// End the inbound stream, as if the remote closed the link.
    pub fn close_inbound(&self) {
        self.inner.lock().inbound = None;
    }

    /// Every byte written so far, in wire order.
    pub fn written(&self) -> Vec<u8> {
        self.wire.lock().clone()
    }

    /// Every byte written so far, clearing the record.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut *self.wire.lock())
    }

    /// Receive a copy of each completed write.
    pub fn outbound(&self) -> async_channel::Receiver<Vec<u8>> {
        let (tx, rx) = async_channel::unbounded();
        *self.outbound.lock() = Some(tx);
        rx
    }

    pub fn connect_count(&self) -> usize {
        self.inner.lock().connect_count
    }

    pub fn disconnect_count(&self) -> usize {
        self.inner.lock().disconnect_count
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            wire: Mutex::new(Vec::new()),
            outbound: Mutex::new(None),
            enabled: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn is_enabled(&self) -> Result<bool, TransportError> {
        Ok(self.enabled.load(Ordering::SeqCst))
    }

    async fn request_enable(&self) -> Result<(), TransportError> {
        self.set_enabled(true);
        Ok(())
    }

    async fn connect(&self, device: &Device) -> Result<InboundStream, TransportError> {
        if !self.enabled.load(Ordering::SeqCst) {
            return Err(TransportError::AdapterUnavailable);
        }

        let delay = self.inner.lock().connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock();
        if let Some(reason) = &inner.connect_error {
            return Err(TransportError::Backend(reason.clone()));
        }

        let (tx, rx) = mpsc::unbounded();
        inner.inbound = Some(tx);
        inner.connected = Some(device.clone());
        inner.connect_count += 1;
        debug!("Memory transport connected to {}", device);

        Ok(rx.boxed())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        inner.inbound = None;
        inner.connected = None;
        inner.disconnect_count += 1;
        Ok(())
    }

    async fn write_bytes(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let delay = {
            let inner = self.inner.lock();
            if inner.connected.is_none() {
                return Err(TransportError::Closed);
            }
            if let Some(reason) = &inner.write_error {
                return Err(TransportError::Backend(reason.clone()));
            }
            inner.write_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        // One byte at a time, yielding in between, like a slow serial link.
        for &byte in bytes {
            self.wire.lock().push(byte);
            tokio::task::yield_now().await;
        }

        if let Some(tx) = &*self.outbound.lock() {
            let _ = tx.try_send(bytes.to_vec());
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceEnumerator for MemoryTransport {
    async fn list_bonded(&self) -> Result<Vec<Device>, TransportError> {
        Ok(self.inner.lock().bonded.clone())
    }

    async fn discover(&self) -> Result<Vec<Device>, TransportError> {
        Ok(self.inner.lock().discovered.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_requires_connection() {
        let transport = MemoryTransport::new();
        let result = transport.write_bytes(b"GET_BATTERY:\n").await;
        assert!(matches!(result, Err(TransportError::Closed)));
        assert!(transport.written().is_empty());
    }

    #[tokio::test]
    async fn test_inbound_stream_ends_on_close() {
        let transport = MemoryTransport::new();
        let mut stream = transport.connect(&Device::new("bag", "bag")).await.unwrap();

        assert!(transport.push_inbound(b"BATTERY:85\n"));
        assert_eq!(stream.next().await.unwrap().unwrap(), b"BATTERY:85\n".to_vec());

        transport.close_inbound();
        assert!(stream.next().await.is_none());
        assert!(!transport.push_inbound(b"late"));
    }

    #[tokio::test]
    async fn test_disabled_adapter() {
        let transport = MemoryTransport::new();
        transport.set_enabled(false);

        let result = transport.connect(&Device::new("bag", "bag")).await;
        assert!(matches!(result, Err(TransportError::AdapterUnavailable)));

        transport.request_enable().await.unwrap();
        assert!(transport.is_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn test_outbound_tap() {
        let transport = MemoryTransport::new();
        let rx = transport.outbound();
        let _stream = transport.connect(&Device::new("bag", "bag")).await.unwrap();

        transport.write_bytes(b"GET_TEMP:\n").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"GET_TEMP:\n".to_vec());
        assert_eq!(transport.take_written(), b"GET_TEMP:\n".to_vec());
        assert!(transport.written().is_empty());
    }

    #[tokio::test]
    async fn test_write_delay_stalls_before_wire() {
        let transport = MemoryTransport::new();
        let _stream = transport.connect(&Device::new("bag", "bag")).await.unwrap();
        transport.set_write_delay(Duration::from_millis(200));

        let result = tokio::time::timeout(
            Duration::from_millis(20),
            transport.write_bytes(b"GET_STATUS:\n"),
        )
        .await;
        assert!(result.is_err());
        assert!(transport.written().is_empty());
    }
}
