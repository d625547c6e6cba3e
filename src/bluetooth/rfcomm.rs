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

//! RFCOMM client transport over BlueZ.

use async_trait::async_trait;
use bluer::rfcomm::{SocketAddr, Stream};
use bluer::{Adapter, AdapterEvent, Address, Session};
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::transport::{Device, DeviceEnumerator, InboundStream, Transport};
use crate::error::TransportError;

/// Serial Port Profile service class.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805f9b34fb);

const READ_BUFFER_SIZE: usize = 1024;

struct Link {
    writer: bluer::rfcomm::stream::OwnedWriteHalf,
    reader_cancel: CancellationToken,
}

/// Transport connecting to a device's RFCOMM channel.
pub struct RfcommTransport {
    _session: Session,
    adapter: Adapter,
    channel: u8,
    discovery_timeout: Duration,
    link: tokio::sync::Mutex<Option<Link>>,
}

impl RfcommTransport {
    /// Open a BlueZ session on the default adapter.
    pub async fn new(channel: u8, discovery_timeout: Duration) -> Result<Self, TransportError> {
        let session = Session::new().await.map_err(TransportError::backend)?;
        info!("BlueZ session created");

        let adapter = session
            .default_adapter()
            .await
            .map_err(|_| TransportError::AdapterUnavailable)?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        Ok(Self {
            _session: session,
            adapter,
            channel,
            discovery_timeout,
            link: tokio::sync::Mutex::new(None),
        })
    }

    async fn describe(&self, addr: Address) -> Result<Device, TransportError> {
        let device = self.adapter.device(addr).map_err(TransportError::backend)?;
        let bonded = device.is_paired().await.map_err(TransportError::backend)?;
        let name = device.alias().await.ok();

        if let Ok(Some(uuids)) = device.uuids().await {
            if !uuids.contains(&SPP_UUID) {
                debug!("{} does not advertise the serial port profile", addr);
            }
        }

        let mut result = Device::new(addr.to_string(), addr.to_string());
        result.name = name;
        result.bonded = bonded;
        Ok(result)
    }
}

#[async_trait]
impl Transport for RfcommTransport {
    async fn is_enabled(&self) -> Result<bool, TransportError> {
        self.adapter.is_powered().await.map_err(TransportError::backend)
    }

    async fn request_enable(&self) -> Result<(), TransportError> {
        info!("Powering on Bluetooth adapter...");
        self.adapter
            .set_powered(true)
            .await
            .map_err(TransportError::backend)
    }

    async fn connect(&self, device: &Device) -> Result<InboundStream, TransportError> {
        let addr: Address = device
            .address
            .parse()
            .map_err(|e| TransportError::backend(format!("invalid address {}: {}", device.address, e)))?;

        let mut link = self.link.lock().await;
        if let Some(previous) = link.take() {
            previous.reader_cancel.cancel();
        }

        debug!("Opening RFCOMM channel {} on {}", self.channel, addr);
        let socket = Stream::connect(SocketAddr::new(addr, self.channel)).await?;
        let (reader, writer) = socket.into_split();

        let reader_cancel = CancellationToken::new();
        let stop = reader_cancel.clone();
        *link = Some(Link {
            writer,
            reader_cancel,
        });

        info!("RFCOMM link open to {}", device);

        let inbound = stream::unfold((reader, stop), |(mut reader, stop)| async move {
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            let read = tokio::select! {
                biased;
                _ = stop.cancelled() => return None,
                read = reader.read(&mut buf) => read,
            };

            match read {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(buf), (reader, stop)))
                }
                Err(e) => {
                    stop.cancel();
                    Some((Err(TransportError::Io(e)), (reader, stop)))
                }
            }
        });

        Ok(inbound.boxed())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(mut link) = self.link.lock().await.take() {
            link.reader_cancel.cancel();
            if let Err(e) = link.writer.shutdown().await {
                warn!("Error shutting down RFCOMM link: {}", e);
            }
            info!("RFCOMM link closed");
        }
        Ok(())
    }

    async fn write_bytes(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut link = self.link.lock().await;
        let link = link.as_mut().ok_or(TransportError::Closed)?;
        link.writer.write_all(bytes).await?;
        link.writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl DeviceEnumerator for RfcommTransport {
    async fn list_bonded(&self) -> Result<Vec<Device>, TransportError> {
        let mut devices = Vec::new();
        let addresses = self
            .adapter
            .device_addresses()
            .await
            .map_err(TransportError::backend)?;

        for addr in addresses {
            let device = self.describe(addr).await?;
            if device.bonded {
                devices.push(device);
            }
        }

        Ok(devices)
    }

    async fn discover(&self) -> Result<Vec<Device>, TransportError> {
        info!("Scanning for devices for {:?}...", self.discovery_timeout);
        let events = self
            .adapter
            .discover_devices()
            .await
            .map_err(TransportError::backend)?;
        futures::pin_mut!(events);

        let mut found = Vec::new();
        let deadline = tokio::time::sleep(self.discovery_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = events.next() => match event {
                    Some(AdapterEvent::DeviceAdded(addr)) => {
                        if !found.contains(&addr) {
                            found.push(addr);
                        }
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        }

        let mut devices = Vec::with_capacity(found.len());
        for addr in found {
            match self.describe(addr).await {
                Ok(device) => devices.push(device),
                Err(e) => debug!("Skipping {}: {}", addr, e),
            }
        }

        info!("Discovery finished, {} device(s) found", devices.len());
        Ok(devices)
    }
}
