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

//! Bluetooth communication module.
//!
//! Line protocol, connection lifecycle and the transports it runs over.

mod connection;
mod directory;
mod framing;
mod memory;
mod protocol;
#[cfg(feature = "bluez")]
mod rfcomm;
mod simulator;
mod transport;

pub use connection::{
    ConnectionConfig, ConnectionManager, DEFAULT_CONNECT_TIMEOUT, DEFAULT_WRITE_TIMEOUT,
};
pub use directory::DeviceDirectory;
pub use framing::{LineFramer, DEFAULT_MAX_LINE_LENGTH};
pub use memory::MemoryTransport;
pub use protocol::{
    decode, encode, normalize_phone_number, Command, CommandName, TelemetryEvent, UmbrellaState,
    FIELD_SEPARATOR, LINE_DELIMITER,
};
#[cfg(feature = "bluez")]
pub use rfcomm::{RfcommTransport, SPP_UUID};
pub use simulator::{SimulatedBag, SIMULATED_DEVICE_ID};
pub use transport::{Device, DeviceEnumerator, InboundStream, Transport};

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::config::{Backend, Config};

/// The transport selected for this run.
pub struct TransportBackend {
    pub name: &'static str,
    pub transport: Arc<dyn Transport>,
    pub enumerator: Arc<dyn DeviceEnumerator>,
    /// Present when running against the simulated device.
    pub simulator: Option<SimulatedBag>,
}

impl TransportBackend {
    /// A simulated bag on an in-memory link.
    pub fn simulated() -> Self {
        let transport = MemoryTransport::new();
        let simulator = SimulatedBag::new(transport.clone());
        Self {
            name: "simulator",
            transport: transport.clone(),
            enumerator: transport,
            simulator: Some(simulator),
        }
    }

    #[cfg(feature = "bluez")]
    async fn rfcomm(config: &Config) -> Result<Self> {
        let transport = Arc::new(
            RfcommTransport::new(config.bluetooth.rfcomm_channel, config.discovery_timeout()).await?,
        );
        Ok(Self {
            name: "rfcomm",
            transport: transport.clone(),
            enumerator: transport,
            simulator: None,
        })
    }
}

/// Create the transport backend chosen in the configuration.
///
/// - "auto": RFCOMM if compiled in and an adapter is present, else simulator
/// - "rfcomm": BlueZ RFCOMM, fails without the `bluez` feature
/// - "simulator": in-memory simulated device
pub async fn create_backend(config: &Config) -> Result<TransportBackend> {
    let backend = match config.bluetooth.backend {
        Backend::Simulator => TransportBackend::simulated(),
        Backend::Rfcomm => {
            #[cfg(feature = "bluez")]
            {
                TransportBackend::rfcomm(config).await?
            }
            #[cfg(not(feature = "bluez"))]
            {
                anyhow::bail!("RFCOMM support not compiled in (enable the `bluez` feature)")
            }
        }
        Backend::Auto => {
            #[cfg(feature = "bluez")]
            {
                match TransportBackend::rfcomm(config).await {
                    Ok(backend) => backend,
                    Err(e) => {
                        tracing::warn!("RFCOMM unavailable ({}), using simulator", e);
                        TransportBackend::simulated()
                    }
                }
            }
            #[cfg(not(feature = "bluez"))]
            {
                info!("Using simulator (no RFCOMM support)");
                TransportBackend::simulated()
            }
        }
    };

    info!("Transport backend: {}", backend.name);
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulator_backend() {
        let mut config = Config::default();
        config.bluetooth.backend = Backend::Simulator;

        let backend = create_backend(&config).await.unwrap();
        assert_eq!(backend.name, "simulator");
        assert!(backend.simulator.is_some());

        let bonded = backend.enumerator.list_bonded().await.unwrap();
        assert_eq!(bonded, vec![SimulatedBag::device()]);
    }
}
