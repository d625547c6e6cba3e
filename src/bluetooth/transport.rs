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

//! Transport abstraction over the serial-profile link.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TransportError;

/// Inbound bytes of one connection. Ends when the remote closes the link.
pub type InboundStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// A bonded or discovered Bluetooth device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    /// Stable identifier across sessions.
    pub id: String,
    /// Display name, if the device reported one.
    pub name: Option<String>,
    /// Hardware address.
    pub address: String,
    /// Paired at the operating-system level.
    pub bonded: bool,
}

impl Device {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            address: address.into(),
            bonded: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn bonded(mut self) -> Self {
        self.bonded = true;
        self
    }

    /// Name for display, falling back to the address.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.id)
    }
}

/// The raw link to a device.
///
/// Implementations hold at most one open connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether the adapter is powered and usable.
    async fn is_enabled(&self) -> Result<bool, TransportError>;

    /// Ask the platform to enable the adapter.
    async fn request_enable(&self) -> Result<(), TransportError>;

    /// Open a connection and return its inbound byte stream.
    async fn connect(&self, device: &Device) -> Result<InboundStream, TransportError>;

    /// Close the current connection. Closing an already closed link succeeds.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Write bytes to the current connection.
    async fn write_bytes(&self, bytes: &[u8]) -> Result<(), TransportError>;
}

/// Bonded device listing and active discovery.
#[async_trait]
pub trait DeviceEnumerator: Send + Sync {
    async fn list_bonded(&self) -> Result<Vec<Device>, TransportError>;

    async fn discover(&self) -> Result<Vec<Device>, TransportError>;
}
