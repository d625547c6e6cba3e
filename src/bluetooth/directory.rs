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

//! Bonded and discovered device listing.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::transport::{Device, DeviceEnumerator, Transport};
use crate::error::TransportError;

/// Read path over the devices known to the adapter.
#[derive(Clone)]
pub struct DeviceDirectory {
    transport: Arc<dyn Transport>,
    enumerator: Arc<dyn DeviceEnumerator>,
}

impl DeviceDirectory {
    pub fn new(transport: Arc<dyn Transport>, enumerator: Arc<dyn DeviceEnumerator>) -> Self {
        Self {
            transport,
            enumerator,
        }
    }

    async fn ensure_enabled(&self) -> Result<(), TransportError> {
        if !self.transport.is_enabled().await? {
            info!("Bluetooth is off, requesting enable");
            self.transport.request_enable().await?;
        }
        Ok(())
    }

    /// Bonded devices.
    pub async fn list(&self) -> Result<Vec<Device>, TransportError> {
        self.ensure_enabled().await?;
        let devices = dedup_by_id(self.enumerator.list_bonded().await?);
        debug!("{} bonded device(s)", devices.len());
        Ok(devices)
    }

    /// Run an active scan.
    pub async fn discover(&self) -> Result<Vec<Device>, TransportError> {
        self.ensure_enabled().await?;
        Ok(dedup_by_id(self.enumerator.discover().await?))
    }

    /// Bonded devices followed by newly discovered ones.
    pub async fn all(&self) -> Result<Vec<Device>, TransportError> {
        self.ensure_enabled().await?;
        let mut devices = self.enumerator.list_bonded().await?;
        devices.extend(self.enumerator.discover().await?);
        Ok(dedup_by_id(devices))
    }

    pub async fn find_bonded(&self, id: &str) -> Result<Option<Device>, TransportError> {
        Ok(self.list().await?.into_iter().find(|d| d.id == id))
    }
}

/// Keep the first device seen for each identifier.
fn dedup_by_id(devices: Vec<Device>) -> Vec<Device> {
    let mut seen = HashSet::new();
    devices
        .into_iter()
        .filter(|d| seen.insert(d.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::memory::MemoryTransport;

    fn directory(transport: &Arc<MemoryTransport>) -> DeviceDirectory {
        DeviceDirectory::new(transport.clone(), transport.clone())
    }

    #[tokio::test]
    async fn test_list_deduplicates_in_order() {
        let transport = MemoryTransport::new();
        transport.set_bonded(vec![
            Device::new("a", "a").with_name("first").bonded(),
            Device::new("b", "b").bonded(),
            Device::new("a", "a").with_name("second").bonded(),
        ]);

        let devices = directory(&transport).list().await.unwrap();
        let ids: Vec<&str> = devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(devices[0].name.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_all_prefers_bonded_entry() {
        let transport = MemoryTransport::new();
        transport.set_bonded(vec![Device::new("a", "a").bonded()]);
        transport.set_discovered(vec![Device::new("c", "c"), Device::new("a", "a")]);

        let devices = directory(&transport).all().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert!(devices[0].bonded);
        assert_eq!(devices[1].id, "c");
    }

    #[tokio::test]
    async fn test_enables_adapter_before_listing() {
        let transport = MemoryTransport::new();
        transport.set_enabled(false);

        directory(&transport).discover().await.unwrap();
        assert!(transport.is_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn test_find_bonded() {
        let transport = MemoryTransport::new();
        transport.set_bonded(vec![Device::new("bag", "bag").bonded()]);
        let directory = directory(&transport);

        assert!(directory.find_bonded("bag").await.unwrap().is_some());
        assert!(directory.find_bonded("other").await.unwrap().is_none());
    }
}
