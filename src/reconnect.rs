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

//! Startup reconnection to the last used device.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bluetooth::{ConnectionManager, Device, DeviceDirectory};
use crate::storage::{KeyValueStore, LAST_DEVICE_KEY};

/// Result of a reconnection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectOutcome {
    NoSavedDevice,
    /// The saved device is no longer bonded.
    DeviceNotFound(String),
    Connected(Device),
    Failed { device_id: String, reason: String },
}

/// One-shot attempt to resume the previous session.
pub struct ReconnectPolicy {
    store: Arc<dyn KeyValueStore>,
    directory: DeviceDirectory,
    manager: Arc<ConnectionManager>,
}

impl ReconnectPolicy {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        directory: DeviceDirectory,
        manager: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            store,
            directory,
            manager,
        }
    }

    /// Make exactly one attempt. Failures are logged, never returned.
    pub async fn run(&self) -> ReconnectOutcome {
        let device_id = match self.store.get(LAST_DEVICE_KEY) {
            Ok(Some(id)) if !id.is_empty() => id,
            Ok(_) => {
                info!("No saved device, skipping reconnect");
                return ReconnectOutcome::NoSavedDevice;
            }
            Err(e) => {
                warn!("Failed to read saved device: {:#}", e);
                return ReconnectOutcome::NoSavedDevice;
            }
        };

        let device = match self.directory.find_bonded(&device_id).await {
            Ok(Some(device)) => device,
            Ok(None) => {
                warn!("Saved device {} is not bonded anymore", device_id);
                return ReconnectOutcome::DeviceNotFound(device_id);
            }
            Err(e) => {
                warn!("Failed to list bonded devices: {}", e);
                return ReconnectOutcome::Failed {
                    device_id,
                    reason: e.to_string(),
                };
            }
        };

        info!("Reconnecting to {}", device);
        match self.manager.connect(&device).await {
            Ok(()) => ReconnectOutcome::Connected(device),
            Err(e) => {
                warn!("Auto-reconnect to {} failed: {}", device, e);
                ReconnectOutcome::Failed {
                    device_id,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Run in the background so startup does not wait on the radio.
    pub fn spawn(self) -> JoinHandle<ReconnectOutcome> {
        tokio::spawn(async move { self.run().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::{ConnectionConfig, MemoryTransport};
    use crate::events::EventBus;
    use crate::state::ConnectionState;
    use crate::storage::MemoryStore;

    struct Fixture {
        transport: Arc<MemoryTransport>,
        store: Arc<MemoryStore>,
        manager: Arc<ConnectionManager>,
    }

    impl Fixture {
        fn new() -> Self {
            let transport = MemoryTransport::new();
            let manager = Arc::new(ConnectionManager::new(
                transport.clone(),
                EventBus::new(),
                ConnectionConfig::default(),
            ));
            Self {
                transport,
                store: Arc::new(MemoryStore::new()),
                manager,
            }
        }

        fn policy(&self) -> ReconnectPolicy {
            ReconnectPolicy::new(
                self.store.clone(),
                DeviceDirectory::new(self.transport.clone(), self.transport.clone()),
                self.manager.clone(),
            )
        }
    }

    #[tokio::test]
    async fn test_no_saved_device() {
        let fixture = Fixture::new();
        assert_eq!(fixture.policy().run().await, ReconnectOutcome::NoSavedDevice);
        assert_eq!(fixture.transport.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_saved_device_not_bonded() {
        let fixture = Fixture::new();
        fixture.store.set(LAST_DEVICE_KEY, "gone").unwrap();

        let outcome = fixture.policy().run().await;
        assert_eq!(outcome, ReconnectOutcome::DeviceNotFound("gone".to_string()));
        assert_eq!(fixture.manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnects_saved_device() {
        let fixture = Fixture::new();
        let bag = Device::new("bag", "bag").bonded();
        fixture.transport.set_bonded(vec![bag.clone()]);
        fixture.store.set(LAST_DEVICE_KEY, "bag").unwrap();

        let outcome = fixture.policy().spawn().await.unwrap();
        assert_eq!(outcome, ReconnectOutcome::Connected(bag));
        assert!(fixture.manager.is_connected());
    }

    #[tokio::test]
    async fn test_failure_is_reported_once() {
        let fixture = Fixture::new();
        fixture
            .transport
            .set_bonded(vec![Device::new("bag", "bag").bonded()]);
        fixture.transport.set_connect_error(Some("host is down"));
        fixture.store.set(LAST_DEVICE_KEY, "bag").unwrap();

        let outcome = fixture.policy().run().await;
        assert!(matches!(outcome, ReconnectOutcome::Failed { ref device_id, .. } if device_id == "bag"));
        assert_eq!(fixture.manager.state(), ConnectionState::Disconnected);
        // The saved device is kept for the next start.
        assert_eq!(fixture.store.get(LAST_DEVICE_KEY).unwrap().as_deref(), Some("bag"));
    }
}
