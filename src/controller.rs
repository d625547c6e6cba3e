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

//! Application-level commands for the bag.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bluetooth::{Command, ConnectionManager, Device, DeviceDirectory};
use crate::error::{ConnectionError, TransportError};
use crate::storage::{KeyValueStore, LAST_DEVICE_KEY};

/// Default delay before the follow-up status request.
pub const DEFAULT_FOLLOW_UP_DELAY: Duration = Duration::from_millis(1000);

pub struct Controller {
    manager: Arc<ConnectionManager>,
    directory: DeviceDirectory,
    store: Arc<dyn KeyValueStore>,
    follow_up_delay: Duration,
}

impl Controller {
    pub fn new(
        manager: Arc<ConnectionManager>,
        directory: DeviceDirectory,
        store: Arc<dyn KeyValueStore>,
        follow_up_delay: Duration,
    ) -> Self {
        Self {
            manager,
            directory,
            store,
            follow_up_delay,
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub async fn devices(&self) -> Result<Vec<Device>, TransportError> {
        self.directory.list().await
    }

    pub async fn scan(&self) -> Result<Vec<Device>, TransportError> {
        self.directory.all().await
    }

    /// Connect by identifier, looking among bonded and discovered devices.
    pub async fn connect_id(&self, id: &str) -> Result<Device, ConnectionError> {
        let device = match self.directory.find_bonded(id).await? {
            Some(device) => device,
            None => self
                .directory
                .all()
                .await?
                .into_iter()
                .find(|d| d.id == id)
                .ok_or_else(|| ConnectionError::ConnectionFailed {
                    device: id.to_string(),
                    source: TransportError::Backend("device not found".to_string()),
                })?,
        };

        self.connect(&device).await?;
        Ok(device)
    }

    /// Connect, remember the device for the next start and request fresh
    /// telemetry.
    pub async fn connect(&self, device: &Device) -> Result<(), ConnectionError> {
        self.manager.connect(device).await?;

        if let Err(e) = self.store.set(LAST_DEVICE_KEY, &device.id) {
            warn!("Failed to remember device {}: {:#}", device.id, e);
        }
        self.refresh_after_connect().await;
        Ok(())
    }

    /// Request every telemetry value on a fresh connection. Failures are
    /// logged; the link itself reports loss through the bus.
    pub async fn refresh_after_connect(&self) {
        if let Err(e) = self.refresh_all().await {
            warn!("Initial refresh failed: {}", e);
        }
    }

    /// Disconnect and forget the device.
    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        let result = self.manager.disconnect().await;

        if let Err(e) = self.store.remove(LAST_DEVICE_KEY) {
            warn!("Failed to forget saved device: {:#}", e);
        }
        result
    }

    pub async fn open_umbrella(&self) -> Result<(), ConnectionError> {
        info!("Opening umbrella");
        self.manager.send(&Command::open_umbrella()).await?;
        self.follow_up(Command::get_status());
        Ok(())
    }

    pub async fn close_umbrella(&self) -> Result<(), ConnectionError> {
        info!("Closing umbrella");
        self.manager.send(&Command::close_umbrella()).await?;
        self.follow_up(Command::get_status());
        Ok(())
    }

    pub async fn request_battery(&self) -> Result<(), ConnectionError> {
        self.manager.send(&Command::get_battery()).await
    }

    pub async fn request_temperature(&self) -> Result<(), ConnectionError> {
        self.manager.send(&Command::get_temperature()).await
    }

    pub async fn request_status(&self) -> Result<(), ConnectionError> {
        self.manager.send(&Command::get_status()).await
    }

    pub async fn request_sms_number(&self) -> Result<(), ConnectionError> {
        self.manager.send(&Command::get_sms()).await
    }

    /// Validate and store the SMS number on the device.
    pub async fn set_sms_number(&self, number: &str) -> Result<(), ConnectionError> {
        let command = Command::set_sms(number)?;
        self.manager.send(&command).await?;
        self.follow_up(Command::get_sms());
        Ok(())
    }

    /// Request every telemetry value, stopping at the first error.
    pub async fn refresh_all(&self) -> Result<(), ConnectionError> {
        for command in [
            Command::get_battery(),
            Command::get_temperature(),
            Command::get_status(),
            Command::get_sms(),
        ] {
            self.manager.send(&command).await?;
        }
        Ok(())
    }

    /// Send a command after the follow-up delay, in the background.
    fn follow_up(&self, command: Command) {
        let manager = Arc::clone(&self.manager);
        let delay = self.follow_up_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = manager.send(&command).await {
                debug!("Follow-up {} not sent: {}", command, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::{ConnectionConfig, MemoryTransport};
    use crate::error::ProtocolError;
    use crate::events::EventBus;
    use crate::storage::MemoryStore;

    fn setup() -> (Arc<MemoryTransport>, Arc<MemoryStore>, Controller) {
        let transport = MemoryTransport::new();
        transport.set_bonded(vec![Device::new("bag", "bag").bonded()]);
        let store = Arc::new(MemoryStore::new());
        let manager = Arc::new(ConnectionManager::new(
            transport.clone(),
            EventBus::new(),
            ConnectionConfig::default(),
        ));
        let controller = Controller::new(
            manager,
            DeviceDirectory::new(transport.clone(), transport.clone()),
            store.clone(),
            Duration::from_millis(20),
        );
        (transport, store, controller)
    }

    #[tokio::test]
    async fn test_connect_remembers_and_disconnect_forgets() {
        let (_transport, store, controller) = setup();

        let device = controller.connect_id("bag").await.unwrap();
        assert_eq!(device.id, "bag");
        assert_eq!(store.get(LAST_DEVICE_KEY).unwrap().as_deref(), Some("bag"));

        controller.disconnect().await.unwrap();
        assert_eq!(store.get(LAST_DEVICE_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_connect_unknown_id() {
        let (transport, _store, controller) = setup();

        let result = controller.connect_id("nope").await;
        assert!(matches!(result, Err(ConnectionError::ConnectionFailed { .. })));
        assert_eq!(transport.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_umbrella_sends_follow_up_status() {
        let (transport, _store, controller) = setup();
        controller.connect_id("bag").await.unwrap();
        transport.take_written();

        controller.open_umbrella().await.unwrap();
        assert_eq!(transport.written(), b"UMBRELLA:OPEN\n".to_vec());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.written(), b"UMBRELLA:OPEN\nGET_STATUS:\n".to_vec());
    }

    #[tokio::test]
    async fn test_set_sms_number() {
        let (transport, _store, controller) = setup();
        controller.connect_id("bag").await.unwrap();
        transport.take_written();

        controller.set_sms_number("+1 555 0100 99").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            transport.written(),
            b"SET_SMS:+1555010099\nGET_SMS:\n".to_vec()
        );
    }

    #[tokio::test]
    async fn test_invalid_sms_number_is_not_sent() {
        let (transport, _store, controller) = setup();
        controller.connect_id("bag").await.unwrap();
        transport.take_written();

        let result = controller.set_sms_number("12").await;
        assert!(matches!(
            result,
            Err(ConnectionError::Protocol(ProtocolError::InvalidPhoneNumber(_)))
        ));
        assert!(transport.written().is_empty());
    }

    #[tokio::test]
    async fn test_connect_requests_telemetry() {
        let (transport, _store, controller) = setup();
        controller.connect_id("bag").await.unwrap();

        assert_eq!(
            transport.take_written(),
            b"GET_BATTERY:\nGET_TEMP:\nGET_STATUS:\nGET_SMS:\n".to_vec()
        );
    }

    #[tokio::test]
    async fn test_failed_initial_refresh_does_not_fail_connect() {
        let (transport, store, controller) = setup();
        transport.set_write_error(Some("broken pipe"));

        // The write failure drops the link but not the connect result.
        controller.connect_id("bag").await.unwrap();
        assert_eq!(store.get(LAST_DEVICE_KEY).unwrap().as_deref(), Some("bag"));
        assert!(!controller.manager().is_connected());
    }

    #[tokio::test]
    async fn test_refresh_all_order() {
        let (transport, _store, controller) = setup();
        controller.connect_id("bag").await.unwrap();
        transport.take_written();

        controller.refresh_all().await.unwrap();
        assert_eq!(
            transport.written(),
            b"GET_BATTERY:\nGET_TEMP:\nGET_STATUS:\nGET_SMS:\n".to_vec()
        );
    }

    #[tokio::test]
    async fn test_commands_require_connection() {
        let (_transport, _store, controller) = setup();

        assert!(matches!(
            controller.request_battery().await,
            Err(ConnectionError::NotConnected)
        ));
        assert!(matches!(
            controller.refresh_all().await,
            Err(ConnectionError::NotConnected)
        ));
    }
}
