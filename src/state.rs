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

//! Application state management.

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::bluetooth::{Device, TelemetryEvent, UmbrellaState};
use crate::events::{BusEvent, ConnectionEvent, EventBus, SubscriptionHandle};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Connected => "Connected",
        }
    }

    /// Whether an active device must be present in this state.
    pub fn has_device(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

/// Latest known values, fed from the event bus.
#[derive(Debug, Default)]
pub struct AppState {
    /// Current connection state.
    pub connection_state: RwLock<ConnectionState>,

    /// Device of the current session.
    pub device: RwLock<Option<Device>>,

    pub battery_level: RwLock<Option<u8>>,

    pub temperature: RwLock<Option<f64>>,

    /// Umbrella position; assumed closed until the device reports.
    pub umbrella: RwLock<UmbrellaState>,

    pub sms_number: RwLock<Option<String>>,

    pub status: RwLock<Option<String>>,

    /// Last line the decoder did not recognize.
    pub last_unrecognized: RwLock<Option<String>>,

    /// Reason of the last lost connection.
    pub last_error: RwLock<Option<String>>,

    /// When telemetry was last received.
    pub last_update: RwLock<Option<DateTime<Local>>>,
}

impl AppState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribe to every topic of the bus.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Vec<SubscriptionHandle> {
        let state = Arc::clone(self);
        bus.subscribe_all(move |event| {
            state.apply(event);
            Ok(())
        })
    }

    /// Fold an event into the snapshot.
    pub fn apply(&self, event: &BusEvent) {
        match event {
            BusEvent::Telemetry(telemetry) => {
                match telemetry {
                    TelemetryEvent::BatteryLevel(level) => *self.battery_level.write() = Some(*level),
                    TelemetryEvent::Temperature(celsius) => *self.temperature.write() = Some(*celsius),
                    TelemetryEvent::Status(status) => *self.status.write() = Some(status.clone()),
                    TelemetryEvent::UmbrellaStatus(umbrella) => *self.umbrella.write() = *umbrella,
                    TelemetryEvent::SmsNumber(number) => *self.sms_number.write() = Some(number.clone()),
                    TelemetryEvent::RawUnrecognized(line) => {
                        *self.last_unrecognized.write() = Some(line.clone())
                    }
                }
                *self.last_update.write() = Some(Local::now());
            }
            BusEvent::Connection(ConnectionEvent::StateChanged { state, device }) => {
                *self.connection_state.write() = *state;
                *self.device.write() = device.clone();
                if *state == ConnectionState::Connected {
                    *self.last_error.write() = None;
                }
            }
            BusEvent::Connection(ConnectionEvent::Lost { reason, .. }) => {
                *self.last_error.write() = Some(reason.clone());
            }
        }
    }

    pub fn get_state(&self) -> ConnectionState {
        *self.connection_state.read()
    }

    pub fn get_device(&self) -> Option<Device> {
        self.device.read().clone()
    }

    pub fn get_battery_level(&self) -> Option<u8> {
        *self.battery_level.read()
    }

    pub fn get_temperature(&self) -> Option<f64> {
        *self.temperature.read()
    }

    pub fn get_umbrella(&self) -> UmbrellaState {
        *self.umbrella.read()
    }

    pub fn get_sms_number(&self) -> Option<String> {
        self.sms_number.read().clone()
    }

    pub fn get_status(&self) -> Option<String> {
        self.status.read().clone()
    }

    /// One-line human readable summary.
    pub fn summary(&self) -> String {
        let device = self
            .get_device()
            .map(|d| d.display_name().to_string())
            .unwrap_or_else(|| "-".to_string());
        let battery = self
            .get_battery_level()
            .map(|b| format!("{}%", b))
            .unwrap_or_else(|| "-".to_string());
        let temperature = self
            .get_temperature()
            .map(|t| format!("{:.1}°C", t))
            .unwrap_or_else(|| "-".to_string());
        let umbrella = match self.get_umbrella() {
            UmbrellaState::Open => "open",
            UmbrellaState::Closed => "closed",
        };
        let sms = self.get_sms_number().unwrap_or_else(|| "-".to_string());
        let updated = (*self.last_update.read())
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());

        format!(
            "{} [{}] battery={} temp={} umbrella={} sms={} updated={}",
            self.get_state().as_str(),
            device,
            battery,
            temperature,
            umbrella,
            sms,
            updated
        )
    }
}
