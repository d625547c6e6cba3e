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

//! Smart Bag controller.
//!
//! Talks to the umbrella bag over a serial-profile Bluetooth link using a
//! line-based text protocol, and fans decoded telemetry out to subscribers.

pub mod bluetooth;
pub mod config;
pub mod console;
pub mod controller;
pub mod error;
pub mod events;
pub mod reconnect;
pub mod state;
pub mod storage;

pub use controller::Controller;
pub use error::{ConnectionError, ProtocolError, TransportError};
pub use events::{BusEvent, ConnectionEvent, EventBus, SubscriptionHandle, Topic};
pub use reconnect::{ReconnectOutcome, ReconnectPolicy};
pub use state::{AppState, ConnectionState};
