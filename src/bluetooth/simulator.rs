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

//! Simulated Smart Bag answering the line protocol over a [`MemoryTransport`].

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::framing::LineFramer;
use super::memory::MemoryTransport;
use super::protocol::{CommandName, UmbrellaState, FIELD_SEPARATOR};
use super::transport::Device;

/// Identifier of the simulated device.
pub const SIMULATED_DEVICE_ID: &str = "98:D3:31:F5:2A:17";

#[derive(Debug, Clone)]
struct BagState {
    battery: u8,
    temperature: f64,
    umbrella: UmbrellaState,
    sms_number: Option<String>,
    status: String,
}

impl Default for BagState {
    fn default() -> Self {
        Self {
            battery: 85,
            temperature: 21.5,
            umbrella: UmbrellaState::Closed,
            sms_number: None,
            status: "READY".to_string(),
        }
    }
}

/// A device that replies to commands written to a memory transport.
#[derive(Clone)]
pub struct SimulatedBag {
    transport: Arc<MemoryTransport>,
    state: Arc<Mutex<BagState>>,
}

impl SimulatedBag {
    /// Create a simulator and register its device as bonded.
    pub fn new(transport: Arc<MemoryTransport>) -> Self {
        transport.set_bonded(vec![Self::device()]);
        Self {
            transport,
            state: Arc::new(Mutex::new(BagState::default())),
        }
    }

    /// The device the simulator answers as.
    pub fn device() -> Device {
        Device::new(SIMULATED_DEVICE_ID, SIMULATED_DEVICE_ID)
            .with_name("Smart Bag (simulated)")
            .bonded()
    }

    pub fn set_battery(&self, level: u8) {
        self.state.lock().battery = level.min(100);
    }

    pub fn set_temperature(&self, celsius: f64) {
        self.state.lock().temperature = celsius;
    }

    pub fn umbrella(&self) -> UmbrellaState {
        self.state.lock().umbrella
    }

    pub fn sms_number(&self) -> Option<String> {
        self.state.lock().sms_number.clone()
    }

    /// Lines the device sends back for one received command line.
    pub fn respond(&self, line: &str) -> Vec<String> {
        let (name, payload) = line.split_once(FIELD_SEPARATOR).unwrap_or((line, ""));
        let mut state = self.state.lock();

        match CommandName::parse(name) {
            Some(CommandName::Umbrella) => match UmbrellaState::parse(payload) {
                Some(umbrella) => {
                    state.umbrella = umbrella;
                    vec![format!("UMBRELLA:{}", umbrella.as_str())]
                }
                None => vec!["ERROR:BAD_UMBRELLA".to_string()],
            },
            Some(CommandName::GetBattery) => vec![format!("BATTERY:{}", state.battery)],
            Some(CommandName::GetTemp) => vec![format!("TEMP:{:.1}", state.temperature)],
            Some(CommandName::GetStatus) => vec![
                format!("STATUS:{}", state.status),
                format!("UMBRELLA:{}", state.umbrella.as_str()),
            ],
            Some(CommandName::SetSms) => {
                state.sms_number = Some(payload.to_string());
                Vec::new()
            }
            Some(CommandName::GetSms) => match &state.sms_number {
                Some(number) => vec![format!("SMS:NUMBER:{}", number)],
                None => vec!["SMS:NONE".to_string()],
            },
            None => vec!["ERROR:UNKNOWN_COMMAND".to_string()],
        }
    }

    /// Answer commands until cancelled.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        let outbound = self.transport.outbound();

        tokio::spawn(async move {
            info!("Simulated Smart Bag running as {}", SIMULATED_DEVICE_ID);
            let mut framer = LineFramer::default();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    written = outbound.recv() => {
                        let Ok(bytes) = written else { break };

                        for line in framer.process_chunk(&bytes) {
                            debug!("Simulator received: {}", line);
                            for reply in self.respond(&line) {
                                let reply = format!("{}\n", reply);
                                if !self.transport.push_inbound(reply.as_bytes()) {
                                    debug!("Simulator reply dropped, link closed");
                                }
                            }
                        }
                    }
                }
            }

            info!("Simulated Smart Bag stopped");
        })
    }
}
