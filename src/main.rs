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

//! Smart Bag Controller

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use smartbag_controller::bluetooth::{self, ConnectionManager, DeviceDirectory, TelemetryEvent};
use smartbag_controller::config::Config;
use smartbag_controller::console::{self, ConsoleAction};
use smartbag_controller::storage::{JsonFileStore, KeyValueStore};
use smartbag_controller::{
    AppState, BusEvent, ConnectionError, ConnectionEvent, Controller, EventBus, ReconnectOutcome,
    ReconnectPolicy, Topic,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("smartbag_controller=info".parse()?),
        )
        .init();

    info!(
        "Starting Smart Bag Controller v{}...",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::new(&config.data_dir)?);
    info!("Settings storage initialized");

    let backend = bluetooth::create_backend(&config).await?;

    let shutdown = CancellationToken::new();
    if let Some(simulator) = backend.simulator.clone() {
        simulator.spawn(shutdown.child_token());
    }

    let bus = EventBus::new();
    let state = AppState::new();
    let _state_handles = state.attach(&bus);

    // Echo telemetry as it arrives
    for topic in Topic::ALL {
        if topic == Topic::Connection {
            continue;
        }
        bus.subscribe(topic, |event| {
            if let BusEvent::Telemetry(telemetry) = event {
                println!("< {}", describe(telemetry));
            }
            Ok(())
        });
    }

    let (_connection_handle, connection_rx) = bus.subscribe_channel(Topic::Connection, 16);
    tokio::spawn(async move {
        while let Ok(event) = connection_rx.recv().await {
            match event {
                BusEvent::Connection(ConnectionEvent::StateChanged { state, device }) => {
                    match device {
                        Some(device) => println!("* {} {}", state.as_str(), device),
                        None => println!("* {}", state.as_str()),
                    }
                }
                BusEvent::Connection(ConnectionEvent::Lost { device, reason }) => {
                    println!("* Connection to {} lost: {}", device, reason);
                }
                BusEvent::Telemetry(_) => {}
            }
        }
    });

    let manager = Arc::new(ConnectionManager::new(
        backend.transport.clone(),
        bus.clone(),
        config.connection(),
    ));
    let directory = DeviceDirectory::new(backend.transport.clone(), backend.enumerator.clone());
    let controller = Arc::new(Controller::new(
        manager.clone(),
        directory.clone(),
        store.clone(),
        config.follow_up_delay(),
    ));

    if config.bluetooth.auto_reconnect {
        let reconnect = ReconnectPolicy::new(store.clone(), directory, manager.clone()).spawn();
        let controller = controller.clone();
        tokio::spawn(async move {
            match reconnect.await {
                Ok(ReconnectOutcome::Connected(device)) => {
                    info!("Startup reconnect: connected to {}", device);
                    controller.refresh_after_connect().await;
                }
                Ok(outcome) => info!("Startup reconnect: {:?}", outcome),
                Err(e) => error!("Reconnect task failed: {}", e),
            }
        });
    }

    let mut action_rx = console::run_console();

    info!("Ready. Type 'help' for commands.");

    // Handle console actions
    loop {
        tokio::select! {
            action = action_rx.recv() => {
                let Some(action) = action else {
                    info!("Console closed");
                    break;
                };
                if action == ConsoleAction::Quit {
                    info!("Quit requested");
                    break;
                }
                if let Err(e) = handle_action(&controller, &state, action).await {
                    println!("! {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    // Keep the saved device for the next start.
    if let Err(e) = manager.disconnect().await {
        warn!("Error during disconnect: {}", e);
    }
    shutdown.cancel();

    info!("Smart Bag Controller stopped");
    Ok(())
}

async fn handle_action(
    controller: &Controller,
    state: &AppState,
    action: ConsoleAction,
) -> Result<(), ConnectionError> {
    match action {
        ConsoleAction::Devices => print_devices(&controller.devices().await?),
        ConsoleAction::Scan => print_devices(&controller.scan().await?),
        ConsoleAction::Connect(id) => {
            controller.connect_id(&id).await?;
        }
        ConsoleAction::Disconnect => controller.disconnect().await?,
        ConsoleAction::OpenUmbrella => controller.open_umbrella().await?,
        ConsoleAction::CloseUmbrella => controller.close_umbrella().await?,
        ConsoleAction::Battery => controller.request_battery().await?,
        ConsoleAction::Temperature => controller.request_temperature().await?,
        ConsoleAction::Status => controller.request_status().await?,
        ConsoleAction::GetSms => controller.request_sms_number().await?,
        ConsoleAction::SetSms(number) => controller.set_sms_number(&number).await?,
        ConsoleAction::Refresh => controller.refresh_all().await?,
        ConsoleAction::ShowState => println!("{}", state.summary()),
        ConsoleAction::Help => println!("{}", console::HELP),
        ConsoleAction::Quit => {}
    }
    Ok(())
}

fn print_devices(devices: &[bluetooth::Device]) {
    if devices.is_empty() {
        println!("No devices found");
    }
    for device in devices {
        let bonded = if device.bonded { " [bonded]" } else { "" };
        println!("  {}  {}{}", device.id, device.display_name(), bonded);
    }
}

fn describe(event: &TelemetryEvent) -> String {
    match event {
        TelemetryEvent::BatteryLevel(level) => format!("Battery {}%", level),
        TelemetryEvent::Temperature(celsius) => format!("Temperature {:.1}°C", celsius),
        TelemetryEvent::Status(status) => format!("Status {}", status),
        TelemetryEvent::UmbrellaStatus(umbrella) => format!("Umbrella {}", umbrella.as_str()),
        TelemetryEvent::SmsNumber(number) => format!("SMS number {}", number),
        TelemetryEvent::RawUnrecognized(line) => format!("Unrecognized: {}", line),
    }
}
