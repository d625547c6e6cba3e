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

//! Line protocol: command encoding and telemetry decoding.
//!
//! Every message is a UTF-8 line `NAME:payload` terminated by `\n`.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::error::ProtocolError;

/// Line delimiter byte.
pub const LINE_DELIMITER: u8 = b'\n';

/// Separator between command name and payload.
pub const FIELD_SEPARATOR: char = ':';

/// Prefix of the SMS number reply payload.
const SMS_NUMBER_PREFIX: &str = "NUMBER:";

/// Commands understood by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandName {
    Umbrella,
    GetBattery,
    GetTemp,
    GetStatus,
    SetSms,
    GetSms,
}

impl CommandName {
    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "UMBRELLA" => Some(Self::Umbrella),
            "GET_BATTERY" => Some(Self::GetBattery),
            "GET_TEMP" => Some(Self::GetTemp),
            "GET_STATUS" => Some(Self::GetStatus),
            "SET_SMS" => Some(Self::SetSms),
            "GET_SMS" => Some(Self::GetSms),
            _ => None,
        }
    }

    /// Convert to wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Umbrella => "UMBRELLA",
            Self::GetBattery => "GET_BATTERY",
            Self::GetTemp => "GET_TEMP",
            Self::GetStatus => "GET_STATUS",
            Self::SetSms => "SET_SMS",
            Self::GetSms => "GET_SMS",
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of the umbrella.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UmbrellaState {
    Open,
    #[default]
    Closed,
}

impl UmbrellaState {
    /// Parse the wire value. Only `OPEN` and `CLOSE` are accepted.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(Self::Open),
            "CLOSE" => Some(Self::Closed),
            _ => None,
        }
    }

    /// Wire value used in `UMBRELLA:<value>`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSE",
        }
    }
}

/// An outgoing command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: CommandName,
    payload: Option<String>,
}

impl Command {
    /// Create a command with an optional payload.
    pub fn new(name: CommandName, payload: Option<String>) -> Self {
        Self { name, payload }
    }

    /// `UMBRELLA:OPEN`
    pub fn open_umbrella() -> Self {
        Self::umbrella(UmbrellaState::Open)
    }

    /// `UMBRELLA:CLOSE`
    pub fn close_umbrella() -> Self {
        Self::umbrella(UmbrellaState::Closed)
    }

    fn umbrella(state: UmbrellaState) -> Self {
        Self::new(CommandName::Umbrella, Some(state.as_str().to_string()))
    }

    pub fn get_battery() -> Self {
        Self::new(CommandName::GetBattery, None)
    }

    pub fn get_temperature() -> Self {
        Self::new(CommandName::GetTemp, None)
    }

    pub fn get_status() -> Self {
        Self::new(CommandName::GetStatus, None)
    }

    pub fn get_sms() -> Self {
        Self::new(CommandName::GetSms, None)
    }

    /// `SET_SMS:<number>`, with the number validated and stripped of whitespace.
    pub fn set_sms(number: &str) -> Result<Self, ProtocolError> {
        let normalized = normalize_phone_number(number)
            .ok_or_else(|| ProtocolError::InvalidPhoneNumber(number.to_string()))?;
        Ok(Self::new(CommandName::SetSms, Some(normalized)))
    }

    pub fn name(&self) -> CommandName {
        self.name
    }

    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    /// Encode into a wire line, delimiter included.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.name,
            FIELD_SEPARATOR,
            self.payload.as_deref().unwrap_or("")
        )
    }
}

/// A decoded telemetry line.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    /// Battery percentage, 0 to 100.
    BatteryLevel(u8),
    /// Temperature in degrees Celsius.
    Temperature(f64),
    /// Opaque status string.
    Status(String),
    UmbrellaStatus(UmbrellaState),
    SmsNumber(String),
    /// The full line, when it could not be decoded.
    RawUnrecognized(String),
}

/// Encode a command as `NAME:payload\n`.
pub fn encode(command: &Command) -> Result<Vec<u8>, ProtocolError> {
    let payload = command.payload.as_deref().unwrap_or("");
    if payload.as_bytes().contains(&LINE_DELIMITER) {
        return Err(ProtocolError::InvalidPayload);
    }

    let mut line = String::with_capacity(command.name.as_str().len() + payload.len() + 2);
    line.push_str(command.name.as_str());
    line.push(FIELD_SEPARATOR);
    line.push_str(payload);
    line.push(LINE_DELIMITER as char);
    Ok(line.into_bytes())
}

/// Decode a single line. Never fails: anything that does not decode cleanly
/// becomes `RawUnrecognized` with the trimmed line.
pub fn decode(line: &str) -> TelemetryEvent {
    let line = line.trim();
    let raw = || TelemetryEvent::RawUnrecognized(line.to_string());

    let Some((name, payload)) = line.split_once(FIELD_SEPARATOR) else {
        return raw();
    };

    match name {
        "BATTERY" => match payload.trim().parse::<i64>() {
            Ok(level @ 0..=100) => TelemetryEvent::BatteryLevel(level as u8),
            _ => raw(),
        },
        "TEMP" => match payload.trim().parse::<f64>() {
            Ok(celsius) if celsius.is_finite() => TelemetryEvent::Temperature(celsius),
            _ => raw(),
        },
        "STATUS" => TelemetryEvent::Status(payload.to_string()),
        "UMBRELLA" => match UmbrellaState::parse(payload) {
            Some(state) => TelemetryEvent::UmbrellaStatus(state),
            None => raw(),
        },
        "SMS" => match payload.strip_prefix(SMS_NUMBER_PREFIX) {
            Some(number) => TelemetryEvent::SmsNumber(number.to_string()),
            None => raw(),
        },
        _ => raw(),
    }
}

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\+?[1-9][\d\-()]{8,15}$").expect("phone number pattern is valid")
    })
}

/// Strip whitespace and validate a phone number.
pub fn normalize_phone_number(number: &str) -> Option<String> {
    let compact: String = number.chars().filter(|c| !c.is_whitespace()).collect();
    phone_pattern().is_match(&compact).then_some(compact)
}
