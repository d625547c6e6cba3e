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

//! Error types for the device communication layer.

use std::time::Duration;
use thiserror::Error;

/// Failures reported by the underlying link.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The Bluetooth adapter is missing or powered off.
    #[error("Bluetooth adapter is not available")]
    AdapterUnavailable,

    /// The link is closed (never opened, or closed by the remote).
    #[error("Connection is closed")]
    Closed,

    /// An operation did not complete in time.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error on the link.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error reported by the platform Bluetooth stack.
    #[error("Bluetooth backend error: {0}")]
    Backend(String),
}

impl TransportError {
    /// Creates a backend error from any displayable error.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Malformed outgoing commands, rejected before any byte is written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The payload contains the line delimiter.
    #[error("Command payload must not contain a line delimiter")]
    InvalidPayload,

    /// The SMS number does not look like a phone number.
    #[error("Invalid phone number: {0}")]
    InvalidPhoneNumber(String),
}

/// Errors returned to callers of the connection manager and controller.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// A command was issued while not connected.
    #[error("Device not connected")]
    NotConnected,

    /// A different device session is active.
    #[error("Already connected to device {active}")]
    AlreadyConnected { active: String },

    /// The transport could not establish the connection.
    #[error("Failed to connect to device {device}: {source}")]
    ConnectionFailed {
        device: String,
        #[source]
        source: TransportError,
    },

    /// The connection attempt was cancelled by a disconnect.
    #[error("Connection attempt to device {device} was cancelled")]
    ConnectCancelled { device: String },

    /// The link failed while connected.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The command could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failed_carries_cause() {
        let error = ConnectionError::ConnectionFailed {
            device: "00:11:22:33:44:55".to_string(),
            source: TransportError::Timeout(Duration::from_secs(10)),
        };
        let msg = error.to_string();
        assert!(msg.contains("00:11:22:33:44:55"));
        assert!(msg.contains("timed out"));
    }

    #[test]
    fn test_protocol_error_conversion() {
        let error: ConnectionError = ProtocolError::InvalidPayload.into();
        assert!(matches!(
            error,
            ConnectionError::Protocol(ProtocolError::InvalidPayload)
        ));
    }

    #[test]
    fn test_backend_error() {
        let error = TransportError::backend("org.bluez.Error.Failed");
        assert!(error.to_string().contains("org.bluez.Error.Failed"));
    }
}
