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

//! Line-based command console on stdin.

use anyhow::{anyhow, bail, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const HELP: &str = "\
Commands:
  devices          list bonded devices
  scan             scan for nearby devices
  connect <id>     connect to a device and remember it
  disconnect       disconnect and forget the device
  open | close     open or close the umbrella
  battery | temp   request battery level or temperature
  status           request device status
  sms [number]     request or set the SMS number
  refresh          request all telemetry
  state            print the latest known values
  help             show this help
  quit             exit";

/// Actions requested from the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleAction {
    Devices,
    Scan,
    Connect(String),
    Disconnect,
    OpenUmbrella,
    CloseUmbrella,
    Battery,
    Temperature,
    Status,
    GetSms,
    SetSms(String),
    Refresh,
    ShowState,
    Help,
    Quit,
}

/// Parse one console line.
pub fn parse(line: &str) -> Result<ConsoleAction> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let action = match word.to_lowercase().as_str() {
        "devices" | "list" => ConsoleAction::Devices,
        "scan" => ConsoleAction::Scan,
        "connect" => {
            if rest.is_empty() {
                bail!("usage: connect <id>");
            }
            ConsoleAction::Connect(rest.to_string())
        }
        "disconnect" => ConsoleAction::Disconnect,
        "open" => ConsoleAction::OpenUmbrella,
        "close" => ConsoleAction::CloseUmbrella,
        "battery" => ConsoleAction::Battery,
        "temp" | "temperature" => ConsoleAction::Temperature,
        "status" => ConsoleAction::Status,
        "sms" if rest.is_empty() => ConsoleAction::GetSms,
        // The number may contain spaces; validation happens on send.
        "sms" => ConsoleAction::SetSms(rest.to_string()),
        "refresh" => ConsoleAction::Refresh,
        "state" => ConsoleAction::ShowState,
        "help" | "?" => ConsoleAction::Help,
        "quit" | "exit" => ConsoleAction::Quit,
        "" => return Err(anyhow!("empty command")),
        other => bail!("unknown command '{}', type 'help'", other),
    };

    Ok(action)
}

/// Read stdin on a background task and forward parsed actions.
///
/// The channel closes when stdin reaches end of file.
pub fn run_console() -> mpsc::UnboundedReceiver<ConsoleAction> {
    let (action_tx, action_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match parse(&line) {
                        Ok(action) => {
                            if action_tx.send(action).is_err() {
                                break;
                            }
                        }
                        Err(e) => println!("{}", e),
                    }
                }
                Ok(None) => {
                    debug!("Console input closed");
                    break;
                }
                Err(e) => {
                    warn!("Console read error: {}", e);
                    break;
                }
            }
        }
    });

    action_rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse("devices").unwrap(), ConsoleAction::Devices);
        assert_eq!(parse("  OPEN ").unwrap(), ConsoleAction::OpenUmbrella);
        assert_eq!(parse("temp").unwrap(), ConsoleAction::Temperature);
        assert_eq!(parse("sms").unwrap(), ConsoleAction::GetSms);
        assert_eq!(parse("quit").unwrap(), ConsoleAction::Quit);
        assert_eq!(
            parse("connect 98:D3:31:F5:2A:17").unwrap(),
            ConsoleAction::Connect("98:D3:31:F5:2A:17".to_string())
        );
    }

    #[test]
    fn test_parse_sms_keeps_spaces() {
        assert_eq!(
            parse("sms +1 555 0100 99").unwrap(),
            ConsoleAction::SetSms("+1 555 0100 99".to_string())
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("connect").is_err());
        assert!(parse("").is_err());
        let err = parse("launch").unwrap_err();
        assert!(err.to_string().contains("launch"));
    }
}
