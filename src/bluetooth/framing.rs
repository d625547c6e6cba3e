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

//! Line framing for the inbound byte stream.

use tracing::{debug, warn};

use super::protocol::LINE_DELIMITER;

/// Default upper bound for a single line, delimiter excluded.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024;

/// Splits arbitrarily chunked bytes into complete lines.
pub struct LineFramer {
    buffer: Vec<u8>,
    max_line_length: usize,
    discarding: bool,
}

impl LineFramer {
    /// Create a new framer with the given line length limit.
    pub fn new(max_line_length: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(max_line_length.min(4096)),
            max_line_length,
            discarding: false,
        }
    }

    /// Process an incoming chunk.
    ///
    /// Returns every line completed by this chunk, without the delimiter and
    /// without a trailing carriage return. Blank lines are skipped. A line
    /// longer than the limit is dropped up to its delimiter.
    pub fn process_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in chunk {
            if byte == LINE_DELIMITER {
                if self.discarding {
                    self.discarding = false;
                    continue;
                }

                let mut raw = std::mem::take(&mut self.buffer);
                if raw.last() == Some(&b'\r') {
                    raw.pop();
                }

                if raw.is_empty() {
                    debug!("Skipping blank line");
                    continue;
                }

                lines.push(String::from_utf8_lossy(&raw).into_owned());
                continue;
            }

            if self.discarding {
                continue;
            }

            if self.buffer.len() >= self.max_line_length {
                warn!(
                    "Line exceeds {} bytes without delimiter, discarding",
                    self.max_line_length
                );
                self.buffer.clear();
                self.discarding = true;
                continue;
            }

            self.buffer.push(byte);
        }

        lines
    }

    /// Reset the framer state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }

    /// Check if a partial line is buffered.
    pub fn is_in_progress(&self) -> bool {
        !self.buffer.is_empty() || self.discarding
    }

    /// Get current buffer size.
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line() {
        let mut framer = LineFramer::default();

        let lines = framer.process_chunk(b"BATTERY:85\n");
        assert_eq!(lines, vec!["BATTERY:85".to_string()]);
        assert!(!framer.is_in_progress());
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut framer = LineFramer::default();

        assert!(framer.process_chunk(b"TEM").is_empty());
        assert!(framer.is_in_progress());
        assert!(framer.process_chunk(b"P:21.").is_empty());

        let lines = framer.process_chunk(b"5\nBATT");
        assert_eq!(lines, vec!["TEMP:21.5".to_string()]);
        assert_eq!(framer.buffer_size(), 4);
    }

    #[test]
    fn test_multiple_lines_in_one_chunk() {
        let mut framer = LineFramer::default();

        let lines = framer.process_chunk(b"BATTERY:85\nUMBRELLA:OPEN\nSMS:NUMBER:+15550100\n");
        assert_eq!(
            lines,
            vec![
                "BATTERY:85".to_string(),
                "UMBRELLA:OPEN".to_string(),
                "SMS:NUMBER:+15550100".to_string(),
            ]
        );
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let mut framer = LineFramer::default();

        let lines = framer.process_chunk(b"STATUS:READY\r\n\r\n\nTEMP:3\n");
        assert_eq!(lines, vec!["STATUS:READY".to_string(), "TEMP:3".to_string()]);
    }

    #[test]
    fn test_overlong_line_is_discarded() {
        let mut framer = LineFramer::new(8);

        assert!(framer.process_chunk(b"0123456789ABCDEF").is_empty());
        assert!(framer.is_in_progress());

        // The tail of the overlong line is dropped together with it.
        let lines = framer.process_chunk(b"GHIJ\nTEMP:1\n");
        assert_eq!(lines, vec!["TEMP:1".to_string()]);
        assert!(!framer.is_in_progress());
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut framer = LineFramer::default();

        let lines = framer.process_chunk(b"STATUS:\xff\xfe\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("STATUS:"));
    }

    #[test]
    fn test_reset() {
        let mut framer = LineFramer::default();

        framer.process_chunk(b"BATTERY:8");
        framer.reset();
        let lines = framer.process_chunk(b"5\n");
        assert_eq!(lines, vec!["5".to_string()]);
    }
}
