// SPDX-License-Identifier: Apache-2.0

//! Turns a stream of log lines into delimited event blocks.
//!
//! An event opens on a line starting with three digits and a whitespace
//! character (`005 (123.000.000) ...`) and closes on a line starting with an
//! ellipsis. Lines between events are noise and are dropped.

use regex::Regex;
use tracing::debug;

use crate::receivers::eventlog::error::Result;

/// ASCII whitespace only, so a digit run followed by a non-breaking space
/// does not open an event.
pub const DEFAULT_START_PATTERN: &str = r"^[0-9]{3}[\t\n\x0C\r ]";
pub const DEFAULT_END_PATTERN: &str = r"^\.\.\.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    Idle,
    Accumulating,
}

#[derive(Debug, Clone)]
pub struct Segmenter {
    start: Regex,
    end: Regex,
    state: SegmenterState,
    buf: String,
}

impl Segmenter {
    pub fn new(start_pattern: &str, end_pattern: &str) -> Result<Self> {
        Ok(Self {
            start: Regex::new(start_pattern)?,
            end: Regex::new(end_pattern)?,
            state: SegmenterState::Idle,
            buf: String::new(),
        })
    }

    pub fn state(&self) -> SegmenterState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == SegmenterState::Idle
    }

    /// Feed one line (without its terminator). Returns the completed event
    /// text when `line` closes an open block.
    ///
    /// While accumulating, a second start line is kept as ordinary content;
    /// only an end line closes the block.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        match self.state {
            SegmenterState::Idle => {
                if self.start.is_match(line) {
                    self.state = SegmenterState::Accumulating;
                    self.append(line);
                }
                None
            }
            SegmenterState::Accumulating => {
                self.append(line);
                if self.end.is_match(line) {
                    self.state = SegmenterState::Idle;
                    Some(std::mem::take(&mut self.buf))
                } else {
                    None
                }
            }
        }
    }

    /// Return to Idle at a file boundary. Any partially accumulated event is
    /// dropped; returns true if that happened.
    pub fn reset(&mut self) -> bool {
        let dropped = self.state == SegmenterState::Accumulating;
        if dropped {
            debug!(
                bytes = self.buf.len(),
                "Dropping unterminated event at end of stream"
            );
        }
        self.state = SegmenterState::Idle;
        self.buf.clear();
        dropped
    }

    fn append(&mut self, line: &str) {
        self.buf.push_str(line);
        self.buf.push('\n');
    }
}
