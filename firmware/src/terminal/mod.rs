//! Terminal session for the USB CDC console.
//!
//! Bytes arriving from the host are assembled into lines here and handed to
//! the shared [`CommandExecutor`]; replies are rendered straight into a
//! `fmt::Write` sink, normally a [`frames::FrameWriter`] feeding the USB task.
//! Typed characters are echoed until the host sends `eo`; echo returns with
//! the next attach.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

pub mod frames;

use core::fmt;
use core::str;

use heapless::{String, Vec};

use stimulator_core::engine::PulseEngine;
use stimulator_core::settings::ChannelSettings;
use stimulator_core::telemetry::LINE_TERMINATOR;
use stimulator_core::terminal::MAX_LINE_LEN;
use stimulator_core::terminal::commands::{CommandExecutor, SettingsPersistence};
use stimulator_core::terminal::status::DiagnosticSummary;

/// One complete terminal line.
pub type Line = String<MAX_LINE_LEN>;

/// Errors surfaced while assembling a line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LineError {
    /// Input exceeded [`MAX_LINE_LEN`] before a terminator arrived.
    Overflow,
    /// The assembled line was not valid UTF-8.
    InvalidUtf8,
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineError::Overflow => write!(f, "line longer than {MAX_LINE_LEN} characters"),
            LineError::InvalidUtf8 => f.write_str("line is not valid text"),
        }
    }
}

/// Collects bytes until CR or LF.
///
/// After an overflow the remainder of the line is discarded and the error is
/// reported once, when its terminator arrives.
#[derive(Default)]
pub struct LineAssembler {
    buffer: Vec<u8, MAX_LINE_LEN>,
    overflowed: bool,
}

impl LineAssembler {
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            overflowed: false,
        }
    }

    /// Drops any partial line, e.g. when the host disconnects.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.overflowed = false;
    }

    /// Feeds one byte; a terminator yields the completed line.
    pub fn ingest(&mut self, byte: u8) -> Result<Option<Line>, LineError> {
        match byte {
            b'\r' | b'\n' => self.finish_line(),
            0x08 | 0x7f => {
                self.buffer.pop();
                Ok(None)
            }
            value => {
                if !self.overflowed && self.buffer.push(value).is_err() {
                    self.overflowed = true;
                }
                Ok(None)
            }
        }
    }

    fn finish_line(&mut self) -> Result<Option<Line>, LineError> {
        let overflowed = core::mem::take(&mut self.overflowed);
        let bytes = core::mem::take(&mut self.buffer);
        if overflowed {
            return Err(LineError::Overflow);
        }
        if bytes.is_empty() {
            return Ok(None);
        }

        let text = str::from_utf8(&bytes).map_err(|_| LineError::InvalidUtf8)?;
        let mut line = Line::new();
        // Same capacity as the byte buffer.
        let _ = line.push_str(text);
        Ok(Some(line))
    }
}

/// Line assembly plus command execution for one console.
pub struct TerminalSession<P> {
    assembler: LineAssembler,
    executor: CommandExecutor<P>,
    after_cr: bool,
}

impl<P: SettingsPersistence> TerminalSession<P> {
    pub fn new(executor: CommandExecutor<P>) -> Self {
        Self {
            assembler: LineAssembler::new(),
            executor,
            after_cr: false,
        }
    }

    /// Forgets the partial line and turns echo back on for a new host.
    pub fn reset(&mut self) {
        self.assembler.reset();
        self.executor.restore_echo();
        self.after_cr = false;
    }

    /// Whether sample records should be sent after each pulse.
    pub fn recording(&self) -> bool {
        self.executor.recording()
    }

    fn echo<W: fmt::Write>(&mut self, byte: u8, out: &mut W) -> fmt::Result {
        let after_cr = core::mem::replace(&mut self.after_cr, byte == b'\r');
        if !self.executor.echo() {
            return Ok(());
        }
        // CR LF counts as one line end.
        if byte == b'\r' || (byte == b'\n' && !after_cr) {
            return out.write_str(LINE_TERMINATOR);
        }
        match byte {
            0x08 | 0x7f => out.write_str("\x08 \x08"),
            0x20..=0x7e => out.write_char(char::from(byte)),
            _ => Ok(()),
        }
    }

    /// Feeds received bytes and writes one reply per completed line.
    ///
    /// Returns the number of lines handled.
    pub fn ingest<W: fmt::Write>(
        &mut self,
        bytes: &[u8],
        settings: &mut ChannelSettings,
        engine: &PulseEngine,
        diagnostics: &DiagnosticSummary,
        out: &mut W,
    ) -> Result<usize, fmt::Error> {
        let mut handled = 0;
        for byte in bytes {
            self.echo(*byte, out)?;
            let line = match self.assembler.ingest(*byte) {
                Ok(Some(line)) => line,
                Ok(None) => continue,
                Err(error) => {
                    write!(out, "ERR {error}{LINE_TERMINATOR}")?;
                    handled += 1;
                    continue;
                }
            };

            match self.executor.execute(&line, settings, engine, diagnostics) {
                Ok(outcome) => outcome.write_response(out)?,
                Err(error) => {
                    log_command_error(&line);
                    error.write_response(out)?;
                }
            }
            handled += 1;
        }
        Ok(handled)
    }
}

#[cfg(target_os = "none")]
fn log_command_error(line: &str) {
    defmt::warn!("terminal: rejected `{}`", line);
}

#[cfg(not(target_os = "none"))]
fn log_command_error(line: &str) {
    println!("terminal: rejected `{line}`");
}
