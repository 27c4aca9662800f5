//! Status snapshot reported by the `gs` command.

use core::fmt;

use crate::engine::{PulseEngine, WaveformState};
use crate::settings::{ChannelSettings, StartFlag};
use crate::telemetry::{LINE_TERMINATOR, TelemetryEventKind, TelemetryRecord};
use crate::timebase::Tick;

/// Diagnostic bookkeeping owned by the caller and reported by `gs`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DiagnosticSummary {
    /// Most recent telemetry event, `None` when no history is kept.
    pub last_event: Option<TelemetryRecord>,
    /// Output lost before it reached the host.
    pub dropped: u32,
}

/// Point-in-time view of the run state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Sample records are being sent after each pulse.
    pub recording: bool,
    /// Raw start flag byte as stored in the settings.
    pub start_flag: u8,
    pub state: WaveformState,
    pub pulses: u32,
    /// Most recent telemetry event and the tick it was recorded at.
    pub last_event: Option<(TelemetryEventKind, Tick)>,
    pub dropped: u32,
}

impl StatusSnapshot {
    /// Captures the run state of `engine` driving `settings`.
    #[must_use]
    pub const fn capture(settings: &ChannelSettings, engine: &PulseEngine) -> Self {
        Self {
            recording: false,
            start_flag: settings.start_flag,
            state: engine.state(),
            pulses: engine.pulses(),
            last_event: None,
            dropped: 0,
        }
    }

    /// Sets the recorder field.
    #[must_use]
    pub const fn with_recording(mut self, recording: bool) -> Self {
        self.recording = recording;
        self
    }

    /// Attaches the caller's diagnostic bookkeeping.
    #[must_use]
    pub fn with_diagnostics(mut self, summary: &DiagnosticSummary) -> Self {
        self.last_event = summary.last_event.map(|record| (record.event, record.at));
        self.dropped = summary.dropped;
        self
    }

    /// Returns `true` while a pulse train is requested or running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(
            StartFlag::from_raw(self.start_flag),
            Some(StartFlag::Start | StartFlag::Running)
        )
    }
}

/// Helper that renders a [`StatusSnapshot`] into terminal lines.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    snapshot: &'a StatusSnapshot,
}

impl<'a> StatusFormatter<'a> {
    /// Creates a new formatter for the provided snapshot.
    #[must_use]
    pub const fn new(snapshot: &'a StatusSnapshot) -> Self {
        Self { snapshot }
    }

    /// Writes the flag line read by host tooling (e.g. `!: 01,02`).
    ///
    /// The first field is the recorder state, the second the raw start flag.
    pub fn write_flags_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write!(
            writer,
            "!: {:02X},{:02X}",
            u8::from(self.snapshot.recording),
            self.snapshot.start_flag
        )
    }

    /// Writes the engine line (e.g. `state=inter-pulse pulses=12 last=pulse@4410 dropped=0`).
    pub fn write_engine_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write!(
            writer,
            "state={} pulses={}",
            self.snapshot.state, self.snapshot.pulses
        )?;
        writer.write_str(" last=")?;
        match self.snapshot.last_event {
            Some((event, at)) => write!(writer, "{}@{at}", event.as_str())?,
            None => writer.write_str("none")?,
        }
        write!(writer, " dropped={}", self.snapshot.dropped)
    }

    /// Writes every status line, each followed by the line terminator.
    pub fn write_all<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        self.write_flags_line(writer)?;
        writer.write_str(LINE_TERMINATOR)?;
        self.write_engine_line(writer)?;
        writer.write_str(LINE_TERMINATOR)
    }
}
