//! Diagnostic output emitted while pulsing, plus its host-side decoding.
//!
//! The device reports two kinds of lines: the literal [`RUN_MARKER`] when a
//! start request is accepted, and one sample record per pulse. A sample record
//! is the 12-cell measurement matrix rendered as `: XX XX ... XX`, uppercase
//! hex separated by single spaces. Host tooling turns the record back into a
//! [`SampleMatrix`] with [`decode_samples`] and into physical units with the
//! per-channel [`Calibration`] factors.
//!
//! Independently of the wire lines, a bounded history of engine events is kept
//! in a [`TelemetryRecorder`] so status queries can report what happened last.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered, String};
use winnow::ascii::space0;
use winnow::combinator::eof;
use winnow::prelude::*;
use winnow::token::{literal, take_while};

use crate::capture::{
    AnalogChannel, CHANNELS_PER_PHASE, CapturePhase, MATRIX_LEN, NOT_READ, SampleMatrix,
};
use crate::engine::DiagnosticSink;
use crate::timebase::{Tick, ticks_between};

/// Line sent when a pulse train starts.
pub const RUN_MARKER: &str = "START";

/// Terminator appended to every diagnostic and terminal line.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Prefix of a sample record line.
pub const RECORD_PREFIX: &str = ": ";

/// Length of a sample record line without its terminator.
pub const RECORD_LINE_LEN: usize = RECORD_PREFIX.len() + MATRIX_LEN * 3 - 1;

/// Bounded buffer holding one encoded sample record.
pub type RecordLine = String<RECORD_LINE_LEN>;

/// Identifier assigned to recorded telemetry events.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 32;

/// Writes `samples` as a sample record line, without the terminator.
pub fn write_samples<W: fmt::Write>(writer: &mut W, samples: &SampleMatrix) -> fmt::Result {
    writer.write_str(RECORD_PREFIX)?;
    for (index, cell) in samples.as_bytes().iter().enumerate() {
        if index > 0 {
            writer.write_char(' ')?;
        }
        write!(writer, "{cell:02X}")?;
    }
    Ok(())
}

/// Encodes `samples` into a fixed-capacity record line.
#[must_use]
pub fn encode_samples(samples: &SampleMatrix) -> RecordLine {
    let mut line = RecordLine::new();
    // The buffer is sized for the longest record, so this cannot overflow.
    let _ = write_samples(&mut line, samples);
    line
}

/// Sample record that could not be decoded.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RecordDecodeError {
    /// Byte offset of the first offending character.
    pub offset: usize,
}

impl fmt::Display for RecordDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed sample record at column {}", self.offset)
    }
}

/// Parses a sample record line back into its matrix.
///
/// Trailing whitespace and a line terminator are accepted.
pub fn decode_samples(line: &str) -> Result<SampleMatrix, RecordDecodeError> {
    record.parse(line).map_err(|error| RecordDecodeError {
        offset: error.offset(),
    })
}

fn record(input: &mut &str) -> ModalResult<SampleMatrix> {
    literal(RECORD_PREFIX).parse_next(input)?;
    let mut cells = [NOT_READ; MATRIX_LEN];
    for (index, cell) in cells.iter_mut().enumerate() {
        if index > 0 {
            ' '.parse_next(input)?;
        }
        *cell = hex_byte.parse_next(input)?;
    }
    (space0, take_while(0.., ['\r', '\n']), eof).parse_next(input)?;
    Ok(SampleMatrix::from_bytes(cells))
}

fn hex_byte(input: &mut &str) -> ModalResult<u8> {
    take_while(2, |c: char| c.is_ascii_hexdigit())
        .try_map(|digits| u8::from_str_radix(digits, 16))
        .parse_next(input)
}

/// Linear conversion from raw converter counts into physical units.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Calibration {
    /// Count that corresponds to zero.
    pub zero: u8,
    /// Units per count.
    pub scale: f32,
}

/// Output current, in milliamperes.
pub const CURRENT_CALIBRATION: Calibration = Calibration {
    zero: 127,
    scale: 0.156,
};

/// Emitting voltage, in volts.
pub const CORRECTION_CALIBRATION: Calibration = Calibration {
    zero: 128,
    scale: 0.040,
};

/// Tissue voltage, in volts.
pub const TISSUE_CALIBRATION: Calibration = Calibration {
    zero: 128,
    scale: 0.041,
};

impl Calibration {
    /// Calibration that applies to `channel`.
    #[must_use]
    pub const fn for_channel(channel: AnalogChannel) -> Self {
        match channel {
            AnalogChannel::Current => CURRENT_CALIBRATION,
            AnalogChannel::Correction => CORRECTION_CALIBRATION,
            AnalogChannel::Tissue => TISSUE_CALIBRATION,
        }
    }

    /// Converts `raw`; the not-read sentinel yields `None`.
    #[must_use]
    pub fn apply(self, raw: u8) -> Option<f32> {
        if raw == NOT_READ {
            None
        } else {
            Some((f32::from(raw) - f32::from(self.zero)) * self.scale)
        }
    }
}

/// Writes one calibrated row, e.g. `I=0.16mA V=-0.04V T=--`.
pub fn write_calibrated_row<W: fmt::Write>(
    writer: &mut W,
    samples: &SampleMatrix,
    phase: CapturePhase,
) -> fmt::Result {
    let row = samples.row(phase);
    let labels: [(&str, &str); CHANNELS_PER_PHASE] = [("I", "mA"), ("V", "V"), ("T", "V")];
    for (index, channel) in AnalogChannel::ALL.into_iter().enumerate() {
        if index > 0 {
            writer.write_char(' ')?;
        }
        let (label, unit) = labels[index];
        match Calibration::for_channel(channel).apply(row[index]) {
            Some(value) => write!(writer, "{label}={value:.2}{unit}")?,
            None => write!(writer, "{label}=--")?,
        }
    }
    Ok(())
}

/// Engine events kept in the telemetry history.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TelemetryEventKind {
    RunStarted,
    PulseCompleted,
    Stopped,
}

impl TelemetryEventKind {
    /// Short label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TelemetryEventKind::RunStarted => "run-started",
            TelemetryEventKind::PulseCompleted => "pulse",
            TelemetryEventKind::Stopped => "stopped",
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TelemetryRecord {
    pub id: EventId,
    pub at: Tick,
    pub event: TelemetryEventKind,
    /// Ticks since the previous record, `None` for the first one.
    pub since_previous: Option<Tick>,
    pub samples: Option<SampleMatrix>,
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord, CAPACITY>;

/// Records engine events into a fixed-size ring buffer.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: TelemetryRing<CAPACITY>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent telemetry record, if available.
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    /// Returns the number of records currently stored.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` when no telemetry records are stored.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records an event and returns its identifier.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        at: Tick,
        samples: Option<SampleMatrix>,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        let since_previous = self.latest().map(|previous| ticks_between(previous.at, at));

        self.ring.write(TelemetryRecord {
            id,
            at,
            event,
            since_previous,
            samples,
        });

        id
    }
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

/// [`DiagnosticSink`] that writes the wire lines and keeps the event history.
///
/// Sample records are only written while recording is enabled; pulses are kept
/// in the history either way.
pub struct TelemetryLog<W, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    writer: W,
    recorder: TelemetryRecorder<CAPACITY>,
    dropped_lines: u32,
    recording: bool,
}

impl<W, const CAPACITY: usize> TelemetryLog<W, CAPACITY> {
    /// Creates a log that emits its lines into `writer`.
    pub const fn new(writer: W) -> Self {
        Self {
            writer,
            recorder: TelemetryRecorder::new(),
            dropped_lines: 0,
            recording: true,
        }
    }

    /// Enables or suppresses the per-pulse sample records.
    pub fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
    }

    /// Event history recorded so far.
    pub fn recorder(&self) -> &TelemetryRecorder<CAPACITY> {
        &self.recorder
    }

    /// Returns the wrapped writer.
    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Returns the wrapped writer mutably, e.g. to drain a buffer.
    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Lines the writer refused.
    pub const fn dropped_lines(&self) -> u32 {
        self.dropped_lines
    }
}

impl<W: fmt::Write, const CAPACITY: usize> TelemetryLog<W, CAPACITY> {
    fn emit(&mut self, body: impl FnOnce(&mut W) -> fmt::Result) {
        let written = body(&mut self.writer).and_then(|()| self.writer.write_str(LINE_TERMINATOR));
        if written.is_err() {
            self.dropped_lines = self.dropped_lines.saturating_add(1);
        }
    }
}

impl<W: fmt::Write, const CAPACITY: usize> DiagnosticSink for TelemetryLog<W, CAPACITY> {
    fn run_started(&mut self, at: Tick) {
        self.emit(|writer| writer.write_str(RUN_MARKER));
        self.recorder.record(TelemetryEventKind::RunStarted, at, None);
    }

    fn pulse_completed(&mut self, at: Tick, samples: &SampleMatrix) {
        if self.recording {
            self.emit(|writer| write_samples(writer, samples));
        }
        self.recorder
            .record(TelemetryEventKind::PulseCompleted, at, Some(*samples));
    }

    fn stopped(&mut self, at: Tick) {
        self.recorder.record(TelemetryEventKind::Stopped, at, None);
    }
}
