//! Diagnostic sink used by the pulse task.
//!
//! Engine events go three ways: the wire lines (`START` and sample records)
//! are framed for the USB terminal, the bounded event history is kept for
//! `gs`, and a short log line is mirrored to defmt (stdout on the host) for
//! bring-up.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use stimulator_core::capture::SampleMatrix;
use stimulator_core::engine::DiagnosticSink;
use stimulator_core::telemetry::{TelemetryLog, TelemetryRecord};
use stimulator_core::timebase::Tick;

use crate::terminal::frames::{FrameSink, FrameWriter};

pub struct FirmwareDiagnostics<S> {
    log: TelemetryLog<FrameWriter<S>>,
}

impl<S: FrameSink> FirmwareDiagnostics<S> {
    pub const fn new(sink: S) -> Self {
        Self {
            log: TelemetryLog::new(FrameWriter::new(sink)),
        }
    }

    /// Most recent engine event, for status replies.
    pub fn last_event(&self) -> Option<TelemetryRecord> {
        self.log.recorder().latest().copied()
    }

    /// Follows the terminal's `re` / `nr` state.
    pub fn set_recording(&mut self, recording: bool) {
        self.log.set_recording(recording);
    }

    /// Pushes any partially filled frame to the sink.
    pub fn flush(&mut self) {
        // A refused tail frame is already counted by the sink.
        let _ = self.log.writer_mut().flush();
    }

    pub fn writer_mut(&mut self) -> &mut FrameWriter<S> {
        self.log.writer_mut()
    }
}

impl<S: FrameSink> DiagnosticSink for FirmwareDiagnostics<S> {
    fn run_started(&mut self, at: Tick) {
        self.log.run_started(at);
        emit_log("run started", at, None);
    }

    fn pulse_completed(&mut self, at: Tick, samples: &SampleMatrix) {
        self.log.pulse_completed(at, samples);
        emit_log("pulse", at, Some(samples));
    }

    fn stopped(&mut self, at: Tick) {
        self.log.stopped(at);
        emit_log("stopped", at, None);
    }
}

#[cfg(target_os = "none")]
fn emit_log(event: &'static str, at: Tick, samples: Option<&SampleMatrix>) {
    match samples {
        Some(samples) => defmt::debug!(
            "telemetry:pulse {} t={}ms cells={=[u8]:02x}",
            event,
            at,
            samples.as_bytes()
        ),
        None => defmt::info!("telemetry:pulse {} t={}ms", event, at),
    }
}

#[cfg(not(target_os = "none"))]
fn emit_log(event: &'static str, at: Tick, samples: Option<&SampleMatrix>) {
    match samples {
        Some(samples) => println!(
            "telemetry:pulse {event} t={at}ms cells={:02x?}",
            samples.as_bytes()
        ),
        None => println!("telemetry:pulse {event} t={at}ms"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stimulator_core::capture::CapturePhase;
    use stimulator_core::telemetry::{TelemetryEventKind, decode_samples};

    use crate::terminal::frames::TerminalFrame;

    #[derive(Default)]
    struct Collect {
        bytes: std::vec::Vec<u8>,
        refuse: bool,
    }

    impl FrameSink for Collect {
        fn try_send(&mut self, frame: TerminalFrame) -> Result<(), TerminalFrame> {
            if self.refuse {
                return Err(frame);
            }
            self.bytes.extend_from_slice(&frame);
            Ok(())
        }
    }

    #[test]
    fn wire_lines_reach_the_terminal_after_flush() {
        let mut diagnostics = FirmwareDiagnostics::new(Collect::default());
        let mut samples = SampleMatrix::new();
        samples.set_row(CapturePhase::PositivePulse, [0x80, 0x81, 0x82]);

        diagnostics.run_started(10);
        diagnostics.pulse_completed(15, &samples);
        diagnostics.flush();

        let text = std::string::String::from_utf8(diagnostics.writer_mut().sink().bytes.clone())
            .unwrap();
        let mut lines = text.split("\r\n");
        assert_eq!(lines.next(), Some("START"));
        let decoded = decode_samples(lines.next().unwrap()).unwrap();
        assert_eq!(decoded.row(CapturePhase::PositivePulse), [0x80, 0x81, 0x82]);

        let last = diagnostics.last_event().unwrap();
        assert_eq!(last.event, TelemetryEventKind::PulseCompleted);
        assert_eq!(last.since_previous, Some(5));
    }

    #[test]
    fn refused_frames_still_update_the_history() {
        let mut diagnostics = FirmwareDiagnostics::new(Collect {
            bytes: std::vec::Vec::new(),
            refuse: true,
        });
        let samples = SampleMatrix::new();
        // Each record is 37 bytes plus terminator, so the second one fills a frame.
        diagnostics.pulse_completed(1, &samples);
        diagnostics.pulse_completed(2, &samples);
        diagnostics.flush();

        assert!(diagnostics.writer_mut().sink().bytes.is_empty());
        assert_eq!(diagnostics.last_event().map(|r| r.at), Some(2));
    }

    #[test]
    fn recorder_off_keeps_only_the_start_marker() {
        let mut diagnostics = FirmwareDiagnostics::new(Collect::default());
        diagnostics.set_recording(false);
        diagnostics.run_started(0);
        diagnostics.pulse_completed(5, &SampleMatrix::new());
        diagnostics.flush();

        assert_eq!(diagnostics.writer_mut().sink().bytes, b"START\r\n");
        assert_eq!(
            diagnostics.last_event().map(|r| r.event),
            Some(TelemetryEventKind::PulseCompleted)
        );
    }
}
