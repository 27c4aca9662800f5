use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant as HostInstant};

use stimulator_core::capture::CapturePhase;
use stimulator_core::engine::{PulseEngine, WaveformState};
use stimulator_core::settings::{ChannelSettings, SettingsSource, SettingsStore};
use stimulator_core::telemetry::{
    LINE_TERMINATOR, RECORD_PREFIX, decode_samples, write_calibrated_row,
};
use stimulator_core::terminal::FIRMWARE_VERSION;
use stimulator_core::terminal::commands::CommandExecutor;
use stimulator_core::terminal::status::DiagnosticSummary;

use crate::board::{EmulatorBoard, FileStorage};

/// Offset of the channel record inside the emulated memory.
pub const SETTINGS_OFFSET: u32 = 0;

/// Storage file used when none is given on the command line.
pub const DEFAULT_STORAGE_PATH: &str = "stimulator-eeprom.bin";

/// Command-line options of an emulator session.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub storage: PathBuf,
    pub transcript: Option<PathBuf>,
    pub calibrated: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            storage: PathBuf::from(DEFAULT_STORAGE_PATH),
            transcript: None,
            calibrated: false,
        }
    }
}

pub struct Session {
    board: EmulatorBoard,
    engine: PulseEngine,
    settings: ChannelSettings,
    executor: CommandExecutor<SettingsStore<FileStorage>>,
    transcript: Option<TranscriptLogger>,
    started_at: HostInstant,
    calibrated: bool,
}

impl Session {
    pub fn new(options: &SessionOptions) -> io::Result<Self> {
        let transcript = options
            .transcript
            .as_deref()
            .map(TranscriptLogger::new)
            .transpose()?;

        let mut store = SettingsStore::new(FileStorage::open(&options.storage)?, SETTINGS_OFFSET);
        let loaded = store.load_with_source();
        let serial = store.load_serial();

        let mut session = Self {
            board: EmulatorBoard::new()?,
            engine: PulseEngine::new(),
            settings: loaded.settings,
            executor: CommandExecutor::new(store, FIRMWARE_VERSION).with_serial(serial),
            transcript,
            started_at: HostInstant::now(),
            calibrated: options.calibrated,
        };

        let source = match loaded.source {
            SettingsSource::Stored => "stored record",
            SettingsSource::Erased => "defaults (storage erased)",
            SettingsSource::ReadFailed => "defaults (storage unreadable)",
        };
        let path = session.executor.persistence().storage().path().display().to_string();
        session.log(
            TranscriptRole::Emulator,
            &format!("settings loaded from {path}: {source}"),
        )?;
        Ok(session)
    }

    /// Current waveform state.
    pub fn state(&self) -> WaveformState {
        self.engine.state()
    }

    /// Executes one terminal line and returns the reply lines.
    ///
    /// The console does its own echo, so `eo` only changes the executor state.
    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        self.log(TranscriptRole::Host, trimmed)?;

        let diagnostics = DiagnosticSummary {
            last_event: self.board.telemetry.recorder().latest().copied(),
            dropped: self.board.telemetry.dropped_lines(),
        };
        let mut reply = String::new();
        let rendered = match self.executor.execute(
            trimmed,
            &mut self.settings,
            &self.engine,
            &diagnostics,
        ) {
            Ok(outcome) => outcome.write_response(&mut reply),
            Err(error) => error.write_response(&mut reply),
        };
        self.board
            .telemetry
            .set_recording(self.executor.recording());
        if rendered.is_err() {
            reply = format!("ERR reply could not be rendered{LINE_TERMINATOR}");
        }

        self.emit(&reply)
    }

    /// Runs one iteration of the cooperative loop and returns diagnostic lines.
    pub fn step(&mut self) -> io::Result<Vec<String>> {
        self.engine.step(&mut self.settings, &mut self.board);
        let diagnostics = self.board.drain_diagnostics();
        if diagnostics.is_empty() {
            return Ok(Vec::new());
        }
        self.emit(&diagnostics)
    }

    /// Steps the engine for `duration`, collecting every diagnostic line.
    pub fn run_for(&mut self, duration: Duration, pause: Duration) -> io::Result<Vec<String>> {
        let deadline = HostInstant::now() + duration;
        let mut lines = Vec::new();
        while HostInstant::now() < deadline {
            lines.extend(self.step()?);
            std::thread::sleep(pause);
        }
        Ok(lines)
    }

    fn emit(&mut self, text: &str) -> io::Result<Vec<String>> {
        let mut lines = Vec::new();
        for line in text.split(LINE_TERMINATOR).filter(|line| !line.is_empty()) {
            self.log(TranscriptRole::Emulator, line)?;
            lines.push(line.to_string());
            if self.calibrated && line.starts_with(RECORD_PREFIX) {
                lines.extend(calibrated_rows(line));
            }
        }
        Ok(lines)
    }

    fn log(&mut self, role: TranscriptRole, line: &str) -> io::Result<()> {
        let elapsed = self.started_at.elapsed();
        match self.transcript.as_mut() {
            Some(transcript) => transcript.append_line(elapsed, role, line),
            None => Ok(()),
        }
    }
}

fn calibrated_rows(line: &str) -> Vec<String> {
    let Ok(samples) = decode_samples(line) else {
        return vec![format!("  (undecodable record `{line}`)")];
    };
    CapturePhase::ALL
        .iter()
        .enumerate()
        .map(|(index, phase)| {
            let mut row = format!("  phase {index}: ");
            // Writing into a String cannot fail.
            let _ = write_calibrated_row(&mut row, &samples, *phase);
            row
        })
        .collect()
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        logger.write_header()?;
        Ok(logger)
    }

    fn write_header(&mut self) -> io::Result<()> {
        writeln!(
            self.writer,
            "# Stimulator emulator transcript (version {FIRMWARE_VERSION})"
        )?;
        writeln!(
            self.writer,
            "# Timestamps are milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

#[derive(Clone, Copy)]
enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}
