//! Terminal command dispatcher.
//!
//! This module applies parsed terminal commands to the live channel settings
//! and renders the replies host tooling expects. It stays `no_std` friendly so
//! the firmware and emulator crates share the same implementation.

use core::fmt;

use embedded_storage::Storage;

use crate::engine::PulseEngine;
use crate::settings::{ChannelSettings, SettingsError, SettingsStore, TIMING_SLOTS};
use crate::telemetry::LINE_TERMINATOR;

use super::grammar::{self, COMMANDS, Command};
use super::status::{DiagnosticSummary, StatusFormatter, StatusSnapshot};

/// Command execution successes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CommandOutcome {
    Started,
    Stopped,
    Voltages([u8; 2]),
    Times([u16; TIMING_SLOTS]),
    Settings(ChannelSettings),
    Status(StatusSnapshot),
    Persisted,
    Version(&'static str),
    /// Serial number after the command; `None` while never assigned.
    Serial(Option<u16>),
    EchoDisabled,
    Recorder(bool),
    Help(Option<&'static grammar::CommandSpec>),
}

impl CommandOutcome {
    /// Writes the reply lines, each followed by the line terminator.
    pub fn write_response<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        match self {
            CommandOutcome::Started => write_line(writer, format_args!("OK run")),
            CommandOutcome::Stopped => write_line(writer, format_args!("OK off")),
            CommandOutcome::Voltages(voltages) => write_voltages(writer, *voltages),
            CommandOutcome::Times(times) => write_times(writer, times),
            CommandOutcome::Settings(settings) => {
                write_voltages(writer, settings.voltages)?;
                write_times(writer, &settings.times)
            }
            CommandOutcome::Status(snapshot) => StatusFormatter::new(snapshot).write_all(writer),
            CommandOutcome::Persisted => write_line(writer, format_args!("OK saved")),
            CommandOutcome::Version(version) => {
                write_line(writer, format_args!("Stimulator Version {version}"))
            }
            CommandOutcome::Serial(Some(serial)) => {
                write_line(writer, format_args!("Serial:{serial}"))
            }
            CommandOutcome::Serial(None) => write_line(writer, format_args!("Serial:")),
            CommandOutcome::EchoDisabled => write_line(writer, format_args!("OK echo off")),
            CommandOutcome::Recorder(true) => write_line(writer, format_args!("OK recorder on")),
            CommandOutcome::Recorder(false) => write_line(writer, format_args!("OK recorder off")),
            CommandOutcome::Help(Some(entry)) => {
                write_line(writer, format_args!("{}  {}", entry.usage, entry.summary))
            }
            CommandOutcome::Help(None) => {
                for entry in &COMMANDS {
                    write_line(writer, format_args!("{:<28}{}", entry.usage, entry.summary))?;
                }
                Ok(())
            }
        }
    }
}

fn write_line<W: fmt::Write>(writer: &mut W, args: fmt::Arguments<'_>) -> fmt::Result {
    writer.write_fmt(args)?;
    writer.write_str(LINE_TERMINATOR)
}

fn write_voltages<W: fmt::Write>(writer: &mut W, voltages: [u8; 2]) -> fmt::Result {
    write_line(
        writer,
        format_args!("Voltage V1, V2: {}, {}", voltages[0], voltages[1]),
    )
}

fn write_times<W: fmt::Write>(writer: &mut W, times: &[u16; TIMING_SLOTS]) -> fmt::Result {
    write_line(
        writer,
        format_args!(
            "Timings T0,T1,T2,T3,T4: {},{},{},{},{}",
            times[0], times[1], times[2], times[3], times[4]
        ),
    )
}

/// Errors surfaced while executing a command.
#[derive(Debug, PartialEq)]
pub enum CommandError<'a, E> {
    Parse(grammar::ParseError<'a>),
    /// Settings are frozen while a pulse train is requested or running.
    Busy,
    Settings(SettingsError),
    /// `he` named a keyword that does not exist.
    NoHelp(&'a str),
    Persist(E),
}

impl<'a, E> From<grammar::ParseError<'a>> for CommandError<'a, E> {
    fn from(error: grammar::ParseError<'a>) -> Self {
        Self::Parse(error)
    }
}

impl<E> From<SettingsError> for CommandError<'_, E> {
    fn from(error: SettingsError) -> Self {
        Self::Settings(error)
    }
}

impl<E: fmt::Debug> fmt::Display for CommandError<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Parse(error) => fmt::Display::fmt(error, f),
            CommandError::Busy => f.write_str("stop the pulse train first"),
            CommandError::Settings(error) => fmt::Display::fmt(error, f),
            CommandError::NoHelp(topic) => write!(f, "no help for `{topic}`"),
            CommandError::Persist(error) => write!(f, "storage write failed: {error:?}"),
        }
    }
}

impl<E: fmt::Debug> CommandError<'_, E> {
    /// Writes the error as an `ERR` reply line.
    pub fn write_response<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write_line(writer, format_args!("ERR {self}"))
    }
}

/// Non-volatile destination for the `wr` and `sn <number>` commands.
pub trait SettingsPersistence {
    type Error: fmt::Debug;

    fn persist(&mut self, settings: &ChannelSettings) -> Result<(), Self::Error>;

    fn persist_serial(&mut self, serial: u16) -> Result<(), Self::Error>;
}

impl<S> SettingsPersistence for SettingsStore<S>
where
    S: Storage,
    S::Error: fmt::Debug,
{
    type Error = S::Error;

    fn persist(&mut self, settings: &ChannelSettings) -> Result<(), Self::Error> {
        SettingsStore::persist(self, settings)
    }

    fn persist_serial(&mut self, serial: u16) -> Result<(), Self::Error> {
        SettingsStore::persist_serial(self, serial)
    }
}

/// Persistence backend that accepts and discards every write.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPersistence;

impl SettingsPersistence for NoPersistence {
    type Error = core::convert::Infallible;

    fn persist(&mut self, _: &ChannelSettings) -> Result<(), Self::Error> {
        Ok(())
    }

    fn persist_serial(&mut self, _: u16) -> Result<(), Self::Error> {
        Ok(())
    }
}

type CommandResult<'a, P> =
    Result<CommandOutcome, CommandError<'a, <P as SettingsPersistence>::Error>>;

/// Dispatches terminal commands against the live settings.
///
/// Besides the settings passed to each call, the executor owns the console
/// state the commands toggle: character echo, the sample recorder and the
/// serial number. Echo and the recorder start enabled.
pub struct CommandExecutor<P> {
    persistence: P,
    version: &'static str,
    serial: Option<u16>,
    echo: bool,
    recording: bool,
}

impl<P> CommandExecutor<P> {
    /// Creates a new executor writing `wr` requests to `persistence`.
    pub const fn new(persistence: P, version: &'static str) -> Self {
        Self {
            persistence,
            version,
            serial: None,
            echo: true,
            recording: true,
        }
    }

    /// Sets the serial number loaded from storage.
    #[must_use]
    pub const fn with_serial(mut self, serial: Option<u16>) -> Self {
        self.serial = serial;
        self
    }

    /// Whether typed characters should be echoed back.
    #[must_use]
    pub const fn echo(&self) -> bool {
        self.echo
    }

    /// Turns echo back on, e.g. when a new host attaches.
    pub fn restore_echo(&mut self) {
        self.echo = true;
    }

    /// Whether a sample record should follow each pulse.
    #[must_use]
    pub const fn recording(&self) -> bool {
        self.recording
    }

    /// Returns an immutable reference to the persistence backend.
    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    /// Consumes the executor and yields the persistence backend.
    pub fn into_inner(self) -> P {
        self.persistence
    }
}

impl<P> CommandExecutor<P>
where
    P: SettingsPersistence,
{
    /// Parses and executes a terminal line.
    ///
    /// `diagnostics` feeds the status reply.
    pub fn execute<'a>(
        &mut self,
        line: &'a str,
        settings: &mut ChannelSettings,
        engine: &PulseEngine,
        diagnostics: &DiagnosticSummary,
    ) -> CommandResult<'a, P> {
        let command = grammar::parse(line)?;
        self.dispatch(command, settings, engine, diagnostics)
    }

    fn dispatch<'a>(
        &mut self,
        command: Command<'a>,
        settings: &mut ChannelSettings,
        engine: &PulseEngine,
        diagnostics: &DiagnosticSummary,
    ) -> CommandResult<'a, P> {
        match command {
            Command::Run => {
                if !settings.is_active() {
                    settings.request_start();
                }
                Ok(CommandOutcome::Started)
            }
            Command::Off => {
                settings.request_stop();
                Ok(CommandOutcome::Stopped)
            }
            Command::SetVoltages { positive, negative } => {
                ensure_idle(settings)?;
                settings.set_amplitudes(positive, negative)?;
                Ok(CommandOutcome::Voltages(settings.voltages))
            }
            Command::SetTimes(times) => {
                ensure_idle(settings)?;
                settings.set_times(times);
                Ok(CommandOutcome::Times(settings.times))
            }
            Command::ShowSettings => Ok(CommandOutcome::Settings(*settings)),
            Command::Status => Ok(CommandOutcome::Status(
                StatusSnapshot::capture(settings, engine)
                    .with_recording(self.recording)
                    .with_diagnostics(diagnostics),
            )),
            Command::Write => {
                ensure_idle(settings)?;
                self.persistence
                    .persist(settings)
                    .map_err(CommandError::Persist)?;
                Ok(CommandOutcome::Persisted)
            }
            Command::Version => Ok(CommandOutcome::Version(self.version)),
            Command::Serial(None) => Ok(CommandOutcome::Serial(self.serial)),
            Command::Serial(Some(serial)) => {
                ensure_idle(settings)?;
                self.persistence
                    .persist_serial(serial)
                    .map_err(CommandError::Persist)?;
                self.serial = Some(serial);
                Ok(CommandOutcome::Serial(self.serial))
            }
            Command::EchoOff => {
                self.echo = false;
                Ok(CommandOutcome::EchoDisabled)
            }
            Command::Recorder(on) => {
                self.recording = on;
                Ok(CommandOutcome::Recorder(on))
            }
            Command::Help { topic: None } => Ok(CommandOutcome::Help(None)),
            Command::Help { topic: Some(topic) } => grammar::find_command(topic)
                .map(|entry| CommandOutcome::Help(Some(entry)))
                .ok_or(CommandError::NoHelp(topic)),
        }
    }
}

fn ensure_idle<'a, E>(settings: &ChannelSettings) -> Result<(), CommandError<'a, E>> {
    if settings.is_active() {
        Err(CommandError::Busy)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::StartFlag;
    use crate::terminal::grammar::ParseErrorKind;
    use heapless::String;

    const NO_DIAGNOSTICS: DiagnosticSummary = DiagnosticSummary {
        last_event: None,
        dropped: 0,
    };

    #[derive(Default)]
    struct RecordingPersistence {
        writes: usize,
        last: Option<ChannelSettings>,
        serial: Option<u16>,
        fail: bool,
    }

    impl SettingsPersistence for RecordingPersistence {
        type Error = &'static str;

        fn persist(&mut self, settings: &ChannelSettings) -> Result<(), Self::Error> {
            if self.fail {
                return Err("flash busy");
            }
            self.writes += 1;
            self.last = Some(*settings);
            Ok(())
        }

        fn persist_serial(&mut self, serial: u16) -> Result<(), Self::Error> {
            if self.fail {
                return Err("flash busy");
            }
            self.serial = Some(serial);
            Ok(())
        }
    }

    fn executor() -> CommandExecutor<RecordingPersistence> {
        CommandExecutor::new(RecordingPersistence::default(), "1.2.3")
    }

    fn respond(outcome: &CommandOutcome) -> String<1024> {
        let mut out = String::new();
        outcome.write_response(&mut out).unwrap();
        out
    }

    #[test]
    fn run_and_off_drive_the_start_flag() {
        let mut executor = executor();
        let engine = PulseEngine::new();
        let mut settings = ChannelSettings::DEFAULT;

        let outcome = executor.execute("ru", &mut settings, &engine, &NO_DIAGNOSTICS).unwrap();
        assert_eq!(outcome, CommandOutcome::Started);
        assert_eq!(settings.flag(), Some(StartFlag::Start));

        settings.set_flag(StartFlag::Running);
        executor.execute("ru", &mut settings, &engine, &NO_DIAGNOSTICS).unwrap();
        assert_eq!(settings.flag(), Some(StartFlag::Running));

        executor.execute("of", &mut settings, &engine, &NO_DIAGNOSTICS).unwrap();
        assert_eq!(settings.flag(), Some(StartFlag::Off));
    }

    #[test]
    fn set_voltages_validates_range() {
        let mut executor = executor();
        let engine = PulseEngine::new();
        let mut settings = ChannelSettings::DEFAULT;

        let outcome = executor
            .execute("sv 40,10", &mut settings, &engine, &NO_DIAGNOSTICS)
            .unwrap();
        assert_eq!(settings.voltages, [40, 10]);
        assert_eq!(respond(&outcome).as_str(), "Voltage V1, V2: 40, 10\r\n");

        let error = executor
            .execute("sv 51,10", &mut settings, &engine, &NO_DIAGNOSTICS)
            .unwrap_err();
        assert_eq!(
            error,
            CommandError::Settings(SettingsError::AmplitudeOutOfRange { value: 51 })
        );
        assert_eq!(settings.voltages, [40, 10]);
    }

    #[test]
    fn settings_are_frozen_while_running() {
        let mut executor = executor();
        let engine = PulseEngine::new();
        let mut settings = ChannelSettings::DEFAULT;
        settings.request_start();

        for line in ["sv 1,1", "st 1,1,1,1,1", "wr"] {
            assert_eq!(
                executor.execute(line, &mut settings, &engine, &NO_DIAGNOSTICS),
                Err(CommandError::Busy)
            );
        }
        assert_eq!(settings.voltages, ChannelSettings::DEFAULT.voltages);
        assert_eq!(settings.times, ChannelSettings::DEFAULT.times);
        assert_eq!(executor.persistence().writes, 0);
    }

    #[test]
    fn show_settings_prints_both_lines() {
        let mut executor = executor();
        let engine = PulseEngine::new();
        let mut settings = ChannelSettings::DEFAULT;
        executor
            .execute("st 500,20,5,20,800", &mut settings, &engine, &NO_DIAGNOSTICS)
            .unwrap();

        let outcome = executor.execute("ss", &mut settings, &engine, &NO_DIAGNOSTICS).unwrap();
        assert_eq!(
            respond(&outcome).as_str(),
            "Voltage V1, V2: 25, 25\r\nTimings T0,T1,T2,T3,T4: 500,20,5,20,800\r\n"
        );
    }

    #[test]
    fn write_persists_current_settings() {
        let mut executor = executor();
        let engine = PulseEngine::new();
        let mut settings = ChannelSettings::DEFAULT;
        settings.voltages = [10, 20];

        let outcome = executor.execute("wr", &mut settings, &engine, &NO_DIAGNOSTICS).unwrap();
        assert_eq!(outcome, CommandOutcome::Persisted);
        assert_eq!(executor.persistence().writes, 1);
        assert_eq!(executor.persistence().last, Some(settings));
    }

    #[test]
    fn persistence_failure_is_reported() {
        let mut executor = CommandExecutor::new(
            RecordingPersistence {
                fail: true,
                ..RecordingPersistence::default()
            },
            "1.2.3",
        );
        let mut settings = ChannelSettings::DEFAULT;
        let error = executor
            .execute("wr", &mut settings, &PulseEngine::new(), &NO_DIAGNOSTICS)
            .unwrap_err();

        let mut out: String<64> = String::new();
        error.write_response(&mut out).unwrap();
        assert_eq!(out.as_str(), "ERR storage write failed: \"flash busy\"\r\n");
    }

    #[test]
    fn version_and_status_replies() {
        let mut executor = executor();
        let engine = PulseEngine::new();
        let mut settings = ChannelSettings::DEFAULT;

        let version = executor.execute("ve", &mut settings, &engine, &NO_DIAGNOSTICS).unwrap();
        assert_eq!(respond(&version).as_str(), "Stimulator Version 1.2.3\r\n");

        let status = executor.execute("gs", &mut settings, &engine, &NO_DIAGNOSTICS).unwrap();
        assert_eq!(
            respond(&status).as_str(),
            "!: 01,00\r\nstate=idle pulses=0 last=none dropped=0\r\n"
        );
    }

    #[test]
    fn help_lists_every_command() {
        let mut executor = executor();
        let engine = PulseEngine::new();
        let mut settings = ChannelSettings::DEFAULT;

        let outcome = executor.execute("he", &mut settings, &engine, &NO_DIAGNOSTICS).unwrap();
        let text = respond(&outcome);
        assert_eq!(text.matches(LINE_TERMINATOR).count(), COMMANDS.len());
        assert!(text.contains("st <t0>,<t1>,<t2>,<t3>,<t4>"));

        let outcome = executor
            .execute("he sv", &mut settings, &engine, &NO_DIAGNOSTICS)
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Help(grammar::find_command("sv")));
        assert_eq!(
            respond(&outcome).as_str(),
            "sv <v1>,<v2>  set positive and negative amplitude (0-50)\r\n"
        );
    }

    #[test]
    fn help_for_unknown_keyword_is_an_error() {
        let mut executor = executor();
        let mut settings = ChannelSettings::DEFAULT;
        let error = executor
            .execute("he xx", &mut settings, &PulseEngine::new(), &NO_DIAGNOSTICS)
            .unwrap_err();
        assert_eq!(error, CommandError::NoHelp("xx"));

        let mut out: String<64> = String::new();
        error.write_response(&mut out).unwrap();
        assert_eq!(out.as_str(), "ERR no help for `xx`\r\n");
    }

    #[test]
    fn host_handshake_is_answered_line_by_line() {
        let mut executor = executor().with_serial(Some(1042));
        let engine = PulseEngine::new();
        let mut settings = ChannelSettings::DEFAULT;

        let mut transcript: String<256> = String::new();
        for line in ["eo", "ve", "sn", "gs", "ss"] {
            executor
                .execute(line, &mut settings, &engine, &NO_DIAGNOSTICS)
                .unwrap()
                .write_response(&mut transcript)
                .unwrap();
        }
        assert_eq!(
            transcript.as_str(),
            "OK echo off\r\n\
             Stimulator Version 1.2.3\r\n\
             Serial:1042\r\n\
             !: 01,00\r\n\
             state=idle pulses=0 last=none dropped=0\r\n\
             Voltage V1, V2: 25, 25\r\n\
             Timings T0,T1,T2,T3,T4: 1000,50,50,50,1000\r\n"
        );
        assert!(!executor.echo());

        executor.restore_echo();
        assert!(executor.echo());
    }

    #[test]
    fn serial_number_is_stored_and_reported() {
        let mut executor = executor();
        let engine = PulseEngine::new();
        let mut settings = ChannelSettings::DEFAULT;

        let unset = executor.execute("sn", &mut settings, &engine, &NO_DIAGNOSTICS).unwrap();
        assert_eq!(respond(&unset).as_str(), "Serial:\r\n");

        let stored = executor
            .execute("sn 2207C", &mut settings, &engine, &NO_DIAGNOSTICS)
            .unwrap();
        assert_eq!(respond(&stored).as_str(), "Serial:2207\r\n");
        assert_eq!(executor.persistence().serial, Some(2207));
        assert_eq!(executor.persistence().writes, 0);

        settings.request_start();
        assert_eq!(
            executor.execute("sn 1", &mut settings, &engine, &NO_DIAGNOSTICS),
            Err(CommandError::Busy)
        );
        assert_eq!(
            executor.execute("sn", &mut settings, &engine, &NO_DIAGNOSTICS),
            Ok(CommandOutcome::Serial(Some(2207)))
        );
    }

    #[test]
    fn recorder_commands_drive_the_status_field() {
        let mut executor = executor();
        let engine = PulseEngine::new();
        let mut settings = ChannelSettings::DEFAULT;

        let off = executor.execute("nr", &mut settings, &engine, &NO_DIAGNOSTICS).unwrap();
        assert_eq!(respond(&off).as_str(), "OK recorder off\r\n");
        assert!(!executor.recording());
        let status = executor.execute("gs", &mut settings, &engine, &NO_DIAGNOSTICS).unwrap();
        assert!(respond(&status).starts_with("!: 00,00\r\n"));

        settings.request_start();
        executor.execute("re", &mut settings, &engine, &NO_DIAGNOSTICS).unwrap();
        assert!(executor.recording());
        let status = executor.execute("gs", &mut settings, &engine, &NO_DIAGNOSTICS).unwrap();
        assert!(respond(&status).starts_with("!: 01,01\r\n"));
    }

    #[test]
    fn parse_errors_render_as_err_lines() {
        let mut executor = executor();
        let mut settings = ChannelSettings::DEFAULT;
        let error = executor
            .execute("zz", &mut settings, &PulseEngine::new(), &NO_DIAGNOSTICS)
            .unwrap_err();
        assert!(matches!(
            error,
            CommandError::Parse(grammar::ParseError {
                kind: ParseErrorKind::UnknownCommand,
                ..
            })
        ));

        let mut out: String<64> = String::new();
        error.write_response(&mut out).unwrap();
        assert_eq!(out.as_str(), "ERR unknown command `zz`\r\n");
    }
}
