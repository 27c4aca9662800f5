mod board;
mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;
use std::sync::mpsc::{self, TryRecvError};
use std::thread;
use std::time::Duration;

use stimulator_core::terminal::FIRMWARE_VERSION;

use session::{Session, SessionOptions};

/// Pause between loop iterations when no input is waiting.
const IDLE_PAUSE: Duration = Duration::from_micros(250);

fn main() -> io::Result<()> {
    let options = parse_options(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!(
            "Usage: stimulator-emulator [--storage <path>] [--transcript <path>] [--calibrated]"
        );
        process::exit(2);
    });

    let mut session = Session::new(&options)?;
    let stdout = io::stdout();
    let mut writer = stdout.lock();

    writeln!(writer, "Stimulator Version {FIRMWARE_VERSION}")?;
    writeln!(
        writer,
        "Emulator ready. Type `he` for commands or `exit` to quit."
    )?;

    let (lines, input) = mpsc::channel::<String>();
    thread::Builder::new()
        .name("terminal-rx".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if lines.send(line).is_err() {
                    break;
                }
            }
        })?;

    loop {
        match input.try_recv() {
            Ok(line) => {
                let trimmed = line.trim();
                if should_terminate(trimmed) {
                    writeln!(writer, "Session closed.")?;
                    break;
                }
                for response in session.handle_command(trimmed)? {
                    writeln!(writer, "{response}")?;
                }
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                writeln!(writer)?;
                break;
            }
        }

        for line in session.step()? {
            writeln!(writer, "{line}")?;
        }
        writer.flush()?;
        thread::sleep(IDLE_PAUSE);
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options(mut args: impl Iterator<Item = String>) -> Result<SessionOptions, String> {
    let mut options = SessionOptions::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--storage" => {
                options.storage = args
                    .next()
                    .map(PathBuf::from)
                    .ok_or("Expected value after --storage")?;
            }
            "--transcript" => {
                options.transcript = Some(
                    args.next()
                        .map(PathBuf::from)
                        .ok_or("Expected value after --transcript")?,
                );
            }
            "--calibrated" => options.calibrated = true,
            other => {
                if let Some(value) = other.strip_prefix("--storage=") {
                    options.storage = PathBuf::from(value);
                } else if let Some(value) = other.strip_prefix("--transcript=") {
                    options.transcript = Some(PathBuf::from(value));
                } else {
                    return Err(format!("Unknown argument `{other}`"));
                }
            }
        }
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|arg| (*arg).to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn options_default_to_the_local_storage_file() {
        let options = parse_options(args(&[])).unwrap();
        assert_eq!(options.storage, PathBuf::from(session::DEFAULT_STORAGE_PATH));
        assert!(options.transcript.is_none());
        assert!(!options.calibrated);
    }

    #[test]
    fn options_accept_both_flag_spellings() {
        let options = parse_options(args(&[
            "--storage=eeprom.bin",
            "--transcript",
            "out/session.log",
            "--calibrated",
        ]))
        .unwrap();
        assert_eq!(options.storage, PathBuf::from("eeprom.bin"));
        assert_eq!(options.transcript, Some(PathBuf::from("out/session.log")));
        assert!(options.calibrated);
    }

    #[test]
    fn unknown_and_incomplete_arguments_are_rejected() {
        assert!(parse_options(args(&["--verbose"])).is_err());
        assert!(parse_options(args(&["--storage"])).is_err());
    }
}
