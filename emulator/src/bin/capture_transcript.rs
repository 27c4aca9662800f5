use std::env;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

#[allow(dead_code)]
#[path = "../board.rs"]
mod board;
#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use session::{Session, SessionOptions};

const STEP_PAUSE: Duration = Duration::from_micros(250);

fn main() -> io::Result<()> {
    let out_dir = env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("transcripts"), PathBuf::from);
    let storage = out_dir.join("eeprom.bin");
    // Start each capture from erased memory.
    if storage.exists() {
        std::fs::remove_file(&storage)?;
    }

    record_pulse_train(&SessionOptions {
        storage: storage.clone(),
        transcript: Some(out_dir.join("pulse-train.log")),
        calibrated: true,
    })?;
    record_power_cycle(&SessionOptions {
        storage,
        transcript: Some(out_dir.join("power-cycle.log")),
        calibrated: false,
    })
}

fn record_pulse_train(options: &SessionOptions) -> io::Result<()> {
    let mut session = Session::new(options)?;
    for line in ["eo", "ve", "sn", "gs", "ss", "sv 20,20", "st 10,10,2,10,40", "ru"] {
        session.handle_command(line)?;
    }
    session.run_for(Duration::from_millis(200), STEP_PAUSE)?;
    for line in ["gs", "sv 5,5", "of"] {
        session.handle_command(line)?;
    }
    session.run_for(Duration::from_millis(5), STEP_PAUSE)?;
    session.handle_command("wr")?;
    Ok(())
}

fn record_power_cycle(options: &SessionOptions) -> io::Result<()> {
    let mut session = Session::new(options)?;
    for line in ["sn", "ss", "gs", "he", "he st", "he xx", "zz", "sv 60,1"] {
        session.handle_command(line)?;
    }
    Ok(())
}
