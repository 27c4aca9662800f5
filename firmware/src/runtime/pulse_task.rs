use embassy_futures::yield_now;

use stimulator_core::engine::PulseEngine;
use stimulator_core::settings::{ChannelSettings, SettingsStore};
use stimulator_core::terminal::status::DiagnosticSummary;

use super::{QueueSink, TERMINAL_RX};
use crate::hw::{SettingsFlash, StimulatorBoard};
use crate::status;
use crate::terminal::TerminalSession;
use crate::terminal::frames::FrameWriter;

/// Cooperative loop: drain terminal input, step the engine, yield.
#[embassy_executor::task]
pub async fn run(
    mut board: StimulatorBoard<QueueSink>,
    mut settings: ChannelSettings,
    mut terminal: TerminalSession<SettingsStore<SettingsFlash>>,
) -> ! {
    let mut engine = PulseEngine::new();
    let mut replies = FrameWriter::new(QueueSink);
    let receiver = TERMINAL_RX.receiver();
    let mut attached = status::terminal_attached();

    loop {
        let now_attached = status::terminal_attached();
        if now_attached != attached {
            terminal.reset();
            attached = now_attached;
        }

        while let Ok(packet) = receiver.try_receive() {
            let diagnostics = DiagnosticSummary {
                last_event: board.diagnostics.last_event(),
                dropped: status::snapshot().dropped_frames,
            };
            let written = terminal.ingest(
                &packet,
                &mut settings,
                &engine,
                &diagnostics,
                &mut replies,
            );
            if written.and_then(|_| replies.flush()).is_err() {
                defmt::warn!("terminal: reply dropped, transmit queue full");
            }
            board.diagnostics.set_recording(terminal.recording());
        }

        let previous = engine.state();
        let state = engine.step(&mut settings, &mut board);
        board.diagnostics.flush();
        status::record_engine(settings.start_flag, state, engine.pulses());
        if state != previous {
            defmt::debug!("engine: {} -> {}", previous, state);
        }

        yield_now().await;
    }
}
