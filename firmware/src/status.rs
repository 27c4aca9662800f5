#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Shared status storage for the firmware target.
//!
//! Lightweight atomics mirror what the pulse task knows about the running
//! train, and whether a terminal host is attached, so the USB task and the
//! frame queue can consult them without sharing the engine itself. Queue-full
//! drops are reported by `gs`.

use portable_atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use stimulator_core::engine::WaveformState;

/// Raw start flag last observed by the pulse task.
static START_FLAG: AtomicU8 = AtomicU8::new(0);
/// [`WaveformState::code`] of the engine after its latest step.
static ENGINE_STATE: AtomicU8 = AtomicU8::new(0);
/// Pulses completed since boot.
static PULSES: AtomicU32 = AtomicU32::new(0);
/// Terminal frames discarded because the transmit queue was full.
static DROPPED_FRAMES: AtomicU32 = AtomicU32::new(0);
/// Tracks whether the USB host has the terminal open (DTR asserted).
static TERMINAL_ATTACHED: AtomicBool = AtomicBool::new(false);

/// Point-in-time copy of the firmware status atomics.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FirmwareStatus {
    pub start_flag: u8,
    pub state: WaveformState,
    pub pulses: u32,
    pub dropped_frames: u32,
}

fn state_from_code(code: u8) -> WaveformState {
    match code {
        1 => WaveformState::PreWait,
        2 => WaveformState::Pulsing,
        3 => WaveformState::InterPulseWait,
        _ => WaveformState::Idle,
    }
}

/// Publishes the engine view after a step.
pub fn record_engine(start_flag: u8, state: WaveformState, pulses: u32) {
    START_FLAG.store(start_flag, Ordering::Relaxed);
    ENGINE_STATE.store(state.code(), Ordering::Relaxed);
    PULSES.store(pulses, Ordering::Relaxed);
}

/// Counts a frame the transmit queue refused.
pub fn record_dropped_frame() {
    DROPPED_FRAMES.fetch_add(1, Ordering::Relaxed);
}

/// Updates the cached terminal attachment flag.
pub fn set_terminal_attached(attached: bool) {
    TERMINAL_ATTACHED.store(attached, Ordering::Relaxed);
}

/// Returns `true` while a host holds the terminal open.
pub fn terminal_attached() -> bool {
    TERMINAL_ATTACHED.load(Ordering::Relaxed)
}

/// Builds a [`FirmwareStatus`] from the stored values.
pub fn snapshot() -> FirmwareStatus {
    FirmwareStatus {
        start_flag: START_FLAG.load(Ordering::Relaxed),
        state: state_from_code(ENGINE_STATE.load(Ordering::Relaxed)),
        pulses: PULSES.load(Ordering::Relaxed),
        dropped_frames: DROPPED_FRAMES.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_codes_round_trip() {
        for state in [
            WaveformState::Idle,
            WaveformState::PreWait,
            WaveformState::Pulsing,
            WaveformState::InterPulseWait,
        ] {
            assert_eq!(state_from_code(state.code()), state);
        }
        assert_eq!(state_from_code(0xEE), WaveformState::Idle);
    }

    #[test]
    fn snapshot_reflects_recorded_values() {
        record_engine(1, WaveformState::InterPulseWait, 42);
        set_terminal_attached(true);
        let before = snapshot().dropped_frames;
        record_dropped_frame();

        let status = snapshot();
        assert_eq!(status.start_flag, 1);
        assert_eq!(status.state, WaveformState::InterPulseWait);
        assert_eq!(status.pulses, 42);
        assert!(terminal_attached());
        assert!(status.dropped_frames > before);
    }
}
