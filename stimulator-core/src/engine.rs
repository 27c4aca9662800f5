//! Waveform state machine driving one stimulation channel.
//!
//! [`PulseEngine::step`] is called once per iteration of the cooperative main
//! loop. Waiting states only compare the tick clock against the recorded phase
//! start and return; the pulsing state runs a whole biphasic pulse, measurement
//! passes included, before it returns. Holding the loop for the width of a
//! pulse is intentional: the phase widths are busy-waited and must not be
//! stretched by other work.

use core::fmt;

use crate::capture::{CapturePhase, SampleMatrix, Sampler};
use crate::output::{ActivityIndicator, Amplitude, OutputChannel, PulseDelay, PulseOutput};
use crate::settings::{ChannelSettings, StartFlag, TimingSlot};
use crate::timebase::{Tick, TimeBase};

/// Phase of the stimulation waveform.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WaveformState {
    /// No pulse train requested.
    #[default]
    Idle,
    /// Waiting out the pre-pulse delay after a start request.
    PreWait,
    /// The next step emits a pulse.
    Pulsing,
    /// Waiting out the period between two pulses.
    InterPulseWait,
}

impl WaveformState {
    /// Short lowercase label used by status output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            WaveformState::Idle => "idle",
            WaveformState::PreWait => "pre-wait",
            WaveformState::Pulsing => "pulsing",
            WaveformState::InterPulseWait => "inter-pulse",
        }
    }

    /// Numeric code reported by the status line.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            WaveformState::Idle => 0,
            WaveformState::PreWait => 1,
            WaveformState::Pulsing => 2,
            WaveformState::InterPulseWait => 3,
        }
    }
}

impl fmt::Display for WaveformState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver for the diagnostics emitted by the engine.
pub trait DiagnosticSink {
    /// A start request was accepted; the run marker goes out here.
    fn run_started(&mut self, at: Tick);

    /// A pulse finished; `samples` holds its measurement matrix.
    fn pulse_completed(&mut self, at: Tick, samples: &SampleMatrix);

    /// A running train was aborted by a cleared or invalid flag.
    fn stopped(&mut self, _at: Tick) {}
}

/// Every collaborator the engine talks to during a step.
pub trait Board:
    TimeBase + PulseOutput + ActivityIndicator + PulseDelay + Sampler + DiagnosticSink
{
}

impl<T> Board for T where
    T: TimeBase + PulseOutput + ActivityIndicator + PulseDelay + Sampler + DiagnosticSink + ?Sized
{
}

/// Pulse sequencer for one output channel.
#[derive(Clone, Debug, Default)]
pub struct PulseEngine {
    state: WaveformState,
    phase_start: Tick,
    pulses: u32,
}

impl PulseEngine {
    /// Creates an idle engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: WaveformState::Idle,
            phase_start: 0,
            pulses: 0,
        }
    }

    /// Current waveform state.
    #[must_use]
    pub const fn state(&self) -> WaveformState {
        self.state
    }

    /// Tick captured at the last phase transition.
    #[must_use]
    pub const fn phase_start(&self) -> Tick {
        self.phase_start
    }

    /// Pulses emitted since the engine was created.
    #[must_use]
    pub const fn pulses(&self) -> u32 {
        self.pulses
    }

    /// Advances the waveform by one step and returns the resulting state.
    pub fn step<B: Board + ?Sized>(
        &mut self,
        settings: &mut ChannelSettings,
        board: &mut B,
    ) -> WaveformState {
        match settings.flag() {
            None | Some(StartFlag::Off) => {
                settings.normalize_flag();
                self.abort(board);
                return self.state;
            }
            Some(StartFlag::Start | StartFlag::Running | StartFlag::Reserved) => {}
        }

        match self.state {
            WaveformState::Idle => self.idle(settings, board),
            WaveformState::PreWait => self.pre_wait(settings, board),
            WaveformState::Pulsing => self.pulse(settings, board),
            WaveformState::InterPulseWait => self.inter_pulse_wait(settings, board),
        }
        self.state
    }

    fn abort<B: Board + ?Sized>(&mut self, board: &mut B) {
        if self.state != WaveformState::Idle {
            self.state = WaveformState::Idle;
            let now = board.now();
            board.stopped(now);
        }
    }

    fn idle<B: Board + ?Sized>(&mut self, settings: &mut ChannelSettings, board: &mut B) {
        if settings.flag() == Some(StartFlag::Start) {
            self.phase_start = board.now();
            board.run_started(self.phase_start);
            self.state = WaveformState::PreWait;
        } else {
            // Only a fresh start request may leave idle.
            settings.set_flag(StartFlag::Off);
        }
    }

    fn pre_wait<B: Board + ?Sized>(&mut self, settings: &mut ChannelSettings, board: &mut B) {
        if board.elapsed(self.phase_start) >= settings.time(TimingSlot::PreWait) {
            settings.set_flag(StartFlag::Running);
            self.phase_start = board.now();
            self.state = WaveformState::Pulsing;
        }
    }

    fn inter_pulse_wait<B: Board + ?Sized>(&mut self, settings: &ChannelSettings, board: &mut B) {
        if board.elapsed(self.phase_start) >= settings.time(TimingSlot::InterPulsePeriod) {
            self.phase_start = board.now();
            self.state = WaveformState::Pulsing;
        }
    }

    fn pulse<B: Board + ?Sized>(&mut self, settings: &ChannelSettings, board: &mut B) {
        let gap = settings.time(TimingSlot::InterPhaseGap);
        let negative_width = settings.time(TimingSlot::NegativeWidth);

        board.set_active(true);

        board.set_voltage(
            OutputChannel::Positive,
            Amplitude::saturating(settings.positive_amplitude()),
        );
        board.set_positive_polarity();
        board.start();
        board.delay_units(settings.time(TimingSlot::PositiveWidth));
        board.clear_output();
        board.await_and_store(CapturePhase::PositivePulse);

        board.start();
        if gap > 0 {
            board.delay_units(gap);
        }
        board.await_and_store(CapturePhase::AfterPositive);

        board.set_voltage(
            OutputChannel::Negative,
            Amplitude::saturating(settings.negative_amplitude()),
        );
        if negative_width > 0 {
            board.set_negative_polarity();
            board.start();
            board.delay_units(negative_width);
            board.clear_output();
            board.await_and_store(CapturePhase::NegativePulse);
            board.start();
        }

        self.phase_start = board.now();
        board.set_active(false);
        if negative_width > 0 {
            board.await_and_store(CapturePhase::AfterNegative);
        }

        let samples = *board.samples();
        board.pulse_completed(self.phase_start, &samples);
        self.pulses = self.pulses.wrapping_add(1);
        self.state = WaveformState::InterPulseWait;
    }
}
