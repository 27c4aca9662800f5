//! Board bring-up and the collaborators the pulse engine drives.

pub mod adc;
pub mod output;

use embassy_stm32::flash::{Blocking as FlashBlocking, Flash};
use embassy_time::{Duration, Instant};
use embedded_storage::nor_flash::RmwNorFlashStorage;

use stimulator_core::capture::{CapturePhase, SampleCapture, SampleMatrix, Sampler};
use stimulator_core::engine::DiagnosticSink;
use stimulator_core::output::{
    ActivityIndicator, Amplitude, OutputChannel, PULSE_UNIT_MICROS, PulseDelay, PulseOutput,
};
use stimulator_core::timebase::{Tick, TimeBase};

use crate::telemetry::FirmwareDiagnostics;
use crate::terminal::frames::FrameSink;

pub use adc::{AdcConverter, CAPTURE};
pub use output::{Mcp4802, OutputStage, PolarityLine, force_outputs_off};

/// Erase granularity of the STM32G0B1 flash.
pub const FLASH_PAGE_LEN: usize = 2048;

/// Settings live in the last flash page.
pub const SETTINGS_OFFSET: u32 = 512 * 1024 - 2048;

/// Read-modify-write view of the settings page.
pub type SettingsFlash = RmwNorFlashStorage<'static, Flash<'static, FlashBlocking>>;

/// Millisecond tick derived from the embassy time driver.
pub struct FirmwareClock;

impl TimeBase for FirmwareClock {
    fn now(&mut self) -> Tick {
        let [low, high, ..] = Instant::now().as_millis().to_le_bytes();
        Tick::from_le_bytes([low, high])
    }
}

/// Blocking delay for pulse widths.
pub struct BusyDelay;

impl PulseDelay for BusyDelay {
    fn delay_units(&mut self, units: u16) {
        let micros = u64::from(units) * u64::from(PULSE_UNIT_MICROS);
        embassy_time::block_for(Duration::from_micros(micros));
    }
}

/// Every hardware collaborator of the pulse engine.
pub struct StimulatorBoard<S> {
    pub clock: FirmwareClock,
    pub output: OutputStage,
    pub delay: BusyDelay,
    pub capture: SampleCapture<'static, AdcConverter>,
    pub diagnostics: FirmwareDiagnostics<S>,
}

impl<S: FrameSink> StimulatorBoard<S> {
    pub fn new(output: OutputStage, converter: AdcConverter, sink: S) -> Self {
        Self {
            clock: FirmwareClock,
            output,
            delay: BusyDelay,
            capture: SampleCapture::new(&CAPTURE, converter),
            diagnostics: FirmwareDiagnostics::new(sink),
        }
    }
}

impl<S> TimeBase for StimulatorBoard<S> {
    fn now(&mut self) -> Tick {
        self.clock.now()
    }
}

impl<S> PulseOutput for StimulatorBoard<S> {
    fn set_voltage(&mut self, channel: OutputChannel, amplitude: Amplitude) {
        self.output.set_voltage(channel, amplitude);
    }

    fn set_positive_polarity(&mut self) {
        self.output.set_positive_polarity();
    }

    fn set_negative_polarity(&mut self) {
        self.output.set_negative_polarity();
    }

    fn clear_output(&mut self) {
        self.output.clear_output();
    }
}

impl<S> ActivityIndicator for StimulatorBoard<S> {
    fn set_active(&mut self, active: bool) {
        self.output.set_active(active);
    }
}

impl<S> PulseDelay for StimulatorBoard<S> {
    fn delay_units(&mut self, units: u16) {
        self.delay.delay_units(units);
    }
}

impl<S> Sampler for StimulatorBoard<S> {
    fn start(&mut self) {
        self.capture.start();
    }

    fn await_and_store(&mut self, phase: CapturePhase) {
        self.capture.await_and_store(phase);
    }

    fn samples(&self) -> &SampleMatrix {
        self.capture.samples()
    }
}

impl<S: FrameSink> DiagnosticSink for StimulatorBoard<S> {
    fn run_started(&mut self, at: Tick) {
        self.diagnostics.run_started(at);
    }

    fn pulse_completed(&mut self, at: Tick, samples: &SampleMatrix) {
        self.diagnostics.pulse_completed(at, samples);
    }

    fn stopped(&mut self, at: Tick) {
        self.diagnostics.stopped(at);
    }
}
