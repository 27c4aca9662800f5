//! Host stand-ins for the stimulator hardware.
//!
//! The conversion-complete interrupt runs on a dedicated thread that receives
//! conversion requests over a channel and reports results through a
//! [`CaptureShared`] slot, the same handoff the firmware's ADC interrupt uses.
//! Output switching is mirrored into a [`SimulatedLoad`] so that thread can
//! synthesize plausible readings.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::{Duration, Instant};

use embedded_storage::{ReadStorage, Storage};
use stimulator_core::capture::{
    AnalogChannel, CaptureShared, CapturePhase, Converter, SampleCapture, SampleMatrix, Sampler,
    on_conversion_complete,
};
use stimulator_core::engine::DiagnosticSink;
use stimulator_core::output::{
    ActivityIndicator, Amplitude, OutputChannel, PULSE_UNIT_MICROS, PulseDelay, PulseOutput,
};
use stimulator_core::telemetry::TelemetryLog;
use stimulator_core::timebase::{Tick, TimeBase};

/// Size of the emulated non-volatile memory.
pub const STORAGE_CAPACITY: usize = 512;

/// Simulated time one conversion takes.
const CONVERSION_TIME: Duration = Duration::from_micros(30);

const POLARITY_OFF: u8 = 0;
const POLARITY_POSITIVE: u8 = 1;
const POLARITY_NEGATIVE: u8 = 2;

/// Output state visible to the simulated converter.
#[derive(Debug, Default)]
pub struct SimulatedLoad {
    polarity: AtomicU8,
    amplitude: AtomicU8,
}

impl SimulatedLoad {
    fn drive(&self, polarity: u8, amplitude: u8) {
        self.amplitude.store(amplitude, Ordering::Relaxed);
        self.polarity.store(polarity, Ordering::Release);
    }

    /// Reading a resistive load would produce on `channel` right now.
    pub fn sample(&self, channel: AnalogChannel) -> u8 {
        let polarity = self.polarity.load(Ordering::Acquire);
        let amplitude = self.amplitude.load(Ordering::Relaxed);
        let swing = match channel {
            AnalogChannel::Current => amplitude / 2,
            AnalogChannel::Correction => amplitude * 2,
            AnalogChannel::Tissue => amplitude * 2 - amplitude / 5,
        };
        let zero: u8 = match channel {
            AnalogChannel::Current => 127,
            AnalogChannel::Correction | AnalogChannel::Tissue => 128,
        };
        match polarity {
            POLARITY_POSITIVE => zero.saturating_add(swing),
            POLARITY_NEGATIVE => zero.saturating_sub(swing),
            _ => zero,
        }
    }
}

/// Foreground side of the simulated converter.
pub struct ThreadConverter {
    requests: Sender<AnalogChannel>,
}

impl Converter for ThreadConverter {
    fn begin_conversion(&mut self, channel: AnalogChannel) {
        // The interrupt thread lives for the whole process.
        let _ = self.requests.send(channel);
    }
}

#[derive(Default)]
struct ChainedConversions(VecDeque<AnalogChannel>);

impl Converter for ChainedConversions {
    fn begin_conversion(&mut self, channel: AnalogChannel) {
        self.0.push_back(channel);
    }
}

/// Starts the thread that plays the conversion-complete interrupt.
pub fn spawn_adc_interrupt(
    shared: &'static CaptureShared,
    load: Arc<SimulatedLoad>,
) -> io::Result<ThreadConverter> {
    let (requests, pending) = mpsc::channel();
    thread::Builder::new()
        .name("adc-interrupt".into())
        .spawn(move || {
            let mut chain = ChainedConversions::default();
            for first in pending {
                chain.0.push_back(first);
                while let Some(channel) = chain.0.pop_front() {
                    thread::sleep(CONVERSION_TIME);
                    let reading = load.sample(channel);
                    on_conversion_complete(shared, &mut chain, channel, reading);
                }
            }
        })?;
    Ok(ThreadConverter { requests })
}

/// Millisecond tick counter derived from the host clock.
pub struct HostClock {
    started_at: Instant,
}

impl HostClock {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeBase for HostClock {
    #[allow(clippy::cast_possible_truncation)]
    fn now(&mut self) -> Tick {
        // Truncation reproduces the rollover of the 16-bit hardware counter.
        self.started_at.elapsed().as_millis() as Tick
    }
}

/// Output stage that mirrors its state into a [`SimulatedLoad`].
pub struct HostOutput {
    load: Arc<SimulatedLoad>,
    voltages: [u8; 2],
    active: bool,
}

impl HostOutput {
    pub fn new(load: Arc<SimulatedLoad>) -> Self {
        Self {
            load,
            voltages: [0; 2],
            active: false,
        }
    }
}

impl PulseOutput for HostOutput {
    fn set_voltage(&mut self, channel: OutputChannel, amplitude: Amplitude) {
        self.voltages[usize::from(channel.as_index())] = amplitude.get();
    }

    fn set_positive_polarity(&mut self) {
        self.load.drive(POLARITY_POSITIVE, self.voltages[0]);
    }

    fn set_negative_polarity(&mut self) {
        self.load.drive(POLARITY_NEGATIVE, self.voltages[1]);
    }

    fn clear_output(&mut self) {
        self.load.drive(POLARITY_OFF, 0);
    }
}

impl ActivityIndicator for HostOutput {
    fn set_active(&mut self, active: bool) {
        self.active = active;
    }
}

/// Busy-wait in pulse units, like the firmware's cycle-counted delay.
pub struct SpinDelay;

impl PulseDelay for SpinDelay {
    fn delay_units(&mut self, units: u16) {
        let deadline = Instant::now()
            + Duration::from_micros(u64::from(units) * u64::from(PULSE_UNIT_MICROS));
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }
}

/// Non-volatile memory backed by a file; a missing file reads as erased.
pub struct FileStorage {
    path: PathBuf,
    bytes: Vec<u8>,
}

impl FileStorage {
    pub fn open(path: &Path) -> io::Result<Self> {
        let mut bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err),
        };
        bytes.resize(STORAGE_CAPACITY, 0xFF);
        Ok(Self {
            path: path.to_path_buf(),
            bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Storage access outside the emulated memory, or a failed file write.
#[derive(Debug)]
pub enum StorageError {
    OutOfBounds { offset: u32, len: usize },
    Io(io::ErrorKind),
}

impl FileStorage {
    fn range(&self, offset: u32, len: usize) -> Result<std::ops::Range<usize>, StorageError> {
        let start = usize::try_from(offset).map_err(|_| StorageError::OutOfBounds { offset, len })?;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(StorageError::OutOfBounds { offset, len })?;
        Ok(start..end)
    }
}

impl ReadStorage for FileStorage {
    type Error = StorageError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let range = self.range(offset, bytes.len())?;
        bytes.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.bytes.len()
    }
}

impl Storage for FileStorage {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let range = self.range(offset, bytes.len())?;
        self.bytes[range].copy_from_slice(bytes);
        fs::write(&self.path, &self.bytes).map_err(|err| StorageError::Io(err.kind()))
    }
}

/// Every simulated collaborator of the pulse engine.
pub struct EmulatorBoard {
    pub clock: HostClock,
    pub output: HostOutput,
    pub delay: SpinDelay,
    pub capture: SampleCapture<'static, ThreadConverter>,
    pub telemetry: TelemetryLog<String>,
}

impl EmulatorBoard {
    pub fn new() -> io::Result<Self> {
        // Each board gets its own slot; it lives as long as the interrupt thread.
        let shared: &'static CaptureShared = Box::leak(Box::new(CaptureShared::new()));
        let load = Arc::new(SimulatedLoad::default());
        let converter = spawn_adc_interrupt(shared, Arc::clone(&load))?;
        Ok(Self {
            clock: HostClock::new(),
            output: HostOutput::new(load),
            delay: SpinDelay,
            capture: SampleCapture::new(shared, converter),
            telemetry: TelemetryLog::new(String::new()),
        })
    }

    /// Takes the diagnostic text emitted since the last call.
    pub fn drain_diagnostics(&mut self) -> String {
        std::mem::take(self.telemetry.writer_mut())
    }
}

impl TimeBase for EmulatorBoard {
    fn now(&mut self) -> Tick {
        self.clock.now()
    }
}

impl PulseOutput for EmulatorBoard {
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

impl ActivityIndicator for EmulatorBoard {
    fn set_active(&mut self, active: bool) {
        self.output.set_active(active);
    }
}

impl PulseDelay for EmulatorBoard {
    fn delay_units(&mut self, units: u16) {
        self.delay.delay_units(units);
    }
}

impl Sampler for EmulatorBoard {
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

impl DiagnosticSink for EmulatorBoard {
    fn run_started(&mut self, at: Tick) {
        self.telemetry.run_started(at);
    }

    fn pulse_completed(&mut self, at: Tick, samples: &SampleMatrix) {
        self.telemetry.pulse_completed(at, samples);
    }

    fn stopped(&mut self, at: Tick) {
        self.telemetry.stopped(at);
    }
}
