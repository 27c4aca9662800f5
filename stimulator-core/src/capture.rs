//! Interrupt-driven sampling of the three measurement channels.
//!
//! Every pulse phase is measured on three analog channels in a fixed order:
//! output current, emitting-voltage correction and tissue voltage. The
//! foreground arms a pass with [`Sampler::start`] and returns immediately; the
//! conversion-complete interrupt walks the channels through
//! [`on_conversion_complete`] and finally clears the readiness flag held in
//! [`CaptureShared`]. [`Sampler::await_and_store`] spins on that flag and then
//! copies the three readings into one row of the [`SampleMatrix`].
//!
//! The interrupt side only ever writes the three one-shot readings and the
//! flag. The matrix is written exclusively by the foreground, and only once
//! the flag reports that no conversion is pending.

use portable_atomic::{AtomicBool, AtomicU8, Ordering};

/// Measurement channels converted per phase.
pub const CHANNELS_PER_PHASE: usize = 3;

/// Phases recorded per pulse.
pub const PHASES: usize = 4;

/// Total number of cells in a [`SampleMatrix`].
pub const MATRIX_LEN: usize = PHASES * CHANNELS_PER_PHASE;

/// Sentinel marking a cell that no capture reached.
pub const NOT_READ: u8 = 0xFF;

/// Analog inputs converted during each phase, in conversion order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AnalogChannel {
    /// Output current.
    Current,
    /// Emitting voltage, used to correct the amplitude.
    Correction,
    /// Voltage across the tissue.
    Tissue,
}

impl AnalogChannel {
    /// Channels in conversion order.
    pub const ALL: [AnalogChannel; CHANNELS_PER_PHASE] = [
        AnalogChannel::Current,
        AnalogChannel::Correction,
        AnalogChannel::Tissue,
    ];

    /// Column of the channel inside a matrix row.
    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            AnalogChannel::Current => 0,
            AnalogChannel::Correction => 1,
            AnalogChannel::Tissue => 2,
        }
    }

    /// Attempts to construct a channel from its column index.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(AnalogChannel::Current),
            1 => Some(AnalogChannel::Correction),
            2 => Some(AnalogChannel::Tissue),
            _ => None,
        }
    }

    /// Channel converted after this one within a pass.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            AnalogChannel::Current => Some(AnalogChannel::Correction),
            AnalogChannel::Correction => Some(AnalogChannel::Tissue),
            AnalogChannel::Tissue => None,
        }
    }
}

/// Row of the sample matrix.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CapturePhase {
    /// Sampled while the positive phase is driven.
    PositivePulse,
    /// Sampled after the positive phase, across the inter-phase gap.
    AfterPositive,
    /// Sampled while the negative phase is driven.
    NegativePulse,
    /// Sampled after the negative phase.
    AfterNegative,
}

impl CapturePhase {
    /// Phases in row order.
    pub const ALL: [CapturePhase; PHASES] = [
        CapturePhase::PositivePulse,
        CapturePhase::AfterPositive,
        CapturePhase::NegativePulse,
        CapturePhase::AfterNegative,
    ];

    /// Row index inside the matrix.
    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            CapturePhase::PositivePulse => 0,
            CapturePhase::AfterPositive => 1,
            CapturePhase::NegativePulse => 2,
            CapturePhase::AfterNegative => 3,
        }
    }

    /// Returns `true` for the row that opens a new capture sequence.
    #[must_use]
    pub const fn begins_sequence(self) -> bool {
        matches!(self, CapturePhase::PositivePulse)
    }
}

/// Readings of one pulse, 4 phases × 3 channels, row-major.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SampleMatrix {
    cells: [u8; MATRIX_LEN],
}

impl SampleMatrix {
    /// Creates a matrix with every cell marked as not read.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cells: [NOT_READ; MATRIX_LEN],
        }
    }

    /// Wraps raw cells, e.g. decoded from a diagnostic record.
    #[must_use]
    pub const fn from_bytes(cells: [u8; MATRIX_LEN]) -> Self {
        Self { cells }
    }

    /// Marks every cell as not read.
    pub fn clear(&mut self) {
        self.cells = [NOT_READ; MATRIX_LEN];
    }

    /// Overwrites the row for `phase`.
    pub fn set_row(&mut self, phase: CapturePhase, readings: [u8; CHANNELS_PER_PHASE]) {
        let start = phase.as_index() * CHANNELS_PER_PHASE;
        self.cells[start..start + CHANNELS_PER_PHASE].copy_from_slice(&readings);
    }

    /// Raw row for `phase`, sentinels included.
    #[must_use]
    pub fn row(&self, phase: CapturePhase) -> [u8; CHANNELS_PER_PHASE] {
        let start = phase.as_index() * CHANNELS_PER_PHASE;
        let mut row = [NOT_READ; CHANNELS_PER_PHASE];
        row.copy_from_slice(&self.cells[start..start + CHANNELS_PER_PHASE]);
        row
    }

    /// Reading for a single cell, `None` when the cell holds the sentinel.
    #[must_use]
    pub fn reading(&self, phase: CapturePhase, channel: AnalogChannel) -> Option<u8> {
        match self.cells[phase.as_index() * CHANNELS_PER_PHASE + channel.as_index()] {
            NOT_READ => None,
            value => Some(value),
        }
    }

    /// Raw cells in row-major order.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; MATRIX_LEN] {
        &self.cells
    }

    /// Number of cells that still hold the sentinel.
    #[must_use]
    pub fn unread_cells(&self) -> usize {
        self.cells.iter().filter(|cell| **cell == NOT_READ).count()
    }
}

impl Default for SampleMatrix {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared between the conversion-complete interrupt and the foreground.
///
/// Lives in a `static` on the firmware target. The interrupt side is the only
/// writer of the readings; the foreground only reads them once `pending` has
/// been observed clear.
pub struct CaptureShared {
    pending: AtomicBool,
    readings: [AtomicU8; CHANNELS_PER_PHASE],
}

impl CaptureShared {
    /// Creates an idle capture slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            readings: [
                AtomicU8::new(NOT_READ),
                AtomicU8::new(NOT_READ),
                AtomicU8::new(NOT_READ),
            ],
        }
    }

    fn arm(&self) {
        self.pending.store(true, Ordering::Release);
    }

    /// Interrupt-side completion handler.
    ///
    /// Stores `reading` for `channel` and returns the channel the converter
    /// must be re-armed for. After the last channel the pass is marked complete
    /// and `None` is returned.
    pub fn complete(&self, channel: AnalogChannel, reading: u8) -> Option<AnalogChannel> {
        self.readings[channel.as_index()].store(reading, Ordering::Relaxed);
        let next = channel.next();
        if next.is_none() {
            self.pending.store(false, Ordering::Release);
        }
        next
    }

    /// Returns `true` while a conversion pass is still running.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    fn wait_ready(&self) {
        // The acquire load is re-issued on every iteration and pairs with the
        // release store in `complete`, making the readings visible afterwards.
        while self.pending.load(Ordering::Acquire) {
            core::hint::spin_loop();
        }
    }

    fn readings(&self) -> [u8; CHANNELS_PER_PHASE] {
        [
            self.readings[0].load(Ordering::Relaxed),
            self.readings[1].load(Ordering::Relaxed),
            self.readings[2].load(Ordering::Relaxed),
        ]
    }
}

impl Default for CaptureShared {
    fn default() -> Self {
        Self::new()
    }
}

/// Hardware hook that starts a single conversion.
pub trait Converter {
    /// Starts converting `channel`; completion is reported from interrupt context.
    fn begin_conversion(&mut self, channel: AnalogChannel);
}

impl<C: Converter + ?Sized> Converter for &mut C {
    fn begin_conversion(&mut self, channel: AnalogChannel) {
        (**self).begin_conversion(channel);
    }
}

/// Body of the conversion-complete interrupt.
///
/// Records `reading` and re-arms `converter` for the next channel of the pass,
/// producing a three-step interrupt chain per [`Sampler::start`].
pub fn on_conversion_complete<C: Converter + ?Sized>(
    shared: &CaptureShared,
    converter: &mut C,
    channel: AnalogChannel,
    reading: u8,
) {
    if let Some(next) = shared.complete(channel, reading) {
        converter.begin_conversion(next);
    }
}

/// Foreground sampling protocol used by the pulse engine.
///
/// Every `start` must be followed by exactly one `await_and_store` before the
/// next `start`.
pub trait Sampler {
    /// Arms a three-channel conversion pass and returns immediately.
    fn start(&mut self);

    /// Waits for the armed pass and stores it as the row for `phase`.
    ///
    /// [`CapturePhase::PositivePulse`] first resets the whole matrix to
    /// [`NOT_READ`].
    fn await_and_store(&mut self, phase: CapturePhase);

    /// Matrix assembled so far for the current pulse.
    fn samples(&self) -> &SampleMatrix;
}

/// [`Sampler`] backed by an interrupt-driven [`Converter`].
pub struct SampleCapture<'a, C> {
    shared: &'a CaptureShared,
    converter: C,
    matrix: SampleMatrix,
}

impl<'a, C> SampleCapture<'a, C> {
    /// Creates a sampler that arms `converter` and waits on `shared`.
    pub const fn new(shared: &'a CaptureShared, converter: C) -> Self {
        Self {
            shared,
            converter,
            matrix: SampleMatrix::new(),
        }
    }

    /// Returns the wrapped converter.
    pub fn converter(&self) -> &C {
        &self.converter
    }
}

impl<C: Converter> Sampler for SampleCapture<'_, C> {
    fn start(&mut self) {
        self.shared.arm();
        self.converter.begin_conversion(AnalogChannel::Current);
    }

    fn await_and_store(&mut self, phase: CapturePhase) {
        if phase.begins_sequence() {
            self.matrix.clear();
        }
        self.shared.wait_ready();
        self.matrix.set_row(phase, self.shared.readings());
    }

    fn samples(&self) -> &SampleMatrix {
        &self.matrix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Converter that completes every conversion on the spot.
    struct InlineConverter<'a> {
        shared: &'a CaptureShared,
        base: u8,
        started: usize,
    }

    impl Converter for InlineConverter<'_> {
        fn begin_conversion(&mut self, channel: AnalogChannel) {
            self.started += 1;
            let reading = self.base + channel.as_index() as u8;
            self.base = self.base.wrapping_add(0x10);
            if let Some(next) = self.shared.complete(channel, reading) {
                self.begin_conversion(next);
            }
        }
    }

    #[test]
    fn channel_order_is_current_correction_tissue() {
        assert_eq!(AnalogChannel::Current.next(), Some(AnalogChannel::Correction));
        assert_eq!(AnalogChannel::Correction.next(), Some(AnalogChannel::Tissue));
        assert_eq!(AnalogChannel::Tissue.next(), None);
        assert_eq!(AnalogChannel::from_index(2), Some(AnalogChannel::Tissue));
        assert_eq!(AnalogChannel::from_index(3), None);
    }

    #[test]
    fn completion_chain_clears_pending_after_last_channel() {
        let shared = CaptureShared::new();
        shared.arm();
        assert!(shared.is_pending());
        assert_eq!(
            shared.complete(AnalogChannel::Current, 1),
            Some(AnalogChannel::Correction)
        );
        assert!(shared.is_pending());
        assert_eq!(
            shared.complete(AnalogChannel::Correction, 2),
            Some(AnalogChannel::Tissue)
        );
        assert!(shared.is_pending());
        assert_eq!(shared.complete(AnalogChannel::Tissue, 3), None);
        assert!(!shared.is_pending());
        assert_eq!(shared.readings(), [1, 2, 3]);
    }

    #[test]
    fn interrupt_helper_rearms_converter() {
        struct Recorder(heapless::Vec<AnalogChannel, 4>);
        impl Converter for Recorder {
            fn begin_conversion(&mut self, channel: AnalogChannel) {
                self.0.push(channel).unwrap();
            }
        }

        let shared = CaptureShared::new();
        let mut recorder = Recorder(heapless::Vec::new());
        on_conversion_complete(&shared, &mut recorder, AnalogChannel::Current, 9);
        on_conversion_complete(&shared, &mut recorder, AnalogChannel::Correction, 9);
        on_conversion_complete(&shared, &mut recorder, AnalogChannel::Tissue, 9);
        assert_eq!(
            recorder.0.as_slice(),
            &[AnalogChannel::Correction, AnalogChannel::Tissue]
        );
    }

    #[test]
    fn first_phase_resets_matrix_before_storing() {
        let shared = CaptureShared::new();
        let converter = InlineConverter {
            shared: &shared,
            base: 0x10,
            started: 0,
        };
        let mut capture = SampleCapture::new(&shared, converter);

        for phase in CapturePhase::ALL {
            capture.start();
            capture.await_and_store(phase);
        }
        assert_eq!(capture.samples().unread_cells(), 0);
        assert_eq!(capture.converter().started, 12);

        capture.start();
        capture.await_and_store(CapturePhase::PositivePulse);
        assert_eq!(capture.samples().unread_cells(), 9);
        assert!(capture.samples().reading(CapturePhase::PositivePulse, AnalogChannel::Tissue).is_some());
        assert_eq!(
            capture.samples().row(CapturePhase::AfterNegative),
            [NOT_READ; CHANNELS_PER_PHASE]
        );
    }

    #[test]
    fn later_phases_append_without_clearing() {
        let mut matrix = SampleMatrix::new();
        matrix.set_row(CapturePhase::AfterPositive, [1, 2, 3]);
        matrix.set_row(CapturePhase::NegativePulse, [4, 5, 6]);
        assert_eq!(matrix.row(CapturePhase::AfterPositive), [1, 2, 3]);
        assert_eq!(matrix.reading(CapturePhase::NegativePulse, AnalogChannel::Tissue), Some(6));
        assert_eq!(matrix.reading(CapturePhase::PositivePulse, AnalogChannel::Current), None);
        assert_eq!(matrix.unread_cells(), 6);
    }
}
