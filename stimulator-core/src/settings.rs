//! Channel configuration and its non-volatile record.
//!
//! One [`ChannelSettings`] record describes the complete pulse train for a
//! channel. The record is stored byte-for-byte in declared field order: control
//! flag, reserved byte, two amplitude bytes, then five little-endian 16-bit
//! durations. Storage that was never written reads back as all `0xFF`, which the
//! loader detects and replaces with [`ChannelSettings::DEFAULT`].
//!
//! The device serial number follows the record as a little-endian 16-bit word.
//! It is written separately from the settings and reads back as `None` while
//! erased.

use core::fmt;

use embedded_storage::{ReadStorage, Storage};

/// Size of the persisted record in bytes.
pub const RECORD_LEN: usize = 14;

/// Size of the serial number stored after the record.
pub const SERIAL_LEN: usize = 2;

/// Value every byte of never-written storage reads back as.
pub const ERASED_BYTE: u8 = 0xFF;

/// Largest output amplitude accepted for either phase.
pub const MAX_AMPLITUDE: u8 = 50;

/// Number of duration slots in a record.
pub const TIMING_SLOTS: usize = 5;

/// Control and status values stored in the first record byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StartFlag {
    Off,
    Start,
    Running,
    /// Tolerated for compatibility with stored records; never written by the engine.
    Reserved,
}

impl StartFlag {
    /// Decodes a raw flag byte. Values above 3 are invalid.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(StartFlag::Off),
            1 => Some(StartFlag::Start),
            2 => Some(StartFlag::Running),
            3 => Some(StartFlag::Reserved),
            _ => None,
        }
    }

    /// Encodes the flag into its stored byte.
    #[must_use]
    pub const fn as_raw(self) -> u8 {
        match self {
            StartFlag::Off => 0,
            StartFlag::Start => 1,
            StartFlag::Running => 2,
            StartFlag::Reserved => 3,
        }
    }
}

/// Index into [`ChannelSettings::times`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimingSlot {
    /// Ticks between the start request and the first pulse.
    PreWait,
    /// Positive phase width in pulse units.
    PositiveWidth,
    /// Gap between the phases in pulse units; zero skips the gap.
    InterPhaseGap,
    /// Negative phase width in pulse units; zero skips the negative phase.
    NegativeWidth,
    /// Ticks from the end of one pulse to the start of the next.
    InterPulsePeriod,
}

impl TimingSlot {
    /// Position of the slot inside the record.
    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            TimingSlot::PreWait => 0,
            TimingSlot::PositiveWidth => 1,
            TimingSlot::InterPhaseGap => 2,
            TimingSlot::NegativeWidth => 3,
            TimingSlot::InterPulsePeriod => 4,
        }
    }
}

/// Rejected settings update.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SettingsError {
    /// An amplitude above [`MAX_AMPLITUDE`] was requested.
    AmplitudeOutOfRange { value: u8 },
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::AmplitudeOutOfRange { value } => {
                write!(f, "amplitude {value} exceeds {MAX_AMPLITUDE}")
            }
        }
    }
}

/// Persisted configuration for one output channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelSettings {
    /// Raw control byte; see [`StartFlag`].
    pub start_flag: u8,
    /// Opaque reserved byte kept at its record position.
    pub channel: u8,
    /// Positive- and negative-phase amplitude.
    pub voltages: [u8; 2],
    /// Durations indexed by [`TimingSlot`].
    pub times: [u16; TIMING_SLOTS],
}

impl ChannelSettings {
    /// Configuration substituted when storage holds no record.
    pub const DEFAULT: Self = Self {
        start_flag: 0,
        channel: 0,
        voltages: [25, 25],
        times: [1000, 50, 50, 50, 1000],
    };

    /// Decoded control flag, `None` when the stored byte is invalid.
    #[must_use]
    pub const fn flag(&self) -> Option<StartFlag> {
        StartFlag::from_raw(self.start_flag)
    }

    /// Overwrites the control flag.
    pub fn set_flag(&mut self, flag: StartFlag) {
        self.start_flag = flag.as_raw();
    }

    /// Forces an invalid control byte back to [`StartFlag::Off`].
    ///
    /// Returns `true` when a correction was applied.
    pub fn normalize_flag(&mut self) -> bool {
        if self.flag().is_none() {
            self.set_flag(StartFlag::Off);
            true
        } else {
            false
        }
    }

    /// Requests a new pulse train.
    pub fn request_start(&mut self) {
        self.set_flag(StartFlag::Start);
    }

    /// Requests the pulse train to stop.
    pub fn request_stop(&mut self) {
        self.set_flag(StartFlag::Off);
    }

    /// Returns `true` while a run is requested or in progress.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.flag(), Some(StartFlag::Start | StartFlag::Running))
    }

    /// Duration stored in `slot`.
    #[must_use]
    pub const fn time(&self, slot: TimingSlot) -> u16 {
        self.times[slot.as_index()]
    }

    /// Positive-phase amplitude.
    #[must_use]
    pub const fn positive_amplitude(&self) -> u8 {
        self.voltages[0]
    }

    /// Negative-phase amplitude.
    #[must_use]
    pub const fn negative_amplitude(&self) -> u8 {
        self.voltages[1]
    }

    /// Replaces both amplitudes after validating their range.
    pub fn set_amplitudes(&mut self, positive: u8, negative: u8) -> Result<(), SettingsError> {
        for value in [positive, negative] {
            if value > MAX_AMPLITUDE {
                return Err(SettingsError::AmplitudeOutOfRange { value });
            }
        }
        self.voltages = [positive, negative];
        Ok(())
    }

    /// Replaces every duration slot.
    pub fn set_times(&mut self, times: [u16; TIMING_SLOTS]) {
        self.times = times;
    }

    /// Encodes the settings into their stored byte layout.
    #[must_use]
    pub fn to_record(&self) -> [u8; RECORD_LEN] {
        let mut record = [0u8; RECORD_LEN];
        record[0] = self.start_flag;
        record[1] = self.channel;
        record[2..4].copy_from_slice(&self.voltages);
        for (index, time) in self.times.iter().enumerate() {
            let at = 4 + index * 2;
            record[at..at + 2].copy_from_slice(&time.to_le_bytes());
        }
        record
    }

    /// Decodes a stored record without any validation.
    #[must_use]
    pub fn from_record(record: &[u8; RECORD_LEN]) -> Self {
        let mut times = [0u16; TIMING_SLOTS];
        for (index, time) in times.iter_mut().enumerate() {
            let at = 4 + index * 2;
            *time = u16::from_le_bytes([record[at], record[at + 1]]);
        }
        Self {
            start_flag: record[0],
            channel: record[1],
            voltages: [record[2], record[3]],
            times,
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Returns `true` when every byte of `record` holds the erased value.
#[must_use]
pub fn is_erased(record: &[u8]) -> bool {
    record.iter().fold(ERASED_BYTE, |check, byte| check & byte) == ERASED_BYTE
}

/// Where a loaded configuration came from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SettingsSource {
    /// A written record was accepted.
    Stored,
    /// Storage was erased; defaults were substituted.
    Erased,
    /// Storage could not be read; defaults were substituted.
    ReadFailed,
}

/// Configuration returned by [`SettingsStore::load_with_source`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LoadedSettings {
    pub settings: ChannelSettings,
    pub source: SettingsSource,
}

/// Loads (and on request persists) the channel record at a fixed offset.
pub struct SettingsStore<S> {
    storage: S,
    offset: u32,
}

impl<S> SettingsStore<S> {
    /// Wraps `storage`, reading the record at `offset`.
    pub const fn new(storage: S, offset: u32) -> Self {
        Self { storage, offset }
    }

    /// Returns the underlying storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Consumes the store and returns the underlying storage.
    pub fn into_inner(self) -> S {
        self.storage
    }
}

impl<S: ReadStorage> SettingsStore<S> {
    /// Reads the record, substituting defaults when storage is erased.
    pub fn load(&mut self) -> ChannelSettings {
        self.load_with_source().settings
    }

    /// Same as [`load`](Self::load) but reports where the settings came from.
    pub fn load_with_source(&mut self) -> LoadedSettings {
        let mut record = [ERASED_BYTE; RECORD_LEN];
        if self.storage.read(self.offset, &mut record).is_err() {
            return LoadedSettings {
                settings: ChannelSettings::DEFAULT,
                source: SettingsSource::ReadFailed,
            };
        }

        if is_erased(&record) {
            LoadedSettings {
                settings: ChannelSettings::DEFAULT,
                source: SettingsSource::Erased,
            }
        } else {
            LoadedSettings {
                settings: ChannelSettings::from_record(&record),
                source: SettingsSource::Stored,
            }
        }
    }
}

impl<S> SettingsStore<S> {
    #[allow(clippy::cast_possible_truncation)]
    const fn serial_offset(&self) -> u32 {
        self.offset + RECORD_LEN as u32
    }
}

impl<S: ReadStorage> SettingsStore<S> {
    /// Reads the serial number; `None` when erased or unreadable.
    pub fn load_serial(&mut self) -> Option<u16> {
        let mut word = [ERASED_BYTE; SERIAL_LEN];
        let offset = self.serial_offset();
        self.storage.read(offset, &mut word).ok()?;
        if is_erased(&word) {
            None
        } else {
            Some(u16::from_le_bytes(word))
        }
    }
}

impl<S: Storage> SettingsStore<S> {
    /// Writes `settings` to storage as a complete record.
    pub fn persist(&mut self, settings: &ChannelSettings) -> Result<(), S::Error> {
        self.storage.write(self.offset, &settings.to_record())
    }

    /// Writes the serial number after the record, leaving the record untouched.
    pub fn persist_serial(&mut self, serial: u16) -> Result<(), S::Error> {
        let offset = self.serial_offset();
        self.storage.write(offset, &serial.to_le_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct RamStorage {
        bytes: [u8; 32],
        fail_reads: bool,
    }

    impl RamStorage {
        fn erased() -> Self {
            Self {
                bytes: [ERASED_BYTE; 32],
                fail_reads: false,
            }
        }
    }

    impl ReadStorage for RamStorage {
        type Error = ();

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            if self.fail_reads {
                return Err(());
            }
            let start = offset as usize;
            bytes.copy_from_slice(&self.bytes[start..start + bytes.len()]);
            Ok(())
        }

        fn capacity(&self) -> usize {
            self.bytes.len()
        }
    }

    impl Storage for RamStorage {
        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            let start = offset as usize;
            self.bytes[start..start + bytes.len()].copy_from_slice(bytes);
            Ok(())
        }
    }

    #[test]
    fn erased_storage_loads_defaults() {
        let mut store = SettingsStore::new(RamStorage::erased(), 0);
        let loaded = store.load_with_source();
        assert_eq!(loaded.source, SettingsSource::Erased);
        assert_eq!(loaded.settings, ChannelSettings::DEFAULT);
        assert_eq!(loaded.settings.voltages, [25, 25]);
        assert_eq!(loaded.settings.times, [1000, 50, 50, 50, 1000]);
    }

    #[test]
    fn single_written_bit_keeps_the_record() {
        let mut storage = RamStorage::erased();
        storage.bytes[3] = 0xFE;
        let mut store = SettingsStore::new(storage, 0);
        let loaded = store.load_with_source();
        assert_eq!(loaded.source, SettingsSource::Stored);
        assert_eq!(loaded.settings.start_flag, 0xFF);
        assert_eq!(loaded.settings.voltages, [0xFF, 0xFE]);
    }

    #[test]
    fn persisted_record_loads_back_at_offset() {
        let mut store = SettingsStore::new(RamStorage::erased(), 8);
        let mut settings = ChannelSettings::DEFAULT;
        settings.set_amplitudes(40, 12).unwrap();
        settings.set_times([100, 20, 5, 20, 50]);
        store.persist(&settings).unwrap();

        assert_eq!(&store.storage().bytes[..8], &[ERASED_BYTE; 8]);
        assert_eq!(store.load(), settings);
    }

    #[test]
    fn serial_number_sits_after_the_record() {
        let mut store = SettingsStore::new(RamStorage::erased(), 4);
        assert_eq!(store.load_serial(), None);

        store.persist_serial(0x1234).unwrap();
        let at = 4 + RECORD_LEN;
        assert_eq!(&store.storage().bytes[at..at + SERIAL_LEN], &[0x34, 0x12]);
        assert_eq!(store.load_serial(), Some(0x1234));
        assert_eq!(store.load_with_source().source, SettingsSource::Erased);
    }

    #[test]
    fn read_failure_falls_back_to_defaults() {
        let mut storage = RamStorage::erased();
        storage.fail_reads = true;
        let mut store = SettingsStore::new(storage, 0);
        let loaded = store.load_with_source();
        assert_eq!(loaded.source, SettingsSource::ReadFailed);
        assert_eq!(loaded.settings, ChannelSettings::DEFAULT);
    }

    #[test]
    fn record_layout_follows_field_order() {
        let settings = ChannelSettings {
            start_flag: 2,
            channel: 7,
            voltages: [10, 20],
            times: [0x0102, 3, 0, 0x0A0B, 0xFFFE],
        };
        assert_eq!(
            settings.to_record(),
            [2, 7, 10, 20, 0x02, 0x01, 3, 0, 0, 0, 0x0B, 0x0A, 0xFE, 0xFF]
        );
    }

    #[test]
    fn invalid_flag_normalizes_to_off() {
        let mut settings = ChannelSettings {
            start_flag: 9,
            ..ChannelSettings::DEFAULT
        };
        assert_eq!(settings.flag(), None);
        assert!(settings.normalize_flag());
        assert_eq!(settings.flag(), Some(StartFlag::Off));

        settings.start_flag = 3;
        assert!(!settings.normalize_flag());
        assert_eq!(settings.flag(), Some(StartFlag::Reserved));
    }

    #[test]
    fn amplitude_above_limit_is_rejected() {
        let mut settings = ChannelSettings::DEFAULT;
        assert_eq!(
            settings.set_amplitudes(51, 10),
            Err(SettingsError::AmplitudeOutOfRange { value: 51 })
        );
        assert_eq!(settings.voltages, [25, 25]);
        assert!(settings.set_amplitudes(50, 0).is_ok());
    }
}
