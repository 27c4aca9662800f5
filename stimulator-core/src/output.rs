//! Abstractions over the stimulation output stage.
//!
//! The engine never touches pins or converters directly. It drives an output
//! stage through [`PulseOutput`], toggles the activity lamp through
//! [`ActivityIndicator`], and bounds the pulse phases with [`PulseDelay`].

use crate::settings::MAX_AMPLITUDE;

/// Length of one pulse-width unit in microseconds.
pub const PULSE_UNIT_MICROS: u32 = 100;

/// Voltage-source channel feeding one polarity of the output bridge.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutputChannel {
    Positive,
    Negative,
}

impl OutputChannel {
    /// Converter channel number.
    #[must_use]
    pub const fn as_index(self) -> u8 {
        match self {
            OutputChannel::Positive => 0,
            OutputChannel::Negative => 1,
        }
    }
}

/// Amplitude in the 0..=50 range accepted by the output stage.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Amplitude(u8);

impl Amplitude {
    /// Highest amplitude the stage accepts.
    pub const MAX: Amplitude = Amplitude(MAX_AMPLITUDE);

    /// Builds an amplitude, saturating anything above [`Amplitude::MAX`].
    #[must_use]
    pub const fn saturating(raw: u8) -> Self {
        if raw > MAX_AMPLITUDE {
            Self::MAX
        } else {
            Self(raw)
        }
    }

    /// Raw amplitude value.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

/// Switching and voltage-source control for the output bridge.
pub trait PulseOutput {
    /// Programs the voltage source feeding `channel`.
    fn set_voltage(&mut self, channel: OutputChannel, amplitude: Amplitude);

    /// Routes the output bridge for the positive phase.
    fn set_positive_polarity(&mut self);

    /// Routes the output bridge for the negative phase.
    fn set_negative_polarity(&mut self);

    /// Disconnects the electrodes from both sources.
    fn clear_output(&mut self);
}

impl<T: PulseOutput + ?Sized> PulseOutput for &mut T {
    fn set_voltage(&mut self, channel: OutputChannel, amplitude: Amplitude) {
        (**self).set_voltage(channel, amplitude);
    }

    fn set_positive_polarity(&mut self) {
        (**self).set_positive_polarity();
    }

    fn set_negative_polarity(&mut self) {
        (**self).set_negative_polarity();
    }

    fn clear_output(&mut self) {
        (**self).clear_output();
    }
}

/// Lamp lit for the duration of each pulse.
pub trait ActivityIndicator {
    fn set_active(&mut self, active: bool);
}

/// Busy-wait used to time the phases of a pulse.
pub trait PulseDelay {
    /// Blocks for `units` × [`PULSE_UNIT_MICROS`].
    fn delay_units(&mut self, units: u16);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amplitude_saturates_at_stage_limit() {
        assert_eq!(Amplitude::saturating(0).get(), 0);
        assert_eq!(Amplitude::saturating(50).get(), 50);
        assert_eq!(Amplitude::saturating(51), Amplitude::MAX);
        assert_eq!(Amplitude::saturating(u8::MAX), Amplitude::MAX);
    }

    #[test]
    fn channels_map_to_converter_inputs() {
        assert_eq!(OutputChannel::Positive.as_index(), 0);
        assert_eq!(OutputChannel::Negative.as_index(), 1);
    }
}
