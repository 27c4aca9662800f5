//! MCP4802 command words for the two amplitude channels.
//!
//! Each op-amp has its own DAC channel on this board: the positive phase is
//! set on channel A and the negative phase on channel B. Boards that feed both
//! op-amps from channel A need the negative amplitude written there instead.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use stimulator_core::output::{Amplitude, OutputChannel};

/// Channel A, 1x gain, active.
const DAC_COMMAND_A: u16 = 0x1000;
/// Channel B, 1x gain, active.
const DAC_COMMAND_B: u16 = 0x9000;
/// DAC counts per amplitude step.
const DAC_COUNTS_PER_STEP: u16 = 5;

/// Encodes the 16-bit MCP4802 write for `amplitude` on `channel`.
pub fn dac_word(channel: OutputChannel, amplitude: Amplitude) -> u16 {
    let command = match channel {
        OutputChannel::Positive => DAC_COMMAND_A,
        OutputChannel::Negative => DAC_COMMAND_B,
    };
    command | ((u16::from(amplitude.get()) * DAC_COUNTS_PER_STEP) << 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_phase_drives_its_own_dac_channel() {
        let amplitude = Amplitude::saturating(10);
        assert_eq!(dac_word(OutputChannel::Positive, amplitude), 0x1320);
        assert_eq!(dac_word(OutputChannel::Negative, amplitude), 0x9320);
    }

    #[test]
    fn full_scale_fits_the_data_bits() {
        assert_eq!(dac_word(OutputChannel::Positive, Amplitude::MAX), 0x1FA0);
        assert_eq!(dac_word(OutputChannel::Negative, Amplitude::saturating(0)), 0x9000);
    }
}
