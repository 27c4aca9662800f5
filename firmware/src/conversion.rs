//! Channel selection sequence for the STM32G0 ADC.
//!
//! After CHSELR is written the converter raises CCRDY once the new selection
//! is latched. ADSTART must wait for that flag, otherwise the conversion runs
//! on the previous channel.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use stimulator_core::capture::AnalogChannel;

/// ADC input numbers for current, correction and tissue, in that order.
pub const ADC_INPUTS: [u32; 3] = [0, 1, 4];

/// CHSELR bit for the converter input wired to `channel`.
pub const fn channel_mask(channel: AnalogChannel) -> u32 {
    1 << ADC_INPUTS[channel.as_index()]
}

/// Register accesses needed to switch channels and start a conversion.
pub trait ChannelSelect {
    fn write_selection(&mut self, mask: u32);
    /// CCRDY: the last selection write has been latched.
    fn selection_ready(&mut self) -> bool;
    fn clear_selection_ready(&mut self);
    fn start_conversion(&mut self);
}

/// Selects `channel`, waits for the selection to latch, then starts.
pub fn select_and_start<R: ChannelSelect>(regs: &mut R, channel: AnalogChannel) {
    regs.write_selection(channel_mask(channel));
    while !regs.selection_ready() {}
    regs.clear_selection_ready();
    regs.start_conversion();
}
