//! Interrupt-driven ADC conversions feeding [`CAPTURE`].
//!
//! The foreground selects the first channel and starts a conversion; the
//! end-of-conversion interrupt stores the 8-bit result and chains the next
//! channel until the pass is complete.

use embassy_stm32::adc::{Adc, Resolution, SampleTime};
use embassy_stm32::gpio::Flex;
use embassy_stm32::interrupt;
use embassy_stm32::interrupt::{InterruptExt, Priority};
use embassy_stm32::pac;
use embassy_stm32::peripherals::ADC1;
use portable_atomic::{AtomicU8, Ordering};

use stimulator_core::capture::{AnalogChannel, CaptureShared, Converter, on_conversion_complete};

use crate::conversion::{ADC_INPUTS, ChannelSelect, select_and_start};

/// Readiness flag and readings shared with the interrupt handler.
pub static CAPTURE: CaptureShared = CaptureShared::new();

/// Channel whose conversion is in flight.
static ACTIVE_CHANNEL: AtomicU8 = AtomicU8::new(0);

/// Register view of ADC1 used for channel switching.
struct Adc1Select;

impl ChannelSelect for Adc1Select {
    fn write_selection(&mut self, mask: u32) {
        pac::ADC1.chselr().write(|w| w.0 = mask);
    }

    fn selection_ready(&mut self) -> bool {
        pac::ADC1.isr().read().ccrdy()
    }

    fn clear_selection_ready(&mut self) {
        pac::ADC1.isr().write(|w| w.set_ccrdy(true));
    }

    fn start_conversion(&mut self) {
        pac::ADC1.cr().modify(|w| w.set_adstart(true));
    }
}

fn start_conversion(channel: AnalogChannel) {
    let index = channel.as_index();
    ACTIVE_CHANNEL.store(u8::try_from(index).unwrap_or(0), Ordering::Relaxed);
    select_and_start(&mut Adc1Select, channel);
}

/// Foreground converter; owns the ADC and its analog pins.
pub struct AdcConverter {
    _adc: Adc<'static, ADC1>,
    _inputs: [Flex<'static>; 3],
}

impl AdcConverter {
    pub fn new(mut adc: Adc<'static, ADC1>, mut inputs: [Flex<'static>; 3]) -> Self {
        adc.set_resolution(Resolution::BITS8);
        adc.set_sample_time(SampleTime::CYCLES12_5);
        for input in &mut inputs {
            input.set_as_analog();
        }

        let regs = pac::ADC1;
        regs.isr().write(|w| w.set_adrdy(true));
        regs.cr().modify(|w| w.set_aden(true));
        while !regs.isr().read().adrdy() {}
        regs.ier().modify(|w| w.set_eocie(true));

        interrupt::ADC1_COMP.set_priority(Priority::P1);
        // SAFETY: the handler below only touches CAPTURE and ADC registers.
        unsafe { interrupt::ADC1_COMP.enable() };

        defmt::info!("adc: 8-bit conversions on inputs {=[u32]}", ADC_INPUTS);
        Self {
            _adc: adc,
            _inputs: inputs,
        }
    }
}

impl Converter for AdcConverter {
    fn begin_conversion(&mut self, channel: AnalogChannel) {
        start_conversion(channel);
    }
}

/// Converter used from inside the interrupt to chain the next channel.
struct ChainedConversion;

impl Converter for ChainedConversion {
    fn begin_conversion(&mut self, channel: AnalogChannel) {
        start_conversion(channel);
    }
}

#[interrupt]
unsafe fn ADC1_COMP() {
    let regs = pac::ADC1;
    if !regs.isr().read().eoc() {
        return;
    }
    let reading = regs.dr().read().0.to_le_bytes()[0];
    regs.isr().write(|w| w.set_eoc(true));

    let index = usize::from(ACTIVE_CHANNEL.load(Ordering::Relaxed));
    if let Some(channel) = AnalogChannel::from_index(index) {
        on_conversion_complete(&CAPTURE, &mut ChainedConversion, channel, reading);
    }
}
