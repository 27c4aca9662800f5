//! Output stage: MCP4802 dual DAC for the amplitudes and the two polarity
//! lines that enable one op-amp at a time.
//!
//! Each op-amp has its own DAC channel on this board: the positive phase is
//! set on channel A and the negative phase on channel B (see [`dac_word`]).
//! Boards that feed both op-amps from channel A need the negative amplitude
//! written there instead.

use embassy_stm32::gpio::{Flex, Output, Pull, Speed};
use embassy_stm32::mode::Blocking;
use embassy_stm32::pac;
use embassy_stm32::spi::Spi;

use stimulator_core::output::{ActivityIndicator, Amplitude, OutputChannel, PulseOutput};

use crate::dac::dac_word;

/// GPIOB pin numbers of the positive and negative polarity lines.
pub const POSITIVE_PIN: usize = 4;
pub const NEGATIVE_PIN: usize = 5;

pub struct Mcp4802 {
    spi: Spi<'static, Blocking>,
    select: Output<'static>,
}

impl Mcp4802 {
    pub fn new(spi: Spi<'static, Blocking>, select: Output<'static>) -> Self {
        Self { spi, select }
    }

    pub fn write(&mut self, channel: OutputChannel, amplitude: Amplitude) {
        let word = dac_word(channel, amplitude);
        self.select.set_low();
        let result = self.spi.blocking_write(&word.to_be_bytes());
        self.select.set_high();
        if let Err(error) = result {
            defmt::warn!("dac: write {} failed: {}", channel, defmt::Debug2Format(&error));
        }
    }
}

/// Tri-stated polarity line: released it lets the op-amp drive, clamped low it
/// holds the op-amp at zero.
pub struct PolarityLine {
    pin: Flex<'static>,
}

impl PolarityLine {
    pub fn clamped(pin: Flex<'static>) -> Self {
        let mut line = Self { pin };
        line.clamp();
        line
    }

    fn clamp(&mut self) {
        self.pin.set_low();
        self.pin.set_as_output(Speed::Low);
    }

    fn release(&mut self) {
        self.pin.set_as_input(Pull::None);
    }
}

/// Board implementation of the output collaborators.
pub struct OutputStage {
    dac: Mcp4802,
    positive: PolarityLine,
    negative: PolarityLine,
    indicator: Output<'static>,
}

impl OutputStage {
    pub fn new(
        dac: Mcp4802,
        positive: PolarityLine,
        negative: PolarityLine,
        indicator: Output<'static>,
    ) -> Self {
        Self {
            dac,
            positive,
            negative,
            indicator,
        }
    }
}

impl PulseOutput for OutputStage {
    fn set_voltage(&mut self, channel: OutputChannel, amplitude: Amplitude) {
        self.dac.write(channel, amplitude);
    }

    fn set_positive_polarity(&mut self) {
        self.negative.clamp();
        self.positive.release();
    }

    fn set_negative_polarity(&mut self) {
        self.positive.clamp();
        self.negative.release();
    }

    fn clear_output(&mut self) {
        self.negative.clamp();
        self.positive.clamp();
    }
}

impl ActivityIndicator for OutputStage {
    fn set_active(&mut self, active: bool) {
        if active {
            self.indicator.set_high();
        } else {
            self.indicator.set_low();
        }
    }
}

/// Clamps both polarity lines through the registers, without owning the pins.
pub fn force_outputs_off() {
    let port = pac::GPIOB;
    port.bsrr().write(|w| {
        w.set_br(POSITIVE_PIN, true);
        w.set_br(NEGATIVE_PIN, true);
    });
    port.moder().modify(|w| {
        w.set_moder(POSITIVE_PIN, pac::gpio::vals::Moder::OUTPUT);
        w.set_moder(NEGATIVE_PIN, pac::gpio::vals::Moder::OUTPUT);
    });
}
