use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::adc::Adc;
use embassy_stm32::flash::Flash;
use embassy_stm32::gpio::{Flex, Level, Output, Speed};
use embassy_stm32::spi::{self, Spi};
use embassy_stm32::time::Hertz;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embedded_storage::nor_flash::RmwNorFlashStorage;
use heapless::Vec;
use static_cell::StaticCell;

use stimulator_core::settings::{SettingsSource, SettingsStore};
use stimulator_core::terminal::FIRMWARE_VERSION;
use stimulator_core::terminal::commands::CommandExecutor;

use crate::hw::{
    AdcConverter, FLASH_PAGE_LEN, Mcp4802, OutputStage, PolarityLine, SETTINGS_OFFSET,
    StimulatorBoard,
};
use crate::status;
use crate::terminal::TerminalSession;
use crate::terminal::frames::{FrameSink, TerminalFrame};
use crate::usb;

mod pulse_task;
mod usb_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

/// Depth of each terminal direction, in packets.
const TERMINAL_QUEUE_DEPTH: usize = 8;

/// One received USB packet.
pub(super) type RxFrame = Vec<u8, { usb::MAX_PACKET_SIZE as usize }>;

pub(super) static TERMINAL_RX: Channel<CriticalSectionRawMutex, RxFrame, TERMINAL_QUEUE_DEPTH> =
    Channel::new();
pub(super) static TERMINAL_TX: Channel<
    CriticalSectionRawMutex,
    TerminalFrame,
    TERMINAL_QUEUE_DEPTH,
> = Channel::new();

static FLASH_MERGE_BUFFER: StaticCell<[u8; FLASH_PAGE_LEN]> = StaticCell::new();

/// Hands frames to the USB task; frames are discarded while no host listens.
pub(super) struct QueueSink;

impl FrameSink for QueueSink {
    fn try_send(&mut self, frame: TerminalFrame) -> Result<(), TerminalFrame> {
        if !status::terminal_attached() {
            return Ok(());
        }
        TERMINAL_TX.try_send(frame).map_err(|TrySendError::Full(frame)| {
            status::record_dropped_frame();
            frame
        })
    }
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA1,
        PA4,
        PA5,
        PA7,
        PB0,
        PB4,
        PB5,
        PC6,
        ADC1,
        SPI1,
        FLASH,
        USB,
        PA11,
        PA12,
        ..
    } = hal::init(config);

    // Clamp the output stage before anything else can run.
    let positive = PolarityLine::clamped(Flex::new(PB4));
    let negative = PolarityLine::clamped(Flex::new(PB5));

    let mut spi_config = spi::Config::default();
    spi_config.frequency = Hertz(4_000_000);
    let dac = Mcp4802::new(
        Spi::new_blocking_txonly(SPI1, PA5, PA7, spi_config),
        Output::new(PB0, Level::High, Speed::VeryHigh),
    );
    let indicator = Output::new(PC6, Level::Low, Speed::Low);
    let output = OutputStage::new(dac, positive, negative, indicator);

    let converter = AdcConverter::new(
        Adc::new(ADC1),
        [Flex::new(PA0), Flex::new(PA1), Flex::new(PA4)],
    );

    let merge_buffer = FLASH_MERGE_BUFFER.init([0; FLASH_PAGE_LEN]);
    let flash = RmwNorFlashStorage::new(Flash::new_blocking(FLASH), merge_buffer);
    let mut store = SettingsStore::new(flash, SETTINGS_OFFSET);
    let loaded = store.load_with_source();
    match loaded.source {
        SettingsSource::Stored => defmt::info!("settings: loaded stored record"),
        SettingsSource::Erased => defmt::info!("settings: page erased, using defaults"),
        SettingsSource::ReadFailed => defmt::warn!("settings: read failed, using defaults"),
    }
    let serial = store.load_serial();
    match serial {
        Some(serial) => defmt::info!("stimulator firmware {} serial {}", FIRMWARE_VERSION, serial),
        None => defmt::info!("stimulator firmware {} (no serial number)", FIRMWARE_VERSION),
    }

    let board = StimulatorBoard::new(output, converter, QueueSink);
    let terminal = TerminalSession::new(
        CommandExecutor::new(store, FIRMWARE_VERSION).with_serial(serial),
    );

    spawner
        .spawn(usb_task::run(USB, PA12, PA11))
        .expect("failed to spawn USB task");
    spawner
        .spawn(pulse_task::run(board, loaded.settings, terminal))
        .expect("failed to spawn pulse task");

    core::future::pending::<()>().await;
}
