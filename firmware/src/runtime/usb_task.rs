use embassy_futures::join::join;
use embassy_futures::select::{Either3, select3};
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_usb::driver::EndpointError;
use static_cell::StaticCell;

use super::{RxFrame, TERMINAL_RX, TERMINAL_TX};
use crate::status;
use crate::terminal::frames::TerminalFrame;
use crate::usb::{self, CdcAcmHandle, UsbDeviceStrings, UsbTerminal};

embassy_stm32::bind_interrupts!(struct UsbIrqs {
    USB_UCPD1_2 => embassy_stm32::usb::InterruptHandler<hal::peripherals::USB>;
});

static USB_STORAGE: StaticCell<usb::UsbDeviceStorage> = StaticCell::new();

#[embassy_executor::task]
pub async fn run(
    usb: Peri<'static, hal::peripherals::USB>,
    dp: Peri<'static, hal::peripherals::PA12>,
    dm: Peri<'static, hal::peripherals::PA11>,
) -> ! {
    let storage = USB_STORAGE.init(usb::UsbDeviceStorage::new());
    let driver = embassy_stm32::usb::Driver::new(usb, UsbIrqs, dp, dm);

    let UsbTerminal {
        mut device,
        terminal,
    } = UsbTerminal::new(driver, storage, UsbDeviceStrings::default());

    join(device.run(), run_terminal_interface(terminal)).await;
    loop {
        core::future::pending::<()>().await;
    }
}

async fn run_terminal_interface<D>(terminal: CdcAcmHandle<D>) -> !
where
    D: embassy_usb::driver::Driver<'static>,
{
    let CdcAcmHandle {
        mut sender,
        mut receiver,
        control,
    } = terminal;
    let rx_queue = TERMINAL_RX.sender();
    let tx_queue = TERMINAL_TX.receiver();
    let mut ingress = [0u8; usb::MAX_PACKET_SIZE as usize];
    let mut pending_tx: Option<TerminalFrame> = None;

    loop {
        join(receiver.wait_connection(), sender.wait_connection()).await;
        while !sender.dtr() {
            control.control_changed().await;
        }
        pending_tx.take();
        // Stale replies from a previous session are of no use to the new host.
        while tx_queue.try_receive().is_ok() {}
        status::set_terminal_attached(true);

        let current = status::snapshot();
        defmt::info!(
            "usb: terminal connected, flag={} state={} pulses={} dropped={}",
            current.start_flag,
            current.state,
            current.pulses,
            current.dropped_frames
        );

        loop {
            match select3(
                receiver.read_packet(&mut ingress),
                async {
                    if pending_tx.is_none() {
                        pending_tx = Some(tx_queue.receive().await);
                    }
                    let len = match pending_tx.as_ref() {
                        Some(frame) => {
                            sender.write_packet(frame).await?;
                            frame.len()
                        }
                        None => 0,
                    };
                    pending_tx = None;
                    Ok::<usize, EndpointError>(len)
                },
                control.control_changed(),
            )
            .await
            {
                Either3::First(Ok(count)) => {
                    if count == 0 {
                        continue;
                    }

                    let mut frame = RxFrame::new();
                    if frame.extend_from_slice(&ingress[..count]).is_err() {
                        defmt::warn!("usb: dropping terminal packet len={} (overflow)", count);
                        continue;
                    }

                    rx_queue.send(frame).await;
                }
                Either3::First(Err(EndpointError::Disabled)) => {
                    defmt::warn!("usb: terminal interface disabled");
                    break;
                }
                Either3::First(Err(_)) => {
                    defmt::warn!("usb: terminal read error");
                }
                Either3::Second(Ok(_)) => {}
                Either3::Second(Err(EndpointError::Disabled)) => {
                    defmt::warn!("usb: terminal write disabled");
                    break;
                }
                Either3::Second(Err(_)) => {
                    defmt::warn!("usb: terminal write error");
                }
                Either3::Third(()) => {
                    if !sender.dtr() {
                        defmt::warn!("usb: terminal host dropped DTR");
                        break;
                    }
                }
            }
        }

        status::set_terminal_attached(false);
    }
}
