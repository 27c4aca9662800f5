use core::panic::PanicInfo;
use defmt::error;

use crate::hw;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    hw::force_outputs_off();
    error!("PANIC: {}", defmt::Display2Format(info));
    cortex_m::asm::udf();
}
