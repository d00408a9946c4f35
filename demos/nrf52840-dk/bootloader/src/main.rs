#![no_std]
#![no_main]

#[cfg(feature = "defmt")]
use defmt_rtt as _;
use dualboot::BootPolicy;
use dualboot_image::Layout;
use dualboot_nrf::{Nrf52840, BLOCK_SIZE};
use embassy_executor::Spawner;
use panic_probe as _;

/// Base of this bootloader in flash, must match `memory.x`.
const BOOTLOADER_START: u32 = 0xF8000;

#[used]
#[no_mangle]
#[link_section = ".uicr_bootloader_start_address"]
pub static UICR_BOOTLOADER_START_ADDRESS: u32 = BOOTLOADER_START;

struct Config;

impl BootPolicy for Config {
    fn hardware_id(&self) -> u32 {
        0x52840
    }

    fn legacy_stack_pointer(&self) -> u32 {
        // Top of RAM
        0x2004_0000
    }

    fn layout(&self) -> Layout {
        Layout::new(0x26000, 0x8F000, 0x1000)
    }
}

#[embassy_executor::main]
async fn main(_spawner: Spawner) -> ! {
    dualboot::start::<Nrf52840<Config>, BLOCK_SIZE>(Config).await
}
