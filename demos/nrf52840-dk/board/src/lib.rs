#![no_std]

use core::marker::PhantomData;

use defmt_or_log::info;
use dualboot::{BootPolicy, Board};
use dualboot_image::verify::DigestVerifier;
use dualboot_image::SignatureVerifier;
use embassy_embedded_hal::adapter::BlockingAsync;
use embassy_nrf::gpio::{Level, Output, OutputDrive};
use embassy_nrf::nvmc::Nvmc;
use embedded_storage_async::nor_flash::NorFlash;

mod handoff;

/// Bytes of flash hashed or copied at a time.
pub const BLOCK_SIZE: usize = 256;

/// Core clock cycles per LED phase of the failure indication, roughly a quarter second at 64MHz.
const BLINK_CYCLES: u32 = 16_000_000;

/// The boot indication is a short burst, 100ms per phase.
const BOOT_BLINK_CYCLES: u32 = 6_400_000;
const BOOT_BLINK_TOGGLES: usize = 4;

/// nRF52840-DK running the bootloader from internal flash.
///
/// LED1 blinks briefly when the bootloader starts, LED2 blinks when no image can be trusted.
pub struct Nrf52840<C> {
    flash: BlockingAsync<Nvmc<'static>>,
    verifier: DigestVerifier<BLOCK_SIZE>,
    boot_led: Output<'static>,
    failure_led: Output<'static>,
    _config: PhantomData<C>,
}

impl<C: BootPolicy> Board for Nrf52840<C> {
    type Config = C;

    async fn init(_config: &Self::Config) -> Self {
        let p = embassy_nrf::init(Default::default());

        // Both LEDs are active low.
        Self {
            flash: BlockingAsync::new(Nvmc::new(p.NVMC)),
            verifier: DigestVerifier,
            boot_led: Output::new(p.P0_13, Level::High, OutputDrive::Standard),
            failure_led: Output::new(p.P0_14, Level::High, OutputDrive::Standard),
            _config: PhantomData,
        }
    }

    fn storage(&mut self) -> (&mut impl NorFlash, &mut impl SignatureVerifier) {
        (&mut self.flash, &mut self.verifier)
    }

    fn indicate_boot(&mut self) {
        for _ in 0..BOOT_BLINK_TOGGLES {
            self.boot_led.toggle();
            cortex_m::asm::delay(BOOT_BLINK_CYCLES);
        }
    }

    fn disable_interrupts(&mut self) {
        cortex_m::interrupt::disable();
        handoff::quiesce_nvic();
    }

    fn start_application(&mut self, address: u32) -> ! {
        info!("Handing over to vector table at {:x}", address);

        // SAFETY: the engine only yields addresses of images that passed verification,
        // or legacy images whose vector table starts with the expected stack pointer.
        unsafe { handoff::boot_application(address) }
    }

    fn indicate_failure(&mut self) -> ! {
        loop {
            self.failure_led.toggle();
            cortex_m::asm::delay(BLINK_CYCLES);
        }
    }

    fn reset(&mut self) -> ! {
        cortex_m::peripheral::SCB::sys_reset()
    }
}
