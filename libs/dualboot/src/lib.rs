#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

mod decision;
mod engine;
#[cfg(test)]
mod testing;

use defmt_or_log::{error, info, warn};
use dualboot_image::{Layout, SignatureVerifier};
use embedded_storage_async::nor_flash::NorFlash;

pub use decision::{
    is_rollback, legacy_entry, primary_action, staging_action, BootError, BootOrigin, Decision, EraseReason,
    StagingAction,
};
pub use engine::BootEngine;

/// Application specific parameters of the boot decision.
pub trait BootPolicy {
    /// Images built for any other hardware are ignored, as if the bank was erased.
    fn hardware_id(&self) -> u32;

    /// Initial stack pointer found in the vector table of images that predate the descriptor format.
    fn legacy_stack_pointer(&self) -> u32;

    /// Also refuse a staged image whose sequence number equals the one in the primary bank.
    ///
    /// By default only strictly older images count as a rollback, so that a power loss
    /// right after a commit leads to the same image being committed again.
    fn reject_equal_sequence(&self) -> bool {
        false
    }

    /// Placement of the banks in flash.
    fn layout(&self) -> Layout;
}

/// A board that can boot an application image.
///
/// Typically a board needs to support the intrinsics for some microcontroller and
/// contain non volatile memory that stores both banks.
#[allow(async_fn_in_trait)]
pub trait Board {
    /// Type used to instantiate a [Board] implementation.
    type Config: BootPolicy;

    /// Initialize the [Board], can only be called once.
    async fn init(config: &Self::Config) -> Self;

    /// Give mutable references to the flash holding both banks, and to the signature verifier.
    fn storage(&mut self) -> (&mut impl NorFlash, &mut impl SignatureVerifier);

    /// Signal that the bootloader is running, for instance by lighting a LED.
    fn indicate_boot(&mut self);

    /// Mask and clear all interrupts, so that nothing fires during the flash
    /// operations nor leaks into the booted image.
    fn disable_interrupts(&mut self);

    /// Release all peripherals and jump to the image entry at `address`.
    fn start_application(&mut self, address: u32) -> !;

    /// Signal an unrecoverable failure, for instance by blinking a LED forever.
    fn indicate_failure(&mut self) -> !;

    /// Hard reset the device.
    fn reset(&mut self) -> !;
}

/// Run a single boot attempt up to the point where a [Decision] is reached.
///
/// The verifier is initialized before the first bank is looked at and torn down
/// again before returning, regardless of the outcome.
pub async fn decide<B: Board, const BLOCK_SIZE: usize>(board: &mut B, policy: &B::Config) -> Decision {
    board.indicate_boot();
    board.disable_interrupts();

    let (flash, verifier) = board.storage();

    verifier.init();
    let decision = match BootEngine::new(flash, &mut *verifier, policy) {
        Ok(mut engine) => engine.decide::<BLOCK_SIZE>().await,
        Err(e) => defmt_or_log::panic!("Unusable bank layout {:?}: {:?}", policy.layout(), e),
    };
    verifier.deinit();

    decision
}

pub async fn start<B: Board, const BLOCK_SIZE: usize>(config: B::Config) -> ! {
    let mut board = B::init(&config).await;

    match decide::<_, BLOCK_SIZE>(&mut board, &config).await {
        Decision::Boot { address, origin } => {
            info!("Booting {:?} image at {:x}", origin, address);
            board.start_application(address)
        }
        Decision::Reset(e) => {
            warn!("Resetting after failed attempt: {:?}", e);
            board.reset()
        }
        Decision::FailureIndication(e) => {
            error!("No image can be trusted: {:?}", e);
            board.indicate_failure()
        }
    }
}
