use defmt_or_log::{debug, error, info, trace, warn};
use dualboot_image::commit::{commit_secondary_into_primary, erase_descriptor, set_bank_flag, CommitError};
use dualboot_image::descriptor::validate_header;
use dualboot_image::flash::{Error, FlashRegion};
use dualboot_image::layout::LayoutError;
use dualboot_image::{ImageDescriptor, ImageFlags, Layout, SignatureVerifier};
use embedded_storage_async::nor_flash::NorFlash;

use crate::decision::{
    is_rollback, legacy_entry, primary_action, staging_action, BootError, BootOrigin, Decision, EraseReason,
    StagingAction,
};
use crate::BootPolicy;

/// Inspects both banks and brings them into a state from which exactly one image can be booted.
///
/// Every flash mutation is ordered such that a power loss at any point either leaves
/// the staged image in place to be committed again, or leaves a bootable primary bank.
pub struct BootEngine<'a, T: NorFlash, V, P> {
    flash: FlashRegion<&'a mut T>,
    verifier: &'a mut V,
    policy: &'a P,
    layout: Layout,
}

impl<'a, T: NorFlash, V: SignatureVerifier, P: BootPolicy> BootEngine<'a, T, V, P> {
    /// Yields an error if the layout of `policy` cannot be safely erased and programmed on `flash`.
    pub fn new(flash: &'a mut T, verifier: &'a mut V, policy: &'a P) -> Result<Self, LayoutError> {
        let layout = policy.layout();
        layout.check(T::ERASE_SIZE as u32, flash.capacity())?;

        Ok(Self {
            flash: FlashRegion::new(flash),
            verifier,
            policy,
            layout,
        })
    }

    /// Decide what to boot, committing or discarding the staged image along the way.
    ///
    /// `BLOCK_SIZE` bytes are copied at a time during a commit.
    pub async fn decide<const BLOCK_SIZE: usize>(&mut self) -> Decision {
        match self.try_decide::<BLOCK_SIZE>().await {
            Ok(decision) => {
                debug!("Decided {:?}", decision);
                decision
            }
            Err(e) => {
                #[cfg(feature = "defmt")]
                error!("Flash failed while deciding what to boot: {:?}", defmt::Debug2Format(&e));
                #[cfg(not(feature = "defmt"))]
                error!("Flash failed while deciding what to boot: {:?}", e);
                Decision::Reset(BootError::Flash)
            }
        }
    }

    async fn try_decide<const BLOCK_SIZE: usize>(&mut self) -> Result<Decision, Error<T::Error>> {
        let primary = self.read_header(self.layout.primary).await?;
        let staged = self.read_header(self.layout.secondary).await?;

        if let Some(staged) = staged {
            if let Some(decision) = self.evaluate_staging::<BLOCK_SIZE>(primary.as_ref(), &staged).await? {
                return Ok(decision);
            }
        }

        self.evaluate_primary(primary).await
    }

    /// Descriptor of the bank at `bank`, or `None` if it has no valid header for this board.
    async fn read_header(&mut self, bank: u32) -> Result<Option<ImageDescriptor>, Error<T::Error>> {
        match validate_header(self.flash.inner(), bank, self.policy.hardware_id()).await {
            Ok(descriptor) => {
                debug!("Bank {:x} holds {:?}", bank, descriptor);
                Ok(Some(descriptor))
            }
            Err(Error::InvalidData(reason)) => {
                debug!("Bank {:x} has no valid header: {:?}", bank, reason);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Commit or discard the staged image.
    ///
    /// Yields a decision only if the staging bank settled the boot, otherwise
    /// the primary bank is to be evaluated next.
    async fn evaluate_staging<const BLOCK_SIZE: usize>(
        &mut self,
        primary: Option<&ImageDescriptor>,
        staged: &ImageDescriptor,
    ) -> Result<Option<Decision>, Error<T::Error>> {
        if is_rollback(primary, staged, self.policy.reject_equal_sequence()) {
            self.discard_staged(EraseReason::Rollback).await?;
            return Ok(None);
        }

        let verification = self
            .verifier
            .verify(self.flash.inner(), &self.layout, self.layout.secondary)
            .await;

        let newly_committed = match staging_action(staged.flags(), verification) {
            StagingAction::Commit { newly_committed } => newly_committed,
            StagingAction::Erase(reason) => {
                self.discard_staged(reason).await?;
                return Ok(None);
            }
        };

        let committed =
            match commit_secondary_into_primary::<_, BLOCK_SIZE>(&mut self.flash, &self.layout, staged).await {
                Ok(committed) => committed,
                Err(CommitError::Malformed | CommitError::TooLarge) => {
                    self.discard_staged(EraseReason::Malformed).await?;
                    return Ok(None);
                }
                Err(CommitError::Flash(e)) => return Err(e),
            };

        if self
            .verifier
            .verify(self.flash.inner(), &self.layout, self.layout.primary)
            .await
            .is_err()
        {
            // The staged image is kept, the next attempt commits it again.
            error!("Committed image does not verify in the primary bank");
            return Ok(Some(Decision::Reset(BootError::CommitIntegrityFailure)));
        }

        if newly_committed {
            set_bank_flag(
                &mut self.flash,
                &self.layout,
                self.layout.primary,
                &committed,
                ImageFlags::CommitPending,
            )
            .await?;
        }

        erase_descriptor(&mut self.flash, &self.layout, self.layout.secondary).await?;
        info!("Committed image with sequence number {}", committed.sequence_number);

        Ok(Some(Decision::Boot {
            address: committed.execution_address,
            origin: BootOrigin::Committed { newly_committed },
        }))
    }

    async fn discard_staged(&mut self, reason: EraseReason) -> Result<(), Error<T::Error>> {
        warn!("Discarding staged image: {:?}", reason);
        erase_descriptor(&mut self.flash, &self.layout, self.layout.secondary).await
    }

    /// Decide whether the image in the primary bank can be booted. Never mutates flash.
    async fn evaluate_primary(&mut self, primary: Option<ImageDescriptor>) -> Result<Decision, Error<T::Error>> {
        let Some(primary) = primary else {
            return self.evaluate_legacy().await;
        };

        let verification = self
            .verifier
            .verify(self.flash.inner(), &self.layout, self.layout.primary)
            .await;

        match primary_action(primary.flags(), verification) {
            Ok(()) => {
                if primary.flags() == Ok(ImageFlags::CommitPending) {
                    info!("Primary image still awaits confirmation by the application");
                }

                Ok(Decision::Boot {
                    address: primary.execution_address,
                    origin: BootOrigin::Primary,
                })
            }
            Err(e) => {
                error!("Primary image is not bootable, flags {:x}", primary.flags);
                Ok(Decision::FailureIndication(e))
            }
        }
    }

    /// Look for the vector table of an image without descriptor.
    async fn evaluate_legacy(&mut self) -> Result<Decision, Error<T::Error>> {
        let after_descriptor = self.flash.read_word(self.layout.payload(self.layout.primary)).await?;
        let at_base = self.flash.read_word(self.layout.primary).await?;
        trace!("Legacy stack pointers {:x} and {:x}", after_descriptor, at_base);

        match legacy_entry(&self.layout, self.policy.legacy_stack_pointer(), after_descriptor, at_base) {
            Some(address) => {
                warn!("No descriptor in primary bank, booting legacy image at {:x}", address);
                Ok(Decision::Boot {
                    address,
                    origin: BootOrigin::Legacy,
                })
            }
            None => {
                error!("No bootable image in primary bank");
                Ok(Decision::Reset(BootError::NoBootableImage))
            }
        }
    }
}
