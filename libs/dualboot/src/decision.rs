//! Rules that decide what to do with each bank, free of any flash access.

use dualboot_image::{ImageDescriptor, ImageFlags, Layout, VerificationFailed};

/// Reasons why no image could be booted in this attempt.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootError {
    /// The primary bank did not verify right after a commit, flash state is ambiguous.
    CommitIntegrityFailure,
    /// The primary bank holds neither a descriptor nor a recognizable legacy image.
    NoBootableImage,
    /// The primary bank has a descriptor but fails verification or is not in a bootable state.
    PrimaryImageUntrusted,
    /// The flash driver reported an error while inspecting or mutating a bank.
    Flash,
}

/// How the image that is about to be booted came to be in the primary bank.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootOrigin {
    /// Already present and valid.
    Primary,
    /// Committed from the staging bank during this boot.
    ///
    /// `newly_committed` is set when the staged image was new, which is the moment
    /// the update agent should report a successful update.
    Committed { newly_committed: bool },
    /// No descriptor, but the vector table of a plain image was found.
    Legacy,
}

/// Terminal outcome of a single boot attempt.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Decision {
    /// Hand off control to `address`.
    Boot { address: u32, origin: BootOrigin },
    /// Hard reset, which starts a new attempt from scratch.
    Reset(BootError),
    /// Signal the failure forever, without resetting.
    FailureIndication(BootError),
}

/// Why a staged image is discarded instead of committed.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EraseReason {
    /// Older than what the primary bank already holds.
    Rollback,
    /// Failed verification.
    SignatureInvalid,
    /// Explicitly marked as invalid.
    MarkedInvalid,
    /// `COMMIT_PENDING` is only ever written to the primary bank.
    CommitPendingOnStaging,
    /// Flag byte is not a known lifecycle state.
    UnknownFlags(u8),
    /// Address range is impossible or does not fit the primary bank.
    Malformed,
}

/// What to do with a staged image whose header is valid.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StagingAction {
    Commit { newly_committed: bool },
    Erase(EraseReason),
}

/// Whether the staged image would roll back the image in the primary bank.
///
/// Only compares sequence numbers, and only if the primary bank has a valid header.
/// A primary image still flagged `NEW` is a commit that was cut short, so with `reject_equal`
/// it does not shield itself from the staged image it was copied from.
pub fn is_rollback(primary: Option<&ImageDescriptor>, staged: &ImageDescriptor, reject_equal: bool) -> bool {
    match primary {
        Some(primary) if primary.sequence_number > staged.sequence_number => true,
        Some(primary) => {
            reject_equal
                && primary.sequence_number == staged.sequence_number
                && primary.flags() != Ok(ImageFlags::New)
        }
        None => false,
    }
}

/// Decide the fate of a staged image that is not a rollback.
pub fn staging_action(flags: Result<ImageFlags, u8>, verification: Result<(), VerificationFailed>) -> StagingAction {
    if verification.is_err() {
        return StagingAction::Erase(EraseReason::SignatureInvalid);
    }

    match flags {
        Ok(ImageFlags::New) => StagingAction::Commit { newly_committed: true },
        Ok(ImageFlags::Valid) => StagingAction::Commit { newly_committed: false },
        Ok(ImageFlags::Invalid) => StagingAction::Erase(EraseReason::MarkedInvalid),
        Ok(ImageFlags::CommitPending) => StagingAction::Erase(EraseReason::CommitPendingOnStaging),
        Err(raw) => StagingAction::Erase(EraseReason::UnknownFlags(raw)),
    }
}

/// Decide whether the image in the primary bank may be booted.
///
/// `COMMIT_PENDING` counts as bootable: a reset between the commit and the final flag
/// update must not strand the device.
pub fn primary_action(flags: Result<ImageFlags, u8>, verification: Result<(), VerificationFailed>) -> Result<(), BootError> {
    match (verification, flags) {
        (Ok(()), Ok(ImageFlags::Valid | ImageFlags::CommitPending)) => Ok(()),
        _ => Err(BootError::PrimaryImageUntrusted),
    }
}

/// Find the entry point of an image in the primary bank that has no descriptor.
///
/// An image linked behind the descriptor area is preferred over one linked at the start of the bank.
pub fn legacy_entry(layout: &Layout, stack_pointer: u32, after_descriptor: u32, at_base: u32) -> Option<u32> {
    if after_descriptor == stack_pointer {
        Some(layout.payload(layout.primary))
    } else if at_base == stack_pointer {
        Some(layout.primary)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(sequence_number: u32) -> ImageDescriptor {
        ImageDescriptor::new(0, sequence_number, ImageFlags::New)
    }

    #[test]
    fn rollback() {
        let primary = |sequence_number| descriptor(sequence_number).with_flags(ImageFlags::Valid);

        assert!(is_rollback(Some(&primary(5)), &descriptor(3), false));
        assert!(!is_rollback(Some(&primary(5)), &descriptor(5), false));
        assert!(is_rollback(Some(&primary(5)), &descriptor(5), true));
        assert!(is_rollback(Some(&primary(5).with_flags(ImageFlags::CommitPending)), &descriptor(5), true));
        assert!(!is_rollback(Some(&primary(3)), &descriptor(5), true));
        assert!(!is_rollback(None, &descriptor(0), true));
    }

    #[test]
    fn unfinished_commit_is_no_rollback() {
        assert!(!is_rollback(Some(&descriptor(5)), &descriptor(5), true));
        assert!(is_rollback(Some(&descriptor(6)), &descriptor(5), true));
    }

    #[test]
    fn staging_rules() {
        let all = [
            Ok(ImageFlags::New),
            Ok(ImageFlags::Valid),
            Ok(ImageFlags::Invalid),
            Ok(ImageFlags::CommitPending),
            Err(0x42),
        ];

        for flags in all {
            assert_eq!(
                staging_action(flags, Err(VerificationFailed)),
                StagingAction::Erase(EraseReason::SignatureInvalid)
            );
        }

        let passing: [StagingAction; 5] = all.map(|flags| staging_action(flags, Ok(())));
        assert_eq!(
            passing,
            [
                StagingAction::Commit { newly_committed: true },
                StagingAction::Commit { newly_committed: false },
                StagingAction::Erase(EraseReason::MarkedInvalid),
                StagingAction::Erase(EraseReason::CommitPendingOnStaging),
                StagingAction::Erase(EraseReason::UnknownFlags(0x42)),
            ]
        );
    }

    #[test]
    fn primary_rules() {
        assert_eq!(primary_action(Ok(ImageFlags::Valid), Ok(())), Ok(()));
        assert_eq!(primary_action(Ok(ImageFlags::CommitPending), Ok(())), Ok(()));

        for flags in [Ok(ImageFlags::New), Ok(ImageFlags::Invalid), Err(0)] {
            assert_eq!(primary_action(flags, Ok(())), Err(BootError::PrimaryImageUntrusted));
        }
        for flags in [Ok(ImageFlags::Valid), Ok(ImageFlags::CommitPending)] {
            assert_eq!(
                primary_action(flags, Err(VerificationFailed)),
                Err(BootError::PrimaryImageUntrusted)
            );
        }
    }

    #[test]
    fn legacy() {
        let layout = Layout::new(0x26000, 0x8f000, 0x1000);
        const SP: u32 = 0x2004_0000;

        assert_eq!(legacy_entry(&layout, SP, SP, SP), Some(0x27000));
        assert_eq!(legacy_entry(&layout, SP, u32::MAX, SP), Some(0x26000));
        assert_eq!(legacy_entry(&layout, SP, u32::MAX, u32::MAX), None);
    }
}
