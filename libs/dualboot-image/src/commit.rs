//! Moving a staged image from the secondary bank into the primary bank.

use embedded_storage_async::nor_flash::NorFlash;

use crate::descriptor::{ImageDescriptor, ImageFlags, MAGIC, RECORD_LEN};
use crate::flash::{Error, FlashRegion};
use crate::layout::Layout;

/// Reasons why a commit did not complete.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommitError<E> {
    /// The staged descriptor describes an impossible address range. Nothing was erased.
    Malformed,
    /// The staged image does not fit in the primary bank. Nothing was erased.
    TooLarge,
    /// Flash failed halfway, the primary bank is in an undefined state.
    Flash(Error<E>),
}

impl<E> From<Error<E>> for CommitError<E> {
    fn from(value: Error<E>) -> Self {
        CommitError::Flash(value)
    }
}

/// Erase the descriptor area of the bank at `bank`.
///
/// The payload is left in place, without a descriptor it is never looked at again.
pub async fn erase_descriptor<T: NorFlash>(
    flash: &mut FlashRegion<T>,
    layout: &Layout,
    bank: u32,
) -> Result<(), Error<T::Error>> {
    flash.erase_region(bank, layout.descriptor_size).await?;
    Ok(())
}

/// Rewrite the descriptor of the bank at `bank` with new `flags`.
///
/// The descriptor area has to be erased to do so, so a power loss in between leaves the bank without descriptor.
pub async fn set_bank_flag<T: NorFlash>(
    flash: &mut FlashRegion<T>,
    layout: &Layout,
    bank: u32,
    descriptor: &ImageDescriptor,
    flags: ImageFlags,
) -> Result<(), Error<T::Error>> {
    erase_descriptor(flash, layout, bank).await?;
    write_record(flash, bank, &descriptor.with_flags(flags)).await
}

/// Program `descriptor` into the erased descriptor area of the bank at `bank`.
///
/// The program units holding the magic go last. A record torn by a power loss thus either
/// has no valid header, or one whose flags still read as [ImageFlags::New].
async fn write_record<T: NorFlash>(
    flash: &mut FlashRegion<T>,
    bank: u32,
    descriptor: &ImageDescriptor,
) -> Result<(), Error<T::Error>> {
    let record = descriptor.to_bytes();
    let split = MAGIC.len().next_multiple_of(T::WRITE_SIZE).min(RECORD_LEN);

    flash.write_padded::<RECORD_LEN>(bank + split as u32, &record[split..]).await?;
    flash.write_padded::<RECORD_LEN>(bank, &record[..split]).await
}

/// Copy the image staged in the secondary bank into the primary bank.
///
/// Expects `staged` to be the structurally valid, signature verified descriptor of the secondary bank.
/// The primary bank is erased for the size of the incoming image and the payload is copied
/// `BLOCK_SIZE` bytes at a time. Only then the descriptor, with its addresses shifted into the
/// primary bank, is written, so a torn copy leaves the primary bank without a valid header.
///
/// Whether the copy was faithful is left to the caller to verify. Yields the descriptor as written.
pub async fn commit_secondary_into_primary<T: NorFlash, const BLOCK_SIZE: usize>(
    flash: &mut FlashRegion<T>,
    layout: &Layout,
    staged: &ImageDescriptor,
) -> Result<ImageDescriptor, CommitError<T::Error>> {
    defmt_or_log::assert!(BLOCK_SIZE >= T::WRITE_SIZE && BLOCK_SIZE % T::WRITE_SIZE == 0);
    defmt_or_log::assert!(BLOCK_SIZE >= T::READ_SIZE && BLOCK_SIZE % T::READ_SIZE == 0);

    let Some(len) = staged.payload_len() else {
        return Err(CommitError::Malformed);
    };
    let Some(relocated) = staged.relocated(layout.offset()) else {
        return Err(CommitError::Malformed);
    };

    let source = layout.payload(layout.secondary);
    let target = layout.payload(layout.primary);

    if len > layout.max_payload_len() || source as usize + len as usize > flash.capacity() {
        return Err(CommitError::TooLarge);
    }

    defmt_or_log::info!("Committing {} bytes from {:x} to {:x}", len, source, target);

    flash.erase_region(layout.primary, layout.descriptor_size + len).await?;

    let mut buf = [0u8; BLOCK_SIZE];
    let mut copied = 0;
    while copied < len {
        let take = (len - copied).min(BLOCK_SIZE as u32) as usize;
        let read_len = take.next_multiple_of(T::READ_SIZE);

        flash
            .inner()
            .read(source + copied, &mut buf[..read_len])
            .await
            .map_err(Error::Other)?;
        flash.write_padded::<BLOCK_SIZE>(target + copied, &buf[..take]).await?;

        copied += take as u32;
    }

    defmt_or_log::debug!("Commit copied {} bytes", copied);

    write_record(flash, layout.primary, &relocated).await?;
    Ok(relocated)
}
