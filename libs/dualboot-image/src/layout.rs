use crate::descriptor::RECORD_LEN;

/// Placement of the two banks in flash.
///
/// Each bank starts with a reserved descriptor area of `descriptor_size` bytes,
/// holding the [crate::ImageDescriptor] record, followed by the image payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Layout {
    /// Base address of the executable bank.
    pub primary: u32,
    /// Base address of the staging bank.
    pub secondary: u32,
    /// Size of the area reserved for the descriptor at the start of each bank.
    pub descriptor_size: u32,
}

#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LayoutError {
    /// The staging bank must live above the primary bank.
    BankOrder,
    /// Bank bases and the descriptor area must consist of whole pages.
    NotPageAligned,
    /// The descriptor area cannot hold a descriptor record.
    DescriptorTooSmall,
    /// The primary bank has no room for a payload behind its descriptor area.
    BankTooSmall,
    /// The staging bank starts outside of the flash.
    OutOfBounds,
}

impl Layout {
    pub const fn new(primary: u32, secondary: u32, descriptor_size: u32) -> Self {
        Self {
            primary,
            secondary,
            descriptor_size,
        }
    }

    /// Check that this layout can be safely erased and programmed on a flash
    /// with the given page size and capacity.
    pub fn check(&self, page_size: u32, capacity: usize) -> Result<(), LayoutError> {
        if self.primary >= self.secondary {
            return Err(LayoutError::BankOrder);
        }

        if [self.primary, self.secondary, self.descriptor_size]
            .iter()
            .any(|value| value % page_size != 0)
        {
            return Err(LayoutError::NotPageAligned);
        }

        if (self.descriptor_size as usize) < RECORD_LEN {
            return Err(LayoutError::DescriptorTooSmall);
        }

        if self.offset() <= self.descriptor_size {
            return Err(LayoutError::BankTooSmall);
        }

        if self.secondary as usize + self.descriptor_size as usize > capacity {
            return Err(LayoutError::OutOfBounds);
        }

        Ok(())
    }

    /// Distance between the two banks, which is also the size of the primary bank.
    pub const fn offset(&self) -> u32 {
        self.secondary - self.primary
    }

    /// Address of the first payload byte of the bank at `bank`.
    pub const fn payload(&self, bank: u32) -> u32 {
        bank + self.descriptor_size
    }

    /// Largest payload that fits the primary bank behind its descriptor area.
    pub const fn max_payload_len(&self) -> u32 {
        self.offset().saturating_sub(self.descriptor_size)
    }
}
