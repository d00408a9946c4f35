use embedded_storage_async::nor_flash::{ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};

/// Flash dump held in memory, behaving as NOR flash with `PAGE_SIZE` byte pages.
///
/// Programming can only clear bits, like on the device.
pub struct RamFlash<const PAGE_SIZE: usize> {
    data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamFlashError {
    OutOfBounds,
    NotAligned,
}

impl NorFlashError for RamFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            RamFlashError::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            RamFlashError::NotAligned => NorFlashErrorKind::NotAligned,
        }
    }
}

impl<const PAGE_SIZE: usize> RamFlash<PAGE_SIZE> {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    fn range(&self, offset: u32, len: usize) -> Result<std::ops::Range<usize>, RamFlashError> {
        let start = offset as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(start..end),
            _ => Err(RamFlashError::OutOfBounds),
        }
    }
}

impl<const PAGE_SIZE: usize> ErrorType for RamFlash<PAGE_SIZE> {
    type Error = RamFlashError;
}

impl<const PAGE_SIZE: usize> ReadNorFlash for RamFlash<PAGE_SIZE> {
    const READ_SIZE: usize = 1;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let range = self.range(offset, bytes.len())?;
        bytes.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl<const PAGE_SIZE: usize> NorFlash for RamFlash<PAGE_SIZE> {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = PAGE_SIZE;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from as usize % PAGE_SIZE != 0 || to as usize % PAGE_SIZE != 0 || from > to {
            return Err(RamFlashError::NotAligned);
        }

        let range = self.range(from, (to - from) as usize)?;
        self.data[range].fill(0xff);
        Ok(())
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if offset as usize % Self::WRITE_SIZE != 0 || bytes.len() % Self::WRITE_SIZE != 0 {
            return Err(RamFlashError::NotAligned);
        }

        let range = self.range(offset, bytes.len())?;
        for (cell, byte) in self.data[range].iter_mut().zip(bytes) {
            *cell &= byte;
        }
        Ok(())
    }
}
