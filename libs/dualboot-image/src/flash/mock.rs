use core::fmt::Display;
use core::ops::Range;
use std::vec::Vec;

use embedded_storage_async::nor_flash::{ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};

/// Programming state of a single flash word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Word {
    /// Erased since the last program, may be programmed once.
    Erased,
    /// Programmed, must be erased before it can be programmed again.
    Programmed,
}

/// In-memory NOR flash with page erase and write-once words.
///
/// Mirrors the contract of the nRF NVMC: bits can only be cleared by programming,
/// a word can be programmed once per erase and erases work on whole pages.
/// An optional byte budget simulates a power loss in the middle of an operation.
#[derive(Debug, Clone)]
pub struct MockFlashBase<const PAGES: usize, const BYTES_PER_WORD: usize, const PAGE_WORDS: usize> {
    words: Vec<Word>,
    data: Vec<u8>,
    /// Number of bytes that can still be erased or programmed before the simulated power loss.
    pub bytes_until_shutoff: Option<u32>,
    /// Reject source buffers that a DMA based controller could not read.
    pub alignment_check: bool,
    /// Number of page erases performed, for asserting on flash wear.
    pub page_erases: usize,
}

impl<const PAGES: usize, const BYTES_PER_WORD: usize, const PAGE_WORDS: usize>
    MockFlashBase<PAGES, BYTES_PER_WORD, PAGE_WORDS>
{
    pub const PAGE_BYTES: usize = PAGE_WORDS * BYTES_PER_WORD;
    const SIZE: usize = PAGES * Self::PAGE_BYTES;

    /// A fully erased part. `bytes_until_shutoff` arms a power loss right away.
    pub fn new(bytes_until_shutoff: Option<u32>, alignment_check: bool) -> Self {
        Self {
            words: vec![Word::Erased; PAGES * PAGE_WORDS],
            data: vec![u8::MAX; Self::SIZE],
            bytes_until_shutoff,
            alignment_check,
            page_erases: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Raw access that bypasses the programming rules, for planting arbitrary content.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Whether every byte in `range` holds the erased value.
    pub fn is_erased(&self, range: Range<usize>) -> bool {
        self.data[range].iter().all(|b| *b == u8::MAX)
    }

    /// Arm a simulated power loss after `bytes` more bytes have been erased or programmed.
    pub fn shutoff_after(&mut self, bytes: u32) {
        self.bytes_until_shutoff = Some(bytes);
    }

    pub fn remove_shutoff(&mut self) {
        self.bytes_until_shutoff = None;
    }

    /// Byte range of an access of `len` bytes at `offset`, which must start on a word.
    fn span(offset: u32, len: usize) -> Result<Range<usize>, MockFlashError> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(MockFlashError::PastEnd)?;

        if end > Self::SIZE {
            return Err(MockFlashError::PastEnd);
        }
        if start % BYTES_PER_WORD != 0 {
            return Err(MockFlashError::Misaligned);
        }
        Ok(start..end)
    }

    /// Spend one byte of the budget on `address`, losing power once it runs dry.
    fn tick(&mut self, address: usize, during: Operation) -> Result<(), MockFlashError> {
        let Some(remaining) = self.bytes_until_shutoff else {
            return Ok(());
        };

        self.bytes_until_shutoff = remaining.checked_sub(1);
        match self.bytes_until_shutoff {
            Some(_) => Ok(()),
            None => Err(MockFlashError::PowerLoss {
                address: address as u32,
                during,
            }),
        }
    }
}

impl<const PAGES: usize, const BYTES_PER_WORD: usize, const PAGE_WORDS: usize> ErrorType
    for MockFlashBase<PAGES, BYTES_PER_WORD, PAGE_WORDS>
{
    type Error = MockFlashError;
}

impl<const PAGES: usize, const BYTES_PER_WORD: usize, const PAGE_WORDS: usize> ReadNorFlash
    for MockFlashBase<PAGES, BYTES_PER_WORD, PAGE_WORDS>
{
    const READ_SIZE: usize = BYTES_PER_WORD;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        assert_eq!(bytes.len() % BYTES_PER_WORD, 0, "reads cover whole words");

        let span = Self::span(offset, bytes.len())?;
        bytes.copy_from_slice(&self.data[span]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        Self::SIZE
    }
}

impl<const PAGES: usize, const BYTES_PER_WORD: usize, const PAGE_WORDS: usize> NorFlash
    for MockFlashBase<PAGES, BYTES_PER_WORD, PAGE_WORDS>
{
    const WRITE_SIZE: usize = BYTES_PER_WORD;

    const ERASE_SIZE: usize = Self::PAGE_BYTES;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert!(from <= to, "erase range runs backwards");
        let pages = Self::span(from, (to - from) as usize)?;

        if pages.start % Self::PAGE_BYTES != 0 || pages.end % Self::PAGE_BYTES != 0 {
            return Err(MockFlashError::Misaligned);
        }

        for page in pages.step_by(Self::PAGE_BYTES) {
            self.page_erases += 1;
            for address in page..page + Self::PAGE_BYTES {
                self.tick(address, Operation::Erase)?;
                self.data[address] = u8::MAX;
                self.words[address / BYTES_PER_WORD] = Word::Erased;
            }
        }

        Ok(())
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let span = Self::span(offset, bytes.len())?;

        if self.alignment_check {
            assert_eq!(bytes.as_ptr() as usize % 4, 0, "source buffer is not word aligned");
        }
        assert_eq!(bytes.len() % BYTES_PER_WORD, 0, "writes cover whole words");

        for (word, source) in span.step_by(BYTES_PER_WORD).zip(bytes.chunks_exact(BYTES_PER_WORD)) {
            let state = &mut self.words[word / BYTES_PER_WORD];
            if *state == Word::Programmed {
                return Err(MockFlashError::Reprogrammed(word as u32));
            }
            *state = Word::Programmed;

            for (address, byte) in (word..).zip(source) {
                self.tick(address, Operation::Program)?;
                self.data[address] &= byte;
            }
        }

        Ok(())
    }
}

/// Failures of the mock, including the simulated power loss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFlashError {
    /// The access runs past the last page.
    PastEnd,
    /// The access does not start on a word, or an erase does not cover whole pages.
    Misaligned,
    /// The word at this address was programmed since its last erase.
    Reprogrammed(u32),
    /// The byte budget ran out at this address.
    PowerLoss { address: u32, during: Operation },
}

impl Display for MockFlashError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MockFlashError::PastEnd => f.write_str("access past the end of flash"),
            MockFlashError::Misaligned => f.write_str("misaligned access"),
            MockFlashError::Reprogrammed(address) => write!(f, "word at {address:#x} programmed twice"),
            MockFlashError::PowerLoss { address, during } => {
                write!(f, "power lost at {address:#x} during {during:?}")
            }
        }
    }
}

impl NorFlashError for MockFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            MockFlashError::PastEnd => NorFlashErrorKind::OutOfBounds,
            MockFlashError::Misaligned => NorFlashErrorKind::NotAligned,
            MockFlashError::Reprogrammed(_) | MockFlashError::PowerLoss { .. } => NorFlashErrorKind::Other,
        }
    }
}

/// What the flash was doing when power was lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Program,
    Erase,
}
