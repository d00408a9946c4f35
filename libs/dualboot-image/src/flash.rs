#[cfg(any(test, feature = "_test"))]
pub mod mock;

use core::ops::Range;

use embedded_storage_async::nor_flash::NorFlash;

use crate::descriptor::InvalidData;

/// Errors from handling flash regions.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// The region does not contain a descriptor for this board.
    InvalidData(InvalidData),

    /// An address or length is not a multiple of the program granularity.
    Misaligned,

    /// The requested range runs past the end of the storage medium.
    OutOfBounds,

    /// The underlying storage medium yielded an error.
    Other(E),
}

impl<E> From<E> for Error<E> {
    fn from(value: E) -> Self {
        Error::Other(value)
    }
}

/// Page-granular erase and byte-range programming on top of a [NorFlash].
///
/// Holds no state besides the storage itself, and never erases implicitly:
/// callers are responsible for erasing before they write.
pub struct FlashRegion<T> {
    inner: T,
}

impl<T: NorFlash> FlashRegion<T> {
    pub const PAGE_SIZE: u32 = T::ERASE_SIZE as u32;

    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Give back the storage medium.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Direct access to the storage medium, for reading.
    pub fn inner(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// The page-aligned range that has to be erased to cover `[address, address + length)`.
    pub fn page_span(address: u32, length: u32) -> Option<Range<u32>> {
        let start = address - address % Self::PAGE_SIZE;
        let end = address.checked_add(length)?;
        Some(start..end.checked_next_multiple_of(Self::PAGE_SIZE)?)
    }

    /// Erase every page that overlaps `[address, address + length)`.
    ///
    /// The erased range is a superset of the requested one whenever the request is not page aligned,
    /// it is returned so that the caller can see how far the erase reached.
    pub async fn erase_region(&mut self, address: u32, length: u32) -> Result<Range<u32>, Error<T::Error>> {
        let Some(span) = Self::page_span(address, length) else {
            return Err(Error::OutOfBounds);
        };

        if span.end as usize > self.inner.capacity() {
            return Err(Error::OutOfBounds);
        }

        defmt_or_log::trace!("Erasing {:x}..{:x}", span.start, span.end);
        self.inner.erase(span.start, span.end).await?;
        Ok(span)
    }

    /// Program `bytes` at `address`, which must be erased already.
    ///
    /// Both `address` and the length of `bytes` must be multiples of [NorFlash::WRITE_SIZE].
    pub async fn write_bytes(&mut self, address: u32, bytes: &[u8]) -> Result<(), Error<T::Error>> {
        if address as usize % T::WRITE_SIZE != 0 || bytes.len() % T::WRITE_SIZE != 0 {
            return Err(Error::Misaligned);
        }

        if address as usize + bytes.len() > self.inner.capacity() {
            return Err(Error::OutOfBounds);
        }

        self.inner.write(address, bytes).await?;
        Ok(())
    }

    /// Program `bytes` at `address`, padding the final program unit with the erased value.
    ///
    /// `BLOCK_SIZE` is the size of the scratch buffer used for the tail, and must be able to hold
    /// a single program unit.
    pub async fn write_padded<const BLOCK_SIZE: usize>(
        &mut self,
        address: u32,
        bytes: &[u8],
    ) -> Result<(), Error<T::Error>> {
        defmt_or_log::assert!(BLOCK_SIZE >= T::WRITE_SIZE);

        let aligned_len = bytes.len() - bytes.len() % T::WRITE_SIZE;
        let (head, tail) = bytes.split_at(aligned_len);

        if !head.is_empty() {
            self.write_bytes(address, head).await?;
        }

        if !tail.is_empty() {
            let mut buf = [u8::MAX; BLOCK_SIZE];
            buf[..tail.len()].copy_from_slice(tail);
            self.write_bytes(address + aligned_len as u32, &buf[..T::WRITE_SIZE])
                .await?;
        }

        Ok(())
    }

    /// Read a little-endian word at `address`.
    pub async fn read_word(&mut self, address: u32) -> Result<u32, Error<T::Error>> {
        let mut buf = [0u8; 4];
        if address as usize + buf.len() > self.inner.capacity() {
            return Err(Error::OutOfBounds);
        }

        self.inner.read(address, &mut buf).await?;
        Ok(u32::from_le_bytes(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::mock::{MockFlashBase, MockFlashError};

    type Mock = MockFlashBase<8, 4, 16>;
    const PAGE: u32 = 64;

    fn programmed() -> Mock {
        let mut mock = Mock::new(None, false);
        mock.as_bytes_mut().fill(0x00);
        mock
    }

    #[test]
    fn page_span_rounds_outwards() {
        assert_eq!(FlashRegion::<Mock>::page_span(0, PAGE), Some(0..PAGE));
        assert_eq!(FlashRegion::<Mock>::page_span(0, PAGE + 1), Some(0..2 * PAGE));
        assert_eq!(FlashRegion::<Mock>::page_span(PAGE - 1, 2), Some(0..2 * PAGE));
        assert_eq!(FlashRegion::<Mock>::page_span(3 * PAGE + 5, 0), Some(3 * PAGE..4 * PAGE));
        assert_eq!(FlashRegion::<Mock>::page_span(3 * PAGE, 0), Some(3 * PAGE..3 * PAGE));
        assert_eq!(FlashRegion::<Mock>::page_span(u32::MAX - 2, 10), None);
    }

    /// Erasing a few bytes in the middle of a page wipes the whole page, and its neighbour when straddling.
    #[test]
    fn erase_is_page_granular() {
        let mut region = FlashRegion::new(programmed());
        embassy_futures::block_on(async {
            let span = region.erase_region(PAGE + 8, PAGE).await.unwrap();
            assert_eq!(span, PAGE..3 * PAGE);
        });

        let mock = region.into_inner();
        let bytes = mock.as_bytes();
        assert!(bytes[..PAGE as usize].iter().all(|b| *b == 0x00));
        assert!(bytes[PAGE as usize..3 * PAGE as usize].iter().all(|b| *b == 0xff));
        assert!(bytes[3 * PAGE as usize..].iter().all(|b| *b == 0x00));
    }

    #[test]
    fn erase_past_end() {
        let mut region = FlashRegion::new(Mock::new(None, false));
        embassy_futures::block_on(async {
            assert!(matches!(
                region.erase_region(7 * PAGE, PAGE + 1).await,
                Err(Error::OutOfBounds)
            ));
        });
    }

    #[test]
    fn write_requires_erased_flash() {
        let mut region = FlashRegion::new(Mock::new(None, false));
        embassy_futures::block_on(async {
            region.write_bytes(0, &[1, 2, 3, 4]).await.unwrap();
            assert!(matches!(
                region.write_bytes(0, &[5, 6, 7, 8]).await,
                Err(Error::Other(MockFlashError::Reprogrammed(0)))
            ));
            assert!(matches!(region.write_bytes(2, &[0; 4]).await, Err(Error::Misaligned)));
            assert!(matches!(region.write_bytes(4, &[0; 3]).await, Err(Error::Misaligned)));

            region.erase_region(0, 4).await.unwrap();
            region.write_bytes(0, &[5, 6, 7, 8]).await.unwrap();
            assert_eq!(region.read_word(0).await.unwrap(), 0x0807_0605);
        });
    }

    #[test]
    fn padded_write() {
        let mut region = FlashRegion::new(Mock::new(None, false));
        embassy_futures::block_on(async {
            region.write_padded::<16>(8, &[1, 2, 3, 4, 5, 6]).await.unwrap();
        });

        let mock = region.into_inner();
        assert_eq!(&mock.as_bytes()[8..16], &[1, 2, 3, 4, 5, 6, 0xff, 0xff]);
    }
}
