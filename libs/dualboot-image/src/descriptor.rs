use num_enum::{IntoPrimitive, TryFromPrimitive};

use embedded_storage_async::nor_flash::ReadNorFlash;

use crate::flash::Error;

/// Byte sequence every descriptor starts with.
pub const MAGIC: [u8; 7] = *b"@AFRTOS";

/// Size of the encoded [ImageDescriptor] record.
pub const RECORD_LEN: usize = 128;

/// Room reserved in the record for the image signature.
pub const MAX_SIGNATURE_LEN: usize = RECORD_LEN - SIGNATURE_OFFSET;

const FLAGS_OFFSET: usize = 7;
const SEQUENCE_OFFSET: usize = 8;
const START_OFFSET: usize = 12;
const END_OFFSET: usize = 16;
const EXECUTION_OFFSET: usize = 20;
const HARDWARE_ID_OFFSET: usize = 24;
const RESERVED_OFFSET: usize = 28;
const SIGNATURE_LEN_OFFSET: usize = 32;
const SIGNATURE_OFFSET: usize = 36;

/// Lifecycle state of an image as stored in the descriptor.
///
/// The values are chosen such that every transition only clears bits,
/// starting from the erased value of a NOR flash cell.
#[derive(Debug, PartialEq, Eq, Clone, Copy, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "_test", derive(arbitrary::Arbitrary))]
#[repr(u8)]
pub enum ImageFlags {
    /// Freshly staged, not yet authenticated.
    New = 0xff,
    /// Committed into the primary bank, outcome not yet confirmed by the application.
    CommitPending = 0xfe,
    /// Previously authenticated and eligible to commit or boot.
    Valid = 0xfc,
    /// Failed authentication, only eligible for erasure.
    Invalid = 0xf8,
}

/// Reason why a region does not hold a usable descriptor.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InvalidData {
    /// Fewer than [RECORD_LEN] bytes were available.
    Truncated,
    /// Magic bytes did not match, typically erased or garbage flash.
    Magic,
    /// Descriptor was built for a different board.
    HardwareId(u32),
}

/// Fixed-layout metadata record stored at the start of a bank.
///
/// Decoding never fails for a complete buffer: [ImageDescriptor::validate] decides whether
/// the record is trustworthy enough to look any further.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub magic: [u8; 7],
    /// Raw flag byte, see [ImageDescriptor::flags].
    pub flags: u8,
    pub sequence_number: u32,
    pub start_address: u32,
    pub end_address: u32,
    pub execution_address: u32,
    pub hardware_id: u32,
    pub reserved: u32,
    pub signature_len: u32,
    pub signature: [u8; MAX_SIGNATURE_LEN],
}

impl ImageDescriptor {
    /// Construct a descriptor carrying the magic bytes and no signature.
    pub fn new(hardware_id: u32, sequence_number: u32, flags: ImageFlags) -> Self {
        Self {
            magic: MAGIC,
            flags: flags.into(),
            sequence_number,
            start_address: 0,
            end_address: 0,
            execution_address: 0,
            hardware_id,
            reserved: u32::MAX,
            signature_len: 0,
            signature: [u8::MAX; MAX_SIGNATURE_LEN],
        }
    }

    pub fn from_bytes(data: &[u8; RECORD_LEN]) -> Self {
        let word = |offset: usize| u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]]);

        let mut magic = [0u8; 7];
        magic.copy_from_slice(&data[..FLAGS_OFFSET]);
        let mut signature = [0u8; MAX_SIGNATURE_LEN];
        signature.copy_from_slice(&data[SIGNATURE_OFFSET..]);

        Self {
            magic,
            flags: data[FLAGS_OFFSET],
            sequence_number: word(SEQUENCE_OFFSET),
            start_address: word(START_OFFSET),
            end_address: word(END_OFFSET),
            execution_address: word(EXECUTION_OFFSET),
            hardware_id: word(HARDWARE_ID_OFFSET),
            reserved: word(RESERVED_OFFSET),
            signature_len: word(SIGNATURE_LEN_OFFSET),
            signature,
        }
    }

    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut data = [0u8; RECORD_LEN];
        data[..FLAGS_OFFSET].copy_from_slice(&self.magic);
        data[FLAGS_OFFSET] = self.flags;

        for (offset, value) in [
            (SEQUENCE_OFFSET, self.sequence_number),
            (START_OFFSET, self.start_address),
            (END_OFFSET, self.end_address),
            (EXECUTION_OFFSET, self.execution_address),
            (HARDWARE_ID_OFFSET, self.hardware_id),
            (RESERVED_OFFSET, self.reserved),
            (SIGNATURE_LEN_OFFSET, self.signature_len),
        ] {
            data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }

        data[SIGNATURE_OFFSET..].copy_from_slice(&self.signature);
        data
    }

    /// Check the structural and identity fields. The signature is not looked at.
    pub fn validate(&self, hardware_id: u32) -> Result<(), InvalidData> {
        if self.magic != MAGIC {
            return Err(InvalidData::Magic);
        }

        if self.hardware_id != hardware_id {
            return Err(InvalidData::HardwareId(self.hardware_id));
        }

        Ok(())
    }

    /// Lifecycle state, or the raw byte if it is not one of the known values.
    pub fn flags(&self) -> Result<ImageFlags, u8> {
        ImageFlags::try_from(self.flags).map_err(|_| self.flags)
    }

    pub fn with_flags(&self, flags: ImageFlags) -> Self {
        Self {
            flags: flags.into(),
            ..self.clone()
        }
    }

    /// Length of the payload in bytes, if the address range is well formed.
    pub fn payload_len(&self) -> Option<u32> {
        self.end_address.checked_sub(self.start_address)
    }

    /// Shift all address fields down by `offset`, as when moving the image to a lower bank.
    ///
    /// Yields `None` if any address would underflow.
    pub fn relocated(&self, offset: u32) -> Option<Self> {
        Some(Self {
            start_address: self.start_address.checked_sub(offset)?,
            end_address: self.end_address.checked_sub(offset)?,
            execution_address: self.execution_address.checked_sub(offset)?,
            ..self.clone()
        })
    }

    /// The signature bytes, unless the stored length is out of range.
    pub fn signature(&self) -> Option<&[u8]> {
        self.signature.get(..self.signature_len as usize)
    }

    /// Store `signature` in the record.
    ///
    /// Yields `None` if it does not fit in [MAX_SIGNATURE_LEN] bytes.
    pub fn with_signature(&self, signature: &[u8]) -> Option<Self> {
        let mut result = self.clone();
        result.signature.get_mut(..signature.len())?.copy_from_slice(signature);
        result.signature[signature.len()..].fill(u8::MAX);
        result.signature_len = signature.len() as u32;
        Some(result)
    }
}

impl TryFrom<&[u8]> for ImageDescriptor {
    type Error = InvalidData;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        let record: &[u8; RECORD_LEN] = data
            .get(..RECORD_LEN)
            .and_then(|record| record.try_into().ok())
            .ok_or(InvalidData::Truncated)?;
        Ok(Self::from_bytes(record))
    }
}

impl core::fmt::Debug for ImageDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ImageDescriptor")
            .field("flags", &self.flags())
            .field("sequence_number", &self.sequence_number)
            .field("start_address", &format_args!("{:#x}", self.start_address))
            .field("end_address", &format_args!("{:#x}", self.end_address))
            .field("execution_address", &format_args!("{:#x}", self.execution_address))
            .field("hardware_id", &format_args!("{:#x}", self.hardware_id))
            .field("signature_len", &self.signature_len)
            .finish()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ImageDescriptor {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f,
            "ImageDescriptor {{ flags: {=u8:#x}, sequence_number: {}, start: {=u32:#x}, end: {=u32:#x}, execution: {=u32:#x}, hardware_id: {=u32:#x} }}",
            self.flags,
            self.sequence_number,
            self.start_address,
            self.end_address,
            self.execution_address,
            self.hardware_id
        )
    }
}

/// Read the record at `address` without judging its contents.
pub async fn read_descriptor<F: ReadNorFlash>(flash: &mut F, address: u32) -> Result<ImageDescriptor, F::Error> {
    let mut buf = [0u8; RECORD_LEN];
    flash.read(address, &mut buf).await?;
    Ok(ImageDescriptor::from_bytes(&buf))
}

/// Read the descriptor of the bank at `address` and check that it belongs to this board.
///
/// Erased, torn or garbage regions all end up as [Error::InvalidData]. Never mutates flash.
pub async fn validate_header<F: ReadNorFlash>(
    flash: &mut F,
    address: u32,
    hardware_id: u32,
) -> Result<ImageDescriptor, Error<F::Error>> {
    let descriptor = read_descriptor(flash, address).await?;
    descriptor.validate(hardware_id).map_err(Error::InvalidData)?;
    Ok(descriptor)
}
