use anyhow::Context;
use dualboot_image::descriptor::RECORD_LEN;
use dualboot_image::verify::payload_digest;
use dualboot_image::{ImageDescriptor, ImageFlags, Layout};

use crate::Bank;

/// Contents of a single bank: the descriptor area followed by the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankImage {
    pub descriptor: ImageDescriptor,
    pub payload: Vec<u8>,
}

/// Base address of `bank` in `layout`.
pub fn bank_address(layout: &Layout, bank: Bank) -> u32 {
    match bank {
        Bank::Primary => layout.primary,
        Bank::Secondary => layout.secondary,
    }
}

impl BankImage {
    /// Wrap `payload`, linked to run from `base_addr`, into an image for `bank`.
    ///
    /// Images always run from the primary bank, so `base_addr` has to be the payload address of
    /// the primary bank. For the secondary bank all addresses are shifted up, the bootloader
    /// shifts them back down when committing.
    pub fn build(
        layout: &Layout,
        hardware_id: u32,
        payload: Vec<u8>,
        base_addr: u32,
        bank: Bank,
        sequence_number: u32,
        flags: ImageFlags,
    ) -> anyhow::Result<Self> {
        let expected = layout.payload(layout.primary);
        if base_addr != expected {
            return Err(anyhow::anyhow!(
                "Image will be run from unexpected address 0x{:x}, should be 0x{:x}",
                base_addr,
                expected
            ));
        }

        let len = u32::try_from(payload.len()).context("Image does not fit in 32 bit address space")?;
        if len > layout.max_payload_len() {
            return Err(anyhow::anyhow!(
                "Image of 0x{:x} bytes does not fit in bank of 0x{:x} bytes",
                len,
                layout.max_payload_len()
            ));
        }

        let start = layout.payload(bank_address(layout, bank));
        let descriptor = ImageDescriptor {
            start_address: start,
            end_address: start + len,
            // The vector table is at the start of the payload.
            execution_address: start,
            ..ImageDescriptor::new(hardware_id, sequence_number, flags)
        }
        .with_signature(&payload_digest(&payload))
        .context("Digest does not fit in descriptor")?;

        Ok(Self { descriptor, payload })
    }

    /// Parse a bank image, checking that it was built for `hardware_id` and for `bank`.
    pub fn parse(data: &[u8], layout: &Layout, hardware_id: u32, bank: Bank) -> anyhow::Result<Self> {
        let descriptor = ImageDescriptor::try_from(data).map_err(|e| anyhow::anyhow!("Invalid descriptor: {e:?}"))?;
        descriptor
            .validate(hardware_id)
            .map_err(|e| anyhow::anyhow!("Invalid descriptor: {e:?}"))?;

        let start = layout.payload(bank_address(layout, bank));
        if descriptor.start_address != start {
            return Err(anyhow::anyhow!(
                "Image starts at 0x{:x}, expected 0x{:x} for the {:?} bank",
                descriptor.start_address,
                start,
                bank
            ));
        }

        let len = descriptor
            .payload_len()
            .ok_or_else(|| anyhow::anyhow!("Descriptor ends before it starts"))? as usize;
        let payload = data
            .get(layout.descriptor_size as usize..)
            .and_then(|payload| payload.get(..len))
            .ok_or_else(|| anyhow::anyhow!("Image truncated, expected 0x{:x} payload bytes", len))?
            .to_vec();

        Ok(Self { descriptor, payload })
    }

    /// Serialize as it is to be written at the base of its bank.
    pub fn to_bytes(&self, layout: &Layout) -> Vec<u8> {
        let mut out = vec![0xff; layout.descriptor_size as usize + self.payload.len()];
        out[..RECORD_LEN].copy_from_slice(&self.descriptor.to_bytes());
        out[layout.descriptor_size as usize..].copy_from_slice(&self.payload);
        out
    }

    /// Whether the stored digest matches the payload.
    pub fn digest_matches(&self) -> bool {
        self.descriptor.signature() == Some(&payload_digest(&self.payload)[..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: Layout = Layout::new(0x26000, 0x8f000, 0x1000);
    const HARDWARE_ID: u32 = 0x52840;

    fn build(bank: Bank) -> BankImage {
        BankImage::build(
            &LAYOUT,
            HARDWARE_ID,
            (0..0x1234).map(|i| i as u8).collect(),
            0x27000,
            bank,
            7,
            ImageFlags::New,
        )
        .unwrap()
    }

    #[test]
    fn secondary_image_is_shifted() {
        let image = build(Bank::Secondary);
        assert_eq!(image.descriptor.start_address, 0x90000);
        assert_eq!(image.descriptor.end_address, 0x91234);
        assert_eq!(image.descriptor.execution_address, 0x90000);
        assert_eq!(image.descriptor.relocated(LAYOUT.offset()).unwrap().start_address, 0x27000);
        assert!(image.digest_matches());
    }

    #[test]
    fn parses_what_it_writes() {
        let image = build(Bank::Primary);
        let bytes = image.to_bytes(&LAYOUT);
        assert_eq!(bytes.len(), 0x1000 + 0x1234);
        assert!(bytes[RECORD_LEN..0x1000].iter().all(|b| *b == 0xff));

        assert_eq!(BankImage::parse(&bytes, &LAYOUT, HARDWARE_ID, Bank::Primary).unwrap(), image);
        assert!(BankImage::parse(&bytes, &LAYOUT, HARDWARE_ID, Bank::Secondary).is_err());
        assert!(BankImage::parse(&bytes, &LAYOUT, HARDWARE_ID + 1, Bank::Primary).is_err());
        assert!(BankImage::parse(&bytes[..0x1100], &LAYOUT, HARDWARE_ID, Bank::Primary).is_err());
    }

    #[test]
    fn rejects_wrongly_linked_or_oversized() {
        assert!(BankImage::build(&LAYOUT, HARDWARE_ID, vec![0; 16], 0x26000, Bank::Secondary, 1, ImageFlags::New).is_err());

        let too_large = vec![0; LAYOUT.max_payload_len() as usize + 1];
        assert!(BankImage::build(&LAYOUT, HARDWARE_ID, too_large, 0x27000, Bank::Secondary, 1, ImageFlags::New).is_err());
    }

    #[test]
    fn detects_corruption() {
        let mut image = build(Bank::Secondary);
        image.payload[0x100] ^= 1;
        assert!(!image.digest_matches());
    }
}
