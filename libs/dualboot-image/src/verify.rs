use embedded_storage_async::nor_flash::ReadNorFlash;

use crate::layout::Layout;

/// The payload of a bank could not be authenticated against its descriptor.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VerificationFailed;

/// Authenticity check of the image stored in a bank.
///
/// Implementations must be free of side effects on flash: the bootloader verifies
/// the same bank more than once while deciding what to boot.
#[allow(async_fn_in_trait)]
pub trait SignatureVerifier {
    /// Bring up whatever cryptographic context verification needs.
    fn init(&mut self) {}

    /// Tear down the cryptographic context so nothing leaks into the booted image.
    fn deinit(&mut self) {}

    /// Verify the payload of the bank starting at `bank` against the signature in its descriptor.
    async fn verify<F: ReadNorFlash>(&mut self, flash: &mut F, layout: &Layout, bank: u32)
        -> Result<(), VerificationFailed>;
}

#[cfg(feature = "sha2")]
pub use digest::{payload_digest, DigestVerifier, DIGEST_LEN};

#[cfg(feature = "sha2")]
mod digest {
    use embedded_storage_async::nor_flash::ReadNorFlash;
    use sha2::{Digest, Sha256};

    use super::{SignatureVerifier, VerificationFailed};
    use crate::descriptor::read_descriptor;
    use crate::layout::Layout;

    pub const DIGEST_LEN: usize = 32;

    /// SHA-256 over an image payload, as stored in the descriptor by [DigestVerifier].
    pub fn payload_digest(payload: &[u8]) -> [u8; DIGEST_LEN] {
        Sha256::digest(payload).into()
    }

    /// Verifier whose signature is the SHA-256 digest of the payload.
    ///
    /// Only proves integrity, not authenticity: boards that need the latter plug in
    /// their own [SignatureVerifier] backed by a public key algorithm.
    /// `BLOCK_SIZE` bytes of flash are hashed at a time.
    #[derive(Default)]
    pub struct DigestVerifier<const BLOCK_SIZE: usize>;

    impl<const BLOCK_SIZE: usize> SignatureVerifier for DigestVerifier<BLOCK_SIZE> {
        async fn verify<F: ReadNorFlash>(
            &mut self,
            flash: &mut F,
            layout: &Layout,
            bank: u32,
        ) -> Result<(), VerificationFailed> {
            defmt_or_log::assert!(BLOCK_SIZE >= F::READ_SIZE && BLOCK_SIZE % F::READ_SIZE == 0);

            let descriptor = read_descriptor(flash, bank).await.map_err(|_| VerificationFailed)?;
            let expected = descriptor.signature().ok_or(VerificationFailed)?;
            let len = descriptor.payload_len().ok_or(VerificationFailed)? as usize;

            let start = layout.payload(bank) as usize;
            let Some(end) = start.checked_add(len).filter(|end| *end <= flash.capacity()) else {
                return Err(VerificationFailed);
            };

            let mut hasher = Sha256::new();
            let mut buf = [0u8; BLOCK_SIZE];
            let mut address = start;
            while address < end {
                let take = (end - address).min(BLOCK_SIZE);
                // Reads have to respect the read granularity, the excess is not hashed.
                let read_len = take.next_multiple_of(F::READ_SIZE);
                flash
                    .read(address as u32, &mut buf[..read_len])
                    .await
                    .map_err(|_| VerificationFailed)?;
                hasher.update(&buf[..take]);
                address += take;
            }

            if hasher.finalize().as_slice() == expected {
                Ok(())
            } else {
                Err(VerificationFailed)
            }
        }
    }
}

#[cfg(all(test, feature = "sha2"))]
mod tests {
    use embedded_storage_async::nor_flash::NorFlash;

    use super::*;
    use crate::descriptor::{ImageDescriptor, ImageFlags};
    use crate::flash::mock::MockFlashBase;

    const LAYOUT: Layout = Layout::new(0x100, 0x300, 0x100);

    async fn plant(flash: &mut MockFlashBase<4, 4, 64>, payload: &[u8], signature: &[u8]) {
        let start = LAYOUT.payload(LAYOUT.primary);
        let descriptor = ImageDescriptor {
            start_address: start,
            end_address: start + payload.len() as u32,
            execution_address: start,
            ..ImageDescriptor::new(1, 1, ImageFlags::Valid)
        }
        .with_signature(signature)
        .unwrap();

        flash.write(LAYOUT.primary, &descriptor.to_bytes()).await.unwrap();
        flash.as_bytes_mut()[start as usize..start as usize + payload.len()].copy_from_slice(payload);
    }

    #[test]
    fn digest_matches() {
        let payload: [u8; 150] = core::array::from_fn(|i| i as u8);
        let mut flash = MockFlashBase::<4, 4, 64>::new(None, false);
        embassy_futures::block_on(async {
            plant(&mut flash, &payload, &payload_digest(&payload)).await;
            let mut verifier = DigestVerifier::<32>;
            assert_eq!(verifier.verify(&mut flash, &LAYOUT, LAYOUT.primary).await, Ok(()));
        });
    }

    #[test]
    fn digest_mismatch() {
        let payload: [u8; 150] = core::array::from_fn(|i| i as u8);
        let mut flash = MockFlashBase::<4, 4, 64>::new(None, false);
        embassy_futures::block_on(async {
            let mut digest = payload_digest(&payload);
            digest[0] ^= 0xff;
            plant(&mut flash, &payload, &digest).await;
            let mut verifier = DigestVerifier::<32>;
            assert_eq!(
                verifier.verify(&mut flash, &LAYOUT, LAYOUT.primary).await,
                Err(VerificationFailed)
            );
        });
    }

    #[test]
    fn erased_bank_fails() {
        let mut flash = MockFlashBase::<4, 4, 64>::new(None, false);
        embassy_futures::block_on(async {
            let mut verifier = DigestVerifier::<32>;
            assert_eq!(
                verifier.verify(&mut flash, &LAYOUT, LAYOUT.secondary).await,
                Err(VerificationFailed)
            );
        });
    }
}
