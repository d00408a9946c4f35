use std::vec::Vec;

use dualboot_image::flash::mock::MockFlashBase;
use dualboot_image::verify::payload_digest;
use dualboot_image::{ImageDescriptor, ImageFlags, Layout, SignatureVerifier, VerificationFailed};
use embedded_storage_async::nor_flash::ReadNorFlash;

use crate::BootPolicy;

// 16 pages of 256 bytes, the primary bank spans pages 2..8 and the secondary bank pages 8..16.
pub type Mock = MockFlashBase<16, 4, 64>;
pub const LAYOUT: Layout = Layout::new(0x200, 0x800, 0x100);
pub const HARDWARE_ID: u32 = 0xab;
pub const STACK_POINTER: u32 = 0x2004_0000;

pub struct TestPolicy;

impl BootPolicy for TestPolicy {
    fn hardware_id(&self) -> u32 {
        HARDWARE_ID
    }

    fn legacy_stack_pointer(&self) -> u32 {
        STACK_POINTER
    }

    fn layout(&self) -> Layout {
        LAYOUT
    }
}

/// Also treats a staged image with the same sequence number as a rollback.
pub struct StrictPolicy;

impl BootPolicy for StrictPolicy {
    fn hardware_id(&self) -> u32 {
        HARDWARE_ID
    }

    fn legacy_stack_pointer(&self) -> u32 {
        STACK_POINTER
    }

    fn reject_equal_sequence(&self) -> bool {
        true
    }

    fn layout(&self) -> Layout {
        LAYOUT
    }
}

pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(7) ^ seed).collect()
}

/// Descriptor for `payload` linked into `bank`, signed with its digest.
pub fn image(bank: u32, sequence_number: u32, flags: ImageFlags, payload: &[u8]) -> ImageDescriptor {
    let start = LAYOUT.payload(bank);
    ImageDescriptor {
        start_address: start,
        end_address: start + payload.len() as u32,
        execution_address: start + 0x10,
        ..ImageDescriptor::new(HARDWARE_ID, sequence_number, flags)
    }
    .with_signature(&payload_digest(payload))
    .unwrap()
}

pub fn plant(mock: &mut Mock, bank: u32, descriptor: &ImageDescriptor, payload: &[u8]) {
    let bytes = mock.as_bytes_mut();
    let record = descriptor.to_bytes();
    bytes[bank as usize..bank as usize + record.len()].copy_from_slice(&record);

    let start = LAYOUT.payload(bank) as usize;
    bytes[start..start + payload.len()].copy_from_slice(payload);
}

pub fn plant_word(mock: &mut Mock, address: u32, word: u32) {
    mock.as_bytes_mut()[address as usize..address as usize + 4].copy_from_slice(&word.to_le_bytes());
}

/// Verifier that hands out prepared outcomes in order, failing once they run out.
#[derive(Default)]
pub struct Scripted {
    pub outcomes: Vec<Result<(), VerificationFailed>>,
    pub banks: Vec<u32>,
    pub events: Vec<&'static str>,
}

impl Scripted {
    pub fn new(outcomes: &[Result<(), VerificationFailed>]) -> Self {
        Self {
            outcomes: outcomes.to_vec(),
            ..Default::default()
        }
    }
}

impl SignatureVerifier for Scripted {
    fn init(&mut self) {
        self.events.push("init");
    }

    fn deinit(&mut self) {
        self.events.push("deinit");
    }

    async fn verify<F: ReadNorFlash>(
        &mut self,
        _flash: &mut F,
        _layout: &Layout,
        bank: u32,
    ) -> Result<(), VerificationFailed> {
        self.events.push("verify");
        self.banks.push(bank);
        if self.outcomes.is_empty() {
            Err(VerificationFailed)
        } else {
            self.outcomes.remove(0)
        }
    }
}
