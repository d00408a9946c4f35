#![no_main]

extern crate libfuzzer_sys;
extern crate std;

use arbitrary::Arbitrary;
use dualboot::{BootEngine, BootPolicy, Decision};
use dualboot_image::{
    flash::mock::MockFlashBase,
    verify::{payload_digest, DigestVerifier},
    ImageDescriptor, ImageFlags, Layout,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: Input| fuzz(input));

#[derive(Arbitrary, Debug)]
struct Input {
    pub primary_sequence: u32,
    pub staged_sequence: u32,
    pub staged_flags: ImageFlags,
    pub primary_len: u16,
    pub staged_len: u16,

    /// Byte number to fail at when doing flash operations.
    pub fail_at: u16,
}

type Mock = MockFlashBase<16, 4, 64>;
const LAYOUT: Layout = Layout::new(0x200, 0x800, 0x100);

const HARDWARE_ID: u32 = 0xab;

struct Policy;

impl BootPolicy for Policy {
    fn hardware_id(&self) -> u32 {
        HARDWARE_ID
    }

    fn legacy_stack_pointer(&self) -> u32 {
        0x2004_0000
    }

    fn layout(&self) -> Layout {
        LAYOUT
    }
}

fn plant(flash: &mut Mock, bank: u32, sequence_number: u32, flags: ImageFlags, payload: &[u8], entry: u32) {
    let start = LAYOUT.payload(bank);
    let descriptor = ImageDescriptor {
        start_address: start,
        end_address: start + payload.len() as u32,
        execution_address: start + entry,
        ..ImageDescriptor::new(HARDWARE_ID, sequence_number, flags)
    }
    .with_signature(&payload_digest(payload))
    .unwrap();

    let record = descriptor.to_bytes();
    flash.as_bytes_mut()[bank as usize..bank as usize + record.len()].copy_from_slice(&record);
    flash.as_bytes_mut()[start as usize..start as usize + payload.len()].copy_from_slice(payload);
}

fn decide(flash: &mut Mock) -> Decision {
    let mut verifier = DigestVerifier::<64>;
    futures::executor::block_on(async {
        let mut engine = BootEngine::new(flash, &mut verifier, &Policy).unwrap();
        engine.decide::<64>().await
    })
}

/// Tests for 'a power loss at any point of an update still boots into exactly the expected image on the next attempt'.
fn fuzz(input: Input) {
    let max = LAYOUT.max_payload_len() as usize;
    let primary: Vec<u8> = (0..input.primary_len as usize % max).map(|i| i as u8).collect();
    let staged: Vec<u8> = (0..input.staged_len as usize % max).map(|i| !(i as u8)).collect();

    let mut flash = Mock::new(None, false);
    plant(&mut flash, LAYOUT.primary, input.primary_sequence, ImageFlags::Valid, &primary, 0x10);
    plant(&mut flash, LAYOUT.secondary, input.staged_sequence, input.staged_flags, &staged, 0x20);
    flash.shutoff_after(input.fail_at as u32);

    let committable = input.primary_sequence <= input.staged_sequence
        && matches!(input.staged_flags, ImageFlags::New | ImageFlags::Valid);
    let (entry, expected) = if committable {
        (0x20, &staged)
    } else {
        (0x10, &primary)
    };

    let mut decision = decide(&mut flash);
    if decision == Decision::Reset(dualboot::BootError::Flash) {
        flash.remove_shutoff();
        decision = decide(&mut flash);
    }

    let start = LAYOUT.payload(LAYOUT.primary);
    match decision {
        Decision::Boot { address, .. } => assert_eq!(address, start + entry),
        other => panic!("Expected to boot, got {:?}", other),
    }
    assert_eq!(
        &flash.as_bytes()[start as usize..start as usize + expected.len()],
        &expected[..]
    );
}
