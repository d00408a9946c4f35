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

fuzz_target!(|input: Input<'_>| fuzz(input));

#[derive(Arbitrary, Debug)]
struct Image {
    pub sequence_number: u32,
    pub flags: ImageFlags,
    pub len: u16,
}

#[derive(Arbitrary, Debug)]
struct Input<'a> {
    pub data: &'a [u8],
    /// Descriptors with a correct digest planted over the random data, to reach the commit paths.
    pub primary: Option<Image>,
    pub secondary: Option<Image>,
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

fn plant(flash: &mut Mock, bank: u32, image: &Image) {
    let start = LAYOUT.payload(bank);
    let len = (image.len as u32).min(flash.as_bytes().len() as u32 - start);
    let payload = flash.as_bytes()[start as usize..(start + len) as usize].to_vec();

    let descriptor = ImageDescriptor {
        start_address: start,
        end_address: start + len,
        execution_address: start,
        ..ImageDescriptor::new(HARDWARE_ID, image.sequence_number, image.flags)
    }
    .with_signature(&payload_digest(&payload))
    .unwrap();

    let record = descriptor.to_bytes();
    flash.as_bytes_mut()[bank as usize..bank as usize + record.len()].copy_from_slice(&record);
}

fn decide(flash: &mut Mock) -> Decision {
    let mut verifier = DigestVerifier::<64>;
    futures::executor::block_on(async {
        let mut engine = BootEngine::new(flash, &mut verifier, &Policy).unwrap();
        engine.decide::<64>().await
    })
}

/// Tests for 'any flash content never causes a crash, and a booted image is booted again on the next reset'.
fn fuzz(input: Input<'_>) {
    let mut flash = Mock::new(None, false);

    let len = input.data.len().min(flash.as_bytes().len());
    flash.as_bytes_mut()[..len].copy_from_slice(&input.data[..len]);

    if let Some(image) = &input.primary {
        plant(&mut flash, LAYOUT.primary, image);
    }
    if let Some(image) = &input.secondary {
        plant(&mut flash, LAYOUT.secondary, image);
    }

    let first = decide(&mut flash);
    let second = decide(&mut flash);

    if let Decision::Boot { address, .. } = first {
        assert!(
            matches!(second, Decision::Boot { address: again, .. } if again == address),
            "{first:?} followed by {second:?}"
        );
    }
}
