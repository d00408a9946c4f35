//! Image descriptors, bank layout and flash mutation for the dual-bank bootloader.
//!
//! Everything in this crate talks to storage through [embedded_storage_async::nor_flash],
//! so it runs equally against the real flash controller and the in-memory mock used by the tests.
#![cfg_attr(not(feature = "_test"), no_std)]

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod commit;
pub mod descriptor;
pub mod flash;
pub mod layout;
pub mod verify;

pub use descriptor::{ImageDescriptor, ImageFlags, InvalidData};
pub use layout::Layout;
pub use verify::{SignatureVerifier, VerificationFailed};
