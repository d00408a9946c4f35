pub mod flash;
pub mod image;
pub mod objcopy;
