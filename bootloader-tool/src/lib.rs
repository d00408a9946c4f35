use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use dualboot_image::ImageFlags;

pub use crate::config::Config;

pub mod commands;
mod config;
pub mod processors;
mod util;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "./config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub commands: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Wrap a firmware into a bank image with descriptor, ready to be flashed or sent as update
    Pack(PackArguments),
    /// Print the descriptor of a bank image and check its digest
    Inspect(InspectArguments),
    /// Run the boot decision against a flash dump, as the bootloader would on the device
    Simulate(SimulateArguments),
}

/// Bank a bank image is built for.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bank {
    /// Executable bank, for factory programming
    Primary,
    /// Staging bank, for updates
    Secondary,
}

/// Lifecycle state written into the descriptor of a new bank image.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flags {
    New,
    Valid,
}

impl From<Flags> for ImageFlags {
    fn from(value: Flags) -> Self {
        match value {
            Flags::New => ImageFlags::New,
            Flags::Valid => ImageFlags::Valid,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct PackArguments {
    /// Input file path (ELF, or BIN with --raw)
    #[arg(short, long, value_name = "INPUT_FILE")]
    pub input_path: PathBuf,
    /// Treat the input as a bare binary linked at the payload address of the primary bank
    #[arg(long)]
    pub raw: bool,
    /// Sequence number of the image, must increase with every release
    #[arg(short, long, value_parser = util::parse_u32)]
    pub sequence: u32,
    /// Bank the image will be written to
    #[arg(long, value_enum, default_value_t = Bank::Secondary)]
    pub bank: Bank,
    /// Flags of the descriptor [default: new for the secondary bank, valid for the primary bank]
    #[arg(long, value_enum)]
    pub flags: Option<Flags>,
    /// Output file path (BIN) [default: <INPUT_FILE>.<BANK>.bin]
    #[arg(short, long, value_name = "OUTPUT_FILE")]
    pub output_path: Option<PathBuf>,
}

impl PackArguments {
    pub fn flags_with_default(&self) -> Flags {
        self.flags.unwrap_or(match self.bank {
            Bank::Primary => Flags::Valid,
            Bank::Secondary => Flags::New,
        })
    }

    pub fn output_path_with_default(&self) -> PathBuf {
        self.output_path.clone().unwrap_or_else(|| {
            self.input_path.clone().with_extension(match self.bank {
                Bank::Primary => "primary.bin",
                Bank::Secondary => "secondary.bin",
            })
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct InspectArguments {
    /// Bank image file path (BIN)
    #[arg(short, long, value_name = "INPUT_FILE")]
    pub input_path: PathBuf,
    /// Bank the image was built for
    #[arg(long, value_enum, default_value_t = Bank::Secondary)]
    pub bank: Bank,
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArguments {
    /// Full flash dump to start from [default: erased flash]
    #[arg(long, value_name = "DUMP_FILE")]
    pub dump_path: Option<PathBuf>,
    /// Bank image to place in the primary bank, on top of the dump
    #[arg(long, value_name = "PRIMARY_FILE")]
    pub primary_path: Option<PathBuf>,
    /// Bank image to place in the secondary bank, on top of the dump
    #[arg(long, value_name = "SECONDARY_FILE")]
    pub secondary_path: Option<PathBuf>,
    /// Where to write the flash dump as the bootloader leaves it
    #[arg(short, long, value_name = "OUTPUT_FILE")]
    pub output_path: Option<PathBuf>,
}
