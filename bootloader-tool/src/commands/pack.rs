use std::path::PathBuf;

use anyhow::Context;
use dualboot::BootPolicy;
use object::read::elf::ElfFile32;

use crate::PackArguments;
use crate::config::Config;
use crate::processors::image::BankImage;
use crate::processors::objcopy;

pub async fn process(config: &Config, args: PackArguments) -> anyhow::Result<PathBuf> {
    let layout = config.layout();
    let input_data = std::fs::read(&args.input_path)
        .with_context(|| format!("Could not read {}", args.input_path.display()))?;

    let (payload, base_addr) = if args.raw {
        log::info!("Reading BIN from {}", args.input_path.display());
        (input_data, layout.payload(layout.primary))
    } else {
        log::info!("Reading ELF from {}", args.input_path.display());
        let file = ElfFile32::parse(&input_data[..]).context("Could not parse ELF file")?;
        objcopy::objcopy(&file)?
    };

    let flags = args.flags_with_default();
    log::info!(
        "Packing 0x{:x} bytes as sequence {} for the {:?} bank, flagged {:?}",
        payload.len(),
        args.sequence,
        args.bank,
        flags
    );

    let image = BankImage::build(
        &layout,
        config.hardware_id,
        payload,
        base_addr,
        args.bank,
        args.sequence,
        flags.into(),
    )?;
    log::debug!("Descriptor: {:?}", image.descriptor);

    let output_path = args.output_path_with_default();
    std::fs::write(&output_path, image.to_bytes(&layout))
        .with_context(|| format!("Could not write {}", output_path.display()))?;
    log::info!("Written bank image to {}", output_path.display());

    Ok(output_path)
}
