use std::path::Path;

use anyhow::Context;
use dualboot::{BootEngine, BootPolicy, Decision};
use dualboot_image::verify::DigestVerifier;

use crate::SimulateArguments;
use crate::config::Config;
use crate::processors::flash::RamFlash;

/// Bytes hashed and copied at a time, as the bootloader on the device would.
const BLOCK_SIZE: usize = 256;

pub async fn process(config: &Config, args: SimulateArguments) -> anyhow::Result<Decision> {
    let layout = config.layout();
    let flash_size = config.layout.flash_size as usize;

    let mut data = match &args.dump_path {
        Some(path) => read(path)?,
        None => vec![0xff; flash_size],
    };
    if data.len() > flash_size {
        return Err(anyhow::anyhow!(
            "Flash dump of 0x{:x} bytes larger than flash of 0x{:x} bytes",
            data.len(),
            flash_size
        ));
    }
    data.resize(flash_size, 0xff);

    for (path, bank) in [
        (&args.primary_path, layout.primary),
        (&args.secondary_path, layout.secondary),
    ] {
        if let Some(path) = path {
            let image = read(path)?;
            let region = data
                .get_mut(bank as usize..bank as usize + image.len())
                .ok_or_else(|| anyhow::anyhow!("{} does not fit in flash at 0x{:x}", path.display(), bank))?;
            region.copy_from_slice(&image);
            log::info!("Placed {} at 0x{:x}", path.display(), bank);
        }
    }

    let (decision, data) = match config.layout.page_size {
        0x400 => decide::<0x400>(config, data).await?,
        0x800 => decide::<0x800>(config, data).await?,
        0x1000 => decide::<0x1000>(config, data).await?,
        0x2000 => decide::<0x2000>(config, data).await?,
        other => return Err(anyhow::anyhow!("Unsupported page size 0x{:x}", other)),
    };
    log::info!("Bootloader decided {:?}", decision);

    if let Some(output_path) = &args.output_path {
        std::fs::write(output_path, &data).with_context(|| format!("Could not write {}", output_path.display()))?;
        log::info!("Written resulting flash dump to {}", output_path.display());
    }

    Ok(decision)
}

fn read(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Could not read {}", path.display()))
}

async fn decide<const PAGE_SIZE: usize>(config: &Config, data: Vec<u8>) -> anyhow::Result<(Decision, Vec<u8>)> {
    let mut flash = RamFlash::<PAGE_SIZE>::new(data);
    let mut verifier = DigestVerifier::<BLOCK_SIZE>;

    let decision = {
        let mut engine = BootEngine::new(&mut flash, &mut verifier, config)
            .map_err(|e| anyhow::anyhow!("Layout does not match flash: {e:?}"))?;
        engine.decide::<BLOCK_SIZE>().await
    };

    Ok((decision, flash.into_inner()))
}
