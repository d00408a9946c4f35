use anyhow::Context;
use dualboot::BootPolicy;

use crate::InspectArguments;
use crate::config::Config;
use crate::processors::image::BankImage;
use crate::util::generate_hex;

pub async fn process(config: &Config, args: InspectArguments) -> anyhow::Result<BankImage> {
    let data = std::fs::read(&args.input_path)
        .with_context(|| format!("Could not read {}", args.input_path.display()))?;

    let image = BankImage::parse(&data, &config.layout(), config.hardware_id, args.bank)
        .with_context(|| format!("{} is not a bank image for this board", args.input_path.display()))?;

    let descriptor = &image.descriptor;
    match descriptor.flags() {
        Ok(flags) => println!("flags:             {flags:?}"),
        Err(raw) => println!("flags:             unknown (0x{raw:02x})"),
    }
    println!("sequence number:   {}", descriptor.sequence_number);
    println!("start address:     0x{:08x}", descriptor.start_address);
    println!("end address:       0x{:08x}", descriptor.end_address);
    println!("execution address: 0x{:08x}", descriptor.execution_address);
    println!("hardware id:       0x{:08x}", descriptor.hardware_id);
    println!(
        "signature:         {}",
        descriptor.signature().map(generate_hex).unwrap_or_else(|| "out of range".into())
    );

    if !image.digest_matches() {
        return Err(anyhow::anyhow!("Digest does not match payload"));
    }
    println!("digest:            ok");

    Ok(image)
}
