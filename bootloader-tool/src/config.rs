use std::path::Path;

use dualboot::BootPolicy;
use dualboot_image::Layout;
use serde::Deserialize;

#[derive(Deserialize, Debug)]
pub struct Config {
    /// Hardware identifier written into every descriptor, must match the one the bootloader was built with.
    pub hardware_id: u32,

    /// Initial stack pointer of images without descriptor. Only used when simulating.
    #[serde(default = "default_legacy_stack_pointer")]
    pub legacy_stack_pointer: u32,

    /// Also treat a staged image with the same sequence number as a rollback. Only used when simulating.
    #[serde(default)]
    pub reject_equal_sequence: bool,

    /// Placement of the banks in flash.
    pub layout: LayoutArgs,
}

#[derive(Deserialize, Debug)]
pub struct LayoutArgs {
    /// Base address of the executable bank. Applications are linked to run from here.
    pub primary: u32,
    /// Base address of the staging bank, which is also the end of the primary bank.
    pub secondary: u32,
    /// Size of the area at the start of each bank reserved for the descriptor.
    pub descriptor_size: u32,
    /// Erase granularity of the flash.
    pub page_size: u32,
    /// Total size of the flash.
    pub flash_size: u32,
}

fn default_legacy_stack_pointer() -> u32 {
    0x2004_0000
}

impl Config {
    pub fn read(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let config = toml::from_str::<Config>(&std::fs::read_to_string(path)?)?;

        config
            .layout()
            .check(config.layout.page_size, config.layout.flash_size as usize)
            .map_err(|e| anyhow::anyhow!("Layout in configuration file is not usable: {e:?}"))?;

        Ok(config)
    }
}

impl BootPolicy for Config {
    fn hardware_id(&self) -> u32 {
        self.hardware_id
    }

    fn legacy_stack_pointer(&self) -> u32 {
        self.legacy_stack_pointer
    }

    fn reject_equal_sequence(&self) -> bool {
        self.reject_equal_sequence
    }

    fn layout(&self) -> Layout {
        Layout::new(self.layout.primary, self.layout.secondary, self.layout.descriptor_size)
    }
}
