/// Disable and clear every configurable interrupt, and reset its priority.
pub fn quiesce_nvic() {
    // SAFETY: only the write-only clear registers and the priorities are touched,
    // nothing else in the bootloader relies on the NVIC state.
    let nvic = unsafe { &*cortex_m::peripheral::NVIC::PTR };

    for clear_enable in &nvic.icer {
        // SAFETY: see above.
        unsafe { clear_enable.write(u32::MAX) };
    }

    for clear_pending in &nvic.icpr {
        // SAFETY: see above.
        unsafe { clear_pending.write(u32::MAX) };
    }

    for priority in &nvic.ipr {
        // SAFETY: see above.
        unsafe { priority.write(0) };
    }
}

/// Boot the application whose vector table starts at `address`.
///
/// # SAFETY
/// `address` must hold a valid vector table of an image for this chip,
/// and the image must not return control to the caller.
pub unsafe fn boot_application(address: u32) -> ! {
    cortex_m::interrupt::disable();
    quiesce_nvic();

    #[cfg(feature = "softdevice")]
    unsafe { softdevice::forward_to(address) };
    #[cfg(not(feature = "softdevice"))]
    unsafe { relocate_vector_table(address) };

    // Re-enable interrupts globally to match the reset environment.
    unsafe { cortex_m::interrupt::enable() };

    cortex_m::asm::dmb();
    cortex_m::asm::dsb();
    cortex_m::asm::isb();

    // Stack pointer and reset vector always come from the image itself.
    unsafe { cortex_m::asm::bootload(address as *const u32) }
}

/// Point VTOR at the application.
#[cfg(not(feature = "softdevice"))]
unsafe fn relocate_vector_table(address: u32) {
    defmt_or_log::info!("Overwriting vector table and jumping to boot address");

    let mut p = unsafe { cortex_m::Peripherals::steal() };
    unsafe { p.SCB.vtor.write(address) };
}

#[cfg(feature = "softdevice")]
mod softdevice {
    use defmt_or_log::{info, warn};
    use nrf_softdevice_mbr as mbr;

    /// Start of the SoftDevice, directly behind the MBR.
    const SOFTDEVICE_BASE: u32 = 0x1000;

    const NRF_SUCCESS: u32 = 0;

    /// Make the MBR forward interrupts to the SoftDevice, and the SoftDevice to the application.
    ///
    /// VTOR stays with the MBR, which owns the interrupt table at address zero.
    pub unsafe fn forward_to(address: u32) {
        info!("Forwarding vector table through the SoftDevice to {:x}", address);

        let mut cmd = mbr::sd_mbr_command_t {
            command: mbr::NRF_MBR_COMMANDS_SD_MBR_COMMAND_VECTOR_TABLE_BASE_SET,
            params: mbr::sd_mbr_command_t__bindgen_ty_1 {
                base_set: mbr::sd_mbr_command_vector_table_base_set_t { address },
            },
        };
        let ret = unsafe { mbr::sd_mbr_command(&mut cmd) };
        if ret != NRF_SUCCESS {
            warn!("Setting vector table base failed: {}", ret);
        }

        let mut cmd = mbr::sd_mbr_command_t {
            command: mbr::NRF_MBR_COMMANDS_SD_MBR_COMMAND_IRQ_FORWARD_ADDRESS_SET,
            params: mbr::sd_mbr_command_t__bindgen_ty_1 {
                irq_forward_address_set: mbr::sd_mbr_command_irq_forward_address_set_t {
                    address: SOFTDEVICE_BASE,
                },
            },
        };
        let ret = unsafe { mbr::sd_mbr_command(&mut cmd) };
        if ret != NRF_SUCCESS {
            warn!("Setting interrupt forward address failed: {}", ret);
        }
    }
}
