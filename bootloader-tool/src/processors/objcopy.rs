use object::read::elf::{ElfFile32, ProgramHeader};
use object::{Object, ObjectSegment};

/// Flatten the loadable segments of `file` into a bare binary.
///
/// Yields the binary and the physical address it starts at.
pub fn objcopy(file: &ElfFile32) -> anyhow::Result<(Vec<u8>, u32)> {
    // Sanity checks
    let mut last_paddr = 0;
    let mut segments = vec![];
    for segment in file.segments() {
        let filesz = segment.elf_program_header().p_filesz(file.endianness());
        let memsz = segment.elf_program_header().p_memsz(file.endianness());

        if filesz == 0 {
            // Skip bss to reduce size of image to flash. The bss will be cleared during startup anyway.
            continue;
        }

        if filesz > memsz {
            return Err(anyhow::anyhow!("p_filesz larger than p_memsz"));
        }
        if memsz > filesz {
            return Err(anyhow::anyhow!("Segment only partially a bss segment"));
        }

        let paddr = segment.elf_program_header().p_paddr(file.endianness());
        if paddr < last_paddr {
            return Err(anyhow::anyhow!(
                "Segments not in order of physical address or overlapping segments"
            ));
        }
        last_paddr = paddr + memsz;

        segments.push(segment);
    }

    let (Some(base_addr), Some(top_addr)) = (
        segments
            .iter()
            .map(|segment| segment.elf_program_header().p_paddr(file.endianness()))
            .min(),
        segments
            .iter()
            .map(|segment| {
                segment.elf_program_header().p_paddr(file.endianness())
                    + segment.elf_program_header().p_filesz(file.endianness())
            })
            .max(),
    ) else {
        return Err(anyhow::anyhow!("ELF file contains no loadable segments"));
    };
    let output_size = top_addr - base_addr;

    log::debug!("Image base address: 0x{base_addr:0x}");
    log::debug!("Image entry address: 0x{:0x}", file.entry());
    log::debug!("Image output size: 0x{output_size:0x}");

    // The vector table sits at the base, so the reset handler has to be somewhere behind it.
    if !(base_addr as u64..top_addr as u64).contains(&file.entry()) {
        return Err(anyhow::anyhow!(
            "Image entrypoint 0x{:0x} outside of image 0x{:0x}..0x{:0x}",
            file.entry(),
            base_addr,
            top_addr
        ));
    }

    // Assemble BIN image by copying all segments directly
    let mut image = vec![0xff; output_size as usize];
    for segment in segments {
        let paddr = segment.elf_program_header().p_paddr(file.endianness());
        let data = segment.data()?;

        image[paddr as usize - base_addr as usize..paddr as usize - base_addr as usize + data.len()]
            .copy_from_slice(data);
    }

    Ok((image, base_addr))
}

#[cfg(test)]
mod tests {
    use object::write::elf::{FileHeader, ProgramHeader as WriteProgramHeader, Writer};
    use object::{elf, Endianness};

    use super::*;

    /// Minimal ARM ELF with one loadable segment per entry of `segments`.
    fn elf(entry: u32, segments: &[(u32, &[u8])]) -> Vec<u8> {
        let mut out = vec![];
        let mut writer = Writer::new(Endianness::Little, false, &mut out);

        writer.reserve_file_header();
        writer.reserve_program_headers(segments.len() as u32);
        let offsets: Vec<usize> = segments
            .iter()
            .map(|(_, data)| writer.reserve(data.len(), 4))
            .collect();

        writer
            .write_file_header(&FileHeader {
                os_abi: elf::ELFOSABI_NONE,
                abi_version: 0,
                e_type: elf::ET_EXEC,
                e_machine: elf::EM_ARM,
                e_entry: entry as u64,
                e_flags: 0,
            })
            .unwrap();

        writer.write_align_program_headers();
        for ((paddr, data), offset) in segments.iter().zip(&offsets) {
            writer.write_program_header(&WriteProgramHeader {
                p_type: elf::PT_LOAD,
                p_flags: elf::PF_R,
                p_offset: *offset as u64,
                p_vaddr: *paddr as u64,
                p_paddr: *paddr as u64,
                p_filesz: data.len() as u64,
                p_memsz: data.len() as u64,
                p_align: 4,
            });
        }

        for ((_, data), offset) in segments.iter().zip(&offsets) {
            writer.pad_until(*offset);
            writer.write(data);
        }

        out
    }

    #[test]
    fn flattens_segments_with_gap() {
        let data = elf(0x27005, &[(0x27000, &[1, 2, 3, 4]), (0x27008, &[5, 6])]);
        let file = ElfFile32::parse(&data[..]).unwrap();

        let (image, base_addr) = objcopy(&file).unwrap();
        assert_eq!(base_addr, 0x27000);
        assert_eq!(image, [1, 2, 3, 4, 0xff, 0xff, 0xff, 0xff, 5, 6]);
    }

    #[test]
    fn rejects_entry_outside_image() {
        let data = elf(0x10001, &[(0x27000, &[0; 16])]);
        let file = ElfFile32::parse(&data[..]).unwrap();

        assert!(objcopy(&file).is_err());
    }
}
