//! Entry-point discovery: a small PE image-header reader (spec §4.3
//! "Entry-point discovery", §9 design note).
//!
//! Walks DOS header → NT header → (32/64-bit) optional header → COM
//! descriptor RVA → section lookup → COM header → `EntryPointToken`,
//! validating magic numbers before trusting any offset. Only PE is
//! implemented, matching the original's symmetric treatment of 32/64-bit
//! PE images and its silence on non-PE targets (spec §9 Open Question):
//! the original does not special-case the native-entrypoint flag
//! differently from "no entry point" — this reader preserves that and
//! simply reports `None` for both.

/// Outcome of parsing a module image for its managed entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint {
    pub method_token: u32,
}

const IMAGE_DOS_SIGNATURE: u16 = 0x5A4D; // "MZ"
const IMAGE_NT_SIGNATURE: u32 = 0x0000_4550; // "PE\0\0"
const IMAGE_FILE_MACHINE_I386: u16 = 0x014c;
const PE32_MAGIC: u16 = 0x10b;
const PE32PLUS_MAGIC: u16 = 0x20b;
/// Index of the COM descriptor (CLR header) data directory entry.
const COM_DESCRIPTOR_DIRECTORY: usize = 14;
/// `COR20HEADER::EntryPointToken` is a managed method token when this flag
/// is clear; when set, `EntryPointToken` is instead a native function
/// pointer/RVA. The original does not special-case this distinctly from a
/// missing entry point (spec §9) — this reader follows suit and reports
/// `None` either way.
const COMIMAGE_FLAGS_NATIVE_ENTRYPOINT: u32 = 0x0000_0010;

fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    bytes.get(offset..offset + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

struct Section {
    virtual_address: u32,
    virtual_size: u32,
    raw_offset: u32,
}

/// Translate an RVA to a file offset using the section table, the way the
/// original resolves the COM descriptor RVA into file bytes.
fn rva_to_offset(sections: &[Section], rva: u32) -> Option<usize> {
    sections
        .iter()
        .find(|s| rva >= s.virtual_address && rva < s.virtual_address + s.virtual_size.max(1))
        .map(|s| (rva - s.virtual_address + s.raw_offset) as usize)
}

/// Parse a module's on-disk image and, if it names a managed entry point,
/// return its method token. Returns `None` for non-PE bytes, images
/// lacking a CLR header, or a native entry point — all three are
/// `ResolveFailed` to the breakpoint manager's caller, never a hard error
/// (spec §7 "Resolution failures are silent").
pub fn parse_entry_point(image: &[u8]) -> Option<EntryPoint> {
    if read_u16(image, 0)? != IMAGE_DOS_SIGNATURE {
        return None;
    }
    let nt_header_offset = read_u32(image, 0x3c)? as usize;
    if read_u32(image, nt_header_offset)? != IMAGE_NT_SIGNATURE {
        return None;
    }

    let file_header_offset = nt_header_offset + 4;
    let machine = read_u16(image, file_header_offset)?;
    let number_of_sections = read_u16(image, file_header_offset + 2)? as usize;
    let size_of_optional_header = read_u16(image, file_header_offset + 16)? as usize;
    let _ = machine == IMAGE_FILE_MACHINE_I386; // 32/64-bit handled symmetrically below

    let optional_header_offset = file_header_offset + 20;
    let magic = read_u16(image, optional_header_offset)?;
    let (data_directory_offset, is_pe32_plus) = match magic {
        PE32_MAGIC => (optional_header_offset + 96, false),
        PE32PLUS_MAGIC => (optional_header_offset + 112, true),
        _ => return None,
    };
    let _ = is_pe32_plus; // both widths use the same data-directory layout from here

    let com_descriptor_entry = data_directory_offset + COM_DESCRIPTOR_DIRECTORY * 8;
    let com_descriptor_rva = read_u32(image, com_descriptor_entry)?;
    if com_descriptor_rva == 0 {
        return None;
    }

    let section_table_offset = optional_header_offset + size_of_optional_header;
    let mut sections = Vec::with_capacity(number_of_sections);
    for i in 0..number_of_sections {
        let base = section_table_offset + i * 40;
        let virtual_size = read_u32(image, base + 8)?;
        let virtual_address = read_u32(image, base + 12)?;
        let raw_offset = read_u32(image, base + 20)?;
        sections.push(Section {
            virtual_address,
            virtual_size,
            raw_offset,
        });
    }

    let com_header_offset = rva_to_offset(&sections, com_descriptor_rva)?;
    let flags = read_u32(image, com_header_offset + 16)?;
    let entry_point_token = read_u32(image, com_header_offset + 20)?;

    if flags & COMIMAGE_FLAGS_NATIVE_ENTRYPOINT != 0 {
        return None;
    }
    Some(EntryPoint {
        method_token: entry_point_token,
    })
}
