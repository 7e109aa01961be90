//! An owned, mutable ELF32 big-endian model.
//!
//! Unlike a borrowed reader over a byte slice, an [`Elf`] owns every section's bytes and can be
//! popped, appended to, and re-serialized repeatedly, which is what splicing a linked object into
//! a base RPX image requires. Layout offsets for the header, section header table, and relocation
//! entries follow the regular ELF32 specification; the two RPX-specific section types
//! ([`SHT_RPL_CRCS`] and [`SHT_RPL_FILEINFO`]) are preserved as ordinary sections with their raw
//! bytes kept verbatim unless explicitly rewritten.

use std::io::Write;

use num_traits::FromPrimitive;
use thiserror::Error;

use crate::consts::{
    Endianness, SectionKind, RPL_FILEINFO_MAGIC, SHT_RPL_CRCS, SHT_RPL_FILEINFO,
    ELF32_HEADER_SIZE, ELF32_PROGRAM_HEADER_SIZE, ELF32_RELA_ENTRY_SIZE,
    ELF32_SECTION_HEADER_SIZE, ELF_MAGIC,
};

/// An error that can occur while parsing an ELF32 file.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ElfError {
    /// The file did not start with the ELF magic, or declared a class/data/version this crate
    /// does not support (only 32-bit big-endian, version 1 is supported).
    #[error("not a recognized 32-bit big-endian ELF file")]
    InvalidHeader,
    /// A field in the ELF file had a value that made the file impossible to parse further, such
    /// as a section header entry size that didn't match the expected 40 bytes.
    #[error("invalid value in field {0}")]
    InvalidValue(&'static str),
    /// The data ended before a structure that should have been present was fully read.
    #[error("unexpected end of file")]
    UnexpectedEof,
    /// A section expected to exist in the base RPX (by name or by RPX-specific type) was missing.
    #[error("missing required section: {0}")]
    MissingSection(&'static str),
}

/// A parsed relocation-with-addend entry (`Elf32_Rela`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rela {
    /// Offset of the location to be relocated, relative to the owning section's start.
    pub offset: u32,
    /// `(symbol index << 8) | relocation type`, per the ELF specification.
    pub info: u32,
    /// Constant addend used to compute the relocated value.
    pub addend: i32,
}

impl Rela {
    /// The symbol table index this relocation refers to.
    pub fn sym(&self) -> u32 {
        self.info >> 8
    }

    /// The processor-specific relocation type.
    pub fn kind(&self) -> u8 {
        (self.info & 0xFF) as u8
    }
}

/// An owned ELF section: header fields plus the raw bytes (empty for `SHT_NOBITS`).
#[derive(Debug, Clone)]
pub struct Section {
    /// Section name, used only while splicing/printing; persisted as an index into the string
    /// table on write. An empty name writes index `0`, matching the sentinel-name convention the
    /// console splice path uses for appended sections.
    pub name: String,
    /// `sh_type`.
    pub kind: u32,
    /// `sh_flags`.
    pub flags: u32,
    /// `sh_addr`.
    pub addr: u32,
    /// `sh_link`.
    pub link: u32,
    /// `sh_info`.
    pub info: u32,
    /// `sh_addralign`.
    pub addralign: u32,
    /// `sh_entsize`.
    pub entsize: u32,
    /// Section contents. Empty for `SHT_NOBITS`.
    pub data: Vec<u8>,
    /// `sh_size` as read for a `SHT_NOBITS` section, which carries no file bytes but still
    /// occupies address space (e.g. `.bss`). Ignored for every other section kind, whose size is
    /// always `data.len()`.
    pub nobits_size: u32,
    /// Parsed relocation entries, present only for `SHT_RELA` sections.
    pub relocations: Option<Vec<Rela>>,
}

impl Section {
    /// The section's type as a known [`SectionKind`], or `None` if it's one of the RPX-specific
    /// types or otherwise unrecognized.
    pub fn section_kind(&self) -> Option<SectionKind> {
        SectionKind::from_u32(self.kind)
    }

    /// Size in bytes the section occupies in the final image (`sh_size`): `nobits_size` for
    /// `SHT_NOBITS`, `data.len()` otherwise.
    pub fn size(&self) -> u32 {
        if self.kind == SectionKind::Nobits as u32 {
            self.nobits_size
        } else {
            self.data.len() as u32
        }
    }

    /// Highest address past the end of this section (`sh_addr + sh_size`), or `sh_addr` if the
    /// section is not allocated.
    pub fn end_addr(&self) -> u32 {
        self.addr + self.size()
    }
}

/// An owned, mutable representation of an entire ELF32 big-endian file.
#[derive(Debug, Clone)]
pub struct Elf {
    /// `e_type`.
    pub kind: u16,
    /// `e_machine`.
    pub machine: u16,
    /// `e_entry`.
    pub entry: u32,
    /// `e_flags`.
    pub flags: u32,
    /// The section list, in section-header-table order (index 0 is always the null section).
    pub sections: Vec<Section>,
}

impl Elf {
    /// Parses an ELF32 big-endian file from its raw bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, ElfError> {
        if !bytes.starts_with(ELF_MAGIC) {
            return Err(ElfError::InvalidHeader);
        }
        if bytes.len() < usize::from(ELF32_HEADER_SIZE) {
            return Err(ElfError::UnexpectedEof);
        }
        if bytes[4] != 1 {
            return Err(ElfError::InvalidValue("ei_class"));
        }
        if bytes[5] != 2 {
            return Err(ElfError::InvalidValue("ei_data"));
        }
        if bytes[6] != 1 {
            return Err(ElfError::InvalidValue("ei_version"));
        }

        let endianness = Endianness::Big;
        let read_u16 =
            |off: usize| -> u16 { endianness.u16_from_bytes(bytes[off..off + 2].try_into().unwrap()) };
        let read_u32 =
            |off: usize| -> u32 { endianness.u32_from_bytes(bytes[off..off + 4].try_into().unwrap()) };

        let kind = read_u16(16);
        let machine = read_u16(18);
        let entry = read_u32(24);
        let flags = read_u32(36);
        let shoff = read_u32(32) as usize;
        let shentsize = read_u16(46);
        let shnum = read_u16(48) as usize;
        let shstrndx = read_u16(50) as usize;

        if shnum == 0 {
            return Ok(Self {
                kind,
                machine,
                entry,
                flags,
                sections: Vec::new(),
            });
        }

        if shentsize != ELF32_SECTION_HEADER_SIZE {
            return Err(ElfError::InvalidValue("e_shentsize"));
        }
        if shoff + shentsize as usize * shnum > bytes.len() {
            return Err(ElfError::UnexpectedEof);
        }

        struct RawHeader {
            name_idx: u32,
            kind: u32,
            flags: u32,
            addr: u32,
            offset: u32,
            size: u32,
            link: u32,
            info: u32,
            addralign: u32,
            entsize: u32,
        }

        let mut raw = Vec::with_capacity(shnum);
        for i in 0..shnum {
            let base = shoff + i * shentsize as usize;
            raw.push(RawHeader {
                name_idx: read_u32(base),
                kind: read_u32(base + 4),
                flags: read_u32(base + 8),
                addr: read_u32(base + 12),
                offset: read_u32(base + 16),
                size: read_u32(base + 20),
                link: read_u32(base + 24),
                info: read_u32(base + 28),
                addralign: read_u32(base + 32),
                entsize: read_u32(base + 36),
            });
        }

        if shstrndx >= raw.len() {
            return Err(ElfError::InvalidValue("e_shstrndx"));
        }
        let strtab_hdr = &raw[shstrndx];
        let strtab_bytes = if strtab_hdr.kind == SectionKind::Nobits as u32 {
            &[][..]
        } else {
            bytes
                .get(strtab_hdr.offset as usize..(strtab_hdr.offset + strtab_hdr.size) as usize)
                .ok_or(ElfError::UnexpectedEof)?
        };

        let name_at = |idx: u32| -> String {
            let start = idx as usize;
            match strtab_bytes.get(start..) {
                Some(rest) => {
                    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
                    String::from_utf8_lossy(&rest[..end]).into_owned()
                }
                None => String::new(),
            }
        };

        let mut sections = Vec::with_capacity(shnum);
        for hdr in &raw {
            let data = if hdr.kind == SectionKind::Nobits as u32 || hdr.size == 0 {
                Vec::new()
            } else {
                bytes
                    .get(hdr.offset as usize..(hdr.offset + hdr.size) as usize)
                    .ok_or(ElfError::UnexpectedEof)?
                    .to_vec()
            };

            let relocations = if hdr.kind == SectionKind::Rela as u32 {
                let mut entries = Vec::new();
                let mut off = 0usize;
                while off + ELF32_RELA_ENTRY_SIZE as usize <= data.len() {
                    let r_offset = endianness.u32_from_bytes(data[off..off + 4].try_into().unwrap());
                    let r_info = endianness.u32_from_bytes(data[off + 4..off + 8].try_into().unwrap());
                    let r_addend = endianness.i32_from_bytes(data[off + 8..off + 12].try_into().unwrap());
                    entries.push(Rela {
                        offset: r_offset,
                        info: r_info,
                        addend: r_addend,
                    });
                    off += ELF32_RELA_ENTRY_SIZE as usize;
                }
                Some(entries)
            } else {
                None
            };

            sections.push(Section {
                name: name_at(hdr.name_idx),
                kind: hdr.kind,
                flags: hdr.flags,
                addr: hdr.addr,
                link: hdr.link,
                info: hdr.info,
                addralign: hdr.addralign,
                entsize: hdr.entsize,
                data,
                nobits_size: if hdr.kind == SectionKind::Nobits as u32 {
                    hdr.size
                } else {
                    0
                },
                relocations,
            });
        }

        Ok(Self {
            kind,
            machine,
            entry,
            flags,
            sections,
        })
    }

    /// Finds a section by exact name, returning its index in [`Elf::sections`].
    pub fn find_section(&self, name: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.name == name)
    }

    /// Finds a section by exact name.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.find_section(name).map(|i| &self.sections[i])
    }

    /// Pops the trailing `SHT_RPL_CRCS`/`SHT_RPL_FILEINFO` pair off the section list, validating
    /// their types and, for FILEINFO, its magic. Returns `(crcs, fileinfo)` in that order so the
    /// caller can re-append them (in the same order) once new sections have been spliced in.
    pub fn pop_rpx_trailer(&mut self) -> Result<(Section, Section), ElfError> {
        let fileinfo = self
            .sections
            .pop()
            .ok_or(ElfError::MissingSection("SHT_RPL_FILEINFO"))?;
        if fileinfo.kind != SHT_RPL_FILEINFO {
            return Err(ElfError::MissingSection("SHT_RPL_FILEINFO"));
        }
        if fileinfo.data.len() < 0x14 {
            return Err(ElfError::InvalidValue("SHT_RPL_FILEINFO data too short"));
        }
        let magic = Endianness::Big.u32_from_bytes(fileinfo.data[0..4].try_into().unwrap());
        if magic != RPL_FILEINFO_MAGIC {
            return Err(ElfError::InvalidValue("SHT_RPL_FILEINFO magic"));
        }

        let crcs = self
            .sections
            .pop()
            .ok_or(ElfError::MissingSection("SHT_RPL_CRCS"))?;
        if crcs.kind != SHT_RPL_CRCS {
            return Err(ElfError::MissingSection("SHT_RPL_CRCS"));
        }

        Ok((crcs, fileinfo))
    }

    /// Recomputes a `SHT_RPL_CRCS` section's bytes from the current (final) section order. A
    /// section's CRC slot is zero if its type is `SHT_NOBITS` or `SHT_RPL_CRCS` itself, or if it
    /// has no bytes; otherwise it is the big-endian CRC32 of its bytes.
    pub fn compute_crcs(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.sections.len() * 4);
        for section in &self.sections {
            // A section carrying parsed `relocations` must be hashed from that list, not from
            // its (possibly stale) raw `data` — mirrors the re-encoding `write()` does.
            let bytes: std::borrow::Cow<[u8]> = match &section.relocations {
                Some(relocs) => std::borrow::Cow::Owned(encode_relocations(relocs)),
                None => std::borrow::Cow::Borrowed(section.data.as_slice()),
            };
            let crc = if section.kind == SectionKind::Nobits as u32
                || section.kind == SHT_RPL_CRCS
                || bytes.is_empty()
            {
                0
            } else {
                crc32fast::hash(&bytes)
            };
            out.extend_from_slice(&Endianness::Big.u32_to_bytes(crc));
        }
        out
    }

    /// Serializes the file back to bytes. New sections are assumed to already be placed in their
    /// final order (including the RPX CRCS/FILEINFO trailer, if present); file offsets, the
    /// `.shstrtab` contents, and the section header table are recomputed from scratch. A section
    /// whose `name` is empty is written with `sh_name = 0` (an appended-splice section, per the
    /// empty-name convention used on the console path).
    pub fn write(&self) -> Vec<u8> {
        let endianness = Endianness::Big;
        let shstrndx = self.find_shstrtab_index();

        // Rebuild .shstrtab deterministically: index 0 is always the empty string, followed by
        // each distinct non-empty section name in first-seen order.
        let mut shstrtab_bytes = vec![0u8];
        let mut name_offsets = Vec::with_capacity(self.sections.len());
        for section in &self.sections {
            if section.name.is_empty() {
                name_offsets.push(0u32);
                continue;
            }
            if let Some(existing) = find_name_offset(&shstrtab_bytes, &section.name) {
                name_offsets.push(existing);
            } else {
                let off = shstrtab_bytes.len() as u32;
                shstrtab_bytes.extend_from_slice(section.name.as_bytes());
                shstrtab_bytes.push(0);
                name_offsets.push(off);
            }
        }

        let shnum = self.sections.len();
        // A section carrying parsed `relocations` is re-encoded from that list rather than from
        // its (possibly stale) raw `data` — splicing and hook application mutate the relocation
        // list in place without touching `data`.
        let section_bytes: Vec<std::borrow::Cow<[u8]>> = self
            .sections
            .iter()
            .enumerate()
            .map(|(i, section)| {
                if i == shstrndx {
                    std::borrow::Cow::Borrowed(shstrtab_bytes.as_slice())
                } else if let Some(relocs) = &section.relocations {
                    std::borrow::Cow::Owned(encode_relocations(relocs))
                } else {
                    std::borrow::Cow::Borrowed(section.data.as_slice())
                }
            })
            .collect();

        let mut body = Vec::new();
        let header_size = usize::from(ELF32_HEADER_SIZE);
        let mut offsets = Vec::with_capacity(shnum);
        let mut offset = header_size;
        for (i, section) in self.sections.iter().enumerate() {
            offsets.push(offset as u32);
            if section.kind != SectionKind::Nobits as u32 {
                let bytes = &section_bytes[i];
                body.extend_from_slice(bytes);
                offset += bytes.len();
            }
        }

        let shoff = header_size + body.len();

        let mut out = Vec::with_capacity(shoff + shnum * usize::from(ELF32_SECTION_HEADER_SIZE));
        out.extend_from_slice(ELF_MAGIC);
        out.push(1); // EI_CLASS = ELFCLASS32
        out.push(2); // EI_DATA = ELFDATA2MSB
        out.push(1); // EI_VERSION
        out.extend_from_slice(&[0u8; 9]); // padding
        out.extend_from_slice(&endianness.u16_to_bytes(self.kind));
        out.extend_from_slice(&endianness.u16_to_bytes(self.machine));
        out.extend_from_slice(&endianness.u32_to_bytes(1)); // e_version
        out.extend_from_slice(&endianness.u32_to_bytes(self.entry));
        out.extend_from_slice(&endianness.u32_to_bytes(0)); // e_phoff: no program headers
        out.extend_from_slice(&endianness.u32_to_bytes(shoff as u32));
        out.extend_from_slice(&endianness.u32_to_bytes(self.flags));
        out.extend_from_slice(&endianness.u16_to_bytes(ELF32_HEADER_SIZE));
        out.extend_from_slice(&endianness.u16_to_bytes(ELF32_PROGRAM_HEADER_SIZE));
        out.extend_from_slice(&endianness.u16_to_bytes(0)); // e_phnum
        out.extend_from_slice(&endianness.u16_to_bytes(ELF32_SECTION_HEADER_SIZE));
        out.extend_from_slice(&endianness.u16_to_bytes(shnum as u16));
        out.extend_from_slice(&endianness.u16_to_bytes(shstrndx as u16));

        debug_assert_eq!(out.len(), header_size);
        out.extend_from_slice(&body);

        for (i, (section, &off)) in self.sections.iter().zip(offsets.iter()).enumerate() {
            let size = if section.kind == SectionKind::Nobits as u32 {
                section.nobits_size
            } else {
                section_bytes[i].len() as u32
            };
            out.extend_from_slice(&endianness.u32_to_bytes(name_offsets[i]));
            out.extend_from_slice(&endianness.u32_to_bytes(section.kind));
            out.extend_from_slice(&endianness.u32_to_bytes(section.flags));
            out.extend_from_slice(&endianness.u32_to_bytes(section.addr));
            out.extend_from_slice(&endianness.u32_to_bytes(if section.kind == SectionKind::Null as u32 {
                0
            } else {
                off
            }));
            out.extend_from_slice(&endianness.u32_to_bytes(size));
            out.extend_from_slice(&endianness.u32_to_bytes(section.link));
            out.extend_from_slice(&endianness.u32_to_bytes(section.info));
            out.extend_from_slice(&endianness.u32_to_bytes(section.addralign));
            out.extend_from_slice(&endianness.u32_to_bytes(section.entsize));
        }

        out
    }

    fn find_shstrtab_index(&self) -> usize {
        self.find_section(".shstrtab").unwrap_or(0)
    }
}

fn find_name_offset(strtab: &[u8], name: &str) -> Option<u32> {
    let needle = name.as_bytes();
    let mut i = 0usize;
    while i < strtab.len() {
        let end = strtab[i..].iter().position(|&b| b == 0)? + i;
        if &strtab[i..end] == needle {
            return Some(i as u32);
        }
        i = end + 1;
    }
    None
}

/// Encodes a [`Rela`] entry's 12 bytes, big-endian.
pub fn encode_rela(entry: &Rela, target: &mut impl Write) -> std::io::Result<()> {
    let be = Endianness::Big;
    target.write_all(&be.u32_to_bytes(entry.offset))?;
    target.write_all(&be.u32_to_bytes(entry.info))?;
    target.write_all(&be.i32_to_bytes(entry.addend))?;
    Ok(())
}

/// Serializes a slice of [`Rela`] entries into one section's raw bytes.
pub fn encode_relocations(entries: &[Rela]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * ELF32_RELA_ENTRY_SIZE as usize);
    for entry in entries {
        encode_rela(entry, &mut out).unwrap();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_elf_bytes() -> Vec<u8> {
        // One NULL section only: e_shnum = 1, e_shstrndx = 0.
        let be = Endianness::Big;
        let mut out = Vec::new();
        out.extend_from_slice(ELF_MAGIC);
        out.push(1);
        out.push(2);
        out.push(1);
        out.extend_from_slice(&[0u8; 9]);
        out.extend_from_slice(&be.u16_to_bytes(1)); // e_type
        out.extend_from_slice(&be.u16_to_bytes(20)); // e_machine = PPC
        out.extend_from_slice(&be.u32_to_bytes(1)); // e_version
        out.extend_from_slice(&be.u32_to_bytes(0)); // e_entry
        out.extend_from_slice(&be.u32_to_bytes(0)); // e_phoff
        let shoff = ELF32_HEADER_SIZE as u32;
        out.extend_from_slice(&be.u32_to_bytes(shoff)); // e_shoff
        out.extend_from_slice(&be.u32_to_bytes(0)); // e_flags
        out.extend_from_slice(&be.u16_to_bytes(ELF32_HEADER_SIZE));
        out.extend_from_slice(&be.u16_to_bytes(ELF32_PROGRAM_HEADER_SIZE));
        out.extend_from_slice(&be.u16_to_bytes(0));
        out.extend_from_slice(&be.u16_to_bytes(ELF32_SECTION_HEADER_SIZE));
        out.extend_from_slice(&be.u16_to_bytes(1));
        out.extend_from_slice(&be.u16_to_bytes(0));
        // Null section header, all zero.
        out.extend_from_slice(&[0u8; ELF32_SECTION_HEADER_SIZE as usize]);
        out
    }

    #[test]
    fn parse_minimal() {
        let bytes = minimal_elf_bytes();
        let elf = Elf::parse(&bytes).unwrap();
        assert_eq!(elf.sections.len(), 1);
        assert_eq!(elf.machine, 20);
    }

    #[test]
    fn rejects_little_endian() {
        let mut bytes = minimal_elf_bytes();
        bytes[5] = 1;
        assert_eq!(Elf::parse(&bytes), Err(ElfError::InvalidValue("ei_data")));
    }

    #[test]
    fn crcs_zero_for_nobits_and_crcs_itself() {
        let mut elf = Elf::parse(&minimal_elf_bytes()).unwrap();
        elf.sections.push(Section {
            name: ".bss".into(),
            kind: SectionKind::Nobits as u32,
            flags: 0,
            addr: 0x1000_0000,
            link: 0,
            info: 0,
            addralign: 4,
            entsize: 0,
            data: vec![1, 2, 3, 4],
            nobits_size: 4,
            relocations: None,
        });
        elf.sections.push(Section {
            name: ".text".into(),
            kind: SectionKind::Progbits as u32,
            flags: 0,
            addr: 0x0200_0000,
            link: 0,
            info: 0,
            addralign: 4,
            entsize: 0,
            data: vec![0x60, 0, 0, 0],
            nobits_size: 0,
            relocations: None,
        });
        let crcs = elf.compute_crcs();
        // NULL(0) + bss(0, nobits) + text(crc32)
        assert_eq!(&crcs[0..4], &[0, 0, 0, 0]);
        assert_eq!(&crcs[4..8], &[0, 0, 0, 0]);
        assert_ne!(&crcs[8..12], &[0, 0, 0, 0]);
    }
}
