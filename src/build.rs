//! Orchestrates one `(target, platform)` build: pre-link relocation stripping, splicing the
//! linked object into the base RPX, hook application, and platform-specific output packaging.
//!
//! This module owns the mutable, stateful part of the pipeline; address resolution ([`crate::addrmap`]),
//! hook byte-encoding ([`crate::hook`]), and the ELF codec itself ([`crate::elf`]) are each
//! self-contained and tested independently.

use std::collections::HashMap;

use log::{info, warn};
use thiserror::Error;

use crate::consts::{Endianness, SectionKind};
use crate::elf::{Elf, ElfError, Rela, Section};
use crate::hook::{Hook, HookError};

/// Errors raised while splicing, patching, or packaging a build.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The ELF codec reported a structural problem with the base or linked object.
    #[error(transparent)]
    Elf(#[from] ElfError),
    /// A hook failed to encode (as opposed to the patch-time warnings which are logged and
    /// skipped, not raised).
    #[error(transparent)]
    Hook(#[from] HookError),
    /// A section required to proceed (by name) was absent from the linked object.
    #[error("missing required section in linked object: {0}")]
    MissingSection(&'static str),
    /// The same symbol name was observed twice in `.symtab` with two different addresses.
    #[error("symbol {0:?} resolved to conflicting addresses")]
    SymbolMismatch(String),
    /// A CafeLoader build needed to resolve a patch address and the resolver failed.
    #[error("failed to resolve patch address {0:#010X} for this platform")]
    UnresolvedPatchAddress(u32),
}

/// `.text`-class address space, per the Espresso memory layout convention.
pub const TEXT_RANGE: (u32, u32) = (0x0200_0000, 0x1000_0000);
/// `.rodata`/`.data`/`.bss`-class address space.
pub const DATA_RANGE: (u32, u32) = (0x1000_0000, 0xC000_0000);
/// `.symtab`/`.strtab` ("dyna") address space.
pub const DYNA_RANGE: (u32, u32) = (0xC000_0000, 0xC800_0000);

/// `align(x, a) = ((x - 1) | (a - 1)) + 1`.
fn align(x: u32, a: u32) -> u32 {
    if a <= 1 {
        return x;
    }
    ((x.wrapping_sub(1)) | (a - 1)).wrapping_add(1)
}

/// Removes every relocation whose kind is `0x0B` (the tool's "do not emit" marker) from every
/// `SHT_RELA` section of a freshly-compiled object, in place.
pub fn strip_non_emit_relocations(obj: &mut Elf) {
    for section in &mut obj.sections {
        if let Some(relocs) = &mut section.relocations {
            relocs.retain(|r| r.kind() != 0x0B);
        }
    }
}

/// Indices (into the spliced [`Elf`]'s section list) of the newly-appended sections, once
/// splicing has completed. Each entry is `None` if the linked object didn't produce that section.
#[derive(Debug, Clone, Default)]
pub struct SplicedSections {
    /// Appended `.text`.
    pub text: Option<usize>,
    /// Appended `.rela.text`.
    pub rela_text: Option<usize>,
    /// Appended `.rodata`.
    pub rodata: Option<usize>,
    /// Appended `.rela.rodata`.
    pub rela_rodata: Option<usize>,
    /// Appended `.data`.
    pub data: Option<usize>,
    /// Appended `.rela.data`.
    pub rela_data: Option<usize>,
    /// Appended `.bss`.
    pub bss: Option<usize>,
    /// Appended `.symtab`.
    pub symtab: Option<usize>,
    /// Appended `.strtab`.
    pub strtab: Option<usize>,
}

fn push_appended(base: &mut Elf, linked: &Elf, name: &str) -> Option<usize> {
    let src = linked.section(name)?;
    let mut sec = src.clone();
    sec.name = String::new();
    if let Some(base_sec) = base.section(name) {
        sec.flags = base_sec.flags;
    }
    base.sections.push(sec);
    Some(base.sections.len() - 1)
}

/// Splices the linked object's `.text`/`.rodata`/`.data`/`.bss`/relocation/symbol sections onto
/// `base` (which must already have had its RPX trailer popped by the caller is NOT required here —
/// this function pops and re-appends the trailer itself), re-links relocation sections, assigns
/// dyna-range addresses to the appended symbol tables starting at `syms_addr`, and rewrites the
/// FILEINFO trailer's end markers. Returns the section indices needed for hook application.
pub fn splice(base: &mut Elf, linked: &Elf, mut syms_addr: u32) -> Result<SplicedSections, BuildError> {
    let (crcs, mut fileinfo) = base.pop_rpx_trailer()?;

    let base_text_end = base.section(".text").map(|s| s.end_addr()).unwrap_or(0);
    let base_data_end = [".rodata", ".data", ".bss"]
        .iter()
        .filter_map(|n| base.section(n))
        .map(|s| s.end_addr())
        .max()
        .unwrap_or(0);
    let base_dyna_end = [".symtab", ".strtab"]
        .iter()
        .filter_map(|n| base.section(n))
        .map(|s| s.end_addr())
        .max()
        .unwrap_or(0);

    let mut spliced = SplicedSections::default();
    spliced.text = push_appended(base, linked, ".text");
    spliced.rela_text = push_appended(base, linked, ".rela.text");
    spliced.rodata = push_appended(base, linked, ".rodata");
    spliced.rela_rodata = push_appended(base, linked, ".rela.rodata");
    spliced.data = push_appended(base, linked, ".data");
    spliced.rela_data = push_appended(base, linked, ".rela.data");
    spliced.bss = push_appended(base, linked, ".bss");

    if let Some(idx) = push_appended(base, linked, ".symtab") {
        let align_to = base.sections[idx].addralign.max(1);
        syms_addr = align(syms_addr, align_to);
        base.sections[idx].addr = syms_addr;
        syms_addr += base.sections[idx].size();
        spliced.symtab = Some(idx);
    }
    if let Some(idx) = push_appended(base, linked, ".strtab") {
        let align_to = base.sections[idx].addralign.max(1);
        syms_addr = align(syms_addr, align_to);
        base.sections[idx].addr = syms_addr;
        syms_addr += base.sections[idx].size();
        spliced.strtab = Some(idx);
    }

    // Re-link relocation sections: link -> symtab index, info -> target section index, and
    // rebase any relocation offset that's still section-relative (came straight out of the
    // linker) onto the section's now-assigned vAddr.
    let relink = |base: &mut Elf, rela_idx: Option<usize>, target_idx: Option<usize>, symtab_idx: Option<usize>| {
        let (Some(rela_idx), Some(target_idx)) = (rela_idx, target_idx) else { return };
        let target_addr = base.sections[target_idx].addr;
        if let Some(symtab_idx) = symtab_idx {
            base.sections[rela_idx].link = symtab_idx as u32;
        }
        base.sections[rela_idx].info = target_idx as u32;
        if let Some(relocs) = base.sections[rela_idx].relocations.as_mut() {
            for rela in relocs.iter_mut() {
                if rela.offset < target_addr {
                    rela.offset = rela.offset.wrapping_add(target_addr);
                }
            }
        }
    };
    relink(base, spliced.rela_text, spliced.text, spliced.symtab);
    relink(base, spliced.rela_rodata, spliced.rodata, spliced.symtab);
    relink(base, spliced.rela_data, spliced.data, spliced.symtab);

    if let (Some(symtab_idx), Some(strtab_idx)) = (spliced.symtab, spliced.strtab) {
        base.sections[symtab_idx].link = strtab_idx as u32;
    }

    let text_end = spliced.text.map(|i| base.sections[i].end_addr()).unwrap_or(0);
    let data_end = [spliced.rodata, spliced.data, spliced.bss]
        .into_iter()
        .flatten()
        .map(|i| base.sections[i].end_addr())
        .max()
        .unwrap_or(0);
    let dyna_end = syms_addr;

    if text_end > 0 && fileinfo.data.len() >= 8 {
        fileinfo.data[4..8].copy_from_slice(&Endianness::Big.u32_to_bytes(text_end.wrapping_sub(0x0200_0000)));
    }
    if data_end > base_data_end && fileinfo.data.len() >= 16 {
        fileinfo.data[12..16]
            .copy_from_slice(&Endianness::Big.u32_to_bytes(data_end.wrapping_sub(0x1000_0000)));
    }
    if dyna_end > base_dyna_end && fileinfo.data.len() >= 80 {
        fileinfo.data[20..24]
            .copy_from_slice(&Endianness::Big.u32_to_bytes(dyna_end.wrapping_sub(0xC000_0000)));
        fileinfo.data[76..80].copy_from_slice(&[0, 0, 0, 0]);
    }

    base.sections.push(crcs);
    base.sections.push(fileinfo);

    // Every appended index still points at the same element; the trailer was appended after.
    Ok(spliced)
}

/// Recomputes the `SHT_RPL_CRCS` trailer's bytes in place from the image's final section order.
pub fn recompute_crcs(elf: &mut Elf) {
    let crcs = elf.compute_crcs();
    if let Some(idx) = elf.sections.iter().position(|s| s.kind == crate::consts::SHT_RPL_CRCS) {
        elf.sections[idx].data = crcs;
    }
}

/// One contiguous address range a hook address may land in, with the section's index and its
/// paired relocation section index (if any).
#[derive(Debug, Clone, Copy)]
pub struct HookRange {
    kind: &'static str,
    lo: u32,
    hi: u32,
    section_idx: usize,
    rela_idx: Option<usize>,
    is_bss: bool,
}

/// Builds the four named hook-target ranges (`.text`/`.rodata`/`.data`/`.bss`) from the *base*
/// image's own named sections, each paired with its matching base `.rela.*` section if present.
/// Hook addresses are game addresses inside the base RPX's original sections, not inside the
/// newly-spliced module code/data (which lives at separate, non-overlapping addresses reserved
/// past the end of the base image) — mirrors `entry_ranges` in the original tool, which looks the
/// four sections up by name on `base_elf` rather than from the just-appended linker output.
pub fn hook_ranges(elf: &Elf) -> Vec<HookRange> {
    let mut ranges = Vec::new();
    let mut push = |kind: &'static str, name: &str, rela_name: Option<&str>, is_bss: bool| {
        if let Some(idx) = elf.find_section(name) {
            let sec = &elf.sections[idx];
            ranges.push(HookRange {
                kind,
                lo: sec.addr,
                hi: sec.end_addr(),
                section_idx: idx,
                rela_idx: rela_name.and_then(|n| elf.find_section(n)),
                is_bss,
            });
        }
    };
    push(".text", ".text", Some(".rela.text"), false);
    push(".rodata", ".rodata", Some(".rela.rodata"), false);
    push(".data", ".data", Some(".rela.data"), false);
    push(".bss", ".bss", None, true);
    ranges
}

/// Applies every hook in `hooks` to `elf`, resolving each address through `resolve` first (a
/// no-op `|a| Ok(a)` for a platform without a resolver). Soft-skippable conditions (unknown
/// region, `.bss` target, overrun) are logged and skipped; hard failures (resolver/encode errors)
/// abort the whole build.
pub fn apply_hooks(
    elf: &mut Elf,
    ranges: &[HookRange],
    hooks: &mut [Hook],
    symbols: &HashMap<String, u32>,
    resolve: impl Fn(u32) -> Result<u32, BuildError>,
) -> Result<(), BuildError> {
    for hook in hooks.iter_mut() {
        for &raw_addr in hook.addresses().to_vec().iter() {
            let addr = resolve(raw_addr)?;
            let bytes = hook.bytes(addr, symbols)?;
            let len = bytes.len() as u32;

            let Some(range) = ranges.iter().find(|r| addr >= r.lo && addr < r.hi) else {
                warn!("hook at {addr:#010X}: unknown region, skipping");
                continue;
            };
            if range.is_bss {
                warn!("hook at {addr:#010X}: target is .bss, skipping");
                continue;
            }
            if addr + len > range.hi {
                warn!("hook at {addr:#010X}: overruns end of {}, skipping", range.kind);
                continue;
            }

            if let Some(rela_idx) = range.rela_idx {
                if let Some(relocs) = elf.sections[rela_idx].relocations.as_mut() {
                    relocs.retain(|r| !(r.offset >= addr && r.offset < addr + len));
                }
            }

            let section = &mut elf.sections[range.section_idx];
            let offset = (addr - section.addr) as usize;
            section.data[offset..offset + bytes.len()].copy_from_slice(&bytes);
        }
    }
    Ok(())
}

fn read_cstr(data: &[u8], offset: usize) -> String {
    match data.get(offset..) {
        Some(rest) => {
            let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
            String::from_utf8_lossy(&rest[..end]).into_owned()
        }
        None => String::new(),
    }
}

/// Parses `.symtab` (keyed against `.strtab` and the section list) and merges every local symbol
/// bound to a section named `.text` into `symbols`. A symbol already present must resolve to the
/// same address (mismatches are a hard error, mirroring the original's `assert`).
pub fn merge_text_symbols(
    elf: &Elf,
    symtab: &Section,
    strtab: &Section,
    symbols: &mut HashMap<String, u32>,
) -> Result<(), BuildError> {
    let be = Endianness::Big;
    let mut pos = 0usize;
    while pos + 16 <= symtab.data.len() {
        let st_name = be.u32_from_bytes(symtab.data[pos..pos + 4].try_into().unwrap());
        let st_value = be.u32_from_bytes(symtab.data[pos + 4..pos + 8].try_into().unwrap());
        let st_info = symtab.data[pos + 12];
        let st_other = symtab.data[pos + 13];
        let st_shndx = be.u16_from_bytes(symtab.data[pos + 14..pos + 16].try_into().unwrap());
        pos += 16;

        if st_name == 0 || (st_info >> 4) != 1 || st_other != 0 {
            continue;
        }
        let shndx = st_shndx as usize;
        if shndx == 0 || shndx >= elf.sections.len() || elf.sections[shndx].name != ".text" {
            continue;
        }

        let name = read_cstr(&strtab.data, st_name as usize);
        match symbols.get(&name) {
            Some(&existing) if existing != st_value => {
                return Err(BuildError::SymbolMismatch(name));
            }
            Some(_) => {}
            None => {
                symbols.insert(name, st_value);
            }
        }
    }
    Ok(())
}

/// Writes the CafeLoader `Addr.bin`: big-endian `text_addr` followed by `data_addr`.
pub fn render_addr_bin(text_addr: u32, data_addr: u32) -> Vec<u8> {
    let be = Endianness::Big;
    let mut out = Vec::with_capacity(8);
    out.extend_from_slice(&be.u32_to_bytes(text_addr));
    out.extend_from_slice(&be.u32_to_bytes(data_addr));
    out
}

/// Writes the CafeLoader `Data.bin`: a zero-filled buffer sized `data_end - data_addr` with
/// `.rodata` and `.data` copied in at their `vAddr - data_addr` offsets (`.bss` is never
/// materialized).
pub fn render_data_bin(data_addr: u32, data_end: u32, rodata: Option<&Section>, data: Option<&Section>) -> Vec<u8> {
    let mut out = vec![0u8; data_end.saturating_sub(data_addr) as usize];
    for section in [rodata, data].into_iter().flatten() {
        let offset = (section.addr.saturating_sub(data_addr)) as usize;
        if offset + section.data.len() <= out.len() {
            out[offset..offset + section.data.len()].copy_from_slice(&section.data);
        }
    }
    out
}

/// One `(length, address, bytes)` record as written into `Patches.hax`.
#[derive(Debug, Clone)]
pub struct PatchRecord {
    /// Resolved patch address.
    pub address: u32,
    /// The hook's bytes at this address.
    pub bytes: Vec<u8>,
}

/// Writes the CafeLoader `Patches.hax`: `u16 count` then `count` records of
/// `u16 length, u32 address, length bytes`, all big-endian.
pub fn render_patches_hax(records: &[PatchRecord]) -> Vec<u8> {
    let be = Endianness::Big;
    let mut out = Vec::new();
    out.extend_from_slice(&be.u16_to_bytes(records.len() as u16));
    for record in records {
        out.extend_from_slice(&be.u16_to_bytes(record.bytes.len() as u16));
        out.extend_from_slice(&be.u32_to_bytes(record.address));
        out.extend_from_slice(&record.bytes);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::SectionKind;

    fn section(name: &str, kind: u32, addr: u32, data: Vec<u8>) -> Section {
        Section {
            name: name.to_string(),
            kind,
            flags: 0,
            addr,
            link: 0,
            info: 0,
            addralign: 4,
            entsize: 0,
            data,
            nobits_size: 0,
            relocations: None,
        }
    }

    #[test]
    fn align_helper_matches_hook_module() {
        assert_eq!(align(0x100, 0x20), 0x100);
        assert_eq!(align(0x101, 0x20), 0x120);
    }

    #[test]
    fn strip_removes_only_marked_kind() {
        let mut elf = Elf {
            kind: 1,
            machine: 20,
            entry: 0,
            flags: 0,
            sections: vec![Section {
                relocations: Some(vec![
                    Rela { offset: 0, info: 0x0B, addend: 0 },
                    Rela { offset: 4, info: 0x01, addend: 0 },
                ]),
                ..section(".rela.text", SectionKind::Rela as u32, 0, vec![])
            }],
        };
        strip_non_emit_relocations(&mut elf);
        let relocs = elf.sections[0].relocations.as_ref().unwrap();
        assert_eq!(relocs.len(), 1);
        assert_eq!(relocs[0].kind(), 0x01);
    }

    #[test]
    fn data_bin_places_sections_at_offset() {
        let rodata = section(".rodata", SectionKind::Progbits as u32, 0x1000_0010, vec![1, 2]);
        let buf = render_data_bin(0x1000_0000, 0x1000_0020, Some(&rodata), None);
        assert_eq!(buf.len(), 0x20);
        assert_eq!(&buf[0x10..0x12], &[1, 2]);
    }

    #[test]
    fn patches_hax_layout() {
        let records = vec![PatchRecord {
            address: 0x0210_0000,
            bytes: vec![0x60, 0, 0, 0],
        }];
        let bytes = render_patches_hax(&records);
        assert_eq!(&bytes[0..2], &[0, 1]);
        assert_eq!(&bytes[2..4], &[0, 4]);
        assert_eq!(&bytes[4..8], &[0x02, 0x10, 0x00, 0x00]);
        assert_eq!(&bytes[8..12], &[0x60, 0, 0, 0]);
    }
}
