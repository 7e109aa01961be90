//! Per-platform address-conversion resolver chains.
//!
//! An [`AddressMap`] evaluates a parsed address-conversion document into a [`Base`][PlatformKind::Base]
//! table plus zero or more derived platform tables, each mapping half-open address ranges to a
//! signed offset. Resolution walks base -> derived, applying the first matching range at each
//! level.

use std::collections::HashMap;

use thiserror::Error;

/// The platform kind a [`PlatformTable`] resolves addresses for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformKind {
    /// The root table every other platform extends from.
    Base,
    /// The PC-hosted emulator. Tolerant: an out-of-range address passes through unchanged.
    Emulator,
    /// The Wii U console loader. Strict: an out-of-range address is a hard error.
    CafeLoader,
}

/// Errors raised while building or resolving an [`AddressMap`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddrMapError {
    /// Two platform tables declared the same name.
    #[error("platform {0:?} declared more than once")]
    DuplicatePlatform(PlatformKind),
    /// A platform's `extends` referred to a name that wasn't declared (or declared later).
    #[error("platform extends an unknown or not-yet-declared platform")]
    UnknownExtends,
    /// An address fell outside every range in a strict (console) resolver chain.
    #[error("address {0:#010X} out of range")]
    OutOfRange(u32),
    /// A CafeLoader resolver was used without concrete `TextAddr`/`DataAddr` anchors.
    #[error("CafeLoader platform is missing TextAddr/DataAddr anchors")]
    MissingAnchors,
}

/// One half-open address range `[lo, hi)` mapped to a signed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrRange {
    /// Inclusive lower bound.
    pub lo: u32,
    /// Exclusive upper bound.
    pub hi: u32,
    /// Signed offset added to an address that falls in this range.
    pub offset: i64,
}

impl AddrRange {
    fn contains(&self, addr: u32) -> bool {
        addr >= self.lo && addr < self.hi
    }
}

/// A single platform's ordered list of ranges, optionally extending another platform.
#[derive(Debug, Clone, Default)]
pub struct PlatformTable {
    ranges: Vec<AddrRange>,
    extends: Option<PlatformKind>,
}

impl PlatformTable {
    /// Creates an empty table, optionally extending another platform's resolution chain.
    pub fn new(extends: Option<PlatformKind>) -> Self {
        Self {
            ranges: Vec::new(),
            extends,
        }
    }

    /// Appends a range entry in source order; first match wins during resolution.
    pub fn push_range(&mut self, lo: u32, hi: u32, offset: i64) {
        self.ranges.push(AddrRange { lo, hi, offset });
    }

    /// The ranges declared on this table, in source (first-match) order.
    pub fn ranges(&self) -> &[AddrRange] {
        &self.ranges
    }

    fn resolve_self(&self, addr: u32) -> Option<u32> {
        for range in &self.ranges {
            if range.contains(addr) {
                return Some((addr as i64 + range.offset) as u32);
            }
        }
        None
    }
}

/// A fully-built address-conversion document: a `Base` table plus zero or more platform tables
/// that extend it (directly or transitively).
#[derive(Debug, Clone, Default)]
pub struct AddressMap {
    tables: HashMap<PlatformKind, PlatformTable>,
    /// Concrete `TextAddr`/`DataAddr` anchors, required only for [`PlatformKind::CafeLoader`].
    pub text_addr: Option<u32>,
    /// See [`AddressMap::text_addr`].
    pub data_addr: Option<u32>,
}

impl AddressMap {
    /// Creates an address map with an empty `Base` table.
    pub fn new() -> Self {
        let mut tables = HashMap::new();
        tables.insert(PlatformKind::Base, PlatformTable::new(None));
        Self {
            tables,
            text_addr: None,
            data_addr: None,
        }
    }

    /// Declares (or replaces) a platform's table. Returns an error if the platform was already
    /// declared, or if it extends a platform not yet present.
    pub fn declare(
        &mut self,
        kind: PlatformKind,
        table: PlatformTable,
    ) -> Result<(), AddrMapError> {
        if self.tables.contains_key(&kind) && kind != PlatformKind::Base {
            return Err(AddrMapError::DuplicatePlatform(kind));
        }
        if let Some(base) = table.extends {
            if !self.tables.contains_key(&base) {
                return Err(AddrMapError::UnknownExtends);
            }
        }
        self.tables.insert(kind, table);
        Ok(())
    }

    /// Resolves `addr` through the given platform's chain (base -> derived, first match wins at
    /// each level). [`PlatformKind::Emulator`] passes the address through unchanged on a miss;
    /// [`PlatformKind::CafeLoader`] (and [`PlatformKind::Base`] itself) raise
    /// [`AddrMapError::OutOfRange`].
    pub fn resolve(&self, kind: PlatformKind, addr: u32) -> Result<u32, AddrMapError> {
        let table = self
            .tables
            .get(&kind)
            .ok_or(AddrMapError::UnknownExtends)?;

        let base_resolved = match table.extends {
            Some(base) => self.resolve(base, addr)?,
            None => addr,
        };

        match table.resolve_self(base_resolved) {
            Some(resolved) => Ok(resolved),
            None => match kind {
                PlatformKind::Emulator => Ok(base_resolved),
                PlatformKind::Base | PlatformKind::CafeLoader => {
                    Err(AddrMapError::OutOfRange(base_resolved))
                }
            },
        }
    }

    /// Resolves `addr` for the CafeLoader platform, requiring `TextAddr`/`DataAddr` to be set.
    pub fn resolve_cafe_loader(&self, addr: u32) -> Result<u32, AddrMapError> {
        if self.text_addr.is_none() || self.data_addr.is_none() {
            return Err(AddrMapError::MissingAnchors);
        }
        self.resolve(PlatformKind::CafeLoader, addr)
    }

    /// Returns a mutable reference to a platform's table, inserting an empty one extending `Base`
    /// if it doesn't exist yet (used by the address-map text parser to accumulate ranges as it
    /// streams through a document).
    pub(crate) fn tables_mut(&mut self, kind: PlatformKind) -> &mut PlatformTable {
        self.tables
            .entry(kind)
            .or_insert_with(|| PlatformTable::new(if kind == PlatformKind::Base { None } else { Some(PlatformKind::Base) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> AddressMap {
        let mut map = AddressMap::new();
        let mut base = PlatformTable::new(None);
        base.push_range(0x0200_0000, 0x1000_0000, 0);
        map.declare(PlatformKind::Base, base).unwrap();

        let mut emu = PlatformTable::new(Some(PlatformKind::Base));
        emu.push_range(0x0200_0000, 0x0300_0000, 0x1000_0000);
        map.declare(PlatformKind::Emulator, emu).unwrap();
        map
    }

    #[test]
    fn emulator_tolerant_on_miss() {
        let map = sample_map();
        // 0x0500_0000 is in Base's range but not Emulator's own range: should pass through.
        assert_eq!(
            map.resolve(PlatformKind::Emulator, 0x0500_0000).unwrap(),
            0x0500_0000
        );
    }

    #[test]
    fn emulator_resolves_match() {
        let map = sample_map();
        assert_eq!(
            map.resolve(PlatformKind::Emulator, 0x0200_1234).unwrap(),
            0x1200_1234
        );
    }

    #[test]
    fn base_strict_out_of_range() {
        let map = sample_map();
        assert!(matches!(
            map.resolve(PlatformKind::Base, 0xFF00_0000),
            Err(AddrMapError::OutOfRange(_))
        ));
    }

    #[test]
    fn cafe_loader_requires_anchors() {
        let mut map = sample_map();
        map.declare(
            PlatformKind::CafeLoader,
            PlatformTable::new(Some(PlatformKind::Base)),
        )
        .unwrap();
        assert_eq!(
            map.resolve_cafe_loader(0x0200_0000),
            Err(AddrMapError::MissingAnchors)
        );
        map.text_addr = Some(0x0200_0000);
        map.data_addr = Some(0x1000_0000);
        assert_eq!(map.resolve_cafe_loader(0x0200_0000).unwrap(), 0x0200_0000);
    }

    #[test]
    fn duplicate_platform_rejected() {
        let mut map = AddressMap::new();
        map.declare(PlatformKind::Emulator, PlatformTable::new(Some(PlatformKind::Base)))
            .unwrap();
        assert_eq!(
            map.declare(PlatformKind::Emulator, PlatformTable::new(Some(PlatformKind::Base))),
            Err(AddrMapError::DuplicatePlatform(PlatformKind::Emulator))
        );
    }
}
