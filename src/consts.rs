use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};

pub(crate) const ELF_MAGIC: &[u8] = &[0x7f, b'E', b'L', b'F'];
pub(crate) const EI_CLASS: usize = 4;
pub(crate) const EI_DATA: usize = 5;
pub(crate) const EI_VERSION: usize = 6;
pub(crate) const EI_OSABI: usize = 7;
pub(crate) const EI_ABIVERSION: usize = 8;
pub(crate) const EI_NIDENT: usize = 16;

pub(crate) const ELF32_HEADER_SIZE: u16 = 52;
pub(crate) const ELF32_SECTION_HEADER_SIZE: u16 = 40;
pub(crate) const ELF32_PROGRAM_HEADER_SIZE: u16 = 32;
pub(crate) const ELF32_RELA_ENTRY_SIZE: u32 = 12;
pub(crate) const ELF32_SYMBOL_ENTRY_SIZE: u32 = 16;

/// RPX-specific section type carrying one CRC32 per section, last-but-one section in
/// an RPL/RPX file.
pub const SHT_RPL_CRCS: u32 = 0x8000_0003;
/// RPX-specific section type carrying aggregate text/data/load size metadata, the
/// final section in an RPL/RPX file.
pub const SHT_RPL_FILEINFO: u32 = 0x8000_0004;
/// Magic value found at offset 0 of a `SHT_RPL_FILEINFO` section's bytes.
pub const RPL_FILEINFO_MAGIC: u32 = 0xCAFE_0402;

/// Represents the endianness of a system, i.e. the order in which bytes of an integer are
/// stored. This crate only ever emits [`Endianness::Big`], but keeps both variants to
/// read files written on either byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    /// Little endian. Least significant byte is stored first.
    Little,
    /// Big endian. Most significant byte is stored first.
    Big,
}

impl Endianness {
    /// Converts an array of two bytes into a [`u16`] using the specified endianness.
    pub fn u16_from_bytes(&self, bytes: [u8; 2]) -> u16 {
        match self {
            Endianness::Little => u16::from_le_bytes(bytes),
            Endianness::Big => u16::from_be_bytes(bytes),
        }
    }

    /// Converts an array of four bytes into a [`u32`] using the specified endianness.
    pub fn u32_from_bytes(&self, bytes: [u8; 4]) -> u32 {
        match self {
            Endianness::Little => u32::from_le_bytes(bytes),
            Endianness::Big => u32::from_be_bytes(bytes),
        }
    }

    /// Converts a [`u16`] into an array of two bytes.
    pub fn u16_to_bytes(&self, value: u16) -> [u8; 2] {
        match self {
            Endianness::Little => u16::to_le_bytes(value),
            Endianness::Big => u16::to_be_bytes(value),
        }
    }

    /// Converts a [`u32`] into an array of four bytes.
    pub fn u32_to_bytes(&self, value: u32) -> [u8; 4] {
        match self {
            Endianness::Little => u32::to_le_bytes(value),
            Endianness::Big => u32::to_be_bytes(value),
        }
    }

    /// Converts a [`i32`] into an array of four bytes.
    pub fn i32_to_bytes(&self, value: i32) -> [u8; 4] {
        self.u32_to_bytes(value as u32)
    }

    /// Converts an array of four bytes into an [`i32`] using the specified endianness.
    pub fn i32_from_bytes(&self, bytes: [u8; 4]) -> i32 {
        self.u32_from_bytes(bytes) as i32
    }
}

/// ELF section type
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum SectionKind {
    /// Inactive
    Null = 0,
    /// Program-specific information
    Progbits = 1,
    /// Symbol table
    SymbolTable = 2,
    /// String table
    StringTable = 3,
    /// Relocation table with addends
    Rela = 4,
    /// Symbol hash table
    Hash = 5,
    /// Dynamic linking information
    Dynamic = 6,
    /// Special information
    Note = 7,
    /// The section does not occupy any space in the file
    Nobits = 8,
    /// Relocation table without addends
    Rel = 9,
    /// Reserved
    Shlib = 10,
    /// Dynamic symbol table
    DynSym = 11,
    /// Array of pointers to initialization functions
    InitArray = 14,
    /// Array of pointers to termination functions
    FiniArray = 15,
    /// Array of pointers to pre-initialization functions
    PreinitArray = 16,
    /// Section group
    Group = 17,
    /// Contains section header indices for a symbol table
    SymTabShndx = 18,
}

/// Symbol binding, the upper four bits of `st_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum SymbolBinding {
    /// Not visible outside the object file.
    Local = 0,
    /// Visible to all object files being combined.
    Global = 1,
    /// Like `Global`, but with lower precedence.
    Weak = 2,
}

/// The target architecture of an ELF file. Only [`MachineKind::Ppc`] is produced by this
/// crate, but other values are recognized when reading an arbitrary ELF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[non_exhaustive]
pub enum MachineKind {
    /// No machine
    None = 0,
    /// PowerPC
    Ppc = 20,
    /// PowerPC 64-bit
    Ppc64 = 21,
    /// ARM
    Arm = 40,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endianness_roundtrip() {
        let be = Endianness::Big;
        assert_eq!(be.u32_from_bytes(be.u32_to_bytes(0xDEAD_BEEF)), 0xDEAD_BEEF);
        assert_eq!(be.i32_from_bytes(be.i32_to_bytes(-42)), -42);
    }

    #[test]
    fn machine_kind_ppc() {
        assert_eq!(MachineKind::from_u16(20), Some(MachineKind::Ppc));
    }
}
