//! Typed, addressed patches applied to a section's bytes.
//!
//! Each [`Hook`] variant carries one or more patch addresses and knows how to turn itself into
//! the raw bytes written at each address; see [`Hook::bytes`].

use std::collections::HashMap;

use flagset::{flags, FlagSet};
use serde::Deserialize;
use thiserror::Error;

use crate::consts::Endianness;

/// Errors that can occur while encoding a hook's bytes or validating its declaration.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum HookError {
    /// A typed (non-[`PatchType::Raw`]) patch address was not aligned to its type's natural
    /// alignment.
    #[error("address {addr:#010X} is not aligned to {alignment} bytes for this patch type")]
    Misaligned {
        /// The offending address.
        addr: u32,
        /// The required alignment, in bytes.
        alignment: u32,
    },
    /// A scalar value fell outside the representable range of its declared type.
    #[error("value out of range for patch type")]
    ValueOutOfRange,
    /// `data` was not valid hex, or had an odd number of hex digits.
    #[error("invalid hex string in raw patch data")]
    InvalidHexData,
    /// A string encoded under the chosen charset did not fit the type's storage (e.g. a wide
    /// character that encodes to more than two bytes).
    #[error("failed to encode string data")]
    EncodingFailed,
    /// The requested encoding isn't one of the type's allowed encodings.
    #[error("encoding not allowed for this patch type")]
    EncodingNotAllowed,
    /// A branch or function-pointer hook referenced a symbol that isn't in the resolved symbol
    /// table.
    #[error("function symbol not found: {0}")]
    SymbolNotFound(String),
    /// A hook document's `type` field didn't match any recognized hook kind.
    #[error("unrecognized hook type: {0:?}")]
    UnknownType(String),
    /// A hook document was missing a field required by its kind, or the field had the wrong
    /// shape.
    #[error("malformed hook definition: {0}")]
    MalformedDoc(&'static str),
}

/// Character encoding used for [`PatchType::String`]/[`PatchType::WChar`]/[`PatchType::WString`]
/// patch data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Shift-JIS, the default for all string-like types.
    ShiftJis,
    /// UTF-8, allowed only for [`PatchType::String`].
    Utf8,
    /// UCS-2 (big-endian), allowed only for [`PatchType::WChar`]/[`PatchType::WString`].
    Ucs2,
}

impl Encoding {
    /// Parses one of the accepted spellings (`Shift-JIS`/`ShiftJIS`/`shift-jis`/`shiftjis`,
    /// `UTF-8`/`UTF8`/`utf-8`/`utf8`, `UCS-2`/`UCS2`/`ucs-2`/`ucs2`).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "Shift-JIS" | "ShiftJIS" | "shift-jis" | "shiftjis" => Some(Encoding::ShiftJis),
            "UTF-8" | "UTF8" | "utf-8" | "utf8" => Some(Encoding::Utf8),
            "UCS-2" | "UCS2" | "ucs-2" | "ucs2" => Some(Encoding::Ucs2),
            _ => None,
        }
    }
}

flags! {
    /// Orthogonal modifier flag for [`PatchType`]: whether `data` is a single scalar or an array.
    pub enum PatchTypeFlag: u8 {
        /// `data` is a list of values rather than one scalar.
        Array = 0x01,
    }
}

/// The scalar kind of a [`Hook::Patch`]'s data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchScalar {
    /// Verbatim hex bytes; `data` is a hex string rather than a scalar value.
    Raw,
    /// Unsigned 8-bit integer.
    U8,
    /// Unsigned 16-bit integer.
    U16,
    /// Unsigned 32-bit integer.
    U32,
    /// Unsigned 64-bit integer.
    U64,
    /// Signed 8-bit integer.
    S8,
    /// Signed 16-bit integer.
    S16,
    /// Signed 32-bit integer.
    S32,
    /// Signed 64-bit integer.
    S64,
    /// 32-bit IEEE-754 float.
    F32,
    /// 64-bit IEEE-754 float.
    F64,
    /// A single ASCII character.
    Char,
    /// A NUL-terminated, encoded string.
    String,
    /// A single encoded wide character, left-padded to two bytes.
    WChar,
    /// A NUL-terminated, encoded wide string.
    WString,
}

impl PatchScalar {
    /// The natural alignment, in bytes, patch addresses of this type must satisfy.
    pub fn alignment(self) -> u32 {
        match self {
            PatchScalar::Raw => 1,
            PatchScalar::U8 | PatchScalar::S8 | PatchScalar::Char => 1,
            PatchScalar::U16 | PatchScalar::S16 | PatchScalar::WChar => 2,
            PatchScalar::U32 | PatchScalar::S32 | PatchScalar::F32 | PatchScalar::String => 4,
            PatchScalar::U64 | PatchScalar::S64 | PatchScalar::F64 => 8,
            PatchScalar::WString => 4,
        }
    }

    /// The encodings allowed for this type, empty for non-string types.
    pub fn allowed_encodings(self) -> &'static [Encoding] {
        match self {
            PatchScalar::String => &[Encoding::ShiftJis, Encoding::Utf8],
            PatchScalar::WChar | PatchScalar::WString => &[Encoding::ShiftJis, Encoding::Ucs2],
            _ => &[],
        }
    }

    /// The default encoding used when none is specified, or `None` for non-string types.
    pub fn default_encoding(self) -> Option<Encoding> {
        match self {
            PatchScalar::String | PatchScalar::WChar | PatchScalar::WString => {
                Some(Encoding::ShiftJis)
            }
            _ => None,
        }
    }

    /// Parses one of the original tool's type strings (`u8`/`uchar`, `u32[]`/`uint[]`, ...),
    /// returning the scalar kind and whether the `[]` array suffix was present.
    pub fn from_str_loose(s: &str) -> Option<(Self, bool)> {
        let (base, array) = match s.strip_suffix("[]") {
            Some(b) => (b, true),
            None => (s, false),
        };
        let scalar = match base {
            "raw" => PatchScalar::Raw,
            "u8" | "uchar" => PatchScalar::U8,
            "u16" | "ushort" => PatchScalar::U16,
            "u32" | "uint" => PatchScalar::U32,
            "u64" | "ulonglong" => PatchScalar::U64,
            "s8" | "schar" => PatchScalar::S8,
            "s16" | "short" => PatchScalar::S16,
            "s32" | "int" => PatchScalar::S32,
            "s64" | "longlong" => PatchScalar::S64,
            "f32" | "float" => PatchScalar::F32,
            "f64" | "double" => PatchScalar::F64,
            "char" => PatchScalar::Char,
            "string" => PatchScalar::String,
            "wchar" => PatchScalar::WChar,
            "wstring" => PatchScalar::WString,
            _ => return None,
        };
        Some((scalar, array))
    }
}

/// A single patch value, already validated against its declared [`PatchScalar`]'s range.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchValue {
    /// Raw hex-decoded bytes (used only with [`PatchScalar::Raw`], one value for the whole hook).
    Raw(Vec<u8>),
    /// An integer value, reinterpreted per the scalar kind at encode time.
    Int(i128),
    /// A floating-point value.
    Float(f64),
    /// An already charset-encoded byte string (for [`PatchScalar::Char`]/`String`/`WChar`/
    /// `WString`, encoding happens at hook-construction time, as in the original tool).
    Bytes(Vec<u8>),
}

/// A `Patch` hook: writes typed or raw data at one or more addresses.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchHook {
    /// Patch addresses.
    pub addresses: Vec<u32>,
    /// The scalar kind of `values`.
    pub scalar: PatchScalar,
    /// Whether this hook carries an array of values (`values.len() > 1` is only valid when set).
    pub array: FlagSet<PatchTypeFlag>,
    /// The chosen encoding, if `scalar` is string-like.
    pub encoding: Option<Encoding>,
    /// The (already-validated, already-encoded where applicable) data.
    pub values: Vec<PatchValue>,
}

impl PatchHook {
    /// Computes this hook's bytes. `Raw` ignores alignment/padding; typed data is packed
    /// big-endian with each element padded up to the type's alignment before being appended.
    pub fn bytes(&self) -> Result<Vec<u8>, HookError> {
        if self.scalar == PatchScalar::Raw {
            let PatchValue::Raw(bytes) = &self.values[0] else {
                return Err(HookError::InvalidHexData);
            };
            return Ok(bytes.clone());
        }

        let be = Endianness::Big;
        let alignment = self.scalar.alignment();
        let mut out = Vec::new();

        for value in &self.values {
            let cur = out.len() as u32;
            let pad = align(cur, alignment) - cur;
            out.extend(std::iter::repeat(0u8).take(pad as usize));

            match (self.scalar, value) {
                (PatchScalar::U8, PatchValue::Int(v)) => out.push(*v as u8),
                (PatchScalar::U16, PatchValue::Int(v)) => {
                    out.extend_from_slice(&be.u16_to_bytes(*v as u16))
                }
                (PatchScalar::U32, PatchValue::Int(v)) => {
                    out.extend_from_slice(&be.u32_to_bytes(*v as u32))
                }
                (PatchScalar::U64, PatchValue::Int(v)) => {
                    out.extend_from_slice(&(*v as u64).to_be_bytes())
                }
                (PatchScalar::S8, PatchValue::Int(v)) => out.push(*v as i8 as u8),
                (PatchScalar::S16, PatchValue::Int(v)) => {
                    out.extend_from_slice(&(*v as i16).to_be_bytes())
                }
                (PatchScalar::S32, PatchValue::Int(v)) => {
                    out.extend_from_slice(&be.i32_to_bytes(*v as i32))
                }
                (PatchScalar::S64, PatchValue::Int(v)) => {
                    out.extend_from_slice(&(*v as i64).to_be_bytes())
                }
                (PatchScalar::F32, PatchValue::Float(v)) => {
                    out.extend_from_slice(&(*v as f32).to_be_bytes())
                }
                (PatchScalar::F64, PatchValue::Float(v)) => out.extend_from_slice(&v.to_be_bytes()),
                (PatchScalar::Char, PatchValue::Bytes(b))
                | (PatchScalar::String, PatchValue::Bytes(b))
                | (PatchScalar::WChar, PatchValue::Bytes(b))
                | (PatchScalar::WString, PatchValue::Bytes(b)) => out.extend_from_slice(b),
                _ => return Err(HookError::ValueOutOfRange),
            }
        }

        Ok(out)
    }
}

/// A `NOP` hook: repeats the PowerPC `nop` opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NopHook {
    /// Number of `nop` words to emit; must be at least 1.
    pub count: u32,
    /// Patch address.
    pub address: u32,
}

impl NopHook {
    /// The PowerPC `nop` instruction word.
    pub const NOP_WORD: u32 = 0x6000_0000;

    /// Returns `count` copies of the big-endian `nop` word.
    pub fn bytes(&self) -> Vec<u8> {
        let be = Endianness::Big;
        let mut out = Vec::with_capacity(self.count as usize * 4);
        for _ in 0..self.count {
            out.extend_from_slice(&be.u32_to_bytes(Self::NOP_WORD));
        }
        out
    }
}

/// A `Return` hook: always emits the PowerPC `blr` opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnHook {
    /// Patch address.
    pub address: u32,
}

impl ReturnHook {
    /// The PowerPC `blr` instruction word.
    pub const BLR_WORD: u32 = 0x4E80_0020;

    /// Returns the big-endian `blr` word.
    pub fn bytes(&self) -> [u8; 4] {
        Endianness::Big.u32_to_bytes(Self::BLR_WORD)
    }
}

/// The PowerPC instruction a [`BranchHook`] emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    /// `b` — branch without updating the link register.
    Branch,
    /// `bl` — branch and link.
    BranchLink,
}

impl BranchKind {
    /// Parses `"b"`/`"bl"`.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "b" => Some(BranchKind::Branch),
            "bl" => Some(BranchKind::BranchLink),
            _ => None,
        }
    }
}

/// A `Branch` hook: emits a PowerPC `b`/`bl` instruction targeting a resolved symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchHook {
    /// Patch addresses.
    pub addresses: Vec<u32>,
    /// `b` or `bl`.
    pub kind: BranchKind,
    /// The symbol name the branch targets.
    pub symbol: String,
    cache: HashMap<(u32, u32), [u8; 4]>,
}

impl BranchHook {
    /// Creates a new branch hook with an empty cache.
    pub fn new(addresses: Vec<u32>, kind: BranchKind, symbol: String) -> Self {
        Self {
            addresses,
            kind,
            symbol,
            cache: HashMap::new(),
        }
    }

    /// Encodes the branch word for a specific `(patch, target)` address pair, memoizing the
    /// result by the pair so repeated encodes at the same addresses are free.
    pub fn bytes(
        &mut self,
        patch_addr: u32,
        symbols: &HashMap<String, u32>,
    ) -> Result<[u8; 4], HookError> {
        let target = *symbols
            .get(self.symbol.trim())
            .or_else(|| symbols.get(&self.symbol))
            .ok_or_else(|| HookError::SymbolNotFound(self.symbol.clone()))?;

        let key = (patch_addr, target);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(*cached);
        }

        let offset = target.wrapping_sub(patch_addr) & 0x03FF_FFFC;
        let mut instruction = 0x4800_0000 | offset;
        if self.kind == BranchKind::BranchLink {
            instruction |= 1;
        }

        let bytes = Endianness::Big.u32_to_bytes(instruction);
        self.cache.insert(key, bytes);
        Ok(bytes)
    }
}

/// A `FuncPtr` hook: writes the resolved address of a symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncPtrHook {
    /// Patch addresses.
    pub addresses: Vec<u32>,
    /// The symbol whose address is written.
    pub symbol: String,
    cache: HashMap<u32, [u8; 4]>,
}

impl FuncPtrHook {
    /// Creates a new function-pointer hook with an empty cache.
    pub fn new(addresses: Vec<u32>, symbol: String) -> Self {
        Self {
            addresses,
            symbol,
            cache: HashMap::new(),
        }
    }

    /// Encodes the resolved address, memoized by the resolved target address.
    pub fn bytes(&mut self, symbols: &HashMap<String, u32>) -> Result<[u8; 4], HookError> {
        let target = *symbols
            .get(self.symbol.trim())
            .or_else(|| symbols.get(&self.symbol))
            .ok_or_else(|| HookError::SymbolNotFound(self.symbol.clone()))?;

        if let Some(cached) = self.cache.get(&target) {
            return Ok(*cached);
        }

        let bytes = Endianness::Big.u32_to_bytes(target);
        self.cache.insert(target, bytes);
        Ok(bytes)
    }
}

/// A typed, addressed patch to be applied to a section's bytes.
#[derive(Debug, Clone)]
pub enum Hook {
    /// See [`PatchHook`].
    Patch(PatchHook),
    /// See [`NopHook`].
    Nop(NopHook),
    /// See [`ReturnHook`].
    Return(ReturnHook),
    /// See [`BranchHook`].
    Branch(BranchHook),
    /// See [`FuncPtrHook`].
    FuncPtr(FuncPtrHook),
}

impl Hook {
    /// All patch addresses this hook applies to.
    pub fn addresses(&self) -> &[u32] {
        match self {
            Hook::Patch(h) => &h.addresses,
            Hook::Nop(h) => std::slice::from_ref(&h.address),
            Hook::Return(h) => std::slice::from_ref(&h.address),
            Hook::Branch(h) => &h.addresses,
            Hook::FuncPtr(h) => &h.addresses,
        }
    }

    /// Computes the bytes to write at `addr` (one of [`Hook::addresses`]).
    pub fn bytes(&mut self, addr: u32, symbols: &HashMap<String, u32>) -> Result<Vec<u8>, HookError> {
        match self {
            Hook::Patch(h) => h.bytes(),
            Hook::Nop(h) => Ok(h.bytes()),
            Hook::Return(h) => Ok(h.bytes().to_vec()),
            Hook::Branch(h) => h.bytes(addr, symbols).map(|b| b.to_vec()),
            Hook::FuncPtr(h) => h.bytes(symbols).map(|b| b.to_vec()),
        }
    }
}

/// One or more `u32` addresses, accepting either a single scalar or a list in YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AddrDoc {
    /// `addr: 0x02000000`
    Single(u32),
    /// `addr: [0x02000000, 0x02000100]`
    Multi(Vec<u32>),
}

impl AddrDoc {
    fn into_vec(self) -> Vec<u32> {
        match self {
            AddrDoc::Single(a) => vec![a],
            AddrDoc::Multi(a) => a,
        }
    }
}

/// The untyped shape of one `Hooks` list entry, as it appears in a module's YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookDoc {
    #[serde(rename = "type")]
    pub kind: String,
    pub addr: AddrDoc,
    pub data: Option<serde_yaml::Value>,
    pub datatype: Option<String>,
    pub encoding: Option<String>,
    pub count: Option<u32>,
    pub instr: Option<String>,
    pub func: Option<String>,
}

impl Hook {
    /// Resolves one raw `Hooks` list entry into a concrete [`Hook`] variant, dispatching on
    /// `type`.
    pub fn from_doc(doc: &HookDoc) -> Result<Hook, HookError> {
        match doc.kind.as_str() {
            "patch" => Self::patch_from_doc(doc),
            "nop" => {
                let addresses = doc.addr.clone().into_vec();
                let address = *addresses.first().ok_or(HookError::MalformedDoc("addr"))?;
                let count = doc.count.unwrap_or(1);
                Ok(Hook::Nop(NopHook { count, address }))
            }
            "return" => {
                let addresses = doc.addr.clone().into_vec();
                let address = *addresses.first().ok_or(HookError::MalformedDoc("addr"))?;
                Ok(Hook::Return(ReturnHook { address }))
            }
            "branch" => {
                let addresses = doc.addr.clone().into_vec();
                let instr = doc.instr.as_deref().unwrap_or("b");
                let kind =
                    BranchKind::from_str_loose(instr).ok_or(HookError::MalformedDoc("instr"))?;
                let symbol = doc.func.clone().ok_or(HookError::MalformedDoc("func"))?;
                Ok(Hook::Branch(BranchHook::new(addresses, kind, symbol)))
            }
            "funcptr" => {
                let addresses = doc.addr.clone().into_vec();
                let symbol = doc.func.clone().ok_or(HookError::MalformedDoc("func"))?;
                Ok(Hook::FuncPtr(FuncPtrHook::new(addresses, symbol)))
            }
            other => Err(HookError::UnknownType(other.to_string())),
        }
    }

    fn patch_from_doc(doc: &HookDoc) -> Result<Hook, HookError> {
        let addresses = doc.addr.clone().into_vec();

        let (scalar, is_array) = match &doc.datatype {
            None => (PatchScalar::Raw, false),
            Some(s) => {
                PatchScalar::from_str_loose(s).ok_or(HookError::MalformedDoc("datatype"))?
            }
        };

        let alignment = scalar.alignment();
        for addr in &addresses {
            if scalar != PatchScalar::Raw && addr % alignment != 0 {
                return Err(HookError::Misaligned {
                    addr: *addr,
                    alignment,
                });
            }
        }

        let encoding = match (&doc.encoding, scalar.default_encoding()) {
            (Some(s), _) => {
                let e = Encoding::from_str_loose(s).ok_or(HookError::EncodingNotAllowed)?;
                if !scalar.allowed_encodings().contains(&e) {
                    return Err(HookError::EncodingNotAllowed);
                }
                Some(e)
            }
            (None, default) => default,
        };

        let raw_data = doc.data.as_ref().ok_or(HookError::InvalidHexData)?;

        let values = if scalar == PatchScalar::Raw {
            let s = raw_data.as_str().ok_or(HookError::InvalidHexData)?;
            vec![PatchValue::Raw(decode_hex(s)?)]
        } else {
            let items: Vec<&serde_yaml::Value> = if is_array {
                raw_data
                    .as_sequence()
                    .ok_or(HookError::ValueOutOfRange)?
                    .iter()
                    .collect()
            } else {
                vec![raw_data]
            };

            items
                .into_iter()
                .map(|v| value_from_yaml(v, scalar, encoding))
                .collect::<Result<Vec<_>, _>>()?
        };

        let array = if is_array {
            PatchTypeFlag::Array.into()
        } else {
            FlagSet::default()
        };

        Ok(Hook::Patch(PatchHook {
            addresses,
            scalar,
            array,
            encoding,
            values,
        }))
    }
}

fn value_from_yaml(
    v: &serde_yaml::Value,
    scalar: PatchScalar,
    encoding: Option<Encoding>,
) -> Result<PatchValue, HookError> {
    match scalar {
        PatchScalar::F32 | PatchScalar::F64 => {
            let f = v.as_f64().ok_or(HookError::ValueOutOfRange)?;
            Ok(PatchValue::Float(f))
        }
        PatchScalar::Char => {
            let s = v.as_str().ok_or(HookError::ValueOutOfRange)?;
            let c = s.chars().next().ok_or(HookError::ValueOutOfRange)?;
            Ok(PatchValue::Bytes(encode_char(
                c,
                encoding.unwrap_or(Encoding::ShiftJis),
            )?))
        }
        PatchScalar::String => {
            let s = v.as_str().ok_or(HookError::ValueOutOfRange)?;
            Ok(PatchValue::Bytes(encode_cstring(
                s,
                encoding.unwrap_or(Encoding::ShiftJis),
            )?))
        }
        PatchScalar::WChar => {
            let s = v.as_str().ok_or(HookError::ValueOutOfRange)?;
            let c = s.chars().next().ok_or(HookError::ValueOutOfRange)?;
            Ok(PatchValue::Bytes(
                encode_wide_char(c, encoding.unwrap_or(Encoding::ShiftJis))?.to_vec(),
            ))
        }
        PatchScalar::WString => {
            let s = v.as_str().ok_or(HookError::ValueOutOfRange)?;
            Ok(PatchValue::Bytes(encode_wstring(
                s,
                encoding.unwrap_or(Encoding::ShiftJis),
            )?))
        }
        PatchScalar::Raw => unreachable!("Raw handled separately"),
        _ => {
            let i = v.as_i64().ok_or(HookError::ValueOutOfRange)?;
            Ok(PatchValue::Int(i as i128))
        }
    }
}

/// `align(x, a) = ((x - 1) | (a - 1)) + 1`, the alignment helper used throughout the build
/// pipeline (link addresses, patch padding, section placement).
pub fn align(x: u32, a: u32) -> u32 {
    ((x.wrapping_sub(1)) | (a - 1)).wrapping_add(1)
}

/// Decodes a whitespace-stripped, even-length hex string into raw bytes.
pub fn decode_hex(s: &str) -> Result<Vec<u8>, HookError> {
    let stripped: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if stripped.is_empty() || stripped.len() % 2 != 0 {
        return Err(HookError::InvalidHexData);
    }
    let mut out = Vec::with_capacity(stripped.len() / 2);
    let bytes = stripped.as_bytes();
    for pair in bytes.chunks(2) {
        let hi = (pair[0] as char).to_digit(16).ok_or(HookError::InvalidHexData)?;
        let lo = (pair[1] as char).to_digit(16).ok_or(HookError::InvalidHexData)?;
        out.push(((hi << 4) | lo) as u8);
    }
    Ok(out)
}

/// Encodes one character into Shift-JIS, UTF-8, or UCS-2 (big-endian) bytes.
pub fn encode_char(c: char, encoding: Encoding) -> Result<Vec<u8>, HookError> {
    match encoding {
        Encoding::Utf8 => {
            let mut buf = [0u8; 4];
            Ok(c.encode_utf8(&mut buf).as_bytes().to_vec())
        }
        Encoding::Ucs2 => {
            let mut units = [0u16; 2];
            let encoded = c.encode_utf16(&mut units);
            if encoded.len() != 1 {
                return Err(HookError::EncodingFailed);
            }
            Ok(Endianness::Big.u16_to_bytes(encoded[0]).to_vec())
        }
        Encoding::ShiftJis => encode_shift_jis_char(c),
    }
}

/// Encodes a [`PatchScalar::String`] as Shift-JIS or UTF-8, followed by a single trailing NUL
/// byte. Not used for wide strings; see [`encode_wstring`] for the per-character-padded form
/// `WString` requires.
pub fn encode_cstring(s: &str, encoding: Encoding) -> Result<Vec<u8>, HookError> {
    let mut out = Vec::new();
    for c in s.chars() {
        out.extend(encode_char(c, encoding)?);
    }
    out.push(0);
    Ok(out)
}

/// Encodes a single wide character, left-padded with NUL to exactly two bytes. Fails if the
/// encoded form of the character is more than two bytes (e.g. a Shift-JIS character outside the
/// single-byte range that still doesn't fit two bytes, which cannot happen, but a UTF-8-only
/// character fed through UCS-2 can).
pub fn encode_wide_char(c: char, encoding: Encoding) -> Result<[u8; 2], HookError> {
    let bytes = encode_char(c, encoding)?;
    if bytes.len() > 2 {
        return Err(HookError::EncodingFailed);
    }
    let mut out = [0u8; 2];
    out[2 - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

/// Encodes a [`PatchScalar::WString`]: each character left-padded to two bytes via
/// [`encode_wide_char`], followed by a two-byte wide NUL terminator (itself just the padded
/// encoding of `'\0'`).
pub fn encode_wstring(s: &str, encoding: Encoding) -> Result<Vec<u8>, HookError> {
    let mut out = Vec::new();
    for c in s.chars() {
        out.extend_from_slice(&encode_wide_char(c, encoding)?);
    }
    out.extend_from_slice(&encode_wide_char('\0', encoding)?);
    Ok(out)
}

/// Minimal Shift-JIS encoder covering the ASCII subset (0x00..=0x7F maps byte-for-byte); this is
/// the common case for the identifiers and ASCII literals hooks actually patch. A full Shift-JIS
/// table is out of scope; non-ASCII input returns [`HookError::EncodingFailed`].
fn encode_shift_jis_char(c: char) -> Result<Vec<u8>, HookError> {
    if c as u32 <= 0x7F {
        Ok(vec![c as u8])
    } else {
        Err(HookError::EncodingFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nop_three() {
        let hook = NopHook {
            count: 3,
            address: 0x0200_0000,
        };
        assert_eq!(
            hook.bytes(),
            vec![0x60, 0, 0, 0, 0x60, 0, 0, 0, 0x60, 0, 0, 0]
        );
    }

    #[test]
    fn return_hook_bytes() {
        let hook = ReturnHook {
            address: 0x0200_0000,
        };
        assert_eq!(hook.bytes(), [0x4E, 0x80, 0x00, 0x20]);
    }

    #[test]
    fn branch_link_word() {
        let mut hook = BranchHook::new(vec![0x0210_0000], BranchKind::BranchLink, "foo".into());
        let mut symbols = HashMap::new();
        symbols.insert("foo".to_string(), 0x0210_0100);
        let bytes = hook.bytes(0x0210_0000, &symbols).unwrap();
        assert_eq!(bytes, [0x48, 0x00, 0x01, 0x01]);
    }

    #[test]
    fn branch_symbol_missing() {
        let mut hook = BranchHook::new(vec![0x0210_0000], BranchKind::Branch, "missing".into());
        let symbols = HashMap::new();
        assert!(hook.bytes(0x0210_0000, &symbols).is_err());
    }

    #[test]
    fn patch_u32_array() {
        let hook = PatchHook {
            addresses: vec![0x1000_0000],
            scalar: PatchScalar::U32,
            array: PatchTypeFlag::Array.into(),
            encoding: None,
            values: vec![
                PatchValue::Int(0x11223344),
                PatchValue::Int(0x55667788),
            ],
        };
        assert_eq!(
            hook.bytes().unwrap(),
            vec![0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]
        );
    }

    #[test]
    fn wstring_ucs2_single_char() {
        let encoded = encode_wstring("A", Encoding::Ucs2).unwrap();
        assert_eq!(encoded, vec![0x00, 0x41, 0x00, 0x00]);
    }

    #[test]
    fn wstring_shift_jis_default_pads_each_char() {
        let encoded = encode_wstring("AB", Encoding::ShiftJis).unwrap();
        assert_eq!(
            encoded,
            vec![0x00, 0x41, 0x00, 0x42, 0x00, 0x00],
            "each char left-padded to two bytes, plus a two-byte wide NUL terminator"
        );
    }

    #[test]
    fn align_helper() {
        assert_eq!(align(0, 4), 0);
        assert_eq!(align(1, 4), 4);
        assert_eq!(align(4, 4), 4);
        assert_eq!(align(5, 4), 8);
    }

    #[test]
    fn hex_decode_rejects_odd_length() {
        assert!(decode_hex("ABC").is_err());
        assert_eq!(decode_hex("AB CD").unwrap(), vec![0xAB, 0xCD]);
    }
}
