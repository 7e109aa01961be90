//! Line-oriented parsers for the two small text formats the build pipeline consumes:
//! the address-conversion map (`.offs` by default) and the symbol map.
//!
//! These formats are simple enough that a full tokenizer/AST is disproportionate; both parsers
//! strip comments and blank lines, split on `;`-terminated statements, and validate each
//! statement's shape directly.

use std::collections::HashMap;

use thiserror::Error;

use crate::addrmap::{AddrMapError, AddressMap, PlatformKind, PlatformTable};

/// Errors raised while parsing either text format.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SymMapError {
    /// A statement didn't match any recognized shape.
    #[error("malformed statement: {0:?}")]
    MalformedStatement(String),
    /// A hex or decimal integer literal could not be parsed.
    #[error("invalid integer literal: {0:?}")]
    InvalidInteger(String),
    /// A symbol alias referred to a name not yet defined earlier in the file.
    #[error("forward reference to undefined symbol: {0:?}")]
    ForwardReference(String),
    /// The address-conversion map reported a semantic error (duplicate/unknown platform).
    #[error(transparent)]
    AddrMap(#[from] AddrMapError),
}

fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn parse_int(s: &str) -> Result<i64, SymMapError> {
    let s = s.trim();
    let (neg, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).map_err(|_| SymMapError::InvalidInteger(s.to_string()))?
    } else {
        s.parse::<i64>()
            .map_err(|_| SymMapError::InvalidInteger(s.to_string()))?
    };
    Ok(if neg { -value } else { value })
}

fn parse_u32_hex_or_dec(s: &str) -> Result<u32, SymMapError> {
    Ok(parse_int(s)? as u32)
}

/// Parses the symbol-map text format: statements of the form
/// `identifier = identifier ;` or `identifier = 0xHEX ;`, one per (logical, `;`-terminated) line.
/// Alias targets must have been defined earlier in the file.
pub fn parse_symbol_map(text: &str) -> Result<HashMap<String, u32>, SymMapError> {
    let mut symbols = HashMap::new();

    for raw_stmt in text.split(';') {
        let stmt = strip_comment(raw_stmt).trim();
        if stmt.is_empty() {
            continue;
        }

        let (name, value) = stmt
            .split_once('=')
            .ok_or_else(|| SymMapError::MalformedStatement(stmt.to_string()))?;
        let name = name.trim();
        let value = value.trim();

        if name.is_empty() || value.is_empty() {
            return Err(SymMapError::MalformedStatement(stmt.to_string()));
        }

        let resolved = if value.starts_with("0x") || value.starts_with("0X") || value.starts_with('-')
            || value.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false)
        {
            parse_u32_hex_or_dec(value)?
        } else {
            *symbols
                .get(value)
                .ok_or_else(|| SymMapError::ForwardReference(value.to_string()))?
        };

        symbols.insert(name.to_string(), resolved);
    }

    Ok(symbols)
}

/// Parses the address-conversion-map text format:
///
/// ```text
/// TextAddr = 0x02000000;
/// DataAddr = 0x10000000;
///
/// .platform Console = CafeLoader extends Base {
///     0x02000000-0x10000000: +0;
/// }
/// .platform Emulator extends Base {
///     0x02000000-0x03000000: +0x10000000;
/// }
/// ```
///
/// A bare `.platform Base { ... }` block (or ranges given before any `.platform` directive) feeds
/// the root `Base` table. A `Console = CafeLoader` header selects [`PlatformKind::CafeLoader`]
/// rather than a literal `Console` kind, since the resolver only distinguishes
/// base/emulator/console.
pub fn parse_address_map(text: &str) -> Result<AddressMap, SymMapError> {
    let mut map = AddressMap::new();
    let mut current: Option<(PlatformKind, PlatformTable)> = None;

    let flush = |map: &mut AddressMap, current: Option<(PlatformKind, PlatformTable)>| -> Result<(), SymMapError> {
        if let Some((kind, table)) = current {
            if kind == PlatformKind::Base {
                // Merge into the existing Base table rather than re-declaring it.
                let base = map.tables_mut(PlatformKind::Base);
                for range in table.ranges() {
                    base.push_range(range.lo, range.hi, range.offset);
                }
            } else {
                map.declare(kind, table)?;
            }
        }
        Ok(())
    };

    for raw_line in text.lines() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() || line == "{" || line == "}" {
            continue;
        }

        if let Some(rest) = line.strip_prefix("TextAddr") {
            let rest = rest.trim_start_matches('=').trim().trim_end_matches(';');
            map.text_addr = Some(parse_u32_hex_or_dec(rest)?);
            continue;
        }
        if let Some(rest) = line.strip_prefix("DataAddr") {
            let rest = rest.trim_start_matches('=').trim().trim_end_matches(';');
            map.data_addr = Some(parse_u32_hex_or_dec(rest)?);
            continue;
        }

        if let Some(rest) = line.strip_prefix(".platform") {
            flush(&mut map, current.take())?;

            let rest = rest.trim().trim_end_matches('{').trim();
            let (header, extends) = match rest.split_once("extends") {
                Some((h, e)) => (h.trim(), Some(e.trim())),
                None => (rest, None),
            };
            let (name, alias) = match header.split_once('=') {
                Some((n, a)) => (n.trim(), Some(a.trim())),
                None => (header, None),
            };

            let kind = match (name, alias) {
                (_, Some(a)) if matches!(a, "cfl" | "cafeloader" | "CafeLoader") => {
                    PlatformKind::CafeLoader
                }
                ("Emulator", _) => PlatformKind::Emulator,
                ("Base", _) => PlatformKind::Base,
                _ => PlatformKind::CafeLoader,
            };

            let extends_kind = match extends {
                Some("Base") | None => Some(PlatformKind::Base),
                Some(_) => Some(PlatformKind::Base),
            };

            current = Some((
                kind,
                PlatformTable::new(if kind == PlatformKind::Base {
                    None
                } else {
                    extends_kind
                }),
            ));
            continue;
        }

        // Range entry: `LO-HI : +-OFF;` (hyphen-separated bounds, unprefixed hex by convention).
        let stmt = line.trim_end_matches(';');
        let (range_part, offset_part) = stmt
            .split_once(':')
            .ok_or_else(|| SymMapError::MalformedStatement(stmt.to_string()))?;
        let (lo_s, hi_s) = range_part
            .trim()
            .split_once('-')
            .ok_or_else(|| SymMapError::MalformedStatement(stmt.to_string()))?;

        let lo = u32::from_str_radix(lo_s.trim(), 16)
            .map_err(|_| SymMapError::InvalidInteger(lo_s.to_string()))?;
        let hi = u32::from_str_radix(hi_s.trim(), 16)
            .map_err(|_| SymMapError::InvalidInteger(hi_s.to_string()))?;
        let offset = parse_int(offset_part.trim().trim_start_matches('+'))?;

        match current.as_mut() {
            Some((_, table)) => table.push_range(lo, hi, offset),
            None => {
                let base = map.tables_mut(PlatformKind::Base);
                base.push_range(lo, hi, offset);
            }
        }
    }

    flush(&mut map, current.take())?;
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_map_simple() {
        let text = "foo = 0x02000000; bar = foo;";
        let symbols = parse_symbol_map(text).unwrap();
        assert_eq!(symbols["foo"], 0x0200_0000);
        assert_eq!(symbols["bar"], 0x0200_0000);
    }

    #[test]
    fn symbol_map_forward_reference_errors() {
        let text = "bar = foo; foo = 0x1;";
        assert!(parse_symbol_map(text).is_err());
    }

    #[test]
    fn address_map_base_range() {
        let text = "02000000-10000000: +0;";
        let map = parse_address_map(text).unwrap();
        assert_eq!(map.resolve(PlatformKind::Base, 0x0300_0000).unwrap(), 0x0300_0000);
    }

    #[test]
    fn address_map_with_platform_block() {
        let text = "\
TextAddr = 0x02000000;
DataAddr = 0x10000000;
02000000-10000000: +0;
.platform Emulator extends Base {
    02000000-03000000: +10000000;
}
";
        let map = parse_address_map(text).unwrap();
        assert_eq!(map.text_addr, Some(0x0200_0000));
        assert_eq!(
            map.resolve(PlatformKind::Emulator, 0x0200_1000).unwrap(),
            0x1200_1000
        );
    }
}
