//! Text generators for the three build-description files handed to the external compiler and
//! linker: the `.gpj` project file, the `.ld` memory/section layout, and the `.x` symbol map.
//!
//! Actually invoking the external toolchain is out of scope for this crate (see the crate's
//! top-level documentation); these functions only produce the text it would consume.

use std::collections::HashMap;
use std::path::Path;

/// Which platform a build targets, for the `-DPLATFORM_IS_*` defines threaded into the `.gpj`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPlatform {
    /// The PC-hosted emulator.
    Emulator,
    /// The Wii U console loader.
    CafeLoader,
}

/// Per-section alignments used by both the `.gpj` defines and the `.ld` `SECTIONS` block.
#[derive(Debug, Clone, Copy)]
pub struct SectionAlignment {
    /// `.text` alignment.
    pub text: u32,
    /// `.rodata` alignment.
    pub rodata: u32,
    /// `.data` alignment.
    pub data: u32,
    /// `.bss` alignment.
    pub bss: u32,
}

impl SectionAlignment {
    /// Combines two alignment sets field-by-field by [`u32::max`], the rule used to fold a
    /// module's overrides together with the project's own minimums.
    pub fn combine(&self, other: &SectionAlignment) -> SectionAlignment {
        SectionAlignment {
            text: self.text.max(other.text),
            rodata: self.rodata.max(other.rodata),
            data: self.data.max(other.data),
            bss: self.bss.max(other.bss),
        }
    }
}

impl Default for SectionAlignment {
    /// `1` for every section: "no additional constraint" when folded with [`SectionAlignment::combine`].
    fn default() -> Self {
        SectionAlignment { text: 1, rodata: 1, data: 1, bss: 1 }
    }
}

/// Renders the `.gpj` gbuild project file: toolchain header, platform/address defines, default
/// and per-target build options, include directories, and the module source-file list (tagged
/// `[C]`/`[C++]`/`[Assembly]`, matching the compiler's own file-type suffix convention).
#[allow(clippy::too_many_arguments)]
pub fn render_gpj(
    obj_dir: &Path,
    platform: BuildPlatform,
    text_addr: u32,
    data_addr: u32,
    default_build_options: &HashMap<String, Option<String>>,
    include_dirs: &[std::path::PathBuf],
    extra_build_options: &[String],
    c_files: &[std::path::PathBuf],
    cxx_files: &[std::path::PathBuf],
    asm_files: &[std::path::PathBuf],
) -> String {
    let mut lines = Vec::new();

    lines.push("#!gbuild".to_string());
    lines.push("primaryTarget=ppc_cos_ndebug.tgt".to_string());
    lines.push("[Project]".to_string());
    lines.push(format!(
        "\t-object_dir=\"{}\"",
        obj_dir.to_string_lossy().replace('\\', "/")
    ));
    lines.push("\t--no_commons".to_string());
    lines.push("\t-cpu=espresso".to_string());
    lines.push("\t-sda=none".to_string());
    lines.push("\t-MD".to_string());
    lines.push("\t-Dcafe".to_string());

    lines.push(format!(
        "\t-DPLATFORM_IS_EMULATOR={}",
        (platform == BuildPlatform::Emulator) as u8
    ));
    lines.push(format!(
        "\t-DPLATFORM_IS_CONSOLE={}",
        (platform != BuildPlatform::Emulator) as u8
    ));
    lines.push(format!(
        "\t-DPLATFORM_IS_CONSOLE_CAFELOADER={}",
        (platform == BuildPlatform::CafeLoader) as u8
    ));
    lines.push(format!("\t-DTEXT_ADDR=0x{text_addr:08X}"));
    lines.push(format!("\t-DDATA_ADDR=0x{data_addr:08X}"));

    for (option, value) in default_build_options {
        match value {
            Some(v) => lines.push(format!("\t{option}={v}")),
            None => lines.push(format!("\t{option}")),
        }
    }

    for dir in include_dirs {
        lines.push(format!(
            "\t-I\"{}\"",
            dir.to_string_lossy().replace('\\', "/")
        ));
    }

    for option in extra_build_options {
        lines.push(format!("\t{option}"));
    }

    for file in c_files {
        lines.push(format!("{} [C]", file.to_string_lossy().replace('\\', "/")));
    }
    for file in cxx_files {
        lines.push(format!(
            "{} [C++]",
            file.to_string_lossy().replace('\\', "/")
        ));
    }
    for file in asm_files {
        lines.push(format!(
            "{} [Assembly]",
            file.to_string_lossy().replace('\\', "/")
        ));
    }

    lines.push(String::new());
    lines.join("\n")
}

/// Renders the `.ld` linker-command memory map: a `codearea`/`dataarea` region pair sized from
/// `text_addr`/`data_addr` up to the fixed `0x10000000`/`0xC0000000` region boundaries, and the
/// `SECTIONS` block assigning `.text`/`.rodata`/`.data`/`.bss` into them at the given alignments.
pub fn render_ld(text_addr: u32, data_addr: u32, align: SectionAlignment) -> String {
    format!(
        "\nMEMORY\n\
         {{\n\
         \x20   codearea : origin = 0x{text_addr:08X}, length = 0x{text_len:08X}\n\
         \x20   dataarea : origin = 0x{data_addr:08X}, length = 0x{data_len:08X}\n\
         }}\n\
         \n\
         OPTION(\"-append\")\n\
         \n\
         SECTIONS\n\
         {{\n\
         \x20.text       ALIGN(0x{text_align:04X})   :   > codearea\n\
         \n\
         \x20.rodata     ALIGN(0x{rodata_align:04X})   :   > dataarea\n\
         \x20.data       ALIGN(0x{data_align:04X})   :   > dataarea\n\
         \x20.bss        ALIGN(0x{bss_align:04X})   :   > dataarea\n\
         }}\n",
        text_len = 0x1000_0000u32.wrapping_sub(text_addr),
        data_len = 0xC000_0000u32.wrapping_sub(data_addr),
        text_align = align.text,
        rodata_align = align.rodata,
        data_align = align.data,
        bss_align = align.bss,
    )
}

/// Renders the `.x` symbol-address map consumed by the linker's `-T` symbol-table input.
pub fn render_symbol_map(symbols: &HashMap<String, u32>) -> String {
    let mut entries: Vec<(&String, &u32)> = symbols.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let body = entries
        .iter()
        .map(|(name, addr)| format!("\t{name} = 0x{addr:08X};"))
        .collect::<Vec<_>>()
        .join("\n");

    format!("\nSECTIONS {{\n\n{body}\n\n}}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpj_contains_platform_defines() {
        let rendered = render_gpj(
            Path::new("/tmp/obj"),
            BuildPlatform::CafeLoader,
            0x0210_0000,
            0x1010_0000,
            &HashMap::new(),
            &[],
            &[],
            &[],
            &[],
            &[],
        );
        assert!(rendered.contains("-DPLATFORM_IS_CONSOLE_CAFELOADER=1"));
        assert!(rendered.contains("-DTEXT_ADDR=0x02100000"));
    }

    #[test]
    fn ld_region_lengths() {
        let rendered = render_ld(
            0x0210_0000,
            0x1010_0000,
            SectionAlignment {
                text: 0x20,
                rodata: 0x20,
                data: 0x20,
                bss: 0x20,
            },
        );
        assert!(rendered.contains("origin = 0x02100000, length = 0x0DF00000"));
        assert!(rendered.contains("origin = 0x10100000, length = 0xAFF00000"));
    }

    #[test]
    fn symbol_map_sorted() {
        let mut symbols = HashMap::new();
        symbols.insert("zeta".to_string(), 2u32);
        symbols.insert("alpha".to_string(), 1u32);
        let rendered = render_symbol_map(&symbols);
        let alpha_pos = rendered.find("alpha").unwrap();
        let zeta_pos = rendered.find("zeta").unwrap();
        assert!(alpha_pos < zeta_pos);
    }
}
