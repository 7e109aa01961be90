//! Top-level build orchestration: one `(target, platform)` build ties target/module resolution,
//! address-map resolution, external toolchain invocation, splicing, hook application, and
//! platform-specific output packaging together.
//!
//! Everything in here is glue. The pieces it calls into — [`crate::build`] for splicing and
//! patching, [`crate::linkscript`] for the `.gpj`/`.ld`/`.x` text, [`crate::addrmap`] for address
//! resolution — are self-contained and independently tested; this module's own job is ordering
//! them correctly and shelling out to the external compiler, linker, and RPX packer.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;

use log::info;
use thiserror::Error;

use crate::addrmap::{AddrMapError, AddressMap, PlatformKind};
use crate::build::{self, BuildError, PatchRecord};
use crate::elf::{Elf, ElfError};
use crate::hook::{Hook, HookError};
use crate::linkscript::{self, BuildPlatform};
use crate::module::Module;
use crate::project::Project;
use crate::symmap::{self, SymMapError};

/// Reserved span at the base of a CafeLoader build's data area, ahead of the first patched
/// module's own `.rodata`/`.data`, set aside for the log-output pointer the loader installs.
const CAFE_LOADER_LOG_RESERVE: u32 = 4;

/// Paths to the external toolchain binaries this crate never ships: the compiler/linker driver,
/// the linker itself, and the RPX (de)compressor.
#[derive(Debug, Clone)]
pub struct ToolchainPaths {
    /// `gbuild` (or equivalent) build driver, invoked as `gbuild -top <gpj>`.
    pub gbuild: PathBuf,
    /// Linker, invoked as `elxr -T <x> -T <ld> -o <obj> <inputs...>`.
    pub elxr: PathBuf,
    /// RPX (de)compressor, invoked as `wiiurpxtool -d/-c <elf> <rpx>`.
    pub wiiurpxtool: PathBuf,
}

/// Errors raised while building one `(target, platform)` pair.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The named target doesn't exist, or names a template rather than a concrete target.
    #[error("unknown or abstract target: {0:?}")]
    UnknownTarget(String),
    /// A CafeLoader build's target has no address-conversion map declared.
    #[error("target {0:?}: CafeLoader build requires an address-conversion map")]
    MissingAddrMap(String),
    /// The address-conversion map lacked `TextAddr`/`DataAddr` anchors a CafeLoader build needs.
    #[error("target {0:?}: CafeLoader address-conversion map is missing TextAddr/DataAddr anchors")]
    MissingAnchors(String),
    /// An Emulator build's target has no base RPX declared.
    #[error("target {0:?}: Emulator build requires a base RPX name")]
    MissingBaseRpx(String),
    /// The declared base RPX file doesn't exist on disk.
    #[error("base RPX file not found: {0}")]
    BaseRpxNotFound(PathBuf),
    /// The declared address-conversion map file doesn't exist on disk.
    #[error("address-conversion map file not found: {0}")]
    AddrMapNotFound(PathBuf),
    /// An external tool invocation exited with a non-zero status.
    #[error("external tool {0} exited with status {1}")]
    ToolFailed(&'static str, std::process::ExitStatus),
    /// The linked object was missing a section the build requires by name.
    #[error("missing required section {0:?} in linked object")]
    MissingSection(&'static str),
    /// See [`std::io::Error`].
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// See [`ElfError`].
    #[error(transparent)]
    Elf(#[from] ElfError),
    /// See [`BuildError`].
    #[error(transparent)]
    Build(#[from] BuildError),
    /// See [`SymMapError`].
    #[error(transparent)]
    SymMap(#[from] SymMapError),
    /// See [`AddrMapError`].
    #[error(transparent)]
    AddrMap(#[from] AddrMapError),
    /// See [`HookError`].
    #[error(transparent)]
    Hook(#[from] HookError),
    /// A module file glob expanded to an invalid pattern.
    #[error("glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),
}

/// `align(x, a) = ((x - 1) | (a - 1)) + 1`.
fn align(x: u32, a: u32) -> u32 {
    if a <= 1 {
        return x;
    }
    ((x.wrapping_sub(1)) | (a - 1)).wrapping_add(1)
}

fn platform_dir_name(platform: BuildPlatform) -> &'static str {
    match platform {
        BuildPlatform::Emulator => "Emulator",
        BuildPlatform::CafeLoader => "CafeLoader",
    }
}

fn load_addr_map(project: &Project, name: &str) -> Result<AddressMap, PipelineError> {
    let path = project
        .path
        .join("maps")
        .join(format!("{name}{}", project.addr_map_ext));
    if !path.is_file() {
        return Err(PipelineError::AddrMapNotFound(path));
    }
    let text = std::fs::read_to_string(&path)?;
    Ok(symmap::parse_address_map(&text)?)
}

fn defines_to_build_options(defines: &HashMap<String, Option<String>>) -> Vec<String> {
    let mut options: Vec<String> = defines
        .iter()
        .map(|(k, v)| match v {
            Some(v) => format!("-D{k}={v}"),
            None => format!("-D{k}"),
        })
        .collect();
    options.sort();
    options
}

/// Builds one `(target, platform)` pair of a project: resolves modules and the address map,
/// computes base/final addresses, invokes the external compiler and linker, then either splices
/// the linked object into the base RPX and repackages it (Emulator) or writes the three raw
/// `Code.bin`/`Data.bin`/`Patches.hax`/`Addr.bin` blobs the console loader expects (CafeLoader).
pub fn build_target(
    project: &Project,
    target_name: &str,
    platform: BuildPlatform,
    toolchain: &ToolchainPaths,
) -> Result<(), PipelineError> {
    let resolved = project
        .targets
        .get(target_name)
        .ok_or_else(|| PipelineError::UnknownTarget(target_name.to_string()))?;

    info!(
        "building target {target_name:?} for platform {}",
        platform_dir_name(platform)
    );

    let modules: Vec<&Module> = resolved
        .modules
        .iter()
        .filter_map(|path| project.modules.get(std::path::Path::new(path)))
        .collect();

    let mut combined = project.min_align;
    for module in &modules {
        combined = combined.combine(&module.align);
    }
    let text_align_all = combined.text;
    let data_align_all = combined.rodata.max(combined.data).max(combined.bss);

    let addr_map = match &resolved.addr_map_name {
        Some(name) => Some(load_addr_map(project, name)?),
        None => None,
    };

    let platform_name = platform_dir_name(platform);
    let target_temp_dir = project
        .path
        .join("temp")
        .join(platform_name)
        .join(&project.name)
        .join(target_name);
    let obj_dir = target_temp_dir.join("obj");
    std::fs::create_dir_all(&obj_dir)?;

    let proj_out_dir = project.path.join("out").join(platform_name).join(&project.name);
    std::fs::create_dir_all(&proj_out_dir)?;

    let target_out_dir = if platform == BuildPlatform::CafeLoader {
        let dir = proj_out_dir.join(target_name);
        std::fs::create_dir_all(&dir)?;
        Some(dir)
    } else {
        None
    };

    let (base_text_addr, base_data_addr, mut base_elf, base_dyna_end) = match platform {
        BuildPlatform::CafeLoader => {
            let map = addr_map
                .as_ref()
                .ok_or_else(|| PipelineError::MissingAddrMap(target_name.to_string()))?;
            let text_addr = map
                .text_addr
                .ok_or_else(|| PipelineError::MissingAnchors(target_name.to_string()))?;
            let data_addr = map
                .data_addr
                .ok_or_else(|| PipelineError::MissingAnchors(target_name.to_string()))?
                + CAFE_LOADER_LOG_RESERVE;
            (text_addr, data_addr, None, 0u32)
        }
        BuildPlatform::Emulator => {
            let base_rpx_name = resolved
                .base_rpx_name
                .as_ref()
                .ok_or_else(|| PipelineError::MissingBaseRpx(target_name.to_string()))?;
            let base_rpx_path = project.rpx_dir.join(format!("{base_rpx_name}.rpx"));
            if !base_rpx_path.is_file() {
                return Err(PipelineError::BaseRpxNotFound(base_rpx_path));
            }
            let base_elf_path = project.rpx_dir.join(format!("{base_rpx_name}.elf"));
            if !base_elf_path.is_file() {
                info!("decompressing RPX...");
                let status = Command::new(&toolchain.wiiurpxtool)
                    .arg("-d")
                    .arg(&base_rpx_path)
                    .arg(&base_elf_path)
                    .status()?;
                if !status.success() {
                    return Err(PipelineError::ToolFailed("wiiurpxtool -d", status));
                }
            }

            info!("loading base ELF...");
            let bytes = std::fs::read(&base_elf_path)?;
            let elf = Elf::parse(&bytes)?;

            let end_in_range = |lo: u32, hi: u32| {
                elf.sections
                    .iter()
                    .filter(|s| s.addr >= lo && s.addr < hi)
                    .map(|s| s.end_addr())
                    .max()
                    .unwrap_or(0)
            };
            let base_text_end = end_in_range(build::TEXT_RANGE.0, build::TEXT_RANGE.1);
            let base_data_end = end_in_range(build::DATA_RANGE.0, build::DATA_RANGE.1);
            let base_dyna_end = end_in_range(build::DYNA_RANGE.0, build::DYNA_RANGE.1);

            (base_text_end, base_data_end, Some(elf), base_dyna_end)
        }
    };

    let text_addr = align(base_text_addr, text_align_all);
    let data_addr = align(base_data_addr, data_align_all);

    if platform == BuildPlatform::CafeLoader {
        let addr_bin = build::render_addr_bin(text_addr, data_addr);
        std::fs::write(target_out_dir.as_ref().unwrap().join("Addr.bin"), addr_bin)?;
    }

    let mut all_defines = project.defines.clone();
    for (k, v) in &resolved.defines {
        all_defines.insert(k.clone(), v.clone());
    }
    let extra_build_options = defines_to_build_options(&all_defines);

    let mut c_files = Vec::new();
    let mut cxx_files = Vec::new();
    let mut asm_files = Vec::new();
    for module in &modules {
        c_files.extend(module.c_files.iter().cloned());
        cxx_files.extend(module.cxx_files.iter().cloned());
        asm_files.extend(module.asm_files.iter().cloned());
    }

    let mut include_dirs: Vec<PathBuf> = project.include_dirs.iter().cloned().collect();
    include_dirs.sort();

    let gpj = linkscript::render_gpj(
        &obj_dir,
        platform,
        text_addr,
        data_addr,
        &project.default_build_options,
        &include_dirs,
        &extra_build_options,
        &c_files,
        &cxx_files,
        &asm_files,
    );
    let gpj_path = target_temp_dir.join(format!("{}.gpj", project.name));
    std::fs::write(&gpj_path, gpj)?;

    info!("invoking build driver...");
    let status = Command::new(&toolchain.gbuild).arg("-top").arg(&gpj_path).status()?;
    if !status.success() {
        return Err(PipelineError::ToolFailed("gbuild", status));
    }

    let mut obj_files: Vec<PathBuf> = Vec::new();
    let pattern = obj_dir.join("*.o");
    for entry in glob::glob(&pattern.to_string_lossy())? {
        if let Ok(path) = entry {
            obj_files.push(path);
        }
    }

    info!("linking...");
    for path in &obj_files {
        let bytes = std::fs::read(path)?;
        let mut obj = Elf::parse(&bytes)?;
        build::strip_non_emit_relocations(&mut obj);
        std::fs::write(path, obj.write())?;
    }

    let mut symbols: HashMap<String, u32> = match (platform, &addr_map) {
        (BuildPlatform::CafeLoader, Some(map)) => {
            let mut out = HashMap::new();
            for (name, addr) in &project.symbols {
                out.insert(name.clone(), map.resolve_cafe_loader(*addr)?);
            }
            out
        }
        (BuildPlatform::Emulator, Some(map)) => {
            let mut out = HashMap::new();
            for (name, addr) in &project.symbols {
                out.insert(name.clone(), map.resolve(PlatformKind::Emulator, *addr)?);
            }
            out
        }
        _ => project.symbols.clone(),
    };

    let x_path = target_temp_dir.join(format!("{}.x", project.name));
    std::fs::write(&x_path, linkscript::render_symbol_map(&symbols))?;

    let ld_path = target_temp_dir.join(format!("{}.ld", project.name));
    std::fs::write(&ld_path, linkscript::render_ld(text_addr, data_addr, combined))?;

    let proj_obj_path = target_temp_dir.join(format!("{}.o", project.name));
    let mut cmd = Command::new(&toolchain.elxr);
    cmd.arg("-T").arg(&x_path).arg("-T").arg(&ld_path).arg("-o").arg(&proj_obj_path);
    cmd.args(&obj_files);
    let status = cmd.status()?;
    if !status.success() {
        return Err(PipelineError::ToolFailed("elxr", status));
    }

    info!("loading linked object...");
    let proj_obj_bytes = std::fs::read(&proj_obj_path)?;
    let proj_obj = Elf::parse(&proj_obj_bytes)?;

    if proj_obj.section(".text").is_none() {
        return Err(PipelineError::MissingSection(".text"));
    }

    if let (Some(symtab_idx), Some(strtab_idx)) =
        (proj_obj.find_section(".symtab"), proj_obj.find_section(".strtab"))
    {
        let symtab = &proj_obj.sections[symtab_idx];
        let strtab = &proj_obj.sections[strtab_idx];
        build::merge_text_symbols(&proj_obj, symtab, strtab, &mut symbols)?;
    }

    match platform {
        BuildPlatform::CafeLoader => {
            let target_out_dir = target_out_dir.unwrap();
            let map = addr_map.as_ref().unwrap();

            let text = proj_obj.section(".text").unwrap();
            std::fs::write(target_out_dir.join("Code.bin"), &text.data)?;

            let rodata = proj_obj.section(".rodata");
            let data = proj_obj.section(".data");
            let data_end = [rodata, data]
                .into_iter()
                .flatten()
                .map(|s| s.end_addr())
                .max()
                .unwrap_or(0);
            if data_end > 0 {
                let data_bin = build::render_data_bin(data_addr, data_end, rodata, data);
                std::fs::write(target_out_dir.join("Data.bin"), data_bin)?;
            }

            info!("building patches...");
            let mut records = Vec::new();
            for module in &modules {
                let mut hooks: Vec<Hook> = module.hooks.clone();
                for hook in hooks.iter_mut() {
                    for &raw_addr in hook.addresses().to_vec().iter() {
                        let addr = map.resolve_cafe_loader(raw_addr)?;
                        let bytes = hook.bytes(addr, &symbols)?;
                        records.push(PatchRecord { address: addr, bytes });
                    }
                }
            }
            let patches = build::render_patches_hax(&records);
            std::fs::write(target_out_dir.join("Patches.hax"), patches)?;
        }
        BuildPlatform::Emulator => {
            let base_elf = base_elf.as_mut().unwrap();
            build::splice(base_elf, &proj_obj, base_dyna_end)?;
            let ranges = build::hook_ranges(base_elf);

            let mut hooks: Vec<Hook> = modules.iter().flat_map(|m| m.hooks.clone()).collect();

            let resolve = |addr: u32| -> Result<u32, BuildError> {
                match &addr_map {
                    Some(map) => map
                        .resolve(PlatformKind::Emulator, addr)
                        .map_err(|_| BuildError::UnresolvedPatchAddress(addr)),
                    None => Ok(addr),
                }
            };
            build::apply_hooks(base_elf, &ranges, &mut hooks, &symbols, resolve)?;
            build::recompute_crcs(base_elf);

            info!("saving ELF...");
            let elf_path = proj_out_dir.join(format!("{target_name}.elf"));
            let rpx_path = proj_out_dir.join(format!("{target_name}.rpx"));
            std::fs::write(&elf_path, base_elf.write())?;

            info!("compressing RPX...");
            let status = Command::new(&toolchain.wiiurpxtool)
                .arg("-c")
                .arg(&elf_path)
                .arg(&rpx_path)
                .status()?;
            if !status.success() {
                return Err(PipelineError::ToolFailed("wiiurpxtool -c", status));
            }
        }
    }

    Ok(())
}

/// Builds every concrete (non-template) target of `project`, on both platforms, stopping at the
/// first failure.
pub fn build_all(project: &Project, toolchain: &ToolchainPaths) -> Result<(), PipelineError> {
    for target_name in project.targets.keys() {
        for platform in [BuildPlatform::Emulator, BuildPlatform::CafeLoader] {
            build_target(project, target_name, platform, toolchain)?;
        }
    }
    Ok(())
}
