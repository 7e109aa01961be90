//! Module definitions: a named bundle of source files (C/C++/Assembly) plus a list of hooks to
//! apply to the linked binary.
//!
//! A module is declared as a small YAML document. Deserialization happens in two stages: `serde`
//! parses the document shape into [`ModuleDoc`], then [`Module::from_doc`] resolves file globs,
//! validates filenames, and dispatches each hook object to its [`crate::hook::Hook`] variant.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::hook::{Hook, HookDoc};
use crate::linkscript::SectionAlignment;

/// Errors raised while resolving a [`ModuleDoc`] into a [`Module`].
#[derive(Debug, Error)]
pub enum ModuleError {
    /// A file-list entry named a glob with an invalid/empty extension.
    #[error("folder scan path contains an invalid extension: {0:?}")]
    InvalidScanExtension(String),
    /// A literal (non-glob) file-list entry did not resolve to an existing file.
    #[error("file not found: {0:?} (resolved to {1:?})")]
    FileNotFound(String, PathBuf),
    /// The `type` field of a hook object didn't match a known hook kind.
    #[error("unrecognized hook type: {0:?}")]
    UnknownHookType(String),
    /// A hook object failed to deserialize into its variant's shape.
    #[error("hook definition error: {0}")]
    Hook(#[from] crate::hook::HookError),
    /// Glob expansion itself failed (invalid pattern).
    #[error("glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),
    /// An `Align` override wasn't a power of two, or exceeded the cap shared with
    /// [`crate::project::Project::min_align`].
    #[error("invalid alignment {0:#X} for section {1:?}: must be a power of two no greater than 0x2000")]
    InvalidAlignment(u32, &'static str),
}

/// One of the three source languages a module's files are grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// `.c` translation units.
    C,
    /// `.cpp`/`.cc`/etc translation units.
    Cxx,
    /// Hand-written assembly.
    Assembly,
}

/// The raw, untyped shape of a module's `Files` block, as it appears in YAML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilesDoc {
    #[serde(rename = "C")]
    pub c: Option<Vec<String>>,
    #[serde(rename = "C++")]
    pub cxx: Option<Vec<String>>,
    #[serde(rename = "Assembly")]
    pub assembly: Option<Vec<String>>,
}

/// The raw, untyped shape of a module's `Align` block: per-section alignment overrides, each a
/// power of two no greater than `0x2000`. Absent fields contribute no constraint (equivalent to
/// `1`) when combined with the project's own minimums.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlignDoc {
    #[serde(rename = "Text")]
    pub text: Option<u32>,
    #[serde(rename = "Rodata")]
    pub rodata: Option<u32>,
    #[serde(rename = "Data")]
    pub data: Option<u32>,
    #[serde(rename = "Bss")]
    pub bss: Option<u32>,
}

/// The raw, untyped shape of a module YAML document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleDoc {
    #[serde(rename = "Files")]
    pub files: Option<FilesDoc>,
    #[serde(rename = "Hooks")]
    pub hooks: Option<Vec<HookDoc>>,
    #[serde(rename = "Align")]
    pub align: Option<AlignDoc>,
}

fn validate_align(value: u32, section: &'static str) -> Result<u32, ModuleError> {
    if value == 0 || value > 0x2000 || (value & (value - 1)) != 0 {
        return Err(ModuleError::InvalidAlignment(value, section));
    }
    Ok(value)
}

/// A fully-resolved module: absolute, deduplicated, existing file paths per language, plus the
/// parsed hook list.
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Absolute directory this module's YAML file was loaded from.
    pub path: PathBuf,
    /// `.c` source files.
    pub c_files: Vec<PathBuf>,
    /// `.cpp`/`.cc` source files.
    pub cxx_files: Vec<PathBuf>,
    /// Assembly source files.
    pub asm_files: Vec<PathBuf>,
    /// Hooks to apply when this module's owning target is built.
    pub hooks: Vec<Hook>,
    /// Per-section alignment overrides; `1` where the module declared none, meaning "no
    /// additional constraint beyond the project's own minimum" once combined via [`u32::max`].
    pub align: SectionAlignment,
}

impl Module {
    /// Expands one language's file list: literal paths are checked for existence, `*.ext`
    /// expands non-recursively within its directory, `**.ext` expands recursively. Entries are
    /// deduplicated (as a set, like the source this is grounded on) but the final order is not
    /// otherwise significant.
    fn resolve_file_list(
        entries: &[String],
        src_base_dir: &Path,
    ) -> Result<Vec<PathBuf>, ModuleError> {
        let mut resolved: HashSet<PathBuf> = HashSet::new();

        for raw in entries {
            let candidate = if Path::new(raw).is_absolute() {
                PathBuf::from(raw)
            } else {
                src_base_dir.join(raw)
            };

            let file_name = candidate
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_default();
            let dir = candidate.parent().unwrap_or(Path::new(".")).to_path_buf();

            if let Some(ext) = file_name.strip_prefix("**.") {
                if ext.is_empty() || !is_valid_extension(ext) {
                    return Err(ModuleError::InvalidScanExtension(raw.clone()));
                }
                let pattern = dir.join("**").join(format!("*.{ext}"));
                for entry in glob::glob(&pattern.to_string_lossy())? {
                    if let Ok(path) = entry {
                        if path.is_file() {
                            resolved.insert(path);
                        }
                    }
                }
            } else if let Some(ext) = file_name.strip_prefix("*.") {
                if ext.is_empty() || !is_valid_extension(ext) {
                    return Err(ModuleError::InvalidScanExtension(raw.clone()));
                }
                let pattern = dir.join(format!("*.{ext}"));
                for entry in glob::glob(&pattern.to_string_lossy())? {
                    if let Ok(path) = entry {
                        if path.is_file() {
                            resolved.insert(path);
                        }
                    }
                }
            } else {
                if !candidate.is_file() {
                    return Err(ModuleError::FileNotFound(raw.clone(), candidate));
                }
                resolved.insert(candidate);
            }
        }

        Ok(resolved.into_iter().collect())
    }

    /// Resolves a parsed [`ModuleDoc`] into a [`Module`] rooted at `module_dir`, expanding globs
    /// relative to `src_base_dir` (the project's source root, or `module_dir` if unset).
    pub fn from_doc(
        doc: &ModuleDoc,
        module_dir: &Path,
        src_base_dir: Option<&Path>,
    ) -> Result<Module, ModuleError> {
        let base_dir = src_base_dir.unwrap_or(module_dir);

        let mut module = Module {
            path: module_dir.to_path_buf(),
            ..Default::default()
        };

        if let Some(files) = &doc.files {
            if let Some(c) = &files.c {
                module.c_files = Self::resolve_file_list(c, base_dir)?;
            }
            if let Some(cxx) = &files.cxx {
                module.cxx_files = Self::resolve_file_list(cxx, base_dir)?;
            }
            if let Some(asm) = &files.assembly {
                module.asm_files = Self::resolve_file_list(asm, base_dir)?;
            }
        }

        if let Some(hook_docs) = &doc.hooks {
            module.hooks = hook_docs
                .iter()
                .map(Hook::from_doc)
                .collect::<Result<Vec<_>, _>>()?;
        }

        if let Some(align) = &doc.align {
            if let Some(v) = align.text {
                module.align.text = validate_align(v, "Text")?;
            }
            if let Some(v) = align.rodata {
                module.align.rodata = validate_align(v, "Rodata")?;
            }
            if let Some(v) = align.data {
                module.align.data = validate_align(v, "Data")?;
            }
            if let Some(v) = align.bss {
                module.align.bss = validate_align(v, "Bss")?;
            }
        }

        Ok(module)
    }

    /// Loads and resolves a module from its YAML file on disk, rooted at `module_dir` (the file's
    /// own directory).
    pub fn from_yaml(
        path: &Path,
        src_base_dir: Option<&Path>,
    ) -> Result<Module, ModuleLoadError> {
        let text = std::fs::read_to_string(path)?;
        let doc: ModuleDoc = serde_yaml::from_str(&text)?;
        let module_dir = path.parent().unwrap_or(Path::new("."));
        Ok(Module::from_doc(&doc, module_dir, src_base_dir)?)
    }
}

/// Errors raised while loading a module YAML file from disk, as opposed to resolving an
/// already-parsed [`ModuleDoc`] (see [`ModuleError`]).
#[derive(Debug, Error)]
pub enum ModuleLoadError {
    /// The file could not be read.
    #[error("I/O error reading module file: {0}")]
    Io(#[from] std::io::Error),
    /// The file's contents weren't a valid module document.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// The parsed document failed to resolve.
    #[error(transparent)]
    Resolve(#[from] ModuleError),
}

fn is_valid_extension(ext: &str) -> bool {
    !ext.is_empty()
        && ext
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_extension_chars() {
        assert!(!is_valid_extension(""));
        assert!(!is_valid_extension("c/"));
        assert!(is_valid_extension("cpp"));
    }

    #[test]
    fn empty_doc_resolves_to_empty_module() {
        let doc = ModuleDoc::default();
        let module = Module::from_doc(&doc, Path::new("/tmp/mod"), None).unwrap();
        assert!(module.c_files.is_empty());
        assert!(module.hooks.is_empty());
    }
}
