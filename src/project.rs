//! Project-level configuration: variables, default build options, module/target tables, and the
//! `$Var`-substitution pass applied to every string field read from project/target/module YAML.
//!
//! Like [`crate::module`], loading happens in two stages: serde parses the document shape (with
//! `deny_unknown_fields` doing the work the original tool's manual option-name loop used to), then
//! [`Project::from_yaml`] resolves paths, expands variables, loads referenced modules, and folds
//! the target inheritance graph.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml::Value;
use thiserror::Error;

use crate::linkscript::SectionAlignment;
use crate::module::Module;
use crate::target::{resolve_targets, NameSentinel, ResolvedTarget, Target};

/// The build-system version this tool understands, as `(major, minor)`.
pub const SUPPORTED_VERSION_MIN: (u32, u32) = (3, 0);
/// See [`SUPPORTED_VERSION_MIN`].
pub const SUPPORTED_VERSION_MAX: (u32, u32) = (3, 0);

/// Errors raised while resolving project configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProjectError {
    /// A `$Var` reference in a string had no matching entry in the `Variables` table.
    #[error("unable to resolve variable reference in string: {0:?}")]
    UnresolvedVariable(String),
    /// A declared project/build-tool version fell outside the supported range.
    #[error("unsupported project version {0}.{1}")]
    UnsupportedVersion(u32, u32),
    /// A version string wasn't of the form `MAJOR.MINOR`.
    #[error("malformed version string: {0:?}")]
    MalformedVersion(String),
    /// An `ExcludeDefaultBuildOptions` entry named an option that isn't one of the defaults.
    #[error("unrecognized default build option: {0:?}")]
    UnrecognizedBuildOption(String),
    /// A `Variables`/`Defines` key wasn't a valid identifier.
    #[error("invalid identifier key: {0:?}")]
    InvalidIdentifier(String),
    /// A declared `Target` extends a template name that was never declared.
    #[error("target {0:?} extends non-existent template {1:?}")]
    UnknownTemplate(String, String),
    /// An alignment field (module/project) wasn't a power of two, or exceeded the cap.
    #[error("invalid alignment {0:#X} in {1}: must be a power of two no greater than 0x2000")]
    InvalidAlignment(u32, &'static str),
}

/// Validates that `value` is a power of two no greater than `0x2000`, as every section-alignment
/// field (project minimums, module overrides) requires.
pub fn validate_alignment(value: u32, field_name: &'static str) -> Result<u32, ProjectError> {
    if value == 0 || value > 0x2000 || (value & (value - 1)) != 0 {
        return Err(ProjectError::InvalidAlignment(value, field_name));
    }
    Ok(value)
}

/// Checks whether `s` is a valid Python-style identifier (the original tool's `Variables`/
/// `Defines` keys and `ExcludeDefaultBuildOptions`/`Remove Defines` entries are validated this
/// way): starts with a letter or underscore, followed by letters, digits, or underscores.
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Returns the default set of linker/compiler build options the original tool bakes in, keyed by
/// flag name to an optional fixed value (`None` for a bare flag).
pub fn default_build_options() -> HashMap<String, Option<String>> {
    let flags: &[(&str, Option<&str>)] = &[
        ("-c99", None),
        ("--g++", None),
        ("--link_once_templates", None),
        ("--enable_noinline", None),
        ("--max_inlining", None),
        ("--no_exceptions", None),
        ("--no_rtti", None),
        ("--no_implicit_include", None),
        ("-no_ansi_alias", None),
        ("-only_explicit_reg_use", None),
        ("-kanji", Some("shiftjis")),
        ("-Ospeed", None),
        ("-Onounroll", None),
    ];
    flags
        .iter()
        .map(|(k, v)| (k.to_string(), v.map(|s| s.to_string())))
        .collect()
}

/// Parses a `MAJOR.MINOR` version string and checks it against the supported range.
pub fn check_version(version_str: &str) -> Result<(u32, u32), ProjectError> {
    let (major_s, minor_s) = version_str
        .split_once('.')
        .ok_or_else(|| ProjectError::MalformedVersion(version_str.to_string()))?;
    let major: u32 = major_s
        .parse()
        .map_err(|_| ProjectError::MalformedVersion(version_str.to_string()))?;
    let minor: u32 = minor_s
        .parse()
        .map_err(|_| ProjectError::MalformedVersion(version_str.to_string()))?;

    let below_min = major < SUPPORTED_VERSION_MIN.0
        || (major == SUPPORTED_VERSION_MIN.0 && minor < SUPPORTED_VERSION_MIN.1);
    let above_max = major > SUPPORTED_VERSION_MAX.0
        || (major == SUPPORTED_VERSION_MAX.0 && minor > SUPPORTED_VERSION_MAX.1);

    if below_min || above_max {
        return Err(ProjectError::UnsupportedVersion(major, minor));
    }
    Ok((major, minor))
}

/// A project's declared `Variables` table: name/value pairs consulted longest-key-first so that
/// e.g. `$ProjectRoot` isn't shadowed by a shorter `$Project` entry.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    entries: Vec<(String, String)>,
}

impl Variables {
    /// Builds a variable table from a raw key/value map, sorting entries by descending key
    /// length so longer names are tried first during substitution.
    pub fn new(raw: HashMap<String, String>) -> Result<Self, ProjectError> {
        for key in raw.keys() {
            if !is_valid_identifier(key) {
                return Err(ProjectError::InvalidIdentifier(key.clone()));
            }
        }
        let mut entries: Vec<(String, String)> = raw.into_iter().collect();
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Ok(Self { entries })
    }

    /// Expands every `$Name` occurrence in `s`, splitting on `$` and matching the longest
    /// declared variable name that prefixes each subsequent segment — mirroring the original
    /// string-splitting substitution pass rather than a regex.
    pub fn process(&self, s: &str) -> Result<String, ProjectError> {
        let mut parts = s.split('$');
        let mut out = String::from(parts.next().unwrap_or(""));

        for part in parts {
            let mut matched = false;
            for (key, value) in &self.entries {
                if let Some(rest) = part.strip_prefix(key.as_str()) {
                    out.push_str(value);
                    out.push_str(rest);
                    matched = true;
                    break;
                }
            }
            if !matched {
                return Err(ProjectError::UnresolvedVariable(s.to_string()));
            }
        }

        Ok(out)
    }
}

/// Top-level project configuration, as resolved from a project YAML document plus its referenced
/// modules and targets.
#[derive(Debug, Clone)]
pub struct Project {
    /// Absolute directory the project file lives in.
    pub path: PathBuf,
    /// Declared project name.
    pub name: String,
    /// `$Var` substitution table.
    pub variables: Variables,
    /// Base directory module YAML files are resolved relative to.
    pub modules_base_dir: PathBuf,
    /// Base directory source file globs are resolved relative to, if overridden.
    pub src_base_dir: Option<PathBuf>,
    /// Compiler include search directories.
    pub include_dirs: HashSet<PathBuf>,
    /// Directory built RPX files are written to.
    pub rpx_dir: PathBuf,
    /// File extension (including the leading dot) used for address-conversion-map files.
    pub addr_map_ext: String,
    /// Default build options, after `ExcludeDefaultBuildOptions` has been applied.
    pub default_build_options: HashMap<String, Option<String>>,
    /// Project-level `Defines` (distinct from a target's own `Add/Defines`).
    pub defines: HashMap<String, Option<String>>,
    /// Loaded modules, keyed by their normalized absolute YAML file path.
    pub modules: HashMap<PathBuf, Module>,
    /// Fully-resolved (non-template) targets, keyed by name.
    pub targets: HashMap<String, ResolvedTarget>,
    /// Symbols read from `syms/main.map`, if present.
    pub symbols: HashMap<String, u32>,
    /// Project-wide minimum per-section alignment, combined with each module's own override when
    /// computing a target's final link-script alignment (see [`crate::linkscript::render_ld`]).
    pub min_align: SectionAlignment,
}

impl Project {
    /// Creates a project with every field at its documented default, rooted at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            modules_base_dir: path.clone(),
            src_base_dir: None,
            include_dirs: {
                let mut set = HashSet::new();
                set.insert(path.join("include"));
                set
            },
            rpx_dir: path.join("rpxs"),
            addr_map_ext: ".offs".to_string(),
            default_build_options: default_build_options(),
            defines: HashMap::new(),
            modules: HashMap::new(),
            targets: HashMap::new(),
            symbols: HashMap::new(),
            min_align: SectionAlignment { text: 4, rodata: 4, data: 4, bss: 4 },
            name: String::new(),
            variables: Variables::default(),
            path,
        }
    }

    /// Applies `ExcludeDefaultBuildOptions`, removing each named flag from
    /// [`Project::default_build_options`]. Errors if a name doesn't match a known default.
    pub fn exclude_build_options(&mut self, names: &[String]) -> Result<(), ProjectError> {
        for name in names {
            if self.default_build_options.remove(name).is_none() {
                return Err(ProjectError::UnrecognizedBuildOption(name.clone()));
            }
        }
        Ok(())
    }

    /// Resolves a path field relative to the project directory, unless already absolute.
    pub fn resolve_path(&self, raw: &str) -> PathBuf {
        let p = Path::new(raw);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.path.join(p)
        }
    }

    /// Loads a full project from its YAML file on disk: resolves variables, include/source/rpx
    /// directories, the default-build-option exclusion list, every referenced module, and the
    /// whole target inheritance graph (templates are folded away; only concrete targets survive
    /// into [`Project::targets`]). Also opportunistically loads `syms/main.map` if present.
    pub fn from_yaml(path: &Path) -> Result<Project, crate::error::ClpcError> {
        let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let dir = if dir.is_absolute() {
            dir
        } else {
            std::env::current_dir()?.join(dir)
        };

        let text = std::fs::read_to_string(path)?;
        let doc: ProjectDoc = serde_yaml::from_str(&text)?;

        check_version(&doc.wuapps_version)?;

        let variables = Variables::new(doc.variables.unwrap_or_default())?;
        let mut proj = Project::new(dir.clone());
        proj.variables = variables;
        proj.name = proj.variables.process(&doc.name)?;

        proj.modules_base_dir = match doc.modules_base_dir {
            Some(raw) => proj.resolve_path(&proj.variables.process(&raw)?),
            None => dir.clone(),
        };
        if let Some(raw) = doc.sources_base_dir {
            proj.src_base_dir = Some(proj.resolve_path(&proj.variables.process(&raw)?));
        }
        if let Some(raw_dirs) = doc.include_dirs {
            let mut include_dirs = HashSet::new();
            for raw in raw_dirs {
                let resolved = proj.resolve_path(&proj.variables.process(&raw)?);
                include_dirs.insert(normalize_path(&resolved));
            }
            proj.include_dirs = include_dirs;
        }
        if let Some(raw) = doc.rpx_dir {
            proj.rpx_dir = proj.resolve_path(&proj.variables.process(&raw)?);
        }
        if let Some(ext) = doc.addr_map_file_extension {
            proj.addr_map_ext = format!(".{}", proj.variables.process(&ext)?);
        }

        match doc.exclude_default_build_options {
            Some(ExcludeOptions::All(true)) => proj.default_build_options.clear(),
            Some(ExcludeOptions::All(false)) | None => {}
            Some(ExcludeOptions::Named(names)) => {
                let resolved = names
                    .iter()
                    .map(|n| proj.variables.process(n))
                    .collect::<Result<Vec<_>, _>>()?;
                proj.exclude_build_options(&resolved)?;
            }
        }

        if let Some(align) = doc.min_align {
            proj.min_align = SectionAlignment {
                text: validate_alignment(align.text.unwrap_or(4), "MinAlign.Text")?,
                rodata: validate_alignment(align.rodata.unwrap_or(4), "MinAlign.Rodata")?,
                data: validate_alignment(align.data.unwrap_or(4), "MinAlign.Data")?,
                bss: validate_alignment(align.bss.unwrap_or(4), "MinAlign.Bss")?,
            };
        }

        if let Some(defines) = doc.defines {
            let mut resolved = HashMap::new();
            for (k, v) in defines {
                if !is_valid_identifier(&k) {
                    return Err(ProjectError::InvalidIdentifier(k).into());
                }
                let v = v.map(|s| proj.variables.process(&s)).transpose()?;
                resolved.insert(k, v);
            }
            proj.defines = resolved;
        }

        let mut file_cache: HashMap<PathBuf, Module> = HashMap::new();

        if let Some(names) = doc.modules {
            for raw in names {
                let name = proj.variables.process(&raw)?;
                let file_path = module_file_path(&proj.modules_base_dir, &name);
                load_module_cached(&file_path, proj.src_base_dir.as_deref(), &mut file_cache)?;
                proj.modules.insert(file_path.clone(), file_cache[&file_path].clone());
            }
        }

        if let Some(targets) = doc.targets {
            let mut templates: HashMap<String, Target> = HashMap::new();
            let mut concrete: HashMap<String, Target> = HashMap::new();

            for (raw_name, target_value) in targets {
                let (name, is_template) = split_target_name(&raw_name)?;
                let target_doc: TargetDoc = serde_yaml::from_value(target_value)?;
                let target = target_from_doc(&target_doc, &name, &proj, &mut file_cache)?;

                if is_template {
                    templates.insert(name, target);
                } else {
                    concrete.insert(name, target);
                }
            }

            for target in concrete.values() {
                if let Some(base) = target.bases.first() {
                    if !templates.contains_key(base) {
                        return Err(ProjectError::UnknownTemplate(target.name.clone(), base.clone()).into());
                    }
                }
            }

            let mut all = templates;
            all.extend(concrete.iter().map(|(k, v)| (k.clone(), v.clone())));

            let resolved = resolve_targets(&all)?;
            proj.targets = concrete
                .keys()
                .filter_map(|name| resolved.get(name).map(|r| (name.clone(), r.clone())))
                .collect();
        }

        for (path, module) in file_cache {
            proj.modules.entry(path).or_insert(module);
        }

        let sym_map_path = proj.path.join("syms").join("main.map");
        if sym_map_path.is_file() {
            let text = std::fs::read_to_string(&sym_map_path)?;
            proj.symbols = crate::symmap::parse_symbol_map(&text)?;
        }

        Ok(proj)
    }
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn module_file_path(modules_base_dir: &Path, name: &str) -> PathBuf {
    let rel = format!("{name}.yaml");
    let p = Path::new(&rel);
    normalize_path(&if p.is_absolute() { p.to_path_buf() } else { modules_base_dir.join(p) })
}

fn load_module_cached(
    file_path: &Path,
    src_base_dir: Option<&Path>,
    cache: &mut HashMap<PathBuf, Module>,
) -> Result<(), crate::error::ClpcError> {
    if cache.contains_key(file_path) {
        return Ok(());
    }
    let module = Module::from_yaml(file_path, src_base_dir)?;
    cache.insert(file_path.to_path_buf(), module);
    Ok(())
}

/// Checks whether `s` is safe to use as a filename component (as both a target name and a module
/// basename are): non-empty, restricted to a conservative character set, and not starting with
/// `-` (which a shell/tool might mistake for a flag) or ending with `.`.
fn is_valid_filename(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('-')
        && !s.ends_with('.')
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ',' | '+' | '(' | ')'))
}

/// Splits a raw `Targets` mapping key into its resolved name and whether it's a `Template/<name>`
/// declaration.
fn split_target_name(raw_name: &str) -> Result<(String, bool), ProjectError> {
    if let Some(rest) = raw_name.strip_prefix("Template/") {
        let template_name = rest.trim();
        if !is_valid_filename(template_name) {
            return Err(ProjectError::InvalidIdentifier(raw_name.to_string()));
        }
        Ok((template_name.to_string(), true))
    } else {
        if !is_valid_filename(raw_name) {
            return Err(ProjectError::InvalidIdentifier(raw_name.to_string()));
        }
        Ok((raw_name.to_string(), false))
    }
}

fn target_from_doc(
    doc: &TargetDoc,
    name: &str,
    proj: &Project,
    file_cache: &mut HashMap<PathBuf, Module>,
) -> Result<Target, crate::error::ClpcError> {
    let mut target = Target::new(name);
    target.is_abstract = doc.abstract_.unwrap_or(false);

    if let Some(extends) = &doc.extends {
        target.bases.push(proj.variables.process(extends)?);
    }

    if let Some(raw) = &doc.addr_map {
        target.addr_map_name = Some(NameSentinel::parse(&proj.variables.process(raw)?));
    }
    if let Some(raw) = &doc.base_rpx {
        target.base_rpx_name = Some(NameSentinel::parse(&proj.variables.process(raw)?));
    }

    if let Some(names) = &doc.remove_modules {
        for raw in names {
            let resolved = proj.variables.process(raw)?;
            target.remove_modules.insert(module_file_path(&proj.modules_base_dir, &resolved).to_string_lossy().into_owned());
        }
    }
    if let Some(names) = &doc.add_modules {
        for raw in names {
            let resolved = proj.variables.process(raw)?;
            let file_path = module_file_path(&proj.modules_base_dir, &resolved);
            if target.remove_modules.contains(&file_path.to_string_lossy().into_owned()) {
                return Err(ProjectError::InvalidIdentifier(format!(
                    "target {name:?} adds and removes the same module: {resolved}"
                ))
                .into());
            }
            load_module_cached(&file_path, proj.src_base_dir.as_deref(), file_cache)?;
            target.add_modules.insert(file_path.to_string_lossy().into_owned());
        }
    }
    if let Some(keys) = &doc.remove_defines {
        for k in keys {
            if !is_valid_identifier(k) {
                return Err(ProjectError::InvalidIdentifier(k.clone()).into());
            }
            target.remove_defines.insert(k.clone());
        }
    }
    if let Some(defines) = &doc.add_defines {
        for (k, v) in defines {
            if !is_valid_identifier(k) {
                return Err(ProjectError::InvalidIdentifier(k.clone()).into());
            }
            let v = v.as_ref().map(|s| proj.variables.process(s)).transpose()?;
            target.add_defines.insert(k.clone(), v);
        }
    }

    Ok(target)
}

/// The raw, untyped shape of a `Target` YAML document (one value in a project's `Targets`
/// mapping).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetDoc {
    #[serde(rename = "Abstract")]
    abstract_: Option<bool>,
    #[serde(rename = "AddrMap")]
    addr_map: Option<String>,
    #[serde(rename = "BaseRpx")]
    base_rpx: Option<String>,
    #[serde(rename = "Remove/Modules")]
    remove_modules: Option<Vec<String>>,
    #[serde(rename = "Add/Modules")]
    add_modules: Option<Vec<String>>,
    #[serde(rename = "Remove/Defines")]
    remove_defines: Option<Vec<String>>,
    #[serde(rename = "Add/Defines")]
    add_defines: Option<HashMap<String, Option<String>>>,
    #[serde(rename = "Extends")]
    extends: Option<String>,
}

/// Either `true`/`false` (drop everything / keep everything) or a list of specific default
/// build-option flags to drop, as `ExcludeDefaultBuildOptions` accepts both shapes.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ExcludeOptions {
    /// Flat boolean: `true` drops every default.
    All(bool),
    /// A specific list of flag names to drop.
    Named(Vec<String>),
}

/// The raw shape of a project's `MinAlign` block; see [`crate::module::AlignDoc`] for the
/// module-level counterpart.
#[derive(Debug, Clone, Default, Deserialize)]
struct MinAlignDoc {
    #[serde(rename = "Text")]
    text: Option<u32>,
    #[serde(rename = "Rodata")]
    rodata: Option<u32>,
    #[serde(rename = "Data")]
    data: Option<u32>,
    #[serde(rename = "Bss")]
    bss: Option<u32>,
}

/// The raw, untyped shape of a project YAML document. Unrecognized top-level keys are rejected by
/// `deny_unknown_fields`, replacing the original tool's manual `available_options` loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectDoc {
    #[serde(rename = "WUAPPSVersion")]
    wuapps_version: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Variables")]
    variables: Option<HashMap<String, String>>,
    #[serde(rename = "ModulesBaseDir")]
    modules_base_dir: Option<String>,
    #[serde(rename = "SourcesBaseDir")]
    sources_base_dir: Option<String>,
    #[serde(rename = "IncludeDirs")]
    include_dirs: Option<Vec<String>>,
    #[serde(rename = "RpxDir")]
    rpx_dir: Option<String>,
    #[serde(rename = "ExcludeDefaultBuildOptions")]
    exclude_default_build_options: Option<ExcludeOptions>,
    #[serde(rename = "AddrMapFileExtension")]
    addr_map_file_extension: Option<String>,
    #[serde(rename = "Modules")]
    modules: Option<Vec<String>>,
    #[serde(rename = "Defines")]
    defines: Option<HashMap<String, Option<String>>>,
    #[serde(rename = "Targets")]
    targets: Option<HashMap<String, Value>>,
    #[serde(rename = "MinAlign")]
    min_align: Option<MinAlignDoc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_substitution_prefers_longest_match() {
        let mut raw = HashMap::new();
        raw.insert("Root".to_string(), "/proj".to_string());
        raw.insert("RootSub".to_string(), "/proj/sub".to_string());
        let vars = Variables::new(raw).unwrap();
        assert_eq!(vars.process("$RootSub/file.c").unwrap(), "/proj/sub/file.c");
        assert_eq!(vars.process("$Root/file.c").unwrap(), "/proj/file.c");
    }

    #[test]
    fn variable_substitution_unresolved_errors() {
        let vars = Variables::default();
        assert!(vars.process("$Missing/file.c").is_err());
    }

    #[test]
    fn version_range_check() {
        assert_eq!(check_version("3.0").unwrap(), (3, 0));
        assert!(check_version("2.9").is_err());
        assert!(check_version("3.1").is_err());
        assert!(check_version("nope").is_err());
    }

    #[test]
    fn exclude_unknown_option_errors() {
        let mut proj = Project::new("/proj");
        assert!(proj.exclude_build_options(&["-bogus".to_string()]).is_err());
        assert!(proj.exclude_build_options(&["-c99".to_string()]).is_ok());
        assert!(!proj.default_build_options.contains_key("-c99"));
    }

    #[test]
    fn rejects_invalid_identifier_keys() {
        let mut raw = HashMap::new();
        raw.insert("1bad".to_string(), "x".to_string());
        assert!(Variables::new(raw).is_err());
    }
}
