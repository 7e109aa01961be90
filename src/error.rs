//! Crate-wide error type, composing each domain's own `thiserror` enum for call sites (the CLI,
//! top-level orchestration) that can fail in more than one domain at once.

use thiserror::Error;

use crate::addrmap::AddrMapError;
use crate::build::BuildError;
use crate::elf::ElfError;
use crate::hook::HookError;
use crate::module::{ModuleError, ModuleLoadError};
use crate::pipeline::PipelineError;
use crate::project::ProjectError;
use crate::symmap::SymMapError;
use crate::target::TargetError;

/// A failure from any stage of the pipeline: project/module/target loading, address/symbol map
/// parsing, hook encoding, ELF codec, or the build orchestrator itself.
#[derive(Debug, Error)]
pub enum ClpcError {
    /// See [`ProjectError`].
    #[error(transparent)]
    Project(#[from] ProjectError),
    /// See [`ModuleError`].
    #[error(transparent)]
    Module(#[from] ModuleError),
    /// See [`ModuleLoadError`].
    #[error(transparent)]
    ModuleLoad(#[from] ModuleLoadError),
    /// See [`TargetError`].
    #[error(transparent)]
    Target(#[from] TargetError),
    /// See [`AddrMapError`].
    #[error(transparent)]
    AddrMap(#[from] AddrMapError),
    /// See [`SymMapError`].
    #[error(transparent)]
    SymMap(#[from] SymMapError),
    /// See [`HookError`].
    #[error(transparent)]
    Hook(#[from] HookError),
    /// See [`ElfError`].
    #[error(transparent)]
    Elf(#[from] ElfError),
    /// See [`BuildError`].
    #[error(transparent)]
    Build(#[from] BuildError),
    /// See [`PipelineError`].
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// An I/O failure reading a project/module/target file or a base RPX.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A YAML document failed to parse or didn't match the expected shape.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
