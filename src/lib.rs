//! clpc builds RPX binaries for the Wii U's Espresso (PowerPC) target: it orchestrates an
//! external compiler/linker over a project's modules, splices the linked object into a base RPX
//! image, applies typed binary patches ("hooks"), and emits either an emulator-ready ELF/RPX pair
//! or a console-ready `Code.bin`/`Data.bin`/`Addr.bin`/`Patches.hax` bundle.
//!
//! # Layout
//! - [`elf`] — the owned, mutable ELF32 big-endian codec the splice engine mutates in place.
//! - [`hook`] — typed, addressed binary patches and their byte encoding.
//! - [`addrmap`] / [`symmap`] — per-platform address-conversion resolvers and their text formats.
//! - [`target`] — multi-base target inheritance resolution.
//! - [`module`] — a module's source file lists and hook declarations.
//! - [`project`] — project-level configuration, variable substitution, default build options.
//! - [`linkscript`] — `.gpj`/`.ld`/`.x` text generation for the external toolchain.
//! - [`build`] — the splice/patch/package orchestrator.
//! - [`pipeline`] — ties module/target resolution, address maps, and external toolchain
//!   invocation together into one `(target, platform)` build.
//! - [`error`] — the crate-wide composed error type.

#![warn(missing_docs)]

pub mod addrmap;
pub mod build;
mod consts;
pub mod elf;
pub mod error;
pub mod hook;
pub mod linkscript;
pub mod module;
pub mod pipeline;
pub mod project;
pub mod symmap;
pub mod target;

pub use flagset;

pub use consts::{Endianness, MachineKind, SectionKind, SymbolBinding};
pub use error::ClpcError;
