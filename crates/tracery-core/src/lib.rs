//! # tracery-core
//!
//! Turns captured instruction addresses into source-level stack frames using
//! DWARF debug information.
//!
//! This crate provides:
//! - Per-object resolution of addresses to function, file, line and column
//! - Recovery of inlined calls as extra frames
//! - Split-DWARF (`.dwo`) companion files and separate debug files
//! - Trace aggregates tying many addresses and objects together
//!
//! ## Layers
//!
//! - [`dwarf`]: reading debug info (the [`DebugInfoAccess`] seam and its gimli backend)
//! - [`resolver`]: one object's lookup tables and the resolution algorithm
//! - [`trace`]: raw, object and resolved traces, plus the [`Symbolizer`]
//!
//! Behaviour is controlled by an explicit [`ResolverConfig`] handed to each
//! resolver or symbolizer; there is no process-wide state.

pub mod config;
pub mod dwarf;
pub mod error;
pub mod resolver;
pub mod trace;
pub mod types;

pub use config::{CacheMode, ResolverConfig};
pub use dwarf::{DebugInfoAccess, GimliDebugInfo};
pub use error::{TraceError, TraceResult};
pub use resolver::{DwarfResolver, ObjectResolver};
pub use trace::{ImageMap, LazyTrace, LoadedImage, ObjectLocator, ObjectTrace, RawTrace, Stacktrace, Symbolizer};
pub use types::{Address, FrameWithInlines, ObjectFrame, ResolvedFrame};
