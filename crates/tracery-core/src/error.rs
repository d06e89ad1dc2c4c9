//! # Error Types
//!
//! Error handling for the resolution engine.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.
//!
//! Addresses that no compilation unit, function or line row covers are *not*
//! errors. Those surface as empty fields on a [`ResolvedFrame`](crate::types::ResolvedFrame).
//! Only the conditions below are raised, and the trace-level API decides
//! whether to absorb them (see [`ResolverConfig::absorb_errors`](crate::config::ResolverConfig)).

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for resolution operations
///
/// ## Error Categories
///
/// 1. **Environment errors**: Environment, Dwarf, Io
/// 2. **Format inconsistencies**: Invariant
/// 3. **Configuration errors**: Config
#[derive(Error, Debug)]
pub enum TraceError
{
    /// An object or companion debug file could not be opened or parsed
    ///
    /// Split-DWARF companions that are missing on disk also land here, scoped
    /// to the frame that needed them.
    #[error("Failed to open debug info for {}: {message}", .path.display())]
    Environment
    {
        /// Path of the object or companion file
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// A decode call failed inside the DWARF reader
    #[error("DWARF error while {context}: {source}")]
    Dwarf
    {
        /// Description of the operation that failed
        context: String,
        /// Underlying reader error
        #[source]
        source: gimli::Error,
    },

    /// The debug info had an unexpected shape
    ///
    /// Examples:
    /// - A unit index past the end of `.debug_info`
    /// - A node reference pointing outside every unit
    #[error("Invalid debug info: {0}")]
    Invariant(String),

    /// A configuration value could not be parsed
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// I/O error while reading an object file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, TraceError>`
///
/// ```rust
/// use tracery_core::error::TraceResult;
/// fn foo() -> TraceResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type TraceResult<T> = std::result::Result<T, TraceError>;

/// Map a gimli DWARF error to a `TraceError` with context.
///
/// `context` describes what was being read, e.g. "reading line program".
pub(crate) fn map_dwarf_error(context: &str, err: gimli::Error) -> TraceError
{
    TraceError::Dwarf {
        context: context.to_string(),
        source: err,
    }
}
