//! # Traces
//!
//! A trace moves through three shapes:
//!
//! 1. [`RawTrace`]: captured addresses
//! 2. [`ObjectTrace`]: each address attributed to an object by an [`ObjectLocator`]
//! 3. [`Stacktrace`]: each address resolved to one or more source frames
//!
//! [`LazyTrace`] holds a raw trace and resolves it the first time the
//! resolved form is asked for.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tracery_core::config::ResolverConfig;
//! use tracery_core::trace::{ImageMap, LoadedImage, RawTrace, Symbolizer};
//! use tracery_core::types::Address;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>>
//! {
//!     let mut images = ImageMap::new();
//!     images.insert(LoadedImage::new("/usr/lib/libfoo.so", 0x7f00_0000_0000, 0x10_0000));
//!
//!     let raw = RawTrace::new(vec![Address::new(0x7f00_0000_1234)]);
//!     let mut symbolizer: Symbolizer = Symbolizer::new(ResolverConfig::from_env()?);
//!     let trace = raw.resolve(&images, &mut symbolizer)?;
//!     println!("{trace}");
//!     Ok(())
//! }
//! ```

mod locator;
mod symbolizer;

use std::fmt;
use std::path::PathBuf;

pub use locator::{ImageMap, LoadedImage, ObjectLocator};
pub use symbolizer::Symbolizer;
use tracing::trace;

use crate::dwarf::DebugInfoAccess;
use crate::error::{TraceError, TraceResult};
use crate::types::{Address, ObjectFrame, ResolvedFrame};

/// Captured addresses, innermost call first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTrace
{
    frames: Vec<Address>,
}

impl RawTrace
{
    pub fn new(frames: Vec<Address>) -> Self
    {
        Self { frames }
    }

    pub fn frames(&self) -> &[Address]
    {
        &self.frames
    }

    pub fn len(&self) -> usize
    {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.frames.is_empty()
    }

    pub fn clear(&mut self)
    {
        self.frames.clear();
    }

    /// Attribute every address to its object.
    ///
    /// Addresses outside every known object keep their raw value as the
    /// object address and an empty object path.
    pub fn resolve_object_trace(&self, locator: &impl ObjectLocator) -> ObjectTrace
    {
        let frames = self
            .frames
            .iter()
            .map(|&address| {
                locator.locate(address).unwrap_or_else(|| {
                    trace!(%address, "address not in any object");
                    ObjectFrame::new(address, address, PathBuf::new())
                })
            })
            .collect();
        ObjectTrace::new(frames)
    }

    /// Locate and resolve every address.
    ///
    /// ## Errors
    ///
    /// See [`Symbolizer::resolve_frame`].
    pub fn resolve<A: DebugInfoAccess>(
        &self,
        locator: &impl ObjectLocator,
        symbolizer: &mut Symbolizer<A>,
    ) -> TraceResult<Stacktrace>
    {
        self.resolve_object_trace(locator).resolve(symbolizer)
    }
}

impl From<Vec<Address>> for RawTrace
{
    fn from(frames: Vec<Address>) -> Self
    {
        Self::new(frames)
    }
}

/// Addresses attributed to objects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectTrace
{
    frames: Vec<ObjectFrame>,
}

impl ObjectTrace
{
    pub fn new(frames: Vec<ObjectFrame>) -> Self
    {
        Self { frames }
    }

    pub fn frames(&self) -> &[ObjectFrame]
    {
        &self.frames
    }

    pub fn len(&self) -> usize
    {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.frames.is_empty()
    }

    pub fn clear(&mut self)
    {
        self.frames.clear();
    }

    /// ## Errors
    ///
    /// See [`Symbolizer::resolve_frame`].
    pub fn resolve<A: DebugInfoAccess>(&self, symbolizer: &mut Symbolizer<A>) -> TraceResult<Stacktrace>
    {
        symbolizer.resolve_frames(&self.frames)
    }
}

/// A resolved trace.
///
/// Holds one list per captured address. Each list is innermost first: the
/// synthesized frames for inlined calls, then the real frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stacktrace
{
    frames: Vec<Vec<ResolvedFrame>>,
}

impl Stacktrace
{
    pub fn new(frames: Vec<Vec<ResolvedFrame>>) -> Self
    {
        Self { frames }
    }

    pub fn frames(&self) -> &[Vec<ResolvedFrame>]
    {
        &self.frames
    }

    /// Every frame, innermost first, inline frames included.
    pub fn flatten(&self) -> impl Iterator<Item = &ResolvedFrame>
    {
        self.frames.iter().flatten()
    }

    /// Number of captured addresses.
    pub fn len(&self) -> usize
    {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.frames.is_empty()
    }

    pub fn clear(&mut self)
    {
        self.frames.clear();
    }
}

impl fmt::Display for Stacktrace
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        writeln!(f, "Stack trace (most recent call first):")?;
        if self.is_empty() {
            return writeln!(f, "<empty trace>");
        }
        for (index, frame) in self.flatten().enumerate() {
            writeln!(f, "#{index:<2} {frame}")?;
        }
        Ok(())
    }
}

/// A trace resolved on first access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LazyTrace
{
    Raw(RawTrace),
    Resolved(Stacktrace),
}

impl LazyTrace
{
    pub fn new(raw: RawTrace) -> Self
    {
        Self::Raw(raw)
    }

    pub fn is_resolved(&self) -> bool
    {
        matches!(self, Self::Resolved(_))
    }

    /// The resolved trace, resolving it now if needed.
    ///
    /// ## Errors
    ///
    /// See [`Symbolizer::resolve_frame`]. A failed resolution leaves the
    /// trace raw.
    pub fn get_resolved<A: DebugInfoAccess>(
        &mut self,
        locator: &impl ObjectLocator,
        symbolizer: &mut Symbolizer<A>,
    ) -> TraceResult<&Stacktrace>
    {
        if let Self::Raw(raw) = self {
            let resolved = raw.resolve(locator, symbolizer)?;
            *self = Self::Resolved(resolved);
        }
        match self {
            Self::Resolved(trace) => Ok(trace),
            Self::Raw(_) => Err(TraceError::Invariant("lazy trace left unresolved".to_string())),
        }
    }

    pub fn clear(&mut self)
    {
        match self {
            Self::Raw(raw) => raw.clear(),
            Self::Resolved(trace) => trace.clear(),
        }
    }
}
