//! Object-path keyed resolver cache and the error absorption boundary.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::Stacktrace;
use crate::config::{CacheMode, ResolverConfig};
use crate::dwarf::{DebugInfoAccess, GimliDebugInfo};
use crate::error::TraceResult;
use crate::resolver::DwarfResolver;
use crate::types::{FrameWithInlines, ObjectFrame, ResolvedFrame};

/// Resolves frames from any number of objects.
///
/// Holds one [`DwarfResolver`] per object path, created on first use with
/// this symbolizer's [`ResolverConfig`]. When `absorb_errors` is set, any
/// failure while resolving a frame is logged and the frame degrades to its
/// addresses; otherwise the error is returned.
///
/// ## Thread Safety
///
/// Resolvers fill their caches lazily, so a symbolizer is `!Sync`. Use one
/// per thread or wrap it in a `Mutex`.
pub struct Symbolizer<A: DebugInfoAccess = GimliDebugInfo>
{
    config: ResolverConfig,
    resolvers: HashMap<PathBuf, DwarfResolver<A>>,
}

impl<A: DebugInfoAccess> Symbolizer<A>
{
    #[must_use]
    pub fn new(config: ResolverConfig) -> Self
    {
        Self {
            config,
            resolvers: HashMap::new(),
        }
    }

    pub fn config(&self) -> ResolverConfig
    {
        self.config
    }

    /// Use `resolver` for every frame of its object.
    pub fn insert_resolver(&mut self, resolver: DwarfResolver<A>)
    {
        self.resolvers.insert(resolver.object_path().to_path_buf(), resolver);
    }

    /// Objects that currently have a resolver.
    pub fn cached_objects(&self) -> impl Iterator<Item = &Path>
    {
        self.resolvers.keys().map(PathBuf::as_path)
    }

    /// Resolve one frame to its frames, innermost first.
    ///
    /// A frame without an object path resolves to its addresses only.
    ///
    /// ## Errors
    ///
    /// Only when `absorb_errors` is off: the object or a split companion could
    /// not be read, or its debug info is malformed.
    pub fn resolve_frame(&mut self, frame: &ObjectFrame) -> TraceResult<Vec<ResolvedFrame>>
    {
        if frame.object_path.as_os_str().is_empty() {
            return Ok(vec![ResolvedFrame::unresolved(frame)]);
        }
        match self.resolve_with_object(frame) {
            Ok(resolved) => Ok(resolved.into_frames()),
            Err(err) if self.config.absorb_errors => {
                warn!(
                    address = %frame.raw_address,
                    object = %frame.object_path.display(),
                    error = %err,
                    "failed to resolve frame"
                );
                Ok(vec![ResolvedFrame::unresolved(frame)])
            }
            Err(err) => Err(err),
        }
    }

    /// Resolve a whole trace.
    ///
    /// Under [`CacheMode::Hybrid`] every resolver is dropped once the trace is
    /// done, whether or not it succeeded.
    ///
    /// ## Errors
    ///
    /// The first error of [`resolve_frame`](Self::resolve_frame).
    pub fn resolve_frames(&mut self, frames: &[ObjectFrame]) -> TraceResult<Stacktrace>
    {
        let resolved = frames
            .iter()
            .map(|frame| self.resolve_frame(frame))
            .collect::<TraceResult<Vec<_>>>();
        if self.config.cache_mode == CacheMode::Hybrid {
            debug!(objects = self.resolvers.len(), "dropping resolvers after trace");
            self.resolvers.clear();
        }
        Ok(Stacktrace::new(resolved?))
    }

    fn resolve_with_object(&mut self, frame: &ObjectFrame) -> TraceResult<FrameWithInlines>
    {
        let resolver = match self.resolvers.entry(frame.object_path.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let resolver = match DwarfResolver::open(entry.key().clone(), self.config) {
                    Ok(resolver) => resolver,
                    Err(err) if self.config.absorb_errors => {
                        // Remember the object as having no debug info so the
                        // failure is reported once.
                        warn!(object = %entry.key().display(), error = %err, "failed to open object");
                        DwarfResolver::from_access(entry.key().clone(), None, self.config)
                    }
                    Err(err) => return Err(err),
                };
                entry.insert(resolver)
            }
        };
        resolver.resolve(frame)
    }
}

impl<A: DebugInfoAccess> Default for Symbolizer<A>
{
    fn default() -> Self
    {
        Self::new(ResolverConfig::default())
    }
}
