//! Per-object address resolution.
//!
//! [`DwarfResolver`] owns one object's debug info and every table derived
//! from it. A query runs through unit lookup, split-unit delegation, the
//! line table and finally function and inline discovery:
//!
//! ```text
//! ObjectFrame ─▶ CuIndex ─▶ skeleton? ─yes─▶ nested resolver (companion file)
//!                              │
//!                              no
//!                              ▼
//!                  LineTables + SubprogramIndex ─▶ FrameWithInlines
//! ```
//!
//! Which tables are kept between queries is decided by the resolver's
//! [`CacheMode`](crate::config::CacheMode); results never depend on it.

pub(crate) mod cu_index;
pub(crate) mod line_table;
pub(crate) mod ranges;
pub(crate) mod split;
pub(crate) mod subprograms;

use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use self::cu_index::CuIndex;
use self::line_table::{LineContext, LineLocation, LineTables};
use self::split::SplitResolvers;
use self::subprograms::SubprogramIndex;
use crate::config::ResolverConfig;
use crate::dwarf::{DebugInfoAccess, DieRef, GimliDebugInfo};
use crate::error::TraceResult;
use crate::types::{FrameWithInlines, ObjectFrame, ResolvedFrame};

/// Resolver over on-disk objects read through gimli.
pub type ObjectResolver = DwarfResolver<GimliDebugInfo>;

/// Resolves object-relative addresses of one object to source locations.
///
/// Not-found conditions produce empty fields. Errors are only returned for
/// unreadable files or malformed debug info, and leave the resolver usable
/// for other addresses.
pub struct DwarfResolver<A: DebugInfoAccess = GimliDebugInfo>
{
    object_path: PathBuf,
    /// `None` when the object has no debug info at all
    access: Option<A>,
    config: ResolverConfig,
    units: CuIndex,
    lines: LineTables,
    subprograms: SubprogramIndex,
    split: SplitResolvers<A>,
}

impl<A: DebugInfoAccess> DwarfResolver<A>
{
    /// Open the debug info of the object at `path`.
    ///
    /// An object without debug info is not an error; its frames resolve to
    /// addresses only.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::Environment`](crate::error::TraceError::Environment)
    /// when the file cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>, config: ResolverConfig) -> TraceResult<Self>
    {
        let path = path.into();
        let access = A::open(&path)?;
        match &access {
            Some(access) => debug!(path = %path.display(), source = %access.path().display(), "opened debug info"),
            None => debug!(path = %path.display(), "object has no debug info"),
        }
        Ok(Self::from_access(path, access, config))
    }

    /// Wrap an already opened debug-info handle.
    pub fn from_access(path: impl Into<PathBuf>, access: Option<A>, config: ResolverConfig) -> Self
    {
        Self {
            object_path: path.into(),
            access,
            config,
            units: CuIndex::new(),
            lines: LineTables::new(),
            subprograms: SubprogramIndex::new(),
            split: SplitResolvers::default(),
        }
    }

    pub fn object_path(&self) -> &Path
    {
        &self.object_path
    }

    pub fn config(&self) -> ResolverConfig
    {
        self.config
    }

    /// File the debug info was read from.
    ///
    /// Differs from [`object_path`](Self::object_path) when the info lives in
    /// a `.dSYM` bundle or a `.gnu_debuglink` companion.
    pub fn debug_info_path(&self) -> Option<&Path>
    {
        self.access.as_ref().map(A::path)
    }

    /// Whether any debug info was found for this object.
    pub fn has_debug_info(&self) -> bool
    {
        self.access.is_some()
    }

    /// Resolve one frame to its function, source location and inlined calls.
    ///
    /// # Errors
    ///
    /// Propagates failures of the debug-info layer, including a split
    /// companion file that cannot be opened. Such an error concerns only this
    /// frame.
    pub fn resolve(&mut self, frame: &ObjectFrame) -> TraceResult<FrameWithInlines>
    {
        let Self {
            access,
            config,
            units,
            lines,
            subprograms,
            split: companions,
            ..
        } = self;
        let Some(access) = access.as_ref() else {
            return Ok(FrameWithInlines::new(ResolvedFrame::unresolved(frame)));
        };

        let address = frame.object_address.value();
        trace!(address, object = %frame.object_path.display(), "resolving");
        let Some(cu) = units.lookup(access, address, config.cache_mode)? else {
            trace!(address, "no unit covers address");
            return Ok(FrameWithInlines::new(ResolvedFrame::unresolved(frame)));
        };

        if let Some(companion) = split::companion_path(access, cu)? {
            if let Some(resolved) = companions.resolve(access, lines, cu, &companion, *config, frame)? {
                return Ok(resolved);
            }
            debug!(companion = %companion.display(), "companion has no debug info, using skeleton");
        }

        let context = LineContext {
            access,
            tables: lines,
            unit: cu.unit,
        };
        resolve_in_unit(access, cu, context, subprograms, config, frame)
    }

    /// Resolve `frame` in this companion resolver, reading lines from the
    /// skeleton unit of the parent object.
    fn resolve_split(
        &mut self,
        frame: &ObjectFrame,
        parent: &A,
        skeleton: DieRef,
        parent_lines: &mut LineTables,
    ) -> TraceResult<FrameWithInlines>
    {
        let Self {
            access,
            config,
            subprograms,
            ..
        } = self;
        let Some(access) = access.as_ref() else {
            return Ok(FrameWithInlines::new(ResolvedFrame::unresolved(frame)));
        };

        let address = frame.object_address.value();
        let Some(cu) = CuIndex::lookup_split(access, parent, skeleton, address)? else {
            return Ok(FrameWithInlines::new(ResolvedFrame::unresolved(frame)));
        };
        let context = LineContext {
            access: parent,
            tables: parent_lines,
            unit: skeleton.unit,
        };
        resolve_in_unit(access, cu, context, subprograms, config, frame)
    }

    #[cfg(test)]
    pub(crate) fn split_resolvers(&self) -> usize
    {
        self.split.len()
    }
}

fn resolve_in_unit<A: DebugInfoAccess>(
    access: &A,
    cu: DieRef,
    mut lines: LineContext<'_, A>,
    subprograms: &mut SubprogramIndex,
    config: &ResolverConfig,
    frame: &ObjectFrame,
) -> TraceResult<FrameWithInlines>
{
    let address = frame.object_address.value();
    let mode = config.cache_mode;
    let mut resolved = ResolvedFrame::unresolved(frame);
    let mut location = lines.lookup(address, mode)?.unwrap_or_default();

    let Some(function) = subprograms.lookup(access, cu, address, mode)? else {
        trace!(address, "no function covers address");
        apply_location(&mut resolved, location);
        return Ok(FrameWithInlines::new(resolved));
    };
    resolved.symbol = subprograms::symbol_name(access, function)?.unwrap_or_default();

    if !config.resolve_inlines {
        apply_location(&mut resolved, location);
        return Ok(FrameWithInlines::new(resolved));
    }

    // The innermost callee sits at the line-table location; every other
    // frame sits at the call site of the one it contains.
    let sites = subprograms::inline_chain(access, function, address)?;
    let mut inlines = Vec::with_capacity(sites.len());
    for site in sites.into_iter().rev() {
        let call_site = LineLocation {
            filename: call_file_name(access, cu, &lines, site.call_file)?,
            line: site.call_line,
            column: site.call_column,
        };
        let mut inline = ResolvedFrame::unresolved(frame);
        inline.symbol = site.symbol;
        inline.is_inline = true;
        apply_location(&mut inline, std::mem::replace(&mut location, call_site));
        inlines.push(inline);
    }
    apply_location(&mut resolved, location);
    Ok(FrameWithInlines {
        frame: resolved,
        inlines,
    })
}

fn apply_location(frame: &mut ResolvedFrame, location: LineLocation)
{
    frame.filename = location.filename;
    frame.line = location.line;
    frame.column = location.column;
}

/// Path named by an inline call's `DW_AT_call_file`.
///
/// The index refers to the unit's own line header when it has one, and
/// otherwise to the header the line rows come from (a split unit's skeleton).
/// Before DWARF 5, index 0 means "no file".
fn call_file_name<A: DebugInfoAccess>(
    access: &A,
    cu: DieRef,
    lines: &LineContext<'_, A>,
    file: Option<u64>,
) -> TraceResult<String>
{
    let Some(file) = file else {
        return Ok(String::new());
    };
    let (version, own_header) = match access.line_table_version(cu.unit)? {
        Some(version) => (version, true),
        None => match lines.access.line_table_version(lines.unit)? {
            Some(version) => (version, false),
            None => return Ok(String::new()),
        },
    };
    if version < 5 && file == 0 {
        return Ok(String::new());
    }
    if own_header {
        line_table::file_name(access, cu.unit, file)
    } else {
        lines.file_name(file)
    }
}
