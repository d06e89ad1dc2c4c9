//! # Debug-Info Access Layer
//!
//! The resolver never touches raw DWARF encodings. It consumes the
//! [`DebugInfoAccess`] capability defined here:
//!
//! - unit iteration (`unit_count`, `unit_root`, `unit_version`)
//! - node traversal (`tag`, `children`) and attribute reads
//! - address ranges of a node and the optional `.debug_aranges` index
//! - line-number program decoding
//! - opening a split-DWARF companion for a skeleton unit
//!
//! Nodes are identified by [`DieRef`], a plain `(unit index, unit offset)`
//! pair, so caches can be keyed by node identity without borrowing the
//! underlying debug data.
//!
//! A missing attribute, an absent line program or a missing aranges table is
//! reported as `None`/empty, never as an error.
//!
//! [`GimliDebugInfo`] is the production implementation.

use std::ops::ControlFlow;
use std::path::Path;

use gimli::{DwAt, DwTag};
use smallvec::SmallVec;

use crate::error::TraceResult;

mod companion;
mod image;
#[cfg(test)]
pub(crate) mod synthetic;

pub use image::GimliDebugInfo;

/// Index of a unit in `.debug_info` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(pub usize);

/// Identity of one debugging information entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DieRef
{
    pub unit: UnitId,
    /// Offset of the entry within its unit
    pub offset: usize,
}

/// Half-open address range `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PcRange
{
    pub begin: u64,
    pub end: u64,
}

impl PcRange
{
    pub const fn new(begin: u64, end: u64) -> Self
    {
        Self { begin, end }
    }

    pub fn contains(&self, address: u64) -> bool
    {
        self.begin <= address && address < self.end
    }

    pub fn is_empty(&self) -> bool
    {
        self.begin >= self.end
    }
}

/// Ranges of a single node. Most nodes carry exactly one.
pub type PcRanges = SmallVec<[PcRange; 2]>;

/// One entry of the `.debug_aranges` index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArangeEntry
{
    pub range: PcRange,
    pub unit: UnitId,
}

/// One decoded line-number row.
///
/// `file` is the raw file index from the line program; use
/// [`DebugInfoAccess::line_file_name`] to turn it into a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRow
{
    pub address: u64,
    pub file: u64,
    pub line: Option<u32>,
    pub column: Option<u32>,
    /// Marks the first address past a sequence; carries no location
    pub end_sequence: bool,
}

/// Read access to one object's debug information.
pub trait DebugInfoAccess: Sized
{
    /// Open the debug information belonging to the object at `path`.
    ///
    /// `Ok(None)` means the object carries no debug info, which is not an error.
    fn open(path: &Path) -> TraceResult<Option<Self>>;

    /// Path of the file this debug info was read from.
    fn path(&self) -> &Path;

    /// Number of units in `.debug_info`.
    fn unit_count(&self) -> usize;

    /// Root node of `unit`.
    fn unit_root(&self, unit: UnitId) -> TraceResult<DieRef>;

    /// DWARF version of `unit`'s header.
    fn unit_version(&self, unit: UnitId) -> TraceResult<u16>;

    fn tag(&self, die: DieRef) -> TraceResult<DwTag>;

    /// Direct children of `die`, in file order.
    fn children(&self, die: DieRef) -> TraceResult<Vec<DieRef>>;

    /// String-valued attribute, whatever its form.
    fn string_attr(&self, die: DieRef, attr: DwAt) -> TraceResult<Option<String>>;

    /// Unsigned constant attribute (`call_line`, `call_file`, ...).
    fn udata_attr(&self, die: DieRef, attr: DwAt) -> TraceResult<Option<u64>>;

    /// Reference attribute (`specification`, `abstract_origin`) resolved to a node.
    fn reference_attr(&self, die: DieRef, attr: DwAt) -> TraceResult<Option<DieRef>>;

    /// Address ranges from `low_pc`/`high_pc` or `DW_AT_ranges`, empty ranges dropped.
    fn pc_ranges(&self, die: DieRef) -> TraceResult<PcRanges>;

    /// Contents of `.debug_aranges`; empty when the section is absent.
    fn aranges(&self) -> TraceResult<Vec<ArangeEntry>>;

    /// Version of `unit`'s line program, or `None` if it has none.
    fn line_table_version(&self, unit: UnitId) -> TraceResult<Option<u16>>;

    /// Run `unit`'s line program, handing each row to `visit` until it breaks.
    ///
    /// Returns `false` when the unit has no line program.
    fn for_each_line_row(&self, unit: UnitId, visit: &mut dyn FnMut(&LineRow) -> ControlFlow<()>) -> TraceResult<bool>;

    /// Path for a raw line-program file index, joined with its directory and
    /// the unit's compilation directory when relative.
    fn line_file_name(&self, unit: UnitId, file: u64) -> TraceResult<Option<String>>;

    /// Open the split-DWARF companion at `path` for the skeleton `unit`.
    ///
    /// Returns `Ok(None)` when the file carries no debug info.
    fn open_split_unit(&self, unit: UnitId, path: &Path) -> TraceResult<Option<Self>>;
}
