//! Gimli-backed [`DebugInfoAccess`] over an object file on disk.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gimli::{
    AttributeValue, ColumnType, DebugInfoOffset, DebuggingInformationEntry, DwAt, DwTag, Dwarf, EndianArcSlice, Reader,
    RunTimeEndian, SectionId, Unit, UnitHeader, UnitOffset,
};
use object::{Object, ObjectSection};
use once_cell::unsync::OnceCell;
use tracing::{debug, info, trace};

use super::companion::{dsym_companion, find_debuglink_companion};
use super::{ArangeEntry, DebugInfoAccess, DieRef, LineRow, PcRange, PcRanges, UnitId};
use crate::error::{map_dwarf_error, TraceError, TraceResult};

type OwnedReader = EndianArcSlice<RunTimeEndian>;
type OwnedDwarf = Dwarf<OwnedReader>;
type OwnedUnit = Unit<OwnedReader>;
type Entry<'abbrev, 'unit> = DebuggingInformationEntry<'abbrev, 'unit, OwnedReader>;

/// Section names per DWARF section: ELF spelling first, then Mach-O (16-byte limit).
const DWARF_SECTIONS: &[(SectionId, &[&str])] = &[
    (SectionId::DebugAbbrev, &[".debug_abbrev", "__debug_abbrev"]),
    (SectionId::DebugAddr, &[".debug_addr", "__debug_addr"]),
    (SectionId::DebugAranges, &[".debug_aranges", "__debug_aranges"]),
    (SectionId::DebugInfo, &[".debug_info", "__debug_info"]),
    (SectionId::DebugLine, &[".debug_line", "__debug_line"]),
    (SectionId::DebugLineStr, &[".debug_line_str", "__debug_line_str"]),
    (SectionId::DebugRanges, &[".debug_ranges", "__debug_ranges"]),
    (SectionId::DebugRngLists, &[".debug_rnglists", "__debug_rnglists"]),
    (SectionId::DebugStr, &[".debug_str", "__debug_str"]),
    (SectionId::DebugStrOffsets, &[".debug_str_offsets", "__debug_str_offs"]),
    (SectionId::DebugTypes, &[".debug_types", "__debug_types"]),
    (SectionId::DebugLoc, &[".debug_loc", "__debug_loc"]),
    (SectionId::DebugLocLists, &[".debug_loclists", "__debug_loclists"]),
];

/// Which spelling of the section names to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor
{
    Main,
    /// Split-DWARF companion (`.debug_info.dwo`, ...), falling back to plain names
    Dwo,
}

struct LoadedSections
{
    endian: RunTimeEndian,
    data: HashMap<SectionId, Arc<[u8]>>,
}

impl LoadedSections
{
    fn has_debug_info(&self) -> bool
    {
        self.data.get(&SectionId::DebugInfo).is_some_and(|bytes| !bytes.is_empty())
    }

    fn reader(&self, id: SectionId) -> OwnedReader
    {
        let data = self.data.get(&id).cloned().unwrap_or_else(|| Arc::<[u8]>::from(Vec::new()));
        EndianArcSlice::new(data, self.endian)
    }

    fn dwarf(&self) -> TraceResult<OwnedDwarf>
    {
        Dwarf::load(|id| Ok::<_, gimli::Error>(self.reader(id))).map_err(|err| map_dwarf_error("loading sections", err))
    }
}

fn read_object(path: &Path) -> TraceResult<Vec<u8>>
{
    fs::read(path).map_err(|err| TraceError::Environment {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

fn parse_object<'data>(path: &Path, data: &'data [u8]) -> TraceResult<object::File<'data>>
{
    object::File::parse(data).map_err(|err| TraceError::Environment {
        path: path.to_path_buf(),
        message: format!("failed to parse object: {err}"),
    })
}

fn load_sections(path: &Path, file: &object::File<'_>, flavor: Flavor) -> TraceResult<LoadedSections>
{
    let endian = if file.is_little_endian() {
        RunTimeEndian::Little
    } else {
        RunTimeEndian::Big
    };

    let mut data = HashMap::new();
    for (id, aliases) in DWARF_SECTIONS {
        let dwo_name = if flavor == Flavor::Dwo { id.dwo_name() } else { None };
        let section = dwo_name
            .into_iter()
            .chain(aliases.iter().copied())
            .find_map(|name| file.section_by_name(name));
        let Some(section) = section else {
            continue;
        };
        let bytes = section.uncompressed_data().map_err(|err| TraceError::Environment {
            path: path.to_path_buf(),
            message: format!("failed to read {}: {err}", id.name()),
        })?;
        let bytes = match bytes {
            Cow::Borrowed(bytes) => Arc::<[u8]>::from(bytes.to_vec()),
            Cow::Owned(vec) => vec.into(),
        };
        data.insert(*id, bytes);
    }

    Ok(LoadedSections { endian, data })
}

/// Debug information of one object, read with `gimli`.
///
/// Unit headers are enumerated up front; units themselves (abbreviations,
/// line program header) are parsed the first time they are touched.
pub struct GimliDebugInfo
{
    path: PathBuf,
    dwarf: OwnedDwarf,
    headers: Vec<UnitHeader<OwnedReader>>,
    units: Vec<OnceCell<OwnedUnit>>,
}

impl GimliDebugInfo
{
    /// Open the debug information for the object at `path`.
    ///
    /// A `<path>.dSYM` bundle takes precedence when present. When the object
    /// has no `.debug_info`, a `.gnu_debuglink` companion is tried.
    ///
    /// ## Returns
    ///
    /// `Ok(None)` when neither the object nor a companion carries DWARF.
    ///
    /// ## Errors
    ///
    /// [`TraceError::Environment`] when a file cannot be read or parsed,
    /// [`TraceError::Dwarf`] when the unit headers are malformed.
    pub fn load(path: &Path) -> TraceResult<Option<Self>>
    {
        let source = dsym_companion(path).unwrap_or_else(|| path.to_path_buf());
        let data = read_object(&source)?;
        let file = parse_object(&source, &data)?;
        let sections = load_sections(&source, &file, Flavor::Main)?;
        if sections.has_debug_info() {
            debug!(path = %source.display(), "loaded debug sections");
            return Self::from_loaded(source, &sections).map(Some);
        }

        let Some(companion) = find_debuglink_companion(&source, &file) else {
            debug!(path = %source.display(), "object carries no debug info");
            return Ok(None);
        };
        info!(
            object = %source.display(),
            companion = %companion.display(),
            "loading debug info from companion file"
        );
        let data = read_object(&companion)?;
        let file = parse_object(&companion, &data)?;
        let sections = load_sections(&companion, &file, Flavor::Main)?;
        if !sections.has_debug_info() {
            return Ok(None);
        }
        Self::from_loaded(companion, &sections).map(Some)
    }

    /// Build from raw section contents, e.g. produced by `gimli::write`.
    ///
    /// Returns `Ok(None)` when `.debug_info` is missing or empty.
    ///
    /// ## Errors
    ///
    /// [`TraceError::Dwarf`] when the unit headers are malformed.
    pub fn from_sections(
        path: impl Into<PathBuf>,
        endian: RunTimeEndian,
        sections: HashMap<SectionId, Vec<u8>>,
    ) -> TraceResult<Option<Self>>
    {
        let sections = LoadedSections {
            endian,
            data: sections.into_iter().map(|(id, bytes)| (id, Arc::<[u8]>::from(bytes))).collect(),
        };
        if !sections.has_debug_info() {
            return Ok(None);
        }
        Self::from_loaded(path.into(), &sections).map(Some)
    }

    fn from_loaded(path: PathBuf, sections: &LoadedSections) -> TraceResult<Self>
    {
        Self::from_dwarf(path, sections.dwarf()?)
    }

    fn from_dwarf(path: PathBuf, dwarf: OwnedDwarf) -> TraceResult<Self>
    {
        let mut headers = Vec::new();
        let mut iter = dwarf.units();
        while let Some(header) = iter.next().map_err(|err| map_dwarf_error("reading unit headers", err))? {
            headers.push(header);
        }
        trace!(path = %path.display(), units = headers.len(), "enumerated units");
        let units = headers.iter().map(|_| OnceCell::new()).collect();
        Ok(Self {
            path,
            dwarf,
            headers,
            units,
        })
    }

    /// Parse every unit now, giving each the base addresses of `skeleton`.
    fn relocate_units(&mut self, skeleton: &OwnedUnit) -> TraceResult<()>
    {
        let mut units = Vec::with_capacity(self.headers.len());
        for header in &self.headers {
            let mut parsed = self
                .dwarf
                .unit(header.clone())
                .map_err(|err| map_dwarf_error("parsing split unit", err))?;
            parsed.copy_relocated_attributes(skeleton);
            units.push(OnceCell::with_value(parsed));
        }
        self.units = units;
        Ok(())
    }

    fn unit(&self, id: UnitId) -> TraceResult<&OwnedUnit>
    {
        let (Some(header), Some(cell)) = (self.headers.get(id.0), self.units.get(id.0)) else {
            return Err(TraceError::Invariant(format!(
                "unit {} out of range ({} units in {})",
                id.0,
                self.headers.len(),
                self.path.display()
            )));
        };
        cell.get_or_try_init(|| {
            self.dwarf
                .unit(header.clone())
                .map_err(|err| map_dwarf_error("parsing unit", err))
        })
    }

    fn with_entry<T>(&self, die: DieRef, f: impl FnOnce(&OwnedUnit, &Entry<'_, '_>) -> TraceResult<T>) -> TraceResult<T>
    {
        let unit = self.unit(die.unit)?;
        let entry = unit
            .entry(UnitOffset(die.offset))
            .map_err(|err| map_dwarf_error("reading entry", err))?;
        f(unit, &entry)
    }

    fn attr_string(&self, unit: &OwnedUnit, value: AttributeValue<OwnedReader>) -> TraceResult<String>
    {
        let raw = self
            .dwarf
            .attr_string(unit, value)
            .map_err(|err| map_dwarf_error("reading string attribute", err))?;
        let text = raw
            .to_string_lossy()
            .map_err(|err| map_dwarf_error("decoding string attribute", err))?;
        Ok(text.into_owned())
    }

    /// Map a section-relative reference to the unit containing it.
    fn die_at_section_offset(&self, offset: DebugInfoOffset) -> Option<DieRef>
    {
        let start_of = |header: &UnitHeader<OwnedReader>| header.offset().as_debug_info_offset().map_or(0, |o| o.0);
        let index = self.headers.partition_point(|header| start_of(header) <= offset.0);
        let index = index.checked_sub(1)?;
        let unit_offset = offset.to_unit_offset(&self.headers[index])?;
        Some(DieRef {
            unit: UnitId(index),
            offset: unit_offset.0,
        })
    }

    fn unit_at_section_offset(&self, offset: DebugInfoOffset) -> Option<UnitId>
    {
        self.headers
            .iter()
            .position(|header| header.offset().as_debug_info_offset() == Some(offset))
            .map(UnitId)
    }
}

fn to_u32(value: u64) -> Option<u32>
{
    u32::try_from(value).ok()
}

fn is_absolute_path(path: &str) -> bool
{
    let bytes = path.as_bytes();
    path.starts_with('/')
        || path.starts_with('\\')
        || (bytes.len() > 2 && bytes[1] == b':' && (bytes[2] == b'\\' || bytes[2] == b'/'))
}

fn push_path(path: &mut String, component: &str)
{
    if component.is_empty() {
        return;
    }
    if path.is_empty() || is_absolute_path(component) {
        component.clone_into(path);
        return;
    }
    let separator = if path.contains('\\') && !path.contains('/') { '\\' } else { '/' };
    if !path.ends_with(separator) {
        path.push(separator);
    }
    path.push_str(component);
}

impl DebugInfoAccess for GimliDebugInfo
{
    fn open(path: &Path) -> TraceResult<Option<Self>>
    {
        Self::load(path)
    }

    fn path(&self) -> &Path
    {
        &self.path
    }

    fn unit_count(&self) -> usize
    {
        self.headers.len()
    }

    fn unit_root(&self, unit: UnitId) -> TraceResult<DieRef>
    {
        let parsed = self.unit(unit)?;
        let mut cursor = parsed.entries();
        let (_, entry) = cursor
            .next_dfs()
            .map_err(|err| map_dwarf_error("reading unit root", err))?
            .ok_or_else(|| TraceError::Invariant(format!("unit {} has no root entry", unit.0)))?;
        Ok(DieRef {
            unit,
            offset: entry.offset().0,
        })
    }

    fn unit_version(&self, unit: UnitId) -> TraceResult<u16>
    {
        self.headers
            .get(unit.0)
            .map(UnitHeader::version)
            .ok_or_else(|| TraceError::Invariant(format!("unit {} out of range", unit.0)))
    }

    fn tag(&self, die: DieRef) -> TraceResult<DwTag>
    {
        self.with_entry(die, |_, entry| Ok(entry.tag()))
    }

    fn children(&self, die: DieRef) -> TraceResult<Vec<DieRef>>
    {
        let unit = self.unit(die.unit)?;
        let mut tree = unit
            .entries_tree(Some(UnitOffset(die.offset)))
            .map_err(|err| map_dwarf_error("reading entry tree", err))?;
        let root = tree.root().map_err(|err| map_dwarf_error("reading entry tree", err))?;
        let mut iter = root.children();
        let mut children = Vec::new();
        while let Some(child) = iter.next().map_err(|err| map_dwarf_error("reading children", err))? {
            children.push(DieRef {
                unit: die.unit,
                offset: child.entry().offset().0,
            });
        }
        Ok(children)
    }

    fn string_attr(&self, die: DieRef, attr: DwAt) -> TraceResult<Option<String>>
    {
        self.with_entry(die, |unit, entry| {
            let value = entry
                .attr_value(attr)
                .map_err(|err| map_dwarf_error("reading attribute", err))?;
            value.map(|value| self.attr_string(unit, value)).transpose()
        })
    }

    fn udata_attr(&self, die: DieRef, attr: DwAt) -> TraceResult<Option<u64>>
    {
        self.with_entry(die, |_, entry| {
            let value = entry
                .attr_value(attr)
                .map_err(|err| map_dwarf_error("reading attribute", err))?;
            Ok(match value {
                Some(AttributeValue::FileIndex(index)) => Some(index),
                Some(other) => other.udata_value(),
                None => None,
            })
        })
    }

    fn reference_attr(&self, die: DieRef, attr: DwAt) -> TraceResult<Option<DieRef>>
    {
        self.with_entry(die, |_, entry| {
            let value = entry
                .attr_value(attr)
                .map_err(|err| map_dwarf_error("reading attribute", err))?;
            Ok(match value {
                Some(AttributeValue::UnitRef(offset)) => Some(DieRef {
                    unit: die.unit,
                    offset: offset.0,
                }),
                Some(AttributeValue::DebugInfoRef(offset)) => self.die_at_section_offset(offset),
                _ => None,
            })
        })
    }

    fn pc_ranges(&self, die: DieRef) -> TraceResult<PcRanges>
    {
        self.with_entry(die, |unit, entry| {
            let mut iter = self
                .dwarf
                .die_ranges(unit, entry)
                .map_err(|err| map_dwarf_error("reading ranges", err))?;
            let mut ranges = PcRanges::new();
            while let Some(range) = iter.next().map_err(|err| map_dwarf_error("reading ranges", err))? {
                if range.begin < range.end {
                    ranges.push(PcRange::new(range.begin, range.end));
                }
            }
            Ok(ranges)
        })
    }

    fn aranges(&self) -> TraceResult<Vec<ArangeEntry>>
    {
        let mut entries = Vec::new();
        let mut headers = self.dwarf.debug_aranges.headers();
        while let Some(header) = headers.next().map_err(|err| map_dwarf_error("reading aranges", err))? {
            let Some(unit) = self.unit_at_section_offset(header.debug_info_offset()) else {
                debug!(offset = header.debug_info_offset().0, "arange set points at no unit");
                continue;
            };
            let mut iter = header.entries();
            while let Some(entry) = iter.next().map_err(|err| map_dwarf_error("reading aranges", err))? {
                let range = entry.range();
                if range.begin < range.end {
                    entries.push(ArangeEntry {
                        range: PcRange::new(range.begin, range.end),
                        unit,
                    });
                }
            }
        }
        Ok(entries)
    }

    fn line_table_version(&self, unit: UnitId) -> TraceResult<Option<u16>>
    {
        let parsed = self.unit(unit)?;
        Ok(parsed.line_program.as_ref().map(|program| program.header().version()))
    }

    fn for_each_line_row(&self, unit: UnitId, visit: &mut dyn FnMut(&LineRow) -> ControlFlow<()>) -> TraceResult<bool>
    {
        let parsed = self.unit(unit)?;
        let Some(program) = parsed.line_program.clone() else {
            return Ok(false);
        };
        let mut rows = program.rows();
        while let Some((_, row)) = rows.next_row().map_err(|err| map_dwarf_error("running line program", err))? {
            let decoded = LineRow {
                address: row.address(),
                file: row.file_index(),
                line: row.line().and_then(|line| to_u32(line.get())),
                column: match row.column() {
                    ColumnType::LeftEdge => None,
                    ColumnType::Column(column) => to_u32(column.get()),
                },
                end_sequence: row.end_sequence(),
            };
            if visit(&decoded).is_break() {
                break;
            }
        }
        Ok(true)
    }

    fn line_file_name(&self, unit: UnitId, file: u64) -> TraceResult<Option<String>>
    {
        let parsed = self.unit(unit)?;
        let Some(program) = parsed.line_program.as_ref() else {
            return Ok(None);
        };
        let header = program.header();
        let Some(entry) = header.file(file) else {
            return Ok(None);
        };

        let name = self.attr_string(parsed, entry.path_name())?;
        if is_absolute_path(&name) {
            return Ok(Some(name));
        }
        let mut path = String::new();
        if let Some(comp_dir) = &parsed.comp_dir {
            let comp_dir = comp_dir
                .to_string_lossy()
                .map_err(|err| map_dwarf_error("decoding comp_dir", err))?;
            push_path(&mut path, &comp_dir);
        }
        if let Some(directory) = entry.directory(header) {
            let directory = self.attr_string(parsed, directory)?;
            push_path(&mut path, &directory);
        }
        push_path(&mut path, &name);
        Ok(Some(path))
    }

    fn open_split_unit(&self, unit: UnitId, path: &Path) -> TraceResult<Option<Self>>
    {
        let skeleton = self.unit(unit)?;
        let data = read_object(path)?;
        let file = parse_object(path, &data)?;
        let sections = load_sections(path, &file, Flavor::Dwo)?;
        if !sections.has_debug_info() {
            return Ok(None);
        }

        let mut dwarf = sections.dwarf()?;
        dwarf.make_dwo(&self.dwarf);
        let mut split = Self::from_dwarf(path.to_path_buf(), dwarf)?;
        split.relocate_units(skeleton)?;
        debug!(
            skeleton = %self.path.display(),
            split = %path.display(),
            units = split.headers.len(),
            "opened split unit"
        );
        Ok(Some(split))
    }
}
