//! In-memory debug info for unit tests.
//!
//! Nodes live in a per-unit arena; a node's `DieRef::offset` is its arena
//! index and the unit root is always index 0.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use gimli::{constants, DwAt, DwTag};

use super::{ArangeEntry, DebugInfoAccess, DieRef, LineRow, PcRange, PcRanges, UnitId};
use crate::error::{TraceError, TraceResult};

#[derive(Debug, Clone)]
struct Node
{
    tag: DwTag,
    children: Vec<usize>,
    strings: HashMap<DwAt, String>,
    udata: HashMap<DwAt, u64>,
    refs: HashMap<DwAt, DieRef>,
    ranges: PcRanges,
}

impl Node
{
    fn new(tag: DwTag) -> Self
    {
        Self {
            tag,
            children: Vec::new(),
            strings: HashMap::new(),
            udata: HashMap::new(),
            refs: HashMap::new(),
            ranges: PcRanges::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct LineProgram
{
    version: u16,
    files: HashMap<u64, String>,
    rows: Vec<LineRow>,
}

#[derive(Debug, Clone)]
struct SyntheticUnit
{
    version: u16,
    nodes: Vec<Node>,
    lines: Option<LineProgram>,
}

#[derive(Debug, Clone)]
pub(crate) struct SyntheticDebugInfo
{
    path: PathBuf,
    units: Vec<SyntheticUnit>,
    aranges: Vec<ArangeEntry>,
    split_files: HashMap<PathBuf, SyntheticDebugInfo>,
    broken: HashSet<DieRef>,
    split_opens: Rc<Cell<usize>>,
    line_runs: Rc<Cell<usize>>,
}

impl SyntheticDebugInfo
{
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self
    {
        Self {
            path: path.into(),
            units: Vec::new(),
            aranges: Vec::new(),
            split_files: HashMap::new(),
            broken: HashSet::new(),
            split_opens: Rc::new(Cell::new(0)),
            line_runs: Rc::new(Cell::new(0)),
        }
    }

    /// Add a unit whose root is a `DW_TAG_compile_unit`.
    pub(crate) fn add_unit(&mut self, version: u16) -> DieRef
    {
        self.units.push(SyntheticUnit {
            version,
            nodes: vec![Node::new(constants::DW_TAG_compile_unit)],
            lines: None,
        });
        DieRef {
            unit: UnitId(self.units.len() - 1),
            offset: 0,
        }
    }

    pub(crate) fn add_child(&mut self, parent: DieRef, tag: DwTag) -> DieRef
    {
        let unit = &mut self.units[parent.unit.0];
        unit.nodes.push(Node::new(tag));
        let offset = unit.nodes.len() - 1;
        unit.nodes[parent.offset].children.push(offset);
        DieRef {
            unit: parent.unit,
            offset,
        }
    }

    fn node_mut(&mut self, die: DieRef) -> &mut Node
    {
        &mut self.units[die.unit.0].nodes[die.offset]
    }

    pub(crate) fn set_tag(&mut self, die: DieRef, tag: DwTag)
    {
        self.node_mut(die).tag = tag;
    }

    pub(crate) fn set_string(&mut self, die: DieRef, attr: DwAt, value: &str)
    {
        self.node_mut(die).strings.insert(attr, value.to_string());
    }

    pub(crate) fn set_udata(&mut self, die: DieRef, attr: DwAt, value: u64)
    {
        self.node_mut(die).udata.insert(attr, value);
    }

    pub(crate) fn set_ref(&mut self, die: DieRef, attr: DwAt, target: DieRef)
    {
        self.node_mut(die).refs.insert(attr, target);
    }

    pub(crate) fn set_ranges(&mut self, die: DieRef, ranges: &[(u64, u64)])
    {
        self.node_mut(die).ranges = ranges.iter().map(|&(begin, end)| PcRange::new(begin, end)).collect();
    }

    /// Subprogram with a name and ranges, parented at `parent`.
    pub(crate) fn add_function(&mut self, parent: DieRef, name: &str, ranges: &[(u64, u64)]) -> DieRef
    {
        let die = self.add_child(parent, constants::DW_TAG_subprogram);
        self.set_string(die, constants::DW_AT_name, name);
        self.set_ranges(die, ranges);
        die
    }

    /// Inlined call of `origin` inside `parent`, called from `call_file:call_line`.
    pub(crate) fn add_inline(
        &mut self,
        parent: DieRef,
        origin: DieRef,
        ranges: &[(u64, u64)],
        call_file: u64,
        call_line: u64,
    ) -> DieRef
    {
        let die = self.add_child(parent, constants::DW_TAG_inlined_subroutine);
        self.set_ref(die, constants::DW_AT_abstract_origin, origin);
        self.set_ranges(die, ranges);
        self.set_udata(die, constants::DW_AT_call_file, call_file);
        self.set_udata(die, constants::DW_AT_call_line, call_line);
        die
    }

    pub(crate) fn add_arange(&mut self, begin: u64, end: u64, unit: UnitId)
    {
        self.aranges.push(ArangeEntry {
            range: PcRange::new(begin, end),
            unit,
        });
    }

    /// Give `unit` a line program with `files` (raw index, path).
    pub(crate) fn set_line_program(&mut self, unit: UnitId, version: u16, files: &[(u64, &str)])
    {
        self.units[unit.0].lines = Some(LineProgram {
            version,
            files: files.iter().map(|&(index, path)| (index, path.to_string())).collect(),
            rows: Vec::new(),
        });
    }

    /// Append one sequence of `(address, file, line, column)` rows ending at `end`.
    pub(crate) fn add_sequence(&mut self, unit: UnitId, rows: &[(u64, u64, u32, u32)], end: u64)
    {
        let Some(program) = self.units[unit.0].lines.as_mut() else {
            panic!("unit {} has no line program", unit.0);
        };
        for &(address, file, line, column) in rows {
            program.rows.push(LineRow {
                address,
                file,
                line: Some(line),
                column: (column != 0).then_some(column),
                end_sequence: false,
            });
        }
        program.rows.push(LineRow {
            address: end,
            file: 0,
            line: None,
            column: None,
            end_sequence: true,
        });
    }

    pub(crate) fn add_split_file(&mut self, path: impl Into<PathBuf>, split: SyntheticDebugInfo)
    {
        self.split_files.insert(path.into(), split);
    }

    /// Every access to `die` fails with an invariant error.
    pub(crate) fn break_die(&mut self, die: DieRef)
    {
        self.broken.insert(die);
    }

    pub(crate) fn split_opens(&self) -> usize
    {
        self.split_opens.get()
    }

    pub(crate) fn line_runs(&self) -> usize
    {
        self.line_runs.get()
    }

    fn node(&self, die: DieRef) -> TraceResult<&Node>
    {
        if self.broken.contains(&die) {
            return Err(TraceError::Invariant(format!("broken entry {die:?}")));
        }
        self.units
            .get(die.unit.0)
            .and_then(|unit| unit.nodes.get(die.offset))
            .ok_or_else(|| TraceError::Invariant(format!("no entry at {die:?}")))
    }

    fn unit(&self, unit: UnitId) -> TraceResult<&SyntheticUnit>
    {
        self.units
            .get(unit.0)
            .ok_or_else(|| TraceError::Invariant(format!("unit {} out of range", unit.0)))
    }
}

impl DebugInfoAccess for SyntheticDebugInfo
{
    fn open(path: &Path) -> TraceResult<Option<Self>>
    {
        Err(TraceError::Environment {
            path: path.to_path_buf(),
            message: "synthetic debug info cannot be opened from disk".to_string(),
        })
    }

    fn path(&self) -> &Path
    {
        &self.path
    }

    fn unit_count(&self) -> usize
    {
        self.units.len()
    }

    fn unit_root(&self, unit: UnitId) -> TraceResult<DieRef>
    {
        self.unit(unit)?;
        Ok(DieRef { unit, offset: 0 })
    }

    fn unit_version(&self, unit: UnitId) -> TraceResult<u16>
    {
        Ok(self.unit(unit)?.version)
    }

    fn tag(&self, die: DieRef) -> TraceResult<DwTag>
    {
        Ok(self.node(die)?.tag)
    }

    fn children(&self, die: DieRef) -> TraceResult<Vec<DieRef>>
    {
        Ok(self
            .node(die)?
            .children
            .iter()
            .map(|&offset| DieRef {
                unit: die.unit,
                offset,
            })
            .collect())
    }

    fn string_attr(&self, die: DieRef, attr: DwAt) -> TraceResult<Option<String>>
    {
        Ok(self.node(die)?.strings.get(&attr).cloned())
    }

    fn udata_attr(&self, die: DieRef, attr: DwAt) -> TraceResult<Option<u64>>
    {
        Ok(self.node(die)?.udata.get(&attr).copied())
    }

    fn reference_attr(&self, die: DieRef, attr: DwAt) -> TraceResult<Option<DieRef>>
    {
        Ok(self.node(die)?.refs.get(&attr).copied())
    }

    fn pc_ranges(&self, die: DieRef) -> TraceResult<PcRanges>
    {
        Ok(self.node(die)?.ranges.clone())
    }

    fn aranges(&self) -> TraceResult<Vec<ArangeEntry>>
    {
        Ok(self.aranges.clone())
    }

    fn line_table_version(&self, unit: UnitId) -> TraceResult<Option<u16>>
    {
        Ok(self.unit(unit)?.lines.as_ref().map(|program| program.version))
    }

    fn for_each_line_row(&self, unit: UnitId, visit: &mut dyn FnMut(&LineRow) -> ControlFlow<()>) -> TraceResult<bool>
    {
        let Some(program) = self.unit(unit)?.lines.as_ref() else {
            return Ok(false);
        };
        self.line_runs.set(self.line_runs.get() + 1);
        for row in &program.rows {
            if visit(row).is_break() {
                break;
            }
        }
        Ok(true)
    }

    fn line_file_name(&self, unit: UnitId, file: u64) -> TraceResult<Option<String>>
    {
        Ok(self
            .unit(unit)?
            .lines
            .as_ref()
            .and_then(|program| program.files.get(&file).cloned()))
    }

    fn open_split_unit(&self, _unit: UnitId, path: &Path) -> TraceResult<Option<Self>>
    {
        self.split_opens.set(self.split_opens.get() + 1);
        match self.split_files.get(path) {
            Some(split) => Ok(Some(split.clone())),
            None => Err(TraceError::Environment {
                path: path.to_path_buf(),
                message: "No such file or directory".to_string(),
            }),
        }
    }
}
