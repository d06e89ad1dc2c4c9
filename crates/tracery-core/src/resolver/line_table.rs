//! Address to file/line/column lookup over a unit's line-number program.
//!
//! Row precedence, shared by both cache modes: for an address, the row with
//! the greatest address not above it wins. Among rows at the same address a
//! real row beats an end-of-sequence marker, and a later row beats an earlier
//! one. An end-of-sequence winner means the address falls in a gap.

use std::collections::HashMap;
use std::ops::ControlFlow;

use once_cell::unsync::OnceCell;
use tracing::{debug, trace};

use crate::config::CacheMode;
use crate::dwarf::{DebugInfoAccess, LineRow, UnitId};
use crate::error::TraceResult;

/// Source position for one address.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct LineLocation
{
    pub filename: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

fn precedence(row: &LineRow) -> (u64, bool)
{
    (row.address, !row.end_sequence)
}

struct LineEntry
{
    row: LineRow,
    filename: OnceCell<String>,
}

/// Rows of one unit sorted by address, one row per address.
struct LineTable
{
    entries: Vec<LineEntry>,
}

impl LineTable
{
    fn build<A: DebugInfoAccess>(access: &A, unit: UnitId) -> TraceResult<Option<Self>>
    {
        let mut rows = Vec::new();
        let present = access.for_each_line_row(unit, &mut |row| {
            rows.push(*row);
            ControlFlow::Continue(())
        })?;
        if !present {
            return Ok(None);
        }

        rows.sort_by_key(precedence);
        let mut entries: Vec<LineEntry> = Vec::with_capacity(rows.len());
        for row in rows {
            let entry = LineEntry {
                row,
                filename: OnceCell::new(),
            };
            match entries.last_mut() {
                Some(last) if last.row.address == row.address => *last = entry,
                _ => entries.push(entry),
            }
        }
        debug!(unit = unit.0, rows = entries.len(), "built line table");
        Ok(Some(Self { entries }))
    }

    fn find(&self, address: u64) -> Option<&LineEntry>
    {
        let index = self.entries.partition_point(|entry| entry.row.address <= address);
        let entry = self.entries.get(index.checked_sub(1)?)?;
        (!entry.row.end_sequence).then_some(entry)
    }
}

/// Per-unit line tables owned by one resolver.
#[derive(Default)]
pub(crate) struct LineTables
{
    tables: HashMap<UnitId, Option<LineTable>>,
}

impl LineTables
{
    pub(crate) fn new() -> Self
    {
        Self::default()
    }

    /// Location of `address` in `unit`, or `None` when no row covers it.
    pub(crate) fn lookup<A: DebugInfoAccess>(
        &mut self,
        access: &A,
        unit: UnitId,
        address: u64,
        mode: CacheMode,
    ) -> TraceResult<Option<LineLocation>>
    {
        if !mode.retains_tables() {
            return stream_lookup(access, unit, address);
        }

        if !self.tables.contains_key(&unit) {
            let built = LineTable::build(access, unit)?;
            self.tables.insert(unit, built);
        }
        let Some(entry) = self.tables[&unit].as_ref().and_then(|table| table.find(address)) else {
            trace!(unit = unit.0, address, "no line row");
            return Ok(None);
        };
        let filename = entry
            .filename
            .get_or_try_init(|| file_name(access, unit, entry.row.file))?;
        Ok(Some(LineLocation {
            filename: filename.clone(),
            line: entry.row.line,
            column: entry.row.column,
        }))
    }

    /// Row addresses of a cached table, in table order.
    #[cfg(test)]
    pub(crate) fn row_addresses(&self, unit: UnitId) -> Option<Vec<u64>>
    {
        let table = self.tables.get(&unit)?.as_ref()?;
        Some(table.entries.iter().map(|entry| entry.row.address).collect())
    }
}

/// Path of a raw file index; empty when the line program does not name it.
pub(crate) fn file_name<A: DebugInfoAccess>(access: &A, unit: UnitId, file: u64) -> TraceResult<String>
{
    Ok(access.line_file_name(unit, file)?.unwrap_or_default())
}

fn stream_lookup<A: DebugInfoAccess>(access: &A, unit: UnitId, address: u64) -> TraceResult<Option<LineLocation>>
{
    let mut best: Option<LineRow> = None;
    access.for_each_line_row(unit, &mut |row| {
        let better = best.is_none_or(|current| precedence(row) >= precedence(&current));
        if row.address <= address && better {
            best = Some(*row);
        }
        ControlFlow::Continue(())
    })?;
    match best {
        Some(row) if !row.end_sequence => Ok(Some(LineLocation {
            filename: file_name(access, unit, row.file)?,
            line: row.line,
            column: row.column,
        })),
        _ => Ok(None),
    }
}

/// Line lookups for one unit, possibly answered by another resolver's tables.
///
/// Split-DWARF companions carry no usable line program; their lookups run
/// against the skeleton unit in the parent object.
pub(crate) struct LineContext<'a, A>
{
    pub access: &'a A,
    pub tables: &'a mut LineTables,
    pub unit: UnitId,
}

impl<A: DebugInfoAccess> LineContext<'_, A>
{
    pub(crate) fn lookup(&mut self, address: u64, mode: CacheMode) -> TraceResult<Option<LineLocation>>
    {
        self.tables.lookup(self.access, self.unit, address, mode)
    }

    pub(crate) fn file_name(&self, file: u64) -> TraceResult<String>
    {
        file_name(self.access, self.unit, file)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::dwarf::synthetic::SyntheticDebugInfo;

    const MODES: [CacheMode; 2] = [CacheMode::PrioritizeSpeed, CacheMode::PrioritizeMemory];

    fn unit_with_lines() -> SyntheticDebugInfo
    {
        let mut info = SyntheticDebugInfo::new("/bin/app");
        let root = info.add_unit(5);
        info.set_line_program(root.unit, 5, &[(0, "/src/main.c"), (1, "/src/util.h")]);
        info.add_sequence(
            root.unit,
            &[(0x1000, 0, 10, 1), (0x1008, 0, 11, 5), (0x1008, 1, 40, 2), (0x1010, 0, 12, 0)],
            0x1020,
        );
        // Second sequence starts exactly where the first ends.
        info.add_sequence(root.unit, &[(0x1020, 1, 7, 3)], 0x1030);
        info
    }

    fn lookup(info: &SyntheticDebugInfo, address: u64, mode: CacheMode) -> Option<LineLocation>
    {
        LineTables::new().lookup(info, UnitId(0), address, mode).unwrap()
    }

    #[test]
    fn test_lookup_exact_and_between_rows()
    {
        let info = unit_with_lines();
        for mode in MODES {
            let location = lookup(&info, 0x1004, mode).unwrap();
            assert_eq!(location.filename, "/src/main.c");
            assert_eq!(location.line, Some(10));
            assert_eq!(location.column, Some(1));
        }
    }

    #[test]
    fn test_same_address_keeps_last_row()
    {
        let info = unit_with_lines();
        for mode in MODES {
            let location = lookup(&info, 0x1008, mode).unwrap();
            assert_eq!(location.filename, "/src/util.h");
            assert_eq!(location.line, Some(40));
        }
    }

    #[test]
    fn test_left_edge_column_is_absent()
    {
        let info = unit_with_lines();
        for mode in MODES {
            let location = lookup(&info, 0x1010, mode).unwrap();
            assert_eq!(location.line, Some(12));
            assert_eq!(location.column, None);
        }
    }

    #[test]
    fn test_sequence_boundary_prefers_real_row()
    {
        let info = unit_with_lines();
        for mode in MODES {
            let location = lookup(&info, 0x1020, mode).unwrap();
            assert_eq!(location.line, Some(7));
        }
    }

    #[test]
    fn test_gaps_resolve_to_none()
    {
        let info = unit_with_lines();
        for mode in MODES {
            assert_eq!(lookup(&info, 0x0fff, mode), None);
            assert_eq!(lookup(&info, 0x1030, mode), None);
            assert_eq!(lookup(&info, 0x9999, mode), None);
        }
    }

    #[test]
    fn test_unit_without_line_program()
    {
        let mut info = SyntheticDebugInfo::new("/bin/app");
        info.add_unit(4);
        for mode in MODES {
            assert_eq!(lookup(&info, 0x1000, mode), None);
        }
    }

    #[test]
    fn test_table_is_sorted_unique_and_built_once()
    {
        let info = unit_with_lines();
        let mut tables = LineTables::new();
        tables.lookup(&info, UnitId(0), 0x1004, CacheMode::PrioritizeSpeed).unwrap();
        tables.lookup(&info, UnitId(0), 0x1024, CacheMode::PrioritizeSpeed).unwrap();
        assert_eq!(info.line_runs(), 1);

        let addresses = tables.row_addresses(UnitId(0)).unwrap();
        assert!(addresses.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(addresses, vec![0x1000, 0x1008, 0x1010, 0x1020, 0x1030]);
    }

    #[test]
    fn test_memory_mode_runs_program_per_query()
    {
        let info = unit_with_lines();
        let mut tables = LineTables::new();
        tables.lookup(&info, UnitId(0), 0x1004, CacheMode::PrioritizeMemory).unwrap();
        tables.lookup(&info, UnitId(0), 0x1024, CacheMode::PrioritizeMemory).unwrap();
        assert_eq!(info.line_runs(), 2);
        assert!(tables.row_addresses(UnitId(0)).is_none());
    }
}
