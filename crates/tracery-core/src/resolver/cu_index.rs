//! Address to compilation-unit lookup.
//!
//! Lookup order:
//! 1. `.debug_aranges`, when present, confirmed against the unit's own ranges
//! 2. a linear walk over all units (memory-prioritized)
//! 3. a sorted, flattened table of unit ranges built on first use (speed-prioritized)
//!
//! A resolver opened for a split-DWARF companion instead matches its first
//! compile unit against the ranges of the skeleton that spawned it.

use std::cmp::Reverse;

use gimli::constants;
use once_cell::unsync::OnceCell;
use tracing::{debug, trace};

use super::ranges::{self, Candidate, Segment};
use crate::config::CacheMode;
use crate::dwarf::{ArangeEntry, DebugInfoAccess, DieRef, UnitId};
use crate::error::{TraceError, TraceResult};

/// Unit roots that can carry code.
fn is_code_unit(tag: gimli::DwTag) -> bool
{
    matches!(
        tag,
        constants::DW_TAG_compile_unit | constants::DW_TAG_skeleton_unit | constants::DW_TAG_partial_unit
    )
}

#[derive(Default)]
pub(crate) struct CuIndex
{
    aranges: OnceCell<Vec<ArangeEntry>>,
    table: OnceCell<Vec<Segment<DieRef>>>,
}

impl CuIndex
{
    pub(crate) fn new() -> Self
    {
        Self::default()
    }

    /// Root of the unit covering `address`, if any.
    pub(crate) fn lookup<A: DebugInfoAccess>(&self, access: &A, address: u64, mode: CacheMode) -> TraceResult<Option<DieRef>>
    {
        if let Some(root) = self.lookup_aranges(access, address, mode)? {
            return Ok(Some(root));
        }
        if mode.retains_tables() {
            let table = self.table.get_or_try_init(|| build_table(access))?;
            Ok(ranges::lookup(table, address).copied())
        } else {
            walk_units(access, address)
        }
    }

    /// Unit lookup inside a split companion: the first compile unit, if the
    /// skeleton's ranges in the parent cover `address`.
    pub(crate) fn lookup_split<A: DebugInfoAccess>(
        access: &A,
        parent: &A,
        skeleton: DieRef,
        address: u64,
    ) -> TraceResult<Option<DieRef>>
    {
        let skeleton_ranges = parent.pc_ranges(skeleton)?;
        if !skeleton_ranges.is_empty() && !skeleton_ranges.iter().any(|range| range.contains(address)) {
            trace!(address, "address outside skeleton ranges");
            return Ok(None);
        }
        for index in 0..access.unit_count() {
            let root = access.unit_root(UnitId(index))?;
            if access.tag(root)? == constants::DW_TAG_compile_unit {
                return Ok(Some(root));
            }
        }
        Ok(None)
    }

    /// The sorted unit table, if it has been built.
    #[cfg(test)]
    pub(crate) fn table(&self) -> Option<&[Segment<DieRef>]>
    {
        self.table.get().map(Vec::as_slice)
    }

    fn lookup_aranges<A: DebugInfoAccess>(&self, access: &A, address: u64, mode: CacheMode) -> TraceResult<Option<DieRef>>
    {
        let hit = if mode.retains_tables() {
            let entries = self.aranges.get_or_try_init(|| {
                let mut entries = access.aranges()?;
                entries.sort_by_key(|entry| (entry.range.begin, entry.range.end));
                Ok::<_, TraceError>(entries)
            })?;
            let index = entries.partition_point(|entry| entry.range.begin <= address);
            index
                .checked_sub(1)
                .map(|index| entries[index])
                .filter(|entry| entry.range.contains(address))
                .map(|entry| entry.unit)
        } else {
            access
                .aranges()?
                .into_iter()
                .filter(|entry| entry.range.begin <= address)
                .max_by_key(|entry| (entry.range.begin, entry.range.end))
                .filter(|entry| entry.range.contains(address))
                .map(|entry| entry.unit)
        };

        let Some(unit) = hit else {
            return Ok(None);
        };
        let root = access.unit_root(unit)?;
        let unit_ranges = access.pc_ranges(root)?;
        if unit_ranges.is_empty() || unit_ranges.iter().any(|range| range.contains(address)) {
            trace!(address, unit = unit.0, "aranges hit");
            return Ok(Some(root));
        }
        debug!(address, unit = unit.0, "aranges hit not covered by unit ranges");
        Ok(None)
    }
}

fn walk_units<A: DebugInfoAccess>(access: &A, address: u64) -> TraceResult<Option<DieRef>>
{
    for index in 0..access.unit_count() {
        let root = access.unit_root(UnitId(index))?;
        if !is_code_unit(access.tag(root)?) {
            continue;
        }
        if access.pc_ranges(root)?.iter().any(|range| range.contains(address)) {
            return Ok(Some(root));
        }
    }
    Ok(None)
}

/// Earlier units win where ranges overlap, matching the linear walk.
fn build_table<A: DebugInfoAccess>(access: &A) -> TraceResult<Vec<Segment<DieRef>>>
{
    let mut candidates = Vec::new();
    for index in 0..access.unit_count() {
        let root = access.unit_root(UnitId(index))?;
        if !is_code_unit(access.tag(root)?) {
            continue;
        }
        for range in access.pc_ranges(root)? {
            candidates.push(Candidate {
                range,
                priority: Reverse(index),
                value: root,
            });
        }
    }
    let table = ranges::flatten(candidates);
    debug!(units = access.unit_count(), segments = table.len(), "built unit table");
    Ok(table)
}
