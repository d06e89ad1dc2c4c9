//! Function lookup and inline-chain discovery within one unit.
//!
//! Functions are found by walking the unit's tree with an explicit stack,
//! descending only through scopes that can hold them. Where function ranges
//! nest or overlap, the innermost one owns the address: latest start first,
//! then earliest end, then later position in the tree. The speed-prioritized
//! table and the per-query walk apply the same rule.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use gimli::{constants, DwTag};
use tracing::{debug, trace, warn};

use super::ranges::{self, Candidate, Segment};
use crate::config::CacheMode;
use crate::dwarf::{DebugInfoAccess, DieRef, PcRange, UnitId};
use crate::error::TraceResult;

/// Upper bound on `specification`/`abstract_origin` hops when naming a function.
const MAX_REFERENCE_DEPTH: usize = 16;

fn holds_functions(tag: DwTag) -> bool
{
    matches!(
        tag,
        constants::DW_TAG_compile_unit
            | constants::DW_TAG_partial_unit
            | constants::DW_TAG_skeleton_unit
            | constants::DW_TAG_namespace
            | constants::DW_TAG_module
            | constants::DW_TAG_imported_module
            | constants::DW_TAG_structure_type
            | constants::DW_TAG_class_type
            | constants::DW_TAG_union_type
            | constants::DW_TAG_lexical_block
            | constants::DW_TAG_subprogram
    )
}

#[derive(Debug, Clone, Copy)]
struct Span
{
    range: PcRange,
    die: DieRef,
    order: usize,
}

impl Span
{
    fn priority(&self) -> (u64, Reverse<u64>, usize)
    {
        (self.range.begin, Reverse(self.range.end), self.order)
    }
}

/// Visit every function range under `root` in depth-first file order.
fn collect<A: DebugInfoAccess>(access: &A, root: DieRef, mut visit: impl FnMut(Span)) -> TraceResult<()>
{
    let mut pending = vec![root];
    let mut order = 0;
    while let Some(die) = pending.pop() {
        let tag = access.tag(die)?;
        if tag == constants::DW_TAG_subprogram {
            for range in access.pc_ranges(die)? {
                visit(Span { range, die, order });
                order += 1;
            }
        }
        if holds_functions(tag) {
            let children = access.children(die)?;
            pending.extend(children.into_iter().rev());
        }
    }
    Ok(())
}

/// Per-unit function tables owned by one resolver.
#[derive(Default)]
pub(crate) struct SubprogramIndex
{
    tables: HashMap<UnitId, Vec<Segment<DieRef>>>,
}

impl SubprogramIndex
{
    pub(crate) fn new() -> Self
    {
        Self::default()
    }

    /// The innermost function in the unit rooted at `root` covering `address`.
    pub(crate) fn lookup<A: DebugInfoAccess>(
        &mut self,
        access: &A,
        root: DieRef,
        address: u64,
        mode: CacheMode,
    ) -> TraceResult<Option<DieRef>>
    {
        if !mode.retains_tables() {
            let mut best: Option<Span> = None;
            collect(access, root, |span| {
                if span.range.contains(address) && best.is_none_or(|current| span.priority() > current.priority()) {
                    best = Some(span);
                }
            })?;
            return Ok(best.map(|span| span.die));
        }

        if !self.tables.contains_key(&root.unit) {
            let mut candidates = Vec::new();
            collect(access, root, |span| {
                candidates.push(Candidate {
                    range: span.range,
                    priority: span.priority(),
                    value: span.die,
                });
            })?;
            let table = ranges::flatten(candidates);
            debug!(unit = root.unit.0, segments = table.len(), "built function table");
            self.tables.insert(root.unit, table);
        }
        Ok(ranges::lookup(&self.tables[&root.unit], address).copied())
    }

    #[cfg(test)]
    pub(crate) fn table(&self, unit: UnitId) -> Option<&[Segment<DieRef>]>
    {
        self.tables.get(&unit).map(Vec::as_slice)
    }
}

/// Name of a function or inlined call.
///
/// Prefers the linkage name, then the source name, then whatever the
/// `specification` or `abstract_origin` target is called.
pub(crate) fn symbol_name<A: DebugInfoAccess>(access: &A, die: DieRef) -> TraceResult<Option<String>>
{
    let mut visited = HashSet::new();
    let mut current = die;
    for _ in 0..MAX_REFERENCE_DEPTH {
        if !visited.insert(current) {
            warn!(?die, "reference cycle while naming function");
            return Ok(None);
        }
        for attr in [
            constants::DW_AT_linkage_name,
            constants::DW_AT_MIPS_linkage_name,
            constants::DW_AT_name,
        ] {
            if let Some(name) = access.string_attr(current, attr)? {
                return Ok(Some(name));
            }
        }
        let next = match access.reference_attr(current, constants::DW_AT_specification)? {
            Some(target) => Some(target),
            None => access.reference_attr(current, constants::DW_AT_abstract_origin)?,
        };
        let Some(next) = next else {
            return Ok(None);
        };
        current = next;
    }
    debug!(?die, "reference chain too deep while naming function");
    Ok(None)
}

/// One inlined call active at an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InlineSite
{
    /// Name of the inlined callee
    pub symbol: String,
    /// Raw `DW_AT_call_file` index
    pub call_file: Option<u64>,
    pub call_line: Option<u32>,
    pub call_column: Option<u32>,
}

fn covers<A: DebugInfoAccess>(access: &A, die: DieRef, address: u64) -> TraceResult<bool>
{
    Ok(access.pc_ranges(die)?.iter().any(|range| range.contains(address)))
}

/// A call-site line or column; 0 means unknown.
fn call_position<A: DebugInfoAccess>(access: &A, die: DieRef, attr: constants::DwAt) -> TraceResult<Option<u32>>
{
    Ok(access
        .udata_attr(die, attr)?
        .and_then(|value| u32::try_from(value).ok())
        .filter(|&value| value != 0))
}

/// Inlined calls inside `subprogram` covering `address`, outermost first.
///
/// Lexical blocks are looked through; each inlined call found becomes the
/// scope searched for the next one.
pub(crate) fn inline_chain<A: DebugInfoAccess>(access: &A, subprogram: DieRef, address: u64) -> TraceResult<Vec<InlineSite>>
{
    let mut sites = Vec::new();
    let mut scope = Some(subprogram);
    while let Some(current) = scope.take() {
        let mut pending = access.children(current)?;
        pending.reverse();
        while let Some(child) = pending.pop() {
            match access.tag(child)? {
                constants::DW_TAG_inlined_subroutine if covers(access, child, address)? => {
                    sites.push(InlineSite {
                        symbol: symbol_name(access, child)?.unwrap_or_default(),
                        call_file: access.udata_attr(child, constants::DW_AT_call_file)?,
                        call_line: call_position(access, child, constants::DW_AT_call_line)?,
                        call_column: call_position(access, child, constants::DW_AT_call_column)?,
                    });
                    scope = Some(child);
                    break;
                }
                constants::DW_TAG_lexical_block => {
                    let block_ranges = access.pc_ranges(child)?;
                    if block_ranges.is_empty() || block_ranges.iter().any(|range| range.contains(address)) {
                        let mut nested = access.children(child)?;
                        nested.reverse();
                        pending.extend(nested);
                    }
                }
                _ => {}
            }
        }
    }
    trace!(?subprogram, address, depth = sites.len(), "inline chain");
    Ok(sites)
}
