//! Sorted, non-overlapping address tables.
//!
//! Debug info describes nested and sometimes overlapping ranges. Lookup tables
//! are flattened into disjoint segments once, so a query is a single binary
//! search. Which overlapping range owns a segment is decided by a caller
//! supplied priority.

use std::collections::BinaryHeap;

use crate::dwarf::PcRange;

/// One entry of a flattened table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Segment<V>
{
    pub range: PcRange,
    pub value: V,
}

/// A range competing for addresses, with its priority.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate<P, V>
{
    pub range: PcRange,
    pub priority: P,
    pub value: V,
}

/// Flatten `candidates` so each address maps to the highest-priority range
/// covering it. Adjacent segments with equal values are merged.
pub(crate) fn flatten<P, V>(mut candidates: Vec<Candidate<P, V>>) -> Vec<Segment<V>>
where
    P: Ord + Copy,
    V: Copy + PartialEq,
{
    candidates.retain(|candidate| !candidate.range.is_empty());
    candidates.sort_by_key(|candidate| candidate.range.begin);

    let mut points: Vec<u64> = candidates
        .iter()
        .flat_map(|candidate| [candidate.range.begin, candidate.range.end])
        .collect();
    points.sort_unstable();
    points.dedup();

    let mut segments: Vec<Segment<V>> = Vec::new();
    let mut active: BinaryHeap<(P, u64, usize)> = BinaryHeap::new();
    let mut next = 0;
    for window in points.windows(2) {
        let (low, high) = (window[0], window[1]);
        while next < candidates.len() && candidates[next].range.begin <= low {
            active.push((candidates[next].priority, candidates[next].range.end, next));
            next += 1;
        }
        while active.peek().is_some_and(|&(_, end, _)| end <= low) {
            active.pop();
        }
        let Some(&(_, _, index)) = active.peek() else {
            continue;
        };
        let value = candidates[index].value;
        match segments.last_mut() {
            Some(last) if last.range.end == low && last.value == value => last.range.end = high,
            _ => segments.push(Segment {
                range: PcRange::new(low, high),
                value,
            }),
        }
    }
    debug_assert!(is_sorted_disjoint(&segments));
    segments
}

/// Value of the segment containing `address`.
pub(crate) fn lookup<V>(segments: &[Segment<V>], address: u64) -> Option<&V>
{
    let index = segments.partition_point(|segment| segment.range.begin <= address);
    let segment = segments.get(index.checked_sub(1)?)?;
    segment.range.contains(address).then_some(&segment.value)
}

/// True when every segment is non-empty and segments are sorted without overlap.
pub(crate) fn is_sorted_disjoint<V>(segments: &[Segment<V>]) -> bool
{
    segments.iter().all(|segment| !segment.range.is_empty())
        && segments.windows(2).all(|pair| pair[0].range.end <= pair[1].range.begin)
}
