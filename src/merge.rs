//! Exploit-sorted slice merge.
//!
//! A refill pass leaves the cache as several individually sorted slices, one
//! per contributing run. Rather than re-sorting the whole region, adjacent
//! slice pairs are merged bottom-up, halving the slice count each pass, for
//! a total cost of O(n log k) over k slices.

use std::cmp::Ordering;
use std::collections::TryReserveError;

/// Merges already-sorted `slices` pairwise until a single sorted slice
/// remains, which is returned. `scratch` is the merge workspace; it is grown
/// on demand and keeps its capacity across calls.
pub(crate) fn merge_slices<T, C>(
    mut slices: Vec<Vec<T>>,
    scratch: &mut Vec<T>,
    compare: C,
) -> Result<Vec<T>, TryReserveError>
where
    C: Fn(&T, &T) -> Ordering + Copy,
{
    while slices.len() > 1 {
        slices = merge_pass(slices, scratch, compare)?;
    }
    Ok(slices.pop().unwrap_or_default())
}

/// One bottom-up pass: merges slice pairs (0,1), (2,3), ...; an odd slice at
/// the end is carried forward unmerged.
fn merge_pass<T, C>(
    slices: Vec<Vec<T>>,
    scratch: &mut Vec<T>,
    compare: C,
) -> Result<Vec<Vec<T>>, TryReserveError>
where
    C: Fn(&T, &T) -> Ordering + Copy,
{
    let mut merged = Vec::with_capacity(slices.len() / 2 + 1);
    let mut slices = slices.into_iter();

    while let Some(left) = slices.next() {
        match slices.next() {
            Some(right) => merged.push(merge_pair(left, right, scratch, compare)?),
            None => merged.push(left),
        }
    }

    Ok(merged)
}

/// Merges two sorted slices, reusing `left`'s allocation for the result.
///
/// Items are popped from the slice tails in descending order into `scratch`,
/// which is then reversed and appended back onto the emptied `left`. Ties
/// pop from `right` first so that, after the reversal, equal items keep
/// their slice order — the merge is stable.
fn merge_pair<T, C>(
    mut left: Vec<T>,
    mut right: Vec<T>,
    scratch: &mut Vec<T>,
    compare: C,
) -> Result<Vec<T>, TryReserveError>
where
    C: Fn(&T, &T) -> Ordering + Copy,
{
    scratch.clear();
    scratch.try_reserve(left.len() + right.len())?;

    loop {
        let from_right = match (left.last(), right.last()) {
            (Some(l), Some(r)) => compare(r, l) != Ordering::Less,
            (Some(_), None) => false,
            (None, _) => true,
        };
        match if from_right { right.pop() } else { left.pop() } {
            Some(item) => scratch.push(item),
            None => break,
        }
    }

    scratch.reverse();
    left.try_reserve(scratch.len())?;
    left.append(scratch);
    Ok(left)
}
