use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::registry::ControllerInfo;
use crate::{Error, Result};

/// Selects a minimum-cardinality subset of the available controllers covering
/// all actuated joints
///
/// Works by iterative deepening: for `k = 1, 2, ...` every `k`-subset of
/// `available` is enumerated in lexicographic order over the registry
/// ordering (joint set size ascending, then name). Among the covering subsets
/// of the first `k` which yields any cover, the one with the most already
/// active controllers wins; remaining ties prefer smaller total joint counts
/// (tighter fits) and finally the subset encountered first, which keeps the
/// result stable across runs. `k` is bounded in practice by the number of
/// independent joint groups, so the enumeration stays small.
///
/// `available` MUST be sorted by [`ControllerInfo::sort_key`], as returned by
/// the registry snapshot.
pub fn select_controllers(
    actuated: &BTreeSet<Arc<str>>,
    available: &[ControllerInfo],
) -> Result<Vec<ControllerInfo>> {
    if actuated.is_empty() {
        return Err(Error::EmptyTrajectory);
    }
    for k in 1..=available.len() {
        let mut best: Option<(Score, Vec<usize>)> = None;
        let mut indices: Vec<usize> = (0..k).collect();
        loop {
            if covers(&indices, available, actuated) {
                let score = score(&indices, available);
                // strict comparison keeps the first-encountered subset on ties
                if best.as_ref().map_or(true, |(s, _)| score > *s) {
                    best = Some((score, indices.clone()));
                }
            }
            if !next_combination(&mut indices, available.len()) {
                break;
            }
        }
        if let Some((_, selected)) = best {
            let selected: Vec<ControllerInfo> =
                selected.iter().map(|&i| available[i].clone()).collect();
            let names: Vec<&str> = selected.iter().map(|info| info.name.as_ref()).collect();
            debug!(controllers = ?names, "controllers selected");
            return Ok(selected);
        }
    }
    Err(Error::NoCover(
        actuated
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<&str>>()
            .join(", "),
    ))
}

/// (number of active controllers, negated total joint count): maximised
type Score = (usize, i64);

fn score(indices: &[usize], available: &[ControllerInfo]) -> Score {
    let active = indices
        .iter()
        .filter(|&&i| available[i].state.active)
        .count();
    let joints: i64 = indices
        .iter()
        .map(|&i| i64::try_from(available[i].joints.len()).unwrap_or(i64::MAX))
        .sum();
    (active, -joints)
}

fn covers(indices: &[usize], available: &[ControllerInfo], actuated: &BTreeSet<Arc<str>>) -> bool {
    actuated
        .iter()
        .all(|joint| indices.iter().any(|&i| available[i].joints.contains(joint)))
}

/// Advances to the next `k`-combination in lexicographic order, returns false
/// after the last one
fn next_combination(indices: &mut [usize], n: usize) -> bool {
    let k = indices.len();
    let mut i = k;
    while i > 0 {
        i -= 1;
        if indices[i] != i + n - k {
            indices[i] += 1;
            for j in i + 1..k {
                indices[j] = indices[j - 1] + 1;
            }
            return true;
        }
    }
    false
}
