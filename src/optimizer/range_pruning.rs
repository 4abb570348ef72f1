//! # Range Pruning
//!
//! Removes LEFT-joined ranges the query never observes. A LEFT join that
//! nothing references cannot change which rows survive, so dropping it
//! preserves results while shrinking the join tree for every later rule.
//!
//! Three widths run at different pipeline points:
//!
//! - [`TrimMode::Obvious`]: drop LEFT ranges referenced nowhere at all.
//! - [`TrimMode::Conservative`]: seed reachability with every range any
//!   join predicate mentions, expand by join dependencies, drop LEFT
//!   ranges outside the closure.
//! - [`TrimMode::Wide`]: seed only from the projection, conditions, sort
//!   and grouping (plus required ranges and anchors). Ranges that were
//!   only feeding since-lowered aggregates become removable here.
//!
//! When a single range remains and its join predicate mentions only
//! itself, the predicate folds into WHERE and the range becomes the
//! anchor.

use tracing::trace;

use super::OptimizerStats;
use crate::analysis::surgery::{expand_with_join_dependencies, join_reference_map};
use crate::ast::predicate::and_into_conditions;
use crate::ast::visitor::{referenced_ranges, referenced_ranges_of};
use crate::ast::{Ast, JoinKind, NodeId};
use crate::error::Result;

/// How aggressively a pruning pass seeds its keep-set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimMode {
    Obvious,
    Conservative,
    Wide,
}

/// Remove unreferenced LEFT-joined ranges from a retrieve block
pub fn prune_ranges(
    ast: &mut Ast,
    retrieve: NodeId,
    mode: TrimMode,
    stats: &mut OptimizerStats,
) -> Result<()> {
    let block = ast.retrieve(retrieve)?;
    let ranges = block.ranges.clone();
    if ranges.is_empty() {
        return Ok(());
    }

    let clause_refs = clause_referenced_ranges(ast, retrieve)?;
    let reference_map = join_reference_map(ast, &ranges);

    let keep: Vec<NodeId> = match mode {
        TrimMode::Obvious => {
            // Keep anything referenced by a clause or by another range's
            // join predicate; only fully isolated LEFT ranges go.
            ranges
                .iter()
                .copied()
                .filter(|&r| {
                    !removable(ast, r)
                        || clause_refs.contains(&r)
                        || referenced_by_other_predicate(&reference_map, r)
                })
                .collect()
        }
        TrimMode::Conservative => {
            let mut seeds = mandatory_seeds(ast, &ranges, &clause_refs);
            for refs in reference_map.values() {
                for &r in refs {
                    if !seeds.contains(&r) {
                        seeds.push(r);
                    }
                }
            }
            expand_with_join_dependencies(ast, &seeds, &ranges)
        }
        TrimMode::Wide => {
            let seeds = mandatory_seeds(ast, &ranges, &clause_refs);
            expand_with_join_dependencies(ast, &seeds, &ranges)
        }
    };

    for range in ranges {
        if keep.contains(&range) || !removable(ast, range) {
            continue;
        }
        trace!(range = ast.range_name(range), ?mode, "pruning unused range");
        ast.remove_range(retrieve, range)?;
        stats.ranges_pruned += 1;
    }

    fold_single_range_predicate(ast, retrieve, stats)
}

/// Only optional (LEFT) database ranges are ever pruned; anchors, INNER
/// joins and JSON sources stay
fn removable(ast: &Ast, range: NodeId) -> bool {
    ast.join_kind(range) == Some(JoinKind::Left) && ast.join_predicate(range).is_some()
}

fn referenced_by_other_predicate(
    reference_map: &std::collections::BTreeMap<NodeId, std::collections::BTreeSet<NodeId>>,
    range: NodeId,
) -> bool {
    reference_map
        .iter()
        .any(|(owner, refs)| *owner != range && refs.contains(&range))
}

/// Ranges every mode keeps: clause-referenced, required, anchors, JSON
fn mandatory_seeds(ast: &Ast, ranges: &[NodeId], clause_refs: &[NodeId]) -> Vec<NodeId> {
    let mut seeds: Vec<NodeId> = Vec::new();
    for &range in ranges {
        let keep = clause_refs.contains(&range)
            || ast.is_json_range(range)
            || ast.is_anchor(range)
            || ast.is_required(range);
        if keep && !seeds.contains(&range) {
            seeds.push(range);
        }
    }
    seeds
}

/// Every range referenced from the projection, conditions, sort entries,
/// grouping or macros of the block
fn clause_referenced_ranges(ast: &Ast, retrieve: NodeId) -> Result<Vec<NodeId>> {
    let block = ast.retrieve(retrieve)?;
    let mut roots: Vec<NodeId> = Vec::new();
    roots.extend(block.projection.iter().copied());
    roots.extend(block.conditions.iter().copied());
    roots.extend(block.sort.iter().map(|s| s.node));
    roots.extend(block.group_by.iter().copied());
    roots.extend(block.macros.values().copied());
    Ok(referenced_ranges_of(ast, &roots))
}

/// If only one range remains and its join predicate references nothing
/// but itself, fold that predicate into WHERE, leaving the range as the
/// anchor
fn fold_single_range_predicate(
    ast: &mut Ast,
    retrieve: NodeId,
    stats: &mut OptimizerStats,
) -> Result<()> {
    let ranges = ast.retrieve(retrieve)?.ranges.clone();
    let db_ranges: Vec<NodeId> = ranges
        .iter()
        .copied()
        .filter(|&r| ast.is_database_range(r))
        .collect();
    if db_ranges.len() != 1 {
        return Ok(());
    }
    let range = db_ranges[0];
    let Some(pred) = ast.join_predicate(range) else {
        return Ok(());
    };
    let self_contained = referenced_ranges(ast, pred)
        .into_iter()
        .all(|r| r == range);
    if !self_contained {
        return Ok(());
    }

    let pred = ast
        .take_join_predicate(range)?
        .ok_or_else(|| crate::error::OptimizeError::InvariantViolation(
            "join predicate vanished during fold".to_string(),
        ))?;
    and_into_conditions(ast, retrieve, pred)?;
    stats.predicates_folded += 1;
    Ok(())
}
