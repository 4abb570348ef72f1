//! # Aggregate Optimizer
//!
//! Lowers each aggregate of a block to one of two shapes ahead of SQL
//! generation:
//!
//! - **Window function** - the aggregate stays attached to the outer
//!   query's rows, wrapped in a [`SubqueryKind::Window`] marker. Chosen
//!   when the aggregate has no embedded conditions and every range it
//!   touches is still joined in the outer block.
//! - **Correlated scalar subquery** - otherwise. The minimal range
//!   closure the aggregate needs is computed, the live ranges are cloned
//!   as a group (so cross-links land on the clones), their join
//!   predicates are split and folded into the subquery's WHERE together
//!   with the aggregate's embedded conditions, and the aggregate node
//!   moves inside a [`SubqueryKind::Scalar`] wrapper that replaces it in
//!   the parent slot.
//!
//! SUM lowered to a scalar subquery is wrapped in `IFNULL(..., 0)` so an
//! empty set yields 0; the other aggregates keep NULL-on-empty semantics.
//!
//! Blocks with an explicit GROUP BY keep their aggregates untouched: they
//! are grouped aggregates the SQL emitter renders natively.

use std::collections::{HashMap, HashSet};

use tracing::trace;

use super::OptimizerStats;
use crate::analysis::surgery::{minimal_range_set, partition_live_ranges, split_join_predicate};
use crate::ast::builders::num;
use crate::ast::predicate::{combine_and, retarget_identifiers};
use crate::ast::visitor::{collect_block_aggregates, referenced_ranges_of};
use crate::ast::{AggregateFunc, Ast, NodeId, NodeKind, Subquery, SubqueryKind};
use crate::error::{OptimizeError, Result};

/// Lower every non-ANY aggregate of the block
pub fn lower_aggregates(ast: &mut Ast, retrieve: NodeId, stats: &mut OptimizerStats) -> Result<()> {
    if !ast.retrieve(retrieve)?.group_by.is_empty() {
        return Ok(());
    }

    // Re-collect after each lowering: a lowered aggregate disappears into
    // its wrapper and stops being a target, so this terminates.
    loop {
        let target = collect_block_aggregates(ast, retrieve)
            .into_iter()
            .find(|&id| {
                !matches!(
                    ast.kind(id),
                    NodeKind::Aggregate {
                        func: AggregateFunc::Any,
                        ..
                    }
                )
            });
        let Some(aggregate) = target else {
            return Ok(());
        };
        lower_one(ast, retrieve, aggregate, stats)?;
    }
}

fn lower_one(
    ast: &mut Ast,
    retrieve: NodeId,
    aggregate: NodeId,
    stats: &mut OptimizerStats,
) -> Result<()> {
    let (func, operand, agg_conditions) = match ast.kind(aggregate) {
        NodeKind::Aggregate {
            func,
            operand,
            conditions,
            ..
        } => (*func, *operand, *conditions),
        _ => {
            return Err(OptimizeError::InvariantViolation(
                "aggregate target is not an aggregate node".to_string(),
            ))
        }
    };

    let parent = ast.parent(aggregate).ok_or_else(|| {
        OptimizeError::InvariantViolation("aggregate node has no parent".to_string())
    })?;

    let outer_ranges: Vec<NodeId> = ast
        .retrieve(retrieve)?
        .ranges
        .iter()
        .copied()
        .filter(|&r| ast.is_database_range(r))
        .collect();

    let mut seed_roots = vec![operand];
    seed_roots.extend(agg_conditions);
    let referenced = referenced_ranges_of(ast, &seed_roots);
    let seeds: Vec<NodeId> = referenced
        .iter()
        .copied()
        .filter(|r| outer_ranges.contains(r))
        .collect();

    let windowable =
        agg_conditions.is_none() && referenced.iter().all(|r| outer_ranges.contains(r));
    if windowable || outer_ranges.is_empty() {
        trace!(func = func.as_str(), "keeping aggregate as window function");
        let wrapper = ast.alloc(NodeKind::Subquery(Subquery {
            kind: SubqueryKind::Window,
            inner: Some(aggregate),
            ranges: Vec::new(),
            correlated: Vec::new(),
            conditions: None,
        }));
        ast.replace_child(parent, aggregate, wrapper)?;
        ast.adopt(wrapper, aggregate);
        stats.aggregates_windowed += 1;
        return Ok(());
    }

    trace!(func = func.as_str(), "lowering aggregate to scalar subquery");

    // Detach the embedded conditions first: once lowered they live in the
    // subquery's WHERE, never on the aggregate.
    if let Some(cond) = agg_conditions {
        if let NodeKind::Aggregate { conditions, .. } = ast.kind_mut(aggregate) {
            *conditions = None;
        }
        ast.set_parent(cond, None);
    }

    let body = build_correlated_body(ast, &outer_ranges, &seeds, agg_conditions)?;

    // The aggregate's operand follows the clones as well
    retarget_identifiers(ast, aggregate, &body.remap);

    let mut correlated = body.correlated.clone();
    for range in referenced_ranges_of(ast, &[aggregate]) {
        if !body.ranges.contains(&range) && !correlated.contains(&range) {
            correlated.push(range);
        }
    }

    let wrapper = ast.alloc(NodeKind::Subquery(Subquery {
        kind: SubqueryKind::Scalar,
        inner: Some(aggregate),
        ranges: body.ranges.clone(),
        correlated,
        conditions: body.conditions,
    }));

    // SUM folds NULL-on-empty to zero; the rest keep NULL
    let replacement = if func == AggregateFunc::Sum {
        let zero = num(ast, "0");
        let ifnull = ast.alloc(NodeKind::IfNull {
            expr: wrapper,
            fallback: zero,
        });
        ast.adopt(ifnull, wrapper);
        ast.adopt(ifnull, zero);
        ifnull
    } else {
        wrapper
    };

    ast.replace_child(parent, aggregate, replacement)?;
    ast.adopt(wrapper, aggregate);
    for &range in &body.ranges {
        ast.adopt(wrapper, range);
    }
    if let Some(cond) = body.conditions {
        ast.adopt(wrapper, cond);
    }

    stats.aggregates_lowered += 1;
    Ok(())
}

/// Cloned ranges, correlation set and WHERE of a correlated subquery body
pub(crate) struct CorrelatedBody {
    pub ranges: Vec<NodeId>,
    pub correlated: Vec<NodeId>,
    pub conditions: Option<NodeId>,
    pub remap: HashMap<NodeId, NodeId>,
}

/// Assemble the body of a correlated subquery: clone the live closure of
/// `seeds` within `outer_ranges`, fold the clones' join predicates (split
/// inner/correlation-wise) and the retargeted `extra_conditions` into one
/// WHERE, and derive the correlated range set.
pub(crate) fn build_correlated_body(
    ast: &mut Ast,
    outer_ranges: &[NodeId],
    seeds: &[NodeId],
    extra_conditions: Option<NodeId>,
) -> Result<CorrelatedBody> {
    let seeds: Vec<NodeId> = if seeds.is_empty() {
        // A constant aggregate still needs a source; fall back to the
        // block's anchor (or first range).
        let fallback = outer_ranges
            .iter()
            .copied()
            .find(|&r| ast.is_anchor(r))
            .or_else(|| outer_ranges.first().copied());
        match fallback {
            Some(r) => vec![r],
            None => {
                return Err(OptimizeError::InvariantViolation(
                    "cannot lower an aggregate in a block without ranges".to_string(),
                ))
            }
        }
    } else {
        seeds.to_vec()
    };

    let closure = minimal_range_set(ast, outer_ranges, &seeds);
    let (live, _correlation_only) = partition_live_ranges(ast, &closure, &seeds);

    let clones = ast.deep_clone_group(&live);
    let remap: HashMap<NodeId, NodeId> = live.iter().copied().zip(clones.iter().copied()).collect();
    let clone_set: HashSet<NodeId> = clones.iter().copied().collect();

    let mut parts: Vec<Option<NodeId>> = Vec::new();
    if let Some(cond) = extra_conditions {
        retarget_identifiers(ast, cond, &remap);
        parts.push(Some(cond));
    }
    for &clone in &clones {
        if let Some(pred) = ast.take_join_predicate(clone)? {
            let split = split_join_predicate(ast, pred, &clone_set);
            parts.push(split.inner);
            parts.push(split.correlation);
        }
    }
    let conditions = combine_and(ast, parts);

    let mut correlated: Vec<NodeId> = Vec::new();
    if let Some(cond) = conditions {
        for range in referenced_ranges_of(ast, &[cond]) {
            if !clone_set.contains(&range) && !correlated.contains(&range) {
                correlated.push(range);
            }
        }
    }

    Ok(CorrelatedBody {
        ranges: clones,
        correlated,
        conditions,
        remap,
    })
}
