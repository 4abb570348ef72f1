//! # Join-Type Optimizer (LEFT to INNER collapse)
//!
//! A LEFT join exists to keep outer rows with no match. When the query
//! provably never observes the NULL-extended side - no IS NULL test on the
//! range, and either a reference through a NOT NULL column or no condition
//! reference at all - the join collapses to INNER, unlocking anchor
//! optimization and range drops later in the pipeline.
//!
//! The decision is conservative: any IS NULL check on the range, or a
//! condition reference through a possibly-NULL column, keeps the LEFT
//! join.

use tracing::trace;

use super::OptimizerStats;
use crate::analysis::{analyze_retrieve, UsageAnalysis};
use crate::ast::{Ast, JoinKind, NodeId};
use crate::error::Result;
use crate::metadata::EntityMetadata;

/// Whether a LEFT-joined range may be promoted to INNER without changing
/// results
pub fn can_safely_collapse_to_inner(range: NodeId, usage: &UsageAnalysis) -> bool {
    let facts = usage.usage(range);
    if facts.has_is_null_in_cond {
        return false;
    }
    facts.non_nullable_use || !facts.used_in_cond
}

/// Promote every LEFT-joined range of the block that passes
/// [`can_safely_collapse_to_inner`]
pub fn collapse_left_joins(
    ast: &mut Ast,
    retrieve: NodeId,
    metadata: &dyn EntityMetadata,
    stats: &mut OptimizerStats,
) -> Result<()> {
    let usage = analyze_retrieve(ast, retrieve, metadata)?;
    let ranges = ast.retrieve(retrieve)?.ranges.clone();

    for range in ranges {
        if ast.join_kind(range) != Some(JoinKind::Left) || ast.join_predicate(range).is_none() {
            continue;
        }
        if can_safely_collapse_to_inner(range, &usage) {
            trace!(range = ast.range_name(range), "collapsing LEFT join to INNER");
            ast.set_required(range, true)?;
            stats.joins_collapsed += 1;
        }
    }
    Ok(())
}
