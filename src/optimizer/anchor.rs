//! # Anchor Manager
//!
//! Every retrieve block must end the pipeline with exactly one anchor -
//! one range with no join predicate, the logical FROM table. When the
//! parser attached a predicate to every range, this pass elects one:
//!
//! | Signal | Score |
//! |---|---|
//! | Referenced in a projection expression | +1000 |
//! | Already INNER-joined | +100 |
//! | LEFT-joined | +50 |
//! | Join predicates can safely collapse into WHERE | +10 |
//!
//! A candidate is viable when it is INNER, or LEFT and safely collapsible
//! to INNER. The winner's own join predicate moves into WHERE. Other
//! ranges that any surviving clause still references keep their join
//! predicates (they stay ordinary joins); ranges left entirely
//! unreferenced are dropped together with their predicates. With no
//! viable candidate the query is structurally invalid:
//! [`OptimizeError::NoValidAnchor`].

use tracing::debug;

use super::join_type::can_safely_collapse_to_inner;
use super::OptimizerStats;
use crate::analysis::analyze_retrieve;
use crate::ast::predicate::and_into_conditions;
use crate::ast::visitor::{referenced_ranges, referenced_ranges_of};
use crate::ast::{Ast, JoinKind, NodeId};
use crate::error::{OptimizeError, Result};
use crate::metadata::EntityMetadata;

/// How the elected anchor is installed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorStrategy {
    /// Projection-referenced winner; unreferenced siblings are dropped
    ExpressionWithOptimization,
    /// INNER winner; unreferenced siblings are dropped
    InnerWithOptimization,
    /// LEFT winner promoted to INNER first, then optimized
    LeftOptimizeToInner,
    /// Projection-referenced winner; siblings must stay joined
    ExpressionPreserve,
    /// INNER winner; siblings must stay joined
    InnerPreserve,
}

/// Ensure the block has exactly one anchor
pub fn finalize_anchor(
    ast: &mut Ast,
    retrieve: NodeId,
    metadata: &dyn EntityMetadata,
    stats: &mut OptimizerStats,
) -> Result<()> {
    let db_ranges: Vec<NodeId> = ast
        .retrieve(retrieve)?
        .ranges
        .iter()
        .copied()
        .filter(|&r| ast.is_database_range(r))
        .collect();
    if db_ranges.is_empty() {
        return Ok(());
    }

    let anchors: Vec<NodeId> = db_ranges
        .iter()
        .copied()
        .filter(|&r| ast.is_anchor(r))
        .collect();
    match anchors.len() {
        1 => return Ok(()),
        0 => {}
        n => {
            return Err(OptimizeError::InvariantViolation(format!(
                "retrieve block has {n} anchor ranges"
            )))
        }
    }

    let usage = analyze_retrieve(ast, retrieve, metadata)?;

    let mut best: Option<(NodeId, i32, bool, bool)> = None;
    for &range in &db_ranges {
        let left = ast.join_kind(range) == Some(JoinKind::Left);
        let viable = !left || can_safely_collapse_to_inner(range, &usage);
        if !viable {
            continue;
        }
        let select_ref = usage.usage(range).used_in_expr;
        let mut score = 0;
        if select_ref {
            score += 1000;
        }
        score += if left { 50 } else { 100 };
        score += 10;
        // Strict comparison keeps the first range on ties
        if best.map_or(true, |(_, s, _, _)| score > s) {
            best = Some((range, score, select_ref, left));
        }
    }

    let Some((chosen, score, select_ref, left)) = best else {
        return Err(OptimizeError::NoValidAnchor);
    };

    if left {
        ast.set_required(chosen, true)?;
    }
    if let Some(pred) = ast.take_join_predicate(chosen)? {
        and_into_conditions(ast, retrieve, pred)?;
    }

    let droppable = droppable_siblings(ast, retrieve, chosen)?;
    let all_others_droppable = {
        let others = db_ranges.iter().filter(|&&r| r != chosen).count();
        droppable.len() == others
    };

    let strategy = if left {
        AnchorStrategy::LeftOptimizeToInner
    } else {
        match (all_others_droppable, select_ref) {
            (true, true) => AnchorStrategy::ExpressionWithOptimization,
            (true, false) => AnchorStrategy::InnerWithOptimization,
            (false, true) => AnchorStrategy::ExpressionPreserve,
            (false, false) => AnchorStrategy::InnerPreserve,
        }
    };
    debug!(
        anchor = ast.range_name(chosen),
        score, ?strategy, "anchor elected"
    );

    match strategy {
        AnchorStrategy::ExpressionWithOptimization
        | AnchorStrategy::InnerWithOptimization
        | AnchorStrategy::LeftOptimizeToInner => {
            for range in droppable {
                ast.remove_range(retrieve, range)?;
                stats.ranges_pruned += 1;
            }
        }
        AnchorStrategy::ExpressionPreserve | AnchorStrategy::InnerPreserve => {}
    }

    stats.anchors_assigned += 1;
    Ok(())
}

/// Database ranges no surviving clause references, directly or through a
/// kept range's join predicate
fn droppable_siblings(ast: &Ast, retrieve: NodeId, chosen: NodeId) -> Result<Vec<NodeId>> {
    let block = ast.retrieve(retrieve)?;
    let ranges = block.ranges.clone();

    let mut clause_roots: Vec<NodeId> = Vec::new();
    clause_roots.extend(block.projection.iter().copied());
    clause_roots.extend(block.conditions.iter().copied());
    clause_roots.extend(block.sort.iter().map(|s| s.node));
    clause_roots.extend(block.group_by.iter().copied());
    clause_roots.extend(block.macros.values().copied());

    let mut kept: Vec<NodeId> = vec![chosen];
    for range in referenced_ranges_of(ast, &clause_roots) {
        if ranges.contains(&range) && !kept.contains(&range) {
            kept.push(range);
        }
    }
    for &range in &ranges {
        if ast.is_json_range(range) && !kept.contains(&range) {
            kept.push(range);
        }
    }

    // A kept range's join predicate pins everything it references
    loop {
        let mut grew = false;
        for &range in &ranges {
            if !kept.contains(&range) {
                continue;
            }
            if let Some(pred) = ast.join_predicate(range) {
                for referenced in referenced_ranges(ast, pred) {
                    if ranges.contains(&referenced) && !kept.contains(&referenced) {
                        kept.push(referenced);
                        grew = true;
                    }
                }
            }
        }
        if !grew {
            break;
        }
    }

    Ok(ranges
        .into_iter()
        .filter(|&r| ast.is_database_range(r) && !kept.contains(&r))
        .collect())
}
