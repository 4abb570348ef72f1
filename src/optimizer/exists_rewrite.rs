//! # EXISTS Rewriter (filter-only join excision)
//!
//! When a retrieve projects nothing but aggregate values, a joined range
//! that feeds no aggregate and appears in no other clause contributes only
//! its filtering effect - and a join used as a filter multiplies aggregate
//! rows. The rewrite excises such a range: its join predicate moves,
//! rebound onto a clone, into an `EXISTS(select 1 from clone where ...)`
//! that is AND-combined into the outer WHERE, and the original range is
//! removed.

use std::ops::ControlFlow;

use tracing::trace;

use super::OptimizerStats;
use crate::analysis::surgery::join_reference_map;
use crate::ast::builders::num;
use crate::ast::predicate::and_into_conditions;
use crate::ast::visitor::{collect_identifiers, references_range, walk_block};
use crate::ast::{Ast, NodeId, NodeKind, Subquery, SubqueryKind};
use crate::error::{OptimizeError, Result};

/// Excise filter-only joins under an aggregate-only projection
pub fn excise_filter_only_joins(
    ast: &mut Ast,
    retrieve: NodeId,
    stats: &mut OptimizerStats,
) -> Result<()> {
    if !projection_is_aggregate_only(ast, retrieve)? {
        return Ok(());
    }

    let ranges = ast.retrieve(retrieve)?.ranges.clone();
    for range in ranges {
        if !excisable(ast, retrieve, range)? {
            continue;
        }

        // The clone carries the join predicate; deep_clone already rebinds
        // the clone-internal identifiers onto the clone, while references
        // to other ranges stay put as correlation.
        let clone = ast.deep_clone(range);
        let pred = ast.take_join_predicate(clone)?.ok_or_else(|| {
            OptimizeError::InvariantViolation("excised range lost its join predicate".to_string())
        })?;

        let correlated: Vec<NodeId> = collect_identifiers(ast, pred)
            .into_iter()
            .filter_map(|ident| ast.identifier_range(ident))
            .filter(|r| *r != clone)
            .fold(Vec::new(), |mut acc, r| {
                if !acc.contains(&r) {
                    acc.push(r);
                }
                acc
            });

        let one = num(ast, "1");
        let exists = ast.alloc(NodeKind::Subquery(Subquery {
            kind: SubqueryKind::Exists,
            inner: Some(one),
            ranges: vec![clone],
            correlated,
            conditions: Some(pred),
        }));
        ast.adopt(exists, one);
        ast.adopt(exists, clone);
        ast.adopt(exists, pred);

        trace!(range = ast.range_name(range), "excising filter-only join");
        and_into_conditions(ast, retrieve, exists)?;
        ast.remove_range(retrieve, range)?;
        stats.filter_joins_excised += 1;
    }
    Ok(())
}

/// Every projected identifier sits inside an aggregate, and at least one
/// aggregate is projected
fn projection_is_aggregate_only(ast: &Ast, retrieve: NodeId) -> Result<bool> {
    let block = ast.retrieve(retrieve)?;
    if block.projection.is_empty() {
        return Ok(false);
    }

    let mut has_aggregate = false;
    for &item in &block.projection {
        let mut bare_identifier = false;
        let _ = walk_block(ast, item, &mut |id| {
            match ast.kind(id) {
                NodeKind::Aggregate { .. } => has_aggregate = true,
                NodeKind::Identifier { .. }
                    if ast.is_chain_base(id) && !under_aggregate(ast, id, item) =>
                {
                    bare_identifier = true;
                    return ControlFlow::Break(());
                }
                _ => {}
            }
            ControlFlow::Continue(())
        });
        if bare_identifier {
            return Ok(false);
        }
    }
    Ok(has_aggregate)
}

fn under_aggregate(ast: &Ast, node: NodeId, stop: NodeId) -> bool {
    let mut current = ast.parent(node);
    while let Some(id) = current {
        match ast.kind(id) {
            NodeKind::Aggregate { .. } | NodeKind::Subquery(_) => return true,
            _ if id == stop => return false,
            _ => current = ast.parent(id),
        }
    }
    false
}

/// A range can be excised when it is joined (not the anchor), feeds no
/// aggregate, appears in no clause, and no other range's join predicate
/// mentions it
fn excisable(ast: &Ast, retrieve: NodeId, range: NodeId) -> Result<bool> {
    if !ast.is_database_range(range) || ast.join_predicate(range).is_none() {
        return Ok(false);
    }

    let block = ast.retrieve(retrieve)?;
    let mut clause_roots: Vec<NodeId> = Vec::new();
    clause_roots.extend(block.projection.iter().copied());
    clause_roots.extend(block.conditions.iter().copied());
    clause_roots.extend(block.sort.iter().map(|s| s.node));
    clause_roots.extend(block.group_by.iter().copied());
    clause_roots.extend(block.macros.values().copied());

    for root in clause_roots {
        if references_range(ast, root, range) {
            return Ok(false);
        }
    }

    let reference_map = join_reference_map(ast, &block.ranges);
    let referenced_elsewhere = reference_map
        .iter()
        .any(|(owner, refs)| *owner != range && refs.contains(&range));
    Ok(!referenced_elsewhere)
}
