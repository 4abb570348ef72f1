//! # ANY Rewriter
//!
//! `any(expr)` is an existence test. Its lowering depends on where the
//! node sits:
//!
//! - in the conditions it becomes an `EXISTS(select 1 ...)` subquery;
//! - in a value position (projection, sort) it becomes
//!   `CASE WHEN EXISTS(select 1 ...) THEN 1 ELSE 0 END`
//!   ([`SubqueryKind::CaseWhen`]);
//! - when the target range is already INNER-joined, the referenced column
//!   is NOT NULL and the ANY carries no conditions, existence is already
//!   guaranteed by the join and the node degenerates to the literal `1`.
//!
//! The subquery body is assembled with the same clone-and-split machinery
//! as scalar aggregate lowering.

use tracing::trace;

use super::aggregate::build_correlated_body;
use super::OptimizerStats;
use crate::analysis::analyze_any;
use crate::ast::builders::num;
use crate::ast::visitor::{find_all_any, referenced_ranges_of};
use crate::ast::{Ast, NodeId, NodeKind, Subquery, SubqueryKind};
use crate::error::{OptimizeError, Result};
use crate::metadata::EntityMetadata;

/// Rewrite every ANY aggregate of the block
pub fn rewrite_any(
    ast: &mut Ast,
    retrieve: NodeId,
    metadata: &dyn EntityMetadata,
    stats: &mut OptimizerStats,
) -> Result<()> {
    // Re-collect after each rewrite; rewritten nodes leave the block walk
    while let Some(any_node) = find_all_any(ast, retrieve).into_iter().next() {
        rewrite_one(ast, retrieve, any_node, metadata, stats)?;
    }
    Ok(())
}

fn rewrite_one(
    ast: &mut Ast,
    retrieve: NodeId,
    any_node: NodeId,
    metadata: &dyn EntityMetadata,
    stats: &mut OptimizerStats,
) -> Result<()> {
    let (operand, conditions) = match ast.kind(any_node) {
        NodeKind::Aggregate {
            operand,
            conditions,
            ..
        } => (*operand, *conditions),
        _ => {
            return Err(OptimizeError::InvariantViolation(
                "ANY target is not an aggregate node".to_string(),
            ))
        }
    };
    let parent = ast.parent(any_node).ok_or_else(|| {
        OptimizeError::InvariantViolation("ANY node has no parent".to_string())
    })?;

    // Fast path: the joined row provably exists
    if conditions.is_none() && guaranteed_by_inner_join(ast, retrieve, any_node, operand, metadata)? {
        trace!("ANY degenerates to literal 1");
        let one = num(ast, "1");
        ast.replace_child(parent, any_node, one)?;
        stats.any_rewritten += 1;
        return Ok(());
    }

    let outer_ranges: Vec<NodeId> = ast
        .retrieve(retrieve)?
        .ranges
        .iter()
        .copied()
        .filter(|&r| ast.is_database_range(r))
        .collect();

    let mut seed_roots = vec![operand];
    seed_roots.extend(conditions);
    let seeds: Vec<NodeId> = referenced_ranges_of(ast, &seed_roots)
        .into_iter()
        .filter(|r| outer_ranges.contains(r))
        .collect();

    if seeds.is_empty() && conditions.is_none() {
        // ANY over constants: any current row satisfies it
        let one = num(ast, "1");
        ast.replace_child(parent, any_node, one)?;
        stats.any_rewritten += 1;
        return Ok(());
    }

    // Detach the embedded conditions; they move into the subquery WHERE
    if let Some(cond) = conditions {
        if let NodeKind::Aggregate {
            conditions: slot, ..
        } = ast.kind_mut(any_node)
        {
            *slot = None;
        }
        ast.set_parent(cond, None);
    }

    let body = build_correlated_body(ast, &outer_ranges, &seeds, conditions)?;

    let kind = if in_conditions(ast, retrieve, any_node)? {
        SubqueryKind::Exists
    } else {
        SubqueryKind::CaseWhen
    };

    let one = num(ast, "1");
    let wrapper = ast.alloc(NodeKind::Subquery(Subquery {
        kind,
        inner: Some(one),
        ranges: body.ranges.clone(),
        correlated: body.correlated,
        conditions: body.conditions,
    }));
    ast.adopt(wrapper, one);
    for &range in &body.ranges {
        ast.adopt(wrapper, range);
    }
    if let Some(cond) = body.conditions {
        ast.adopt(wrapper, cond);
    }

    trace!(?kind, "rewriting ANY to existence subquery");
    ast.replace_child(parent, any_node, wrapper)?;
    stats.any_rewritten += 1;
    Ok(())
}

/// The operand is a plain column of an INNER-joined (or anchor) range and
/// the column is declared NOT NULL
fn guaranteed_by_inner_join(
    ast: &Ast,
    retrieve: NodeId,
    any_node: NodeId,
    operand: NodeId,
    metadata: &dyn EntityMetadata,
) -> Result<bool> {
    if !matches!(
        ast.kind(operand),
        NodeKind::Identifier { next: None, .. }
    ) {
        return Ok(false);
    }
    let Some(range) = ast.identifier_range(operand) else {
        return Ok(false);
    };
    let block = ast.retrieve(retrieve)?;
    if !block.ranges.contains(&range) || !ast.is_required(range) {
        return Ok(false);
    }
    let analysis = analyze_any(ast, any_node, metadata)?;
    Ok(analysis.usage(range).non_nullable_use)
}

/// Whether the node sits under the block's conditions clause
fn in_conditions(ast: &Ast, retrieve: NodeId, node: NodeId) -> Result<bool> {
    let block = ast.retrieve(retrieve)?;
    Ok(block
        .conditions
        .is_some_and(|cond| ast.is_ancestor_of(cond, node)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::*;
    use crate::ast::print::render;
    use crate::ast::AggregateFunc;
    use crate::metadata::{EntityDef, MetadataRegistry};

    fn registry() -> MetadataRegistry {
        let mut registry = MetadataRegistry::new();
        registry.register(
            EntityDef::new("User", "users")
                .column("id", "id", false)
                .column("name", "name", true)
                .primary_key(&["id"]),
        );
        registry.register(
            EntityDef::new("Order", "orders")
                .column("id", "id", false)
                .column("userId", "user_id", false)
                .primary_key(&["id"]),
        );
        registry
    }

    #[test]
    fn test_any_degenerates_to_literal_on_inner_non_nullable() {
        let mut ast = Ast::new();
        let u = db_range(&mut ast, "u", "User");
        let o = db_range(&mut ast, "o", "Order");
        let ouid = ident(&mut ast, o, &["userId"]);
        let uid = ident(&mut ast, u, &["id"]);
        let join = eq(&mut ast, ouid, uid);
        ast.set_join_predicate(o, Some(join)).unwrap();

        let oid = ident(&mut ast, o, &["id"]);
        let any = aggregate(&mut ast, AggregateFunc::Any, oid);
        let name = ident(&mut ast, u, &["name"]);
        let retrieve = RetrieveBuilder::new()
            .project("name", name)
            .project("has_order", any)
            .range(u, None)
            .range(o, None)
            .build(&mut ast);

        let mut stats = OptimizerStats::default();
        rewrite_any(&mut ast, retrieve, &registry(), &mut stats).unwrap();

        let block = ast.retrieve(retrieve).unwrap();
        let item = block.projection[1];
        let expr = match ast.kind(item) {
            NodeKind::ProjectionItem { expr, .. } => *expr,
            _ => panic!("expected projection item"),
        };
        assert_eq!(render(&ast, expr), "1");
        assert_eq!(stats.any_rewritten, 1);
    }

    #[test]
    fn test_any_in_select_becomes_case_when_exists() {
        let mut ast = Ast::new();
        let u = db_range(&mut ast, "u", "User");
        let o = left_range(&mut ast, "o", "Order");
        let ouid = ident(&mut ast, o, &["userId"]);
        let uid = ident(&mut ast, u, &["id"]);
        let join = eq(&mut ast, ouid, uid);
        ast.set_join_predicate(o, Some(join)).unwrap();

        let oid = ident(&mut ast, o, &["id"]);
        let any = aggregate(&mut ast, AggregateFunc::Any, oid);
        let name = ident(&mut ast, u, &["name"]);
        let retrieve = RetrieveBuilder::new()
            .project("name", name)
            .project("has_order", any)
            .range(u, None)
            .range(o, None)
            .build(&mut ast);

        let mut stats = OptimizerStats::default();
        rewrite_any(&mut ast, retrieve, &registry(), &mut stats).unwrap();

        let block = ast.retrieve(retrieve).unwrap();
        let item = block.projection[1];
        let expr = match ast.kind(item) {
            NodeKind::ProjectionItem { expr, .. } => *expr,
            _ => panic!("expected projection item"),
        };
        let sub = ast.as_subquery(expr).expect("expected subquery");
        assert_eq!(sub.kind, SubqueryKind::CaseWhen);
        assert_eq!(
            render(&ast, expr),
            "CASE WHEN EXISTS(select 1 from o in Order where o.userId = u.id) THEN 1 ELSE 0 END"
        );
    }

    #[test]
    fn test_any_in_where_becomes_exists() {
        let mut ast = Ast::new();
        let u = db_range(&mut ast, "u", "User");
        let o = left_range(&mut ast, "o", "Order");
        let ouid = ident(&mut ast, o, &["userId"]);
        let uid = ident(&mut ast, u, &["id"]);
        let join = eq(&mut ast, ouid, uid);
        ast.set_join_predicate(o, Some(join)).unwrap();

        let oid = ident(&mut ast, o, &["id"]);
        let any = aggregate(&mut ast, AggregateFunc::Any, oid);
        let one = num(&mut ast, "1");
        let cond = eq(&mut ast, any, one);
        let name = ident(&mut ast, u, &["name"]);
        let retrieve = RetrieveBuilder::new()
            .project("name", name)
            .range(u, None)
            .range(o, None)
            .conditions(cond)
            .build(&mut ast);

        let mut stats = OptimizerStats::default();
        rewrite_any(&mut ast, retrieve, &registry(), &mut stats).unwrap();

        let block = ast.retrieve(retrieve).unwrap();
        let cond = block.conditions.unwrap();
        assert_eq!(
            render(&ast, cond),
            "EXISTS(select 1 from o in Order where o.userId = u.id) = 1"
        );
    }
}
