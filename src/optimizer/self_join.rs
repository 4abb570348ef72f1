//! # Self-Join Simplification
//!
//! `EXISTS(select 1 from X x2 where o.a = x2.a AND o.b = x2.b)` asks
//! whether the sibling row the outer row already is exists - it always
//! does, up to NULL join columns. The rewrite therefore replaces the
//! whole EXISTS:
//!
//! - `include_nulls` set: with the always-true literal `1 = 1` - NULLs
//!   count as matching, so the self-join can never fail.
//! - otherwise: with `o.a IS NOT NULL AND o.b IS NOT NULL` in outer-left
//!   order - a row exists in the sibling range exactly when every join
//!   column is non-NULL.
//!
//! The rewrite fires only when every conjunct of the EXISTS body is a
//! plain `outer.col = inner.col` equality over the same entity and the
//! same property, with exactly one side bound to the inner range.

use std::ops::ControlFlow;

use tracing::trace;

use super::OptimizerStats;
use crate::ast::builders::{is_not_null, num};
use crate::ast::predicate::{combine_and, flatten_and};
use crate::ast::visitor::walk;
use crate::ast::{Ast, BinaryOp, NodeId, NodeKind, SubqueryKind};
use crate::error::{OptimizeError, Result};

/// Collapse self-join EXISTS tests in the block's conditions
pub fn simplify_self_joins(ast: &mut Ast, retrieve: NodeId, stats: &mut OptimizerStats) -> Result<()> {
    let block = ast.retrieve(retrieve)?;
    let include_nulls = block.include_nulls;
    let Some(conditions) = block.conditions else {
        return Ok(());
    };

    let mut exists_nodes = Vec::new();
    let _ = walk(ast, conditions, &mut |id| {
        if matches!(
            ast.kind(id),
            NodeKind::Subquery(sub) if sub.kind == SubqueryKind::Exists
        ) {
            exists_nodes.push(id);
        }
        ControlFlow::Continue(())
    });

    for exists in exists_nodes {
        let Some(outer_columns) = match_self_join(ast, exists) else {
            continue;
        };

        let replacement = if include_nulls {
            // The self-join always matches; emit the canonical TRUE
            let one_a = num(ast, "1");
            let one_b = num(ast, "1");
            let node = ast.alloc(NodeKind::Binary {
                op: BinaryOp::Eq,
                left: one_a,
                right: one_b,
            });
            ast.adopt(node, one_a);
            ast.adopt(node, one_b);
            node
        } else {
            let checks: Vec<Option<NodeId>> = outer_columns
                .iter()
                .map(|&outer_ident| {
                    let clone = ast.deep_clone(outer_ident);
                    Some(is_not_null(ast, clone))
                })
                .collect();
            combine_and(ast, checks).ok_or_else(|| {
                OptimizeError::InvariantViolation(
                    "self-join simplification produced no NOT NULL checks".to_string(),
                )
            })?
        };

        let parent = ast.parent(exists).ok_or_else(|| {
            OptimizeError::InvariantViolation("EXISTS node has no parent".to_string())
        })?;
        trace!(include_nulls, "collapsing self-join EXISTS");
        ast.replace_child(parent, exists, replacement)?;
        stats.self_joins_simplified += 1;
    }
    Ok(())
}

/// Check the self-join precondition; on success return the outer-side
/// identifiers of each equality conjunct, in outer-left order
fn match_self_join(ast: &Ast, exists: NodeId) -> Option<Vec<NodeId>> {
    let sub = ast.as_subquery(exists)?;
    if sub.kind != SubqueryKind::Exists || sub.ranges.len() != 1 {
        return None;
    }
    let inner_range = sub.ranges[0];
    if !ast.is_database_range(inner_range) || ast.derived_retrieve(inner_range).is_some() {
        return None;
    }
    let inner_entity = ast.range_entity(inner_range)?.to_string();
    let conditions = sub.conditions?;

    let mut outer_columns = Vec::new();
    for conjunct in flatten_and(ast, conditions) {
        let NodeKind::Binary {
            op: BinaryOp::Eq,
            left,
            right,
        } = ast.kind(conjunct)
        else {
            return None;
        };

        let left_side = identifier_side(ast, *left)?;
        let right_side = identifier_side(ast, *right)?;

        // Exactly one side belongs to the inner range
        let (outer, inner) = match (
            left_side.range == inner_range,
            right_side.range == inner_range,
        ) {
            (false, true) => (left_side, right_side),
            (true, false) => (right_side, left_side),
            _ => return None,
        };

        // Same entity, same property on both sides
        if ast.range_entity(outer.range)? != inner_entity || outer.property != inner.property {
            return None;
        }
        outer_columns.push(outer.ident);
    }

    if outer_columns.is_empty() {
        return None;
    }
    Some(outer_columns)
}

struct IdentifierSide {
    ident: NodeId,
    range: NodeId,
    property: String,
}

/// A side qualifies when it is a single-segment identifier bound to a
/// database range
fn identifier_side(ast: &Ast, node: NodeId) -> Option<IdentifierSide> {
    let NodeKind::Identifier {
        segment,
        next: None,
        ..
    } = ast.kind(node)
    else {
        return None;
    };
    let range = ast.identifier_range(node)?;
    if !ast.is_database_range(range) {
        return None;
    }
    Some(IdentifierSide {
        ident: node,
        range,
        property: segment.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::*;
    use crate::ast::print::render;

    /// EXISTS(select 1 from u2 in User where u.id = u2.id AND u.name = u2.name)
    fn self_join_retrieve(ast: &mut Ast, include_nulls: bool) -> NodeId {
        let u = db_range(ast, "u", "User");
        let u2 = db_range(ast, "u2", "User");

        let uid = ident(ast, u, &["id"]);
        let u2id = ident(ast, u2, &["id"]);
        let id_eq = eq(ast, uid, u2id);
        let uname = ident(ast, u, &["name"]);
        let u2name = ident(ast, u2, &["name"]);
        let name_eq = eq(ast, uname, u2name);
        let body = and(ast, id_eq, name_eq);

        let one = num(ast, "1");
        let exists = subquery(
            ast,
            crate::ast::SubqueryKind::Exists,
            Some(one),
            vec![u2],
            Some(body),
        );

        let name = ident(ast, u, &["name"]);
        let mut builder = RetrieveBuilder::new()
            .project("name", name)
            .range(u, None)
            .conditions(exists);
        if include_nulls {
            builder = builder.include_nulls();
        }
        builder.build(ast)
    }

    #[test]
    fn test_include_nulls_collapses_to_true() {
        let mut ast = Ast::new();
        let retrieve = self_join_retrieve(&mut ast, true);

        let mut stats = OptimizerStats::default();
        simplify_self_joins(&mut ast, retrieve, &mut stats).unwrap();

        let cond = ast.retrieve(retrieve).unwrap().conditions.unwrap();
        assert_eq!(render(&ast, cond), "1 = 1");
        assert_eq!(stats.self_joins_simplified, 1);
    }

    #[test]
    fn test_exclude_nulls_collapses_to_not_null_chain() {
        let mut ast = Ast::new();
        let retrieve = self_join_retrieve(&mut ast, false);

        let mut stats = OptimizerStats::default();
        simplify_self_joins(&mut ast, retrieve, &mut stats).unwrap();

        let cond = ast.retrieve(retrieve).unwrap().conditions.unwrap();
        assert_eq!(
            render(&ast, cond),
            "u.id IS NOT NULL AND u.name IS NOT NULL"
        );
    }

    #[test]
    fn test_cross_entity_exists_is_left_alone() {
        let mut ast = Ast::new();
        let u = db_range(&mut ast, "u", "User");
        let o = db_range(&mut ast, "o", "Order");

        let uid = ident(&mut ast, u, &["id"]);
        let ouid = ident(&mut ast, o, &["userId"]);
        let body = eq(&mut ast, uid, ouid);
        let one = num(&mut ast, "1");
        let exists = subquery(
            &mut ast,
            crate::ast::SubqueryKind::Exists,
            Some(one),
            vec![o],
            Some(body),
        );
        let name = ident(&mut ast, u, &["name"]);
        let retrieve = RetrieveBuilder::new()
            .project("name", name)
            .range(u, None)
            .conditions(exists)
            .build(&mut ast);

        let mut stats = OptimizerStats::default();
        simplify_self_joins(&mut ast, retrieve, &mut stats).unwrap();

        assert_eq!(ast.retrieve(retrieve).unwrap().conditions, Some(exists));
        assert_eq!(stats.self_joins_simplified, 0);
    }

    #[test]
    fn test_non_equality_conjunct_blocks_rewrite() {
        let mut ast = Ast::new();
        let u = db_range(&mut ast, "u", "User");
        let u2 = db_range(&mut ast, "u2", "User");

        let uid = ident(&mut ast, u, &["id"]);
        let u2id = ident(&mut ast, u2, &["id"]);
        let id_eq = eq(&mut ast, uid, u2id);
        let u2age = ident(&mut ast, u2, &["age"]);
        let limit = num(&mut ast, "21");
        let age_gt = binary(&mut ast, BinaryOp::Gt, u2age, limit);
        let body = and(&mut ast, id_eq, age_gt);

        let one = num(&mut ast, "1");
        let exists = subquery(
            &mut ast,
            crate::ast::SubqueryKind::Exists,
            Some(one),
            vec![u2],
            Some(body),
        );
        let name = ident(&mut ast, u, &["name"]);
        let retrieve = RetrieveBuilder::new()
            .project("name", name)
            .range(u, None)
            .conditions(exists)
            .build(&mut ast);

        let mut stats = OptimizerStats::default();
        simplify_self_joins(&mut ast, retrieve, &mut stats).unwrap();
        assert_eq!(stats.self_joins_simplified, 0);
    }
}
