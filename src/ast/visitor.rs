//! Tree traversal and node collection.
//!
//! Traversal is pre-order: the node itself, then its owned children in
//! declared order. Visitors short-circuit with [`ControlFlow::Break`], the
//! idiomatic stand-in for the sentinel-signal escape of the object model.
//!
//! Two walks exist:
//!
//! - [`walk`] descends through everything, including subquery wrappers and
//!   nested retrieves. Reference collection (pruning safety) uses this.
//! - [`walk_block`] stays inside one query block: it visits subquery
//!   wrappers and derived-table ranges but does not descend into them.
//!   Rewrite-target collection uses this, which is also what keeps the
//!   individual optimizers idempotent - an aggregate already lowered into a
//!   subquery is no longer a target.

use std::ops::ControlFlow;

use super::{AggregateFunc, Ast, NodeId, NodeKind};

/// Pre-order walk over the full subtree
pub fn walk(ast: &Ast, root: NodeId, f: &mut impl FnMut(NodeId) -> ControlFlow<()>) -> ControlFlow<()> {
    f(root)?;
    for child in ast.children(root) {
        walk(ast, child, f)?;
    }
    ControlFlow::Continue(())
}

/// Pre-order walk that does not descend into subquery wrappers or nested
/// retrieve blocks (the wrappers themselves are visited)
pub fn walk_block(
    ast: &Ast,
    root: NodeId,
    f: &mut impl FnMut(NodeId) -> ControlFlow<()>,
) -> ControlFlow<()> {
    walk_block_inner(ast, root, root, f)
}

fn walk_block_inner(
    ast: &Ast,
    root: NodeId,
    node: NodeId,
    f: &mut impl FnMut(NodeId) -> ControlFlow<()>,
) -> ControlFlow<()> {
    f(node)?;
    match ast.kind(node) {
        // Subquery internals belong to the lowered block, not this one
        NodeKind::Subquery(_) if node != root => ControlFlow::Continue(()),
        // Nested retrieve = a different block
        NodeKind::Retrieve(_) if node != root => ControlFlow::Continue(()),
        // A range's join predicate is part of this block; its derived
        // retrieve is not
        NodeKind::DatabaseRange { join_predicate, .. } => {
            if let Some(pred) = join_predicate {
                walk_block_inner(ast, root, *pred, f)?;
            }
            ControlFlow::Continue(())
        }
        _ => {
            for child in ast.children(node) {
                walk_block_inner(ast, root, child, f)?;
            }
            ControlFlow::Continue(())
        }
    }
}

/// Collect the base identifiers in a subtree, in visit order
pub fn collect_identifiers(ast: &Ast, root: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let _ = walk(ast, root, &mut |id| {
        if matches!(ast.kind(id), NodeKind::Identifier { .. }) && ast.is_chain_base(id) {
            out.push(id);
        }
        ControlFlow::Continue(())
    });
    out
}

/// Distinct ranges referenced by identifiers in a subtree, in
/// first-reference order
pub fn referenced_ranges(ast: &Ast, root: NodeId) -> Vec<NodeId> {
    referenced_ranges_of(ast, &[root])
}

/// Distinct ranges referenced by identifiers across several subtrees
pub fn referenced_ranges_of(ast: &Ast, roots: &[NodeId]) -> Vec<NodeId> {
    let mut out = Vec::new();
    for &root in roots {
        for ident in collect_identifiers(ast, root) {
            if let Some(range) = ast.identifier_range(ident) {
                if !out.contains(&range) {
                    out.push(range);
                }
            }
        }
    }
    out
}

/// Collect aggregate nodes anywhere in a subtree, in visit order
pub fn collect_aggregates(ast: &Ast, root: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let _ = walk(ast, root, &mut |id| {
        if matches!(ast.kind(id), NodeKind::Aggregate { .. }) {
            out.push(id);
        }
        ControlFlow::Continue(())
    });
    out
}

/// Collect aggregate nodes belonging to one query block (aggregates
/// already lowered into subqueries are not included)
pub fn collect_block_aggregates(ast: &Ast, root: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let _ = walk_block(ast, root, &mut |id| {
        if matches!(ast.kind(id), NodeKind::Aggregate { .. }) {
            out.push(id);
        }
        ControlFlow::Continue(())
    });
    out
}

/// All ANY aggregates belonging to a retrieve block
pub fn find_all_any(ast: &Ast, retrieve: NodeId) -> Vec<NodeId> {
    collect_block_aggregates(ast, retrieve)
        .into_iter()
        .filter(|id| {
            matches!(
                ast.kind(*id),
                NodeKind::Aggregate {
                    func: AggregateFunc::Any,
                    ..
                }
            )
        })
        .collect()
}

/// True when the subtree contains an identifier bound to `range`
pub fn references_range(ast: &Ast, root: NodeId, range: NodeId) -> bool {
    let mut found = false;
    let _ = walk(ast, root, &mut |id| {
        if matches!(ast.kind(id), NodeKind::Identifier { .. })
            && ast.is_chain_base(id)
            && ast.identifier_range(id) == Some(range)
        {
            found = true;
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    });
    found
}

#[cfg(test)]
mod tests {
    use super::super::builders::*;
    use super::super::{BinaryOp, SubqueryKind};
    use super::*;
    use crate::ast::Ast;

    #[test]
    fn test_collect_identifiers_in_order() {
        let mut ast = Ast::new();
        let u = db_range(&mut ast, "u", "User");
        let a = ident(&mut ast, u, &["a"]);
        let b = ident(&mut ast, u, &["b"]);
        let pred = binary(&mut ast, BinaryOp::Eq, a, b);

        assert_eq!(collect_identifiers(&ast, pred), vec![a, b]);
    }

    #[test]
    fn test_chain_tail_segments_are_not_bases() {
        let mut ast = Ast::new();
        let o = db_range(&mut ast, "o", "Order");
        let chain = ident(&mut ast, o, &["customer", "name"]);
        let lit = string(&mut ast, "x");
        let pred = binary(&mut ast, BinaryOp::Eq, chain, lit);

        // Only the base of the two-segment chain is collected
        assert_eq!(collect_identifiers(&ast, pred), vec![chain]);
    }

    #[test]
    fn test_referenced_ranges_dedupes() {
        let mut ast = Ast::new();
        let u = db_range(&mut ast, "u", "User");
        let o = db_range(&mut ast, "o", "Order");
        let a = ident(&mut ast, u, &["id"]);
        let b = ident(&mut ast, o, &["userId"]);
        let c = ident(&mut ast, u, &["name"]);
        let e1 = binary(&mut ast, BinaryOp::Eq, a, b);
        let lit = string(&mut ast, "z");
        let e2 = binary(&mut ast, BinaryOp::Eq, c, lit);
        let pred = and(&mut ast, e1, e2);

        assert_eq!(referenced_ranges(&ast, pred), vec![u, o]);
    }

    #[test]
    fn test_walk_short_circuits() {
        let mut ast = Ast::new();
        let l = num(&mut ast, "1");
        let r = num(&mut ast, "2");
        let add = binary(&mut ast, BinaryOp::Add, l, r);

        let mut visited = 0;
        let flow = walk(&ast, add, &mut |_| {
            visited += 1;
            if visited == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(flow, ControlFlow::Break(()));
        assert_eq!(visited, 2);
    }

    #[test]
    fn test_block_walk_skips_subquery_internals() {
        let mut ast = Ast::new();
        let u = db_range(&mut ast, "u", "User");
        let amount = ident(&mut ast, u, &["amount"]);
        let inner_agg = aggregate(&mut ast, crate::ast::AggregateFunc::Sum, amount);
        let sub = subquery(&mut ast, SubqueryKind::Scalar, Some(inner_agg), vec![], None);
        let item = projection_item(&mut ast, "total", sub, true);
        let retrieve = RetrieveBuilder::new()
            .project_node(item)
            .range(u, None)
            .build(&mut ast);

        // Full walk still sees the aggregate; the block walk does not
        assert_eq!(collect_aggregates(&ast, retrieve).len(), 1);
        assert!(collect_block_aggregates(&ast, retrieve).is_empty());
    }
}
