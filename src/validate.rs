//! Post-optimize structural validation.
//!
//! Checks the invariants every rewrite must preserve:
//!
//! 1. every retrieve block (nested ones included) has exactly one anchor
//!    among its database ranges, unless it has none;
//! 2. every identifier resolves to a range of its enclosing block, to a
//!    range owned by an enclosing subquery, or to a correlated outer
//!    range the subquery declares;
//! 3. parent back-links match structural position and the owned-child
//!    graph is a tree.
//!
//! The optimizer itself trusts its rules; this module is the oracle the
//! test suites (and debugging sessions) run after optimization.

use std::collections::HashSet;

use crate::ast::{Ast, NodeId, NodeKind};
use crate::error::{OptimizeError, Result};

/// Verify invariants 1-3 over a retrieve tree
pub fn check_invariants(ast: &Ast, retrieve: NodeId) -> Result<()> {
    check_parent_links(ast, retrieve)?;
    let mut scope = Vec::new();
    check_block(ast, retrieve, &mut scope)
}

/// Invariant 3: each owned child points back at its structural parent,
/// and no node is owned twice
fn check_parent_links(ast: &Ast, root: NodeId) -> Result<()> {
    let mut seen: HashSet<NodeId> = HashSet::new();
    seen.insert(root);
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        for child in ast.children(node) {
            if !seen.insert(child) {
                return Err(OptimizeError::InvariantViolation(format!(
                    "node {child:?} is owned by two parents"
                )));
            }
            if ast.parent(child) != Some(node) {
                return Err(OptimizeError::InvariantViolation(format!(
                    "parent link of {child:?} does not match its structural parent {node:?}"
                )));
            }
            stack.push(child);
        }
    }
    Ok(())
}

/// Invariants 1 and 2, recursing into derived retrieves and subqueries
/// with the visibility scope of each block
fn check_block(ast: &Ast, retrieve: NodeId, scope: &mut Vec<Vec<NodeId>>) -> Result<()> {
    let block = ast.retrieve(retrieve)?;

    let db_ranges: Vec<NodeId> = block
        .ranges
        .iter()
        .copied()
        .filter(|&r| ast.is_database_range(r))
        .collect();
    if !db_ranges.is_empty() {
        let anchors = db_ranges.iter().filter(|&&r| ast.is_anchor(r)).count();
        if anchors != 1 {
            return Err(OptimizeError::InvariantViolation(format!(
                "retrieve block has {anchors} anchors across {} ranges",
                db_ranges.len()
            )));
        }
    }

    scope.push(block.ranges.clone());

    let mut clause_roots: Vec<NodeId> = Vec::new();
    clause_roots.extend(block.projection.iter().copied());
    clause_roots.extend(block.conditions.iter().copied());
    clause_roots.extend(block.sort.iter().map(|s| s.node));
    clause_roots.extend(block.group_by.iter().copied());
    clause_roots.extend(block.macros.values().copied());
    for root in clause_roots {
        check_expr(ast, root, scope)?;
    }
    for &range in &block.ranges {
        if let Some(pred) = ast.join_predicate(range) {
            check_expr(ast, pred, scope)?;
        }
        if let Some(derived) = ast.derived_retrieve(range) {
            check_block(ast, derived, scope)?;
        }
    }

    scope.pop();
    Ok(())
}

fn check_expr(ast: &Ast, node: NodeId, scope: &mut Vec<Vec<NodeId>>) -> Result<()> {
    match ast.kind(node) {
        NodeKind::Identifier { .. } if ast.is_chain_base(node) => {
            if let Some(range) = ast.identifier_range(node) {
                let visible = scope.iter().any(|frame| frame.contains(&range));
                if !visible {
                    return Err(OptimizeError::InvariantViolation(format!(
                        "identifier '{}' references a range outside its scope",
                        ast.complete_name(node)
                    )));
                }
            }
            Ok(())
        }
        NodeKind::Subquery(sub) => {
            // Correlated ranges must actually be visible outer ranges
            for correlated in &sub.correlated {
                let visible = scope.iter().any(|frame| frame.contains(correlated));
                if !visible {
                    return Err(OptimizeError::InvariantViolation(
                        "subquery declares a correlated range outside its scope".to_string(),
                    ));
                }
            }
            let mut frame: Vec<NodeId> = sub.ranges.clone();
            frame.extend(sub.correlated.iter().copied());
            scope.push(frame);
            if let Some(inner) = sub.inner {
                check_expr(ast, inner, scope)?;
            }
            if let Some(cond) = sub.conditions {
                check_expr(ast, cond, scope)?;
            }
            for &range in &sub.ranges {
                if let Some(pred) = ast.join_predicate(range) {
                    check_expr(ast, pred, scope)?;
                }
                if let Some(derived) = ast.derived_retrieve(range) {
                    check_block(ast, derived, scope)?;
                }
            }
            scope.pop();
            Ok(())
        }
        NodeKind::Retrieve(_) => check_block(ast, node, scope),
        _ => {
            for child in ast.children(node) {
                check_expr(ast, child, scope)?;
            }
            Ok(())
        }
    }
}
