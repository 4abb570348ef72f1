//! Predicate combinators: AND/OR combination, flattening, rebinding.
//!
//! Rewrite rules constantly tear predicates apart and reassemble them -
//! folding a join predicate into WHERE, splitting conjuncts between a
//! subquery and its outer block, rebuilding an EXISTS body. These helpers
//! keep parent links consistent while doing so.

use std::collections::HashMap;

use super::{Ast, BinaryOp, NodeId, NodeKind};
use crate::error::Result;

/// AND-combine predicate parts into a left-deep tree.
///
/// `None` parts are dropped; an empty list yields `None`; a single part is
/// returned as-is. The returned root is detached (no parent).
pub fn combine_and(ast: &mut Ast, parts: Vec<Option<NodeId>>) -> Option<NodeId> {
    combine(ast, BinaryOp::And, parts)
}

/// OR-combine predicate parts into a left-deep tree; same contract as
/// [`combine_and`]
pub fn combine_or(ast: &mut Ast, parts: Vec<Option<NodeId>>) -> Option<NodeId> {
    combine(ast, BinaryOp::Or, parts)
}

fn combine(ast: &mut Ast, op: BinaryOp, parts: Vec<Option<NodeId>>) -> Option<NodeId> {
    let mut present = parts.into_iter().flatten();
    let first = present.next()?;
    let mut acc = first;
    for part in present {
        let node = ast.alloc(NodeKind::Binary {
            op,
            left: acc,
            right: part,
        });
        ast.adopt(node, acc);
        ast.adopt(node, part);
        acc = node;
    }
    ast.set_parent(acc, None);
    Some(acc)
}

/// Decompose nested ANDs into a flat conjunct list, left to right.
/// A non-AND node yields a single-element list. Read-only.
pub fn flatten_and(ast: &Ast, node: NodeId) -> Vec<NodeId> {
    flatten(ast, BinaryOp::And, node)
}

/// Decompose nested ORs into a flat disjunct list, left to right
pub fn flatten_or(ast: &Ast, node: NodeId) -> Vec<NodeId> {
    flatten(ast, BinaryOp::Or, node)
}

fn flatten(ast: &Ast, op: BinaryOp, node: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack = vec![node];
    while let Some(id) = stack.pop() {
        match ast.kind(id) {
            NodeKind::Binary { op: o, left, right } if *o == op => {
                // Push right first so the left conjunct is processed first
                stack.push(*right);
                stack.push(*left);
            }
            _ => out.push(id),
        }
    }
    out
}

/// Deep-clone a predicate and retarget every identifier bound to
/// `old_range` onto `new_range`. The cloned predicate has no parent.
pub fn rebind_predicate_to_clone(
    ast: &mut Ast,
    pred: NodeId,
    old_range: NodeId,
    new_range: NodeId,
) -> NodeId {
    let clone = ast.deep_clone(pred);
    let mut map = HashMap::new();
    map.insert(old_range, new_range);
    retarget_identifiers(ast, clone, &map);
    clone
}

/// Walk a subtree in place and retarget identifier range bindings through
/// `map`; bindings to ranges outside the map are untouched
pub fn retarget_identifiers(ast: &mut Ast, root: NodeId, map: &HashMap<NodeId, NodeId>) {
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if let NodeKind::Identifier { range, .. } = ast.kind_mut(id) {
            if let Some(bound) = range {
                if let Some(new) = map.get(bound) {
                    *range = Some(*new);
                }
            }
        }
        stack.extend(ast.children(id));
    }
}

/// AND-combine a predicate into a retrieve block's conditions
pub fn and_into_conditions(ast: &mut Ast, retrieve: NodeId, pred: NodeId) -> Result<()> {
    let existing = ast.retrieve(retrieve)?.conditions;
    let combined = combine_and(ast, vec![existing, Some(pred)]);
    if let Some(root) = combined {
        ast.adopt(retrieve, root);
    }
    ast.retrieve_mut(retrieve)?.conditions = combined;
    Ok(())
}
