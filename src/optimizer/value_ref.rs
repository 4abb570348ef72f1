//! # Value-Reference Optimizer
//!
//! Final canonicalization pass over identifiers and constant-like
//! subtrees, run after the structural rewrites have settled:
//!
//! - `r.relation.pk` collapses to the relation field on `r` when the
//!   relation is to-one and the chain tail is the target's single
//!   primary-key property - the foreign key column already holds the
//!   value, no join needed.
//! - `NOT NOT x` drops to `x`; `NOT (a = b)` becomes `a <> b`; negated
//!   boolean literals fold.
//! - Boolean literals are absorbed in AND/OR.
//!
//! The pass is stateless and idempotent.

use tracing::trace;

use super::OptimizerStats;
use crate::ast::{Ast, BinaryOp, NodeId, NodeKind};
use crate::error::Result;
use crate::metadata::EntityMetadata;

/// Canonicalize value references across every clause of the block
pub fn canonicalize_value_references(
    ast: &mut Ast,
    retrieve: NodeId,
    metadata: &dyn EntityMetadata,
    stats: &mut OptimizerStats,
) -> Result<()> {
    ast.retrieve(retrieve)?;
    // Every clause root sits in an owned slot of the retrieve (or of a
    // range or subquery below it), so one bottom-up child rewrite over the
    // whole block handles root replacements uniformly.
    canon_children(ast, retrieve, metadata, stats)
}

/// Rewrite the children of `node` bottom-up, replacing child slots where
/// canonicalization produced a different subtree
fn canon_children(
    ast: &mut Ast,
    node: NodeId,
    metadata: &dyn EntityMetadata,
    stats: &mut OptimizerStats,
) -> Result<()> {
    for child in ast.children(node) {
        canon_children(ast, child, metadata, stats)?;
        if let Some(replacement) = canon_node(ast, child, metadata, stats)? {
            ast.replace_child(node, child, replacement)?;
        }
    }
    Ok(())
}

/// Canonicalize a single node; returns a replacement when the node itself
/// must be swapped in its parent slot
fn canon_node(
    ast: &mut Ast,
    node: NodeId,
    metadata: &dyn EntityMetadata,
    stats: &mut OptimizerStats,
) -> Result<Option<NodeId>> {
    match ast.kind(node).clone() {
        NodeKind::Identifier { .. } => {
            collapse_implicit_join_field(ast, node, metadata, stats)?;
            Ok(None)
        }
        NodeKind::Not { operand } => match ast.kind(operand).clone() {
            // NOT NOT x -> x
            NodeKind::Not { operand: inner } => {
                trace!("removing double negation");
                ast.set_parent(inner, None);
                Ok(Some(inner))
            }
            // NOT true -> false
            NodeKind::BoolLit { value } => {
                let lit = ast.alloc(NodeKind::BoolLit { value: !value });
                Ok(Some(lit))
            }
            // NOT (a = b) -> a <> b
            NodeKind::Binary {
                op: BinaryOp::Eq,
                left,
                right,
            } => {
                let ne = ast.alloc(NodeKind::Binary {
                    op: BinaryOp::Ne,
                    left,
                    right,
                });
                ast.adopt(ne, left);
                ast.adopt(ne, right);
                Ok(Some(ne))
            }
            _ => Ok(None),
        },
        NodeKind::Binary {
            op: op @ (BinaryOp::And | BinaryOp::Or),
            left,
            right,
        } => {
            let absorb = |ast: &Ast, lit: NodeId, other: NodeId| -> Option<NodeId> {
                match (ast.kind(lit), op) {
                    (NodeKind::BoolLit { value: true }, BinaryOp::And)
                    | (NodeKind::BoolLit { value: false }, BinaryOp::Or) => Some(other),
                    (NodeKind::BoolLit { value: false }, BinaryOp::And)
                    | (NodeKind::BoolLit { value: true }, BinaryOp::Or) => Some(lit),
                    _ => None,
                }
            };
            let replacement = absorb(ast, left, right).or_else(|| absorb(ast, right, left));
            if let Some(keep) = replacement {
                ast.set_parent(keep, None);
                return Ok(Some(keep));
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

/// Collapse `r.relation.pk` into the relation field when metadata proves
/// the chain resolves to the foreign key itself
fn collapse_implicit_join_field(
    ast: &mut Ast,
    node: NodeId,
    metadata: &dyn EntityMetadata,
    stats: &mut OptimizerStats,
) -> Result<()> {
    if !ast.is_chain_base(node) {
        return Ok(());
    }
    let segments = ast.chain_segments(node);
    if segments.len() != 2 {
        return Ok(());
    }
    let Some(range) = ast.identifier_range(node) else {
        return Ok(());
    };
    let Some(entity) = ast.range_entity(range).map(str::to_string) else {
        return Ok(());
    };

    let relation_property = &segments[0];
    if !metadata.relation_kind(&entity, relation_property).is_to_one() {
        return Ok(());
    }
    let Some(target) = metadata.relation_target(&entity, relation_property) else {
        return Ok(());
    };
    // A registered relation whose target entity is missing is a metadata
    // defect worth surfacing, not a silent skip.
    let primary_key = metadata.primary_key_columns(&target)?;
    if primary_key.len() != 1 || primary_key[0] != segments[1] {
        return Ok(());
    }

    trace!(
        chain = ast.complete_name(node),
        "collapsing implicit join field"
    );
    let tail = match ast.kind_mut(node) {
        NodeKind::Identifier { next, .. } => next.take(),
        _ => None,
    };
    if let Some(tail) = tail {
        ast.set_parent(tail, None);
    }
    stats.identifiers_canonicalized += 1;
    Ok(())
}
