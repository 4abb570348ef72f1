//! # Range and Predicate Surgery
//!
//! Structural primitives shared by the subquery-producing rewrites:
//! transitive join-dependency closure, live/correlation partitioning of a
//! range set, and the inner/correlation split of a join predicate being
//! moved into a lowered subquery.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::ast::predicate::{combine_and, flatten_and};
use crate::ast::visitor::referenced_ranges;
use crate::ast::{Ast, BinaryOp, NodeId, NodeKind};
use crate::error::Result;

/// Expand a seed range set with every range referenced (by any identifier)
/// in the join predicate of an already-accumulated range. Cycle-safe; the
/// result preserves the declaration order of `all`.
pub fn expand_with_join_dependencies(ast: &Ast, seed: &[NodeId], all: &[NodeId]) -> Vec<NodeId> {
    let mut accumulated: HashSet<NodeId> = seed.iter().copied().collect();
    let mut processed: HashSet<NodeId> = HashSet::new();

    let mut work: Vec<NodeId> = seed.to_vec();
    while let Some(range) = work.pop() {
        if !processed.insert(range) {
            continue;
        }
        if let Some(pred) = ast.join_predicate(range) {
            for referenced in referenced_ranges(ast, pred) {
                if all.contains(&referenced) && accumulated.insert(referenced) {
                    work.push(referenced);
                }
            }
        }
    }

    all.iter()
        .copied()
        .filter(|r| accumulated.contains(r))
        .collect()
}

/// Minimal range set an aggregate needs when lowered to a correlated
/// subquery: the seed ranges it touches plus their join-dependency closure
/// within the outer block. Preserves referential integrity of the cloned
/// join predicates.
pub fn minimal_range_set(ast: &Ast, outer: &[NodeId], seeds: &[NodeId]) -> Vec<NodeId> {
    expand_with_join_dependencies(ast, seeds, outer)
}

/// Remove from a retrieve every database range whose identity is not in
/// `keep`. JSON ranges are opaque and never removed. Returns the removed
/// ranges.
pub fn remove_ranges_not_in(ast: &mut Ast, retrieve: NodeId, keep: &[NodeId]) -> Result<Vec<NodeId>> {
    let ranges = ast.retrieve(retrieve)?.ranges.clone();
    let mut removed = Vec::new();
    for range in ranges {
        if ast.is_json_range(range) || keep.contains(&range) {
            continue;
        }
        ast.remove_range(retrieve, range)?;
        removed.push(range);
    }
    Ok(removed)
}

/// `map[k]` holds every range `r != k` mentioned in `k`'s join predicate
pub fn join_reference_map(ast: &Ast, ranges: &[NodeId]) -> BTreeMap<NodeId, BTreeSet<NodeId>> {
    let mut map = BTreeMap::new();
    for &range in ranges {
        let mut refs = BTreeSet::new();
        if let Some(pred) = ast.join_predicate(range) {
            for referenced in referenced_ranges(ast, pred) {
                if referenced != range {
                    refs.insert(referenced);
                }
            }
        }
        map.insert(range, refs);
    }
    map
}

/// Partition a closure into live ranges (directly used by the projection
/// or predicate seeding the closure) and correlation-only ranges (present
/// only through join predicates). Correlation-only ranges are not kept as
/// joined inputs in a lowered subquery; their identifiers stay bound to
/// the outer originals.
pub fn partition_live_ranges(
    ast: &Ast,
    closure: &[NodeId],
    used: &[NodeId],
) -> (Vec<NodeId>, Vec<NodeId>) {
    let references = join_reference_map(ast, closure);
    let mut live = Vec::new();
    let mut correlation_only = Vec::new();
    for &range in closure {
        if used.contains(&range) {
            live.push(range);
        } else if references.values().any(|refs| refs.contains(&range)) {
            correlation_only.push(range);
        } else {
            // Unreachable from the seeds except through the closure itself;
            // treat as live so nothing dangles
            live.push(range);
        }
    }
    (live, correlation_only)
}

/// Result of splitting a join predicate for subquery lowering
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitJoinPredicate {
    /// Conjuncts that reference only inner (cloned) ranges, plus MIXED
    /// leaves
    pub inner: Option<NodeId>,
    /// Conjuncts that reference only correlation (outer) ranges
    pub correlation: Option<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeafClass {
    Inner,
    Correlation,
    Mixed,
}

/// Split a join predicate into the part that belongs inside a lowered
/// subquery and the part that only correlates with the outer block.
///
/// Conjuncts split AND-wise. A disjunction is routed whole: all-inner
/// disjuncts keep it inner, all-correlation disjuncts make it correlation,
/// anything mixed goes to the inner part. A MIXED leaf also goes to the
/// inner part - the correlation identifiers it carries remain bound to
/// outer ranges, which stay visible from the subquery scope.
pub fn split_join_predicate(
    ast: &mut Ast,
    pred: NodeId,
    inner_ranges: &HashSet<NodeId>,
) -> SplitJoinPredicate {
    let conjuncts = flatten_and(ast, pred);
    let mut inner_parts: Vec<Option<NodeId>> = Vec::new();
    let mut correlation_parts: Vec<Option<NodeId>> = Vec::new();

    for conjunct in conjuncts {
        match classify(ast, conjunct, inner_ranges) {
            LeafClass::Correlation => correlation_parts.push(Some(conjunct)),
            LeafClass::Inner | LeafClass::Mixed => inner_parts.push(Some(conjunct)),
        }
    }

    SplitJoinPredicate {
        inner: combine_and(ast, inner_parts),
        correlation: combine_and(ast, correlation_parts),
    }
}

fn classify(ast: &Ast, node: NodeId, inner_ranges: &HashSet<NodeId>) -> LeafClass {
    // A disjunction is classified as a whole; recursing into disjuncts and
    // recombining cannot change the routing decision.
    if let NodeKind::Binary {
        op: BinaryOp::Or, ..
    } = ast.kind(node)
    {
        let mut classes = ast
            .children(node)
            .into_iter()
            .map(|child| classify(ast, child, inner_ranges));
        let first = classes.next();
        return match first {
            Some(class) if classes.all(|c| c == class) => class,
            Some(_) => LeafClass::Mixed,
            None => LeafClass::Inner,
        };
    }

    let refs = referenced_ranges(ast, node);
    let has_inner = refs.iter().any(|r| inner_ranges.contains(r));
    let has_outer = refs.iter().any(|r| !inner_ranges.contains(r));
    match (has_inner, has_outer) {
        (_, false) => LeafClass::Inner,
        (false, true) => LeafClass::Correlation,
        (true, true) => LeafClass::Mixed,
    }
}
