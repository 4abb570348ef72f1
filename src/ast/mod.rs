//! # RelQuel AST - Arena, Node Variants, Structural Operations
//!
//! The parser hands the optimizer a fully typed tree of tagged nodes. The
//! tree is stored in an [`Ast`] arena: a flat vector of [`Node`]s addressed
//! by [`NodeId`] indices. Children reference each other by index and every
//! node carries a parent back-link, so the "cyclic" parent pointers of the
//! object model become plain indices with no ownership cycle.
//!
//! The arena is append-only. Detaching a subtree (removing a range, swapping
//! a predicate) clears parent slots and leaves the old nodes unreachable;
//! they are reclaimed when the whole arena is dropped together with the
//! query.
//!
//! ## Ownership
//!
//! Owned child links (a retrieve owns its ranges, a range owns its join
//! predicate) are listed by [`Ast::children`] in declared order. Two links
//! are deliberately non-owning and excluded from traversal: an identifier's
//! binding to its range, and a subquery's `correlated` list. Deep cloning
//! remaps owned links always and non-owning links only when the target was
//! itself cloned - references to outer ranges survive as correlation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{OptimizeError, Result};

pub mod builders;
pub mod predicate;
pub mod print;
pub mod visitor;

// ============================================================================
// Node identity
// ============================================================================

/// Index of a node in its [`Ast`] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

// ============================================================================
// Node variants
// ============================================================================

/// Binary operators over expressions and predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    /// Get the source-level representation
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }

    /// True for the comparison operators
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

/// Aggregation functions of the query language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunc {
    Min,
    Max,
    Sum,
    Avg,
    Count,
    /// Existence test over the operand; rewritten to EXISTS or CASE WHEN
    Any,
}

impl AggregateFunc {
    /// Get the source-level function name
    pub fn as_str(self) -> &'static str {
        match self {
            AggregateFunc::Min => "min",
            AggregateFunc::Max => "max",
            AggregateFunc::Sum => "sum",
            AggregateFunc::Avg => "avg",
            AggregateFunc::Count => "count",
            AggregateFunc::Any => "any",
        }
    }
}

/// Discriminator of a lowered subquery wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubqueryKind {
    /// Correlated scalar subquery producing one value
    Scalar,
    /// EXISTS(...) predicate
    Exists,
    /// CASE WHEN EXISTS(...) THEN 1 ELSE 0 END, for ANY in a value position
    CaseWhen,
    /// Aggregate kept attached to the outer grouping as a window function
    Window,
}

/// Join kind of a database range. The optimizer core handles INNER and
/// LEFT; anything else is rejected up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

/// Sort direction of an ORDER BY entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One ORDER BY entry: the sorted expression and its direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortEntry {
    pub node: NodeId,
    pub direction: SortDirection,
}

/// Query-level container: projection, ranges, conditions, ordering
///
/// A retrieve block exclusively owns its ranges, projection items,
/// conditions, sort entries and macros.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Retrieve {
    /// Compiler directives attached by the parser (`@`-annotations)
    pub directives: BTreeMap<String, String>,
    /// Ordered projection items ([`NodeKind::ProjectionItem`])
    pub projection: Vec<NodeId>,
    /// Ordered data sources; at most one is the anchor
    pub ranges: Vec<NodeId>,
    /// WHERE predicate
    pub conditions: Option<NodeId>,
    /// ORDER BY entries
    pub sort: Vec<SortEntry>,
    /// GROUP BY expressions
    pub group_by: Vec<NodeId>,
    /// DISTINCT flag
    pub distinct: bool,
    /// Whether self-join existence tests treat NULL join columns as matching
    pub include_nulls: bool,
    /// Result window offset
    pub window: Option<u64>,
    /// Result window size (limit)
    pub window_size: Option<u64>,
    /// Named macro expressions usable from the projection
    pub macros: BTreeMap<String, NodeId>,
}

/// Tagged subquery wrapper produced by aggregate and ANY lowering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subquery {
    pub kind: SubqueryKind,
    /// Inner aggregation or expression
    pub inner: Option<NodeId>,
    /// Ranges owned by the subquery (clones of outer ranges)
    pub ranges: Vec<NodeId>,
    /// Outer ranges referenced from inside; non-owning
    pub correlated: Vec<NodeId>,
    /// Subquery WHERE predicate
    pub conditions: Option<NodeId>,
}

/// The node variant set of the query language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    // --- literals ---
    /// Numeric literal; the lexeme is kept as written, with a decimal flag
    NumberLit { text: String, decimal: bool },
    StringLit { value: String },
    BoolLit { value: bool },
    NullLit,
    /// Named placeholder bound at execution time
    Parameter { name: String },

    // --- expressions ---
    Binary {
        op: BinaryOp,
        left: NodeId,
        right: NodeId,
    },
    Not {
        operand: NodeId,
    },
    Ternary {
        condition: NodeId,
        then_branch: NodeId,
        else_branch: NodeId,
    },
    /// CASE with a condition tree and a result expression
    Case {
        conditions: NodeId,
        expression: NodeId,
    },
    IsNull {
        operand: NodeId,
        negated: bool,
    },
    In {
        target: NodeId,
        list: Vec<NodeId>,
    },
    /// Free-text search across the listed identifiers
    Search {
        term: String,
        identifiers: Vec<NodeId>,
    },
    IfNull {
        expr: NodeId,
        fallback: NodeId,
    },

    // --- identifiers ---
    /// One segment of a chained name. Segments are linked through `next`;
    /// the base segment optionally binds to a range (non-owning).
    Identifier {
        segment: String,
        next: Option<NodeId>,
        range: Option<NodeId>,
    },

    // --- ranges ---
    /// Entity-backed data source. A null `join_predicate` marks the anchor.
    DatabaseRange {
        name: String,
        entity: String,
        join_predicate: Option<NodeId>,
        join: JoinKind,
        /// Nested retrieve backing a derived table
        derived: Option<NodeId>,
    },
    /// JSON-source range; opaque to the optimizer, never the anchor and
    /// never pruned
    JsonRange {
        name: String,
        path: String,
        expr: Option<NodeId>,
    },

    // --- aggregates ---
    Aggregate {
        func: AggregateFunc,
        distinct: bool,
        operand: NodeId,
        /// Inline WHERE scoped to the aggregate; cleared once lowered
        conditions: Option<NodeId>,
    },

    // --- containers ---
    Subquery(Subquery),
    /// Aliased projection expression with a visible-in-result flag
    ProjectionItem {
        alias: String,
        expr: NodeId,
        visible: bool,
    },
    Retrieve(Retrieve),
}

/// One arena slot: the node variant plus its parent back-link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
}

// ============================================================================
// Arena
// ============================================================================

/// Append-only arena owning every node of one query tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ast {
    nodes: Vec<Node>,
}

impl Ast {
    /// Create an empty arena
    pub fn new() -> Self {
        Ast { nodes: Vec::new() }
    }

    /// Allocate a node with no parent
    pub fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        self.nodes.push(Node { kind, parent: None });
        id
    }

    /// Number of allocated slots (including detached nodes)
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena holds no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get the variant of a node
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    /// Get the variant of a node mutably
    pub fn kind_mut(&mut self, id: NodeId) -> &mut NodeKind {
        &mut self.nodes[id.index()].kind
    }

    /// Parent back-link of a node (None at the root)
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    /// Set the parent back-link
    pub fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) {
        self.nodes[id.index()].parent = parent;
    }

    /// Attach `child` under `parent` (back-link only; the caller places the
    /// child in the parent's slot)
    pub fn adopt(&mut self, parent: NodeId, child: NodeId) {
        self.set_parent(child, Some(parent));
    }

    /// Owned children of a node, in declared order.
    ///
    /// Identifier range bindings and subquery correlated lists are
    /// non-owning references and are not listed.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        match self.kind(id) {
            NodeKind::NumberLit { .. }
            | NodeKind::StringLit { .. }
            | NodeKind::BoolLit { .. }
            | NodeKind::NullLit
            | NodeKind::Parameter { .. } => {}
            NodeKind::Binary { left, right, .. } => {
                out.push(*left);
                out.push(*right);
            }
            NodeKind::Not { operand } => out.push(*operand),
            NodeKind::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                out.push(*condition);
                out.push(*then_branch);
                out.push(*else_branch);
            }
            NodeKind::Case {
                conditions,
                expression,
            } => {
                out.push(*conditions);
                out.push(*expression);
            }
            NodeKind::IsNull { operand, .. } => out.push(*operand),
            NodeKind::In { target, list } => {
                out.push(*target);
                out.extend(list.iter().copied());
            }
            NodeKind::Search { identifiers, .. } => out.extend(identifiers.iter().copied()),
            NodeKind::IfNull { expr, fallback } => {
                out.push(*expr);
                out.push(*fallback);
            }
            NodeKind::Identifier { next, .. } => out.extend(next.iter().copied()),
            NodeKind::DatabaseRange {
                join_predicate,
                derived,
                ..
            } => {
                out.extend(join_predicate.iter().copied());
                out.extend(derived.iter().copied());
            }
            NodeKind::JsonRange { expr, .. } => out.extend(expr.iter().copied()),
            NodeKind::Aggregate {
                operand, conditions, ..
            } => {
                out.push(*operand);
                out.extend(conditions.iter().copied());
            }
            NodeKind::Subquery(sub) => {
                out.extend(sub.inner.iter().copied());
                out.extend(sub.ranges.iter().copied());
                out.extend(sub.conditions.iter().copied());
            }
            NodeKind::ProjectionItem { expr, .. } => out.push(*expr),
            NodeKind::Retrieve(retrieve) => {
                out.extend(retrieve.projection.iter().copied());
                out.extend(retrieve.ranges.iter().copied());
                out.extend(retrieve.conditions.iter().copied());
                out.extend(retrieve.sort.iter().map(|s| s.node));
                out.extend(retrieve.group_by.iter().copied());
                out.extend(retrieve.macros.values().copied());
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Structural queries
    // ------------------------------------------------------------------

    /// True iff `node` lies anywhere in the subtree rooted at `ancestor`
    /// (a node counts as lying in its own subtree). Used to locate the
    /// clause - projection, conditions, sort - that contains a node.
    pub fn is_ancestor_of(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Root-to-parent sequence for a node (empty at the root)
    pub fn parent_path(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut current = self.parent(id);
        while let Some(p) = current {
            path.push(p);
            current = self.parent(p);
        }
        path.reverse();
        path
    }

    // ------------------------------------------------------------------
    // Deep clone
    // ------------------------------------------------------------------

    /// Deep-clone a subtree into fresh nodes.
    ///
    /// Owned child links are remapped onto the clones. Non-owning links
    /// (identifier range bindings, subquery correlated lists) are remapped
    /// only when the target was itself cloned; otherwise they keep pointing
    /// at the original, which is the correlation behavior callers rely on.
    /// The cloned root has no parent.
    pub fn deep_clone(&mut self, root: NodeId) -> NodeId {
        self.deep_clone_group(&[root])[0]
    }

    /// Deep-clone several subtrees sharing one remap table, so links
    /// between the subtrees (for example a join predicate on one range
    /// referencing a sibling range) land on the clones.
    pub fn deep_clone_group(&mut self, roots: &[NodeId]) -> Vec<NodeId> {
        let mut order = Vec::new();
        for &root in roots {
            self.collect_subtree(root, &mut order);
        }

        let mut map: HashMap<NodeId, NodeId> = HashMap::with_capacity(order.len());
        for &old in &order {
            let new = self.alloc(NodeKind::NullLit);
            map.insert(old, new);
        }

        for &old in &order {
            let new = map[&old];
            let kind = remap_kind(self.kind(old).clone(), &map);
            let parent = self.parent(old).and_then(|p| map.get(&p).copied());
            self.nodes[new.index()].kind = kind;
            self.nodes[new.index()].parent = parent;
        }

        roots.iter().map(|r| map[r]).collect()
    }

    fn collect_subtree(&self, root: NodeId, out: &mut Vec<NodeId>) {
        out.push(root);
        for child in self.children(root) {
            self.collect_subtree(child, out);
        }
    }

    // ------------------------------------------------------------------
    // Child replacement
    // ------------------------------------------------------------------

    /// Swap `old` for `new` in the owned child slot of `parent` and fix
    /// both parent links. Fails when `old` is not an owned child of
    /// `parent`.
    pub fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) -> Result<()> {
        let replaced = replace_in_kind(&mut self.nodes[parent.index()].kind, old, new);
        if !replaced {
            return Err(OptimizeError::InvariantViolation(format!(
                "replace_child: node {old:?} is not a child of {parent:?}"
            )));
        }
        self.set_parent(new, Some(parent));
        self.set_parent(old, None);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Typed accessors
    // ------------------------------------------------------------------

    /// View a node as a retrieve block
    pub fn as_retrieve(&self, id: NodeId) -> Option<&Retrieve> {
        match self.kind(id) {
            NodeKind::Retrieve(r) => Some(r),
            _ => None,
        }
    }

    /// View a node as a retrieve block, failing with an invariant error
    pub fn retrieve(&self, id: NodeId) -> Result<&Retrieve> {
        self.as_retrieve(id)
            .ok_or_else(|| OptimizeError::InvariantViolation(format!("{id:?} is not a retrieve")))
    }

    /// Mutable retrieve view
    pub fn retrieve_mut(&mut self, id: NodeId) -> Result<&mut Retrieve> {
        match self.kind_mut(id) {
            NodeKind::Retrieve(r) => Ok(r),
            _ => Err(OptimizeError::InvariantViolation(format!(
                "{id:?} is not a retrieve"
            ))),
        }
    }

    /// View a node as a subquery wrapper
    pub fn as_subquery(&self, id: NodeId) -> Option<&Subquery> {
        match self.kind(id) {
            NodeKind::Subquery(s) => Some(s),
            _ => None,
        }
    }

    /// True for database-backed ranges
    pub fn is_database_range(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::DatabaseRange { .. })
    }

    /// True for JSON-source ranges
    pub fn is_json_range(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::JsonRange { .. })
    }

    /// Declared name of a range (database or JSON)
    pub fn range_name(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::DatabaseRange { name, .. } | NodeKind::JsonRange { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Entity behind a database range
    pub fn range_entity(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::DatabaseRange { entity, .. } => Some(entity),
            _ => None,
        }
    }

    /// Join predicate attached to a database range
    pub fn join_predicate(&self, id: NodeId) -> Option<NodeId> {
        match self.kind(id) {
            NodeKind::DatabaseRange { join_predicate, .. } => *join_predicate,
            _ => None,
        }
    }

    /// Join kind of a database range
    pub fn join_kind(&self, id: NodeId) -> Option<JoinKind> {
        match self.kind(id) {
            NodeKind::DatabaseRange { join, .. } => Some(*join),
            _ => None,
        }
    }

    /// Whether a database range is required (INNER-joined)
    pub fn is_required(&self, id: NodeId) -> bool {
        self.join_kind(id) == Some(JoinKind::Inner)
    }

    /// Promote a database range to required (INNER) or demote it to LEFT
    pub fn set_required(&mut self, id: NodeId, required: bool) -> Result<()> {
        match self.kind_mut(id) {
            NodeKind::DatabaseRange { join, .. } => {
                *join = if required {
                    JoinKind::Inner
                } else {
                    JoinKind::Left
                };
                Ok(())
            }
            _ => Err(OptimizeError::InvariantViolation(format!(
                "{id:?} is not a database range"
            ))),
        }
    }

    /// A database range with no join predicate is the anchor of its block.
    /// JSON ranges are never anchors.
    pub fn is_anchor(&self, id: NodeId) -> bool {
        matches!(
            self.kind(id),
            NodeKind::DatabaseRange {
                join_predicate: None,
                ..
            }
        )
    }

    /// Nested retrieve backing a derived-table range
    pub fn derived_retrieve(&self, id: NodeId) -> Option<NodeId> {
        match self.kind(id) {
            NodeKind::DatabaseRange { derived, .. } => *derived,
            _ => None,
        }
    }

    /// Install or clear the join predicate of a database range, fixing
    /// parent links
    pub fn set_join_predicate(&mut self, range: NodeId, pred: Option<NodeId>) -> Result<()> {
        match self.kind_mut(range) {
            NodeKind::DatabaseRange { join_predicate, .. } => {
                *join_predicate = pred;
            }
            _ => {
                return Err(OptimizeError::InvariantViolation(format!(
                    "{range:?} is not a database range"
                )))
            }
        }
        if let Some(p) = pred {
            self.adopt(range, p);
        }
        Ok(())
    }

    /// Detach and return the join predicate of a database range
    pub fn take_join_predicate(&mut self, range: NodeId) -> Result<Option<NodeId>> {
        let pred = self.join_predicate(range);
        match self.kind_mut(range) {
            NodeKind::DatabaseRange { join_predicate, .. } => *join_predicate = None,
            _ => {
                return Err(OptimizeError::InvariantViolation(format!(
                    "{range:?} is not a database range"
                )))
            }
        }
        if let Some(p) = pred {
            self.set_parent(p, None);
        }
        Ok(pred)
    }

    /// Remove a range from a retrieve block, detaching it. Returns whether
    /// the range was present.
    pub fn remove_range(&mut self, retrieve: NodeId, range: NodeId) -> Result<bool> {
        let block = self.retrieve_mut(retrieve)?;
        let before = block.ranges.len();
        block.ranges.retain(|r| *r != range);
        let removed = block.ranges.len() < before;
        if removed {
            self.set_parent(range, None);
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Identifier chains
    // ------------------------------------------------------------------

    /// True when the identifier is the first segment of its chain
    pub fn is_chain_base(&self, id: NodeId) -> bool {
        match self.parent(id) {
            Some(parent) => !matches!(
                self.kind(parent),
                NodeKind::Identifier { next: Some(n), .. } if *n == id
            ),
            None => true,
        }
    }

    /// Walk a chained identifier up to its base segment
    pub fn chain_base(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            match self.kind(parent) {
                NodeKind::Identifier { next: Some(n), .. } if *n == current => current = parent,
                _ => break,
            }
        }
        current
    }

    /// Segments of an identifier chain starting at `base`, in order
    pub fn chain_segments(&self, base: NodeId) -> Vec<String> {
        let mut segments = Vec::new();
        let mut current = Some(base);
        while let Some(id) = current {
            match self.kind(id) {
                NodeKind::Identifier { segment, next, .. } => {
                    segments.push(segment.clone());
                    current = *next;
                }
                _ => break,
            }
        }
        segments
    }

    /// Range a chained identifier is bound to (binding lives on the base)
    pub fn identifier_range(&self, id: NodeId) -> Option<NodeId> {
        match self.kind(self.chain_base(id)) {
            NodeKind::Identifier { range, .. } => *range,
            _ => None,
        }
    }

    /// First property segment of an identifier chain
    pub fn identifier_property(&self, id: NodeId) -> Option<&str> {
        match self.kind(self.chain_base(id)) {
            NodeKind::Identifier { segment, .. } => Some(segment),
            _ => None,
        }
    }

    /// Dotted full name of a chain: the bound range's name (when bound)
    /// followed by every segment
    pub fn complete_name(&self, id: NodeId) -> String {
        let base = self.chain_base(id);
        let mut parts: Vec<String> = Vec::new();
        if let Some(range) = self.identifier_range(base) {
            if let Some(name) = self.range_name(range) {
                parts.push(name.to_string());
            }
        }
        parts.extend(self.chain_segments(base));
        parts.join(".")
    }
}

// ============================================================================
// Clone / replacement helpers
// ============================================================================

/// Remap every node reference in a cloned variant through `map`, keeping
/// references to nodes outside the cloned set untouched
fn remap_kind(kind: NodeKind, map: &HashMap<NodeId, NodeId>) -> NodeKind {
    let m = |id: NodeId| *map.get(&id).unwrap_or(&id);
    match kind {
        NodeKind::NumberLit { .. }
        | NodeKind::StringLit { .. }
        | NodeKind::BoolLit { .. }
        | NodeKind::NullLit
        | NodeKind::Parameter { .. } => kind,
        NodeKind::Binary { op, left, right } => NodeKind::Binary {
            op,
            left: m(left),
            right: m(right),
        },
        NodeKind::Not { operand } => NodeKind::Not {
            operand: m(operand),
        },
        NodeKind::Ternary {
            condition,
            then_branch,
            else_branch,
        } => NodeKind::Ternary {
            condition: m(condition),
            then_branch: m(then_branch),
            else_branch: m(else_branch),
        },
        NodeKind::Case {
            conditions,
            expression,
        } => NodeKind::Case {
            conditions: m(conditions),
            expression: m(expression),
        },
        NodeKind::IsNull { operand, negated } => NodeKind::IsNull {
            operand: m(operand),
            negated,
        },
        NodeKind::In { target, list } => NodeKind::In {
            target: m(target),
            list: list.into_iter().map(m).collect(),
        },
        NodeKind::Search { term, identifiers } => NodeKind::Search {
            term,
            identifiers: identifiers.into_iter().map(m).collect(),
        },
        NodeKind::IfNull { expr, fallback } => NodeKind::IfNull {
            expr: m(expr),
            fallback: m(fallback),
        },
        NodeKind::Identifier {
            segment,
            next,
            range,
        } => NodeKind::Identifier {
            segment,
            next: next.map(m),
            range: range.map(m),
        },
        NodeKind::DatabaseRange {
            name,
            entity,
            join_predicate,
            join,
            derived,
        } => NodeKind::DatabaseRange {
            name,
            entity,
            join_predicate: join_predicate.map(m),
            join,
            derived: derived.map(m),
        },
        NodeKind::JsonRange { name, path, expr } => NodeKind::JsonRange {
            name,
            path,
            expr: expr.map(m),
        },
        NodeKind::Aggregate {
            func,
            distinct,
            operand,
            conditions,
        } => NodeKind::Aggregate {
            func,
            distinct,
            operand: m(operand),
            conditions: conditions.map(m),
        },
        NodeKind::Subquery(sub) => NodeKind::Subquery(Subquery {
            kind: sub.kind,
            inner: sub.inner.map(m),
            ranges: sub.ranges.into_iter().map(m).collect(),
            correlated: sub.correlated.into_iter().map(m).collect(),
            conditions: sub.conditions.map(m),
        }),
        NodeKind::ProjectionItem {
            alias,
            expr,
            visible,
        } => NodeKind::ProjectionItem {
            alias,
            expr: m(expr),
            visible,
        },
        NodeKind::Retrieve(retrieve) => NodeKind::Retrieve(Retrieve {
            directives: retrieve.directives,
            projection: retrieve.projection.into_iter().map(m).collect(),
            ranges: retrieve.ranges.into_iter().map(m).collect(),
            conditions: retrieve.conditions.map(m),
            sort: retrieve
                .sort
                .into_iter()
                .map(|s| SortEntry {
                    node: m(s.node),
                    direction: s.direction,
                })
                .collect(),
            group_by: retrieve.group_by.into_iter().map(m).collect(),
            distinct: retrieve.distinct,
            include_nulls: retrieve.include_nulls,
            window: retrieve.window,
            window_size: retrieve.window_size,
            macros: retrieve
                .macros
                .into_iter()
                .map(|(k, v)| (k, m(v)))
                .collect(),
        }),
    }
}

/// Replace `old` with `new` in the owned child slots of a variant.
/// Non-owning links (identifier bindings, correlated lists) are left alone.
fn replace_in_kind(kind: &mut NodeKind, old: NodeId, new: NodeId) -> bool {
    fn swap(slot: &mut NodeId, old: NodeId, new: NodeId) -> bool {
        if *slot == old {
            *slot = new;
            true
        } else {
            false
        }
    }
    fn swap_opt(slot: &mut Option<NodeId>, old: NodeId, new: NodeId) -> bool {
        if *slot == Some(old) {
            *slot = Some(new);
            true
        } else {
            false
        }
    }
    fn swap_vec(slot: &mut [NodeId], old: NodeId, new: NodeId) -> bool {
        for item in slot.iter_mut() {
            if *item == old {
                *item = new;
                return true;
            }
        }
        false
    }

    match kind {
        NodeKind::NumberLit { .. }
        | NodeKind::StringLit { .. }
        | NodeKind::BoolLit { .. }
        | NodeKind::NullLit
        | NodeKind::Parameter { .. } => false,
        NodeKind::Binary { left, right, .. } => swap(left, old, new) || swap(right, old, new),
        NodeKind::Not { operand } => swap(operand, old, new),
        NodeKind::Ternary {
            condition,
            then_branch,
            else_branch,
        } => {
            swap(condition, old, new)
                || swap(then_branch, old, new)
                || swap(else_branch, old, new)
        }
        NodeKind::Case {
            conditions,
            expression,
        } => swap(conditions, old, new) || swap(expression, old, new),
        NodeKind::IsNull { operand, .. } => swap(operand, old, new),
        NodeKind::In { target, list } => swap(target, old, new) || swap_vec(list, old, new),
        NodeKind::Search { identifiers, .. } => swap_vec(identifiers, old, new),
        NodeKind::IfNull { expr, fallback } => swap(expr, old, new) || swap(fallback, old, new),
        NodeKind::Identifier { next, .. } => swap_opt(next, old, new),
        NodeKind::DatabaseRange {
            join_predicate,
            derived,
            ..
        } => swap_opt(join_predicate, old, new) || swap_opt(derived, old, new),
        NodeKind::JsonRange { expr, .. } => swap_opt(expr, old, new),
        NodeKind::Aggregate {
            operand, conditions, ..
        } => swap(operand, old, new) || swap_opt(conditions, old, new),
        NodeKind::Subquery(sub) => {
            swap_opt(&mut sub.inner, old, new)
                || swap_vec(&mut sub.ranges, old, new)
                || swap_opt(&mut sub.conditions, old, new)
        }
        NodeKind::ProjectionItem { expr, .. } => swap(expr, old, new),
        NodeKind::Retrieve(retrieve) => {
            if swap_vec(&mut retrieve.projection, old, new)
                || swap_vec(&mut retrieve.ranges, old, new)
                || swap_opt(&mut retrieve.conditions, old, new)
                || swap_vec(&mut retrieve.group_by, old, new)
            {
                return true;
            }
            for entry in &mut retrieve.sort {
                if entry.node == old {
                    entry.node = new;
                    return true;
                }
            }
            for value in retrieve.macros.values_mut() {
                if *value == old {
                    *value = new;
                    return true;
                }
            }
            false
        }
    }
}
