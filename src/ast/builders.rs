//! Builder Patterns for AST Construction
//!
//! The parser is the production producer of retrieve trees; these helpers
//! stand in for it when hosts or tests construct trees programmatically.
//!
//! ## Example
//!
//! ```rust
//! use relquel::ast::builders::*;
//! use relquel::ast::{Ast, BinaryOp};
//!
//! // retrieve (name = u.name) from u in User where u.id = 1
//! let mut ast = Ast::new();
//! let u = db_range(&mut ast, "u", "User");
//! let name = ident(&mut ast, u, &["name"]);
//! let id = ident(&mut ast, u, &["id"]);
//! let one = num(&mut ast, "1");
//! let cond = binary(&mut ast, BinaryOp::Eq, id, one);
//! let retrieve = RetrieveBuilder::new()
//!     .project("name", name)
//!     .range(u, None)
//!     .conditions(cond)
//!     .build(&mut ast);
//! assert!(ast.as_retrieve(retrieve).is_some());
//! ```

use super::{
    AggregateFunc, Ast, BinaryOp, JoinKind, NodeId, NodeKind, Retrieve, SortDirection, SortEntry,
    Subquery, SubqueryKind,
};

// ============================================================================
// Leaf and expression helpers
// ============================================================================

/// Numeric literal; the decimal flag follows the lexeme
pub fn num(ast: &mut Ast, text: &str) -> NodeId {
    ast.alloc(NodeKind::NumberLit {
        text: text.to_string(),
        decimal: text.contains('.'),
    })
}

/// String literal
pub fn string(ast: &mut Ast, value: &str) -> NodeId {
    ast.alloc(NodeKind::StringLit {
        value: value.to_string(),
    })
}

/// Boolean literal
pub fn bool_lit(ast: &mut Ast, value: bool) -> NodeId {
    ast.alloc(NodeKind::BoolLit { value })
}

/// NULL literal
pub fn null_lit(ast: &mut Ast) -> NodeId {
    ast.alloc(NodeKind::NullLit)
}

/// Named parameter placeholder
pub fn parameter(ast: &mut Ast, name: &str) -> NodeId {
    ast.alloc(NodeKind::Parameter {
        name: name.to_string(),
    })
}

/// Binary expression with parent links set
pub fn binary(ast: &mut Ast, op: BinaryOp, left: NodeId, right: NodeId) -> NodeId {
    let node = ast.alloc(NodeKind::Binary { op, left, right });
    ast.adopt(node, left);
    ast.adopt(node, right);
    node
}

/// `left = right`
pub fn eq(ast: &mut Ast, left: NodeId, right: NodeId) -> NodeId {
    binary(ast, BinaryOp::Eq, left, right)
}

/// `left AND right`
pub fn and(ast: &mut Ast, left: NodeId, right: NodeId) -> NodeId {
    binary(ast, BinaryOp::And, left, right)
}

/// `left OR right`
pub fn or(ast: &mut Ast, left: NodeId, right: NodeId) -> NodeId {
    binary(ast, BinaryOp::Or, left, right)
}

/// Logical negation
pub fn not(ast: &mut Ast, operand: NodeId) -> NodeId {
    let node = ast.alloc(NodeKind::Not { operand });
    ast.adopt(node, operand);
    node
}

/// `operand IS NULL`
pub fn is_null(ast: &mut Ast, operand: NodeId) -> NodeId {
    let node = ast.alloc(NodeKind::IsNull {
        operand,
        negated: false,
    });
    ast.adopt(node, operand);
    node
}

/// `operand IS NOT NULL`
pub fn is_not_null(ast: &mut Ast, operand: NodeId) -> NodeId {
    let node = ast.alloc(NodeKind::IsNull {
        operand,
        negated: true,
    });
    ast.adopt(node, operand);
    node
}

/// `IFNULL(expr, fallback)`
pub fn if_null(ast: &mut Ast, expr: NodeId, fallback: NodeId) -> NodeId {
    let node = ast.alloc(NodeKind::IfNull { expr, fallback });
    ast.adopt(node, expr);
    ast.adopt(node, fallback);
    node
}

/// `target IN (list...)`
pub fn in_list(ast: &mut Ast, target: NodeId, list: Vec<NodeId>) -> NodeId {
    let node = ast.alloc(NodeKind::In {
        target,
        list: list.clone(),
    });
    ast.adopt(node, target);
    for item in list {
        ast.adopt(node, item);
    }
    node
}

// ============================================================================
// Identifiers and ranges
// ============================================================================

/// Chained identifier bound to `range`: `segments[0].segments[1]...`.
/// Returns the base segment node.
pub fn ident(ast: &mut Ast, range: NodeId, segments: &[&str]) -> NodeId {
    chained_identifier(ast, Some(range), segments)
}

/// Chained identifier without a range binding
pub fn free_ident(ast: &mut Ast, segments: &[&str]) -> NodeId {
    chained_identifier(ast, None, segments)
}

fn chained_identifier(ast: &mut Ast, range: Option<NodeId>, segments: &[&str]) -> NodeId {
    let mut next: Option<NodeId> = None;
    // Build the chain back to front so each node links to its tail
    for segment in segments.iter().rev() {
        let node = ast.alloc(NodeKind::Identifier {
            segment: (*segment).to_string(),
            next,
            range: None,
        });
        if let Some(tail) = next {
            ast.adopt(node, tail);
        }
        next = Some(node);
    }
    let base = next.unwrap_or_else(|| {
        ast.alloc(NodeKind::Identifier {
            segment: String::new(),
            next: None,
            range: None,
        })
    });
    if let NodeKind::Identifier { range: slot, .. } = ast.kind_mut(base) {
        *slot = range;
    }
    base
}

/// Database range with no join predicate (an anchor until one is attached)
pub fn db_range(ast: &mut Ast, name: &str, entity: &str) -> NodeId {
    ast.alloc(NodeKind::DatabaseRange {
        name: name.to_string(),
        entity: entity.to_string(),
        join_predicate: None,
        join: JoinKind::Inner,
        derived: None,
    })
}

/// LEFT-joined database range (predicate attached separately)
pub fn left_range(ast: &mut Ast, name: &str, entity: &str) -> NodeId {
    ast.alloc(NodeKind::DatabaseRange {
        name: name.to_string(),
        entity: entity.to_string(),
        join_predicate: None,
        join: JoinKind::Left,
        derived: None,
    })
}

/// Database range backed by a nested retrieve (derived table)
pub fn derived_range(ast: &mut Ast, name: &str, entity: &str, derived: NodeId) -> NodeId {
    let node = ast.alloc(NodeKind::DatabaseRange {
        name: name.to_string(),
        entity: entity.to_string(),
        join_predicate: None,
        join: JoinKind::Inner,
        derived: Some(derived),
    });
    ast.adopt(node, derived);
    node
}

/// JSON-source range
pub fn json_range(ast: &mut Ast, name: &str, path: &str) -> NodeId {
    ast.alloc(NodeKind::JsonRange {
        name: name.to_string(),
        path: path.to_string(),
        expr: None,
    })
}

// ============================================================================
// Aggregates and subqueries
// ============================================================================

/// Aggregate over an operand, without inline conditions
pub fn aggregate(ast: &mut Ast, func: AggregateFunc, operand: NodeId) -> NodeId {
    let node = ast.alloc(NodeKind::Aggregate {
        func,
        distinct: false,
        operand,
        conditions: None,
    });
    ast.adopt(node, operand);
    node
}

/// Aggregate with an inline WHERE scoped to it
pub fn aggregate_with_conditions(
    ast: &mut Ast,
    func: AggregateFunc,
    operand: NodeId,
    conditions: NodeId,
) -> NodeId {
    let node = ast.alloc(NodeKind::Aggregate {
        func,
        distinct: false,
        operand,
        conditions: Some(conditions),
    });
    ast.adopt(node, operand);
    ast.adopt(node, conditions);
    node
}

/// Tagged subquery wrapper
pub fn subquery(
    ast: &mut Ast,
    kind: SubqueryKind,
    inner: Option<NodeId>,
    ranges: Vec<NodeId>,
    conditions: Option<NodeId>,
) -> NodeId {
    let node = ast.alloc(NodeKind::Subquery(Subquery {
        kind,
        inner,
        ranges: ranges.clone(),
        correlated: Vec::new(),
        conditions,
    }));
    if let Some(i) = inner {
        ast.adopt(node, i);
    }
    for range in ranges {
        ast.adopt(node, range);
    }
    if let Some(c) = conditions {
        ast.adopt(node, c);
    }
    node
}

/// Aliased projection expression
pub fn projection_item(ast: &mut Ast, alias: &str, expr: NodeId, visible: bool) -> NodeId {
    let node = ast.alloc(NodeKind::ProjectionItem {
        alias: alias.to_string(),
        expr,
        visible,
    });
    ast.adopt(node, expr);
    node
}

// ============================================================================
// Retrieve builder
// ============================================================================

/// Fluent assembly of a retrieve block.
///
/// Ranges and expression nodes are created first with the free helpers;
/// the builder wires them into the block and fixes parent links on
/// [`RetrieveBuilder::build`].
#[derive(Debug, Default)]
pub struct RetrieveBuilder {
    projection: Vec<(String, NodeId, bool)>,
    prebuilt_items: Vec<NodeId>,
    ranges: Vec<(NodeId, Option<NodeId>)>,
    conditions: Option<NodeId>,
    sort: Vec<(NodeId, SortDirection)>,
    group_by: Vec<NodeId>,
    distinct: bool,
    include_nulls: bool,
    window: Option<u64>,
    window_size: Option<u64>,
}

impl RetrieveBuilder {
    /// Start an empty retrieve
    pub fn new() -> Self {
        RetrieveBuilder::default()
    }

    /// Add a visible projection expression under an alias
    pub fn project(mut self, alias: &str, expr: NodeId) -> Self {
        self.projection.push((alias.to_string(), expr, true));
        self
    }

    /// Add a hidden projection expression (not part of the visible result)
    pub fn project_hidden(mut self, alias: &str, expr: NodeId) -> Self {
        self.projection.push((alias.to_string(), expr, false));
        self
    }

    /// Add an already-built [`NodeKind::ProjectionItem`]
    pub fn project_node(mut self, item: NodeId) -> Self {
        self.prebuilt_items.push(item);
        self
    }

    /// Add a range, optionally with a join predicate
    pub fn range(mut self, range: NodeId, join_predicate: Option<NodeId>) -> Self {
        self.ranges.push((range, join_predicate));
        self
    }

    /// Set the WHERE predicate
    pub fn conditions(mut self, pred: NodeId) -> Self {
        self.conditions = Some(pred);
        self
    }

    /// Append an ORDER BY entry
    pub fn sort(mut self, node: NodeId, direction: SortDirection) -> Self {
        self.sort.push((node, direction));
        self
    }

    /// Append a GROUP BY expression
    pub fn group_by(mut self, node: NodeId) -> Self {
        self.group_by.push(node);
        self
    }

    /// Mark the result DISTINCT
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Treat NULL join columns as matching in self-join existence tests
    pub fn include_nulls(mut self) -> Self {
        self.include_nulls = true;
        self
    }

    /// Result window (offset, limit)
    pub fn window(mut self, offset: u64, size: u64) -> Self {
        self.window = Some(offset);
        self.window_size = Some(size);
        self
    }

    /// Materialize the retrieve node and fix all parent links
    pub fn build(self, ast: &mut Ast) -> NodeId {
        let mut projection = Vec::new();
        for (alias, expr, visible) in self.projection {
            projection.push(projection_item(ast, &alias, expr, visible));
        }
        projection.extend(self.prebuilt_items);

        let mut ranges = Vec::new();
        for (range, join_predicate) in self.ranges {
            if let Some(pred) = join_predicate {
                // Builder wiring happens pre-optimize; a failure here means
                // the caller passed a non-range node.
                let _ = ast.set_join_predicate(range, Some(pred));
            }
            ranges.push(range);
        }

        let sort = self
            .sort
            .iter()
            .map(|(node, direction)| SortEntry {
                node: *node,
                direction: *direction,
            })
            .collect::<Vec<_>>();

        let retrieve = ast.alloc(NodeKind::Retrieve(Retrieve {
            directives: Default::default(),
            projection: projection.clone(),
            ranges: ranges.clone(),
            conditions: self.conditions,
            sort: sort.clone(),
            group_by: self.group_by.clone(),
            distinct: self.distinct,
            include_nulls: self.include_nulls,
            window: self.window,
            window_size: self.window_size,
            macros: Default::default(),
        }));

        for item in projection {
            ast.adopt(retrieve, item);
        }
        for range in ranges {
            ast.adopt(retrieve, range);
        }
        if let Some(cond) = self.conditions {
            ast.adopt(retrieve, cond);
        }
        for entry in sort {
            ast.adopt(retrieve, entry.node);
        }
        for node in self.group_by {
            ast.adopt(retrieve, node);
        }
        retrieve
    }
}
