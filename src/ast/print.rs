//! Compact textual rendering of AST subtrees.
//!
//! One-line, query-language-flavored output used by diagnostics, tracing
//! and tests. Rendering is deterministic, so two structurally equal
//! subtrees render identically; the test suites lean on that for
//! structural comparison.

use super::{Ast, BinaryOp, NodeId, NodeKind, SortDirection, SubqueryKind};

/// Render a subtree to its compact textual form
pub fn render(ast: &Ast, id: NodeId) -> String {
    match ast.kind(id) {
        NodeKind::NumberLit { text, .. } => text.clone(),
        NodeKind::StringLit { value } => format!("'{value}'"),
        NodeKind::BoolLit { value } => value.to_string(),
        NodeKind::NullLit => "NULL".to_string(),
        NodeKind::Parameter { name } => format!(":{name}"),
        NodeKind::Binary { op, left, right } => {
            let l = render_operand(ast, *left, *op);
            let r = render_operand(ast, *right, *op);
            format!("{l} {} {r}", op.as_str())
        }
        NodeKind::Not { operand } => {
            let inner = render(ast, *operand);
            if matches!(ast.kind(*operand), NodeKind::Binary { .. }) {
                format!("NOT ({inner})")
            } else {
                format!("NOT {inner}")
            }
        }
        NodeKind::Ternary {
            condition,
            then_branch,
            else_branch,
        } => format!(
            "CASE WHEN {} THEN {} ELSE {} END",
            render(ast, *condition),
            render(ast, *then_branch),
            render(ast, *else_branch)
        ),
        NodeKind::Case {
            conditions,
            expression,
        } => format!(
            "CASE WHEN {} THEN {} END",
            render(ast, *conditions),
            render(ast, *expression)
        ),
        NodeKind::IsNull { operand, negated } => {
            let suffix = if *negated { "IS NOT NULL" } else { "IS NULL" };
            format!("{} {suffix}", render(ast, *operand))
        }
        NodeKind::In { target, list } => {
            let items: Vec<String> = list.iter().map(|i| render(ast, *i)).collect();
            format!("{} IN ({})", render(ast, *target), items.join(", "))
        }
        NodeKind::Search { term, identifiers } => {
            let ids: Vec<String> = identifiers.iter().map(|i| render(ast, *i)).collect();
            format!("SEARCH('{term}' IN {})", ids.join(", "))
        }
        NodeKind::IfNull { expr, fallback } => {
            format!("IFNULL({}, {})", render(ast, *expr), render(ast, *fallback))
        }
        NodeKind::Identifier { .. } => ast.complete_name(id),
        NodeKind::DatabaseRange { .. } | NodeKind::JsonRange { .. } => render_range(ast, id),
        NodeKind::Aggregate {
            func,
            distinct,
            operand,
            conditions,
        } => {
            let mut inner = String::new();
            if *distinct {
                inner.push_str("distinct ");
            }
            inner.push_str(&render(ast, *operand));
            if let Some(cond) = conditions {
                inner.push_str(&format!(" where {}", render(ast, *cond)));
            }
            format!("{}({inner})", func.as_str())
        }
        NodeKind::Subquery(sub) => {
            let ranges: Vec<String> = sub.ranges.iter().map(|r| render_range(ast, *r)).collect();
            let from = if ranges.is_empty() {
                String::new()
            } else {
                format!(" from {}", ranges.join(", "))
            };
            let cond = sub
                .conditions
                .map(|c| format!(" where {}", render(ast, c)))
                .unwrap_or_default();
            match sub.kind {
                SubqueryKind::Exists => format!("EXISTS(select 1{from}{cond})"),
                SubqueryKind::CaseWhen => {
                    format!("CASE WHEN EXISTS(select 1{from}{cond}) THEN 1 ELSE 0 END")
                }
                SubqueryKind::Scalar => {
                    let inner = sub.inner.map(|i| render(ast, i)).unwrap_or_default();
                    format!("(select {inner}{from}{cond})")
                }
                SubqueryKind::Window => {
                    let inner = sub.inner.map(|i| render(ast, i)).unwrap_or_default();
                    format!("{inner} OVER ()")
                }
            }
        }
        NodeKind::ProjectionItem {
            alias,
            expr,
            visible,
        } => {
            let body = format!("{alias} = {}", render(ast, *expr));
            if *visible {
                body
            } else {
                format!("[{body}]")
            }
        }
        NodeKind::Retrieve(retrieve) => {
            let mut out = String::from("retrieve ");
            if retrieve.distinct {
                out.push_str("distinct ");
            }
            let items: Vec<String> = retrieve
                .projection
                .iter()
                .map(|i| render(ast, *i))
                .collect();
            out.push_str(&format!("({})", items.join(", ")));
            if !retrieve.ranges.is_empty() {
                let ranges: Vec<String> = retrieve
                    .ranges
                    .iter()
                    .map(|r| render_range(ast, *r))
                    .collect();
                out.push_str(&format!(" from {}", ranges.join(", ")));
            }
            if let Some(cond) = retrieve.conditions {
                out.push_str(&format!(" where {}", render(ast, cond)));
            }
            if !retrieve.group_by.is_empty() {
                let groups: Vec<String> =
                    retrieve.group_by.iter().map(|g| render(ast, *g)).collect();
                out.push_str(&format!(" group by {}", groups.join(", ")));
            }
            if !retrieve.sort.is_empty() {
                let sorts: Vec<String> = retrieve
                    .sort
                    .iter()
                    .map(|s| {
                        let dir = match s.direction {
                            SortDirection::Asc => "asc",
                            SortDirection::Desc => "desc",
                        };
                        format!("{} {dir}", render(ast, s.node))
                    })
                    .collect();
                out.push_str(&format!(" sort by {}", sorts.join(", ")));
            }
            if let (Some(offset), Some(size)) = (retrieve.window, retrieve.window_size) {
                out.push_str(&format!(" window {offset} {size}"));
            }
            out
        }
    }
}

fn render_range(ast: &Ast, id: NodeId) -> String {
    match ast.kind(id) {
        NodeKind::DatabaseRange {
            name,
            entity,
            join_predicate,
            join,
            derived,
        } => {
            let source = match derived {
                Some(d) => format!("({})", render(ast, *d)),
                None => entity.clone(),
            };
            match join_predicate {
                Some(pred) => {
                    let kw = match join {
                        super::JoinKind::Left => "left join",
                        _ => "join",
                    };
                    format!("{kw} {name} in {source} on {}", render(ast, *pred))
                }
                None => format!("{name} in {source}"),
            }
        }
        NodeKind::JsonRange { name, path, .. } => format!("{name} in json('{path}')"),
        _ => render(ast, id),
    }
}

fn render_operand(ast: &Ast, id: NodeId, parent_op: BinaryOp) -> String {
    let text = render(ast, id);
    match ast.kind(id) {
        // Parenthesize only where mixing AND/OR would misread
        NodeKind::Binary { op, .. }
            if matches!(parent_op, BinaryOp::And | BinaryOp::Or)
                && matches!(op, BinaryOp::And | BinaryOp::Or)
                && *op != parent_op =>
        {
            format!("({text})")
        }
        _ => text,
    }
}
