//! # Range Usage Analyzer
//!
//! Computes, for every range declared by a retrieve block (or referenced by
//! an ANY aggregate), four facts the rewrite rules key on:
//!
//! - `used_in_expr`: referenced from the projection
//! - `used_in_cond`: referenced from the conditions
//! - `has_is_null_in_cond`: an explicit IS NULL test targets the range
//! - `non_nullable_use`: some reference goes through a column declared
//!   NOT NULL
//!
//! Identifier collection is a single pass over the projection and condition
//! trees; a second pass over the conditions finds IS NULL nodes. Fields the
//! metadata registry does not know are treated as nullable, which keeps
//! every consumer of `non_nullable_use` conservative.

pub mod surgery;

use std::collections::HashMap;
use std::ops::ControlFlow;

use crate::ast::visitor::{collect_identifiers, walk};
use crate::ast::{Ast, NodeId, NodeKind};
use crate::error::Result;
use crate::metadata::EntityMetadata;

/// Usage facts for one range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeUsage {
    /// Referenced from a projection expression
    pub used_in_expr: bool,
    /// Referenced from the conditions
    pub used_in_cond: bool,
    /// An explicit IS NULL check targets an identifier of this range
    pub has_is_null_in_cond: bool,
    /// Some reference goes through a NOT NULL column
    pub non_nullable_use: bool,
}

/// Per-range usage map produced by the analyzer
#[derive(Debug, Clone, Default)]
pub struct UsageAnalysis {
    per_range: HashMap<NodeId, RangeUsage>,
}

impl UsageAnalysis {
    /// Usage facts for a range; a range never referenced reports all-false
    pub fn usage(&self, range: NodeId) -> RangeUsage {
        self.per_range.get(&range).copied().unwrap_or_default()
    }

    fn entry(&mut self, range: NodeId) -> &mut RangeUsage {
        self.per_range.entry(range).or_default()
    }
}

/// Analyze the projection and conditions of a retrieve block
pub fn analyze_retrieve(
    ast: &Ast,
    retrieve: NodeId,
    metadata: &dyn EntityMetadata,
) -> Result<UsageAnalysis> {
    let block = ast.retrieve(retrieve)?;
    let mut analysis = UsageAnalysis::default();

    for &item in &block.projection {
        record_references(ast, item, metadata, &mut analysis, Scope::Expr);
    }
    if let Some(cond) = block.conditions {
        record_references(ast, cond, metadata, &mut analysis, Scope::Cond);
        record_is_null_checks(ast, cond, &mut analysis);
    }

    Ok(analysis)
}

/// Analyze the operand and inline conditions of an ANY aggregate
pub fn analyze_any(
    ast: &Ast,
    any_node: NodeId,
    metadata: &dyn EntityMetadata,
) -> Result<UsageAnalysis> {
    let mut analysis = UsageAnalysis::default();
    if let NodeKind::Aggregate {
        operand,
        conditions,
        ..
    } = ast.kind(any_node)
    {
        record_references(ast, *operand, metadata, &mut analysis, Scope::Expr);
        if let Some(cond) = conditions {
            record_references(ast, *cond, metadata, &mut analysis, Scope::Cond);
            record_is_null_checks(ast, *cond, &mut analysis);
        }
    }
    Ok(analysis)
}

#[derive(Clone, Copy)]
enum Scope {
    Expr,
    Cond,
}

fn record_references(
    ast: &Ast,
    root: NodeId,
    metadata: &dyn EntityMetadata,
    analysis: &mut UsageAnalysis,
    scope: Scope,
) {
    for ident in collect_identifiers(ast, root) {
        let Some(range) = ast.identifier_range(ident) else {
            continue;
        };
        let usage = analysis.entry(range);
        match scope {
            Scope::Expr => usage.used_in_expr = true,
            Scope::Cond => usage.used_in_cond = true,
        }

        let non_nullable = ast
            .range_entity(range)
            .zip(ast.identifier_property(ident))
            .is_some_and(|(entity, property)| {
                metadata.is_column_nullable(entity, property) == Ok(false)
            });
        if non_nullable {
            analysis.entry(range).non_nullable_use = true;
        }
    }
}

fn record_is_null_checks(ast: &Ast, root: NodeId, analysis: &mut UsageAnalysis) {
    let _ = walk(ast, root, &mut |id| {
        if let NodeKind::IsNull {
            operand,
            negated: false,
        } = ast.kind(id)
        {
            if let Some(range) = ast.identifier_range(*operand) {
                analysis.entry(range).has_is_null_in_cond = true;
            }
        }
        ControlFlow::Continue(())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::*;
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
                .column("total", "total", false)
                .column("note", "note", true)
                .primary_key(&["id"]),
        );
        registry
    }

    #[test]
    fn test_projection_and_condition_flags() {
        let mut ast = Ast::new();
        let u = db_range(&mut ast, "u", "User");
        let o = left_range(&mut ast, "o", "Order");
        let name = ident(&mut ast, u, &["name"]);
        let total = ident(&mut ast, o, &["total"]);
        let hundred = num(&mut ast, "100");
        let cond = binary(&mut ast, crate::ast::BinaryOp::Gt, total, hundred);
        let retrieve = RetrieveBuilder::new()
            .project("name", name)
            .range(u, None)
            .range(o, None)
            .conditions(cond)
            .build(&mut ast);

        let analysis = analyze_retrieve(&ast, retrieve, &registry()).unwrap();

        let u_usage = analysis.usage(u);
        assert!(u_usage.used_in_expr);
        assert!(!u_usage.used_in_cond);
        // u.name is nullable, so no non-nullable use
        assert!(!u_usage.non_nullable_use);

        let o_usage = analysis.usage(o);
        assert!(!o_usage.used_in_expr);
        assert!(o_usage.used_in_cond);
        // o.total is declared NOT NULL
        assert!(o_usage.non_nullable_use);
    }

    #[test]
    fn test_is_null_detection() {
        let mut ast = Ast::new();
        let o = left_range(&mut ast, "o", "Order");
        let note = ident(&mut ast, o, &["note"]);
        let check = is_null(&mut ast, note);
        let retrieve = RetrieveBuilder::new()
            .range(o, None)
            .conditions(check)
            .build(&mut ast);

        let analysis = analyze_retrieve(&ast, retrieve, &registry()).unwrap();
        assert!(analysis.usage(o).has_is_null_in_cond);
    }

    #[test]
    fn test_is_not_null_does_not_count() {
        let mut ast = Ast::new();
        let o = left_range(&mut ast, "o", "Order");
        let note = ident(&mut ast, o, &["note"]);
        let check = is_not_null(&mut ast, note);
        let retrieve = RetrieveBuilder::new()
            .range(o, None)
            .conditions(check)
            .build(&mut ast);

        let analysis = analyze_retrieve(&ast, retrieve, &registry()).unwrap();
        assert!(!analysis.usage(o).has_is_null_in_cond);
        assert!(analysis.usage(o).used_in_cond);
    }

    #[test]
    fn test_unknown_field_is_treated_nullable() {
        let mut ast = Ast::new();
        let u = db_range(&mut ast, "u", "User");
        let mystery = ident(&mut ast, u, &["mystery"]);
        let retrieve = RetrieveBuilder::new()
            .project("m", mystery)
            .range(u, None)
            .build(&mut ast);

        let analysis = analyze_retrieve(&ast, retrieve, &registry()).unwrap();
        assert!(analysis.usage(u).used_in_expr);
        assert!(!analysis.usage(u).non_nullable_use);
    }

    #[test]
    fn test_analyze_any() {
        let mut ast = Ast::new();
        let o = db_range(&mut ast, "o", "Order");
        let oid = ident(&mut ast, o, &["id"]);
        let any = aggregate(&mut ast, crate::ast::AggregateFunc::Any, oid);

        let analysis = analyze_any(&ast, any, &registry()).unwrap();
        assert!(analysis.usage(o).used_in_expr);
        assert!(analysis.usage(o).non_nullable_use);
    }
}
