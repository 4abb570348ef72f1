//! End-to-end optimizer scenarios
//!
//! Each test drives the full pipeline through [`QueryOptimizer`] and
//! checks the literal expected output shape.

use pretty_assertions::assert_eq;

use relquel::ast::builders::*;
use relquel::ast::print::render;
use relquel::ast::{Ast, BinaryOp, NodeKind, SubqueryKind};
use relquel::metadata::{EntityDef, MetadataRegistry};
use relquel::validate::check_invariants;
use relquel::{AggregateFunc, OptimizeError, QueryOptimizer};

fn registry() -> MetadataRegistry {
    let mut registry = MetadataRegistry::new();
    registry.register(
        EntityDef::new("User", "users")
            .column("id", "id", false)
            .column("name", "name", true)
            .column("amount", "amount", false)
            .primary_key(&["id"]),
    );
    registry.register(
        EntityDef::new("Order", "orders")
            .column("id", "id", false)
            .column("userId", "user_id", false)
            .column("customerId", "customer_id", false)
            .column("total", "total", false)
            .column("status", "status", true)
            .column("note", "note", true)
            .primary_key(&["id"]),
    );
    registry.register(
        EntityDef::new("Customer", "customers")
            .column("id", "id", false)
            .column("name", "name", true)
            .primary_key(&["id"]),
    );
    registry.register(
        EntityDef::new("Audit", "audit_log")
            .column("id", "id", false)
            .column("userId", "user_id", false)
            .primary_key(&["id"]),
    );
    registry
}

/// Scenario A/B input: WHERE EXISTS(select 1 from u2 in User where
/// u.id = u2.id AND u.name = u2.name)
fn self_join_query(ast: &mut Ast, include_nulls: bool) -> relquel::NodeId {
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
    let exists = subquery(ast, SubqueryKind::Exists, Some(one), vec![u2], Some(body));

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
fn scenario_a_self_join_collapses_to_true_with_nulls_included() {
    let mut ast = Ast::new();
    let retrieve = self_join_query(&mut ast, true);

    let registry = registry();
    let mut optimizer = QueryOptimizer::new(&registry);
    optimizer.optimize(&mut ast, retrieve).unwrap();

    let cond = ast.retrieve(retrieve).unwrap().conditions.unwrap();
    assert_eq!(render(&ast, cond), "1 = 1");
    // A single expression node, not a conjunction
    assert!(matches!(
        ast.kind(cond),
        NodeKind::Binary {
            op: BinaryOp::Eq,
            ..
        }
    ));
    check_invariants(&ast, retrieve).unwrap();
}

#[test]
fn scenario_b_self_join_collapses_to_not_null_chain_with_nulls_excluded() {
    let mut ast = Ast::new();
    let retrieve = self_join_query(&mut ast, false);

    let registry = registry();
    let mut optimizer = QueryOptimizer::new(&registry);
    optimizer.optimize(&mut ast, retrieve).unwrap();

    // Every join column is checked in outer-left order, whatever its
    // declared nullability
    let cond = ast.retrieve(retrieve).unwrap().conditions.unwrap();
    assert_eq!(render(&ast, cond), "u.id IS NOT NULL AND u.name IS NOT NULL");
    check_invariants(&ast, retrieve).unwrap();
}

#[test]
fn scenario_c_left_join_collapses_to_inner() {
    let mut ast = Ast::new();
    let u = db_range(&mut ast, "u", "User");
    let o = left_range(&mut ast, "o", "Order");
    let uid = ident(&mut ast, u, &["id"]);
    let ouid = ident(&mut ast, o, &["userId"]);
    let join = eq(&mut ast, uid, ouid);
    let total = ident(&mut ast, o, &["total"]);
    let hundred = num(&mut ast, "100");
    let cond = binary(&mut ast, BinaryOp::Gt, total, hundred);
    let name = ident(&mut ast, u, &["name"]);
    let retrieve = RetrieveBuilder::new()
        .project("name", name)
        .range(u, None)
        .range(o, Some(join))
        .conditions(cond)
        .build(&mut ast);

    let registry = registry();
    let mut optimizer = QueryOptimizer::new(&registry);
    optimizer.optimize(&mut ast, retrieve).unwrap();

    // Order.total is NOT NULL, so the LEFT join is promoted; the
    // predicate itself is untouched
    assert!(ast.is_required(o));
    assert_eq!(render(&ast, ast.join_predicate(o).unwrap()), "u.id = o.userId");
    let cond = ast.retrieve(retrieve).unwrap().conditions.unwrap();
    assert_eq!(render(&ast, cond), "o.total > 100");
    assert_eq!(optimizer.stats().joins_collapsed, 1);
    check_invariants(&ast, retrieve).unwrap();
}

#[test]
fn scenario_c_counterexample_is_null_check_keeps_left_join() {
    let mut ast = Ast::new();
    let u = db_range(&mut ast, "u", "User");
    let o = left_range(&mut ast, "o", "Order");
    let uid = ident(&mut ast, u, &["id"]);
    let ouid = ident(&mut ast, o, &["userId"]);
    let join = eq(&mut ast, uid, ouid);
    let note = ident(&mut ast, o, &["note"]);
    let cond = is_null(&mut ast, note);
    let name = ident(&mut ast, u, &["name"]);
    let retrieve = RetrieveBuilder::new()
        .project("name", name)
        .range(u, None)
        .range(o, Some(join))
        .conditions(cond)
        .build(&mut ast);

    let registry = registry();
    let mut optimizer = QueryOptimizer::new(&registry);
    optimizer.optimize(&mut ast, retrieve).unwrap();

    assert!(!ast.is_required(o));
    assert_eq!(optimizer.stats().joins_collapsed, 0);
    check_invariants(&ast, retrieve).unwrap();
}

#[test]
fn scenario_d_filter_only_join_is_excised_under_aggregate_projection() {
    let mut ast = Ast::new();
    let u = db_range(&mut ast, "u", "User");
    let a = db_range(&mut ast, "a", "Audit");
    let auid = ident(&mut ast, a, &["userId"]);
    let uid = ident(&mut ast, u, &["id"]);
    let join = eq(&mut ast, auid, uid);
    ast.set_join_predicate(a, Some(join)).unwrap();

    let amount = ident(&mut ast, u, &["amount"]);
    let total = aggregate(&mut ast, AggregateFunc::Sum, amount);
    let retrieve = RetrieveBuilder::new()
        .project("total", total)
        .range(u, None)
        .range(a, None)
        .build(&mut ast);

    let registry = registry();
    let mut optimizer = QueryOptimizer::new(&registry);
    optimizer.optimize(&mut ast, retrieve).unwrap();

    // The audit range is gone and u remains the sole anchor
    let block = ast.retrieve(retrieve).unwrap();
    assert_eq!(block.ranges, vec![u]);
    assert!(ast.is_anchor(u));

    let cond = block.conditions.unwrap();
    assert_eq!(
        render(&ast, cond),
        "EXISTS(select 1 from a in Audit where a.userId = u.id)"
    );
    assert_eq!(optimizer.stats().filter_joins_excised, 1);
    check_invariants(&ast, retrieve).unwrap();
}

#[test]
fn scenario_e_conditional_aggregate_lowers_to_correlated_scalar_subquery() {
    let mut ast = Ast::new();
    let c = db_range(&mut ast, "c", "Customer");
    let o = db_range(&mut ast, "o", "Order");
    let ocid = ident(&mut ast, o, &["customerId"]);
    let cid = ident(&mut ast, c, &["id"]);
    let join = eq(&mut ast, ocid, cid);
    ast.set_join_predicate(o, Some(join)).unwrap();

    let oid = ident(&mut ast, o, &["id"]);
    let status = ident(&mut ast, o, &["status"]);
    let paid = string(&mut ast, "paid");
    let cond = eq(&mut ast, status, paid);
    let count = aggregate_with_conditions(&mut ast, AggregateFunc::Count, oid, cond);
    let cname = ident(&mut ast, c, &["name"]);
    let retrieve = RetrieveBuilder::new()
        .project("name", cname)
        .project("paid_orders", count)
        .range(c, None)
        .range(o, None)
        .build(&mut ast);

    let registry = registry();
    let mut optimizer = QueryOptimizer::new(&registry);
    optimizer.optimize(&mut ast, retrieve).unwrap();
    assert_eq!(optimizer.stats().aggregates_lowered, 1);

    let block = ast.retrieve(retrieve).unwrap();
    let item = block.projection[1];
    let expr = match ast.kind(item) {
        NodeKind::ProjectionItem { expr, .. } => *expr,
        _ => panic!("expected projection item"),
    };
    let sub = ast.as_subquery(expr).expect("expected scalar subquery");
    assert_eq!(sub.kind, SubqueryKind::Scalar);

    // Ranges are clones; the subquery WHERE is the rebound conditions
    // plus the rebound join; the outer aggregate conditions are cleared
    assert_eq!(sub.ranges.len(), 1);
    assert_ne!(sub.ranges[0], o);
    assert_eq!(
        render(&ast, sub.conditions.unwrap()),
        "o.status = 'paid' AND o.customerId = c.id"
    );
    assert_eq!(sub.correlated, vec![c]);
    match ast.kind(sub.inner.unwrap()) {
        NodeKind::Aggregate { conditions, .. } => assert!(conditions.is_none()),
        _ => panic!("expected aggregate inside the subquery"),
    }
    check_invariants(&ast, retrieve).unwrap();
}

#[test]
fn scenario_f_anchor_tiebreak_prefers_projected_range() {
    let mut ast = Ast::new();
    let r1 = db_range(&mut ast, "r1", "User");
    let r1name = ident(&mut ast, r1, &["name"]);
    let alice = string(&mut ast, "alice");
    let p1 = eq(&mut ast, r1name, alice);

    let r2 = db_range(&mut ast, "r2", "Order");
    let r2total = ident(&mut ast, r2, &["total"]);
    let five = num(&mut ast, "5");
    let p2 = eq(&mut ast, r2total, five);

    let r2note = ident(&mut ast, r2, &["note"]);
    let retrieve = RetrieveBuilder::new()
        .project("note", r2note)
        .range(r1, Some(p1))
        .range(r2, Some(p2))
        .build(&mut ast);

    let registry = registry();
    let mut optimizer = QueryOptimizer::new(&registry);
    optimizer.optimize(&mut ast, retrieve).unwrap();

    // The projected range becomes the sole anchor; its join predicate
    // moved to WHERE; the first range is dropped
    let block = ast.retrieve(retrieve).unwrap();
    assert_eq!(block.ranges, vec![r2]);
    assert!(ast.is_anchor(r2));
    assert_eq!(render(&ast, block.conditions.unwrap()), "r2.total = 5");
    assert_eq!(optimizer.stats().anchors_assigned, 1);
    check_invariants(&ast, retrieve).unwrap();
}

#[test]
fn any_degenerates_to_literal_one_over_guaranteed_join() {
    let mut ast = Ast::new();
    let u = db_range(&mut ast, "u", "User");
    let o = db_range(&mut ast, "o", "Order");
    let ouid = ident(&mut ast, o, &["userId"]);
    let uid = ident(&mut ast, u, &["id"]);
    let join = eq(&mut ast, ouid, uid);
    ast.set_join_predicate(o, Some(join)).unwrap();

    let oid = ident(&mut ast, o, &["id"]);
    let any = aggregate(&mut ast, AggregateFunc::Any, oid);
    let name = ident(&mut ast, u, &["name"]);
    let retrieve = RetrieveBuilder::new()
        .project("name", name)
        .project("has_order", any)
        .range(u, None)
        .range(o, None)
        .build(&mut ast);

    let registry = registry();
    let mut optimizer = QueryOptimizer::new(&registry);
    optimizer.optimize(&mut ast, retrieve).unwrap();

    let block = ast.retrieve(retrieve).unwrap();
    let item = block.projection[1];
    let expr = match ast.kind(item) {
        NodeKind::ProjectionItem { expr, .. } => *expr,
        _ => panic!("expected projection item"),
    };
    assert_eq!(render(&ast, expr), "1");
    assert_eq!(optimizer.stats().any_rewritten, 1);
    check_invariants(&ast, retrieve).unwrap();
}

#[test]
fn single_anchored_range_is_untouched() {
    let mut ast = Ast::new();
    let u = db_range(&mut ast, "u", "User");
    let name = ident(&mut ast, u, &["name"]);
    let retrieve = RetrieveBuilder::new()
        .project("name", name)
        .range(u, None)
        .build(&mut ast);

    let before = render(&ast, retrieve);
    let registry = registry();
    let mut optimizer = QueryOptimizer::new(&registry);
    optimizer.optimize(&mut ast, retrieve).unwrap();

    assert_eq!(render(&ast, retrieve), before);
    assert_eq!(optimizer.stats().anchors_assigned, 0);
}

#[test]
fn no_viable_anchor_is_a_structural_error() {
    let mut ast = Ast::new();
    // Two mutually-joined LEFT ranges, each pinned by an IS NULL check:
    // neither may collapse, so no anchor can be elected
    let x = left_range(&mut ast, "x", "Order");
    let y = left_range(&mut ast, "y", "Order");

    let xuid = ident(&mut ast, x, &["userId"]);
    let yid = ident(&mut ast, y, &["id"]);
    let x_pred = eq(&mut ast, xuid, yid);
    let ycid = ident(&mut ast, y, &["customerId"]);
    let xid = ident(&mut ast, x, &["id"]);
    let y_pred = eq(&mut ast, ycid, xid);

    let xnote = ident(&mut ast, x, &["note"]);
    let x_check = is_null(&mut ast, xnote);
    let ynote = ident(&mut ast, y, &["note"]);
    let y_check = is_null(&mut ast, ynote);
    let cond = and(&mut ast, x_check, y_check);

    let projected = ident(&mut ast, x, &["id"]);
    let retrieve = RetrieveBuilder::new()
        .project("id", projected)
        .range(x, Some(x_pred))
        .range(y, Some(y_pred))
        .conditions(cond)
        .build(&mut ast);

    let registry = registry();
    let mut optimizer = QueryOptimizer::new(&registry);
    assert_eq!(
        optimizer.optimize(&mut ast, retrieve),
        Err(OptimizeError::NoValidAnchor)
    );
}

#[test]
fn full_pipeline_is_idempotent_on_a_composite_query() {
    let mut ast = Ast::new();
    let c = db_range(&mut ast, "c", "Customer");
    let o = left_range(&mut ast, "o", "Order");
    let a = left_range(&mut ast, "a", "Audit");

    let ocid = ident(&mut ast, o, &["customerId"]);
    let cid = ident(&mut ast, c, &["id"]);
    let o_join = eq(&mut ast, ocid, cid);
    let auid = ident(&mut ast, a, &["userId"]);
    let oid = ident(&mut ast, o, &["id"]);
    let a_join = eq(&mut ast, auid, oid);

    let total = ident(&mut ast, o, &["total"]);
    let agg = aggregate(&mut ast, AggregateFunc::Max, total);
    let cname = ident(&mut ast, c, &["name"]);
    let hundred = num(&mut ast, "100");
    let total2 = ident(&mut ast, o, &["total"]);
    let cond = binary(&mut ast, BinaryOp::Gt, total2, hundred);
    let retrieve = RetrieveBuilder::new()
        .project("name", cname)
        .project("max_total", agg)
        .range(c, None)
        .range(o, Some(o_join))
        .range(a, Some(a_join))
        .conditions(cond)
        .build(&mut ast);

    let registry = registry();
    let mut optimizer = QueryOptimizer::new(&registry);
    optimizer.optimize(&mut ast, retrieve).unwrap();
    check_invariants(&ast, retrieve).unwrap();
    let once = render(&ast, retrieve);

    optimizer.optimize(&mut ast, retrieve).unwrap();
    assert_eq!(render(&ast, retrieve), once);
    check_invariants(&ast, retrieve).unwrap();
}
