//! # RelQuel Query Planner & Optimizer
//!
//! The optimizer core of the RelQuel object query language: it accepts a
//! parsed retrieve AST, applies a fixed pipeline of semantics-preserving
//! rewrites, and returns a semantically equivalent AST ready for lowering
//! to SQL. Parsing, SQL generation, entity management and execution live
//! in the surrounding application; only the AST contract and the metadata
//! port are modeled here.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! RelQuel Source Code
//!     ↓
//! [Parser]                       → retrieve AST (external)
//!     ↓
//! [Optimizer]                    ← this crate
//!     ├─ recursion into derived retrieves (depth-first)
//!     ├─ range pruning + left-join trim
//!     ├─ join-type optimizer (LEFT → INNER)
//!     ├─ self-join / EXISTS / ANY / aggregate rewrites
//!     ├─ cleanup round + value-reference canonicalization
//!     └─ anchor finalization
//!     ↓
//! [SQL Emitter]                  → SQL text (external)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use relquel::ast::builders::*;
//! use relquel::ast::Ast;
//! use relquel::metadata::{EntityDef, MetadataRegistry};
//! use relquel::QueryOptimizer;
//!
//! let mut registry = MetadataRegistry::new();
//! registry.register(
//!     EntityDef::new("User", "users")
//!         .column("id", "id", false)
//!         .column("name", "name", true)
//!         .primary_key(&["id"]),
//! );
//!
//! // retrieve (name = u.name) from u in User
//! let mut ast = Ast::new();
//! let u = db_range(&mut ast, "u", "User");
//! let name = ident(&mut ast, u, &["name"]);
//! let retrieve = RetrieveBuilder::new()
//!     .project("name", name)
//!     .range(u, None)
//!     .build(&mut ast);
//!
//! let mut optimizer = QueryOptimizer::new(&registry);
//! let optimized = optimizer.optimize(&mut ast, retrieve).unwrap();
//! assert_eq!(optimized, retrieve);
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `ast` | Arena-backed AST, builders, visitor, combinators, rendering |
//! | `metadata` | Entity metadata port + immutable registry |
//! | `analysis` | Range usage analysis and range/predicate surgery |
//! | `optimizer` | The phased rewrite pipeline and its individual rules |
//! | `validate` | Post-optimize invariant checks (test oracle) |
//! | `config` | Pass toggles and limits (figment-backed) |
//! | `error` | Error taxonomy |

// AST model and utilities
pub mod ast;

// Entity metadata port
pub mod metadata;

// Range usage analysis and surgery primitives
pub mod analysis;

// The rewrite pipeline
pub mod optimizer;

// Post-optimize invariant checks
pub mod validate;

// Configuration system
pub mod config;

// Error taxonomy
pub mod error;

// Re-export the types most hosts touch
pub use crate::ast::{
    AggregateFunc, Ast, BinaryOp, JoinKind, NodeId, NodeKind, Retrieve, SortDirection, SortEntry,
    Subquery, SubqueryKind,
};
pub use crate::config::{Config, OptimizerConfig};
pub use crate::error::OptimizeError;
pub use crate::metadata::{
    ColumnDef, EntityDef, EntityMetadata, MetadataError, MetadataRegistry, RelationDef,
    RelationKind,
};
pub use crate::optimizer::{optimize, OptimizerStats, QueryOptimizer};
