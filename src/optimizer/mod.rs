//! # Query Optimizer Orchestrator
//!
//! Runs the fixed, phased rewrite pipeline over a retrieve tree:
//!
//! ```text
//! parse(source) -> [Optimizer] -> SQL lowering
//!
//! per block (derived retrieves first, depth-first):
//!   1. range pruning              (obviously unreferenced ranges)
//!   2. left-join trim             (conservative)
//!   3. join-type optimizer        (LEFT -> INNER collapse)
//!   4. subquery/aggregate rewrites
//!        self-join simplification
//!        EXISTS rewriter (filter-only joins)
//!        ANY rewriter
//!        aggregate lowering
//!   5. final cleanup
//!        join-type optimizer again (new INNERs may have appeared)
//!        left-join trim (wide)
//!        value-reference canonicalization
//!   6. anchor finalization
//! ```
//!
//! The order is fixed: the EXISTS rewriter presumes unused ranges are
//! gone, aggregate lowering presumes joins have their final types, and
//! the second cleanup round picks up what the subquery rewrites
//! unlocked. Each pass mutates the AST in place and returns early on the
//! first error; after a failure the tree is unspecified and must be
//! discarded.

pub mod aggregate;
pub mod anchor;
pub mod any_rewrite;
pub mod exists_rewrite;
pub mod join_type;
pub mod range_pruning;
pub mod self_join;
pub mod value_ref;

use tracing::debug;

use crate::ast::{Ast, JoinKind, NodeId};
use crate::config::OptimizerConfig;
use crate::error::{OptimizeError, Result};
use crate::metadata::EntityMetadata;

use self::range_pruning::TrimMode;

/// Counters of fired rewrites, reset per [`QueryOptimizer::optimize`] run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizerStats {
    /// Ranges removed by pruning or anchor optimization
    pub ranges_pruned: usize,
    /// Join predicates folded into WHERE
    pub predicates_folded: usize,
    /// Self-join EXISTS tests collapsed
    pub self_joins_simplified: usize,
    /// LEFT joins promoted to INNER
    pub joins_collapsed: usize,
    /// Filter-only joins excised into EXISTS
    pub filter_joins_excised: usize,
    /// Aggregates kept as window functions
    pub aggregates_windowed: usize,
    /// Aggregates lowered to correlated scalar subqueries
    pub aggregates_lowered: usize,
    /// ANY aggregates rewritten
    pub any_rewritten: usize,
    /// Identifier chains collapsed by the value-reference pass
    pub identifiers_canonicalized: usize,
    /// Anchors elected by the anchor manager
    pub anchors_assigned: usize,
}

/// The query planner and optimizer.
///
/// Single-threaded and purely in-memory: one invocation mutates the given
/// tree in place and performs no I/O; metadata lookups are synchronous
/// reads from the immutable registry. Optimizing two disjoint trees
/// concurrently is safe; sharing a tree between concurrent optimizations
/// is not.
pub struct QueryOptimizer<'a> {
    metadata: &'a dyn EntityMetadata,
    config: OptimizerConfig,
    stats: OptimizerStats,
}

impl<'a> QueryOptimizer<'a> {
    /// Optimizer with the default configuration (every pass enabled)
    pub fn new(metadata: &'a dyn EntityMetadata) -> Self {
        QueryOptimizer {
            metadata,
            config: OptimizerConfig::default(),
            stats: OptimizerStats::default(),
        }
    }

    /// Optimizer with explicit pass toggles
    pub fn with_config(metadata: &'a dyn EntityMetadata, config: OptimizerConfig) -> Self {
        QueryOptimizer {
            metadata,
            config,
            stats: OptimizerStats::default(),
        }
    }

    /// Counters from the last [`QueryOptimizer::optimize`] run
    pub fn stats(&self) -> &OptimizerStats {
        &self.stats
    }

    /// Apply the full pipeline to a retrieve tree, mutating it in place,
    /// and return the (same) root. On failure the tree is left in an
    /// unspecified state and must be discarded.
    pub fn optimize(&mut self, ast: &mut Ast, retrieve: NodeId) -> Result<NodeId> {
        self.stats = OptimizerStats::default();
        self.optimize_block(ast, retrieve, 0)?;
        Ok(retrieve)
    }

    fn optimize_block(&mut self, ast: &mut Ast, retrieve: NodeId, depth: usize) -> Result<()> {
        if depth > self.config.max_depth {
            return Err(OptimizeError::InvariantViolation(format!(
                "derived retrieve nesting exceeds max_depth {}",
                self.config.max_depth
            )));
        }

        self.validate_input(ast, retrieve)?;

        // Depth-first: inner blocks reach their final shape before the
        // outer rules look at them
        let ranges = ast.retrieve(retrieve)?.ranges.clone();
        for range in ranges {
            if let Some(derived) = ast.derived_retrieve(range) {
                self.optimize_block(ast, derived, depth + 1)?;
            }
        }

        let block = ast.retrieve(retrieve)?;
        debug!(
            depth,
            ranges = block.ranges.len(),
            projection = block.projection.len(),
            "optimizing retrieve block"
        );
        if block.ranges.is_empty() {
            return Ok(());
        }

        if self.config.enable_range_pruning {
            debug!("phase 1: range pruning");
            range_pruning::prune_ranges(ast, retrieve, TrimMode::Obvious, &mut self.stats)?;
            debug!("phase 2: left-join trim (conservative)");
            range_pruning::prune_ranges(ast, retrieve, TrimMode::Conservative, &mut self.stats)?;
        }

        if self.config.enable_join_collapse {
            debug!("phase 3: join-type optimizer");
            join_type::collapse_left_joins(ast, retrieve, self.metadata, &mut self.stats)?;
        }

        debug!("phase 4: subquery/aggregate rewrites");
        if self.config.enable_self_join_simplification {
            self_join::simplify_self_joins(ast, retrieve, &mut self.stats)?;
        }
        if self.config.enable_exists_rewrite {
            exists_rewrite::excise_filter_only_joins(ast, retrieve, &mut self.stats)?;
        }
        if self.config.enable_any_rewrite {
            any_rewrite::rewrite_any(ast, retrieve, self.metadata, &mut self.stats)?;
        }
        if self.config.enable_aggregate_lowering {
            aggregate::lower_aggregates(ast, retrieve, &mut self.stats)?;
        }

        debug!("phase 5: final cleanup");
        if self.config.enable_join_collapse {
            join_type::collapse_left_joins(ast, retrieve, self.metadata, &mut self.stats)?;
        }
        if self.config.enable_range_pruning {
            range_pruning::prune_ranges(ast, retrieve, TrimMode::Wide, &mut self.stats)?;
        }
        if self.config.enable_value_canonicalization {
            value_ref::canonicalize_value_references(ast, retrieve, self.metadata, &mut self.stats)?;
        }

        debug!("anchor finalization");
        anchor::finalize_anchor(ast, retrieve, self.metadata, &mut self.stats)
    }

    /// Reject inputs the core does not support before touching them
    fn validate_input(&self, ast: &Ast, retrieve: NodeId) -> Result<()> {
        for &range in &ast.retrieve(retrieve)?.ranges {
            if !ast.is_database_range(range) {
                continue;
            }
            match ast.join_kind(range) {
                Some(JoinKind::Inner | JoinKind::Left) | None => {}
                Some(kind) => {
                    return Err(OptimizeError::UnsupportedJoinKind {
                        range: ast.range_name(range).unwrap_or_default().to_string(),
                        kind,
                    })
                }
            }
            // Derived ranges carry a synthetic entity name; only
            // table-backed ranges hit the registry
            if ast.derived_retrieve(range).is_none() {
                if let Some(entity) = ast.range_entity(range) {
                    if !self.metadata.entity_exists(entity) {
                        return Err(OptimizeError::UnknownEntity(entity.to_string()));
                    }
                }
            }
        }
        Ok(())
    }
}

/// One-shot convenience over [`QueryOptimizer`]
pub fn optimize(
    ast: &mut Ast,
    retrieve: NodeId,
    metadata: &dyn EntityMetadata,
) -> Result<NodeId> {
    QueryOptimizer::new(metadata).optimize(ast, retrieve)
}
