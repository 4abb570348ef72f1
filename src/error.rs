//! Optimizer error taxonomy.
//!
//! Every rewrite rule reports failure through [`OptimizeError`]; the
//! orchestrator surfaces the first error to the caller and stops. No partial
//! recovery is attempted - after an error the AST is in an unspecified state
//! and must be discarded.

use crate::ast::JoinKind;
use crate::metadata::MetadataError;

/// Errors produced by the query optimizer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptimizeError {
    /// The anchor manager found no viable candidate range. The query is
    /// structurally invalid and cannot be lowered to SQL.
    #[error("no viable anchor range in retrieve block")]
    NoValidAnchor,

    /// A pre/post condition of a rewrite rule failed. Always a bug (in the
    /// optimizer or in the caller-supplied AST), never user input.
    #[error("optimizer invariant violated: {0}")]
    InvariantViolation(String),

    /// A metadata lookup referenced an entity the registry does not know.
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    /// A metadata lookup referenced a property the entity does not declare.
    #[error("unknown property '{property}' on entity '{entity}'")]
    UnknownProperty { entity: String, property: String },

    /// The AST contains a join kind the optimizer does not handle. Only
    /// INNER and LEFT joins are legal in this core.
    #[error("unsupported join kind {kind:?} on range '{range}'")]
    UnsupportedJoinKind { range: String, kind: JoinKind },
}

impl From<MetadataError> for OptimizeError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::UnknownEntity(entity) => OptimizeError::UnknownEntity(entity),
            MetadataError::UnknownProperty { entity, property } => {
                OptimizeError::UnknownProperty { entity, property }
            }
        }
    }
}

/// Convenience alias used throughout the optimizer
pub type Result<T> = std::result::Result<T, OptimizeError>;
