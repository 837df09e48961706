use thiserror::Error;

/// Error taxonomy of the storage engine.
///
/// Configuration problems (missing strategies, malformed bindings) are
/// deployment bugs and surface immediately. Missing rows are not errors:
/// lookups return `Ok(None)` / empty collections, and best-effort operations
/// such as delete return `Ok(false)` when referential integrity blocks them.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No persistence strategy is configured for the given type name.
    /// Fatal during save; during bulk reads unconfigured rows are skipped.
    #[error("no {kind} strategy configured for type '{type_name}'")]
    MissingStrategy {
        kind: &'static str,
        type_name: String,
    },

    /// A save was attempted with an identity kind the engine does not
    /// persist (product types require identifier + revision).
    #[error("unsupported identity kind: {0}")]
    UnsupportedIdentity(String),

    /// Explicit "product not found" signal for callers that contractually
    /// expect one (most lookups return `Ok(None)` instead).
    #[error("product {0} not found")]
    ProductNotFound(i64),

    /// A predicate shape the strategy cannot lower to generic columns.
    #[error("predicate not supported: {0}")]
    UnsupportedPredicate(String),

    /// Malformed or contradictory strategy configuration.
    #[error("invalid storage configuration: {0}")]
    Config(String),

    /// A workplan step references a type name unknown to the step registry.
    #[error("unknown workplan step type '{0}'")]
    UnknownStepType(String),

    /// Step parameter payloads are stored as JSON.
    #[error("step parameter serialization failed: {0}")]
    Parameters(#[from] serde_json::Error),

    /// Backend fault (connection, constraint violation, ...). Unique
    /// constraint races on (identifier, revision) propagate through here.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;
