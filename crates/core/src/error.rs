//! Error taxonomy shared across the engine.

/// Result alias using the engine error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input (bad traffic split, bad rating, bad config).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A required template variable was not supplied.
    #[error("missing required variable: {name}")]
    MissingVariable {
        /// Name of the missing variable
        name: String,
    },

    /// Unknown template, version, experiment or category.
    #[error("not found: {0}")]
    NotFound(String),

    /// Illegal lifecycle transition.
    #[error("illegal {entity} transition: {from} -> {to}")]
    State {
        /// Entity kind (template, usage, experiment, run)
        entity: String,
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// Operation on an experiment that has already been completed.
    #[error("experiment already completed: {0}")]
    AlreadyCompleted(String),

    /// An evaluation budget ran out before convergence. Terminal, not a bug.
    #[error("budget exhausted: {0}")]
    Exhausted(String),

    /// The render engine rejected the template or its variables.
    #[error("render failed: {0}")]
    Render(String),

    /// I/O error from a storage backend
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other storage backend error
    #[error("storage error: {0}")]
    Storage(String),
}
