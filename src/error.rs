//! Error types for the migration engine.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, MigrationError>;

/// Top-level error taxonomy, matching the run/table/row/config scopes the
/// runner distinguishes between.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("source store error: {0}")]
    Source(#[from] mongodb::error::Error),

    #[error("target store error: {0}")]
    Target(#[from] tokio_postgres::Error),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("schema reconciliation blocked: {0}")]
    ReconcileBlocked(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operator interrupt")]
    Interrupted,
}

impl MigrationError {
    /// Whether this error should abort only the current table (`true`) or
    /// the entire run (`false`). Row-level failures are handled inline and
    /// never become a `MigrationError`. The run-level errors (initial
    /// connect, schema reconciliation, operator interrupt) are raised
    /// before the per-table loop starts and always propagate through an
    /// unconditional `?`, never reaching this check. Once inside the
    /// loop, a `Target`/`Io`/`Schema` error raised by the active table's
    /// strategy is table-scoped: it's logged and the run moves on to the
    /// next table.
    #[must_use]
    pub const fn is_table_scoped(&self) -> bool {
        matches!(self, Self::Schema(_) | Self::Target(_) | Self::Io(_))
    }
}
