//! Postgres implementations of the store traits.
//!
//! Each repository mirrors its crate's store trait over sqlx. State
//! changes and the audit rows that describe them commit in one
//! transaction.

pub mod attention;
pub mod commitments;
pub mod scheduler;

pub use attention::PgAttentionStore;
pub use commitments::PgCommitmentStore;
pub use scheduler::PgSchedulerStore;

/// Maps a sqlx error into a backend reason string.
pub(crate) fn backend_reason(err: sqlx::Error) -> String {
    err.to_string()
}

/// Returns whether a sqlx error is a unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}
