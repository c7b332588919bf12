//! Persistence for students, violations and archived unknown faces.

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use common::violations::{
    NewStudent, NewUnknownFace, NewViolation, SearchField, StudentRecord, UnknownFace, Violation,
};
use thiserror::Error;

pub use memory::MemoryStore;
pub use pg::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write; carries what collided
    #[error("{0} already exists")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("database unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                let what = db_err.constraint().unwrap_or("record").to_string();
                StoreError::Duplicate(what)
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Database(other),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Violation row together with the offender's stored photo
#[derive(Debug, Clone, PartialEq)]
pub struct ViolationRow {
    pub violation: Violation,
    pub student_photo: Option<Vec<u8>>,
}

#[async_trait]
pub trait GatewayStore: Send + Sync {
    /// Every student row, photo included, in id order
    async fn load_students(&self) -> StoreResult<Vec<StudentRecord>>;

    /// Returns the new student id; a taken LRN is `Duplicate`
    async fn insert_student(&self, student: &NewStudent) -> StoreResult<i64>;

    async fn insert_violation(&self, violation: &NewViolation) -> StoreResult<i64>;

    /// Insert the unknown-face row and its violation atomically.
    ///
    /// Returns `(unknown_face_id, violation_id)`.
    async fn record_unknown_face(
        &self,
        face: &NewUnknownFace,
        violation: &NewViolation,
    ) -> StoreResult<(i64, i64)>;

    /// Newest first. Photos are looked up by LRN and never attached to
    /// unknown-person rows.
    async fn list_violations(&self) -> StoreResult<Vec<ViolationRow>>;

    /// Newest first
    async fn list_unknown_faces(&self) -> StoreResult<Vec<UnknownFace>>;

    /// Case-insensitive substring match on `field`, newest first
    async fn search_violations(
        &self,
        field: SearchField,
        query: &str,
        limit: i64,
    ) -> StoreResult<Vec<Violation>>;

    /// Distinct values of `field` starting with `prefix` (case-insensitive), ascending
    async fn suggest(&self, field: SearchField, prefix: &str, limit: i64) -> StoreResult<Vec<String>>;

    async fn health_check(&self) -> StoreResult<()>;
}

/// Escape LIKE wildcards so user input matches literally
pub(crate) fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
