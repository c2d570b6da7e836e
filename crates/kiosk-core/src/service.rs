//! Remote collaborators consumed by the roster cache and the match client.
//!
//! The CRUD store, the face matcher and the attendance ledger are opaque
//! services. Implementations live outside this crate (HTTP in `kiosk-api`,
//! in-memory fakes in tests).

use crate::types::{
    AttendanceRecord, MarkResponse, MessageResponse, Probe, StudentDraft, StudentId,
    StudentRecord,
};
use std::future::Future;
use thiserror::Error;

/// Transport-level failure of a remote call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("network error: {0}")]
    Network(String),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed response: {0}")]
    Parse(String),
}

/// Student CRUD store.
pub trait RosterService: Send + Sync {
    fn list_students(
        &self,
    ) -> impl Future<Output = Result<Vec<StudentRecord>, ServiceError>> + Send;

    fn add_student(
        &self,
        draft: &StudentDraft,
    ) -> impl Future<Output = Result<MessageResponse, ServiceError>> + Send;

    fn update_student(
        &self,
        id: StudentId,
        draft: &StudentDraft,
    ) -> impl Future<Output = Result<MessageResponse, ServiceError>> + Send;

    fn delete_student(
        &self,
        id: StudentId,
    ) -> impl Future<Output = Result<MessageResponse, ServiceError>> + Send;

    /// Replace every stored photo of `id` with `photo` (base64 data URL).
    fn replace_photo(
        &self,
        id: StudentId,
        photo: &str,
    ) -> impl Future<Output = Result<MessageResponse, ServiceError>> + Send;
}

/// Face matcher. Marks attendance server-side for every accepted identity.
pub trait MatcherService: Send + Sync {
    fn mark_attendance(
        &self,
        probe: &Probe,
    ) -> impl Future<Output = Result<MarkResponse, ServiceError>> + Send;
}

/// Read side of the attendance ledger.
pub trait LedgerService: Send + Sync {
    fn attendance(
        &self,
    ) -> impl Future<Output = Result<Vec<AttendanceRecord>, ServiceError>> + Send;

    /// Opaque CSV export of the full ledger.
    fn export_csv(&self) -> impl Future<Output = Result<Vec<u8>, ServiceError>> + Send;
}
