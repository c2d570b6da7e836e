//! kiosk-core: State discipline for the attendance kiosk.
//!
//! Holds the roster mirror with its single selection and edit form, the
//! stateless search filter, and the attendance match client. Remote
//! collaborators are consumed through the traits in [`service`]; nothing
//! here knows about cameras, HTTP or D-Bus.

pub mod attendance;
pub mod filter;
pub mod form;
pub mod roster;
pub mod service;
pub mod types;

pub use attendance::{
    AttendanceError, AttendanceMatchClient, MatchState, OutcomeKind, Reservation, Submission,
};
pub use form::{FormBinding, FormError};
pub use roster::{Mutation, RosterCache, RosterError};
pub use service::{LedgerService, MatcherService, RosterService, ServiceError};
pub use types::{
    AttendanceRecord, MarkResponse, MatchResult, MessageResponse, Probe, StudentDraft,
    StudentField, StudentId, StudentRecord,
};
