//! Attendance match client.
//!
//! Submits captured frames to the matcher and reconciles accepted identities
//! into the ledger view. At most one submission is in flight at a time; a
//! second call while one is outstanding is rejected, not queued. Callers that
//! capture before submitting take a [`Reservation`] first, so the slot is
//! held across the capture too.
//!
//! State machine: `Idle -> Submitting -> {Matched, Unmatched, Failed} -> Idle`.
//! The terminal phase of the most recent submission is kept as
//! [`OutcomeKind`] for status reporting; the live state is back to
//! [`MatchState::Idle`] as soon as `submit` returns (or its future is dropped).
//!
//! Resubmitting the same frame may mark attendance twice unless the matcher
//! deduplicates by date. That is the matcher's contract, not enforced here.

use crate::service::{LedgerService, MatcherService, ServiceError};
use crate::types::{AttendanceRecord, MatchResult, Probe};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttendanceError {
    #[error("an attendance submission is already in progress, try again")]
    SubmissionInProgress,
    #[error("matcher rejected the frame: {message}")]
    Rejected { message: String },
    #[error("failed to {purpose}: {source}")]
    Transport {
        purpose: &'static str,
        source: ServiceError,
    },
}

impl AttendanceError {
    fn transport(purpose: &'static str) -> impl FnOnce(ServiceError) -> Self {
        move |source| AttendanceError::Transport { purpose, source }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    Idle,
    Submitting,
}

impl MatchState {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchState::Idle => "idle",
            MatchState::Submitting => "submitting",
        }
    }
}

/// Terminal phase of a finished submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Matched,
    Unmatched,
    Failed,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::Matched => "matched",
            OutcomeKind::Unmatched => "unmatched",
            OutcomeKind::Failed => "failed",
        }
    }
}

/// Successful exchange with the matcher.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub matched: Vec<MatchResult>,
    pub message: Option<String>,
    /// Whether the matcher ran its motion check on a burst.
    pub liveness_checked: Option<bool>,
    /// False when identities matched but the follow-up ledger reload failed;
    /// the ledger view is stale until the next successful refresh.
    pub ledger_reloaded: bool,
}

impl Submission {
    pub fn kind(&self) -> OutcomeKind {
        if self.matched.is_empty() {
            OutcomeKind::Unmatched
        } else {
            OutcomeKind::Matched
        }
    }
}

struct Inner {
    state: MatchState,
    last: Option<OutcomeKind>,
}

/// Exclusive claim on the submission slot.
///
/// The client reports `Submitting` from [`AttendanceMatchClient::reserve`]
/// until the reservation is dropped, whether or not it was ever used to
/// submit.
pub struct Reservation<'a, M, L> {
    client: &'a AttendanceMatchClient<M, L>,
}

impl<M: MatcherService, L: LedgerService> Reservation<'_, M, L> {
    /// Submit a captured frame (or burst) and release the slot.
    pub async fn submit(self, frames: Probe) -> Result<Submission, AttendanceError> {
        self.client.run(&frames).await
    }
}

impl<M, L> Drop for Reservation<'_, M, L> {
    fn drop(&mut self) {
        lock(&self.client.inner).state = MatchState::Idle;
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct AttendanceMatchClient<M, L> {
    matcher: M,
    ledger_service: L,
    inner: Mutex<Inner>,
    ledger: Mutex<Vec<AttendanceRecord>>,
}

impl<M: MatcherService, L: LedgerService> AttendanceMatchClient<M, L> {
    pub fn new(matcher: M, ledger_service: L) -> Self {
        Self {
            matcher,
            ledger_service,
            inner: Mutex::new(Inner {
                state: MatchState::Idle,
                last: None,
            }),
            ledger: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> MatchState {
        lock(&self.inner).state
    }

    pub fn last_outcome(&self) -> Option<OutcomeKind> {
        lock(&self.inner).last
    }

    /// Ledger view as of the last successful reload.
    pub fn ledger(&self) -> Vec<AttendanceRecord> {
        lock(&self.ledger).clone()
    }

    /// Claim the submission slot. Fails with `SubmissionInProgress` while
    /// another reservation is alive.
    pub fn reserve(&self) -> Result<Reservation<'_, M, L>, AttendanceError> {
        let mut inner = lock(&self.inner);
        if inner.state == MatchState::Submitting {
            tracing::debug!("submission rejected: another is in flight");
            return Err(AttendanceError::SubmissionInProgress);
        }
        inner.state = MatchState::Submitting;
        Ok(Reservation { client: self })
    }

    /// Submit a captured frame (or burst) for matching.
    pub async fn submit(&self, frames: Probe) -> Result<Submission, AttendanceError> {
        self.reserve()?.submit(frames).await
    }

    /// Reload the ledger view from the remote store.
    pub async fn refresh_ledger(&self) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        let records = self
            .ledger_service
            .attendance()
            .await
            .map_err(AttendanceError::transport("load attendance"))?;
        tracing::debug!(count = records.len(), "ledger reloaded");
        *lock(&self.ledger) = records.clone();
        Ok(records)
    }

    /// Download the opaque CSV export of the ledger.
    pub async fn export_csv(&self) -> Result<Vec<u8>, AttendanceError> {
        self.ledger_service
            .export_csv()
            .await
            .map_err(AttendanceError::transport("export attendance"))
    }

    async fn run(&self, frames: &Probe) -> Result<Submission, AttendanceError> {
        tracing::info!(frames = frames.frame_count(), "submitting frame to matcher");

        let result = self.exchange(frames).await;

        let kind = match &result {
            Ok(sub) => sub.kind(),
            Err(_) => OutcomeKind::Failed,
        };
        lock(&self.inner).last = Some(kind);

        match &result {
            Ok(sub) => tracing::info!(
                outcome = ?kind,
                matched = sub.matched.len(),
                liveness_checked = ?sub.liveness_checked,
                "submission finished"
            ),
            Err(e) => tracing::warn!(error = %e, "submission failed"),
        }
        result
    }

    async fn exchange(&self, frames: &Probe) -> Result<Submission, AttendanceError> {
        let response = self
            .matcher
            .mark_attendance(frames)
            .await
            .map_err(AttendanceError::transport("submit frame"))?;

        if !response.success {
            return Err(AttendanceError::Rejected {
                message: response
                    .message
                    .unwrap_or_else(|| "matcher reported failure".to_string()),
            });
        }

        let matched = response.matched.unwrap_or_default();
        let mut submission = Submission {
            matched,
            message: response.message,
            liveness_checked: response.liveness_checked,
            ledger_reloaded: false,
        };

        if submission.kind() == OutcomeKind::Matched {
            // Entries are server-assigned; the view only changes by reloading.
            match self.refresh_ledger().await {
                Ok(_) => submission.ledger_reloaded = true,
                Err(e) => tracing::warn!(error = %e, "matched but ledger reload failed"),
            }
        }

        Ok(submission)
    }
}
