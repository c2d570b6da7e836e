//! Command handlers, one per user action.
//!
//! Owns the roster cache (with its form and selection), the attendance match
//! client and the camera thread handle. Adapters (D-Bus) call these and only
//! translate arguments and errors.

use crate::engine::{CameraStatus, EngineError, EngineHandle};
use kiosk_core::types::UnknownField;
use kiosk_core::{
    AttendanceError, AttendanceMatchClient, AttendanceRecord, FormError, LedgerService,
    MatchResult, MatchState, MatcherService, Mutation, OutcomeKind, Probe, RosterCache,
    RosterError, RosterService, StudentDraft, StudentField, StudentId, StudentRecord, Submission,
};
use kiosk_hw::{CameraError, CameraHandle, CaptureFlow};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum KioskError {
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error(transparent)]
    Attendance(#[from] AttendanceError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Form(#[from] FormError),
    #[error(transparent)]
    UnknownField(#[from] UnknownField),
    #[error("{0}")]
    InvalidFlow(String),
    #[error("export path must be absolute: {0}")]
    RelativePath(PathBuf),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl KioskError {
    /// True when the caller sent something unusable, as opposed to a
    /// failure of the camera or a remote service.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            KioskError::Roster(
                RosterError::Validation { .. }
                    | RosterError::NoSelection
                    | RosterError::SelectionMismatch { .. }
            ) | KioskError::Form(_)
                | KioskError::UnknownField(_)
                | KioskError::InvalidFlow(_)
                | KioskError::RelativePath(_)
        )
    }
}

/// Current edit form as shown to the UI.
#[derive(Debug, Serialize)]
pub struct FormSnapshot {
    /// `null` while creating a new record.
    pub selected: Option<StudentId>,
    pub fields: StudentDraft,
    pub has_photo: bool,
}

/// One matched identity with its normalised score.
#[derive(Debug, Serialize)]
pub struct MatchView {
    #[serde(flatten)]
    pub result: MatchResult,
    /// Confidence in [0, 1], `null` when the matcher reported neither
    /// confidence nor distance.
    pub score: Option<f32>,
}

impl From<MatchResult> for MatchView {
    fn from(result: MatchResult) -> Self {
        Self {
            score: result.score(),
            result,
        }
    }
}

/// Outcome of an attendance attempt as shown to the UI.
#[derive(Debug, Serialize)]
pub struct MarkOutcome {
    pub outcome: &'static str,
    pub frames: usize,
    pub matched: Vec<MatchView>,
    pub message: Option<String>,
    pub liveness_checked: Option<bool>,
    pub ledger_reloaded: bool,
}

impl MarkOutcome {
    fn new(frames: usize, submission: Submission) -> Self {
        Self {
            outcome: submission.kind().as_str(),
            frames,
            matched: submission.matched.into_iter().map(MatchView::from).collect(),
            message: submission.message,
            liveness_checked: submission.liveness_checked,
            ledger_reloaded: submission.ledger_reloaded,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StillInfo {
    pub width: u32,
    pub height: u32,
    pub bytes: usize,
}

#[derive(Debug)]
pub struct KioskStatus {
    pub camera: CameraStatus,
    pub match_state: MatchState,
    pub last_outcome: Option<OutcomeKind>,
    pub roster_size: usize,
    pub selected: Option<StudentId>,
}

pub struct Kiosk<B> {
    roster: Mutex<RosterCache<B>>,
    attendance: AttendanceMatchClient<B, B>,
    engine: EngineHandle,
    liveness_frames: usize,
}

impl<B> Kiosk<B>
where
    B: RosterService + MatcherService + LedgerService + Clone,
{
    pub fn new(backend: B, engine: EngineHandle, liveness_frames: usize) -> Self {
        Self {
            roster: Mutex::new(RosterCache::new(backend.clone())),
            attendance: AttendanceMatchClient::new(backend.clone(), backend),
            engine,
            liveness_frames,
        }
    }

    pub async fn list_students(&self) -> Result<Vec<StudentRecord>, KioskError> {
        let mut roster = self.roster.lock().await;
        Ok(roster.list().await?.to_vec())
    }

    pub async fn search(&self, field: &str, term: &str) -> Vec<StudentRecord> {
        self.roster.lock().await.search(field, term)
    }

    pub async fn select_student(&self, id: StudentId) -> bool {
        self.roster.lock().await.select(id)
    }

    pub async fn set_field(&self, field: &str, value: &str) -> Result<(), KioskError> {
        let field: StudentField = field.parse()?;
        self.roster.lock().await.form_mut().set(field, value)?;
        Ok(())
    }

    pub async fn form(&self) -> FormSnapshot {
        let roster = self.roster.lock().await;
        let form = roster.form();
        let mut fields = form.to_draft();
        fields.photo = None;
        FormSnapshot {
            selected: roster.selected(),
            fields,
            has_photo: form.has_photo(),
        }
    }

    pub async fn reset_form(&self) {
        self.roster.lock().await.reset_form();
    }

    /// Drop the selection; the form returns to new-record mode.
    pub async fn clear_selection(&self) {
        self.roster.lock().await.clear_selection();
    }

    /// Create a student from the form. The form resets once the store has
    /// accepted the record, even if the roster could not be reloaded.
    pub async fn add_student(&self) -> Result<Mutation, KioskError> {
        let mut roster = self.roster.lock().await;
        let draft = roster.form().to_draft();
        let mutation = roster.add(draft).await?;
        roster.reset_form();
        Ok(mutation)
    }

    pub async fn update_student(&self, id: StudentId) -> Result<Mutation, KioskError> {
        let mut roster = self.roster.lock().await;
        let draft = roster.form().to_draft();
        let mutation = roster.update(id, draft).await?;
        roster.reset_form();
        Ok(mutation)
    }

    pub async fn delete_student(&self, id: StudentId) -> Result<Mutation, KioskError> {
        Ok(self.roster.lock().await.delete(id).await?)
    }

    pub async fn open_camera(&self, flow: &str) -> Result<CameraHandle, KioskError> {
        let flow: CaptureFlow = flow.parse().map_err(KioskError::InvalidFlow)?;
        Ok(self.engine.open(flow).await?)
    }

    /// Capture the enrollment photo into the form's photo buffer.
    pub async fn capture_photo(&self, handle: CameraHandle) -> Result<StillInfo, KioskError> {
        let still = self.engine.capture(handle).await?;
        let info = StillInfo {
            width: still.width,
            height: still.height,
            bytes: still.png.len(),
        };
        self.roster.lock().await.form_mut().set_photo(still.to_data_url());
        tracing::info!(width = info.width, height = info.height, "enrollment photo captured");
        Ok(info)
    }

    pub async fn close_camera(&self, handle: CameraHandle) -> Result<(), KioskError> {
        Ok(self.engine.close(handle).await?)
    }

    /// Acquire the camera for attendance, capture, release, then submit.
    ///
    /// The submission slot is reserved before the camera is opened, so a
    /// second attempt is turned away without touching the camera.
    pub async fn mark_attendance(&self) -> Result<MarkOutcome, KioskError> {
        let reservation = self.attendance.reserve()?;

        let handle = self.engine.open(CaptureFlow::Attendance).await?;
        let capture = if self.liveness_frames >= 2 {
            let mut stills = self.engine.burst(handle, self.liveness_frames).await?;
            if stills.len() >= 2 {
                Probe::Burst {
                    frames: stills.iter().map(|s| s.to_data_url()).collect(),
                }
            } else if let Some(still) = stills.pop() {
                tracing::warn!(
                    requested = self.liveness_frames,
                    "short burst; submitting single still without liveness"
                );
                Probe::Single {
                    image: still.to_data_url(),
                }
            } else {
                let err = CameraError::CaptureFailed("burst returned no frames".into());
                return Err(EngineError::Camera(err).into());
            }
        } else {
            Probe::Single {
                image: self.engine.capture(handle).await?.to_data_url(),
            }
        };

        let frames = capture.frame_count();
        let submission = reservation.submit(capture).await?;
        Ok(MarkOutcome::new(frames, submission))
    }

    pub async fn attendance(&self) -> Result<Vec<AttendanceRecord>, KioskError> {
        Ok(self.attendance.refresh_ledger().await?)
    }

    /// Download the CSV export to `path`. Returns the number of bytes written.
    ///
    /// `path` must be absolute: the daemon's working directory means nothing
    /// to the caller.
    pub async fn export_csv(&self, path: &Path) -> Result<usize, KioskError> {
        if !path.is_absolute() {
            return Err(KioskError::RelativePath(path.to_path_buf()));
        }
        let bytes = self.attendance.export_csv().await?;
        tokio::fs::write(path, &bytes)
            .await
            .map_err(|source| KioskError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "attendance exported");
        Ok(bytes.len())
    }

    pub async fn status(&self) -> Result<KioskStatus, KioskError> {
        let camera = self.engine.status().await?;
        let roster = self.roster.lock().await;
        Ok(KioskStatus {
            camera,
            match_state: self.attendance.state(),
            last_outcome: self.attendance.last_outcome(),
            roster_size: roster.students().len(),
            selected: roster.selected(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use crate::engine::tests::FakeOpener;
    use kiosk_core::{MarkResponse, MessageResponse, ServiceError};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Default)]
    struct Store {
        students: Vec<StudentRecord>,
        photos: Vec<(StudentId, String)>,
        submitted: Vec<usize>,
        ledger: Vec<AttendanceRecord>,
        next_id: StudentId,
    }

    /// One fake standing in for the CRUD store, the matcher and the ledger.
    #[derive(Clone, Default)]
    struct FakeBackend {
        store: Arc<StdMutex<Store>>,
        adds: Arc<AtomicUsize>,
        fail_list: Arc<AtomicBool>,
    }

    fn record(id: StudentId, draft: &StudentDraft) -> StudentRecord {
        StudentRecord {
            student_id: id,
            roll_no: draft.roll_no.clone(),
            name: draft.name.clone(),
            gender: None,
            dob: None,
            department: Some(draft.department.clone()).filter(|d| !d.is_empty()),
            year: None,
            semester: None,
            class_div: None,
            phone: None,
            email: None,
            address: None,
            guardian_name: None,
            guardian_phone: None,
            photo_path: draft.photo.as_ref().map(|_| format!("/uploads/{id}.png")),
        }
    }

    impl RosterService for FakeBackend {
        async fn list_students(&self) -> Result<Vec<StudentRecord>, ServiceError> {
            if self.fail_list.load(Ordering::SeqCst) {
                return Err(ServiceError::Network("connection reset".into()));
            }
            Ok(self.store.lock().unwrap().students.clone())
        }

        async fn add_student(&self, draft: &StudentDraft) -> Result<MessageResponse, ServiceError> {
            self.adds.fetch_add(1, Ordering::SeqCst);
            let mut store = self.store.lock().unwrap();
            store.next_id += 1;
            let id = store.next_id;
            store.students.push(record(id, draft));
            Ok(MessageResponse {
                success: Some(true),
                student_id: Some(id),
                ..Default::default()
            })
        }

        async fn update_student(
            &self,
            id: StudentId,
            draft: &StudentDraft,
        ) -> Result<MessageResponse, ServiceError> {
            let mut store = self.store.lock().unwrap();
            let row = store
                .students
                .iter_mut()
                .find(|s| s.student_id == id)
                .ok_or(ServiceError::Status {
                    status: 404,
                    message: "Student not found".into(),
                })?;
            *row = record(id, draft);
            Ok(MessageResponse::default())
        }

        async fn delete_student(&self, id: StudentId) -> Result<MessageResponse, ServiceError> {
            self.store
                .lock()
                .unwrap()
                .students
                .retain(|s| s.student_id != id);
            Ok(MessageResponse::default())
        }

        async fn replace_photo(
            &self,
            id: StudentId,
            photo: &str,
        ) -> Result<MessageResponse, ServiceError> {
            self.store.lock().unwrap().photos.push((id, photo.to_string()));
            Ok(MessageResponse::default())
        }
    }

    impl MatcherService for FakeBackend {
        async fn mark_attendance(&self, probe: &Probe) -> Result<MarkResponse, ServiceError> {
            let mut store = self.store.lock().unwrap();
            store.submitted.push(probe.frame_count());
            let Some(first) = store.students.first().cloned() else {
                return Ok(MarkResponse {
                    success: true,
                    message: Some("No faces found".into()),
                    matched: Some(vec![]),
                    liveness_checked: None,
                });
            };
            let id = store.ledger.len() as i64 + 1;
            store.ledger.push(AttendanceRecord {
                id,
                student_id: Some(first.student_id),
                name: Some(first.name.clone()),
                roll_no: Some(first.roll_no.clone()),
                date: "2026-10-18".into(),
                time_in: "08:59:30".into(),
                status: "Present".into(),
                created_at: None,
            });
            Ok(MarkResponse {
                success: true,
                message: None,
                matched: Some(vec![MatchResult {
                    student_id: first.student_id,
                    name: first.name,
                    roll_no: Some(first.roll_no),
                    confidence: None,
                    distance: Some(0.4),
                    photo_path: first.photo_path,
                }]),
                liveness_checked: Some(matches!(probe, Probe::Burst { .. })),
            })
        }
    }

    impl LedgerService for FakeBackend {
        async fn attendance(&self) -> Result<Vec<AttendanceRecord>, ServiceError> {
            Ok(self.store.lock().unwrap().ledger.clone())
        }

        async fn export_csv(&self) -> Result<Vec<u8>, ServiceError> {
            Ok(b"id,name\n1,Alice\n".to_vec())
        }
    }

    fn harness(liveness_frames: usize) -> (Kiosk<FakeBackend>, FakeBackend) {
        let backend = FakeBackend::default();
        let engine = spawn_engine(FakeOpener::default(), 0).unwrap();
        (Kiosk::new(backend.clone(), engine, liveness_frames), backend)
    }

    async fn enroll(kiosk: &Kiosk<FakeBackend>, name: &str, roll_no: &str) {
        kiosk.set_field("name", name).await.unwrap();
        kiosk.set_field("roll_no", roll_no).await.unwrap();
        kiosk.add_student().await.unwrap();
    }

    #[tokio::test]
    async fn test_enrollment_photo_flows_into_add() {
        let (kiosk, backend) = harness(1);
        kiosk.set_field("name", "Alice").await.unwrap();
        kiosk.set_field("roll_no", "21CS01").await.unwrap();

        let handle = kiosk.open_camera("enrollment").await.unwrap();
        let info = kiosk.capture_photo(handle).await.unwrap();
        assert_eq!((info.width, info.height), (4, 4));
        assert!(kiosk.form().await.has_photo);
        assert!(!kiosk.status().await.unwrap().camera.live);

        kiosk.add_student().await.unwrap();

        let form = kiosk.form().await;
        assert!(!form.has_photo, "form resets after add");
        assert_eq!(form.fields, StudentDraft::default());
        let stored = backend.store.lock().unwrap().students.clone();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].photo_path.as_deref(), Some("/uploads/1.png"));
    }

    #[tokio::test]
    async fn test_invalid_inputs_are_flagged() {
        let (kiosk, backend) = harness(1);

        let err = kiosk.set_field("student_id", "9").await.unwrap_err();
        assert!(err.is_invalid_input());
        let err = kiosk.set_field("shoe_size", "9").await.unwrap_err();
        assert!(err.is_invalid_input());
        let err = kiosk.open_camera("selfie").await.unwrap_err();
        assert!(err.is_invalid_input());

        kiosk.set_field("name", "Bob").await.unwrap();
        let err = kiosk.add_student().await.unwrap_err();
        assert!(matches!(
            err,
            KioskError::Roster(RosterError::Validation {
                field: StudentField::RollNo
            })
        ));
        assert_eq!(backend.adds.load(Ordering::SeqCst), 0);
        assert_eq!(kiosk.form().await.fields.name, "Bob", "failed add keeps the form");
    }

    #[tokio::test]
    async fn test_select_update_and_search() {
        let (kiosk, backend) = harness(1);
        enroll(&kiosk, "Alice", "21CS01").await;
        enroll(&kiosk, "Bob", "21CS02").await;

        assert!(kiosk.select_student(2).await);
        assert_eq!(kiosk.form().await.fields.name, "Bob");
        kiosk.set_field("department", "Physics").await.unwrap();

        let handle = kiosk.open_camera("enrollment").await.unwrap();
        kiosk.capture_photo(handle).await.unwrap();
        kiosk.update_student(2).await.unwrap();

        assert_eq!(kiosk.form().await.selected, None);
        let hits = kiosk.search("department", "phys").await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].student_id, 2);
        let photos = backend.store.lock().unwrap().photos.clone();
        assert_eq!(photos.len(), 1);
        assert!(photos[0].1.starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn test_mark_attendance_burst_and_single() {
        let (kiosk, backend) = harness(3);
        enroll(&kiosk, "Alice", "21CS01").await;

        let outcome = kiosk.mark_attendance().await.unwrap();
        assert_eq!(outcome.outcome, "matched");
        assert_eq!(outcome.frames, 3);
        assert_eq!(outcome.liveness_checked, Some(true));
        assert!(outcome.ledger_reloaded);
        assert_eq!(kiosk.attendance().await.unwrap().len(), 1);

        let (single, single_backend) = harness(1);
        let outcome = single.mark_attendance().await.unwrap();
        assert_eq!(outcome.outcome, "unmatched");
        assert_eq!(outcome.frames, 1);
        assert_eq!(single_backend.store.lock().unwrap().submitted, vec![1]);

        let status = kiosk.status().await.unwrap();
        assert!(!status.camera.live);
        assert_eq!(status.match_state, MatchState::Idle);
        assert_eq!(status.last_outcome, Some(OutcomeKind::Matched));
        assert_eq!(status.roster_size, 1);
        assert_eq!(backend.store.lock().unwrap().submitted, vec![3]);
    }

    #[tokio::test]
    async fn test_export_writes_file() {
        let (kiosk, _) = harness(1);
        let path = std::env::temp_dir().join(format!("kiosk-export-{}.csv", std::process::id()));

        let written = kiosk.export_csv(&path).await.unwrap();
        assert_eq!(written, 16);
        assert_eq!(std::fs::read(&path).unwrap(), b"id,name\n1,Alice\n");
        std::fs::remove_file(&path).unwrap();

        let err = kiosk
            .export_csv(Path::new("/nonexistent/dir/out.csv"))
            .await
            .unwrap_err();
        assert!(matches!(err, KioskError::Write { .. }));
    }

    #[tokio::test]
    async fn test_export_rejects_relative_path() {
        let (kiosk, _) = harness(1);
        let err = kiosk
            .export_csv(Path::new("attendance.csv"))
            .await
            .unwrap_err();
        assert!(matches!(err, KioskError::RelativePath(_)));
        assert!(err.is_invalid_input());
        assert!(!Path::new("attendance.csv").exists());
    }

    #[tokio::test]
    async fn test_accepted_add_resets_form_when_reload_fails() {
        let (kiosk, backend) = harness(1);
        kiosk.set_field("name", "Alice").await.unwrap();
        kiosk.set_field("roll_no", "21CS01").await.unwrap();
        backend.fail_list.store(true, Ordering::SeqCst);

        let mutation = kiosk.add_student().await.unwrap();
        assert!(!mutation.reloaded);
        assert_eq!(mutation.response.student_id, Some(1));
        let form = kiosk.form().await;
        assert_eq!(form.fields, StudentDraft::default(), "no duplicate add on retry");
        assert_eq!(backend.adds.load(Ordering::SeqCst), 1);

        let json = serde_json::to_value(&mutation).unwrap();
        assert_eq!(json["reloaded"], false);
        assert_eq!(json["student_id"], 1);

        backend.fail_list.store(false, Ordering::SeqCst);
        assert_eq!(kiosk.list_students().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_selection_switches_to_new_record() {
        let (kiosk, _) = harness(1);
        enroll(&kiosk, "Alice", "21CS01").await;
        assert!(kiosk.select_student(1).await);
        assert_eq!(kiosk.form().await.fields.name, "Alice");

        kiosk.clear_selection().await;
        let form = kiosk.form().await;
        assert_eq!(form.selected, None);
        assert_eq!(form.fields, StudentDraft::default());
    }

    #[tokio::test]
    async fn test_mark_while_reserved_skips_camera() {
        let (kiosk, backend) = harness(3);
        enroll(&kiosk, "Alice", "21CS01").await;

        let held = kiosk.attendance.reserve().unwrap();
        let err = kiosk.mark_attendance().await.unwrap_err();
        assert!(matches!(
            err,
            KioskError::Attendance(AttendanceError::SubmissionInProgress)
        ));
        assert_eq!(kiosk.status().await.unwrap().camera.handle, None);
        assert!(backend.store.lock().unwrap().submitted.is_empty());

        drop(held);
        assert_eq!(kiosk.mark_attendance().await.unwrap().outcome, "matched");
    }

    #[tokio::test]
    async fn test_mark_outcome_carries_score() {
        let (kiosk, _) = harness(1);
        enroll(&kiosk, "Alice", "21CS01").await;

        let outcome = kiosk.mark_attendance().await.unwrap();
        let score = outcome.matched[0].score.unwrap();
        assert!((score - 0.6).abs() < 1e-4);

        let json = serde_json::to_value(&outcome).unwrap();
        let first = &json["matched"][0];
        assert_eq!(first["name"], "Alice");
        assert_eq!(first["student_id"], 1);
        assert!((first["score"].as_f64().unwrap() - 0.6).abs() < 1e-4);
    }
}
