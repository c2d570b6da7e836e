//! Roster cache: the student list, the single selection, and mutations
//! against the remote CRUD service.
//!
//! Every mutation the remote store accepts is followed by a full reload. The
//! cache never patches its list locally. A reload that fails after an
//! accepted mutation does not turn the mutation into an error; it is reported
//! through [`Mutation::reloaded`] and the cache keeps its previous snapshot.

use crate::filter;
use crate::form::FormBinding;
use crate::service::{RosterService, ServiceError};
use crate::types::{MessageResponse, StudentDraft, StudentField, StudentId, StudentRecord};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RosterError {
    #[error("{field} is required")]
    Validation { field: StudentField },
    #[error("no student selected")]
    NoSelection,
    #[error("student {requested} is not the selected student {selected}")]
    SelectionMismatch {
        requested: StudentId,
        selected: StudentId,
    },
    #[error("failed to {purpose}: {source}")]
    Transport {
        purpose: &'static str,
        source: ServiceError,
    },
}

impl RosterError {
    fn transport(purpose: &'static str) -> impl FnOnce(ServiceError) -> Self {
        move |source| RosterError::Transport { purpose, source }
    }
}

/// A mutation the remote store accepted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mutation {
    #[serde(flatten)]
    pub response: MessageResponse,
    /// False when the follow-up reload failed and the list is stale.
    pub reloaded: bool,
}

/// In-memory mirror of the remote roster plus the editing session state.
pub struct RosterCache<S> {
    service: S,
    students: Vec<StudentRecord>,
    /// `None` means the form is in "new record" mode.
    selected: Option<StudentId>,
    form: FormBinding,
}

impl<S: RosterService> RosterCache<S> {
    pub fn new(service: S) -> Self {
        Self {
            service,
            students: Vec::new(),
            selected: None,
            form: FormBinding::new(),
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Snapshot from the most recent successful [`list`](Self::list).
    pub fn students(&self) -> &[StudentRecord] {
        &self.students
    }

    pub fn selected(&self) -> Option<StudentId> {
        self.selected
    }

    pub fn selected_record(&self) -> Option<&StudentRecord> {
        let id = self.selected?;
        self.students.iter().find(|s| s.student_id == id)
    }

    pub fn form(&self) -> &FormBinding {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut FormBinding {
        &mut self.form
    }

    /// Search the cached snapshot. See [`filter::filter`].
    pub fn search(&self, field_name: &str, term: &str) -> Vec<StudentRecord> {
        filter::filter(&self.students, field_name, term)
    }

    /// Reload the full list from the remote store.
    ///
    /// If the selected student is gone from the fresh list, the selection and
    /// the form are reset together.
    pub async fn list(&mut self) -> Result<&[StudentRecord], RosterError> {
        let students = self
            .service
            .list_students()
            .await
            .map_err(RosterError::transport("load students"))?;

        tracing::debug!(count = students.len(), "roster reloaded");
        self.students = students;

        if let Some(id) = self.selected {
            if !self.students.iter().any(|s| s.student_id == id) {
                tracing::warn!(student_id = id, "selected student vanished on reload; resetting form");
                self.reset_form();
            }
        }

        Ok(&self.students)
    }

    /// Create a student. Rejected locally, without a remote call, when
    /// `name` or `roll_no` is empty.
    pub async fn add(&mut self, draft: StudentDraft) -> Result<Mutation, RosterError> {
        validate(&draft)?;

        let response = self
            .service
            .add_student(&draft)
            .await
            .map_err(RosterError::transport("add student"))?;

        tracing::info!(
            roll_no = %draft.roll_no,
            student_id = ?response.student_id,
            with_photo = draft.photo.is_some(),
            "student added"
        );

        let reloaded = self.reload_after("add").await;
        Ok(Mutation { response, reloaded })
    }

    /// Update the selected student. A captured photo in the draft replaces
    /// the stored ones once the field update has succeeded.
    ///
    /// The list is reloaded whenever the field update went through, even if
    /// the photo replacement then fails; that failure is returned afterwards.
    pub async fn update(
        &mut self,
        id: StudentId,
        draft: StudentDraft,
    ) -> Result<Mutation, RosterError> {
        self.require_selection(id)?;
        validate(&draft)?;

        let mut response = self
            .service
            .update_student(id, &draft)
            .await
            .map_err(RosterError::transport("update student"))?;
        tracing::info!(student_id = id, "student updated");

        let photo = match draft.photo.as_deref() {
            Some(photo) => self
                .service
                .replace_photo(id, photo)
                .await
                .map(Some)
                .map_err(RosterError::transport("replace photo")),
            None => Ok(None),
        };

        let reloaded = self.reload_after("update").await;

        if let Some(replaced) = photo? {
            response.photo_url = replaced.photo_url;
        }
        Ok(Mutation { response, reloaded })
    }

    /// Delete the selected student, then clear the selection and the form.
    pub async fn delete(&mut self, id: StudentId) -> Result<Mutation, RosterError> {
        self.require_selection(id)?;

        let response = self
            .service
            .delete_student(id)
            .await
            .map_err(RosterError::transport("delete student"))?;

        tracing::info!(student_id = id, "student deleted");
        self.reset_form();

        let reloaded = self.reload_after("delete").await;
        Ok(Mutation { response, reloaded })
    }

    /// Select `id` and load it into the form, dropping any captured photo.
    ///
    /// Returns `false`, changing nothing, when `id` is not in the last list.
    pub fn select(&mut self, id: StudentId) -> bool {
        let Some(record) = self.students.iter().find(|s| s.student_id == id) else {
            tracing::debug!(student_id = id, "select ignored: not in roster");
            return false;
        };
        self.form.from_record(record);
        self.selected = Some(id);
        true
    }

    /// Drop the selection and return the form to new-record mode.
    ///
    /// Fields and photo loaded or captured for the selected student go with
    /// it. Without a selection this is a no-op, so a new record being typed
    /// in is kept.
    pub fn clear_selection(&mut self) {
        if self.selected.take().is_some() {
            self.form.clear();
        }
    }

    /// Clear every form field, the photo buffer and the selection in one step.
    pub fn reset_form(&mut self) {
        self.form.clear();
        self.selected = None;
    }

    async fn reload_after(&mut self, mutation: &'static str) -> bool {
        match self.list().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(mutation, error = %e, "reload after mutation failed; roster is stale");
                false
            }
        }
    }

    fn require_selection(&self, id: StudentId) -> Result<(), RosterError> {
        match self.selected {
            None => Err(RosterError::NoSelection),
            Some(selected) if selected != id => Err(RosterError::SelectionMismatch {
                requested: id,
                selected,
            }),
            Some(_) => Ok(()),
        }
    }
}

fn validate(draft: &StudentDraft) -> Result<(), RosterError> {
    for (field, value) in [
        (StudentField::Name, &draft.name),
        (StudentField::RollNo, &draft.roll_no),
    ] {
        if value.trim().is_empty() {
            return Err(RosterError::Validation { field });
        }
    }
    Ok(())
}
