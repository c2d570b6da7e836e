//! Editable field set bound to the roster's selected student.
//!
//! The form never changes the selection itself. Populating it from a record
//! happens only through [`RosterCache::select`](crate::roster::RosterCache::select),
//! and a full reset (fields, photo buffer and selection together) through
//! [`RosterCache::reset_form`](crate::roster::RosterCache::reset_form).

use crate::types::{StudentDraft, StudentField, StudentRecord};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    #[error("field {0} is server-assigned and cannot be edited")]
    NotEditable(StudentField),
}

/// Editable copy of a student plus the captured enrollment photo buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormBinding {
    fields: StudentDraft,
    photo: Option<String>,
}

impl FormBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current raw value of an editable field.
    pub fn get(&self, field: StudentField) -> Option<&str> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: StudentField, value: impl Into<String>) -> Result<(), FormError> {
        let slot = self
            .fields
            .get_mut(field)
            .ok_or(FormError::NotEditable(field))?;
        *slot = value.into();
        Ok(())
    }

    /// Captured photo as a base64 data URL.
    pub fn photo(&self) -> Option<&str> {
        self.photo.as_deref()
    }

    pub fn set_photo(&mut self, data_url: String) {
        self.photo = Some(data_url);
    }

    pub fn has_photo(&self) -> bool {
        self.photo.is_some()
    }

    /// True when no field holds a value and no photo is buffered.
    pub fn is_blank(&self) -> bool {
        self.photo.is_none() && self.fields == StudentDraft::default()
    }

    /// Snapshot the form as a draft. `roll_no` and `name` are trimmed;
    /// everything else passes through untouched.
    pub fn to_draft(&self) -> StudentDraft {
        StudentDraft {
            roll_no: self.fields.roll_no.trim().to_string(),
            name: self.fields.name.trim().to_string(),
            photo: self.photo.clone(),
            ..self.fields.clone()
        }
    }

    /// Load every editable field from `record` and drop any buffered photo.
    pub(crate) fn from_record(&mut self, record: &StudentRecord) {
        for field in StudentField::ALL.into_iter().filter(|f| f.is_editable()) {
            if let Some(slot) = self.fields.get_mut(field) {
                *slot = record
                    .field(field)
                    .map(|v| v.into_owned())
                    .unwrap_or_default();
            }
        }
        self.photo = None;
    }

    /// Clear every field and the photo buffer.
    pub(crate) fn clear(&mut self) {
        self.fields = StudentDraft::default();
        self.photo = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> StudentRecord {
        StudentRecord {
            student_id: 4,
            roll_no: "R4".into(),
            name: "Dana".into(),
            gender: Some("F".into()),
            dob: None,
            department: Some("Physics".into()),
            year: None,
            semester: None,
            class_div: None,
            phone: Some("555-0104".into()),
            email: None,
            address: None,
            guardian_name: None,
            guardian_phone: None,
            photo_path: Some("/photos/R4.png".into()),
        }
    }

    #[test]
    fn test_to_draft_trims_identity_fields_only() {
        let mut form = FormBinding::new();
        form.set(StudentField::RollNo, "  R1 ").unwrap();
        form.set(StudentField::Name, "\tAlice  ").unwrap();
        form.set(StudentField::Address, "  12 Main St  ").unwrap();

        let draft = form.to_draft();
        assert_eq!(draft.roll_no, "R1");
        assert_eq!(draft.name, "Alice");
        assert_eq!(draft.address, "  12 Main St  ");
        assert_eq!(draft.photo, None);
    }

    #[test]
    fn test_identity_not_editable() {
        let mut form = FormBinding::new();
        assert_eq!(
            form.set(StudentField::StudentId, "9"),
            Err(FormError::NotEditable(StudentField::StudentId))
        );
    }

    #[test]
    fn test_from_record_populates_and_drops_photo() {
        let mut form = FormBinding::new();
        form.set(StudentField::Email, "stale@example.com").unwrap();
        form.set_photo("data:image/png;base64,AAAA".into());

        form.from_record(&record());
        assert_eq!(form.get(StudentField::Name), Some("Dana"));
        assert_eq!(form.get(StudentField::Department), Some("Physics"));
        assert_eq!(form.get(StudentField::Email), Some(""));
        assert!(!form.has_photo());
    }

    #[test]
    fn test_draft_carries_photo() {
        let mut form = FormBinding::new();
        form.set_photo("data:image/png;base64,AAAA".into());
        assert_eq!(form.to_draft().photo.as_deref(), Some("data:image/png;base64,AAAA"));
    }

    #[test]
    fn test_clear_blanks_form() {
        let mut form = FormBinding::new();
        form.from_record(&record());
        form.set_photo("data:x".into());
        form.clear();
        assert!(form.is_blank());
    }
}
