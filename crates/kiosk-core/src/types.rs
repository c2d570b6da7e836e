use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Server-assigned student identity. Never present on a record under construction.
pub type StudentId = i64;

/// Named columns of a student record, as used by the search filter and the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StudentField {
    StudentId,
    RollNo,
    Name,
    Gender,
    Dob,
    Department,
    Year,
    Semester,
    ClassDiv,
    Phone,
    Email,
    Address,
    GuardianName,
    GuardianPhone,
}

impl StudentField {
    /// Every field, in wire order.
    pub const ALL: [StudentField; 14] = [
        StudentField::StudentId,
        StudentField::RollNo,
        StudentField::Name,
        StudentField::Gender,
        StudentField::Dob,
        StudentField::Department,
        StudentField::Year,
        StudentField::Semester,
        StudentField::ClassDiv,
        StudentField::Phone,
        StudentField::Email,
        StudentField::Address,
        StudentField::GuardianName,
        StudentField::GuardianPhone,
    ];

    /// JSON key of this field.
    pub fn as_str(self) -> &'static str {
        match self {
            StudentField::StudentId => "student_id",
            StudentField::RollNo => "roll_no",
            StudentField::Name => "name",
            StudentField::Gender => "gender",
            StudentField::Dob => "dob",
            StudentField::Department => "department",
            StudentField::Year => "year",
            StudentField::Semester => "semester",
            StudentField::ClassDiv => "class_div",
            StudentField::Phone => "phone",
            StudentField::Email => "email",
            StudentField::Address => "address",
            StudentField::GuardianName => "guardian_name",
            StudentField::GuardianPhone => "guardian_phone",
        }
    }

    /// Whether the form can edit this field. The identity is server-assigned.
    pub fn is_editable(self) -> bool {
        self != StudentField::StudentId
    }
}

impl fmt::Display for StudentField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown student field: {0}")]
pub struct UnknownField(pub String);

impl FromStr for StudentField {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StudentField::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| UnknownField(s.to_string()))
    }
}

fn opt(v: &Option<String>) -> Option<Cow<'_, str>> {
    v.as_deref().map(Cow::Borrowed)
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

/// A student as stored by the remote CRUD service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub student_id: StudentId,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub roll_no: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub dob: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub semester: Option<String>,
    #[serde(default)]
    pub class_div: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub guardian_name: Option<String>,
    #[serde(default)]
    pub guardian_phone: Option<String>,
    /// URL of the first enrolled photo, if any. Read-only.
    #[serde(default)]
    pub photo_path: Option<String>,
}

impl StudentRecord {
    /// Stringified value of `field`, or `None` when the record has no value for it.
    pub fn field(&self, field: StudentField) -> Option<Cow<'_, str>> {
        match field {
            StudentField::StudentId => Some(Cow::Owned(self.student_id.to_string())),
            StudentField::RollNo => Some(Cow::Borrowed(self.roll_no.as_str())),
            StudentField::Name => Some(Cow::Borrowed(self.name.as_str())),
            StudentField::Gender => opt(&self.gender),
            StudentField::Dob => opt(&self.dob),
            StudentField::Department => opt(&self.department),
            StudentField::Year => opt(&self.year),
            StudentField::Semester => opt(&self.semester),
            StudentField::ClassDiv => opt(&self.class_div),
            StudentField::Phone => opt(&self.phone),
            StudentField::Email => opt(&self.email),
            StudentField::Address => opt(&self.address),
            StudentField::GuardianName => opt(&self.guardian_name),
            StudentField::GuardianPhone => opt(&self.guardian_phone),
        }
    }
}

/// Unvalidated field values destined to become or update a [`StudentRecord`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentDraft {
    pub roll_no: String,
    pub name: String,
    pub gender: String,
    pub dob: String,
    pub department: String,
    pub year: String,
    pub semester: String,
    pub class_div: String,
    pub phone: String,
    pub email: String,
    pub address: String,
    pub guardian_name: String,
    pub guardian_phone: String,
    /// Base64 data URL of a freshly captured enrollment photo. Write-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
}

impl StudentDraft {
    /// Value of an editable field. `None` for the identity.
    pub fn get(&self, field: StudentField) -> Option<&str> {
        self.slot(field).map(String::as_str)
    }

    /// Mutable slot for an editable field. `None` for the identity.
    pub fn get_mut(&mut self, field: StudentField) -> Option<&mut String> {
        let slot = match field {
            StudentField::StudentId => return None,
            StudentField::RollNo => &mut self.roll_no,
            StudentField::Name => &mut self.name,
            StudentField::Gender => &mut self.gender,
            StudentField::Dob => &mut self.dob,
            StudentField::Department => &mut self.department,
            StudentField::Year => &mut self.year,
            StudentField::Semester => &mut self.semester,
            StudentField::ClassDiv => &mut self.class_div,
            StudentField::Phone => &mut self.phone,
            StudentField::Email => &mut self.email,
            StudentField::Address => &mut self.address,
            StudentField::GuardianName => &mut self.guardian_name,
            StudentField::GuardianPhone => &mut self.guardian_phone,
        };
        Some(slot)
    }

    fn slot(&self, field: StudentField) -> Option<&String> {
        let slot = match field {
            StudentField::StudentId => return None,
            StudentField::RollNo => &self.roll_no,
            StudentField::Name => &self.name,
            StudentField::Gender => &self.gender,
            StudentField::Dob => &self.dob,
            StudentField::Department => &self.department,
            StudentField::Year => &self.year,
            StudentField::Semester => &self.semester,
            StudentField::ClassDiv => &self.class_div,
            StudentField::Phone => &self.phone,
            StudentField::Email => &self.email,
            StudentField::Address => &self.address,
            StudentField::GuardianName => &self.guardian_name,
            StudentField::GuardianPhone => &self.guardian_phone,
        };
        Some(slot)
    }
}

/// One row of the attendance ledger. Created only by the matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: i64,
    #[serde(default)]
    pub student_id: Option<StudentId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub roll_no: Option<String>,
    pub date: String,
    pub time_in: String,
    pub status: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl AttendanceRecord {
    /// Check-in timestamp from `date` (YYYY-MM-DD) and `time_in` (HH:MM:SS).
    pub fn checked_in_at(&self) -> Option<NaiveDateTime> {
        let date = NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").ok()?;
        let time = NaiveTime::parse_from_str(&self.time_in, "%H:%M:%S").ok()?;
        Some(date.and_time(time))
    }
}

/// One identity the matcher recognised in a submitted frame. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub student_id: StudentId,
    pub name: String,
    #[serde(default)]
    pub roll_no: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    /// Face distance reported by the matcher (lower is closer).
    #[serde(default)]
    pub distance: Option<f32>,
    #[serde(default)]
    pub photo_path: Option<String>,
}

impl MatchResult {
    /// Confidence in [0, 1]; derived from distance when the matcher omits it.
    pub fn score(&self) -> Option<f32> {
        self.confidence
            .or_else(|| self.distance.map(|d| (1.0 - d).clamp(0.0, 1.0)))
    }
}

/// Image payload submitted to the matcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Probe {
    /// A single still. The matcher skips its liveness check.
    Single { image: String },
    /// Two or more stills captured a short time apart, checked for motion.
    Burst { frames: Vec<String> },
}

impl Probe {
    pub fn frame_count(&self) -> usize {
        match self {
            Probe::Single { .. } => 1,
            Probe::Burst { frames } => frames.len(),
        }
    }
}

/// Body of `POST /api/mark_attendance`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub matched: Option<Vec<MatchResult>>,
    #[serde(default)]
    pub liveness_checked: Option<bool>,
}

/// Body returned by the roster mutation endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub student_id: Option<StudentId>,
    #[serde(default)]
    pub photo_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_student_record_tolerates_nulls() {
        let json = r#"{"student_id": 7, "roll_no": null, "name": "Alice", "phone": null,
                       "photo_path": "/photos/R1.png"}"#;
        let rec: StudentRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.student_id, 7);
        assert_eq!(rec.roll_no, "");
        assert_eq!(rec.phone, None);
        assert_eq!(rec.field(StudentField::Phone), None);
        assert_eq!(rec.field(StudentField::StudentId).as_deref(), Some("7"));
    }

    #[test]
    fn test_field_names_parse() {
        for f in StudentField::ALL {
            assert_eq!(f.as_str().parse::<StudentField>().unwrap(), f);
        }
        assert!("nickname".parse::<StudentField>().is_err());
        assert!(!StudentField::StudentId.is_editable());
    }

    #[test]
    fn test_draft_omits_absent_photo() {
        let draft = StudentDraft {
            roll_no: "R1".into(),
            name: "Alice".into(),
            ..Default::default()
        };
        let v = serde_json::to_value(&draft).unwrap();
        assert!(v.get("photo").is_none());
        assert_eq!(v["roll_no"], "R1");
        assert_eq!(v["guardian_phone"], "");
    }

    #[test]
    fn test_probe_wire_shape() {
        let single = serde_json::to_value(Probe::Single { image: "data:x".into() }).unwrap();
        assert_eq!(single, serde_json::json!({"image": "data:x"}));

        let burst = Probe::Burst { frames: vec!["a".into(), "b".into()] };
        assert_eq!(burst.frame_count(), 2);
        assert_eq!(
            serde_json::to_value(burst).unwrap(),
            serde_json::json!({"frames": ["a", "b"]})
        );
    }

    #[test]
    fn test_match_score_from_distance() {
        let m: MatchResult =
            serde_json::from_str(r#"{"student_id": 1, "name": "A", "distance": 0.25}"#).unwrap();
        assert!((m.score().unwrap() - 0.75).abs() < 1e-6);

        let m: MatchResult = serde_json::from_str(
            r#"{"student_id": 1, "name": "A", "confidence": 0.9, "distance": 0.25}"#,
        )
        .unwrap();
        assert_eq!(m.score(), Some(0.9));
    }

    #[test]
    fn test_attendance_checked_in_at() {
        let rec: AttendanceRecord = serde_json::from_str(
            r#"{"id": 3, "student_id": 1, "name": "A", "roll_no": "R1",
                "date": "2024-05-02", "time_in": "09:15:30", "status": "present"}"#,
        )
        .unwrap();
        let ts = rec.checked_in_at().unwrap();
        assert_eq!(ts.to_string(), "2024-05-02 09:15:30");
    }
}
