//! Stateless search over a roster snapshot.

use crate::types::{StudentField, StudentRecord};

/// Records whose `field_name` contains `term`, case-insensitively, in input order.
///
/// A record without a value for the field (or an unknown field name) matches
/// only the empty term.
pub fn filter(records: &[StudentRecord], field_name: &str, term: &str) -> Vec<StudentRecord> {
    let field = field_name.parse::<StudentField>().ok();
    let needle = term.to_lowercase();

    records
        .iter()
        .filter(|rec| {
            match field.and_then(|f| rec.field(f)) {
                Some(value) => value.to_lowercase().contains(&needle),
                None => needle.is_empty(),
            }
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(id: i64, name: &str, phone: Option<&str>) -> StudentRecord {
        StudentRecord {
            student_id: id,
            roll_no: format!("R{id}"),
            name: name.to_string(),
            gender: None,
            dob: None,
            department: None,
            year: None,
            semester: None,
            class_div: None,
            phone: phone.map(str::to_string),
            email: None,
            address: None,
            guardian_name: None,
            guardian_phone: None,
            photo_path: None,
        }
    }

    #[test]
    fn test_filter_case_insensitive_substring() {
        let records = vec![student(1, "Alice", None), student(2, "Bob", None)];
        let hits = filter(&records, "name", "ali");
        assert_eq!(hits, vec![records[0].clone()]);

        let hits = filter(&records, "name", "BO");
        assert_eq!(hits, vec![records[1].clone()]);
    }

    #[test]
    fn test_filter_empty_term_keeps_order() {
        let records = vec![
            student(3, "Carol", None),
            student(1, "Alice", None),
            student(2, "Bob", None),
        ];
        assert_eq!(filter(&records, "name", ""), records);
    }

    #[test]
    fn test_filter_missing_field_matches_only_empty() {
        let records = vec![student(1, "Alice", Some("555-0101")), student(2, "Bob", None)];
        assert_eq!(filter(&records, "phone", "555"), vec![records[0].clone()]);
        assert_eq!(filter(&records, "phone", ""), records);
        assert!(filter(&records, "nickname", "a").is_empty());
        assert_eq!(filter(&records, "nickname", ""), records);
    }

    #[test]
    fn test_filter_stringifies_identity() {
        let records = vec![student(12, "Alice", None), student(7, "Bob", None)];
        assert_eq!(filter(&records, "student_id", "2"), vec![records[0].clone()]);
    }

    #[test]
    fn test_filter_does_not_mutate_input() {
        let records = vec![student(1, "Alice", None), student(2, "Bob", None)];
        let before = records.clone();
        let _ = filter(&records, "name", "zzz");
        assert_eq!(records, before);
    }
}
