use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifies one score cell: a (student, subject) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellKey {
    pub student_id: String,
    pub subject_id: String,
}

impl CellKey {
    pub fn new(student_id: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            subject_id: subject_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub display_name: String,
    pub gender: String,
    pub sort_key: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub code: String,
    pub max_score: f64,
    pub coefficient: f64,
    pub display_order: i64,
    /// Decided once when the session opens; travels with the subject through
    /// any reordering.
    pub editable: bool,
}

/// Everything one grid session starts from. Students and subjects are fixed for
/// the session's lifetime; only scores change.
#[derive(Debug, Clone, Default)]
pub struct GridSnapshot {
    pub class_id: String,
    pub month: String,
    pub year: i64,
    pub students: Vec<Student>,
    pub subjects: Vec<Subject>,
    pub scores: HashMap<CellKey, f64>,
}

impl GridSnapshot {
    /// Puts students in sort-key order and subjects in display order. Both sorts
    /// are stable so equal keys keep the caller's order.
    pub fn into_display_order(mut self) -> Self {
        self.students.sort_by_key(|s| s.sort_key);
        self.subjects.sort_by_key(|s| s.display_order);
        self
    }
}

/// One entry of a save payload. `score: None` clears the stored score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreChange {
    pub student_id: String,
    pub subject_id: String,
    pub score: Option<f64>,
}

/// Display-only attendance counts supplied by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub absent: i64,
    pub permission: i64,
}

/// Canonical text for a stored score: integers without a fraction.
pub fn format_score(score: Option<f64>) -> String {
    match score {
        None => String::new(),
        Some(v) if v.fract() == 0.0 && v.abs() < 1e15 => format!("{}", v as i64),
        Some(v) => format!("{}", v),
    }
}
