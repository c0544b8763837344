use serde::Serialize;

use super::model::Subject;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    #[error("not a number")]
    InvalidNumber,
    #[error("outside the subject's score range")]
    OutOfRange,
}

/// Result of checking raw cell text against a subject.
///
/// `value` is the numeric interpretation when the text parses, even if it is
/// out of range; callers must look at `error` before trusting it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Validation {
    pub value: Option<f64>,
    pub error: Option<ValidationKind>,
}

impl Validation {
    /// The score this text would save as, or `None` if it must not be saved.
    pub fn accepted(&self) -> Option<Option<f64>> {
        match self.error {
            None => Some(self.value),
            Some(_) => None,
        }
    }
}

pub fn validate(subject: &Subject, raw: &str) -> Validation {
    let text = raw.trim();
    if text.is_empty() {
        return Validation {
            value: None,
            error: None,
        };
    }

    // f64::from_str accepts "inf" and "NaN"; neither is a score.
    let parsed = match text.parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => {
            return Validation {
                value: None,
                error: Some(ValidationKind::InvalidNumber),
            }
        }
    };

    let error = if parsed < 0.0 || parsed > subject.max_score {
        Some(ValidationKind::OutOfRange)
    } else {
        None
    };
    Validation {
        value: Some(parsed),
        error,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerRole {
    Admin,
    Teacher,
    Other(String),
}

impl CallerRole {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Self::Admin,
            "teacher" => Self::Teacher,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Permission predicate evaluated once per subject when a session opens.
pub fn is_subject_editable(subject_id: &str, role: &CallerRole, assignments: &[String]) -> bool {
    match role {
        CallerRole::Admin => true,
        CallerRole::Teacher => assignments.iter().any(|a| a == subject_id),
        CallerRole::Other(_) => false,
    }
}
