use serde::Serialize;
use std::collections::BTreeMap;

use super::cells::CellStore;
use super::model::{CellKey, ScoreChange, Student, Subject};
use super::validate::ValidationKind;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PasteError {
    #[error("paste covers {cells} cells, more than the limit of {max}")]
    TooLarge { cells: usize, max: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasteCellError {
    pub row: usize,
    pub col: usize,
    pub kind: ValidationKind,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PasteOutcome {
    pub staged: BTreeMap<CellKey, ScoreChange>,
    pub pasted_count: usize,
    pub error_count: usize,
    pub skipped_locked: usize,
    pub dropped_out_of_bounds: usize,
    pub errors: Vec<PasteCellError>,
}

/// Splits spreadsheet clipboard text into rows of fields. Rows end at `\n`
/// (with an optional `\r`) or a lone `\r`; fields are separated by tab or comma.
/// Blank lines at the end, which spreadsheet copies usually carry, are dropped.
pub fn parse_clipboard(raw: &str) -> Vec<Vec<String>> {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut rows: Vec<Vec<String>> = normalized
        .split('\n')
        .map(|line| {
            line.split(['\t', ','])
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
        })
        .collect();
    while rows
        .last()
        .map(|r| r.iter().all(|f| f.trim().is_empty()))
        .unwrap_or(false)
    {
        rows.pop();
    }
    rows
}

/// Keeps only digits, `.` and `-`.
pub fn sanitize_field(field: &str) -> String {
    field
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect()
}

/// Applies pasted text to the rectangle anchored at (`origin_row`,
/// `origin_col`).
///
/// Valid cells are written to the store and returned as staged changes; the
/// caller decides how they get persisted. Invalid cells are counted and left
/// untouched, non-editable targets are skipped, and anything past the grid's
/// edge is dropped.
pub fn import_paste(
    store: &mut CellStore,
    students: &[Student],
    subjects: &[Subject],
    raw: &str,
    origin_row: usize,
    origin_col: usize,
    max_cells: usize,
) -> Result<PasteOutcome, PasteError> {
    let rows = parse_clipboard(raw);

    let mut targets: Vec<(usize, usize, String)> = Vec::new();
    let mut dropped = 0usize;
    for (i, fields) in rows.iter().enumerate() {
        for (j, field) in fields.iter().enumerate() {
            let row = origin_row.saturating_add(i);
            let col = origin_col.saturating_add(j);
            if row >= students.len() || col >= subjects.len() {
                dropped += 1;
                continue;
            }
            targets.push((row, col, sanitize_field(field)));
        }
    }

    if targets.len() > max_cells {
        return Err(PasteError::TooLarge {
            cells: targets.len(),
            max: max_cells,
        });
    }

    let mut out = PasteOutcome {
        dropped_out_of_bounds: dropped,
        ..Default::default()
    };

    for (row, col, text) in targets {
        let key = CellKey::new(students[row].id.clone(), subjects[col].id.clone());
        let validation = match store.check(&key, &text) {
            Ok(v) => v,
            Err(_) => {
                out.skipped_locked += 1;
                continue;
            }
        };
        let Some(score) = validation.accepted() else {
            out.error_count += 1;
            if let Some(kind) = validation.error {
                out.errors.push(PasteCellError { row, col, kind });
            }
            continue;
        };

        store.set_cell_text(&key, &text);
        store.set_paste_marker(&key, true);
        out.staged.insert(
            key.clone(),
            ScoreChange {
                student_id: key.student_id,
                subject_id: key.subject_id,
                score,
            },
        );
    }

    out.pasted_count = out.staged.len();
    Ok(out)
}
