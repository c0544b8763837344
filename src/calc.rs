use serde::Serialize;
use std::cmp::Ordering;

use crate::grid::cells::CellStore;
use crate::grid::model::{CellKey, Student, Subject};

/// Letter bands on the average, independent of how many subjects exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LetterGrade {
    A,
    B,
    C,
    D,
    E,
    F,
}

pub fn letter_grade(average: f64) -> LetterGrade {
    if average >= 45.0 {
        LetterGrade::A
    } else if average >= 40.0 {
        LetterGrade::B
    } else if average >= 35.0 {
        LetterGrade::C
    } else if average >= 30.0 {
        LetterGrade::D
    } else if average >= 25.0 {
        LetterGrade::E
    } else {
        LetterGrade::F
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedStudentRow {
    pub student_id: String,
    pub total_score: f64,
    pub total_max_score: f64,
    /// Coefficients of the subjects that actually contributed a score.
    pub total_coefficient: f64,
    pub average: f64,
    pub letter_grade: LetterGrade,
    pub rank: usize,
}

/// Recomputes every student's aggregates from the current cell values.
///
/// A cell contributes when it holds a number and has no validation error,
/// whether or not it has been saved yet. The average always divides by the
/// class-wide coefficient sum, so a missing score pulls it down. Rows come
/// back in `students` order.
pub fn compute_rows(students: &[Student], subjects: &[Subject], store: &CellStore) -> Vec<DerivedStudentRow> {
    let class_coefficient: f64 = subjects.iter().map(|s| s.coefficient).sum();

    let mut rows: Vec<DerivedStudentRow> = students
        .iter()
        .map(|student| {
            let mut total_score = 0.0;
            let mut total_max_score = 0.0;
            let mut total_coefficient = 0.0;
            for subject in subjects {
                let key = CellKey::new(student.id.clone(), subject.id.clone());
                let Some(Some(score)) = store.get(&key).and_then(|c| c.pending_score()) else {
                    continue;
                };
                total_score += score;
                total_max_score += subject.max_score;
                total_coefficient += subject.coefficient;
            }

            let average = if class_coefficient > 0.0 {
                total_score / class_coefficient
            } else {
                0.0
            };

            DerivedStudentRow {
                student_id: student.id.clone(),
                total_score,
                total_max_score,
                total_coefficient,
                average,
                letter_grade: letter_grade(average),
                rank: 0,
            }
        })
        .collect();

    assign_strict_ranks(&mut rows);
    rows
}

fn by_average_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Rank = 1-based position after a stable sort by average, descending.
/// Equal averages get consecutive, distinct ranks in roster order.
pub fn assign_strict_ranks(rows: &mut [DerivedStudentRow]) {
    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.sort_by(|&a, &b| by_average_desc(rows[a].average, rows[b].average));
    for (position, idx) in order.into_iter().enumerate() {
        rows[idx].rank = position + 1;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HonorEntry {
    pub student_id: String,
    pub average: f64,
    pub rank: usize,
}

/// Honor-roll ranking: equal averages share a rank and the next distinct
/// average takes its position (1, 2, 2, 4). Stops once the rank passes
/// `max_rank`, keeping every tie at the boundary.
pub fn honor_roll(rows: &[DerivedStudentRow], max_rank: usize) -> Vec<HonorEntry> {
    let mut sorted: Vec<&DerivedStudentRow> = rows.iter().collect();
    sorted.sort_by(|a, b| by_average_desc(a.average, b.average));

    let mut out = Vec::new();
    let mut current_rank = 1;
    let mut previous: Option<f64> = None;
    for (i, row) in sorted.into_iter().enumerate() {
        if previous.map(|p| p != row.average).unwrap_or(false) {
            current_rank = i + 1;
        }
        if current_rank > max_rank {
            break;
        }
        out.push(HonorEntry {
            student_id: row.student_id.clone(),
            average: row.average,
            rank: current_rank,
        });
        previous = Some(row.average);
    }
    out
}
