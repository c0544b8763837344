use serde::Serialize;
use std::collections::HashMap;

use super::cells::{CellStore, EditOutcome};
use super::model::{AttendanceSummary, CellKey, GridSnapshot, Student, Subject};
use super::nav::{navigate, GridPos, NavKey};
use super::paste::{import_paste, PasteCellError};
use super::scheduler::{FlushReport, FlushTicket, PersistenceScheduler, SchedulerPhase};
use super::sink::{SaveBatch, SaveError};
use super::validate::ValidationKind;
use super::{GridConfig, GridError};
use crate::calc::{compute_rows, honor_roll, DerivedStudentRow, HonorEntry, LetterGrade};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasteSummary {
    pub pasted_count: usize,
    pub error_count: usize,
    pub skipped_locked: usize,
    pub dropped_out_of_bounds: usize,
    pub errors: Vec<PasteCellError>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellView {
    pub subject_id: String,
    pub value: String,
    pub error: Option<ValidationKind>,
    pub dirty: bool,
    pub saving: bool,
    pub save_failed: bool,
    pub editable: bool,
    pub pasted: bool,
    pub edited_after_paste: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowView {
    pub student_id: String,
    pub display_name: String,
    pub gender: String,
    pub total_score: f64,
    pub total_max_score: f64,
    pub total_coefficient: f64,
    pub average: f64,
    pub letter_grade: LetterGrade,
    pub rank: usize,
    pub absent: i64,
    pub permission: i64,
    pub cells: Vec<CellView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridView {
    pub class_id: String,
    pub month: String,
    pub year: i64,
    pub phase: SchedulerPhase,
    pub class_coefficient: f64,
    pub staged_count: usize,
    pub queued_count: usize,
    /// When the pending autosave becomes due, in host milliseconds.
    pub autosave_due_at: Option<u64>,
    pub error_count: usize,
    pub last_save_error: Option<String>,
    pub last_paste: Option<PasteSummary>,
    pub focus: GridPos,
    pub subjects: Vec<Subject>,
    pub rows: Vec<RowView>,
}

/// One open grade grid: a class-month snapshot plus everything the user has
/// done to it since it was opened.
#[derive(Debug)]
pub struct GridSession {
    class_id: String,
    month: String,
    year: i64,
    students: Vec<Student>,
    subjects: Vec<Subject>,
    store: CellStore,
    scheduler: PersistenceScheduler,
    rows: Vec<DerivedStudentRow>,
    attendance: HashMap<String, AttendanceSummary>,
    focus: GridPos,
    config: GridConfig,
    last_paste: Option<PasteSummary>,
}

impl GridSession {
    pub fn open(
        snapshot: GridSnapshot,
        attendance: HashMap<String, AttendanceSummary>,
        config: GridConfig,
    ) -> Self {
        let snapshot = snapshot.into_display_order();
        let store = CellStore::initialize(&snapshot);
        let rows = compute_rows(&snapshot.students, &snapshot.subjects, &store);
        tracing::info!(
            class_id = %snapshot.class_id,
            month = %snapshot.month,
            year = snapshot.year,
            students = snapshot.students.len(),
            subjects = snapshot.subjects.len(),
            "grid session opened"
        );
        Self {
            class_id: snapshot.class_id,
            month: snapshot.month,
            year: snapshot.year,
            students: snapshot.students,
            subjects: snapshot.subjects,
            store,
            scheduler: PersistenceScheduler::new(config.autosave_quiet_ms),
            rows,
            attendance,
            focus: GridPos { row: 0, col: 0 },
            config,
            last_paste: None,
        }
    }

    pub fn class_id(&self) -> &str {
        &self.class_id
    }

    pub fn month(&self) -> &str {
        &self.month
    }

    pub fn year(&self) -> i64 {
        self.year
    }

    #[cfg(test)]
    pub fn store(&self) -> &CellStore {
        &self.store
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.scheduler.phase()
    }

    #[cfg(test)]
    pub fn rows(&self) -> &[DerivedStudentRow] {
        &self.rows
    }

    pub fn key_at(&self, row: usize, col: usize) -> Result<CellKey, GridError> {
        match (self.students.get(row), self.subjects.get(col)) {
            (Some(st), Some(sub)) => Ok(CellKey::new(st.id.clone(), sub.id.clone())),
            _ => Err(GridError::OutOfBounds { row, col }),
        }
    }

    fn refresh(&mut self) {
        self.rows = compute_rows(&self.students, &self.subjects, &self.store);
    }

    pub fn set_cell_text(&mut self, key: &CellKey, text: &str, now: u64) -> EditOutcome {
        let outcome = self.store.set_cell_text(key, text);
        self.scheduler.on_edit(&mut self.store, key, outcome, now);
        if matches!(outcome, EditOutcome::Accepted { .. }) {
            self.refresh();
        }
        outcome
    }

    /// Edit addressed by ids. Unlike a locked cell, an id pair that names no
    /// cell in this grid is a caller error.
    pub fn set_cell_by_id(
        &mut self,
        student_id: &str,
        subject_id: &str,
        text: &str,
        now: u64,
    ) -> Result<EditOutcome, GridError> {
        let key = CellKey::new(student_id, subject_id);
        if self.store.get(&key).is_none() {
            return Err(GridError::UnknownCell {
                student_id: student_id.to_string(),
                subject_id: subject_id.to_string(),
            });
        }
        Ok(self.set_cell_text(&key, text, now))
    }

    pub fn set_cell_at(&mut self, row: usize, col: usize, text: &str, now: u64) -> Result<EditOutcome, GridError> {
        let key = self.key_at(row, col)?;
        Ok(self.set_cell_text(&key, text, now))
    }

    /// Imports clipboard text at (`row`, `col`). Any staged cell switches the
    /// session into batch review.
    pub fn paste(&mut self, text: &str, row: usize, col: usize) -> Result<PasteSummary, GridError> {
        let outcome = import_paste(
            &mut self.store,
            &self.students,
            &self.subjects,
            text,
            row,
            col,
            self.config.max_paste_cells,
        )?;

        let summary = PasteSummary {
            pasted_count: outcome.pasted_count,
            error_count: outcome.error_count,
            skipped_locked: outcome.skipped_locked,
            dropped_out_of_bounds: outcome.dropped_out_of_bounds,
            errors: outcome.errors,
        };
        tracing::debug!(
            pasted = summary.pasted_count,
            errors = summary.error_count,
            locked = summary.skipped_locked,
            dropped = summary.dropped_out_of_bounds,
            "paste imported"
        );
        if !outcome.staged.is_empty() {
            self.scheduler.enter_batch(outcome.staged);
            self.refresh();
        }
        self.last_paste = Some(summary.clone());
        Ok(summary)
    }

    pub fn begin_due_flush(&mut self, now: u64) -> Option<FlushTicket> {
        self.scheduler.begin_continuous_flush(&mut self.store, now)
    }

    pub fn begin_commit(&mut self, now: u64) -> Result<Option<FlushTicket>, GridError> {
        let ticket = self.scheduler.begin_batch_flush(&mut self.store, now)?;
        if ticket.is_none() {
            self.refresh();
        }
        Ok(ticket)
    }

    pub fn complete_flush(
        &mut self,
        ticket: &FlushTicket,
        result: Result<(), SaveError>,
        now: u64,
    ) -> Result<FlushReport, GridError> {
        let report = self.scheduler.complete(&mut self.store, ticket, result, now)?;
        self.refresh();
        Ok(report)
    }

    fn run(&mut self, ticket: FlushTicket, sink: &mut dyn SaveBatch, now: u64) -> Result<FlushReport, GridError> {
        let result = sink.save_batch(&ticket.changes());
        self.complete_flush(&ticket, result, now)
    }

    /// Flushes the continuous queue through `sink` if its quiet period is over.
    pub fn tick(&mut self, sink: &mut dyn SaveBatch, now: u64) -> Result<Option<FlushReport>, GridError> {
        match self.begin_due_flush(now) {
            Some(ticket) => self.run(ticket, sink, now).map(Some),
            None => Ok(None),
        }
    }

    pub fn retry(&mut self, now: u64) {
        self.scheduler.retry(now);
    }

    /// Saves the staged batch as one call. `Ok(None)` means nothing was left
    /// to save and batch review simply ended.
    pub fn save_all(&mut self, sink: &mut dyn SaveBatch, now: u64) -> Result<Option<FlushReport>, GridError> {
        match self.begin_commit(now)? {
            Some(ticket) => self.run(ticket, sink, now).map(Some),
            None => Ok(None),
        }
    }

    pub fn cancel_paste(&mut self, now: u64) -> Result<usize, GridError> {
        let reverted = self.scheduler.cancel_batch(&mut self.store, now)?;
        self.last_paste = None;
        self.refresh();
        Ok(reverted)
    }

    pub fn focus(&mut self, row: usize, col: usize) -> Result<GridPos, GridError> {
        self.key_at(row, col)?;
        self.focus = GridPos { row, col };
        Ok(self.focus)
    }

    pub fn navigate(&mut self, key: NavKey) -> GridPos {
        self.focus = navigate(self.focus, key, self.students.len(), self.subjects.len());
        self.focus
    }

    pub fn honor_roll(&self, max_rank: usize) -> Vec<HonorEntry> {
        honor_roll(&self.rows, max_rank)
    }

    pub fn view(&self) -> GridView {
        let rows = self
            .students
            .iter()
            .zip(self.rows.iter())
            .map(|(student, derived)| {
                let attendance = self.attendance.get(&student.id).copied().unwrap_or_default();
                let cells = self
                    .subjects
                    .iter()
                    .filter_map(|subject| {
                        let cell = self
                            .store
                            .get(&CellKey::new(student.id.clone(), subject.id.clone()))?;
                        Some(CellView {
                            subject_id: subject.id.clone(),
                            value: cell.text.clone(),
                            error: cell.validation_error,
                            dirty: cell.dirty,
                            saving: cell.saving,
                            save_failed: cell.save_failed,
                            editable: cell.editable,
                            pasted: cell.pasted,
                            edited_after_paste: cell.edited_after_paste,
                        })
                    })
                    .collect();
                RowView {
                    student_id: student.id.clone(),
                    display_name: student.display_name.clone(),
                    gender: student.gender.clone(),
                    total_score: derived.total_score,
                    total_max_score: derived.total_max_score,
                    total_coefficient: derived.total_coefficient,
                    average: derived.average,
                    letter_grade: derived.letter_grade,
                    rank: derived.rank,
                    absent: attendance.absent,
                    permission: attendance.permission,
                    cells,
                }
            })
            .collect();

        GridView {
            class_id: self.class_id.clone(),
            month: self.month.clone(),
            year: self.year,
            phase: self.scheduler.phase(),
            class_coefficient: self.subjects.iter().map(|s| s.coefficient).sum(),
            staged_count: self.scheduler.staged_count(),
            queued_count: self.scheduler.queued_count(),
            autosave_due_at: self.scheduler.deadline(),
            error_count: self.store.error_count(),
            last_save_error: self.scheduler.last_error().map(str::to_string),
            last_paste: self.last_paste.clone(),
            focus: self.focus,
            subjects: self.subjects.clone(),
            rows,
        }
    }
}
