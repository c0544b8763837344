use std::collections::HashMap;

use super::model::{format_score, CellKey, GridSnapshot, Subject};
use super::validate::{validate, Validation, ValidationKind};

#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub key: CellKey,
    pub text: String,
    /// Last value known to be durably saved.
    pub committed: Option<f64>,
    pub dirty: bool,
    pub saving: bool,
    pub validation_error: Option<ValidationKind>,
    pub save_failed: bool,
    pub editable: bool,
    /// Written by a paste that is still under review.
    pub pasted: bool,
    /// Edited by hand while a paste was under review.
    pub edited_after_paste: bool,
    /// Bumped on every accepted text change; lets a save response tell whether
    /// the text it carried is still the current one.
    pub revision: u64,
}

impl Cell {
    /// Score this cell would save as right now, if it is allowed to save.
    pub fn pending_score(&self) -> Option<Option<f64>> {
        if self.validation_error.is_some() {
            return None;
        }
        Some(parse_clean(&self.text))
    }

    fn recompute_dirty(&mut self) {
        self.dirty = match self.pending_score() {
            None => true,
            Some(v) => v != self.committed,
        };
    }
}

fn parse_clean(text: &str) -> Option<f64> {
    let t = text.trim();
    if t.is_empty() {
        None
    } else {
        t.parse::<f64>().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NotEditable,
    UnknownCell,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EditOutcome {
    /// The text was stored. `error` is the validation result, which does not
    /// prevent storing the text but keeps the cell out of any save payload.
    Accepted {
        dirty: bool,
        error: Option<ValidationKind>,
    },
    /// Silent no-op: nothing about the store changed.
    Rejected(RejectReason),
}

impl EditOutcome {
    pub fn is_saveable_change(&self) -> bool {
        matches!(
            self,
            EditOutcome::Accepted {
                dirty: true,
                error: None
            }
        )
    }
}

/// One entry of a save that actually reached the collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct SentScore {
    pub key: CellKey,
    pub score: Option<f64>,
    pub revision: u64,
}

/// Authoritative in-memory state of every score cell in a session.
#[derive(Debug, Clone, Default)]
pub struct CellStore {
    subjects: HashMap<String, Subject>,
    cells: HashMap<CellKey, Cell>,
}

impl CellStore {
    pub fn initialize(snapshot: &GridSnapshot) -> Self {
        let subjects: HashMap<String, Subject> = snapshot
            .subjects
            .iter()
            .map(|s| (s.id.clone(), s.clone()))
            .collect();

        let mut cells = HashMap::with_capacity(snapshot.students.len() * snapshot.subjects.len());
        for student in &snapshot.students {
            for subject in &snapshot.subjects {
                let key = CellKey::new(student.id.clone(), subject.id.clone());
                let committed = snapshot.scores.get(&key).copied();
                cells.insert(
                    key.clone(),
                    Cell {
                        key,
                        text: format_score(committed),
                        committed,
                        dirty: false,
                        saving: false,
                        validation_error: None,
                        save_failed: false,
                        editable: subject.editable,
                        pasted: false,
                        edited_after_paste: false,
                        revision: 0,
                    },
                );
            }
        }

        Self { subjects, cells }
    }

    pub fn get(&self, key: &CellKey) -> Option<&Cell> {
        self.cells.get(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[cfg(test)]
    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values()
    }

    /// Validation of `text` for `key` without touching the store. `Err` means the
    /// mutation would be silently rejected.
    pub fn check(&self, key: &CellKey, text: &str) -> Result<Validation, RejectReason> {
        let cell = self.cells.get(key).ok_or(RejectReason::UnknownCell)?;
        if !cell.editable {
            return Err(RejectReason::NotEditable);
        }
        let subject = self
            .subjects
            .get(&key.subject_id)
            .ok_or(RejectReason::UnknownCell)?;
        Ok(validate(subject, text))
    }

    pub fn set_cell_text(&mut self, key: &CellKey, text: &str) -> EditOutcome {
        let validation = match self.check(key, text) {
            Ok(v) => v,
            Err(reason) => return EditOutcome::Rejected(reason),
        };
        let Some(cell) = self.cells.get_mut(key) else {
            return EditOutcome::Rejected(RejectReason::UnknownCell);
        };

        cell.text = text.to_string();
        cell.validation_error = validation.error;
        cell.revision += 1;
        cell.recompute_dirty();
        if !cell.dirty {
            cell.save_failed = false;
        }

        EditOutcome::Accepted {
            dirty: cell.dirty,
            error: cell.validation_error,
        }
    }

    pub fn set_paste_marker(&mut self, key: &CellKey, pasted: bool) {
        if let Some(cell) = self.cells.get_mut(key) {
            cell.pasted = pasted;
        }
    }

    pub fn mark_edited_after_paste(&mut self, key: &CellKey) {
        if let Some(cell) = self.cells.get_mut(key) {
            cell.edited_after_paste = true;
        }
    }

    pub fn mark_saving<'a>(&mut self, keys: impl IntoIterator<Item = &'a CellKey>) {
        for key in keys {
            if let Some(cell) = self.cells.get_mut(key) {
                cell.saving = true;
            }
        }
    }

    /// Advances the durable baseline for every key a successful save carried.
    ///
    /// A cell whose text has not changed since the save was sent takes the saved
    /// value as its text too. A cell edited after sending keeps its newer text and
    /// stays dirty if that text differs from what was saved.
    pub fn mark_saved(&mut self, sent: &[SentScore]) {
        for s in sent {
            let Some(cell) = self.cells.get_mut(&s.key) else {
                continue;
            };
            cell.committed = s.score;
            cell.saving = false;
            cell.save_failed = false;
            if cell.revision == s.revision {
                if cell.pending_score() != Some(s.score) {
                    cell.text = format_score(s.score);
                }
                cell.validation_error = None;
                cell.dirty = false;
            } else {
                cell.recompute_dirty();
            }
        }
    }

    /// Save failed: keep whatever the user typed, flag the cell for retry.
    pub fn mark_failed(&mut self, sent: &[SentScore]) {
        for s in sent {
            let Some(cell) = self.cells.get_mut(&s.key) else {
                continue;
            };
            cell.saving = false;
            cell.recompute_dirty();
            cell.save_failed = cell.dirty;
        }
    }

    /// Puts a cell back to its durable value. Does not bump the revision: an
    /// in-flight save for this key may still land and become the new text.
    pub fn revert(&mut self, key: &CellKey) {
        if let Some(cell) = self.cells.get_mut(key) {
            cell.text = format_score(cell.committed);
            cell.validation_error = None;
            cell.dirty = false;
            cell.save_failed = false;
            cell.pasted = false;
            cell.edited_after_paste = false;
        }
    }

    /// Puts a cell back to the value an in-flight save is carrying, at the
    /// revision that save was sent with. The save's completion then settles the
    /// cell: clean on success, dirty and flagged on failure.
    pub fn restore_in_flight(&mut self, sent: &SentScore) {
        if let Some(cell) = self.cells.get_mut(&sent.key) {
            cell.text = format_score(sent.score);
            cell.validation_error = None;
            cell.revision = sent.revision;
            cell.dirty = sent.score != cell.committed;
            cell.save_failed = false;
            cell.pasted = false;
            cell.edited_after_paste = false;
        }
    }

    pub fn clear_paste_markers<'a>(&mut self, keys: impl IntoIterator<Item = &'a CellKey>) {
        for key in keys {
            if let Some(cell) = self.cells.get_mut(key) {
                cell.pasted = false;
                cell.edited_after_paste = false;
            }
        }
    }

    pub fn error_count(&self) -> usize {
        self.cells
            .values()
            .filter(|c| c.validation_error.is_some())
            .count()
    }
}
