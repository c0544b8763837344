use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use super::cells::{CellStore, EditOutcome, SentScore};
use super::model::{CellKey, ScoreChange};
use super::sink::SaveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    Idle,
    ContinuousPending,
    Flushing,
    BatchStaged,
    BatchFlushing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushKind {
    Continuous,
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("no paste is waiting for review")]
    NotInBatch,
    #[error("a save is already in flight")]
    FlushInFlight,
    #[error("no save with ticket {0} is in flight")]
    UnknownTicket(u64),
}

/// A save that has been handed to the collaborator and not yet answered.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushTicket {
    pub id: u64,
    pub kind: FlushKind,
    pub sent: Vec<SentScore>,
}

impl FlushTicket {
    pub fn changes(&self) -> Vec<ScoreChange> {
        self.sent
            .iter()
            .map(|s| ScoreChange {
                student_id: s.key.student_id.clone(),
                subject_id: s.key.subject_id.clone(),
                score: s.score,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub kind: FlushKind,
    pub saved: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct Batch {
    staged: BTreeMap<CellKey, ScoreChange>,
    /// Every key pasted or edited since the batch opened; cancel reverts these.
    touched: BTreeSet<CellKey>,
}

#[derive(Debug, Clone)]
struct InFlight {
    id: u64,
    kind: FlushKind,
    sent: Vec<SentScore>,
}

/// Decides when cell changes reach the save collaborator.
///
/// Plain edits are coalesced and flushed once no edit has arrived for the
/// quiet period. A paste opens a batch: the continuous queue is suspended
/// (kept, not flushed) and every change lands in one staged change-set that
/// is saved or discarded as a whole. At most one save is in flight at a time.
#[derive(Debug, Clone)]
pub struct PersistenceScheduler {
    quiet_ms: u64,
    queue: BTreeSet<CellKey>,
    deadline: Option<u64>,
    in_flight: Option<InFlight>,
    batch: Option<Batch>,
    next_ticket: u64,
    last_error: Option<String>,
}

impl PersistenceScheduler {
    pub fn new(quiet_ms: u64) -> Self {
        Self {
            quiet_ms,
            queue: BTreeSet::new(),
            deadline: None,
            in_flight: None,
            batch: None,
            next_ticket: 1,
            last_error: None,
        }
    }

    pub fn phase(&self) -> SchedulerPhase {
        match (&self.in_flight, &self.batch) {
            (Some(f), _) if f.kind == FlushKind::Batch => SchedulerPhase::BatchFlushing,
            (_, Some(_)) => SchedulerPhase::BatchStaged,
            (Some(_), None) => SchedulerPhase::Flushing,
            (None, None) if !self.queue.is_empty() => SchedulerPhase::ContinuousPending,
            (None, None) => SchedulerPhase::Idle,
        }
    }

    pub fn staged_count(&self) -> usize {
        self.batch.as_ref().map(|b| b.staged.len()).unwrap_or(0)
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    pub fn deadline(&self) -> Option<u64> {
        self.deadline
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Routes an edit the store already applied.
    pub fn on_edit(&mut self, store: &mut CellStore, key: &CellKey, outcome: EditOutcome, now: u64) {
        if matches!(outcome, EditOutcome::Rejected(_)) {
            return;
        }

        if let Some(batch) = self.batch.as_mut() {
            batch.touched.insert(key.clone());
            store.mark_edited_after_paste(key);
            match store.get(key).and_then(|c| c.pending_score()) {
                Some(score) => {
                    batch.staged.insert(
                        key.clone(),
                        ScoreChange {
                            student_id: key.student_id.clone(),
                            subject_id: key.subject_id.clone(),
                            score,
                        },
                    );
                }
                None => {
                    batch.staged.remove(key);
                }
            }
            return;
        }

        if outcome.is_saveable_change() {
            self.queue.insert(key.clone());
        } else {
            self.queue.remove(key);
        }
        self.deadline = if self.queue.is_empty() {
            None
        } else {
            Some(now.saturating_add(self.quiet_ms))
        };
    }

    /// Opens (or extends) the batch with the changes a paste staged.
    pub fn enter_batch(&mut self, staged: BTreeMap<CellKey, ScoreChange>) {
        let batch = self.batch.get_or_insert_with(Batch::default);
        for (key, change) in staged {
            self.queue.remove(&key);
            batch.touched.insert(key.clone());
            batch.staged.insert(key, change);
        }
        self.last_error = None;
        if self.queue.is_empty() {
            self.deadline = None;
        }
        tracing::info!(staged = batch.staged.len(), "paste staged for review");
    }

    pub fn is_due(&self, now: u64) -> bool {
        self.batch.is_none()
            && self.in_flight.is_none()
            && !self.queue.is_empty()
            && self.deadline.map(|d| now >= d).unwrap_or(false)
    }

    /// Makes the continuous queue due immediately, e.g. after a failed save.
    pub fn retry(&mut self, now: u64) {
        if !self.queue.is_empty() {
            self.deadline = Some(now);
        }
    }

    pub fn begin_continuous_flush(&mut self, store: &mut CellStore, now: u64) -> Option<FlushTicket> {
        if !self.is_due(now) {
            return None;
        }

        let queued = std::mem::take(&mut self.queue);
        self.deadline = None;
        let mut sent: Vec<SentScore> = Vec::with_capacity(queued.len());
        for key in queued {
            let Some(cell) = store.get(&key) else {
                continue;
            };
            if cell.saving {
                self.queue.insert(key);
                continue;
            }
            let Some(score) = cell.pending_score() else {
                continue;
            };
            if cell.dirty {
                sent.push(SentScore {
                    revision: cell.revision,
                    key,
                    score,
                });
            }
        }
        if sent.is_empty() {
            return None;
        }

        Some(self.dispatch(store, FlushKind::Continuous, sent))
    }

    /// Starts saving the whole staged change-set. `Ok(None)` means the batch had
    /// nothing left to save and was closed.
    pub fn begin_batch_flush(
        &mut self,
        store: &mut CellStore,
        now: u64,
    ) -> Result<Option<FlushTicket>, SchedulerError> {
        let Some(batch) = self.batch.as_ref() else {
            return Err(SchedulerError::NotInBatch);
        };
        let sent: Vec<SentScore> = batch
            .staged
            .iter()
            .map(|(key, change)| SentScore {
                key: key.clone(),
                score: change.score,
                revision: store.get(key).map(|c| c.revision).unwrap_or(0),
            })
            .collect();
        if self.in_flight.is_some() {
            return Err(SchedulerError::FlushInFlight);
        }

        if sent.is_empty() {
            self.close_batch(store, now);
            return Ok(None);
        }
        Ok(Some(self.dispatch(store, FlushKind::Batch, sent)))
    }

    fn dispatch(&mut self, store: &mut CellStore, kind: FlushKind, sent: Vec<SentScore>) -> FlushTicket {
        let id = self.next_ticket;
        self.next_ticket += 1;
        store.mark_saving(sent.iter().map(|s| &s.key));
        self.in_flight = Some(InFlight {
            id,
            kind,
            sent: sent.clone(),
        });
        tracing::debug!(ticket = id, ?kind, cells = sent.len(), "save dispatched");
        FlushTicket { id, kind, sent }
    }

    /// Reconciles a save response against the exact keys the ticket carried.
    pub fn complete(
        &mut self,
        store: &mut CellStore,
        ticket: &FlushTicket,
        result: Result<(), SaveError>,
        now: u64,
    ) -> Result<FlushReport, SchedulerError> {
        match &self.in_flight {
            Some(f) if f.id == ticket.id => {}
            _ => return Err(SchedulerError::UnknownTicket(ticket.id)),
        }
        self.in_flight = None;

        match result {
            Ok(()) => {
                store.mark_saved(&ticket.sent);
                self.last_error = None;
                if ticket.kind == FlushKind::Batch {
                    self.settle_batch(store, &ticket.sent, now);
                }
                // A cell left dirty outside any batch must stay on the queue.
                for s in &ticket.sent {
                    let in_batch = self
                        .batch
                        .as_ref()
                        .map(|b| b.touched.contains(&s.key))
                        .unwrap_or(false);
                    let still_saveable = store
                        .get(&s.key)
                        .map(|c| c.dirty && c.pending_score().is_some())
                        .unwrap_or(false);
                    if still_saveable && !in_batch {
                        self.queue.insert(s.key.clone());
                    }
                }
                if self.batch.is_none() && !self.queue.is_empty() && self.deadline.is_none() {
                    self.deadline = Some(now.saturating_add(self.quiet_ms));
                }
                tracing::info!(ticket = ticket.id, kind = ?ticket.kind, saved = ticket.sent.len(), "save succeeded");
                Ok(FlushReport {
                    kind: ticket.kind,
                    saved: ticket.sent.len(),
                    failed: 0,
                    error: None,
                })
            }
            Err(e) => {
                store.mark_failed(&ticket.sent);
                if ticket.kind == FlushKind::Continuous {
                    for s in &ticket.sent {
                        let in_batch = self
                            .batch
                            .as_ref()
                            .map(|b| b.touched.contains(&s.key))
                            .unwrap_or(false);
                        let still_dirty = store.get(&s.key).map(|c| c.dirty).unwrap_or(false);
                        if still_dirty && !in_batch {
                            self.queue.insert(s.key.clone());
                        }
                    }
                }
                tracing::warn!(ticket = ticket.id, kind = ?ticket.kind, cells = ticket.sent.len(), error = %e, "save failed");
                self.last_error = Some(e.message.clone());
                Ok(FlushReport {
                    kind: ticket.kind,
                    saved: 0,
                    failed: ticket.sent.len(),
                    error: Some(e.message),
                })
            }
        }
    }

    /// Drops staged entries the batch save carried unchanged; edits made while
    /// it was in flight stay staged for the next commit.
    fn settle_batch(&mut self, store: &mut CellStore, sent: &[SentScore], now: u64) {
        let Some(batch) = self.batch.as_mut() else {
            return;
        };
        for s in sent {
            let unchanged = store.get(&s.key).map(|c| c.revision == s.revision).unwrap_or(true);
            let same_score = batch.staged.get(&s.key).map(|c| c.score == s.score).unwrap_or(false);
            if unchanged && same_score {
                batch.staged.remove(&s.key);
            }
        }
        if batch.staged.is_empty() {
            self.close_batch(store, now);
        }
    }

    fn close_batch(&mut self, store: &mut CellStore, now: u64) {
        if let Some(batch) = self.batch.take() {
            store.clear_paste_markers(batch.touched.iter());
        }
        if !self.queue.is_empty() {
            self.deadline = Some(now.saturating_add(self.quiet_ms));
        }
    }

    /// Discards the batch locally. A batch save already in flight is not
    /// aborted; if it succeeds its values still become the committed ones.
    /// A cell an in-flight autosave is carrying goes back to that value rather
    /// than to the older durable one, so the save's outcome settles it.
    pub fn cancel_batch(&mut self, store: &mut CellStore, now: u64) -> Result<usize, SchedulerError> {
        let Some(batch) = self.batch.take() else {
            return Err(SchedulerError::NotInBatch);
        };
        let carried: Vec<&SentScore> = match &self.in_flight {
            Some(f) if f.kind == FlushKind::Continuous => f.sent.iter().collect(),
            _ => Vec::new(),
        };
        for key in &batch.touched {
            match carried.iter().find(|s| &s.key == key) {
                Some(s) => store.restore_in_flight(s),
                None => store.revert(key),
            }
        }
        self.last_error = None;
        if !self.queue.is_empty() {
            self.deadline = Some(now.saturating_add(self.quiet_ms));
        }
        tracing::info!(reverted = batch.touched.len(), "paste cancelled");
        Ok(batch.touched.len())
    }
}
