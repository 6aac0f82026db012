//! Debounced snapshot saves
//!
//! Rapid mutations are coalesced into one write after a quiet period. The
//! scheduler is a small state machine:
//!
//! - `Idle`: nothing to write
//! - `Pending`: a snapshot waits for its quiet period to end
//! - `Flushing`: a snapshot is being written
//!
//! At most one timer is armed. `schedule` aborts the previous timer and arms
//! a new one for its generation; `flush` aborts the armed timer and writes
//! immediately. A timer claims itself under the state lock before writing,
//! so it is never aborted mid-write. Writes are serialized and each one takes
//! the newest pending snapshot, so the last scheduled state is the last one
//! written.
//!
//! Slots are independent: a write that fails for one slot never prevents
//! staging or writing the other.

use crate::{Error, Result};
use p21_core::{Slot, Snapshot};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default quiet period before a scheduled snapshot is written
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Destination of scheduled snapshot writes
pub trait SnapshotWriter: Send + Sync + 'static {
    /// Durably write `snapshot` to `slot`
    fn write_snapshot(&self, slot: Slot, snapshot: &Snapshot) -> Result<()>;
}

/// Observable scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Nothing to write
    Idle,
    /// A snapshot for this slot is waiting
    Pending(Slot),
    /// A write is in progress
    Flushing,
}

struct PendingSave {
    slot: Slot,
    snapshot: Snapshot,
    generation: u64,
}

enum State {
    Idle,
    Pending(PendingSave),
    Flushing,
}

struct Shared {
    state: State,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    writer: Arc<dyn SnapshotWriter>,
    debounce: Duration,
    shared: Mutex<Shared>,
    write_gate: tokio::sync::Mutex<()>,
}

/// Coalescing save scheduler
///
/// Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct SaveScheduler {
    inner: Arc<Inner>,
}

impl SaveScheduler {
    /// Create a scheduler writing through `writer` after `debounce` of quiet
    pub fn new(writer: Arc<dyn SnapshotWriter>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                writer,
                debounce,
                shared: Mutex::new(Shared {
                    state: State::Idle,
                    generation: 0,
                    timer: None,
                }),
                write_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Quiet period
    pub fn debounce(&self) -> Duration {
        self.inner.debounce
    }

    /// Current state
    pub fn state(&self) -> SchedulerState {
        match &self.inner.shared.lock().state {
            State::Idle => SchedulerState::Idle,
            State::Pending(pending) => SchedulerState::Pending(pending.slot),
            State::Flushing => SchedulerState::Flushing,
        }
    }

    /// Queue `snapshot` for `slot`, replacing any pending snapshot
    ///
    /// A snapshot pending for a different slot is written first. If that
    /// write fails the older snapshot is dropped with a warning and
    /// `snapshot` is queued anyway.
    pub async fn schedule(&self, slot: Slot, snapshot: Snapshot) -> Result<()> {
        self.release_other_slot(slot).await;
        self.stage(slot, snapshot, true);
        Ok(())
    }

    /// Write the pending snapshot now, bypassing the quiet period
    pub async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }

    /// Replace the pending snapshot and write it immediately
    pub async fn save_now(&self, slot: Slot, snapshot: Snapshot) -> Result<()> {
        self.release_other_slot(slot).await;
        self.stage(slot, snapshot, false);
        self.inner.flush().await
    }

    async fn release_other_slot(&self, slot: Slot) {
        let other_slot_pending = matches!(
            &self.inner.shared.lock().state,
            State::Pending(pending) if pending.slot != slot
        );
        if other_slot_pending {
            tracing::debug!("Slot switch to {}; flushing pending save", slot);
            if let Err(e) = self.inner.flush().await {
                tracing::warn!("Pending save failed before switch to {}: {} ({})", slot, e, e.category());
            }
        }
    }

    fn stage(&self, slot: Slot, snapshot: Snapshot, arm: bool) {
        let mut shared = self.inner.shared.lock();
        if let State::Pending(previous) = &shared.state {
            if previous.slot != slot {
                tracing::warn!("Dropping unsaved {} snapshot in favour of {}", previous.slot, slot);
            }
        }

        shared.generation += 1;
        let generation = shared.generation;
        shared.state = State::Pending(PendingSave {
            slot,
            snapshot,
            generation,
        });

        if let Some(previous) = shared.timer.take() {
            previous.abort();
        }
        if arm {
            let inner = Arc::clone(&self.inner);
            shared.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(inner.debounce).await;
                if inner.claim_timer(generation) {
                    if let Err(e) = inner.flush().await {
                        tracing::warn!("Debounced save failed: {} ({})", e, e.category());
                    }
                }
            }));
        }
    }

    #[cfg(test)]
    fn timer_armed(&self) -> bool {
        self.inner.shared.lock().timer.is_some()
    }
}

impl Inner {
    /// Detach the armed timer if `generation` is still the pending one
    fn claim_timer(&self, generation: u64) -> bool {
        let mut shared = self.shared.lock();
        let current = matches!(
            &shared.state,
            State::Pending(pending) if pending.generation == generation
        );
        if current {
            shared.timer = None;
        }
        current
    }

    async fn flush(&self) -> Result<()> {
        let armed = self.shared.lock().timer.take();
        if let Some(timer) = armed {
            timer.abort();
        }

        let _gate = self.write_gate.lock().await;

        let pending = {
            let mut shared = self.shared.lock();
            match std::mem::replace(&mut shared.state, State::Flushing) {
                State::Pending(pending) => pending,
                other => {
                    shared.state = other;
                    return Ok(());
                }
            }
        };

        let writer = Arc::clone(&self.writer);
        let joined = tokio::task::spawn_blocking(move || {
            let result = writer.write_snapshot(pending.slot, &pending.snapshot);
            (pending, result)
        })
        .await;

        let mut shared = self.shared.lock();
        let (pending, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                if matches!(shared.state, State::Flushing) {
                    shared.state = State::Idle;
                }
                return Err(Error::Io(io::Error::other(e)));
            }
        };

        match result {
            Ok(()) => {
                if matches!(shared.state, State::Flushing) {
                    shared.state = State::Idle;
                }
                Ok(())
            }
            Err(e) => {
                // keep the unwritten snapshot unless a newer one replaced it
                if matches!(shared.state, State::Flushing) {
                    shared.state = State::Pending(pending);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p21_core::Habit;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingWriter {
        writes: Mutex<Vec<(Slot, Snapshot)>>,
        failures_left: AtomicUsize,
        broken_slot: Option<Slot>,
    }

    impl RecordingWriter {
        fn broken(slot: Slot) -> Self {
            Self {
                broken_slot: Some(slot),
                ..Self::default()
            }
        }

        fn failing(times: usize) -> Self {
            Self {
                failures_left: AtomicUsize::new(times),
                ..Self::default()
            }
        }

        fn writes(&self) -> Vec<(Slot, Snapshot)> {
            self.writes.lock().clone()
        }
    }

    impl SnapshotWriter for RecordingWriter {
        fn write_snapshot(&self, slot: Slot, snapshot: &Snapshot) -> Result<()> {
            if self.broken_slot == Some(slot) {
                return Err(Error::StorageUnavailable(format!("{} broken", slot)));
            }
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::StorageUnavailable("disk full".to_string()));
            }
            self.writes.lock().push((slot, snapshot.clone()));
            Ok(())
        }
    }

    fn snapshot(count: u32) -> Snapshot {
        Snapshot {
            habits: vec![Habit {
                id: "h1".to_string(),
                name: "Water".to_string(),
                description: String::new(),
                color: "#0ea5e9".to_string(),
                is_priority: false,
                daily_target: count,
                category: None,
                created_at: 0,
                archived: false,
            }],
            ..Snapshot::default()
        }
    }

    const QUIET: Duration = Duration::from_millis(50);
    const SETTLE: Duration = Duration::from_millis(300);

    #[tokio::test]
    async fn test_rapid_schedules_coalesce_to_last() {
        let writer = Arc::new(RecordingWriter::default());
        let scheduler = SaveScheduler::new(writer.clone(), QUIET);

        for count in 1..=5 {
            scheduler.schedule(Slot::Live, snapshot(count)).await.unwrap();
        }
        assert_eq!(scheduler.state(), SchedulerState::Pending(Slot::Live));

        tokio::time::sleep(SETTLE).await;
        let writes = writer.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1, snapshot(5));
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_flush_bypasses_debounce() {
        let writer = Arc::new(RecordingWriter::default());
        let scheduler = SaveScheduler::new(writer.clone(), Duration::from_secs(60));

        scheduler.schedule(Slot::Live, snapshot(1)).await.unwrap();
        assert!(writer.writes().is_empty());

        scheduler.flush().await.unwrap();
        assert_eq!(writer.writes().len(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_flush_cancels_armed_timer() {
        let writer = Arc::new(RecordingWriter::default());
        let scheduler = SaveScheduler::new(writer.clone(), QUIET);

        scheduler.schedule(Slot::Live, snapshot(1)).await.unwrap();
        scheduler.flush().await.unwrap();
        tokio::time::sleep(SETTLE).await;

        assert_eq!(writer.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_flush_when_idle_is_noop() {
        let writer = Arc::new(RecordingWriter::default());
        let scheduler = SaveScheduler::new(writer.clone(), QUIET);
        scheduler.flush().await.unwrap();
        assert!(writer.writes().is_empty());
    }

    #[tokio::test]
    async fn test_slot_switch_flushes_previous_slot() {
        let writer = Arc::new(RecordingWriter::default());
        let scheduler = SaveScheduler::new(writer.clone(), QUIET);

        scheduler.schedule(Slot::Demo, snapshot(1)).await.unwrap();
        scheduler.schedule(Slot::Live, snapshot(2)).await.unwrap();

        let writes = writer.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0], (Slot::Demo, snapshot(1)));

        tokio::time::sleep(SETTLE).await;
        let writes = writer.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1], (Slot::Live, snapshot(2)));
    }

    #[tokio::test]
    async fn test_save_now_writes_latest() {
        let writer = Arc::new(RecordingWriter::default());
        let scheduler = SaveScheduler::new(writer.clone(), Duration::from_secs(60));

        scheduler.schedule(Slot::Live, snapshot(1)).await.unwrap();
        scheduler.save_now(Slot::Live, snapshot(2)).await.unwrap();

        assert_eq!(writer.writes(), vec![(Slot::Live, snapshot(2))]);
    }

    #[tokio::test]
    async fn test_failed_write_stays_pending() {
        let writer = Arc::new(RecordingWriter::failing(1));
        let scheduler = SaveScheduler::new(writer.clone(), Duration::from_secs(60));

        scheduler.schedule(Slot::Live, snapshot(3)).await.unwrap();
        assert!(matches!(
            scheduler.flush().await,
            Err(Error::StorageUnavailable(_))
        ));
        assert_eq!(scheduler.state(), SchedulerState::Pending(Slot::Live));

        scheduler.flush().await.unwrap();
        assert_eq!(writer.writes(), vec![(Slot::Live, snapshot(3))]);
    }

    #[tokio::test]
    async fn test_failed_slot_does_not_block_other_slot() {
        let writer = Arc::new(RecordingWriter::broken(Slot::Demo));
        let scheduler = SaveScheduler::new(writer.clone(), Duration::from_secs(60));

        scheduler.schedule(Slot::Demo, snapshot(1)).await.unwrap();
        assert!(scheduler.flush().await.is_err());
        assert_eq!(scheduler.state(), SchedulerState::Pending(Slot::Demo));

        scheduler.save_now(Slot::Live, snapshot(2)).await.unwrap();
        assert_eq!(writer.writes(), vec![(Slot::Live, snapshot(2))]);
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        scheduler.schedule(Slot::Demo, snapshot(3)).await.unwrap();
        scheduler.schedule(Slot::Live, snapshot(4)).await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Pending(Slot::Live));

        scheduler.flush().await.unwrap();
        assert_eq!(
            writer.writes(),
            vec![(Slot::Live, snapshot(2)), (Slot::Live, snapshot(4))]
        );
    }

    #[tokio::test]
    async fn test_single_timer_armed() {
        let writer = Arc::new(RecordingWriter::default());
        let scheduler = SaveScheduler::new(writer.clone(), QUIET);
        assert!(!scheduler.timer_armed());

        for count in 1..=100 {
            scheduler.schedule(Slot::Live, snapshot(count)).await.unwrap();
        }
        assert!(scheduler.timer_armed());

        scheduler.flush().await.unwrap();
        assert!(!scheduler.timer_armed());
        assert_eq!(writer.writes(), vec![(Slot::Live, snapshot(100))]);

        scheduler.schedule(Slot::Live, snapshot(101)).await.unwrap();
        tokio::time::sleep(SETTLE).await;
        assert!(!scheduler.timer_armed());
        assert_eq!(writer.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_save_now_disarms_timer() {
        let writer = Arc::new(RecordingWriter::default());
        let scheduler = SaveScheduler::new(writer.clone(), QUIET);

        scheduler.schedule(Slot::Live, snapshot(1)).await.unwrap();
        scheduler.save_now(Slot::Live, snapshot(2)).await.unwrap();
        assert!(!scheduler.timer_armed());

        tokio::time::sleep(SETTLE).await;
        assert_eq!(writer.writes(), vec![(Slot::Live, snapshot(2))]);
    }
}
