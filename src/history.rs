//! The process-wide history log.
//!
//! One `HistoryLog` exists per process and is shared by handle (`Arc`). All
//! state sits behind a single mutex; the art store is only touched while that
//! mutex is held (or through fresh, not-yet-referenced keys), so blob
//! reference counts and deletions stay consistent with the action list.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::action::{Action, ActionId, ShapeError};
use crate::art_store::{ArtRef, ArtStore, ArtStoreError};

pub const DEFAULT_MAX_HISTORY_ITEMS: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Action {0} not found")]
    NotFound(ActionId),
    #[error("Action {0} is already undone")]
    AlreadyUndone(ActionId),
    #[error("Action {0} is not undone")]
    NotUndone(ActionId),
    #[error("Action {0} is being replayed, try again")]
    Busy(ActionId),
    #[error("Invalid action: {0}")]
    InvalidAction(#[from] ShapeError),
    #[error("Duplicate action id {0}")]
    DuplicateId(ActionId),
    #[error(transparent)]
    Art(#[from] ArtStoreError),
}

/// Replay direction for undo/redo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Undo,
    Redo,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Undo => "undo",
            Self::Redo => "redo",
        }
    }

    /// The `is_undone` value after a replay in this direction.
    fn target_state(self) -> bool {
        matches!(self, Self::Undo)
    }
}

struct Entry {
    action: Action,
    in_flight: bool,
}

#[derive(Default)]
struct Inner {
    /// Oldest first.
    order: VecDeque<ActionId>,
    entries: HashMap<ActionId, Entry>,
    /// Number of recorded actions referencing each blob.
    art_refs: HashMap<ArtRef, usize>,
}

impl Inner {
    fn retain_refs(&mut self, action: &Action) {
        for r in action.art_refs() {
            *self.art_refs.entry(r).or_insert(0) += 1;
        }
    }

    /// Drop one reference per blob of `action`; returns blobs now unreferenced.
    fn release_refs(&mut self, action: &Action) -> Vec<ArtRef> {
        let mut orphaned = Vec::new();
        for r in action.art_refs() {
            if let Some(count) = self.art_refs.get_mut(&r) {
                *count -= 1;
                if *count == 0 {
                    self.art_refs.remove(&r);
                    orphaned.push(r);
                }
            }
        }
        orphaned
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| {
        tracing::warn!("[history] mutex poisoned, recovering");
        e.into_inner()
    })
}

/// Move `path` from under `old` to under `new`, component-wise.
fn rebase(path: &str, old: &Path, new: &Path) -> Option<String> {
    let rest = Path::new(path).strip_prefix(old).ok()?;
    let moved = if rest.as_os_str().is_empty() {
        new.to_path_buf()
    } else {
        new.join(rest)
    };
    Some(moved.to_string_lossy().to_string())
}

pub struct HistoryLog {
    inner: Mutex<Inner>,
    art: ArtStore,
    max_items: usize,
}

impl HistoryLog {
    pub fn new(art: ArtStore, max_items: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            art,
            max_items: max_items.max(1),
        }
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Validate and record `action`, evicting the oldest actions beyond the
    /// cap and deleting blobs no surviving action references.
    pub fn append(&self, action: Action) -> Result<ActionId, HistoryError> {
        if let Err(e) = action.validate() {
            debug_assert!(false, "malformed action: {e}");
            return Err(e.into());
        }

        let mut inner = lock_or_recover(&self.inner);
        let id = action.id.clone();
        if inner.entries.contains_key(&id) {
            return Err(HistoryError::DuplicateId(id));
        }

        inner.retain_refs(&action);
        tracing::debug!(
            "Recorded {} {id}: {}",
            action.action_type,
            action.description
        );
        inner.order.push_back(id.clone());
        inner.entries.insert(
            id.clone(),
            Entry {
                action,
                in_flight: false,
            },
        );

        let mut orphaned = Vec::new();
        while inner.order.len() > self.max_items {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            if let Some(evicted) = inner.entries.remove(&oldest) {
                tracing::debug!("Evicted history action {oldest}");
                orphaned.extend(inner.release_refs(&evicted.action));
            }
        }
        for r in &orphaned {
            self.art.delete(r);
        }

        Ok(id)
    }

    pub fn get(&self, id: &ActionId) -> Option<Action> {
        let inner = lock_or_recover(&self.inner);
        inner.entries.get(id).map(|e| e.action.clone())
    }

    /// All actions, most recent first.
    pub fn list_all(&self) -> Vec<Action> {
        let inner = lock_or_recover(&self.inner);
        inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.entries.get(id))
            .map(|e| e.action.clone())
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        lock_or_recover(&self.inner).order.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every action and the blobs they reference. Blobs stored for a
    /// mutation that has not been recorded yet are left alone.
    /// Returns the number of actions removed.
    pub fn clear(&self) -> usize {
        let mut inner = lock_or_recover(&self.inner);
        let cleared = std::mem::take(&mut *inner);
        for r in cleared.art_refs.keys() {
            self.art.delete(r);
        }
        cleared.order.len()
    }

    /// Replace an exact file path in every stored action.
    /// Returns the number of actions touched.
    pub fn rewrite_path(&self, old_path: &str, new_path: &str) -> usize {
        if old_path == new_path {
            return 0;
        }
        self.rewrite_with(|p| (p == old_path).then(|| new_path.to_string()))
    }

    /// Rebase every stored path under `old_folder` onto `new_folder`.
    /// Returns the number of actions touched.
    pub fn rewrite_prefix(&self, old_folder: &str, new_folder: &str) -> usize {
        let old = Path::new(old_folder);
        let new = Path::new(new_folder);
        if old == new {
            return 0;
        }
        self.rewrite_with(|p| rebase(p, old, new))
    }

    fn rewrite_with(&self, map_path: impl Fn(&str) -> Option<String>) -> usize {
        let mut inner = lock_or_recover(&self.inner);
        inner
            .entries
            .values_mut()
            .filter_map(|e| e.action.rewrite_paths(&map_path).then_some(()))
            .count()
    }

    /// Persist an art payload so an action can reference it.
    pub fn store_art(&self, bytes: &[u8]) -> Result<ArtRef, HistoryError> {
        Ok(self.art.store(bytes)?)
    }

    pub fn load_art(&self, art_ref: &ArtRef) -> Result<Option<Vec<u8>>, HistoryError> {
        let _inner = lock_or_recover(&self.inner);
        Ok(self.art.load(art_ref)?)
    }

    /// Delete blobs stored for a mutation that ended up not being recorded.
    /// Blobs referenced by any recorded action are kept.
    pub fn release_unrecorded<'a>(&self, refs: impl IntoIterator<Item = &'a ArtRef>) {
        let inner = lock_or_recover(&self.inner);
        for r in refs {
            if !inner.art_refs.contains_key(r) {
                self.art.delete(r);
            }
        }
    }

    /// Reserve `id` for a replay in `direction`.
    ///
    /// Atomically checks the undo state, sets the flag to its post-replay
    /// value and marks the action in flight. Returns a snapshot to replay.
    /// A second `begin_replay` in the same direction sees `AlreadyUndone` /
    /// `NotUndone`; the opposite direction sees `Busy` until
    /// [`finish_replay`](Self::finish_replay).
    pub fn begin_replay(&self, id: &ActionId, direction: Direction) -> Result<Action, HistoryError> {
        let mut inner = lock_or_recover(&self.inner);
        let entry = inner
            .entries
            .get_mut(id)
            .ok_or_else(|| HistoryError::NotFound(id.clone()))?;

        let target = direction.target_state();
        if entry.action.is_undone == target {
            return Err(match direction {
                Direction::Undo => HistoryError::AlreadyUndone(id.clone()),
                Direction::Redo => HistoryError::NotUndone(id.clone()),
            });
        }
        if entry.in_flight {
            return Err(HistoryError::Busy(id.clone()));
        }

        entry.in_flight = true;
        entry.action.is_undone = target;
        let mut snapshot = entry.action.clone();
        snapshot.is_undone = !target;
        Ok(snapshot)
    }

    /// Release the reservation taken by `begin_replay`. When nothing was
    /// applied the flag reverts. Returns the updated action, or `None` if it
    /// was evicted or cleared in the meantime.
    pub fn finish_replay(&self, id: &ActionId, direction: Direction, applied: bool) -> Option<Action> {
        let mut inner = lock_or_recover(&self.inner);
        let entry = inner.entries.get_mut(id)?;
        entry.in_flight = false;
        if !applied {
            entry.action.is_undone = !direction.target_state();
        }
        Some(entry.action.clone())
    }

    #[cfg(test)]
    pub(crate) fn art_store(&self) -> &ArtStore {
        &self.art
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(max: usize) -> HistoryLog {
        HistoryLog::new(ArtStore::temporary().unwrap(), max)
    }

    fn change(n: usize) -> Action {
        Action::metadata_change(&format!("/music/{n}.mp3"), "title", "old", &format!("new {n}"))
    }

    #[test]
    fn bounded_log_keeps_most_recent() {
        let log = log(5);
        let mut ids = Vec::new();
        for n in 0..8 {
            ids.push(log.append(change(n)).unwrap());
        }
        assert_eq!(log.len(), 5);

        let listed: Vec<ActionId> = log.list_all().into_iter().map(|a| a.id).collect();
        let expected: Vec<ActionId> = ids[3..].iter().rev().cloned().collect();
        assert_eq!(listed, expected);
        assert!(log.get(&ids[0]).is_none());
        assert!(log.get(&ids[7]).is_some());
    }

    #[test]
    fn evicted_blob_is_deleted() {
        let log = log(2);
        let blob = log.store_art(b"old art").unwrap();
        log.append(Action::album_art("/music/a.mp3", Some(blob.clone()), None))
            .unwrap();
        assert!(log.load_art(&blob).unwrap().is_some());

        log.append(change(1)).unwrap();
        log.append(change(2)).unwrap();
        assert_eq!(log.load_art(&blob).unwrap(), None);
    }

    #[test]
    fn shared_blob_survives_while_referenced() {
        let log = log(2);
        let blob = log.store_art(b"cover").unwrap();
        log.append(Action::album_art("/music/a.mp3", None, Some(blob.clone())))
            .unwrap();
        log.append(Action::album_art("/music/b.mp3", None, Some(blob.clone())))
            .unwrap();
        // Evicts the first; the second still references the blob.
        log.append(change(1)).unwrap();
        assert!(log.load_art(&blob).unwrap().is_some());

        log.append(change(2)).unwrap();
        assert_eq!(log.load_art(&blob).unwrap(), None);
    }

    #[test]
    fn clear_drops_actions_and_blobs() {
        let log = log(10);
        let blob = log.store_art(b"art").unwrap();
        log.append(Action::album_art("/music/a.mp3", None, Some(blob.clone())))
            .unwrap();
        log.append(change(1)).unwrap();

        assert_eq!(log.clear(), 2);
        assert!(log.is_empty());
        assert_eq!(log.load_art(&blob).unwrap(), None);
        assert_eq!(log.art_store().blob_count(), 0);
    }

    #[test]
    fn clear_keeps_blobs_of_unrecorded_mutations() {
        let log = log(10);
        let recorded = log.store_art(b"recorded").unwrap();
        log.append(Action::album_art("/music/a.mp3", Some(recorded.clone()), None))
            .unwrap();
        // Stored by a mutation still in progress.
        let pending = log.store_art(b"old cover").unwrap();

        assert_eq!(log.clear(), 1);
        assert_eq!(log.load_art(&recorded).unwrap(), None);

        log.append(Action::album_art("/music/b.mp3", Some(pending.clone()), None))
            .unwrap();
        assert_eq!(
            log.load_art(&pending).unwrap().as_deref(),
            Some(&b"old cover"[..])
        );
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let log = log(10);
        let action = change(1);
        log.append(action.clone()).unwrap();
        assert!(matches!(
            log.append(action),
            Err(HistoryError::DuplicateId(_))
        ));
    }

    #[test]
    fn rename_rewrites_files_and_value_keys() {
        let log = log(10);
        let id = log
            .append(Action::metadata_change("/music/old.mp3", "title", "A", "B"))
            .unwrap();
        assert_eq!(log.rewrite_path("/music/old.mp3", "/music/new.mp3"), 1);

        let action = log.get(&id).unwrap();
        assert_eq!(action.files, vec!["/music/new.mp3"]);
        assert!(action.old_values.contains_key("/music/new.mp3"));
        assert!(action.new_values.contains_key("/music/new.mp3"));
        assert!(!action.old_values.contains_key("/music/old.mp3"));
    }

    #[test]
    fn folder_move_rewrites_nested_paths() {
        let log = log(10);
        let id = log
            .append(Action::batch_metadata(
                "album",
                &[
                    ("/music/Album/track1.mp3".into(), "A".into(), "B".into()),
                    ("/music/Album/CD2/track2.mp3".into(), "A".into(), "B".into()),
                ],
            ))
            .unwrap();
        let untouched = log
            .append(Action::metadata_change("/music/Album2/x.mp3", "title", "", "x"))
            .unwrap();

        assert_eq!(log.rewrite_prefix("/music/Album", "/music/Moved/Album"), 1);

        let action = log.get(&id).unwrap();
        assert_eq!(
            action.files,
            vec![
                "/music/Moved/Album/track1.mp3",
                "/music/Moved/Album/CD2/track2.mp3"
            ]
        );
        assert!(action
            .new_values
            .contains_key("/music/Moved/Album/CD2/track2.mp3"));
        assert_eq!(log.get(&untouched).unwrap().files, vec!["/music/Album2/x.mp3"]);
    }

    #[test]
    fn replay_reservation_guards_state() {
        let log = log(10);
        let id = log.append(change(1)).unwrap();

        let snapshot = log.begin_replay(&id, Direction::Undo).unwrap();
        assert!(!snapshot.is_undone);
        // Concurrent undo observes the tentative flag.
        assert!(matches!(
            log.begin_replay(&id, Direction::Undo),
            Err(HistoryError::AlreadyUndone(_))
        ));
        // Opposite direction waits for the in-flight replay.
        assert!(matches!(
            log.begin_replay(&id, Direction::Redo),
            Err(HistoryError::Busy(_))
        ));

        let done = log.finish_replay(&id, Direction::Undo, true).unwrap();
        assert!(done.is_undone);
        assert!(log.begin_replay(&id, Direction::Redo).is_ok());
    }

    #[test]
    fn failed_replay_reverts_flag() {
        let log = log(10);
        let id = log.append(change(1)).unwrap();
        log.begin_replay(&id, Direction::Undo).unwrap();
        let action = log.finish_replay(&id, Direction::Undo, false).unwrap();
        assert!(!action.is_undone);
        assert!(log.begin_replay(&id, Direction::Undo).is_ok());
    }

    #[test]
    fn begin_replay_unknown_id() {
        let log = log(10);
        assert!(matches!(
            log.begin_replay(&ActionId::from("nope"), Direction::Undo),
            Err(HistoryError::NotFound(_))
        ));
    }

    #[test]
    fn release_unrecorded_keeps_referenced_blobs() {
        let log = log(10);
        let kept = log.store_art(b"kept").unwrap();
        let dropped = log.store_art(b"dropped").unwrap();
        log.append(Action::album_art("/music/a.mp3", None, Some(kept.clone())))
            .unwrap();

        log.release_unrecorded([&kept, &dropped]);
        assert!(log.load_art(&kept).unwrap().is_some());
        assert_eq!(log.load_art(&dropped).unwrap(), None);
    }
}
