//! The history engine handle consumed by the request layer.
//!
//! `Engine` is cheap to clone: it wraps the one shared [`HistoryLog`] and the
//! tag codec. Every method is synchronous; async callers move a clone into
//! `spawn_blocking`.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::action::{Action, ActionId, ActionSummary};
use crate::art_store::ArtRef;
use crate::batch::{self, BatchOutcome};
use crate::history::{Direction, HistoryError, HistoryLog};
use crate::replay::{self, ReplayReport};
use crate::tags::TagCodec;

#[derive(Clone)]
pub struct Engine {
    log: Arc<HistoryLog>,
    codec: Arc<dyn TagCodec>,
    show_hidden: bool,
}

impl Engine {
    pub fn new(log: Arc<HistoryLog>, codec: Arc<dyn TagCodec>, show_hidden: bool) -> Self {
        Self {
            log,
            codec,
            show_hidden,
        }
    }

    pub fn codec(&self) -> &dyn TagCodec {
        self.codec.as_ref()
    }

    pub fn show_hidden(&self) -> bool {
        self.show_hidden
    }

    pub fn max_history_items(&self) -> usize {
        self.log.max_items()
    }

    pub fn record_action(&self, action: Action) -> Result<ActionId, HistoryError> {
        let action_type = action.action_type;
        let file_count = action.files.len();
        let id = self.log.append(action)?;
        tracing::info!("Recorded {action_type} {id} ({file_count} files)");
        Ok(id)
    }

    /// Most recent first.
    pub fn list_actions(&self) -> Vec<ActionSummary> {
        self.log.list_all().iter().map(Action::summary).collect()
    }

    pub fn get_action_details(&self, id: &ActionId) -> Result<Action, HistoryError> {
        self.log
            .get(id)
            .ok_or_else(|| HistoryError::NotFound(id.clone()))
    }

    pub fn undo(&self, id: &ActionId) -> Result<ReplayReport, HistoryError> {
        replay::replay(&self.log, self.codec.as_ref(), id, Direction::Undo)
    }

    pub fn redo(&self, id: &ActionId) -> Result<ReplayReport, HistoryError> {
        replay::replay(&self.log, self.codec.as_ref(), id, Direction::Redo)
    }

    pub fn clear_history(&self) -> usize {
        let removed = self.log.clear();
        tracing::info!("Cleared history ({removed} actions)");
        removed
    }

    /// Point history at a renamed file. Returns the number of actions touched.
    pub fn notify_path_renamed(&self, old_path: &Path, new_path: &Path) -> usize {
        let touched = self.log.rewrite_path(&old_path.to_string_lossy(), &new_path.to_string_lossy());
        if touched > 0 {
            tracing::info!(
                "Rewrote {touched} actions: {} -> {}",
                old_path.display(),
                new_path.display()
            );
        }
        touched
    }

    /// Point history at a moved folder, including nested files.
    pub fn notify_folder_moved(&self, old_folder: &Path, new_folder: &Path) -> usize {
        let touched = self
            .log
            .rewrite_prefix(&old_folder.to_string_lossy(), &new_folder.to_string_lossy());
        if touched > 0 {
            tracing::info!(
                "Rewrote {touched} actions: {}/ -> {}/",
                old_folder.display(),
                new_folder.display()
            );
        }
        touched
    }

    pub fn run_batch_mutation<F, E>(
        &self,
        folder: &Path,
        label: &str,
        mutate: F,
    ) -> Result<BatchOutcome, String>
    where
        F: FnMut(&str) -> Result<(), E>,
        E: fmt::Display,
    {
        batch::run_batch_mutation(folder, self.show_hidden, label, mutate)
    }

    pub fn store_art(&self, bytes: &[u8]) -> Result<ArtRef, HistoryError> {
        self.log.store_art(bytes)
    }

    /// Drop blobs stored for a mutation that recorded nothing.
    pub fn release_unrecorded<'a>(&self, refs: impl IntoIterator<Item = &'a ArtRef>) {
        self.log.release_unrecorded(refs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::art_store::ArtStore;
    use crate::batch::BatchStatus;
    use crate::tags::testing::MemoryCodec;

    fn engine_with(codec: Arc<MemoryCodec>, max: usize) -> Engine {
        let log = Arc::new(HistoryLog::new(ArtStore::temporary().unwrap(), max));
        Engine::new(log, codec, false)
    }

    #[test]
    fn renamed_file_can_still_be_undone() {
        let codec = Arc::new(MemoryCodec::new());
        let engine = engine_with(codec.clone(), 10);
        let id = engine
            .record_action(Action::metadata_change("/music/old.mp3", "title", "Alice", "Bob"))
            .unwrap();

        engine.notify_path_renamed(Path::new("/music/old.mp3"), Path::new("/music/new.mp3"));
        let action = engine.get_action_details(&id).unwrap();
        assert_eq!(action.files, vec!["/music/new.mp3"]);
        assert!(action.old_values.contains_key("/music/new.mp3"));
        assert!(action.new_values.contains_key("/music/new.mp3"));

        engine.undo(&id).unwrap();
        assert_eq!(codec.get("/music/new.mp3", "title").as_deref(), Some("Alice"));
        assert_eq!(codec.get("/music/old.mp3", "title"), None);
    }

    #[test]
    fn folder_move_rewrites_prefix() {
        let engine = engine_with(Arc::new(MemoryCodec::new()), 10);
        let id = engine
            .record_action(Action::metadata_change(
                "/music/Album/track1.mp3",
                "album",
                "A",
                "B",
            ))
            .unwrap();

        assert_eq!(
            engine.notify_folder_moved(Path::new("/music/Album"), Path::new("/music/Moved/Album")),
            1
        );
        assert_eq!(
            engine.get_action_details(&id).unwrap().files,
            vec!["/music/Moved/Album/track1.mp3"]
        );
    }

    #[test]
    fn listing_is_most_recent_first_and_bounded() {
        let engine = engine_with(Arc::new(MemoryCodec::new()), 3);
        for n in 0..5 {
            engine
                .record_action(Action::metadata_change(
                    &format!("/music/{n}.mp3"),
                    "title",
                    "",
                    "x",
                ))
                .unwrap();
        }
        let listed = engine.list_actions();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].description, "Changed title in \"4.mp3\"");
        assert_eq!(listed[2].description, "Changed title in \"2.mp3\"");
    }

    #[test]
    fn racing_undos_apply_once() {
        let codec = Arc::new(MemoryCodec::new());
        let engine = engine_with(codec.clone(), 10);
        codec.set("/music/a.mp3", "title", "Bob");
        let id = engine
            .record_action(Action::metadata_change("/music/a.mp3", "title", "Alice", "Bob"))
            .unwrap();

        for _ in 0..50 {
            for direction in [Direction::Undo, Direction::Redo] {
                let barrier = std::sync::Barrier::new(2);
                let results: Vec<_> = std::thread::scope(|s| {
                    let handles: Vec<_> = (0..2)
                        .map(|_| {
                            s.spawn(|| {
                                barrier.wait();
                                match direction {
                                    Direction::Undo => engine.undo(&id),
                                    Direction::Redo => engine.redo(&id),
                                }
                            })
                        })
                        .collect();
                    handles.into_iter().map(|h| h.join().unwrap()).collect()
                });

                assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
                let rejected = results.iter().filter(|r| match direction {
                    Direction::Undo => matches!(r, Err(HistoryError::AlreadyUndone(_))),
                    Direction::Redo => matches!(r, Err(HistoryError::NotUndone(_))),
                });
                assert_eq!(rejected.count(), 1);
            }
        }

        assert!(!engine.get_action_details(&id).unwrap().is_undone);
        assert_eq!(codec.get("/music/a.mp3", "title").as_deref(), Some("Bob"));
    }

    #[test]
    fn unknown_id_is_not_found() {
        let engine = engine_with(Arc::new(MemoryCodec::new()), 10);
        let missing = ActionId::from("missing");
        assert!(matches!(
            engine.get_action_details(&missing),
            Err(HistoryError::NotFound(_))
        ));
        assert!(matches!(engine.undo(&missing), Err(HistoryError::NotFound(_))));
    }

    #[test]
    fn zero_match_batch_is_success() {
        let engine = engine_with(Arc::new(MemoryCodec::new()), 10);
        let dir = tempfile::tempdir().unwrap();
        let outcome = engine
            .run_batch_mutation(dir.path(), "updated", |_| Err::<(), _>("never called"))
            .unwrap();
        assert_eq!(outcome.status, BatchStatus::Success);
        assert_eq!(outcome.files_updated, 0);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn clear_history_empties_log() {
        let engine = engine_with(Arc::new(MemoryCodec::new()), 10);
        engine
            .record_action(Action::delete_field("/music/a.flac", "genre", "House"))
            .unwrap();
        assert_eq!(engine.clear_history(), 1);
        assert!(engine.list_actions().is_empty());
    }
}
