// State management module
//
// This module provides the StateManager which wraps LibraryState with thread-safe
// access using Arc<RwLock<T>> and emits change events for front ends.

use crate::models::LibraryState;
use crate::services::reconcile::RefreshResult;
use chrono::Utc;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Change events emitted when library state is modified
///
/// These events notify interested parties (a CLI, a GUI, the reactive
/// refresher's callers) about library activity without polling.
#[derive(Clone, Debug, PartialEq)]
pub enum LibraryChange {
    /// A full scan has started
    ScanStarted,

    /// A full scan has finished
    ScanFinished { objects: usize, mods: usize, errors: usize },

    /// A refresh pass has finished
    RefreshFinished {
        new: usize,
        untracked: usize,
        duplicates: usize,
        errors: usize,
    },

    /// Mods were moved from one object to another
    ModsTransferred {
        from: String,
        to: String,
        count: usize,
    },

    /// Export progress, in percent
    ExportProgress { percent: u8 },

    /// An export has finished
    ExportFinished { exported: usize, errors: usize },

    /// A whole object folder was enabled or disabled
    ObjectToggled { object: String, enabled: bool },

    /// Current operation has changed
    OperationChanged { operation: String },
}

/// Thread-safe library state with event emission
///
/// - Provides thread-safe access to [`LibraryState`] via `Arc<RwLock<T>>`
/// - Detects state changes and emits [`LibraryChange`] events
/// - Supports subscribing to changes via tokio broadcast channels
///
/// Always mutate through [`update()`](Self::update) or the convenience
/// methods so events are emitted.
pub struct StateManager {
    state: Arc<RwLock<LibraryState>>,

    /// Multiple subscribers can listen for changes
    state_tx: broadcast::Sender<LibraryChange>,
}

impl StateManager {
    /// Create a new StateManager with a broadcast buffer of 100 events
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(LibraryState::default())),
            state_tx,
        }
    }

    /// Clone of the current state, safe to use without holding locks
    pub fn snapshot(&self) -> LibraryState {
        self.state.read().unwrap().clone()
    }

    /// Execute a function with read access to the state
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&LibraryState) -> R,
    {
        let state = self.state.read().unwrap();
        f(&state)
    }

    /// Update the state and emit change events
    ///
    /// Returns the events that were emitted.
    pub fn update<F>(&self, update_fn: F) -> Vec<LibraryChange>
    where
        F: FnOnce(&mut LibraryState),
    {
        let mut state = self.state.write().unwrap();
        let old_state = state.clone();

        update_fn(&mut state);

        let changes = self.detect_changes(&old_state, &state);
        for change in &changes {
            // Ignore send errors - it's OK if no one is listening
            let _ = self.state_tx.send(change.clone());
        }
        changes
    }

    /// Send an event that is not derived from a state diff
    pub fn emit(&self, change: LibraryChange) {
        let _ = self.state_tx.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LibraryChange> {
        self.state_tx.subscribe()
    }

    fn detect_changes(&self, old: &LibraryState, new: &LibraryState) -> Vec<LibraryChange> {
        let mut changes = Vec::new();

        if old.is_scanning != new.is_scanning {
            if new.is_scanning {
                changes.push(LibraryChange::ScanStarted);
            } else {
                changes.push(LibraryChange::ScanFinished {
                    objects: new.object_count,
                    mods: new.tracked_mods,
                    errors: new.last_errors,
                });
            }
        }

        if old.is_refreshing && !new.is_refreshing {
            changes.push(LibraryChange::RefreshFinished {
                new: new.last_new,
                untracked: new.last_untracked,
                duplicates: new.last_duplicates,
                errors: new.last_errors,
            });
        }

        if new.is_exporting && old.export_percent != new.export_percent {
            changes.push(LibraryChange::ExportProgress {
                percent: new.export_percent,
            });
        }

        if old.current_operation != new.current_operation {
            changes.push(LibraryChange::OperationChanged {
                operation: new.current_operation.clone(),
            });
        }

        changes
    }

    // Convenience methods for common state updates

    pub fn start_scan(&self) -> Vec<LibraryChange> {
        self.update(|state| {
            state.is_scanning = true;
            state.current_operation = "Scanning mod library".to_string();
        })
    }

    pub fn finish_scan(&self, objects: usize, mods: usize, errors: usize) -> Vec<LibraryChange> {
        self.update(|state| {
            state.is_scanning = false;
            state.object_count = objects;
            state.tracked_mods = mods;
            state.last_errors = errors;
            state.current_operation.clear();
        })
    }

    pub fn start_refresh(&self, target: Option<&str>) -> Vec<LibraryChange> {
        self.update(|state| {
            state.is_refreshing = true;
            state.current_operation = match target {
                Some(object) => format!("Refreshing {}", object),
                None => "Refreshing all objects".to_string(),
            };
        })
    }

    /// Record a refresh outcome along with the current library size
    pub fn finish_refresh(&self, result: &RefreshResult, tracked_mods: usize) -> Vec<LibraryChange> {
        self.update(|state| {
            state.is_refreshing = false;
            state.tracked_mods = tracked_mods;
            state.last_refresh = Some(Utc::now());
            state.last_new = result.new_handles.len();
            state.last_untracked = result.untracked_paths.len();
            state.last_duplicates = result.duplicate_renames.len();
            state.last_errors = result.errors.len();
            state.current_operation.clear();
        })
    }

    pub fn start_export(&self) -> Vec<LibraryChange> {
        self.update(|state| {
            state.is_exporting = true;
            state.export_percent = 0;
            state.current_operation = "Exporting mods".to_string();
        })
    }

    pub fn export_progress(&self, percent: u8) -> Vec<LibraryChange> {
        self.update(|state| state.export_percent = percent)
    }

    pub fn finish_export(&self, exported: usize, errors: usize) -> Vec<LibraryChange> {
        let mut changes = self.update(|state| {
            state.is_exporting = false;
            state.current_operation.clear();
        });
        let event = LibraryChange::ExportFinished { exported, errors };
        self.emit(event.clone());
        changes.push(event);
        changes
    }

    pub fn set_object_count(&self, objects: usize) -> Vec<LibraryChange> {
        self.update(|state| state.object_count = objects)
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for StateManager {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: self.state_tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn test_new_state_manager() {
        let manager = StateManager::new();
        let state = manager.snapshot();
        assert!(!state.is_busy());
        assert_eq!(state.tracked_mods, 0);
    }

    #[test]
    fn test_scan_events() {
        let manager = StateManager::new();
        let changes = manager.start_scan();
        assert_eq!(changes[0], LibraryChange::ScanStarted);

        let changes = manager.finish_scan(3, 12, 1);
        assert_eq!(
            changes[0],
            LibraryChange::ScanFinished { objects: 3, mods: 12, errors: 1 }
        );
        assert!(!manager.snapshot().is_scanning);
    }

    #[test]
    fn test_refresh_finished_reports_counts() {
        let manager = StateManager::new();
        manager.start_refresh(Some("hero"));

        let result = RefreshResult {
            untracked_paths: vec![Utf8PathBuf::from("/mods/a")],
            ..Default::default()
        };
        let changes = manager.finish_refresh(&result, 4);

        assert!(changes.contains(&LibraryChange::RefreshFinished {
            new: 0,
            untracked: 1,
            duplicates: 0,
            errors: 0,
        }));
        let state = manager.snapshot();
        assert_eq!(state.tracked_mods, 4);
        assert!(state.last_refresh.is_some());
    }

    #[test]
    fn test_export_progress_only_while_exporting() {
        let manager = StateManager::new();
        assert!(manager.export_progress(10).is_empty());

        manager.start_export();
        let changes = manager.export_progress(50);
        assert_eq!(changes, vec![LibraryChange::ExportProgress { percent: 50 }]);

        let changes = manager.finish_export(2, 0);
        assert!(changes.contains(&LibraryChange::ExportFinished { exported: 2, errors: 0 }));
    }

    #[test]
    fn test_subscribe_to_changes() {
        let manager = StateManager::new();
        let mut rx = manager.subscribe();

        manager.emit(LibraryChange::ObjectToggled {
            object: "hero".to_string(),
            enabled: false,
        });

        assert!(matches!(
            rx.try_recv().unwrap(),
            LibraryChange::ObjectToggled { enabled: false, .. }
        ));
    }

    #[test]
    fn test_clone_shares_state() {
        let manager1 = StateManager::new();
        let manager2 = manager1.clone();
        manager1.set_object_count(5);
        assert_eq!(manager2.read(|s| s.object_count), 5);
    }
}
