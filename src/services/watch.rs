//! Filesystem change feed and the scoped watch-suspension guard.
//!
//! External edits (file explorer, the loader) arrive as [`FsChange`] messages
//! on a [`ChangeFeed`]. The consumer refreshes the affected object unless a
//! [`WatchSuspension`] for that object is alive. Operations that perform a
//! sequence of renames and moves hold a suspension so the sequence looks
//! atomic to the feed.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::{LibraryError, Result};

/// Per-object suspension counter shared between an index and its guards.
#[derive(Debug, Default)]
pub struct WatchGate {
    holders: AtomicUsize,
}

impl WatchGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_suspended(&self) -> bool {
        self.holders.load(Ordering::Acquire) > 0
    }

    pub fn suspend(self: &Arc<Self>) -> WatchSuspension {
        self.holders.fetch_add(1, Ordering::AcqRel);
        WatchSuspension {
            gate: Arc::clone(self),
        }
    }
}

/// While alive, change notifications for the object's tree do not trigger a refresh.
#[derive(Debug)]
#[must_use = "the suspension ends as soon as the guard is dropped"]
pub struct WatchSuspension {
    gate: Arc<WatchGate>,
}

impl Drop for WatchSuspension {
    fn drop(&mut self) {
        self.gate.holders.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A path under the mods root changed on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsChange {
    pub path: Utf8PathBuf,
}

/// Sending half of the change feed. Cloneable; any producer may push events.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: mpsc::UnboundedSender<FsChange>,
}

impl ChangeFeed {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<FsChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the consumer has gone away.
    pub fn notify(&self, path: impl Into<Utf8PathBuf>) -> bool {
        self.tx.send(FsChange { path: path.into() }).is_ok()
    }
}

/// Forwards OS filesystem notifications under `root` into a [`ChangeFeed`].
///
/// Dropping the watcher stops the notifications.
pub struct FsWatcher {
    _watcher: RecommendedWatcher,
}

impl FsWatcher {
    pub fn start(root: &Utf8Path, feed: ChangeFeed) -> Result<Self> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    for path in event.paths {
                        match Utf8PathBuf::from_path_buf(path) {
                            Ok(path) => {
                                if !feed.notify(path) {
                                    return;
                                }
                            }
                            Err(path) => {
                                tracing::debug!("Ignoring non UTF-8 change path {:?}", path)
                            }
                        }
                    }
                }
                Err(e) => tracing::warn!("Filesystem watch error: {}", e),
            }
        })
        .map_err(|e| LibraryError::partial_io(root, std::io::Error::other(e)))?;

        watcher
            .watch(root.as_std_path(), RecursiveMode::Recursive)
            .map_err(|e| LibraryError::partial_io(root, std::io::Error::other(e)))?;

        tracing::info!("Watching mods root {}", root);
        Ok(Self { _watcher: watcher })
    }
}
