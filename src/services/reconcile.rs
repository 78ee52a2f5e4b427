//! Incremental refresh: diff one [`ModIndex`] against the mod tree on disk.
//!
//! For each mod folder found on disk, in name order:
//!
//! 1. a tracked entry with the exact same path is refreshed in place;
//! 2. a tracked entry whose toggled-prefix twin is this folder, while the
//!    entry's own folder still exists, means an interrupted enable/disable left
//!    a stale copy behind: the copy is renamed to a free name and tracked separately;
//! 3. a tracked entry whose toggled-prefix twin is this folder, and whose own
//!    folder is gone, was toggled out-of-band: the entry follows the folder;
//! 4. a folder carrying the identity of a tracked entry whose own folder is
//!    gone was moved out-of-band (e.g. to another skin folder) and keeps it;
//! 5. anything else is new and gets tracked with a library-unique identity.
//!
//! Entries matched by nothing are untracked; their files are not touched.

use std::collections::HashSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::{LibraryError, Result};
use crate::models::{ModHandle, ModId};
use crate::services::mod_index::ModIndex;
use crate::services::sanitize::{NameSanitizer, sibling_names};
use crate::services::skin_folders::list_dirs;

/// A per-folder failure captured during a bulk pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshError {
    pub path: Utf8PathBuf,
    pub message: String,
}

impl RefreshError {
    pub fn new(path: impl Into<Utf8PathBuf>, error: &LibraryError) -> Self {
        Self {
            path: path.into(),
            message: error.to_string(),
        }
    }
}

/// A stale duplicate folder that was renamed out of the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateRename {
    pub original: Utf8PathBuf,
    pub renamed_to: Utf8PathBuf,
    /// The tracked mod the duplicate shadowed.
    pub tracked: ModId,
}

/// Aggregate outcome of a refresh over one or more objects.
#[derive(Debug, Clone, Default)]
pub struct RefreshResult {
    pub untracked_paths: Vec<Utf8PathBuf>,
    pub new_handles: Vec<ModHandle>,
    pub duplicate_renames: Vec<DuplicateRename>,
    pub errors: Vec<RefreshError>,
}

impl RefreshResult {
    pub fn is_empty(&self) -> bool {
        self.untracked_paths.is_empty()
            && self.new_handles.is_empty()
            && self.duplicate_renames.is_empty()
            && self.errors.is_empty()
    }

    pub fn merge(&mut self, other: RefreshResult) {
        self.untracked_paths.extend(other.untracked_paths);
        self.new_handles.extend(other.new_handles);
        self.duplicate_renames.extend(other.duplicate_renames);
        self.errors.extend(other.errors);
    }
}

/// Reconciles indexes against disk.
pub struct ReconcileEngine<'a> {
    sanitizer: &'a NameSanitizer,
    /// Propagate per-folder errors instead of collecting them.
    strict: bool,
}

impl<'a> ReconcileEngine<'a> {
    pub fn new(sanitizer: &'a NameSanitizer, strict: bool) -> Self {
        Self { sanitizer, strict }
    }

    /// Bring `index` in line with its folder on disk.
    ///
    /// A missing folder for an index marked as instantiated is an invariant
    /// violation and is returned as an error.
    pub fn reconcile(&self, index: &mut ModIndex) -> Result<RefreshResult> {
        let mut result = RefreshResult::default();

        let Some((folder, _)) = index.naming().resolve_existing(index.folder()) else {
            if index.folder_instantiated() {
                return Err(LibraryError::InvariantViolation(format!(
                    "Mod folder of {} is missing: {}",
                    index.object().internal_name,
                    index.folder()
                )));
            }
            result
                .untracked_paths
                .extend(index.all().map(|m| m.path().to_path_buf()));
            index.release_all();
            return Ok(result);
        };
        if folder != index.folder() {
            tracing::debug!("Object folder moved: {} -> {}", index.folder(), folder);
            let old = index.folder().to_path_buf();
            index.rebase_prefix(&old, &folder);
            index.set_folder(folder.clone());
        }
        index.mark_instantiated(true);

        let on_disk = self.enumerate(&folder, &mut result)?;
        let mut matched: HashSet<ModId> = HashSet::new();

        for path in on_disk {
            if let Err(e) = self.match_folder(index, &path, &mut matched, &mut result) {
                if self.strict {
                    return Err(e);
                }
                tracing::warn!("Refresh could not process {}: {}", path, e);
                result.errors.push(RefreshError::new(&path, &e));
            }
        }

        let stale: Vec<Utf8PathBuf> = index
            .all()
            .filter(|m| !matched.contains(&m.id()))
            .map(|m| m.path().to_path_buf())
            .collect();
        for path in stale {
            index.untrack(&path);
            tracing::debug!("Untracked vanished mod {}", path);
            result.untracked_paths.push(path);
        }

        Ok(result)
    }

    /// Every `<skin>/<mod>` folder under `folder`, sorted.
    fn enumerate(&self, folder: &Utf8Path, result: &mut RefreshResult) -> Result<Vec<Utf8PathBuf>> {
        let mut mods = Vec::new();
        for skin_dir in list_dirs(folder)? {
            match list_dirs(&skin_dir) {
                Ok(children) => mods.extend(children),
                Err(e) => {
                    if self.strict {
                        return Err(e);
                    }
                    result.errors.push(RefreshError::new(&skin_dir, &e));
                }
            }
        }
        Ok(mods)
    }

    fn match_folder(
        &self,
        index: &mut ModIndex,
        path: &Utf8Path,
        matched: &mut HashSet<ModId>,
        result: &mut RefreshResult,
    ) -> Result<()> {
        // Exact path.
        let exact = index
            .all()
            .position(|m| m.path() == path && !matched.contains(&m.id()));
        if let Some(pos) = exact {
            index.rehome(pos, path.to_path_buf());
            matched.insert(index.entries_mut()[pos].id());
            return Ok(());
        }

        // Same folder under the other enabled/disabled name.
        let twin = index
            .naming()
            .toggled_path(path)
            .ok_or_else(|| LibraryError::not_found("Mod folder name", path.as_str()))?;
        let twin_pos = index.all().position(|m| paths_equal(m.path(), &twin));
        if let Some(pos) = twin_pos {
            let tracked_id = index.entries_mut()[pos].id();
            if twin.is_dir() {
                let renamed_to = self.rename_duplicate(index, path)?;
                let (handle, _) = index.settings().open_handle_quarantining(&renamed_to)?;
                let entry = index.track(handle)?;
                matched.insert(entry.id());
                tracing::info!(
                    "Renamed stale duplicate {} -> {} (shadowing {})",
                    path,
                    renamed_to,
                    tracked_id
                );
                result.duplicate_renames.push(DuplicateRename {
                    original: path.to_path_buf(),
                    renamed_to,
                    tracked: tracked_id,
                });
                return Ok(());
            }
            if !matched.contains(&tracked_id) {
                index.rehome(pos, path.to_path_buf());
                matched.insert(tracked_id);
                tracing::debug!("Mod {} was toggled on disk: {}", tracked_id, path);
                return Ok(());
            }
        }

        let (handle, quarantined) = index.settings().open_handle_quarantining(path)?;
        if quarantined {
            tracing::warn!("Tracked {} after quarantining its settings", path);
        }

        // Moved out-of-band between skin folders: the entry follows the folder.
        let moved = index.all().position(|m| {
            m.id() == handle.id() && !matched.contains(&m.id()) && !m.path().is_dir()
        });
        if let Some(pos) = moved {
            tracing::debug!("Mod {} moved on disk: {}", handle.id(), path);
            index.rehome(pos, path.to_path_buf());
            matched.insert(handle.id());
            return Ok(());
        }

        let entry = index.track(handle)?;
        matched.insert(entry.id());
        tracing::debug!("Found new mod {}", path);
        result.new_handles.push(entry.handle);
        Ok(())
    }

    /// Move a stale duplicate to `<enabled name> (n)` next to the original.
    fn rename_duplicate(&self, index: &ModIndex, path: &Utf8Path) -> Result<Utf8PathBuf> {
        let parent = path
            .parent()
            .ok_or_else(|| LibraryError::not_found("Skin folder", path.as_str()))?;
        let name = path.file_name().unwrap_or_default();
        let base = index.naming().enabled_name(name);
        let taken = sibling_names(parent, None)?;
        let target = parent.join(self.sanitizer.disambiguate(&base, &taken));

        fs::rename(path, &target).map_err(|e| LibraryError::partial_io(path, e))?;
        Ok(target)
    }
}

fn paths_equal(a: &Utf8Path, b: &Utf8Path) -> bool {
    a == b || a.as_str().to_lowercase() == b.as_str().to_lowercase()
}
