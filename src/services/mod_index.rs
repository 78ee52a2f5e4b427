use std::fs;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::{LibraryError, Result};
use crate::models::{ModHandle, ModId, ModdableObject, TrackedMod};
use crate::services::identity::IdentityRegistry;
use crate::services::layout::DisabledPrefix;
use crate::services::mod_files::ModSettingsStore;
use crate::services::watch::{WatchGate, WatchSuspension};

/// Collisions tolerated in a row before giving up on a fresh identity.
const MAX_IDENTITY_ATTEMPTS: usize = 8;

/// Ordered set of tracked mods for one moddable object.
///
/// Mutation of the entry list is performed by whichever operation holds the
/// index (scan, refresh, transfer); the library wraps each index in its own
/// async mutex so two such operations never interleave on one object.
pub struct ModIndex {
    object: ModdableObject,
    folder: Utf8PathBuf,
    folder_instantiated: bool,
    mods: Vec<TrackedMod>,
    registry: Arc<IdentityRegistry>,
    settings: ModSettingsStore,
    naming: DisabledPrefix,
    gate: Arc<WatchGate>,
}

impl ModIndex {
    pub fn new(
        object: ModdableObject,
        folder: Utf8PathBuf,
        registry: Arc<IdentityRegistry>,
        settings: ModSettingsStore,
        naming: DisabledPrefix,
    ) -> Self {
        Self {
            object,
            folder,
            folder_instantiated: false,
            mods: Vec::new(),
            registry,
            settings,
            naming,
            gate: WatchGate::new(),
        }
    }

    pub fn object(&self) -> &ModdableObject {
        &self.object
    }

    pub(crate) fn set_object(&mut self, object: ModdableObject) {
        self.object = object;
    }

    /// The object's mod folder as last seen on disk.
    pub fn folder(&self) -> &Utf8Path {
        &self.folder
    }

    pub(crate) fn set_folder(&mut self, folder: Utf8PathBuf) {
        self.folder = folder;
    }

    /// Whether the object's folder is expected to exist on disk.
    pub fn folder_instantiated(&self) -> bool {
        self.folder_instantiated
    }

    pub(crate) fn mark_instantiated(&mut self, instantiated: bool) {
        self.folder_instantiated = instantiated;
    }

    pub fn naming(&self) -> &DisabledPrefix {
        &self.naming
    }

    pub fn settings(&self) -> &ModSettingsStore {
        &self.settings
    }

    pub fn gate(&self) -> &Arc<WatchGate> {
        &self.gate
    }

    /// Suppress reactive refreshes of this object while the guard lives.
    pub fn suspend_watch(&self) -> WatchSuspension {
        self.gate.suspend()
    }

    pub fn len(&self) -> usize {
        self.mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = &TrackedMod> {
        self.mods.iter()
    }

    pub fn enabled(&self) -> impl Iterator<Item = &TrackedMod> {
        self.mods.iter().filter(|m| m.is_enabled)
    }

    pub fn disabled(&self) -> impl Iterator<Item = &TrackedMod> {
        self.mods.iter().filter(|m| !m.is_enabled)
    }

    pub fn get(&self, id: ModId) -> Option<&TrackedMod> {
        self.mods.iter().find(|m| m.id() == id)
    }

    pub fn find_by_path(&self, path: &Utf8Path) -> Option<&TrackedMod> {
        self.mods.iter().find(|m| m.path() == path)
    }

    pub(crate) fn entries_mut(&mut self) -> &mut Vec<TrackedMod> {
        &mut self.mods
    }

    /// Untrack everything, releasing identities. Used when the index is disposed.
    pub(crate) fn release_all(&mut self) {
        for entry in self.mods.drain(..) {
            self.registry.release(entry.id(), entry.path());
        }
    }

    /// Re-register every entry, e.g. after a failed rescan cleared the registry.
    pub(crate) fn reclaim_all(&self) {
        for entry in &self.mods {
            self.registry.claim(entry.id(), entry.path());
        }
    }

    /// Detach an index superseded by a rescan. Its entries are forgotten and
    /// it no longer touches the library's identities.
    pub(crate) fn retire(&mut self) {
        self.mods.clear();
        self.registry = Arc::new(IdentityRegistry::new());
        self.folder_instantiated = false;
    }

    /// Share suspensions with the index this one replaces.
    pub(crate) fn share_gate(&mut self, gate: Arc<WatchGate>) {
        self.gate = gate;
    }

    /// Track `handle`, regenerating its identity if another folder anywhere
    /// in the library already owns it. New entries are enabled unless their
    /// folder carries the disabled prefix.
    pub fn track(&mut self, mut handle: ModHandle) -> Result<TrackedMod> {
        if let Some(existing) = self.find_by_path(handle.path()) {
            return Ok(existing.clone());
        }

        let mut attempts = 0;
        while !self.registry.claim(handle.id(), handle.path()) {
            attempts += 1;
            if attempts > MAX_IDENTITY_ATTEMPTS {
                return Err(LibraryError::Collision(format!(
                    "Could not assign a unique identity to {}",
                    handle.path()
                )));
            }
            tracing::warn!(
                "Mod identity {} at {} is already tracked elsewhere, regenerating",
                handle.id(),
                handle.path()
            );
            self.settings.reassign_identity(&mut handle)?;
        }

        let entry = TrackedMod {
            is_enabled: !self.naming.is_disabled(handle.folder_name()),
            handle,
        };
        self.mods.push(entry.clone());
        Ok(entry)
    }

    /// Stop tracking the mod at `path`. Files are left untouched.
    pub fn untrack(&mut self, path: &Utf8Path) -> bool {
        match self.mods.iter().position(|m| m.path() == path) {
            Some(pos) => {
                let removed = self.mods.remove(pos);
                self.registry.release(removed.id(), removed.path());
                true
            }
            None => false,
        }
    }

    pub fn untrack_id(&mut self, id: ModId) -> Option<TrackedMod> {
        let pos = self.mods.iter().position(|m| m.id() == id)?;
        let removed = self.mods.remove(pos);
        self.registry.release(id, removed.path());
        Some(removed)
    }

    pub fn enable(&mut self, id: ModId) -> Result<()> {
        self.set_enabled(id, true)
    }

    pub fn disable(&mut self, id: ModId) -> Result<()> {
        self.set_enabled(id, false)
    }

    fn set_enabled(&mut self, id: ModId, enabled: bool) -> Result<()> {
        let pos = self.position(id)?;
        let current = self.mods[pos].path().to_path_buf();
        let name = self.mods[pos].handle.folder_name().to_string();
        let target_name = if enabled {
            self.naming.enabled_name(&name)
        } else {
            self.naming.disabled_name(&name)
        };

        if target_name != name {
            self.move_entry(pos, current.with_file_name(&target_name))?;
        }
        self.mods[pos].is_enabled = enabled;
        tracing::debug!(
            "{} mod {}",
            if enabled { "Enabled" } else { "Disabled" },
            self.mods[pos].path()
        );
        Ok(())
    }

    /// Rename the mod's folder in place, keeping its enabled state prefix.
    pub fn rename(&mut self, id: ModId, new_folder_name: &str) -> Result<()> {
        let pos = self.position(id)?;
        let new_folder_name = new_folder_name.trim();
        if new_folder_name.is_empty() {
            return Err(LibraryError::Collision(
                "Mod folder name cannot be empty".to_string(),
            ));
        }

        let target_name = if self.mods[pos].is_enabled {
            self.naming.enabled_name(new_folder_name)
        } else {
            self.naming.disabled_name(new_folder_name)
        };
        let current = self.mods[pos].path().to_path_buf();
        if current.file_name() == Some(target_name.as_str()) {
            return Ok(());
        }
        self.move_entry(pos, current.with_file_name(target_name))
    }

    /// Untrack the mod and delete its folder.
    pub fn delete_by_id(&mut self, id: ModId) -> Result<TrackedMod> {
        let pos = self.position(id)?;
        let path = self.mods[pos].path().to_path_buf();
        if !path.is_dir() {
            self.untrack(&path);
            return Err(LibraryError::not_found("Mod folder", path.as_str()));
        }

        fs::remove_dir_all(&path).map_err(|e| LibraryError::partial_io(&path, e))?;
        let removed = self.mods.remove(pos);
        self.registry.release(id, &path);
        tracing::info!("Deleted mod {} ({})", path, id);
        Ok(removed)
    }

    /// Point the entry at a folder that already exists on disk.
    pub(crate) fn rehome(&mut self, pos: usize, path: Utf8PathBuf) {
        let entry = &mut self.mods[pos];
        entry.is_enabled = !self.naming.is_disabled(path.file_name().unwrap_or_default());
        self.registry.update_path(entry.id(), &path);
        entry.handle.set_path(path);
    }

    /// Re-root every entry under `old` to the same relative path under `new`,
    /// after the folder containing them was renamed.
    pub(crate) fn rebase_prefix(&mut self, old: &Utf8Path, new: &Utf8Path) {
        for entry in self.mods.iter_mut() {
            let Ok(relative) = entry.path().strip_prefix(old) else {
                continue;
            };
            let path = new.join(relative);
            self.registry.update_path(entry.id(), &path);
            entry.handle.set_path(path);
        }
        if self.folder.starts_with(old) {
            if let Ok(relative) = self.folder.strip_prefix(old) {
                self.folder = new.join(relative);
            }
        }
    }

    /// Rename the entry's folder on disk to `target` after re-validating both ends.
    fn move_entry(&mut self, pos: usize, target: Utf8PathBuf) -> Result<()> {
        let current = self.mods[pos].path().to_path_buf();
        if !current.is_dir() {
            return Err(LibraryError::not_found("Mod folder", current.as_str()));
        }
        // Case-only renames point at the same folder on case-insensitive filesystems.
        let case_only = current.as_str().to_lowercase() == target.as_str().to_lowercase();
        if target.exists() && !case_only {
            return Err(LibraryError::Collision(format!(
                "A folder named {} already exists",
                target.file_name().unwrap_or_default()
            )));
        }

        fs::rename(&current, &target).map_err(|e| LibraryError::partial_io(&current, e))?;
        let entry = &mut self.mods[pos];
        self.registry.update_path(entry.id(), &target);
        entry.handle.set_path(target);
        Ok(())
    }

    fn position(&self, id: ModId) -> Result<usize> {
        self.mods
            .iter()
            .position(|m| m.id() == id)
            .ok_or_else(|| LibraryError::not_found("Tracked mod", id.to_string()))
    }
}
