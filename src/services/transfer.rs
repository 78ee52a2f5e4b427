//! Moving and copying tracked mods between objects and skin folders.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};

use camino::{Utf8Path, Utf8PathBuf};
use walkdir::WalkDir;

use crate::error::{LibraryError, Result};
use crate::models::{ModId, TrackedMod};
use crate::services::mod_files::{copy_dir, move_dir};
use crate::services::mod_index::ModIndex;
use crate::services::reconcile::RefreshError;
use crate::services::skin_folders::{SkinFolderResolver, list_dirs};

/// Whether [`TransferEngine::add_mod`] keeps the source folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddMode {
    Move,
    Copy,
}

/// Mods that made it across, plus per-mod failures from the move loop.
#[derive(Debug, Default)]
pub struct TransferOutcome {
    pub moved: Vec<TrackedMod>,
    pub errors: Vec<RefreshError>,
}

/// Holds every file under a staged mod folder open for read and write so an
/// external process still writing into it is detected before the final move.
pub struct StagedFolderLock {
    root: Utf8PathBuf,
    files: Vec<File>,
}

impl StagedFolderLock {
    pub fn acquire(root: &Utf8Path) -> Result<Self> {
        let mut lock = Self {
            root: root.to_path_buf(),
            files: Vec::new(),
        };
        lock.reacquire()?;
        Ok(lock)
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn is_held(&self) -> bool {
        !self.files.is_empty()
    }

    pub fn release(&mut self) {
        self.files.clear();
    }

    /// Open every file again, e.g. after a failed move.
    pub fn reacquire(&mut self) -> Result<()> {
        self.files.clear();
        for entry in WalkDir::new(self.root.as_std_path()) {
            let entry = entry.map_err(|e| LibraryError::partial_io(&self.root, e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(entry.path())
                .map_err(|e| {
                    let path = Utf8Path::from_path(entry.path())
                        .map(Utf8Path::to_path_buf)
                        .unwrap_or_else(|| self.root.clone());
                    LibraryError::partial_io(path, e)
                })?;
            self.files.push(file);
        }
        Ok(())
    }
}

pub struct TransferEngine<'a> {
    resolver: &'a SkinFolderResolver,
}

impl<'a> TransferEngine<'a> {
    pub fn new(resolver: &'a SkinFolderResolver) -> Self {
        Self { resolver }
    }

    /// Move `ids` from `source` into `destination`'s default skin folder.
    ///
    /// The whole batch is validated before anything moves: every id must
    /// belong to `source` with its folder present, and no folder name may
    /// already exist at the destination. Failures inside the move loop do not
    /// roll back mods already moved.
    pub fn transfer(
        &self,
        source: &mut ModIndex,
        destination: &mut ModIndex,
        ids: &[ModId],
    ) -> Result<TransferOutcome> {
        if source.object().internal_name == destination.object().internal_name {
            return Err(LibraryError::Collision(format!(
                "Cannot transfer mods from {} to itself",
                source.object().internal_name
            )));
        }

        let target_dir = self.resolver.default_folder(destination.folder());
        let plan = self.preflight(source, &target_dir, ids)?;

        std::fs::create_dir_all(&target_dir).map_err(|e| LibraryError::partial_io(&target_dir, e))?;
        destination.mark_instantiated(true);

        let mut outcome = TransferOutcome::default();
        for (id, from) in plan {
            let to = target_dir.join(from.file_name().unwrap_or_default());
            if let Err(e) = move_dir(&from, &to) {
                tracing::warn!("Transfer of {} failed: {}", from, e);
                outcome.errors.push(RefreshError::new(&from, &e));
                continue;
            }

            let Some(entry) = source.untrack_id(id) else {
                continue;
            };
            let mut handle = entry.handle;
            handle.set_path(to.clone());

            match destination.track(handle) {
                Ok(tracked) => {
                    if let Err(e) = destination.settings().clear_skin_override(&to) {
                        outcome.errors.push(RefreshError::new(&to, &e));
                    }
                    outcome.moved.push(tracked);
                }
                Err(e) => outcome.errors.push(RefreshError::new(&to, &e)),
            }
        }

        tracing::info!(
            "Transferred {} mods from {} to {} ({} errors)",
            outcome.moved.len(),
            source.object().internal_name,
            destination.object().internal_name,
            outcome.errors.len()
        );
        Ok(outcome)
    }

    fn preflight(
        &self,
        source: &ModIndex,
        target_dir: &Utf8Path,
        ids: &[ModId],
    ) -> Result<Vec<(ModId, Utf8PathBuf)>> {
        let mut taken: HashSet<String> = list_dirs(target_dir)?
            .iter()
            .filter_map(|p| p.file_name().map(str::to_lowercase))
            .collect();

        let mut plan = Vec::with_capacity(ids.len());
        for &id in ids {
            let entry = source
                .get(id)
                .ok_or_else(|| LibraryError::not_found("Tracked mod", id.to_string()))?;
            if !entry.path().is_dir() {
                return Err(LibraryError::not_found("Mod folder", entry.path().as_str()));
            }
            let name = entry.handle.folder_name().to_lowercase();
            if !taken.insert(name) {
                return Err(LibraryError::Collision(format!(
                    "A mod folder named {} already exists in {}",
                    entry.handle.folder_name(),
                    target_dir
                )));
            }
            plan.push((id, entry.path().to_path_buf()));
        }
        Ok(plan)
    }

    /// Place the folder at `source` into `destination` under the folder for
    /// `skin`, then track it. A copy gets a fresh identity.
    ///
    /// `staged` is released right before the files move and re-acquired if
    /// the move fails.
    pub fn add_mod(
        &self,
        source: &Utf8Path,
        destination: &mut ModIndex,
        mode: AddMode,
        skin: Option<&str>,
        staged: Option<&mut StagedFolderLock>,
    ) -> Result<TrackedMod> {
        if !source.is_dir() {
            return Err(LibraryError::not_found("Mod folder", source.as_str()));
        }
        let name = source
            .file_name()
            .ok_or_else(|| LibraryError::not_found("Mod folder name", source.as_str()))?;

        let skin_dir = self.skin_dir(destination, skin)?;
        let target = skin_dir.join(name);
        if collides(&skin_dir, name)? {
            return Err(LibraryError::Collision(format!(
                "A mod folder named {} already exists in {}",
                name, skin_dir
            )));
        }

        let mut staged = staged;
        if let Some(lock) = staged.as_deref_mut() {
            lock.release();
        }
        let placed = match mode {
            AddMode::Move => move_dir(source, &target),
            AddMode::Copy => copy_dir(source, &target),
        };
        if let Err(e) = placed {
            if let Some(lock) = staged {
                lock.reacquire()?;
            }
            return Err(e);
        }

        let mut handle = destination.settings().open_handle_quarantining(&target)?.0;
        if mode == AddMode::Copy {
            destination.settings().reassign_identity(&mut handle)?;
        }
        let tracked = destination.track(handle)?;
        tracing::info!(
            "{} {} into {}",
            if mode == AddMode::Move { "Moved" } else { "Copied" },
            source,
            target
        );
        Ok(tracked)
    }

    /// Move a tracked mod into another skin folder of the same object.
    pub fn relocate_to_skin(&self, index: &mut ModIndex, id: ModId, skin: Option<&str>) -> Result<TrackedMod> {
        let entry = index
            .get(id)
            .cloned()
            .ok_or_else(|| LibraryError::not_found("Tracked mod", id.to_string()))?;
        let from = entry.path().to_path_buf();
        let name = entry.handle.folder_name().to_string();
        if !from.is_dir() {
            return Err(LibraryError::not_found("Mod folder", from.as_str()));
        }

        let skin_dir = self.skin_dir(index, skin)?;
        if from.parent() == Some(skin_dir.as_path()) {
            return Ok(entry);
        }
        if collides(&skin_dir, &name)? {
            return Err(LibraryError::Collision(format!(
                "A mod folder named {} already exists in {}",
                name, skin_dir
            )));
        }

        let to = skin_dir.join(&name);
        move_dir(&from, &to)?;
        let pos = index
            .all()
            .position(|m| m.id() == id)
            .ok_or_else(|| LibraryError::not_found("Tracked mod", id.to_string()))?;
        index.rehome(pos, to.clone());
        index.settings().clear_skin_override(&to)?;
        index
            .get(id)
            .cloned()
            .ok_or_else(|| LibraryError::not_found("Tracked mod", id.to_string()))
    }

    fn skin_dir(&self, index: &mut ModIndex, skin: Option<&str>) -> Result<Utf8PathBuf> {
        let object = index.object().clone();
        let dir = self.resolver.get_or_create(index.folder(), &object, skin, None)?;
        index.mark_instantiated(true);
        Ok(dir)
    }
}

fn collides(dir: &Utf8Path, name: &str) -> Result<bool> {
    let name = name.to_lowercase();
    Ok(list_dirs(dir)?
        .iter()
        .any(|p| p.file_name().is_some_and(|n| n.to_lowercase() == name)))
}
