//! Bulk copy-out of tracked mods to a location outside the library.

use std::fs;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local};
use walkdir::WalkDir;

use crate::error::{LibraryError, Result};
use crate::models::TrackedMod;
use crate::services::identity::{Clock, IdGenerator, SystemClock};
use crate::services::layout::DisabledPrefix;
use crate::services::mod_files::copy_dir;
use crate::services::reconcile::RefreshError;
use crate::services::sanitize::sibling_names;
use crate::services::skin_folders::list_dirs;

/// What to do with the enabled state of exported copies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportStatus {
    #[default]
    Keep,
    EnableAll,
    DisableAll,
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Strip settings and sidecar files from the copies.
    pub remove_local_settings: bool,
    /// `Category/ObjectFolder/SkinFolder/Mod` instead of a flat list of mods.
    pub keep_category_structure: bool,
    pub set_status: ExportStatus,
    /// Package the export as an archive. Not implemented.
    pub zip: bool,
}

/// One object's mods as seen when the export started.
#[derive(Debug, Clone)]
pub struct ExportSource {
    pub category_folder: String,
    pub object_folder: String,
    pub mods: Vec<TrackedMod>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportProgress {
    pub completed: usize,
    pub total: usize,
}

impl ExportProgress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.completed * 100) / self.total).min(100) as u8
    }
}

#[derive(Debug, Default)]
pub struct ExportOutcome {
    pub root: Utf8PathBuf,
    pub exported: Vec<Utf8PathBuf>,
    pub errors: Vec<RefreshError>,
}

pub struct ExportPipeline {
    naming: DisabledPrefix,
    internal_prefixes: Vec<String>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    /// Skin folder sidecar file names carried along with category-structured copies.
    skin_sidecars: Vec<String>,
}

impl ExportPipeline {
    pub fn new(naming: DisabledPrefix, internal_prefixes: Vec<String>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            naming,
            internal_prefixes,
            ids,
            clock: Arc::new(SystemClock),
            skin_sidecars: Vec::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_skin_sidecars(mut self, files: Vec<String>) -> Self {
        self.skin_sidecars = files;
        self
    }

    /// Name of the timestamped folder an export started at `now` writes into.
    pub fn export_folder_name(now: DateTime<Local>) -> String {
        format!("ModSync Export {}", now.format("%Y-%m-%d %H-%M-%S"))
    }

    pub fn export(
        &self,
        sources: &[ExportSource],
        destination: &Utf8Path,
        options: &ExportOptions,
        mut on_progress: impl FnMut(ExportProgress),
    ) -> Result<ExportOutcome> {
        if options.zip {
            return Err(LibraryError::Unsupported("zip export"));
        }

        let root = destination.join(Self::export_folder_name(self.clock.now()));
        if root.exists() && !list_entries_empty(&root)? {
            return Err(LibraryError::Collision(format!(
                "Export destination {} is not empty",
                root
            )));
        }
        fs::create_dir_all(&root).map_err(|e| LibraryError::partial_io(&root, e))?;

        let mod_count: usize = sources.iter().map(|s| s.mods.len()).sum();
        let mut progress = ExportProgress {
            completed: 0,
            total: mod_count
                + usize::from(options.remove_local_settings)
                + usize::from(options.set_status != ExportStatus::Keep),
        };

        if options.keep_category_structure {
            let expected = self.create_object_folders(&root, sources)?;
            verify_object_folders(&root, expected)?;
        }

        let mut outcome = ExportOutcome {
            root: root.clone(),
            ..Default::default()
        };

        for source in sources {
            for entry in &source.mods {
                let parent = if options.keep_category_structure {
                    let skin_dir = entry.path().parent();
                    let skin = skin_dir.and_then(Utf8Path::file_name).unwrap_or_default();
                    let parent = root
                        .join(&source.category_folder)
                        .join(&source.object_folder)
                        .join(skin);
                    if let Some(skin_dir) = skin_dir {
                        if let Err(e) = self.copy_skin_sidecars(skin_dir, &parent) {
                            outcome.errors.push(RefreshError::new(skin_dir, &e));
                        }
                    }
                    parent
                } else {
                    root.clone()
                };

                match self.copy_mod(entry.path(), &parent) {
                    Ok(copied) => outcome.exported.push(copied),
                    Err(e) => {
                        tracing::warn!("Export of {} failed: {}", entry.path(), e);
                        outcome.errors.push(RefreshError::new(entry.path(), &e));
                    }
                }
                progress.completed += 1;
                on_progress(progress);
            }
        }

        if options.remove_local_settings {
            self.strip_internal_files(&root, &mut outcome.errors);
            progress.completed += 1;
            on_progress(progress);
        }

        if options.set_status != ExportStatus::Keep {
            let enable = options.set_status == ExportStatus::EnableAll;
            for copied in outcome.exported.iter_mut() {
                match self.apply_status(copied, enable) {
                    Ok(renamed) => *copied = renamed,
                    Err(e) => outcome.errors.push(RefreshError::new(copied.as_path(), &e)),
                }
            }
            progress.completed += 1;
            on_progress(progress);
        }

        tracing::info!(
            "Exported {} mods to {} ({} errors)",
            outcome.exported.len(),
            root,
            outcome.errors.len()
        );
        Ok(outcome)
    }

    /// Pre-create one folder per object that has mods. Returns how many were expected.
    fn create_object_folders(&self, root: &Utf8Path, sources: &[ExportSource]) -> Result<usize> {
        let mut expected = 0;
        for source in sources.iter().filter(|s| !s.mods.is_empty()) {
            let dir = root.join(&source.category_folder).join(&source.object_folder);
            fs::create_dir_all(&dir).map_err(|e| LibraryError::partial_io(&dir, e))?;
            expected += 1;
        }
        Ok(expected)
    }

    /// Carry the skin folder's metadata files over to its exported copy, once.
    fn copy_skin_sidecars(&self, skin_dir: &Utf8Path, exported: &Utf8Path) -> Result<()> {
        for file in &self.skin_sidecars {
            let from = skin_dir.join(file);
            let to = exported.join(file);
            if !from.is_file() || to.exists() {
                continue;
            }
            fs::create_dir_all(exported).map_err(|e| LibraryError::partial_io(exported, e))?;
            fs::copy(&from, &to).map_err(|e| LibraryError::partial_io(&from, e))?;
        }
        Ok(())
    }

    /// Copy `mod_dir` into `parent`. On a name clash the source is parked
    /// under a random suffix for the duration of the copy, so the copy takes
    /// the suffixed name and the live folder keeps its own.
    fn copy_mod(&self, mod_dir: &Utf8Path, parent: &Utf8Path) -> Result<Utf8PathBuf> {
        let name = mod_dir
            .file_name()
            .ok_or_else(|| LibraryError::not_found("Mod folder name", mod_dir.as_str()))?;
        fs::create_dir_all(parent).map_err(|e| LibraryError::partial_io(parent, e))?;

        let target = parent.join(name);
        if !sibling_names(parent, None)?.contains(&name.to_lowercase()) {
            copy_dir(mod_dir, &target)?;
            return Ok(target);
        }

        let parked_name = format!("{}_{}", name, self.ids.random_suffix());
        let parked = mod_dir.with_file_name(&parked_name);
        fs::rename(mod_dir, &parked).map_err(|e| LibraryError::partial_io(mod_dir, e))?;

        let target = parent.join(&parked_name);
        let copied = copy_dir(&parked, &target);
        let restored = fs::rename(&parked, mod_dir).map_err(|e| LibraryError::partial_io(&parked, e));
        copied?;
        restored?;
        tracing::debug!("Exported {} as {}", mod_dir, target);
        Ok(target)
    }

    fn strip_internal_files(&self, root: &Utf8Path, errors: &mut Vec<RefreshError>) {
        for entry in WalkDir::new(root.as_std_path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let name = entry.file_name().to_string_lossy();
            if !self.internal_prefixes.iter().any(|p| name.starts_with(p.as_str())) {
                continue;
            }
            let Some(path) = Utf8Path::from_path(entry.path()) else {
                continue;
            };
            if let Err(e) = fs::remove_file(path) {
                errors.push(RefreshError::new(path, &LibraryError::partial_io(path, e)));
            }
        }
    }

    fn apply_status(&self, copied: &Utf8Path, enable: bool) -> Result<Utf8PathBuf> {
        let name = copied.file_name().unwrap_or_default();
        let target_name = if enable {
            self.naming.enabled_name(name)
        } else {
            self.naming.disabled_name(name)
        };
        if target_name == name {
            return Ok(copied.to_path_buf());
        }

        let target = copied.with_file_name(target_name);
        if target.exists() {
            return Err(LibraryError::Collision(format!(
                "Cannot set status, {} already exists",
                target
            )));
        }
        fs::rename(copied, &target).map_err(|e| LibraryError::partial_io(copied, e))?;
        Ok(target)
    }
}

/// Check that exactly `expected` object folders exist under the category
/// folders of an export root.
pub fn verify_object_folders(root: &Utf8Path, expected: usize) -> Result<()> {
    let mut found = 0;
    for category in list_dirs(root)? {
        found += list_dirs(&category)?.len();
    }
    if found != expected {
        return Err(LibraryError::InvariantViolation(format!(
            "Export created {} object folders, expected {}",
            found, expected
        )));
    }
    Ok(())
}

fn list_entries_empty(dir: &Utf8Path) -> Result<bool> {
    let mut entries = dir
        .read_dir_utf8()
        .map_err(|e| LibraryError::partial_io(dir, e))?;
    Ok(entries.next().is_none())
}
