//! Mod folder I/O: the per-mod settings file and directory move/copy helpers.

use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use walkdir::WalkDir;

use crate::error::{LibraryError, Result};
use crate::models::{ModHandle, ModSettings};
use crate::services::identity::IdGenerator;

/// Suffix given to a settings file that failed to parse.
pub const QUARANTINE_SUFFIX: &str = ".invalid";

/// Reads and writes the settings file inside each mod folder.
#[derive(Clone)]
pub struct ModSettingsStore {
    file_name: String,
    ids: Arc<dyn IdGenerator>,
}

impl ModSettingsStore {
    pub fn new(file_name: impl Into<String>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            file_name: file_name.into(),
            ids,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn ids(&self) -> &Arc<dyn IdGenerator> {
        &self.ids
    }

    pub fn settings_path(&self, mod_dir: &Utf8Path) -> Utf8PathBuf {
        mod_dir.join(&self.file_name)
    }

    /// `Ok(None)` when the folder has no settings file yet.
    pub fn read(&self, mod_dir: &Utf8Path) -> Result<Option<ModSettings>> {
        let path = self.settings_path(mod_dir);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LibraryError::partial_io(path, e)),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| LibraryError::Corrupt {
                path,
                reason: e.to_string(),
            })
    }

    pub fn write(&self, mod_dir: &Utf8Path, settings: &ModSettings) -> Result<()> {
        let path = self.settings_path(mod_dir);
        let json = serde_json::to_string_pretty(settings).map_err(|e| LibraryError::Corrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        fs::write(&path, json).map_err(|e| LibraryError::partial_io(path, e))
    }

    /// Build a handle for `mod_dir`, creating its settings file on first sight.
    pub fn open_handle(&self, mod_dir: &Utf8Path) -> Result<ModHandle> {
        if !mod_dir.is_dir() {
            return Err(LibraryError::not_found("Mod folder", mod_dir.as_str()));
        }

        match self.read(mod_dir)? {
            Some(settings) => Ok(ModHandle::new(settings.id, mod_dir)),
            None => {
                let settings = ModSettings::new(self.ids.new_id());
                self.write(mod_dir, &settings)?;
                tracing::debug!("Created settings for new mod folder {}", mod_dir);
                Ok(ModHandle::new(settings.id, mod_dir))
            }
        }
    }

    /// Like [`open_handle`](Self::open_handle), but a corrupt settings file is
    /// quarantined and the open retried once. The flag reports a quarantine.
    pub fn open_handle_quarantining(&self, mod_dir: &Utf8Path) -> Result<(ModHandle, bool)> {
        match self.open_handle(mod_dir) {
            Ok(handle) => Ok((handle, false)),
            Err(LibraryError::Corrupt { path, reason }) => {
                tracing::warn!("Corrupt mod settings {}: {}", path, reason);
                self.quarantine(mod_dir)?;
                self.open_handle(mod_dir).map(|handle| (handle, true))
            }
            Err(e) => Err(e),
        }
    }

    /// Give the mod behind `handle` a fresh identity and persist it.
    pub fn reassign_identity(&self, handle: &mut ModHandle) -> Result<()> {
        let mut settings = self
            .read(handle.path())?
            .unwrap_or_else(|| ModSettings::new(handle.id()));
        let old = settings.id;
        settings.id = self.ids.new_id();
        self.write(handle.path(), &settings)?;
        handle.set_id(settings.id);
        tracing::info!(
            "Reassigned mod identity {} -> {} for {}",
            old,
            settings.id,
            handle.path()
        );
        Ok(())
    }

    /// Park an unreadable settings file under `<name>.invalid`.
    pub fn quarantine(&self, mod_dir: &Utf8Path) -> Result<Utf8PathBuf> {
        let path = self.settings_path(mod_dir);
        let target = mod_dir.join(format!("{}{}", self.file_name, QUARANTINE_SUFFIX));
        if target.exists() {
            fs::remove_file(&target).map_err(|e| LibraryError::partial_io(&target, e))?;
        }
        fs::rename(&path, &target).map_err(|e| LibraryError::partial_io(&path, e))?;
        tracing::warn!("Quarantined unreadable mod settings: {}", target);
        Ok(target)
    }

    /// Drop a persisted skin override, if any.
    pub fn clear_skin_override(&self, mod_dir: &Utf8Path) -> Result<()> {
        if let Some(mut settings) = self.read(mod_dir)? {
            if settings.skin_override.take().is_some() {
                self.write(mod_dir, &settings)?;
            }
        }
        Ok(())
    }
}

/// Rename `from` to `to`, falling back to copy-and-delete across devices.
pub fn move_dir(from: &Utf8Path, to: &Utf8Path) -> Result<()> {
    if to.exists() {
        return Err(LibraryError::Collision(format!(
            "Cannot move {}: {} already exists",
            from, to
        )));
    }

    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            copy_dir(from, to)?;
            fs::remove_dir_all(from).map_err(|e| LibraryError::partial_io(from, e))
        }
        Err(e) => Err(LibraryError::partial_io(from, e)),
    }
}

/// Recursively copy `from` into a new directory `to`.
pub fn copy_dir(from: &Utf8Path, to: &Utf8Path) -> Result<()> {
    if to.exists() {
        return Err(LibraryError::Collision(format!(
            "Cannot copy {}: {} already exists",
            from, to
        )));
    }

    for entry in WalkDir::new(from) {
        let entry = entry.map_err(|e| {
            let path = e
                .path()
                .and_then(|p| Utf8Path::from_path(p))
                .map(Utf8Path::to_path_buf)
                .unwrap_or_else(|| from.to_path_buf());
            LibraryError::partial_io(path, e.into())
        })?;

        let relative = entry
            .path()
            .strip_prefix(from.as_std_path())
            .map_err(|_| LibraryError::InvariantViolation(format!("walk escaped {}", from)))?;
        let target = to.as_std_path().join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
