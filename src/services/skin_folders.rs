use std::fs;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::{LibraryError, Result};
use crate::models::ModdableObject;
use crate::services::sanitize::{NameSanitizer, sibling_names};
use crate::services::skin_metadata::{MetadataSource, SkinFolderMetadata, SkinMetadataStore};

/// Fallback folder name when neither the display name nor the internal name sanitizes.
const SKIN_FALLBACK_NAME: &str = "Skin";

/// Finds, creates and renames the skin-variant folders inside an object folder.
///
/// Identity comes from each folder's sidecar, never from its name. The
/// default skin lives in a fixed-label folder that needs no sidecar.
#[derive(Clone)]
pub struct SkinFolderResolver {
    sanitizer: Arc<NameSanitizer>,
    metadata: SkinMetadataStore,
    default_folder_name: String,
}

impl SkinFolderResolver {
    pub fn new(
        sanitizer: Arc<NameSanitizer>,
        metadata: SkinMetadataStore,
        default_folder_name: impl Into<String>,
    ) -> Self {
        Self {
            sanitizer,
            metadata,
            default_folder_name: default_folder_name.into(),
        }
    }

    pub fn metadata(&self) -> &SkinMetadataStore {
        &self.metadata
    }

    pub fn default_folder(&self, object_dir: &Utf8Path) -> Utf8PathBuf {
        object_dir.join(&self.default_folder_name)
    }

    pub fn is_default_folder(&self, folder: &Utf8Path) -> bool {
        folder
            .file_name()
            .is_some_and(|name| name.eq_ignore_ascii_case(&self.default_folder_name))
    }

    /// Sidecar identity of a skin folder. The default folder without a
    /// sidecar gets one synthesized from the object's default skin.
    pub fn metadata_for(&self, object: &ModdableObject, folder: &Utf8Path) -> Option<SkinFolderMetadata> {
        if let Some(metadata) = self.metadata.read(folder) {
            return Some(metadata);
        }
        if !self.is_default_folder(folder) {
            return None;
        }
        let default = object.skins.as_ref().and_then(|s| s.default_skin());
        Some(SkinFolderMetadata {
            skin_internal_name: default
                .map(|s| s.internal_name.to_string())
                .unwrap_or_else(|| object.internal_name.to_string()),
            skin_display_name: self.default_folder_name.clone(),
        })
    }

    /// Path of the folder for `skin`, creating it (and its sidecar) if needed.
    ///
    /// A new folder is named after `preferred_display_name`, else the
    /// catalog's display name for the skin, else the skin's internal name.
    pub fn get_or_create(
        &self,
        object_dir: &Utf8Path,
        object: &ModdableObject,
        skin: Option<&str>,
        preferred_display_name: Option<&str>,
    ) -> Result<Utf8PathBuf> {
        let skin = match skin {
            Some(skin) if !object.is_default_skin(Some(skin)) => skin,
            _ => {
                let folder = self.default_folder(object_dir);
                fs::create_dir_all(&folder).map_err(|e| LibraryError::partial_io(&folder, e))?;
                return Ok(folder);
            }
        };

        if let Some(existing) = self.find(object_dir, skin)? {
            return Ok(existing);
        }

        let preferred_display_name = preferred_display_name.or_else(|| {
            object
                .skins
                .as_ref()
                .and_then(|skins| skins.find(skin))
                .map(|s| s.display_name.as_str())
        });
        let base = self.sanitizer.sanitize_or(
            &[preferred_display_name, Some(skin)],
            SKIN_FALLBACK_NAME,
        );
        let mut taken = sibling_names(object_dir, None)?;
        taken.insert(self.default_folder_name.to_lowercase());
        let name = self.sanitizer.disambiguate(&base, &taken);

        let folder = object_dir.join(&name);
        fs::create_dir_all(&folder).map_err(|e| LibraryError::partial_io(&folder, e))?;
        self.metadata.write(
            &folder,
            &SkinFolderMetadata {
                skin_internal_name: skin.to_string(),
                skin_display_name: preferred_display_name.unwrap_or(skin).to_string(),
            },
        )?;
        tracing::info!("Created skin folder {} for {}", folder, skin);
        Ok(folder)
    }

    /// Locate the non-default folder whose sidecar names `skin`, upgrading a
    /// legacy sidecar to the current file name on the way.
    pub fn find(&self, object_dir: &Utf8Path, skin: &str) -> Result<Option<Utf8PathBuf>> {
        for folder in self.skin_folders(object_dir)? {
            if self.is_default_folder(&folder) {
                continue;
            }
            let Some((metadata, source)) = self.metadata.read_with_source(&folder) else {
                continue;
            };
            if metadata.skin_internal_name.to_lowercase() != skin.to_lowercase() {
                continue;
            }
            if source == MetadataSource::Legacy {
                self.metadata.write(&folder, &metadata)?;
                tracing::debug!("Upgraded legacy skin metadata in {}", folder);
            }
            return Ok(Some(folder));
        }
        Ok(None)
    }

    /// Rename the folder for `skin` to match a new display name.
    ///
    /// Returns `Ok(None)` when the object folder does not exist yet.
    pub fn rename(
        &self,
        object_dir: &Utf8Path,
        object: &ModdableObject,
        skin: &str,
        new_display_name: &str,
    ) -> Result<Option<Utf8PathBuf>> {
        if !object_dir.is_dir() {
            return Ok(None);
        }
        if object.is_default_skin(Some(skin)) {
            return Err(LibraryError::Unsupported("renaming the default skin folder"));
        }

        let folder = self
            .find(object_dir, skin)?
            .ok_or_else(|| LibraryError::not_found("Skin folder", skin))?;
        let current_name = folder.file_name().unwrap_or_default().to_string();
        let mut metadata = self
            .metadata
            .read(&folder)
            .ok_or_else(|| LibraryError::not_found("Skin metadata", folder.as_str()))?;

        let base = self.sanitizer.sanitize_or(
            &[Some(new_display_name), Some(skin)],
            SKIN_FALLBACK_NAME,
        );
        let mut taken = sibling_names(object_dir, Some(&current_name))?;
        taken.insert(self.default_folder_name.to_lowercase());
        let name = self.sanitizer.disambiguate(&base, &taken);

        let target = if name != current_name {
            let target = object_dir.join(&name);
            fs::rename(&folder, &target).map_err(|e| LibraryError::partial_io(&folder, e))?;
            tracing::info!("Renamed skin folder {} -> {}", folder, target);
            target
        } else {
            folder
        };

        metadata.skin_display_name = new_display_name.to_string();
        self.metadata.write(&target, &metadata)?;
        Ok(Some(target))
    }

    /// Subdirectories of an object folder, sorted by name.
    pub fn skin_folders(&self, object_dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
        list_dirs(object_dir)
    }
}

/// Child directories of `dir`, sorted by name. A missing `dir` has none.
pub fn list_dirs(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let entries = match dir.read_dir_utf8() {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(LibraryError::partial_io(dir, e)),
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| LibraryError::partial_io(dir, e))?;
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            dirs.push(entry.path().to_path_buf());
        }
    }
    dirs.sort();
    Ok(dirs)
}
