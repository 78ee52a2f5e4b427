use std::fs;
use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::{LibraryError, Result};

/// Sidecar identity of a skin folder. Authoritative over the folder's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkinFolderMetadata {
    #[serde(rename = "SkinInternalName")]
    pub skin_internal_name: String,

    #[serde(rename = "SkinDisplayName")]
    pub skin_display_name: String,
}

/// Which sidecar file a read came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataSource {
    Current,
    Legacy,
}

/// Reads and writes skin folder sidecars.
///
/// Reads prefer the current file name and fall back to the legacy one.
/// Writes always target the current name and leave a legacy file in place.
#[derive(Debug, Clone)]
pub struct SkinMetadataStore {
    current_file: String,
    legacy_file: String,
}

impl SkinMetadataStore {
    pub fn new(current_file: impl Into<String>, legacy_file: impl Into<String>) -> Self {
        Self {
            current_file: current_file.into(),
            legacy_file: legacy_file.into(),
        }
    }

    pub fn current_path(&self, folder: &Utf8Path) -> Utf8PathBuf {
        folder.join(&self.current_file)
    }

    pub fn legacy_path(&self, folder: &Utf8Path) -> Utf8PathBuf {
        folder.join(&self.legacy_file)
    }

    pub fn read(&self, folder: &Utf8Path) -> Option<SkinFolderMetadata> {
        self.read_with_source(folder).map(|(metadata, _)| metadata)
    }

    /// Malformed or unreadable sidecars count as absent.
    pub fn read_with_source(&self, folder: &Utf8Path) -> Option<(SkinFolderMetadata, MetadataSource)> {
        if let Some(metadata) = read_file(&self.current_path(folder)) {
            return Some((metadata, MetadataSource::Current));
        }
        read_file(&self.legacy_path(folder)).map(|metadata| (metadata, MetadataSource::Legacy))
    }

    pub fn write(&self, folder: &Utf8Path, metadata: &SkinFolderMetadata) -> Result<()> {
        let path = self.current_path(folder);
        let json = serde_json::to_string_pretty(metadata).map_err(|e| LibraryError::Corrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        fs::write(&path, json).map_err(|e| LibraryError::partial_io(path, e))
    }
}

fn read_file(path: &Utf8Path) -> Option<SkinFolderMetadata> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("Could not read skin metadata {}: {}", path, e);
            return None;
        }
    };

    match serde_json::from_str::<SkinFolderMetadata>(&content) {
        Ok(metadata) if !metadata.skin_internal_name.trim().is_empty() => Some(metadata),
        Ok(_) => {
            tracing::debug!("Ignoring skin metadata without internal name: {}", path);
            None
        }
        Err(e) => {
            tracing::debug!("Ignoring malformed skin metadata {}: {}", path, e);
            None
        }
    }
}
