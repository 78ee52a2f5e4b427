use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use super::catalog::{ObjectKind, RarityInfo};

/// Library settings from ModSync Settings.yaml
///
/// Holds the mods root and the naming conventions shared with the external loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibrarySettings {
    #[serde(rename = "Mods Root", default)]
    pub mods_root: Utf8PathBuf,

    #[serde(rename = "Disabled Prefix", default = "default_disabled_prefix")]
    pub disabled_prefix: String,

    #[serde(rename = "Default Skin Folder", default = "default_skin_folder")]
    pub default_skin_folder: String,

    #[serde(rename = "Scan Concurrency", default = "default_scan_concurrency")]
    pub scan_concurrency: usize,

    #[serde(rename = "Debug Mode", default)]
    pub debug_mode: bool,

    #[serde(rename = "Mod Settings File", default = "default_mod_settings_file")]
    pub mod_settings_file: String,

    #[serde(rename = "Skin Metadata File", default = "default_skin_metadata_file")]
    pub skin_metadata_file: String,

    #[serde(
        rename = "Legacy Skin Metadata File",
        default = "default_legacy_skin_metadata_file"
    )]
    pub legacy_skin_metadata_file: String,

    #[serde(rename = "Internal File Prefixes", default = "default_internal_prefixes")]
    pub internal_file_prefixes: Vec<String>,
}

impl Default for LibrarySettings {
    fn default() -> Self {
        Self {
            mods_root: Utf8PathBuf::from("Mods"),
            disabled_prefix: default_disabled_prefix(),
            default_skin_folder: default_skin_folder(),
            scan_concurrency: default_scan_concurrency(),
            debug_mode: false,
            mod_settings_file: default_mod_settings_file(),
            skin_metadata_file: default_skin_metadata_file(),
            legacy_skin_metadata_file: default_legacy_skin_metadata_file(),
            internal_file_prefixes: default_internal_prefixes(),
        }
    }
}

impl LibrarySettings {
    /// Settings rooted at `mods_root` with every other field at its default.
    pub fn with_root(mods_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            mods_root: mods_root.into(),
            ..Self::default()
        }
    }
}

fn default_disabled_prefix() -> String {
    "DISABLED_".to_string()
}

fn default_skin_folder() -> String {
    "Default".to_string()
}

fn default_scan_concurrency() -> usize {
    4
}

fn default_mod_settings_file() -> String {
    ".modsync_mod.json".to_string()
}

fn default_skin_metadata_file() -> String {
    ".modsync_skin.json".to_string()
}

fn default_legacy_skin_metadata_file() -> String {
    ".skin_folder.json".to_string()
}

fn default_internal_prefixes() -> Vec<String> {
    vec![".modsync".to_string(), ".skin_folder".to_string()]
}

/// Game catalog from Catalog.yaml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(rename = "Categories", default)]
    pub categories: Vec<CategoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryEntry {
    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Objects", default)]
    pub objects: Vec<ObjectEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectEntry {
    #[serde(rename = "InternalName")]
    pub internal_name: String,

    #[serde(rename = "DisplayName")]
    pub display_name: String,

    #[serde(rename = "Kind", default)]
    pub kind: ObjectKind,

    #[serde(rename = "Skins", default)]
    pub skins: Vec<SkinEntry>,

    #[serde(rename = "Rarity", default)]
    pub rarity: Option<RarityInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkinEntry {
    #[serde(rename = "InternalName")]
    pub internal_name: String,

    #[serde(rename = "DisplayName")]
    pub display_name: String,

    #[serde(rename = "IsDefault", default)]
    pub is_default: bool,
}
