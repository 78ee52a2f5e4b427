use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Library-wide identity of a tracked mod.
pub type ModId = Uuid;

/// Per-mod settings file stored inside each mod folder.
///
/// The `Id` field is the mod's identity; everything else is user data that
/// survives moves and renames because it travels with the folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModSettings {
    #[serde(rename = "Id")]
    pub id: ModId,

    #[serde(rename = "DateAdded", default = "Utc::now")]
    pub date_added: DateTime<Utc>,

    #[serde(rename = "CustomName", default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,

    #[serde(rename = "Author", default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// Skin this mod was explicitly assigned to, overriding its folder placement.
    #[serde(rename = "SkinOverride", default, skip_serializing_if = "Option::is_none")]
    pub skin_override: Option<String>,
}

impl ModSettings {
    pub fn new(id: ModId) -> Self {
        Self {
            id,
            date_added: Utc::now(),
            custom_name: None,
            author: None,
            skin_override: None,
        }
    }
}

/// On-disk reference to one mod folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModHandle {
    id: ModId,
    path: Utf8PathBuf,
}

impl ModHandle {
    pub fn new(id: ModId, path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            id,
            path: path.into(),
        }
    }

    pub fn id(&self) -> ModId {
        self.id
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Leaf folder name of the mod.
    pub fn folder_name(&self) -> &str {
        self.path.file_name().unwrap_or_default()
    }

    /// Skin folder holding this mod.
    pub fn parent(&self) -> Option<&Utf8Path> {
        self.path.parent()
    }

    pub(crate) fn set_path(&mut self, path: Utf8PathBuf) {
        self.path = path;
    }

    pub(crate) fn set_id(&mut self, id: ModId) {
        self.id = id;
    }
}

/// One mod as seen by a [`ModIndex`](crate::services::ModIndex).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedMod {
    pub handle: ModHandle,
    pub is_enabled: bool,
}

impl TrackedMod {
    pub fn id(&self) -> ModId {
        self.handle.id()
    }

    pub fn path(&self) -> &Utf8Path {
        self.handle.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_json_field_names() {
        let settings = ModSettings::new(Uuid::nil());
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("\"Id\""));
        assert!(json.contains("\"DateAdded\""));
        assert!(!json.contains("SkinOverride"));
    }

    #[test]
    fn test_settings_missing_date_defaults() {
        let json = format!("{{\"Id\":\"{}\"}}", Uuid::nil());
        let settings: ModSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(settings.id, Uuid::nil());
        assert!(settings.skin_override.is_none());
    }

    #[test]
    fn test_handle_folder_name() {
        let handle = ModHandle::new(Uuid::nil(), "/mods/Characters/Hero/Default/Cool Mod");
        assert_eq!(handle.folder_name(), "Cool Mod");
        assert_eq!(
            handle.parent(),
            Some(Utf8Path::new("/mods/Characters/Hero/Default"))
        );
    }
}
