//! Where each moddable object lives under the mods root, and the external
//! loader's disabled-prefix naming convention.

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;

use crate::error::{LibraryError, Result};
use crate::models::ModdableObject;
use crate::services::sanitize::NameSanitizer;

/// The loader ignores folders whose name starts with this prefix.
#[derive(Debug, Clone)]
pub struct DisabledPrefix {
    prefix: String,
}

impl DisabledPrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.prefix
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        name.len() >= self.prefix.len()
            && name.is_char_boundary(self.prefix.len())
            && name[..self.prefix.len()].eq_ignore_ascii_case(&self.prefix)
    }

    /// `name` with the prefix removed.
    pub fn enabled_name(&self, name: &str) -> String {
        if self.is_disabled(name) {
            name[self.prefix.len()..].to_string()
        } else {
            name.to_string()
        }
    }

    pub fn disabled_name(&self, name: &str) -> String {
        if self.is_disabled(name) {
            name.to_string()
        } else {
            format!("{}{}", self.prefix, name)
        }
    }

    /// The other state's name for the same folder.
    pub fn toggled(&self, name: &str) -> String {
        if self.is_disabled(name) {
            self.enabled_name(name)
        } else {
            self.disabled_name(name)
        }
    }

    pub fn toggled_path(&self, path: &Utf8Path) -> Option<Utf8PathBuf> {
        let name = path.file_name()?;
        Some(path.with_file_name(self.toggled(name)))
    }

    /// The folder as it exists on disk under either name, and whether it is enabled.
    pub fn resolve_existing(&self, enabled_path: &Utf8Path) -> Option<(Utf8PathBuf, bool)> {
        if enabled_path.is_dir() {
            return Some((enabled_path.to_path_buf(), true));
        }
        let disabled = self.toggled_path(enabled_path)?;
        disabled.is_dir().then_some((disabled, false))
    }
}

/// Object folder paths for the catalog, computed deterministically in catalog order.
///
/// `<mods_root>/<Category>/<ObjectFolderName>`, where the folder name is the
/// sanitized display name and an object whose name collides with an earlier
/// sibling gets ` (InternalName)` appended.
#[derive(Clone)]
pub struct LibraryLayout {
    mods_root: Utf8PathBuf,
    naming: DisabledPrefix,
    sanitizer: Arc<NameSanitizer>,
    folders: IndexMap<String, Utf8PathBuf>,
}

impl LibraryLayout {
    pub fn new(
        mods_root: impl Into<Utf8PathBuf>,
        naming: DisabledPrefix,
        sanitizer: Arc<NameSanitizer>,
        objects: &[ModdableObject],
    ) -> Self {
        let mut layout = Self {
            mods_root: mods_root.into(),
            naming,
            sanitizer,
            folders: IndexMap::new(),
        };
        layout.rebuild(objects);
        layout
    }

    /// Recompute every object folder, e.g. after the catalog renamed an object.
    pub fn rebuild(&mut self, objects: &[ModdableObject]) {
        self.folders.clear();
        let mut taken: IndexMap<String, HashSet<String>> = IndexMap::new();

        for object in objects {
            let category = self.category_folder_name(&object.category);
            let siblings = taken.entry(category.to_lowercase()).or_default();

            let mut name = self.sanitizer.sanitize_or(
                &[Some(&object.display_name), Some(object.internal_name.as_str())],
                "Object",
            );
            if siblings.contains(&name.to_lowercase()) {
                let qualified = format!("{} ({})", name, object.internal_name);
                name = self.sanitizer.sanitize(&qualified);
                name = self.sanitizer.disambiguate(&name, siblings);
            }
            siblings.insert(name.to_lowercase());

            self.folders.insert(
                object.internal_name.key(),
                self.mods_root.join(category).join(name),
            );
        }
    }

    pub fn mods_root(&self) -> &Utf8Path {
        &self.mods_root
    }

    pub fn naming(&self) -> &DisabledPrefix {
        &self.naming
    }

    pub fn category_folder_name(&self, category: &str) -> String {
        self.sanitizer.sanitize_or(&[Some(category)], "Other")
    }

    /// Expected enabled folder of an object.
    pub fn object_folder(&self, internal_name: &str) -> Option<&Utf8Path> {
        self.folders
            .get(&internal_name.to_lowercase())
            .map(Utf8PathBuf::as_path)
    }

    /// Add a folder for an object created after startup.
    ///
    /// Only folders owned by other objects count as taken; a folder already on
    /// disk under the object's own name is adopted.
    pub fn insert(&mut self, object: &ModdableObject) -> Utf8PathBuf {
        if let Some(existing) = self.object_folder(object.internal_name.as_str()) {
            return existing.to_path_buf();
        }
        let path = self.planned_folder(object);
        self.folders.insert(object.internal_name.key(), path.clone());
        path
    }

    /// Where `object`'s enabled folder belongs given its current catalog
    /// entry, ignoring the folder the object itself holds now.
    pub fn planned_folder(&self, object: &ModdableObject) -> Utf8PathBuf {
        let key = object.internal_name.key();
        let category_dir = self.mods_root.join(self.category_folder_name(&object.category));
        let mut taken: HashSet<String> = HashSet::new();
        for (other, folder) in self.folders() {
            if other == key || folder.parent() != Some(category_dir.as_path()) {
                continue;
            }
            let Some(name) = folder.file_name() else {
                continue;
            };
            taken.insert(name.to_lowercase());
            taken.insert(self.naming.disabled_name(name).to_lowercase());
        }

        let mut name = self.sanitizer.sanitize_or(
            &[Some(&object.display_name), Some(object.internal_name.as_str())],
            "Object",
        );
        if taken.contains(&name.to_lowercase())
            || taken.contains(&self.naming.disabled_name(&name).to_lowercase())
        {
            name = self
                .sanitizer
                .sanitize(&format!("{} ({})", name, object.internal_name));
            name = self.sanitizer.disambiguate(&name, &taken);
        }
        category_dir.join(name)
    }

    /// Point an already known object at a new enabled folder, keeping its order.
    pub(crate) fn assign(&mut self, internal_name: &str, folder: Utf8PathBuf) {
        self.folders.insert(internal_name.to_lowercase(), folder);
    }

    /// `(internal name key, enabled folder)` for every object, in catalog order.
    pub fn folders(&self) -> impl Iterator<Item = (&str, &Utf8Path)> {
        self.folders
            .iter()
            .map(|(key, path)| (key.as_str(), path.as_path()))
    }

    /// Key of the object whose folder, enabled or disabled, contains `path`.
    pub fn object_for_path(&self, path: &Utf8Path) -> Option<&str> {
        self.folders().find_map(|(key, folder)| {
            let disabled = self.naming.toggled_path(folder)?;
            (path.starts_with(folder) || path.starts_with(&disabled)).then_some(key)
        })
    }

    pub fn remove(&mut self, internal_name: &str) -> Option<Utf8PathBuf> {
        self.folders.shift_remove(&internal_name.to_lowercase())
    }

    /// The object's folder as it exists on disk, and whether it is enabled.
    pub fn resolve_existing(&self, enabled_path: &Utf8Path) -> Option<(Utf8PathBuf, bool)> {
        self.naming.resolve_existing(enabled_path)
    }

    /// Rename an object's folder at the category level to add or remove the
    /// disabled prefix. Returns the folder's new path.
    pub fn set_object_enabled(&self, enabled_path: &Utf8Path, enabled: bool) -> Result<Utf8PathBuf> {
        let (current, is_enabled) = self
            .resolve_existing(enabled_path)
            .ok_or_else(|| LibraryError::not_found("Object folder", enabled_path.as_str()))?;
        if is_enabled == enabled {
            return Ok(current);
        }

        let target = if enabled {
            enabled_path.to_path_buf()
        } else {
            self.naming
                .toggled_path(enabled_path)
                .ok_or_else(|| LibraryError::not_found("Object folder", enabled_path.as_str()))?
        };
        if target.exists() {
            return Err(LibraryError::Collision(format!(
                "Cannot toggle object folder, {} already exists",
                target
            )));
        }

        fs::rename(&current, &target).map_err(|e| LibraryError::partial_io(&current, e))?;
        tracing::info!("Renamed object folder {} -> {}", current, target);
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ObjectKind;
    use tempfile::TempDir;

    fn prefix() -> DisabledPrefix {
        DisabledPrefix::new("DISABLED_")
    }

    #[test]
    fn test_prefix_toggling() {
        let p = prefix();
        assert!(p.is_disabled("DISABLED_Cool Mod"));
        assert!(p.is_disabled("disabled_Cool Mod"));
        assert!(!p.is_disabled("Cool Mod"));
        assert_eq!(p.enabled_name("DISABLED_Cool Mod"), "Cool Mod");
        assert_eq!(p.disabled_name("Cool Mod"), "DISABLED_Cool Mod");
        assert_eq!(p.toggled("Cool Mod"), "DISABLED_Cool Mod");
        assert_eq!(p.toggled("DISABLED_Cool Mod"), "Cool Mod");
    }

    #[test]
    fn test_prefix_handles_multibyte_names() {
        let p = prefix();
        assert!(!p.is_disabled("ééééé"));
    }

    #[test]
    fn test_object_folders_disambiguate_within_category() {
        let objects = vec![
            ModdableObject::new("traveler_a", "Traveler", "Characters", ObjectKind::Character),
            ModdableObject::new("traveler_b", "Traveler", "Characters", ObjectKind::Character),
            ModdableObject::new("traveler_w", "Traveler", "Weapons", ObjectKind::Weapon),
        ];
        let layout = LibraryLayout::new(
            "/mods",
            prefix(),
            Arc::new(NameSanitizer::new()),
            &objects,
        );

        assert_eq!(
            layout.object_folder("traveler_a").unwrap(),
            Utf8Path::new("/mods/Characters/Traveler")
        );
        assert_eq!(
            layout.object_folder("TRAVELER_B").unwrap(),
            Utf8Path::new("/mods/Characters/Traveler (traveler_b)")
        );
        assert_eq!(
            layout.object_folder("traveler_w").unwrap(),
            Utf8Path::new("/mods/Weapons/Traveler")
        );
    }

    #[test]
    fn test_object_for_path() {
        let objects = vec![ModdableObject::new("hero", "Hero", "Characters", ObjectKind::Character)];
        let layout = LibraryLayout::new("/mods", prefix(), Arc::new(NameSanitizer::new()), &objects);

        assert_eq!(
            layout.object_for_path(Utf8Path::new("/mods/Characters/Hero/Default/A")),
            Some("hero")
        );
        assert_eq!(
            layout.object_for_path(Utf8Path::new("/mods/Characters/DISABLED_Hero/x.ini")),
            Some("hero")
        );
        assert_eq!(layout.object_for_path(Utf8Path::new("/mods/Characters/Heroine")), None);
    }

    #[test]
    fn test_insert_adopts_own_folder_on_disk() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let hero = ModdableObject::new("hero", "Hero", "Characters", ObjectKind::Character);
        let mut layout = LibraryLayout::new(&root, prefix(), Arc::new(NameSanitizer::new()), &[hero.clone()]);
        fs::create_dir_all(root.join("Weapons/Sword/Default/Shiny")).unwrap();
        fs::create_dir_all(root.join("Characters/Hero")).unwrap();

        let sword = ModdableObject::new("sword", "Sword", "Weapons", ObjectKind::Weapon);
        assert_eq!(layout.insert(&sword), root.join("Weapons/Sword"));
        assert_eq!(layout.planned_folder(&hero), root.join("Characters/Hero"));

        let rival = ModdableObject::new("hero_alt", "Hero", "Characters", ObjectKind::Character);
        assert_eq!(layout.insert(&rival), root.join("Characters/Hero (hero_alt)"));
    }

    #[test]
    fn test_set_object_enabled_renames_folder() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let objects = vec![ModdableObject::new("hero", "Hero", "Characters", ObjectKind::Character)];
        let layout = LibraryLayout::new(&root, prefix(), Arc::new(NameSanitizer::new()), &objects);

        let folder = layout.object_folder("hero").unwrap().to_path_buf();
        fs::create_dir_all(&folder).unwrap();

        let disabled = layout.set_object_enabled(&folder, false).unwrap();
        assert_eq!(disabled, root.join("Characters/DISABLED_Hero"));
        assert_eq!(layout.resolve_existing(&folder), Some((disabled.clone(), false)));

        let enabled = layout.set_object_enabled(&folder, true).unwrap();
        assert_eq!(enabled, folder);
        assert!(!disabled.exists());
    }
}
