//! Game catalog types: the moddable objects mods attach to.
//!
//! Object kinds are a flat discriminant ([`ObjectKind`]) with optional
//! capability extensions ([`SkinSet`], [`RarityInfo`]) instead of a type
//! hierarchy. Callers match on the extension they need.

use std::fmt;
use std::hash::{Hash, Hasher};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{LibraryError, Result};
use crate::models::config::{CatalogFile, ObjectEntry};

/// Case-insensitive identity of a moddable object or skin.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InternalName(String);

impl InternalName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercased form used as a map key.
    pub fn key(&self) -> String {
        self.0.to_lowercase()
    }

    pub fn matches(&self, other: &str) -> bool {
        self.0.to_lowercase() == other.to_lowercase()
    }
}

impl PartialEq for InternalName {
    fn eq(&self, other: &Self) -> bool {
        self.matches(&other.0)
    }
}

impl Hash for InternalName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for InternalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InternalName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    #[default]
    Character,
    Npc,
    Weapon,
    Object,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RarityInfo {
    pub stars: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skin {
    pub internal_name: InternalName,
    pub display_name: String,
    pub is_default: bool,
}

/// Skin variants of one object. Exactly one entry is the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkinSet {
    skins: Vec<Skin>,
}

impl SkinSet {
    /// Build a skin set, promoting the first skin to default when none is marked.
    pub fn new(mut skins: Vec<Skin>) -> Result<Self> {
        let defaults = skins.iter().filter(|s| s.is_default).count();
        if defaults > 1 {
            return Err(LibraryError::InvariantViolation(format!(
                "{} skins are marked as default",
                defaults
            )));
        }
        if defaults == 0 {
            if let Some(first) = skins.first_mut() {
                tracing::debug!(
                    "No default skin marked, using {}",
                    first.internal_name
                );
                first.is_default = true;
            }
        }
        Ok(Self { skins })
    }

    pub fn default_skin(&self) -> Option<&Skin> {
        self.skins.iter().find(|s| s.is_default)
    }

    pub fn find(&self, internal_name: &str) -> Option<&Skin> {
        self.skins
            .iter()
            .find(|s| s.internal_name.matches(internal_name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Skin> {
        self.skins.iter()
    }
}

/// A game entity that mods attach to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModdableObject {
    pub internal_name: InternalName,
    pub display_name: String,
    pub category: String,
    pub kind: ObjectKind,
    pub skins: Option<SkinSet>,
    pub rarity: Option<RarityInfo>,
}

impl ModdableObject {
    pub fn new(
        internal_name: impl Into<String>,
        display_name: impl Into<String>,
        category: impl Into<String>,
        kind: ObjectKind,
    ) -> Self {
        Self {
            internal_name: InternalName::new(internal_name),
            display_name: display_name.into(),
            category: category.into(),
            kind,
            skins: None,
            rarity: None,
        }
    }

    pub fn with_skins(mut self, skins: SkinSet) -> Self {
        self.skins = Some(skins);
        self
    }

    /// True when `skin` is absent or names this object's default skin.
    pub fn is_default_skin(&self, skin: Option<&str>) -> bool {
        let Some(skin) = skin else {
            return true;
        };
        match self.skins.as_ref().and_then(SkinSet::default_skin) {
            Some(default) => default.internal_name.matches(skin),
            None => false,
        }
    }

    fn from_entry(category: &str, entry: &ObjectEntry) -> Result<Self> {
        let skins = if entry.skins.is_empty() {
            None
        } else {
            let skins = entry
                .skins
                .iter()
                .map(|s| Skin {
                    internal_name: InternalName::new(&s.internal_name),
                    display_name: s.display_name.clone(),
                    is_default: s.is_default,
                })
                .collect();
            Some(SkinSet::new(skins)?)
        };

        Ok(Self {
            internal_name: InternalName::new(&entry.internal_name),
            display_name: entry.display_name.clone(),
            category: category.to_string(),
            kind: entry.kind,
            skins,
            rarity: entry.rarity,
        })
    }
}

/// Source of moddable objects.
#[cfg_attr(test, mockall::automock)]
pub trait GameCatalog: Send + Sync {
    /// All objects, in catalog order.
    fn objects(&self) -> Vec<ModdableObject>;

    fn find(&self, internal_name: &str) -> Option<ModdableObject>;
}

/// In-memory catalog, usually loaded from Catalog.yaml.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    objects: IndexMap<String, ModdableObject>,
}

impl StaticCatalog {
    pub fn new(objects: Vec<ModdableObject>) -> Result<Self> {
        let mut map = IndexMap::new();
        for object in objects {
            let key = object.internal_name.key();
            if map.contains_key(&key) {
                return Err(LibraryError::Collision(format!(
                    "Duplicate moddable object internal name: {}",
                    object.internal_name
                )));
            }
            map.insert(key, object);
        }
        Ok(Self { objects: map })
    }

    pub fn from_file(file: &CatalogFile) -> Result<Self> {
        let mut objects = Vec::new();
        for category in &file.categories {
            for entry in &category.objects {
                objects.push(ModdableObject::from_entry(&category.name, entry)?);
            }
        }
        Self::new(objects)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl GameCatalog for StaticCatalog {
    fn objects(&self) -> Vec<ModdableObject> {
        self.objects.values().cloned().collect()
    }

    fn find(&self, internal_name: &str) -> Option<ModdableObject> {
        self.objects.get(&internal_name.to_lowercase()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skin(name: &str, is_default: bool) -> Skin {
        Skin {
            internal_name: InternalName::new(name),
            display_name: name.to_string(),
            is_default,
        }
    }

    #[test]
    fn test_internal_name_case_insensitive() {
        assert_eq!(InternalName::new("Hero"), InternalName::new("HERO"));
        assert!(InternalName::new("Hero").matches("hero"));
    }

    #[test]
    fn test_skin_set_rejects_two_defaults() {
        let result = SkinSet::new(vec![skin("a", true), skin("b", true)]);
        assert!(matches!(result, Err(LibraryError::InvariantViolation(_))));
    }

    #[test]
    fn test_skin_set_promotes_first_default() {
        let set = SkinSet::new(vec![skin("a", false), skin("b", false)]).unwrap();
        assert_eq!(set.default_skin().unwrap().internal_name.as_str(), "a");
    }

    #[test]
    fn test_is_default_skin() {
        let hero = ModdableObject::new("hero", "Hero", "Characters", ObjectKind::Character)
            .with_skins(SkinSet::new(vec![skin("heroDefault", true), skin("heroSummer", false)]).unwrap());
        assert!(hero.is_default_skin(None));
        assert!(hero.is_default_skin(Some("HERODEFAULT")));
        assert!(!hero.is_default_skin(Some("heroSummer")));
    }

    #[test]
    fn test_static_catalog_rejects_duplicates() {
        let a = ModdableObject::new("hero", "Hero", "Characters", ObjectKind::Character);
        let b = ModdableObject::new("HERO", "Hero 2", "Characters", ObjectKind::Character);
        assert!(matches!(
            StaticCatalog::new(vec![a, b]),
            Err(LibraryError::Collision(_))
        ));
    }

    #[test]
    fn test_catalog_from_yaml() {
        let yaml = r#"
Categories:
  - Name: Characters
    Objects:
      - InternalName: hero
        DisplayName: Hero
        Skins:
          - InternalName: heroDefault
            DisplayName: Default
            IsDefault: true
          - InternalName: heroSummer
            DisplayName: Summer Breeze
  - Name: Weapons
    Objects:
      - InternalName: sword
        DisplayName: Sword
        Kind: Weapon
        Rarity:
          stars: 5
"#;
        let file: CatalogFile = serde_yaml_ng::from_str(yaml).unwrap();
        let catalog = StaticCatalog::from_file(&file).unwrap();
        assert_eq!(catalog.len(), 2);

        let sword = catalog.find("SWORD").unwrap();
        assert_eq!(sword.kind, ObjectKind::Weapon);
        assert_eq!(sword.rarity, Some(RarityInfo { stars: 5 }));
        assert!(sword.skins.is_none());

        let hero = catalog.find("hero").unwrap();
        assert!(hero.skins.unwrap().find("heroSummer").is_some());
    }
}
