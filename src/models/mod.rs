//! Data models for the mod library.
//!
//! - [`ModdableObject`]: a catalog entity (character, weapon, ...) that owns one mod folder
//! - [`TrackedMod`] / [`ModHandle`]: an indexed mod and its on-disk folder
//! - [`ModSettings`]: the per-mod settings file carrying the mod's identity
//! - [`LibrarySettings`]: paths and loader naming conventions from `ModSync Settings.yaml`
//! - [`LibraryState`]: status snapshot held by [`StateManager`](crate::state::StateManager)

pub mod catalog;
pub mod config;
pub mod library_state;
pub mod mod_entry;

pub use catalog::{
    GameCatalog, InternalName, ModdableObject, ObjectKind, RarityInfo, Skin, SkinSet,
    StaticCatalog,
};
pub use config::{CatalogFile, LibrarySettings};
pub use library_state::LibraryState;
pub use mod_entry::{ModHandle, ModId, ModSettings, TrackedMod};
