//! Mod identity generation, the export clock and the library-wide identity registry.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local};
use uuid::Uuid;

use crate::models::ModId;

/// Source of fresh identities and random name suffixes.
///
/// Injected into the library so tests can substitute a deterministic sequence.
pub trait IdGenerator: Send + Sync {
    fn new_id(&self) -> ModId;

    /// Short random token used to park a folder under a temporary name.
    fn random_suffix(&self) -> String;
}

/// UUID v4 identities.
#[derive(Debug, Default)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn new_id(&self) -> ModId {
        Uuid::new_v4()
    }

    fn random_suffix(&self) -> String {
        Uuid::new_v4().simple().to_string()[..8].to_string()
    }
}

/// Deterministic identities `00000000-...-000000000001`, `...-000000000002`, ...
#[derive(Debug)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl IdGenerator for SequentialIds {
    fn new_id(&self) -> ModId {
        Uuid::from_u128(self.next.fetch_add(1, Ordering::Relaxed) as u128)
    }

    fn random_suffix(&self) -> String {
        format!("tmp{:05}", self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Wall clock used to stamp export folders.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Local>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.0
    }
}

/// Which folder currently owns each tracked identity, across every index.
///
/// Scans funnel all discovered identities through one registry so a
/// collision is caught no matter which object's task finds it first.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    owners: Mutex<HashMap<ModId, Utf8PathBuf>>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id` for `path`. Returns false when another folder already owns it.
    ///
    /// Re-claiming an id for the folder that already owns it succeeds.
    pub fn claim(&self, id: ModId, path: &Utf8Path) -> bool {
        let mut owners = self.owners.lock().unwrap();
        match owners.get(&id) {
            Some(owner) if owner != path => false,
            _ => {
                owners.insert(id, path.to_path_buf());
                true
            }
        }
    }

    /// Record that the owner of `id` moved.
    pub fn update_path(&self, id: ModId, path: &Utf8Path) {
        if let Some(owner) = self.owners.lock().unwrap().get_mut(&id) {
            *owner = path.to_path_buf();
        }
    }

    /// Give up `id` if `path` still owns it. A claim since taken over by
    /// another folder is left alone.
    pub fn release(&self, id: ModId, path: &Utf8Path) {
        let mut owners = self.owners.lock().unwrap();
        if owners.get(&id).is_some_and(|owner| owner == path) {
            owners.remove(&id);
        }
    }

    pub fn contains(&self, id: ModId) -> bool {
        self.owners.lock().unwrap().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.owners.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.owners.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_ids() {
        let ids = SequentialIds::default();
        assert_eq!(ids.new_id(), Uuid::from_u128(1));
        assert_eq!(ids.new_id(), Uuid::from_u128(2));
    }

    #[test]
    fn test_random_suffix_length() {
        assert_eq!(RandomIds.random_suffix().len(), 8);
    }

    #[test]
    fn test_claim_detects_collision() {
        let registry = IdentityRegistry::new();
        let id = Uuid::from_u128(7);

        assert!(registry.claim(id, Utf8Path::new("/mods/a")));
        assert!(registry.claim(id, Utf8Path::new("/mods/a")));
        assert!(!registry.claim(id, Utf8Path::new("/mods/b")));

        registry.release(id, Utf8Path::new("/mods/a"));
        assert!(registry.claim(id, Utf8Path::new("/mods/b")));
    }

    #[test]
    fn test_release_from_former_owner_keeps_claim() {
        let registry = IdentityRegistry::new();
        let id = Uuid::from_u128(3);
        registry.claim(id, Utf8Path::new("/mods/old"));
        registry.clear();
        registry.claim(id, Utf8Path::new("/mods/new"));

        registry.release(id, Utf8Path::new("/mods/old"));
        assert!(registry.contains(id));
        assert!(!registry.claim(id, Utf8Path::new("/mods/other")));
    }

    #[test]
    fn test_update_path() {
        let registry = IdentityRegistry::new();
        let id = Uuid::from_u128(1);
        registry.claim(id, Utf8Path::new("/mods/a"));
        registry.update_path(id, Utf8Path::new("/mods/renamed"));
        assert!(registry.claim(id, Utf8Path::new("/mods/renamed")));
    }
}
