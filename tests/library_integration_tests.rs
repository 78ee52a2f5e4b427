//! End-to-end tests for ModLibrary against a real temporary mod tree
//!
//! These tests verify:
//! - Identities stay unique across the whole library after a scan
//! - Refresh is idempotent and renames stale duplicates
//! - Transfers validate the whole batch before touching disk
//! - Skin folders are found by sidecar, not by name
//! - Export copies mods without disturbing the library
//! - The reactive refresher honours watch suspension

use camino::{Utf8Path, Utf8PathBuf};
use modsync::models::{ModSettings, ModdableObject, ObjectKind, Skin, SkinSet, InternalName};
use modsync::services::{
    AddMode, ChangeFeed, ExportOptions, ExportStatus, ModSettingsStore, RandomIds, StagedFolderLock,
};
use modsync::{LibraryChange, LibraryError, LibrarySettings, ModLibrary, StaticCatalog};
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::time::{Duration, timeout};
use uuid::Uuid;

struct Fixture {
    _temp: TempDir,
    root: Utf8PathBuf,
    library: Arc<ModLibrary>,
}

impl Fixture {
    fn mods(&self) -> Utf8PathBuf {
        self.root.join("Mods")
    }

    fn make_mod(&self, relative: &str) -> Utf8PathBuf {
        let dir = self.mods().join(relative);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("merged.ini"), "[TextureOverride]").unwrap();
        dir
    }
}

fn hero() -> ModdableObject {
    let skins = SkinSet::new(vec![
        Skin {
            internal_name: InternalName::new("hero"),
            display_name: "Default".to_string(),
            is_default: true,
        },
        Skin {
            internal_name: InternalName::new("heroSummer"),
            display_name: "Summer Breeze".to_string(),
            is_default: false,
        },
    ])
    .unwrap();
    ModdableObject::new("hero", "Hero", "Characters", ObjectKind::Character).with_skins(skins)
}

fn sword() -> ModdableObject {
    ModdableObject::new("sword", "Sword", "Weapons", ObjectKind::Weapon)
}

fn fixture() -> Fixture {
    let temp = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
    let settings = LibrarySettings::with_root(root.join("Mods"));
    let catalog = StaticCatalog::new(vec![hero(), sword()]).unwrap();
    Fixture {
        _temp: temp,
        library: Arc::new(ModLibrary::new(settings, Arc::new(catalog))),
        root,
    }
}

fn write_id(dir: &Utf8Path, id: Uuid) {
    ModSettingsStore::new(".modsync_mod.json", Arc::new(RandomIds))
        .write(dir, &ModSettings::new(id))
        .unwrap();
}

#[tokio::test]
async fn test_scan_makes_copied_identities_unique() {
    let f = fixture();
    let shared = Uuid::from_u128(42);
    for relative in [
        "Characters/Hero/Default/A",
        "Characters/Hero/Default/A copy",
        "Weapons/Sword/Default/A",
    ] {
        write_id(&f.make_mod(relative), shared);
    }

    let summary = f.library.scan().await.unwrap();
    assert_eq!(summary.mods, 3);
    assert_eq!(summary.identity_collisions, 2);

    let mut ids = HashSet::new();
    for object in ["hero", "sword"] {
        for entry in f.library.mods(object).await.unwrap() {
            assert!(ids.insert(entry.id()), "duplicate id {}", entry.id());
        }
    }
    assert!(ids.contains(&shared));

    // Regenerated identities were persisted, so a rescan agrees.
    let summary = f.library.scan().await.unwrap();
    assert_eq!(summary.identity_collisions, 0);
}

#[tokio::test]
async fn test_refresh_is_idempotent() {
    let f = fixture();
    f.make_mod("Characters/Hero/Default/A");
    f.library.scan().await.unwrap();

    f.make_mod("Characters/Hero/Default/B");
    fs::rename(
        f.mods().join("Characters/Hero/Default/A"),
        f.mods().join("Characters/Hero/Default/DISABLED_A"),
    )
    .unwrap();

    let first = f.library.refresh(None, None).await.unwrap();
    assert_eq!(first.new_handles.len(), 1);
    assert!(first.untracked_paths.is_empty());

    let second = f.library.refresh(None, None).await.unwrap();
    assert!(second.is_empty());

    let mods = f.library.mods("hero").await.unwrap();
    let a = mods.iter().find(|m| m.handle.folder_name() == "DISABLED_A").unwrap();
    assert!(!a.is_enabled);
}

#[tokio::test]
async fn test_interrupted_disable_leaves_duplicate_renamed() {
    let f = fixture();
    let original = f.make_mod("Characters/Hero/Default/Cool Mod");
    f.library.scan().await.unwrap();
    let id = f.library.mods("hero").await.unwrap()[0].id();

    let stale = f.make_mod("Characters/Hero/Default/DISABLED_Cool Mod");
    write_id(&stale, id);

    let result = f.library.refresh(Some("hero"), None).await.unwrap();
    assert_eq!(result.duplicate_renames.len(), 1);
    assert_eq!(result.duplicate_renames[0].renamed_to, original.with_file_name("Cool Mod (2)"));
    assert!(!stale.exists());

    let mods = f.library.mods("hero").await.unwrap();
    assert_eq!(mods.len(), 2);
    assert_eq!(mods.iter().find(|m| m.id() == id).unwrap().path(), original);
    assert_eq!(f.library.metrics().duplicates_renamed.load(std::sync::atomic::Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_transfer_validates_whole_batch() {
    let f = fixture();
    f.make_mod("Characters/Hero/Default/A");
    f.make_mod("Characters/Hero/Default/b");
    f.make_mod("Weapons/Sword/Default/B");
    f.library.scan().await.unwrap();
    let ids: Vec<Uuid> = f.library.mods("hero").await.unwrap().iter().map(|m| m.id()).collect();

    let err = f.library.transfer("hero", "sword", ids.clone()).await.unwrap_err();
    assert!(matches!(err, LibraryError::Collision(_)));
    assert!(f.mods().join("Characters/Hero/Default/A").is_dir());
    assert_eq!(f.library.mods("hero").await.unwrap().len(), 2);

    fs::remove_dir_all(f.mods().join("Weapons/Sword/Default/B")).unwrap();
    f.library.refresh(Some("sword"), None).await.unwrap();

    let outcome = f.library.transfer("hero", "sword", ids.clone()).await.unwrap();
    assert_eq!(outcome.moved.len(), 2);
    assert!(outcome.errors.is_empty());
    let moved: HashSet<Uuid> = f.library.mods("sword").await.unwrap().iter().map(|m| m.id()).collect();
    assert_eq!(moved, ids.into_iter().collect());
    assert!(f.library.mods("hero").await.unwrap().is_empty());

    assert!(matches!(
        f.library.transfer("sword", "SWORD", vec![]).await,
        Err(LibraryError::Collision(_))
    ));
}

#[tokio::test]
async fn test_skin_folder_found_by_sidecar_after_rename() {
    let f = fixture();
    f.library.scan().await.unwrap();

    let default = f
        .library
        .get_or_create_skin_folder_path("hero", None, None)
        .await
        .unwrap();
    assert_eq!(default, f.mods().join("Characters/Hero/Default"));
    assert_eq!(
        f.library
            .get_or_create_skin_folder_path("hero", Some("hero"), None)
            .await
            .unwrap(),
        default
    );

    let summer = f
        .library
        .get_or_create_skin_folder_path("hero", Some("heroSummer"), Some("Summer Breeze"))
        .await
        .unwrap();
    assert_eq!(summer, f.mods().join("Characters/Hero/Summer Breeze"));

    fs::create_dir_all(summer.join("Beach Mod")).unwrap();
    f.library.refresh(Some("hero"), None).await.unwrap();

    let renamed = f
        .library
        .rename_skin_folder("hero", "heroSummer", "Summer 2.0")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(renamed, f.mods().join("Characters/Hero/Summer 2.0"));
    assert_eq!(
        f.library
            .get_or_create_skin_folder_path("hero", Some("HEROSUMMER"), None)
            .await
            .unwrap(),
        renamed
    );

    // Tracked mods followed the folder.
    let mods = f.library.mods("hero").await.unwrap();
    assert_eq!(mods[0].path(), renamed.join("Beach Mod"));
    assert!(f.library.refresh(Some("hero"), None).await.unwrap().is_empty());

    assert!(matches!(
        f.library.rename_skin_folder("hero", "hero", "Base").await,
        Err(LibraryError::Unsupported(_))
    ));
}

#[tokio::test]
async fn test_add_staged_mod_and_move_between_objects() {
    let f = fixture();
    f.library.scan().await.unwrap();

    let staged = f.root.join("Downloads/Summer Outfit");
    fs::create_dir_all(&staged).unwrap();
    fs::write(staged.join("merged.ini"), "[Constants]").unwrap();
    let lock = StagedFolderLock::acquire(&staged).unwrap();

    let added = f
        .library
        .add_mod(&staged, "hero", AddMode::Move, Some("heroSummer"), Some(lock))
        .await
        .unwrap();
    assert!(!staged.exists());
    assert_eq!(added.path().parent().unwrap().file_name(), Some("Summer Breeze"));

    // Moving a tracked folder into another object keeps its identity.
    let moved = f
        .library
        .add_mod(added.path(), "sword", AddMode::Move, None, None)
        .await
        .unwrap();
    assert_eq!(moved.id(), added.id());
    assert_eq!(moved.path(), f.mods().join("Weapons/Sword/Default/Summer Outfit"));
    assert!(f.library.mods("hero").await.unwrap().is_empty());

    // Copying back gives the copy a fresh identity.
    let copy = f
        .library
        .add_mod(moved.path(), "hero", AddMode::Copy, None, None)
        .await
        .unwrap();
    assert_ne!(copy.id(), moved.id());
    assert_eq!(f.library.tracked_count().await, 2);
}

#[tokio::test]
async fn test_export_with_category_structure() {
    let f = fixture();
    f.make_mod("Characters/Hero/Default/A");
    f.make_mod("Characters/Hero/Default/DISABLED_B");
    f.library.scan().await.unwrap();

    let options = ExportOptions {
        remove_local_settings: true,
        keep_category_structure: true,
        set_status: ExportStatus::EnableAll,
        zip: false,
    };
    let outcome = f
        .library
        .export(&["hero".to_string()], &f.root.join("Exports"), options)
        .await
        .unwrap();

    assert!(outcome.errors.is_empty());
    let hero = outcome.root.join("Characters/Hero/Default");
    assert!(hero.join("A/merged.ini").is_file());
    assert!(hero.join("B").is_dir());
    assert!(!hero.join("A/.modsync_mod.json").exists());

    // The library itself is untouched.
    assert!(f.mods().join("Characters/Hero/Default/DISABLED_B").is_dir());
    assert!(f.mods().join("Characters/Hero/Default/A/.modsync_mod.json").is_file());
    assert!(f.library.refresh(None, None).await.unwrap().is_empty());

    let zipped = ExportOptions {
        zip: true,
        ..Default::default()
    };
    assert!(matches!(
        f.library.export(&[], &f.root.join("Exports"), zipped).await,
        Err(LibraryError::Unsupported(_))
    ));
}

#[tokio::test]
async fn test_reactive_refresh_respects_suspension() {
    let f = fixture();
    f.make_mod("Characters/Hero/Default/A");
    f.library.scan().await.unwrap();

    let (feed, changes) = ChangeFeed::channel();
    let worker = f.library.clone().spawn_reactive_refresh(changes);
    let mut events = f.library.state().subscribe();

    {
        let _suspended = f.library.suspend_watch("hero").unwrap();
        let b = f.make_mod("Characters/Hero/Default/B");
        assert!(feed.notify(b));

        let quiet = timeout(Duration::from_millis(200), async {
            loop {
                if let Ok(LibraryChange::RefreshFinished { .. }) = events.recv().await {
                    return;
                }
            }
        })
        .await;
        assert!(quiet.is_err(), "suspended object was refreshed");
    }
    assert_eq!(f.library.mods("hero").await.unwrap().len(), 1);

    assert!(feed.notify(f.mods().join("Characters/Hero/Default/B")));
    let new = timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(LibraryChange::RefreshFinished { new, .. }) = events.recv().await {
                return new;
            }
        }
    })
    .await
    .expect("no refresh after the suspension ended");
    assert_eq!(new, 1);

    // Paths outside every object are ignored.
    assert!(feed.notify(f.root.join("Downloads/whatever")));
    drop(feed);
    worker.await.unwrap();
    assert_eq!(f.library.mods("hero").await.unwrap().len(), 2);
}
