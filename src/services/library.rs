//! The library facade: owns every object's index and runs the engine's
//! operations under the right locks.
//!
//! Locking:
//! - the set of indexes sits behind one coarse `RwLock`, held only to add,
//!   remove or look up whole indexes and never across an `.await`;
//! - each index has its own async mutex, held for the duration of any
//!   scan, refresh, transfer or export touching it. Operations needing more
//!   than one index lock them in key order.
//!
//! Filesystem work runs on the blocking pool with owned guards.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{LibraryError, Result};
use crate::metrics::Metrics;
use crate::models::{GameCatalog, LibrarySettings, ModId, ModdableObject, TrackedMod};
use crate::services::export::{ExportOptions, ExportOutcome, ExportPipeline, ExportSource};
use crate::services::identity::{Clock, IdGenerator, IdentityRegistry, RandomIds, SystemClock};
use crate::services::layout::{DisabledPrefix, LibraryLayout};
use crate::services::mod_files::ModSettingsStore;
use crate::services::mod_index::ModIndex;
use crate::services::reconcile::{ReconcileEngine, RefreshResult};
use crate::services::sanitize::NameSanitizer;
use crate::services::scanner::{LibraryScanner, ScanSummary, ScanTarget};
use crate::services::skin_folders::SkinFolderResolver;
use crate::services::skin_metadata::SkinMetadataStore;
use crate::services::transfer::{AddMode, StagedFolderLock, TransferEngine, TransferOutcome};
use crate::services::watch::{FsChange, WatchGate, WatchSuspension};
use crate::state::{LibraryChange, StateManager};

/// One object's index and the gate its suspensions share.
struct IndexSlot {
    index: Arc<Mutex<ModIndex>>,
    gate: Arc<WatchGate>,
}

impl IndexSlot {
    fn new(index: ModIndex) -> Arc<Self> {
        let gate = index.gate().clone();
        Arc::new(Self {
            index: Arc::new(Mutex::new(index)),
            gate,
        })
    }

    async fn lock(&self) -> OwnedMutexGuard<ModIndex> {
        self.index.clone().lock_owned().await
    }
}

pub struct ModLibrary {
    settings: LibrarySettings,
    catalog: Arc<dyn GameCatalog>,
    sanitizer: Arc<NameSanitizer>,
    naming: DisabledPrefix,
    layout: RwLock<LibraryLayout>,
    resolver: SkinFolderResolver,
    mod_settings: ModSettingsStore,
    registry: Arc<IdentityRegistry>,
    indexes: RwLock<IndexMap<String, Arc<IndexSlot>>>,
    state: StateManager,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
}

impl ModLibrary {
    pub fn new(settings: LibrarySettings, catalog: Arc<dyn GameCatalog>) -> Self {
        Self::with_ids(settings, catalog, Arc::new(RandomIds))
    }

    /// Build a library drawing identities and random suffixes from `ids`.
    pub fn with_ids(
        settings: LibrarySettings,
        catalog: Arc<dyn GameCatalog>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let sanitizer = Arc::new(NameSanitizer::new());
        let naming = DisabledPrefix::new(&settings.disabled_prefix);
        let layout = LibraryLayout::new(
            &settings.mods_root,
            naming.clone(),
            sanitizer.clone(),
            &catalog.objects(),
        );
        let resolver = SkinFolderResolver::new(
            sanitizer.clone(),
            SkinMetadataStore::new(
                &settings.skin_metadata_file,
                &settings.legacy_skin_metadata_file,
            ),
            &settings.default_skin_folder,
        );
        let mod_settings = ModSettingsStore::new(&settings.mod_settings_file, ids);

        Self {
            settings,
            catalog,
            sanitizer,
            naming,
            layout: RwLock::new(layout),
            resolver,
            mod_settings,
            registry: Arc::new(IdentityRegistry::new()),
            indexes: RwLock::new(IndexMap::new()),
            state: StateManager::new(),
            metrics: Arc::new(Metrics::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamp exports with `clock` instead of the system time.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &LibrarySettings {
        &self.settings
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn resolver(&self) -> &SkinFolderResolver {
        &self.resolver
    }

    /// Keys of every indexed object, in catalog order.
    pub fn objects(&self) -> Vec<String> {
        self.indexes.read().unwrap().keys().cloned().collect()
    }

    /// Expected enabled folder of an object.
    pub fn object_folder(&self, object: &str) -> Option<Utf8PathBuf> {
        self.layout
            .read()
            .unwrap()
            .object_folder(object)
            .map(Utf8Path::to_path_buf)
    }

    /// Rebuild every index from disk.
    ///
    /// Every existing index is held for the whole rescan, so no operation on
    /// a superseded index can touch the identities the rescan hands out.
    pub async fn scan(&self) -> Result<ScanSummary> {
        self.state.start_scan();

        let mut previous: Vec<(String, Arc<IndexSlot>)> = self
            .indexes
            .read()
            .unwrap()
            .iter()
            .map(|(key, slot)| (key.clone(), slot.clone()))
            .collect();
        previous.sort_by(|a, b| a.0.cmp(&b.0));
        let mut superseded = Vec::with_capacity(previous.len());
        for (_, slot) in &previous {
            superseded.push(slot.lock().await);
        }
        self.registry.clear();

        let targets: Vec<ScanTarget> = {
            let layout = self.layout.read().unwrap();
            self.catalog
                .objects()
                .into_iter()
                .filter_map(|object| {
                    let folder = layout.object_folder(object.internal_name.as_str())?;
                    Some(ScanTarget {
                        folder: folder.to_path_buf(),
                        object,
                    })
                })
                .collect()
        };

        let scanner = LibraryScanner::new(
            self.mod_settings.clone(),
            self.naming.clone(),
            self.settings.scan_concurrency,
            self.metrics.clone(),
        );
        let scanned = scanner.scan(targets, self.registry.clone()).await;
        let (scanned, summary) = match scanned {
            Ok(result) => result,
            Err(e) => {
                self.registry.clear();
                for index in &superseded {
                    index.reclaim_all();
                }
                self.state.finish_scan(0, 0, 0);
                tracing::error!("Scan aborted: {}", e);
                return Err(e);
            }
        };

        let gates: HashMap<&str, Arc<WatchGate>> = previous
            .iter()
            .map(|(key, slot)| (key.as_str(), slot.gate.clone()))
            .collect();
        let slots: IndexMap<String, Arc<IndexSlot>> = scanned
            .into_iter()
            .map(|s| {
                let mut index = s.index;
                let key = index.object().internal_name.key();
                if let Some(gate) = gates.get(key.as_str()) {
                    index.share_gate(gate.clone());
                }
                (key, IndexSlot::new(index))
            })
            .collect();
        *self.indexes.write().unwrap() = slots;
        for index in superseded.iter_mut() {
            index.retire();
        }
        drop(superseded);

        self.state
            .finish_scan(summary.objects, summary.mods, summary.errors.len());
        Ok(summary)
    }

    /// Reconcile one object, or every object, against disk.
    ///
    /// `cancel` is checked between objects, never inside one.
    pub async fn refresh(
        &self,
        object: Option<&str>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<RefreshResult> {
        let slots = match object {
            Some(name) => vec![self.slot(name)?],
            None => self.indexes.read().unwrap().values().cloned().collect(),
        };

        self.state.start_refresh(object);
        let outcome = self.refresh_slots(slots, cancel).await;
        let tracked = self.tracked_count().await;
        match outcome {
            Ok(result) => {
                self.state.finish_refresh(&result, tracked);
                tracing::info!(
                    "Refresh finished: {} new, {} untracked, {} duplicates, {} errors",
                    result.new_handles.len(),
                    result.untracked_paths.len(),
                    result.duplicate_renames.len(),
                    result.errors.len()
                );
                Ok(result)
            }
            Err(e) => {
                self.state.finish_refresh(&RefreshResult::default(), tracked);
                tracing::error!("Refresh aborted: {}", e);
                Err(e)
            }
        }
    }

    async fn refresh_slots(
        &self,
        slots: Vec<Arc<IndexSlot>>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<RefreshResult> {
        let mut result = RefreshResult::default();
        for slot in slots {
            if cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
                tracing::info!("Refresh cancelled");
                return Err(LibraryError::Cancelled);
            }

            let _suspended = slot.gate.suspend();
            let mut index = slot.lock().await;
            let sanitizer = self.sanitizer.clone();
            let strict = self.settings.debug_mode;
            let found = blocking(move || ReconcileEngine::new(&sanitizer, strict).reconcile(&mut index))
                .await?;

            self.metrics.record_refresh();
            self.metrics.record_duplicates(found.duplicate_renames.len());
            result.merge(found);
        }
        Ok(result)
    }

    /// Put the folder at `source` into `object`'s folder for `skin` and track it.
    ///
    /// If `source` is an already tracked mod and is moved, its old entry is
    /// dropped and the destination tracks it under the same identity.
    pub async fn add_mod(
        &self,
        source: &Utf8Path,
        object: &str,
        mode: AddMode,
        skin: Option<&str>,
        staged: Option<StagedFolderLock>,
    ) -> Result<TrackedMod> {
        let dest_key = self.slot_key(object)?;
        let source_key = self
            .layout
            .read()
            .unwrap()
            .object_for_path(source)
            .map(str::to_string)
            .filter(|_| mode == AddMode::Move);
        let within_dest = source_key.as_deref() == Some(dest_key.as_str());
        let owner_key = source_key.filter(|_| !within_dest);

        let dest_slot = self.slot(&dest_key)?;
        let owner_slot = owner_key.as_deref().map(|k| self.slot(k)).transpose()?;

        let _dest_suspended = dest_slot.gate.suspend();
        let _owner_suspended = owner_slot.as_ref().map(|s| s.gate.suspend());
        let (mut dest, mut owner) = match (&owner_key, &owner_slot) {
            (Some(owner_key), Some(owner_slot)) => {
                let (dest, owner) = lock_pair(&dest_key, &dest_slot, owner_key, owner_slot).await;
                (dest, Some(owner))
            }
            _ => (dest_slot.lock().await, None),
        };

        let resolver = self.resolver.clone();
        let source = source.to_path_buf();
        let skin = skin.map(str::to_string);
        blocking(move || {
            let mut staged = staged;
            // The identity must be free before the destination claims it.
            let previous = match owner.as_mut() {
                Some(owner) => take_tracked(owner, &source),
                None if within_dest => take_tracked(&mut dest, &source),
                None => None,
            };

            let added = TransferEngine::new(&resolver).add_mod(
                &source,
                &mut dest,
                mode,
                skin.as_deref(),
                staged.as_mut(),
            );
            if let (Err(_), Some(previous)) = (&added, previous) {
                if previous.path().is_dir() {
                    let restored = match owner.as_mut() {
                        Some(owner) => owner.track(previous.handle),
                        None => dest.track(previous.handle),
                    };
                    if let Err(e) = restored {
                        tracing::warn!("Could not restore tracking of {}: {}", source, e);
                    }
                }
            }
            added
        })
        .await
    }

    /// Move `ids` from one object to another. See [`TransferEngine::transfer`].
    pub async fn transfer(&self, from: &str, to: &str, ids: Vec<ModId>) -> Result<TransferOutcome> {
        let from_key = self.slot_key(from)?;
        let to_key = self.slot_key(to)?;
        if from_key == to_key {
            return Err(LibraryError::Collision(format!(
                "Cannot transfer mods from {} to itself",
                from
            )));
        }
        let from_slot = self.slot(&from_key)?;
        let to_slot = self.slot(&to_key)?;

        let _from_suspended = from_slot.gate.suspend();
        let _to_suspended = to_slot.gate.suspend();
        let (mut source, mut destination) = lock_pair(&from_key, &from_slot, &to_key, &to_slot).await;

        let resolver = self.resolver.clone();
        let outcome = blocking(move || {
            TransferEngine::new(&resolver).transfer(&mut source, &mut destination, &ids)
        })
        .await?;

        self.metrics.record_transferred(outcome.moved.len());
        self.state.emit(LibraryChange::ModsTransferred {
            from: from_key,
            to: to_key,
            count: outcome.moved.len(),
        });
        Ok(outcome)
    }

    /// Copy the mods of `objects` (every object when empty) out to `destination`.
    pub async fn export(
        &self,
        objects: &[String],
        destination: &Utf8Path,
        options: ExportOptions,
    ) -> Result<ExportOutcome> {
        let mut keys: Vec<String> = if objects.is_empty() {
            self.objects()
        } else {
            objects
                .iter()
                .map(|o| self.slot_key(o))
                .collect::<Result<_>>()?
        };
        keys.sort();
        keys.dedup();

        let slots = keys
            .iter()
            .map(|key| self.slot(key))
            .collect::<Result<Vec<_>>>()?;

        self.state.start_export();
        let suspensions: Vec<WatchSuspension> = slots.iter().map(|s| s.gate.suspend()).collect();
        let mut guards = Vec::with_capacity(slots.len());
        for slot in &slots {
            guards.push(slot.lock().await);
        }

        let pipeline = ExportPipeline::new(
            self.naming.clone(),
            self.settings.internal_file_prefixes.clone(),
            self.mod_settings.ids().clone(),
        )
        .with_clock(self.clock.clone())
        .with_skin_sidecars(vec![
            self.settings.skin_metadata_file.clone(),
            self.settings.legacy_skin_metadata_file.clone(),
        ]);
        let naming = self.naming.clone();
        let state = self.state.clone();
        let destination = destination.to_path_buf();
        let exported = blocking(move || {
            let sources: Vec<ExportSource> = guards
                .iter()
                .map(|index| export_source(index, &naming))
                .collect();
            pipeline.export(&sources, &destination, &options, |progress| {
                state.export_progress(progress.percent());
            })
        })
        .await;
        drop(suspensions);

        match exported {
            Ok(outcome) => {
                self.metrics.record_exported(outcome.exported.len());
                self.state
                    .finish_export(outcome.exported.len(), outcome.errors.len());
                Ok(outcome)
            }
            Err(e) => {
                self.state.finish_export(0, 1);
                tracing::error!("Export aborted: {}", e);
                Err(e)
            }
        }
    }

    /// Path of the folder for `skin` inside `object`'s folder, creating it if needed.
    pub async fn get_or_create_skin_folder_path(
        &self,
        object: &str,
        skin: Option<&str>,
        preferred_display_name: Option<&str>,
    ) -> Result<Utf8PathBuf> {
        let slot = self.slot(object)?;
        let _suspended = slot.gate.suspend();
        let mut index = slot.lock().await;

        let resolver = self.resolver.clone();
        let skin = skin.map(str::to_string);
        let preferred = preferred_display_name.map(str::to_string);
        blocking(move || {
            let object = index.object().clone();
            let path = resolver.get_or_create(
                index.folder(),
                &object,
                skin.as_deref(),
                preferred.as_deref(),
            )?;
            index.mark_instantiated(true);
            Ok(path)
        })
        .await
    }

    /// Rename the folder of `skin` to follow a new display name. Tracked mods
    /// inside it follow the folder.
    pub async fn rename_skin_folder(
        &self,
        object: &str,
        skin: &str,
        new_display_name: &str,
    ) -> Result<Option<Utf8PathBuf>> {
        let slot = self.slot(object)?;
        let _suspended = slot.gate.suspend();
        let mut index = slot.lock().await;

        let resolver = self.resolver.clone();
        let skin = skin.to_string();
        let new_display_name = new_display_name.to_string();
        blocking(move || {
            let object = index.object().clone();
            let dir = index.folder().to_path_buf();
            let before = resolver.find(&dir, &skin)?;
            let after = resolver.rename(&dir, &object, &skin, &new_display_name)?;
            if let (Some(before), Some(after)) = (&before, &after) {
                if before != after {
                    index.rebase_prefix(before, after);
                }
            }
            Ok(after)
        })
        .await
    }

    pub async fn enable_object(&self, object: &str) -> Result<Utf8PathBuf> {
        self.set_object_enabled(object, true).await
    }

    pub async fn disable_object(&self, object: &str) -> Result<Utf8PathBuf> {
        self.set_object_enabled(object, false).await
    }

    /// Rename the object's folder at the category level to add or remove the
    /// disabled prefix.
    async fn set_object_enabled(&self, object: &str, enabled: bool) -> Result<Utf8PathBuf> {
        let key = self.slot_key(object)?;
        let slot = self.slot(&key)?;
        let enabled_path = self
            .object_folder(&key)
            .ok_or_else(|| LibraryError::not_found("Object folder", object))?;
        let layout = self.layout.read().unwrap().clone();

        let _suspended = slot.gate.suspend();
        let mut index = slot.lock().await;
        let folder = blocking(move || {
            let current = index.folder().to_path_buf();
            let folder = layout.set_object_enabled(&enabled_path, enabled)?;
            index.rebase_prefix(&current, &folder);
            index.set_folder(folder.clone());
            Ok(folder)
        })
        .await?;

        self.state
            .emit(LibraryChange::ObjectToggled { object: key, enabled });
        Ok(folder)
    }

    /// Add an index for an object that appeared after startup, then refresh it.
    pub async fn create_index(&self, object: ModdableObject) -> Result<()> {
        let key = object.internal_name.key();
        if self.indexes.read().unwrap().contains_key(&key) {
            return Err(LibraryError::Collision(format!(
                "Moddable object {} already has an index",
                object.internal_name
            )));
        }

        let folder = self.layout.write().unwrap().insert(&object);
        let mut index = ModIndex::new(
            object,
            folder.clone(),
            self.registry.clone(),
            self.mod_settings.clone(),
            self.naming.clone(),
        );
        if let Some((existing, _)) = self.naming.resolve_existing(&folder) {
            index.set_folder(existing);
            index.mark_instantiated(true);
        }

        {
            let mut indexes = self.indexes.write().unwrap();
            if indexes.contains_key(&key) {
                return Err(LibraryError::Collision(format!(
                    "Moddable object {} already has an index",
                    key
                )));
            }
            indexes.insert(key.clone(), IndexSlot::new(index));
        }
        self.state.set_object_count(self.indexes.read().unwrap().len());
        tracing::info!("Created index for {}", key);

        self.refresh(Some(&key), None).await.map(|_| ())
    }

    /// Drop an object's index, releasing its identities. Files are untouched.
    pub async fn remove_index(&self, object: &str) -> Result<()> {
        let key = self.slot_key(object)?;
        let slot = self
            .indexes
            .write()
            .unwrap()
            .shift_remove(&key)
            .ok_or_else(|| LibraryError::not_found("Moddable object", object))?;
        self.layout.write().unwrap().remove(&key);

        let _suspended = slot.gate.suspend();
        slot.lock().await.release_all();
        self.state.set_object_count(self.indexes.read().unwrap().len());
        tracing::info!("Removed index for {}", key);
        Ok(())
    }

    /// Rename an object's folder after its catalog display name changed,
    /// keeping its enabled or disabled state.
    pub async fn sync_object_folder(&self, object: &ModdableObject) -> Result<Utf8PathBuf> {
        let key = object.internal_name.key();
        let slot = self.slot(&key)?;

        let new_enabled = self.layout.read().unwrap().planned_folder(object);

        let _suspended = slot.gate.suspend();
        let mut index = slot.lock().await;
        let naming = self.naming.clone();
        let object = object.clone();
        let planned = new_enabled.clone();
        let folder = blocking(move || {
            index.set_object(object);
            let current = index.folder().to_path_buf();
            let enabled = !naming.is_disabled(current.file_name().unwrap_or_default());
            let target = if enabled {
                new_enabled
            } else {
                naming
                    .toggled_path(&new_enabled)
                    .ok_or_else(|| LibraryError::not_found("Object folder", new_enabled.as_str()))?
            };
            if target == current {
                return Ok(target);
            }

            if current.is_dir() {
                if target.exists() {
                    return Err(LibraryError::Collision(format!(
                        "Cannot rename object folder, {} already exists",
                        target
                    )));
                }
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| LibraryError::partial_io(parent, e))?;
                }
                std::fs::rename(&current, &target)
                    .map_err(|e| LibraryError::partial_io(&current, e))?;
                tracing::info!("Renamed object folder {} -> {}", current, target);
            }
            index.rebase_prefix(&current, &target);
            index.set_folder(target.clone());
            Ok(target)
        })
        .await?;

        self.layout.write().unwrap().assign(&key, planned);
        Ok(folder)
    }

    pub async fn enable_mod(&self, object: &str, id: ModId) -> Result<()> {
        self.with_index(object, move |index| index.enable(id)).await
    }

    pub async fn disable_mod(&self, object: &str, id: ModId) -> Result<()> {
        self.with_index(object, move |index| index.disable(id)).await
    }

    pub async fn rename_mod(&self, object: &str, id: ModId, new_folder_name: &str) -> Result<()> {
        let name = new_folder_name.to_string();
        self.with_index(object, move |index| index.rename(id, &name)).await
    }

    pub async fn delete_mod(&self, object: &str, id: ModId) -> Result<TrackedMod> {
        self.with_index(object, move |index| index.delete_by_id(id)).await
    }

    /// Move a tracked mod to the folder of another skin of the same object.
    pub async fn move_mod_to_skin(&self, object: &str, id: ModId, skin: Option<&str>) -> Result<TrackedMod> {
        let resolver = self.resolver.clone();
        let skin = skin.map(str::to_string);
        self.with_index(object, move |index| {
            TransferEngine::new(&resolver).relocate_to_skin(index, id, skin.as_deref())
        })
        .await
    }

    /// Snapshot of an object's tracked mods.
    pub async fn mods(&self, object: &str) -> Result<Vec<TrackedMod>> {
        let slot = self.slot(object)?;
        let index = slot.lock().await;
        Ok(index.all().cloned().collect())
    }

    /// Number of tracked mods across the library.
    pub async fn tracked_count(&self) -> usize {
        let slots: Vec<Arc<IndexSlot>> = self.indexes.read().unwrap().values().cloned().collect();
        let mut total = 0;
        for slot in slots {
            total += slot.lock().await.len();
        }
        total
    }

    /// Suppress reactive refreshes of `object` while the guard lives.
    pub fn suspend_watch(&self, object: &str) -> Result<WatchSuspension> {
        Ok(self.slot(object)?.gate.suspend())
    }

    /// Refresh objects as changes arrive on the feed, skipping objects whose
    /// watch is suspended. Changes queued together are coalesced per object.
    pub fn spawn_reactive_refresh(
        self: Arc<Self>,
        mut changes: mpsc::UnboundedReceiver<FsChange>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(change) = changes.recv().await {
                let mut pending = vec![change];
                while let Ok(more) = changes.try_recv() {
                    pending.push(more);
                }

                let mut objects: Vec<String> = Vec::new();
                let mut seen = HashSet::new();
                for change in pending {
                    let Some(key) = self.object_for_path(&change.path) else {
                        continue;
                    };
                    if seen.insert(key.clone()) {
                        objects.push(key);
                    }
                }

                for key in objects {
                    let Ok(slot) = self.slot(&key) else {
                        continue;
                    };
                    if slot.gate.is_suspended() {
                        tracing::debug!("Watch suspended for {}, ignoring change", key);
                        continue;
                    }
                    if let Err(e) = self.refresh(Some(&key), None).await {
                        tracing::warn!("Reactive refresh of {} failed: {}", key, e);
                    }
                }
            }
            tracing::debug!("Change feed closed");
        })
    }

    /// Key of the object whose folder contains `path`.
    pub fn object_for_path(&self, path: &Utf8Path) -> Option<String> {
        self.layout
            .read()
            .unwrap()
            .object_for_path(path)
            .map(str::to_string)
    }

    async fn with_index<T, F>(&self, object: &str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut ModIndex) -> Result<T> + Send + 'static,
    {
        let slot = self.slot(object)?;
        let _suspended = slot.gate.suspend();
        let mut index = slot.lock().await;
        blocking(move || f(&mut index)).await
    }

    fn slot_key(&self, object: &str) -> Result<String> {
        let key = object.to_lowercase();
        if self.indexes.read().unwrap().contains_key(&key) {
            Ok(key)
        } else {
            Err(LibraryError::not_found("Moddable object", object))
        }
    }

    fn slot(&self, object: &str) -> Result<Arc<IndexSlot>> {
        self.indexes
            .read()
            .unwrap()
            .get(&object.to_lowercase())
            .cloned()
            .ok_or_else(|| LibraryError::not_found("Moddable object", object))
    }
}

/// Lock two indexes in key order, returning the guards in argument order.
async fn lock_pair(
    a_key: &str,
    a: &IndexSlot,
    b_key: &str,
    b: &IndexSlot,
) -> (OwnedMutexGuard<ModIndex>, OwnedMutexGuard<ModIndex>) {
    if a_key <= b_key {
        let a = a.lock().await;
        let b = b.lock().await;
        (a, b)
    } else {
        let b = b.lock().await;
        let a = a.lock().await;
        (a, b)
    }
}

fn take_tracked(index: &mut ModIndex, path: &Utf8Path) -> Option<TrackedMod> {
    let id = index.find_by_path(path)?.id();
    index.untrack_id(id)
}

fn export_source(index: &ModIndex, naming: &DisabledPrefix) -> ExportSource {
    let folder = index.folder();
    ExportSource {
        category_folder: folder
            .parent()
            .and_then(Utf8Path::file_name)
            .unwrap_or_default()
            .to_string(),
        object_folder: naming.enabled_name(folder.file_name().unwrap_or_default()),
        mods: index.all().cloned().collect(),
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LibraryError::InvariantViolation(format!("Blocking task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog::MockGameCatalog;
    use crate::models::{ObjectKind, StaticCatalog};
    use crate::services::identity::SequentialIds;
    use std::fs;
    use tempfile::TempDir;

    fn library(root: &Utf8Path, objects: Vec<ModdableObject>) -> ModLibrary {
        ModLibrary::with_ids(
            LibrarySettings::with_root(root),
            Arc::new(StaticCatalog::new(objects).unwrap()),
            Arc::new(SequentialIds::default()),
        )
    }

    fn hero() -> ModdableObject {
        ModdableObject::new("hero", "Hero", "Characters", ObjectKind::Character)
    }

    #[tokio::test]
    async fn test_scan_uses_catalog_mock() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("Characters/Hero/Default/A")).unwrap();

        let mut catalog = MockGameCatalog::new();
        catalog.expect_objects().returning(|| vec![hero()]);
        let lib = ModLibrary::with_ids(
            LibrarySettings::with_root(&root),
            Arc::new(catalog),
            Arc::new(SequentialIds::default()),
        );

        let summary = lib.scan().await.unwrap();
        assert_eq!(summary.mods, 1);
        assert_eq!(lib.objects(), vec!["hero".to_string()]);
        assert_eq!(lib.state().snapshot().tracked_mods, 1);
    }

    #[tokio::test]
    async fn test_refresh_unknown_object() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let lib = library(&root, vec![hero()]);
        lib.scan().await.unwrap();

        assert!(matches!(
            lib.refresh(Some("nobody"), None).await,
            Err(LibraryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_refresh_honours_cancellation() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let lib = library(&root, vec![hero()]);
        lib.scan().await.unwrap();

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        assert!(matches!(
            lib.refresh(None, Some(rx)).await,
            Err(LibraryError::Cancelled)
        ));
        assert!(!lib.state().snapshot().is_refreshing);
    }

    #[tokio::test]
    async fn test_disable_object_moves_tracked_paths() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("Characters/Hero/Default/A")).unwrap();
        let lib = library(&root, vec![hero()]);
        lib.scan().await.unwrap();

        let folder = lib.disable_object("hero").await.unwrap();
        assert_eq!(folder, root.join("Characters/DISABLED_Hero"));
        let mods = lib.mods("hero").await.unwrap();
        assert_eq!(mods[0].path(), root.join("Characters/DISABLED_Hero/Default/A"));

        assert!(lib.refresh(Some("hero"), None).await.unwrap().is_empty());
        lib.enable_object("hero").await.unwrap();
        assert!(root.join("Characters/Hero/Default/A").is_dir());
    }

    #[tokio::test]
    async fn test_sync_object_folder_after_catalog_rename() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("Characters/Hero/Default/A")).unwrap();
        let lib = library(&root, vec![hero()]);
        lib.scan().await.unwrap();

        let renamed = ModdableObject::new("hero", "Heroine", "Characters", ObjectKind::Character);
        let folder = lib.sync_object_folder(&renamed).await.unwrap();

        assert_eq!(folder, root.join("Characters/Heroine"));
        assert!(folder.join("Default/A").is_dir());
        assert_eq!(lib.object_for_path(&folder.join("Default/A")), Some("hero".to_string()));
        assert!(lib.refresh(Some("hero"), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rescan_waits_for_running_operations() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let a = root.join("Characters/Hero/Default/A");
        fs::create_dir_all(&a).unwrap();
        let lib = Arc::new(library(&root, vec![hero()]));
        lib.scan().await.unwrap();
        let id = lib.mods("hero").await.unwrap()[0].id();

        let stale = lib.slot("hero").unwrap();
        let held = stale.lock().await;
        let rescan = tokio::spawn({
            let lib = lib.clone();
            async move { lib.scan().await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!rescan.is_finished());
        drop(held);
        rescan.await.unwrap().unwrap();

        // The superseded index no longer reaches the shared identities.
        let mut old = stale.lock().await;
        assert!(old.is_empty());
        old.untrack(&a);
        drop(old);
        assert!(lib.registry.contains(id));
        assert_eq!(lib.mods("hero").await.unwrap()[0].id(), id);
    }

    #[tokio::test]
    async fn test_suspension_survives_rescan() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("Characters/Hero/Default/A")).unwrap();
        let lib = library(&root, vec![hero()]);
        lib.scan().await.unwrap();

        let suspended = lib.suspend_watch("hero").unwrap();
        lib.scan().await.unwrap();
        assert!(lib.slot("hero").unwrap().gate.is_suspended());
        drop(suspended);
        assert!(!lib.slot("hero").unwrap().gate.is_suspended());
    }

    #[tokio::test]
    async fn test_export_twice_at_same_instant_is_refused() {
        use crate::services::identity::FixedClock;
        use chrono::TimeZone;

        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("Characters/Hero/Default/A")).unwrap();
        let instant = chrono::Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let lib = library(&root, vec![hero()]).with_clock(Arc::new(FixedClock(instant)));
        lib.scan().await.unwrap();

        let out = root.join("out");
        let first = lib.export(&[], &out, ExportOptions::default()).await.unwrap();
        assert_eq!(first.exported.len(), 1);
        assert!(matches!(
            lib.export(&[], &out, ExportOptions::default()).await,
            Err(LibraryError::Collision(_))
        ));
        assert!(!lib.state().snapshot().is_busy());
    }

    #[tokio::test]
    async fn test_sync_unchanged_object_keeps_folder() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("Characters/Hero/Default/A")).unwrap();
        let lib = library(&root, vec![hero()]);
        lib.scan().await.unwrap();

        let folder = lib.sync_object_folder(&hero()).await.unwrap();
        assert_eq!(folder, root.join("Characters/Hero"));
        assert!(folder.join("Default/A").is_dir());

        let restarted = library(&root, vec![hero()]);
        assert_eq!(restarted.scan().await.unwrap().mods, 1);
    }

    #[tokio::test]
    async fn test_create_and_remove_index() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let lib = library(&root, vec![hero()]);
        lib.scan().await.unwrap();

        fs::create_dir_all(root.join("Weapons/Sword/Default/Shiny")).unwrap();
        let sword = ModdableObject::new("sword", "Sword", "Weapons", ObjectKind::Weapon);
        lib.create_index(sword.clone()).await.unwrap();
        assert_eq!(lib.object_folder("sword"), Some(root.join("Weapons/Sword")));
        assert_eq!(lib.mods("sword").await.unwrap().len(), 1);
        assert!(matches!(
            lib.create_index(sword).await,
            Err(LibraryError::Collision(_))
        ));

        lib.remove_index("sword").await.unwrap();
        assert!(lib.mods("sword").await.is_err());
        assert!(root.join("Weapons/Sword/Default/Shiny").is_dir());
    }

    #[tokio::test]
    async fn test_mod_operations_through_facade() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("Characters/Hero/Default/A")).unwrap();
        let lib = library(&root, vec![hero()]);
        lib.scan().await.unwrap();
        let id = lib.mods("hero").await.unwrap()[0].id();

        lib.disable_mod("hero", id).await.unwrap();
        assert!(root.join("Characters/Hero/Default/DISABLED_A").is_dir());
        lib.rename_mod("hero", id, "Better A").await.unwrap();
        assert!(root.join("Characters/Hero/Default/DISABLED_Better A").is_dir());
        lib.enable_mod("hero", id).await.unwrap();
        assert!(root.join("Characters/Hero/Default/Better A").is_dir());

        let moved = lib.move_mod_to_skin("hero", id, Some("heroSummer")).await.unwrap();
        assert_eq!(moved.path(), root.join("Characters/Hero/heroSummer/Better A"));

        lib.delete_mod("hero", id).await.unwrap();
        assert!(lib.mods("hero").await.unwrap().is_empty());
        assert!(!moved.path().exists());
    }
}
