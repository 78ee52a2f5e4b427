//! Full rebuild of every object's index from disk.

use std::sync::Arc;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::Semaphore;

use crate::error::{LibraryError, Result};
use crate::metrics::Metrics;
use crate::models::ModdableObject;
use crate::services::identity::IdentityRegistry;
use crate::services::layout::DisabledPrefix;
use crate::services::mod_files::ModSettingsStore;
use crate::services::mod_index::ModIndex;
use crate::services::reconcile::RefreshError;
use crate::services::skin_folders::list_dirs;

/// One object to scan and the enabled path its folder is expected at.
#[derive(Debug, Clone)]
pub struct ScanTarget {
    pub object: ModdableObject,
    pub folder: Utf8PathBuf,
}

/// A freshly built index plus whatever went wrong while filling it.
pub struct ScannedObject {
    pub index: ModIndex,
    pub errors: Vec<RefreshError>,
}

/// Totals for one scan.
#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    pub objects: usize,
    pub mods: usize,
    pub identity_collisions: usize,
    pub quarantined: usize,
    pub errors: Vec<RefreshError>,
}

pub struct LibraryScanner {
    settings: ModSettingsStore,
    naming: DisabledPrefix,
    concurrency: usize,
    metrics: Arc<Metrics>,
}

impl LibraryScanner {
    pub fn new(
        settings: ModSettingsStore,
        naming: DisabledPrefix,
        concurrency: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            settings,
            naming,
            concurrency: concurrency.max(1),
            metrics,
        }
    }

    /// Scan every target with at most `concurrency` folder walks in flight.
    ///
    /// Every identity goes through `registry`, so a collision is detected no
    /// matter which object's walk found the id first. Results come back in
    /// target order.
    pub async fn scan(
        &self,
        targets: Vec<ScanTarget>,
        registry: Arc<IdentityRegistry>,
    ) -> Result<(Vec<ScannedObject>, ScanSummary)> {
        let start = Instant::now();
        tracing::info!("Scanning {} objects", targets.len());

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = Vec::with_capacity(targets.len());

        for target in targets {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| LibraryError::Cancelled)?;
            let registry = registry.clone();
            let settings = self.settings.clone();
            let naming = self.naming.clone();

            tasks.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                scan_object(target, registry, settings, naming)
            }));
        }

        let mut scanned = Vec::with_capacity(tasks.len());
        let mut summary = ScanSummary::default();
        for task in tasks {
            let (object, stats) = task.await.map_err(|e| {
                LibraryError::InvariantViolation(format!("Scan task failed: {}", e))
            })?;
            summary.objects += 1;
            summary.mods += object.index.len();
            summary.identity_collisions += stats.collisions;
            summary.quarantined += stats.quarantined;
            summary.errors.extend(object.errors.iter().cloned());
            scanned.push(object);
        }

        for _ in 0..summary.identity_collisions {
            self.metrics.record_identity_collision();
        }
        for _ in 0..summary.quarantined {
            self.metrics.record_quarantine();
        }
        self.metrics.record_scan(start.elapsed(), summary.mods);

        tracing::info!(
            "Scan finished in {:.2}s: {} mods across {} objects ({} collisions, {} quarantined, {} errors)",
            start.elapsed().as_secs_f64(),
            summary.mods,
            summary.objects,
            summary.identity_collisions,
            summary.quarantined,
            summary.errors.len()
        );
        Ok((scanned, summary))
    }
}

#[derive(Default)]
struct ObjectStats {
    collisions: usize,
    quarantined: usize,
}

fn scan_object(
    target: ScanTarget,
    registry: Arc<IdentityRegistry>,
    settings: ModSettingsStore,
    naming: DisabledPrefix,
) -> (ScannedObject, ObjectStats) {
    let mut stats = ObjectStats::default();
    let mut errors = Vec::new();

    let resolved = naming.resolve_existing(&target.folder);
    let folder = resolved
        .as_ref()
        .map(|(path, _)| path.clone())
        .unwrap_or_else(|| target.folder.clone());
    let mut index = ModIndex::new(target.object, folder.clone(), registry, settings, naming);

    if resolved.is_none() {
        tracing::debug!("No mod folder yet for {}", index.object().internal_name);
        return (ScannedObject { index, errors }, stats);
    }
    index.mark_instantiated(true);

    for mod_dir in mod_folders(&folder, &mut errors) {
        match index.settings().open_handle_quarantining(&mod_dir) {
            Ok((handle, quarantined)) => {
                if quarantined {
                    stats.quarantined += 1;
                }
                let original = handle.id();
                match index.track(handle) {
                    Ok(entry) => {
                        if entry.id() != original {
                            stats.collisions += 1;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Skipping {}: {}", mod_dir, e);
                        errors.push(RefreshError::new(&mod_dir, &e));
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Skipping {}: {}", mod_dir, e);
                errors.push(RefreshError::new(&mod_dir, &e));
            }
        }
    }

    tracing::debug!(
        "Scanned {}: {} mods",
        index.object().internal_name,
        index.len()
    );
    (ScannedObject { index, errors }, stats)
}

fn mod_folders(folder: &Utf8Path, errors: &mut Vec<RefreshError>) -> Vec<Utf8PathBuf> {
    let skins = match list_dirs(folder) {
        Ok(skins) => skins,
        Err(e) => {
            errors.push(RefreshError::new(folder, &e));
            return Vec::new();
        }
    };

    let mut mods = Vec::new();
    for skin in skins {
        match list_dirs(&skin) {
            Ok(children) => mods.extend(children),
            Err(e) => errors.push(RefreshError::new(&skin, &e)),
        }
    }
    mods
}
