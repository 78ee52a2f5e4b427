use crate::models::{CatalogFile, LibrarySettings, StaticCatalog};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use std::fs;

/// Prefix of environment variables that override settings, e.g. `MODSYNC_MODS_ROOT`.
pub const ENV_PREFIX: &str = "MODSYNC";

/// Configuration manager for loading and saving YAML configuration files.
///
/// Manages two configuration files:
/// - Settings (`ModSync Settings.yaml`, legacy `ModSync.yaml`): mods root, naming conventions
/// - Catalog (`Catalog.yaml`): categories and moddable objects
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    settings_path: Utf8PathBuf,
    catalog_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager, creating `config_dir` if needed.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            settings_path: config_dir.join("ModSync Settings.yaml"),
            catalog_path: config_dir.join("Catalog.yaml"),
            config_dir,
        })
    }

    /// Load settings from disk, then apply `MODSYNC_*` environment overrides.
    pub fn load_settings(&self) -> Result<LibrarySettings> {
        let env = config::Environment::with_prefix(ENV_PREFIX).try_parsing(true);
        self.load_settings_with_env(env)
    }

    /// Like [`load_settings`](Self::load_settings) with an explicit environment source.
    pub fn load_settings_with_env(&self, env: config::Environment) -> Result<LibrarySettings> {
        let mut settings = self.load_settings_file()?;
        apply_overrides(&mut settings, env)?;
        Ok(settings)
    }

    /// Load the settings file alone. Returns defaults if neither file exists.
    pub fn load_settings_file(&self) -> Result<LibrarySettings> {
        // Try ModSync Settings.yaml first, fall back to ModSync.yaml
        let legacy_path = self.config_dir.join("ModSync.yaml");

        let config_path = if self.settings_path.exists() {
            &self.settings_path
        } else if legacy_path.exists() {
            tracing::info!("Using legacy settings file: {}", legacy_path);
            &legacy_path
        } else {
            tracing::warn!(
                "Settings file not found at {} or {}, using defaults",
                self.settings_path,
                legacy_path
            );
            return Ok(LibrarySettings::default());
        };

        let file_contents = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read settings: {}", config_path))?;

        let settings: LibrarySettings = serde_yaml_ng::from_str(&file_contents)
            .with_context(|| format!("Failed to parse settings: {}", config_path))?;

        tracing::info!("Loaded settings from {}", config_path);
        Ok(settings)
    }

    /// Save settings. Always writes the current file name.
    pub fn save_settings(&self, settings: &LibrarySettings) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(settings).context("Failed to serialize settings to YAML")?;

        fs::write(&self.settings_path, yaml_string)
            .with_context(|| format!("Failed to write settings: {}", self.settings_path))?;

        tracing::info!("Saved settings to {}", self.settings_path);
        Ok(())
    }

    /// Load the game catalog. A missing file is an empty catalog.
    pub fn load_catalog(&self) -> Result<StaticCatalog> {
        if !self.catalog_path.exists() {
            tracing::warn!(
                "Catalog file not found at {}, starting with no objects",
                self.catalog_path
            );
            return Ok(StaticCatalog::new(Vec::new())?);
        }

        let file_contents = fs::read_to_string(&self.catalog_path)
            .with_context(|| format!("Failed to read catalog: {}", self.catalog_path))?;

        let file: CatalogFile = serde_yaml_ng::from_str(&file_contents)
            .with_context(|| format!("Failed to parse catalog: {}", self.catalog_path))?;

        let catalog = StaticCatalog::from_file(&file)
            .with_context(|| format!("Invalid catalog: {}", self.catalog_path))?;

        tracing::info!(
            "Loaded catalog with {} objects from {}",
            catalog.len(),
            self.catalog_path
        );
        Ok(catalog)
    }

    pub fn save_catalog(&self, file: &CatalogFile) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(file).context("Failed to serialize catalog to YAML")?;

        fs::write(&self.catalog_path, yaml_string)
            .with_context(|| format!("Failed to write catalog: {}", self.catalog_path))?;

        tracing::info!("Saved catalog to {}", self.catalog_path);
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn settings_path(&self) -> &Utf8Path {
        &self.settings_path
    }

    pub fn catalog_path(&self) -> &Utf8Path {
        &self.catalog_path
    }
}

/// Apply every override present in `env` on top of `settings`.
fn apply_overrides(settings: &mut LibrarySettings, env: config::Environment) -> Result<()> {
    let overrides = config::Config::builder()
        .add_source(env)
        .build()
        .context("Failed to read environment overrides")?;

    if let Ok(root) = overrides.get_string("mods_root") {
        settings.mods_root = Utf8PathBuf::from(root);
    }
    if let Ok(prefix) = overrides.get_string("disabled_prefix") {
        settings.disabled_prefix = prefix;
    }
    if let Ok(folder) = overrides.get_string("default_skin_folder") {
        settings.default_skin_folder = folder;
    }
    if let Ok(concurrency) = overrides.get_int("scan_concurrency") {
        settings.scan_concurrency = usize::try_from(concurrency)
            .context("MODSYNC_SCAN_CONCURRENCY must not be negative")?;
    }
    if let Ok(debug) = overrides.get_bool("debug_mode") {
        settings.debug_mode = debug;
    }

    tracing::debug!("Effective mods root: {}", settings.mods_root);
    Ok(())
}

/// Environment source fed from `vars` instead of the process environment.
pub fn environment_from(vars: HashMap<String, String>) -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .try_parsing(true)
        .source(Some(vars.into_iter().collect()))
}
