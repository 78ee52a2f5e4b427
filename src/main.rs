//! ModSync - skin-aware mod library synchronization
//!
//! Main entry point for the command-line front end.
//!
//! # Overview
//!
//! The binary initializes:
//! - Logging infrastructure (daily file rotation + console output)
//! - Tokio async runtime (worker threads for scans and blocking file I/O)
//! - Configuration loading ([`ConfigManager`])
//! - The mod library ([`ModLibrary`])
//!
//! # Commands
//!
//! ```text
//! modsync scan                          Scan the library and print a summary
//! modsync refresh [object]              Scan, then reconcile one or all objects
//! modsync export <dest> [flags] [objects...]
//!                                       Copy mods out to a timestamped folder
//! modsync watch                         Refresh objects as their folders change
//! modsync status                        Print the effective settings
//! ```
//!
//! # Configuration Files
//!
//! Expected in the `ModSync Data/` directory:
//! - `ModSync Settings.yaml` (or legacy `ModSync.yaml`): mods root, naming conventions
//! - `Catalog.yaml`: categories and moddable objects
//!
//! Export flags:
//! - `--keep-structure`: write `Category/Object/Skin/Mod` instead of a flat list
//! - `--strip-settings`: drop settings and sidecar files from the copies
//! - `--enable-all` / `--disable-all`: force the enabled state of the copies
//! - `--zip`: package as an archive (not supported yet)
//!
//! `MODSYNC_*` environment variables override settings, e.g. `MODSYNC_MODS_ROOT`.

use anyhow::{Context, Result, bail};
use camino::Utf8Path;
use modsync::services::{ChangeFeed, ExportOptions, ExportStatus, FsWatcher};
use modsync::{APP_NAME, ConfigManager, LibraryChange, ModLibrary, VERSION};
use std::sync::Arc;

const CONFIG_DIR: &str = "ModSync Data";
const LOG_DIR: &str = "logs";
const WORKER_THREADS: usize = 4;

enum Command {
    Scan,
    Refresh(Option<String>),
    Export {
        destination: String,
        objects: Vec<String>,
        options: ExportOptions,
    },
    Watch,
    Status,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Command> {
    let command = args.next().unwrap_or_else(|| "scan".to_string());
    match command.as_str() {
        "scan" => Ok(Command::Scan),
        "refresh" => Ok(Command::Refresh(args.next())),
        "export" => {
            let destination = args.next().context("export needs a destination folder")?;
            let mut objects = Vec::new();
            let mut options = ExportOptions::default();
            for arg in args {
                match arg.as_str() {
                    "--keep-structure" => options.keep_category_structure = true,
                    "--strip-settings" => options.remove_local_settings = true,
                    "--enable-all" => options.set_status = ExportStatus::EnableAll,
                    "--disable-all" => options.set_status = ExportStatus::DisableAll,
                    "--zip" => options.zip = true,
                    flag if flag.starts_with("--") => bail!("Unknown export flag: {}", flag),
                    object => objects.push(object.to_string()),
                }
            }
            Ok(Command::Export {
                destination,
                objects,
                options,
            })
        }
        "watch" => Ok(Command::Watch),
        "status" => Ok(Command::Status),
        other => bail!("Unknown command: {} (expected scan, refresh, export, watch or status)", other),
    }
}

fn main() -> Result<()> {
    let command = parse_args(std::env::args().skip(1))?;

    let config_manager = ConfigManager::new(CONFIG_DIR)?;
    let settings = config_manager.load_settings()?;

    let _log_guard = modsync::logging::setup_logging_with_console(
        Utf8Path::new(LOG_DIR),
        settings.debug_mode,
        true,
        modsync::logging::LogFormat::Text,
    )?;
    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    if let Command::Status = command {
        println!("Config directory: {}", config_manager.config_dir());
        println!("Mods root:        {}", settings.mods_root);
        println!("Disabled prefix:  {}", settings.disabled_prefix);
        println!("Default skin:     {}", settings.default_skin_folder);
        println!("Scan concurrency: {}", settings.scan_concurrency);
        println!("Debug mode:       {}", settings.debug_mode);
        return Ok(());
    }

    let catalog = config_manager.load_catalog()?;
    tracing::info!("Catalog has {} moddable objects", catalog.len());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(WORKER_THREADS)
        .thread_name("modsync-worker")
        .build()?;
    tracing::info!("Tokio runtime initialized with {} worker threads", WORKER_THREADS);

    let library = Arc::new(ModLibrary::new(settings, Arc::new(catalog)));
    let result = runtime.block_on(run(library.clone(), command));

    library.metrics().log_summary();
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    tracing::info!("Shutdown complete");
    result
}

async fn run(library: Arc<ModLibrary>, command: Command) -> Result<()> {
    let summary = library.scan().await.context("Library scan failed")?;
    println!(
        "Scanned {} objects, {} mods ({} identity collisions, {} quarantined, {} errors)",
        summary.objects,
        summary.mods,
        summary.identity_collisions,
        summary.quarantined,
        summary.errors.len()
    );
    for error in &summary.errors {
        println!("  {}: {}", error.path, error.message);
    }

    match command {
        Command::Scan | Command::Status => Ok(()),
        Command::Refresh(object) => {
            let result = library.refresh(object.as_deref(), None).await?;
            for handle in &result.new_handles {
                println!("new        {}", handle.path());
            }
            for path in &result.untracked_paths {
                println!("untracked  {}", path);
            }
            for duplicate in &result.duplicate_renames {
                println!("duplicate  {} -> {}", duplicate.original, duplicate.renamed_to);
            }
            for error in &result.errors {
                println!("error      {}: {}", error.path, error.message);
            }
            Ok(())
        }
        Command::Export {
            destination,
            objects,
            options,
        } => {
            let mut events = library.state().subscribe();
            let progress = tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    match event {
                        LibraryChange::ExportProgress { percent } => println!("export {}%", percent),
                        LibraryChange::ExportFinished { .. } => break,
                        _ => {}
                    }
                }
            });

            let outcome = library
                .export(&objects, Utf8Path::new(&destination), options)
                .await?;
            let _ = progress.await;
            println!("Exported {} mods to {}", outcome.exported.len(), outcome.root);
            for error in &outcome.errors {
                println!("  {}: {}", error.path, error.message);
            }
            Ok(())
        }
        Command::Watch => {
            let (feed, changes) = ChangeFeed::channel();
            let _watcher = FsWatcher::start(&library.settings().mods_root, feed)?;
            let worker = library.clone().spawn_reactive_refresh(changes);
            println!("Watching {} (Ctrl+C to stop)", library.settings().mods_root);

            tokio::signal::ctrl_c().await?;
            tracing::info!("Interrupted, stopping watcher");
            worker.abort();
            Ok(())
        }
    }
}
