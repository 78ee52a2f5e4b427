//! Services module - the mod library engine.
//!
//! Everything here is framework-agnostic: no terminal or GUI code, only
//! filesystem work and the bookkeeping around it.
//!
//! # Components
//!
//! - [`ModLibrary`]: the facade. Owns one [`ModIndex`] per moddable object and
//!   runs every operation below under the right locks.
//! - [`LibraryScanner`]: the startup scan, bounded by a semaphore.
//! - [`ReconcileEngine`]: refresh, diffing an index against disk. Follows
//!   external renames and toggles, and renames stale duplicates.
//! - [`TransferEngine`]: moving mods between objects and skins, and adding
//!   external folders. Validates a whole batch before touching disk.
//! - [`ExportPipeline`]: copying selected mods out to a timestamped folder.
//! - [`SkinFolderResolver`]: skin to folder mapping through sidecar metadata.
//! - [`NameSanitizer`]: folder-name sanitizing and disambiguation.
//!
//! # On-disk layout
//!
//! ```text
//! <mods root>/<Category>/<Object>/<Skin folder>/<Mod folder>
//! ```
//!
//! A folder whose name starts with the disabled prefix is ignored by the
//! game's loader. The prefix applies to mod folders and to whole object
//! folders.

pub mod export;
pub mod identity;
pub mod layout;
pub mod library;
pub mod mod_files;
pub mod mod_index;
pub mod reconcile;
pub mod sanitize;
pub mod scanner;
pub mod skin_folders;
pub mod skin_metadata;
pub mod transfer;
pub mod watch;

pub use export::{ExportOptions, ExportOutcome, ExportPipeline, ExportSource, ExportStatus};
pub use identity::{Clock, FixedClock, IdGenerator, IdentityRegistry, RandomIds, SequentialIds, SystemClock};
pub use layout::{DisabledPrefix, LibraryLayout};
pub use library::ModLibrary;
pub use mod_files::ModSettingsStore;
pub use mod_index::ModIndex;
pub use reconcile::{DuplicateRename, ReconcileEngine, RefreshError, RefreshResult};
pub use sanitize::NameSanitizer;
pub use scanner::{LibraryScanner, ScanSummary};
pub use skin_folders::SkinFolderResolver;
pub use skin_metadata::{SkinFolderMetadata, SkinMetadataStore};
pub use transfer::{AddMode, StagedFolderLock, TransferEngine, TransferOutcome};
pub use watch::{ChangeFeed, FsChange, FsWatcher, WatchGate, WatchSuspension};
