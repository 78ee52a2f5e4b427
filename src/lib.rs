// ModSync - skin-aware mod library synchronization
//
// This is the library crate containing the engine and its data structures.
// The binary crate (main.rs) provides a command-line front end.

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use error::{LibraryError, Result};
pub use models::{GameCatalog, LibrarySettings, ModdableObject, StaticCatalog, TrackedMod};
pub use services::ModLibrary;
pub use state::{LibraryChange, StateManager};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
