use chrono::{DateTime, Utc};

/// Snapshot of what the library is doing and what the last passes found.
///
/// Wrapped in `Arc<RwLock<>>` by [`crate::state::StateManager`]; mutate it only
/// through the manager so change events are emitted.
#[derive(Clone, Debug, Default)]
pub struct LibraryState {
    // Runtime state
    pub is_scanning: bool,
    pub is_refreshing: bool,
    pub is_exporting: bool,
    pub current_operation: String,

    // Library contents
    pub object_count: usize,
    pub tracked_mods: usize,

    // Last refresh results
    pub last_refresh: Option<DateTime<Utc>>,
    pub last_untracked: usize,
    pub last_new: usize,
    pub last_duplicates: usize,
    pub last_errors: usize,

    // Export progress, 0..=100
    pub export_percent: u8,
}

impl LibraryState {
    /// True while any bulk pass holds the library.
    pub fn is_busy(&self) -> bool {
        self.is_scanning || self.is_refreshing || self.is_exporting
    }

    /// Short status line for display.
    pub fn summary(&self) -> String {
        if self.is_scanning {
            return "Scanning mod library...".to_string();
        }
        if self.is_exporting {
            return format!("Exporting... {}%", self.export_percent);
        }
        if self.is_refreshing {
            return "Refreshing...".to_string();
        }

        let mut line = format!(
            "{} mods across {} objects",
            self.tracked_mods, self.object_count
        );
        if self.last_refresh.is_some() {
            let mut parts = Vec::new();
            if self.last_new > 0 {
                parts.push(format!("{} new", self.last_new));
            }
            if self.last_untracked > 0 {
                parts.push(format!("{} untracked", self.last_untracked));
            }
            if self.last_duplicates > 0 {
                parts.push(format!("{} duplicates", self.last_duplicates));
            }
            if self.last_errors > 0 {
                parts.push(format!("{} errors", self.last_errors));
            }
            if !parts.is_empty() {
                line.push_str(&format!(" (last refresh: {})", parts.join(", ")));
            }
        }
        line
    }
}
