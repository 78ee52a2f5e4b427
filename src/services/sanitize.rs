use std::collections::HashSet;
use std::fs;

use camino::Utf8Path;
use regex::Regex;

/// Upper bound on generated folder names, in characters.
pub const MAX_FOLDER_NAME_LEN: usize = 80;

/// Turns display text into folder names that are safe on every platform the
/// loader runs on.
///
/// The regex patterns are compiled once at construction:
///
/// - `invalid_chars`: characters Windows refuses in file names, plus ASCII control codes
/// - `reserved_name`: DOS device names (`CON`, `PRN`, `AUX`, `NUL`, `COM1-9`, `LPT1-9`)
/// - `numbered_suffix`: an existing ` (n)` disambiguation suffix
pub struct NameSanitizer {
    invalid_chars: Regex,
    reserved_name: Regex,
    numbered_suffix: Regex,
}

impl NameSanitizer {
    pub fn new() -> Self {
        Self {
            invalid_chars: Regex::new(r#"[<>:"/\\|?*\x00-\x1F]"#).expect("Invalid char regex"),
            reserved_name: Regex::new(r"^(?i)(CON|PRN|AUX|NUL|COM[1-9]|LPT[1-9])$")
                .expect("Invalid reserved name regex"),
            numbered_suffix: Regex::new(r"^(.*) \((\d+)\)$").expect("Invalid suffix regex"),
        }
    }

    /// Sanitize `text` into a folder name. May return an empty string, in
    /// which case the caller falls back to another source.
    pub fn sanitize(&self, text: &str) -> String {
        let trimmed = text.trim();
        let replaced = self.invalid_chars.replace_all(trimmed, "_");
        let mut name = truncate(trim_tail(&replaced));

        // Checked after truncation, which can expose a device name.
        let (base, rest) = match name.find('.') {
            Some(dot) => name.split_at(dot),
            None => (name.as_str(), ""),
        };
        if self.reserved_name.is_match(base.trim_end()) {
            name = truncate(&format!("{}_{}", base, rest));
        }
        name
    }

    /// Sanitize the first source that yields a non-empty name, falling back
    /// to `literal` when none does.
    pub fn sanitize_or(&self, sources: &[Option<&str>], literal: &str) -> String {
        sources
            .iter()
            .flatten()
            .map(|source| self.sanitize(source))
            .find(|name| !name.is_empty())
            .unwrap_or_else(|| literal.to_string())
    }

    /// Append ` (n)` with increasing `n` until `base` no longer collides with
    /// `taken` (lowercased sibling names).
    pub fn disambiguate(&self, base: &str, taken: &HashSet<String>) -> String {
        if !taken.contains(&base.to_lowercase()) {
            return base.to_string();
        }

        let stem = match self.numbered_suffix.captures(base) {
            Some(caps) => caps.get(1).map_or(base, |m| m.as_str()),
            None => base,
        };

        let mut n = 2usize;
        loop {
            let suffix = format!(" ({})", n);
            let room = MAX_FOLDER_NAME_LEN.saturating_sub(suffix.chars().count());
            let head: String = stem.chars().take(room).collect();
            let candidate = format!("{}{}", trim_tail(&head), suffix);
            if !taken.contains(&candidate.to_lowercase()) {
                return candidate;
            }
            n += 1;
        }
    }
}

impl Default for NameSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Cut to [`MAX_FOLDER_NAME_LEN`] characters and drop trailing dots and spaces.
fn truncate(name: &str) -> String {
    let cut: String = name.chars().take(MAX_FOLDER_NAME_LEN).collect();
    trim_tail(&cut).to_string()
}

fn trim_tail(name: &str) -> &str {
    name.trim_end_matches(|c: char| c == '.' || c.is_whitespace())
}

/// Lowercased names of the entries in `dir`, minus `exclude`.
///
/// A missing directory has no siblings.
pub fn sibling_names(dir: &Utf8Path, exclude: Option<&str>) -> std::io::Result<HashSet<String>> {
    let mut names = HashSet::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e),
    };

    let exclude = exclude.map(str::to_lowercase);
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if exclude.as_deref() != Some(name.as_str()) {
            names.insert(name);
        }
    }
    Ok(names)
}
