use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised by the mod library engine.
///
/// Bulk passes (scan, refresh) capture most of these per folder instead of
/// returning them; single user-initiated operations (add, transfer, rename)
/// return them directly after a failed pre-flight check.
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    #[error("{0}")]
    Collision(String),

    #[error("Unreadable descriptor at {path}: {reason}")]
    Corrupt { path: Utf8PathBuf, reason: String },

    #[error("I/O on {path} did not complete: {source}")]
    PartialIo {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Not supported: {0}")]
    Unsupported(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LibraryError {
    pub fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            name: name.into(),
        }
    }

    /// Wrap an I/O failure on a specific path.
    pub fn partial_io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::PartialIo {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = LibraryError::not_found("Moddable object", "hero");
        assert_eq!(err.to_string(), "Moddable object not found: hero");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked");
        let err: LibraryError = io.into();
        assert!(matches!(err, LibraryError::Io(_)));
    }
}
