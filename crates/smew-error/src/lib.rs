//! Error types and status codes for the Smew storage engine.
//!
//! Errors are carried as return values throughout the engine; there is no
//! exception-style unwinding. Every subsystem (cursor, buffer pool, blob
//! store, plugin registry) reports through [`SmewError`], and unknown errors
//! from collaborators are propagated unchanged via `?`.

use thiserror::Error;

/// Primary error type for Smew operations.
///
/// Structured variants for the cases the engine reacts to, with a stable
/// numeric [`StatusCode`] mapping for embedders that speak the C-style
/// status-code surface.
#[derive(Error, Debug)]
pub enum SmewError {
    // === Positioning ===
    /// Ordered traversal reached the end, a point lookup missed, or a
    /// duplicate index overshot its chain.
    #[error("key not found")]
    KeyNotFound,

    /// A cursor operation requires a position and the cursor has none.
    #[error("cursor is nil")]
    CursorIsNil,

    /// Insert rejected because the key already exists and neither overwrite
    /// nor duplicates were requested.
    #[error("duplicate key")]
    DuplicateKey,

    // === Environment ===
    /// A cursor operation was requested but no backend is attached.
    #[error("database is not initialized")]
    NotInitialized,

    /// An allocation inside a collaborator failed.
    #[error("out of memory")]
    OutOfMemory,

    // === Storage ===
    /// A page was requested that the backing store does not know about.
    #[error("page {page} not present in backing store")]
    PageNotFound { page: u32 },

    /// The tree or a blob structure is internally inconsistent.
    #[error("data store is malformed: {detail}")]
    Corrupt { detail: String },

    /// File I/O error from the paging or blob layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Plugins ===
    /// A plugin could not be loaded, validated, or registered. The concrete
    /// cause is logged at the failure site.
    #[error("plugin not found: {name}")]
    PluginNotFound { name: String },
}

/// Stable numeric status codes for the embedding surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    /// Successful result.
    Ok = 0,
    /// Key not found.
    KeyNotFound = 10,
    /// Cursor has no position.
    CursorIsNil = 11,
    /// Duplicate key on insert.
    DuplicateKey = 12,
    /// Out of memory.
    OutOfMemory = 20,
    /// No backend attached.
    NotInitialized = 21,
    /// Plugin load or validation failure.
    PluginNotFound = 30,
    /// Page missing from the backing store.
    PageNotFound = 40,
    /// Malformed on-store data.
    Corrupt = 41,
    /// I/O error.
    Io = 42,
}

impl SmewError {
    /// Map this error to its stable numeric status code.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::KeyNotFound => StatusCode::KeyNotFound,
            Self::CursorIsNil => StatusCode::CursorIsNil,
            Self::DuplicateKey => StatusCode::DuplicateKey,
            Self::OutOfMemory => StatusCode::OutOfMemory,
            Self::NotInitialized => StatusCode::NotInitialized,
            Self::PluginNotFound { .. } => StatusCode::PluginNotFound,
            Self::PageNotFound { .. } => StatusCode::PageNotFound,
            Self::Corrupt { .. } => StatusCode::Corrupt,
            Self::Io(_) => StatusCode::Io,
        }
    }

    /// Whether this error is the recoverable not-found signal that traversal
    /// uses to step across keys after a duplicate fetch overshoots.
    #[must_use]
    pub const fn is_key_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound)
    }

    /// Create a corruption error.
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::Corrupt {
            detail: detail.into(),
        }
    }

    /// Create a plugin-not-found error for the given plugin or library name.
    pub fn plugin_not_found(name: impl Into<String>) -> Self {
        Self::PluginNotFound { name: name.into() }
    }
}

/// Result type alias using [`SmewError`].
pub type Result<T> = std::result::Result<T, SmewError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(SmewError::KeyNotFound.to_string(), "key not found");
        assert_eq!(SmewError::CursorIsNil.to_string(), "cursor is nil");
        assert_eq!(
            SmewError::corrupt("leaf slot out of range").to_string(),
            "data store is malformed: leaf slot out of range"
        );
        assert_eq!(
            SmewError::plugin_not_found("sum").to_string(),
            "plugin not found: sum"
        );
    }

    #[test]
    fn status_code_mapping() {
        assert_eq!(SmewError::KeyNotFound.status_code(), StatusCode::KeyNotFound);
        assert_eq!(SmewError::CursorIsNil.status_code(), StatusCode::CursorIsNil);
        assert_eq!(
            SmewError::NotInitialized.status_code(),
            StatusCode::NotInitialized
        );
        assert_eq!(
            SmewError::plugin_not_found("x").status_code(),
            StatusCode::PluginNotFound
        );
        assert_eq!(StatusCode::Ok as i32, 0);
        assert_eq!(StatusCode::KeyNotFound as i32, 10);
    }

    #[test]
    fn recoverable_not_found_signal() {
        assert!(SmewError::KeyNotFound.is_key_not_found());
        assert!(!SmewError::CursorIsNil.is_key_not_found());
        assert!(!SmewError::corrupt("x").is_key_not_found());
    }

    #[test]
    fn io_error_from() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "short write");
        let err: SmewError = io.into();
        assert!(matches!(err, SmewError::Io(_)));
        assert_eq!(err.status_code(), StatusCode::Io);
    }
}
