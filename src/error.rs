// Failure tags for the per-source fallback ladders.

/// Why a single strategy in a source's fallback ladder did not produce a value.
///
/// None of these escape the public sampling API: sources log them, record the
/// last one for diagnostics and move on to the next strategy, the cached value,
/// or a safe default.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    /// Path missing, permission denied, or an I/O error while reading it.
    #[error("unreadable: {path}")]
    Unreadable { path: String },

    /// Text was read but did not have the expected shape.
    #[error("failed to parse {path}: {detail}")]
    Parse { path: String, detail: String },

    /// The metric class is not supported on this device.
    #[error("not available: {0}")]
    Unavailable(String),

    /// Process listing failed or returned nothing.
    #[error("process enumeration failed: {0}")]
    Enumeration(String),
}

impl SourceError {
    pub fn unreadable(path: impl Into<String>) -> Self {
        Self::Unreadable { path: path.into() }
    }

    pub fn parse(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            detail: detail.into(),
        }
    }
}

pub type SourceResult<T> = Result<T, SourceError>;
