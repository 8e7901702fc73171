use thiserror::Error;

/// Failures raised by a [`crate::store::StorageBackend`].
///
/// These never leave [`crate::store::SnapshotStore`]: every public store
/// operation degrades to "no persistence" and logs the error instead.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage is unavailable")]
    Unavailable,
    #[error("storage quota exceeded: {needed} bytes needed, {quota} allowed")]
    QuotaExceeded { needed: usize, quota: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot has no sheets mapping")]
    MissingSheets,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine has been disposed")]
    Disposed,
    #[error("no active workbook")]
    NoWorkbook,
    #[error("workbook could not be created: {0}")]
    InvalidWorkbook(String),
    #[error("range {row}:{col} ({rows}x{cols}) is outside the sheet")]
    OutOfRange {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },
}

#[derive(Debug, Error)]
pub enum WidgetError {
    #[error("spreadsheet engine failed: {0}")]
    Engine(#[from] EngineError),
    #[error("no lesson matches {0:?}")]
    UnknownLesson(String),
    #[error("full view url has no lesson parameter")]
    MissingLessonParam,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type EngineResult<T> = std::result::Result<T, EngineError>;
pub type WidgetResult<T> = std::result::Result<T, WidgetError>;
