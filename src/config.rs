use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_STORAGE_PREFIX: &str = "univer-workbook-";
pub const DEFAULT_CHANNEL_NAME: &str = "spreadsheet-sync";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// How long to wait after asking the engine to end editing when it cannot
/// confirm the commit itself. Best-effort only: an edit still in flight after
/// this delay is read as it was before the edit.
pub const END_EDITING_SETTLE_MS: u64 = 50;

/// Tunables shared by every view of a lesson workbook.
///
/// All fields are optional in the JSON form; missing ones take the defaults
/// above.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    pub storage_prefix: String,
    pub channel_name: String,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub end_editing_settle_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            storage_prefix: DEFAULT_STORAGE_PREFIX.to_string(),
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            end_editing_settle_ms: END_EDITING_SETTLE_MS,
        }
    }
}

impl SyncConfig {
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn end_editing_settle(&self) -> Duration {
        Duration::from_millis(self.end_editing_settle_ms)
    }

    /// Upper bound on how long a full view waits for a live snapshot.
    pub fn max_request_wait(&self) -> Duration {
        self.retry_delay() * self.max_attempts.max(1)
    }
}
