use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SnapshotError;

/// Full serialized state of one workbook, as produced by the spreadsheet
/// engine.
///
/// The document is opaque here. The only thing checked is that it carries a
/// `sheets` mapping, which is enough to tell a real snapshot from a corrupt
/// or foreign storage entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct WorkbookSnapshot(Value);

impl WorkbookSnapshot {
    pub fn from_value(value: Value) -> Result<Self, SnapshotError> {
        match value.get("sheets") {
            Some(Value::Object(_)) => Ok(WorkbookSnapshot(value)),
            _ => Err(SnapshotError::MissingSheets),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, SnapshotError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.0)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Number of sheets in the document.
    pub fn sheet_count(&self) -> usize {
        self.0
            .get("sheets")
            .and_then(Value::as_object)
            .map_or(0, |sheets| sheets.len())
    }
}

impl TryFrom<Value> for WorkbookSnapshot {
    type Error = SnapshotError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

impl From<WorkbookSnapshot> for Value {
    fn from(snapshot: WorkbookSnapshot) -> Self {
        snapshot.0
    }
}
