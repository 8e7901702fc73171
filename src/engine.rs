use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::cell::{CellData, CellValue, col_to_letter};
use crate::error::{EngineError, EngineResult};
use crate::lesson::LessonSeed;
use crate::snapshot::WorkbookSnapshot;

pub const SEED_SHEET_ID: &str = "lesson-sheet";
pub const SEED_SHEET_NAME: &str = "Practice";
const MIN_SEED_ROWS: usize = 20;
const MIN_SEED_COLS: usize = 10;

/// What the engine could tell us after being asked to end editing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndEditing {
    /// The editor is closed and its content is in the sheet.
    Flushed { committed: bool },
    /// The request was issued but the engine cannot confirm completion.
    Requested,
}

/// A committed change to one cell of the active workbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellChange {
    pub sheet_id: String,
    pub row: usize,
    pub col: usize,
}

/// The spreadsheet engine a widget drives. Its snapshot format is its own
/// business; widgets only pass snapshots around.
pub trait SpreadsheetEngine: Send {
    /// Converts a lesson's default grid into a snapshot in the engine's format.
    fn seed_snapshot(&self, seed: &LessonSeed) -> EngineResult<WorkbookSnapshot>;

    /// Replaces the active workbook with one built from `snapshot`.
    fn create_workbook(&mut self, snapshot: &WorkbookSnapshot) -> EngineResult<()>;

    fn snapshot(&self) -> EngineResult<WorkbookSnapshot>;

    /// Values of the `rows x cols` block at `(row, col)` on the active sheet.
    /// Empty cells read as empty text.
    fn get_values(
        &self,
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    ) -> EngineResult<Vec<Vec<CellValue>>>;

    fn set_values(&mut self, row: usize, col: usize, values: &[Vec<CellValue>])
    -> EngineResult<()>;

    /// Rows and columns spanned by non-empty cells of the active sheet.
    fn used_extent(&self) -> EngineResult<(usize, usize)>;

    /// Opens the cell editor on `(row, col)` holding `text`, uncommitted.
    fn start_editing(&mut self, row: usize, col: usize, text: &str) -> EngineResult<()>;

    fn end_editing(&mut self) -> EngineResult<EndEditing>;

    /// Change notifications, when the engine offers them. Called once.
    fn subscribe_changes(&mut self) -> Option<UnboundedReceiver<CellChange>> {
        None
    }

    fn dispose(&mut self);
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkbookData {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sheet_order: Vec<String>,
    pub sheets: BTreeMap<String, SheetData>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SheetData {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cell_data: BTreeMap<usize, BTreeMap<usize, CellData>>,
    pub row_count: usize,
    pub column_count: usize,
}

impl SheetData {
    pub fn cell(&self, row: usize, col: usize) -> Option<&CellData> {
        self.cell_data.get(&row).and_then(|cols| cols.get(&col))
    }

    /// The `rows x cols` block at `(row, col)` must fit inside the sheet.
    fn check_block(&self, row: usize, col: usize, rows: usize, cols: usize) -> EngineResult<()> {
        let fits = |start: usize, len: usize, limit: usize| {
            start.checked_add(len).is_some_and(|end| end <= limit)
        };
        if fits(row, rows, self.row_count) && fits(col, cols, self.column_count) {
            Ok(())
        } else {
            Err(EngineError::OutOfRange {
                row,
                col,
                rows,
                cols,
            })
        }
    }

    fn set_cell(&mut self, row: usize, col: usize, data: CellData) {
        if data.is_empty() {
            if let Some(cols) = self.cell_data.get_mut(&row) {
                cols.remove(&col);
                if cols.is_empty() {
                    self.cell_data.remove(&row);
                }
            }
        } else {
            self.cell_data.entry(row).or_default().insert(col, data);
        }
    }
}

impl WorkbookData {
    pub fn active_sheet_id(&self) -> Option<&str> {
        self.sheet_order
            .iter()
            .find(|id| self.sheets.contains_key(id.as_str()))
            .or_else(|| self.sheets.keys().next())
            .map(String::as_str)
    }

    pub fn active_sheet(&self) -> Option<&SheetData> {
        self.active_sheet_id().and_then(|id| self.sheets.get(id))
    }

    fn active_sheet_mut(&mut self) -> Option<&mut SheetData> {
        let id = self.active_sheet_id()?.to_string();
        self.sheets.get_mut(&id)
    }
}

/// Cached value if there is one, else the formula text.
fn read_cell(data: &CellData) -> CellValue {
    match (&data.v, &data.f) {
        (Some(v), _) => v.clone(),
        (None, Some(f)) => CellValue::Text(f.clone()),
        (None, None) => CellValue::from(""),
    }
}

#[derive(Debug, Clone)]
struct PendingEdit {
    row: usize,
    col: usize,
    text: String,
}

/// In-memory engine: a workbook of sparse sheets, a single-cell editor, and
/// change notifications. Formulas are stored as entered, not evaluated.
#[derive(Debug, Default)]
pub struct GridEngine {
    workbook: Option<WorkbookData>,
    editor: Option<PendingEdit>,
    changes: Option<UnboundedSender<CellChange>>,
    unconfirmed_commits: bool,
    disposed: bool,
}

impl GridEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine whose `end_editing` commits but only reports
    /// [`EndEditing::Requested`], like engines without a flush signal.
    pub fn with_unconfirmed_commits() -> Self {
        GridEngine {
            unconfirmed_commits: true,
            ..Self::default()
        }
    }

    pub fn workbook(&self) -> Option<&WorkbookData> {
        self.workbook.as_ref()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn is_editing(&self) -> bool {
        self.editor.is_some()
    }

    /// Plain-text grid of the top-left `rows x cols` of the active sheet.
    pub fn render_grid(&self, rows: usize, cols: usize) -> EngineResult<String> {
        let sheet = self.sheet()?;
        let rows = rows.min(sheet.row_count);
        let cols = cols.min(sheet.column_count);
        let mut out = String::from("\t");
        for col in 0..cols {
            out.push_str(&format!("{:<16}", col_to_letter(col)));
        }
        out.push('\n');
        for row in 0..rows {
            out.push_str(&format!("{}\t", row + 1));
            for col in 0..cols {
                let text = sheet.cell(row, col).map(CellData::display_text);
                out.push_str(&format!("{:<16}", text.unwrap_or_default()));
            }
            out.push('\n');
        }
        Ok(out)
    }

    fn check_live(&self) -> EngineResult<()> {
        if self.disposed {
            return Err(EngineError::Disposed);
        }
        Ok(())
    }

    fn sheet(&self) -> EngineResult<&SheetData> {
        self.check_live()?;
        self.workbook
            .as_ref()
            .and_then(WorkbookData::active_sheet)
            .ok_or(EngineError::NoWorkbook)
    }

    fn sheet_mut(&mut self) -> EngineResult<&mut SheetData> {
        self.check_live()?;
        self.workbook
            .as_mut()
            .and_then(WorkbookData::active_sheet_mut)
            .ok_or(EngineError::NoWorkbook)
    }

    fn write_cell(&mut self, row: usize, col: usize, value: CellValue) -> EngineResult<()> {
        let sheet = self.sheet_mut()?;
        if row >= sheet.row_count || col >= sheet.column_count {
            return Err(EngineError::OutOfRange {
                row,
                col,
                rows: 1,
                cols: 1,
            });
        }
        let data = match value {
            CellValue::Text(text) if text.starts_with('=') => CellData {
                v: None,
                f: Some(text),
            },
            value => CellData::value(value),
        };
        sheet.set_cell(row, col, data);
        let sheet_id = sheet.id.clone();
        let closed = self
            .changes
            .as_ref()
            .is_some_and(|tx| tx.send(CellChange { sheet_id, row, col }).is_err());
        if closed {
            self.changes = None;
        }
        Ok(())
    }
}

impl SpreadsheetEngine for GridEngine {
    fn seed_snapshot(&self, seed: &LessonSeed) -> EngineResult<WorkbookSnapshot> {
        let width = seed.initial_data.iter().map(Vec::len).max().unwrap_or(0);
        let mut sheet = SheetData {
            id: SEED_SHEET_ID.to_string(),
            name: SEED_SHEET_NAME.to_string(),
            cell_data: BTreeMap::new(),
            row_count: MIN_SEED_ROWS.max(seed.initial_data.len() + 5),
            column_count: MIN_SEED_COLS.max(width + 3),
        };
        for (r, row) in seed.initial_data.iter().enumerate() {
            for (c, text) in row.iter().enumerate() {
                sheet.set_cell(r, c, CellData::value(text.as_str()));
            }
        }
        let workbook = WorkbookData {
            id: format!("workbook-{}", seed.key),
            name: seed.key.to_string(),
            sheet_order: vec![SEED_SHEET_ID.to_string()],
            sheets: BTreeMap::from([(SEED_SHEET_ID.to_string(), sheet)]),
        };
        let value = serde_json::to_value(&workbook)
            .map_err(|e| EngineError::InvalidWorkbook(e.to_string()))?;
        WorkbookSnapshot::from_value(value).map_err(|e| EngineError::InvalidWorkbook(e.to_string()))
    }

    fn create_workbook(&mut self, snapshot: &WorkbookSnapshot) -> EngineResult<()> {
        self.check_live()?;
        let workbook: WorkbookData = serde_json::from_value(snapshot.as_value().clone())
            .map_err(|e| EngineError::InvalidWorkbook(e.to_string()))?;
        if workbook.active_sheet().is_none() {
            return Err(EngineError::InvalidWorkbook("workbook has no sheets".into()));
        }
        self.editor = None;
        self.workbook = Some(workbook);
        Ok(())
    }

    fn snapshot(&self) -> EngineResult<WorkbookSnapshot> {
        self.check_live()?;
        let workbook = self.workbook.as_ref().ok_or(EngineError::NoWorkbook)?;
        let value = serde_json::to_value(workbook)
            .map_err(|e| EngineError::InvalidWorkbook(e.to_string()))?;
        WorkbookSnapshot::from_value(value).map_err(|e| EngineError::InvalidWorkbook(e.to_string()))
    }

    fn get_values(
        &self,
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    ) -> EngineResult<Vec<Vec<CellValue>>> {
        let sheet = self.sheet()?;
        sheet.check_block(row, col, rows, cols)?;
        Ok((row..row + rows)
            .map(|r| {
                (col..col + cols)
                    .map(|c| sheet.cell(r, c).map_or_else(|| CellValue::from(""), read_cell))
                    .collect()
            })
            .collect())
    }

    fn set_values(
        &mut self,
        row: usize,
        col: usize,
        values: &[Vec<CellValue>],
    ) -> EngineResult<()> {
        let sheet = self.sheet()?;
        let rows = values.len();
        let cols = values.iter().map(Vec::len).max().unwrap_or(0);
        sheet.check_block(row, col, rows, cols)?;
        for (r, line) in values.iter().enumerate() {
            for (c, value) in line.iter().enumerate() {
                self.write_cell(row + r, col + c, value.clone())?;
            }
        }
        Ok(())
    }

    fn used_extent(&self) -> EngineResult<(usize, usize)> {
        let sheet = self.sheet()?;
        let rows = sheet.cell_data.keys().next_back().map_or(0, |r| r + 1);
        let cols = sheet
            .cell_data
            .values()
            .filter_map(|cols| cols.keys().next_back())
            .max()
            .map_or(0, |c| c + 1);
        Ok((rows, cols))
    }

    fn start_editing(&mut self, row: usize, col: usize, text: &str) -> EngineResult<()> {
        let sheet = self.sheet()?;
        if row >= sheet.row_count || col >= sheet.column_count {
            return Err(EngineError::OutOfRange {
                row,
                col,
                rows: 1,
                cols: 1,
            });
        }
        self.editor = Some(PendingEdit {
            row,
            col,
            text: text.to_string(),
        });
        Ok(())
    }

    fn end_editing(&mut self) -> EngineResult<EndEditing> {
        self.check_live()?;
        let committed = match self.editor.take() {
            Some(edit) => {
                self.write_cell(edit.row, edit.col, CellValue::Text(edit.text))?;
                true
            }
            None => false,
        };
        if self.unconfirmed_commits {
            Ok(EndEditing::Requested)
        } else {
            Ok(EndEditing::Flushed { committed })
        }
    }

    fn subscribe_changes(&mut self) -> Option<UnboundedReceiver<CellChange>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.changes = Some(tx);
        Some(rx)
    }

    fn dispose(&mut self) {
        self.workbook = None;
        self.editor = None;
        self.changes = None;
        self.disposed = true;
    }
}
