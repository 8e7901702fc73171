use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::cell::cell_name;

lazy_static! {
    static ref DIGIT_REGEX: Regex = Regex::new(r"\d").unwrap();
}

const MIN_HEADERS: usize = 3;
const MIN_ROWS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Correct,
    Partial,
    Incorrect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub status: ValidationStatus,
    pub message: String,
    pub details: Vec<String>,
}

struct Check {
    passed: bool,
    message: String,
}

impl Check {
    fn new(passed: bool, ok: &str, failed: impl Into<String>) -> Self {
        Check {
            passed,
            message: if passed { ok.to_string() } else { failed.into() },
        }
    }
}

fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}

/// Cells that look like several values crammed into one.
fn holds_multiple_values(cell: &str) -> bool {
    cell.contains(" + ") || cell.contains(" & ") || (cell.contains(", ") && DIGIT_REGEX.is_match(cell))
}

/// Checks that practice data is laid out as a clean table: a header row,
/// no gaps between records, one value per cell, and at least one record.
pub fn validate_practice(data: &[Vec<String>]) -> ValidationResult {
    let mut checks = Vec::with_capacity(4);

    let headers = data
        .first()
        .map_or(0, |row| row.iter().filter(|h| !h.trim().is_empty()).count());
    checks.push(Check::new(
        headers >= MIN_HEADERS,
        "Headers look good!",
        "First row should contain at least 3 column headers (e.g., Date, Description, Amount)",
    ));

    let mut data_started = false;
    let mut gaps = 0;
    for (i, row) in data.iter().enumerate() {
        if !is_blank_row(row) {
            data_started = true;
        } else if data_started && data[i + 1..].iter().any(|r| !is_blank_row(r)) {
            gaps += 1;
        }
    }
    checks.push(Check::new(
        gaps == 0,
        "No blank rows in data!",
        format!(
            "Found {} blank row(s) within your data - avoid gaps in data",
            gaps
        ),
    ));

    let crowded: Vec<String> = data
        .iter()
        .enumerate()
        .flat_map(|(r, row)| {
            row.iter()
                .enumerate()
                .filter(|(_, cell)| holds_multiple_values(cell))
                .map(move |(c, _)| cell_name(r, c))
        })
        .collect();
    checks.push(Check::new(
        crowded.is_empty(),
        "Single values per cell - good practice!",
        format!(
            "Cells {} appear to contain multiple values - each cell should have one value",
            crowded.join(", ")
        ),
    ));

    let filled_rows = data.iter().filter(|row| !is_blank_row(row)).count();
    checks.push(Check::new(
        filled_rows >= MIN_ROWS,
        "Data structure looks complete!",
        "Add at least one header row and one data row",
    ));

    let failed: Vec<String> = checks
        .iter()
        .filter(|c| !c.passed)
        .map(|c| c.message.clone())
        .collect();
    match failed.len() {
        0 => ValidationResult {
            status: ValidationStatus::Correct,
            message: "Excellent! Your spreadsheet is correctly structured.".to_string(),
            details: checks.into_iter().map(|c| c.message).collect(),
        },
        1 => ValidationResult {
            status: ValidationStatus::Partial,
            message: "Almost there! Just a few things to fix:".to_string(),
            details: failed,
        },
        _ => ValidationResult {
            status: ValidationStatus::Incorrect,
            message: "Let's work on the structure:".to_string(),
            details: failed,
        },
    }
}
