use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::fmt;

/// A single cell value as it appears in a workbook snapshot.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(untagged)]
pub enum CellValue {
    Bool(bool),
    Number(Number),
    Text(String),
}

impl CellValue {
    pub fn is_blank(&self) -> bool {
        matches!(self, CellValue::Text(s) if s.trim().is_empty())
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or_else(|| CellValue::Text(n.to_string()), CellValue::Number)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Number(n.into())
    }
}

/// One entry of a sheet's `cellData` map: `v` holds the value, `f` the
/// formula text when the cell was entered as a formula.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct CellData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<CellValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub f: Option<String>,
}

impl CellData {
    pub fn value(v: impl Into<CellValue>) -> Self {
        CellData {
            v: Some(v.into()),
            f: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.f.is_none() && self.v.as_ref().is_none_or(CellValue::is_blank)
    }

    /// Text shown for the cell; formulas without a cached value show their text.
    pub fn display_text(&self) -> String {
        match (&self.v, &self.f) {
            (Some(v), _) => v.to_string(),
            (None, Some(f)) => f.clone(),
            (None, None) => String::new(),
        }
    }
}

/// Column letters for a zero-based column index (`0 -> A`, `26 -> AA`).
pub fn col_to_letter(col: usize) -> String {
    let mut col = col + 1;
    let mut result = String::new();
    while col > 0 {
        col -= 1;
        result.push(((col % 26) as u8 + b'A') as char);
        col /= 26;
    }
    result.chars().rev().collect()
}

/// Zero-based column index for column letters; `None` when not letters.
pub fn letter_to_col(letters: &str) -> Option<usize> {
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let one_based = letters.chars().fold(0usize, |acc, c| {
        acc * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1)
    });
    Some(one_based - 1)
}

/// A1-style name for a zero-based `(row, col)`.
pub fn cell_name(row: usize, col: usize) -> String {
    format!("{}{}", col_to_letter(col), row + 1)
}

/// Parses an A1-style name into a zero-based `(row, col)`.
pub fn parse_cell_name(cell_name: &str) -> Option<(usize, usize)> {
    let mut letters = String::new();
    let mut digits = String::new();
    let mut found_digit = false;

    for c in cell_name.trim().chars() {
        if c.is_ascii_alphabetic() {
            if found_digit {
                return None;
            }
            letters.push(c);
        } else if c.is_ascii_digit() {
            found_digit = true;
            digits.push(c);
        } else {
            return None;
        }
    }

    let col = letter_to_col(&letters)?;
    let row = digits.parse::<usize>().ok()?;
    if row == 0 {
        return None;
    }
    Some((row - 1, col))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters() {
        assert_eq!(col_to_letter(0), "A");
        assert_eq!(col_to_letter(25), "Z");
        assert_eq!(col_to_letter(26), "AA");
        assert_eq!(col_to_letter(702), "AAA");
        assert_eq!(letter_to_col("AB"), Some(27));
        assert_eq!(letter_to_col("a"), Some(0));
    }

    #[test]
    fn cell_names_are_zero_based() {
        assert_eq!(cell_name(0, 0), "A1");
        assert_eq!(parse_cell_name("C12"), Some((11, 2)));
        assert_eq!(parse_cell_name("1A"), None);
        assert_eq!(parse_cell_name("A0"), None);
    }

    #[test]
    fn untagged_values_keep_their_json_type() {
        let data: CellData = serde_json::from_str(r#"{"v": 12.5}"#).unwrap();
        assert_eq!(data.v, Some(CellValue::from(12.5)));
        let data: CellData = serde_json::from_str(r#"{"v": 20}"#).unwrap();
        assert_eq!(serde_json::to_string(&data).unwrap(), r#"{"v":20}"#);
        let data: CellData = serde_json::from_str(r#"{"v": "Date"}"#).unwrap();
        assert_eq!(data.display_text(), "Date");
        assert!(CellData::value("  ").is_empty());
    }
}
