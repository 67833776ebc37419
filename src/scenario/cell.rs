//! Typed values for cells of the scenario and result tables.
//!
//! All tables exchanged with the optimiser store every value as a string. This module is the one
//! place where those strings are coerced to numbers, booleans or nothing.
use std::fmt;
use unicase::UniCase;

/// The value of a single table cell
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// A blank cell (or NaN)
    Empty,
    /// A boolean, written as `True` or `False`
    Bool(bool),
    /// Any number
    Number(f64),
    /// Anything else (e.g. file names)
    Text(String),
}

impl CellValue {
    /// Coerce a raw string into a typed value.
    ///
    /// Surrounding whitespace is ignored. `true`/`false` are matched case-insensitively and a
    /// value which parses as NaN counts as empty.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Self::Empty;
        }

        let value = UniCase::new(raw);
        if value == UniCase::new("true") {
            return Self::Bool(true);
        }
        if value == UniCase::new("false") {
            return Self::Bool(false);
        }

        match raw.parse::<f64>() {
            Ok(number) if number.is_nan() => Self::Empty,
            Ok(number) => Self::Number(number),
            Err(_) => Self::Text(raw.to_string()),
        }
    }

    /// Whether the cell is blank
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// The cell as a number, if it holds one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(number) => Some(*number),
            _ => None,
        }
    }

    /// The cell as a boolean.
    ///
    /// The numbers 1 and 0 are accepted as well as `true` and `false`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            Self::Number(number) if *number == 1.0 => Some(true),
            Self::Number(number) if *number == 0.0 => Some(false),
            _ => None,
        }
    }

    /// The cell as a string slice, if it holds text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Bool(true) => write!(f, "True"),
            Self::Bool(false) => write!(f, "False"),
            Self::Number(number) => write!(f, "{number}"),
            Self::Text(text) => write!(f, "{text}"),
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<u32> for CellValue {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}
