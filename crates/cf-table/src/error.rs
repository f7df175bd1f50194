//! Table and query errors.

use thiserror::Error;

pub type TableResult<T> = Result<T, TableError>;

/// Errors raised while building or querying a table.
///
/// Query errors (`OutOfRange`, `InsufficientData`, `UnknownColumn`) are local
/// to the call; the table stays valid.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TableError {
    #[error("Value {value} outside range [{min}, {max}] of axis '{axis}'")]
    OutOfRange {
        axis: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Interpolation needs at least 2 rows, '{axis}' has {rows}")]
    InsufficientData { axis: String, rows: usize },

    #[error("Unknown or disabled column '{name}'")]
    UnknownColumn { name: String },

    #[error("Row width mismatch: expected {expected} values, got {got}")]
    RowWidth { expected: usize, got: usize },

    #[error("Axis '{axis}' is not strictly monotonic at row {row}")]
    NotMonotonic { axis: String, row: usize },

    #[error("Non-finite value {value} in column '{column}' at row {row}")]
    NonFinite {
        column: String,
        row: usize,
        value: f64,
    },

    #[error("Shape error: {what}")]
    Shape { what: String },
}
