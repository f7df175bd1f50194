//! cf-table: result tables and the read-only query layer.
//!
//! Provides:
//! - column maps (symbolic name -> stable offset)
//! - row-major result tables with declared monotonic axes
//! - the interpolation engine (bisection or cursor walk + cubic Hermite)
//! - two-dimensional grids for (k, tau)-style data
//! - title/row export helpers and the `.dat` text writer

pub mod columns;
pub mod error;
pub mod export;
pub mod grid;
pub mod interp;
pub mod table;

pub use columns::{Column, ColumnMap, ColumnMapBuilder};
pub use error::{TableError, TableResult};
pub use export::{OutputFormat, TitleList, write_dat};
pub use grid::{Cursor2, Grid2};
pub use interp::{Cursor, InterpMode, interp_slice};
pub use table::{Table, TableBuilder};
