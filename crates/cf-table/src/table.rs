//! Row-major result tables.

use cf_core::numeric::strictly_monotonic;

use crate::columns::{Column, ColumnMap};
use crate::error::{TableError, TableResult};
use crate::interp::{Cursor, InterpMode, hermite, locate};

/// Incremental builder for a [`Table`].
///
/// Rows are appended in the order of the stage's natural independent
/// variable; `finish` checks every declared axis is strictly monotonic and
/// freezes the table.
#[derive(Debug)]
pub struct TableBuilder {
    columns: ColumnMap,
    axes: Vec<Column>,
    data: Vec<f64>,
    rows: usize,
}

impl TableBuilder {
    pub fn new(columns: ColumnMap) -> Self {
        Self {
            columns,
            axes: Vec::new(),
            data: Vec::new(),
            rows: 0,
        }
    }

    /// Declare a column as an interpolation axis.
    pub fn axis(mut self, name: &str) -> TableResult<Self> {
        let col = self.columns.require(name)?;
        if !self.axes.contains(&col) {
            self.axes.push(col);
        }
        Ok(self)
    }

    pub fn reserve(&mut self, rows: usize) {
        self.data.reserve(rows * self.columns.len());
    }

    pub fn columns(&self) -> &ColumnMap {
        &self.columns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn push_row(&mut self, row: &[f64]) -> TableResult<()> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                expected: self.columns.len(),
                got: row.len(),
            });
        }
        if let Some((j, v)) = row.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(TableError::NonFinite {
                column: self.columns.names().nth(j).unwrap_or("?").to_string(),
                row: self.rows,
                value: *v,
            });
        }
        self.data.extend_from_slice(row);
        self.rows += 1;
        Ok(())
    }

    pub fn finish(self) -> TableResult<Table> {
        let ncol = self.columns.len();
        for &axis in &self.axes {
            let values: Vec<f64> = (0..self.rows)
                .map(|i| self.data[i * ncol + axis.offset()])
                .collect();
            if let Err(row) = strictly_monotonic(&values) {
                return Err(TableError::NotMonotonic {
                    axis: self.columns.name(axis).to_string(),
                    row,
                });
            }
        }
        Ok(Table {
            columns: self.columns,
            axes: self.axes,
            data: self.data,
            rows: self.rows,
        })
    }
}

/// Dense, immutable, row-major table owned by one stage.
#[derive(Debug, Clone)]
pub struct Table {
    columns: ColumnMap,
    axes: Vec<Column>,
    data: Vec<f64>,
    rows: usize,
}

impl Table {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &ColumnMap {
        &self.columns
    }

    pub fn require(&self, name: &str) -> TableResult<Column> {
        self.columns.require(name)
    }

    pub fn axes(&self) -> &[Column] {
        &self.axes
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let n = self.cols();
        &self.data[i * n..(i + 1) * n]
    }

    pub fn value(&self, i: usize, column: Column) -> f64 {
        self.data[i * self.cols() + column.offset()]
    }

    pub fn column(&self, column: Column) -> impl Iterator<Item = f64> + '_ {
        (0..self.rows).map(move |i| self.value(i, column))
    }

    pub fn column_vec(&self, column: Column) -> Vec<f64> {
        self.column(column).collect()
    }

    pub fn last_row(&self) -> Option<&[f64]> {
        self.rows.checked_sub(1).map(|i| self.row(i))
    }

    /// `(min, max)` of a column.
    pub fn range(&self, column: Column) -> Option<(f64, f64)> {
        if self.rows == 0 {
            return None;
        }
        let (a, b) = (self.value(0, column), self.value(self.rows - 1, column));
        if self.axes.contains(&column) {
            return Some((a.min(b), a.max(b)));
        }
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for v in self.column(column) {
            lo = lo.min(v);
            hi = hi.max(v);
        }
        Some((lo, hi))
    }

    fn check_axis(&self, axis: Column) -> TableResult<()> {
        if self.axes.contains(&axis) {
            Ok(())
        } else {
            Err(TableError::Shape {
                what: format!(
                    "column '{}' is not a declared axis",
                    self.columns.name(axis)
                ),
            })
        }
    }

    /// Interpolate the requested columns at `x` on `axis`, writing one value
    /// per column into `out`.
    pub fn interpolate(
        &self,
        axis: Column,
        x: f64,
        mode: InterpMode,
        cursor: &mut Cursor,
        cols: &[Column],
        out: &mut [f64],
    ) -> TableResult<()> {
        self.check_axis(axis)?;
        if out.len() != cols.len() {
            return Err(TableError::RowWidth {
                expected: cols.len(),
                got: out.len(),
            });
        }
        let key = |j: usize| self.value(j, axis);
        let b = locate(self.columns.name(axis), self.rows, key, x, mode, cursor)?;
        for (slot, &col) in out.iter_mut().zip(cols) {
            *slot = if col == axis {
                x
            } else {
                hermite(self.rows, key, |j| self.value(j, col), b, x)
            };
        }
        Ok(())
    }

    /// Interpolate every column at `x` on `axis`.
    pub fn interpolate_all(
        &self,
        axis: Column,
        x: f64,
        mode: InterpMode,
        cursor: &mut Cursor,
    ) -> TableResult<Vec<f64>> {
        let cols: Vec<Column> = self.columns.iter().map(|(c, _)| c).collect();
        let mut out = vec![0.0; cols.len()];
        self.interpolate(axis, x, mode, cursor, &cols, &mut out)?;
        Ok(out)
    }

    /// Interpolate a single column.
    pub fn interpolate_one(
        &self,
        axis: Column,
        x: f64,
        column: Column,
        mode: InterpMode,
        cursor: &mut Cursor,
    ) -> TableResult<f64> {
        let mut out = [0.0];
        self.interpolate(axis, x, mode, cursor, &[column], &mut out)?;
        Ok(out[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        let cols = ColumnMap::builder()
            .push("tau")
            .push("z")
            .push("f")
            .build()
            .unwrap();
        let mut b = TableBuilder::new(cols)
            .axis("tau")
            .unwrap()
            .axis("z")
            .unwrap();
        for i in 0..20 {
            let tau = 1.0 + i as f64;
            b.push_row(&[tau, 100.0 / tau, tau * tau]).unwrap();
        }
        b.finish().unwrap()
    }

    #[test]
    fn shape_and_access() {
        let t = table();
        assert_eq!(t.rows(), 20);
        assert_eq!(t.cols(), 3);
        let f = t.require("f").unwrap();
        assert_eq!(t.value(3, f), 16.0);
        assert_eq!(t.row(0), &[1.0, 100.0, 1.0]);
        assert_eq!(t.range(t.require("z").unwrap()), Some((5.0, 100.0)));
    }

    #[test]
    fn interpolates_on_either_axis() {
        let t = table();
        let tau = t.require("tau").unwrap();
        let z = t.require("z").unwrap();
        let f = t.require("f").unwrap();
        let mut c = Cursor::default();
        let v = t
            .interpolate_one(tau, 4.5, f, InterpMode::Normal, &mut c)
            .unwrap();
        assert!((v - 20.25).abs() < 1e-12);
        let tau_at = t
            .interpolate_one(z, 20.0, tau, InterpMode::Normal, &mut c)
            .unwrap();
        assert!((tau_at - 5.0).abs() < 1e-3);
    }

    #[test]
    fn non_axis_column_rejected() {
        let t = table();
        let f = t.require("f").unwrap();
        let mut c = Cursor::default();
        assert!(matches!(
            t.interpolate_all(f, 2.0, InterpMode::Normal, &mut c),
            Err(TableError::Shape { .. })
        ));
    }

    #[test]
    fn finish_rejects_non_monotonic_axis() {
        let cols = ColumnMap::builder().push("x").build().unwrap();
        let mut b = TableBuilder::new(cols).axis("x").unwrap();
        b.push_row(&[1.0]).unwrap();
        b.push_row(&[2.0]).unwrap();
        b.push_row(&[2.0]).unwrap();
        assert!(matches!(
            b.finish(),
            Err(TableError::NotMonotonic { row: 2, .. })
        ));
    }

    #[test]
    fn push_row_checks_width_and_finiteness() {
        let cols = ColumnMap::builder().push("x").push("y").build().unwrap();
        let mut b = TableBuilder::new(cols);
        assert!(matches!(
            b.push_row(&[1.0]),
            Err(TableError::RowWidth { expected: 2, got: 1 })
        ));
        assert!(matches!(
            b.push_row(&[1.0, f64::INFINITY]),
            Err(TableError::NonFinite { row: 0, .. })
        ));
        assert_eq!(b.rows(), 0);
    }

    #[test]
    fn single_row_table_is_insufficient() {
        let cols = ColumnMap::builder().push("x").build().unwrap();
        let mut b = TableBuilder::new(cols).axis("x").unwrap();
        b.push_row(&[1.0]).unwrap();
        let t = b.finish().unwrap();
        let x = t.require("x").unwrap();
        assert!(matches!(
            t.interpolate_all(x, 1.0, InterpMode::Normal, &mut Cursor::default()),
            Err(TableError::InsufficientData { rows: 1, .. })
        ));
    }
}
