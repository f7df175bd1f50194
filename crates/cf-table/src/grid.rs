//! Two-dimensional grids over a pair of strictly increasing axes.

use cf_core::numeric::strictly_monotonic;

use crate::error::{TableError, TableResult};
use crate::interp::{Cursor, InterpMode, hermite, locate};

/// Pair of cursors for the two grid axes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursor2 {
    pub x: Cursor,
    pub y: Cursor,
}

/// Values sampled on `x` (fast axis) times `y` (slow axis), row-major:
/// `values[iy * nx + ix]`.
#[derive(Debug, Clone)]
pub struct Grid2 {
    x_name: String,
    y_name: String,
    x: Vec<f64>,
    y: Vec<f64>,
    values: Vec<f64>,
}

impl Grid2 {
    pub fn new(
        x_name: impl Into<String>,
        x: Vec<f64>,
        y_name: impl Into<String>,
        y: Vec<f64>,
        values: Vec<f64>,
    ) -> TableResult<Self> {
        let x_name = x_name.into();
        let y_name = y_name.into();
        for (name, axis) in [(&x_name, &x), (&y_name, &y)] {
            if axis.len() >= 2 && axis[1] < axis[0] {
                return Err(TableError::NotMonotonic {
                    axis: name.clone(),
                    row: 1,
                });
            }
            if let Err(row) = strictly_monotonic(axis) {
                return Err(TableError::NotMonotonic {
                    axis: name.clone(),
                    row,
                });
            }
        }
        if values.len() != x.len() * y.len() {
            return Err(TableError::Shape {
                what: format!(
                    "grid {x_name} x {y_name} is {} x {} but holds {} values",
                    x.len(),
                    y.len(),
                    values.len()
                ),
            });
        }
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(TableError::NonFinite {
                column: format!("{x_name}/{y_name}"),
                row: i / x.len().max(1),
                value: values[i],
            });
        }
        Ok(Self {
            x_name,
            y_name,
            x,
            y,
            values,
        })
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn nx(&self) -> usize {
        self.x.len()
    }

    pub fn ny(&self) -> usize {
        self.y.len()
    }

    pub fn value(&self, ix: usize, iy: usize) -> f64 {
        self.values[iy * self.nx() + ix]
    }

    /// All x-samples at one y index.
    pub fn row(&self, iy: usize) -> &[f64] {
        let nx = self.nx();
        &self.values[iy * nx..(iy + 1) * nx]
    }

    /// Interpolate along x on a fixed y row.
    pub fn interpolate_row(
        &self,
        iy: usize,
        x: f64,
        mode: InterpMode,
        cursor: &mut Cursor,
    ) -> TableResult<f64> {
        if iy >= self.ny() {
            return Err(TableError::Shape {
                what: format!("row {iy} beyond {} rows of '{}'", self.ny(), self.y_name),
            });
        }
        let row = self.row(iy);
        let b = locate(&self.x_name, self.nx(), |j| self.x[j], x, mode, cursor)?;
        Ok(hermite(self.nx(), |j| self.x[j], |j| row[j], b, x))
    }

    /// Interpolate at `(x, y)`: first along x on the four rows around the y
    /// bracket, then along y through those values.
    pub fn interpolate(
        &self,
        x: f64,
        y: f64,
        mode: InterpMode,
        cursor: &mut Cursor2,
    ) -> TableResult<f64> {
        let nx = self.nx();
        let ny = self.ny();
        let bx = locate(&self.x_name, nx, |j| self.x[j], x, mode, &mut cursor.x)?;
        let by = locate(&self.y_name, ny, |j| self.y[j], y, mode, &mut cursor.y)?;

        let lo = by.i.saturating_sub(1);
        let hi = (by.i + 2).min(ny - 1);
        let mut local_y = [0.0; 4];
        let mut local_v = [0.0; 4];
        let count = hi - lo + 1;
        for (slot, iy) in (lo..=hi).enumerate() {
            let row = self.row(iy);
            local_y[slot] = self.y[iy];
            local_v[slot] = hermite(nx, |j| self.x[j], |j| row[j], bx, x);
        }
        let mut local_cursor = Cursor::default();
        let b = locate(
            &self.y_name,
            count,
            |j| local_y[j],
            y,
            InterpMode::Normal,
            &mut local_cursor,
        )?;
        Ok(hermite(count, |j| local_y[j], |j| local_v[j], b, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane() -> Grid2 {
        let x: Vec<f64> = (0..8).map(|i| i as f64 * 0.5).collect();
        let y: Vec<f64> = (0..6).map(|i| i as f64).collect();
        let mut values = Vec::new();
        for yy in &y {
            for xx in &x {
                values.push(1.0 + 2.0 * xx + 3.0 * yy + xx * yy);
            }
        }
        Grid2::new("x", x, "y", y, values).unwrap()
    }

    #[test]
    fn bilinear_surface_is_reproduced() {
        let g = plane();
        let mut c = Cursor2::default();
        for (x, y) in [(0.3, 0.2), (1.7, 2.5), (3.5, 5.0), (2.2, 4.1)] {
            let v = g.interpolate(x, y, InterpMode::Normal, &mut c).unwrap();
            let exact = 1.0 + 2.0 * x + 3.0 * y + x * y;
            assert!((v - exact).abs() < 1e-12, "({x},{y}) -> {v} vs {exact}");
        }
    }

    #[test]
    fn row_interpolation_matches_grid_on_nodes() {
        let g = plane();
        let mut c = Cursor::default();
        let v = g.interpolate_row(2, 1.25, InterpMode::Normal, &mut c).unwrap();
        assert!((v - (1.0 + 2.5 + 6.0 + 2.5)).abs() < 1e-12);
    }

    #[test]
    fn shape_checked() {
        assert!(matches!(
            Grid2::new("x", vec![0.0, 1.0], "y", vec![0.0, 1.0], vec![0.0; 3]),
            Err(TableError::Shape { .. })
        ));
        assert!(matches!(
            Grid2::new("x", vec![1.0, 0.0], "y", vec![0.0], vec![0.0; 2]),
            Err(TableError::NotMonotonic { .. })
        ));
    }

    #[test]
    fn out_of_range_on_either_axis() {
        let g = plane();
        let mut c = Cursor2::default();
        assert!(g.interpolate(-0.1, 1.0, InterpMode::Normal, &mut c).is_err());
        assert!(g.interpolate(1.0, 5.5, InterpMode::Normal, &mut c).is_err());
    }
}
