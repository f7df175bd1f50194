//! Interpolation engine.
//!
//! Every query goes through two steps:
//! 1. locate the bracketing pair of rows, either by bisection
//!    ([`InterpMode::Normal`]) or by walking from a caller-owned [`Cursor`]
//!    ([`InterpMode::GrowingCloseby`]);
//! 2. evaluate a cubic Hermite polynomial on the bracket, with slopes taken
//!    from the four-row neighbourhood, or a straight line when the bracket
//!    touches either end of the table.
//!
//! Both modes resolve to the same canonical bracket (the last row whose key
//! does not exceed the query, clamped to `rows - 2`), so they return
//! identical values. The cursor only saves search work.
//!
//! Axes may be increasing or decreasing; decreasing axes are handled by
//! flipping the sign of the key.

use crate::error::{TableError, TableResult};

/// Search strategy for locating the bracketing rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InterpMode {
    /// Bisection from scratch.
    #[default]
    Normal,
    /// Walk outward from the cursor; cheap for monotone query sequences.
    GrowingCloseby,
}

/// Positional hint carried between queries on the same table.
///
/// Opaque to callers. A fresh cursor is always valid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    index: usize,
}

/// Resolved bracket: rows `i` and `i + 1`, plus the axis orientation.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Bracket {
    pub(crate) i: usize,
    dir: f64,
}

/// Locate the bracket of `x` among `n` ordered keys.
pub(crate) fn locate<K>(
    axis: &str,
    n: usize,
    key: K,
    x: f64,
    mode: InterpMode,
    cursor: &mut Cursor,
) -> TableResult<Bracket>
where
    K: Fn(usize) -> f64,
{
    if n < 2 {
        return Err(TableError::InsufficientData {
            axis: axis.to_string(),
            rows: n,
        });
    }
    let (first, last) = (key(0), key(n - 1));
    let (min, max) = if first <= last {
        (first, last)
    } else {
        (last, first)
    };
    // NaN fails both comparisons
    if !(x >= min && x <= max) {
        return Err(TableError::OutOfRange {
            axis: axis.to_string(),
            value: x,
            min,
            max,
        });
    }

    let dir = if last > first { 1.0 } else { -1.0 };
    let akey = |j: usize| dir * key(j);
    let ax = dir * x;

    let i = match mode {
        InterpMode::Normal => {
            let (mut lo, mut hi) = (0, n - 1);
            while hi - lo > 1 {
                let mid = (lo + hi) / 2;
                if akey(mid) <= ax {
                    lo = mid;
                } else {
                    hi = mid;
                }
            }
            lo
        }
        InterpMode::GrowingCloseby => {
            let mut i = cursor.index.min(n - 2);
            while i < n - 2 && akey(i + 1) <= ax {
                i += 1;
            }
            while i > 0 && akey(i) > ax {
                i -= 1;
            }
            i
        }
    };
    cursor.index = i;
    Ok(Bracket { i, dir })
}

/// Evaluate the interpolant of `val` over `key` on a located bracket.
pub(crate) fn hermite<K, V>(n: usize, key: K, val: V, b: Bracket, x: f64) -> f64
where
    K: Fn(usize) -> f64,
    V: Fn(usize) -> f64,
{
    let i = b.i;
    let akey = |j: usize| b.dir * key(j);
    let (x0, x1) = (akey(i), akey(i + 1));
    let (y0, y1) = (val(i), val(i + 1));
    let h = x1 - x0;
    let t = (b.dir * x - x0) / h;

    if i == 0 || i + 2 >= n {
        return y0 + t * (y1 - y0);
    }

    let (xm, x2) = (akey(i - 1), akey(i + 2));
    let (ym, y2) = (val(i - 1), val(i + 2));
    let d_mid = (y1 - y0) / h;
    let d_left = (y0 - ym) / (x0 - xm);
    let d_right = (y2 - y1) / (x2 - x1);
    // three-point slopes on a non-uniform grid
    let m0 = (h * d_left + (x0 - xm) * d_mid) / (x1 - xm);
    let m1 = ((x2 - x1) * d_mid + h * d_right) / (x2 - x0);

    let t2 = t * t;
    let t3 = t2 * t;
    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;
    h00 * y0 + h10 * h * m0 + h01 * y1 + h11 * h * m1
}

/// Interpolate `ys` over the monotonic abscissae `xs`.
pub fn interp_slice(
    axis: &str,
    xs: &[f64],
    ys: &[f64],
    x: f64,
    mode: InterpMode,
    cursor: &mut Cursor,
) -> TableResult<f64> {
    if xs.len() != ys.len() {
        return Err(TableError::Shape {
            what: format!(
                "axis '{axis}' has {} points but {} values",
                xs.len(),
                ys.len()
            ),
        });
    }
    let n = xs.len();
    let b = locate(axis, n, |j| xs[j], x, mode, cursor)?;
    Ok(hermite(n, |j| xs[j], |j| ys[j], b, x))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Vec<f64> {
        vec![0.0, 0.5, 1.5, 2.0, 3.5, 5.0]
    }

    #[test]
    fn reproduces_nodes_exactly() {
        let xs = grid();
        let ys: Vec<f64> = xs.iter().map(|x| x.sin()).collect();
        let mut c = Cursor::default();
        for (x, y) in xs.iter().zip(&ys) {
            let v = interp_slice("x", &xs, &ys, *x, InterpMode::Normal, &mut c).unwrap();
            assert!((v - y).abs() < 1e-14);
        }
    }

    #[test]
    fn exact_for_quadratics_in_the_interior() {
        let xs = grid();
        let ys: Vec<f64> = xs.iter().map(|x| 2.0 * x * x - x + 1.0).collect();
        let mut c = Cursor::default();
        for x in [0.7, 1.0, 1.9, 2.6] {
            let v = interp_slice("x", &xs, &ys, x, InterpMode::Normal, &mut c).unwrap();
            assert!((v - (2.0 * x * x - x + 1.0)).abs() < 1e-12, "x={x}");
        }
    }

    #[test]
    fn linear_at_the_edges() {
        let xs = grid();
        let ys: Vec<f64> = xs.iter().map(|x| x * x).collect();
        let mut c = Cursor::default();
        let v = interp_slice("x", &xs, &ys, 0.25, InterpMode::Normal, &mut c).unwrap();
        assert!((v - 0.125).abs() < 1e-14);
    }

    #[test]
    fn decreasing_axis_supported() {
        let xs = vec![10.0, 8.0, 5.0, 1.0, 0.0];
        let ys: Vec<f64> = xs.iter().map(|x| 3.0 * x).collect();
        let mut c = Cursor::default();
        let v = interp_slice("z", &xs, &ys, 6.5, InterpMode::Normal, &mut c).unwrap();
        assert!((v - 19.5).abs() < 1e-12);
    }

    #[test]
    fn out_of_range_and_nan_fail() {
        let xs = grid();
        let ys = xs.clone();
        let mut c = Cursor::default();
        let err = interp_slice("x", &xs, &ys, 5.1, InterpMode::Normal, &mut c).unwrap_err();
        assert!(matches!(err, TableError::OutOfRange { max, .. } if max == 5.0));
        assert!(interp_slice("x", &xs, &ys, f64::NAN, InterpMode::Normal, &mut c).is_err());
    }

    #[test]
    fn single_row_is_insufficient() {
        let mut c = Cursor::default();
        let err = interp_slice("x", &[1.0], &[2.0], 1.0, InterpMode::Normal, &mut c).unwrap_err();
        assert!(matches!(err, TableError::InsufficientData { rows: 1, .. }));
    }

    #[test]
    fn stale_cursor_still_correct() {
        let xs = grid();
        let ys: Vec<f64> = xs.iter().map(|x| x.exp()).collect();
        let mut warm = Cursor::default();
        interp_slice("x", &xs, &ys, 4.9, InterpMode::GrowingCloseby, &mut warm).unwrap();
        let a = interp_slice("x", &xs, &ys, 0.2, InterpMode::GrowingCloseby, &mut warm).unwrap();
        let b = interp_slice("x", &xs, &ys, 0.2, InterpMode::Normal, &mut Cursor::default())
            .unwrap();
        assert_eq!(a, b);
    }
}
