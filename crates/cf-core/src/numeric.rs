use crate::CoreError;

/// Floating point type used throughout the pipeline
pub type Real = f64;

/// `n` points from `start` to `end` inclusive, evenly spaced.
pub fn linspace(start: Real, end: Real, n: usize) -> Vec<Real> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as Real;
            let mut out: Vec<Real> = (0..n).map(|i| start + step * i as Real).collect();
            // pin the endpoint against accumulated rounding
            out[n - 1] = end;
            out
        }
    }
}

/// `n` points from `start` to `end` inclusive, evenly spaced in log.
///
/// Both bounds must be strictly positive.
pub fn logspace(start: Real, end: Real, n: usize) -> Result<Vec<Real>, CoreError> {
    if start <= 0.0 || end <= 0.0 {
        return Err(CoreError::InvalidArg {
            what: "logspace bounds must be positive",
        });
    }
    let mut out: Vec<Real> = linspace(start.ln(), end.ln(), n)
        .into_iter()
        .map(Real::exp)
        .collect();
    if let Some(first) = out.first_mut() {
        *first = start;
    }
    if n > 1 {
        out[n - 1] = end;
    }
    Ok(out)
}

/// Trapezoidal integral of `y` over the abscissae `x`.
pub fn trapezoid(x: &[Real], y: &[Real]) -> Real {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| 0.5 * (xs[1] - xs[0]) * (ys[0] + ys[1]))
        .sum()
}

/// Cumulative trapezoidal integral, starting at zero.
pub fn cumulative_trapezoid(x: &[Real], y: &[Real]) -> Vec<Real> {
    let mut out = Vec::with_capacity(x.len());
    let mut acc = 0.0;
    if !x.is_empty() {
        out.push(0.0);
    }
    for (xs, ys) in x.windows(2).zip(y.windows(2)) {
        acc += 0.5 * (xs[1] - xs[0]) * (ys[0] + ys[1]);
        out.push(acc);
    }
    out
}

/// Strict monotonicity check. Returns the first offending index on failure.
pub fn strictly_monotonic(values: &[Real]) -> Result<(), usize> {
    if values.len() < 2 {
        return Ok(());
    }
    let increasing = values[1] > values[0];
    for (i, w) in values.windows(2).enumerate() {
        let ok = if increasing { w[1] > w[0] } else { w[1] < w[0] };
        if !ok {
            return Err(i + 1);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logspace_hits_endpoints() {
        let v = logspace(1e-4, 1.0, 5).unwrap();
        assert_eq!(v.len(), 5);
        assert_eq!(v[0], 1e-4);
        assert_eq!(v[4], 1.0);
        assert!((v[2] - 1e-2).abs() < 1e-15);
        assert!(logspace(0.0, 1.0, 3).is_err());
    }

    #[test]
    fn trapezoid_integrates_linear_exactly() {
        let x = linspace(0.0, 2.0, 11);
        let y: Vec<f64> = x.iter().map(|v| 3.0 * v + 1.0).collect();
        assert!((trapezoid(&x, &y) - 8.0).abs() < 1e-12);
        let c = cumulative_trapezoid(&x, &y);
        assert_eq!(c.len(), x.len());
        assert!((c[10] - 8.0).abs() < 1e-12);
    }

    #[test]
    fn monotonic_detects_plateau() {
        assert!(strictly_monotonic(&[1.0, 2.0, 3.0]).is_ok());
        assert!(strictly_monotonic(&[3.0, 2.0, 1.0]).is_ok());
        assert_eq!(strictly_monotonic(&[1.0, 2.0, 2.0]), Err(2));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn logspace_is_increasing(lo in 1e-6_f64..1.0, span in 1.5_f64..1e4, n in 2_usize..200) {
            let v = logspace(lo, lo * span, n).unwrap();
            prop_assert!(strictly_monotonic(&v).is_ok());
            prop_assert_eq!(v.len(), n);
        }
    }
}
