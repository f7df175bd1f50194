//! Fixed-step ODE integration used by the reference kernels.

use crate::error::StageResult;

/// A system `dy/dx = f(x, y)`.
pub trait OdeSystem {
    type State: Clone;

    fn rhs(&self, x: f64, y: &Self::State) -> StageResult<Self::State>;

    /// Element-wise `a + b`.
    fn add(&self, a: &Self::State, b: &Self::State) -> Self::State;

    /// `scale * a`.
    fn scale(&self, a: &Self::State, scale: f64) -> Self::State;
}

/// One-step integration scheme.
pub trait Integrator {
    fn step<S: OdeSystem>(&self, sys: &S, x: f64, y: &S::State, h: f64) -> StageResult<S::State>;
}

/// Classical fourth-order Runge-Kutta.
#[derive(Clone, Copy, Debug, Default)]
pub struct Rk4;

impl Integrator for Rk4 {
    fn step<S: OdeSystem>(&self, sys: &S, x: f64, y: &S::State, h: f64) -> StageResult<S::State> {
        let k1 = sys.rhs(x, y)?;

        let y2 = sys.add(y, &sys.scale(&k1, 0.5 * h));
        let k2 = sys.rhs(x + 0.5 * h, &y2)?;

        let y3 = sys.add(y, &sys.scale(&k2, 0.5 * h));
        let k3 = sys.rhs(x + 0.5 * h, &y3)?;

        let y4 = sys.add(y, &sys.scale(&k3, h));
        let k4 = sys.rhs(x + h, &y4)?;

        let k_sum = sys.add(
            &sys.add(&k1, &sys.scale(&k2, 2.0)),
            &sys.add(&sys.scale(&k3, 2.0), &k4),
        );
        Ok(sys.add(y, &sys.scale(&k_sum, h / 6.0)))
    }
}

/// Integrate across `grid`, returning the state at every grid point.
///
/// Each interval is split into `substeps` equal steps.
pub fn integrate_on_grid<S, I>(
    integrator: &I,
    sys: &S,
    grid: &[f64],
    y0: S::State,
    substeps: usize,
) -> StageResult<Vec<S::State>>
where
    S: OdeSystem,
    I: Integrator,
{
    let substeps = substeps.max(1);
    let mut out = Vec::with_capacity(grid.len());
    let mut y = y0;
    for (i, &x) in grid.iter().enumerate() {
        if i > 0 {
            let x0 = grid[i - 1];
            let h = (x - x0) / substeps as f64;
            for s in 0..substeps {
                y = integrator.step(sys, x0 + s as f64 * h, &y, h)?;
            }
        }
        out.push(y.clone());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Decay;

    impl OdeSystem for Decay {
        type State = [f64; 2];

        fn rhs(&self, _x: f64, y: &[f64; 2]) -> StageResult<[f64; 2]> {
            Ok([-y[0], y[0]])
        }

        fn add(&self, a: &[f64; 2], b: &[f64; 2]) -> [f64; 2] {
            [a[0] + b[0], a[1] + b[1]]
        }

        fn scale(&self, a: &[f64; 2], s: f64) -> [f64; 2] {
            [a[0] * s, a[1] * s]
        }
    }

    fn decay_error(substeps: usize) -> f64 {
        let grid: Vec<f64> = (0..=20).map(|i| i as f64 * 0.1).collect();
        let states = integrate_on_grid(&Rk4, &Decay, &grid, [1.0, 0.0], substeps).unwrap();
        assert_eq!(states.len(), grid.len());
        let last = states.last().unwrap();
        // conserved sum
        assert!((last[0] + last[1] - 1.0).abs() < 1e-12);
        (last[0] - (-2.0_f64).exp()).abs()
    }

    #[test]
    fn rk4_tracks_exponential_decay() {
        assert!(decay_error(2) < 1e-6);
    }

    #[test]
    fn rk4_error_shrinks_at_fourth_order() {
        let coarse = decay_error(2);
        let fine = decay_error(4);
        // halving h should cut the error by about 16
        assert!(fine < coarse / 10.0, "{coarse} -> {fine}");
    }
}
