//! Spherical Bessel functions for line-of-sight projection.
//!
//! Low multipoles above the turning point use the exact upward recurrence;
//! everything else uses the Debye asymptotic forms, with the turning-point
//! value `J_nu(nu) ~ 0.4473 nu^{-1/3}` across the transition zone.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

const RECURRENCE_MAX_L: usize = 50;
const TURNING_POINT: f64 = 0.447_307_2;

fn recurrence(l: usize, x: f64) -> f64 {
    let (s, c) = x.sin_cos();
    let j0 = s / x;
    if l == 0 {
        return j0;
    }
    let mut prev = j0;
    let mut cur = s / (x * x) - c / x;
    for n in 1..l {
        let next = (2 * n + 1) as f64 / x * cur - prev;
        prev = cur;
        cur = next;
    }
    cur
}

fn debye(l: usize, x: f64) -> f64 {
    let nu = l as f64 + 0.5;
    let pre = (FRAC_PI_2 / x).sqrt();
    let zone = nu.cbrt();
    if (x - nu).abs() < zone {
        return pre * TURNING_POINT / zone;
    }
    if x < nu {
        let tanh_a = (1.0 - (x / nu).powi(2)).sqrt();
        let alpha = (nu / x).acosh();
        pre * (nu * (tanh_a - alpha)).exp() / (2.0 * PI * nu * tanh_a).sqrt()
    } else {
        let tan_b = ((x / nu).powi(2) - 1.0).sqrt();
        let beta = tan_b.atan();
        pre * (2.0 / (PI * nu * tan_b)).sqrt() * (nu * (tan_b - beta) - FRAC_PI_4).cos()
    }
}

/// `j_l(x)` for `x >= 0`.
pub(crate) fn spherical_bessel(l: usize, x: f64) -> f64 {
    if x <= 0.0 {
        return if l == 0 { 1.0 } else { 0.0 };
    }
    if l <= RECURRENCE_MAX_L && x > l as f64 + 0.5 {
        recurrence(l, x)
    } else if l == 0 {
        x.sin() / x
    } else {
        debye(l, x)
    }
}
