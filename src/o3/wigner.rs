//! Wigner D matrices.
//!
//! The complex matrices follow the usual Condon–Shortley conventions:
//! D_{m'm}(α, β, γ) = e^{-i m' α} d_{m'm}(β) e^{-i m γ}.
//! Real matrices are obtained with the complex-to-real change of basis
//! `U`: D_real = U · D · U†.

use std::f64::consts::{FRAC_1_SQRT_2, TAU};

use num_complex::Complex64;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::factorial;

/// ZYZ Euler angles of a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Angles {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl Angles {
    pub fn new(alpha: f64, beta: f64, gamma: f64) -> Self {
        Self { alpha, beta, gamma }
    }

    /// The identity rotation.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Draw a rotation uniformly from SO(3) (Haar measure).
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let alpha = rng.gen_range(0.0..TAU);
        let gamma = rng.gen_range(0.0..TAU);
        let beta = rng.gen_range(-1.0f64..=1.0).acos();
        Self { alpha, beta, gamma }
    }
}

/// Wigner small-d matrix d^l(β), row-major, rows m' and columns m both
/// running over -l..=l.
pub fn wigner_small_d(l: u32, beta: f64) -> Vec<f64> {
    let l = l as i64;
    let d = (2 * l + 1) as usize;
    let (sin, cos) = (beta / 2.0).sin_cos();
    let mut out = vec![0.0; d * d];

    for mp in -l..=l {
        for m in -l..=l {
            let prefactor = (factorial(l + mp)
                * factorial(l - mp)
                * factorial(l + m)
                * factorial(l - m))
            .sqrt();

            let s_min = 0.max(m - mp);
            let s_max = (l + m).min(l - mp);
            let mut sum = 0.0;
            for s in s_min..=s_max {
                let sign = if (mp - m + s) % 2 == 0 { 1.0 } else { -1.0 };
                let denom = factorial(l + m - s)
                    * factorial(s)
                    * factorial(mp - m + s)
                    * factorial(l - mp - s);
                sum += sign
                    * cos.powi((2 * l + m - mp - 2 * s) as i32)
                    * sin.powi((mp - m + 2 * s) as i32)
                    / denom;
            }

            out[(mp + l) as usize * d + (m + l) as usize] = prefactor * sum;
        }
    }
    out
}

/// Complex Wigner D matrix, row-major over (m', m).
pub(crate) fn wigner_d_complex(l: u32, angles: &Angles) -> Vec<Complex64> {
    let small = wigner_small_d(l, angles.beta);
    let li = l as i64;
    let d = (2 * l + 1) as usize;
    let mut out = Vec::with_capacity(d * d);
    for (row, mp) in (-li..=li).enumerate() {
        for (col, m) in (-li..=li).enumerate() {
            let phase = Complex64::from_polar(
                1.0,
                -(mp as f64) * angles.alpha - (m as f64) * angles.gamma,
            );
            out.push(phase * small[row * d + col]);
        }
    }
    out
}

/// Change of basis from complex to real spherical harmonics, row-major
/// `U[a, m]` with `a` the real index and `m` the complex one.
pub(crate) fn real_basis(l: u32) -> Vec<Complex64> {
    let li = l as i64;
    let d = (2 * l + 1) as usize;
    let idx = |a: i64, m: i64| (a + li) as usize * d + (m + li) as usize;
    let mut u = vec![Complex64::new(0.0, 0.0); d * d];

    for m in 1..=li {
        let sign = if m % 2 == 0 { 1.0 } else { -1.0 };
        // sin-like component, stored at a = -m
        u[idx(-m, -m)] = Complex64::new(0.0, -FRAC_1_SQRT_2);
        u[idx(-m, m)] = Complex64::new(0.0, sign * FRAC_1_SQRT_2);
        // cos-like component, stored at a = +m
        u[idx(m, -m)] = Complex64::new(FRAC_1_SQRT_2, 0.0);
        u[idx(m, m)] = Complex64::new(sign * FRAC_1_SQRT_2, 0.0);
    }
    u[idx(0, 0)] = Complex64::new(1.0, 0.0);
    u
}

/// Real Wigner D matrix of degree `l`, row-major `(2l+1) x (2l+1)`.
///
/// The matrix is orthogonal and acts on real components the same way
/// the coupling tensors of [`super::CouplingTensor`] expect.
pub fn wigner_d(l: u32, angles: &Angles) -> Vec<f64> {
    let d = (2 * l + 1) as usize;
    let u = real_basis(l);
    let dc = wigner_d_complex(l, angles);

    // T = U · D
    let mut t = vec![Complex64::new(0.0, 0.0); d * d];
    for a in 0..d {
        for m in 0..d {
            let ua = u[a * d + m];
            if ua.norm_sqr() == 0.0 {
                continue;
            }
            for n in 0..d {
                t[a * d + n] += ua * dc[m * d + n];
            }
        }
    }

    // D_real = T · U†
    let mut out = vec![0.0; d * d];
    for a in 0..d {
        for b in 0..d {
            let mut acc = Complex64::new(0.0, 0.0);
            for n in 0..d {
                acc += t[a * d + n] * u[b * d + n].conj();
            }
            out[a * d + b] = acc.re;
        }
    }
    out
}
