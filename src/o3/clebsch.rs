//! Coupling coefficients between real irreps.
//!
//! The complex Clebsch–Gordan coefficients come from the Racah closed form.
//! Mapping them to the real basis gives a tensor that is real up to a global
//! phase; the non-vanishing part is kept, normalized and sign-fixed.

use candle_core::{DType, Device, Tensor};
use num_complex::Complex64;

use super::factorial;
use super::wigner::real_basis;
use crate::error::{Result, TpError};

/// Entries smaller than this are flushed to exact zero.
const FLUSH: f64 = 1e-14;

/// Largest degree accepted by [`CouplingTensor::compute`] and `Rs::rep`.
///
/// The closed forms go through factorials up to `(3 * l + 1)!`, which stay
/// finite and accurate in f64 well below this bound.
pub const MAX_DEGREE: u32 = 40;

/// Check |l1 - l2| <= l3 <= l1 + l2.
pub fn triangle(l1: u32, l2: u32, l3: u32) -> bool {
    l1.abs_diff(l2) <= l3 && u64::from(l3) <= u64::from(l1) + u64::from(l2)
}

pub(crate) fn check_degree(l: u32) -> Result<()> {
    if l > MAX_DEGREE {
        return Err(TpError::config(format!("degree {l} exceeds the maximum of {MAX_DEGREE}")));
    }
    Ok(())
}

/// Complex Clebsch–Gordan coefficient <l1 m1 l2 m2 | l3 m3>
/// (Condon–Shortley phase).
pub fn clebsch_gordan(l1: u32, m1: i64, l2: u32, m2: i64, l3: u32, m3: i64) -> f64 {
    let (j1, j2, j) = (l1 as i64, l2 as i64, l3 as i64);
    if m3 != m1 + m2 || m1.abs() > j1 || m2.abs() > j2 || m3.abs() > j || !triangle(l1, l2, l3) {
        return 0.0;
    }

    let prefactor = ((2 * j + 1) as f64
        * factorial(j + j1 - j2)
        * factorial(j - j1 + j2)
        * factorial(j1 + j2 - j)
        / factorial(j1 + j2 + j + 1))
        .sqrt();
    let norm = (factorial(j + m3)
        * factorial(j - m3)
        * factorial(j1 - m1)
        * factorial(j1 + m1)
        * factorial(j2 - m2)
        * factorial(j2 + m2))
    .sqrt();

    let k_min = 0.max(j2 - j - m1).max(j1 + m2 - j);
    let k_max = (j1 + j2 - j).min(j1 - m1).min(j2 + m2);
    let mut sum = 0.0;
    for k in k_min..=k_max {
        let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
        sum += sign
            / (factorial(k)
                * factorial(j1 + j2 - j - k)
                * factorial(j1 - m1 - k)
                * factorial(j2 + m2 - k)
                * factorial(j - j2 + m1 + k)
                * factorial(j - j1 - m2 + k));
    }

    prefactor * norm * sum
}

/// Real coupling tensor for `(l1, l2, l3)`, uncached.
///
/// Prefer [`super::CouplingCache::coupling`] when the same triple is needed
/// more than once.
pub fn coupling(l1: u32, l2: u32, l3: u32) -> Result<CouplingTensor> {
    CouplingTensor::compute(l1, l2, l3)
}

/// Real coupling tensor of shape `(2l1+1, 2l2+1, 2l3+1)`, row-major.
///
/// Component normalized: for every output component k,
/// `Σ_ij C[i, j, k]² = 1`, so contracting two independent unit-variance
/// inputs yields a unit-variance output.
#[derive(Debug, Clone, PartialEq)]
pub struct CouplingTensor {
    l1: u32,
    l2: u32,
    l3: u32,
    values: Vec<f64>,
}

impl CouplingTensor {
    /// Compute the coupling tensor for `(l1, l2, l3)`.
    pub fn compute(l1: u32, l2: u32, l3: u32) -> Result<Self> {
        for l in [l1, l2, l3] {
            check_degree(l)?;
        }
        if !triangle(l1, l2, l3) {
            return Err(TpError::Domain { l1, l2, l3 });
        }

        let (d1, d2, d3) = (
            (2 * l1 + 1) as usize,
            (2 * l2 + 1) as usize,
            (2 * l3 + 1) as usize,
        );
        let u1 = real_basis(l1);
        let u2 = real_basis(l2);
        let u3 = real_basis(l3);
        let zero = Complex64::new(0.0, 0.0);
        let mut acc = vec![zero; d1 * d2 * d3];

        // C_real[a, b, c] = Σ U3[c, M] · CG · conj(U1[a, m1]) · conj(U2[b, m2])
        for i1 in 0..d1 {
            let m1 = i1 as i64 - l1 as i64;
            for i2 in 0..d2 {
                let m2 = i2 as i64 - l2 as i64;
                let m3 = m1 + m2;
                if m3.abs() > l3 as i64 {
                    continue;
                }
                let cg = clebsch_gordan(l1, m1, l2, m2, l3, m3);
                if cg == 0.0 {
                    continue;
                }
                let i3 = (m3 + l3 as i64) as usize;

                for a in 0..d1 {
                    let x = u1[a * d1 + i1].conj();
                    if x == zero {
                        continue;
                    }
                    for b in 0..d2 {
                        let y = u2[b * d2 + i2].conj();
                        if y == zero {
                            continue;
                        }
                        for c in 0..d3 {
                            let z = u3[c * d3 + i3];
                            if z == zero {
                                continue;
                            }
                            acc[(a * d2 + b) * d3 + c] += x * y * z * cg;
                        }
                    }
                }
            }
        }

        let re_norm: f64 = acc.iter().map(|v| v.re * v.re).sum();
        let im_norm: f64 = acc.iter().map(|v| v.im * v.im).sum();
        let mut values: Vec<f64> = if re_norm >= im_norm {
            acc.iter().map(|v| v.re).collect()
        } else {
            acc.iter().map(|v| v.im).collect()
        };

        let norm = re_norm.max(im_norm).sqrt();
        let sign = values
            .iter()
            .find(|v| v.abs() > 1e-10 * norm)
            .map_or(1.0, |v| v.signum());
        let scale = sign * (d3 as f64).sqrt() / norm;
        for v in values.iter_mut() {
            *v *= scale;
            if v.abs() < FLUSH {
                *v = 0.0;
            }
        }

        Ok(Self { l1, l2, l3, values })
    }

    pub fn degrees(&self) -> (u32, u32, u32) {
        (self.l1, self.l2, self.l3)
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (
            (2 * self.l1 + 1) as usize,
            (2 * self.l2 + 1) as usize,
            (2 * self.l3 + 1) as usize,
        )
    }

    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        let (_, d2, d3) = self.shape();
        self.values[(i * d2 + j) * d3 + k]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Non-zero entries as `(i, j, k, value)`.
    pub fn nonzeros(&self) -> Vec<(usize, usize, usize, f64)> {
        let (_, d2, d3) = self.shape();
        self.values
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0.0)
            .map(|(n, v)| (n / (d2 * d3), (n / d3) % d2, n % d3, *v))
            .collect()
    }

    /// Dense tensor of shape `(d1, d2, d3)`.
    pub fn to_tensor(&self, dtype: DType, device: &Device) -> Result<Tensor> {
        let t = Tensor::from_vec(self.values.clone(), self.shape(), device)?;
        Ok(t.to_dtype(dtype)?)
    }
}
