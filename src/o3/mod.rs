//! Rotation group O(3): Wigner matrices and coupling coefficients.
//!
//! Everything here works in the real spherical-harmonic basis, components
//! ordered m = -l..=l. For l = 1 that is (y, z, x).

mod cache;
mod clebsch;
mod wigner;

pub use cache::CouplingCache;
pub(crate) use clebsch::check_degree;
pub use clebsch::{clebsch_gordan, coupling, triangle, CouplingTensor, MAX_DEGREE};
pub use wigner::{wigner_d, wigner_small_d, Angles};

/// n! as a float. Degrees stay small, so the direct product is exact enough.
pub(crate) fn factorial(n: i64) -> f64 {
    (2..=n).fold(1.0, |acc, k| acc * k as f64)
}
