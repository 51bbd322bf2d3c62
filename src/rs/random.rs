//! Random features and group action matrices for descriptors.

use candle_core::{DType, Device, Tensor};

use super::Rs;
use crate::config::Normalization;
use crate::error::Result;
use crate::o3::{check_degree, wigner_d, Angles};

/// Gaussian features of shape `[batch, rs.dim()]`.
///
/// With [`Normalization::Component`] every component has unit variance;
/// with [`Normalization::Norm`] every irrep vector has unit expected norm.
pub fn randn(
    batch: usize,
    rs: &Rs,
    normalization: Normalization,
    dtype: DType,
    device: &Device,
) -> Result<Tensor> {
    let x = Tensor::randn(0f64, 1f64, (batch, rs.dim()), device)?;
    let x = match normalization {
        Normalization::Component => x,
        Normalization::Norm => {
            let scale: Vec<f64> = rs
                .iter()
                .flat_map(|e| std::iter::repeat(normalization.component_std(e.l)).take(e.dim()))
                .collect();
            let scale = Tensor::from_vec(scale, rs.dim(), device)?;
            x.broadcast_mul(&scale)?
        }
    };
    Ok(x.to_dtype(dtype)?)
}

impl Rs {
    /// Matrix of the group element `(angles, inversion)` acting on this
    /// representation, shape `[dim, dim]`, dtype f64.
    ///
    /// Block diagonal, one Wigner block per channel. Under inversion a block
    /// is multiplied by its parity, so untracked-parity entries vanish.
    pub fn rep(&self, angles: &Angles, inversion: bool, device: &Device) -> Result<Tensor> {
        if let Some(l) = self.lmax() {
            check_degree(l)?;
        }
        let n = self.dim();
        let mut data = vec![0.0f64; n * n];
        let mut offset = 0;

        for e in self.iter() {
            let d = e.irrep_dim();
            let factor = if inversion { f64::from(e.parity) } else { 1.0 };
            let block = wigner_d(e.l, angles);
            for _ in 0..e.mul {
                for i in 0..d {
                    for j in 0..d {
                        data[(offset + i) * n + offset + j] = factor * block[i * d + j];
                    }
                }
                offset += d;
            }
        }

        Ok(Tensor::from_vec(data, (n, n), device)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_randn_shape_and_norm_scaling() {
        let rs = Rs::from_pairs(&[(2, 0), (1, 3)]);
        let x = randn(4000, &rs, Normalization::Norm, DType::F64, &Device::Cpu).unwrap();
        assert_eq!(x.dims(), &[4000, 9]);

        // Components of the l = 3 block have variance 1/7.
        let tail = x.narrow(1, 2, 7).unwrap();
        let var = tail.sqr().unwrap().mean_all().unwrap().to_scalar::<f64>().unwrap();
        assert!((var - 1.0 / 7.0).abs() < 0.02, "variance {var}");
    }

    #[test]
    fn test_rep_is_orthogonal() {
        let rs = Rs::from_triples(&[(2, 1, -1), (1, 2, 1)]).unwrap();
        let angles = Angles::random(&mut StdRng::seed_from_u64(5));
        let r = rs.rep(&angles, true, &Device::Cpu).unwrap();
        let rrt = r.matmul(&r.t().unwrap()).unwrap();
        let eye = Tensor::eye(rs.dim(), DType::F64, &Device::Cpu).unwrap();
        let err = (rrt - eye)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar::<f64>()
            .unwrap();
        assert!(err < 1e-10);
    }

    #[test]
    fn test_inversion_flips_odd_blocks() {
        let rs = Rs::from_triples(&[(1, 1, -1), (1, 0, 1)]).unwrap();
        let r = rs.rep(&Angles::identity(), true, &Device::Cpu).unwrap();
        let diag: Vec<f64> = (0..4)
            .map(|i| r.get(i).unwrap().get(i).unwrap().to_scalar::<f64>().unwrap())
            .collect();
        for (got, expected) in diag.iter().zip([-1.0, -1.0, -1.0, 1.0]) {
            assert!((got - expected).abs() < 1e-12, "{diag:?}");
        }
    }

    #[test]
    fn test_rep_rejects_huge_degree() {
        let rs = Rs::from_degrees(&[crate::o3::MAX_DEGREE + 1]);
        let err = rs.rep(&Angles::identity(), false, &Device::Cpu).unwrap_err();
        assert!(matches!(err, crate::error::TpError::Configuration(_)));
    }
}
