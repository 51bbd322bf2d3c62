//! One contraction routine per connection mode.
//!
//! Routines take the irrep slices `x1 [z, m1, d1]`, `x2 [z, m2, d2]` and the
//! instruction's weight slice, and return `[z, m3, d3]`.

use candle_core::Tensor;

use super::instruction::ConnectionMode;
use super::kernel::BilinearKernel;
use crate::error::{Result, TpError};
use crate::tensor::contract::mix_channels;

/// Multiplicities of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathShape {
    pub m1: usize,
    pub m2: usize,
    pub m3: usize,
}

pub type ModeRoutine = fn(&dyn BilinearKernel, &Tensor, &Tensor, Option<&Tensor>, PathShape) -> Result<Tensor>;

impl ConnectionMode {
    /// The contraction routine for this mode, chosen once per instruction.
    pub fn routine(self, has_weight: bool) -> ModeRoutine {
        match (self, has_weight) {
            (ConnectionMode::Uvw, true) => uvw,
            (ConnectionMode::Uvw, false) => uvw_full,
            (ConnectionMode::Uvu, _) => uvu,
            (ConnectionMode::Uvv, _) => uvv,
            (ConnectionMode::Uuw, true) => uuw,
            (ConnectionMode::Uuw, false) => uuw_sum,
            (ConnectionMode::Uuu, _) => uuu,
        }
    }
}

fn required(w: Option<&Tensor>) -> Result<&Tensor> {
    w.ok_or_else(|| TpError::shape("a weight slice", "none"))
}

fn uvw(k: &dyn BilinearKernel, x1: &Tensor, x2: &Tensor, w: Option<&Tensor>, s: PathShape) -> Result<Tensor> {
    let t = k.pairs(x1, x2)?;
    let (z, _, _, d3) = t.dims4()?;
    let t = t.reshape((z, s.m1 * s.m2, d3))?;
    let w = required(w)?.reshape((s.m1 * s.m2, s.m3))?;
    Ok(mix_channels(&t, &w)?)
}

/// Unweighted uvw: every `(u, v)` pair becomes its own output channel.
fn uvw_full(k: &dyn BilinearKernel, x1: &Tensor, x2: &Tensor, _: Option<&Tensor>, s: PathShape) -> Result<Tensor> {
    let t = k.pairs(x1, x2)?;
    let (z, _, _, d3) = t.dims4()?;
    Ok(t.reshape((z, s.m1 * s.m2, d3))?)
}

fn uvu(k: &dyn BilinearKernel, x1: &Tensor, x2: &Tensor, w: Option<&Tensor>, s: PathShape) -> Result<Tensor> {
    let t = k.pairs(x1, x2)?;
    let t = match w {
        Some(w) => t.broadcast_mul(&w.reshape((1, s.m1, s.m2, 1))?)?,
        None => t,
    };
    Ok(t.sum(2)?)
}

fn uvv(k: &dyn BilinearKernel, x1: &Tensor, x2: &Tensor, w: Option<&Tensor>, s: PathShape) -> Result<Tensor> {
    let t = k.pairs(x1, x2)?;
    let t = match w {
        Some(w) => t.broadcast_mul(&w.reshape((1, s.m1, s.m2, 1))?)?,
        None => t,
    };
    Ok(t.sum(1)?)
}

fn uuw(k: &dyn BilinearKernel, x1: &Tensor, x2: &Tensor, w: Option<&Tensor>, s: PathShape) -> Result<Tensor> {
    let t = k.paired(x1, x2)?;
    let w = required(w)?.reshape((s.m1, s.m3))?;
    Ok(mix_channels(&t, &w)?)
}

/// Unweighted uuw: the channel sum is copied to every output channel.
fn uuw_sum(k: &dyn BilinearKernel, x1: &Tensor, x2: &Tensor, _: Option<&Tensor>, s: PathShape) -> Result<Tensor> {
    let t = k.paired(x1, x2)?.sum_keepdim(1)?;
    let (z, _, d3) = t.dims3()?;
    Ok(t.broadcast_as((z, s.m3, d3))?.contiguous()?)
}

fn uuu(k: &dyn BilinearKernel, x1: &Tensor, x2: &Tensor, w: Option<&Tensor>, s: PathShape) -> Result<Tensor> {
    let t = k.paired(x1, x2)?;
    match w {
        Some(w) => Ok(t.broadcast_mul(&w.reshape((1, s.m1, 1))?)?),
        None => Ok(t),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::o3::CouplingTensor;
    use crate::tensor_product::kernel::DenseKernel;
    use candle_core::{DType, Device};

    #[test]
    fn test_output_shapes() {
        let dev = Device::Cpu;
        let c = CouplingTensor::compute(1, 1, 2).unwrap();
        let k = DenseKernel::new(&c, DType::F64, &dev).unwrap();
        let x1 = Tensor::randn(0f64, 1., (4, 3, 3), &dev).unwrap();
        let x2 = Tensor::randn(0f64, 1., (4, 3, 3), &dev).unwrap();

        let cases = [
            (ConnectionMode::Uvw, true, 2, vec![3 * 3 * 2]),
            (ConnectionMode::Uvw, false, 9, vec![]),
            (ConnectionMode::Uvu, true, 3, vec![9]),
            (ConnectionMode::Uvv, false, 3, vec![]),
            (ConnectionMode::Uuw, true, 5, vec![15]),
            (ConnectionMode::Uuw, false, 5, vec![]),
            (ConnectionMode::Uuu, true, 3, vec![3]),
        ];
        for (mode, has_weight, m3, wlen) in cases {
            let w = wlen
                .first()
                .map(|&n| Tensor::randn(0f64, 1., n, &dev).unwrap());
            let s = PathShape { m1: 3, m2: 3, m3 };
            let out = mode.routine(has_weight)(&k, &x1, &x2, w.as_ref(), s).unwrap();
            assert_eq!(out.dims(), &[4, m3, 5], "{mode} weighted={has_weight}");
        }
    }

    #[test]
    fn test_missing_weight_is_shape_error() {
        let dev = Device::Cpu;
        let c = CouplingTensor::compute(0, 0, 0).unwrap();
        let k = DenseKernel::new(&c, DType::F64, &dev).unwrap();
        let x = Tensor::ones((2, 1, 1), DType::F64, &dev).unwrap();
        let s = PathShape { m1: 1, m2: 1, m3: 1 };
        let err = ConnectionMode::Uvw.routine(true)(&k, &x, &x, None, s).unwrap_err();
        assert!(matches!(err, TpError::Shape { .. }));
    }
}
