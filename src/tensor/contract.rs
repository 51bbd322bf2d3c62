//! Batched contractions used by the tensor-product kernels.
//!
//! Each helper covers one einsum pattern and lowers it to broadcasts,
//! reshapes and a single matmul:
//! - "zui,zvj->zuvij" : [`outer_pairs`]
//! - "zui,zuj->zuij"  : [`outer_paired`]
//! - "...k,kn->...n"  : [`matmul_last`]
//! - "zpk,pw->zwk"    : [`mix_channels`]

use candle_core::{Result, Tensor};

/// Outer product of every channel pair: `[z,u,i] x [z,v,j] -> [z,u,v,i,j]`.
pub fn outer_pairs(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let (z, u, i) = a.dims3()?;
    let (_, v, j) = b.dims3()?;
    let a = a.reshape(&[z, u, 1, i, 1])?;
    let b = b.reshape(&[z, 1, v, 1, j])?;
    a.broadcast_mul(&b)
}

/// Outer product of matching channels: `[z,u,i] x [z,u,j] -> [z,u,i,j]`.
pub fn outer_paired(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let (z, u, i) = a.dims3()?;
    let (_, _, j) = b.dims3()?;
    let a = a.reshape((z, u, i, 1))?;
    let b = b.reshape((z, u, 1, j))?;
    a.broadcast_mul(&b)
}

/// Contract the last axis of `a` with the rows of the matrix `b`.
///
/// Leading axes are folded into one so the whole thing is a single 2D
/// matmul, then unfolded again.
pub fn matmul_last(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let mut dims = a.dims().to_vec();
    let k = dims.pop().unwrap_or(1);
    let rows: usize = dims.iter().product();
    let (_, n) = b.dims2()?;

    let out = a.reshape((rows, k))?.matmul(&b.contiguous()?)?;
    dims.push(n);
    out.reshape(dims)
}

/// Mix the channel axis with a weight matrix: `[z,p,k] x [p,w] -> [z,w,k]`.
pub fn mix_channels(t: &Tensor, w: &Tensor) -> Result<Tensor> {
    let (z, p, k) = t.dims3()?;
    let (_, n) = w.dims2()?;

    let t = t.transpose(1, 2)?.contiguous()?; // [z, k, p]
    let out = t.reshape((z * k, p))?.matmul(&w.contiguous()?)?;
    out.reshape((z, k, n))?.transpose(1, 2)?.contiguous()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn close(a: &Tensor, b: &Tensor) -> bool {
        let diff = (a - b)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar::<f64>()
            .unwrap();
        diff < 1e-12
    }

    #[test]
    fn test_outer_pairs_shape_and_values() {
        let dev = Device::Cpu;
        let a = Tensor::new(&[[[1f64, 2.0]]], &dev).unwrap(); // [1,1,2]
        let b = Tensor::new(&[[[3f64], [4.0]]], &dev).unwrap(); // [1,2,1]
        let out = outer_pairs(&a, &b).unwrap();
        assert_eq!(out.dims(), &[1, 1, 2, 2, 1]);
        let flat = out.flatten_all().unwrap().to_vec1::<f64>().unwrap();
        assert_eq!(flat, vec![3.0, 6.0, 4.0, 8.0]);
    }

    #[test]
    fn test_matmul_last_matches_matmul() {
        let dev = Device::Cpu;
        let a = Tensor::randn(0f64, 1., (2, 3, 4), &dev).unwrap();
        let b = Tensor::randn(0f64, 1., (4, 5), &dev).unwrap();
        let out = matmul_last(&a, &b).unwrap();
        assert_eq!(out.dims(), &[2, 3, 5]);
        let expected = a.broadcast_matmul(&b).unwrap();
        assert!(close(&out, &expected));
    }

    #[test]
    fn test_mix_channels() {
        let dev = Device::Cpu;
        let t = Tensor::ones((2, 3, 4), DType::F64, &dev).unwrap();
        let w = Tensor::ones((3, 5), DType::F64, &dev).unwrap();
        let out = mix_channels(&t, &w).unwrap();
        assert_eq!(out.dims(), &[2, 5, 4]);
        let expected = Tensor::full(3f64, (2, 5, 4), &dev).unwrap();
        assert!(close(&out, &expected));
    }
}
