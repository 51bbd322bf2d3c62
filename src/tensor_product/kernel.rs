//! Bilinear kernels: contract two irrep slices through a coupling tensor.
//!
//! A kernel is picked once per instruction at construction time. The dense
//! kernel handles every shape; the specialized ones exploit the structure
//! of the coupling (identity blocks, invariant dot product, sparsity) and
//! agree with the dense kernel up to rounding.

use std::fmt;

use candle_core::{DType, Device, Result, Tensor};

use crate::o3::CouplingTensor;
use crate::tensor::contract::{matmul_last, outer_paired, outer_pairs};

/// Contraction of `x1 [z, u, d1]` and `x2 [z, v, d2]` through a coupling.
pub trait BilinearKernel: fmt::Debug + Send + Sync {
    /// Every channel pair: `[z, u, v, d3]`.
    fn pairs(&self, x1: &Tensor, x2: &Tensor) -> Result<Tensor>;

    /// Matching channels only (`u == v`): `[z, u, d3]`.
    fn paired(&self, x1: &Tensor, x2: &Tensor) -> Result<Tensor>;

    fn name(&self) -> &'static str;
}

/// Pick the kernel for a coupling tensor.
pub fn select_kernel(
    coupling: &CouplingTensor,
    specialized: bool,
    dtype: DType,
    device: &Device,
) -> crate::Result<Box<dyn BilinearKernel>> {
    let (l1, l2, l3) = coupling.degrees();
    if !specialized {
        return Ok(Box::new(DenseKernel::new(coupling, dtype, device)?));
    }

    // Schur: these couplings are a multiple of the identity, read it off.
    let kernel: Box<dyn BilinearKernel> = if l1 == 0 {
        Box::new(ScalarLeftKernel { c: coupling.get(0, 0, 0) })
    } else if l2 == 0 {
        Box::new(ScalarRightKernel { c: coupling.get(0, 0, 0) })
    } else if l3 == 0 {
        Box::new(DotKernel { c: coupling.get(0, 0, 0) })
    } else {
        Box::new(SparseKernel::new(coupling, dtype, device)?)
    };
    Ok(kernel)
}

/// Generic path: full outer product, then one matmul with the dense
/// coupling matrix `[d1 * d2, d3]`.
pub struct DenseKernel {
    matrix: Tensor,
}

impl DenseKernel {
    pub fn new(coupling: &CouplingTensor, dtype: DType, device: &Device) -> crate::Result<Self> {
        let (d1, d2, d3) = coupling.shape();
        let matrix = coupling.to_tensor(dtype, device)?.reshape((d1 * d2, d3))?;
        Ok(Self { matrix })
    }
}

impl fmt::Debug for DenseKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DenseKernel")
            .field("shape", &self.matrix.dims())
            .finish()
    }
}

impl BilinearKernel for DenseKernel {
    fn pairs(&self, x1: &Tensor, x2: &Tensor) -> Result<Tensor> {
        let (z, u, d1) = x1.dims3()?;
        let (_, v, d2) = x2.dims3()?;
        let outer = outer_pairs(x1, x2)?.reshape((z, u, v, d1 * d2))?;
        matmul_last(&outer, &self.matrix)
    }

    fn paired(&self, x1: &Tensor, x2: &Tensor) -> Result<Tensor> {
        let (z, u, d1) = x1.dims3()?;
        let (_, _, d2) = x2.dims3()?;
        let outer = outer_paired(x1, x2)?.reshape((z, u, d1 * d2))?;
        matmul_last(&outer, &self.matrix)
    }

    fn name(&self) -> &'static str {
        "dense"
    }
}

/// Gathers only the components touched by non-zero couplings, multiplies
/// them pairwise and scatters into the output with one small matmul.
pub struct SparseKernel {
    left: Tensor,
    right: Tensor,
    scatter: Tensor,
    nnz: usize,
}

impl SparseKernel {
    pub fn new(coupling: &CouplingTensor, dtype: DType, device: &Device) -> crate::Result<Self> {
        let (_, _, d3) = coupling.shape();
        let nonzeros = coupling.nonzeros();
        let nnz = nonzeros.len();

        let left: Vec<u32> = nonzeros.iter().map(|&(i, _, _, _)| i as u32).collect();
        let right: Vec<u32> = nonzeros.iter().map(|&(_, j, _, _)| j as u32).collect();
        let mut scatter = vec![0f64; nnz * d3];
        for (n, &(_, _, k, c)) in nonzeros.iter().enumerate() {
            scatter[n * d3 + k] = c;
        }

        Ok(Self {
            left: Tensor::from_vec(left, nnz, device)?,
            right: Tensor::from_vec(right, nnz, device)?,
            scatter: Tensor::from_vec(scatter, (nnz, d3), device)?.to_dtype(dtype)?,
            nnz,
        })
    }
}

impl fmt::Debug for SparseKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparseKernel").field("nnz", &self.nnz).finish()
    }
}

impl BilinearKernel for SparseKernel {
    fn pairs(&self, x1: &Tensor, x2: &Tensor) -> Result<Tensor> {
        let (z, u, _) = x1.dims3()?;
        let (_, v, _) = x2.dims3()?;
        let a = x1.index_select(&self.left, 2)?.reshape(&[z, u, 1, self.nnz])?;
        let b = x2.index_select(&self.right, 2)?.reshape(&[z, 1, v, self.nnz])?;
        matmul_last(&a.broadcast_mul(&b)?, &self.scatter)
    }

    fn paired(&self, x1: &Tensor, x2: &Tensor) -> Result<Tensor> {
        let a = x1.index_select(&self.left, 2)?;
        let b = x2.index_select(&self.right, 2)?;
        matmul_last(&(a * b)?, &self.scatter)
    }

    fn name(&self) -> &'static str {
        "sparse"
    }
}

/// `l1 = 0`: scale every input-2 vector by the input-1 scalar.
#[derive(Debug)]
pub struct ScalarLeftKernel {
    c: f64,
}

impl BilinearKernel for ScalarLeftKernel {
    fn pairs(&self, x1: &Tensor, x2: &Tensor) -> Result<Tensor> {
        let (z, u, _) = x1.dims3()?;
        let (_, v, d) = x2.dims3()?;
        let a = x1.reshape((z, u, 1, 1))?;
        let b = x2.reshape((z, 1, v, d))?;
        a.broadcast_mul(&b)?.affine(self.c, 0.0)
    }

    fn paired(&self, x1: &Tensor, x2: &Tensor) -> Result<Tensor> {
        x1.broadcast_mul(x2)?.affine(self.c, 0.0)
    }

    fn name(&self) -> &'static str {
        "scalar-left"
    }
}

/// `l2 = 0`: scale every input-1 vector by the input-2 scalar.
#[derive(Debug)]
pub struct ScalarRightKernel {
    c: f64,
}

impl BilinearKernel for ScalarRightKernel {
    fn pairs(&self, x1: &Tensor, x2: &Tensor) -> Result<Tensor> {
        let (z, u, d) = x1.dims3()?;
        let (_, v, _) = x2.dims3()?;
        let a = x1.reshape((z, u, 1, d))?;
        let b = x2.reshape((z, 1, v, 1))?;
        a.broadcast_mul(&b)?.affine(self.c, 0.0)
    }

    fn paired(&self, x1: &Tensor, x2: &Tensor) -> Result<Tensor> {
        x1.broadcast_mul(x2)?.affine(self.c, 0.0)
    }

    fn name(&self) -> &'static str {
        "scalar-right"
    }
}

/// `l1 = l2`, `l3 = 0`: the invariant dot product.
#[derive(Debug)]
pub struct DotKernel {
    c: f64,
}

impl BilinearKernel for DotKernel {
    fn pairs(&self, x1: &Tensor, x2: &Tensor) -> Result<Tensor> {
        let (z, u, _) = x1.dims3()?;
        let (_, v, _) = x2.dims3()?;
        let gram = x1.contiguous()?.matmul(&x2.transpose(1, 2)?.contiguous()?)?;
        gram.reshape((z, u, v, 1))?.affine(self.c, 0.0)
    }

    fn paired(&self, x1: &Tensor, x2: &Tensor) -> Result<Tensor> {
        (x1 * x2)?.sum_keepdim(2)?.affine(self.c, 0.0)
    }

    fn name(&self) -> &'static str {
        "dot"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn max_diff(a: &Tensor, b: &Tensor) -> f64 {
        (a - b)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar::<f64>()
            .unwrap()
    }

    #[test]
    fn test_specialized_kernels_match_dense() {
        let dev = Device::Cpu;
        let triples = [(0, 0, 0), (0, 2, 2), (3, 0, 3), (2, 2, 0), (1, 1, 1), (1, 2, 3), (2, 2, 2)];
        for (l1, l2, l3) in triples {
            let c = CouplingTensor::compute(l1, l2, l3).unwrap();
            let dense = select_kernel(&c, false, DType::F64, &dev).unwrap();
            let fast = select_kernel(&c, true, DType::F64, &dev).unwrap();
            assert_eq!(dense.name(), "dense");

            let (d1, d2, _) = c.shape();
            let x1 = Tensor::randn(0f64, 1., (5, 3, d1), &dev).unwrap();
            let x2 = Tensor::randn(0f64, 1., (5, 2, d2), &dev).unwrap();
            let y1 = Tensor::randn(0f64, 1., (5, 3, d2), &dev).unwrap();

            let a = dense.pairs(&x1, &x2).unwrap();
            let b = fast.pairs(&x1, &x2).unwrap();
            assert_eq!(a.dims(), b.dims());
            assert!(max_diff(&a, &b) < 1e-12, "{} pairs on {:?}", fast.name(), (l1, l2, l3));

            let a = dense.paired(&x1, &y1).unwrap();
            let b = fast.paired(&x1, &y1).unwrap();
            assert_eq!(a.dims(), b.dims());
            assert!(max_diff(&a, &b) < 1e-12, "{} paired on {:?}", fast.name(), (l1, l2, l3));
        }
    }

    #[test]
    fn test_kernel_selection() {
        let dev = Device::Cpu;
        let pick = |l1, l2, l3| {
            let c = CouplingTensor::compute(l1, l2, l3).unwrap();
            select_kernel(&c, true, DType::F64, &dev).unwrap().name()
        };
        assert_eq!(pick(0, 1, 1), "scalar-left");
        assert_eq!(pick(1, 0, 1), "scalar-right");
        assert_eq!(pick(2, 2, 0), "dot");
        assert_eq!(pick(1, 1, 2), "sparse");
    }
}
