//! The tensor product itself: planned instructions compiled into kernels.

use std::fmt;

use candle_core::{DType, Device, Tensor};
use tracing::debug;

use super::instruction::Instruction;
use super::kernel::{select_kernel, BilinearKernel};
use super::modes::{ModeRoutine, PathShape};
use super::planner::{plan, InstructionSelector};
use crate::config::TensorProductConfig;
use crate::error::{Result, TpError};
use crate::o3::CouplingCache;
use crate::rs::Rs;

/// Component range of one irrep entry.
#[derive(Debug, Clone, Copy)]
struct Slice {
    offset: usize,
    mul: usize,
    dim: usize,
}

/// A compiled instruction.
struct Path {
    instruction: Instruction,
    kernel: Box<dyn BilinearKernel>,
    routine: ModeRoutine,
    shape: PathShape,
    in1: Slice,
    in2: Slice,
    /// `(offset, len)` in the flat weight.
    weight: Option<(usize, usize)>,
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Path")
            .field("instruction", &self.instruction)
            .field("kernel", &self.kernel.name())
            .field("shape", &self.shape)
            .finish()
    }
}

/// Equivariant bilinear map `rs_in1 x rs_in2 -> rs_out`.
///
/// Holds no parameters; weights are passed to [`TensorProduct::forward`] as
/// one flat tensor of length [`TensorProduct::weight_numel`].
#[derive(Debug)]
pub struct TensorProduct {
    rs_in1: Rs,
    rs_in2: Rs,
    rs_out: Rs,
    paths: Vec<Path>,
    weight_numel: usize,
    dtype: DType,
    device: Device,
}

impl TensorProduct {
    /// Plan the instructions and compile one kernel per instruction.
    pub fn new(
        rs_in1: &Rs,
        rs_in2: &Rs,
        rs_out: &Rs,
        selector: &InstructionSelector,
        config: &TensorProductConfig,
        cache: &CouplingCache,
        device: &Device,
    ) -> Result<Self> {
        let instructions = plan(
            rs_in1,
            rs_in2,
            rs_out,
            selector,
            config.normalization,
            config.path_normalization,
        )?;

        let dtype = config.dtype();
        let offsets1 = rs_in1.offsets();
        let offsets2 = rs_in2.offsets();
        let mut paths = Vec::with_capacity(instructions.len());
        let mut weight_numel = 0;

        for instruction in instructions {
            let (e1, e2, e3) = (rs_in1[instruction.i1], rs_in2[instruction.i2], rs_out[instruction.i3]);
            let coupling = cache.coupling(e1.l, e2.l, e3.l)?;
            let kernel = select_kernel(&coupling, config.specialized_code, dtype, device)?;
            debug!(%instruction, kernel = kernel.name(), "compiled path");

            let weight = if instruction.has_weight {
                let len: usize = instruction.mode.weight_shape(e1.mul, e2.mul, e3.mul).iter().product();
                let range = (weight_numel, len);
                weight_numel += len;
                Some(range)
            } else {
                None
            };

            paths.push(Path {
                routine: instruction.mode.routine(instruction.has_weight),
                shape: PathShape {
                    m1: e1.mul,
                    m2: e2.mul,
                    m3: e3.mul,
                },
                in1: Slice {
                    offset: offsets1[instruction.i1],
                    mul: e1.mul,
                    dim: e1.irrep_dim(),
                },
                in2: Slice {
                    offset: offsets2[instruction.i2],
                    mul: e2.mul,
                    dim: e2.irrep_dim(),
                },
                instruction,
                kernel,
                weight,
            });
        }

        Ok(Self {
            rs_in1: rs_in1.clone(),
            rs_in2: rs_in2.clone(),
            rs_out: rs_out.clone(),
            paths,
            weight_numel,
            dtype,
            device: device.clone(),
        })
    }

    pub fn rs_in1(&self) -> &Rs {
        &self.rs_in1
    }

    pub fn rs_in2(&self) -> &Rs {
        &self.rs_in2
    }

    pub fn rs_out(&self) -> &Rs {
        &self.rs_out
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Length of the flat weight expected by [`TensorProduct::forward`].
    pub fn weight_numel(&self) -> usize {
        self.weight_numel
    }

    pub fn instructions(&self) -> Vec<Instruction> {
        self.paths.iter().map(|p| p.instruction).collect()
    }

    /// Name of the kernel chosen for every instruction, in order.
    pub fn kernel_names(&self) -> Vec<&'static str> {
        self.paths.iter().map(|p| p.kernel.name()).collect()
    }

    /// Evaluate on `x1 [..., dim(rs_in1)]` and `x2 [..., dim(rs_in2)]`.
    ///
    /// Leading dimensions must agree and are kept in the output
    /// `[..., dim(rs_out)]`.
    pub fn forward(&self, x1: &Tensor, x2: &Tensor, weight: Option<&Tensor>) -> Result<Tensor> {
        let lead = self.check_inputs(x1, x2)?;
        let batch: usize = lead.iter().product();
        let weight = self.check_weight(weight)?;

        let x1 = x1.reshape((batch, self.rs_in1.dim()))?;
        let x2 = x2.reshape((batch, self.rs_in2.dim()))?;

        let mut acc: Vec<Option<Tensor>> = vec![None; self.rs_out.len()];
        for path in &self.paths {
            let a = x1
                .narrow(1, path.in1.offset, path.in1.mul * path.in1.dim)?
                .reshape((batch, path.in1.mul, path.in1.dim))?;
            let b = x2
                .narrow(1, path.in2.offset, path.in2.mul * path.in2.dim)?
                .reshape((batch, path.in2.mul, path.in2.dim))?;
            let w = match (path.weight, weight) {
                (Some((offset, len)), Some(w)) => Some(w.narrow(0, offset, len)?),
                _ => None,
            };

            let y = (path.routine)(path.kernel.as_ref(), &a, &b, w.as_ref(), path.shape)?
                .affine(path.instruction.path_weight, 0.0)?;

            let slot = &mut acc[path.instruction.i3];
            *slot = Some(match slot.take() {
                Some(prev) => prev.add(&y)?,
                None => y,
            });
        }

        let mut parts = Vec::with_capacity(acc.len());
        for (slot, entry) in acc.into_iter().zip(self.rs_out.iter()) {
            if entry.dim() == 0 {
                continue;
            }
            parts.push(match slot {
                Some(t) => t.reshape((batch, entry.dim()))?,
                None => Tensor::zeros((batch, entry.dim()), self.dtype, &self.device)?,
            });
        }
        let out = if parts.is_empty() {
            Tensor::zeros((batch, 0), self.dtype, &self.device)?
        } else {
            Tensor::cat(&parts, 1)?
        };

        let mut out_shape = lead;
        out_shape.push(self.rs_out.dim());
        Ok(out.reshape(out_shape)?)
    }

    fn check_inputs(&self, x1: &Tensor, x2: &Tensor) -> Result<Vec<usize>> {
        let (dims1, dims2) = (x1.dims(), x2.dims());
        let (Some((&n1, lead1)), Some((&n2, lead2))) = (dims1.split_last(), dims2.split_last()) else {
            return Err(TpError::shape("inputs with at least one dimension", "scalars"));
        };
        if n1 != self.rs_in1.dim() {
            return Err(TpError::shape(
                format!("input 1 with last dimension {} ({})", self.rs_in1.dim(), self.rs_in1),
                format!("{dims1:?}"),
            ));
        }
        if n2 != self.rs_in2.dim() {
            return Err(TpError::shape(
                format!("input 2 with last dimension {} ({})", self.rs_in2.dim(), self.rs_in2),
                format!("{dims2:?}"),
            ));
        }
        for (name, x) in [("input 1", x1), ("input 2", x2)] {
            if x.dtype() != self.dtype {
                return Err(TpError::shape(
                    format!("{name} of dtype {:?}", self.dtype),
                    format!("{:?}", x.dtype()),
                ));
            }
        }
        if lead1 != lead2 {
            return Err(TpError::shape(
                format!("matching leading dimensions {lead1:?}"),
                format!("{lead2:?}"),
            ));
        }
        Ok(lead1.to_vec())
    }

    fn check_weight<'w>(&self, weight: Option<&'w Tensor>) -> Result<Option<&'w Tensor>> {
        let expected = format!("weight of length {}", self.weight_numel);
        let w = match weight {
            Some(w) => w,
            None if self.weight_numel == 0 => return Ok(None),
            None => return Err(TpError::shape(expected, "none")),
        };
        if w.dims() != [self.weight_numel] {
            return Err(TpError::shape(expected, format!("shape {:?}", w.dims())));
        }
        if w.dtype() != self.dtype {
            return Err(TpError::shape(
                format!("{expected} of dtype {:?}", self.dtype),
                format!("{:?}", w.dtype()),
            ));
        }
        Ok((self.weight_numel > 0).then_some(w))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor_product::instruction::{ConnectionMode, InstructionSpec};

    fn setup(config: &TensorProductConfig) -> TensorProduct {
        let rs1 = Rs::from_pairs(&[(2, 0), (1, 1)]);
        let rs2 = Rs::from_pairs(&[(1, 1)]);
        let rs_out = Rs::from_pairs(&[(1, 1), (2, 2)]);
        TensorProduct::new(
            &rs1,
            &rs2,
            &rs_out,
            &InstructionSelector::Explicit(vec![
                InstructionSpec::new(0, 0, 0, ConnectionMode::Uvw),
                InstructionSpec::new(1, 0, 0, ConnectionMode::Uvw),
            ]),
            config,
            &CouplingCache::new(),
            &Device::Cpu,
        )
        .unwrap()
    }

    #[test]
    fn test_weight_numel_and_unfed_slice() {
        let tp = setup(&TensorProductConfig::default());
        assert_eq!(tp.weight_numel(), 2 + 1);
        assert_eq!(tp.kernel_names(), vec!["scalar-left", "sparse"]);

        let x1 = Tensor::randn(0f64, 1., (3, 5), &Device::Cpu).unwrap();
        let x2 = Tensor::randn(0f64, 1., (3, 3), &Device::Cpu).unwrap();
        let w = Tensor::ones(3, DType::F64, &Device::Cpu).unwrap();
        let y = tp.forward(&x1, &x2, Some(&w)).unwrap();
        assert_eq!(y.dims(), &[3, 13]);

        // Nothing feeds the l = 2 slice.
        let tail = y.narrow(1, 3, 10).unwrap().abs().unwrap().sum_all().unwrap();
        assert_eq!(tail.to_scalar::<f64>().unwrap(), 0.0);
    }

    #[test]
    fn test_leading_dimensions_are_kept() {
        let tp = setup(&TensorProductConfig::default());
        let x1 = Tensor::randn(0f64, 1., (2, 4, 5), &Device::Cpu).unwrap();
        let x2 = Tensor::randn(0f64, 1., (2, 4, 3), &Device::Cpu).unwrap();
        let w = Tensor::randn(0f64, 1., 3, &Device::Cpu).unwrap();
        let y = tp.forward(&x1, &x2, Some(&w)).unwrap();
        assert_eq!(y.dims(), &[2, 4, 13]);
    }

    #[test]
    fn test_shape_errors() {
        let tp = setup(&TensorProductConfig::default());
        let dev = Device::Cpu;
        let x1 = Tensor::zeros((3, 5), DType::F64, &dev).unwrap();
        let x2 = Tensor::zeros((3, 3), DType::F64, &dev).unwrap();
        let w = Tensor::zeros(3, DType::F64, &dev).unwrap();

        let wrong_dim = Tensor::zeros((3, 4), DType::F64, &dev).unwrap();
        assert!(matches!(tp.forward(&wrong_dim, &x2, Some(&w)), Err(TpError::Shape { .. })));

        let wrong_batch = Tensor::zeros((2, 3), DType::F64, &dev).unwrap();
        assert!(matches!(tp.forward(&x1, &wrong_batch, Some(&w)), Err(TpError::Shape { .. })));

        let short = Tensor::zeros(2, DType::F64, &dev).unwrap();
        match tp.forward(&x1, &x2, Some(&short)) {
            Err(TpError::Shape { expected, got }) => {
                assert!(expected.contains('3'), "{expected}");
                assert!(got.contains('2'), "{got}");
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(matches!(tp.forward(&x1, &x2, None), Err(TpError::Shape { .. })));
    }

    #[test]
    fn test_empty_entries_do_not_need_weights() {
        let rs = Rs::from_pairs(&[(0, 1), (2, 1)]);
        let rs_out = Rs::from_pairs(&[(1, 0)]);
        let tp = TensorProduct::new(
            &rs,
            &rs,
            &rs_out,
            &InstructionSelector::Explicit(vec![InstructionSpec::new(0, 0, 0, ConnectionMode::Uvw)]),
            &TensorProductConfig::default(),
            &CouplingCache::new(),
            &Device::Cpu,
        )
        .unwrap();
        assert_eq!(tp.weight_numel(), 0);
        assert!(tp.instructions().is_empty());

        let x = Tensor::randn(0f64, 1., (2, 6), &Device::Cpu).unwrap();
        let y = tp.forward(&x, &x, None).unwrap();
        assert_eq!(y.dims(), &[2, 1]);
        assert_eq!(y.abs().unwrap().sum_all().unwrap().to_scalar::<f64>().unwrap(), 0.0);
    }

    #[test]
    fn test_stray_weight_is_rejected() {
        let rs = Rs::from_pairs(&[(1, 1)]);
        let tp = TensorProduct::new(
            &rs,
            &rs,
            &Rs::from_pairs(&[(1, 0)]),
            &InstructionSelector::Explicit(vec![InstructionSpec::new(0, 0, 0, ConnectionMode::Uvw).without_weight()]),
            &TensorProductConfig::default(),
            &CouplingCache::new(),
            &Device::Cpu,
        )
        .unwrap();
        assert_eq!(tp.weight_numel(), 0);

        let x = Tensor::randn(0f64, 1., (2, 3), &Device::Cpu).unwrap();
        let stray = Tensor::ones(7, DType::F64, &Device::Cpu).unwrap();
        match tp.forward(&x, &x, Some(&stray)) {
            Err(TpError::Shape { expected, got }) => {
                assert!(expected.contains("length 0"), "{expected}");
                assert!(got.contains('7'), "{got}");
            }
            other => panic!("unexpected {other:?}"),
        }

        let empty = Tensor::zeros(0, DType::F64, &Device::Cpu).unwrap();
        assert_eq!(tp.forward(&x, &x, Some(&empty)).unwrap().dims(), &[2, 1]);
        assert_eq!(tp.forward(&x, &x, None).unwrap().dims(), &[2, 1]);
    }

    #[test]
    fn test_dtype_mismatch_is_shape_error() {
        let tp = setup(&TensorProductConfig::default());
        let dev = Device::Cpu;
        let x1 = Tensor::zeros((3, 5), DType::F32, &dev).unwrap();
        let x2 = Tensor::zeros((3, 3), DType::F64, &dev).unwrap();
        let w = Tensor::zeros(3, DType::F64, &dev).unwrap();
        match tp.forward(&x1, &x2, Some(&w)) {
            Err(TpError::Shape { expected, got }) => {
                assert!(expected.contains("F64"), "{expected}");
                assert!(got.contains("F32"), "{got}");
            }
            other => panic!("unexpected {other:?}"),
        }

        let x1 = Tensor::zeros((3, 5), DType::F64, &dev).unwrap();
        let w32 = Tensor::zeros(3, DType::F32, &dev).unwrap();
        assert!(matches!(tp.forward(&x1, &x2, Some(&w32)), Err(TpError::Shape { .. })));
    }
}
