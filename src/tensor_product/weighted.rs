//! Tensor products that own their weights.
//!
//! Each wrapper keeps a [`TensorProduct`] plus a flat [`Var`] holding the
//! weights, so it can be handed to a `candle_nn` optimizer through `vars()`.

use candle_core::{DType, Device, Tensor, Var, D};
use tracing::debug;

use super::evaluator::TensorProduct;
use super::instruction::{ConnectionMode, Instruction, InstructionSpec};
use super::planner::{allowed, InstructionSelector};
use crate::config::TensorProductConfig;
use crate::error::{Result, TpError};
use crate::o3::CouplingCache;
use crate::rs::{Rs, RsEntry};

/// Standard-normal weight of length `numel`, or `None` when there is nothing to learn.
fn init_weight(numel: usize, dtype: DType, device: &Device) -> Result<Option<Var>> {
    if numel == 0 {
        return Ok(None);
    }
    let w = Tensor::randn(0f64, 1., numel, device)?.to_dtype(dtype)?;
    Ok(Some(Var::from_tensor(&w)?))
}

fn check_last_dim(x: &Tensor, rs: &Rs, name: &str) -> Result<()> {
    if x.dims().last() != Some(&rs.dim()) {
        return Err(TpError::shape(
            format!("{name} with last dimension {} ({rs})", rs.dim()),
            format!("{:?}", x.dims()),
        ));
    }
    Ok(())
}

/// Tensor product over an explicit instruction list.
#[derive(Debug)]
pub struct CustomWeightedTensorProduct {
    tp: TensorProduct,
    weight: Option<Var>,
}

impl CustomWeightedTensorProduct {
    pub fn new(
        rs_in1: &Rs,
        rs_in2: &Rs,
        rs_out: &Rs,
        instructions: Vec<InstructionSpec>,
        config: &TensorProductConfig,
        cache: &CouplingCache,
        device: &Device,
    ) -> Result<Self> {
        let selector = InstructionSelector::Explicit(instructions);
        Self::with_selector(rs_in1, rs_in2, rs_out, &selector, config, cache, device)
    }

    pub(crate) fn with_selector(
        rs_in1: &Rs,
        rs_in2: &Rs,
        rs_out: &Rs,
        selector: &InstructionSelector,
        config: &TensorProductConfig,
        cache: &CouplingCache,
        device: &Device,
    ) -> Result<Self> {
        let tp = TensorProduct::new(rs_in1, rs_in2, rs_out, selector, config, cache, device)?;
        let weight = if config.own_weight {
            init_weight(tp.weight_numel(), tp.dtype(), device)?
        } else {
            None
        };
        Ok(Self { tp, weight })
    }

    /// Evaluate; an external `weight` takes precedence over the owned one.
    pub fn forward(&self, x1: &Tensor, x2: &Tensor, weight: Option<&Tensor>) -> Result<Tensor> {
        let weight = weight.or_else(|| self.weight.as_ref().map(Var::as_tensor));
        self.tp.forward(x1, x2, weight)
    }

    pub fn weight(&self) -> Option<&Var> {
        self.weight.as_ref()
    }

    /// Trainable variables, for an optimizer.
    pub fn vars(&self) -> Vec<Var> {
        self.weight.iter().cloned().collect()
    }

    pub fn weight_numel(&self) -> usize {
        self.tp.weight_numel()
    }

    pub fn instructions(&self) -> Vec<Instruction> {
        self.tp.instructions()
    }

    pub fn tensor_product(&self) -> &TensorProduct {
        &self.tp
    }

    pub fn rs_in1(&self) -> &Rs {
        self.tp.rs_in1()
    }

    pub fn rs_in2(&self) -> &Rs {
        self.tp.rs_in2()
    }

    pub fn rs_out(&self) -> &Rs {
        self.tp.rs_out()
    }
}

/// Fully connected learnable tensor product: every allowed triple, `uvw`.
#[derive(Debug)]
pub struct LearnableTensorProduct {
    inner: CustomWeightedTensorProduct,
}

impl LearnableTensorProduct {
    pub fn new(
        rs_in1: &Rs,
        rs_in2: &Rs,
        rs_out: &Rs,
        config: &TensorProductConfig,
        cache: &CouplingCache,
        device: &Device,
    ) -> Result<Self> {
        let config = config.clone().with_path_normalization(true);
        let selector = InstructionSelector::Auto(ConnectionMode::Uvw);
        let inner = CustomWeightedTensorProduct::with_selector(rs_in1, rs_in2, rs_out, &selector, &config, cache, device)?;
        Ok(Self { inner })
    }

    pub fn forward(&self, x1: &Tensor, x2: &Tensor) -> Result<Tensor> {
        self.inner.forward(x1, x2, None)
    }

    pub fn weight(&self) -> Option<&Var> {
        self.inner.weight()
    }

    pub fn vars(&self) -> Vec<Var> {
        self.inner.vars()
    }

    pub fn instructions(&self) -> Vec<Instruction> {
        self.inner.instructions()
    }

    pub fn rs_in1(&self) -> &Rs {
        self.inner.rs_in1()
    }

    pub fn rs_in2(&self) -> &Rs {
        self.inner.rs_in2()
    }

    pub fn rs_out(&self) -> &Rs {
        self.inner.rs_out()
    }
}

/// Learnable tensor square `x ⊗ x`, each unordered pair of entries once.
///
/// With `linear` a constant scalar channel is prepended to the input, so the
/// output also contains terms linear in `x`.
#[derive(Debug)]
pub struct LearnableTensorSquare {
    rs_in: Rs,
    linear: bool,
    inner: CustomWeightedTensorProduct,
}

impl LearnableTensorSquare {
    pub fn new(
        rs_in: &Rs,
        rs_out: &Rs,
        linear: bool,
        config: &TensorProductConfig,
        cache: &CouplingCache,
        device: &Device,
    ) -> Result<Self> {
        let rs_in = rs_in.simplify();
        let rs_out = rs_out.simplify();

        let rs_square = if linear {
            let parity = if rs_in.iter().all(|e| e.parity != 0) { 1 } else { 0 };
            let mut entries = vec![RsEntry::new(1, 0, parity)?];
            entries.extend(rs_in.iter().copied());
            Rs::new(entries)
        } else {
            rs_in.clone()
        };

        let config = config.clone().with_path_normalization(true);
        let selector = InstructionSelector::AutoSquare(ConnectionMode::Uvw);
        let inner =
            CustomWeightedTensorProduct::with_selector(&rs_square, &rs_square, &rs_out, &selector, &config, cache, device)?;
        Ok(Self { rs_in, linear, inner })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        check_last_dim(x, &self.rs_in, "input")?;
        let x = if self.linear {
            let mut shape = x.dims().to_vec();
            if let Some(last) = shape.last_mut() {
                *last = 1;
            }
            let ones = Tensor::ones(shape, x.dtype(), x.device())?;
            Tensor::cat(&[&ones, x], D::Minus1)?
        } else {
            x.clone()
        };
        self.inner.forward(&x, &x, None)
    }

    pub fn weight(&self) -> Option<&Var> {
        self.inner.weight()
    }

    pub fn vars(&self) -> Vec<Var> {
        self.inner.vars()
    }

    pub fn instructions(&self) -> Vec<Instruction> {
        self.inner.instructions()
    }

    /// The simplified input descriptor, without the constant channel.
    pub fn rs_in(&self) -> &Rs {
        &self.rs_in
    }

    pub fn rs_out(&self) -> &Rs {
        self.inner.rs_out()
    }
}

/// Tensor product whose input-1 and output channels are split into groups
/// that are only connected group to group.
///
/// Input 2 is shared by every group.
#[derive(Debug)]
pub struct GroupedWeightedTensorProduct {
    rs_in1: Rs,
    rs_out: Rs,
    groups: usize,
    in_perm: Tensor,
    out_perm: Tensor,
    inner: CustomWeightedTensorProduct,
}

impl GroupedWeightedTensorProduct {
    /// `groups = None` uses as many groups as the multiplicities allow.
    pub fn new(
        rs_in1: &Rs,
        rs_in2: &Rs,
        rs_out: &Rs,
        groups: Option<usize>,
        config: &TensorProductConfig,
        cache: &CouplingCache,
        device: &Device,
    ) -> Result<Self> {
        if groups == Some(0) {
            return Err(TpError::config("number of groups must be positive"));
        }
        let rs_in1 = rs_in1.simplify();
        let rs_in2 = rs_in2.simplify();
        let rs_out = rs_out.simplify();
        for (name, rs) in [("input 1", &rs_in1), ("input 2", &rs_in2), ("output", &rs_out)] {
            if rs.is_empty() {
                return Err(TpError::config(format!("{name} representation is empty")));
            }
        }

        let min_mul = |rs: &Rs| rs.iter().map(|e| e.mul).min().unwrap_or(0);
        let groups = groups
            .unwrap_or(usize::MAX)
            .min(min_mul(&rs_in1))
            .min(min_mul(&rs_out));

        let (grouped1, perm1) = split_groups(&rs_in1, groups);
        let (grouped_out, perm_out) = split_groups(&rs_out, groups);

        let (n1, n_out) = (rs_in1.len(), rs_out.len());
        let mut specs = Vec::new();
        for (i1, e1) in grouped1.iter().enumerate() {
            for (i2, e2) in rs_in2.iter().enumerate() {
                for (i3, e3) in grouped_out.iter().enumerate() {
                    if i1 / n1 == i3 / n_out && allowed(e1, e2, e3) {
                        specs.push(InstructionSpec::new(i1, i2, i3, ConnectionMode::Uvw));
                    }
                }
            }
        }
        debug!(groups, instructions = specs.len(), "grouped tensor product");

        let inner = CustomWeightedTensorProduct::new(&grouped1, &rs_in2, &grouped_out, specs, config, cache, device)?;

        let mut inverse = vec![0u32; perm_out.len()];
        for (k, &p) in perm_out.iter().enumerate() {
            inverse[p as usize] = k as u32;
        }
        let n = perm1.len();
        Ok(Self {
            rs_in1,
            rs_out,
            groups,
            in_perm: Tensor::from_vec(perm1, n, device)?,
            out_perm: Tensor::from_vec(inverse, perm_out.len(), device)?,
            inner,
        })
    }

    pub fn forward(&self, x1: &Tensor, x2: &Tensor, weight: Option<&Tensor>) -> Result<Tensor> {
        check_last_dim(x1, &self.rs_in1, "input 1")?;
        let x1 = x1.index_select(&self.in_perm, D::Minus1)?;
        let y = self.inner.forward(&x1, x2, weight)?;
        Ok(y.index_select(&self.out_perm, D::Minus1)?)
    }

    pub fn groups(&self) -> usize {
        self.groups
    }

    pub fn weight(&self) -> Option<&Var> {
        self.inner.weight()
    }

    pub fn vars(&self) -> Vec<Var> {
        self.inner.vars()
    }

    pub fn instructions(&self) -> Vec<Instruction> {
        self.inner.instructions()
    }

    pub fn rs_in1(&self) -> &Rs {
        &self.rs_in1
    }

    pub fn rs_in2(&self) -> &Rs {
        self.inner.rs_in2()
    }

    pub fn rs_out(&self) -> &Rs {
        &self.rs_out
    }
}

/// Split every multiplicity into `groups` balanced parts.
///
/// Returns the grouped descriptor (group-major) and, for every component of
/// the grouped layout, the index of the component it comes from.
fn split_groups(rs: &Rs, groups: usize) -> (Rs, Vec<u32>) {
    let offsets = rs.offsets();
    let mut entries = Vec::with_capacity(groups * rs.len());
    let mut perm = Vec::with_capacity(rs.dim());

    for g in 0..groups {
        for (e, &offset) in rs.iter().zip(&offsets) {
            let (base, extra) = (e.mul / groups, e.mul % groups);
            let count = base + usize::from(g < extra);
            let start = g * base + g.min(extra);
            let d = e.irrep_dim();
            for u in start..start + count {
                perm.extend((0..d).map(|m| (offset + u * d + m) as u32));
            }
            entries.push(RsEntry { mul: count, ..*e });
        }
    }
    (Rs::new(entries), perm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_groups_balanced() {
        let rs = Rs::from_pairs(&[(5, 0), (3, 1)]);
        let (grouped, perm) = split_groups(&rs, 2);
        let muls: Vec<usize> = grouped.iter().map(|e| e.mul).collect();
        assert_eq!(muls, vec![3, 2, 2, 1]);
        assert_eq!(grouped.dim(), rs.dim());

        let mut sorted = perm.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..rs.dim() as u32).collect::<Vec<_>>());

        // Group 0 holds scalars 0..3 then vectors 0..2.
        assert_eq!(&perm[..3], &[0, 1, 2]);
        assert_eq!(&perm[3..9], &[5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_group_count_is_clamped() {
        let cache = CouplingCache::new();
        let config = TensorProductConfig::default();
        let rs_in1 = Rs::from_pairs(&[(4, 0), (3, 1)]);
        let rs_in2 = Rs::from_pairs(&[(1, 1)]);
        let rs_out = Rs::from_pairs(&[(6, 1)]);
        let tp = GroupedWeightedTensorProduct::new(&rs_in1, &rs_in2, &rs_out, Some(10), &config, &cache, &Device::Cpu)
            .unwrap();
        assert_eq!(tp.groups(), 3);

        let err = GroupedWeightedTensorProduct::new(&rs_in1, &rs_in2, &rs_out, Some(0), &config, &cache, &Device::Cpu);
        assert!(matches!(err, Err(TpError::Configuration(_))));
    }

    #[test]
    fn test_square_linear_channel() {
        let cache = CouplingCache::new();
        let rs_in = Rs::from_triples(&[(2, 1, -1)]).unwrap();
        let rs_out = Rs::from_triples(&[(3, 0, 1), (2, 1, -1)]).unwrap();
        let config = TensorProductConfig::default();

        let sq = LearnableTensorSquare::new(&rs_in, &rs_out, true, &config, &cache, &Device::Cpu).unwrap();
        // 0e x 0e -> 0e, 0e x 1o -> 1o, 1o x 1o -> 0e
        assert_eq!(sq.instructions().len(), 3);

        let x = Tensor::randn(0f64, 1., (4, 6), &Device::Cpu).unwrap();
        assert_eq!(sq.forward(&x).unwrap().dims(), &[4, 9]);

        let quadratic = LearnableTensorSquare::new(&rs_in, &rs_out, false, &config, &cache, &Device::Cpu).unwrap();
        assert_eq!(quadratic.instructions().len(), 1);
    }

    #[test]
    fn test_external_weight_required_without_own_weight() {
        let cache = CouplingCache::new();
        let rs = Rs::from_pairs(&[(2, 1)]);
        let config = TensorProductConfig::default().with_own_weight(false);
        let tp = CustomWeightedTensorProduct::new(
            &rs,
            &rs,
            &Rs::from_pairs(&[(1, 0)]),
            vec![InstructionSpec::new(0, 0, 0, ConnectionMode::Uvw)],
            &config,
            &cache,
            &Device::Cpu,
        )
        .unwrap();
        assert!(tp.weight().is_none());
        assert!(tp.vars().is_empty());

        let x = Tensor::randn(0f64, 1., (3, 6), &Device::Cpu).unwrap();
        assert!(matches!(tp.forward(&x, &x, None), Err(TpError::Shape { .. })));
        let w = Tensor::ones(4, DType::F64, &Device::Cpu).unwrap();
        assert_eq!(tp.forward(&x, &x, Some(&w)).unwrap().dims(), &[3, 1]);
    }
}
