//! Instruction planning and path normalization.
//!
//! Path weights are derived analytically. With unit-variance inputs,
//! unit-variance weights and component-normalized couplings, one output
//! component of an instruction is a sum of `paths` independent unit-variance
//! terms. Dividing every instruction feeding output slice `i3` by
//! `sqrt(Σ paths)` therefore gives that slice unit variance.

use tracing::debug;

use super::instruction::{ConnectionMode, Instruction, InstructionSpec};
use crate::config::Normalization;
use crate::error::{Result, TpError};
use crate::o3::triangle;
use crate::rs::{Rs, RsEntry};

/// Where the instruction list comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionSelector {
    /// Caller-supplied list, validated and used as is.
    Explicit(Vec<InstructionSpec>),
    /// Every allowed `(i1, i2, i3)` triple with the given mode.
    Auto(ConnectionMode),
    /// Tensor square: like `Auto` over `rs1 x rs1`, keeping `i1 <= i2`.
    AutoSquare(ConnectionMode),
}

impl Default for InstructionSelector {
    fn default() -> Self {
        InstructionSelector::Auto(ConnectionMode::Uvw)
    }
}

/// Selection rule: triangle inequality and parity product.
pub fn allowed(e1: &RsEntry, e2: &RsEntry, e3: &RsEntry) -> bool {
    triangle(e1.l, e2.l, e3.l) && e1.parity * e2.parity == e3.parity
}

/// Build the instruction list for `rs1 x rs2 -> rs_out`.
pub fn plan(
    rs1: &Rs,
    rs2: &Rs,
    rs_out: &Rs,
    selector: &InstructionSelector,
    normalization: Normalization,
    path_normalization: bool,
) -> Result<Vec<Instruction>> {
    for (name, rs) in [("input 1", rs1), ("input 2", rs2), ("output", rs_out)] {
        if rs.is_empty() {
            return Err(TpError::config(format!("{name} representation is empty")));
        }
    }

    let specs = match selector {
        InstructionSelector::Explicit(specs) => {
            for spec in specs {
                validate(spec, rs1, rs2, rs_out)?;
            }
            // Paths touching an empty entry contribute nothing.
            specs
                .iter()
                .filter(|s| rs1[s.i1].mul > 0 && rs2[s.i2].mul > 0 && rs_out[s.i3].mul > 0)
                .copied()
                .collect()
        }
        InstructionSelector::Auto(mode) => enumerate(rs1, rs2, rs_out, *mode, false),
        InstructionSelector::AutoSquare(mode) => {
            if rs1 != rs2 {
                return Err(TpError::config(format!(
                    "tensor square needs identical inputs, got {rs1} and {rs2}"
                )));
            }
            enumerate(rs1, rs2, rs_out, *mode, true)
        }
    };

    let instructions = assign_path_weights(&specs, rs1, rs2, rs_out, normalization, path_normalization);
    debug!(
        rs_in1 = %rs1,
        rs_in2 = %rs2,
        rs_out = %rs_out,
        count = instructions.len(),
        "planned tensor product"
    );
    Ok(instructions)
}

fn validate(spec: &InstructionSpec, rs1: &Rs, rs2: &Rs, rs_out: &Rs) -> Result<()> {
    let invalid = |why: String| TpError::config(format!("invalid instruction {spec}: {why}"));

    let e1 = rs1
        .entries()
        .get(spec.i1)
        .ok_or_else(|| invalid(format!("i1 out of range for {} entries", rs1.len())))?;
    let e2 = rs2
        .entries()
        .get(spec.i2)
        .ok_or_else(|| invalid(format!("i2 out of range for {} entries", rs2.len())))?;
    let e3 = rs_out
        .entries()
        .get(spec.i3)
        .ok_or_else(|| invalid(format!("i3 out of range for {} entries", rs_out.len())))?;

    if !triangle(e1.l, e2.l, e3.l) {
        return Err(invalid(format!(
            "degrees ({}, {}, {}) violate the triangle inequality",
            e1.l, e2.l, e3.l
        )));
    }
    if e1.parity * e2.parity != e3.parity {
        return Err(invalid(format!(
            "parity {} x {} cannot produce {}",
            e1.parity, e2.parity, e3.parity
        )));
    }
    spec.mode
        .check_multiplicities(e1.mul, e2.mul, e3.mul, spec.has_weight)
        .map_err(invalid)?;
    if !spec.path_weight.is_finite() {
        return Err(invalid("path weight must be finite".to_string()));
    }
    Ok(())
}

fn enumerate(rs1: &Rs, rs2: &Rs, rs_out: &Rs, mode: ConnectionMode, square: bool) -> Vec<InstructionSpec> {
    let mut specs = Vec::new();
    for (i1, e1) in rs1.iter().enumerate() {
        for (i2, e2) in rs2.iter().enumerate() {
            if square && i2 < i1 {
                continue;
            }
            for (i3, e3) in rs_out.iter().enumerate() {
                if e1.mul == 0 || e2.mul == 0 || e3.mul == 0 || !allowed(e1, e2, e3) {
                    continue;
                }
                if mode.check_multiplicities(e1.mul, e2.mul, e3.mul, true).is_err() {
                    continue;
                }
                specs.push(InstructionSpec::new(i1, i2, i3, mode));
            }
        }
    }
    specs
}

fn assign_path_weights(
    specs: &[InstructionSpec],
    rs1: &Rs,
    rs2: &Rs,
    rs_out: &Rs,
    normalization: Normalization,
    path_normalization: bool,
) -> Vec<Instruction> {
    let mut fan_in = vec![0usize; rs_out.len()];
    for s in specs {
        fan_in[s.i3] += s.mode.paths(rs1[s.i1].mul, rs2[s.i2].mul, s.has_weight);
    }

    specs
        .iter()
        .map(|s| {
            let (l1, l2, l3) = (rs1[s.i1].l, rs2[s.i2].l, rs_out[s.i3].l);
            let mut weight = s.path_weight * normalization.path_factor(l1, l2, l3);
            if path_normalization && fan_in[s.i3] > 0 {
                weight /= (fan_in[s.i3] as f64).sqrt();
            }
            Instruction {
                i1: s.i1,
                i2: s.i2,
                i3: s.i3,
                mode: s.mode,
                has_weight: s.has_weight,
                path_weight: weight,
            }
        })
        .collect()
}
