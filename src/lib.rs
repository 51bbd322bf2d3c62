//! Clebsch: O(3)-equivariant tensor products on candle tensors.
//!
//! Features are described by an [`Rs`] descriptor, a list of
//! `(multiplicity, degree, parity)` entries. A tensor product couples two
//! such features into a third through real Clebsch-Gordan coefficients,
//! following a list of instructions that say which irreps meet and how
//! their channels are wired.
//!
//! ```no_run
//! use candle_core::Device;
//! use clebsch::{CouplingCache, LearnableTensorProduct, Rs, TensorProductConfig};
//!
//! let cache = CouplingCache::new();
//! let rs_in: Rs = "4x0e + 2x1o".parse()?;
//! let rs_out: Rs = "2x0e + 2x1o + 1x2e".parse()?;
//! let tp = LearnableTensorProduct::new(&rs_in, &rs_in, &rs_out, &TensorProductConfig::default(), &cache, &Device::Cpu)?;
//! let x = clebsch::rs::randn(8, &rs_in, Default::default(), candle_core::DType::F64, &Device::Cpu)?;
//! let y = tp.forward(&x, &x)?;
//! assert_eq!(y.dims(), &[8, rs_out.dim()]);
//! # Ok::<(), clebsch::TpError>(())
//! ```

pub mod config;
pub mod error;
pub mod o3;
pub mod rs;
pub mod tensor;
pub mod tensor_product;

pub use config::{Normalization, Precision, TensorProductConfig};
pub use error::{Result, TpError};
pub use o3::{Angles, CouplingCache, CouplingTensor};
pub use rs::{Rs, RsEntry};
pub use tensor_product::{
    ConnectionMode, CustomWeightedTensorProduct, GroupedWeightedTensorProduct, InstructionSelector, InstructionSpec,
    LearnableTensorProduct, LearnableTensorSquare, TensorProduct,
};
