//! Equivariant tensor products.
//!
//! [`TensorProduct`] is the parameter-free evaluator; the wrappers in
//! [`weighted`] own their weights.

pub mod evaluator;
pub mod instruction;
pub mod kernel;
pub mod modes;
pub mod planner;
pub mod weighted;

pub use evaluator::TensorProduct;
pub use instruction::{ConnectionMode, Instruction, InstructionSpec};
pub use kernel::BilinearKernel;
pub use planner::{plan, InstructionSelector};
pub use weighted::{
    CustomWeightedTensorProduct, GroupedWeightedTensorProduct, LearnableTensorProduct, LearnableTensorSquare,
};
