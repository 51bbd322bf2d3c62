//! Representation descriptors and their test-time group action.

mod descriptor;
mod random;

pub use descriptor::{Rs, RsEntry};
pub use random::randn;
