//! Low-level tensor contractions on candle tensors.

pub mod contract;
