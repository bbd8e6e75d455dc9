//! Small utilities shared across the optimizer and the execution backend.

pub mod bitset;
pub mod like;

pub use bitset::{GospersHack, SmallBitset, SubsetEnumerator};
pub use like::like;
