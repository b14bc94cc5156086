//! Shared helpers used across approximator implementations.

pub mod distance;
pub mod npy;
