//! Shared helpers for the vfslog benchmarks.

pub mod utils;
