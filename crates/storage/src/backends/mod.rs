//! Document store backends.

pub mod filesystem;
pub mod memory;
