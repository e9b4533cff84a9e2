//! Utility functions and helpers.

pub mod hash;

pub use hash::{blake3_hash, hash_lines};
