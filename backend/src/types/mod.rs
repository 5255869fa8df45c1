//! Shared primitive types.

mod id;

pub use id::*;
