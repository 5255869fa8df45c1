//! Request middleware.

pub mod context;

pub use context::tenant_context;
