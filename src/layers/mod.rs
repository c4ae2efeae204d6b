//! Reusable neural-network modules.

pub mod activation;
pub mod drop;
pub mod norm;
