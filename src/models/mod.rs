//! Complete model families.

pub mod transcnn;
