#![warn(missing_docs)]
//!# rs-transcnn - TransCNN for Burn
//!
//! A [Burn](https://burn.dev) implementation of the TransCNN
//! image-classification backbone: a four-stage pyramid interleaving hybrid
//! grid / pooled-global self-attention with inverted-residual convolution.
//!
//! ## Notable Components
//!
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::activation`] - activation layer abstraction wrapper.
//!   * [`layers::norm`] - 2d normalization abstraction wrapper.
//!   * [`layers::drop`] - drop path / stochastic depth and channel dropout.
//! * [`models`] - complete model families.
//!   * [`models::transcnn`] - The TransCNN model.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

#[cfg(test)]
#[allow(dead_code)]
pub(crate) mod testing;

pub mod layers;

pub mod models;
