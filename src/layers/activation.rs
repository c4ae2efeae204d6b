use burn::config::Config;
use burn::module::Module;
use burn::nn::{Gelu, PRelu, PReluConfig, Relu};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::silu;

/// Sigmoid-weighted linear unit, `x * sigmoid(x)`.
///
/// ``burn::nn`` ships no module wrapper for SiLU; this wraps
/// [`burn::tensor::activation::silu`] so the layer can live inside a
/// [`Module`] tree like the other activations.
#[derive(Module, Clone, Debug, Default)]
pub struct Silu;

impl Silu {
    /// Create a new [`Silu`] module.
    pub fn new() -> Self {
        Self
    }

    /// Applies SiLU element-wise.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        silu(input)
    }
}

/// [`Activation`] configuration.
///
/// A closed set of the activations used by the model family.
#[derive(Config, Debug)]
pub enum ActivationConfig {
    /// [`Silu`] activation layer.
    Silu,

    /// [`Gelu`] activation layer.
    Gelu,

    /// [`Relu`] activation layer.
    Relu,

    /// [`PRelu`] activation layer.
    PRelu(PReluConfig),
}

impl ActivationConfig {
    /// Initialize the wrapped activation layer.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Activation<B> {
        match self {
            ActivationConfig::Silu => Activation::Silu(Silu::new()),
            ActivationConfig::Gelu => Activation::Gelu(Gelu::new()),
            ActivationConfig::Relu => Activation::Relu(Relu::new()),
            ActivationConfig::PRelu(conf) => Activation::PRelu(conf.init(device)),
        }
    }
}

/// Activation layer wrapper.
#[derive(Module, Debug)]
pub enum Activation<B: Backend> {
    /// [`Silu`] activation layer.
    Silu(Silu),

    /// [`Gelu`] activation layer.
    Gelu(Gelu),

    /// [`Relu`] activation layer.
    Relu(Relu),

    /// [`PRelu`] activation layer.
    PRelu(PRelu<B>),
}

impl<B: Backend> Activation<B> {
    /// Forward pass.
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        match self {
            Activation::Silu(layer) => layer.forward(input),
            Activation::Gelu(layer) => layer.forward(input),
            Activation::Relu(layer) => layer.forward(input),
            Activation::PRelu(layer) => layer.forward(input),
        }
    }
}
