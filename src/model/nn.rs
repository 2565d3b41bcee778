//! Shared layers: mode-gated dropout, activations and the MLP.

use burn::module::{Ignored, Module};
use burn::nn::Linear;
use burn::prelude::*;
use burn::tensor::activation::{relu, sigmoid, tanh};
use burn::tensor::Distribution;
use serde::{Deserialize, Serialize};

use super::cell::zero_bias_linear;

/// Inverted dropout, active only when `train` is set.
///
/// The mode flag is an argument rather than module state so one model
/// serves training and inference calls alike.
pub fn dropout<B: Backend, const D: usize>(x: Tensor<B, D>, keep_prob: f64, train: bool) -> Tensor<B, D> {
    if !train || keep_prob >= 1.0 {
        return x;
    }
    let mask = Tensor::<B, D>::random(x.shape(), Distribution::Bernoulli(keep_prob), &x.device());
    (x * mask).div_scalar(keep_prob)
}

/// Hidden-layer nonlinearity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Tanh,
    Relu,
    Sigmoid,
    Identity,
}

impl Activation {
    pub fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Self::Tanh => tanh(x),
            Self::Relu => relu(x),
            Self::Sigmoid => sigmoid(x),
            Self::Identity => x,
        }
    }
}

/// Stack of `linear → activation → dropout` layers.
#[derive(Module, Debug)]
pub struct MultilayerPerceptron<B: Backend> {
    layers: Vec<Linear<B>>,
    activation: Ignored<Activation>,
    dropout_keep_prob: f64,
}

impl<B: Backend> MultilayerPerceptron<B> {
    pub fn new(
        d_in: usize,
        sizes: &[usize],
        activation: Activation,
        dropout_keep_prob: f64,
        device: &B::Device,
    ) -> Self {
        let mut layers = Vec::with_capacity(sizes.len());
        let mut d_prev = d_in;
        for &size in sizes {
            layers.push(zero_bias_linear(d_prev, size, device));
            d_prev = size;
        }
        Self {
            layers,
            activation: Ignored(activation),
            dropout_keep_prob,
        }
    }

    /// Width of the last layer (the input width when there are no layers).
    pub fn output_size(&self, d_in: usize) -> usize {
        self.layers
            .last()
            .map(|l| l.weight.dims()[1])
            .unwrap_or(d_in)
    }

    pub fn forward(&self, x: Tensor<B, 2>, train: bool) -> Tensor<B, 2> {
        let mut h = x;
        for layer in &self.layers {
            h = self.activation.0.apply(layer.forward(h));
            h = dropout(h, self.dropout_keep_prob, train);
        }
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::host_values;
    use burn::backend::NdArray;

    type B = NdArray;

    #[test]
    fn dropout_is_identity_outside_training() {
        let x = Tensor::<B, 2>::ones([4, 8], &Default::default());
        let y = dropout(x.clone(), 0.5, false);
        assert_eq!(host_values(y), host_values(x));
    }

    #[test]
    fn dropout_scales_kept_units() {
        let x = Tensor::<B, 2>::ones([16, 16], &Default::default());
        let y = dropout(x, 0.5, true);
        assert!(host_values(y).iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-6));
    }

    #[test]
    fn mlp_shapes_follow_layer_sizes() {
        let device = Default::default();
        let mlp = MultilayerPerceptron::<B>::new(6, &[5, 3], Activation::Tanh, 1.0, &device);
        assert_eq!(mlp.output_size(6), 3);
        let out = mlp.forward(Tensor::ones([2, 6], &device), true);
        assert_eq!(out.dims(), [2, 3]);

        let empty = MultilayerPerceptron::<B>::new(6, &[], Activation::Relu, 1.0, &device);
        assert_eq!(empty.output_size(6), 6);
    }
}
