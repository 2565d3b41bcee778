//! Supervised training helpers: masked cross-entropy and the optimizer step.

use burn::grad_clipping::GradientClippingConfig;
use burn::module::AutodiffModule;
use burn::optim::{AdamWConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::activation;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;

use crate::model::cell::sequence_mask;

/// Optimizer settings shared by every objective.
#[derive(Debug, Clone)]
pub struct SupervisedConfig {
    /// Initial learning rate.
    pub lr: f64,
    /// Minimum learning rate (cosine decay target).
    pub lr_min: f64,
    pub weight_decay: f64,
    /// Gradient clipping norm.
    pub grad_clip: f32,
}

impl Default for SupervisedConfig {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            lr_min: 1e-5,
            weight_decay: 0.01,
            grad_clip: 1.0,
        }
    }
}

/// Cosine annealing learning rate: lr_min + 0.5*(lr - lr_min)*(1 + cos(pi*t/T))
pub fn cosine_lr(config: &SupervisedConfig, step: usize, total_steps: usize) -> f64 {
    if total_steps <= 1 {
        return config.lr;
    }
    let t = step as f64 / total_steps as f64;
    config.lr_min + 0.5 * (config.lr - config.lr_min) * (1.0 + (std::f64::consts::PI * t).cos())
}

/// Mean token cross-entropy, counting only positions inside each length.
///
/// logits: [batch, time, vocab], targets: [batch, time]
pub fn sequence_cross_entropy<B: Backend>(
    logits: Tensor<B, 3>,
    targets: Tensor<B, 2, Int>,
    lengths: &[usize],
) -> Tensor<B, 1> {
    let [batch, time, vocab] = logits.dims();
    let device = logits.device();

    let log_probs = activation::log_softmax(logits.reshape([batch * time, vocab]), 1);
    let picked = log_probs
        .gather(1, targets.reshape([batch * time, 1]))
        .reshape([batch, time]);

    let mask = sequence_mask::<B>(lengths, time, &device);
    let tokens = lengths.iter().sum::<usize>().max(1) as f64;
    (picked * mask).sum().neg().div_scalar(tokens)
}

/// Create an AdamW optimizer with gradient clipping.
pub fn create_optimizer<B, M>(config: &SupervisedConfig) -> impl Optimizer<M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    AdamWConfig::new()
        .with_weight_decay(config.weight_decay as f32)
        .with_grad_clipping(Some(GradientClippingConfig::Norm(config.grad_clip)))
        .init()
}

/// Backpropagate `loss` and apply one optimizer update.
///
/// Returns the updated model and the loss value.
pub fn train_step<B, M>(
    model: M,
    loss: Tensor<B, 1>,
    optimizer: &mut impl Optimizer<M, B>,
    lr: f64,
) -> (M, f32)
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let value: f32 = loss.clone().into_scalar().elem();
    let grads = loss.backward();
    let grads = GradientsParams::from_grads(grads, &model);
    (optimizer.step(lr, model, grads), value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    #[test]
    fn cosine_schedule_endpoints() {
        let config = SupervisedConfig::default();
        assert!((cosine_lr(&config, 0, 10) - config.lr).abs() < 1e-12);
        assert!(cosine_lr(&config, 5, 10) < config.lr);
        assert!((cosine_lr(&config, 10, 10) - config.lr_min).abs() < 1e-12);
        assert_eq!(cosine_lr(&config, 3, 1), config.lr);
    }

    #[test]
    fn uniform_logits_give_log_vocab() {
        let device = Default::default();
        let logits = Tensor::<B, 3>::zeros([2, 3, 4], &device);
        let targets = Tensor::<B, 2, Int>::zeros([2, 3], &device);
        let loss: f32 = sequence_cross_entropy(logits, targets, &[3, 1]).into_scalar().elem();
        assert!((loss - 4f32.ln()).abs() < 1e-5, "{}", loss);
    }

    #[test]
    fn padding_is_ignored() {
        let device = Default::default();
        // position 1 of the single example is padding with a terrible prediction
        let logits = Tensor::<B, 3>::from_data(
            TensorData::new(vec![10.0f32, 0.0, -10.0, 10.0], [1, 2, 2]),
            &device,
        );
        let targets = Tensor::<B, 2, Int>::from_data(TensorData::new(vec![0i32, 0], [1, 2]), &device);
        let loss: f32 = sequence_cross_entropy(logits, targets, &[1]).into_scalar().elem();
        assert!(loss < 1e-3, "{}", loss);
    }
}
