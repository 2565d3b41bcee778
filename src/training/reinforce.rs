//! Reward-driven objective for sequence decoders.
//!
//! REINFORCE with an optional running-mean baseline, Minimum Risk Training
//! (`normalize`), and the mixed objective that blends in the decoder's
//! cross-entropy (`ce_smoothing > 0`).

use burn::config::Config;
use burn::prelude::*;
use burn::tensor::activation::{log_softmax, softmax};
use burn::tensor::ElementConversion;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::reward::{score_with_reward_function, RewardFunction};
use crate::error::{ConfigError, DataError};
use crate::model::decoder::{DecodingMode, StochasticDecoder};
use crate::model::ModelPart;

#[derive(Config, Debug)]
pub struct ReinforceConfig {
    /// Subtract the running mean reward from every reward.
    #[config(default = false)]
    pub subtract_baseline: bool,
    /// Turn log-probabilities into a distribution over the samples.
    #[config(default = false)]
    pub normalize: bool,
    /// Sampling temperature, > 0.
    #[config(default = 1.0)]
    pub temperature: f32,
    /// Weight of the decoder's cross-entropy, >= 0.
    #[config(default = 0.0)]
    pub ce_smoothing: f32,
    /// Sharpness of the normalized distribution.
    #[config(default = 1.0)]
    pub alpha: f32,
    /// Samples drawn per step.
    #[config(default = 1)]
    pub sample_size: usize,
    #[config(default = 42)]
    pub seed: u64,
}

/// Running mean of every reward seen so far.
///
/// Updates are keyed by step number. A step at or before the last counted
/// one is treated as a retry: its rewards are not added again and the
/// current mean is returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardBaseline {
    reward_sum: f64,
    reward_count: u64,
    last_step: Option<u64>,
    last_value: f32,
}

impl RewardBaseline {
    /// Add one step's rewards and return the new mean.
    pub fn update(&mut self, step: u64, reward_sum: f64, reward_count: u64) -> f32 {
        if self.last_step.is_some_and(|last| step <= last) {
            return self.last_value;
        }
        self.reward_sum += reward_sum;
        self.reward_count += reward_count;
        self.last_step = Some(step);
        self.last_value = (self.reward_sum / self.reward_count.max(1) as f64) as f32;
        self.last_value
    }

    /// Current mean; zero before any update.
    pub fn value(&self) -> f32 {
        self.last_value
    }

    pub fn count(&self) -> u64 {
        self.reward_count
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// What one objective step computed.
#[derive(Debug, Clone)]
pub struct ReinforceStep<B: Backend> {
    /// [1], differentiable through the sampled log-probabilities.
    pub loss: Tensor<B, 1>,
    pub loss_value: f32,
    /// Baseline subtracted this step, if enabled.
    pub baseline: Option<f32>,
    /// Mean raw reward over samples and examples.
    pub mean_reward: f32,
}

/// Policy-gradient objective bound to one decoder.
pub struct ReinforceObjective {
    name: String,
    decoder: String,
    config: ReinforceConfig,
    reward: Box<dyn RewardFunction>,
    baseline: RewardBaseline,
    rng: StdRng,
}

impl std::fmt::Debug for ReinforceObjective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReinforceObjective")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("baseline", &self.baseline)
            .finish_non_exhaustive()
    }
}

impl ReinforceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.temperature > 0.0) {
            return Err(ConfigError::InvalidParameter {
                field: "temperature",
                reason: format!("must be positive, {} given", self.temperature),
            });
        }
        if !(self.ce_smoothing >= 0.0) {
            return Err(ConfigError::InvalidParameter {
                field: "ce_smoothing",
                reason: format!("must not be negative, {} given", self.ce_smoothing),
            });
        }
        if self.sample_size == 0 {
            return Err(ConfigError::InvalidParameter {
                field: "sample_size",
                reason: "must be positive".into(),
            });
        }
        if !self.alpha.is_finite() {
            return Err(ConfigError::InvalidParameter {
                field: "alpha",
                reason: format!("must be finite, {} given", self.alpha),
            });
        }
        Ok(())
    }

    pub fn init(
        &self,
        decoder: &dyn ModelPart,
        reward: Box<dyn RewardFunction>,
    ) -> Result<ReinforceObjective, ConfigError> {
        self.validate()?;
        Ok(ReinforceObjective {
            name: format!("{}_rl", decoder.name()),
            decoder: decoder.name().to_string(),
            config: self.clone(),
            reward,
            baseline: RewardBaseline::default(),
            rng: StdRng::seed_from_u64(self.seed),
        })
    }
}

/// Older entry point kept for existing configurations.
pub fn rl_objective(
    decoder: &dyn ModelPart,
    reward: Box<dyn RewardFunction>,
    config: &ReinforceConfig,
) -> Result<ReinforceObjective, ConfigError> {
    warn!("rl_objective is deprecated, build a ReinforceConfig and call init");
    config.init(decoder, reward)
}

/// Σ_time log p(symbol), over the whole decoded length.
///
/// logits: [time, batch, vocab], symbols: [time, batch] → [batch]
pub fn sequence_log_prob<B: Backend>(logits: Tensor<B, 3>, symbols: Tensor<B, 2, Int>) -> Tensor<B, 1> {
    let [time, batch, _] = logits.dims();
    log_softmax(logits, 2)
        .gather(2, symbols.reshape([time, batch, 1]))
        .sum_dim(0)
        .reshape([batch])
}

impl ReinforceObjective {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn decoder_name(&self) -> &str {
        &self.decoder
    }

    pub fn config(&self) -> &ReinforceConfig {
        &self.config
    }

    pub fn baseline(&self) -> &RewardBaseline {
        &self.baseline
    }

    /// Forget the reward history.
    pub fn reset_baseline(&mut self) {
        self.baseline.reset();
    }

    /// Compute the loss of training step `step`.
    pub fn loss<B, D>(&mut self, decoder: &D, batch: &D::Batch, step: u64) -> Result<ReinforceStep<B>, DataError>
    where
        B: Backend,
        D: StochasticDecoder<B>,
    {
        let references = decoder.train_inputs(batch)?;
        let batch_size = decoder.batch_size(batch);
        let samples = self.config.sample_size;
        let mode = DecodingMode::Sample {
            temperature: self.config.temperature,
        };

        let mut rewards: Vec<f32> = Vec::with_capacity(samples * batch_size);
        let mut logprobs = Vec::with_capacity(samples);
        for _ in 0..samples {
            let history = decoder.decoding_loop(batch, mode, false, &mut self.rng);
            rewards.extend(score_with_reward_function(
                decoder.vocabulary(),
                &references,
                &history.sampled,
                self.reward.as_ref(),
            ));
            logprobs.push(sequence_log_prob(history.logits, history.symbols));
        }
        let logprobs: Tensor<B, 2> = Tensor::stack(logprobs, 0); // [samples, batch]
        let device = logprobs.device();

        let reward_sum: f64 = rewards.iter().map(|&r| r as f64).sum();
        let mean_reward = (reward_sum / rewards.len().max(1) as f64) as f32;

        let baseline = if self.config.subtract_baseline {
            let value = self
                .baseline
                .update(step, reward_sum, (batch_size * samples) as u64);
            rewards.iter_mut().for_each(|r| *r -= value);
            Some(value)
        } else {
            None
        };

        // host data: no gradient reaches the rewards
        let rewards = Tensor::<B, 2>::from_data(TensorData::new(rewards, [samples, batch_size]), &device);

        let scores = if self.config.normalize {
            softmax(logprobs.mul_scalar(self.config.alpha), 0)
        } else {
            logprobs
        };

        let mut loss = (rewards.neg() * scores).sum_dim(0).mean();
        if self.config.ce_smoothing > 0.0 {
            loss = loss + decoder.cross_entropy(batch)?.mul_scalar(self.config.ce_smoothing);
        }

        let loss_value: f32 = loss.clone().into_scalar().elem();
        debug!(
            objective = %self.name,
            step,
            loss = loss_value,
            mean_reward,
            baseline = baseline.unwrap_or(0.0),
            "reinforce step"
        );

        Ok(ReinforceStep {
            loss,
            loss_value,
            baseline,
            mean_reward,
        })
    }
}
