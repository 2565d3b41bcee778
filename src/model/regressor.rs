//! Scalar regression head over the difference of two encoder summaries.

use std::collections::BTreeSet;

use burn::config::Config;
use burn::module::{Ignored, Module};
use burn::nn::Linear;
use burn::prelude::*;

use super::cell::zero_bias_linear;
use super::decoder::{Decoded, DecoderOutputs};
use super::encoder::{Encoded, SequenceEncoder};
use super::nn::{Activation, MultilayerPerceptron};
use super::rnn::check_keep_prob;
use super::ModelPart;
use crate::data::dataset::{Dataset, Series};
use crate::error::{ConfigError, DataError};

#[derive(Config, Debug)]
pub struct SequenceRegressorConfig {
    pub name: String,
    /// Dataset series with the target value of each example.
    pub data_id: String,
    /// Hidden layer sizes, bottom first.
    #[config(default = "Vec::new()")]
    pub layers: Vec<usize>,
    #[config(default = "Activation::Tanh")]
    pub activation: Activation,
    #[config(default = 0.5)]
    pub dropout_keep_prob: f64,
}

/// Predicts one number per example from two encoded sequences.
#[derive(Module, Debug)]
pub struct SequenceRegressor<B: Backend> {
    name: Ignored<String>,
    data_id: Ignored<String>,
    mlp: MultilayerPerceptron<B>,
    output: Linear<B>,
    dependencies: Ignored<BTreeSet<String>>,
}

/// Per-step bindings of the regressor.
#[derive(Debug, Clone)]
pub struct RegressorFeed<B: Backend> {
    /// [batch]; `None` for unlabeled batches.
    pub targets: Option<Tensor<B, 1>>,
    pub train: bool,
}

#[derive(Debug, Clone)]
pub struct RegressorOutput<B: Backend> {
    /// [batch]
    pub predictions: Tensor<B, 1>,
    /// Sum of squared errors; `None` without targets.
    pub loss: Option<Tensor<B, 1>>,
}

impl<B: Backend> DecoderOutputs<B> for RegressorOutput<B> {
    fn decoded(&self) -> Decoded<B> {
        Decoded::Scalars(self.predictions.clone())
    }

    fn train_loss(&self) -> Option<Tensor<B, 1>> {
        self.loss.clone()
    }

    fn runtime_loss(&self) -> Option<Tensor<B, 1>> {
        self.loss.clone()
    }
}

impl SequenceRegressorConfig {
    /// Build over the first two of `encoders`; any further encoders are
    /// ignored.
    pub fn init<B: Backend>(
        &self,
        encoders: &[&dyn SequenceEncoder<B>],
        device: &B::Device,
    ) -> Result<SequenceRegressor<B>, ConfigError> {
        check_keep_prob(self.dropout_keep_prob)?;
        let [first, second, rest @ ..] = encoders else {
            return Err(ConfigError::TooFewEncoders(encoders.len()));
        };
        if !rest.is_empty() {
            tracing::warn!(
                regressor = %self.name,
                ignored = rest.len(),
                "regressor uses only the first two encoders"
            );
        }
        if first.output_size() != second.output_size() {
            return Err(ConfigError::EncoderSizeMismatch {
                first: first.output_size(),
                second: second.output_size(),
            });
        }
        if self.layers.contains(&0) {
            return Err(ConfigError::InvalidParameter {
                field: "layers",
                reason: "hidden layer sizes must be positive".into(),
            });
        }

        let d_in = first.output_size();
        let mlp = MultilayerPerceptron::new(d_in, &self.layers, self.activation, self.dropout_keep_prob, device);
        let output = zero_bias_linear(mlp.output_size(d_in), 1, device);

        let mut dependencies = first.dependencies();
        dependencies.extend(second.dependencies());
        dependencies.insert(self.name.clone());

        Ok(SequenceRegressor {
            name: Ignored(self.name.clone()),
            data_id: Ignored(self.data_id.clone()),
            mlp,
            output,
            dependencies: Ignored(dependencies),
        })
    }
}

impl<B: Backend> SequenceRegressor<B> {
    pub fn data_id(&self) -> &str {
        &self.data_id.0
    }

    /// Bind targets if the dataset has them. An absent series only sets
    /// the train flag.
    pub fn feed(&self, dataset: &Dataset, train: bool, device: &B::Device) -> Result<RegressorFeed<B>, DataError> {
        let values = match dataset.get_series(self.data_id(), true)? {
            None => None,
            Some(Series::Scalars(values)) => Some(values.clone()),
            Some(Series::Sentences(sentences)) => Some(self.first_tokens(sentences)?),
            Some(other) => {
                return Err(DataError::SeriesKind {
                    series: self.data_id().to_string(),
                    expected: "scalars",
                    found: other.kind(),
                })
            }
        };
        let targets = values.map(|v| {
            let n = v.len();
            Tensor::from_data(TensorData::new(v, [n]), device)
        });
        Ok(RegressorFeed { targets, train })
    }

    fn first_tokens(&self, sentences: &[Vec<String>]) -> Result<Vec<f32>, DataError> {
        sentences
            .iter()
            .enumerate()
            .map(|(index, sentence)| {
                let token = sentence.first().map(String::as_str).unwrap_or("");
                token.parse::<f32>().map_err(|_| DataError::NotANumber {
                    series: self.data_id().to_string(),
                    index,
                    value: token.to_string(),
                })
            })
            .collect()
    }

    /// Predict from the encoded inputs, in the order the encoders were given.
    pub fn forward(&self, encoded: &[&Encoded<B>], feed: &RegressorFeed<B>) -> Result<RegressorOutput<B>, DataError> {
        let [first, second, ..] = encoded else {
            return Err(DataError::EncoderCount {
                expected: 2,
                found: encoded.len(),
            });
        };

        let mlp_input = first.output.clone() - second.output.clone();
        let hidden = self.mlp.forward(mlp_input, feed.train);
        let [batch, _] = hidden.dims();
        let predictions = self.output.forward(hidden).reshape([batch]);

        let loss = feed.targets.as_ref().map(|targets| {
            let error = predictions.clone() - targets.clone();
            (error.clone() * error).sum()
        });

        Ok(RegressorOutput { predictions, loss })
    }
}

impl<B: Backend> ModelPart for SequenceRegressor<B> {
    fn name(&self) -> &str {
        &self.name.0
    }

    fn dependencies(&self) -> BTreeSet<String> {
        self.dependencies.0.clone()
    }
}
