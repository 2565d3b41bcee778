//! Recurrent encoders over embedded token sequences.
//!
//! `RecurrentEncoder` is the shared core: it reads any temporal input and
//! produces per-position states plus one summary vector per example. The
//! sentence, factored and deep variants wire it to their inputs.

use std::collections::BTreeSet;
use std::sync::Arc;

use burn::config::Config;
use burn::module::{Ignored, Module};
use burn::prelude::*;

use super::cell::{dynamic_rnn, init_cell, reverse_sequence, RnnCell};
use super::nn::dropout;
use super::rnn::{check_keep_prob, Direction, RnnSpec};
use super::sequence::{
    EmbeddedFactorSequence, EmbeddedFactorSequenceConfig, EmbeddedSequence, EmbeddedSequenceConfig,
    TemporalStates,
};
use super::vocab::Vocabulary;
use super::{ModelPart, TemporalStateful};
use crate::data::dataset::Dataset;
use crate::error::{ConfigError, DataError};

/// Result of running an encoder on one batch.
///
/// Computed once per batch and passed by reference to every consumer.
#[derive(Debug, Clone)]
pub struct Encoded<B: Backend> {
    /// [batch, time, out_dim], zero past each example's length
    pub temporal_states: Tensor<B, 3>,
    /// [batch, time]
    pub temporal_mask: Tensor<B, 2>,
    pub lengths: Vec<usize>,
    /// [batch, out_dim]
    pub output: Tensor<B, 2>,
}

impl<B: Backend> Encoded<B> {
    /// View the per-position states as the input of another layer.
    pub fn temporal(&self) -> TemporalStates<B> {
        TemporalStates {
            states: self.temporal_states.clone(),
            mask: self.temporal_mask.clone(),
            lengths: self.lengths.clone(),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.lengths.len()
    }
}

/// An encoder that binds its own input from a dataset.
pub trait SequenceEncoder<B: Backend>: ModelPart {
    /// Width of the summary vector.
    fn output_size(&self) -> usize;

    fn encode(&self, dataset: &Dataset, train: bool, device: &B::Device) -> Result<Encoded<B>, DataError>;
}

// ─── Core ─────────────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct RecurrentEncoderConfig {
    pub name: String,
    pub rnn_size: usize,
    /// One of `GRU`, `NematusGRU`, `LSTM`.
    #[config(default = "String::from(\"GRU\")")]
    pub rnn_cell: String,
    /// One of `forward`, `backward`, `both`.
    #[config(default = "String::from(\"both\")")]
    pub rnn_direction: String,
    #[config(default = 1.0)]
    pub dropout_keep_prob: f64,
}

/// RNN over a temporal input, in one or both directions.
#[derive(Module, Debug)]
pub struct RecurrentEncoder<B: Backend> {
    name: Ignored<String>,
    spec: Ignored<RnnSpec>,
    forward_cell: Option<RnnCell<B>>,
    backward_cell: Option<RnnCell<B>>,
    dropout_keep_prob: f64,
    dependencies: Ignored<BTreeSet<String>>,
}

impl RecurrentEncoderConfig {
    pub fn spec(&self) -> Result<RnnSpec, ConfigError> {
        RnnSpec::parse(self.rnn_size, &self.rnn_direction, &self.rnn_cell)
    }

    /// Build an encoder reading from `input`.
    pub fn init<B, I>(&self, input: &I, device: &B::Device) -> Result<RecurrentEncoder<B>, ConfigError>
    where
        B: Backend,
        I: ModelPart + TemporalStateful + ?Sized,
    {
        let spec = self.spec()?;
        check_keep_prob(self.dropout_keep_prob)?;

        let d_in = input.temporal_size();
        let make = || init_cell(spec.cell_type, d_in, spec.size, device);
        let (forward_cell, backward_cell) = match spec.direction {
            Direction::Forward => (Some(make()), None),
            Direction::Backward => (None, Some(make())),
            Direction::Both => (Some(make()), Some(make())),
        };

        let mut dependencies = input.dependencies();
        dependencies.insert(self.name.clone());

        Ok(RecurrentEncoder {
            name: Ignored(self.name.clone()),
            spec: Ignored(spec),
            forward_cell,
            backward_cell,
            dropout_keep_prob: self.dropout_keep_prob,
            dependencies: Ignored(dependencies),
        })
    }
}

impl<B: Backend> RecurrentEncoder<B> {
    pub fn spec(&self) -> RnnSpec {
        self.spec.0
    }

    /// Width of the summary vector and of every per-position state.
    pub fn output_size(&self) -> usize {
        self.spec.0.output_size()
    }

    /// Encode a temporal input.
    ///
    /// `input.states`: [batch, time, d_in]
    /// Returns states [batch, time, output_size] and summary [batch, output_size].
    pub fn forward(&self, input: &TemporalStates<B>, train: bool) -> Encoded<B> {
        let states = dropout(input.states.clone(), self.dropout_keep_prob, train);
        let mut outputs = Vec::with_capacity(2);
        let mut finals = Vec::with_capacity(2);

        if let Some(cell) = &self.forward_cell {
            let (out, last) = dynamic_rnn(cell, states.clone(), input.mask.clone());
            outputs.push(out);
            finals.push(last.hidden);
        }
        if let Some(cell) = &self.backward_cell {
            let reversed = reverse_sequence(states, &input.lengths);
            let (out, last) = dynamic_rnn(cell, reversed, input.mask.clone());
            outputs.push(reverse_sequence(out, &input.lengths));
            finals.push(last.hidden);
        }

        Encoded {
            temporal_states: Tensor::cat(outputs, 2),
            temporal_mask: input.mask.clone(),
            lengths: input.lengths.clone(),
            output: Tensor::cat(finals, 1),
        }
    }
}

impl<B: Backend> ModelPart for RecurrentEncoder<B> {
    fn name(&self) -> &str {
        &self.name.0
    }

    fn dependencies(&self) -> BTreeSet<String> {
        self.dependencies.0.clone()
    }
}

impl<B: Backend> TemporalStateful for RecurrentEncoder<B> {
    fn temporal_size(&self) -> usize {
        self.output_size()
    }
}

// ─── Sentence encoder ─────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct SentenceEncoderConfig {
    pub name: String,
    pub data_id: String,
    pub embedding_size: usize,
    pub rnn_size: usize,
    #[config(default = "None")]
    pub max_input_len: Option<usize>,
    #[config(default = "String::from(\"GRU\")")]
    pub rnn_cell: String,
    #[config(default = "String::from(\"both\")")]
    pub rnn_direction: String,
    #[config(default = 1.0)]
    pub dropout_keep_prob: f64,
}

/// Embedded sentence followed by one recurrent encoder.
#[derive(Module, Debug)]
pub struct SentenceEncoder<B: Backend> {
    input: EmbeddedSequence<B>,
    encoder: RecurrentEncoder<B>,
}

impl SentenceEncoderConfig {
    pub fn init<B: Backend>(
        &self,
        vocabulary: Arc<Vocabulary>,
        device: &B::Device,
    ) -> Result<SentenceEncoder<B>, ConfigError> {
        let input = EmbeddedSequenceConfig::new(
            format!("{}_input", self.name),
            self.data_id.clone(),
            self.embedding_size,
        )
        .with_max_length(self.max_input_len)
        .init(vocabulary, device)?;

        let encoder = RecurrentEncoderConfig::new(self.name.clone(), self.rnn_size)
            .with_rnn_cell(self.rnn_cell.clone())
            .with_rnn_direction(self.rnn_direction.clone())
            .with_dropout_keep_prob(self.dropout_keep_prob)
            .init(&input, device)?;

        Ok(SentenceEncoder { input, encoder })
    }
}

impl<B: Backend> SentenceEncoder<B> {
    pub fn input(&self) -> &EmbeddedSequence<B> {
        &self.input
    }

    pub fn encoder(&self) -> &RecurrentEncoder<B> {
        &self.encoder
    }
}

impl<B: Backend> ModelPart for SentenceEncoder<B> {
    fn name(&self) -> &str {
        self.encoder.name()
    }

    fn dependencies(&self) -> BTreeSet<String> {
        self.encoder.dependencies()
    }
}

impl<B: Backend> SequenceEncoder<B> for SentenceEncoder<B> {
    fn output_size(&self) -> usize {
        self.encoder.output_size()
    }

    fn encode(&self, dataset: &Dataset, train: bool, device: &B::Device) -> Result<Encoded<B>, DataError> {
        let tokens = self.input.feed(dataset, device)?;
        Ok(self.encoder.forward(&self.input.forward(&tokens), train))
    }
}

// ─── Factored encoder ─────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct FactoredEncoderConfig {
    pub name: String,
    pub data_ids: Vec<String>,
    pub embedding_sizes: Vec<usize>,
    pub rnn_size: usize,
    #[config(default = "None")]
    pub max_input_len: Option<usize>,
    #[config(default = "String::from(\"GRU\")")]
    pub rnn_cell: String,
    #[config(default = "String::from(\"both\")")]
    pub rnn_direction: String,
    #[config(default = 1.0)]
    pub dropout_keep_prob: f64,
}

/// Several token factors embedded side by side, then one recurrent encoder.
#[derive(Module, Debug)]
pub struct FactoredEncoder<B: Backend> {
    input: EmbeddedFactorSequence<B>,
    encoder: RecurrentEncoder<B>,
}

impl FactoredEncoderConfig {
    pub fn init<B: Backend>(
        &self,
        vocabularies: Vec<Arc<Vocabulary>>,
        device: &B::Device,
    ) -> Result<FactoredEncoder<B>, ConfigError> {
        let input = EmbeddedFactorSequenceConfig::new(
            format!("{}_input", self.name),
            self.data_ids.clone(),
            self.embedding_sizes.clone(),
        )
        .with_max_length(self.max_input_len)
        .init(vocabularies, device)?;

        let encoder = RecurrentEncoderConfig::new(self.name.clone(), self.rnn_size)
            .with_rnn_cell(self.rnn_cell.clone())
            .with_rnn_direction(self.rnn_direction.clone())
            .with_dropout_keep_prob(self.dropout_keep_prob)
            .init(&input, device)?;

        Ok(FactoredEncoder { input, encoder })
    }
}

impl<B: Backend> ModelPart for FactoredEncoder<B> {
    fn name(&self) -> &str {
        self.encoder.name()
    }

    fn dependencies(&self) -> BTreeSet<String> {
        self.encoder.dependencies()
    }
}

impl<B: Backend> SequenceEncoder<B> for FactoredEncoder<B> {
    fn output_size(&self) -> usize {
        self.encoder.output_size()
    }

    fn encode(&self, dataset: &Dataset, train: bool, device: &B::Device) -> Result<Encoded<B>, DataError> {
        let tokens = self.input.feed(dataset, device)?;
        Ok(self.encoder.forward(&self.input.forward(&tokens), train))
    }
}

// ─── Deep encoder ─────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct DeepSentenceEncoderConfig {
    pub name: String,
    pub data_id: String,
    pub embedding_size: usize,
    /// One size per layer, bottom first.
    pub rnn_sizes: Vec<usize>,
    /// One direction per layer, bottom first.
    pub rnn_directions: Vec<String>,
    #[config(default = "None")]
    pub max_input_len: Option<usize>,
    #[config(default = "String::from(\"GRU\")")]
    pub rnn_cell: String,
    #[config(default = 1.0)]
    pub dropout_keep_prob: f64,
}

/// Stack of recurrent layers; layer `i` reads the states of layer `i - 1`.
///
/// Intermediate layers are named `{name}_layer_{i}`, the top one `{name}`.
#[derive(Module, Debug)]
pub struct DeepSentenceEncoder<B: Backend> {
    input: EmbeddedSequence<B>,
    layers: Vec<RecurrentEncoder<B>>,
}

impl DeepSentenceEncoderConfig {
    pub fn init<B: Backend>(
        &self,
        vocabulary: Arc<Vocabulary>,
        device: &B::Device,
    ) -> Result<DeepSentenceEncoder<B>, ConfigError> {
        if self.rnn_sizes.len() != self.rnn_directions.len() {
            return Err(ConfigError::LayerCountMismatch {
                sizes: self.rnn_sizes.len(),
                directions: self.rnn_directions.len(),
            });
        }
        if self.rnn_sizes.is_empty() {
            return Err(ConfigError::NoLayers);
        }

        let input = EmbeddedSequenceConfig::new(
            format!("{}_input", self.name),
            self.data_id.clone(),
            self.embedding_size,
        )
        .with_max_length(self.max_input_len)
        .init(vocabulary, device)?;

        let depth = self.rnn_sizes.len();
        let mut layers: Vec<RecurrentEncoder<B>> = Vec::with_capacity(depth);
        for (i, (&size, direction)) in self.rnn_sizes.iter().zip(&self.rnn_directions).enumerate() {
            let name = if i + 1 == depth {
                self.name.clone()
            } else {
                format!("{}_layer_{}", self.name, i)
            };
            let config = RecurrentEncoderConfig::new(name, size)
                .with_rnn_cell(self.rnn_cell.clone())
                .with_rnn_direction(direction.clone())
                .with_dropout_keep_prob(self.dropout_keep_prob);
            let layer = match layers.last() {
                Some(below) => config.init(below, device)?,
                None => config.init(&input, device)?,
            };
            layers.push(layer);
        }

        Ok(DeepSentenceEncoder { input, layers })
    }
}

impl<B: Backend> DeepSentenceEncoder<B> {
    pub fn layers(&self) -> &[RecurrentEncoder<B>] {
        &self.layers
    }

    fn top(&self) -> &RecurrentEncoder<B> {
        // init rejects empty stacks
        &self.layers[self.layers.len() - 1]
    }
}

impl<B: Backend> ModelPart for DeepSentenceEncoder<B> {
    fn name(&self) -> &str {
        self.top().name()
    }

    fn dependencies(&self) -> BTreeSet<String> {
        self.top().dependencies()
    }
}

impl<B: Backend> SequenceEncoder<B> for DeepSentenceEncoder<B> {
    fn output_size(&self) -> usize {
        self.top().output_size()
    }

    fn encode(&self, dataset: &Dataset, train: bool, device: &B::Device) -> Result<Encoded<B>, DataError> {
        let tokens = self.input.feed(dataset, device)?;
        let mut temporal = self.input.forward(&tokens);
        let mut encoded = None;
        for layer in &self.layers {
            let out = layer.forward(&temporal, train);
            temporal = out.temporal();
            encoded = Some(out);
        }
        Ok(encoded.unwrap_or_else(|| self.top().forward(&temporal, train)))
    }
}
