//! Output parts: the shared decoder-output interface and a recurrent
//! sequence decoder conditioned on an encoder summary.

use std::collections::BTreeSet;
use std::sync::Arc;

use burn::config::Config;
use burn::module::{Ignored, Module};
use burn::nn::{Embedding, EmbeddingConfig, Linear};
use burn::prelude::*;
use burn::tensor::activation::tanh;
use rand::rngs::StdRng;
use rand::Rng;

use super::cell::{init_cell, zero_bias_linear, CellState, RnnCell};
use super::encoder::{Encoded, SequenceEncoder};
use super::host_values;
use super::nn::dropout;
use super::rnn::{check_keep_prob, CellType};
use super::sequence::indices_to_tensor;
use super::vocab::{IndexedBatch, Vocabulary, END_INDEX, START_INDEX};
use super::ModelPart;
use crate::data::dataset::{Dataset, Series};
use crate::error::{ConfigError, DataError};
use crate::training::supervised::sequence_cross_entropy;

// ─── Decoder outputs ──────────────────────────────────────────────

/// What a decoder produced for a batch.
#[derive(Debug, Clone)]
pub enum Decoded<B: Backend> {
    /// Symbol indices, [time, batch].
    Symbols(Tensor<B, 2, Int>),
    /// One value per example, [batch].
    Scalars(Tensor<B, 1>),
}

/// Common surface of everything that sits at the output of a model.
pub trait DecoderOutputs<B: Backend> {
    fn decoded(&self) -> Decoded<B>;

    /// Loss to optimize; `None` when the batch carried no targets.
    fn train_loss(&self) -> Option<Tensor<B, 1>>;

    /// Loss reported at evaluation time.
    fn runtime_loss(&self) -> Option<Tensor<B, 1>>;
}

/// Output of `RecurrentDecoder::run`.
#[derive(Debug, Clone)]
pub struct SequenceOutput<B: Backend> {
    /// [time, batch]
    pub symbols: Tensor<B, 2, Int>,
    pub loss: Option<Tensor<B, 1>>,
}

impl<B: Backend> DecoderOutputs<B> for SequenceOutput<B> {
    fn decoded(&self) -> Decoded<B> {
        Decoded::Symbols(self.symbols.clone())
    }

    fn train_loss(&self) -> Option<Tensor<B, 1>> {
        self.loss.clone()
    }

    fn runtime_loss(&self) -> Option<Tensor<B, 1>> {
        self.loss.clone()
    }
}

// ─── Stochastic decoding ──────────────────────────────────────────

/// How the next symbol is chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecodingMode {
    Greedy,
    /// Draw from softmax(logits / temperature).
    Sample { temperature: f32 },
}

/// Everything a decoding loop emitted.
#[derive(Debug, Clone)]
pub struct DecodingHistory<B: Backend> {
    /// Scores that produced each symbol, [time, batch, vocab]. Gradients
    /// flow through them.
    pub logits: Tensor<B, 3>,
    /// [time, batch]
    pub symbols: Tensor<B, 2, Int>,
    /// Host copy of the symbols, `[batch][time]`.
    pub sampled: Vec<Vec<usize>>,
}

/// A decoder that can run its own decoding loop with sampling.
pub trait StochasticDecoder<B: Backend>: ModelPart {
    /// Bound inputs of one step.
    type Batch;

    fn vocabulary(&self) -> &Vocabulary;

    /// Dataset series holding the reference sentences.
    fn data_id(&self) -> &str;

    fn batch_size(&self, batch: &Self::Batch) -> usize;

    /// Decode from the bound inputs. Dropout is active only when `train` is set.
    fn decoding_loop(&self, batch: &Self::Batch, mode: DecodingMode, train: bool, rng: &mut StdRng)
        -> DecodingHistory<B>;

    /// Reference symbols, `[batch][time]`, ending with the end symbol.
    fn train_inputs(&self, batch: &Self::Batch) -> Result<Vec<Vec<usize>>, DataError>;

    /// Supervised loss on the references.
    fn cross_entropy(&self, batch: &Self::Batch) -> Result<Tensor<B, 1>, DataError>;
}

/// Pick one index per row of `probs` [rows * width] by inverse CDF.
fn sample_rows(probs: &[f32], width: usize, rng: &mut StdRng) -> Vec<usize> {
    probs
        .chunks(width)
        .map(|row| {
            let u: f32 = rng.gen();
            let mut cumulative = 0.0f32;
            for (i, &p) in row.iter().enumerate() {
                cumulative += p;
                if u < cumulative {
                    return i;
                }
            }
            row.len() - 1
        })
        .collect()
}

/// Row-wise softmax of `scores / temperature` on the host.
fn softmax_rows(scores: &[f32], width: usize, temperature: f32) -> Vec<f32> {
    let mut out = Vec::with_capacity(scores.len());
    for row in scores.chunks(width) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exp: Vec<f32> = row.iter().map(|&s| ((s - max) / temperature).exp()).collect();
        let sum: f32 = exp.iter().sum();
        out.extend(exp.iter().map(|&e| e / sum));
    }
    out
}

fn argmax_rows(scores: &[f32], width: usize) -> Vec<usize> {
    scores
        .chunks(width)
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &s)| if s > best.1 { (i, s) } else { best })
                .0
        })
        .collect()
}

// ─── Recurrent decoder ────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct RecurrentDecoderConfig {
    pub name: String,
    /// Dataset series with the target sentences.
    pub data_id: String,
    pub embedding_size: usize,
    pub rnn_size: usize,
    #[config(default = 20)]
    pub max_output_len: usize,
    #[config(default = "String::from(\"GRU\")")]
    pub rnn_cell: String,
    #[config(default = 1.0)]
    pub dropout_keep_prob: f64,
}

/// Inputs of one decoder call.
#[derive(Debug, Clone)]
pub struct DecoderBatch<B: Backend> {
    pub encoded: Encoded<B>,
    /// Targets with the end symbol appended; absent at inference.
    pub targets: Option<IndexedBatch>,
    pub train: bool,
}

/// RNN decoder whose initial state is a projection of the encoder summary.
#[derive(Module, Debug)]
pub struct RecurrentDecoder<B: Backend> {
    name: Ignored<String>,
    data_id: Ignored<String>,
    vocabulary: Ignored<Arc<Vocabulary>>,
    embedding: Embedding<B>,
    initial_state: Linear<B>,
    cell: RnnCell<B>,
    output_projection: Linear<B>,
    max_output_len: usize,
    dropout_keep_prob: f64,
    dependencies: Ignored<BTreeSet<String>>,
}

impl RecurrentDecoderConfig {
    pub fn init<B: Backend>(
        &self,
        vocabulary: Arc<Vocabulary>,
        encoder: &dyn SequenceEncoder<B>,
        device: &B::Device,
    ) -> Result<RecurrentDecoder<B>, ConfigError> {
        let cell_type: CellType = self.rnn_cell.parse()?;
        if self.rnn_size == 0 {
            return Err(ConfigError::InvalidRnnSize(self.rnn_size));
        }
        if self.embedding_size == 0 {
            return Err(ConfigError::InvalidParameter {
                field: "embedding_size",
                reason: "must be positive".into(),
            });
        }
        if self.max_output_len == 0 {
            return Err(ConfigError::InvalidParameter {
                field: "max_output_len",
                reason: "must be positive".into(),
            });
        }
        check_keep_prob(self.dropout_keep_prob)?;

        let mut dependencies = encoder.dependencies();
        dependencies.insert(self.name.clone());

        Ok(RecurrentDecoder {
            name: Ignored(self.name.clone()),
            data_id: Ignored(self.data_id.clone()),
            embedding: EmbeddingConfig::new(vocabulary.len(), self.embedding_size).init(device),
            initial_state: zero_bias_linear(encoder.output_size(), self.rnn_size, device),
            cell: init_cell(cell_type, self.embedding_size, self.rnn_size, device),
            output_projection: zero_bias_linear(self.rnn_size, vocabulary.len(), device),
            vocabulary: Ignored(vocabulary),
            max_output_len: self.max_output_len,
            dropout_keep_prob: self.dropout_keep_prob,
            dependencies: Ignored(dependencies),
        })
    }
}

impl<B: Backend> RecurrentDecoder<B> {
    pub fn max_output_len(&self) -> usize {
        self.max_output_len
    }

    /// Bind the encoder result and, when present, the target sentences.
    pub fn feed(&self, dataset: &Dataset, encoded: &Encoded<B>, train: bool) -> Result<DecoderBatch<B>, DataError> {
        let targets = match dataset.get_series(&self.data_id.0, true)? {
            None => None,
            Some(Series::Sentences(sentences)) => Some(self.vocabulary.0.sentences_to_indices(
                sentences,
                Some(self.max_output_len.saturating_sub(1)),
                false,
                true,
            )),
            Some(other) => {
                return Err(DataError::SeriesKind {
                    series: self.data_id.0.clone(),
                    expected: "sentences",
                    found: other.kind(),
                })
            }
        };
        Ok(DecoderBatch {
            encoded: encoded.clone(),
            targets,
            train,
        })
    }

    fn start_state(&self, encoded: &Encoded<B>, train: bool) -> CellState<B> {
        let summary = dropout(encoded.output.clone(), self.dropout_keep_prob, train);
        self.cell.state_from_hidden(tanh(self.initial_state.forward(summary)))
    }

    /// One decoder step. `previous`: [batch]; returns logits [batch, vocab].
    fn step(&self, state: &CellState<B>, previous: Tensor<B, 1, Int>, train: bool) -> (CellState<B>, Tensor<B, 2>) {
        let [batch] = previous.dims();
        let embedded = self.embedding.forward(previous.reshape([batch, 1]));
        let [_, _, d_embed] = embedded.dims();
        let input = dropout(embedded.reshape([batch, d_embed]), self.dropout_keep_prob, train);
        let state = self.cell.step(state, input);
        let logits = self
            .output_projection
            .forward(dropout(state.hidden.clone(), self.dropout_keep_prob, train));
        (state, logits)
    }

    fn symbols_tensor(symbols: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
        let data: Vec<i32> = symbols.iter().map(|&s| s as i32).collect();
        Tensor::from_data(TensorData::new(data, [symbols.len()]), device)
    }

    /// Teacher-forced logits over the targets, [batch, time, vocab].
    pub fn teacher_forced_logits(&self, batch: &DecoderBatch<B>) -> Result<Tensor<B, 3>, DataError> {
        let targets = batch
            .targets
            .as_ref()
            .ok_or_else(|| DataError::MissingTargets(self.data_id.0.clone()))?;
        let device = batch.encoded.output.device();
        let time = targets.indices.first().map(|r| r.len()).unwrap_or(0);

        let mut state = self.start_state(&batch.encoded, batch.train);
        let mut previous = vec![START_INDEX; targets.indices.len()];
        let mut steps = Vec::with_capacity(time);
        for t in 0..time {
            let (next, logits) = self.step(&state, Self::symbols_tensor(&previous, &device), batch.train);
            state = next;
            steps.push(logits);
            previous = targets.indices.iter().map(|row| row[t]).collect();
        }
        Ok(Tensor::stack::<3>(steps, 1))
    }

    /// Greedy decoding plus, when targets are bound, the cross-entropy.
    pub fn run(&self, batch: &DecoderBatch<B>, rng: &mut StdRng) -> Result<SequenceOutput<B>, DataError> {
        let history = self.decoding_loop(batch, DecodingMode::Greedy, batch.train, rng);
        let loss = match batch.targets {
            Some(_) => Some(self.cross_entropy(batch)?),
            None => None,
        };
        Ok(SequenceOutput {
            symbols: history.symbols,
            loss,
        })
    }
}

impl<B: Backend> ModelPart for RecurrentDecoder<B> {
    fn name(&self) -> &str {
        &self.name.0
    }

    fn dependencies(&self) -> BTreeSet<String> {
        self.dependencies.0.clone()
    }
}

impl<B: Backend> StochasticDecoder<B> for RecurrentDecoder<B> {
    type Batch = DecoderBatch<B>;

    fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary.0
    }

    fn data_id(&self) -> &str {
        &self.data_id.0
    }

    fn batch_size(&self, batch: &DecoderBatch<B>) -> usize {
        batch.encoded.batch_size()
    }

    /// Run until every example emitted the end symbol or the length limit
    /// is reached. Examples that finished early keep decoding; scoring cuts
    /// them at their first end symbol.
    fn decoding_loop(
        &self,
        batch: &DecoderBatch<B>,
        mode: DecodingMode,
        train: bool,
        rng: &mut StdRng,
    ) -> DecodingHistory<B> {
        let device = batch.encoded.output.device();
        let batch_size = batch.encoded.batch_size();
        let vocab = self.vocabulary.0.len();

        let mut state = self.start_state(&batch.encoded, train);
        let mut previous = vec![START_INDEX; batch_size];
        let mut finished = vec![false; batch_size];
        let mut logits_steps = Vec::with_capacity(self.max_output_len);
        let mut symbol_steps = Vec::with_capacity(self.max_output_len);
        let mut sampled = vec![Vec::with_capacity(self.max_output_len); batch_size];

        for _ in 0..self.max_output_len {
            let (next, logits) = self.step(&state, Self::symbols_tensor(&previous, &device), train);
            state = next;

            let scores = host_values(logits.clone().detach());
            let chosen = match mode {
                DecodingMode::Greedy => argmax_rows(&scores, vocab),
                DecodingMode::Sample { temperature } => {
                    sample_rows(&softmax_rows(&scores, vocab, temperature), vocab, rng)
                }
            };

            for (b, &symbol) in chosen.iter().enumerate() {
                sampled[b].push(symbol);
                finished[b] |= symbol == END_INDEX;
            }
            logits_steps.push(logits);
            symbol_steps.push(Self::symbols_tensor(&chosen, &device));
            previous = chosen;

            if finished.iter().all(|&f| f) {
                break;
            }
        }

        DecodingHistory {
            logits: Tensor::stack::<3>(logits_steps, 0),
            symbols: Tensor::stack::<2>(symbol_steps, 0),
            sampled,
        }
    }

    fn train_inputs(&self, batch: &DecoderBatch<B>) -> Result<Vec<Vec<usize>>, DataError> {
        batch
            .targets
            .as_ref()
            .map(|t| t.indices.clone())
            .ok_or_else(|| DataError::MissingTargets(self.data_id.0.clone()))
    }

    fn cross_entropy(&self, batch: &DecoderBatch<B>) -> Result<Tensor<B, 1>, DataError> {
        let logits = self.teacher_forced_logits(batch)?;
        let targets = batch
            .targets
            .as_ref()
            .ok_or_else(|| DataError::MissingTargets(self.data_id.0.clone()))?;
        let device = logits.device();
        Ok(sequence_cross_entropy(
            logits,
            indices_to_tensor(&targets.indices, &device),
            &targets.lengths,
        ))
    }
}
