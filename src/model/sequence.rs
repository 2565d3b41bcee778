//! Embedded token sequences: the inputs recurrent encoders read from.

use std::sync::Arc;

use burn::config::Config;
use burn::module::{Ignored, Module};
use burn::nn::{Embedding, EmbeddingConfig};
use burn::prelude::*;

use super::cell::sequence_mask;
use super::vocab::{IndexedBatch, Vocabulary};
use super::{ModelPart, TemporalStateful};
use crate::data::dataset::Dataset;
use crate::error::{ConfigError, DataError};

/// Per-position states with their validity.
#[derive(Debug, Clone)]
pub struct TemporalStates<B: Backend> {
    /// [batch, time, dim]
    pub states: Tensor<B, 3>,
    /// [batch, time], 1.0 on valid positions
    pub mask: Tensor<B, 2>,
    pub lengths: Vec<usize>,
}

/// Token indices bound from a dataset.
#[derive(Debug, Clone)]
pub struct TokenBatch<B: Backend> {
    /// One [batch, time] index matrix per factor.
    pub factors: Vec<Tensor<B, 2, Int>>,
    pub lengths: Vec<usize>,
}

impl<B: Backend> TokenBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.lengths.len()
    }
}

/// Upload a padded index matrix.
pub fn indices_to_tensor<B: Backend>(indices: &[Vec<usize>], device: &B::Device) -> Tensor<B, 2, Int> {
    let batch = indices.len();
    let time = indices.first().map(|r| r.len()).unwrap_or(0);
    let data: Vec<i32> = indices.iter().flatten().map(|&i| i as i32).collect();
    Tensor::from_data(TensorData::new(data, [batch, time]), device)
}

// ─── Single factor ────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct EmbeddedSequenceConfig {
    pub name: String,
    /// Dataset series holding the tokenized sentences.
    pub data_id: String,
    pub embedding_size: usize,
    /// Sentences are truncated to this many tokens.
    #[config(default = "None")]
    pub max_length: Option<usize>,
}

/// Token embedding over one vocabulary.
#[derive(Module, Debug)]
pub struct EmbeddedSequence<B: Backend> {
    name: Ignored<String>,
    data_id: Ignored<String>,
    vocabulary: Ignored<Arc<Vocabulary>>,
    max_length: Option<usize>,
    embedding: Embedding<B>,
    embedding_size: usize,
}

impl EmbeddedSequenceConfig {
    pub fn init<B: Backend>(
        &self,
        vocabulary: Arc<Vocabulary>,
        device: &B::Device,
    ) -> Result<EmbeddedSequence<B>, ConfigError> {
        if self.embedding_size == 0 {
            return Err(ConfigError::InvalidParameter {
                field: "embedding_size",
                reason: "must be positive".into(),
            });
        }
        Ok(EmbeddedSequence {
            name: Ignored(self.name.clone()),
            data_id: Ignored(self.data_id.clone()),
            max_length: self.max_length,
            embedding: EmbeddingConfig::new(vocabulary.len(), self.embedding_size).init(device),
            embedding_size: self.embedding_size,
            vocabulary: Ignored(vocabulary),
        })
    }
}

impl<B: Backend> EmbeddedSequence<B> {
    pub fn data_id(&self) -> &str {
        &self.data_id.0
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary.0
    }

    fn index(&self, dataset: &Dataset) -> Result<IndexedBatch, DataError> {
        let sentences = dataset.sentences(self.data_id())?;
        Ok(self
            .vocabulary()
            .sentences_to_indices(sentences, self.max_length, false, false))
    }

    /// Bind this part's series from a dataset.
    pub fn feed(&self, dataset: &Dataset, device: &B::Device) -> Result<TokenBatch<B>, DataError> {
        let indexed = self.index(dataset)?;
        Ok(TokenBatch {
            factors: vec![indices_to_tensor(&indexed.indices, device)],
            lengths: indexed.lengths,
        })
    }

    /// Embed a single-factor batch.
    pub fn forward(&self, batch: &TokenBatch<B>) -> TemporalStates<B> {
        let ids = batch.factors[0].clone();
        let [_, time] = ids.dims();
        let device = ids.device();
        TemporalStates {
            states: self.embedding.forward(ids),
            mask: sequence_mask(&batch.lengths, time, &device),
            lengths: batch.lengths.clone(),
        }
    }
}

impl<B: Backend> ModelPart for EmbeddedSequence<B> {
    fn name(&self) -> &str {
        &self.name.0
    }
}

impl<B: Backend> TemporalStateful for EmbeddedSequence<B> {
    fn temporal_size(&self) -> usize {
        self.embedding_size
    }
}

// ─── Multiple factors ─────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct EmbeddedFactorSequenceConfig {
    pub name: String,
    pub data_ids: Vec<String>,
    pub embedding_sizes: Vec<usize>,
    #[config(default = "None")]
    pub max_length: Option<usize>,
}

/// Parallel token streams (word, tag, ...) embedded and concatenated.
#[derive(Module, Debug)]
pub struct EmbeddedFactorSequence<B: Backend> {
    name: Ignored<String>,
    data_ids: Ignored<Vec<String>>,
    vocabularies: Ignored<Vec<Arc<Vocabulary>>>,
    max_length: Option<usize>,
    embeddings: Vec<Embedding<B>>,
    embedding_size: usize,
}

impl EmbeddedFactorSequenceConfig {
    pub fn init<B: Backend>(
        &self,
        vocabularies: Vec<Arc<Vocabulary>>,
        device: &B::Device,
    ) -> Result<EmbeddedFactorSequence<B>, ConfigError> {
        if vocabularies.len() != self.data_ids.len()
            || self.data_ids.len() != self.embedding_sizes.len()
            || vocabularies.is_empty()
        {
            return Err(ConfigError::FactorCountMismatch {
                vocabularies: vocabularies.len(),
                data_ids: self.data_ids.len(),
                embedding_sizes: self.embedding_sizes.len(),
            });
        }
        if self.embedding_sizes.contains(&0) {
            return Err(ConfigError::InvalidParameter {
                field: "embedding_sizes",
                reason: "must all be positive".into(),
            });
        }

        let embeddings = vocabularies
            .iter()
            .zip(&self.embedding_sizes)
            .map(|(vocab, &size)| EmbeddingConfig::new(vocab.len(), size).init(device))
            .collect();

        Ok(EmbeddedFactorSequence {
            name: Ignored(self.name.clone()),
            data_ids: Ignored(self.data_ids.clone()),
            vocabularies: Ignored(vocabularies),
            max_length: self.max_length,
            embeddings,
            embedding_size: self.embedding_sizes.iter().sum(),
        })
    }
}

impl<B: Backend> EmbeddedFactorSequence<B> {
    /// Bind every factor. All factors must agree on each example's length.
    pub fn feed(&self, dataset: &Dataset, device: &B::Device) -> Result<TokenBatch<B>, DataError> {
        let mut factors = Vec::with_capacity(self.data_ids.0.len());
        let mut lengths: Option<Vec<usize>> = None;

        for (data_id, vocab) in self.data_ids.0.iter().zip(&self.vocabularies.0) {
            let sentences = dataset.sentences(data_id)?;
            let indexed = vocab.sentences_to_indices(sentences, self.max_length, false, false);
            match &lengths {
                None => lengths = Some(indexed.lengths.clone()),
                Some(expected) => {
                    if let Some((index, (&e, &f))) = expected
                        .iter()
                        .zip(&indexed.lengths)
                        .enumerate()
                        .find(|(_, (e, f))| e != f)
                    {
                        return Err(DataError::FactorLengthMismatch {
                            series: data_id.clone(),
                            index,
                            expected: e,
                            found: f,
                        });
                    }
                }
            }
            factors.push(indices_to_tensor(&indexed.indices, device));
        }

        Ok(TokenBatch {
            factors,
            lengths: lengths.unwrap_or_default(),
        })
    }

    pub fn forward(&self, batch: &TokenBatch<B>) -> TemporalStates<B> {
        let embedded: Vec<Tensor<B, 3>> = self
            .embeddings
            .iter()
            .zip(&batch.factors)
            .map(|(embedding, ids)| embedding.forward(ids.clone()))
            .collect();
        let [_, time] = batch.factors[0].dims();
        let device = batch.factors[0].device();
        TemporalStates {
            states: Tensor::cat(embedded, 2),
            mask: sequence_mask(&batch.lengths, time, &device),
            lengths: batch.lengths.clone(),
        }
    }
}

impl<B: Backend> ModelPart for EmbeddedFactorSequence<B> {
    fn name(&self) -> &str {
        &self.name.0
    }
}

impl<B: Backend> TemporalStateful for EmbeddedFactorSequence<B> {
    fn temporal_size(&self) -> usize {
        self.embedding_size
    }
}
