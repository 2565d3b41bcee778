//! Encoder → decoder training with cross-entropy and with the reward objective.

use std::sync::Arc;

use burn::backend::{Autodiff, NdArray};
use burn::module::Module;
use burn::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use seqtrain::data::{Dataset, Series};
use seqtrain::model::decoder::{DecoderOutputs, RecurrentDecoder, RecurrentDecoderConfig, StochasticDecoder};
use seqtrain::model::encoder::{SentenceEncoder, SentenceEncoderConfig, SequenceEncoder};
use seqtrain::model::vocab::Vocabulary;
use seqtrain::training::supervised::{create_optimizer, train_step, SupervisedConfig};
use seqtrain::training::{ReinforceConfig, SentenceBleu};

type B = Autodiff<NdArray>;

#[derive(Module, Debug)]
struct Translator<B: Backend> {
    encoder: SentenceEncoder<B>,
    decoder: RecurrentDecoder<B>,
}

fn words(s: &str) -> Vec<String> {
    s.split_whitespace().map(String::from).collect()
}

fn setup() -> (Translator<B>, Dataset) {
    let device = Default::default();
    let source = vec![words("ein kleines haus"), words("ein hund"), words("das haus")];
    let target = vec![words("a small house"), words("a dog"), words("the house")];
    let src_vocab = Arc::new(Vocabulary::from_sentences(&source, 1));
    let tgt_vocab = Arc::new(Vocabulary::from_sentences(&target, 1));
    let data = Dataset::new("train")
        .with_series("source", Series::Sentences(source))
        .and_then(|d| d.with_series("target", Series::Sentences(target)))
        .unwrap();

    let encoder = SentenceEncoderConfig::new("encoder".into(), "source".into(), 8, 8)
        .init::<B>(src_vocab, &device)
        .unwrap();
    let decoder = RecurrentDecoderConfig::new("decoder".into(), "target".into(), 8, 16)
        .with_max_output_len(5)
        .init(tgt_vocab, &encoder, &device)
        .unwrap();
    (Translator { encoder, decoder }, data)
}

#[test]
fn cross_entropy_training_reduces_loss() {
    let device = Default::default();
    let (mut model, data) = setup();
    let config = SupervisedConfig {
        lr: 2e-2,
        ..SupervisedConfig::default()
    };
    let mut optimizer = create_optimizer::<B, Translator<B>>(&config);

    let mut losses = Vec::new();
    for _ in 0..40 {
        let encoded = model.encoder.encode(&data, true, &device).unwrap();
        let batch = model.decoder.feed(&data, &encoded, true).unwrap();
        let loss = model.decoder.cross_entropy(&batch).unwrap();
        let (next, value) = train_step(model, loss, &mut optimizer, config.lr);
        model = next;
        losses.push(value);
    }

    assert!(losses.iter().all(|l| l.is_finite()));
    assert!(
        losses[losses.len() - 1] < losses[0],
        "first {} last {}",
        losses[0],
        losses[losses.len() - 1]
    );
}

#[test]
fn reinforce_steps_update_the_model() {
    let device = Default::default();
    let (mut model, data) = setup();
    let config = SupervisedConfig::default();
    let mut optimizer = create_optimizer::<B, Translator<B>>(&config);
    let mut objective = ReinforceConfig::new()
        .with_subtract_baseline(true)
        .with_sample_size(2)
        .with_ce_smoothing(0.1)
        .init(&model.decoder, Box::new(SentenceBleu::default()))
        .unwrap();
    assert_eq!(objective.name(), "decoder_rl");

    for step in 0..3 {
        let encoded = model.encoder.encode(&data, true, &device).unwrap();
        let batch = model.decoder.feed(&data, &encoded, true).unwrap();
        let result = objective.loss::<B, _>(&model.decoder, &batch, step).unwrap();

        assert!(result.loss_value.is_finite());
        assert!((0.0..=1.0).contains(&result.mean_reward));
        assert!(result.baseline.is_some());

        let (next, _) = train_step(model, result.loss, &mut optimizer, config.lr);
        model = next;
    }
    assert_eq!(objective.baseline().count(), 3 * 3 * 2);
}

#[test]
fn inference_without_targets_decodes() {
    let device = Default::default();
    let (model, _) = setup();
    let unlabeled = Dataset::new("test")
        .with_series("source", Series::Sentences(vec![words("das hund")]))
        .unwrap();

    let encoded = model.encoder.encode(&unlabeled, false, &device).unwrap();
    let batch = model.decoder.feed(&unlabeled, &encoded, false).unwrap();
    let output = model.decoder.run(&batch, &mut StdRng::seed_from_u64(0)).unwrap();

    assert!(output.train_loss().is_none());
    let [time, batch_size] = output.symbols.dims();
    assert!(time <= 5);
    assert_eq!(batch_size, 1);
}
