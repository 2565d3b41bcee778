//! Sentence-pair regression with targets read from numpy files.

use std::sync::Arc;

use burn::backend::{Autodiff, NdArray};
use burn::module::Module;
use burn::prelude::*;
use burn::tensor::ElementConversion;
use ndarray::{arr1, ArrayD};
use ndarray_npy::write_npy;

use seqtrain::checkpoint::{load_part, save_part};
use seqtrain::data::{single_tensor, Dataset, Series};
use seqtrain::model::decoder::DecoderOutputs;
use seqtrain::model::encoder::{SentenceEncoder, SentenceEncoderConfig, SequenceEncoder};
use seqtrain::model::nn::Activation;
use seqtrain::model::regressor::{SequenceRegressor, SequenceRegressorConfig};
use seqtrain::model::vocab::Vocabulary;
use seqtrain::training::supervised::{create_optimizer, train_step, SupervisedConfig};
use seqtrain::ModelPart;

type B = Autodiff<NdArray>;

#[derive(Module, Debug)]
struct Similarity<B: Backend> {
    first: SentenceEncoder<B>,
    second: SentenceEncoder<B>,
    regressor: SequenceRegressor<B>,
}

impl<B: Backend> Similarity<B> {
    fn loss(&self, data: &Dataset, device: &B::Device) -> Tensor<B, 1> {
        let a = self.first.encode(data, true, device).unwrap();
        let b = self.second.encode(data, true, device).unwrap();
        let feed = self.regressor.feed(data, true, device).unwrap();
        let output = self.regressor.forward(&[&a, &b], &feed).unwrap();
        output.train_loss().unwrap()
    }
}

fn words(s: &str) -> Vec<String> {
    s.split_whitespace().map(String::from).collect()
}

fn dataset(dir: &std::path::Path) -> Dataset {
    // targets come split over two files
    let head = dir.join("scores_0.npy");
    let tail = dir.join("scores_1.npy");
    write_npy(&head, &arr1(&[0.9f32, 0.1]).into_dyn()).unwrap();
    write_npy(&tail, &arr1(&[0.5f32]).into_dyn()).unwrap();
    let scores: ArrayD<f32> = single_tensor(&[head, tail]).unwrap();
    assert_eq!(scores.shape(), &[3]);

    Dataset::new("sts")
        .with_series(
            "left",
            Series::Sentences(vec![words("a man plays"), words("a cat sleeps"), words("kids run")]),
        )
        .and_then(|d| {
            d.with_series(
                "right",
                Series::Sentences(vec![words("a man is playing"), words("the sun rises"), words("children run")]),
            )
        })
        .and_then(|d| d.with_series("score", Series::Scalars(scores.iter().copied().collect())))
        .unwrap()
}

fn build_model(vocab: Arc<Vocabulary>, device: &<B as Backend>::Device) -> Similarity<B> {
    let first = SentenceEncoderConfig::new("left_encoder".into(), "left".into(), 6, 5)
        .init::<B>(vocab.clone(), device)
        .unwrap();
    let second = SentenceEncoderConfig::new("right_encoder".into(), "right".into(), 6, 5)
        .init::<B>(vocab, device)
        .unwrap();
    let regressor = SequenceRegressorConfig::new("similarity".into(), "score".into())
        .with_layers(vec![8])
        .with_activation(Activation::Relu)
        .with_dropout_keep_prob(1.0)
        .init::<B>(&[&first, &second], device)
        .unwrap();
    Similarity {
        first,
        second,
        regressor,
    }
}

#[test]
fn regressor_fits_numpy_targets() {
    let device = Default::default();
    let dir = tempfile::tempdir().unwrap();
    let data = dataset(dir.path());
    let sentences = [
        data.sentences("left").unwrap().to_vec(),
        data.sentences("right").unwrap().to_vec(),
    ]
    .concat();
    let vocab = Arc::new(Vocabulary::from_sentences(&sentences, 1));

    let mut model = build_model(vocab.clone(), &device);
    assert!(model.regressor.dependencies().contains("left_encoder_input"));
    assert!(model.regressor.dependencies().contains("right_encoder_input"));

    let config = SupervisedConfig {
        lr: 1e-2,
        ..SupervisedConfig::default()
    };
    let mut optimizer = create_optimizer::<B, Similarity<B>>(&config);
    let mut losses = Vec::new();
    for _ in 0..60 {
        let loss = model.loss(&data, &device);
        let (next, value) = train_step(model, loss, &mut optimizer, config.lr);
        model = next;
        losses.push(value);
    }
    assert!(losses.iter().all(|l| l.is_finite()));
    assert!(losses[59] < losses[0], "first {} last {}", losses[0], losses[59]);

    // the trained head survives a checkpoint round trip
    let saved = save_part(&model.regressor, dir.path(), model.regressor.name()).unwrap();
    assert!(saved.ends_with("similarity.mpk"));
    let fresh = build_model(vocab, &device);
    let restored = load_part(fresh.regressor, dir.path(), "similarity", &device)
        .unwrap()
        .unwrap();
    let restored = Similarity {
        regressor: restored,
        ..model.clone()
    };
    let a: f32 = model.loss(&data, &device).into_scalar().elem();
    let b: f32 = restored.loss(&data, &device).into_scalar().elem();
    assert!((a - b).abs() < 1e-5);
}
