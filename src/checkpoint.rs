//! Model part checkpoints.
//!
//! Each part is stored under its own name in burn's NamedMpk record
//! format with full precision, so parts can be restored independently.

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use tracing::info;

use crate::error::CheckpointError;

/// Path of a part's record file (burn appends the `.mpk` extension).
pub fn part_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.mpk"))
}

/// Save a model part as `{dir}/{name}.mpk`, creating `dir` if needed.
pub fn save_part<B: Backend, M: Module<B> + Clone>(
    module: &M,
    dir: &Path,
    name: &str,
) -> Result<PathBuf, CheckpointError> {
    std::fs::create_dir_all(dir).map_err(|source| CheckpointError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let stem = dir.join(name);
    let path = part_path(dir, name);
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    module
        .clone()
        .save_file(stem, &recorder)
        .map_err(|e| CheckpointError::Save {
            path: path.clone(),
            reason: e.to_string(),
        })?;

    info!(part = name, path = %path.display(), "saved checkpoint");
    Ok(path)
}

/// Load a part's weights into `module`.
///
/// Returns `None` if no record exists for `name`.
pub fn load_part<B: Backend, M: Module<B>>(
    module: M,
    dir: &Path,
    name: &str,
    device: &B::Device,
) -> Result<Option<M>, CheckpointError> {
    let path = part_path(dir, name);
    if !path.exists() {
        return Ok(None);
    }

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let loaded = module
        .load_file(dir.join(name), &recorder, device)
        .map_err(|e| CheckpointError::Load {
            path: path.clone(),
            reason: e.to_string(),
        })?;

    Ok(Some(loaded))
}

/// Names among `names` that have a record in `dir`.
pub fn available_parts<'a>(dir: &Path, names: &[&'a str]) -> Vec<&'a str> {
    names
        .iter()
        .copied()
        .filter(|name| part_path(dir, name).exists())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::encoder::{RecurrentEncoderConfig, SentenceEncoderConfig};
    use crate::model::host_values;
    use crate::model::vocab::Vocabulary;
    use crate::model::ModelPart;
    use burn::backend::NdArray;
    use std::sync::Arc;

    type B = NdArray;

    fn encoder() -> crate::model::encoder::SentenceEncoder<B> {
        let vocab = Arc::new(Vocabulary::from_sentences(&[vec!["a".to_string(), "b".to_string()]], 1));
        SentenceEncoderConfig::new("encoder".into(), "source".into(), 4, 3)
            .with_rnn_cell("LSTM".into())
            .init(vocab, &Default::default())
            .unwrap()
    }

    #[test]
    fn dotted_names_keep_their_suffix() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(part_path(dir.path(), "enc.v1"), dir.path().join("enc.v1.mpk"));

        let saved = encoder();
        let path = save_part(&saved, dir.path(), "enc.v1").unwrap();
        assert!(path.exists());
        assert_eq!(available_parts(dir.path(), &["enc", "enc.v1"]), vec!["enc.v1"]);
        assert!(load_part(encoder(), dir.path(), "enc.v1", &Default::default())
            .unwrap()
            .is_some());
    }

    #[test]
    fn missing_part_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_part(encoder(), dir.path(), "encoder", &Default::default()).unwrap();
        assert!(loaded.is_none());
        assert!(available_parts(dir.path(), &["encoder"]).is_empty());
    }

    #[test]
    fn encoder_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let saved = encoder();
        let path = save_part(&saved, dir.path(), saved.name()).unwrap();
        assert!(path.exists());
        assert_eq!(available_parts(dir.path(), &["encoder", "decoder"]), vec!["encoder"]);

        let fresh = encoder();
        let restored = load_part(fresh, dir.path(), "encoder", &Default::default())
            .unwrap()
            .unwrap();

        let device = Default::default();
        let input = crate::model::sequence::TemporalStates::<B> {
            states: Tensor::ones([1, 2, 4], &device),
            mask: Tensor::ones([1, 2], &device),
            lengths: vec![2],
        };
        let a = saved.encoder().forward(&input, false).output;
        let b = restored.encoder().forward(&input, false).output;
        assert_eq!(host_values(a), host_values(b));

        // configuration records stay loadable too
        let config = RecurrentEncoderConfig::new("e".into(), 3);
        let config_path = dir.path().join("encoder.json");
        config.save(&config_path).unwrap();
        let back = RecurrentEncoderConfig::load(&config_path).unwrap();
        assert_eq!(back.rnn_size, 3);
        assert_eq!(back.rnn_direction, "both");
    }
}
