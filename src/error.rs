//! Error types.
//!
//! Configuration problems are caught when a model part is built; data and
//! reader problems surface when a batch is fed. Nothing here is retried.

use std::path::PathBuf;

use thiserror::Error;

/// Invalid model or objective configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// RNN size must be positive.
    #[error("RNN size must be a positive integer. {0} given.")]
    InvalidRnnSize(usize),

    /// Direction outside {forward, backward, both}.
    #[error("RNN direction must be one of [\"forward\", \"backward\", \"both\"]. {0} given.")]
    InvalidDirection(String),

    /// Cell type outside {GRU, LSTM, NematusGRU}.
    #[error("RNN cell type must be one of [\"NematusGRU\", \"GRU\", \"LSTM\"]. {0} given.")]
    InvalidCellType(String),

    /// Dropout keep probability outside (0, 1].
    #[error("Dropout keep prob must be inside (0,1]. {0} given.")]
    DropoutOutOfRange(f64),

    /// Deep encoder got a different number of sizes and directions.
    #[error("Different number of rnn sizes ({sizes}) and directions ({directions}).")]
    LayerCountMismatch { sizes: usize, directions: usize },

    /// Deep encoder got no layers at all.
    #[error("Deep encoder needs at least one layer.")]
    NoLayers,

    /// Factored encoder lists disagree in length.
    #[error("Factor lists differ in length: {vocabularies} vocabularies, {data_ids} data ids, {embedding_sizes} embedding sizes.")]
    FactorCountMismatch {
        vocabularies: usize,
        data_ids: usize,
        embedding_sizes: usize,
    },

    /// Regressor needs two encoders to take the difference of.
    #[error("Regressor needs at least two encoders, {0} given.")]
    TooFewEncoders(usize),

    /// The two regressor encoders produce summaries of different width.
    #[error("Encoder output sizes differ: {first} vs {second}.")]
    EncoderSizeMismatch { first: usize, second: usize },

    /// An objective parameter is out of its domain.
    #[error("Invalid value for {field}: {reason}")]
    InvalidParameter { field: &'static str, reason: String },
}

/// Problems binding dataset series to a batch.
#[derive(Debug, Error, PartialEq)]
pub enum DataError {
    /// A required series is absent from the dataset.
    #[error("Series '{series}' not found in dataset '{dataset}'")]
    MissingSeries { dataset: String, series: String },

    /// The series exists but holds the wrong kind of values.
    #[error("Series '{series}' holds {found}, expected {expected}")]
    SeriesKind {
        series: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Series lengths disagree inside one dataset.
    #[error("Series '{series}' has {found} examples, dataset has {expected}")]
    SeriesLength {
        series: String,
        expected: usize,
        found: usize,
    },

    /// A regression target could not be read as a number.
    #[error("Example {index} of series '{series}' is not a number: {value:?}")]
    NotANumber {
        series: String,
        index: usize,
        value: String,
    },

    /// Factor sequences of one example have different lengths.
    #[error("Factor '{series}' has length {found} at example {index}, expected {expected}")]
    FactorLengthMismatch {
        series: String,
        index: usize,
        expected: usize,
        found: usize,
    },

    /// Targets were required but the batch has none.
    #[error("Batch has no targets for '{0}'")]
    MissingTargets(String),

    /// Fewer encoder outputs were supplied than the part needs.
    #[error("Expected {expected} encoder outputs, got {found}")]
    EncoderCount { expected: usize, found: usize },
}

/// Failures loading numpy tensors.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("no input files given")]
    NoFiles,

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Npy {
        path: PathBuf,
        #[source]
        source: ndarray_npy::ReadNpyError,
    },

    #[error("{path}: {source}")]
    Npz {
        path: PathBuf,
        #[source]
        source: ndarray_npy::ReadNpzError,
    },

    #[error("{path}: no entry named '{name}'")]
    MissingEntry { path: PathBuf, name: String },

    /// Loaded array does not have the declared shape.
    #[error("Shapes do not match: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("cannot concatenate along axis 0: {0}")]
    Concatenate(#[from] ndarray::ShapeError),
}

/// Failures writing or reading model records.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("mkdir {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("save {path}: {reason}")]
    Save { path: PathBuf, reason: String },

    #[error("load {path}: {reason}")]
    Load { path: PathBuf, reason: String },
}

/// Any error raised by this crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
