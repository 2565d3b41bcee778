//! Recurrent sequence models on burn: encoders, a sequence decoder, a
//! regression head, a reward-driven objective and numpy readers.
//!
//! Model parts are built from `Config` structs whose `init` validates the
//! configuration. Each part runs once per batch; training mode is an
//! argument of every call, never state.

pub mod checkpoint;
pub mod data;
pub mod error;
pub mod model;
pub mod training;

pub use error::{CheckpointError, ConfigError, DataError, Error, ReaderError, Result};
pub use model::{ModelPart, TemporalStateful};
