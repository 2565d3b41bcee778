//! Model parts: embeddings, recurrent encoders, decoders and the regressor.
//!
//! Every part has a unique name. A part's dependencies are its own name plus,
//! recursively, those of the parts feeding it.

pub mod cell;
pub mod decoder;
pub mod encoder;
pub mod nn;
pub mod regressor;
pub mod rnn;
pub mod sequence;
pub mod vocab;

use std::collections::BTreeSet;

use burn::prelude::*;

/// A named, checkpointable piece of the model graph.
pub trait ModelPart {
    fn name(&self) -> &str;

    /// Names of this part and every part it reads from, deduplicated.
    fn dependencies(&self) -> BTreeSet<String> {
        BTreeSet::from([self.name().to_string()])
    }
}

/// A part producing one state vector per input position.
pub trait TemporalStateful {
    /// Width of each per-position state.
    fn temporal_size(&self) -> usize;
}

/// Copy a tensor's values to the host as `f32`.
pub(crate) fn host_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
    tensor.into_data().iter::<f32>().collect()
}
