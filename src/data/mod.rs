//! Datasets and the numpy readers that fill them.

pub mod dataset;
pub mod numpy;

pub use dataset::{Dataset, Series};
pub use numpy::{single_tensor, FileListArrays, FromFileList};
