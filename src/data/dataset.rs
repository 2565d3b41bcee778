//! In-memory dataset: a set of equally long named series.

use std::collections::HashMap;
use std::ops::Range;

use ndarray::ArrayD;

use crate::error::DataError;

/// One column of examples.
#[derive(Debug, Clone, PartialEq)]
pub enum Series {
    /// Tokenized sentences.
    Sentences(Vec<Vec<String>>),
    /// One number per example.
    Scalars(Vec<f32>),
    /// One precomputed tensor per example.
    Tensors(Vec<ArrayD<f32>>),
}

impl Series {
    pub fn len(&self) -> usize {
        match self {
            Self::Sentences(v) => v.len(),
            Self::Scalars(v) => v.len(),
            Self::Tensors(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sentences(_) => "sentences",
            Self::Scalars(_) => "scalars",
            Self::Tensors(_) => "tensors",
        }
    }

    fn slice(&self, range: Range<usize>) -> Self {
        match self {
            Self::Sentences(v) => Self::Sentences(v[range].to_vec()),
            Self::Scalars(v) => Self::Scalars(v[range].to_vec()),
            Self::Tensors(v) => Self::Tensors(v[range].to_vec()),
        }
    }
}

/// Named collection of series sharing one example count.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    name: String,
    series: HashMap<String, Series>,
    len: usize,
}

impl Dataset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            series: HashMap::new(),
            len: 0,
        }
    }

    /// Add a series. The first series fixes the example count.
    pub fn with_series(mut self, key: impl Into<String>, series: Series) -> Result<Self, DataError> {
        let key = key.into();
        if !self.series.is_empty() && series.len() != self.len {
            return Err(DataError::SeriesLength {
                series: key,
                expected: self.len,
                found: series.len(),
            });
        }
        self.len = series.len();
        self.series.insert(key, series);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn has_series(&self, key: &str) -> bool {
        self.series.contains_key(key)
    }

    /// Fetch a series. Absent series are `Ok(None)` when `allow_none`,
    /// an error otherwise.
    pub fn get_series(&self, key: &str, allow_none: bool) -> Result<Option<&Series>, DataError> {
        match self.series.get(key) {
            Some(series) => Ok(Some(series)),
            None if allow_none => Ok(None),
            None => Err(self.missing(key)),
        }
    }

    /// Fetch a series that must be present.
    pub fn require_series(&self, key: &str) -> Result<&Series, DataError> {
        self.series.get(key).ok_or_else(|| self.missing(key))
    }

    /// Fetch a sentence series that must be present.
    pub fn sentences(&self, key: &str) -> Result<&[Vec<String>], DataError> {
        match self.require_series(key)? {
            Series::Sentences(s) => Ok(s),
            other => Err(DataError::SeriesKind {
                series: key.to_string(),
                expected: "sentences",
                found: other.kind(),
            }),
        }
    }

    /// Split into consecutive batches of at most `batch_size` examples.
    pub fn batches(&self, batch_size: usize) -> Vec<Dataset> {
        let size = batch_size.max(1);
        (0..self.len)
            .step_by(size)
            .map(|start| {
                let range = start..(start + size).min(self.len);
                Dataset {
                    name: format!("{}[{}..{}]", self.name, range.start, range.end),
                    series: self
                        .series
                        .iter()
                        .map(|(k, s)| (k.clone(), s.slice(range.clone())))
                        .collect(),
                    len: range.len(),
                }
            })
            .collect()
    }

    fn missing(&self, key: &str) -> DataError {
        DataError::MissingSeries {
            dataset: self.name.clone(),
            series: key.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> Dataset {
        Dataset::new("toy")
            .with_series(
                "source",
                Series::Sentences(vec![
                    vec!["a".into()],
                    vec!["b".into(), "c".into()],
                    vec!["d".into()],
                ]),
            )
            .and_then(|d| d.with_series("score", Series::Scalars(vec![0.0, 1.0, 2.0])))
            .unwrap()
    }

    #[test]
    fn missing_series_allowed_or_rejected() {
        let data = toy();
        assert!(data.get_series("target", true).unwrap().is_none());
        assert!(matches!(
            data.get_series("target", false),
            Err(DataError::MissingSeries { .. })
        ));
        assert!(data.get_series("source", false).unwrap().is_some());
    }

    #[test]
    fn length_mismatch_rejected() {
        let err = toy()
            .with_series("bad", Series::Scalars(vec![1.0]))
            .unwrap_err();
        assert_eq!(
            err,
            DataError::SeriesLength {
                series: "bad".into(),
                expected: 3,
                found: 1
            }
        );
    }

    #[test]
    fn batches_cover_all_examples() {
        let batches = toy().batches(2);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 1);
        assert_eq!(
            batches[1].get_series("score", false).unwrap(),
            Some(&Series::Scalars(vec![2.0]))
        );
    }

    #[test]
    fn sentences_checks_kind() {
        let data = toy();
        assert_eq!(data.sentences("source").unwrap().len(), 3);
        assert!(matches!(
            data.sentences("score"),
            Err(DataError::SeriesKind { .. })
        ));
    }
}
