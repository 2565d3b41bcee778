//! Word vocabulary with reserved special tokens.
//!
//! Index 0 is padding, so a padded index matrix doubles as its own mask.

use std::collections::HashMap;

pub const PAD_TOKEN: &str = "<pad>";
pub const START_TOKEN: &str = "<s>";
pub const END_TOKEN: &str = "</s>";
pub const UNK_TOKEN: &str = "<unk>";

pub const PAD_INDEX: usize = 0;
pub const START_INDEX: usize = 1;
pub const END_INDEX: usize = 2;
pub const UNK_INDEX: usize = 3;

const SPECIAL_TOKENS: [&str; 4] = [PAD_TOKEN, START_TOKEN, END_TOKEN, UNK_TOKEN];

/// Bidirectional word ↔ index mapping.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    words: Vec<String>,
    index: HashMap<String, usize>,
}

/// Padded index rows plus the true length of every row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedBatch {
    /// `[batch][time]`, padded with `PAD_INDEX` to the longest row (at least 1).
    pub indices: Vec<Vec<usize>>,
    pub lengths: Vec<usize>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new()
    }
}

impl Vocabulary {
    /// Vocabulary holding only the special tokens.
    pub fn new() -> Self {
        let mut vocab = Self {
            words: Vec::new(),
            index: HashMap::new(),
        };
        for token in SPECIAL_TOKENS {
            vocab.add_word(token);
        }
        vocab
    }

    /// Build from tokenized sentences, keeping words seen at least `min_count` times.
    ///
    /// Words are added in order of first appearance.
    pub fn from_sentences<'a, I>(sentences: I, min_count: usize) -> Self
    where
        I: IntoIterator<Item = &'a Vec<String>>,
    {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();
        for sentence in sentences {
            for word in sentence {
                let count = counts.entry(word.as_str()).or_insert(0);
                if *count == 0 {
                    order.push(word.as_str());
                }
                *count += 1;
            }
        }

        let mut vocab = Self::new();
        for word in order {
            if counts[word] >= min_count {
                vocab.add_word(word);
            }
        }
        vocab
    }

    /// Add a word if missing and return its index.
    pub fn add_word(&mut self, word: &str) -> usize {
        if let Some(&idx) = self.index.get(word) {
            return idx;
        }
        let idx = self.words.len();
        self.words.push(word.to_string());
        self.index.insert(word.to_string(), idx);
        idx
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Index of a word, `UNK_INDEX` when unknown.
    pub fn word_to_index(&self, word: &str) -> usize {
        self.index.get(word).copied().unwrap_or(UNK_INDEX)
    }

    /// Word at an index, `UNK_TOKEN` when out of range.
    pub fn index_to_word(&self, index: usize) -> &str {
        self.words
            .get(index)
            .map(|w| w.as_str())
            .unwrap_or(UNK_TOKEN)
    }

    /// Convert sentences to a padded index matrix.
    ///
    /// Sentences longer than `max_len` are truncated before the optional
    /// start/end symbols are added.
    pub fn sentences_to_indices(
        &self,
        sentences: &[Vec<String>],
        max_len: Option<usize>,
        add_start: bool,
        add_end: bool,
    ) -> IndexedBatch {
        let mut indices: Vec<Vec<usize>> = sentences
            .iter()
            .map(|sentence| {
                let take = max_len.unwrap_or(sentence.len()).min(sentence.len());
                let mut row = Vec::with_capacity(take + 2);
                if add_start {
                    row.push(START_INDEX);
                }
                row.extend(sentence[..take].iter().map(|w| self.word_to_index(w)));
                if add_end {
                    row.push(END_INDEX);
                }
                row
            })
            .collect();

        let lengths: Vec<usize> = indices.iter().map(|row| row.len()).collect();
        let width = lengths.iter().copied().max().unwrap_or(0).max(1);
        for row in &mut indices {
            row.resize(width, PAD_INDEX);
        }

        IndexedBatch { indices, lengths }
    }

    /// Words of an index sequence, stopping at the first end or pad symbol.
    pub fn decode(&self, indices: &[usize]) -> Vec<String> {
        indices
            .iter()
            .take_while(|&&idx| idx != END_INDEX && idx != PAD_INDEX)
            .map(|&idx| self.index_to_word(idx).to_string())
            .collect()
    }
}
