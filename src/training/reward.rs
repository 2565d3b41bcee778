//! Sequence-level rewards for policy-gradient training.
//!
//! Hypotheses and references are scored example by example, in parallel
//! with rayon. A reward function sees plain word lists: special symbols are
//! cut off and BPE pieces (`"@@ "` join markers) are merged first.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::model::vocab::Vocabulary;

/// Maps one batch of hypotheses and references to a scalar reward.
///
/// Called with single-example batches by `score_with_reward_function`.
pub trait RewardFunction: Send + Sync {
    fn score(&self, hypotheses: &[Vec<String>], references: &[Vec<String>]) -> f32;
}

impl<F> RewardFunction for F
where
    F: Fn(&[Vec<String>], &[Vec<String>]) -> f32 + Send + Sync,
{
    fn score(&self, hypotheses: &[Vec<String>], references: &[Vec<String>]) -> f32 {
        self(hypotheses, references)
    }
}

/// Words of an index sequence with BPE pieces joined.
///
/// Splits on single spaces, so an empty sequence is one empty word.
pub fn postprocess(vocabulary: &Vocabulary, indices: &[usize]) -> Vec<String> {
    vocabulary
        .decode(indices)
        .join(" ")
        .replace("@@ ", "")
        .split(' ')
        .map(String::from)
        .collect()
}

/// Score every (hypothesis, reference) pair on its own.
///
/// `references` and `hypotheses` are `[batch][time]` index rows.
pub fn score_with_reward_function(
    vocabulary: &Vocabulary,
    references: &[Vec<usize>],
    hypotheses: &[Vec<usize>],
    reward: &dyn RewardFunction,
) -> Vec<f32> {
    references
        .par_iter()
        .zip(hypotheses.par_iter())
        .map(|(reference, hypothesis)| {
            let reference = postprocess(vocabulary, reference);
            let hypothesis = postprocess(vocabulary, hypothesis);
            reward.score(&[hypothesis], &[reference])
        })
        .collect()
}

// ─── BLEU ─────────────────────────────────────────────────────────

/// Smoothed sentence-level BLEU in [0, 1].
///
/// Orders above one get add-one smoothing so short hypotheses do not
/// collapse to zero. Multi-example batches are scored on pooled counts.
#[derive(Debug, Clone, Copy)]
pub struct SentenceBleu {
    pub max_order: usize,
}

impl Default for SentenceBleu {
    fn default() -> Self {
        Self { max_order: 4 }
    }
}

fn ngram_counts(words: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if n == 0 || words.len() < n {
        return counts;
    }
    for gram in words.windows(n) {
        *counts.entry(gram).or_insert(0) += 1;
    }
    counts
}

impl RewardFunction for SentenceBleu {
    fn score(&self, hypotheses: &[Vec<String>], references: &[Vec<String>]) -> f32 {
        let order = self.max_order.max(1);
        let mut matched = vec![0usize; order];
        let mut total = vec![0usize; order];
        let mut hyp_len = 0usize;
        let mut ref_len = 0usize;

        for (hyp, reference) in hypotheses.iter().zip(references) {
            hyp_len += hyp.len();
            ref_len += reference.len();
            for n in 1..=order {
                let ref_counts = ngram_counts(reference, n);
                for (gram, count) in ngram_counts(hyp, n) {
                    matched[n - 1] += count.min(ref_counts.get(gram).copied().unwrap_or(0));
                    total[n - 1] += count;
                }
            }
        }

        if hyp_len == 0 || matched[0] == 0 {
            return 0.0;
        }

        let log_precision: f64 = (0..order)
            .map(|i| {
                let (m, t) = if i == 0 {
                    (matched[i] as f64, total[i] as f64)
                } else {
                    (matched[i] as f64 + 1.0, total[i] as f64 + 1.0)
                };
                (m / t).ln()
            })
            .sum::<f64>()
            / order as f64;

        let brevity = if hyp_len >= ref_len {
            1.0
        } else {
            (1.0 - ref_len as f64 / hyp_len as f64).exp()
        };

        (brevity * log_precision.exp()) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::vocab::{END_INDEX, PAD_INDEX};

    fn words(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn identical_sentences_score_one() {
        let bleu = SentenceBleu::default();
        let s = words("the cat sat on the mat");
        let score = bleu.score(&[s.clone()], &[s]);
        assert!((score - 1.0).abs() < 1e-6, "{}", score);
    }

    #[test]
    fn disjoint_sentences_score_zero() {
        let bleu = SentenceBleu::default();
        assert_eq!(bleu.score(&[words("a b c")], &[words("x y z")]), 0.0);
        assert_eq!(bleu.score(&[Vec::new()], &[words("x y z")]), 0.0);
    }

    #[test]
    fn partial_overlap_is_between() {
        let bleu = SentenceBleu::default();
        let score = bleu.score(&[words("the cat sat")], &[words("the cat sat on the mat")]);
        assert!(score > 0.0 && score < 1.0, "{}", score);
    }

    #[test]
    fn postprocess_cuts_and_joins_pieces() {
        let mut vocab = Vocabulary::new();
        let un = vocab.add_word("un@@");
        let believ = vocab.add_word("believ@@");
        let able = vocab.add_word("able");
        let row = vec![un, believ, able, END_INDEX, able, PAD_INDEX];
        assert_eq!(postprocess(&vocab, &row), vec!["unbelievable".to_string()]);
    }

    #[test]
    fn closures_are_reward_functions() {
        let mut vocab = Vocabulary::new();
        let a = vocab.add_word("a");
        let b = vocab.add_word("b");
        let length_reward = |hyps: &[Vec<String>], _refs: &[Vec<String>]| hyps[0].len() as f32;
        let rewards = score_with_reward_function(
            &vocab,
            &[vec![a], vec![b]],
            &[vec![a, b, END_INDEX], vec![END_INDEX, a]],
            &length_reward,
        );
        assert_eq!(rewards, vec![2.0, 1.0]);
    }

    #[test]
    fn empty_sequence_is_one_empty_word() {
        let mut vocab = Vocabulary::new();
        let a = vocab.add_word("a");
        assert_eq!(postprocess(&vocab, &[END_INDEX]), vec![String::new()]);
        assert_eq!(postprocess(&vocab, &[END_INDEX, a]), vec![String::new()]);

        let bleu = SentenceBleu::default();
        assert_eq!(bleu.score(&[postprocess(&vocab, &[END_INDEX])], &[words("a")]), 0.0);
    }
}
