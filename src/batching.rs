//! Collation of samples into rectangular batches.
use std::slice::Chunks;

use ndarray::{Array2, Array3};

use super::data::{fixed_history, ArticleTokens};
use super::sampling::Sample;
use super::TokenId;

/// A group of samples with uniform tensor shapes.
///
/// Candidate lists are padded to the longest list in the batch; `mask`
/// marks real candidates and `labels` are zero at padded positions.
#[derive(Clone, Debug)]
pub struct Batch {
    /// `(batch, history_size, title_size)` history title tokens.
    pub histories: Array3<TokenId>,
    /// `(batch, max_candidates, title_size)` candidate title tokens.
    pub candidates: Array3<TokenId>,
    /// `(batch, max_candidates)` labels.
    pub labels: Array2<f32>,
    /// `(batch, max_candidates)`, `true` for real candidates.
    pub mask: Array2<bool>,
}

impl Batch {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.labels.dim().0
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of history slots per sample.
    pub fn history_size(&self) -> usize {
        self.histories.dim().1
    }

    /// Candidate slots per sample, padding included.
    pub fn max_candidates(&self) -> usize {
        self.candidates.dim().1
    }

    /// Tokens of history slot `slot` of sample `idx`.
    pub fn history_tokens(&self, idx: usize, slot: usize) -> Vec<TokenId> {
        let title_size = self.histories.dim().2;
        (0..title_size)
            .map(|token| self.histories[[idx, slot, token]])
            .collect()
    }

    /// Tokens of candidate `slot` of sample `idx`.
    pub fn candidate_tokens(&self, idx: usize, slot: usize) -> Vec<TokenId> {
        let title_size = self.candidates.dim().2;
        (0..title_size)
            .map(|token| self.candidates[[idx, slot, token]])
            .collect()
    }

    /// Number of real candidates of sample `idx`.
    pub fn num_candidates(&self, idx: usize) -> usize {
        self.mask.row(idx).iter().filter(|&&x| x).count()
    }

    /// Labels of the real candidates of sample `idx`.
    pub fn sample_labels(&self, idx: usize) -> Vec<f32> {
        izip!(self.labels.row(idx).iter(), self.mask.row(idx).iter())
            .filter(|&(_, &real)| real)
            .map(|(&label, _)| label)
            .collect()
    }
}

/// Look up the titles of `samples` and pack them into a `Batch`.
pub fn collate(samples: &[Sample], articles: &ArticleTokens, history_size: usize) -> Batch {
    let title_size = articles.title_size();
    let max_candidates = samples.iter().map(|x| x.len()).max().unwrap_or(0);

    let mut histories = Array3::zeros((samples.len(), history_size, title_size));
    let mut candidates = Array3::zeros((samples.len(), max_candidates, title_size));
    let mut labels = Array2::zeros((samples.len(), max_candidates));
    let mut mask = Array2::from_elem((samples.len(), max_candidates), false);

    for (idx, sample) in samples.iter().enumerate() {
        for (slot, &article_id) in fixed_history(&sample.history, history_size)
            .iter()
            .enumerate()
        {
            for (token_idx, &token) in articles.get(article_id).iter().enumerate() {
                histories[[idx, slot, token_idx]] = token;
            }
        }

        for (slot, &article_id, &label) in
            izip!(0..sample.len(), &sample.candidates, &sample.labels)
        {
            for (token_idx, &token) in articles.get(article_id).iter().enumerate() {
                candidates[[idx, slot, token_idx]] = token;
            }
            labels[[idx, slot]] = label;
            mask[[idx, slot]] = true;
        }
    }

    Batch {
        histories,
        candidates,
        labels,
        mask,
    }
}

/// Split samples into consecutive minibatches; the last may be shorter.
pub fn minibatches(samples: &[Sample], batch_size: usize) -> Chunks<Sample> {
    samples.chunks(batch_size.max(1))
}
