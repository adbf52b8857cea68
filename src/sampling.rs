//! Negative sampling: turning impressions into candidate lists with labels.
//!
//! In training mode every click becomes its own sample holding the click
//! and `npratio` negatives drawn from the non-clicked in-view articles.
//! In evaluation mode the in-view list is passed through untouched.
use rand::seq::sample_slice;
use rand::Rng;

use super::data::{Impression, PADDING_ARTICLE};
use super::{ArticleId, UserId};

/// A user history with a candidate list and labels aligned to it.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// Impression the sample was derived from.
    pub impression_id: usize,
    /// User the sample belongs to.
    pub user_id: UserId,
    /// Raw click history; truncated and padded at collation time.
    pub history: Vec<ArticleId>,
    /// Candidate articles.
    pub candidates: Vec<ArticleId>,
    /// `1.0` for clicked candidates, `0.0` otherwise.
    pub labels: Vec<f32>,
}

impl Sample {
    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether the sample has no candidates.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Draw `npratio` negatives from `pool`.
///
/// Sampling is without replacement when the pool is large enough and
/// with replacement otherwise. An empty pool yields padding articles.
pub fn sample_negatives<R: Rng>(pool: &[ArticleId], npratio: usize, rng: &mut R) -> Vec<ArticleId> {
    if pool.is_empty() {
        return vec![PADDING_ARTICLE; npratio];
    }

    if pool.len() >= npratio {
        sample_slice(rng, pool, npratio)
    } else {
        (0..npratio)
            .map(|_| pool[rng.gen_range(0, pool.len())])
            .collect()
    }
}

/// Build one training sample per click in `impression`.
///
/// Each sample holds exactly `npratio + 1` candidates and exactly one
/// positive label. With `shuffle` the positive's position is random,
/// otherwise it comes first.
pub fn training_samples<R: Rng>(
    impression: &Impression,
    npratio: usize,
    shuffle: bool,
    rng: &mut R,
) -> Vec<Sample> {
    let pool = impression.negatives();

    impression
        .clicked()
        .iter()
        .map(|&positive| {
            let mut candidates: Vec<(ArticleId, f32)> = Vec::with_capacity(npratio + 1);
            candidates.push((positive, 1.0));
            candidates.extend(
                sample_negatives(&pool, npratio, rng)
                    .into_iter()
                    .map(|negative| (negative, 0.0)),
            );

            if shuffle {
                rng.shuffle(&mut candidates);
            }

            let (candidates, labels) = candidates.into_iter().unzip();

            Sample {
                impression_id: impression.impression_id(),
                user_id: impression.user_id(),
                history: impression.history().to_owned(),
                candidates,
                labels,
            }
        })
        .collect()
}

/// Build the training set for a collection of impressions.
/// Impressions without clicks contribute nothing.
pub fn training_set<R: Rng>(
    impressions: &[Impression],
    npratio: usize,
    shuffle: bool,
    rng: &mut R,
) -> Vec<Sample> {
    let unclicked = impressions
        .iter()
        .filter(|x| x.clicked().is_empty())
        .count();

    if unclicked > 0 {
        warn!(unclicked, "skipping impressions without clicks");
    }

    impressions
        .iter()
        .flat_map(|impression| training_samples(impression, npratio, shuffle, rng))
        .collect()
}

/// The evaluation sample of an impression: the full in-view list in its
/// original order, labelled `1.0` at every clicked position.
pub fn evaluation_sample(impression: &Impression) -> Sample {
    Sample {
        impression_id: impression.impression_id(),
        user_id: impression.user_id(),
        history: impression.history().to_owned(),
        candidates: impression.inview().to_owned(),
        labels: impression.labels(),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::{SeedableRng, XorShiftRng};

    use super::*;

    fn impression(num_clicks: usize, num_negatives: usize) -> Impression {
        let clicked: Vec<_> = (0..num_clicks).map(|x| 100 + x).collect();
        let negatives: Vec<_> = (0..num_negatives).map(|x| 200 + x).collect();
        let inview = negatives.iter().chain(clicked.iter()).cloned().collect();

        Impression::new(1, 2, 3, vec![5, 6], inview, clicked)
    }

    proptest! {
        #[test]
        fn candidate_lists_have_fixed_length(
            num_clicks in 1usize..4,
            num_negatives in 0usize..12,
            npratio in 1usize..8,
            shuffle in any::<bool>(),
            seed in 1u8..255,
        ) {
            let mut rng = XorShiftRng::from_seed([seed; 16]);
            let impression = impression(num_clicks, num_negatives);

            let samples = training_samples(&impression, npratio, shuffle, &mut rng);

            prop_assert_eq!(samples.len(), num_clicks);

            for (sample, &positive) in samples.iter().zip(impression.clicked()) {
                prop_assert_eq!(sample.candidates.len(), npratio + 1);
                prop_assert_eq!(sample.labels.len(), npratio + 1);
                prop_assert_eq!(sample.labels.iter().filter(|&&x| x == 1.0).count(), 1);

                let positive_idx = sample.labels.iter().position(|&x| x == 1.0).unwrap();
                prop_assert_eq!(sample.candidates[positive_idx], positive);

                for (&candidate, &label) in sample.candidates.iter().zip(&sample.labels) {
                    if label == 0.0 {
                        prop_assert!(!impression.clicked().contains(&candidate));
                    }
                }
            }
        }

        #[test]
        fn large_pools_sample_without_replacement(
            npratio in 1usize..6,
            extra in 0usize..6,
            seed in 1u8..255,
        ) {
            let mut rng = XorShiftRng::from_seed([seed; 16]);
            let pool: Vec<_> = (0..npratio + extra).map(|x| 10 + x).collect();

            let mut negatives = sample_negatives(&pool, npratio, &mut rng);
            negatives.sort();
            negatives.dedup();

            prop_assert_eq!(negatives.len(), npratio);
        }
    }

    #[test]
    fn short_pool_samples_with_replacement() {
        let mut rng = XorShiftRng::from_seed([42; 16]);
        let impression = impression(1, 2);

        let samples = training_samples(&impression, 4, true, &mut rng);

        assert_eq!(samples[0].candidates.len(), 5);
        assert!(samples[0]
            .candidates
            .iter()
            .all(|x| impression.inview().contains(x)));
    }

    #[test]
    fn empty_pool_is_padded() {
        let mut rng = XorShiftRng::from_seed([42; 16]);
        let impression = impression(1, 0);

        let samples = training_samples(&impression, 3, false, &mut rng);

        assert_eq!(samples[0].candidates, vec![100, 0, 0, 0]);
        assert_eq!(samples[0].labels, vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn unshuffled_positive_comes_first() {
        let mut rng = XorShiftRng::from_seed([42; 16]);
        let impression = impression(2, 5);

        for sample in training_samples(&impression, 3, false, &mut rng) {
            assert_eq!(sample.labels[0], 1.0);
        }
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let impression = impression(2, 10);
        let first = training_samples(&impression, 4, true, &mut XorShiftRng::from_seed([7; 16]));
        let second = training_samples(&impression, 4, true, &mut XorShiftRng::from_seed([7; 16]));

        assert_eq!(first, second);
    }

    #[test]
    fn evaluation_keeps_inview_order() {
        let impression = impression(1, 3);
        let sample = evaluation_sample(&impression);

        assert_eq!(sample.candidates, vec![200, 201, 202, 100]);
        assert_eq!(sample.labels, vec![0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn unclicked_impressions_are_skipped() {
        let mut rng = XorShiftRng::from_seed([42; 16]);
        let impressions = vec![impression(0, 4), impression(2, 4)];

        assert_eq!(training_set(&impressions, 2, true, &mut rng).len(), 2);
    }
}
