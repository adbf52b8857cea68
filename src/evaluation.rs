//! Ranking metrics.
//!
//! Every metric is computed per impression from the labels and scores of its
//! candidate list, then averaged over impressions by [`evaluate`].
//!
//! [`evaluate`]: fn.evaluate.html
use std::cmp::Ordering;

use rayon::prelude::*;

use super::data::Impression;
use super::{NewsRankingModel, PredictionError};

/// Metrics averaged over impressions.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Metrics {
    /// Area under the ROC curve, over impressions with both clicked and
    /// non-clicked candidates.
    pub auc: f32,
    /// Mean reciprocal rank of the clicked candidates.
    pub mrr: f32,
    /// nDCG over the top 5 candidates.
    pub ndcg_5: f32,
    /// nDCG over the top 10 candidates.
    pub ndcg_10: f32,
    /// Number of impressions scored.
    pub impressions: usize,
}

/// Candidate indices ordered by descending score. Equal scores keep their
/// input order.
fn argsort_descending(scores: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&x, &y| {
        scores[y]
            .partial_cmp(&scores[x])
            .unwrap_or(Ordering::Equal)
    });
    order
}

/// 1-based rank of every candidate: the highest score has rank 1, and equal
/// scores are ranked by input order.
///
/// ```
/// assert_eq!(nrms::evaluation::rank_predictions(&[0.2, 0.9, 0.5]), vec![3, 1, 2]);
/// ```
pub fn rank_predictions(scores: &[f32]) -> Vec<usize> {
    let mut ranks = vec![0; scores.len()];

    for (rank, idx) in argsort_descending(scores).into_iter().enumerate() {
        ranks[idx] = rank + 1;
    }

    ranks
}

/// Area under the ROC curve via the rank statistic, with tied scores
/// sharing their average rank. `None` unless both classes are present.
pub fn auc_score(labels: &[f32], scores: &[f32]) -> Option<f32> {
    let num_positive = labels.iter().filter(|&&x| x > 0.5).count();
    let num_negative = labels.len() - num_positive;

    if num_positive == 0 || num_negative == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&x, &y| scores[x].partial_cmp(&scores[y]).unwrap_or(Ordering::Equal));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;

    while start < order.len() {
        let mut stop = start + 1;
        while stop < order.len() && scores[order[stop]] == scores[order[start]] {
            stop += 1;
        }

        // Ranks start..stop are 1-based start + 1..=stop.
        let average_rank = (start + 1 + stop) as f64 / 2.0;
        for &idx in &order[start..stop] {
            if labels[idx] > 0.5 {
                positive_rank_sum += average_rank;
            }
        }

        start = stop;
    }

    let num_positive = num_positive as f64;
    let auc = (positive_rank_sum - num_positive * (num_positive + 1.0) / 2.0)
        / (num_positive * num_negative as f64);

    Some(auc as f32)
}

/// Mean reciprocal rank of the clicked candidates. `None` without clicks.
pub fn mrr_score(labels: &[f32], scores: &[f32]) -> Option<f32> {
    let total: f32 = labels.iter().sum();

    if total <= 0.0 {
        return None;
    }

    let reciprocal_ranks: f32 = argsort_descending(scores)
        .into_iter()
        .enumerate()
        .map(|(rank, idx)| labels[idx] / (rank + 1) as f32)
        .sum();

    Some(reciprocal_ranks / total)
}

fn dcg_score(labels: &[f32], scores: &[f32], k: usize) -> f32 {
    argsort_descending(scores)
        .into_iter()
        .take(k)
        .enumerate()
        .map(|(rank, idx)| (2.0f32.powf(labels[idx]) - 1.0) / ((rank + 2) as f32).log2())
        .sum()
}

/// Normalised discounted cumulative gain over the top `k` candidates.
/// `None` without clicks.
pub fn ndcg_score(labels: &[f32], scores: &[f32], k: usize) -> Option<f32> {
    let ideal = dcg_score(labels, labels, k);

    if ideal <= 0.0 {
        return None;
    }

    Some(dcg_score(labels, scores, k) / ideal)
}

#[derive(Default)]
struct Accumulator {
    total: f64,
    count: usize,
}

impl Accumulator {
    fn add(&mut self, value: Option<f32>) {
        if let Some(value) = value {
            self.total += value as f64;
            self.count += 1;
        }
    }

    fn mean(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            (self.total / self.count as f64) as f32
        }
    }
}

/// Score every impression's candidate list from its history and average
/// the per-impression metrics. Impressions without candidates are skipped.
pub fn evaluate<T: NewsRankingModel + Sync>(
    model: &T,
    impressions: &[Impression],
) -> Result<Metrics, PredictionError> {
    let scored = impressions
        .par_iter()
        .filter(|impression| !impression.inview().is_empty())
        .map(|impression| {
            let user = model.user_representation(impression.history())?;
            let scores = model.predict(&user, impression.inview())?;

            Ok((impression.labels(), scores))
        })
        .collect::<Result<Vec<_>, PredictionError>>()?;

    let mut auc = Accumulator::default();
    let mut mrr = Accumulator::default();
    let mut ndcg_5 = Accumulator::default();
    let mut ndcg_10 = Accumulator::default();

    for (labels, scores) in &scored {
        auc.add(auc_score(labels, scores));
        mrr.add(mrr_score(labels, scores));
        ndcg_5.add(ndcg_score(labels, scores, 5));
        ndcg_10.add(ndcg_score(labels, scores, 10));
    }

    let metrics = Metrics {
        auc: auc.mean(),
        mrr: mrr.mean(),
        ndcg_5: ndcg_5.mean(),
        ndcg_10: ndcg_10.mean(),
        impressions: scored.len(),
    };

    info!(
        impressions = metrics.impressions,
        auc = metrics.auc,
        mrr = metrics.mrr,
        ndcg_5 = metrics.ndcg_5,
        ndcg_10 = metrics.ndcg_10,
        "evaluated"
    );

    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::super::ArticleId;
    use super::*;

    #[test]
    fn ranks_are_one_based() {
        assert_eq!(rank_predictions(&[0.2, 0.9, 0.5]), vec![3, 1, 2]);
        assert_eq!(rank_predictions(&[0.5, 0.5, 0.1]), vec![1, 2, 3]);
        assert!(rank_predictions(&[]).is_empty());
    }

    #[test]
    fn auc_handles_ties() {
        assert_eq!(auc_score(&[1.0, 0.0], &[0.9, 0.1]), Some(1.0));
        assert_eq!(auc_score(&[1.0, 0.0], &[0.1, 0.9]), Some(0.0));
        assert_eq!(auc_score(&[1.0, 0.0], &[0.5, 0.5]), Some(0.5));
        assert_eq!(auc_score(&[1.0, 1.0], &[0.5, 0.2]), None);
        assert_eq!(auc_score(&[0.0, 0.0], &[0.5, 0.2]), None);

        let auc = auc_score(&[0.0, 1.0, 0.0, 1.0], &[0.1, 0.4, 0.35, 0.8]).unwrap();
        assert!((auc - 1.0).abs() < 1e-6);
        let auc = auc_score(&[0.0, 0.0, 1.0, 1.0], &[0.1, 0.4, 0.35, 0.8]).unwrap();
        assert!((auc - 0.75).abs() < 1e-6);
    }

    #[test]
    fn mrr_and_ndcg() {
        let labels = [0.0, 1.0, 0.0];
        let scores = [0.9, 0.5, 0.1];

        assert!((mrr_score(&labels, &scores).unwrap() - 0.5).abs() < 1e-6);
        assert!((ndcg_score(&labels, &scores, 5).unwrap() - 1.0 / 3.0f32.log2()).abs() < 1e-6);
        assert_eq!(ndcg_score(&labels, &scores, 1), Some(0.0));
        assert_eq!(mrr_score(&[0.0, 0.0], &scores[..2]), None);
        assert_eq!(ndcg_score(&labels, &[0.1, 0.9, 0.2], 10), Some(1.0));
    }

    proptest! {
        #[test]
        fn ranks_are_a_permutation(scores in prop::collection::vec(-10.0f32..10.0, 0..30)) {
            let mut ranks = rank_predictions(&scores);
            ranks.sort();

            prop_assert_eq!(ranks, (1..scores.len() + 1).collect::<Vec<_>>());
        }

        #[test]
        fn metrics_are_bounded(
            scores in prop::collection::vec(-10.0f32..10.0, 2..30),
            seed in any::<u64>(),
        ) {
            let labels: Vec<f32> = (0..scores.len())
                .map(|idx| if (seed >> (idx % 64)) & 1 == 1 { 1.0 } else { 0.0 })
                .collect();

            for value in vec![
                auc_score(&labels, &scores),
                mrr_score(&labels, &scores),
                ndcg_score(&labels, &scores, 5),
            ].into_iter().filter_map(|x| x) {
                prop_assert!(value >= 0.0 && value <= 1.0 + 1e-6);
            }
        }
    }

    /// Scores candidates by their id.
    struct ById;

    impl NewsRankingModel for ById {
        type UserRepresentation = ();

        fn user_representation(&self, _: &[ArticleId]) -> Result<(), PredictionError> {
            Ok(())
        }

        fn predict(&self, _: &(), candidates: &[ArticleId]) -> Result<Vec<f32>, PredictionError> {
            Ok(candidates.iter().map(|&x| x as f32).collect())
        }
    }

    #[test]
    fn evaluation_averages_impressions() {
        let impressions = vec![
            Impression::new(0, 0, 0, vec![1], vec![1, 2, 3], vec![3]),
            Impression::new(1, 1, 0, vec![1], vec![4, 5], vec![4]),
            Impression::new(2, 2, 0, vec![1], vec![6, 7], vec![6, 7]),
            Impression::new(3, 3, 0, vec![1], vec![], vec![]),
        ];

        let metrics = evaluate(&ById, &impressions).unwrap();

        assert_eq!(metrics.impressions, 3);
        // The all-clicked impression has no AUC.
        assert!((metrics.auc - 0.5).abs() < 1e-6);
        assert!((metrics.mrr - (1.0 + 0.5 + 0.75) / 3.0).abs() < 1e-6);
    }
}
