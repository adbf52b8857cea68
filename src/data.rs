//! Impressions, behaviour logs and the article-id to token mapping.
use std::collections::HashMap;
use std::hash::Hasher;

use rand::distributions::{Distribution, Uniform};
use rand::Rng;

use siphasher::sip::SipHasher;

use super::{ArticleId, Timestamp, TokenId, UserId};

/// Article id reserved for empty history slots and missing negatives.
/// It always resolves to the all-zero token sequence.
pub const PADDING_ARTICLE: ArticleId = 0;

/// Token id used for padding titles.
pub const PADDING_TOKEN: TokenId = 0;

/// One user-facing event: the articles shown to a user, the ones clicked,
/// and the user's click history at that time.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Impression {
    impression_id: usize,
    user_id: UserId,
    timestamp: Timestamp,
    history: Vec<ArticleId>,
    inview: Vec<ArticleId>,
    clicked: Vec<ArticleId>,
}

impl Impression {
    /// Build a new impression.
    pub fn new(
        impression_id: usize,
        user_id: UserId,
        timestamp: Timestamp,
        history: Vec<ArticleId>,
        inview: Vec<ArticleId>,
        clicked: Vec<ArticleId>,
    ) -> Self {
        Impression {
            impression_id,
            user_id,
            timestamp,
            history,
            inview,
            clicked,
        }
    }

    /// Impression id.
    pub fn impression_id(&self) -> usize {
        self.impression_id
    }
    /// User id.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }
    /// Timestamp of the impression.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
    /// Click history, oldest first.
    pub fn history(&self) -> &[ArticleId] {
        &self.history
    }
    /// Articles shown to the user.
    pub fn inview(&self) -> &[ArticleId] {
        &self.inview
    }
    /// Subset of `inview` that was clicked.
    pub fn clicked(&self) -> &[ArticleId] {
        &self.clicked
    }

    /// Binary labels aligned with `inview`.
    pub fn labels(&self) -> Vec<f32> {
        self.inview
            .iter()
            .map(|id| if self.clicked.contains(id) { 1.0 } else { 0.0 })
            .collect()
    }

    /// In-view articles that were not clicked.
    pub fn negatives(&self) -> Vec<ArticleId> {
        self.inview
            .iter()
            .filter(|id| !self.clicked.contains(id))
            .cloned()
            .collect()
    }
}

/// Truncate or pad a history to exactly `history_size` slots.
///
/// The most recent articles are kept; missing slots are filled with
/// `PADDING_ARTICLE` after the real entries.
pub fn fixed_history(history: &[ArticleId], history_size: usize) -> Vec<ArticleId> {
    let start = history.len().saturating_sub(history_size);
    let mut fixed = history[start..].to_owned();
    fixed.resize(history_size, PADDING_ARTICLE);

    fixed
}

/// Split behaviours so that each user's impressions end up entirely in
/// either the train or the test half.
pub fn user_based_split<R: Rng>(
    behaviors: &Behaviors,
    rng: &mut R,
    test_fraction: f32,
) -> (Behaviors, Behaviors) {
    let denominator = 100_000;
    let train_cutoff = (test_fraction * denominator as f32) as u64;

    let range = Uniform::new_inclusive(0, ::std::u64::MAX);
    let (key_0, key_1) = (range.sample(rng), range.sample(rng));

    let is_train = |x: &Impression| {
        let mut hasher = SipHasher::new_with_keys(key_0, key_1);
        hasher.write_usize(x.user_id());
        hasher.finish() % denominator > train_cutoff
    };

    behaviors.split_by(is_train)
}

/// A collection of impressions.
#[derive(Clone, Debug, Default)]
pub struct Behaviors {
    impressions: Vec<Impression>,
}

impl Behaviors {
    /// Build an empty collection.
    pub fn new() -> Self {
        Behaviors {
            impressions: Vec::new(),
        }
    }

    /// Add an impression.
    pub fn push(&mut self, impression: Impression) {
        self.impressions.push(impression);
    }

    /// The underlying impressions.
    pub fn data(&self) -> &[Impression] {
        &self.impressions
    }

    /// Number of impressions.
    pub fn len(&self) -> usize {
        self.impressions.len()
    }

    /// Whether there are no impressions.
    pub fn is_empty(&self) -> bool {
        self.impressions.is_empty()
    }

    /// Earliest and latest impression times, if any.
    pub fn time_range(&self) -> Option<(Timestamp, Timestamp)> {
        let first = self.impressions.iter().map(|x| x.timestamp()).min()?;
        let last = self.impressions.iter().map(|x| x.timestamp()).max()?;

        Some((first, last))
    }

    /// Number of distinct users.
    pub fn num_users(&self) -> usize {
        let mut users: Vec<_> = self.impressions.iter().map(|x| x.user_id()).collect();
        users.sort_unstable();
        users.dedup();
        users.len()
    }

    /// Split into impressions satisfying `func` and the rest.
    pub fn split_by<F: Fn(&Impression) -> bool>(&self, func: F) -> (Self, Self) {
        let (head, tail): (Vec<_>, Vec<_>) =
            self.impressions.iter().cloned().partition(|x| func(x));

        (Behaviors { impressions: head }, Behaviors { impressions: tail })
    }
}

impl From<Vec<Impression>> for Behaviors {
    fn from(impressions: Vec<Impression>) -> Behaviors {
        Behaviors { impressions }
    }
}

/// Immutable mapping from article id to a fixed-length title token
/// sequence. Unknown ids resolve to an all-zero sequence.
#[derive(Clone, Debug)]
pub struct ArticleTokens {
    title_size: usize,
    vocab_size: usize,
    tokens: HashMap<ArticleId, Vec<TokenId>>,
    unknown: Vec<TokenId>,
}

impl ArticleTokens {
    /// Build an empty mapping for titles of `title_size` tokens.
    pub fn new(title_size: usize) -> Self {
        ArticleTokens {
            title_size,
            vocab_size: 1,
            tokens: HashMap::new(),
            unknown: vec![PADDING_TOKEN; title_size],
        }
    }

    /// Add an article, truncating or zero-padding its tokens to `title_size`.
    pub fn insert(&mut self, article_id: ArticleId, tokens: &[TokenId]) {
        let mut title: Vec<TokenId> = tokens.iter().take(self.title_size).cloned().collect();
        title.resize(self.title_size, PADDING_TOKEN);

        if let Some(&max_token) = title.iter().max() {
            self.vocab_size = self.vocab_size.max(max_token + 1);
        }

        self.tokens.insert(article_id, title);
    }

    /// Tokens of `article_id`, or the all-zero sequence if it is unknown
    /// or the padding article.
    pub fn get(&self, article_id: ArticleId) -> &[TokenId] {
        if article_id == PADDING_ARTICLE {
            return &self.unknown;
        }

        self.tokens
            .get(&article_id)
            .map(|x| x.as_slice())
            .unwrap_or(&self.unknown)
    }

    /// Whether `article_id` has a title in the mapping.
    pub fn contains(&self, article_id: ArticleId) -> bool {
        article_id != PADDING_ARTICLE && self.tokens.contains_key(&article_id)
    }

    /// Count of ids (ignoring padding) that would fall back to the
    /// unknown representation.
    pub fn count_missing<'a, I: IntoIterator<Item = &'a ArticleId>>(&self, ids: I) -> usize {
        ids.into_iter()
            .filter(|&&id| id != PADDING_ARTICLE && !self.tokens.contains_key(&id))
            .count()
    }

    /// Iterate over `(article_id, tokens)` pairs.
    pub fn iter<'a>(&'a self) -> impl Iterator<Item = (ArticleId, &'a [TokenId])> + 'a {
        self.tokens.iter().map(|(&id, tokens)| (id, tokens.as_slice()))
    }

    /// Number of articles.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Title length.
    pub fn title_size(&self) -> usize {
        self.title_size
    }

    /// One past the largest token id seen.
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, XorShiftRng};

    use super::*;

    fn impression(user_id: UserId) -> Impression {
        Impression::new(user_id, user_id, 0, vec![1, 2], vec![3, 4, 5], vec![4])
    }

    #[test]
    fn unknown_articles_resolve_to_zeros() {
        let mut articles = ArticleTokens::new(4);
        articles.insert(7, &[3, 1]);
        articles.insert(8, &[1, 2, 3, 4, 5, 6]);

        assert_eq!(articles.get(7), &[3, 1, 0, 0]);
        assert_eq!(articles.get(8), &[1, 2, 3, 4]);
        assert_eq!(articles.get(9), &[0, 0, 0, 0]);
        assert_eq!(articles.get(PADDING_ARTICLE), &[0, 0, 0, 0]);
        assert_eq!(articles.vocab_size(), 5);
        assert_eq!(articles.count_missing(&[7, 9, 0, 10]), 2);
    }

    #[test]
    fn history_is_truncated_to_most_recent() {
        assert_eq!(fixed_history(&[1, 2, 3, 4], 2), vec![3, 4]);
        assert_eq!(fixed_history(&[1, 2], 4), vec![1, 2, 0, 0]);
        assert_eq!(fixed_history(&[], 2), vec![0, 0]);
    }

    #[test]
    fn labels_follow_inview_order() {
        let impression = impression(1);

        assert_eq!(impression.labels(), vec![0.0, 1.0, 0.0]);
        assert_eq!(impression.negatives(), vec![3, 5]);
    }

    #[test]
    fn user_split_keeps_users_together() {
        let behaviors: Behaviors = (0..200)
            .flat_map(|user| vec![impression(user), impression(user)])
            .collect::<Vec<_>>()
            .into();

        let mut rng = XorShiftRng::from_seed([42; 16]);
        let (train, test) = user_based_split(&behaviors, &mut rng, 0.5);

        assert_eq!(train.len() + test.len(), behaviors.len());
        assert_eq!(behaviors.time_range(), Some((0, 0)));
        assert_eq!(Behaviors::new().time_range(), None);
        assert!(!train.is_empty() && !test.is_empty());

        for impression in train.data() {
            assert!(test
                .data()
                .iter()
                .all(|x| x.user_id() != impression.user_id()));
        }
    }
}
