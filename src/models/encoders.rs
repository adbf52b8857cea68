//! News and user encoders.
use super::backend::Backend;
use super::layers::{AttentionPooling, SelfAttention};
use super::{CheckpointError, Init, Parameter, ParameterSource};
use crate::data::PADDING_TOKEN;
use crate::TokenId;

/// Encodes a title's tokens into a single news vector.
#[derive(Clone, Debug)]
pub struct NewsEncoder {
    embedding: Parameter,
    dropout: f32,
    self_attention: SelfAttention,
    pooling: AttentionPooling,
}

impl NewsEncoder {
    /// Declare the word embedding and the title attention layers.
    pub fn new(
        source: &mut dyn ParameterSource,
        vocab_size: usize,
        embedding_dim: usize,
        head_num: usize,
        head_dim: usize,
        attention_hidden_dim: usize,
        dropout: f32,
    ) -> Result<Self, CheckpointError> {
        let embedding = Parameter::declare(
            source,
            "embedding",
            (vocab_size, embedding_dim),
            Init::Embedding,
        )?;
        let self_attention = SelfAttention::new(
            source,
            "news.self_attention",
            embedding_dim,
            head_num,
            head_dim,
            dropout,
        )?;
        let pooling = AttentionPooling::new(
            source,
            "news.pooling",
            self_attention.output_dim(),
            attention_hidden_dim,
            dropout,
        )?;

        Ok(NewsEncoder {
            embedding,
            dropout,
            self_attention,
            pooling,
        })
    }

    /// `(1, output_dim)` vector for a title. Token ids outside the
    /// vocabulary are read as padding.
    pub fn encode<B: Backend>(&self, backend: &B, tokens: &[TokenId]) -> B::Tensor {
        let vocab_size = self.vocab_size();
        let tokens: Vec<TokenId> = tokens
            .iter()
            .map(|&token| if token < vocab_size { token } else { PADDING_TOKEN })
            .collect();

        let embedded = backend.lookup(self.embedding.value(), &tokens);
        let embedded = backend.dropout(&embedded, self.dropout);
        let attended = self.self_attention.forward(backend, &embedded);

        self.pooling.forward(backend, &attended)
    }

    /// Vocabulary size of the embedding table.
    pub fn vocab_size(&self) -> usize {
        self.embedding.shape().0
    }

    /// Dimensionality of news vectors.
    pub fn output_dim(&self) -> usize {
        self.pooling.output_dim()
    }

    /// Owned parameters.
    pub fn parameters(&self) -> Vec<&Parameter> {
        let mut parameters = vec![&self.embedding];
        parameters.extend(self.self_attention.parameters());
        parameters.extend(self.pooling.parameters());
        parameters
    }
}

/// Encodes a click history into a user vector of the same dimensionality
/// as a news vector.
///
/// History slots are encoded independently; the encoder is insensitive to
/// their order.
#[derive(Clone, Debug)]
pub struct UserEncoder {
    self_attention: SelfAttention,
    pooling: AttentionPooling,
}

impl UserEncoder {
    /// Declare the history attention layers over `news_dim` vectors.
    pub fn new(
        source: &mut dyn ParameterSource,
        news_dim: usize,
        head_num: usize,
        head_dim: usize,
        attention_hidden_dim: usize,
        dropout: f32,
    ) -> Result<Self, CheckpointError> {
        let self_attention = SelfAttention::new(
            source,
            "user.self_attention",
            news_dim,
            head_num,
            head_dim,
            dropout,
        )?;
        let pooling = AttentionPooling::new(
            source,
            "user.pooling",
            self_attention.output_dim(),
            attention_hidden_dim,
            dropout,
        )?;

        Ok(UserEncoder {
            self_attention,
            pooling,
        })
    }

    /// `(1, output_dim)` user vector from the titles of the history slots.
    pub fn encode<B: Backend>(
        &self,
        backend: &B,
        news_encoder: &NewsEncoder,
        history: &[Vec<TokenId>],
    ) -> B::Tensor {
        let news_vectors: Vec<_> = history
            .iter()
            .map(|tokens| news_encoder.encode(backend, tokens))
            .collect();

        self.encode_vectors(backend, &news_vectors)
    }

    /// `(1, output_dim)` user vector from already encoded `(1, news_dim)`
    /// history vectors.
    pub fn encode_vectors<B: Backend>(&self, backend: &B, news_vectors: &[B::Tensor]) -> B::Tensor {
        let stacked = backend.stack_rows(news_vectors);
        let attended = self.self_attention.forward(backend, &stacked);

        self.pooling.forward(backend, &attended)
    }

    /// Dimensionality of user vectors.
    pub fn output_dim(&self) -> usize {
        self.pooling.output_dim()
    }

    /// Owned parameters.
    pub fn parameters(&self) -> Vec<&Parameter> {
        let mut parameters = self.self_attention.parameters();
        parameters.extend(self.pooling.parameters());
        parameters
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, XorShiftRng};

    use wyrm::Arr;

    use super::super::backend::{Eager, Graph};
    use super::super::RandomInit;
    use super::*;

    fn encoders() -> (NewsEncoder, UserEncoder) {
        let mut rng = XorShiftRng::from_seed([42; 16]);
        let mut source = RandomInit::new(&mut rng);

        let news = NewsEncoder::new(&mut source, 20, 8, 2, 3, 5, 0.2).unwrap();
        let user = UserEncoder::new(&mut source, news.output_dim(), 2, 3, 5, 0.2).unwrap();

        (news, user)
    }

    fn assert_close(lhs: &Arr, rhs: &Arr) {
        assert_eq!(lhs.dim(), rhs.dim());
        for (x, y) in lhs.iter().zip(rhs.iter()) {
            assert!((x - y).abs() < 1e-5, "{} != {}", lhs, rhs);
        }
    }

    #[test]
    fn news_vectors_have_output_dim() {
        let (news, user) = encoders();

        let vector = news.encode(&Eager, &[1, 2, 3, 0]);

        assert_eq!(vector.dim(), (1, 6));
        assert_eq!(news.output_dim(), user.output_dim());
    }

    #[test]
    fn unknown_titles_encode_deterministically() {
        let (news, _) = encoders();

        let first = news.encode(&Eager, &[0, 0, 0, 0]);
        let second = news.encode(&Eager, &[0, 0, 0, 0]);

        assert!(first.iter().all(|x| x.is_finite()));
        assert_eq!(first, second);
    }

    #[test]
    fn out_of_vocabulary_tokens_read_as_padding() {
        let (news, _) = encoders();

        assert_eq!(news.encode(&Eager, &[1, 500]), news.encode(&Eager, &[1, 0]));
    }

    #[test]
    fn history_order_does_not_matter() {
        let (news, user) = encoders();
        let history = vec![vec![1, 2, 0], vec![4, 5, 6], vec![0, 0, 0]];
        let reversed: Vec<_> = history.iter().rev().cloned().collect();

        assert_close(
            &user.encode(&Eager, &news, &history),
            &user.encode(&Eager, &news, &reversed),
        );
    }

    #[test]
    fn cached_vectors_match_direct_encoding() {
        let (news, user) = encoders();
        let history = vec![vec![1, 2, 0], vec![7, 0, 0]];
        let vectors: Vec<_> = history.iter().map(|x| news.encode(&Eager, x)).collect();

        assert_close(
            &user.encode(&Eager, &news, &history),
            &user.encode_vectors(&Eager, &vectors),
        );
    }

    #[test]
    fn default_sized_title_graph_stays_bounded() {
        let mut rng = XorShiftRng::from_seed([42; 16]);
        let news = NewsEncoder::new(&mut RandomInit::new(&mut rng), 1000, 300, 20, 20, 200, 0.2)
            .unwrap();
        let tokens: Vec<_> = (1..31).collect();

        let graph = Graph::new(true, XorShiftRng::from_seed([1; 16]));
        let vector = news.encode(&graph, &tokens);

        assert_eq!(graph.dim(&vector), (1, 400));
        // Roughly 0.5M values; a dense selector per head slice would add
        // more than a million.
        assert!(graph.size() < 50 * 30 * 400, "{} values", graph.size());
    }

    #[test]
    fn parameters_are_uniquely_named() {
        let (news, user) = encoders();
        let mut names: Vec<_> = news
            .parameters()
            .into_iter()
            .chain(user.parameters())
            .map(|x| x.name().to_owned())
            .collect();
        let total = names.len();
        names.sort();
        names.dedup();

        assert_eq!(names.len(), total);
        assert_eq!(total, 1 + 2 * (6 + 3));
    }
}
