//! Neural News Recommendation with Multi-Head Self-Attention.
//!
//! Titles are encoded by a [`NewsEncoder`] into news vectors; a user's click
//! history is encoded by a [`UserEncoder`] over those vectors. A candidate's
//! score is the dot product of the user vector and its news vector:
//!
//! ```text
//! score(u, c) = user(history_u) · news(title_c)
//! ```
//!
//! Training minimises either a softmax cross-entropy over the candidate list
//! of each sample (one click and `npratio` sampled non-clicks) or an
//! independent binary log loss per candidate.
//!
//! [`NewsEncoder`]: ../encoders/struct.NewsEncoder.html
//! [`UserEncoder`]: ../encoders/struct.UserEncoder.html
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use failure;
use rand;
use rand::{Rng, SeedableRng, XorShiftRng};
use rayon::prelude::*;
use serde_json;

use wyrm;
use wyrm::optim::{Optimizer as Optim, Optimizers};
use wyrm::Arr;

use super::backend::{Backend, Eager, Graph};
use super::encoders::{NewsEncoder, UserEncoder};
use super::{
    CheckpointError, Loss, NewsUser, Optimizer, Parameter, ParameterSource, RandomInit,
    StoredValues,
};
use crate::batching::{collate, minibatches, Batch};
use crate::data::{fixed_history, ArticleTokens, Impression, PADDING_ARTICLE, PADDING_TOKEN};
use crate::sampling::{training_set, Sample};
use crate::{
    ArticleId, ConfigError, FittingError, NewsRankingModel, PredictionError, TokenId,
};

/// Hyperparameters describing the NRMS model.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    vocab_size: usize,
    embedding_dim: usize,
    title_size: usize,
    history_size: usize,
    head_num: usize,
    head_dim: usize,
    attention_hidden_dim: usize,
    dropout: f32,
    npratio: usize,
    batch_size: usize,
    learning_rate: f32,
    l2_penalty: f32,
    loss: Loss,
    optimizer: Optimizer,
    num_epochs: usize,
    shuffle: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    rng: XorShiftRng,
}

/// Seed used by `from_json` when the file names neither a seed nor an RNG
/// state.
pub const DEFAULT_SEED: u64 = 42;

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters::new(1, 300)
    }
}

impl Hyperparameters {
    /// Build new hyperparameters for a vocabulary of `vocab_size` tokens
    /// embedded in `embedding_dim` dimensions.
    pub fn new(vocab_size: usize, embedding_dim: usize) -> Self {
        Hyperparameters {
            vocab_size,
            embedding_dim,
            title_size: 30,
            history_size: 50,
            head_num: 20,
            head_dim: 20,
            attention_hidden_dim: 200,
            dropout: 0.2,
            npratio: 4,
            batch_size: 32,
            learning_rate: 1e-4,
            l2_penalty: 0.0,
            loss: Loss::CrossEntropy,
            optimizer: Optimizer::Adam,
            num_epochs: 1,
            shuffle: true,
            seed: None,
            rng: XorShiftRng::from_seed(rand::thread_rng().gen()),
        }
    }

    /// Load hyperparameters from a JSON file. Missing fields take their
    /// default values.
    ///
    /// Loss and optimizer names are checked first, so an unknown name is
    /// reported as a `ConfigError`. Without a stored `rng` state the RNG is
    /// seeded from `seed`, or from `DEFAULT_SEED`, which makes runs driven
    /// by the same file reproducible.
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self, failure::Error> {
        let reader = BufReader::new(File::open(path)?);
        let config: serde_json::Value = serde_json::from_reader(reader)?;

        if let Some(name) = config.get("loss").and_then(|x| x.as_str()) {
            name.parse::<Loss>()?;
        }
        if let Some(name) = config.get("optimizer").and_then(|x| x.as_str()) {
            name.parse::<Optimizer>()?;
        }

        let has_rng = config.get("rng").is_some();
        let mut hyper: Hyperparameters = serde_json::from_value(config)?;

        if !has_rng {
            hyper.rng = XorShiftRng::seed_from_u64(hyper.seed.unwrap_or(DEFAULT_SEED));
        }

        Ok(hyper)
    }

    /// Set the vocabulary size.
    pub fn vocab_size(mut self, vocab_size: usize) -> Self {
        self.vocab_size = vocab_size;
        self
    }

    /// Set the word embedding dimensionality.
    pub fn embedding_dim(mut self, embedding_dim: usize) -> Self {
        self.embedding_dim = embedding_dim;
        self
    }

    /// Set the number of tokens per title.
    pub fn title_size(mut self, title_size: usize) -> Self {
        self.title_size = title_size;
        self
    }

    /// Set the number of history slots.
    pub fn history_size(mut self, history_size: usize) -> Self {
        self.history_size = history_size;
        self
    }

    /// Set the number of attention heads.
    pub fn head_num(mut self, head_num: usize) -> Self {
        self.head_num = head_num;
        self
    }

    /// Set the dimensionality of each attention head.
    pub fn head_dim(mut self, head_dim: usize) -> Self {
        self.head_dim = head_dim;
        self
    }

    /// Set the hidden size of the attention pooling projections.
    pub fn attention_hidden_dim(mut self, attention_hidden_dim: usize) -> Self {
        self.attention_hidden_dim = attention_hidden_dim;
        self
    }

    /// Set the dropout rate applied during training to word embeddings,
    /// attention weights and pooled vectors.
    pub fn dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }

    /// Set the number of negatives sampled per click.
    pub fn npratio(mut self, npratio: usize) -> Self {
        self.npratio = npratio;
        self
    }

    /// Set the minibatch size.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the learning rate.
    pub fn learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the L2 penalty.
    pub fn l2_penalty(mut self, l2_penalty: f32) -> Self {
        self.l2_penalty = l2_penalty;
        self
    }

    /// Set the loss function.
    pub fn loss(mut self, loss: Loss) -> Self {
        self.loss = loss;
        self
    }

    /// Set the optimizer type.
    pub fn optimizer(mut self, optimizer: Optimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Set the number of epochs to run per each `fit` call.
    pub fn num_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    /// Set whether candidate lists are shuffled when sampled.
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Set the random number generator.
    pub fn rng(mut self, rng: XorShiftRng) -> Self {
        self.rng = rng;
        self
    }

    /// Set the random number generator from seed.
    pub fn from_seed(mut self, seed: [u8; 16]) -> Self {
        self.rng = XorShiftRng::from_seed(seed);
        self
    }

    /// Seed the random number generator from a number. The seed is kept in
    /// the serialized hyperparameters.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self.rng = XorShiftRng::seed_from_u64(seed);
        self
    }

    /// Number of tokens per title the model is configured for.
    pub fn tokens_per_title(&self) -> usize {
        self.title_size
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("vocab_size", self.vocab_size),
            ("embedding_dim", self.embedding_dim),
            ("title_size", self.title_size),
            ("history_size", self.history_size),
            ("head_num", self.head_num),
            ("head_dim", self.head_dim),
            ("attention_hidden_dim", self.attention_hidden_dim),
            ("npratio", self.npratio),
            ("batch_size", self.batch_size),
        ];

        for &(name, value) in sizes.iter() {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    name,
                    reason: "must be positive".to_owned(),
                });
            }
        }

        if !(self.dropout >= 0.0 && self.dropout < 1.0) {
            return Err(ConfigError::InvalidValue {
                name: "dropout",
                reason: format!("{} is outside of [0, 1)", self.dropout),
            });
        }

        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ConfigError::InvalidValue {
                name: "learning_rate",
                reason: format!("{} is not a positive number", self.learning_rate),
            });
        }

        if !(self.l2_penalty.is_finite() && self.l2_penalty >= 0.0) {
            return Err(ConfigError::InvalidValue {
                name: "l2_penalty",
                reason: format!("{} is not a non-negative number", self.l2_penalty),
            });
        }

        Ok(())
    }

    /// Build the model with randomly initialised parameters.
    pub fn build(mut self) -> Result<NrmsModel, ConfigError> {
        self.validate()?;

        let params = {
            let dims = Dimensions::from(&self);
            let mut source = RandomInit::new(&mut self.rng);
            Parameters::new(&mut source, &dims)
        };

        Ok(NrmsModel {
            hyper: self,
            params: params.map_err(checkpoint_to_config)?,
        })
    }

    /// Build the model with a pretrained `(vocab_size, embedding_dim)` word
    /// embedding table.
    pub fn build_with_embeddings(mut self, embeddings: Arr) -> Result<NrmsModel, ConfigError> {
        self.validate()?;

        let expected = (self.vocab_size, self.embedding_dim);
        if embeddings.dim() != expected {
            return Err(ConfigError::EmbeddingShapeMismatch {
                expected,
                found: embeddings.dim(),
            });
        }

        let params = {
            let dims = Dimensions::from(&self);
            let mut source = RandomInit::new(&mut self.rng).with_embeddings(embeddings);
            Parameters::new(&mut source, &dims)
        };

        Ok(NrmsModel {
            hyper: self,
            params: params.map_err(checkpoint_to_config)?,
        })
    }
}

fn checkpoint_to_config(error: CheckpointError) -> ConfigError {
    match error {
        CheckpointError::ShapeMismatch {
            expected, found, ..
        } => ConfigError::EmbeddingShapeMismatch { expected, found },
        CheckpointError::Config(error) => error,
        error => ConfigError::InvalidValue {
            name: "parameters",
            reason: error.to_string(),
        },
    }
}

/// Layer sizes, detached from the RNG so the two can be borrowed separately.
struct Dimensions {
    vocab_size: usize,
    embedding_dim: usize,
    head_num: usize,
    head_dim: usize,
    attention_hidden_dim: usize,
    dropout: f32,
}

impl<'a> From<&'a Hyperparameters> for Dimensions {
    fn from(hyper: &'a Hyperparameters) -> Self {
        Dimensions {
            vocab_size: hyper.vocab_size,
            embedding_dim: hyper.embedding_dim,
            head_num: hyper.head_num,
            head_dim: hyper.head_dim,
            attention_hidden_dim: hyper.attention_hidden_dim,
            dropout: hyper.dropout,
        }
    }
}

#[derive(Clone, Debug)]
struct Parameters {
    news: NewsEncoder,
    user: UserEncoder,
}

impl Parameters {
    fn new(source: &mut dyn ParameterSource, dims: &Dimensions) -> Result<Self, CheckpointError> {
        let news = NewsEncoder::new(
            source,
            dims.vocab_size,
            dims.embedding_dim,
            dims.head_num,
            dims.head_dim,
            dims.attention_hidden_dim,
            dims.dropout,
        )?;
        let user = UserEncoder::new(
            source,
            news.output_dim(),
            dims.head_num,
            dims.head_dim,
            dims.attention_hidden_dim,
            dims.dropout,
        )?;

        Ok(Parameters { news, user })
    }

    fn named(&self) -> Vec<&Parameter> {
        let mut parameters = self.news.parameters();
        parameters.extend(self.user.parameters());
        parameters
    }
}

/// `(1, 1)` loss of one sample given its `(1, candidates)` scores.
fn sample_loss<B: Backend>(backend: &B, loss: Loss, scores: &B::Tensor, labels: &[f32]) -> B::Tensor {
    let num_candidates = labels.len();

    match loss {
        Loss::CrossEntropy => {
            let targets = Arr::from_shape_fn((1, num_candidates), |(_, idx)| -labels[idx]);
            let log_probabilities = backend.log_softmax_rows(scores);

            backend.sum(&backend.mul(&log_probabilities, &backend.constant(targets)))
        }
        Loss::LogLoss => {
            // Rows of [s, 0] have log-softmax [log σ(s), log(1 - σ(s))].
            let pairs = backend.dot(
                &backend.transpose(scores),
                &backend.constant(Arr::from_shape_fn((1, 2), |(_, col)| {
                    if col == 0 {
                        1.0
                    } else {
                        0.0
                    }
                })),
            );
            let targets = Arr::from_shape_fn((num_candidates, 2), |(idx, col)| {
                if col == 0 {
                    -labels[idx]
                } else {
                    -(1.0 - labels[idx])
                }
            });
            let log_probabilities = backend.log_softmax_rows(&pairs);
            let total = backend.sum(&backend.mul(&log_probabilities, &backend.constant(targets)));

            backend.scale(&total, 1.0 / num_candidates as f32)
        }
    }
}

fn logistic(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().fold(::std::f32::MIN, |acc, &x| acc.max(x));
    let exponentiated: Vec<f32> = scores.iter().map(|&x| (x - max).exp()).collect();
    let total: f32 = exponentiated.iter().sum();

    exponentiated.into_iter().map(|x| x / total).collect()
}

fn dot<'a, I: IntoIterator<Item = &'a f32>>(lhs: &[f32], rhs: I) -> f32 {
    lhs.iter().zip(rhs).map(|(x, y)| x * y).sum()
}

fn check_finite(values: Vec<f32>) -> Result<Vec<f32>, PredictionError> {
    if values.iter().all(|x| x.is_finite()) {
        Ok(values)
    } else {
        Err(PredictionError::InvalidPredictionValue)
    }
}

/// The NRMS model.
#[derive(Clone, Debug)]
pub struct NrmsModel {
    hyper: Hyperparameters,
    params: Parameters,
}

impl NrmsModel {
    /// The hyperparameters the model was built with.
    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyper
    }

    /// Dimensionality of news and user vectors.
    pub fn output_dim(&self) -> usize {
        self.params.news.output_dim()
    }

    /// Number of history slots the user encoder sees.
    pub fn history_size(&self) -> usize {
        self.hyper.history_size
    }

    /// Every trainable parameter with its unique name.
    pub fn named_parameters(&self) -> Vec<&Parameter> {
        self.params.named()
    }

    /// News vector for a single title.
    pub fn encode_news(&self, tokens: &[TokenId]) -> Vec<f32> {
        self.params.news.encode(&Eager, tokens).iter().cloned().collect()
    }

    /// User vector for a history given as titles, one per slot.
    pub fn encode_user(&self, history: &[Vec<TokenId>]) -> Vec<f32> {
        self.params
            .user
            .encode(&Eager, &self.params.news, history)
            .iter()
            .cloned()
            .collect()
    }

    /// Scores of `candidates` against the user of `history`. Each distinct
    /// title is encoded once.
    fn scores<B: Backend>(
        &self,
        backend: &B,
        history: &[Vec<TokenId>],
        candidates: &[Vec<TokenId>],
    ) -> B::Tensor {
        let mut encoded = HashMap::new();

        let history: Vec<_> = history
            .iter()
            .map(|tokens| self.encode_once(backend, tokens, &mut encoded))
            .collect();
        let news: Vec<_> = candidates
            .iter()
            .map(|tokens| self.encode_once(backend, tokens, &mut encoded))
            .collect();

        let user = self.params.user.encode_vectors(backend, &history);

        backend.dot(&user, &backend.transpose(&backend.stack_rows(&news)))
    }

    fn encode_once<B: Backend>(
        &self,
        backend: &B,
        tokens: &[TokenId],
        encoded: &mut HashMap<Vec<TokenId>, B::Tensor>,
    ) -> B::Tensor {
        if let Some(vector) = encoded.get(tokens) {
            return vector.clone();
        }

        let vector = self.params.news.encode(backend, tokens);
        encoded.insert(tokens.to_vec(), vector.clone());

        vector
    }

    fn sample_scores<B: Backend>(&self, backend: &B, batch: &Batch, idx: usize) -> B::Tensor {
        let history: Vec<_> = (0..batch.history_size())
            .map(|slot| batch.history_tokens(idx, slot))
            .collect();
        let candidates: Vec<_> = (0..batch.max_candidates())
            .filter(|&slot| batch.mask[[idx, slot]])
            .map(|slot| batch.candidate_tokens(idx, slot))
            .collect();

        self.scores(backend, &history, &candidates)
    }

    /// `(1, 1)` loss of sample `idx` of a batch.
    fn batch_sample_loss<B: Backend>(&self, backend: &B, batch: &Batch, idx: usize) -> B::Tensor {
        let scores = self.sample_scores(backend, batch, idx);
        sample_loss(backend, self.hyper.loss, &scores, &batch.sample_labels(idx))
    }

    /// `(1, 1)` mean loss over the non-empty samples of a batch.
    fn batch_loss<B: Backend>(&self, backend: &B, batch: &Batch) -> Option<B::Tensor> {
        let losses: Vec<_> = (0..batch.len())
            .filter(|&idx| batch.num_candidates(idx) > 0)
            .map(|idx| self.batch_sample_loss(backend, batch, idx))
            .collect();

        let num_losses = losses.len();
        let total = losses
            .into_iter()
            .fold(None, |acc: Option<B::Tensor>, loss| match acc {
                Some(acc) => Some(backend.add(&acc, &loss)),
                None => Some(loss),
            })?;

        Some(backend.scale(&total, 1.0 / num_losses as f32))
    }

    /// Raw scores of the real candidates of every sample in `batch`, in
    /// candidate order.
    pub fn predict_batch(&self, batch: &Batch) -> Vec<Vec<f32>> {
        (0..batch.len())
            .map(|idx| {
                if batch.num_candidates(idx) == 0 {
                    Vec::new()
                } else {
                    self.sample_scores(&Eager, batch, idx).iter().cloned().collect()
                }
            })
            .collect()
    }

    /// Mean loss over `samples`, without dropout and without updating
    /// parameters.
    pub fn loss(&self, samples: &[Sample], articles: &ArticleTokens) -> f32 {
        let batch = collate(samples, articles, self.hyper.history_size);

        self.batch_loss(&Eager, &batch)
            .map(|loss| loss.scalar_sum())
            .unwrap_or(0.0)
    }

    fn optimizer(&self) -> Optimizers {
        match self.hyper.optimizer {
            Optimizer::Adagrad => Optimizers::Adagrad(
                wyrm::optim::Adagrad::new()
                    .learning_rate(self.hyper.learning_rate)
                    .l2_penalty(self.hyper.l2_penalty),
            ),

            Optimizer::Adam => Optimizers::Adam(
                wyrm::optim::Adam::new()
                    .learning_rate(self.hyper.learning_rate)
                    .l2_penalty(self.hyper.l2_penalty),
            ),
        }
    }

    /// Run the forward and backward passes of every non-empty sample of
    /// `batch`, one sample at a time, so that only one sample's nodes are
    /// alive at once. The gradients of the mean loss accumulate in the
    /// parameter nodes of `graph`. Returns the mean loss, stopping early at
    /// the first non-finite sample loss.
    fn accumulate_gradients(&self, graph: &Graph, batch: &Batch) -> Option<f32> {
        let samples: Vec<usize> = (0..batch.len())
            .filter(|&idx| batch.num_candidates(idx) > 0)
            .collect();

        if samples.is_empty() {
            return None;
        }

        let weight = 1.0 / samples.len() as f32;
        let mut total = 0.0;

        for idx in samples {
            let mut loss = self.batch_sample_loss(graph, batch, idx).into_variable();

            loss.forward();
            let value = loss.value().scalar_sum();

            if !value.is_finite() {
                return Some(value);
            }

            loss.backward(weight);
            total += weight * value;
        }

        Some(total)
    }

    /// Fit the model on clicked impressions for `num_epochs` epochs.
    /// Returns the mean minibatch loss of the last epoch.
    pub fn fit(
        &mut self,
        impressions: &[Impression],
        articles: &ArticleTokens,
    ) -> Result<f32, FittingError> {
        let missing = articles.count_missing(
            impressions
                .iter()
                .flat_map(|x| x.history().iter().chain(x.inview())),
        );
        if missing > 0 {
            warn!(missing, "articles without titles use the unknown-title encoding");
        }
        if articles.title_size() != self.hyper.title_size {
            warn!(
                expected = self.hyper.title_size,
                found = articles.title_size(),
                "article titles have an unexpected length"
            );
        }

        let optimizer = self.optimizer();
        let mut epoch_loss = 0.0;

        for epoch in 0..self.hyper.num_epochs {
            let mut samples = training_set(
                impressions,
                self.hyper.npratio,
                self.hyper.shuffle,
                &mut self.hyper.rng,
            );

            if samples.is_empty() {
                return Err(FittingError::NoInteractions);
            }

            self.hyper.rng.shuffle(&mut samples);

            let mut loss_value = 0.0;
            let mut num_batches = 0;

            for (batch_idx, chunk) in minibatches(&samples, self.hyper.batch_size).enumerate() {
                let batch = collate(chunk, articles, self.hyper.history_size);
                let graph = Graph::new(true, XorShiftRng::from_seed(self.hyper.rng.gen()));

                let value = match self.accumulate_gradients(&graph, &batch) {
                    Some(value) => value,
                    None => continue,
                };

                if !value.is_finite() {
                    return Err(FittingError::NonFiniteLoss { epoch });
                }

                optimizer.step(&graph.parameters());

                debug!(epoch, batch = batch_idx, loss = value, "fitted minibatch");

                loss_value += value;
                num_batches += 1;
            }

            epoch_loss = loss_value / num_batches.max(1) as f32;

            info!(
                epoch,
                loss = epoch_loss,
                samples = samples.len(),
                "finished epoch"
            );
        }

        Ok(epoch_loss)
    }

    /// Encode every article once and return a ranker scoring histories
    /// and candidates against the cached news vectors.
    pub fn ranker(&self, articles: &ArticleTokens) -> NrmsRanker {
        let titles: Vec<_> = articles.iter().collect();
        let news_vectors: HashMap<ArticleId, Arr> = titles
            .par_iter()
            .map(|&(article_id, tokens)| (article_id, self.params.news.encode(&Eager, tokens)))
            .collect();
        let unknown = self
            .params
            .news
            .encode(&Eager, &vec![PADDING_TOKEN; articles.title_size()]);

        info!(articles = news_vectors.len(), "precomputed news vectors");

        NrmsRanker {
            model: self,
            news_vectors,
            unknown,
        }
    }

    fn to_checkpoint(&self) -> Checkpoint {
        Checkpoint {
            hyperparameters: self.hyper.clone(),
            parameters: self
                .params
                .named()
                .into_iter()
                .map(|parameter| {
                    let (rows, cols) = parameter.shape();
                    StoredParameter {
                        name: parameter.name().to_owned(),
                        rows,
                        cols,
                        values: parameter.value().value().iter().cloned().collect(),
                    }
                })
                .collect(),
        }
    }

    fn from_checkpoint(checkpoint: Checkpoint) -> Result<Self, CheckpointError> {
        let hyper = checkpoint.hyperparameters;
        hyper.validate()?;

        let mut stored = StoredValues::new();
        for parameter in checkpoint.parameters {
            let StoredParameter {
                name,
                rows,
                cols,
                values,
            } = parameter;
            let found = (values.len(), 1);

            match Arr::from_shape_vec((rows, cols), values) {
                Ok(value) => stored.insert(name, value),
                Err(_) => {
                    return Err(CheckpointError::ShapeMismatch {
                        name,
                        expected: (rows, cols),
                        found,
                    })
                }
            }
        }

        let params = Parameters::new(&mut stored, &Dimensions::from(&hyper))?;

        Ok(NrmsModel { hyper, params })
    }

    /// Write hyperparameters and parameter values to a JSON file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), failure::Error> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, &self.to_checkpoint())?;
        Ok(())
    }

    /// Restore a model written by `save`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, failure::Error> {
        let reader = BufReader::new(File::open(path)?);
        let checkpoint: Checkpoint = serde_json::from_reader(reader)?;
        Ok(NrmsModel::from_checkpoint(checkpoint)?)
    }
}

#[derive(Serialize, Deserialize)]
struct StoredParameter {
    name: String,
    rows: usize,
    cols: usize,
    values: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct Checkpoint {
    hyperparameters: Hyperparameters,
    parameters: Vec<StoredParameter>,
}

/// Scores candidates against precomputed news vectors.
#[derive(Debug)]
pub struct NrmsRanker<'a> {
    model: &'a NrmsModel,
    news_vectors: HashMap<ArticleId, Arr>,
    unknown: Arr,
}

impl<'a> NrmsRanker<'a> {
    fn news_vector(&self, article_id: ArticleId) -> &Arr {
        if article_id == PADDING_ARTICLE {
            return &self.unknown;
        }
        self.news_vectors.get(&article_id).unwrap_or(&self.unknown)
    }

    /// Cached news vector of an article.
    pub fn news_embedding(&self, article_id: ArticleId) -> Vec<f32> {
        self.news_vector(article_id).iter().cloned().collect()
    }

    /// Click probability of a single candidate under the sigmoid head.
    pub fn predict_single(
        &self,
        user: &NewsUser,
        candidate: ArticleId,
    ) -> Result<f32, PredictionError> {
        let score = self.predict(user, &[candidate])?[0];
        Ok(logistic(score))
    }

    /// Softmax over the candidate list; probabilities sum to one.
    pub fn predict_probabilities(
        &self,
        user: &NewsUser,
        candidates: &[ArticleId],
    ) -> Result<Vec<f32>, PredictionError> {
        let scores = self.predict(user, candidates)?;
        check_finite(softmax(&scores))
    }
}

impl<'a> NewsRankingModel for NrmsRanker<'a> {
    type UserRepresentation = NewsUser;

    fn user_representation(&self, history: &[ArticleId]) -> Result<NewsUser, PredictionError> {
        let vectors: Vec<Arr> = fixed_history(history, self.model.hyper.history_size)
            .into_iter()
            .map(|article_id| self.news_vector(article_id).clone())
            .collect();

        let user = self.model.params.user.encode_vectors(&Eager, &vectors);

        Ok(NewsUser::new(check_finite(user.iter().cloned().collect())?))
    }

    fn predict(
        &self,
        user: &NewsUser,
        candidates: &[ArticleId],
    ) -> Result<Vec<f32>, PredictionError> {
        check_finite(
            candidates
                .iter()
                .map(|&article_id| dot(user.embedding(), self.news_vector(article_id).iter()))
                .collect(),
        )
    }
}
