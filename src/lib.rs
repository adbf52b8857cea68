#![deny(missing_docs)]
//! # nrms
//!
//! `nrms` implements Neural News Recommendation with Multi-Head Self-Attention:
//! article titles are encoded with multi-head self-attention followed by
//! additive attention pooling, a user's click history is encoded the same way
//! over the resulting article vectors, and candidates are scored by the dot
//! product of the two.
//!
//! ## Example
//!
//! ```rust,no_run
//! # extern crate nrms;
//! # extern crate rand;
//! # use rand::SeedableRng;
//! let behaviors = nrms::datasets::load_behaviors("behaviors.csv").unwrap();
//! let articles = nrms::datasets::load_article_tokens("articles.csv", 30).unwrap();
//!
//! let mut rng = rand::XorShiftRng::from_seed([42; 16]);
//! let (train, test) = nrms::data::user_based_split(&behaviors, &mut rng, 0.2);
//!
//! let mut model = nrms::models::nrms::Hyperparameters::new(articles.vocab_size(), 32)
//!     .title_size(30)
//!     .history_size(20)
//!     .head_num(4)
//!     .head_dim(8)
//!     .attention_hidden_dim(32)
//!     .npratio(4)
//!     .learning_rate(1e-3)
//!     .num_epochs(2)
//!     .rng(rng)
//!     .build()
//!     .unwrap();
//!
//! let loss = model.fit(train.data(), &articles).unwrap();
//! let ranker = model.ranker(&articles);
//! let metrics = nrms::evaluation::evaluate(&ranker, test.data()).unwrap();
//!
//! println!("Loss {} and test AUC {}", loss, metrics.auc);
//! ```
#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate itertools;

#[macro_use]
extern crate failure;
#[macro_use]
extern crate tracing;

#[macro_use]
extern crate ndarray;

extern crate csv;
extern crate rand;
extern crate rayon;
extern crate serde;
extern crate serde_json;
extern crate siphasher;
extern crate wyrm;

pub mod batching;
pub mod data;
pub mod datasets;
pub mod evaluation;
pub mod models;
pub mod sampling;

/// Alias for article identifiers.
pub type ArticleId = usize;
/// Alias for user identifiers.
pub type UserId = usize;
/// Alias for vocabulary indices produced by the tokenizer.
pub type TokenId = usize;
/// Alias for timestamps.
pub type Timestamp = usize;

/// Prediction error types.
#[derive(Debug, Fail)]
pub enum PredictionError {
    /// Failed prediction due to numerical issues.
    #[fail(display = "Invalid prediction value: non-finite or not a number.")]
    InvalidPredictionValue,
}

/// Fitting error types.
#[derive(Debug, Fail)]
pub enum FittingError {
    /// No impression produced a training sample.
    #[fail(display = "No clicked impressions to train on.")]
    NoInteractions,
    /// The loss diverged.
    #[fail(display = "Loss became non-finite at epoch {}.", epoch)]
    NonFiniteLoss {
        /// Epoch at which the loss diverged.
        epoch: usize,
    },
}

/// Configuration error types. These are raised while building a model and
/// are not recoverable.
#[derive(Debug, Fail, PartialEq)]
pub enum ConfigError {
    /// Unsupported loss name.
    #[fail(display = "Unknown loss: {}.", _0)]
    UnknownLoss(String),
    /// Unsupported optimizer name.
    #[fail(display = "Unknown optimizer: {}.", _0)]
    UnknownOptimizer(String),
    /// A hyperparameter is outside of its valid range.
    #[fail(display = "Invalid value for {}: {}.", name, reason)]
    InvalidValue {
        /// Hyperparameter name.
        name: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
    /// The pretrained embedding table does not match the declared shape.
    #[fail(
        display = "Embedding shape mismatch: expected {:?}, found {:?}.",
        expected,
        found
    )]
    EmbeddingShapeMismatch {
        /// Declared `(vocab_size, embedding_dim)`.
        expected: (usize, usize),
        /// Shape of the supplied table.
        found: (usize, usize),
    },
}

/// Trait describing models that can rank candidate articles given a
/// user's click history.
pub trait NewsRankingModel {
    /// The representation the model computes from a click history.
    type UserRepresentation: std::fmt::Debug;
    /// Compute a user representation from past clicks.
    fn user_representation(
        &self,
        history: &[ArticleId],
    ) -> Result<Self::UserRepresentation, PredictionError>;
    /// Score `candidates` for the user. Scores are returned in the order
    /// of `candidates`; higher means more likely to be clicked.
    fn predict(
        &self,
        user: &Self::UserRepresentation,
        candidates: &[ArticleId],
    ) -> Result<Vec<f32>, PredictionError>;
}
