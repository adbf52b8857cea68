//! Models module.
use std::collections::HashMap;
use std::convert::TryFrom;
use std::str::FromStr;
use std::sync::Arc;

use rand::distributions::{Distribution, Normal};
use rand::Rng;

use wyrm::{Arr, HogwildParameter};

use super::ConfigError;

pub mod backend;
pub mod encoders;
pub mod layers;
pub mod nrms;

/// The user representation used for scoring.
#[derive(Clone, Debug)]
pub struct NewsUser {
    user_embedding: Vec<f32>,
}

impl NewsUser {
    /// Wrap a user vector.
    pub fn new(user_embedding: Vec<f32>) -> Self {
        NewsUser { user_embedding }
    }

    /// The user vector.
    pub fn embedding(&self) -> &[f32] {
        &self.user_embedding
    }
}

/// The loss used for training the model. Serialized by its
/// `snake_case` name.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum Loss {
    /// Softmax over the candidate list against a one-hot target.
    CrossEntropy,
    /// Independent sigmoid per candidate with binary cross-entropy.
    LogLoss,
}

impl FromStr for Loss {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Self, ConfigError> {
        match name {
            "cross_entropy" | "cross_entropy_loss" => Ok(Loss::CrossEntropy),
            "log_loss" => Ok(Loss::LogLoss),
            _ => Err(ConfigError::UnknownLoss(name.to_owned())),
        }
    }
}

impl TryFrom<String> for Loss {
    type Error = ConfigError;

    fn try_from(name: String) -> Result<Self, ConfigError> {
        name.parse()
    }
}

/// Optimizer used to train the model. Serialized by its `snake_case` name.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum Optimizer {
    /// Adagrad.
    Adagrad,
    /// Adam.
    Adam,
}

impl FromStr for Optimizer {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Self, ConfigError> {
        match name {
            "adagrad" => Ok(Optimizer::Adagrad),
            "adam" => Ok(Optimizer::Adam),
            _ => Err(ConfigError::UnknownOptimizer(name.to_owned())),
        }
    }
}

impl TryFrom<String> for Optimizer {
    type Error = ConfigError;

    fn try_from(name: String) -> Result<Self, ConfigError> {
        name.parse()
    }
}

/// Errors raised while restoring parameters from a checkpoint.
#[derive(Debug, Fail)]
pub enum CheckpointError {
    /// The checkpoint lacks a declared parameter.
    #[fail(display = "Checkpoint is missing parameter {}.", _0)]
    MissingParameter(String),
    /// A stored parameter does not have the declared shape.
    #[fail(
        display = "Parameter {} has shape {:?}, expected {:?}.",
        name,
        found,
        expected
    )]
    ShapeMismatch {
        /// Parameter name.
        name: String,
        /// Declared shape.
        expected: (usize, usize),
        /// Stored shape.
        found: (usize, usize),
    },
    /// The stored hyperparameters are invalid.
    #[fail(display = "Invalid checkpoint configuration: {}", _0)]
    Config(#[cause] ConfigError),
}

impl From<ConfigError> for CheckpointError {
    fn from(error: ConfigError) -> Self {
        CheckpointError::Config(error)
    }
}

/// How a freshly declared parameter is filled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Init {
    /// All zeros.
    Zeros,
    /// Normal with variance `2 / (rows + cols)`.
    Glorot,
    /// Normal with standard deviation `1 / cols`; pretrained values win
    /// when supplied.
    Embedding,
}

/// A named parameter shared between graphs.
#[derive(Clone, Debug)]
pub struct Parameter {
    name: String,
    value: Arc<HogwildParameter>,
}

impl Parameter {
    /// Declare a parameter of `shape`, filled by `source`.
    pub fn declare(
        source: &mut dyn ParameterSource,
        name: &str,
        shape: (usize, usize),
        init: Init,
    ) -> Result<Self, CheckpointError> {
        let value = source.create(name, shape, init)?;

        Ok(Parameter {
            name: name.to_owned(),
            value: Arc::new(HogwildParameter::new(value)),
        })
    }

    /// Parameter name, unique within a model.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shared value.
    pub fn value(&self) -> &Arc<HogwildParameter> {
        &self.value
    }

    /// Current shape.
    pub fn shape(&self) -> (usize, usize) {
        self.value.value().dim()
    }
}

/// Supplies values for declared parameters.
pub trait ParameterSource {
    /// Produce the value of parameter `name` with `shape`.
    fn create(
        &mut self,
        name: &str,
        shape: (usize, usize),
        init: Init,
    ) -> Result<Arr, CheckpointError>;
}

fn embedding_init<T: Rng>(rows: usize, cols: usize, rng: &mut T) -> Arr {
    let normal = Normal::new(0.0, 1.0 / cols as f64);
    Arr::zeros((rows, cols)).map(|_| normal.sample(rng) as f32)
}

fn dense_init<T: Rng>(rows: usize, cols: usize, rng: &mut T) -> Arr {
    let normal = Normal::new(0.0, (2.0 / (rows + cols) as f64).sqrt());
    Arr::zeros((rows, cols)).map(|_| normal.sample(rng) as f32)
}

/// Random initialisation, optionally with a pretrained embedding table.
pub struct RandomInit<'a, R: Rng + 'a> {
    rng: &'a mut R,
    embeddings: Option<Arr>,
}

impl<'a, R: Rng + 'a> RandomInit<'a, R> {
    /// Initialise from `rng`.
    pub fn new(rng: &'a mut R) -> Self {
        RandomInit {
            rng,
            embeddings: None,
        }
    }

    /// Use `embeddings` for parameters declared with `Init::Embedding`.
    pub fn with_embeddings(mut self, embeddings: Arr) -> Self {
        self.embeddings = Some(embeddings);
        self
    }
}

impl<'a, R: Rng + 'a> ParameterSource for RandomInit<'a, R> {
    fn create(
        &mut self,
        name: &str,
        shape: (usize, usize),
        init: Init,
    ) -> Result<Arr, CheckpointError> {
        let (rows, cols) = shape;

        match init {
            Init::Zeros => Ok(Arr::zeros(shape)),
            Init::Glorot => Ok(dense_init(rows, cols, self.rng)),
            Init::Embedding => match self.embeddings.take() {
                Some(embeddings) => {
                    if embeddings.dim() != shape {
                        return Err(CheckpointError::ShapeMismatch {
                            name: name.to_owned(),
                            expected: shape,
                            found: embeddings.dim(),
                        });
                    }
                    Ok(embeddings)
                }
                None => Ok(embedding_init(rows, cols, self.rng)),
            },
        }
    }
}

/// Parameter values restored by name, e.g. from a checkpoint.
#[derive(Clone, Debug, Default)]
pub struct StoredValues {
    values: HashMap<String, Arr>,
}

impl StoredValues {
    /// Build an empty store.
    pub fn new() -> Self {
        StoredValues {
            values: HashMap::new(),
        }
    }

    /// Add the value of parameter `name`.
    pub fn insert(&mut self, name: String, value: Arr) {
        self.values.insert(name, value);
    }
}

impl ParameterSource for StoredValues {
    fn create(
        &mut self,
        name: &str,
        shape: (usize, usize),
        _: Init,
    ) -> Result<Arr, CheckpointError> {
        let value = self
            .values
            .remove(name)
            .ok_or_else(|| CheckpointError::MissingParameter(name.to_owned()))?;

        if value.dim() != shape {
            return Err(CheckpointError::ShapeMismatch {
                name: name.to_owned(),
                expected: shape,
                found: value.dim(),
            });
        }

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, XorShiftRng};

    use super::*;

    #[test]
    fn parses_names() {
        assert_eq!("log_loss".parse::<Loss>(), Ok(Loss::LogLoss));
        assert_eq!("cross_entropy".parse::<Loss>(), Ok(Loss::CrossEntropy));
        assert_eq!(
            "hinge".parse::<Loss>(),
            Err(ConfigError::UnknownLoss("hinge".to_owned()))
        );
        assert_eq!("adam".parse::<Optimizer>(), Ok(Optimizer::Adam));
        assert!("sgd".parse::<Optimizer>().is_err());
    }

    #[test]
    fn serializes_by_name() {
        assert_eq!(
            serde_json::to_string(&Loss::CrossEntropy).unwrap(),
            "\"cross_entropy\""
        );
        assert_eq!(serde_json::to_string(&Optimizer::Adagrad).unwrap(), "\"adagrad\"");
        assert_eq!(
            serde_json::from_str::<Loss>("\"log_loss\"").unwrap(),
            Loss::LogLoss
        );
        assert!(serde_json::from_str::<Optimizer>("\"sgd\"").is_err());
    }

    #[test]
    fn random_init_uses_declared_shapes() {
        let mut rng = XorShiftRng::from_seed([42; 16]);
        let mut source = RandomInit::new(&mut rng);

        let dense = Parameter::declare(&mut source, "dense", (3, 5), Init::Glorot).unwrap();
        let bias = Parameter::declare(&mut source, "bias", (1, 5), Init::Zeros).unwrap();

        assert_eq!(dense.shape(), (3, 5));
        assert_eq!(dense.name(), "dense");
        assert!(bias.value().value().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn pretrained_embeddings_must_match() {
        let mut rng = XorShiftRng::from_seed([42; 16]);
        let mut source = RandomInit::new(&mut rng).with_embeddings(Arr::ones((4, 2)));

        assert!(Parameter::declare(&mut source, "embedding", (4, 3), Init::Embedding).is_err());
    }

    #[test]
    fn stored_values_are_validated() {
        let mut stored = StoredValues::new();
        stored.insert("a".to_owned(), Arr::ones((2, 2)));

        assert!(Parameter::declare(&mut stored.clone(), "a", (2, 2), Init::Zeros).is_ok());
        assert!(Parameter::declare(&mut stored.clone(), "a", (2, 3), Init::Zeros).is_err());
        assert!(Parameter::declare(&mut stored, "b", (2, 2), Init::Zeros).is_err());
    }
}
