//! Attention layers.
//!
//! Every layer declares its parameters with explicit shapes when it is
//! constructed and runs against any `Backend`. Inputs are `(sequence, features)`
//! matrices for a single item; batching happens one level up.
use super::backend::Backend;
use super::{CheckpointError, Init, Parameter, ParameterSource};

/// Affine projection `x · W + b`.
#[derive(Clone, Debug)]
pub struct Dense {
    weights: Parameter,
    bias: Parameter,
}

impl Dense {
    /// Declare a `(input_dim, output_dim)` projection named `name`.
    pub fn new(
        source: &mut dyn ParameterSource,
        name: &str,
        input_dim: usize,
        output_dim: usize,
    ) -> Result<Self, CheckpointError> {
        Ok(Dense {
            weights: Parameter::declare(
                source,
                &format!("{}.weights", name),
                (input_dim, output_dim),
                Init::Glorot,
            )?,
            bias: Parameter::declare(
                source,
                &format!("{}.bias", name),
                (1, output_dim),
                Init::Zeros,
            )?,
        })
    }

    /// Project every row of `x`.
    pub fn forward<B: Backend>(&self, backend: &B, x: &B::Tensor) -> B::Tensor {
        let projected = backend.dot(x, &backend.parameter(self.weights.value()));
        backend.add_row(&projected, &backend.parameter(self.bias.value()))
    }

    /// Input features.
    pub fn input_dim(&self) -> usize {
        self.weights.shape().0
    }

    /// Owned parameters.
    pub fn parameters(&self) -> Vec<&Parameter> {
        vec![&self.weights, &self.bias]
    }
}

/// Additive attention pooling: collapses a `(sequence, features)` input to
/// a single `(1, features)` vector.
///
/// Each position is scored with `q · tanh(x·W + b)`, the scores are
/// normalised with a softmax over the sequence, and the output is the
/// weighted sum of the input rows. Dropout is applied to the pooled output.
#[derive(Clone, Debug)]
pub struct AttentionPooling {
    projection: Dense,
    query: Parameter,
    dropout: f32,
}

impl AttentionPooling {
    /// Declare a pooling layer over `input_dim` features with a
    /// `hidden_dim` scoring projection.
    pub fn new(
        source: &mut dyn ParameterSource,
        name: &str,
        input_dim: usize,
        hidden_dim: usize,
        dropout: f32,
    ) -> Result<Self, CheckpointError> {
        Ok(AttentionPooling {
            projection: Dense::new(source, &format!("{}.projection", name), input_dim, hidden_dim)?,
            query: Parameter::declare(
                source,
                &format!("{}.query", name),
                (hidden_dim, 1),
                Init::Glorot,
            )?,
            dropout,
        })
    }

    /// `(1, sequence)` attention weights. Non-negative and summing to one,
    /// including for an all-zero input.
    pub fn weights<B: Backend>(&self, backend: &B, x: &B::Tensor) -> B::Tensor {
        let projected = backend.tanh(&self.projection.forward(backend, x));
        let scores = backend.dot(&projected, &backend.parameter(self.query.value()));

        backend.softmax_rows(&backend.transpose(&scores))
    }

    /// Pool `x` to `(1, features)`.
    pub fn forward<B: Backend>(&self, backend: &B, x: &B::Tensor) -> B::Tensor {
        let pooled = backend.dot(&self.weights(backend, x), x);
        backend.dropout(&pooled, self.dropout)
    }

    /// Features of the input, and of the pooled output.
    pub fn output_dim(&self) -> usize {
        self.projection.input_dim()
    }

    /// Owned parameters.
    pub fn parameters(&self) -> Vec<&Parameter> {
        let mut parameters = self.projection.parameters();
        parameters.push(&self.query);
        parameters
    }
}

/// Multi-head scaled dot-product self-attention without masking.
///
/// Maps a `(sequence, input_dim)` input to `(sequence, head_num * head_dim)`.
/// Dropout is applied to the attention weights of every head.
#[derive(Clone, Debug)]
pub struct SelfAttention {
    head_num: usize,
    head_dim: usize,
    dropout: f32,
    query: Dense,
    key: Dense,
    value: Dense,
}

impl SelfAttention {
    /// Declare the query, key and value projections.
    pub fn new(
        source: &mut dyn ParameterSource,
        name: &str,
        input_dim: usize,
        head_num: usize,
        head_dim: usize,
        dropout: f32,
    ) -> Result<Self, CheckpointError> {
        let output_dim = head_num * head_dim;

        Ok(SelfAttention {
            head_num,
            head_dim,
            dropout,
            query: Dense::new(source, &format!("{}.query", name), input_dim, output_dim)?,
            key: Dense::new(source, &format!("{}.key", name), input_dim, output_dim)?,
            value: Dense::new(source, &format!("{}.value", name), input_dim, output_dim)?,
        })
    }

    /// Self-attention over `x`, which serves as query, key and value source.
    pub fn forward<B: Backend>(&self, backend: &B, x: &B::Tensor) -> B::Tensor {
        self.attend(backend, x, x, x)
    }

    /// Attention with separate query, key and value sources of equal length.
    pub fn attend<B: Backend>(
        &self,
        backend: &B,
        queries: &B::Tensor,
        keys: &B::Tensor,
        values: &B::Tensor,
    ) -> B::Tensor {
        let queries = self.query.forward(backend, queries);
        let keys = self.key.forward(backend, keys);
        let values = self.value.forward(backend, values);

        let scale = 1.0 / (self.head_dim as f32).sqrt();

        let heads: Vec<_> = (0..self.head_num)
            .map(|head| {
                let start = head * self.head_dim;
                let stop = start + self.head_dim;

                let query = backend.columns(&queries, start, stop);
                let key = backend.columns(&keys, start, stop);
                let value = backend.columns(&values, start, stop);

                let scores = backend.scale(&backend.dot(&query, &backend.transpose(&key)), scale);
                let weights = backend.dropout(&backend.softmax_rows(&scores), self.dropout);

                backend.dot(&weights, &value)
            })
            .collect();

        backend.concat_columns(&heads)
    }

    /// `head_num * head_dim`.
    pub fn output_dim(&self) -> usize {
        self.head_num * self.head_dim
    }

    /// Owned parameters.
    pub fn parameters(&self) -> Vec<&Parameter> {
        let mut parameters = self.query.parameters();
        parameters.extend(self.key.parameters());
        parameters.extend(self.value.parameters());
        parameters
    }
}
