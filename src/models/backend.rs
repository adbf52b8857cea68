//! Execution backends.
//!
//! The layers and encoders are written once against the `Backend` trait.
//! `Eager` evaluates directly on dense arrays and is used for inference;
//! `Graph` builds a `wyrm` computation graph whose parameters receive
//! gradients, and is used for training.
use std::cell::{Cell, RefCell};
use std::sync::Arc;

use ndarray::Axis;
use rand::distributions::{Distribution, Uniform};
use rand::XorShiftRng;

use wyrm;
use wyrm::{Arr, BoxedNode, HogwildParameter, ParameterNode, Variable};

/// Added to softmax denominators by the eager backend.
pub const SOFTMAX_EPSILON: f32 = 1e-8;

/// Primitive operations on 2-D `f32` tensors.
pub trait Backend {
    /// The tensor type the backend operates on.
    type Tensor: Clone;

    /// A trainable parameter.
    fn parameter(&self, parameter: &Arc<HogwildParameter>) -> Self::Tensor;
    /// Rows `ids` of an embedding table, one row per id.
    fn lookup(&self, table: &Arc<HogwildParameter>, ids: &[usize]) -> Self::Tensor;
    /// A constant that receives no gradient.
    fn constant(&self, value: Arr) -> Self::Tensor;
    /// `(rows, columns)` of a tensor.
    fn dim(&self, x: &Self::Tensor) -> (usize, usize);

    /// Matrix product.
    fn dot(&self, lhs: &Self::Tensor, rhs: &Self::Tensor) -> Self::Tensor;
    /// Elementwise sum of equally shaped tensors.
    fn add(&self, lhs: &Self::Tensor, rhs: &Self::Tensor) -> Self::Tensor;
    /// Elementwise product of equally shaped tensors.
    fn mul(&self, lhs: &Self::Tensor, rhs: &Self::Tensor) -> Self::Tensor;
    /// Transpose.
    fn transpose(&self, x: &Self::Tensor) -> Self::Tensor;
    /// Elementwise hyperbolic tangent.
    fn tanh(&self, x: &Self::Tensor) -> Self::Tensor;
    /// Softmax taken independently over each row.
    fn softmax_rows(&self, x: &Self::Tensor) -> Self::Tensor;
    /// Log-softmax taken independently over each row.
    fn log_softmax_rows(&self, x: &Self::Tensor) -> Self::Tensor;
    /// Inverted dropout with drop probability `rate`.
    fn dropout(&self, x: &Self::Tensor, rate: f32) -> Self::Tensor;

    /// Multiply every element by `factor`.
    fn scale(&self, x: &Self::Tensor, factor: f32) -> Self::Tensor;
    /// `(1, 1)` sum of all elements.
    fn sum(&self, x: &Self::Tensor) -> Self::Tensor;
    /// Add a `(1, columns)` row to every row of `x`.
    fn add_row(&self, x: &Self::Tensor, row: &Self::Tensor) -> Self::Tensor;
    /// Columns `start..stop` of `x`.
    fn columns(&self, x: &Self::Tensor, start: usize, stop: usize) -> Self::Tensor;
    /// Concatenate equally tall tensors along the column axis.
    fn concat_columns(&self, parts: &[Self::Tensor]) -> Self::Tensor;
    /// Stack `(1, columns)` rows into a `(rows.len(), columns)` tensor.
    fn stack_rows(&self, rows: &[Self::Tensor]) -> Self::Tensor;
}

/// Backend evaluating directly on dense arrays. Dropout is disabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct Eager;

fn row_max<'a, I: Iterator<Item = &'a f32>>(values: I) -> f32 {
    values.fold(::std::f32::MIN, |acc, &x| acc.max(x))
}

impl Backend for Eager {
    type Tensor = Arr;

    fn parameter(&self, parameter: &Arc<HogwildParameter>) -> Arr {
        parameter.value().clone()
    }

    fn lookup(&self, table: &Arc<HogwildParameter>, ids: &[usize]) -> Arr {
        let table = table.value();
        let mut rows = Arr::zeros((ids.len(), table.cols()));

        for (mut row, &id) in rows.outer_iter_mut().zip(ids) {
            row.assign(&table.row(id));
        }

        rows
    }

    fn constant(&self, value: Arr) -> Arr {
        value
    }

    fn dim(&self, x: &Arr) -> (usize, usize) {
        x.dim()
    }

    fn dot(&self, lhs: &Arr, rhs: &Arr) -> Arr {
        lhs.dot(rhs)
    }

    fn add(&self, lhs: &Arr, rhs: &Arr) -> Arr {
        lhs + rhs
    }

    fn mul(&self, lhs: &Arr, rhs: &Arr) -> Arr {
        lhs * rhs
    }

    fn transpose(&self, x: &Arr) -> Arr {
        x.t().to_owned()
    }

    fn tanh(&self, x: &Arr) -> Arr {
        x.mapv(f32::tanh)
    }

    fn softmax_rows(&self, x: &Arr) -> Arr {
        let mut result = x.clone();

        for mut row in result.outer_iter_mut() {
            let max = row_max(row.iter());
            row.mapv_inplace(|v| (v - max).exp());
            let denominator = row.scalar_sum() + SOFTMAX_EPSILON;
            row.mapv_inplace(|v| v / denominator);
        }

        result
    }

    fn log_softmax_rows(&self, x: &Arr) -> Arr {
        let mut result = x.clone();

        for mut row in result.outer_iter_mut() {
            let max = row_max(row.iter());
            let log_normalizer = row.iter().map(|&v| (v - max).exp()).sum::<f32>().ln();
            row.mapv_inplace(|v| v - max - log_normalizer);
        }

        result
    }

    fn dropout(&self, x: &Arr, _: f32) -> Arr {
        x.clone()
    }

    fn scale(&self, x: &Arr, factor: f32) -> Arr {
        x.mapv(|v| v * factor)
    }

    fn sum(&self, x: &Arr) -> Arr {
        Arr::from_elem((1, 1), x.scalar_sum())
    }

    fn add_row(&self, x: &Arr, row: &Arr) -> Arr {
        x + row
    }

    fn columns(&self, x: &Arr, start: usize, stop: usize) -> Arr {
        Arr::from_shape_fn((x.rows(), stop - start), |(row, col)| x[(row, start + col)])
    }

    fn concat_columns(&self, parts: &[Arr]) -> Arr {
        let rows = parts.first().map(|x| x.rows()).unwrap_or(0);
        let total = parts.iter().map(|x| x.cols()).sum();
        let mut result = Arr::zeros((rows, total));

        let mut offset = 0;
        for part in parts {
            for ((row, col), &value) in part.indexed_iter() {
                result[(row, offset + col)] = value;
            }
            offset += part.cols();
        }

        result
    }

    fn stack_rows(&self, rows: &[Arr]) -> Arr {
        let cols = rows.first().map(|x| x.cols()).unwrap_or(0);
        let mut result = Arr::zeros((rows.len(), cols));

        for (mut destination, source) in result.outer_iter_mut().zip(rows) {
            destination.assign(&source.row(0));
        }

        result
    }
}

/// A node in a `Graph` together with its shape.
#[derive(Clone)]
pub struct GraphTensor {
    variable: Variable<BoxedNode>,
    dim: (usize, usize),
}

impl GraphTensor {
    fn new(variable: Variable<BoxedNode>, dim: (usize, usize)) -> Self {
        GraphTensor { variable, dim }
    }

    /// The underlying graph variable.
    pub fn variable(&self) -> &Variable<BoxedNode> {
        &self.variable
    }

    /// Take ownership of the underlying graph variable.
    pub fn into_variable(self) -> Variable<BoxedNode> {
        self.variable
    }
}

/// Backend recording operations into a `wyrm` graph.
///
/// Parameters are wrapped once per graph, so every use of a parameter
/// accumulates into the same gradient. Losses built on the same graph keep
/// accumulating until the optimizer steps over `parameters`, which lets a
/// minibatch be processed one sample at a time.
pub struct Graph {
    training: bool,
    rng: RefCell<XorShiftRng>,
    parameters: RefCell<Vec<(Arc<HogwildParameter>, Variable<ParameterNode>)>>,
    size: Cell<usize>,
}

impl Graph {
    /// Build a new graph. Dropout masks are drawn from `rng` when
    /// `training` is set.
    pub fn new(training: bool, rng: XorShiftRng) -> Self {
        Graph {
            training,
            rng: RefCell::new(rng),
            parameters: RefCell::new(Vec::new()),
            size: Cell::new(0),
        }
    }

    /// Parameter nodes used so far, for the optimizer.
    pub fn parameters(&self) -> Vec<Variable<ParameterNode>> {
        self.parameters
            .borrow()
            .iter()
            .map(|&(_, ref node)| node.clone())
            .collect()
    }

    /// Number of values held by the non-parameter nodes recorded so far.
    pub fn size(&self) -> usize {
        self.size.get()
    }

    fn count(&self, dim: (usize, usize)) {
        self.size.set(self.size.get() + dim.0 * dim.1);
    }

    fn record(&self, variable: Variable<BoxedNode>, dim: (usize, usize)) -> GraphTensor {
        self.count(dim);
        GraphTensor::new(variable, dim)
    }

    fn input(&self, value: Arr) -> Variable<wyrm::InputNode> {
        self.count(value.dim());
        wyrm::InputNode::new(value)
    }

    fn parameter_node(&self, parameter: &Arc<HogwildParameter>) -> Variable<ParameterNode> {
        let mut parameters = self.parameters.borrow_mut();

        if let Some(&(_, ref node)) = parameters
            .iter()
            .find(|&&(ref shared, _)| Arc::ptr_eq(shared, parameter))
        {
            return node.clone();
        }

        let node = ParameterNode::shared(parameter.clone());
        parameters.push((parameter.clone(), node.clone()));

        node
    }

    /// Subtract each row's current maximum. The maxima are read from the
    /// values computed while the graph is built and enter as constants,
    /// which leaves the softmax unchanged.
    fn shift_by_row_max(&self, x: &GraphTensor) -> GraphTensor {
        let mut maxima = Arr::zeros(x.dim);

        {
            let value = x.variable.value();
            for (mut destination, row) in maxima.outer_iter_mut().zip(value.outer_iter()) {
                let max = row_max(row.iter());
                destination.fill(if max.is_finite() { max } else { 0.0 });
            }
        }

        let maxima = self.input(maxima);

        self.record((x.variable.clone() - maxima).boxed(), x.dim)
    }

    /// Concatenate along `axis`, pairing halves so that no intermediate is
    /// copied more than `log2(parts.len())` times.
    fn concatenate(&self, parts: &[GraphTensor], axis: Axis) -> GraphTensor {
        match parts.len() {
            0 => self.constant(Arr::zeros((0, 0))),
            1 => parts[0].clone(),
            len => {
                let (head, tail) = parts.split_at(len / 2);
                let head = self.concatenate(head, axis);
                let tail = self.concatenate(tail, axis);

                let dim = if axis == Axis(0) {
                    (head.dim.0 + tail.dim.0, head.dim.1)
                } else {
                    (head.dim.0, head.dim.1 + tail.dim.1)
                };

                self.record(head.variable.stack(&tail.variable, axis).boxed(), dim)
            }
        }
    }
}

impl Backend for Graph {
    type Tensor = GraphTensor;

    fn parameter(&self, parameter: &Arc<HogwildParameter>) -> GraphTensor {
        let dim = parameter.value().dim();

        GraphTensor::new(self.parameter_node(parameter).boxed(), dim)
    }

    fn lookup(&self, table: &Arc<HogwildParameter>, ids: &[usize]) -> GraphTensor {
        let cols = table.value().cols();
        let index = wyrm::IndexInputNode::new(ids);

        self.record(
            self.parameter_node(table).index(&index).boxed(),
            (ids.len(), cols),
        )
    }

    fn constant(&self, value: Arr) -> GraphTensor {
        let dim = value.dim();

        GraphTensor::new(self.input(value).boxed(), dim)
    }

    fn dim(&self, x: &GraphTensor) -> (usize, usize) {
        x.dim
    }

    fn dot(&self, lhs: &GraphTensor, rhs: &GraphTensor) -> GraphTensor {
        debug_assert_eq!(lhs.dim.1, rhs.dim.0);

        self.record(
            lhs.variable.dot(&rhs.variable).boxed(),
            (lhs.dim.0, rhs.dim.1),
        )
    }

    fn add(&self, lhs: &GraphTensor, rhs: &GraphTensor) -> GraphTensor {
        debug_assert_eq!(lhs.dim, rhs.dim);

        self.record((lhs.variable.clone() + rhs.variable.clone()).boxed(), lhs.dim)
    }

    fn mul(&self, lhs: &GraphTensor, rhs: &GraphTensor) -> GraphTensor {
        debug_assert_eq!(lhs.dim, rhs.dim);

        self.record((lhs.variable.clone() * rhs.variable.clone()).boxed(), lhs.dim)
    }

    fn transpose(&self, x: &GraphTensor) -> GraphTensor {
        self.record(x.variable.t().boxed(), (x.dim.1, x.dim.0))
    }

    fn tanh(&self, x: &GraphTensor) -> GraphTensor {
        self.record(x.variable.tanh().boxed(), x.dim)
    }

    fn softmax_rows(&self, x: &GraphTensor) -> GraphTensor {
        let log_softmax = self.log_softmax_rows(x);

        self.record(log_softmax.variable.exp().boxed(), x.dim)
    }

    fn log_softmax_rows(&self, x: &GraphTensor) -> GraphTensor {
        let shifted = self.shift_by_row_max(x);

        // Every entry of `row_sums` holds the sum of its row.
        let ones = self.input(Arr::ones((x.dim.1, x.dim.1)));
        let row_sums = shifted.variable.exp().dot(&ones);
        self.count(x.dim);
        self.count(x.dim);

        self.record(
            (shifted.variable.clone() - row_sums.ln()).boxed(),
            x.dim,
        )
    }

    fn dropout(&self, x: &GraphTensor, rate: f32) -> GraphTensor {
        if !self.training || rate <= 0.0 {
            return x.clone();
        }

        let keep = 1.0 - rate;
        let uniform = Uniform::new(0.0f32, 1.0);
        let mask = {
            let mut rng = self.rng.borrow_mut();
            Arr::zeros(x.dim).map(|_| {
                if uniform.sample(&mut *rng) < keep {
                    1.0 / keep
                } else {
                    0.0
                }
            })
        };

        self.mul(x, &self.constant(mask))
    }

    fn scale(&self, x: &GraphTensor, factor: f32) -> GraphTensor {
        // The scalar is broadcast into a constant of the same shape.
        self.count(x.dim);
        self.record((x.variable.clone() * factor).boxed(), x.dim)
    }

    fn sum(&self, x: &GraphTensor) -> GraphTensor {
        self.record(x.variable.scalar_sum().boxed(), (1, 1))
    }

    fn add_row(&self, x: &GraphTensor, row: &GraphTensor) -> GraphTensor {
        debug_assert_eq!(x.dim.1, row.dim.1);

        let ones = self.constant(Arr::ones((x.dim.0, 1)));
        self.add(x, &self.dot(&ones, row))
    }

    fn columns(&self, x: &GraphTensor, start: usize, stop: usize) -> GraphTensor {
        debug_assert!(start <= stop && stop <= x.dim.1);

        self.record(
            x.variable.slice(s![.., start..stop]).boxed(),
            (x.dim.0, stop - start),
        )
    }

    fn concat_columns(&self, parts: &[GraphTensor]) -> GraphTensor {
        self.concatenate(parts, Axis(1))
    }

    fn stack_rows(&self, rows: &[GraphTensor]) -> GraphTensor {
        self.concatenate(rows, Axis(0))
    }
}
