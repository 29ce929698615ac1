//! Typed saga definitions.

use std::marker::PhantomData;

use crate::step::{ErasedStep, Step};

/// An ordered list of steps taking an `I` and producing an `O`.
///
/// Each added step must accept the previous step's output, which the type
/// parameters enforce: adding a `Step<O, N>` to a `SagaDefinition<I, O>`
/// yields a `SagaDefinition<I, N>`. A definition is built once and then
/// shared by every execution; running only borrows it.
///
/// ```ignore
/// let saga = SagaDefinition::<Request>::new("checkout")
///     .add_step(validate)      // Request -> Request
///     .add_step(reserve)       // Request -> Reserved
///     .add_step(charge);       // Reserved -> Charged
/// ```
pub struct SagaDefinition<I, O = I> {
    name: String,
    steps: Vec<ErasedStep>,
    _types: PhantomData<fn(I) -> O>,
}

impl<I> SagaDefinition<I, I>
where
    I: Clone + Send + Sync + 'static,
{
    /// Creates an empty definition. With no steps, a run returns its input.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            _types: PhantomData,
        }
    }
}

impl<I, O> SagaDefinition<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    /// Appends a step consuming this definition's current output.
    pub fn add_step<N>(mut self, step: Step<O, N>) -> SagaDefinition<I, N>
    where
        N: Clone + Send + Sync + 'static,
    {
        self.steps.push(step.erase());
        SagaDefinition {
            name: self.name,
            steps: self.steps,
            _types: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub(crate) fn steps(&self) -> &[ErasedStep] {
        &self.steps
    }
}

impl<I, O> std::fmt::Debug for SagaDefinition<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaDefinition")
            .field("name", &self.name)
            .field(
                "steps",
                &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
