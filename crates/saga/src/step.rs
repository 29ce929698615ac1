//! Saga step descriptors.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::error::StepError;

/// Type-erased value passed between steps.
pub(crate) type Value = Arc<dyn Any + Send + Sync>;

type ExecuteFn<In, Out> = Arc<dyn Fn(In) -> BoxFuture<'static, Result<Out, StepError>> + Send + Sync>;
type CompensateFn<In, Out> =
    Arc<dyn Fn(In, Out) -> BoxFuture<'static, Result<(), StepError>> + Send + Sync>;

/// One unit of work in a saga: an `execute` action and an optional
/// `compensate` action that undoes it.
///
/// `compensate` receives the same input `execute` was given, plus the output
/// it produced.
pub struct Step<In, Out> {
    name: String,
    execute: ExecuteFn<In, Out>,
    compensate: Option<CompensateFn<In, Out>>,
}

impl<In, Out> Step<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    pub fn new<F, Fut>(name: impl Into<String>, execute: F) -> Self
    where
        F: Fn(In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, StepError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            execute: Arc::new(move |input| {
                Box::pin(execute(input)) as BoxFuture<'static, Result<Out, StepError>>
            }),
            compensate: None,
        }
    }

    pub fn with_compensation<F, Fut>(mut self, compensate: F) -> Self
    where
        F: Fn(In, Out) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StepError>> + Send + 'static,
    {
        self.compensate = Some(Arc::new(move |input, output| {
            Box::pin(compensate(input, output)) as BoxFuture<'static, Result<(), StepError>>
        }));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_compensation(&self) -> bool {
        self.compensate.is_some()
    }
}

impl<In, Out> Step<In, Out>
where
    In: Clone + Send + Sync + 'static,
    Out: Clone + Send + Sync + 'static,
{
    pub(crate) fn erase(self) -> ErasedStep {
        let name = self.name;

        let execute = {
            let execute = self.execute;
            let name = name.clone();
            Arc::new(move |input: Value| {
                let execute = Arc::clone(&execute);
                let name = name.clone();
                Box::pin(async move {
                    let input = downcast::<In>(&input, &name)?;
                    let output = execute(input).await?;
                    Ok::<Value, StepError>(Arc::new(output))
                }) as BoxFuture<'static, Result<Value, StepError>>
            }) as ErasedExecute
        };

        let compensate = self.compensate.map(|compensate| {
            let name = name.clone();
            Arc::new(move |input: Value, output: Value| {
                let compensate = Arc::clone(&compensate);
                let name = name.clone();
                Box::pin(async move {
                    let input = downcast::<In>(&input, &name)?;
                    let output = downcast::<Out>(&output, &name)?;
                    compensate(input, output).await
                }) as BoxFuture<'static, Result<(), StepError>>
            }) as ErasedCompensate
        });

        ErasedStep {
            name,
            execute,
            compensate,
        }
    }
}

type ErasedExecute = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, StepError>> + Send + Sync>;
type ErasedCompensate =
    Arc<dyn Fn(Value, Value) -> BoxFuture<'static, Result<(), StepError>> + Send + Sync>;

/// A step with its input and output types erased, as stored by a definition.
pub(crate) struct ErasedStep {
    name: String,
    execute: ErasedExecute,
    compensate: Option<ErasedCompensate>,
}

impl ErasedStep {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn execute(&self, input: Value) -> BoxFuture<'static, Result<Value, StepError>> {
        (self.execute)(input)
    }

    pub(crate) fn compensation(
        &self,
        input: Value,
        output: Value,
    ) -> Option<BoxFuture<'static, Result<(), StepError>>> {
        self.compensate
            .as_ref()
            .map(|compensate| compensate(input, output))
    }
}

pub(crate) fn downcast<T: Clone + 'static>(value: &Value, step: &str) -> Result<T, StepError> {
    value.downcast_ref::<T>().cloned().ok_or_else(|| {
        StepError::new(format!(
            "step '{step}' received a value of an unexpected type"
        ))
    })
}
