//! Saga runner for compensating multi-step work.
//!
//! A saga is an ordered sequence of steps. Each step consumes the evolving
//! [`SagaContext`] and returns the new context plus an optional compensation.
//! The first step error triggers the compensations of all previously
//! committed steps in strict reverse order, after which that error is
//! returned; on success the final context is returned.
//!
//! Compensations receive the context observed immediately before compensation
//! begins, so forward steps can record side-channels (object names they
//! created) in context keys for their compensations to read. Compensation
//! errors are logged and ignored — undo is best-effort and a failing
//! compensation never skips the remaining ones.
//!
//! A saga is not concurrency-safe: run one saga per task; parallel work is
//! expressed as a single step that fans out internally.

use std::collections::HashMap;
use std::future::Future;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// String-keyed JSON value map threaded through saga steps.
#[derive(Debug, Clone, Default)]
pub struct SagaContext {
    values: HashMap<String, Value>,
}

impl SagaContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if `value` cannot be encoded.
    pub fn insert<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let encoded = serde_json::to_value(value).map_err(Error::serialization)?;
        self.values.insert(key.to_string(), encoded);
        Ok(())
    }

    /// Reads the value under `key`, if present.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the stored value cannot be decoded
    /// as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.values
            .get(key)
            .map(|value| serde_json::from_value(value.clone()).map_err(Error::serialization))
            .transpose()
    }
}

/// Best-effort undo for a committed step.
pub type Compensation = Box<dyn FnOnce(SagaContext) -> BoxFuture<'static, Result<()>> + Send>;

/// Wraps an async closure as a [`Compensation`].
pub fn compensation<F, Fut>(f: F) -> Compensation
where
    F: FnOnce(SagaContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Box::new(move |ctx| Box::pin(f(ctx)))
}

/// Result of a successful saga step.
pub struct StepOutput {
    /// The context to thread into the next step.
    pub ctx: SagaContext,
    /// Undo action registered for this step, if any.
    pub compensation: Option<Compensation>,
}

impl StepOutput {
    /// A committed step with nothing to undo.
    #[must_use]
    pub fn committed(ctx: SagaContext) -> Self {
        Self {
            ctx,
            compensation: None,
        }
    }

    /// A committed step with an undo action.
    #[must_use]
    pub fn with_compensation(ctx: SagaContext, compensation: Compensation) -> Self {
        Self {
            ctx,
            compensation: Some(compensation),
        }
    }
}

type StepFn = Box<dyn FnOnce(SagaContext) -> BoxFuture<'static, Result<StepOutput>> + Send>;

struct Step {
    name: &'static str,
    run: StepFn,
}

/// Ordered sequence of steps with reverse-order compensation on first failure.
pub struct Saga {
    name: &'static str,
    steps: Vec<Step>,
}

impl Saga {
    /// Creates an empty saga with the given name (used in logs).
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
        }
    }

    /// Appends a step to the saga.
    #[must_use]
    pub fn step<F, Fut>(mut self, name: &'static str, f: F) -> Self
    where
        F: FnOnce(SagaContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<StepOutput>> + Send + 'static,
    {
        self.steps.push(Step {
            name,
            run: Box::new(move |ctx| Box::pin(f(ctx))),
        });
        self
    }

    /// Executes the steps in order.
    ///
    /// # Errors
    ///
    /// Returns the first step error after running the compensations of all
    /// previously committed steps in reverse order.
    pub async fn run(self, ctx: SagaContext) -> Result<SagaContext> {
        let mut ctx = ctx;
        let mut committed: Vec<(&'static str, Compensation)> = Vec::with_capacity(self.steps.len());

        for step in self.steps {
            tracing::debug!(saga = self.name, step = step.name, "running saga step");
            match (step.run)(ctx.clone()).await {
                Ok(output) => {
                    ctx = output.ctx;
                    if let Some(comp) = output.compensation {
                        committed.push((step.name, comp));
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        saga = self.name,
                        step = step.name,
                        error = %err,
                        "saga step failed, compensating committed steps"
                    );
                    for (name, comp) in committed.into_iter().rev() {
                        if let Err(comp_err) = comp(ctx.clone()).await {
                            tracing::warn!(
                                saga = self.name,
                                step = name,
                                error = %comp_err,
                                "compensation failed, continuing"
                            );
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(ctx)
    }
}
