//! Ordered, fail-fast execution of the steps making up a PKI operation.
//!
//! A hard step that fails stops the pipeline and its error is returned
//! unchanged; the side effects of earlier steps are kept. A soft step that
//! fails is logged and recorded in the [`PipelineReport`], and the pipeline
//! carries on.

use tracing::{info, warn};

use crate::error::Result;

type StepFn<'a> = Box<dyn FnOnce() -> Result<()> + 'a>;

struct Step<'a> {
    name: &'static str,
    soft: bool,
    run: StepFn<'a>,
}

/// A soft step that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftFailure {
    pub step: &'static str,
    pub diagnostic: String,
}

/// What happened while running a pipeline to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Number of steps that ran.
    pub steps: usize,
    pub soft_failures: Vec<SoftFailure>,
}

impl PipelineReport {
    pub fn is_clean(&self) -> bool {
        self.soft_failures.is_empty()
    }

    pub fn failure(&self, step: &str) -> Option<&SoftFailure> {
        self.soft_failures.iter().find(|failure| failure.step == step)
    }
}

/// A named list of steps, run in insertion order.
///
/// ```
/// use cakit::pipeline::Pipeline;
///
/// let mut log = Vec::new();
/// let report = Pipeline::new("demo")
///     .step("first", || {
///         log.push(1);
///         Ok(())
///     })
///     .soft_step("advisory", || {
///         Err(cakit::CaError::PreconditionError("nothing to check".into()))
///     })
///     .run()
///     .unwrap();
/// assert_eq!(report.steps, 2);
/// assert_eq!(report.soft_failures.len(), 1);
/// ```
pub struct Pipeline<'a> {
    name: &'static str,
    steps: Vec<Step<'a>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
        }
    }

    /// Adds a step whose failure aborts the pipeline.
    pub fn step(mut self, name: &'static str, run: impl FnOnce() -> Result<()> + 'a) -> Self {
        self.steps.push(Step {
            name,
            soft: false,
            run: Box::new(run),
        });
        self
    }

    /// Adds a step whose failure is only reported.
    pub fn soft_step(mut self, name: &'static str, run: impl FnOnce() -> Result<()> + 'a) -> Self {
        self.steps.push(Step {
            name,
            soft: true,
            run: Box::new(run),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn run(self) -> Result<PipelineReport> {
        let mut report = PipelineReport::default();
        let total = self.steps.len();
        for (position, step) in self.steps.into_iter().enumerate() {
            info!(
                pipeline = self.name,
                step = step.name,
                "[{}/{total}] {}",
                position + 1,
                step.name
            );
            report.steps += 1;
            match (step.run)() {
                Ok(()) => {}
                Err(err) if step.soft => {
                    warn!(pipeline = self.name, step = step.name, error = %err, "step failed, continuing");
                    report.soft_failures.push(SoftFailure {
                        step: step.name,
                        diagnostic: err.to_string(),
                    });
                }
                Err(err) => {
                    warn!(pipeline = self.name, step = step.name, error = %err, "step failed, aborting");
                    return Err(err);
                }
            }
        }
        Ok(report)
    }
}
