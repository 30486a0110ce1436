use async_trait::async_trait;
use kiln::processor::{Generator, ProgressReporter};
use kiln::GenerationError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Generator that replays a script of outcomes.
///
/// Scripted outcomes are consumed in order; once the script runs dry every
/// call returns the fallback. A gated generator parks each call until
/// [`ScriptedGenerator::release`] lets it through.
pub struct ScriptedGenerator<O> {
    name: String,
    script: Mutex<VecDeque<Result<O, GenerationError>>>,
    fallback: Mutex<Option<Result<O, GenerationError>>>,
    steps: Vec<(i32, String)>,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
    finished: AtomicUsize,
}

impl<O: Clone + Send + Sync + 'static> ScriptedGenerator<O> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            steps: Vec::new(),
            delay: None,
            gate: None,
            calls: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        }
    }

    pub fn succeeding(name: impl Into<String>, output: O) -> Self {
        Self::new(name).with_fallback(Ok(output))
    }

    pub fn failing(name: impl Into<String>, error: GenerationError) -> Self {
        Self::new(name).with_fallback(Err(error))
    }

    pub fn with_fallback(self, outcome: Result<O, GenerationError>) -> Self {
        *self.fallback.lock() = Some(outcome);
        self
    }

    /// Queue outcomes to return before falling back.
    pub fn with_script(self, outcomes: impl IntoIterator<Item = Result<O, GenerationError>>) -> Self {
        self.script.lock().extend(outcomes);
        self
    }

    /// Progress reports issued, in order, before each outcome.
    pub fn with_steps(mut self, steps: impl IntoIterator<Item = (i32, &'static str)>) -> Self {
        self.steps = steps
            .into_iter()
            .map(|(progress, step)| (progress, step.to_string()))
            .collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Hold every call until released.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Let `n` parked (or future) calls proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn push(&self, outcome: Result<O, GenerationError>) {
        self.script.lock().push_back(outcome);
    }

    /// Calls that have started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls that have returned an outcome.
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> Result<O, GenerationError> {
        if let Some(outcome) = self.script.lock().pop_front() {
            return outcome;
        }
        self.fallback
            .lock()
            .clone()
            .unwrap_or_else(|| Err(GenerationError::new("no scripted outcome")))
    }
}

#[async_trait]
impl<I, O> Generator<I, O> for ScriptedGenerator<O>
where
    I: Send + 'static,
    O: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, _input: I, progress: &ProgressReporter) -> Result<O, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(GenerationError::new("generator gate closed")),
            }
        }

        for (value, step) in &self.steps {
            progress.report(*value, Some(step.as_str())).await;
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.next_outcome();
        self.finished.fetch_add(1, Ordering::SeqCst);
        outcome
    }
}
