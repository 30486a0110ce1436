use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use crate::config::ProcessorConfig;
use crate::store::{JobStore, KindTables};

use super::generator::GeneratorSet;
use super::stats::ProcessorMetrics;
use super::supervisor::JobProcessor;

/// Builder for constructing a [`JobProcessor`] with explicit dependencies.
///
/// # Example
///
/// ```ignore
/// let processor = JobProcessorBuilder::new(ProcessorConfig::default())
///     .with_store(store)
///     .with_generators(generators)
///     .build()?;
/// processor.start().await?;
/// ```
pub struct JobProcessorBuilder<T: KindTables + 'static> {
    config: ProcessorConfig,
    store: Option<Arc<JobStore<T>>>,
    generators: Option<GeneratorSet>,
    metrics: Option<Arc<ProcessorMetrics>>,
}

impl<T: KindTables + 'static> fmt::Debug for JobProcessorBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("JobProcessorBuilder");
        debug.field("config", &self.config);
        debug.field("store_set", &self.store.is_some());
        debug.field("generators_set", &self.generators.is_some());
        debug.field("metrics_set", &self.metrics.is_some());
        if self.store.is_some() {
            debug.field("tables_type", &type_name::<T>());
        }
        debug.finish()
    }
}

impl<T: KindTables + 'static> JobProcessorBuilder<T> {
    pub fn new(config: ProcessorConfig) -> Self {
        Self {
            config,
            store: None,
            generators: None,
            metrics: None,
        }
    }

    pub fn with_store(mut self, store: Arc<JobStore<T>>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_generators(mut self, generators: GeneratorSet) -> Self {
        self.generators = Some(generators);
        self
    }

    /// Share an existing metrics object, e.g. with a status endpoint.
    pub fn with_metrics(mut self, metrics: Arc<ProcessorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> anyhow::Result<JobProcessor<T>> {
        self.config.validate()?;

        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store dependency missing"))?;
        let generators = self
            .generators
            .ok_or_else(|| anyhow::anyhow!("generators dependency missing"))?;
        let metrics = self.metrics.unwrap_or_default();

        Ok(JobProcessor::new(self.config, store, generators, metrics))
    }
}
