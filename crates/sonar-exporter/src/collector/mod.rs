//! Periodic collection of SonarQube measures.

use std::{sync::Arc, time::Duration};

use sonar_metrics::{MeasureRegistry, RegistrationError, TagDecoder};
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    client::{ClientError, SourceApi},
    metrics::{ExporterMetrics, PollStage},
};


/// Configuration of a [`Collector`].
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Separator between the label name and value in component tags, e.g. `#` for `team#core`.
    /// An empty separator disables tag decoding.
    pub tag_separator: String,
    /// Interval between polls.
    pub poll_interval: Duration,
    /// Delay before the first poll.
    pub initial_delay: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            tag_separator: "#".to_owned(),
            poll_interval: Duration::from_secs(60),
            initial_delay: Duration::ZERO,
        }
    }
}

/// Fatal error initializing a [`Collector`].
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Metric catalog could not be fetched.
    #[error("unable to get SonarQube metrics: {0}")]
    Catalog(#[source] ClientError),
    /// Metrics from the catalog could not be registered.
    #[error("unable to register SonarQube metrics: {0}")]
    Registration(#[from] RegistrationError),
    /// The catalog contains no supported metrics.
    #[error("no metrics to gather detected")]
    NoMetrics,
}

/// Collector of SonarQube measures before initialization.
///
/// Call [`Self::initialize()`] to register gauges for the SonarQube metric catalog;
/// this produces a [`PollingCollector`] that can be [run](PollingCollector::run()).
#[derive(Debug)]
pub struct Collector<S> {
    api: Arc<S>,
    registry: Arc<MeasureRegistry>,
    config: CollectorConfig,
    metrics: ExporterMetrics,
}

impl<S: SourceApi> Collector<S> {
    /// Creates a collector reporting measures obtained from `api` into the `registry`.
    pub fn new(api: Arc<S>, registry: Arc<MeasureRegistry>, config: CollectorConfig) -> Self {
        Self {
            api,
            registry,
            config,
            metrics: ExporterMetrics::default(),
        }
    }

    /// Sets the exporter metrics updated by the collector.
    #[must_use]
    pub fn with_metrics(mut self, metrics: ExporterMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Fetches the metric catalog and registers gauges for all supported metrics.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be fetched or registered, or if it doesn't contain
    /// supported metrics. These errors are fatal for the exporter.
    pub async fn initialize(self) -> Result<PollingCollector<S>, CollectorError> {
        let catalog = self
            .api
            .get_metrics()
            .await
            .map_err(CollectorError::Catalog)?;
        let metric_keys = self.registry.init_metrics(&catalog)?;
        if metric_keys.is_empty() {
            return Err(CollectorError::NoMetrics);
        }
        tracing::info!(
            catalog_len = catalog.len(),
            registered = metric_keys.len(),
            label_set = %self.registry.label_set(),
            "Registered gauges for SonarQube metrics"
        );

        let decoder = TagDecoder::new(
            &self.config.tag_separator,
            self.registry.label_set().clone(),
        );
        let reporter = ComponentReporter {
            api: self.api,
            registry: self.registry,
            decoder,
            metric_keys,
            metrics: self.metrics.clone(),
        };
        Ok(PollingCollector {
            reporter: Arc::new(reporter),
            metrics: self.metrics,
            poll_interval: self.config.poll_interval,
            initial_delay: self.config.initial_delay,
        })
    }
}

/// Reports measures of individual components. Shared among per-component tasks.
#[derive(Debug)]
struct ComponentReporter<S> {
    api: Arc<S>,
    registry: Arc<MeasureRegistry>,
    decoder: TagDecoder,
    metric_keys: Vec<String>,
    metrics: ExporterMetrics,
}

impl<S: SourceApi> ComponentReporter<S> {
    async fn report_component(&self, key: &str) {
        tracing::debug!(component = key, "Updating metrics for component");
        let component = match self.api.get_component(key).await {
            Ok(component) => component,
            Err(err) => {
                tracing::warn!(component = key, %err, "Unable to get component");
                self.metrics.observe_error(PollStage::Component);
                return;
            }
        };
        let measures = match self.api.get_measures(key, &self.metric_keys).await {
            Ok(measures) => measures,
            Err(err) => {
                tracing::warn!(component = key, %err, "Unable to get measures of component");
                self.metrics.observe_error(PollStage::Measures);
                return;
            }
        };

        let labels = self.decoder.decode(&component.tags);
        let outcome = self
            .registry
            .report(&component.key, labels, &measures.component.measures);
        tracing::debug!(component = key, ?outcome, "Reported measures of component");
    }
}

/// Initialized collector that polls SonarQube periodically.
#[derive(Debug)]
pub struct PollingCollector<S> {
    reporter: Arc<ComponentReporter<S>>,
    metrics: ExporterMetrics,
    poll_interval: Duration,
    initial_delay: Duration,
}

impl<S: SourceApi> PollingCollector<S> {
    /// Returns keys of the metrics requested for each component.
    pub fn metric_keys(&self) -> &[String] {
        &self.reporter.metric_keys
    }

    /// Runs the polling loop until a stop signal is received via `stop_receiver`
    /// (or the sender is dropped).
    ///
    /// Each poll lists components and spawns a task per component. Failures of individual
    /// components are logged and do not affect other components or subsequent polls.
    pub async fn run(self, mut stop_receiver: watch::Receiver<()>) {
        tracing::info!(
            poll_interval = ?self.poll_interval,
            initial_delay = ?self.initial_delay,
            "Starting SonarQube collector"
        );
        let mut delay = self.initial_delay;
        loop {
            tokio::select! {
                _ = stop_receiver.changed() => break,
                () = tokio::time::sleep(delay) => { /* continue polling */ }
            }
            // Listing components may take up to the request timeout; don't delay stopping on it.
            let tasks = tokio::select! {
                _ = stop_receiver.changed() => break,
                tasks = self.poll() => tasks,
            };
            tokio::spawn(supervise(tasks, self.metrics.clone()));
            delay = self.poll_interval;
        }
        tracing::info!("Stop signal received, SonarQube collector is shutting down");
    }

    /// Lists components and spawns a reporting task for each of them.
    async fn poll(&self) -> Vec<(String, JoinHandle<()>)> {
        let components = match self.reporter.api.search_components().await {
            Ok(components) => components,
            Err(err) => {
                tracing::warn!(%err, "Unable to get SonarQube components");
                self.metrics.observe_error(PollStage::Components);
                return vec![];
            }
        };
        tracing::debug!(count = components.len(), "Polling SonarQube components");
        self.metrics
            .components
            .set(i64::try_from(components.len()).unwrap_or(i64::MAX));

        components
            .into_iter()
            .map(|info| {
                let reporter = Arc::clone(&self.reporter);
                let key = info.key;
                let task_key = key.clone();
                let handle =
                    tokio::spawn(async move { reporter.report_component(&task_key).await });
                (key, handle)
            })
            .collect()
    }
}

/// Awaits per-component tasks of a single poll and logs panics.
async fn supervise(tasks: Vec<(String, JoinHandle<()>)>, metrics: ExporterMetrics) {
    for (component, handle) in tasks {
        if let Err(err) = handle.await {
            if err.is_panic() {
                tracing::error!(component, %err, "Reporting component has panicked");
                metrics.observe_error(PollStage::Panic);
            }
        }
    }
}
