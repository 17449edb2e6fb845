//! Internal metrics for the exporter itself.

use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue, LabelValueEncoder},
    metrics::{
        counter::Counter,
        family::Family,
        gauge::Gauge,
        histogram::{exponential_buckets, Histogram},
    },
};
use sonar_metrics::{MeasureRegistry, RegistrationError, Unit};

use std::fmt::{self, Write as _};

const PREFIX: &str = "sonar_exporter";

/// Stage of polling at which an error has occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum PollStage {
    /// Listing components.
    Components,
    /// Fetching details of a single component.
    Component,
    /// Fetching measures of a component.
    Measures,
    /// Reporting task has panicked.
    Panic,
}

impl PollStage {
    fn as_str(self) -> &'static str {
        match self {
            Self::Components => "components",
            Self::Component => "component",
            Self::Measures => "measures",
            Self::Panic => "panic",
        }
    }
}

impl fmt::Display for PollStage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl EncodeLabelValue for PollStage {
    fn encode(&self, encoder: &mut LabelValueEncoder<'_>) -> fmt::Result {
        encoder.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub(crate) struct PollErrorLabels {
    stage: PollStage,
}

/// Metrics describing the exporter itself: scraping and polling stats.
///
/// Metrics are shared among clones. They are only exported after being
/// [registered](Self::register()) in a [`MeasureRegistry`].
#[derive(Debug, Clone)]
pub struct ExporterMetrics {
    /// Scraping latency of the exporter.
    pub(crate) scrape_latency: Histogram,
    /// Size of the scraped metrics payload.
    pub(crate) scraped_size: Histogram,
    /// Number of components returned by the last successful poll.
    pub(crate) components: Gauge,
    /// Number of polling errors, grouped by stage.
    pub(crate) poll_errors: Family<PollErrorLabels, Counter>,
}

impl Default for ExporterMetrics {
    fn default() -> Self {
        Self {
            scrape_latency: Histogram::new(exponential_buckets(0.001, 2.0, 14)),
            // 1 KiB..=1 MiB
            scraped_size: Histogram::new(exponential_buckets(1_024.0, 4.0, 6)),
            components: Gauge::default(),
            poll_errors: Family::default(),
        }
    }
}

impl ExporterMetrics {
    /// Registers these metrics in the provided registry.
    ///
    /// # Errors
    ///
    /// Returns an error if metric names clash with the already registered metrics.
    pub fn register(&self, registry: &MeasureRegistry) -> Result<(), RegistrationError> {
        registry.register_internal(
            &format!("{PREFIX}_scrape_latency"),
            "Scraping latency of the exporter",
            Some(Unit::Seconds),
            self.scrape_latency.clone(),
        )?;
        registry.register_internal(
            &format!("{PREFIX}_scraped_size"),
            "Size of the scraped metrics payload",
            Some(Unit::Bytes),
            self.scraped_size.clone(),
        )?;
        registry.register_internal(
            &format!("{PREFIX}_components"),
            "Number of components returned by the last successful poll",
            None,
            self.components.clone(),
        )?;
        registry.register_internal(
            &format!("{PREFIX}_poll_errors"),
            "Number of errors polling SonarQube, grouped by stage",
            None,
            self.poll_errors.clone(),
        )
    }

    pub(crate) fn observe_error(&self, stage: PollStage) {
        self.poll_errors
            .get_or_create(&PollErrorLabels { stage })
            .inc();
    }

    #[cfg(test)]
    pub(crate) fn error_count(&self, stage: PollStage) -> u64 {
        self.poll_errors
            .get_or_create(&PollErrorLabels { stage })
            .get()
    }
}
