//! Registry of gauges reporting SonarQube measures.

use parking_lot::{Mutex, RwLock};
use prometheus_client::{
    encoding::text,
    metrics::{family::Family, gauge::Gauge},
    registry::{Metric as RegistryMetric, Registry, Unit},
};
use thiserror::Error;

use std::{
    borrow::Cow,
    collections::{BTreeMap, HashMap},
    fmt,
    sync::atomic::AtomicU64,
};

use crate::{
    format::{write_for_prometheus, Format},
    labels::{escape_name, LabelSet, LabelValues, MissingLabels},
    model::{Measure, Metric, ValueKind},
    value,
};

type GaugeFamily = Family<LabelValues, Gauge<f64, AtomicU64>>;

/// Owner of a name registered by [`MeasureRegistry::register_internal()`].
const INTERNAL_OWNER: &str = "(internal)";

/// Error registering metrics in a [`MeasureRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// Metric name is already used by another metric.
    #[error("metric name `{name}` for `{key}` is already used by `{existing_key}`")]
    DuplicateName {
        /// Full metric name.
        name: String,
        /// Key of the metric being registered.
        key: String,
        /// Key of the metric that has registered the name first.
        existing_key: String,
    },
    /// Static label name (after escaping) coincides with a component label or another static label.
    #[error("static label `{name}` clashes with another label of the same name")]
    LabelClash {
        /// Escaped label name.
        name: String,
    },
}

/// Outcome of [`MeasureRegistry::report()`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The component was ignored since its labels don't match the registry label set.
    Rejected(MissingLabels),
    /// Measures were reported.
    Reported {
        /// Number of updated gauges.
        updated: usize,
        /// Number of skipped measures (unknown metric or unparsable value).
        skipped: usize,
    },
}

#[derive(Debug)]
struct RegisteredSeries {
    kind: ValueKind,
    family: GaugeFamily,
}

#[derive(Debug, Default)]
struct ReportState {
    series: HashMap<String, RegisteredSeries>,
    /// Labels last used for each component.
    component_labels: HashMap<String, LabelValues>,
}

#[derive(Debug)]
struct RegistryInner {
    registry: Registry,
    /// Full metric name -> key of the metric that registered it.
    names: HashMap<String, String>,
}

/// Registry exposing SonarQube measures as gauges.
///
/// Each supported metric from the SonarQube catalog is registered as a family of gauges,
/// with all families sharing the same [`LabelSet`]. Static labels are attached to every
/// metric as constant labels.
///
/// Reporting and encoding are serialized by an exclusive lock. When the labels of a component change,
/// points with the previous labels are removed from all families, so that a component never
/// has two live points for the same metric.
pub struct MeasureRegistry {
    namespace: String,
    label_set: LabelSet,
    export_empty_labels: bool,
    state: Mutex<ReportState>,
    inner: RwLock<RegistryInner>,
}

impl fmt::Debug for MeasureRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MeasureRegistry")
            .field("namespace", &self.namespace)
            .field("label_set", &self.label_set)
            .field("export_empty_labels", &self.export_empty_labels)
            .finish_non_exhaustive()
    }
}

impl MeasureRegistry {
    /// Creates a registry.
    ///
    /// - `namespace` is prepended to the names of all registered measures.
    /// - `static_labels` are constant labels attached to all metrics.
    /// - `tag_label_names` are the names of labels derived from component tags. Together with
    ///   the component label, they form the [`LabelSet`] of the registry.
    /// - If `export_empty_labels` is set, labels without values are reported as empty strings;
    ///   otherwise, components lacking some labels are not reported.
    ///
    /// # Errors
    ///
    /// Returns an error if a static label has the same name as a label from the [`LabelSet`],
    /// or if two static labels have the same escaped name. Such labels would produce samples
    /// with duplicate label names, which are rejected by Prometheus.
    pub fn new<I>(
        namespace: &str,
        static_labels: HashMap<String, String>,
        tag_label_names: I,
        export_empty_labels: bool,
    ) -> Result<Self, RegistrationError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let label_set = LabelSet::new(tag_label_names);
        let mut escaped_labels = BTreeMap::new();
        for (name, value) in static_labels {
            let name = escape_name(&name);
            if label_set.contains(&name) || escaped_labels.contains_key(&name) {
                return Err(RegistrationError::LabelClash { name });
            }
            escaped_labels.insert(name, value);
        }
        let registry = Registry::with_labels(
            escaped_labels
                .into_iter()
                .map(|(name, value)| (Cow::Owned(name), Cow::Owned(value))),
        );

        Ok(Self {
            namespace: if namespace.is_empty() {
                String::new()
            } else {
                escape_name(namespace)
            },
            label_set,
            export_empty_labels,
            state: Mutex::default(),
            inner: RwLock::new(RegistryInner {
                registry,
                names: HashMap::new(),
            }),
        })
    }

    /// Returns the label set shared by all gauges.
    pub fn label_set(&self) -> &LabelSet {
        &self.label_set
    }

    /// Returns the full gauge name for a metric key.
    pub fn metric_name(&self, key: &str) -> String {
        let name = escape_name(key);
        if self.namespace.is_empty() {
            name
        } else {
            format!("{}_{name}", self.namespace)
        }
    }

    /// Returns keys of all registered metrics in the alphabetic order.
    pub fn registered_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.state.lock().series.keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    /// Returns the current value of the gauge for the metric `key` and the specified label values
    /// (including the component label), or `None` if there is no such point.
    pub fn gauge_value(&self, key: &str, labels: &[(String, String)]) -> Option<f64> {
        let state = self.state.lock();
        let registered = state.series.get(key)?;
        let labels = labels.to_vec();
        let gauge = registered.family.get(&labels)?;
        Some(gauge.get())
    }

    /// Registers gauges for the metrics from the SonarQube catalog. Metrics that are already
    /// registered or have an unsupported type are skipped.
    ///
    /// Returns keys of the newly registered metrics.
    ///
    /// # Errors
    ///
    /// Returns an error if a gauge name is already used by another metric.
    pub fn init_metrics(&self, metrics: &[Metric]) -> Result<Vec<String>, RegistrationError> {
        let mut state = self.state.lock();
        let mut inner = self.inner.write();

        let mut registered_keys = vec![];
        for metric in metrics {
            if state.series.contains_key(&metric.key) {
                tracing::debug!(key = metric.key, "Metric is already registered");
                continue;
            }
            let kind = metric.value_kind();
            if kind == ValueKind::Unsupported {
                tracing::debug!(
                    key = metric.key,
                    metric_type = metric.metric_type,
                    "Metric type is not supported"
                );
                continue;
            }

            let name = self.metric_name(&metric.key);
            inner.claim_name(&name, &metric.key)?;
            let family = GaugeFamily::default();
            let help = metric.description.trim_end_matches('.');
            inner.registry.register(name, help, family.clone());
            state
                .series
                .insert(metric.key.clone(), RegisteredSeries { kind, family });
            registered_keys.push(metric.key.clone());
        }
        Ok(registered_keys)
    }

    /// Registers an auxiliary metric (e.g., one describing the exporter itself) under the full `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is already in use.
    pub fn register_internal(
        &self,
        name: &str,
        help: &str,
        unit: Option<Unit>,
        metric: impl RegistryMetric,
    ) -> Result<(), RegistrationError> {
        let mut inner = self.inner.write();
        let full_name = match &unit {
            Some(unit) => format!("{name}_{}", unit.as_str()),
            None => name.to_owned(),
        };
        inner.claim_name(&full_name, INTERNAL_OWNER)?;

        if let Some(unit) = unit {
            inner.registry.register_with_unit(name, help, unit, metric);
        } else {
            inner.registry.register(name, help, metric);
        }
        Ok(())
    }

    /// Reports measures of a component.
    ///
    /// `labels` are the labels derived from the component tags. The component label is added
    /// automatically; labels not in the [`LabelSet`] are discarded. If the resulting labels do not
    /// cover the entire label set, nothing is reported. Measures for unregistered metrics
    /// or with unparsable values are skipped.
    pub fn report(
        &self,
        component: &str,
        labels: HashMap<String, String>,
        measures: &[Measure],
    ) -> ReportOutcome {
        let mut state = self.state.lock();

        let labels = match self
            .label_set
            .resolve(component, labels, self.export_empty_labels)
        {
            Ok(labels) => labels,
            Err(err) => {
                tracing::debug!(
                    component,
                    label_set = %self.label_set,
                    "Ignoring component due to incorrect list of labels: {err}"
                );
                return ReportOutcome::Rejected(err);
            }
        };

        let ReportState {
            series,
            component_labels,
        } = &mut *state;
        let (mut updated, mut skipped) = (0, 0);
        for measure in measures {
            let Some(registered) = series.get(&measure.metric) else {
                tracing::debug!(component, metric = measure.metric, "Metric isn't registered");
                skipped += 1;
                continue;
            };

            match value::coerce(registered.kind, measure) {
                Ok(value) => {
                    registered.family.get_or_create(&labels).set(value);
                    updated += 1;
                }
                Err(err) => {
                    tracing::debug!(component, "Unable to convert measure: {err}");
                    skipped += 1;
                }
            }
        }

        if updated > 0 {
            Self::evict_stale_labels(series, component_labels, component, labels);
        }
        ReportOutcome::Reported { updated, skipped }
    }

    fn evict_stale_labels(
        series: &HashMap<String, RegisteredSeries>,
        component_labels: &mut HashMap<String, LabelValues>,
        component: &str,
        labels: LabelValues,
    ) {
        let Some(old_labels) = component_labels.get_mut(component) else {
            component_labels.insert(component.to_owned(), labels);
            return;
        };
        if *old_labels == labels {
            return;
        }

        tracing::debug!(
            component,
            ?old_labels,
            new_labels = ?labels,
            "Component labels have changed; removing stale points"
        );
        for registered in series.values() {
            registered.family.remove(old_labels);
        }
        *old_labels = labels;
    }

    /// Encodes all metrics in this registry using the specified format. Encoding never observes
    /// a partially applied [report](Self::report()).
    ///
    /// # Errors
    ///
    /// Proxies formatting errors of the provided `writer`.
    pub fn encode<W: fmt::Write>(&self, writer: &mut W, format: Format) -> fmt::Result {
        let _state = self.state.lock();
        let inner = self.inner.read();
        match format {
            Format::OpenMetrics => text::encode(writer, &inner.registry),
            Format::OpenMetricsForPrometheus | Format::Prometheus => {
                let mut open_metrics = String::new();
                text::encode(&mut open_metrics, &inner.registry)?;
                let keep_eof = format == Format::OpenMetricsForPrometheus;
                write_for_prometheus(writer, &open_metrics, keep_eof)
            }
        }
    }
}

impl RegistryInner {
    fn claim_name(&mut self, name: &str, key: &str) -> Result<(), RegistrationError> {
        if let Some(existing_key) = self.names.get(name) {
            return Err(RegistrationError::DuplicateName {
                name: name.to_owned(),
                key: key.to_owned(),
                existing_key: existing_key.clone(),
            });
        }
        self.names.insert(name.to_owned(), key.to_owned());
        Ok(())
    }
}
