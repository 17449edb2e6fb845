//! Data model of the SonarQube web API as consumed by the registry and the collector.

use serde::Deserialize;

/// Value kind of a [`Metric`], derived from its SonarQube type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Any numeric type (`INT`, `FLOAT`, `PERCENT`, `RATING`, `WORK_DUR` etc.).
    Numeric,
    /// `BOOL` type; reported as `1.0` / `0.0`.
    Boolean,
    /// Structured payload (`DATA`), which cannot be represented as a gauge.
    Unsupported,
}

impl ValueKind {
    /// Derives the value kind from the SonarQube metric type.
    pub fn from_metric_type(metric_type: &str) -> Self {
        match metric_type {
            "BOOL" => Self::Boolean,
            "DATA" => Self::Unsupported,
            _ => Self::Numeric,
        }
    }
}

/// Pagination info attached to list responses.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paging {
    /// 1-based page index.
    pub page_index: usize,
    /// Page size.
    pub page_size: usize,
    /// Total number of items across all pages.
    pub total: usize,
}

/// Short component info returned by `api/components/search`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComponentInfo {
    /// Unique component key.
    pub key: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Component qualifier (`TRK` for projects).
    #[serde(default)]
    pub qualifier: String,
    /// Organization (SonarCloud only).
    #[serde(default)]
    pub organization: Option<String>,
}

/// Response of `api/components/search`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComponentsPage {
    /// Pagination info.
    #[serde(default)]
    pub paging: Paging,
    /// Components on this page.
    #[serde(default)]
    pub components: Vec<ComponentInfo>,
}

/// Detailed component info returned by `api/components/show`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    /// Unique component key.
    pub key: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Component qualifier (`TRK` for projects).
    #[serde(default)]
    pub qualifier: String,
    /// Free-form tags. Tags in the `key<separator>value` form are converted to labels.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Project version, if any.
    #[serde(default)]
    pub version: Option<String>,
}

/// Response of `api/components/show`.
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentDetails {
    /// Requested component.
    pub component: Component,
}

/// Metric definition from the catalog returned by `api/metrics/search`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Metric {
    /// Unique key of the metric, e.g. `bugs`.
    pub key: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Description used as the gauge help.
    #[serde(default)]
    pub description: String,
    /// Metric type, e.g. `INT`, `BOOL` or `DATA`.
    #[serde(rename = "type", default)]
    pub metric_type: String,
    /// Metric domain, e.g. `Reliability`.
    #[serde(default)]
    pub domain: String,
    /// Whether the metric is hidden in the SonarQube UI.
    #[serde(default)]
    pub hidden: bool,
    /// Whether the metric is user-defined.
    #[serde(default)]
    pub custom: bool,
}

impl Metric {
    /// Returns the value kind of this metric.
    pub fn value_kind(&self) -> ValueKind {
        ValueKind::from_metric_type(&self.metric_type)
    }
}

/// Response of `api/metrics/search`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsPage {
    /// Metrics on this page.
    #[serde(default)]
    pub metrics: Vec<Metric>,
    /// Total number of metrics.
    #[serde(default)]
    pub total: usize,
    /// 1-based page index.
    #[serde(default)]
    pub p: usize,
    /// Page size.
    #[serde(default)]
    pub ps: usize,
}

/// Value of a measure relative to the leak period.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodValue {
    /// Raw value.
    #[serde(default)]
    pub value: String,
    /// Whether the value is the best possible one for the metric.
    #[serde(default)]
    pub best_value: bool,
}

/// Single measure of a component.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Measure {
    /// Key of the measured metric.
    pub metric: String,
    /// Raw direct value; empty if the metric is only measured on the leak period.
    #[serde(default)]
    pub value: String,
    /// Leak period value (SonarQube 8+).
    #[serde(default)]
    pub period: Option<PeriodValue>,
    /// Leak period values (older SonarQube versions).
    #[serde(default)]
    pub periods: Vec<PeriodValue>,
}

impl Measure {
    /// Creates a measure with the direct value.
    pub fn new(metric: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            value: value.into(),
            ..Self::default()
        }
    }

    /// Creates a measure that only has a leak period value.
    pub fn with_period(metric: impl Into<String>, period_value: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            period: Some(PeriodValue {
                value: period_value.into(),
                best_value: false,
            }),
            ..Self::default()
        }
    }

    /// Returns the raw value to be reported: the direct value if it's non-empty,
    /// otherwise the leak period value.
    pub fn raw_value(&self) -> &str {
        if !self.value.is_empty() {
            return &self.value;
        }
        self.period
            .as_ref()
            .or_else(|| self.periods.first())
            .map_or("", |period| period.value.as_str())
    }
}

/// Measured component in the `api/measures/component` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeasuredComponent {
    /// Component key.
    pub key: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Component qualifier.
    #[serde(default)]
    pub qualifier: String,
    /// Measures for the requested metrics. Metrics without a value are omitted.
    #[serde(default)]
    pub measures: Vec<Measure>,
}

/// Response of `api/measures/component`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Measures {
    /// Measured component.
    pub component: MeasuredComponent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializing_metrics_page() {
        let json = r#"{
            "metrics": [
                {"id": "1", "key": "bugs", "type": "INT", "name": "Bugs",
                 "description": "Bugs", "domain": "Reliability", "direction": -1,
                 "qualitative": false, "hidden": false, "custom": false},
                {"key": "ncloc_language_distribution", "type": "DATA", "name": "Lines"}
            ],
            "total": 2, "p": 1, "ps": 100
        }"#;
        let page: MetricsPage = serde_json::from_str(json).unwrap();

        assert_eq!(page.total, 2);
        assert_eq!(page.metrics[0].key, "bugs");
        assert_eq!(page.metrics[0].value_kind(), ValueKind::Numeric);
        assert_eq!(page.metrics[1].value_kind(), ValueKind::Unsupported);
        assert_eq!(page.metrics[1].description, "");
    }

    #[test]
    fn deserializing_component_details() {
        let json = r#"{
            "component": {
                "key": "org:proj", "name": "Project", "qualifier": "TRK",
                "analysisDate": "2021-03-01T12:00:00+0000",
                "tags": ["team#core", "misc"], "visibility": "public"
            }
        }"#;
        let details: ComponentDetails = serde_json::from_str(json).unwrap();

        assert_eq!(details.component.key, "org:proj");
        assert_eq!(details.component.tags, ["team#core", "misc"]);
        assert_eq!(details.component.version, None);
    }

    #[test]
    fn selecting_raw_measure_value() {
        let json = r#"{
            "component": {
                "key": "proj",
                "measures": [
                    {"metric": "bugs", "value": "3"},
                    {"metric": "new_bugs", "period": {"value": "42.5", "bestValue": false}},
                    {"metric": "new_smells", "periods": [{"index": 1, "value": "7"}]},
                    {"metric": "empty"}
                ]
            }
        }"#;
        let measures: Measures = serde_json::from_str(json).unwrap();
        let values: Vec<_> = measures
            .component
            .measures
            .iter()
            .map(Measure::raw_value)
            .collect();

        assert_eq!(values, ["3", "42.5", "7", ""]);
    }

    #[test]
    fn deriving_value_kinds() {
        assert_eq!(ValueKind::from_metric_type("BOOL"), ValueKind::Boolean);
        assert_eq!(ValueKind::from_metric_type("DATA"), ValueKind::Unsupported);
        assert_eq!(ValueKind::from_metric_type("PERCENT"), ValueKind::Numeric);
        assert_eq!(ValueKind::from_metric_type("INT"), ValueKind::Numeric);
    }
}
