//! Support for various metrics encoding formats.

use std::{fmt, str::FromStr};

/// Text format used when encoding a [`MeasureRegistry`](crate::MeasureRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Format {
    /// [OpenMetrics] text as emitted by `prometheus-client`, with `_total` counter samples and
    /// the trailing `# EOF`.
    ///
    /// [OpenMetrics]: https://github.com/OpenObservability/OpenMetrics/blob/main/specification/OpenMetrics.md
    OpenMetrics,
    /// Classic [Prometheus text format][prom]: counter samples are named after the counter itself,
    /// and there is no `# EOF` line.
    ///
    /// [prom]: https://prometheus.io/docs/instrumenting/exposition_formats/
    Prometheus,
    /// OpenMetrics with counter samples renamed as in [`Self::Prometheus`]. The `# EOF` line is kept.
    /// This is the default for scrapes.
    OpenMetricsForPrometheus,
}

impl Format {
    /// Content type for the OpenMetrics text format.
    pub const OPEN_METRICS_CONTENT_TYPE: &'static str =
        "application/openmetrics-text; version=1.0.0; charset=utf-8";
    /// Content type for the Prometheus text format.
    pub const PROMETHEUS_CONTENT_TYPE: &'static str = "text/plain; version=0.0.4; charset=utf-8";

    /// Returns the HTTP content type for this format.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Prometheus => Self::PROMETHEUS_CONTENT_TYPE,
            Self::OpenMetrics | Self::OpenMetricsForPrometheus => Self::OPEN_METRICS_CONTENT_TYPE,
        }
    }
}

/// Error parsing a [`Format`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown format `{0}`; expected one of `openmetrics`, `prometheus`, `openmetrics-for-prometheus`")]
pub struct ParseFormatError(String);

impl FromStr for Format {
    type Err = ParseFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openmetrics" => Ok(Self::OpenMetrics),
            "prometheus" => Ok(Self::Prometheus),
            "openmetrics-for-prometheus" => Ok(Self::OpenMetricsForPrometheus),
            _ => Err(ParseFormatError(s.to_owned())),
        }
    }
}

/// Rewrites OpenMetrics text produced by `prometheus-client` so that Prometheus can ingest it.
///
/// Counter samples lose their `_total` suffix (only for metrics declared as counters; a gauge
/// named e.g. `sonar_issues_total` is left intact). The `# EOF` terminator is kept only if
/// `keep_eof` is set.
pub(crate) fn write_for_prometheus<W: fmt::Write>(
    writer: &mut W,
    open_metrics: &str,
    keep_eof: bool,
) -> fmt::Result {
    let mut counter_name = None;
    for line in open_metrics.lines() {
        if line == "# EOF" {
            if keep_eof {
                writeln!(writer, "{line}")?;
            }
            continue;
        }

        if let Some(definition) = line.strip_prefix("# TYPE ") {
            counter_name = definition.strip_suffix(" counter");
        } else if let Some(name) = counter_name.filter(|_| !line.starts_with('#')) {
            let labels_and_value = line
                .strip_prefix(name)
                .and_then(|rest| rest.strip_prefix("_total"))
                .filter(|rest| rest.starts_with(['{', ' ']));
            if let Some(labels_and_value) = labels_and_value {
                writeln!(writer, "{name}{labels_and_value}")?;
                continue;
            }
        }
        writeln!(writer, "{line}")?;
    }
    Ok(())
}
