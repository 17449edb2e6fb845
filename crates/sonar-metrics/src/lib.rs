//! Registry of SonarQube measures exposed as labeled gauges, based on the `prometheus-client` crate.
//!
//! # Overview
//!
//! - [`model`] defines the SonarQube data consumed by the registry: the metric catalog ([`Metric`]),
//!   components ([`Component`]) and their measures ([`Measure`]).
//! - [`MeasureRegistry`] registers a family of gauges for each supported metric and reports
//!   measures of components into it. All gauges share the same fixed [`LabelSet`] derived from
//!   configuration, so that the label set never changes at runtime.
//! - [`TagDecoder`] converts free-form component tags like `team#core` into label values.
//! - The registry can be [encoded](MeasureRegistry::encode()) in one of the supported text [`Format`]s.
//!
//! # Examples
//!
//! ```
//! use sonar_metrics::{Format, LabelSet, Measure, MeasureRegistry, Metric, TagDecoder};
//! use std::collections::HashMap;
//!
//! let static_labels = HashMap::from([("env".to_owned(), "prod".to_owned())]);
//! let registry = MeasureRegistry::new("sonar", static_labels, ["team"], false)?;
//!
//! let catalog = [Metric {
//!     key: "bugs".to_owned(),
//!     metric_type: "INT".to_owned(),
//!     description: "Bugs".to_owned(),
//!     ..Metric::default()
//! }];
//! let registered = registry.init_metrics(&catalog)?;
//! assert_eq!(registered, ["bugs"]);
//!
//! let decoder = TagDecoder::new("#", registry.label_set().clone());
//! let labels = decoder.decode(&["team#core", "java"]);
//! registry.report("my-project", labels, &[Measure::new("bugs", "3")]);
//!
//! let mut buffer = String::new();
//! registry.encode(&mut buffer, Format::Prometheus)?;
//! assert!(buffer.contains("# TYPE sonar_bugs gauge"));
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```

// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

pub use prometheus_client::registry::Unit;

mod format;
mod labels;
pub mod model;
mod registry;
mod value;

pub use crate::{
    format::{Format, ParseFormatError},
    labels::{escape_name, LabelSet, LabelValues, MissingLabels, TagDecoder, COMPONENT_LABEL},
    model::{Component, Measure, Metric, ValueKind},
    registry::{MeasureRegistry, RegistrationError, ReportOutcome},
    value::{coerce, CoercionError},
};

#[cfg(test)]
mod tests;
