//! Prometheus exporter of SonarQube measures.
//!
//! The exporter consists of two concurrently running parts sharing a [`MeasureRegistry`]:
//!
//! - [`Collector`] periodically lists SonarQube projects, fetches their tags and measures
//!   and reports them into the registry.
//! - [`MetricsExporter`] serves the registry contents over HTTP in the text format
//!   understood by Prometheus.
//!
//! # Examples
//!
//! ```no_run
//! use sonar_exporter::{Collector, CollectorConfig, MetricsExporter, SonarClient};
//! use sonar_metrics::MeasureRegistry;
//! use tokio::sync::watch;
//! use std::{collections::HashMap, sync::Arc};
//!
//! # async fn test() -> anyhow::Result<()> {
//! let client = Arc::new(SonarClient::new("https://sonar.example.com", None)?);
//! let registry = Arc::new(MeasureRegistry::new("sonar", HashMap::new(), ["team"], false)?);
//!
//! let (stop_sender, stop_receiver) = watch::channel(());
//! let collector = Collector::new(client, registry.clone(), CollectorConfig::default())
//!     .initialize()
//!     .await?;
//! tokio::spawn(collector.run(stop_receiver));
//!
//! MetricsExporter::new(registry)
//!     .start("0.0.0.0:8080".parse()?)
//!     .await?;
//! # drop(stop_sender);
//! # Ok(())
//! # }
//! ```
//!
//! [`MeasureRegistry`]: sonar_metrics::MeasureRegistry

// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

pub use crate::{
    client::{ClientError, Credentials, SonarClient, SourceApi, DEFAULT_REQUEST_TIMEOUT},
    collector::{Collector, CollectorConfig, CollectorError, PollingCollector},
    config::{ExporterConfig, DEFAULT_PORT},
    exporter::{MetricsExporter, MetricsServer},
    metrics::ExporterMetrics,
};

mod client;
mod collector;
mod config;
mod exporter;
mod metrics;
