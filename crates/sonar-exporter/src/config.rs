//! Exporter configuration.

use std::{
    collections::HashMap,
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use sonar_metrics::{Format, MeasureRegistry, RegistrationError};

use crate::{
    client::{ClientError, Credentials, SonarClient, DEFAULT_REQUEST_TIMEOUT},
    collector::CollectorConfig,
};

/// Default port to serve metrics on.
pub const DEFAULT_PORT: u16 = 8080;

/// Complete configuration of the exporter.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Base URL of the SonarQube server.
    pub sonar_url: String,
    /// Credentials for SonarQube. If not set, requests are not authenticated.
    pub credentials: Option<Credentials>,
    /// Deadline for each request to SonarQube.
    pub request_timeout: Duration,
    /// Address to serve metrics on.
    pub listen_address: SocketAddr,
    /// Scrape format.
    pub format: Format,
    /// Namespace prepended to all metric names.
    pub namespace: String,
    /// Constant labels attached to all metrics.
    pub static_labels: HashMap<String, String>,
    /// Names of labels derived from component tags.
    pub tag_labels: Vec<String>,
    /// Whether to report components lacking some tag labels with empty label values.
    pub export_empty_labels: bool,
    /// Collector configuration.
    pub collector: CollectorConfig,
}

impl ExporterConfig {
    /// Creates a configuration with default values for the SonarQube server at `sonar_url`.
    pub fn new(sonar_url: impl Into<String>) -> Self {
        Self {
            sonar_url: sonar_url.into(),
            credentials: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            listen_address: (Ipv4Addr::UNSPECIFIED, DEFAULT_PORT).into(),
            format: Format::OpenMetricsForPrometheus,
            namespace: "sonar".to_owned(),
            static_labels: HashMap::new(),
            tag_labels: vec![],
            export_empty_labels: false,
            collector: CollectorConfig::default(),
        }
    }

    /// Creates an empty registry with the configured namespace and labels.
    ///
    /// # Errors
    ///
    /// Returns an error if a static label clashes with the component label or a tag label.
    pub fn create_registry(&self) -> Result<MeasureRegistry, RegistrationError> {
        MeasureRegistry::new(
            &self.namespace,
            self.static_labels.clone(),
            &self.tag_labels,
            self.export_empty_labels,
        )
    }

    /// Creates a SonarQube client.
    ///
    /// # Errors
    ///
    /// Returns an error if the SonarQube URL is invalid.
    pub fn create_client(&self) -> Result<SonarClient, ClientError> {
        let client = SonarClient::new(&self.sonar_url, self.credentials.clone())?;
        Ok(client.with_request_timeout(self.request_timeout))
    }
}
