//! Command-line entry point of the SonarQube exporter.

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context as _;
use clap::Parser;
use sonar_exporter::{
    Collector, CollectorConfig, Credentials, ExporterConfig, ExporterMetrics, MetricsExporter,
};
use sonar_metrics::Format;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Prometheus exporter of SonarQube measures.
///
/// All options can also be set via environment variables; command-line arguments take precedence.
#[derive(Debug, Parser)]
#[command(name = "sonar-exporter", version, about, long_about = None)]
struct Cli {
    /// Base URL of the SonarQube server, e.g. `https://sonar.example.com`.
    #[arg(long, env = "SONAR_URL")]
    url: String,
    /// SonarQube user name or user token.
    #[arg(long, env = "SONAR_USER")]
    user: Option<String>,
    /// SonarQube password. Should be omitted if a user token is used.
    #[arg(long, env = "SONAR_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Address to serve metrics on.
    #[arg(long, env = "SONAR_EXPORTER_LISTEN", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,
    /// Namespace prepended to all metric names.
    #[arg(long, env = "SONAR_EXPORTER_NAMESPACE", default_value = "sonar")]
    namespace: String,
    /// Static label attached to all metrics, in the `name=value` form. Can be specified multiple times.
    #[arg(
        long = "label",
        env = "SONAR_EXPORTER_LABELS",
        value_delimiter = ',',
        value_parser = parse_static_label
    )]
    labels: Vec<(String, String)>,
    /// Name of a label derived from component tags. Can be specified multiple times.
    #[arg(long = "tag-label", env = "SONAR_EXPORTER_TAG_LABELS", value_delimiter = ',')]
    tag_labels: Vec<String>,
    /// Separator between the label name and value in component tags. Empty value disables
    /// tag decoding.
    #[arg(long, env = "SONAR_EXPORTER_TAG_SEPARATOR", default_value = "#")]
    tag_separator: String,
    /// Report components lacking some tag labels with empty label values instead of skipping them.
    #[arg(long, env = "SONAR_EXPORTER_EXPORT_EMPTY_LABELS")]
    export_empty_labels: bool,

    /// Interval between polls of SonarQube.
    #[arg(
        long,
        alias = "scrape-timeout",
        env = "SONAR_EXPORTER_POLL_INTERVAL",
        default_value = "1m",
        value_parser = humantime::parse_duration
    )]
    poll_interval: Duration,
    /// Delay before the first poll.
    #[arg(
        long,
        env = "SONAR_EXPORTER_INITIAL_DELAY",
        default_value = "0s",
        value_parser = humantime::parse_duration
    )]
    initial_delay: Duration,
    /// Deadline for each request to SonarQube.
    #[arg(
        long,
        env = "SONAR_EXPORTER_REQUEST_TIMEOUT",
        default_value = "30s",
        value_parser = humantime::parse_duration
    )]
    request_timeout: Duration,
    /// Metrics export format: `openmetrics`, `prometheus` or `openmetrics-for-prometheus`.
    #[arg(
        long,
        env = "SONAR_EXPORTER_FORMAT",
        default_value = "openmetrics-for-prometheus"
    )]
    format: Format,
    /// Log filter (e.g., `info` or `sonar_exporter=debug`). `RUST_LOG` takes precedence if set.
    #[arg(long, env = "SONAR_EXPORTER_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Cli {
    fn credentials(&self) -> Option<Credentials> {
        let user = self.user.as_deref().filter(|user| !user.is_empty())?;
        Some(Credentials {
            user: user.to_owned(),
            password: self.password.clone().unwrap_or_default(),
        })
    }

    fn into_config(self) -> anyhow::Result<ExporterConfig> {
        let mut static_labels = HashMap::with_capacity(self.labels.len());
        for (name, value) in &self.labels {
            if static_labels.insert(name.clone(), value.clone()).is_some() {
                anyhow::bail!("static label `{name}` is specified multiple times");
            }
        }

        Ok(ExporterConfig {
            credentials: self.credentials(),
            sonar_url: self.url,
            request_timeout: self.request_timeout,
            listen_address: self.listen,
            format: self.format,
            namespace: self.namespace,
            static_labels,
            tag_labels: self.tag_labels,
            export_empty_labels: self.export_empty_labels,
            collector: CollectorConfig {
                tag_separator: self.tag_separator,
                poll_interval: self.poll_interval,
                initial_delay: self.initial_delay,
            },
        })
    }
}

fn parse_static_label(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("label `{raw}` must have the `name=value` form"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("label `{raw}` has an empty name"));
    }
    Ok((name.to_owned(), value.to_owned()))
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .map_err(|err| anyhow::anyhow!("invalid log level `{level}`: {err}"))?,
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .context("failed initializing logging")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;
    let config = cli.into_config()?;

    let registry = config
        .create_registry()
        .context("invalid metric labels")?;
    let registry = Arc::new(registry);
    let metrics = ExporterMetrics::default();
    metrics
        .register(&registry)
        .context("failed registering exporter metrics")?;
    let client = config
        .create_client()
        .context("failed creating SonarQube client")?;
    tracing::info!(url = client.base_url(), "Created SonarQube client");

    let (stop_sender, stop_receiver) = watch::channel(());
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received Ctrl+C, stopping");
        stop_sender.send_replace(());
    });

    let mut server_stop_receiver = stop_receiver.clone();
    let listen_address = config.listen_address;
    let server = MetricsExporter::new(registry.clone())
        .with_format(config.format)
        .with_metrics(metrics.clone())
        .with_graceful_shutdown(async move {
            server_stop_receiver.changed().await.ok();
        })
        .bind(listen_address)
        .await
        .with_context(|| format!("failed binding to `{listen_address}`"))?;
    tracing::info!("Serving metrics on {}", server.local_addr());
    let server_task = tokio::spawn(server.start());

    let collector = Collector::new(Arc::new(client), registry, config.collector)
        .with_metrics(metrics)
        .initialize()
        .await
        .context("failed initializing SonarQube collector")?;
    let collector_task = tokio::spawn(collector.run(stop_receiver));

    server_task
        .await
        .context("metrics server panicked")?
        .context("metrics server failed")?;
    collector_task.await.context("collector panicked")?;
    Ok(())
}
