//! `MetricsExporter` and closely related types.

use std::{
    convert::Infallible,
    fmt,
    future::{self, Future},
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    time::Instant,
};

use hyper::{
    header::{self, HeaderValue},
    server::conn::http1,
    service::service_fn,
    Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use sonar_metrics::{Format, MeasureRegistry};
use tokio::{io, net::TcpListener, sync::watch};

use crate::metrics::ExporterMetrics;


#[derive(Clone)]
struct MetricsExporterInner {
    registry: Arc<MeasureRegistry>,
    format: Format,
    metrics: ExporterMetrics,
}

impl MetricsExporterInner {
    fn render_body(&self) -> Result<String, fmt::Error> {
        let started_at = Instant::now();
        let mut buffer = String::with_capacity(1_024);
        self.registry.encode(&mut buffer, self.format)?;

        let latency = started_at.elapsed();
        let scraped_size = buffer.len();
        self.metrics.scrape_latency.observe(latency.as_secs_f64());
        #[allow(clippy::cast_precision_loss)] // acceptable for metrics
        self.metrics.scraped_size.observe(scraped_size as f64);
        tracing::debug!(
            latency_sec = latency.as_secs_f64(),
            scraped_size,
            "Scraped metrics in {latency:?} (scraped size: {scraped_size}B)"
        );
        Ok(buffer)
    }

    fn render(&self) -> Response<String> {
        match self.render_body() {
            Ok(body) => {
                let mut response = Response::new(body);
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static(self.format.content_type()),
                );
                response
            }
            Err(err) => {
                tracing::error!(%err, "Failed encoding metrics");
                let mut response = Response::new("Failed encoding metrics".to_owned());
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                response
            }
        }
    }
}

/// Exporter of SonarQube measures to Prometheus.
///
/// The exporter serves metrics from a [`MeasureRegistry`]; measures are reported into the registry
/// concurrently by the [`Collector`](crate::Collector).
///
/// # Examples
///
/// ```no_run
/// use sonar_exporter::MetricsExporter;
/// use sonar_metrics::{Format, MeasureRegistry};
/// use std::{collections::HashMap, sync::Arc};
///
/// # async fn test() -> anyhow::Result<()> {
/// let registry = MeasureRegistry::new("sonar", HashMap::new(), ["team"], false)?;
/// let server = MetricsExporter::new(Arc::new(registry))
///     .with_format(Format::Prometheus)
///     .bind("0.0.0.0:8080".parse()?)
///     .await?;
/// println!("Serving metrics on {}", server.local_addr());
/// server.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct MetricsExporter<'a> {
    inner: MetricsExporterInner,
    shutdown_future: Pin<Box<dyn Future<Output = ()> + Send + 'a>>,
}

impl fmt::Debug for MetricsExporter<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MetricsExporter")
            .field("registry", &self.inner.registry)
            .field("format", &self.inner.format)
            .finish_non_exhaustive()
    }
}

impl<'a> MetricsExporter<'a> {
    /// Creates an exporter based on the provided registry. Note that the registry
    /// is in `Arc`, meaning it can be shared with a collector.
    pub fn new(registry: Arc<MeasureRegistry>) -> Self {
        tracing::info!(
            metric_count = registry.registered_keys().len(),
            label_set = %registry.label_set(),
            "Created metrics exporter"
        );
        Self {
            inner: MetricsExporterInner {
                registry,
                format: Format::OpenMetricsForPrometheus,
                metrics: ExporterMetrics::default(),
            },
            shutdown_future: Box::pin(future::pending()),
        }
    }

    /// Sets the export [`Format`]. By default, [`Format::OpenMetricsForPrometheus`] is used
    /// (i.e., OpenMetrics text format with minor changes so that it is fully parsed by Prometheus).
    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.inner.format = format;
        self
    }

    /// Sets the exporter metrics updated on each scrape.
    #[must_use]
    pub fn with_metrics(mut self, metrics: ExporterMetrics) -> Self {
        self.inner.metrics = metrics;
        self
    }

    /// Configures graceful shutdown for the exporter server.
    #[must_use]
    pub fn with_graceful_shutdown<F>(mut self, shutdown: F) -> Self
    where
        F: Future<Output = ()> + Send + 'a,
    {
        self.shutdown_future = Box::pin(shutdown);
        self
    }

    /// Starts the server on the specified address. This future resolves when the server is shut down.
    ///
    /// The server will expose the following endpoints:
    ///
    /// - `GET` on any path: serves the metrics in the text format configured using [`Self::with_format()`]
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn start(self, bind_address: SocketAddr) -> io::Result<()> {
        tracing::info!("Starting Prometheus exporter web server on {bind_address}");
        self.bind(bind_address).await?.start().await?;
        tracing::info!("Prometheus metrics exporter server shut down");
        Ok(())
    }

    /// Creates an HTTP exporter server and binds it to the specified address.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn bind(mut self, bind_address: SocketAddr) -> io::Result<MetricsServer<'a>> {
        let listener = TcpListener::bind(bind_address).await?;
        let local_addr = listener.local_addr()?;
        let server = async move {
            let (started_shutdown_sender, started_shutdown) = watch::channel(());
            loop {
                let stream = tokio::select! {
                    res = listener.accept() => res?.0,
                    () = &mut self.shutdown_future => break,
                };

                let io = TokioIo::new(stream);
                let inner = self.inner.clone();
                let mut started_shutdown = started_shutdown.clone();
                tokio::spawn(async move {
                    let conn = http1::Builder::new().serve_connection(
                        io,
                        service_fn(|_| {
                            let response = inner.render();
                            async move { Ok::<_, Infallible>(response) }
                        }),
                    );
                    tokio::pin!(conn);

                    let res = tokio::select! {
                        _ = started_shutdown.changed() => {
                            conn.as_mut().graceful_shutdown();
                            conn.await
                        }
                        res = conn.as_mut() => res,
                    };
                    if let Err(err) = res {
                        tracing::warn!(%err, "Error serving connection");
                    }
                });
            }

            tracing::info!("Stop signal received, Prometheus metrics exporter is shutting down");
            // Send the graceful shutdown signal to all alive connections.
            drop(started_shutdown);
            started_shutdown_sender.send_replace(());
            // Wait until all connections are dropped.
            started_shutdown_sender.closed().await;

            Ok(())
        };

        Ok(MetricsServer {
            server: Box::pin(server),
            local_addr,
        })
    }
}

/// Metrics server bound to a certain local address returned by [`MetricsExporter::bind()`].
///
/// Useful e.g. if you need to find out which port the server was bound to if the 0th port was specified.
#[must_use = "Server should be `start()`ed"]
pub struct MetricsServer<'a> {
    server: Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>,
    local_addr: SocketAddr,
}

impl fmt::Debug for MetricsServer<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MetricsServer")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl MetricsServer<'_> {
    /// Returns the local address this server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts this server. Resolves once the server is shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if starting the server operation fails.
    pub async fn start(self) -> io::Result<()> {
        self.server.await
    }
}
