//! HTTP client for the SonarQube web API.

use std::{fmt, future::Future, str::FromStr, time::Duration};

use base64::{prelude::BASE64_STANDARD, Engine as _};
use http_body_util::{BodyExt as _, Empty};
use hyper::{
    body::Bytes,
    header::{self, HeaderValue},
    Request, StatusCode, Uri,
};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde::de::DeserializeOwned;
use sonar_metrics::model::{
    Component, ComponentDetails, ComponentInfo, ComponentsPage, Measures, Metric, MetricsPage,
};
use thiserror::Error;

/// Page size used for paginated SonarQube endpoints. This is the maximum size allowed by the API.
const PAGE_SIZE: usize = 500;

/// Default deadline for a single request to SonarQube.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Error interacting with the SonarQube API.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// SonarQube URL is invalid.
    #[error("invalid SonarQube URL `{url}`: {reason}")]
    InvalidUrl {
        /// Offending URL.
        url: String,
        /// Human-readable reason.
        reason: String,
    },
    /// Request could not be sent or the response could not be received.
    #[error("request to `{url}` failed: {source}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Underlying error.
        #[source]
        source: hyper_util::client::legacy::Error,
    },
    /// Response body could not be read.
    #[error("failed reading response from `{url}`: {source}")]
    Body {
        /// Requested URL.
        url: String,
        /// Underlying error.
        #[source]
        source: hyper::Error,
    },
    /// Request has not completed in time.
    #[error("request to `{url}` timed out after {timeout:?}")]
    Timeout {
        /// Requested URL.
        url: String,
        /// Configured request timeout.
        timeout: Duration,
    },
    /// SonarQube has responded with a non-success status.
    #[error("request to `{url}` failed with status {status}: {body}")]
    Status {
        /// Requested URL.
        url: String,
        /// Response status.
        status: StatusCode,
        /// Response body (possibly lossily decoded).
        body: String,
    },
    /// Response could not be parsed.
    #[error("failed parsing response from `{url}`: {source}")]
    Json {
        /// Requested URL.
        url: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// Source of SonarQube data used by the [`Collector`](crate::Collector).
///
/// Implemented by [`SonarClient`]; can be implemented by other types for testing.
pub trait SourceApi: Send + Sync + 'static {
    /// Lists all projects visible to the client.
    fn search_components(
        &self,
    ) -> impl Future<Output = Result<Vec<ComponentInfo>, ClientError>> + Send;

    /// Gets details (including tags) of a single component.
    fn get_component(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Component, ClientError>> + Send;

    /// Gets the metric catalog.
    fn get_metrics(&self) -> impl Future<Output = Result<Vec<Metric>, ClientError>> + Send;

    /// Gets measures of a component for the specified metric keys.
    fn get_measures(
        &self,
        key: &str,
        metric_keys: &[String],
    ) -> impl Future<Output = Result<Measures, ClientError>> + Send;
}

/// Credentials used to authenticate against SonarQube.
#[derive(Clone, Default)]
pub struct Credentials {
    /// User name or a user token.
    pub user: String,
    /// Password. Should be empty if `user` is a token.
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    fn header_value(&self) -> HeaderValue {
        let encoded = BASE64_STANDARD.encode(format!("{}:{}", self.user, self.password));
        let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))
            .expect("base64-encoded string is always a valid header value");
        value.set_sensitive(true);
        value
    }
}

/// [`SourceApi`] implementation talking to a SonarQube server over HTTP(S).
pub struct SonarClient {
    client: Client<HttpsConnector<HttpConnector>, Empty<Bytes>>,
    base_url: String,
    authorization: Option<HeaderValue>,
    request_timeout: Duration,
}

impl fmt::Debug for SonarClient {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SonarClient")
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl SonarClient {
    /// Creates a client for the SonarQube server at `url` (e.g., `https://sonar.example.com`).
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn new(url: &str, credentials: Option<Credentials>) -> Result<Self, ClientError> {
        let base_url = url.trim_end_matches('/').to_owned();
        let uri = Uri::from_str(&base_url).map_err(|err| ClientError::InvalidUrl {
            url: url.to_owned(),
            reason: err.to_string(),
        })?;
        match uri.scheme_str() {
            Some("http" | "https") => { /* OK */ }
            _ => {
                return Err(ClientError::InvalidUrl {
                    url: url.to_owned(),
                    reason: "URL must have `http` or `https` scheme".to_owned(),
                });
            }
        }
        if uri.query().is_some() {
            return Err(ClientError::InvalidUrl {
                url: url.to_owned(),
                reason: "URL must not contain a query".to_owned(),
            });
        }

        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            client,
            base_url,
            authorization: credentials.as_ref().map(Credentials::header_value),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Sets the deadline for each request. By default, [`DEFAULT_REQUEST_TIMEOUT`] is used.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Returns the base URL of the SonarQube server.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(query)
            .finish();
        if query.is_empty() {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}{path}?{query}", self.base_url)
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ClientError> {
        let url = self.url(path, query);
        let uri = Uri::from_str(&url).map_err(|err| ClientError::InvalidUrl {
            url: url.clone(),
            reason: err.to_string(),
        })?;

        let mut request = Request::new(Empty::new());
        *request.uri_mut() = uri;
        let headers = request.headers_mut();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(authorization) = &self.authorization {
            headers.insert(header::AUTHORIZATION, authorization.clone());
        }

        tracing::debug!(%url, "Sending GET request to SonarQube");
        let response = async {
            let response = self.client.request(request).await.map_err(|source| {
                ClientError::Transport {
                    url: url.clone(),
                    source,
                }
            })?;
            let status = response.status();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|source| ClientError::Body {
                    url: url.clone(),
                    source,
                })?
                .to_bytes();
            Ok::<_, ClientError>((status, body))
        };
        let (status, body) = tokio::time::timeout(self.request_timeout, response)
            .await
            .map_err(|_| ClientError::Timeout {
                url: url.clone(),
                timeout: self.request_timeout,
            })??;

        if !status.is_success() {
            return Err(ClientError::Status {
                url,
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        serde_json::from_slice(&body).map_err(|source| ClientError::Json { url, source })
    }
}

impl SourceApi for SonarClient {
    async fn search_components(&self) -> Result<Vec<ComponentInfo>, ClientError> {
        let page_size = PAGE_SIZE.to_string();
        let mut components = vec![];
        let mut page = 1_usize;
        loop {
            let page_str = page.to_string();
            let query = [
                ("qualifiers", "TRK"),
                ("p", page_str.as_str()),
                ("ps", page_size.as_str()),
            ];
            let response: ComponentsPage = self.get("/api/components/search", &query).await?;

            let fetched_count = response.components.len();
            components.extend(response.components);
            if fetched_count == 0 || components.len() >= response.paging.total {
                break;
            }
            page += 1;
        }
        tracing::debug!(count = components.len(), "Listed SonarQube components");
        Ok(components)
    }

    async fn get_component(&self, key: &str) -> Result<Component, ClientError> {
        let response: ComponentDetails = self
            .get("/api/components/show", &[("component", key)])
            .await?;
        Ok(response.component)
    }

    async fn get_metrics(&self) -> Result<Vec<Metric>, ClientError> {
        let page_size = PAGE_SIZE.to_string();
        let mut metrics = vec![];
        let mut page = 1_usize;
        loop {
            let page_str = page.to_string();
            let query = [("p", page_str.as_str()), ("ps", page_size.as_str())];
            let response: MetricsPage = self.get("/api/metrics/search", &query).await?;

            let fetched_count = response.metrics.len();
            metrics.extend(response.metrics);
            if fetched_count == 0 || metrics.len() >= response.total {
                break;
            }
            page += 1;
        }
        tracing::debug!(count = metrics.len(), "Fetched SonarQube metric catalog");
        Ok(metrics)
    }

    async fn get_measures(&self, key: &str, metric_keys: &[String]) -> Result<Measures, ClientError> {
        let metric_keys = metric_keys.join(",");
        let query = [("component", key), ("metricKeys", metric_keys.as_str())];
        self.get("/api/measures/component", &query).await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn encoding_credentials() {
        let credentials = Credentials {
            user: "admin".to_owned(),
            password: "secret".to_owned(),
        };
        let value = credentials.header_value();
        assert_eq!(value.to_str().unwrap(), "Basic YWRtaW46c2VjcmV0");
        assert!(value.is_sensitive());
        assert!(!format!("{credentials:?}").contains("secret"));
    }

    #[tokio::test]
    async fn creating_urls() {
        let client = SonarClient::new("http://sonar.local:9000/", None).unwrap();
        assert_eq!(client.base_url(), "http://sonar.local:9000");
        assert_eq!(
            client.url("/api/metrics/search", &[("p", "1"), ("ps", "500")]),
            "http://sonar.local:9000/api/metrics/search?p=1&ps=500"
        );
        assert_eq!(
            client.url(
                "/api/measures/component",
                &[("component", "my:project"), ("metricKeys", "bugs,ncloc")]
            ),
            "http://sonar.local:9000/api/measures/component?component=my%3Aproject&metricKeys=bugs%2Cncloc"
        );

        let client = SonarClient::new("https://sonar.local/sonar", None).unwrap();
        assert_eq!(
            client.url("/api/components/show", &[("component", "a b")]),
            "https://sonar.local/sonar/api/components/show?component=a+b"
        );
    }

    #[tokio::test]
    async fn invalid_urls_are_rejected() {
        let err = SonarClient::new("sonar.local", None).unwrap_err();
        assert_matches!(err, ClientError::InvalidUrl { .. });
        let err = SonarClient::new("ftp://sonar.local", None).unwrap_err();
        assert_matches!(err, ClientError::InvalidUrl { reason, .. } if reason.contains("scheme"));
        let err = SonarClient::new("http://sonar.local/?a=b", None).unwrap_err();
        assert_matches!(err, ClientError::InvalidUrl { reason, .. } if reason.contains("query"));
    }

    #[tokio::test]
    async fn unreachable_server_is_transport_error() {
        let client = SonarClient::new("http://127.0.0.1:1", None)
            .unwrap()
            .with_request_timeout(Duration::from_secs(5));
        let err = client.get_metrics().await.unwrap_err();
        assert_matches!(err, ClientError::Transport { .. } | ClientError::Timeout { .. });
    }
}
