//! HTTP client for the remote mapping origin.
//!
//! This is the only place that interprets HTTP status codes.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::error::{MappingError, MappingResult};
use crate::types::MappingConfig;

/// User agent for origin requests.
pub const MAPPING_USER_AGENT: &str = concat!("validator-mapping/", env!("CARGO_PKG_VERSION"));

/// Client for downloading the mapping snapshot.
#[derive(Debug, Clone)]
pub struct MappingClient {
    client: reqwest::Client,
    url: String,
}

impl MappingClient {
    pub fn new(config: &MappingConfig) -> MappingResult<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(MAPPING_USER_AGENT));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(default_headers)
            .build()
            .map_err(|e| MappingError::Config {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Download the full snapshot body.
    pub async fn fetch_snapshot(&self) -> MappingResult<Bytes> {
        debug!(url = %self.url, "fetching validator mapping snapshot");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| self.fetch_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MappingError::HttpStatus {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| self.fetch_error(e))?;
        debug!(url = %self.url, bytes = body.len(), "snapshot downloaded");
        Ok(body)
    }

    fn fetch_error(&self, err: reqwest::Error) -> MappingError {
        let message = if err.is_timeout() {
            format!("request timed out: {}", err)
        } else {
            err.to_string()
        };
        MappingError::Fetch {
            url: self.url.clone(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(uri: String) -> MappingClient {
        let config = MappingConfig::default().with_url(uri);
        MappingClient::new(&config).expect("failed to create client")
    }

    #[tokio::test]
    async fn test_fetch_snapshot_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/validator_data.parquet.gzip"))
            .and(header("user-agent", MAPPING_USER_AGENT))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PAR1".to_vec()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client_for(format!("{}/validator_data.parquet.gzip", mock_server.uri()));
        let body = client.fetch_snapshot().await.unwrap();
        assert_eq!(body.as_ref(), b"PAR1");
    }

    #[tokio::test]
    async fn test_fetch_snapshot_status_mapping() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/missing.parquet"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = client_for(format!("{}/missing.parquet", mock_server.uri()));
        let err = client.fetch_snapshot().await.unwrap_err();
        assert!(matches!(err, MappingError::HttpStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_fetch_snapshot_unreachable() {
        // Nothing listens on port 9 (discard) in the test environment.
        let client = client_for("http://127.0.0.1:9/mapping.parquet".to_string());
        let err = client.fetch_snapshot().await.unwrap_err();
        assert!(matches!(err, MappingError::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_fetch_snapshot_timeout() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"PAR1".to_vec())
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&mock_server)
            .await;

        let config = MappingConfig::default()
            .with_url(format!("{}/slow.parquet", mock_server.uri()))
            .with_timeout_secs(1);
        let client = MappingClient::new(&config).unwrap();

        let err = client.fetch_snapshot().await.unwrap_err();
        match err {
            MappingError::Fetch { message, .. } => assert!(message.contains("timed out")),
            other => panic!("expected Fetch error, got {other:?}"),
        }
    }
}
