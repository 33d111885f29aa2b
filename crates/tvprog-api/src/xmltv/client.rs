//! `XmltvClient` - XMLTV provider client implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::instrument;
use url::Url;

use super::api::LocalGuideSource;
use super::parser::parse_guide;
use crate::schedule::ChannelMap;

/// Default User-Agent.
const DEFAULT_USER_AGENT: &str = concat!("tvprog/", env!("CARGO_PKG_VERSION"));

/// XMLTV provider client.
///
/// Issues one plain GET per fetch: no authentication, no retries. No request
/// timeout is applied unless one is configured, so a hung provider blocks the
/// caller for as long as the connection stays open.
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct XmltvClient {
    /// HTTP client (reqwest, gzip enabled).
    http_client: Client,
}

/// Builder for `XmltvClient`.
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct XmltvClientBuilder {
    user_agent: Option<String>,
    timeout: Option<Duration>,
}

impl XmltvClientBuilder {
    /// Creates a new builder.
    const fn new() -> Self {
        Self {
            user_agent: None,
            timeout: None,
        }
    }

    /// Overrides the User-Agent (default: `tvprog/<version>`).
    #[must_use]
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Bounds each fetch, from connect to end of body (default: unbounded).
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the `reqwest::Client` build fails.
    pub fn build(self) -> Result<XmltvClient> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| String::from(DEFAULT_USER_AGENT));

        let mut builder = Client::builder().user_agent(&user_agent).gzip(true);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build().context("failed to build HTTP client")?;

        Ok(XmltvClient { http_client })
    }
}

impl XmltvClient {
    /// Creates a new builder.
    #[must_use]
    pub const fn builder() -> XmltvClientBuilder {
        XmltvClientBuilder::new()
    }

    /// Downloads the guide body over HTTP(S).
    async fn download(&self, url: Url) -> Result<Vec<u8>> {
        let response = self
            .http_client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;

        let status = response.status();
        tracing::trace!(%status, headers = ?response.headers(), "Response headers");

        let response = response
            .error_for_status()
            .with_context(|| format!("provider returned HTTP {status}"))?;
        let body = response
            .bytes()
            .await
            .context("failed to read guide body")?;

        tracing::debug!(%status, body_len = body.len(), "Guide body received");
        Ok(body.to_vec())
    }

    /// Reads a guide stored on the local filesystem.
    async fn read_file(url: &Url) -> Result<Vec<u8>> {
        let path = url
            .to_file_path()
            .map_err(|()| anyhow::anyhow!("invalid file URL {url}"))?;
        let shown = path.display().to_string();

        let body = tokio::task::spawn_blocking(move || std::fs::read(path))
            .await
            .context("guide read task failed")?
            .with_context(|| format!("failed to read {shown}"))?;

        tracing::debug!(path = %shown, body_len = body.len(), "Guide file read");
        Ok(body)
    }
}

impl LocalGuideSource for XmltvClient {
    #[instrument(skip_all, fields(%provider))]
    async fn fetch_guide(&self, provider: &str) -> Result<ChannelMap> {
        let url =
            Url::parse(provider).with_context(|| format!("invalid provider URL {provider}"))?;

        tracing::info!("Fetching {provider}");
        let body = if url.scheme() == "file" {
            Self::read_file(&url).await?
        } else {
            self.download(url).await?
        };

        let channels = parse_guide(body.as_slice())
            .with_context(|| format!("failed to ingest guide from {provider}"))?;
        tracing::info!(channels = channels.len(), "Guide fetched");
        Ok(channels)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::time::MalformedTimestamp;

    const SAMPLE: &str = include_str!("../../../../fixtures/xmltv/sample.xml");

    fn client() -> XmltvClient {
        XmltvClient::builder().user_agent("test/0.0.0").build().unwrap()
    }

    #[test]
    fn test_builder_defaults_succeed() {
        // Arrange & Act
        let result = XmltvClient::builder().build();

        // Assert
        assert!(result.is_ok());
    }

    #[test]
    fn test_builder_with_timeout_succeeds() {
        // Arrange & Act
        let result = XmltvClient::builder()
            .timeout(Duration::from_secs(5))
            .build();

        // Assert
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_guide_via_http() {
        // Arrange
        let mock_server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/guide.xml"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(SAMPLE))
            .expect(1)
            .mount(&mock_server)
            .await;
        let provider = format!("{}/guide.xml", mock_server.uri());

        // Act
        let channels = client().fetch_guide(&provider).await.unwrap();

        // Assert
        assert_eq!(channels.len(), 2);
        assert_eq!(channels.get("tf1.fr").unwrap().programs.len(), 3);
    }

    #[tokio::test]
    async fn test_user_agent_is_sent() {
        // Arrange
        let mock_server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::header("User-Agent", "tvprog-test/1.2.3"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("<tv></tv>"))
            .expect(1)
            .mount(&mock_server)
            .await;
        let client = XmltvClient::builder()
            .user_agent("tvprog-test/1.2.3")
            .build()
            .unwrap();

        // Act & Assert (mock expect(1) verifies User-Agent header)
        client.fetch_guide(&mock_server.uri()).await.unwrap();
    }

    #[tokio::test]
    async fn test_http_error_status_fails() {
        // Arrange
        let mock_server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        // Act
        let err = client().fetch_guide(&mock_server.uri()).await.unwrap_err();

        // Assert: no retry (expect(1)), error surfaces to the caller
        assert!(err.to_string().contains("HTTP 500"));
    }

    #[tokio::test]
    async fn test_malformed_xml_fails() {
        // Arrange
        let mock_server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_string("<tv><channel></tv>"),
            )
            .mount(&mock_server)
            .await;

        // Act
        let err = client().fetch_guide(&mock_server.uri()).await.unwrap_err();

        // Assert
        assert!(err.to_string().contains("failed to ingest guide"));
    }

    #[tokio::test]
    async fn test_malformed_timestamp_is_downcastable() {
        // Arrange
        let mock_server = wiremock::MockServer::start().await;
        let body = r#"<tv>
            <channel id="c1"><display-name>One</display-name></channel>
            <programme start="bogus" stop="202401010100" channel="c1"><title>x</title></programme>
        </tv>"#;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(body))
            .mount(&mock_server)
            .await;

        // Act
        let err = client().fetch_guide(&mock_server.uri()).await.unwrap_err();

        // Assert
        assert!(err.downcast_ref::<MalformedTimestamp>().is_some());
    }

    #[tokio::test]
    async fn test_timeout_bounds_slow_provider() {
        // Arrange
        let mock_server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_string("<tv></tv>")
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&mock_server)
            .await;
        let client = XmltvClient::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();

        // Act
        let result = client.fetch_guide(&mock_server.uri()).await;

        // Assert
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_fetch_guide_from_file_url() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guide.xml");
        std::fs::write(&path, SAMPLE).unwrap();
        let provider = Url::from_file_path(&path).unwrap().to_string();

        // Act
        let channels = client().fetch_guide(&provider).await.unwrap();

        // Assert
        assert_eq!(channels.get("france2.fr").unwrap().name, "France 2");
    }

    #[tokio::test]
    async fn test_missing_file_fails() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let provider = Url::from_file_path(dir.path().join("absent.xml"))
            .unwrap()
            .to_string();

        // Act
        let err = client().fetch_guide(&provider).await.unwrap_err();

        // Assert
        assert!(err.to_string().contains("failed to read"));
    }

    #[tokio::test]
    async fn test_invalid_provider_url_fails() {
        // Arrange & Act
        let err = client().fetch_guide("not a url").await.unwrap_err();

        // Assert
        assert!(err.to_string().contains("invalid provider URL"));
    }
}
