//! HTTP binding: one sealed metric per `POST /update/`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use tracing::{debug, instrument};

use super::envelope::{ENCRYPTED_HEADER, ENCRYPTION_SCHEME, Envelope, GZIP_ENCODING, HASH_HEADER};
use super::{MetricSender, TransportError};
use crate::metric::Metric;

pub struct HttpSender {
    /// HTTP client (reused across requests)
    client: reqwest::Client,
    endpoint: String,
    envelope: Envelope,
}

impl HttpSender {
    /// `address` is `host:port` or a full base URL
    pub fn new(address: &str, envelope: Envelope) -> Result<Self, TransportError> {
        let base = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/update/", base.trim_end_matches('/')),
            envelope,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl MetricSender for HttpSender {
    #[instrument(skip_all, fields(metric = %metric.key()))]
    async fn send(&self, metric: &Metric) -> Result<(), TransportError> {
        let sealed = self.envelope.seal(metric)?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, GZIP_ENCODING);
        if let Some(signature) = &sealed.signature {
            request = request.header(HASH_HEADER, signature);
        }
        if sealed.encrypted {
            request = request.header(ENCRYPTED_HEADER, ENCRYPTION_SCHEME);
        }

        let response = request.body(sealed.body).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(TransportError::Status(status.as_u16()));
        }

        debug!("delivered to {} ({status})", self.endpoint);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::envelope::{EnvelopeHeaders, EnvelopeOpener};
    use assert_matches::assert_matches;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_posts_sealed_metric() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/update/"))
            .and(header("Content-Encoding", "gzip"))
            .and(header_exists(HASH_HEADER))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let sender =
            HttpSender::new(&mock_server.uri(), Envelope::new(Some("key".into()), None)).unwrap();
        sender.send(&Metric::counter("PollCount", 2)).await.unwrap();

        let requests = mock_server.received_requests().await.unwrap();
        let request = &requests[0];
        let headers = EnvelopeHeaders {
            content_encoding: Some(GZIP_ENCODING),
            signature: request
                .headers
                .get(HASH_HEADER)
                .and_then(|v| v.to_str().ok()),
            encrypted: None,
        };
        let body = EnvelopeOpener::new(Some("key".into()), None)
            .open(&request.body, &headers)
            .unwrap();
        let metric: Metric = serde_json::from_slice(&body).unwrap();
        assert_eq!(metric, Metric::counter("PollCount", 2));
    }

    #[tokio::test]
    async fn test_non_ok_status_is_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/update/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let sender = HttpSender::new(&mock_server.uri(), Envelope::default()).unwrap();
        let result = sender.send(&Metric::gauge("Alloc", 1.0)).await;

        assert_matches!(result, Err(TransportError::Status(500)));
    }

    #[tokio::test]
    async fn test_unreachable_collector() {
        let sender = HttpSender::new("127.0.0.1:9", Envelope::default()).unwrap();
        let result = sender.send(&Metric::gauge("Alloc", 1.0)).await;

        assert_matches!(result, Err(TransportError::Request(_)));
    }

    #[test]
    fn test_endpoint_from_address() {
        let sender = HttpSender::new("localhost:8080", Envelope::default()).unwrap();
        assert_eq!(sender.endpoint(), "http://localhost:8080/update/");

        let sender = HttpSender::new("https://collector/", Envelope::default()).unwrap();
        assert_eq!(sender.endpoint(), "https://collector/update/");
    }
}
