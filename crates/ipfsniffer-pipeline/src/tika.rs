//! Text-extraction service client.

use std::time::Duration;

use futures::StreamExt;

use crate::{Error, Result};

/// Client for a Tika-compatible extraction endpoint.
#[derive(Debug, Clone)]
pub struct TikaClient {
    http: reqwest::Client,
    base_url: String,
}

/// Extracted text, clamped to the configured maximum.
#[derive(Debug, Clone)]
pub struct ExtractResult {
    pub text: String,
    pub truncated: bool,
}

impl TikaClient {
    pub fn new(base_url: &str) -> Result<TikaClient> {
        if base_url.is_empty() {
            return Err(Error::Config("tika base url required".into()));
        }
        Ok(TikaClient {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// `PUT /tika` with the raw body. Reads up to `max_text_bytes + 1` so
    /// truncation is detectable.
    pub async fn extract_text(
        &self,
        body: reqwest::Body,
        timeout: Duration,
        max_text_bytes: i64,
    ) -> Result<ExtractResult> {
        if max_text_bytes <= 0 {
            return Err(Error::Config("max_text_bytes must be > 0".into()));
        }

        let resp = self
            .http
            .put(format!("{}/tika", self.base_url))
            .header(reqwest::header::ACCEPT, "text/plain")
            .timeout(timeout)
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let snippet = read_up_to(resp, 4096).await.unwrap_or_default();
            return Err(Error::Extract(format!(
                "tika status {}: {}",
                status.as_u16(),
                String::from_utf8_lossy(&snippet).trim()
            )));
        }

        let limit = max_text_bytes as usize + 1;
        let mut out = read_up_to(resp, limit).await?;

        let truncated = out.len() > max_text_bytes as usize;
        if truncated {
            out.truncate(max_text_bytes as usize);
        }

        Ok(ExtractResult { text: String::from_utf8_lossy(&out).into_owned(), truncated })
    }
}

async fn read_up_to(resp: reqwest::Response, limit: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let remaining = limit - out.len();
        if chunk.len() >= remaining {
            out.extend_from_slice(&chunk[..remaining]);
            break;
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn extracts_text_from_the_service() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/tika"))
            .and(header("accept", "text/plain"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Hello extracted"))
            .mount(&server)
            .await;

        let client = TikaClient::new(&server.uri()).unwrap();
        let result = client
            .extract_text("<html>x</html>".into(), Duration::from_secs(5), 1000)
            .await
            .unwrap();
        assert_eq!(result.text, "Hello extracted");
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn clamps_text_at_the_maximum() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/tika"))
            .respond_with(ResponseTemplate::new(200).set_body_string("0123456789"))
            .mount(&server)
            .await;

        let client = TikaClient::new(&server.uri()).unwrap();
        let result = client
            .extract_text("body".into(), Duration::from_secs(5), 4)
            .await
            .unwrap();
        assert_eq!(result.text, "0123");
        assert!(result.truncated);

        // Exactly at the limit is not truncation.
        let result = client
            .extract_text("body".into(), Duration::from_secs(5), 10)
            .await
            .unwrap();
        assert_eq!(result.text, "0123456789");
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn service_errors_are_reported_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/tika"))
            .respond_with(ResponseTemplate::new(422).set_body_string("Unprocessable"))
            .mount(&server)
            .await;

        let client = TikaClient::new(&server.uri()).unwrap();
        let err = client
            .extract_text("body".into(), Duration::from_secs(5), 1000)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("422"));
        assert!(err.to_string().contains("Unprocessable"));
    }

    #[test]
    fn rejects_empty_base_url() {
        assert!(TikaClient::new("").is_err());
    }
}
