use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::error::{BookError, ConfigError};

/// Status and body of one GET request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }
}

/// Anything able to issue a GET and hand back status plus raw bytes.
///
/// Only transport failures are errors here; status codes are interpreted by
/// [`fetch_bytes`].
#[allow(async_fn_in_trait)]
pub trait Fetch {
    async fn get(&self, url: &str) -> Result<HttpResponse, BookError>;
}

/// GET `url` and return the body, mapping non-success statuses to
/// [`BookError::NotFound`] (404) or [`BookError::Http`].
pub async fn fetch_bytes<F: Fetch>(client: &F, url: &str) -> Result<Vec<u8>, BookError> {
    let response = client.get(url).await?;
    match response.status {
        200..=299 => Ok(response.body),
        404 => Err(BookError::NotFound {
            url: url.to_string(),
        }),
        status => Err(BookError::Http {
            url: url.to_string(),
            status,
        }),
    }
}

/// Shared reqwest session. Default headers are attached to every request.
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(headers: &BTreeMap<String, String>, timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .default_headers(header_map(headers)?)
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;

        Ok(Self { client })
    }
}

impl Fetch for HttpClient {
    async fn get(&self, url: &str) -> Result<HttpResponse, BookError> {
        debug!("GET {}", url);

        let transport = |e: reqwest::Error| BookError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(transport)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(transport)?.to_vec();

        debug!("{} -> {} ({} bytes)", url, status, body.len());
        Ok(HttpResponse { status, body })
    }
}

pub(crate) fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, ConfigError> {
    let mut map = HeaderMap::with_capacity(headers.len());

    for (name, value) in headers {
        let invalid = |reason: String| ConfigError::InvalidHeader {
            name: name.clone(),
            reason,
        };
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
        map.insert(header_name, header_value);
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(HttpResponse);

    impl Fetch for Canned {
        async fn get(&self, _url: &str) -> Result<HttpResponse, BookError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_success_returns_body() {
        let body = fetch_bytes(&Canned(HttpResponse::ok(b"abc".to_vec())), "u")
            .await
            .unwrap();
        assert_eq!(body, b"abc");
    }

    #[tokio::test]
    async fn test_404_is_not_found() {
        let err = fetch_bytes(&Canned(HttpResponse::status(404)), "https://x/y")
            .await
            .unwrap_err();
        assert!(matches!(err, BookError::NotFound { url } if url == "https://x/y"));
    }

    #[tokio::test]
    async fn test_other_status_is_http_error() {
        for code in [301, 403, 500] {
            let err = fetch_bytes(&Canned(HttpResponse::status(code)), "u")
                .await
                .unwrap_err();
            assert!(matches!(err, BookError::Http { status, .. } if status == code));
        }
    }

    #[test]
    fn test_header_map_rejects_bad_name() {
        let mut headers = BTreeMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        assert!(matches!(
            header_map(&headers),
            Err(ConfigError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn test_header_map_accepts_user_agent() {
        let mut headers = BTreeMap::new();
        headers.insert("User-Agent".to_string(), "Mozilla/5.0".to_string());
        let map = header_map(&headers).unwrap();
        assert_eq!(map.get("user-agent").unwrap(), "Mozilla/5.0");
    }
}
