// http.rs — The `http` source kind: GET a JSON document.
//
// The last ETag seen is sent back as If-None-Match; a 304 answer means the
// document did not change and no new data is reported.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ETAG, IF_NONE_MATCH};
use reqwest::{Client, StatusCode, Url};
use serde_json::{Map, Value};

use crate::duration::duration_from_value;
use crate::error::DataError;
use crate::registry::{Source, SourceConfig, SourceFactory};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpFactory;

impl SourceFactory for HttpFactory {
    fn kind(&self) -> &'static str {
        "http"
    }

    fn min_interval(&self) -> Duration {
        Duration::from_secs(10)
    }

    fn validate(&self, raw: &Map<String, Value>) -> Result<Arc<dyn SourceConfig>, DataError> {
        let url = match raw.get("url") {
            Some(Value::String(url)) => {
                Url::parse(url).map_err(|e| DataError::field("url", e.to_string()))?
            }
            Some(_) => return Err(DataError::field("url", "must be a string")),
            None => return Err(DataError::field("url", "is required")),
        };
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DataError::field(
                "url",
                format!("unsupported scheme \"{}\"", url.scheme()),
            ));
        }

        let mut headers = HeaderMap::new();
        match raw.get("headers") {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => {
                for (name, value) in map {
                    let Value::String(value) = value else {
                        return Err(DataError::field("headers", format!("value of \"{}\" must be a string", name)));
                    };
                    let name = HeaderName::from_str(name)
                        .map_err(|e| DataError::field("headers", format!("\"{}\": {}", name, e)))?;
                    let value = HeaderValue::from_str(value)
                        .map_err(|e| DataError::field("headers", format!("\"{}\": {}", name, e)))?;
                    headers.insert(name, value);
                }
            }
            Some(_) => return Err(DataError::field("headers", "must be an object of strings")),
        }

        let timeout = match raw.get("timeout") {
            None | Some(Value::Null) => DEFAULT_TIMEOUT,
            Some(value) => duration_from_value(value).map_err(|e| DataError::field("timeout", e))?,
        };

        Ok(Arc::new(HttpConfig {
            url,
            headers,
            timeout,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub url: Url,
    pub headers: HeaderMap,
    pub timeout: Duration,
}

impl SourceConfig for HttpConfig {
    fn new_source(&self) -> Result<Box<dyn Source>, DataError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .default_headers(self.headers.clone())
            .build()
            .map_err(|e| DataError::fetch(format!("building HTTP client: {}", e)))?;
        Ok(Box::new(HttpSource {
            client,
            url: self.url.clone(),
            etag: None,
        }))
    }
}

pub struct HttpSource {
    client: Client,
    url: Url,
    etag: Option<HeaderValue>,
}

#[async_trait]
impl Source for HttpSource {
    async fn fetch(&mut self) -> Result<Option<Value>, DataError> {
        let mut request = self.client.get(self.url.clone());
        if let Some(etag) = &self.etag {
            request = request.header(IF_NONE_MATCH, etag.clone());
        }
        let response = request
            .send()
            .await
            .map_err(|e| DataError::fetch(format!("GET {}: {}", self.url, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            tracing::debug!(url = %self.url, "not modified");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(DataError::fetch(format!("GET {}: unexpected status {}", self.url, status)));
        }

        let etag = response.headers().get(ETAG).cloned();
        let body: Value = response
            .json()
            .await
            .map_err(|e| DataError::fetch(format!("GET {}: invalid JSON body: {}", self.url, e)))?;
        self.etag = etag;
        Ok(Some(body))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn validate(raw: Value) -> Result<Arc<dyn SourceConfig>, DataError> {
        let Value::Object(map) = raw else { unreachable!() };
        HttpFactory.validate(&map)
    }

    #[test]
    fn accepts_url_headers_and_timeout() {
        validate(json!({
            "url": "https://example.com/data.json",
            "headers": {"Authorization": "Bearer abc"},
            "timeout": "3s",
        }))
        .unwrap()
        .new_source()
        .unwrap();
        assert_eq!(HttpFactory.min_interval(), Duration::from_secs(10));
    }

    #[test]
    fn rejects_bad_fields() {
        assert!(validate(json!({})).is_err());
        assert!(validate(json!({"url": "ftp://example.com"})).is_err());
        assert!(validate(json!({"url": "not a url"})).is_err());
        assert!(validate(json!({"url": "http://x", "headers": {"A": 1}})).is_err());
        assert!(validate(json!({"url": "http://x", "headers": {"bad header": "v"}})).is_err());
        assert!(validate(json!({"url": "http://x", "timeout": "soon"})).is_err());
    }
}
