//! Object store speaking plain HTTP PUT/GET/HEAD.
//!
//! Works against S3-compatible gateways that accept bearer tokens or
//! presigned base URLs, and against WebDAV servers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Client, StatusCode};

use super::{ObjectStore, PutOptions, StorageError};

/// HTTP object store rooted at a base URL.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        user_agent: &str,
    ) -> Result<Self, StorageError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn check(key: &str, status: StatusCode) -> Result<(), StorageError> {
    if status == StatusCode::NOT_FOUND {
        return Err(StorageError::NotFound(key.to_string()));
    }
    if !status.is_success() {
        return Err(StorageError::Status {
            key: key.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        options: &PutOptions,
    ) -> Result<(), StorageError> {
        let mut request = self.authorize(self.client.put(self.url(key))).body(body);
        if let Some(ref content_type) = options.content_type {
            request = request.header(CONTENT_TYPE, content_type);
        }
        if let Some(ref encoding) = options.content_encoding {
            request = request.header(CONTENT_ENCODING, encoding);
        }
        let response = request.send().await?;
        check(key, response.status())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.authorize(self.client.get(self.url(key))).send().await?;
        check(key, response.status())?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let response = self.authorize(self.client.head(self.url(key))).send().await?;
        match check(key, response.status()) {
            Ok(()) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let store = HttpObjectStore::new("https://objects.example/bucket/", None, "t").unwrap();
        assert_eq!(
            store.url("raw/cs_AI/x.jsonl.gz"),
            "https://objects.example/bucket/raw/cs_AI/x.jsonl.gz"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert!(check("k", StatusCode::OK).is_ok());
        assert!(matches!(
            check("k", StatusCode::NOT_FOUND),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            check("k", StatusCode::SERVICE_UNAVAILABLE),
            Err(StorageError::Status { status: 503, .. })
        ));
    }
}
