//! reqwest-backed [`DataPlane`].

use super::{DataPlane, DataPlaneError, Manifest};
use crate::config::SyncConfig;
use async_trait::async_trait;
use log::debug;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, Url};
use std::time::Duration;

/// Body sent with every acknowledgement.
const ACK_BODY: &str = r#"{"synced":true}"#;

/// HTTP client for the device's data plane.
#[derive(Debug, Clone)]
pub struct HttpDataPlane {
    client: Client,
    base_url: String,
}

impl HttpDataPlane {
    /// Client for `base_url` (e.g. `http://192.168.4.1`) with a per-request
    /// timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url,
        }
    }

    /// Client for the device address in `config`.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.base_url(), config.http_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `{base}/api/sessions/{id}/{action}` with `id` percent-encoded.
    fn session_url(&self, id: &str, action: &str) -> Result<Url, String> {
        let mut url =
            Url::parse(&self.base_url).map_err(|e| format!("invalid base URL: {}", e))?;
        url.path_segments_mut()
            .map_err(|()| format!("base URL {} cannot take a path", self.base_url))?
            .pop_if_empty()
            .extend(["api", "sessions", id, action]);
        Ok(url)
    }
}

/// Describe a request failure.
fn describe(e: reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {}", e)
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    }
}

/// Reject non-2xx responses.
fn check_status(response: Response) -> Result<Response, String> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(format!(
            "HTTP {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )
        .trim_end()
        .to_string())
    }
}

#[async_trait]
impl DataPlane for HttpDataPlane {
    async fn fetch_manifest(&self) -> Result<Manifest, DataPlaneError> {
        let url = self.url("/api/manifest");
        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DataPlaneError::ManifestFetchFailed(describe(e)))?;
        let body = check_status(response)
            .map_err(DataPlaneError::ManifestFetchFailed)?
            .bytes()
            .await
            .map_err(|e| DataPlaneError::ManifestFetchFailed(describe(e)))?;
        serde_json::from_slice(&body)
            .map_err(|e| DataPlaneError::ManifestFetchFailed(format!("invalid manifest: {}", e)))
    }

    async fn download_entry(&self, id: &str) -> Result<Vec<u8>, DataPlaneError> {
        let failed = |reason: String| DataPlaneError::DownloadFailed {
            id: id.to_string(),
            reason,
        };
        let url = self.session_url(id, "download").map_err(failed)?;
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| failed(describe(e)))?;
        let body = check_status(response)
            .map_err(failed)?
            .bytes()
            .await
            .map_err(|e| failed(describe(e)))?;
        Ok(body.to_vec())
    }

    async fn ack_entry(&self, id: &str) -> Result<(), DataPlaneError> {
        let failed = |reason: String| DataPlaneError::AckFailed {
            id: id.to_string(),
            reason,
        };
        let url = self.session_url(id, "ack").map_err(failed)?;
        debug!("POST {}", url);
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(ACK_BODY)
            .send()
            .await
            .map_err(|e| failed(describe(e)))?;
        check_status(response).map_err(failed)?;
        Ok(())
    }
}
