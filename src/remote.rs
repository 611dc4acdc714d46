use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::model::{Class, ClassId};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const BASE_URL_ENV: &str = "ATTENDSHEETS_API_URL";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport failures and server rejections are the only two shapes callers
/// distinguish: a rejection carries the backend's own `detail` message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("{0}")]
    Rejected(String),
    #[error("network failure: {0}")]
    Network(String),
}

/// Bearer credential owned by the host's auth collaborator and pushed in
/// over IPC. Shared so spawned pushes read the current token.
#[derive(Clone, Default)]
pub struct TokenHolder {
    token: Arc<Mutex<Option<String>>>,
}

impl TokenHolder {
    pub fn set(&self, token: Option<String>) {
        let mut slot = self.token.lock().unwrap_or_else(|e| e.into_inner());
        *slot = token;
    }

    pub fn get(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
pub trait ClassService: Send + Sync {
    async fn list_classes(&self) -> Result<Vec<Class>, RemoteError>;
    async fn get_class(&self, id: ClassId) -> Result<Class, RemoteError>;
    async fn create_class(&self, class: &Class) -> Result<Class, RemoteError>;
    async fn update_class(&self, class: &Class) -> Result<Class, RemoteError>;
    async fn delete_class(&self, id: ClassId) -> Result<bool, RemoteError>;
    /// QR verification; the backend is the authority on scan validity.
    async fn submit_scan(&self, class_id: &str, code: &str) -> Result<String, RemoteError>;
}

#[derive(Deserialize)]
struct ClassEnvelope {
    class: Class,
}

#[derive(Deserialize)]
struct DeleteEnvelope {
    success: bool,
}

#[derive(Deserialize)]
struct ScanEnvelope {
    message: String,
}

pub struct HttpClassService {
    base_url: String,
    client: reqwest::Client,
    token: TokenHolder,
}

impl HttpClassService {
    pub fn new(base_url: impl Into<String>, token: TokenHolder) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(HttpClassService {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            token,
        })
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = self.token.get() {
            if let Ok(value) = format!("Bearer {}", token).parse() {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Reads the body regardless of status so a rejection can surface the
    /// backend's `detail` (FastAPI) or `message` field instead of a bare
    /// status line.
    async fn read_body(response: reqwest::Response) -> Result<String, RemoteError> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(RemoteError::Rejected(rejection_detail(&text, status)));
        }
        Ok(text)
    }

    fn decode<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, RemoteError> {
        serde_json::from_str(text)
            .map_err(|e| RemoteError::Network(format!("unexpected response format: {}", e)))
    }
}

fn rejection_detail(body: &str, status: reqwest::StatusCode) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["detail", "message"] {
            if let Some(detail) = value.get(field).and_then(|v| v.as_str()) {
                return detail.to_string();
            }
        }
    }
    format!("API error: HTTP {}", status.as_u16())
}

fn transport(e: reqwest::Error) -> RemoteError {
    RemoteError::Network(e.to_string())
}

#[async_trait]
impl ClassService for HttpClassService {
    async fn list_classes(&self) -> Result<Vec<Class>, RemoteError> {
        let response = self
            .client
            .get(self.url("/classes"))
            .headers(self.auth_headers())
            .send()
            .await
            .map_err(transport)?;
        let body = Self::read_body(response).await?;
        let classes: Vec<Class> = Self::decode(&body)?;
        debug!(count = classes.len(), "fetched remote classes");
        Ok(classes)
    }

    async fn get_class(&self, id: ClassId) -> Result<Class, RemoteError> {
        let response = self
            .client
            .get(self.url(&format!("/classes/{}", id)))
            .headers(self.auth_headers())
            .send()
            .await
            .map_err(transport)?;
        let body = Self::read_body(response).await?;
        Self::decode(&body)
    }

    async fn create_class(&self, class: &Class) -> Result<Class, RemoteError> {
        let response = self
            .client
            .post(self.url("/classes"))
            .headers(self.auth_headers())
            .json(class)
            .send()
            .await
            .map_err(transport)?;
        let body = Self::read_body(response).await?;
        Ok(Self::decode::<ClassEnvelope>(&body)?.class)
    }

    async fn update_class(&self, class: &Class) -> Result<Class, RemoteError> {
        let response = self
            .client
            .put(self.url(&format!("/classes/{}", class.id)))
            .headers(self.auth_headers())
            .json(class)
            .send()
            .await
            .map_err(transport)?;
        let body = Self::read_body(response).await?;
        Ok(Self::decode::<ClassEnvelope>(&body)?.class)
    }

    async fn delete_class(&self, id: ClassId) -> Result<bool, RemoteError> {
        let response = self
            .client
            .delete(self.url(&format!("/classes/{}", id)))
            .headers(self.auth_headers())
            .send()
            .await
            .map_err(transport)?;
        let body = Self::read_body(response).await?;
        Ok(Self::decode::<DeleteEnvelope>(&body)?.success)
    }

    async fn submit_scan(&self, class_id: &str, code: &str) -> Result<String, RemoteError> {
        let response = self
            .client
            .post(self.url("/qr/scan"))
            .query(&[("classid", class_id), ("qrcode", code)])
            .headers(self.auth_headers())
            .send()
            .await
            .map_err(transport)?;
        let body = Self::read_body(response).await?;
        Ok(Self::decode::<ScanEnvelope>(&body)?.message)
    }
}
