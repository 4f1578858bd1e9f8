// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! HTTP request/response model and the transport seam under the pipeline

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{PostureAgentError, Result};

/// Request relative to the API root
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path below the API root, e.g. `posture/sessions/`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }
}

/// Status and raw body of a completed exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Authentication-rejected status that triggers the refresh protocol
    pub fn is_auth_rejected(&self) -> bool {
        self.status == 401
    }

    /// Deserialize the body
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let body = if self.body.trim().is_empty() {
            "null"
        } else {
            self.body.as_str()
        };
        serde_json::from_str(body).map_err(|e| {
            PostureAgentError::Protocol(format!("unexpected response body: {}", e))
        })
    }

    /// Human-readable message extracted from an error response
    ///
    /// Order: `detail`, `message`, first field error, raw body, status reason.
    pub fn error_message(&self) -> String {
        if let Ok(value) = serde_json::from_str::<Value>(&self.body) {
            if let Some(message) = message_from_json(&value) {
                return message;
            }
        }
        let body = self.body.trim();
        if !body.is_empty() {
            return body.to_string();
        }
        reqwest::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|status| status.canonical_reason())
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", self.status))
    }

    /// Pass success through, turn anything else into `Api { status, message }`
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(PostureAgentError::Api {
                status: self.status,
                message: self.error_message(),
            })
        }
    }
}

fn message_from_json(value: &Value) -> Option<String> {
    let object = value.as_object()?;
    for key in ["detail", "message"] {
        if let Some(Value::String(text)) = object.get(key) {
            return Some(text.clone());
        }
    }
    object.values().find_map(|field| match field {
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => items.iter().find_map(|item| item.as_str().map(str::to_string)),
        _ => None,
    })
}

/// Executes one HTTP exchange
///
/// `bearer` is attached as `Authorization: Bearer <token>` when present.
/// Non-2xx statuses are responses, not errors; only transport failures are.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<ApiResponse>;
}

/// reqwest-backed transport rooted at the API base URL
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(PostureAgentError::InvalidConfig(format!(
                "API root must be an http(s) URL: {}",
                base_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PostureAgentError::InvalidConfig(format!("HTTP client: {}", e)))?;
        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &posture_config::ApiConfig) -> Result<Self> {
        Self::new(config.base_url.clone(), config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<ApiResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url_for(&request.path));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(ApiResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_message_prefers_detail() {
        let response = ApiResponse::new(
            401,
            json!({"detail": "No active account found", "message": "ignored"}).to_string(),
        );
        assert_eq!(response.error_message(), "No active account found");
    }

    #[test]
    fn test_error_message_uses_first_field_error() {
        let response = ApiResponse::new(
            400,
            json!({"email": ["A user with this email already exists."]}).to_string(),
        );
        assert_eq!(
            response.error_message(),
            "A user with this email already exists."
        );

        let response = ApiResponse::new(
            400,
            json!({"password_confirm": "Passwords do not match."}).to_string(),
        );
        assert_eq!(response.error_message(), "Passwords do not match.");
    }

    #[test]
    fn test_error_message_falls_back_to_body_then_reason() {
        assert_eq!(
            ApiResponse::new(502, "upstream down").error_message(),
            "upstream down"
        );
        assert_eq!(ApiResponse::new(404, "").error_message(), "Not Found");
    }

    #[test]
    fn test_error_for_status() {
        assert!(ApiResponse::new(204, "").error_for_status().is_ok());
        match ApiResponse::new(403, json!({"detail": "Nope"}).to_string()).error_for_status() {
            Err(PostureAgentError::Api { status, message }) => {
                assert_eq!(status, 403);
                assert_eq!(message, "Nope");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_empty_body_deserializes_as_null() {
        let value: Option<Value> = ApiResponse::new(204, "").json().unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_url_join_normalizes_slashes() {
        let transport =
            ReqwestTransport::new("http://localhost:8000/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            transport.url_for("/auth/login/"),
            "http://localhost:8000/api/auth/login/"
        );
    }

    #[test]
    fn test_rejects_non_http_root() {
        assert!(ReqwestTransport::new("ws://localhost", Duration::from_secs(1)).is_err());
    }
}
