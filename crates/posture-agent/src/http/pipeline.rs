// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Authenticated request pipeline
//!
//! Attaches the stored access token to every request. A 401 triggers at most
//! one coalesced refresh followed by exactly one resubmission; the retry
//! marker is local to each `send` call.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::credentials::{AuthState, CredentialStore};
use crate::error::{PostureAgentError, Result};
use crate::http::refresh::TokenRefresher;
use crate::http::transport::{ApiRequest, ApiResponse, HttpTransport};

pub struct RequestPipeline {
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialStore>,
    refresher: TokenRefresher,
    auth_state: Arc<watch::Sender<AuthState>>,
}

impl RequestPipeline {
    pub fn new(transport: Arc<dyn HttpTransport>, credentials: Arc<dyn CredentialStore>) -> Self {
        let initial = if credentials.is_authenticated() {
            AuthState::Authenticated
        } else {
            AuthState::Unauthenticated
        };
        let (auth_state, _) = watch::channel(initial);
        let auth_state = Arc::new(auth_state);

        Self {
            refresher: TokenRefresher::new(
                transport.clone(),
                credentials.clone(),
                auth_state.clone(),
            ),
            transport,
            credentials,
            auth_state,
        }
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// Watch authentication transitions (login, logout, irrecoverable refresh failure)
    pub fn auth_state(&self) -> watch::Receiver<AuthState> {
        self.auth_state.subscribe()
    }

    pub(crate) fn publish_auth_state(&self, state: AuthState) {
        self.auth_state.send_replace(state);
    }

    /// Send an authenticated request
    ///
    /// Returns the response for any status other than 401 (callers decide what
    /// a 4xx/5xx means). A 401 is retried once after a refresh; a second 401 is
    /// `AuthFailed`.
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let token = self.credentials.access_token();
        let response = self.transport.execute(request, token.as_deref()).await?;
        if !response.is_auth_rejected() {
            return Ok(response);
        }

        debug!(
            "[PIPELINE] {} {} rejected with 401",
            request.method, request.path
        );

        let retry_token = match self.credentials.access_token() {
            // Another request renewed the token while this one was in flight
            Some(current) if token.as_deref() != Some(current.as_str()) => {
                debug!("[PIPELINE] Access token changed in flight; retrying without refresh");
                current
            }
            _ => {
                if self.credentials.refresh_token().is_none() {
                    return Err(PostureAgentError::AuthFailed(response.error_message()));
                }
                self.refresher.refresh(token.as_deref()).await?
            }
        };

        let retried = self.transport.execute(request, Some(&retry_token)).await?;
        if retried.is_auth_rejected() {
            warn!(
                "[PIPELINE] {} {} still rejected after refresh; giving up",
                request.method, request.path
            );
            return Err(PostureAgentError::AuthFailed(retried.error_message()));
        }
        Ok(retried)
    }

    /// Send without credentials and without the refresh protocol
    ///
    /// For endpoints that establish credentials (login, register).
    pub async fn send_anonymous(&self, request: &ApiRequest) -> Result<ApiResponse> {
        self.transport.execute(request, None).await
    }

    /// Authenticated request expecting a 2xx JSON body
    pub async fn send_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T> {
        self.send(request).await?.error_for_status()?.json()
    }
}
