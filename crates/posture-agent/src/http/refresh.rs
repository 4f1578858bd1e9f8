// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Single-flight access token renewal
//!
//! Concurrent callers attach to one pending refresh and resolve together.
//! The slot is emptied by whichever waiter first observes completion, on the
//! success and the failure path alike.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::credentials::{AuthState, CredentialStore};
use crate::error::{PostureAgentError, Result};
use crate::http::transport::{ApiRequest, HttpTransport};

/// Refresh endpoint below the API root
pub const REFRESH_PATH: &str = "auth/refresh/";

type PendingRefresh = Shared<BoxFuture<'static, Result<String>>>;

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

pub(crate) struct TokenRefresher {
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialStore>,
    auth_state: Arc<watch::Sender<AuthState>>,
    pending: Mutex<Option<(u64, PendingRefresh)>>,
    generation: AtomicU64,
}

impl TokenRefresher {
    pub(crate) fn new(
        transport: Arc<dyn HttpTransport>,
        credentials: Arc<dyn CredentialStore>,
        auth_state: Arc<watch::Sender<AuthState>>,
    ) -> Self {
        Self {
            transport,
            credentials,
            auth_state,
            pending: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Obtain a renewed access token, joining a refresh already in flight
    ///
    /// `rejected` is the token the server just refused. If the store already
    /// holds a different one, a refresh finished meanwhile and its token is
    /// returned without another call.
    pub(crate) async fn refresh(&self, rejected: Option<&str>) -> Result<String> {
        let (generation, pending) = {
            let mut slot = self.pending.lock();
            match slot.as_ref() {
                Some((generation, pending)) => {
                    debug!("[REFRESH] Joining refresh already in flight");
                    (*generation, pending.clone())
                }
                None => {
                    if let Some(current) = self.credentials.access_token() {
                        if rejected != Some(current.as_str()) {
                            debug!("[REFRESH] Token already renewed; not refreshing again");
                            return Ok(current);
                        }
                    }
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let pending = renew(
                        self.transport.clone(),
                        self.credentials.clone(),
                        self.auth_state.clone(),
                    )
                    .boxed()
                    .shared();
                    *slot = Some((generation, pending.clone()));
                    (generation, pending)
                }
            }
        };

        let outcome = pending.await;

        let mut slot = self.pending.lock();
        if matches!(slot.as_ref(), Some((current, _)) if *current == generation) {
            *slot = None;
        }
        outcome
    }

    #[cfg(test)]
    fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}

/// The refresh call itself; never goes through the retrying pipeline
async fn renew(
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialStore>,
    auth_state: Arc<watch::Sender<AuthState>>,
) -> Result<String> {
    let Some(refresh_token) = credentials.refresh_token() else {
        return Err(invalidate(&*credentials, &auth_state, "no refresh token stored"));
    };

    debug!("[REFRESH] Requesting a new access token");
    let request = ApiRequest::post(REFRESH_PATH, json!({ "refresh": refresh_token }));
    let response = match transport.execute(&request, None).await {
        Ok(response) => response,
        Err(e) => return Err(invalidate(&*credentials, &auth_state, &e.to_string())),
    };

    if !response.is_success() {
        let reason = format!(
            "refresh rejected ({}): {}",
            response.status,
            response.error_message()
        );
        return Err(invalidate(&*credentials, &auth_state, &reason));
    }

    let renewed: RefreshResponse = match response.json() {
        Ok(renewed) => renewed,
        Err(e) => return Err(invalidate(&*credentials, &auth_state, &e.to_string())),
    };

    let rotated = renewed.refresh.is_some();
    if let Err(e) = credentials.update_access(renewed.access.clone(), renewed.refresh) {
        return Err(invalidate(&*credentials, &auth_state, &e.to_string()));
    }

    info!("[REFRESH] Access token renewed (refresh token rotated: {})", rotated);
    Ok(renewed.access)
}

/// Irrecoverable refresh failure: drop both tokens and fall back to unauthenticated
fn invalidate(
    credentials: &dyn CredentialStore,
    auth_state: &watch::Sender<AuthState>,
    reason: &str,
) -> PostureAgentError {
    warn!("[REFRESH] Token refresh failed: {}", reason);
    if let Err(e) = credentials.clear() {
        error!("[REFRESH] Failed to clear credentials: {}", e);
    }
    auth_state.send_replace(AuthState::Unauthenticated);
    PostureAgentError::AuthFailed(format!("session expired: {}", reason))
}
