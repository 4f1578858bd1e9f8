// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Account operations: login, registration, profile, logout

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::credentials::{AuthState, Credentials};
use crate::error::Result;
use crate::http::{ApiRequest, RequestPipeline};

pub const LOGIN_PATH: &str = "auth/login/";
pub const REGISTER_PATH: &str = "auth/register/";
pub const PROFILE_PATH: &str = "auth/profile/";

/// Account profile; absent limits mean unlimited
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: String,
    #[serde(default)]
    pub email: String,
    pub tier: String,
    #[serde(default)]
    pub daily_sessions_used: u32,
    #[serde(default)]
    pub session_limit: Option<u32>,
    /// Seconds
    #[serde(default)]
    pub max_session_duration: Option<u32>,
    #[serde(default)]
    pub history_days: Option<u32>,
    #[serde(default)]
    pub created_at: Option<String>,
}

pub struct AuthService {
    pipeline: Arc<RequestPipeline>,
    profile: RwLock<Option<UserProfile>>,
}

impl AuthService {
    pub fn new(pipeline: Arc<RequestPipeline>) -> Self {
        Self {
            pipeline,
            profile: RwLock::new(None),
        }
    }

    /// Exchange username/password for a token pair, then load the profile
    ///
    /// A profile failure does not fail the login; the profile is just absent.
    pub async fn login(&self, username: &str, password: &str) -> Result<Option<UserProfile>> {
        let request = ApiRequest::post(
            LOGIN_PATH,
            json!({ "username": username, "password": password }),
        );
        let credentials: Credentials = self
            .pipeline
            .send_anonymous(&request)
            .await?
            .error_for_status()?
            .json()?;

        self.pipeline.credentials().store(credentials)?;
        self.pipeline.publish_auth_state(AuthState::Authenticated);
        info!("[AUTH] Logged in as {}", username);

        Ok(self.fetch_profile().await)
    }

    /// Create an account and log into it
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Option<UserProfile>> {
        let request = ApiRequest::post(
            REGISTER_PATH,
            json!({
                "username": username,
                "email": email,
                "password": password,
                "password_confirm": password,
            }),
        );
        self.pipeline
            .send_anonymous(&request)
            .await?
            .error_for_status()?;
        info!("[AUTH] Registered {}", username);

        self.login(username, password).await
    }

    /// Reload the profile; any failure leaves it absent
    pub async fn fetch_profile(&self) -> Option<UserProfile> {
        let profile = match self
            .pipeline
            .send_json::<UserProfile>(&ApiRequest::get(PROFILE_PATH))
            .await
        {
            Ok(profile) => Some(profile),
            Err(e) => {
                debug!("[AUTH] Profile unavailable: {}", e);
                None
            }
        };
        *self.profile.write() = profile.clone();
        profile
    }

    /// Last loaded profile
    pub fn profile(&self) -> Option<UserProfile> {
        self.profile.read().clone()
    }

    pub fn logout(&self) -> Result<()> {
        *self.profile.write() = None;
        let cleared = self.pipeline.credentials().clear();
        if let Err(e) = &cleared {
            warn!("[AUTH] Logout could not clear stored credentials: {}", e);
        }
        self.pipeline.publish_auth_state(AuthState::Unauthenticated);
        info!("[AUTH] Logged out");
        cleared
    }

    pub fn is_authenticated(&self) -> bool {
        self.pipeline.credentials().is_authenticated()
    }
}
