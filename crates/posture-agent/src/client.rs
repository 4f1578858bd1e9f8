// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! One-stop wiring of the agent components around a single credential store

use std::sync::Arc;

use posture_config::{validate_config, PostureConfig, RealtimeConfig};
use tokio::sync::watch;
use tracing::info;

use crate::api::{AuthService, PostureApi};
use crate::credentials::{AuthState, CredentialStore, FileCredentialStore};
use crate::error::Result;
use crate::http::{HttpTransport, ReqwestTransport, RequestPipeline};
use crate::realtime::SessionConnection;

/// REST services and realtime sessions sharing one set of credentials
pub struct PostureClient {
    pipeline: Arc<RequestPipeline>,
    auth: AuthService,
    api: PostureApi,
    realtime: RealtimeConfig,
}

impl PostureClient {
    /// Validate `config` and build the file-backed client it describes
    pub fn from_config(config: &PostureConfig) -> Result<Self> {
        validate_config(config)?;

        let credentials = FileCredentialStore::open(config.storage.credentials_path.clone())?;
        let transport = ReqwestTransport::from_config(&config.api)?;
        info!(
            "[AUTH] Client for {} (credentials at {})",
            transport.base_url(),
            credentials.path().display()
        );

        Ok(Self::with_parts(
            Arc::new(transport),
            Arc::new(credentials),
            config.realtime.clone(),
        ))
    }

    /// Build from explicit components
    pub fn with_parts(
        transport: Arc<dyn HttpTransport>,
        credentials: Arc<dyn CredentialStore>,
        realtime: RealtimeConfig,
    ) -> Self {
        let pipeline = Arc::new(RequestPipeline::new(transport, credentials));
        Self {
            auth: AuthService::new(pipeline.clone()),
            api: PostureApi::new(pipeline.clone()),
            pipeline,
            realtime,
        }
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    pub fn api(&self) -> &PostureApi {
        &self.api
    }

    pub fn pipeline(&self) -> &Arc<RequestPipeline> {
        &self.pipeline
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        self.pipeline.credentials()
    }

    pub fn auth_state(&self) -> watch::Receiver<AuthState> {
        self.pipeline.auth_state()
    }

    /// New, unconnected realtime session using the shared credentials
    pub fn session(&self) -> SessionConnection {
        SessionConnection::new(self.realtime.clone(), self.credentials().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credentials;
    use crate::error::PostureAgentError;
    use tempfile::tempdir;

    #[test]
    fn test_from_config_rejects_invalid_config() {
        let mut config = PostureConfig::default();
        config.capture.frames_per_second = 0.0;
        let result = PostureClient::from_config(&config);
        assert!(matches!(result, Err(PostureAgentError::InvalidConfig(_))));
    }

    #[test]
    fn test_sessions_share_the_credential_store() {
        let dir = tempdir().unwrap();
        let mut config = PostureConfig::default();
        config.storage.credentials_path = dir.path().join("tokens.json");

        let client = PostureClient::from_config(&config).unwrap();
        assert!(!client.auth().is_authenticated());

        client
            .credentials()
            .store(Credentials::new("access-1", "refresh-1"))
            .unwrap();
        assert!(client.auth().is_authenticated());
        assert_eq!(
            client.credentials().access_token().as_deref(),
            Some("access-1")
        );
    }
}
