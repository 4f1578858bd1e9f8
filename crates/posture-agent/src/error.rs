// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the posture agent

/// Result type alias using PostureAgentError
pub type Result<T> = std::result::Result<T, PostureAgentError>;

/// Error types for the posture agent
///
/// Payloads are plain strings so one refresh outcome can be handed to every
/// request waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PostureAgentError {
    /// Connect attempted with no stored access token
    #[error("Authentication required - log in before connecting")]
    AuthRequired,

    /// Rejected after the single refresh-and-retry, or closed with the auth-failure code
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Transport-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// Malformed or unparseable payload
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error message sent by the analysis service
    #[error("Server reported: {0}")]
    Upstream(String),

    /// Non-authentication REST rejection, carrying the server's message
    #[error("Request rejected ({status}): {message}")]
    Api { status: u16, message: String },

    /// Frame loop requested without an open session channel
    #[error("Session channel is not open - call connect() first")]
    NotConnected,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Credential storage error: {0}")]
    Storage(String),

    #[error("Frame encoding error: {0}")]
    Encoding(String),
}

impl PostureAgentError {
    /// True for the terminal authentication outcomes
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            PostureAgentError::AuthRequired | PostureAgentError::AuthFailed(_)
        )
    }

    /// Message suitable for showing to the user
    ///
    /// REST rejections return the server-provided text unprefixed.
    pub fn user_message(&self) -> String {
        match self {
            PostureAgentError::Api { message, .. } => message.clone(),
            PostureAgentError::AuthFailed(message) if !message.is_empty() => message.clone(),
            PostureAgentError::Upstream(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for PostureAgentError {
    fn from(err: serde_json::Error) -> Self {
        PostureAgentError::Protocol(err.to_string())
    }
}

impl From<reqwest::Error> for PostureAgentError {
    fn from(err: reqwest::Error) -> Self {
        PostureAgentError::Network(err.to_string())
    }
}

impl From<posture_config::ConfigError> for PostureAgentError {
    fn from(err: posture_config::ConfigError) -> Self {
        PostureAgentError::InvalidConfig(err.to_string())
    }
}
