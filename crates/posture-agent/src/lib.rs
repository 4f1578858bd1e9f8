// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Posture Agent
//!
//! Client core for the posture analysis service.
//!
//! - [`credentials`]: access/refresh token storage (memory or JSON file)
//! - [`http`]: authenticated REST pipeline with single-flight token refresh
//! - [`api`]: account and session-history services
//! - [`realtime`]: WebSocket analysis sessions and the fixed-rate frame loop
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use posture_agent::{DirectoryFrameSource, PostureClient};
//! use posture_config::load_config_or_default;
//!
//! # async fn run() -> posture_agent::Result<()> {
//! let config = load_config_or_default(None, None)?;
//! let client = PostureClient::from_config(&config)?;
//! client.auth().login("alice", "secret").await?;
//!
//! let session = client.session();
//! session.connect()?;
//! session.wait_until_settled().await;
//! session.start_session();
//! session.start_frame_loop(Arc::new(DirectoryFrameSource::open("./frames")?), 15.0)?;
//! # Ok(())
//! # }
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod api;
pub mod client;
pub mod credentials;
pub mod error;
pub mod http;
pub mod realtime;

pub use api::{AuthService, PostureApi, UserProfile};
pub use client::PostureClient;
pub use credentials::{
    AuthState, CredentialStore, Credentials, FileCredentialStore, MemoryCredentialStore,
};
pub use error::{PostureAgentError, Result};
pub use http::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport, RequestPipeline};
pub use realtime::{
    frame_period, CloseReason, DirectoryFrameSource, EncodedFrame, FrameScheduler, FrameSink,
    FrameSource, InboundMessage, OutboundMessage, PostureResult, SessionConnection,
    SessionPhase, SessionSnapshot, SessionStateMachine, SessionSummary,
};
