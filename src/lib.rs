// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Posture - real-time posture analysis client
//!
//! Umbrella crate over the posture workspace.
//!
//! ## Feature Flags
//!
//! - **`agent`** (default): credentials, authenticated REST pipeline, realtime sessions
//! - **`config`** (default): `posture_configuration.toml` loading and validation
//! - **`observability`** (default): per-crate debug flags and logging setup
//! - **`file-logging`**: rolling JSON log files in addition to the console
//!
//! ## Usage
//!
//! ```rust,no_run
//! use posture::prelude::*;
//!
//! # async fn run() -> posture::agent::Result<()> {
//! let config = load_config_or_default(None, None)?;
//! let client = PostureClient::from_config(&config)?;
//! if !client.auth().is_authenticated() {
//!     client.auth().login("alice", "secret").await?;
//! }
//!
//! let session = client.session();
//! session.connect()?;
//! let snapshot = session.wait_until_settled().await;
//! println!("session is {:?}", snapshot.phase);
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "config")]
pub use posture_config as config;

#[cfg(feature = "observability")]
pub use posture_observability as observability;

#[cfg(feature = "agent")]
pub use posture_agent as agent;

/// Prelude - commonly used types and traits
pub mod prelude {
    #[cfg(feature = "config")]
    pub use crate::config::{load_config, load_config_or_default, PostureConfig};

    #[cfg(feature = "observability")]
    pub use crate::observability::{init_logging, CrateDebugFlags, LoggingSettings};

    #[cfg(feature = "agent")]
    pub use crate::agent::{
        CloseReason, CredentialStore, DirectoryFrameSource, EncodedFrame, FrameSource,
        PostureAgentError, PostureClient, SessionConnection, SessionPhase, SessionSnapshot,
    };
}

#[cfg(test)]
mod tests {
    #[test]
    #[cfg(all(feature = "agent", feature = "config"))]
    fn test_facade_imports() {
        use crate::prelude::*;
        let config = PostureConfig::default();
        assert_eq!(config.capture.frames_per_second, 15.0);
        assert_eq!(SessionSnapshot::default().phase, SessionPhase::Idle);
    }
}
