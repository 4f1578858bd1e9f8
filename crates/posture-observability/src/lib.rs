// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # posture-observability
//!
//! Logging infrastructure shared by the posture client crates.
//!
//! Provides consistent logging across every crate with per-crate debug flag
//! support (`--debug-posture-agent`, `POSTURE_DEBUG=all`, ...).
//!
//! ## Features
//! - `file-logging`: daily-rolling JSON log files next to the console output

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod config;
pub mod init;

// Re-export commonly used items
pub use cli::*;
pub use config::*;
pub use init::*;

/// Known posture crate names for debug flags
pub const KNOWN_CRATES: &[&str] = &[
    "posture",
    "posture-agent",
    "posture-config",
    "posture-observability",
];
