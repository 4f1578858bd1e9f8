// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! This module provides validation logic to ensure configuration values are
//! consistent and within valid ranges before any client component is built.

use crate::{ConfigError, ConfigResult, PostureConfig};

/// Validation errors that can occur during config validation
#[derive(Debug, Clone)]
pub enum ConfigValidationError {
    MissingRequired { field: String },
    InvalidValue { field: String, reason: String },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRequired { field } => {
                write!(f, "Missing required configuration: {}", field)
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
        }
    }
}

/// Validate the complete configuration
///
/// Checks for:
/// - Required fields (API root, realtime host)
/// - Valid value ranges (frame rate, JPEG quality, close code, timeouts)
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` listing every problem found
pub fn validate_config(config: &PostureConfig) -> ConfigResult<()> {
    let mut errors = Vec::new();

    validate_required_fields(config, &mut errors);
    validate_value_ranges(config, &mut errors);

    if !errors.is_empty() {
        let error_messages = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");

        return Err(ConfigError::ValidationError(format!(
            "Configuration validation failed:\n{}",
            error_messages
        )));
    }

    Ok(())
}

fn validate_required_fields(config: &PostureConfig, errors: &mut Vec<ConfigValidationError>) {
    if config.api.base_url.trim().is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "api.base_url".to_string(),
        });
    } else if !(config.api.base_url.starts_with("http://")
        || config.api.base_url.starts_with("https://"))
    {
        errors.push(ConfigValidationError::InvalidValue {
            field: "api.base_url".to_string(),
            reason: "must start with http:// or https://".to_string(),
        });
    }

    if config.realtime.host.trim().is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "realtime.host".to_string(),
        });
    }

    if !config.realtime.path.starts_with('/') {
        errors.push(ConfigValidationError::InvalidValue {
            field: "realtime.path".to_string(),
            reason: "must start with '/'".to_string(),
        });
    }
}

fn validate_value_ranges(config: &PostureConfig, errors: &mut Vec<ConfigValidationError>) {
    let fps = config.capture.frames_per_second;
    if !fps.is_finite() || fps <= 0.0 || fps > 60.0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "capture.frames_per_second".to_string(),
            reason: "must be greater than 0 and at most 60".to_string(),
        });
    }

    if config.capture.jpeg_quality == 0 || config.capture.jpeg_quality > 100 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "capture.jpeg_quality".to_string(),
            reason: "must be between 1 and 100".to_string(),
        });
    }

    // Application close codes live in 4000-4999 (RFC 6455 section 7.4.2)
    if !(4000..=4999).contains(&config.realtime.auth_failed_close_code) {
        errors.push(ConfigValidationError::InvalidValue {
            field: "realtime.auth_failed_close_code".to_string(),
            reason: "must be between 4000 and 4999".to_string(),
        });
    }

    if config.api.request_timeout_ms == 0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "api.request_timeout_ms".to_string(),
            reason: "must be positive".to_string(),
        });
    }
    if config.realtime.close_timeout_ms == 0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "realtime.close_timeout_ms".to_string(),
            reason: "must be positive".to_string(),
        });
    }
}
