// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! This module implements the 3-tier configuration loading system:
//! 1. TOML file (base defaults)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)

use crate::{ConfigError, ConfigResult, PostureConfig};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "posture_configuration.toml";

/// Find the posture configuration file
///
/// Search order:
/// 1. `POSTURE_CONFIG_PATH` environment variable
/// 2. Current working directory: `./posture_configuration.toml`
/// 3. Up to 5 parent directories
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var("POSTURE_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::FileNotFound(format!(
            "Config file specified by POSTURE_CONFIG_PATH not found: {}",
            path.display()
        )));
    }

    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));

        let mut current = cwd.clone();
        for _ in 0..5 {
            if let Some(parent) = current.parent() {
                search_paths.push(parent.join(CONFIG_FILE_NAME));
                current = parent.to_path_buf();
            }
        }
    }

    for path in &search_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "Configuration file '{}' not found in any of these locations:\n{}\n\nSet POSTURE_CONFIG_PATH environment variable to specify custom location.",
        CONFIG_FILE_NAME, search_list
    )))
}

/// Load configuration from TOML file
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, will search for config file.
/// * `cli_args` - Optional CLI argument overrides
///
/// # Errors
///
/// Returns error if config file is not found or contains invalid TOML
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<PostureConfig> {
    let config_file = match config_path {
        Some(path) => path.to_path_buf(),
        None => find_config_file()?,
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: PostureConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config);
    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli);
    }

    Ok(config)
}

/// Like [`load_config`], but starts from built-in defaults when no file can be
/// discovered. An explicit `config_path` that does not exist is still an error.
pub fn load_config_or_default(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<PostureConfig> {
    if config_path.is_some() {
        return load_config(config_path, cli_args);
    }
    match find_config_file() {
        Ok(path) => load_config(Some(&path), cli_args),
        Err(ConfigError::FileNotFound(_)) => {
            let mut config = PostureConfig::default();
            apply_environment_overrides(&mut config);
            if let Some(cli) = cli_args {
                apply_cli_overrides(&mut config, cli);
            }
            Ok(config)
        }
        Err(e) => Err(e),
    }
}

fn parse_flag(value: &str) -> bool {
    let value = value.to_lowercase();
    value == "true" || value == "1" || value == "yes"
}

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `POSTURE_API_URL` -> `api.base_url`
/// - `POSTURE_API_TIMEOUT_MS` -> `api.request_timeout_ms`
/// - `POSTURE_WS_HOST` -> `realtime.host`
/// - `POSTURE_WS_SECURE` -> `realtime.secure`
/// - `POSTURE_CAPTURE_FPS` -> `capture.frames_per_second`
/// - `POSTURE_CREDENTIALS_PATH` -> `storage.credentials_path`
/// - `POSTURE_LOG_LEVEL` -> `logging.level`
pub fn apply_environment_overrides(config: &mut PostureConfig) {
    if let Ok(value) = env::var("POSTURE_API_URL") {
        config.api.base_url = value;
    }
    if let Ok(value) = env::var("POSTURE_API_TIMEOUT_MS") {
        if let Ok(timeout) = value.parse::<u64>() {
            config.api.request_timeout_ms = timeout;
        }
    }

    if let Ok(value) = env::var("POSTURE_WS_HOST") {
        config.realtime.host = value;
    }
    if let Ok(value) = env::var("POSTURE_WS_SECURE") {
        config.realtime.secure = parse_flag(&value);
    }

    if let Ok(value) = env::var("POSTURE_CAPTURE_FPS") {
        if let Ok(fps) = value.parse::<f64>() {
            config.capture.frames_per_second = fps;
        }
    }

    if let Ok(value) = env::var("POSTURE_CREDENTIALS_PATH") {
        config.storage.credentials_path = PathBuf::from(value);
    }
    if let Ok(value) = env::var("POSTURE_LOG_LEVEL") {
        config.logging.level = value;
    }
}

/// Apply CLI argument overrides to configuration
///
/// # Arguments
///
/// * `config` - Configuration to modify
/// * `cli_args` - HashMap of CLI arguments (e.g., `{"ws_host": "10.0.0.5:8000", "capture_fps": "10"}`)
pub fn apply_cli_overrides(config: &mut PostureConfig, cli_args: &HashMap<String, String>) {
    if let Some(value) = cli_args.get("api_url") {
        config.api.base_url = value.clone();
    }

    if let Some(value) = cli_args.get("ws_host") {
        config.realtime.host = value.clone();
    }
    if let Some(value) = cli_args.get("ws_secure") {
        config.realtime.secure = parse_flag(value);
    }

    if let Some(value) = cli_args.get("capture_fps") {
        if let Ok(fps) = value.parse::<f64>() {
            config.capture.frames_per_second = fps;
        }
    }

    if let Some(value) = cli_args.get("credentials_path") {
        config.storage.credentials_path = PathBuf::from(value);
    }
    if let Some(value) = cli_args.get("log_level") {
        config.logging.level = value.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_find_config_file_env_var() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("custom_config.toml");
        File::create(&config_path).unwrap();

        env::set_var("POSTURE_CONFIG_PATH", config_path.to_str().unwrap());
        let result = find_config_file();
        env::remove_var("POSTURE_CONFIG_PATH");

        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    fn test_find_config_file_env_var_missing_file() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        env::set_var("POSTURE_CONFIG_PATH", "/definitely/not/here.toml");
        let result = find_config_file();
        env::remove_var("POSTURE_CONFIG_PATH");

        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_minimal_config() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let saved_api_url = env::var("POSTURE_API_URL").ok();
        env::remove_var("POSTURE_API_URL");
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[api]").unwrap();
        writeln!(file, "base_url = \"https://posture.example/api\"").unwrap();
        writeln!(file, "[capture]").unwrap();
        writeln!(file, "frames_per_second = 10.0").unwrap();

        let config = load_config(Some(&config_path), None).unwrap();

        assert_eq!(config.api.base_url, "https://posture.example/api");
        assert_eq!(config.capture.frames_per_second, 10.0);
        assert_eq!(config.realtime.path, "/ws/posture/analyze/");

        if let Some(value) = saved_api_url {
            env::set_var("POSTURE_API_URL", value);
        }
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&config_path, "[api\nbase_url = ").unwrap();

        let result = load_config(Some(&config_path), None);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_environment_overrides() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let mut config = PostureConfig::default();

        env::set_var("POSTURE_WS_HOST", "analysis.example:443");
        env::set_var("POSTURE_WS_SECURE", "yes");
        env::set_var("POSTURE_CAPTURE_FPS", "12");

        apply_environment_overrides(&mut config);

        env::remove_var("POSTURE_WS_HOST");
        env::remove_var("POSTURE_WS_SECURE");
        env::remove_var("POSTURE_CAPTURE_FPS");

        assert_eq!(config.realtime.host, "analysis.example:443");
        assert!(config.realtime.secure);
        assert_eq!(config.capture.frames_per_second, 12.0);
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = PostureConfig::default();
        let mut cli_args = HashMap::new();
        cli_args.insert("api_url".to_string(), "http://10.0.0.1:9000/api".to_string());
        cli_args.insert("capture_fps".to_string(), "not-a-number".to_string());

        apply_cli_overrides(&mut config, &cli_args);

        assert_eq!(config.api.base_url, "http://10.0.0.1:9000/api");
        // Unparseable values leave the previous setting in place
        assert_eq!(config.capture.frames_per_second, 15.0);
    }

    #[test]
    fn test_override_precedence() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[realtime]").unwrap();
        writeln!(file, "host = \"file-host:8000\"").unwrap();
        writeln!(file, "[logging]").unwrap();
        writeln!(file, "level = \"warn\"").unwrap();

        env::set_var("POSTURE_WS_HOST", "env-host:8000");
        env::set_var("POSTURE_LOG_LEVEL", "debug");

        let mut cli_args = HashMap::new();
        cli_args.insert("ws_host".to_string(), "cli-host:8000".to_string());

        let config = load_config(Some(&config_path), Some(&cli_args)).unwrap();

        env::remove_var("POSTURE_WS_HOST");
        env::remove_var("POSTURE_LOG_LEVEL");

        // CLI wins for host, env wins for log level (no CLI override)
        assert_eq!(config.realtime.host, "cli-host:8000");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_or_default_without_file() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(load_config_or_default(Some(&missing), None).is_err());
    }
}
