//=====================================================
// File: config/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Loopscope configuration
// Objective: Load limits, clock and sandbox settings from defaults, an
//            optional TOML file and environment overrides
//=====================================================

//=============================================
//            Section 1: Data Model
//=============================================

use crate::harness::HarnessOptions;
use crate::runtime::{ClockMode, SandboxIo};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File name looked up under the user's config directory.
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading configuration from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value '{value}' for {var}")]
    Env { var: &'static str, value: String },
}

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoopscopeConfig {
    pub limits: LimitsConfig,
    pub clock: ClockConfig,
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    pub max_events: usize,
    pub timeout_ms: u64,
    /// Largest accepted submission, in bytes.
    pub max_code_size: usize,
    pub max_call_depth: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_events: 10_000,
            timeout_ms: 5_000,
            max_code_size: 50_000,
            max_call_depth: 512,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClockConfig {
    pub mode: ClockMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
    /// Directory `fs.readFile` may read beneath; every read is denied when unset.
    pub fs_root: Option<PathBuf>,
    pub fetch_allow_hosts: Vec<String>,
    pub fetch_timeout_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            fs_root: None,
            fetch_allow_hosts: Vec::new(),
            fetch_timeout_ms: 2_000,
        }
    }
}

//=============================================
//            Section 2: Loading
//=============================================

impl LoopscopeConfig {
    /// `<config dir>/loopscope/config.toml`, when the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("loopscope").join(CONFIG_FILE))
    }

    /// Defaults, then the file, then `LOOPSCOPE_*` environment overrides.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Applies environment overrides through `lookup` so tests need not touch the process env.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("LOOPSCOPE_MAX_EVENTS") {
            self.limits.max_events = parse_env("LOOPSCOPE_MAX_EVENTS", value)?;
        }
        if let Some(value) = lookup("LOOPSCOPE_TIMEOUT_MS") {
            self.limits.timeout_ms = parse_env("LOOPSCOPE_TIMEOUT_MS", value)?;
        }
        if let Some(value) = lookup("LOOPSCOPE_MAX_CODE_SIZE") {
            self.limits.max_code_size = parse_env("LOOPSCOPE_MAX_CODE_SIZE", value)?;
        }
        if let Some(value) = lookup("LOOPSCOPE_CLOCK") {
            self.clock.mode = value.parse().map_err(|_| ConfigError::Env {
                var: "LOOPSCOPE_CLOCK",
                value,
            })?;
        }
        if let Some(value) = lookup("LOOPSCOPE_FS_ROOT") {
            self.sandbox.fs_root = (!value.trim().is_empty()).then(|| PathBuf::from(value));
        }
        Ok(())
    }

    //=============================================
    //            Section 3: Derived Settings
    //=============================================

    pub fn harness_options(&self) -> HarnessOptions {
        HarnessOptions {
            max_events: self.limits.max_events,
            timeout: Duration::from_millis(self.limits.timeout_ms),
            max_call_depth: self.limits.max_call_depth,
            clock: self.clock.mode,
        }
    }

    pub fn io_driver(&self) -> SandboxIo {
        SandboxIo::new(
            self.sandbox.fs_root.clone(),
            self.sandbox.fetch_allow_hosts.clone(),
            Duration::from_millis(self.sandbox.fetch_timeout_ms),
        )
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_limits() {
        let config = LoopscopeConfig::default();
        assert_eq!(config.limits.max_events, 10_000);
        assert_eq!(config.limits.timeout_ms, 5_000);
        assert_eq!(config.limits.max_code_size, 50_000);
        assert_eq!(config.clock.mode, ClockMode::Virtual);
        assert!(config.sandbox.fs_root.is_none());
    }

    #[test]
    fn partial_files_keep_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[limits]\nmax_events = 42\n\n[clock]\nmode = \"wall\"\n").unwrap();
        let config = LoopscopeConfig::from_file(&path).unwrap();
        assert_eq!(config.limits.max_events, 42);
        assert_eq!(config.limits.timeout_ms, 5_000);
        assert_eq!(config.clock.mode, ClockMode::Wall);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[limits]\nmax_eventz = 1\n").unwrap();
        assert!(matches!(
            LoopscopeConfig::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = LoopscopeConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn environment_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("LOOPSCOPE_MAX_EVENTS", "7"),
            ("LOOPSCOPE_CLOCK", "wall"),
            ("LOOPSCOPE_FS_ROOT", "/srv/scripts"),
        ]
        .into_iter()
        .collect();
        let mut config = LoopscopeConfig::default();
        config
            .apply_overrides(|var| env.get(var).map(|value| value.to_string()))
            .unwrap();
        assert_eq!(config.limits.max_events, 7);
        assert_eq!(config.clock.mode, ClockMode::Wall);
        assert_eq!(config.sandbox.fs_root, Some(PathBuf::from("/srv/scripts")));
        assert_eq!(config.harness_options().max_events, 7);
    }

    #[test]
    fn malformed_override_names_the_variable() {
        let mut config = LoopscopeConfig::default();
        let err = config
            .apply_overrides(|var| (var == "LOOPSCOPE_TIMEOUT_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid value 'soon' for LOOPSCOPE_TIMEOUT_MS");
    }
}
