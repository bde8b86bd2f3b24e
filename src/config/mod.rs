//! Configuration management.

use crate::audit::AuditConfig;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Configuration surface of the security middleware.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Path to the append-only NDJSON audit log. `None` keeps events in
    /// the in-memory buffer only.
    pub audit_log_path: Option<PathBuf>,
    /// Enables the per-agent rate window and failure-counter checks.
    pub enable_anomaly_detection: bool,
    /// Requests allowed per agent per minute when anomaly detection is on.
    pub rate_limit_per_minute: u32,
    /// Consecutive denials tolerated before an escalation event.
    pub max_consecutive_failures: u32,
    /// Parent of the ambient session, registered at initialization.
    pub parent_session_id: Option<String>,
    /// HMAC key for audit chain integrity. `None` disables signing.
    pub audit_hmac_key: Option<Vec<u8>>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            audit_log_path: None,
            enable_anomaly_detection: true,
            rate_limit_per_minute: 120,
            max_consecutive_failures: 5,
            parent_session_id: None,
            audit_hmac_key: None,
        }
    }
}

impl SecurityConfig {
    /// Creates a new config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the audit log path.
    #[must_use]
    pub fn with_audit_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_log_path = Some(path.into());
        self
    }

    /// Disables anomaly detection (rate and failure ceilings).
    #[must_use]
    pub const fn without_anomaly_detection(mut self) -> Self {
        self.enable_anomaly_detection = false;
        self
    }

    /// Sets the rate ceiling.
    #[must_use]
    pub const fn with_rate_limit(mut self, per_minute: u32) -> Self {
        self.rate_limit_per_minute = per_minute;
        self
    }

    /// Sets the consecutive-failure ceiling.
    #[must_use]
    pub const fn with_max_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    /// Registers the ambient session under a parent at initialization.
    #[must_use]
    pub fn with_parent_session(mut self, parent: impl Into<String>) -> Self {
        self.parent_session_id = Some(parent.into());
        self
    }

    /// Sets the audit HMAC key.
    #[must_use]
    pub fn with_audit_hmac_key(mut self, key: Vec<u8>) -> Self {
        self.audit_hmac_key = Some(key);
        self
    }

    /// Derives the audit recorder configuration.
    #[must_use]
    pub fn audit_config(&self) -> AuditConfig {
        let mut config = AuditConfig::new()
            .with_rate_limit(self.rate_limit_per_minute)
            .with_max_failures(self.max_consecutive_failures);
        if let Some(ref path) = self.audit_log_path {
            config = config.with_log_path(path);
        }
        if let Some(ref key) = self.audit_hmac_key {
            config = config.with_hmac_key(key.clone());
        }
        config
    }

    /// Parses a config from TOML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the TOML cannot be parsed or the
    /// HMAC key is not valid hex.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: SecurityConfigFile = toml::from_str(contents)
            .map_err(|e| Error::InvalidInput(format!("invalid config: {e}")))?;
        file.into_config()
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct SecurityConfigFile {
    /// Audit log path.
    pub audit_log_path: Option<String>,
    /// Anomaly detection toggle.
    pub enable_anomaly_detection: Option<bool>,
    /// Rate ceiling per minute.
    pub rate_limit_per_minute: Option<u32>,
    /// Consecutive-failure ceiling.
    pub max_consecutive_failures: Option<u32>,
    /// Parent session id.
    pub parent_session_id: Option<String>,
    /// Hex-encoded audit HMAC key.
    pub audit_hmac_key: Option<String>,
}

impl SecurityConfigFile {
    /// Converts the parsed file into a [`SecurityConfig`].
    fn into_config(self) -> Result<SecurityConfig> {
        let mut config = SecurityConfig::default();
        if let Some(path) = self.audit_log_path {
            config.audit_log_path = Some(PathBuf::from(path));
        }
        if let Some(enabled) = self.enable_anomaly_detection {
            config.enable_anomaly_detection = enabled;
        }
        if let Some(rate) = self.rate_limit_per_minute {
            config.rate_limit_per_minute = rate;
        }
        if let Some(max) = self.max_consecutive_failures {
            config.max_consecutive_failures = max;
        }
        config.parent_session_id = self.parent_session_id;
        if let Some(key_hex) = self.audit_hmac_key {
            let key = hex::decode(&key_hex)
                .map_err(|_| Error::InvalidInput("audit_hmac_key must be hex".to_string()))?;
            config.audit_hmac_key = Some(key);
        }
        Ok(config)
    }
}
