//! Audit logging and anomaly tracking.
//!
//! Append-only security event log with optional NDJSON file persistence
//! and HMAC-SHA256 chain integrity, plus per-agent rate and
//! consecutive-failure tracking.
//!
//! # HMAC Chain Integrity
//!
//! When configured with a signing key, each event's signature covers the
//! previous event's signature, creating an append-only chain that detects
//! tampering or deletion. Use [`AuditRecorder::verify_chain`] to check it.

use crate::models::{SecurityEvent, SecurityEventKind, Severity};
use crate::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// HMAC-SHA256 type alias.
type HmacSha256 = Hmac<Sha256>;

/// Chain seed for the first event.
pub const CHAIN_GENESIS: &str = "genesis";

/// Audit recorder configuration.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Path to the NDJSON audit log file. `None` keeps events in memory
    /// only.
    pub log_path: Option<PathBuf>,
    /// HMAC key for chain integrity (32 bytes recommended). `None`
    /// disables signing.
    pub hmac_key: Option<Vec<u8>>,
    /// Requests allowed per agent within the rate window.
    pub rate_limit_per_minute: u32,
    /// Consecutive failures tolerated before escalation.
    pub max_consecutive_failures: u32,
    /// Width of the sliding rate window.
    pub rate_window: Duration,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            hmac_key: None,
            rate_limit_per_minute: 120,
            max_consecutive_failures: 5,
            rate_window: Duration::from_secs(60),
        }
    }
}

impl AuditConfig {
    /// Creates a new audit config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the log file path.
    #[must_use]
    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Sets the HMAC key for chain integrity.
    #[must_use]
    pub fn with_hmac_key(mut self, key: Vec<u8>) -> Self {
        self.hmac_key = Some(key);
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

    /// Sets the rate window width. Intended for tests; production uses the
    /// one-minute default.
    #[must_use]
    pub const fn with_rate_window(mut self, window: Duration) -> Self {
        self.rate_window = window;
        self
    }
}

/// Append-only audit event recorder with anomaly tracking.
///
/// Events are write-once: the recorder exposes no update or delete
/// operation. Lock scope is limited to the individual tables; no lock is
/// held across the asynchronous file append.
pub struct AuditRecorder {
    config: AuditConfig,
    events: Mutex<Vec<SecurityEvent>>,
    /// Last HMAC in the chain (for signing new events).
    last_hmac: Mutex<String>,
    request_windows: Mutex<HashMap<String, VecDeque<Instant>>>,
    failure_counts: Mutex<HashMap<String, u32>>,
}

impl AuditRecorder {
    /// Creates a recorder with default config (memory-only, unsigned).
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(AuditConfig::default())
    }

    /// Creates a recorder with custom config.
    #[must_use]
    pub fn with_config(config: AuditConfig) -> Self {
        Self {
            config,
            events: Mutex::new(Vec::new()),
            last_hmac: Mutex::new(CHAIN_GENESIS.to_string()),
            request_windows: Mutex::new(HashMap::new()),
            failure_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Records an event: signs it when a key is configured, appends it to
    /// the in-memory buffer, and best-effort appends a serialized line to
    /// the configured log file.
    ///
    /// Never raises. A log-file failure is traced and swallowed so that a
    /// logging problem cannot change the caller's outcome.
    pub async fn record(&self, event: SecurityEvent) {
        let signed = self.sign_event(event);

        if let Ok(mut events) = self.events.lock() {
            events.push(signed.clone());
        }

        if let Some(path) = self.config.log_path.clone() {
            if let Err(e) = append_line(&path, &signed).await {
                tracing::warn!(error = %e, path = %path.display(), "audit log append failed");
            }
        }
    }

    /// Read-only filter over the in-memory buffer.
    #[must_use]
    pub fn query(
        &self,
        kind: Option<SecurityEventKind>,
        min_severity: Severity,
    ) -> Vec<SecurityEvent> {
        let Ok(events) = self.events.lock() else {
            return Vec::new();
        };
        events
            .iter()
            .filter(|e| kind.is_none_or(|k| e.kind == k))
            .filter(|e| e.severity >= min_severity)
            .cloned()
            .collect()
    }

    /// Returns the most recent events, newest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<SecurityEvent> {
        let Ok(events) = self.events.lock() else {
            return Vec::new();
        };
        events.iter().rev().take(limit).cloned().collect()
    }

    /// Sliding-window rate check for an agent.
    ///
    /// Records the call and returns false once the windowed count exceeds
    /// the configured ceiling. Timestamps outside the window are pruned on
    /// each check. Fails closed on internal errors.
    #[must_use]
    pub fn check_rate(&self, agent: &str) -> bool {
        let Ok(mut windows) = self.request_windows.lock() else {
            return false;
        };
        let now = Instant::now();
        let window = windows.entry(agent.to_string()).or_default();
        while window
            .front()
            .is_some_and(|t| now.duration_since(*t) > self.config.rate_window)
        {
            window.pop_front();
        }
        window.push_back(now);
        window.len() <= self.config.rate_limit_per_minute as usize
    }

    /// Increments an agent's consecutive-failure counter.
    ///
    /// Returns false once the ceiling is exceeded, signalling escalation.
    /// Fails closed on internal errors.
    #[must_use]
    pub fn record_failure(&self, agent: &str) -> bool {
        let Ok(mut counts) = self.failure_counts.lock() else {
            return false;
        };
        let count = counts.entry(agent.to_string()).or_insert(0);
        *count += 1;
        *count <= self.config.max_consecutive_failures
    }

    /// Resets an agent's consecutive-failure counter after a success.
    pub fn reset_failures(&self, agent: &str) {
        if let Ok(mut counts) = self.failure_counts.lock() {
            counts.remove(agent);
        }
    }

    /// Returns whether HMAC signing is enabled.
    #[must_use]
    pub const fn is_signing_enabled(&self) -> bool {
        self.config.hmac_key.is_some()
    }

    /// Verifies the HMAC chain integrity of all buffered events.
    ///
    /// # Errors
    ///
    /// Returns an error if no key is configured, an event is unsigned or
    /// has an invalid signature, or the chain linkage is broken.
    pub fn verify_chain(&self) -> Result<()> {
        let key = self
            .config
            .hmac_key
            .as_ref()
            .ok_or_else(|| Error::OperationFailed {
                operation: "verify_chain".to_string(),
                cause: "no HMAC key configured".to_string(),
            })?;

        let events: Vec<SecurityEvent> = self
            .events
            .lock()
            .map_err(|_| Error::OperationFailed {
                operation: "verify_chain".to_string(),
                cause: "failed to acquire lock".to_string(),
            })?
            .clone();

        let mut expected_previous = CHAIN_GENESIS.to_string();
        for (i, event) in events.iter().enumerate() {
            let Some(ref signature) = event.hmac_signature else {
                return Err(Error::OperationFailed {
                    operation: "verify_chain".to_string(),
                    cause: format!("event {i} missing hmac_signature"),
                });
            };
            let Some(ref previous) = event.previous_hmac else {
                return Err(Error::OperationFailed {
                    operation: "verify_chain".to_string(),
                    cause: format!("event {i} missing previous_hmac"),
                });
            };
            if *previous != expected_previous {
                return Err(Error::OperationFailed {
                    operation: "verify_chain".to_string(),
                    cause: format!(
                        "event {i} chain broken: expected previous '{expected_previous}', got '{previous}'"
                    ),
                });
            }
            let computed = compute_hmac(key, &event.canonical_string(previous));
            if computed.as_deref() != Some(signature.as_str()) {
                return Err(Error::OperationFailed {
                    operation: "verify_chain".to_string(),
                    cause: format!("event {i} has invalid signature"),
                });
            }
            expected_previous.clone_from(signature);
        }
        Ok(())
    }

    /// Signs an event with HMAC if configured, updating chain state.
    fn sign_event(&self, mut event: SecurityEvent) -> SecurityEvent {
        let Some(ref key) = self.config.hmac_key else {
            return event;
        };
        let Ok(mut last) = self.last_hmac.lock() else {
            return event;
        };
        if let Some(sig) = compute_hmac(key, &event.canonical_string(&last)) {
            event.previous_hmac = Some(last.clone());
            event.hmac_signature = Some(sig.clone());
            *last = sig;
        }
        event
    }
}

impl Default for AuditRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes a hex-encoded HMAC-SHA256 over the canonical string.
///
/// Returns `None` if the key is rejected, which cannot happen for
/// HMAC-SHA256 (any key length is accepted).
fn compute_hmac(key: &[u8], canonical: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    mac.update(canonical.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Appends one serialized event as an NDJSON line.
///
/// The path is canonicalized to avoid TOCTOU symlink races and, on Unix,
/// the file is created with mode 0600.
async fn append_line(path: &Path, event: &SecurityEvent) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let canonical_path = canonicalize_path(path)?;

    let mut options = tokio::fs::OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(&canonical_path).await?;

    let mut json = serde_json::to_string(event)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    json.push('\n');
    file.write_all(json.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Canonicalizes a path, handling non-existent files by canonicalizing the
/// parent directory.
fn canonicalize_path(path: &Path) -> std::io::Result<PathBuf> {
    if path.exists() {
        return path.canonicalize();
    }

    let Some(parent) = path.parent() else {
        return Ok(path.to_path_buf());
    };
    if !parent.exists() {
        // Parent doesn't exist - return as-is, let OpenOptions surface the error
        return Ok(path.to_path_buf());
    }

    let file_name = path.file_name().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid file name")
    })?;
    Ok(parent.canonicalize()?.join(file_name))
}
