//! Backend configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CLINIC_BACKEND_URL` - Base URL of the hosted backend (e.g., `https://xyz.backend.example`)
//! - `CLINIC_BACKEND_ANON_KEY` - Public (anonymous) API key sent with every request
//!
//! ## Optional
//! - `CLINIC_PROFILES_TABLE` - Profile table (default: `profiles`)
//! - `CLINIC_ROLES_TABLE` - Role assignment table (default: `user_roles`)
//! - `CLINIC_ROLE_CHECK_FN` - Server-side authority check procedure (default: `has_role`)
//! - `CLINIC_AUDIT_FN` - Audit log procedure (default: `log_audit_event`)

use std::collections::HashMap;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Prefixes that give away a value copied from a template (case-insensitive).
const PLACEHOLDER_PREFIXES: &[&str] = &[
    "your-",
    "your_",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Names of the tables and procedures the subsystem talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    /// Table holding one profile per user, keyed by `id`.
    pub profiles_table: String,
    /// Table holding zero or one role assignment per user, keyed by `user_id`.
    pub roles_table: String,
    /// Procedure that re-derives a role from server-side access control.
    pub role_check_fn: String,
    /// Procedure that appends an audit log entry.
    pub audit_fn: String,
}

impl Default for ResourceNames {
    fn default() -> Self {
        Self {
            profiles_table: "profiles".to_string(),
            roles_table: "user_roles".to_string(),
            role_check_fn: "has_role".to_string(),
            audit_fn: "log_audit_event".to_string(),
        }
    }
}

/// Hosted backend configuration.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct BackendConfig {
    /// Base URL, always ending in `/` so relative paths join beneath it.
    pub url: Url,
    /// Anonymous API key.
    pub anon_key: SecretString,
    /// Table and procedure names.
    pub names: ResourceNames,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("url", &self.url.as_str())
            .field("anon_key", &"[REDACTED]")
            .field("names", &self.names)
            .finish()
    }
}

impl BackendConfig {
    /// Build a configuration with default resource names.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if `url` is not an absolute
    /// http(s) URL.
    pub fn new(url: &str, anon_key: SecretString) -> Result<Self, ConfigError> {
        Ok(Self {
            url: parse_base_url("CLINIC_BACKEND_URL", url)?,
            anon_key,
            names: ResourceNames::default(),
        })
    }

    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };
        let or_default = |key: &str, default: String| lookup(key).unwrap_or(default);

        let url = parse_base_url("CLINIC_BACKEND_URL", &required("CLINIC_BACKEND_URL")?)?;

        let anon_key = required("CLINIC_BACKEND_ANON_KEY")?;
        validate_secret_strength(&anon_key, "CLINIC_BACKEND_ANON_KEY")?;

        let defaults = ResourceNames::default();
        Ok(Self {
            url,
            anon_key: SecretString::from(anon_key),
            names: ResourceNames {
                profiles_table: or_default("CLINIC_PROFILES_TABLE", defaults.profiles_table),
                roles_table: or_default("CLINIC_ROLES_TABLE", defaults.roles_table),
                role_check_fn: or_default("CLINIC_ROLE_CHECK_FN", defaults.role_check_fn),
                audit_fn: or_default("CLINIC_AUDIT_FN", defaults.audit_fn),
            },
        })
    }

    /// Anonymous API key as a plain string, for request headers.
    pub(crate) fn anon_key_str(&self) -> &str {
        self.anon_key.expose_secret()
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Parse an absolute http(s) URL and make sure it ends with a slash.
fn parse_base_url(var_name: &str, raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| ConfigError::InvalidEnvVar(var_name.to_string(), e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnvVar(
            var_name.to_string(),
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // key length never approaches f64 precision
    let len = s.chars().count() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)]
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Reject template placeholders and low-entropy keys.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.trim().to_lowercase();

    if let Some(prefix) = PLACEHOLDER_PREFIXES.iter().find(|p| lower.starts_with(*p)) {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!("appears to be a placeholder (starts with '{prefix}')"),
        ));
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Copy the key from the backend dashboard."
            ),
        ));
    }

    Ok(())
}
