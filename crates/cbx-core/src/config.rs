//! Configuration parsing for the cbx feed.
//!
//! Settings come from a single JSON config file. Everything except the
//! product list has a default pointing at the public sandbox.
//!
//! # Example config
//!
//! ```json
//! {
//!   "Feed": { "module_name": "cbx", "log_path": "/tmp/cbx", "log_format": "json" },
//!   "ws_url": "wss://ws-feed-public.sandbox.exchange.coinbase.com",
//!   "products": ["BTC-USD", "ETH-USD"],
//!   "granularity": 300,
//!   "retry": { "max_attempts": 20 }
//! }
//! ```
//!
//! API credentials are read from the environment (`COINBASE_API_KEY`,
//! `COINBASE_PASSPHRASE`, `COINBASE_SECRET_KEY`) and fall back to the
//! optional `credentials` block. Missing credentials are a valid mode.

use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::logging::LogFormat;
use crate::retry::RetryPolicy;
use crate::types::Granularity;

pub const ENV_API_KEY: &str = "COINBASE_API_KEY";
pub const ENV_PASSPHRASE: &str = "COINBASE_PASSPHRASE";
pub const ENV_SECRET_KEY: &str = "COINBASE_SECRET_KEY";

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Module metadata (name, log path, log format).
    #[serde(rename = "Feed", default)]
    pub feed: Option<ModuleMeta>,

    /// WebSocket feed endpoint.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// REST endpoint used for candle history.
    #[serde(default = "default_rest_url")]
    pub rest_url: String,

    /// Products to follow (e.g. `["BTC-USD"]`). Must be non-empty once
    /// overrides are applied.
    #[serde(default)]
    pub products: Vec<String>,

    /// Candle width for every followed product.
    #[serde(default = "default_granularity")]
    pub granularity: Granularity,

    /// Seed each series from REST history before live updates.
    #[serde(default = "default_true")]
    pub seed_history: bool,

    /// Bound on the CONNECTING phase, in milliseconds.
    #[serde(default = "default_phase_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Bound on the AUTHENTICATING phase, in milliseconds.
    #[serde(default = "default_phase_timeout_ms")]
    pub auth_timeout_ms: u64,

    /// Reconnection policy.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Credentials used when the environment does not provide them.
    #[serde(default)]
    pub credentials: Option<Credential>,
}

impl AppConfig {
    /// Returns the module name, defaulting to `"cbx"`.
    pub fn module_name(&self) -> String {
        self.feed.as_ref().and_then(|m| m.module_name.clone()).unwrap_or_else(|| "cbx".into())
    }

    /// Returns the log path.
    pub fn log_path(&self) -> Option<String> {
        self.feed.as_ref().and_then(|m| m.log_path.clone())
    }

    pub fn log_format(&self) -> LogFormat {
        self.feed.as_ref().and_then(|m| m.log_format).unwrap_or_default()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    /// Credentials from the environment, field by field, falling back to the
    /// config file's `credentials` block.
    pub fn effective_credential(&self) -> Credential {
        Credential::from_env().or(self.credentials.as_ref())
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<(), crate::FeedError> {
        if self.products.is_empty() {
            return Err(crate::FeedError::Config("no products configured".into()));
        }
        if let Some(p) = self.products.iter().find(|p| p.trim().is_empty()) {
            return Err(crate::FeedError::Config(format!("invalid product id {p:?}")));
        }
        url::Url::parse(&self.ws_url)
            .map_err(|e| crate::FeedError::Config(format!("ws_url {}: {e}", self.ws_url)))?;
        url::Url::parse(&self.rest_url)
            .map_err(|e| crate::FeedError::Config(format!("rest_url {}: {e}", self.rest_url)))?;
        Ok(())
    }
}

/// Module metadata block.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleMeta {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
    pub log_format: Option<LogFormat>,
}

/// API credentials. Every field may be absent.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Credential {
    pub api_key: Option<String>,
    pub passphrase: Option<String>,
    /// Base64-encoded HMAC secret.
    pub secret_key: Option<String>,
}

impl Credential {
    /// Read the three credential variables. Unset variables stay `None`.
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var(ENV_API_KEY).ok(),
            passphrase: std::env::var(ENV_PASSPHRASE).ok(),
            secret_key: std::env::var(ENV_SECRET_KEY).ok(),
        }
    }

    /// Fill absent fields from `fallback`.
    pub fn or(self, fallback: Option<&Credential>) -> Self {
        let Some(fb) = fallback else { return self };
        Self {
            api_key: self.api_key.or_else(|| fb.api_key.clone()),
            passphrase: self.passphrase.or_else(|| fb.passphrase.clone()),
            secret_key: self.secret_key.or_else(|| fb.secret_key.clone()),
        }
    }

    /// True when an API key is present (authenticated mode).
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn redact(v: &Option<String>) -> &'static str {
            if v.is_some() { "<redacted>" } else { "<absent>" }
        }
        f.debug_struct("Credential")
            .field("api_key", &self.api_key)
            .field("passphrase", &redact(&self.passphrase))
            .field("secret_key", &redact(&self.secret_key))
            .finish()
    }
}

fn default_ws_url() -> String {
    "wss://ws-feed-public.sandbox.exchange.coinbase.com".into()
}

fn default_rest_url() -> String {
    "https://api-public.sandbox.exchange.coinbase.com".into()
}

fn default_granularity() -> Granularity {
    Granularity::M1
}

fn default_true() -> bool {
    true
}

fn default_phase_timeout_ms() -> u64 {
    10_000
}

/// Load, parse and validate a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let config = read_config(path)?;
    config.validate()?;
    Ok(config)
}

/// Load and parse a JSON config file without validating it, for callers
/// that apply overrides first.
pub fn read_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg: AppConfig = serde_json::from_str(r#"{"products": ["BTC-USD"]}"#).unwrap();
        assert_eq!(cfg.granularity, Granularity::M1);
        assert!(cfg.seed_history);
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.retry, RetryPolicy::default());
        assert_eq!(cfg.module_name(), "cbx");
        assert_eq!(cfg.log_format(), LogFormat::Text);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn full_config_parses() {
        let cfg: AppConfig = serde_json::from_str(
            r#"{
                "Feed": {"module_name": "feed", "log_path": "/tmp/feed", "log_format": "json"},
                "ws_url": "wss://example.test/feed",
                "rest_url": "https://example.test",
                "products": ["ETH-USD"],
                "granularity": 900,
                "seed_history": false,
                "auth_timeout_ms": 2500,
                "retry": {"max_attempts": 3},
                "credentials": {"api_key": "k", "secret_key": "c2VjcmV0a2V5"}
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.module_name(), "feed");
        assert_eq!(cfg.log_path().as_deref(), Some("/tmp/feed"));
        assert_eq!(cfg.log_format(), LogFormat::Json);
        assert_eq!(cfg.granularity, Granularity::M15);
        assert_eq!(cfg.auth_timeout(), Duration::from_millis(2500));
        assert_eq!(cfg.retry.max_attempts, Some(3));
        let creds = cfg.credentials.unwrap();
        assert_eq!(creds.api_key.as_deref(), Some("k"));
        assert_eq!(creds.passphrase, None);
    }

    #[test]
    fn rejects_bad_granularity_and_empty_products() {
        assert!(serde_json::from_str::<AppConfig>(r#"{"products": ["X"], "granularity": 120}"#).is_err());
        let cfg: AppConfig = serde_json::from_str(r#"{"products": []}"#).unwrap();
        assert!(matches!(cfg.validate(), Err(crate::FeedError::Config(_))));
    }

    #[test]
    fn load_config_reads_and_validates_file() {
        let dir = std::env::temp_dir().join(format!("cbx-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let good = dir.join("good.json");
        std::fs::write(&good, r#"{"products": ["BTC-USD"], "granularity": 3600}"#).unwrap();
        assert_eq!(load_config(&good).unwrap().granularity, Granularity::H1);

        let empty = dir.join("empty.json");
        std::fs::write(&empty, "{}").unwrap();
        assert!(read_config(&empty).unwrap().products.is_empty());
        assert!(load_config(&empty).is_err());

        let err = load_config(&dir.join("missing.json")).unwrap_err();
        assert!(format!("{err:#}").contains("reading config"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn credential_fallback_fills_absent_fields_only() {
        let env = Credential { api_key: Some("env-key".into()), ..Default::default() };
        let file = Credential {
            api_key: Some("file-key".into()),
            passphrase: Some("pp".into()),
            secret_key: None,
        };
        let merged = env.or(Some(&file));
        assert_eq!(merged.api_key.as_deref(), Some("env-key"));
        assert_eq!(merged.passphrase.as_deref(), Some("pp"));
        assert_eq!(merged.secret_key, None);
    }

    #[test]
    fn credential_debug_redacts_secrets() {
        let c = Credential {
            api_key: Some("key".into()),
            passphrase: Some("hunter2".into()),
            secret_key: Some("c2VjcmV0".into()),
        };
        let s = format!("{c:?}");
        assert!(!s.contains("hunter2"));
        assert!(!s.contains("c2VjcmV0"));
        assert!(s.contains("key"));
    }
}
