//! Handshake configuration
//!
//! Loaded from TOML, overlaid with `DUET_*` environment variables and
//! validated before any component is constructed. Every section has defaults,
//! so a config file only needs the values it changes.

use crate::errors::{HandshakeError, Result};
use crate::retry::{duration_ms, RetryPolicy};
use crate::types::Address;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Resolve the default invitation store path.
///
/// Priority:
/// 1. `$DUET_PATH/.duet/invitations.json` if DUET_PATH is set
/// 2. `~/.duet/invitations.json`
/// 3. `./.duet/invitations.json`
pub fn default_store_path() -> PathBuf {
    std::env::var("DUET_PATH")
        .ok()
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".duet")
        .join("invitations.json")
}

/// Top-level handshake configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Ledger and contract settings
    pub ledger: LedgerConfig,
    /// Read cache TTLs
    pub cache: CacheConfig,
    /// Bounded waits for human and network operations
    pub timeouts: TimeoutConfig,
    /// Post-timeout re-query policy
    pub retry: RetryPolicy,
    /// Lifecycle polling intervals
    pub poll: PollConfig,
    /// Invitation link format
    pub link: LinkConfig,
    /// Persisted invitation store
    pub store: StoreConfig,
}

/// Ledger and contract settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Session contract; required
    pub contract: Option<Address>,
    /// Session-start function every invitation must authorize
    pub start_function: String,
    /// Network passphrase mixed into signatures
    pub network_passphrase: String,
    /// Average ledger close time in seconds
    pub ledger_close_seconds: u64,
    /// Ledgers an initiator's signature stays valid after simulation
    pub auth_validity_ledgers: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            contract: None,
            start_function: "start_game".to_string(),
            network_passphrase: "Test SDF Network ; September 2015".to_string(),
            ledger_close_seconds: 5,
            // ~1 hour at 5s per ledger
            auth_validity_ledgers: 720,
        }
    }
}

/// Read cache TTLs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL of session record reads
    #[serde(with = "duration_ms")]
    pub session_ttl: Duration,
    /// TTL of latest-sequence reads
    #[serde(with = "duration_ms")]
    pub sequence_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(2),
            sequence_ttl: Duration::from_secs(5),
        }
    }
}

/// Bounded waits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Wait for a signature from the operator
    #[serde(with = "duration_ms")]
    pub sign: Duration,
    /// Wait for the submitter
    #[serde(with = "duration_ms")]
    pub submit: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            sign: Duration::from_secs(30),
            submit: Duration::from_secs(30),
        }
    }
}

/// Lifecycle polling intervals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Expiration countdown refresh
    #[serde(with = "duration_ms")]
    pub expiration_interval: Duration,
    /// Session record observation while waiting on the counterparty
    #[serde(with = "duration_ms")]
    pub session_interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            expiration_interval: Duration::from_secs(30),
            session_interval: Duration::from_secs(5),
        }
    }
}

/// Invitation link format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Page the link points at
    pub base_url: String,
    /// Query parameter carrying the session id
    pub session_param: String,
    /// Query parameter carrying the token
    pub auth_param: String,
    /// Older token parameter still accepted on parse
    pub legacy_auth_param: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            base_url: "https://duet.example/join".to_string(),
            session_param: "session".to_string(),
            auth_param: "auth".to_string(),
            legacy_auth_param: "xdr".to_string(),
        }
    }
}

/// Persisted invitation store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file holding persisted invitations
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl HandshakeConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| HandshakeError::config(format!("invalid TOML: {e}")))
    }

    /// Load from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HandshakeError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load a file, apply the process environment and validate
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::load_from_file(path)?;
        config.merge_with_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `DUET_*` variables from the process environment
    pub fn merge_with_env(&mut self) -> Result<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Overlay `DUET_*` variables from `vars`; unknown names are ignored
    pub fn merge_with_vars<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix("DUET_") else {
                continue;
            };
            let value = value.as_ref();
            match name {
                "CONTRACT" => self.ledger.contract = Some(Address::parse(value).map_err(|e| {
                    HandshakeError::config(format!("DUET_CONTRACT: {e}"))
                })?),
                "START_FUNCTION" => self.ledger.start_function = value.to_string(),
                "NETWORK_PASSPHRASE" => self.ledger.network_passphrase = value.to_string(),
                "LEDGER_CLOSE_SECONDS" => {
                    self.ledger.ledger_close_seconds = parse_number(name, value)?
                }
                "AUTH_VALIDITY_LEDGERS" => {
                    self.ledger.auth_validity_ledgers = parse_number(name, value)?
                }
                "SIGN_TIMEOUT_MS" => {
                    self.timeouts.sign = Duration::from_millis(parse_number(name, value)?)
                }
                "SUBMIT_TIMEOUT_MS" => {
                    self.timeouts.submit = Duration::from_millis(parse_number(name, value)?)
                }
                "LINK_BASE_URL" => self.link.base_url = value.to_string(),
                "STORE_PATH" => self.store.path = PathBuf::from(value),
                _ => {}
            }
        }
        Ok(())
    }

    /// Check invariants the components rely on
    pub fn validate(&self) -> Result<()> {
        self.contract()?;
        if self.ledger.start_function.is_empty() {
            return Err(HandshakeError::config("ledger.start_function is empty"));
        }
        if self.ledger.network_passphrase.is_empty() {
            return Err(HandshakeError::config("ledger.network_passphrase is empty"));
        }
        if self.ledger.ledger_close_seconds == 0 {
            return Err(HandshakeError::config("ledger.ledger_close_seconds must be > 0"));
        }
        if self.ledger.auth_validity_ledgers == 0 {
            return Err(HandshakeError::config("ledger.auth_validity_ledgers must be > 0"));
        }
        if self.timeouts.sign.is_zero() || self.timeouts.submit.is_zero() {
            return Err(HandshakeError::config("timeouts must be non-zero"));
        }
        if self.poll.session_interval.is_zero() || self.poll.expiration_interval.is_zero() {
            return Err(HandshakeError::config("poll intervals must be non-zero"));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(HandshakeError::config(
                "retry.initial_delay exceeds retry.max_delay",
            ));
        }
        let base_url = &self.link.base_url;
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(HandshakeError::config("link.base_url must be an http(s) URL"));
        }
        let params = [
            &self.link.session_param,
            &self.link.auth_param,
            &self.link.legacy_auth_param,
        ];
        let same_names = self.link.auth_param == self.link.legacy_auth_param;
        if params.iter().any(|p| p.is_empty()) || same_names {
            return Err(HandshakeError::config(
                "link parameters must be non-empty and auth/legacy names distinct",
            ));
        }
        Ok(())
    }

    /// The configured session contract
    pub fn contract(&self) -> Result<&Address> {
        self.ledger
            .contract
            .as_ref()
            .ok_or_else(|| HandshakeError::config("ledger.contract is not set"))
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| HandshakeError::config(format!("DUET_{name}: {e}")))
}
