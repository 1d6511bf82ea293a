use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use secrecy::Secret;
use serde::Deserialize;

use crate::error::{AuthError, Result};

const DEFAULT_COOKIE_MAX_AGE_SECS: i64 = 60 * 60 * 24;
const DEFAULT_COOKIE_PATH: &str = "/";
const DEFAULT_PENDING_TTL_SECS: i64 = 10 * 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 10_000;

/// Top-level configuration for the sign-in service
///
/// Built once at startup and shared by reference; nothing re-reads the
/// environment per request.
///
/// # Example
/// ```rust
/// use siwe_session::SiweConfig;
///
/// let config = SiweConfig::default();
/// assert!(config.cookie.secure);
/// assert_eq!(config.cookie.path, "/");
/// config.validate().unwrap();
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct SiweConfig {
    pub cookie: CookieConfig,
    pub session: SessionConfig,
    pub chain: ChainRpcConfig,
}

/// Attributes of the authentication cookie
///
/// The cookie is always `HttpOnly`; everything else is configurable.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Send the cookie over HTTPS only
    ///
    /// Defaults to `true`; only local development should turn it off.
    pub secure: bool,
    /// SameSite policy, `strict` by default
    pub same_site: SameSitePolicy,
    /// Cookie lifetime in seconds, 24 hours by default
    ///
    /// Bound sessions older than this are also purged from the store.
    pub max_age_secs: i64,
    /// Cookie path, `/` by default
    pub path: String,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            secure: true,
            same_site: SameSitePolicy::Strict,
            max_age_secs: DEFAULT_COOKIE_MAX_AGE_SECS,
            path: DEFAULT_COOKIE_PATH.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    #[default]
    Strict,
    Lax,
    None,
}

impl FromStr for SameSitePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" | "true" => Ok(Self::Strict),
            "lax" => Ok(Self::Lax),
            "none" | "false" => Ok(Self::None),
            other => Err(format!("unknown SameSite policy '{other}'")),
        }
    }
}

/// Session lifetime settings
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long an issued nonce may stay unbound, in seconds
    pub pending_ttl_secs: i64,
    /// Period of the background purge of stale sessions, in seconds
    pub sweep_interval_secs: u64,
    /// Track one cookie per (chain, address) instead of a single cookie
    pub multi_identity: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: DEFAULT_PENDING_TTL_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            multi_identity: false,
        }
    }
}

/// Chain access used by contract-wallet verification
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ChainRpcConfig {
    /// JSON-RPC endpoint used when no chain-specific one is configured
    pub default_url: Option<String>,
    /// Chain-specific JSON-RPC endpoints keyed by chain id
    pub urls: BTreeMap<u64, String>,
    /// Optional credential sent as a bearer token to the RPC endpoint
    pub api_key: Option<Secret<String>>,
    /// Upper bound for one on-chain call, in milliseconds
    pub timeout_ms: u64,
}

impl Default for ChainRpcConfig {
    fn default() -> Self {
        Self {
            default_url: None,
            urls: BTreeMap::new(),
            api_key: None,
            timeout_ms: DEFAULT_PROVIDER_TIMEOUT_MS,
        }
    }
}

impl ChainRpcConfig {
    pub fn endpoint_for(&self, chain_id: u64) -> Option<&str> {
        self.urls
            .get(&chain_id)
            .or(self.default_url.as_ref())
            .map(String::as_str)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl SiweConfig {
    /// Load configuration from `SIWE_*` environment variables
    ///
    /// Unset variables fall back to the defaults. `SIWE_ENV=development`
    /// flips the default of the cookie `Secure` flag to `false`.
    pub fn from_env() -> Result<Self> {
        let development = env::var("SIWE_ENV")
            .map(|v| v.eq_ignore_ascii_case("development"))
            .unwrap_or(false);

        let cookie = CookieConfig {
            secure: parse_env_or_default("SIWE_COOKIE_SECURE", !development)?,
            same_site: parse_env_or_default("SIWE_COOKIE_SAME_SITE", SameSitePolicy::Strict)?,
            max_age_secs: parse_env_or_default(
                "SIWE_COOKIE_MAX_AGE_SECS",
                DEFAULT_COOKIE_MAX_AGE_SECS,
            )?,
            path: env::var("SIWE_COOKIE_PATH").unwrap_or_else(|_| DEFAULT_COOKIE_PATH.to_string()),
        };

        let session = SessionConfig {
            pending_ttl_secs: parse_env_or_default(
                "SIWE_PENDING_TTL_SECS",
                DEFAULT_PENDING_TTL_SECS,
            )?,
            sweep_interval_secs: parse_env_or_default(
                "SIWE_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL_SECS,
            )?,
            multi_identity: parse_env_or_default("SIWE_MULTI_IDENTITY", false)?,
        };

        let mut urls = BTreeMap::new();
        for (key, value) in env::vars() {
            if let Some(chain) = key.strip_prefix("SIWE_CHAIN_RPC_URL_") {
                let chain_id = chain.parse::<u64>().map_err(|e| {
                    AuthError::Config(format!("Failed to parse {key}: {e}"))
                })?;
                urls.insert(chain_id, value);
            }
        }

        let chain = ChainRpcConfig {
            default_url: env::var("SIWE_CHAIN_RPC_URL").ok(),
            urls,
            api_key: env::var("SIWE_CHAIN_RPC_KEY").ok().map(Secret::new),
            timeout_ms: parse_env_or_default(
                "SIWE_PROVIDER_TIMEOUT_MS",
                DEFAULT_PROVIDER_TIMEOUT_MS,
            )?,
        };

        let config = Self {
            cookie,
            session,
            chain,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject cookie and session settings a browser or the store cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.cookie.same_site == SameSitePolicy::None && !self.cookie.secure {
            return Err(AuthError::Config(
                "SameSite=None cookies must be Secure".to_string(),
            ));
        }
        if !self.cookie.path.starts_with('/') {
            return Err(AuthError::Config(format!(
                "cookie path must be absolute, got '{}'",
                self.cookie.path
            )));
        }
        ttl_seconds("cookie max age", self.cookie.max_age_secs)?;
        ttl_seconds("pending session TTL", self.session.pending_ttl_secs)?;
        if self.session.sweep_interval_secs == 0 {
            return Err(AuthError::Config(
                "sweep interval must be positive".to_string(),
            ));
        }
        if self.chain.timeout_ms == 0 {
            return Err(AuthError::Config(
                "provider timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Lifetime of a pending session; out-of-range values saturate
    pub fn pending_ttl(&self) -> chrono::Duration {
        chrono::Duration::try_seconds(self.session.pending_ttl_secs)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Lifetime of a bound session, equal to the cookie max age
    pub fn bound_ttl(&self) -> chrono::Duration {
        chrono::Duration::try_seconds(self.cookie.max_age_secs).unwrap_or(chrono::Duration::MAX)
    }
}

fn ttl_seconds(name: &str, secs: i64) -> Result<chrono::Duration> {
    if secs <= 0 {
        return Err(AuthError::Config(format!("{name} must be positive")));
    }
    chrono::Duration::try_seconds(secs)
        .ok_or_else(|| AuthError::Config(format!("{name} of {secs}s is out of range")))
}

fn parse_env_or_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map_err(|e| AuthError::Config(format!("Failed to parse {key}: {e}: {val}"))),
        Err(_) => Ok(default),
    }
}
