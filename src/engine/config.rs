//! # Engine Configuration
//!
//! Switches that shape how the engine dispatches requests. Defaults suit most
//! services; override them in code, from a TOML file, or from the
//! environment.
//!
//! ## TOML
//!
//! ```toml
//! redirect_trailing_slash = true
//! redirect_fixed_path = true
//! trusted_proxies = ["10.0.0.0/8", "127.0.0.1"]
//! pool_capacity = 2048
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Field |
//! |---|---|
//! | `BRRTF_REDIRECT_TRAILING_SLASH` | `redirect_trailing_slash` |
//! | `BRRTF_REDIRECT_FIXED_PATH` | `redirect_fixed_path` |
//! | `BRRTF_HANDLE_METHOD_NOT_ALLOWED` | `handle_method_not_allowed` |
//! | `BRRTF_FORWARDED_BY_CLIENT_IP` | `forwarded_by_client_ip` |
//! | `BRRTF_REMOTE_IP_HEADERS` | `remote_ip_headers` (comma separated) |
//! | `BRRTF_TRUSTED_PROXIES` | `trusted_proxies` (comma separated) |
//! | `BRRTF_USE_RAW_PATH` | `use_raw_path` |
//! | `BRRTF_REMOVE_EXTRA_SLASH` | `remove_extra_slash` |
//! | `BRRTF_MAX_PARAMS_HINT` | `max_params_hint` |
//! | `BRRTF_POOL_CAPACITY` | `pool_capacity` |
//!
//! Booleans accept `1/0`, `true/false`, `yes/no`, `on/off`. Unparseable
//! values are ignored with a warning.

use std::env;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Dispatch behaviour switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Redirect `/foo/` to `/foo` (or the reverse) when only the other form is registered.
    pub redirect_trailing_slash: bool,
    /// On a miss, clean the path and retry case-insensitively; redirect on success.
    pub redirect_fixed_path: bool,
    /// Answer 405 with an `Allow` header when another method matches the path.
    pub handle_method_not_allowed: bool,
    /// Derive the client IP from `remote_ip_headers` when the peer is a trusted proxy.
    pub forwarded_by_client_ip: bool,
    pub remote_ip_headers: Vec<String>,
    pub trusted_proxies: Vec<TrustedProxy>,
    /// Route on the raw (still percent-encoded) path.
    pub use_raw_path: bool,
    /// Clean the request path before lookup.
    pub remove_extra_slash: bool,
    /// Capture buffer size for pooled contexts.
    pub max_params_hint: usize,
    /// Maximum idle contexts kept by the pool.
    pub pool_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            redirect_trailing_slash: true,
            redirect_fixed_path: false,
            handle_method_not_allowed: true,
            forwarded_by_client_ip: true,
            remote_ip_headers: vec!["X-Forwarded-For".to_owned(), "X-Real-IP".to_owned()],
            trusted_proxies: vec![TrustedProxy::any_v4(), TrustedProxy::any_v6()],
            use_raw_path: false,
            remove_extra_slash: false,
            max_params_hint: 8,
            pool_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document. Missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the document is not valid TOML for this struct.
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("invalid engine configuration")
    }

    /// Load a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Defaults overlaid with `BRRTF_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay `BRRTF_*` environment variables onto this configuration.
    pub fn apply_env(&mut self) {
        env_bool("BRRTF_REDIRECT_TRAILING_SLASH", &mut self.redirect_trailing_slash);
        env_bool("BRRTF_REDIRECT_FIXED_PATH", &mut self.redirect_fixed_path);
        env_bool("BRRTF_HANDLE_METHOD_NOT_ALLOWED", &mut self.handle_method_not_allowed);
        env_bool("BRRTF_FORWARDED_BY_CLIENT_IP", &mut self.forwarded_by_client_ip);
        env_bool("BRRTF_USE_RAW_PATH", &mut self.use_raw_path);
        env_bool("BRRTF_REMOVE_EXTRA_SLASH", &mut self.remove_extra_slash);
        env_parse("BRRTF_MAX_PARAMS_HINT", &mut self.max_params_hint);
        env_parse("BRRTF_POOL_CAPACITY", &mut self.pool_capacity);

        if let Ok(value) = env::var("BRRTF_REMOTE_IP_HEADERS") {
            self.remote_ip_headers = split_list(&value).map(str::to_owned).collect();
        }
        if let Ok(value) = env::var("BRRTF_TRUSTED_PROXIES") {
            match split_list(&value)
                .map(TrustedProxy::from_str)
                .collect::<Result<Vec<_>, _>>()
            {
                Ok(proxies) => self.trusted_proxies = proxies,
                Err(e) => warn!(error = %e, "Ignoring BRRTF_TRUSTED_PROXIES"),
            }
        }
    }

    /// Whether `ip` falls inside any trusted proxy range.
    #[must_use]
    pub fn is_trusted_proxy(&self, ip: IpAddr) -> bool {
        self.trusted_proxies.iter().any(|p| p.contains(ip))
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

pub(crate) fn env_bool(name: &str, slot: &mut bool) {
    let Ok(value) = env::var(name) else {
        return;
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => *slot = true,
        "0" | "false" | "no" | "off" => *slot = false,
        other => warn!(variable = name, value = other, "Ignoring unparseable boolean"),
    }
}

pub(crate) fn env_parse<T: FromStr>(name: &str, slot: &mut T) {
    let Ok(value) = env::var(name) else {
        return;
    };
    match value.trim().parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!(variable = name, value = %value, "Ignoring unparseable number"),
    }
}

/// An IP network given as `addr/prefix` or a bare address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrustedProxy {
    addr: IpAddr,
    prefix: u8,
}

impl TrustedProxy {
    #[must_use]
    pub fn any_v4() -> Self {
        Self {
            addr: IpAddr::from([0, 0, 0, 0]),
            prefix: 0,
        }
    }

    #[must_use]
    pub fn any_v6() -> Self {
        Self {
            addr: IpAddr::from([0u16; 8]),
            prefix: 0,
        }
    }

    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip.to_canonical()) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix)).unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

/// Invalid trusted proxy entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyParseError(String);

impl fmt::Display for ProxyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid trusted proxy '{}'", self.0)
    }
}

impl std::error::Error for ProxyParseError {}

impl FromStr for TrustedProxy {
    type Err = ProxyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ProxyParseError(s.to_owned());
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let addr: IpAddr = addr.trim().parse().map_err(|_| err())?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p.trim().parse::<u8>().map_err(|_| err())?,
            None => max,
        };
        if prefix > max {
            return Err(err());
        }
        Ok(Self {
            addr: addr.to_canonical(),
            prefix,
        })
    }
}

impl TryFrom<String> for TrustedProxy {
    type Error = ProxyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TrustedProxy> for String {
    fn from(proxy: TrustedProxy) -> String {
        proxy.to_string()
    }
}

impl fmt::Display for TrustedProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.redirect_trailing_slash);
        assert!(!config.redirect_fixed_path);
        assert!(config.handle_method_not_allowed);
        assert_eq!(config.remote_ip_headers, vec!["X-Forwarded-For", "X-Real-IP"]);
        assert!(config.is_trusted_proxy("203.0.113.9".parse().unwrap()));
        assert!(config.is_trusted_proxy("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_toml_overrides_keep_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            redirect_fixed_path = true
            trusted_proxies = ["10.0.0.0/8", "127.0.0.1"]
            pool_capacity = 16
            "#,
        )
        .unwrap();
        assert!(config.redirect_fixed_path);
        assert!(config.redirect_trailing_slash);
        assert_eq!(config.pool_capacity, 16);
        assert!(config.is_trusted_proxy("10.20.30.40".parse().unwrap()));
        assert!(config.is_trusted_proxy("127.0.0.1".parse().unwrap()));
        assert!(!config.is_trusted_proxy("127.0.0.2".parse().unwrap()));
    }

    #[test]
    fn test_bad_proxy_rejected() {
        assert!(EngineConfig::from_toml_str(r#"trusted_proxies = ["10.0.0.0/33"]"#).is_err());
        assert!("not-an-ip".parse::<TrustedProxy>().is_err());
    }

    #[test]
    fn test_mapped_v4_matches_v4_range() {
        let proxy: TrustedProxy = "192.168.0.0/16".parse().unwrap();
        assert!(proxy.contains("::ffff:192.168.1.1".parse().unwrap()));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "use_raw_path = true\n").unwrap();
        assert!(EngineConfig::load(&path).unwrap().use_raw_path);
        assert!(EngineConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
