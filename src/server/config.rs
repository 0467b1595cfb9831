//! # Server Configuration
//!
//! Socket and coroutine settings for [`HttpServer`](super::HttpServer).
//!
//! ## Environment Variables
//!
//! | Variable | Field | Default |
//! |---|---|---|
//! | `BRRTF_ADDR` | `addr` | `127.0.0.1:8080` |
//! | `BRRTF_STACK_SIZE` | `stack_size` (decimal or `0x` hex) | `0x10000` |
//! | `BRRTF_READ_TIMEOUT_MS` | `read_timeout_ms` (0 disables) | `30000` |
//! | `BRRTF_REQUEST_TIMEOUT_MS` | `request_timeout_ms` (0 disables) | `0` |
//! | `BRRTF_MAX_HEADER_BYTES` | `max_header_bytes` | `16384` |
//! | `BRRTF_MAX_BODY_BYTES` | `max_body_bytes` | `10485760` |
//! | `BRRTF_KEEP_ALIVE` | `keep_alive` | `true` |
//!
//! Each connection runs on its own coroutine with `stack_size` bytes of
//! stack, so memory use is roughly `stack_size × open connections`. Handlers
//! with deep call chains or large locals need more than the default.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::config::{env_bool, env_parse};

const DEFAULT_STACK_SIZE: usize = 0x10000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    /// Coroutine stack size in bytes.
    pub stack_size: usize,
    /// Idle limit while waiting for request bytes.
    pub read_timeout_ms: u64,
    /// Deadline attached to each request's cancellation signal.
    pub request_timeout_ms: u64,
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
    pub keep_alive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_owned(),
            stack_size: DEFAULT_STACK_SIZE,
            read_timeout_ms: 30_000,
            request_timeout_ms: 0,
            max_header_bytes: 16 * 1024,
            max_body_bytes: 10 * 1024 * 1024,
            keep_alive: true,
        }
    }
}

impl ServerConfig {
    /// Defaults overlaid with `BRRTF_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    pub fn apply_env(&mut self) {
        if let Ok(addr) = env::var("BRRTF_ADDR") {
            self.addr = addr;
        }
        if let Ok(value) = env::var("BRRTF_STACK_SIZE") {
            match parse_size(&value) {
                Some(size) => self.stack_size = size,
                None => warn!(value = %value, "Ignoring unparseable BRRTF_STACK_SIZE"),
            }
        }
        env_parse("BRRTF_READ_TIMEOUT_MS", &mut self.read_timeout_ms);
        env_parse("BRRTF_REQUEST_TIMEOUT_MS", &mut self.request_timeout_ms);
        env_parse("BRRTF_MAX_HEADER_BYTES", &mut self.max_header_bytes);
        env_parse("BRRTF_MAX_BODY_BYTES", &mut self.max_body_bytes);
        env_bool("BRRTF_KEEP_ALIVE", &mut self.keep_alive);
    }

    #[must_use]
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}

/// Decimal or `0x`-prefixed hexadecimal byte count.
fn parse_size(value: &str) -> Option<usize> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_accepts_hex_and_decimal() {
        assert_eq!(parse_size("0x8000"), Some(0x8000));
        assert_eq!(parse_size("0X10"), Some(16));
        assert_eq!(parse_size(" 32768 "), Some(32768));
        assert_eq!(parse_size("lots"), None);
        assert_eq!(parse_size("0xZZ"), None);
    }

    #[test]
    fn test_timeouts_zero_disables() {
        let config = ServerConfig {
            read_timeout_ms: 0,
            request_timeout_ms: 250,
            ..ServerConfig::default()
        };
        assert_eq!(config.read_timeout(), None);
        assert_eq!(config.request_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ServerConfig = toml::from_str("addr = \"0.0.0.0:9000\"").unwrap();
        assert_eq!(config.addr, "0.0.0.0:9000");
        assert_eq!(config.stack_size, DEFAULT_STACK_SIZE);
        assert!(config.keep_alive);
    }
}
