//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use parley_shared::constants::{
    APP_NAME, DEFAULT_HTTP_PORT, DEFAULT_IDENTITY_HEADER, MAX_CONNECTIONS_PER_USER,
    MAX_MESSAGE_CHARS, OUTBOUND_BUFFER,
};

use crate::router::RouterConfig;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite file holding the message store.
    /// Env: `DATABASE_PATH`
    /// Default: `None` (platform data directory).
    pub database_path: Option<PathBuf>,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Parley"`
    pub instance_name: String,

    /// Request header carrying the authenticated caller id, set by the
    /// reverse proxy / auth layer in front of this service.
    /// Env: `IDENTITY_HEADER`
    /// Default: `x-user-id`
    pub identity_header: String,

    /// Sustained HTTP requests per second per client IP.
    /// Env: `RATE_LIMIT_PER_SEC`
    pub http_rate_per_sec: f64,

    /// HTTP burst allowance per client IP.
    /// Env: `RATE_LIMIT_BURST`
    pub http_burst: f64,

    /// Sustained realtime events per second per connection.
    /// Env: `EVENT_RATE_PER_SEC`
    pub event_rate_per_sec: f64,

    /// Realtime event burst allowance per connection.
    /// Env: `EVENT_BURST`
    pub event_burst: f64,

    /// Joined connections allowed per identity.
    /// Env: `MAX_CONNECTIONS_PER_USER`
    pub max_connections_per_user: usize,

    /// Queue depth of each connection's outbound event buffer.
    /// Env: `OUTBOUND_BUFFER`
    pub outbound_buffer: usize,

    /// Longest accepted message body, in characters.
    /// Env: `MAX_MESSAGE_CHARS`
    pub max_message_chars: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            instance_name: APP_NAME.to_string(),
            identity_header: DEFAULT_IDENTITY_HEADER.to_string(),
            http_rate_per_sec: 10.0,
            http_burst: 30.0,
            event_rate_per_sec: 20.0,
            event_burst: 40.0,
            max_connections_per_user: MAX_CONNECTIONS_PER_USER,
            outbound_buffer: OUTBOUND_BUFFER,
            max_message_chars: MAX_MESSAGE_CHARS,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        parse_into(&lookup, "HTTP_ADDR", &mut config.http_addr, |_| true);

        if let Some(path) = lookup("DATABASE_PATH").filter(|p| !p.is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(name) = lookup("INSTANCE_NAME").filter(|n| !n.is_empty()) {
            config.instance_name = name;
        }

        if let Some(header) = lookup("IDENTITY_HEADER") {
            let header = header.trim().to_ascii_lowercase();
            if axum::http::HeaderName::from_str(&header).is_ok() {
                config.identity_header = header;
            } else {
                tracing::warn!(value = %header, "Invalid IDENTITY_HEADER, using default");
            }
        }

        parse_into(&lookup, "RATE_LIMIT_PER_SEC", &mut config.http_rate_per_sec, valid_rate);
        parse_into(&lookup, "RATE_LIMIT_BURST", &mut config.http_burst, valid_burst);
        parse_into(&lookup, "EVENT_RATE_PER_SEC", &mut config.event_rate_per_sec, valid_rate);
        parse_into(&lookup, "EVENT_BURST", &mut config.event_burst, valid_burst);
        parse_into(
            &lookup,
            "MAX_CONNECTIONS_PER_USER",
            &mut config.max_connections_per_user,
            positive,
        );
        parse_into(&lookup, "OUTBOUND_BUFFER", &mut config.outbound_buffer, positive);
        parse_into(&lookup, "MAX_MESSAGE_CHARS", &mut config.max_message_chars, positive);

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// Limits the router enforces. The body limit is the same one the store
    /// is built with, so realtime and REST accept the same messages.
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            max_connections_per_user: self.max_connections_per_user,
            event_rate_per_sec: self.event_rate_per_sec,
            event_burst: self.event_burst,
            max_message_chars: self.max_message_chars,
        }
    }
}

/// Overwrite `slot` with the parsed value of `key`, if present, parseable
/// and accepted by `accept`.
fn parse_into<T, F>(lookup: &F, key: &str, slot: &mut T, accept: fn(&T) -> bool)
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if accept(&value) => *slot = value,
        _ => tracing::warn!(key, value = %raw, "Invalid value, using default"),
    }
}

fn valid_rate(v: &f64) -> bool {
    v.is_finite() && *v >= 0.0
}

fn valid_burst(v: &f64) -> bool {
    v.is_finite() && *v >= 1.0
}

fn positive(v: &usize) -> bool {
    *v > 0
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> ServerConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.identity_header, "x-user-id");
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = from_pairs(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("DATABASE_PATH", "/tmp/parley.db"),
            ("IDENTITY_HEADER", "X-Account-Id"),
            ("MAX_CONNECTIONS_PER_USER", "2"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/parley.db")));
        assert_eq!(config.identity_header, "x-account-id");
        assert_eq!(config.router_config().max_connections_per_user, 2);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("OUTBOUND_BUFFER", "lots"),
            ("IDENTITY_HEADER", "bad header"),
        ]);
        assert_eq!(config.http_addr, ServerConfig::default().http_addr);
        assert_eq!(config.outbound_buffer, OUTBOUND_BUFFER);
        assert_eq!(config.identity_header, DEFAULT_IDENTITY_HEADER);
    }

    #[test]
    fn test_out_of_range_limits_fall_back() {
        let config = from_pairs(&[
            ("RATE_LIMIT_PER_SEC", "NaN"),
            ("RATE_LIMIT_BURST", "inf"),
            ("EVENT_RATE_PER_SEC", "-3"),
            ("EVENT_BURST", "0.5"),
            ("MAX_CONNECTIONS_PER_USER", "0"),
            ("OUTBOUND_BUFFER", "0"),
            ("MAX_MESSAGE_CHARS", "0"),
        ]);
        let defaults = ServerConfig::default();
        assert_eq!(config.http_rate_per_sec, defaults.http_rate_per_sec);
        assert_eq!(config.http_burst, defaults.http_burst);
        assert_eq!(config.event_rate_per_sec, defaults.event_rate_per_sec);
        assert_eq!(config.event_burst, defaults.event_burst);
        assert_eq!(config.max_connections_per_user, MAX_CONNECTIONS_PER_USER);
        assert_eq!(config.outbound_buffer, OUTBOUND_BUFFER);
        assert_eq!(config.max_message_chars, MAX_MESSAGE_CHARS);
        assert_eq!(config.router_config().max_message_chars, MAX_MESSAGE_CHARS);
    }

    #[test]
    fn test_router_and_store_share_body_limit() {
        let config = from_pairs(&[("MAX_MESSAGE_CHARS", "12")]);
        assert_eq!(config.max_message_chars, 12);
        assert_eq!(config.router_config().max_message_chars, 12);
    }
}
