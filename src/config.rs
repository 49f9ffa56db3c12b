use std::{net::SocketAddr, time::Duration};

use anyhow::{ensure, Context};
use axum::http::HeaderValue;

const DEFAULT_DATABASE_URL: &str = "sqlite://roomhub.db?mode=rwc";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_STORE_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    /// Empty means any origin.
    pub cors_origins: Vec<HeaderValue>,
    pub store_timeout: Duration,
}

impl Config {
    /// Reads the process environment, with `.env` filling the gaps.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_owned());

        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_owned());
        let bind_addr = bind_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("BIND_ADDR {bind_addr:?} is not a socket address"))?;

        let cors_origins = match lookup("CORS_ORIGINS") {
            Some(origins) => origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(|origin| {
                    origin.parse::<HeaderValue>().with_context(|| {
                        format!("CORS_ORIGINS entry {origin:?} is not a valid origin")
                    })
                })
                .collect::<anyhow::Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let store_timeout = match lookup("STORE_TIMEOUT_MS") {
            Some(ms) => ms.parse::<u64>().with_context(|| {
                format!("STORE_TIMEOUT_MS {ms:?} is not a number of milliseconds")
            })?,
            None => DEFAULT_STORE_TIMEOUT_MS,
        };
        ensure!(store_timeout > 0, "STORE_TIMEOUT_MS must be greater than zero");

        Ok(Self {
            database_url,
            bind_addr,
            cors_origins,
            store_timeout: Duration::from_millis(store_timeout),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.bind_addr.port(), 8080);
        assert!(config.cors_origins.is_empty());
        assert_eq!(config.store_timeout, Duration::from_secs(2));
    }

    #[test]
    fn values_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("CORS_ORIGINS", "https://a.example, https://b.example,"),
            ("STORE_TIMEOUT_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(
            config.cors_origins,
            [
                HeaderValue::from_static("https://a.example"),
                HeaderValue::from_static("https://b.example"),
            ]
        );
        assert_eq!(config.store_timeout, Duration::from_millis(250));
    }

    #[test]
    fn bad_values_fail() {
        assert!(Config::from_lookup(lookup(&[("BIND_ADDR", "nowhere")])).is_err());
        assert!(Config::from_lookup(lookup(&[("STORE_TIMEOUT_MS", "soon")])).is_err());
        assert!(Config::from_lookup(lookup(&[("STORE_TIMEOUT_MS", "0")])).is_err());

        let origins = "https://ok.example,https://a\nb";
        let err = Config::from_lookup(lookup(&[("CORS_ORIGINS", origins)])).unwrap_err();
        assert!(err.to_string().contains("CORS_ORIGINS"));
    }
}
