//! Configuration loader for the `wsn-monitor` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). No other module reads `env::var` directly.
//!
use std::{collections::BTreeMap, env, time::Duration};

use anyhow::{anyhow, Result};
use url::Url;

use crate::reconciler::{GaugePolicy, ReconcilerPolicy, TrendPolicy};

/// Parse an optional numeric environment variable with a default value.
macro_rules! parse_env {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Like `parse_env!`, but zero is rejected. Intervals, timeouts and window
/// sizes of zero either panic the runtime or make the value useless.
macro_rules! parse_env_nonzero {
    ($var_name:expr, $ty:ty, $default:expr) => {{
        let value = parse_env!($var_name, $ty, $default);
        if value == 0 {
            return Err(anyhow!("{} must be greater than zero", $var_name));
        }
        value
    }};
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Backend REST base URL, e.g. `https://wsn.example.org`.
    pub api_url: Url,

    /// WebSocket push endpoint.
    pub push_url: Url,

    pub username: String,
    pub password: String,

    pub request_timeout: Duration,

    /// Page size used for alert/node/threshold listings.
    pub page_size: u32,

    /// Seconds between full refetches of the current alert page.
    pub refetch_interval: Duration,

    pub push_reconnect_delay: Duration,
    pub push_keepalive: Duration,

    /// Reading window, alert buffer, trend and gauge policy.
    pub policy: ReconcilerPolicy,

    /// Port of the local read API.
    pub listen_port: u16,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `API_URL` – backend base URL
/// - `MONITOR_USERNAME` / `MONITOR_PASSWORD` – login credentials
///
/// Optional:
/// - `PUSH_URL` – WebSocket endpoint (default: derived from `API_URL`)
/// - `REQUEST_TIMEOUT_SECS` (default: 10)
/// - `PAGE_SIZE` (default: 20)
/// - `READING_WINDOW` – readings kept per sensor (default: 100)
/// - `ALERT_BUFFER_CAP` – pushed alerts kept unread (default: 100)
/// - `REFETCH_INTERVAL_SECS` (default: 30)
/// - `PUSH_RECONNECT_SECS` (default: 5)
/// - `PUSH_KEEPALIVE_SECS` (default: 30)
/// - `TREND_THRESHOLD` (default: 0.1)
/// - `GAUGE_CAPS` – `kind=max,...` (default: `co2=10000,voc=200,pm25=100`)
/// - `LISTEN_PORT` (default: 8080)
///
/// Returns an error if any required variable is missing or invalid, or if
/// an interval, timeout, page size or reading window is zero.
pub fn load_from_env() -> Result<Config> {
    // ---
    let api_url = require_env!("API_URL");
    let api_url = Url::parse(&api_url).map_err(|e| anyhow!("Invalid API_URL {}: {}", api_url, e))?;
    let username = require_env!("MONITOR_USERNAME");
    let password = require_env!("MONITOR_PASSWORD");

    let push_url = match env::var("PUSH_URL") {
        Ok(raw) => parse_push_url(&raw)?,
        Err(_) => derive_push_url(&api_url)?,
    };

    let gauge = match env::var("GAUGE_CAPS") {
        Ok(raw) => GaugePolicy::with_caps(parse_gauge_caps(&raw)?),
        Err(_) => GaugePolicy::default(),
    };

    let policy = ReconcilerPolicy {
        reading_window: parse_env_nonzero!("READING_WINDOW", usize, 100),
        alert_buffer_cap: parse_env!("ALERT_BUFFER_CAP", usize, 100),
        trend: TrendPolicy {
            threshold: parse_env!("TREND_THRESHOLD", f64, 0.1),
        },
        gauge,
    };

    Ok(Config {
        api_url,
        push_url,
        username,
        password,
        request_timeout: Duration::from_secs(parse_env_nonzero!("REQUEST_TIMEOUT_SECS", u64, 10)),
        page_size: parse_env_nonzero!("PAGE_SIZE", u32, 20),
        refetch_interval: Duration::from_secs(parse_env_nonzero!("REFETCH_INTERVAL_SECS", u64, 30)),
        push_reconnect_delay: Duration::from_secs(parse_env!("PUSH_RECONNECT_SECS", u64, 5)),
        push_keepalive: Duration::from_secs(parse_env_nonzero!("PUSH_KEEPALIVE_SECS", u64, 30)),
        policy,
        listen_port: parse_env!("LISTEN_PORT", u16, 8080),
    })
}

/// `http://host:port/base` becomes `ws://host:port/ws`.
pub fn derive_push_url(api_url: &Url) -> Result<Url> {
    // ---
    let ws_scheme = match api_url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(anyhow!("Unsupported API_URL scheme: {}", other)),
    };
    let mut push_url = api_url.clone();
    push_url
        .set_scheme(ws_scheme)
        .map_err(|_| anyhow!("Cannot derive push URL from {}", api_url))?;
    push_url.set_path("/ws");
    push_url.set_query(None);
    push_url.set_fragment(None);
    Ok(push_url)
}

/// An explicit `PUSH_URL` must be a `ws` or `wss` URL.
pub fn parse_push_url(raw: &str) -> Result<Url> {
    // ---
    let url = Url::parse(raw).map_err(|e| anyhow!("Invalid PUSH_URL {}: {}", raw, e))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(anyhow!("Unsupported PUSH_URL scheme: {}", other)),
    }
}

/// Parse `co2=10000,voc=200` into a cap table.
pub fn parse_gauge_caps(raw: &str) -> Result<BTreeMap<String, f64>> {
    // ---
    let mut caps = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (kind, max) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid GAUGE_CAPS entry: {}", entry))?;
        let max: f64 = max
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid GAUGE_CAPS value for {}: {}", kind, e))?;
        if !(max.is_finite() && max > 0.0) {
            return Err(anyhow!("GAUGE_CAPS value for {} must be positive", kind));
        }
        caps.insert(kind.trim().to_lowercase(), max);
    }
    Ok(caps)
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// The password is never printed.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  API_URL               : {}", self.api_url);
        tracing::info!("  PUSH_URL              : {}", self.push_url);
        tracing::info!("  MONITOR_USERNAME      : {}", self.username);
        tracing::info!("  MONITOR_PASSWORD      : ****");
        tracing::info!("  REQUEST_TIMEOUT_SECS  : {}", self.request_timeout.as_secs());
        tracing::info!("  PAGE_SIZE             : {}", self.page_size);
        tracing::info!("  REFETCH_INTERVAL_SECS : {}", self.refetch_interval.as_secs());
        tracing::info!("  PUSH_RECONNECT_SECS   : {}", self.push_reconnect_delay.as_secs());
        tracing::info!("  PUSH_KEEPALIVE_SECS   : {}", self.push_keepalive.as_secs());
        tracing::info!("  READING_WINDOW        : {}", self.policy.reading_window);
        tracing::info!("  ALERT_BUFFER_CAP      : {}", self.policy.alert_buffer_cap);
        tracing::info!("  TREND_THRESHOLD       : {}", self.policy.trend.threshold);
        tracing::info!("  GAUGE_CAPS            : {:?}", self.policy.gauge.caps());
        tracing::info!("  LISTEN_PORT           : {}", self.listen_port);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn push_for(api_url: &str) -> Result<String> {
        Ok(derive_push_url(&Url::parse(api_url)?)?.to_string())
    }

    #[test]
    fn test_derive_push_url() {
        // ---
        assert_eq!(
            push_for("https://wsn.example.org/api?debug=1").unwrap(),
            "wss://wsn.example.org/ws"
        );
        assert_eq!(
            push_for("http://localhost:8081").unwrap(),
            "ws://localhost:8081/ws"
        );
        assert!(push_for("localhost:8081").is_err());
        assert!(push_for("ftp://host").is_err());
    }

    #[test]
    fn test_parse_push_url() {
        // ---
        assert!(parse_push_url("wss://push.example.org/ws").is_ok());
        assert!(parse_push_url("https://push.example.org/ws").is_err());
        assert!(parse_push_url("not a url").is_err());
    }

    /// The only test in this crate that touches the process environment.
    #[test]
    fn test_load_from_env_rejects_zero_values() {
        // ---
        env::set_var("API_URL", "http://localhost:8081/");
        env::set_var("MONITOR_USERNAME", "operator");
        env::set_var("MONITOR_PASSWORD", "secret");
        env::remove_var("PUSH_URL");

        for var in [
            "REFETCH_INTERVAL_SECS",
            "PUSH_KEEPALIVE_SECS",
            "READING_WINDOW",
            "REQUEST_TIMEOUT_SECS",
            "PAGE_SIZE",
        ] {
            env::set_var(var, "0");
            let err = load_from_env().unwrap_err();
            assert!(err.to_string().contains(var), "{var}: {err}");
            env::remove_var(var);
        }

        let cfg = load_from_env().unwrap();
        assert_eq!(cfg.refetch_interval, Duration::from_secs(30));
        assert_eq!(cfg.push_keepalive, Duration::from_secs(30));
        assert_eq!(cfg.policy.reading_window, 100);
        assert_eq!(cfg.push_url.as_str(), "ws://localhost:8081/ws");
    }

    #[test]
    fn test_parse_gauge_caps() {
        // ---
        let caps = parse_gauge_caps("CO2=10000, voc = 200,,pm25=100").unwrap();
        assert_eq!(caps.len(), 3);
        assert_eq!(caps["co2"], 10000.0);
        assert_eq!(caps["voc"], 200.0);

        assert!(parse_gauge_caps("co2").is_err());
        assert!(parse_gauge_caps("co2=abc").is_err());
        assert!(parse_gauge_caps("co2=0").is_err());
    }
}
