//! Application configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use payment::{DEFAULT_BASE_URL, WechatPayConfig};
use reconciliation::SweeperConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Merchant credentials; present only when every variable is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayCredentials {
    pub app_id: String,
    pub mch_id: String,
    pub mch_serial_no: String,
    pub private_key_path: PathBuf,
    pub notify_url: String,
    pub refund_notify_url: String,
}

impl PayCredentials {
    /// Gateway client settings, given the PEM read from `private_key_path`.
    pub fn client_config(
        &self,
        private_key_pem: String,
        base_url: &str,
        timeout: Duration,
    ) -> WechatPayConfig {
        WechatPayConfig {
            app_id: self.app_id.clone(),
            mch_id: self.mch_id.clone(),
            mch_serial_no: self.mch_serial_no.clone(),
            private_key_pem,
            notify_url: self.notify_url.clone(),
            refund_notify_url: self.refund_notify_url.clone(),
            base_url: base_url.to_string(),
            timeout,
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `json` for JSON lines, anything else for text
/// - `DATABASE_URL`: Postgres store when set, in-memory otherwise
/// - `PAY_*`: gateway credentials, `PAY_API_V3_KEY` for callback decryption
/// - `SWEEP_*`: sweeper intervals and age thresholds, in seconds
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub pay: Option<PayCredentials>,
    pub pay_api_v3_key: Option<String>,
    pub pay_base_url: String,
    pub pay_timeout: Duration,
    pub sweeper: SweeperConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let pay = match (
            var("PAY_APPID"),
            var("PAY_MCHID"),
            var("PAY_MCH_SERIAL_NO"),
            var("PAY_PRIVATE_KEY_PATH"),
            var("PAY_NOTIFY_URL"),
            var("PAY_REFUND_NOTIFY_URL"),
        ) {
            (
                Some(app_id),
                Some(mch_id),
                Some(mch_serial_no),
                Some(key_path),
                Some(notify_url),
                Some(refund_notify_url),
            ) => Some(PayCredentials {
                app_id,
                mch_id,
                mch_serial_no,
                private_key_path: PathBuf::from(key_path),
                notify_url,
                refund_notify_url,
            }),
            _ => None,
        };

        let base = defaults.sweeper;
        let sweeper = SweeperConfig {
            payment_interval: secs(&var, "SWEEP_PAYMENT_INTERVAL_SECS", base.payment_interval)?,
            payment_timeout: secs(&var, "SWEEP_PAYMENT_TIMEOUT_SECS", base.payment_timeout)?,
            delivery_interval: secs(&var, "SWEEP_DELIVERY_INTERVAL_SECS", base.delivery_interval)?,
            delivery_timeout: secs(&var, "SWEEP_DELIVERY_TIMEOUT_SECS", base.delivery_timeout)?,
        };

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parse(&var, "PORT", defaults.port)?,
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match var("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: var("DATABASE_URL"),
            pay,
            pay_api_v3_key: var("PAY_API_V3_KEY"),
            pay_base_url: var("PAY_BASE_URL").unwrap_or(defaults.pay_base_url),
            pay_timeout: secs(&var, "PAY_TIMEOUT_SECS", defaults.pay_timeout)?,
            sweeper,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            pay: None,
            pay_api_v3_key: None,
            pay_base_url: DEFAULT_BASE_URL.to_string(),
            pay_timeout: Duration::from_secs(30),
            sweeper: SweeperConfig::default(),
        }
    }
}

fn parse<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

fn secs<F>(var: &F, name: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => match value.trim().parse::<u64>() {
            Ok(n) if n > 0 => Ok(Duration::from_secs(n)),
            _ => Err(ConfigError::Invalid { name, value }),
        },
        None => Ok(default),
    }
}
