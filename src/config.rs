//! Configuration file management for check-cert-net.
//!
//! Settings come from three places, later ones winning:
//!
//! 1. Default values
//! 2. A TOML file given with `--config`
//! 3. Command-line arguments
//!
//! # Example Configuration File
//!
//! ```toml
//! host = "10.0.0.12"
//! port = 8443
//! servername = "www.example.com"
//! verify_servername = true
//! timeout = "10s"
//! critical = 7
//! warning = 21
//! output = "text"
//!
//! [prometheus]
//! enabled = true
//! address = "http://localhost:9091"
//! ```

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;

use crate::{ProbeConfig, SinkLayout};

/// How the verdict is printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum OutputFormat {
    /// `check-cert-net OK: ...`, the usual plugin line
    #[default]
    Text,
    /// The verdict as a JSON object
    Json,
}

/// Main configuration structure.
///
/// All fields are optional to support partial configuration and merging.
/// Missing values are filled in by defaults or overridden by CLI arguments.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Host to connect to
    pub host: Option<String>,
    /// TCP port
    pub port: Option<u16>,
    /// Server name sent as SNI
    pub servername: Option<String>,
    /// Check that the server name is one of the certificate subjects
    pub verify_servername: Option<bool>,
    /// Deadline for the whole check, e.g. "5s", "1500ms", "1m30s"
    pub timeout: Option<String>,
    /// Prefer RSA authenticated cipher suites
    pub rsa: Option<bool>,
    /// Prefer ECDSA authenticated cipher suites
    pub ecdsa: Option<bool>,
    /// Critical threshold in days before expiry
    pub critical: Option<i64>,
    /// Warning threshold in days before expiry
    pub warning: Option<i64>,
    /// Path of the openssl binary
    pub openssl: Option<String>,
    /// Capture standard output and standard error in one buffer
    pub merged_output: Option<bool>,
    /// Output format: text, json
    pub output: Option<String>,
    /// Prometheus configuration
    pub prometheus: Option<PrometheusConfig>,
}

/// Prometheus integration configuration.
///
/// Controls whether metrics are pushed to a Prometheus Push Gateway
/// and specifies the gateway address.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PrometheusConfig {
    /// Enable prometheus metrics pushing
    pub enabled: Option<bool>,
    /// Prometheus push gateway address (e.g., "http://localhost:9091")
    pub address: Option<String>,
}

/// Validated settings for one run of the binary.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub probe: ProbeConfig,
    pub output: OutputFormat,
    /// Push gateway address when metrics pushing is enabled.
    pub prometheus: Option<String>,
}

impl Default for Config {
    /// The defaults every other source is merged over.
    ///
    /// - `host`: "localhost", `port`: 443, no server name
    /// - `timeout`: "5s"
    /// - `critical`: 14 days, `warning`: 30 days
    /// - `openssl`: "openssl"
    /// - `output`: "text"
    /// - `prometheus.enabled`: false, `prometheus.address`: "http://localhost:9091"
    fn default() -> Self {
        Config {
            host: Some("localhost".to_string()),
            port: Some(443),
            servername: None,
            verify_servername: Some(false),
            timeout: Some("5s".to_string()),
            rsa: Some(false),
            ecdsa: Some(false),
            critical: Some(14),
            warning: Some(30),
            openssl: Some("openssl".to_string()),
            merged_output: Some(false),
            output: Some("text".to_string()),
            prometheus: Some(PrometheusConfig {
                enabled: Some(false),
                address: Some("http://localhost:9091".to_string()),
            }),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully parsed configuration
    /// * `Err(ConfigError::Io)` - File could not be read
    /// * `Err(ConfigError::Parse)` - File contains invalid TOML
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use certnet::config::Config;
    /// let config = Config::from_file("check-cert-net.toml")?;
    /// # Ok::<(), certnet::config::ConfigError>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(config)
    }

    /// Merges this configuration with another, prioritizing the other's values.
    ///
    /// For each field, a `Some` in `other` replaces the value here and a
    /// `None` keeps it.
    pub fn merge_with(mut self, other: Config) -> Self {
        fn take<T>(current: &mut Option<T>, other: Option<T>) {
            if other.is_some() {
                *current = other;
            }
        }

        take(&mut self.host, other.host);
        take(&mut self.port, other.port);
        take(&mut self.servername, other.servername);
        take(&mut self.verify_servername, other.verify_servername);
        take(&mut self.timeout, other.timeout);
        take(&mut self.rsa, other.rsa);
        take(&mut self.ecdsa, other.ecdsa);
        take(&mut self.critical, other.critical);
        take(&mut self.warning, other.warning);
        take(&mut self.openssl, other.openssl);
        take(&mut self.merged_output, other.merged_output);
        take(&mut self.output, other.output);
        if let Some(other_prom) = other.prometheus {
            if let Some(ref mut self_prom) = self.prometheus {
                take(&mut self_prom.enabled, other_prom.enabled);
                take(&mut self_prom.address, other_prom.address);
            } else {
                self.prometheus = Some(other_prom);
            }
        }
        self
    }

    /// Turns the merged configuration into validated [`Settings`].
    ///
    /// `rsa` and `ecdsa` together are passed through on purpose: the probe
    /// reports that conflict as a CRITICAL result.
    pub fn resolve(self) -> Result<Settings, ConfigError> {
        let defaults = ProbeConfig::default();

        let host = self.host.unwrap_or(defaults.host);
        if host.trim().is_empty() {
            return Err(ConfigError::Validation("host cannot be empty".to_string()));
        }
        let port = self.port.unwrap_or(defaults.port);
        if port == 0 {
            return Err(ConfigError::Validation("port cannot be 0".to_string()));
        }
        let timeout = match self.timeout {
            Some(ref value) => parse_duration(value)?,
            None => defaults.timeout,
        };
        if timeout.is_zero() {
            return Err(ConfigError::Validation(
                "timeout must be greater than 0".to_string(),
            ));
        }
        let critical_days = self.critical.unwrap_or(defaults.critical_days);
        let warning_days = self.warning.unwrap_or(defaults.warning_days);
        if critical_days < 0 || warning_days < 0 {
            return Err(ConfigError::Validation(
                "thresholds cannot be negative".to_string(),
            ));
        }
        let output = match self.output {
            Some(ref value) => OutputFormat::from_str(value).map_err(|_| {
                ConfigError::Validation(format!("unknown output format {:?}", value))
            })?,
            None => OutputFormat::default(),
        };
        let sink_layout = if self.merged_output.unwrap_or(false) {
            SinkLayout::Merged
        } else {
            SinkLayout::Separate
        };
        let prometheus = self
            .prometheus
            .filter(|prom| prom.enabled.unwrap_or(false))
            .map(|prom| {
                prom.address
                    .unwrap_or_else(|| "http://localhost:9091".to_string())
            });

        Ok(Settings {
            probe: ProbeConfig {
                host,
                port,
                server_name: self.servername.filter(|name| !name.is_empty()),
                prefer_rsa: self.rsa.unwrap_or(false),
                prefer_ecdsa: self.ecdsa.unwrap_or(false),
                timeout,
                critical_days,
                warning_days,
                verify_server_name: self.verify_servername.unwrap_or(false),
                openssl: self.openssl.unwrap_or(defaults.openssl),
                sink_layout,
            },
            output,
            prometheus,
        })
    }

    /// Generates an example configuration file in TOML format.
    ///
    /// # Example
    ///
    /// ```
    /// # use certnet::config::Config;
    /// let example = Config::example_toml();
    /// println!("{}", example);
    /// ```
    pub fn example_toml() -> String {
        let example = Config {
            host: Some("10.0.0.12".to_string()),
            port: Some(8443),
            servername: Some("www.example.com".to_string()),
            verify_servername: Some(true),
            timeout: Some("10s".to_string()),
            rsa: Some(false),
            ecdsa: Some(false),
            critical: Some(7),
            warning: Some(21),
            openssl: Some("openssl".to_string()),
            merged_output: Some(false),
            output: Some("text".to_string()),
            prometheus: Some(PrometheusConfig {
                enabled: Some(true),
                address: Some("http://localhost:9091".to_string()),
            }),
        };

        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Error generating example".to_string())
    }
}

/// Parses durations such as `5s`, `1500ms`, `2m` or `1m30s`.
///
/// A bare number is read as seconds. Fractions are allowed (`1.5s`).
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let value = value.trim();
    let invalid = || ConfigError::Validation(format!("invalid duration {:?}", value));
    if value.is_empty() {
        return Err(invalid());
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = value;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        let (number, tail) = rest.split_at(number_len);
        let amount: f64 = number.parse().map_err(|_| invalid())?;
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);
        let seconds_per_unit = match unit {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(invalid()),
        };
        let part = Duration::try_from_secs_f64(amount * seconds_per_unit).map_err(|_| invalid())?;
        total = total.checked_add(part).ok_or_else(invalid)?;
        rest = next;
    }
    Ok(total)
}

/// Errors that can occur during configuration loading and parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error (file not found, permission denied, etc.)
    #[error("IO Error: {0}")]
    Io(String),
    /// TOML parsing error (invalid syntax, type mismatch, etc.)
    #[error("Parse Error: {0}")]
    Parse(String),
    /// Validation error (empty host, bad duration, etc.)
    #[error("Validation Error: {0}")]
    Validation(String),
}
