//! Certificate expiry check for remote TLS endpoints.
//!
//! The certificate is fetched with the `openssl` command line tools,
//! `echo QUIT | openssl s_client -connect host:port | openssl x509 -noout -text`,
//! parsed, and turned into an OK/WARNING/CRITICAL verdict that monitoring
//! agents understand.
//!
//! ```no_run
//! use certnet::{check, ProbeConfig};
//!
//! let config = ProbeConfig {
//!     host: "example.com".to_string(),
//!     server_name: Some("example.com".to_string()),
//!     verify_server_name: true,
//!     ..ProbeConfig::default()
//! };
//! let verdict = check(&config);
//! println!("{} {}", verdict.status, verdict.message);
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

pub mod config;
pub mod error;
pub mod evaluator;
pub mod logging;
pub mod parser;
pub mod pipeline;
pub mod probe;
pub mod supervisor;

pub use error::{Error, PipelineError, Result};
pub use parser::ExtractMode;
pub use pipeline::SinkLayout;

/// Name the check reports itself under.
pub const CHECK_NAME: &str = "check-cert-net";

/// Everything needed to probe one endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    pub host: String,
    pub port: u16,
    /// Name sent as SNI and compared against the certificate subjects.
    pub server_name: Option<String>,
    /// Restrict the handshake to RSA authenticated cipher suites.
    pub prefer_rsa: bool,
    /// Restrict the handshake to ECDSA authenticated cipher suites.
    pub prefer_ecdsa: bool,
    pub timeout: Duration,
    /// Fewer days remaining than this is CRITICAL.
    pub critical_days: i64,
    /// Fewer days remaining than this is WARNING.
    pub warning_days: i64,
    pub verify_server_name: bool,
    /// Path of the `openssl` binary.
    pub openssl: String,
    pub sink_layout: SinkLayout,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            host: "localhost".to_string(),
            port: 443,
            server_name: None,
            prefer_rsa: false,
            prefer_ecdsa: false,
            timeout: Duration::from_secs(5),
            critical_days: 14,
            warning_days: 30,
            verify_server_name: false,
            openssl: "openssl".to_string(),
            sink_layout: SinkLayout::Separate,
        }
    }
}

impl ProbeConfig {
    /// Configured server name, empty when none is set.
    pub fn server_name(&self) -> &str {
        self.server_name.as_deref().unwrap_or("")
    }

    /// Subject names are only needed when they are verified, otherwise the
    /// validity dates are enough.
    pub fn extract_mode(&self) -> ExtractMode {
        if self.verify_server_name {
            ExtractMode::Text
        } else {
            ExtractMode::Dates
        }
    }
}

/// Facts read from the certificate the server presented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub not_after: DateTime<Utc>,
    /// Subject CN and SAN DNS names in the order they were found, without
    /// duplicates. Empty when only the dates were requested.
    pub subjects: Vec<String>,
}

/// Health of the checked endpoint.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Status {
    Ok,
    Warning,
    Critical,
}

impl Status {
    /// Plugin exit code: 0 OK, 1 WARNING, 2 CRITICAL.
    pub fn exit_code(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Warning => 1,
            Status::Critical => 2,
        }
    }
}

/// Final result of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusVerdict {
    pub status: Status,
    pub message: String,
    /// Whole days until expiry, when the certificate could be evaluated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_remaining: Option<i64>,
}

impl StatusVerdict {
    pub fn new<S: Into<String>>(status: Status, message: S) -> Self {
        StatusVerdict {
            status,
            message: message.into(),
            days_remaining: None,
        }
    }

    pub fn critical<S: Into<String>>(message: S) -> Self {
        Self::new(Status::Critical, message)
    }

    pub fn with_days_remaining(mut self, days: i64) -> Self {
        self.days_remaining = Some(days);
        self
    }
}

impl From<Error> for StatusVerdict {
    fn from(err: Error) -> Self {
        StatusVerdict::critical(err.to_string())
    }
}

/// Fetches and parses the certificate of the configured endpoint.
///
/// The openssl pipeline runs on a worker thread and is killed when
/// `config.timeout` elapses first.
pub fn fetch_certificate(config: &ProbeConfig) -> Result<CertificateInfo> {
    let mode = config.extract_mode();
    let command = probe::build_command(config, mode)?;
    debug!("running {}", command);

    let layout = config.sink_layout;
    supervisor::run_with_deadline(config.timeout, move |ctx| {
        let output = pipeline::run_capture(ctx, &command, layout);
        if let Some(failure) = output.failure {
            return Err(match failure {
                PipelineError::Cancelled => Error::Timeout,
                source => Error::Pipeline {
                    source,
                    stderr: parser::escape_output(&String::from_utf8_lossy(&output.stderr)),
                },
            });
        }
        parser::parse(mode, &String::from_utf8_lossy(&output.stdout))
    })
}

/// Runs a complete check. Every failure becomes a CRITICAL verdict.
pub fn check(config: &ProbeConfig) -> StatusVerdict {
    let verdict = match fetch_certificate(config) {
        Ok(cert) => evaluator::evaluate(&cert, config),
        Err(err) => StatusVerdict::from(err),
    };
    info!(
        "{}:{} {}: {}",
        config.host, config.port, verdict.status, verdict.message
    );
    verdict
}
