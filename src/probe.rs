//! Builds the openssl command pipeline for a probe.
//!
//! ```text
//! echo QUIT | openssl s_client [-servername NAME] -connect HOST:PORT [-cipher aRSA|aECDSA]
//!           | openssl x509 -noout -text|-dates
//! ```
//!
//! `QUIT` on its standard input makes `s_client` close the session right after
//! the handshake instead of waiting for more input.

use crate::error::{Error, Result};
use crate::parser::ExtractMode;
use crate::pipeline::CommandSpec;
use crate::ProbeConfig;

const TRIGGER: [&str; 2] = ["echo", "QUIT"];
const RSA_CIPHERS: &str = "aRSA";
const ECDSA_CIPHERS: &str = "aECDSA";

/// Builds the three stage pipeline that prints the server certificate.
///
/// Fails with [`Error::Configuration`] when both cipher preferences are set.
pub fn build_command(config: &ProbeConfig, mode: ExtractMode) -> Result<CommandSpec> {
    let cipher = match (config.prefer_rsa, config.prefer_ecdsa) {
        (true, true) => {
            return Err(Error::configuration(
                "cannot use --rsa and --ecdsa at the same time",
            ))
        }
        (true, false) => Some(RSA_CIPHERS),
        (false, true) => Some(ECDSA_CIPHERS),
        (false, false) => None,
    };

    let mut s_client = vec![config.openssl.clone(), "s_client".to_string()];
    if !config.server_name().is_empty() {
        s_client.push("-servername".to_string());
        s_client.push(config.server_name().to_string());
    }
    s_client.push("-connect".to_string());
    s_client.push(connect_target(&config.host, config.port));
    if let Some(cipher) = cipher {
        s_client.push("-cipher".to_string());
        s_client.push(cipher.to_string());
    }

    let x509 = vec![
        config.openssl.clone(),
        "x509".to_string(),
        "-noout".to_string(),
        mode.x509_flag().to_string(),
    ];

    let trigger: Vec<String> = TRIGGER.iter().map(|token| token.to_string()).collect();
    CommandSpec::new(vec![trigger, s_client, x509]).map_err(|source| Error::Pipeline {
        source,
        stderr: String::new(),
    })
}

/// `host:port`, with IPv6 literals put in brackets.
fn connect_target(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
