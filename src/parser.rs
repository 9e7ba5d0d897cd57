//! Reads certificate facts out of `openssl x509` output.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;

use crate::error::{Error, Result};
use crate::CertificateInfo;

const SUBJECT_CN: &str = "Subject: CN=";
const NOT_AFTER: &str = "Not After : ";
const SAN_HEADER: &str = "Subject Alternative Name:";
const DNS_PREFIX: &str = "DNS:";

/// `Mon D HH:MM:SS YYYY`, the zone is handled separately.
const DATE_FORMAT: &str = "%b %d %H:%M:%S %Y";

lazy_static! {
    static ref NOT_AFTER_LINE: Regex = Regex::new(r"(?m)^notAfter=(.+)$").unwrap();
}

/// Which `openssl x509` output is requested and parsed.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExtractMode {
    /// Only the validity dates (`-dates`).
    Dates,
    /// The full certificate dump (`-text`), including subject names.
    #[default]
    Text,
}

impl ExtractMode {
    pub fn x509_flag(self) -> &'static str {
        match self {
            ExtractMode::Dates => "-dates",
            ExtractMode::Text => "-text",
        }
    }
}

#[derive(Debug, Error)]
enum TimestampError {
    #[error("expected `Mon D HH:MM:SS YYYY TZ`, got {0:?}")]
    Layout(String),
    #[error("unknown time zone abbreviation {0:?}")]
    Zone(String),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
}

/// Makes process output printable on a single line.
///
/// Trailing newlines are dropped and remaining line breaks are written as
/// `\r\n`, `\r` and `\n` escapes.
pub fn escape_output(s: &str) -> String {
    s.trim_end_matches('\n')
        .replace("\r\n", "\\r\\n")
        .replace('\r', "\\r")
        .replace('\n', "\\n")
}

pub fn parse(mode: ExtractMode, text: &str) -> Result<CertificateInfo> {
    match mode {
        ExtractMode::Dates => parse_dates(text),
        ExtractMode::Text => parse_text(text),
    }
}

/// Parses `openssl x509 -noout -dates` output.
///
/// Exactly one `notAfter=` line must be present.
pub fn parse_dates(text: &str) -> Result<CertificateInfo> {
    let matches: Vec<&str> = NOT_AFTER_LINE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .collect();

    let raw = match matches.as_slice() {
        [raw] => *raw,
        [] => {
            return Err(Error::parse(format!(
                "could not find notAfter in result: {}",
                escape_output(text)
            )))
        }
        many => {
            return Err(Error::parse(format!(
                "found {} notAfter entries in result: {}",
                many.len(),
                escape_output(text)
            )))
        }
    };

    let not_after = parse_timestamp(raw)
        .map_err(|err| Error::parse(format!("{}:{}", err, escape_output(text))))?;
    debug!("notAfter {}", not_after);
    Ok(CertificateInfo {
        not_after,
        subjects: Vec::new(),
    })
}

/// Parses `openssl x509 -noout -text` output.
///
/// Collects the subject CN and the SAN DNS names, each name once, and
/// requires a `Not After :` line.
pub fn parse_text(text: &str) -> Result<CertificateInfo> {
    let mut subjects = Vec::new();
    let mut seen = HashSet::new();
    let mut not_after = None;
    let mut prev = "";

    for line in text.lines() {
        let line = line.trim();
        if let Some(cn) = line.strip_prefix(SUBJECT_CN) {
            if seen.insert(cn.to_string()) {
                subjects.push(cn.to_string());
            }
        }
        if let Some(raw) = line.strip_prefix(NOT_AFTER) {
            let parsed = parse_timestamp(raw)
                .map_err(|err| Error::parse(format!("{}:{}", err, escape_output(line))))?;
            not_after = Some(parsed);
        }
        if prev.contains(SAN_HEADER) && line.starts_with(DNS_PREFIX) {
            for token in line.split(',') {
                if let Some(name) = token.trim().strip_prefix(DNS_PREFIX) {
                    if seen.insert(name.to_string()) {
                        subjects.push(name.to_string());
                    }
                }
            }
        }
        prev = line;
    }

    let not_after = not_after.ok_or_else(|| Error::parse("could not find notAfter in result"))?;
    debug!("notAfter {}, subjects {:?}", not_after, subjects);
    Ok(CertificateInfo {
        not_after,
        subjects,
    })
}

/// Parses timestamps such as `Jun  1 00:00:00 2030 GMT`.
///
/// Runs of spaces count as one. The zone must be an upper case abbreviation
/// and is read as UTC, which is what openssl prints.
fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, TimestampError> {
    let fields: Vec<&str> = raw.split_whitespace().collect();
    let (zone, datetime) = match fields.split_last() {
        Some((zone, rest)) if rest.len() == 4 => (*zone, rest.join(" ")),
        _ => return Err(TimestampError::Layout(raw.trim().to_string())),
    };
    if zone.len() < 3 || !zone.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(TimestampError::Zone(zone.to_string()));
    }
    let naive = NaiveDateTime::parse_from_str(&datetime, DATE_FORMAT)?;
    Ok(Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    const X509_TEXT: &str = "Certificate:
    Data:
        Version: 3 (0x2)
        Serial Number:
            04:9f:3a:1c:7d:2e:55:b0:91:aa:10:6c:3e:27:88:41
        Signature Algorithm: sha256WithRSAEncryption
        Issuer: C=US, O=Let's Encrypt, CN=R3
        Validity
            Not Before: Mar  3 08:12:45 2030 GMT
            Not After : Jun  1 08:12:44 2030 GMT
        Subject: CN=www.example.com
        X509v3 extensions:
            X509v3 Key Usage: critical
                Digital Signature, Key Encipherment
            X509v3 Subject Alternative Name:
                DNS:www.example.com, DNS:example.com, DNS:*.example.com, DNS:example.com
            X509v3 Certificate Policies:
                Policy: 2.23.140.1.2.1
";

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_escape_output() {
        assert_eq!(escape_output("a\r\nb\rc\nd\n\n"), "a\\r\\nb\\rc\\nd");
        assert_eq!(escape_output(""), "");
    }

    #[test]
    fn test_parse_dates() {
        let cert = parse_dates("notBefore=Mar 3 08:12:45 2030 GMT\nnotAfter=Jun 1 00:00:00 2030 GMT\n")
            .unwrap();
        assert_eq!(cert.not_after, utc("2030-06-01T00:00:00Z"));
        assert!(cert.subjects.is_empty());
    }

    #[test]
    fn test_parse_dates_padded_day() {
        let cert = parse_dates("notAfter=Jun  1 23:59:59 2030 GMT").unwrap();
        assert_eq!(cert.not_after, utc("2030-06-01T23:59:59Z"));
    }

    #[test]
    fn test_parse_dates_missing() {
        let text = "notBefore=Mar 3 08:12:45 2030 GMT\n";
        let err = parse_dates(text).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert_eq!(
            err.to_string(),
            "could not find notAfter in result: notBefore=Mar 3 08:12:45 2030 GMT"
        );
    }

    #[test]
    fn test_parse_dates_duplicate() {
        let text = "notAfter=Jun 1 00:00:00 2030 GMT\nnotAfter=Jul 1 00:00:00 2030 GMT";
        let err = parse_dates(text).unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("found 2 notAfter entries in result: "));
        assert!(message.contains(&escape_output(text)));
    }

    #[test]
    fn test_parse_dates_malformed() {
        let err = parse_dates("notAfter=tomorrow").unwrap_err();
        assert!(err.to_string().contains("notAfter=tomorrow"));
    }

    #[test]
    fn test_parse_text() {
        let cert = parse_text(X509_TEXT).unwrap();
        assert_eq!(cert.not_after, utc("2030-06-01T08:12:44Z"));
        assert_eq!(
            cert.subjects,
            vec!["www.example.com", "example.com", "*.example.com"]
        );
    }

    #[test]
    fn test_parse_text_dns_only_after_san_header() {
        let text = "Not After : Jun  1 08:12:44 2030 GMT\nDNS:stray.example.com\n";
        let cert = parse_text(text).unwrap();
        assert!(cert.subjects.is_empty());
    }

    #[test]
    fn test_parse_text_missing_not_after() {
        let err = parse_text("Subject: CN=www.example.com\n").unwrap_err();
        assert_eq!(err.to_string(), "could not find notAfter in result");
    }

    #[test]
    fn test_parse_text_malformed_not_after() {
        let err = parse_text("            Not After : Jun 31 08:12:44 2030 GMT\n").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert!(err
            .to_string()
            .ends_with(":Not After : Jun 31 08:12:44 2030 GMT"));
    }

    #[test]
    fn test_parse_timestamp_zone() {
        assert!(parse_timestamp("Jun 1 00:00:00 2030 GMT").is_ok());
        assert!(matches!(
            parse_timestamp("Jun 1 00:00:00 2030 gmt"),
            Err(TimestampError::Zone(_))
        ));
        assert!(matches!(
            parse_timestamp("Jun 1 00:00:00 2030"),
            Err(TimestampError::Layout(_))
        ));
    }

    #[test]
    fn test_parse_dispatch() {
        let cert = parse(ExtractMode::Text, X509_TEXT).unwrap();
        assert_eq!(cert.subjects.len(), 3);
        assert!(parse(ExtractMode::Dates, X509_TEXT).is_err());
    }

    #[test]
    fn test_extract_mode_flag() {
        assert_eq!(ExtractMode::Dates.x509_flag(), "-dates");
        assert_eq!(ExtractMode::Text.x509_flag(), "-text");
        assert_eq!(ExtractMode::Text.to_string(), "text");
    }
}
