//! Turns certificate facts into a verdict.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::{CertificateInfo, ProbeConfig, Status, StatusVerdict};

/// Evaluates `cert` against the thresholds of `config` as of now.
pub fn evaluate(cert: &CertificateInfo, config: &ProbeConfig) -> StatusVerdict {
    evaluate_at(cert, config, Utc::now())
}

/// Evaluates `cert` as of `now`.
///
/// A failed server name verification is CRITICAL regardless of the expiry
/// date. Otherwise the status is CRITICAL below `critical_days`, WARNING
/// below `warning_days` and OK from there on.
pub fn evaluate_at(
    cert: &CertificateInfo,
    config: &ProbeConfig,
    now: DateTime<Utc>,
) -> StatusVerdict {
    if config.verify_server_name {
        if let Err(err) = verify_server_name(&cert.subjects, config.server_name()) {
            return StatusVerdict::from(err);
        }
    }

    let days = days_remaining(cert.not_after, now);
    let message = format!(
        "Expiration date: {}, {} days remaining",
        cert.not_after.format("%Y-%m-%d"),
        days
    );
    let status = if days < config.critical_days {
        Status::Critical
    } else if days < config.warning_days {
        Status::Warning
    } else {
        Status::Ok
    };
    StatusVerdict::new(status, message).with_days_remaining(days)
}

/// Whole days between `now` and `not_after`, truncated toward zero.
///
/// Negative once the certificate has expired; 23 hours left is 0 days.
pub fn days_remaining(not_after: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (not_after - now).num_hours() / 24
}

/// Checks that `server_name` is one of `subjects`.
pub fn verify_server_name(subjects: &[String], server_name: &str) -> Result<()> {
    if subjects
        .iter()
        .any(|subject| subject_matches(subject, server_name))
    {
        return Ok(());
    }
    Err(Error::Verification {
        server_name: server_name.to_string(),
        subjects: subjects.to_vec(),
    })
}

/// Exact match, or for `*.` subjects a match of everything after the
/// leftmost label on both sides. `*.example.com` covers `www.example.com`
/// but not `example.com`.
pub fn subject_matches(subject: &str, server_name: &str) -> bool {
    if subject.starts_with("*.") {
        parent_domain(subject) == parent_domain(server_name)
    } else {
        subject == server_name
    }
}

fn parent_domain(name: &str) -> &str {
    name.split_once('.').map_or("", |(_, rest)| rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2030-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn cert_in(delta: Duration) -> CertificateInfo {
        CertificateInfo {
            not_after: now() + delta,
            subjects: vec!["www.example.com".to_string(), "*.example.com".to_string()],
        }
    }

    fn config() -> ProbeConfig {
        ProbeConfig {
            critical_days: 7,
            warning_days: 10,
            ..ProbeConfig::default()
        }
    }

    #[test]
    fn test_ok() {
        let verdict = evaluate_at(&cert_in(Duration::days(62)), &config(), now());
        assert_eq!(verdict.status, Status::Ok);
        assert_eq!(
            verdict.message,
            "Expiration date: 2030-03-04, 62 days remaining"
        );
        assert_eq!(verdict.days_remaining, Some(62));
    }

    #[test]
    fn test_warning() {
        let verdict = evaluate_at(&cert_in(Duration::days(9)), &config(), now());
        assert_eq!(verdict.status, Status::Warning);
        assert_eq!(
            verdict.message,
            "Expiration date: 2030-01-10, 9 days remaining"
        );
    }

    #[test]
    fn test_critical() {
        let verdict = evaluate_at(&cert_in(Duration::days(5)), &config(), now());
        assert_eq!(verdict.status, Status::Critical);
    }

    #[test]
    fn test_thresholds_are_strict() {
        let verdict = evaluate_at(&cert_in(Duration::days(10)), &config(), now());
        assert_eq!(verdict.status, Status::Ok);
        let verdict = evaluate_at(&cert_in(Duration::days(7)), &config(), now());
        assert_eq!(verdict.status, Status::Warning);
    }

    #[test]
    fn test_days_remaining_truncates() {
        let not_after = now() + Duration::minutes(23 * 60 + 54);
        assert_eq!(days_remaining(not_after, now()), 0);
        assert_eq!(days_remaining(now() - Duration::hours(49), now()), -2);
        assert_eq!(days_remaining(now() - Duration::hours(23), now()), 0);
    }

    #[test]
    fn test_expired_is_critical() {
        let verdict = evaluate_at(&cert_in(Duration::days(-3)), &config(), now());
        assert_eq!(verdict.status, Status::Critical);
        assert!(verdict.message.ends_with("-3 days remaining"));
    }

    #[test]
    fn test_subject_matches() {
        assert!(subject_matches("*.example.com", "www.example.com"));
        assert!(!subject_matches("*.example.com", "example.com"));
        assert!(!subject_matches("*.example.com", "a.b.example.com"));
        assert!(subject_matches("example.com", "example.com"));
        assert!(!subject_matches("Example.com", "example.com"));
    }

    #[test]
    fn test_verification_failure_wins_over_expiry() {
        let config = ProbeConfig {
            server_name: Some("www.example.org".to_string()),
            verify_server_name: true,
            ..config()
        };
        let verdict = evaluate_at(&cert_in(Duration::days(62)), &config, now());
        assert_eq!(verdict.status, Status::Critical);
        assert_eq!(
            verdict.message,
            "servername:www.example.org is not included in www.example.com,*.example.com"
        );
        assert_eq!(verdict.days_remaining, None);
    }

    #[test]
    fn test_verification_success_falls_through() {
        let config = ProbeConfig {
            server_name: Some("api.example.com".to_string()),
            verify_server_name: true,
            ..config()
        };
        let verdict = evaluate_at(&cert_in(Duration::days(9)), &config, now());
        assert_eq!(verdict.status, Status::Warning);
    }

    #[test]
    fn test_verification_without_subjects() {
        let err = verify_server_name(&[], "www.example.com").unwrap_err();
        assert_eq!(
            err.to_string(),
            "servername:www.example.com is not included in "
        );
    }
}
