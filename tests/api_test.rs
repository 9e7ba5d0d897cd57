//! Integration tests for the public API

use std::time::Duration;

use chrono::{TimeZone, Utc};
use certnet::evaluator::evaluate_at;
use certnet::parser::parse_dates;
use certnet::probe::build_command;
use certnet::{CertificateInfo, Error, ExtractMode, PipelineError, ProbeConfig, Status};

#[test]
fn test_public_api_compiles() {
    // Ensures the public API is usable; not run, it would need the network
    fn check_endpoint(host: &str) -> Status {
        let config = ProbeConfig {
            host: host.to_string(),
            timeout: Duration::from_secs(3),
            ..ProbeConfig::default()
        };
        certnet::check(&config).status
    }

    let _ = check_endpoint;
}

#[test]
fn test_error_types_are_public() {
    fn handle_error(err: Error) -> String {
        match err {
            Error::Configuration { reason } => format!("Configuration: {}", reason),
            Error::Pipeline { source, stderr } => format!("Pipeline: {} {}", source, stderr),
            Error::Timeout => "Timeout".to_string(),
            Error::Parse { reason } => format!("Parse: {}", reason),
            Error::Worker => "Worker".to_string(),
            Error::Verification { server_name, .. } => format!("Verification: {}", server_name),
        }
    }

    let err = Error::Pipeline {
        source: PipelineError::Cancelled,
        stderr: String::new(),
    };
    assert_eq!(handle_error(err), "Pipeline: pipeline cancelled ");
}

#[test]
fn test_conflicting_ciphers_are_a_configuration_error() {
    let config = ProbeConfig {
        prefer_rsa: true,
        prefer_ecdsa: true,
        ..ProbeConfig::default()
    };
    for mode in [ExtractMode::Dates, ExtractMode::Text] {
        match build_command(&config, mode) {
            Err(Error::Configuration { reason }) => {
                assert_eq!(reason, "cannot use --rsa and --ecdsa at the same time")
            }
            other => panic!("expected a configuration error, got {:?}", other),
        }
    }
}

#[test]
fn test_dates_output_to_verdict() {
    let cert = parse_dates("notBefore=Mar  3 00:00:00 2030 GMT\nnotAfter=Jun  1 00:00:00 2030 GMT\n")
        .unwrap();
    assert_eq!(cert.not_after, Utc.with_ymd_and_hms(2030, 6, 1, 0, 0, 0).unwrap());

    let config = ProbeConfig {
        critical_days: 7,
        warning_days: 10,
        ..ProbeConfig::default()
    };
    let now = Utc.with_ymd_and_hms(2030, 5, 23, 0, 0, 0).unwrap();
    let verdict = evaluate_at(&cert, &config, now);
    assert_eq!(verdict.status, Status::Warning);
    assert_eq!(
        verdict.message,
        "Expiration date: 2030-06-01, 9 days remaining"
    );
}

#[test]
fn test_wildcard_verification() {
    let cert = CertificateInfo {
        not_after: Utc.with_ymd_and_hms(2030, 6, 1, 0, 0, 0).unwrap(),
        subjects: vec!["*.example.com".to_string()],
    };
    let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();

    let config = ProbeConfig {
        server_name: Some("www.example.com".to_string()),
        verify_server_name: true,
        ..ProbeConfig::default()
    };
    assert_eq!(evaluate_at(&cert, &config, now).status, Status::Ok);

    let config = ProbeConfig {
        server_name: Some("example.com".to_string()),
        ..config
    };
    let verdict = evaluate_at(&cert, &config, now);
    assert_eq!(verdict.status, Status::Critical);
    assert_eq!(
        verdict.message,
        "servername:example.com is not included in *.example.com"
    );
}
