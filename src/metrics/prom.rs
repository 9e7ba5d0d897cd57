use log::debug;
use prometheus::{labels, Gauge, Registry};

use certnet::{ProbeConfig, Status, StatusVerdict, CHECK_NAME};

/// Gauge value for a status, matching the plugin exit code.
pub fn status_value(status: Status) -> f64 {
    f64::from(status.exit_code())
}

/// Collects the metrics of one verdict.
///
/// The days gauge is only registered when the certificate could be evaluated.
pub fn verdict_registry(verdict: &StatusVerdict) -> prometheus::Result<Registry> {
    let registry = Registry::new();

    let status = Gauge::new("certnet_status", "check status: 0 ok, 1 warning, 2 critical")?;
    status.set(status_value(verdict.status));
    registry.register(Box::new(status))?;

    if let Some(days) = verdict.days_remaining {
        let remaining = Gauge::new("certnet_days_before_expired", "days before expiration")?;
        remaining.set(days as f64);
        registry.register(Box::new(remaining))?;
    }
    Ok(registry)
}

/// Pushes the verdict of one check to the push gateway at `address`.
///
/// `address` is the gateway root (`http://host:9091`); the
/// `/metrics/job/check-cert-net/...` path is appended by the push client.
pub fn push_verdict(
    config: &ProbeConfig,
    verdict: &StatusVerdict,
    address: &str,
) -> prometheus::Result<()> {
    let metric_families = verdict_registry(verdict)?.gather();
    let mut grouping = labels! {
        "instance".to_owned() => CHECK_NAME.to_owned(),
        "host".to_owned() => config.host.to_owned(),
        "port".to_owned() => config.port.to_string(),
    };
    // An empty value would leave an empty segment in the grouping path.
    if !config.server_name().is_empty() {
        grouping.insert("servername".to_owned(), config.server_name().to_owned());
    }
    debug!("pushing {} metric families to {}", metric_families.len(), address);
    prometheus::push_metrics(CHECK_NAME, grouping, address, metric_families, None)
}
