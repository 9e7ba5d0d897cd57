use std::path::PathBuf;
use std::process::exit;

use clap::{ArgAction, Parser};
use log::{debug, warn};

use certnet::config::{Config, OutputFormat, PrometheusConfig, Settings};
use certnet::{logging, Status, StatusVerdict, CHECK_NAME};

mod metrics;

/// Command-line options. Every value is optional so that unset flags do not
/// override the configuration file.
#[derive(Debug, Parser)]
#[command(name = CHECK_NAME, version, author, about = env!("CARGO_PKG_DESCRIPTION"))]
struct Cli {
    /// Hostname [default: localhost]
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port [default: 443]
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    port: Option<u16>,

    /// Server name sent in the ClientHello (SNI)
    #[arg(long)]
    servername: Option<String>,

    /// Verify that the server name is one of the certificate subjects
    #[arg(long)]
    verify_servername: bool,

    /// Timeout for the whole check, e.g. 5s, 1500ms [default: 5s]
    #[arg(long)]
    timeout: Option<String>,

    /// Prefer aRSA ciphers
    #[arg(long)]
    rsa: bool,

    /// Prefer aECDSA ciphers
    #[arg(long)]
    ecdsa: bool,

    /// Critical threshold in days before expiry [default: 14]
    #[arg(short, long)]
    critical: Option<i64>,

    /// Warning threshold in days before expiry [default: 30]
    #[arg(short, long)]
    warning: Option<i64>,

    /// Path of the openssl binary [default: openssl]
    #[arg(long)]
    openssl: Option<String>,

    /// Capture stdout and stderr of the openssl pipeline in one buffer
    #[arg(long)]
    merged_output: bool,

    /// Output format: text, json [default: text]
    #[arg(short, long)]
    output: Option<String>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print an example configuration file and exit
    #[arg(long)]
    generate_config: bool,

    /// Push metrics to a Prometheus Push Gateway
    #[arg(long)]
    prometheus: bool,

    /// Prometheus Push Gateway address [default: http://localhost:9091]
    #[arg(long)]
    prometheus_address: Option<String>,

    /// More logging on stderr, repeat for more detail
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Converts the flags that were actually given into a mergeable `Config`.
    fn to_config(&self) -> Config {
        Config {
            host: self.host.clone(),
            port: self.port,
            servername: self.servername.clone(),
            verify_servername: self.verify_servername.then_some(true),
            timeout: self.timeout.clone(),
            rsa: self.rsa.then_some(true),
            ecdsa: self.ecdsa.then_some(true),
            critical: self.critical,
            warning: self.warning,
            openssl: self.openssl.clone(),
            merged_output: self.merged_output.then_some(true),
            output: self.output.clone(),
            prometheus: Some(PrometheusConfig {
                enabled: self.prometheus.then_some(true),
                address: self.prometheus_address.clone(),
            }),
        }
    }

    fn settings(&self) -> Result<Settings, certnet::config::ConfigError> {
        let mut config = Config::default();
        if let Some(ref path) = self.config {
            debug!("loading configuration from {}", path.display());
            config = config.merge_with(Config::from_file(path)?);
        }
        config.merge_with(self.to_config()).resolve()
    }
}

fn report(verdict: &StatusVerdict, output: OutputFormat) {
    match output {
        OutputFormat::Text => println!("{} {}: {}", CHECK_NAME, verdict.status, verdict.message),
        OutputFormat::Json => match serde_json::to_string(verdict) {
            Ok(json) => println!("{}", json),
            Err(err) => println!("{} {}: {}", CHECK_NAME, Status::Critical, err),
        },
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = logging::init(logging::level_for(cli.verbose)) {
        eprintln!("failed to initialize logging: {}", err);
    }

    if cli.generate_config {
        println!("{}", Config::example_toml());
        exit(0);
    }

    let settings = match cli.settings() {
        Ok(settings) => settings,
        Err(err) => {
            let verdict = StatusVerdict::critical(err.to_string());
            report(&verdict, OutputFormat::Text);
            exit(verdict.status.exit_code());
        }
    };

    let verdict = certnet::check(&settings.probe);

    if let Some(ref address) = settings.prometheus {
        if let Err(err) = metrics::prom::push_verdict(&settings.probe, &verdict, address) {
            warn!("failed to push metrics to prometheus: {}", err);
        }
    }

    report(&verdict, settings.output);
    exit(verdict.status.exit_code());
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_flags_override_defaults() {
        let cli = Cli::parse_from([
            CHECK_NAME,
            "-H",
            "example.com",
            "-p",
            "8443",
            "--servername",
            "www.example.com",
            "--verify-servername",
            "--timeout",
            "2s",
            "--rsa",
            "-c",
            "7",
            "-w",
            "10",
        ]);
        let settings = cli.settings().unwrap();
        assert_eq!(settings.probe.host, "example.com");
        assert_eq!(settings.probe.port, 8443);
        assert_eq!(settings.probe.server_name(), "www.example.com");
        assert!(settings.probe.verify_server_name);
        assert!(settings.probe.prefer_rsa);
        assert!(!settings.probe.prefer_ecdsa);
        assert_eq!(settings.probe.timeout, std::time::Duration::from_secs(2));
        assert_eq!(settings.probe.critical_days, 7);
        assert_eq!(settings.probe.warning_days, 10);
        assert_eq!(settings.prometheus, None);
    }

    #[test]
    fn test_cli_unset_flags_keep_defaults() {
        let cli = Cli::parse_from([CHECK_NAME]);
        let config = cli.to_config();
        assert_eq!(config.host, None);
        assert_eq!(config.rsa, None);
        let settings = cli.settings().unwrap();
        assert_eq!(settings.probe, certnet::ProbeConfig::default());
    }

    #[test]
    fn test_cli_rejects_port_zero() {
        assert!(Cli::try_parse_from([CHECK_NAME, "-p", "0"]).is_err());
    }

    #[test]
    fn test_cli_verbose_count() {
        let cli = Cli::parse_from([CHECK_NAME, "-vv"]);
        assert_eq!(cli.verbose, 2);
    }
}
