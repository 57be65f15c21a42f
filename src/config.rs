//! Process configuration: CLI flags and their environment-variable fallbacks,
//! per the configuration options table in §6.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

fn parse_duration_secs(raw: &str) -> Result<Duration, String> {
    let secs: u64 = raw
        .parse()
        .map_err(|_| format!("`{raw}` is not a number of seconds"))?;
    Ok(Duration::from_secs(secs))
}

/// Command-line configuration for the reconciler process.
#[derive(Debug, Parser)]
#[command(name = "lifecycle-core", author, version, about)]
pub struct Config {
    /// Path to a kubeconfig file. When unset the in-cluster service account
    /// or `$KUBECONFIG` is used, matching `kube::Client::try_default`.
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Restrict reconciliation to a single namespace. Empty means all
    /// namespaces.
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Subset of namespaces to watch. Overrides `namespace` when non-empty.
    #[arg(long = "watched-namespace", env = "WATCHED_NAMESPACES", value_delimiter = ',')]
    pub watched_namespaces: Vec<String>,

    /// Namespace whose CatalogSources affect every subscription in the
    /// cluster.
    #[arg(
        long,
        env = "GLOBAL_CATALOG_NAMESPACE",
        default_value = "olm-catalog"
    )]
    pub global_catalog_namespace: String,

    /// Full-cache resync cadence. Must be at least 30 seconds.
    #[arg(
        long,
        env = "RESYNC_INTERVAL",
        value_parser = parse_duration_secs,
        default_value = "60"
    )]
    pub resync_interval: Duration,

    /// Minimum rate-limit floor applied to every requeue backoff.
    #[arg(
        long,
        env = "WAKEUP_INTERVAL",
        value_parser = parse_duration_secs,
        default_value = "5"
    )]
    pub wakeup_interval: Duration,

    /// TLS certificate for the metrics endpoint. Requires `tls_key`.
    #[arg(long, env = "TLS_CERT", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// TLS private key for the metrics endpoint. Requires `tls_cert`.
    #[arg(long, env = "TLS_KEY", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// Address the metrics endpoint listens on.
    #[arg(long, env = "METRICS_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub metrics_bind_addr: String,
}

impl Config {
    /// The namespaces this process reconciles, resolved from
    /// `watched_namespaces` / `namespace`. `None` means all namespaces.
    pub fn effective_namespaces(&self) -> Option<Vec<String>> {
        if !self.watched_namespaces.is_empty() {
            Some(self.watched_namespaces.clone())
        } else {
            self.namespace.clone().map(|ns| vec![ns])
        }
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watched_namespaces_takes_precedence_over_namespace() {
        let cfg = Config::parse_from([
            "lifecycle-core",
            "--namespace",
            "default",
            "--watched-namespace",
            "a,b",
        ]);
        assert_eq!(
            cfg.effective_namespaces(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn empty_namespace_config_watches_everything() {
        let cfg = Config::parse_from(["lifecycle-core"]);
        assert_eq!(cfg.effective_namespaces(), None);
    }

    #[test]
    fn tls_requires_both_cert_and_key() {
        let cfg = Config::parse_from(["lifecycle-core"]);
        assert!(!cfg.tls_enabled());
    }
}
