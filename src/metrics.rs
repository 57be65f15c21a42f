use std::sync::OnceLock;

use opentelemetry::{global, metrics::Counter, KeyValue};
use prometheus::{IntCounterVec, IntGaugeVec, Opts};

pub struct Metrics {
    /// 1 for the `(namespace, name, version, phase, reason)` row matching a
    /// CSV's current state; the CSV reconciler zeroes the previous row on
    /// every phase transition.
    pub csv_phase: IntGaugeVec,
    /// 1 for the `(namespace, name, installed_csv, channel, package, approval)`
    /// row matching a subscription's current resolved state.
    pub subscription_info: IntGaugeVec,
    /// 1 if the named catalog is currently healthy, 0 otherwise.
    pub catalog_health: IntGaugeVec,
    /// Monotonic count of reconciliations per controller and outcome.
    pub reconciliations_total: IntCounterVec,
    pub install_actions: Counter<u64>,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub fn init(registry: &prometheus::Registry) -> Result<(), anyhow::Error> {
    let meter = global::meter("lifecycle-core");

    let csv_phase = IntGaugeVec::new(
        Opts::new("olm_csv_phase", "Current phase of each ClusterServiceVersion"),
        &["namespace", "name", "version", "phase", "reason"],
    )?;
    registry.register(Box::new(csv_phase.clone()))?;

    let subscription_info = IntGaugeVec::new(
        Opts::new("olm_subscription_info", "Resolved state of each Subscription"),
        &["namespace", "name", "installed_csv", "channel", "package", "approval"],
    )?;
    registry.register(Box::new(subscription_info.clone()))?;

    let catalog_health = IntGaugeVec::new(
        Opts::new("olm_catalog_source_health", "Health of each CatalogSource (1 = healthy)"),
        &["namespace", "name"],
    )?;
    registry.register(Box::new(catalog_health.clone()))?;

    let reconciliations_total = IntCounterVec::new(
        Opts::new("olm_reconciliations_total", "Reconciliations processed per controller"),
        &["controller", "result"],
    )?;
    registry.register(Box::new(reconciliations_total.clone()))?;

    let metrics = Metrics {
        csv_phase,
        subscription_info,
        catalog_health,
        reconciliations_total,
        install_actions: meter.u64_counter("olm_install_actions_total").init(),
    };

    METRICS
        .set(metrics)
        .map_err(|_| anyhow::anyhow!("Metrics already initialized"))?;

    Ok(())
}

#[allow(clippy::expect_used)]
pub fn get() -> &'static Metrics {
    METRICS
        .get()
        .expect("Metrics not initialized - call metrics::init() first")
}

/// Records a CSV's current phase, zeroing out any previously-recorded phase
/// row for the same object so stale gauges don't linger (gauges "reflect
/// current counts", per §6).
pub fn record_csv_phase(
    namespace: &str,
    name: &str,
    version: &str,
    previous_phase: Option<&str>,
    phase: &str,
    reason: &str,
) {
    let metrics = get();
    if let Some(previous) = previous_phase {
        if previous != phase {
            metrics
                .csv_phase
                .with_label_values(&[namespace, name, version, previous, reason])
                .set(0);
        }
    }
    metrics
        .csv_phase
        .with_label_values(&[namespace, name, version, phase, reason])
        .set(1);
}

/// Records a subscription's resolved state: the package/channel it targets,
/// the CSV it has installed, and the approval mode currently in effect.
pub fn record_subscription_info(
    namespace: &str,
    name: &str,
    installed_csv: &str,
    channel: &str,
    package: &str,
    approval: &str,
) {
    get()
        .subscription_info
        .with_label_values(&[namespace, name, installed_csv, channel, package, approval])
        .set(1);
}

/// Records a catalog's current health as a 1/0 gauge.
pub fn record_catalog_health(namespace: &str, name: &str, healthy: bool) {
    get()
        .catalog_health
        .with_label_values(&[namespace, name])
        .set(if healthy { 1 } else { 0 });
}

/// Increments the per-controller reconciliation counter for one completed
/// reconcile, tagged by its outcome (`"ok"` or `"error"`).
pub fn record_reconciliation(controller: &str, result: &str) {
    get().reconciliations_total.with_label_values(&[controller, result]).inc();
}

/// Increments the install-action counter for one apply issued by the install
/// strategy executor, tagged by the kind of object it applied.
pub fn record_install_action(kind: &str) {
    get().install_actions.add(1, &[KeyValue::new("kind", kind.to_string())]);
}
