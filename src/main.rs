mod bundle;
mod clock;
mod config;
mod crd;
mod dispatcher;
mod error;
mod install_strategy;
mod metrics;
mod ownership;
mod reconcile;
mod requirements;
mod status;
mod workqueue;

use clap::Parser;
use opentelemetry::global;
use opentelemetry_sdk::metrics::MeterProvider;

use crate::config::Config;

#[actix_web::main]
#[allow(clippy::expect_used)]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .filter_module("actix_web::middleware::logger", log::LevelFilter::Warn)
        .filter_module("kube_runtime::controller", log::LevelFilter::Warn)
        .filter_module("lifecycle_core::reconcile", log::LevelFilter::Info)
        .filter_module("lifecycle_core::dispatcher", log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let registry = prometheus::Registry::new();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()
        .expect("failed to build OpenTelemetry Prometheus exporter");
    let provider = MeterProvider::builder().with_reader(exporter).build();
    global::set_meter_provider(provider);

    metrics::init(&registry).expect("failed to register metrics");

    log::info!("starting lifecycle-core reconciliation engine");

    dispatcher::run(config, registry).await
}
