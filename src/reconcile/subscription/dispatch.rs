//! The impure half of the Subscription reconciler: fetches the three
//! observables the chain needs (referenced install plan, visible catalogs,
//! deprecation metadata), runs the default chain, and persists the result
//! only when it differs from what was last observed.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::{watcher, Controller};
use kube::ResourceExt;

use crate::clock::Clock;
use crate::crd::catalogsource::CatalogSource;
use crate::crd::installplan::InstallPlan;
use crate::crd::subscription::Subscription;
use crate::crd::ObjectReference;
use crate::error::{ErrorClass, ReconcileError, ReconcileResult};
use crate::workqueue::RateLimiter;

use super::{run_chain, CatalogObservation, DeprecationInfo, PlanObservation, ReconcileContext, StageInput};

pub struct SubscriptionControllerContext {
    pub client: kube::Client,
    pub clock: Arc<dyn Clock>,
    pub rate_limiter: RateLimiter,
    pub global_catalog_namespace: String,
    pub resync_interval: Duration,
}

async fn observed_catalogs(
    client: &kube::Client,
    namespace: &str,
    global_catalog_namespace: &str,
) -> ReconcileResult<Vec<CatalogObservation>> {
    let mut seen = std::collections::HashSet::new();
    let mut catalogs = Vec::new();

    for ns in [namespace, global_catalog_namespace] {
        if !seen.insert(ns.to_string()) {
            continue;
        }
        let api: Api<CatalogSource> = Api::namespaced(client.clone(), ns);
        for catalog in api.list(&ListParams::default()).await.map_err(ReconcileError::from)?.items {
            catalogs.push(CatalogObservation {
                reference: ObjectReference {
                    name: catalog.name_any(),
                    namespace: catalog.namespace(),
                    kind: "CatalogSource".into(),
                    api_version: "operators.example.com/v1alpha1".into(),
                    uid: catalog.uid(),
                },
                healthy: catalog.is_healthy(),
            });
        }
    }
    Ok(catalogs)
}

async fn observed_plan(client: &kube::Client, reference: &ObjectReference) -> ReconcileResult<Option<PlanObservation>> {
    let namespace = reference.namespace.clone().unwrap_or_default();
    let api: Api<InstallPlan> = Api::namespaced(client.clone(), &namespace);
    let plan = api.get_opt(&reference.name).await.map_err(ReconcileError::from)?;
    Ok(plan.map(|plan| PlanObservation {
        phase: plan.status.clone().unwrap_or_default().phase,
        installed_condition: plan
            .status
            .and_then(|s| s.condition(crate::crd::installplan::INSTALLED_CONDITION).cloned()),
    }))
}

async fn reconcile(subscription: Arc<Subscription>, ctx: Arc<SubscriptionControllerContext>) -> ReconcileResult<Action> {
    let client = &ctx.client;
    let namespace = subscription.namespace().unwrap_or_else(|| "default".to_string());
    let name = subscription.name_any();

    log::debug!("reconciling Subscription {}/{}", namespace, name);

    let plan_ref = subscription
        .status
        .as_ref()
        .and_then(|s| s.install_plan_ref.clone());
    let plan = match &plan_ref {
        Some(reference) => observed_plan(client, reference).await?,
        None => None,
    };

    let catalogs = observed_catalogs(client, &namespace, &ctx.global_catalog_namespace).await?;
    for catalog in &catalogs {
        if let Some(catalog_namespace) = catalog.reference.namespace.as_deref() {
            crate::metrics::record_catalog_health(catalog_namespace, &catalog.reference.name, catalog.healthy);
        }
    }

    // Deprecation metadata is sourced from the resolver's catalog index, an
    // external collaborator this crate does not implement (§6); absent a
    // resolver integration, every subscription observes no deprecation.
    let deprecation: Option<DeprecationInfo> = None;

    let input = StageInput {
        install_plan_ref_present: plan_ref.is_some(),
        plan_found: plan.is_some(),
        plan,
        catalogs,
        deprecation,
    };

    let reconcile_ctx = ReconcileContext {
        clock: ctx.clock.clone(),
        global_catalog_namespace: ctx.global_catalog_namespace.clone(),
    };

    let chain = super::default_chain();
    let outcome = run_chain(&chain, &reconcile_ctx, &input, (*subscription).clone()).await?;

    let installed_csv = outcome
        .as_ref()
        .and_then(|next| next.status.as_ref())
        .and_then(|s| s.installed_csv.as_deref())
        .unwrap_or("");
    crate::metrics::record_subscription_info(
        &namespace,
        &name,
        installed_csv,
        &subscription.spec.channel,
        &subscription.spec.package,
        &format!("{:?}", subscription.spec.install_plan_approval),
    );

    if let Some(next) = outcome {
        if next.status.as_ref().map(|s| &s.conditions) != subscription.status.as_ref().map(|s| &s.conditions)
            || next.status.as_ref().map(|s| &s.catalog_health) != subscription.status.as_ref().map(|s| &s.catalog_health)
            || next.status.as_ref().map(|s| s.state) != subscription.status.as_ref().map(|s| s.state)
            || next.status.as_ref().and_then(|s| s.install_plan_ref.as_ref())
                != subscription.status.as_ref().and_then(|s| s.install_plan_ref.as_ref())
        {
            let api: Api<Subscription> = Api::namespaced(client.clone(), &namespace);
            let status = serde_json::to_value(next.status).map_err(|e| ReconcileError::Other(e.into()))?;
            let patch = serde_json::json!({ "status": status });
            api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
                .map_err(ReconcileError::from)?;
        }
    }

    Ok(Action::requeue(ctx.resync_interval))
}

fn error_policy(_subscription: Arc<Subscription>, error: &ReconcileError, ctx: Arc<SubscriptionControllerContext>) -> Action {
    log::error!("error reconciling Subscription: {}", error.to_condition_message());
    match error.classification() {
        ErrorClass::Transient => Action::requeue(ctx.rate_limiter.backoff(0)),
        ErrorClass::Policy => Action::requeue(ctx.resync_interval),
        ErrorClass::Fatal => {
            log::error!("fatal error reconciling Subscription, exiting");
            std::process::exit(1);
        }
    }
}

pub async fn start_controller(ctx: Arc<SubscriptionControllerContext>, namespace: Option<String>) {
    let api: Api<Subscription> = match namespace {
        Some(ns) => Api::namespaced(ctx.client.clone(), &ns),
        None => Api::all(ctx.client.clone()),
    };

    log::info!("starting Subscription controller");

    Controller::new(api, watcher::Config::default())
        .run(reconcile, error_policy, ctx.clone())
        .for_each(|res| async move {
            crate::metrics::record_reconciliation("subscription", if res.is_ok() { "ok" } else { "error" });
            match res {
                Ok(action) => log::debug!("subscription reconciliation completed: {:?}", action),
                Err(err) => log::error!("subscription reconciliation error: {:?}", err),
            }
        })
        .await;
}
