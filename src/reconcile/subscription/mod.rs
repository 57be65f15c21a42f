//! The Subscription reconciler chain (§4.4): an ordered pipeline of
//! independent reconcilers, each consuming the output of the previous, with
//! short-circuit on error or a nil output — the dynamic-dispatch design
//! note's "list of objects satisfying a single-method interface
//! `reconcile(context, input) -> (output, error)`", generalizing the
//! teacher's `WebhookHandler` trait-object chain from fan-out-to-all into an
//! ordered fold.

pub mod catalog_health;
pub mod deprecation;
pub mod dispatch;
pub mod install_plan;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::crd::installplan::{InstallPlanCondition, InstallPlanPhase};
use crate::crd::subscription::Subscription;
use crate::crd::ObjectReference;
use crate::error::ReconcileError;

/// One catalog's observed health, pre-filtered to "this subscription's
/// namespace plus the global catalog namespace" and pre-sorted by
/// `(namespace, name)` by the caller (§4.4, invariant 3 in §8).
#[derive(Clone, Debug)]
pub struct CatalogObservation {
    pub reference: ObjectReference,
    pub healthy: bool,
}

/// The referenced install plan's observed phase and, when Failed, its
/// `Installed` condition (used to project a more specific failure reason).
#[derive(Clone, Debug)]
pub struct PlanObservation {
    pub phase: InstallPlanPhase,
    pub installed_condition: Option<InstallPlanCondition>,
}

/// Deprecation metadata the catalog's resolver exposes for the subscription's
/// matching package/channel/bundle, when present.
#[derive(Clone, Debug, Default)]
pub struct DeprecationInfo {
    pub package_message: Option<String>,
    pub channel_message: Option<String>,
    pub bundle_message: Option<String>,
}

/// Everything the chain's stages read from the cluster, fetched once by the
/// dispatcher before running the chain.
#[derive(Clone, Debug)]
pub struct StageInput {
    pub install_plan_ref_present: bool,
    pub plan_found: bool,
    pub plan: Option<PlanObservation>,
    pub catalogs: Vec<CatalogObservation>,
    pub deprecation: Option<DeprecationInfo>,
}

pub struct ReconcileContext {
    pub clock: Arc<dyn Clock>,
    pub global_catalog_namespace: String,
}

pub(crate) fn touch_last_updated(subscription: &mut Subscription, now: DateTime<Utc>) {
    if let Some(status) = subscription.status.as_mut() {
        status.last_updated = Some(now);
    }
}

#[async_trait]
pub trait SubscriptionReconciler: Send + Sync {
    /// Returns `(Some(next), None)` to pass `next` to the following stage,
    /// `(None, None)` to short-circuit without error (a "nil output"), or
    /// `(_, Some(err))` to short-circuit with an error.
    async fn reconcile(
        &self,
        ctx: &ReconcileContext,
        input: &StageInput,
        subscription: Subscription,
    ) -> (Option<Subscription>, Option<ReconcileError>);
}

/// Runs `chain` in order, feeding each stage's output to the next.
pub async fn run_chain(
    chain: &[Box<dyn SubscriptionReconciler>],
    ctx: &ReconcileContext,
    input: &StageInput,
    subscription: Subscription,
) -> Result<Option<Subscription>, ReconcileError> {
    let mut current = subscription;
    for reconciler in chain {
        let (output, error) = reconciler.reconcile(ctx, input, current.clone()).await;
        if let Some(err) = error {
            return Err(err);
        }
        match output {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// The default chain: install-plan, then catalog-health, then deprecation.
pub fn default_chain() -> Vec<Box<dyn SubscriptionReconciler>> {
    vec![
        Box::new(install_plan::InstallPlanReconciler),
        Box::new(catalog_health::CatalogHealthReconciler),
        Box::new(deprecation::DeprecationReconciler),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::crd::subscription::{SubscriptionSpec, SubscriptionStatus};
    use crate::crd::{ApprovalMode, ConditionStatus};
    use chrono::{TimeZone, Utc};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn subscription() -> Subscription {
        Subscription {
            metadata: ObjectMeta {
                name: Some("my-sub".into()),
                namespace: Some("operators".into()),
                ..Default::default()
            },
            spec: SubscriptionSpec {
                package: "etcd".into(),
                channel: "stable".into(),
                source: "community".into(),
                source_namespace: "olm-catalog".into(),
                install_plan_approval: ApprovalMode::Automatic,
                starting_csv: None,
            },
            status: Some(SubscriptionStatus::default()),
        }
    }

    fn ctx() -> ReconcileContext {
        ReconcileContext {
            clock: Arc::new(MockClock::at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())),
            global_catalog_namespace: "olm-global".into(),
        }
    }

    #[tokio::test]
    async fn chain_short_circuits_on_nil_output() {
        struct AlwaysNil;
        #[async_trait]
        impl SubscriptionReconciler for AlwaysNil {
            async fn reconcile(
                &self,
                _ctx: &ReconcileContext,
                _input: &StageInput,
                _subscription: Subscription,
            ) -> (Option<Subscription>, Option<ReconcileError>) {
                (None, None)
            }
        }
        struct NeverRuns;
        #[async_trait]
        impl SubscriptionReconciler for NeverRuns {
            async fn reconcile(
                &self,
                _ctx: &ReconcileContext,
                _input: &StageInput,
                _subscription: Subscription,
            ) -> (Option<Subscription>, Option<ReconcileError>) {
                panic!("should not run after a nil output");
            }
        }
        let chain: Vec<Box<dyn SubscriptionReconciler>> = vec![Box::new(AlwaysNil), Box::new(NeverRuns)];
        let input = StageInput {
            install_plan_ref_present: false,
            plan_found: false,
            plan: None,
            catalogs: Vec::new(),
            deprecation: None,
        };
        let result = run_chain(&chain, &ctx(), &input, subscription()).await.unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn no_status_conditions_by_default() {
        assert!(subscription().status.unwrap().conditions.is_empty());
        assert!(matches!(ConditionStatus::default(), ConditionStatus::Unknown));
    }
}
