//! The install-plan reconciler (§4.4 step 1): maps the referenced
//! `InstallPlan`'s phase onto at most one of `InstallPlanPending` /
//! `InstallPlanFailed` / `InstallPlanMissing`.

use async_trait::async_trait;

use crate::crd::installplan::InstallPlanPhase;
use crate::crd::subscription::{SubscriptionCondition, SubscriptionConditionType, SubscriptionState};
use crate::crd::{ConditionStatus, Subscription};

use super::{touch_last_updated, PlanObservation, ReconcileContext, StageInput, SubscriptionReconciler};

pub struct InstallPlanReconciler;

fn pending_reason(phase: InstallPlanPhase) -> &'static str {
    match phase {
        InstallPlanPhase::None => "InstallPlanNotYetReconciled",
        InstallPlanPhase::Planning => "Planning",
        InstallPlanPhase::Installing => "Installing",
        InstallPlanPhase::RequiresApproval => "RequiresApproval",
        InstallPlanPhase::Complete | InstallPlanPhase::Failed => unreachable!("handled separately"),
    }
}

fn failed_reason(observation: &PlanObservation) -> String {
    observation
        .installed_condition
        .as_ref()
        .filter(|c| c.status == ConditionStatus::False)
        .and_then(|c| c.reason.clone())
        .unwrap_or_else(|| "InstallPlanFailed".to_string())
}

#[async_trait]
impl SubscriptionReconciler for InstallPlanReconciler {
    async fn reconcile(
        &self,
        ctx: &ReconcileContext,
        input: &StageInput,
        mut subscription: Subscription,
    ) -> (Option<Subscription>, Option<crate::error::ReconcileError>) {
        let now = ctx.clock.now();

        if !input.install_plan_ref_present {
            let mut changed = subscription.remove_condition(SubscriptionConditionType::InstallPlanPending);
            changed |= subscription.remove_condition(SubscriptionConditionType::InstallPlanFailed);
            changed |= subscription.remove_condition(SubscriptionConditionType::InstallPlanMissing);
            if changed {
                touch_last_updated(&mut subscription, now);
            }
            return (Some(subscription), None);
        }

        if !input.plan_found {
            let state = subscription.status.as_ref().map(|s| s.state).unwrap_or_default();
            if state == SubscriptionState::UpgradePending {
                if let Some(status) = subscription.status.as_mut() {
                    status.install_plan_ref = None;
                    status.installed_csv = None;
                    status.current_csv = None;
                    status.state = SubscriptionState::None;
                    status.last_updated = Some(now);
                }
                return (Some(subscription), None);
            }
            let changed = subscription.set_condition(SubscriptionCondition {
                type_: SubscriptionConditionType::InstallPlanMissing,
                status: ConditionStatus::True,
                reason: "ReferencedInstallPlanNotFound".into(),
                message: "the referenced install plan no longer exists".into(),
                last_transition_time: now,
            });
            if changed {
                touch_last_updated(&mut subscription, now);
            }
            return (Some(subscription), None);
        }

        let Some(plan) = &input.plan else {
            return (Some(subscription), None);
        };

        let mut changed = false;
        match plan.phase {
            InstallPlanPhase::Complete => {
                changed |= subscription.remove_condition(SubscriptionConditionType::InstallPlanPending);
                changed |= subscription.remove_condition(SubscriptionConditionType::InstallPlanFailed);
                changed |= subscription.remove_condition(SubscriptionConditionType::InstallPlanMissing);
            }
            InstallPlanPhase::Failed => {
                changed |= subscription.remove_condition(SubscriptionConditionType::InstallPlanPending);
                changed |= subscription.set_condition(SubscriptionCondition {
                    type_: SubscriptionConditionType::InstallPlanFailed,
                    status: ConditionStatus::True,
                    reason: failed_reason(plan),
                    message: "install plan failed".into(),
                    last_transition_time: now,
                });
            }
            phase => {
                changed |= subscription.set_condition(SubscriptionCondition {
                    type_: SubscriptionConditionType::InstallPlanPending,
                    status: ConditionStatus::True,
                    reason: pending_reason(phase).to_string(),
                    message: "install plan has not completed".into(),
                    last_transition_time: now,
                });
            }
        }
        if changed {
            touch_last_updated(&mut subscription, now);
        }
        (Some(subscription), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::crd::subscription::{SubscriptionSpec, SubscriptionStatus};
    use crate::crd::ApprovalMode;
    use chrono::{TimeZone, Utc};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::sync::Arc;

    fn subscription_with_state(state: SubscriptionState) -> Subscription {
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
            status: Some(SubscriptionStatus {
                state,
                ..Default::default()
            }),
        }
    }

    fn ctx() -> ReconcileContext {
        ReconcileContext {
            clock: Arc::new(MockClock::at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())),
            global_catalog_namespace: "olm-global".into(),
        }
    }

    #[tokio::test]
    async fn no_ref_clears_all_plan_conditions() {
        let mut sub = subscription_with_state(SubscriptionState::None);
        sub.set_condition(SubscriptionCondition {
            type_: SubscriptionConditionType::InstallPlanPending,
            status: ConditionStatus::True,
            reason: "Planning".into(),
            message: String::new(),
            last_transition_time: ctx().clock.now(),
        });
        let input = StageInput {
            install_plan_ref_present: false,
            plan_found: false,
            plan: None,
            catalogs: Vec::new(),
            deprecation: None,
        };
        let (output, error) = InstallPlanReconciler.reconcile(&ctx(), &input, sub).await;
        assert!(error.is_none());
        assert!(output.unwrap().status.unwrap().conditions.is_empty());
    }

    #[tokio::test]
    async fn missing_plan_while_upgrade_pending_clears_refs() {
        let mut sub = subscription_with_state(SubscriptionState::UpgradePending);
        sub.status.as_mut().unwrap().installed_csv = Some("etcd.v1.0.0".into());
        let input = StageInput {
            install_plan_ref_present: true,
            plan_found: false,
            plan: None,
            catalogs: Vec::new(),
            deprecation: None,
        };
        let (output, _) = InstallPlanReconciler.reconcile(&ctx(), &input, sub).await;
        let status = output.unwrap().status.unwrap();
        assert_eq!(status.state, SubscriptionState::None);
        assert!(status.installed_csv.is_none());
        assert!(status.install_plan_ref.is_none());
        assert!(status.last_updated.is_some());
    }

    #[tokio::test]
    async fn missing_plan_outside_upgrade_pending_sets_missing_condition() {
        let sub = subscription_with_state(SubscriptionState::AtLatestKnown);
        let input = StageInput {
            install_plan_ref_present: true,
            plan_found: false,
            plan: None,
            catalogs: Vec::new(),
            deprecation: None,
        };
        let (output, _) = InstallPlanReconciler.reconcile(&ctx(), &input, sub).await;
        let status = output.unwrap().status.unwrap();
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].type_, SubscriptionConditionType::InstallPlanMissing);
    }

    #[tokio::test]
    async fn complete_plan_removes_all_plan_conditions() {
        let mut sub = subscription_with_state(SubscriptionState::UpgradePending);
        sub.set_condition(SubscriptionCondition {
            type_: SubscriptionConditionType::InstallPlanPending,
            status: ConditionStatus::True,
            reason: "Installing".into(),
            message: String::new(),
            last_transition_time: ctx().clock.now(),
        });
        let input = StageInput {
            install_plan_ref_present: true,
            plan_found: true,
            plan: Some(PlanObservation {
                phase: InstallPlanPhase::Complete,
                installed_condition: None,
            }),
            catalogs: Vec::new(),
            deprecation: None,
        };
        let (output, _) = InstallPlanReconciler.reconcile(&ctx(), &input, sub).await;
        assert!(output.unwrap().status.unwrap().conditions.is_empty());
    }
}
