//! The deprecation reconciler (§4.4 step 3): surfaces package/channel/bundle
//! deprecation metadata as up to three conditions plus a roll-up.

use async_trait::async_trait;

use crate::crd::subscription::{SubscriptionCondition, SubscriptionConditionType};
use crate::crd::{ConditionStatus, Subscription};

use super::{touch_last_updated, ReconcileContext, StageInput, SubscriptionReconciler};

pub struct DeprecationReconciler;

#[async_trait]
impl SubscriptionReconciler for DeprecationReconciler {
    async fn reconcile(
        &self,
        ctx: &ReconcileContext,
        input: &StageInput,
        mut subscription: Subscription,
    ) -> (Option<Subscription>, Option<crate::error::ReconcileError>) {
        let now = ctx.clock.now();
        let mut changed = false;
        let channel_suppressed = subscription.spec.channel.is_empty();

        let deprecation = input.deprecation.clone().unwrap_or_default();

        changed |= apply_or_clear(
            &mut subscription,
            SubscriptionConditionType::SubscriptionPackageDeprecated,
            deprecation.package_message.as_deref(),
            now,
        );
        changed |= apply_or_clear(
            &mut subscription,
            SubscriptionConditionType::SubscriptionChannelDeprecated,
            if channel_suppressed { None } else { deprecation.channel_message.as_deref() },
            now,
        );
        changed |= apply_or_clear(
            &mut subscription,
            SubscriptionConditionType::SubscriptionBundleDeprecated,
            deprecation.bundle_message.as_deref(),
            now,
        );

        let messages: Vec<&str> = [
            deprecation.package_message.as_deref(),
            if channel_suppressed { None } else { deprecation.channel_message.as_deref() },
            deprecation.bundle_message.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect();

        let rollup_message = if messages.is_empty() { None } else { Some(messages.join("; ")) };
        changed |= apply_or_clear(
            &mut subscription,
            SubscriptionConditionType::SubscriptionDeprecated,
            rollup_message.as_deref(),
            now,
        );

        if changed {
            touch_last_updated(&mut subscription, now);
        }

        (Some(subscription), None)
    }
}

fn apply_or_clear(
    subscription: &mut Subscription,
    condition_type: SubscriptionConditionType,
    message: Option<&str>,
    now: chrono::DateTime<chrono::Utc>,
) -> bool {
    match message {
        Some(message) => subscription.set_condition(SubscriptionCondition {
            type_: condition_type,
            status: ConditionStatus::True,
            reason: "Deprecated".into(),
            message: message.to_string(),
            last_transition_time: now,
        }),
        None => subscription.remove_condition(condition_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::crd::subscription::SubscriptionSpec;
    use crate::crd::subscription::SubscriptionStatus;
    use crate::crd::ApprovalMode;
    use crate::reconcile::subscription::DeprecationInfo;
    use chrono::{TimeZone, Utc};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::sync::Arc;

    fn subscription(channel: &str) -> Subscription {
        Subscription {
            metadata: ObjectMeta {
                name: Some("my-sub".into()),
                namespace: Some("operators".into()),
                ..Default::default()
            },
            spec: SubscriptionSpec {
                package: "etcd".into(),
                channel: channel.into(),
                source: "cs-0".into(),
                source_namespace: "ns".into(),
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
    async fn package_deprecation_produces_rollup_message() {
        let input = StageInput {
            install_plan_ref_present: false,
            plan_found: false,
            plan: None,
            catalogs: Vec::new(),
            deprecation: Some(DeprecationInfo {
                package_message: Some("package etcd is deprecated".into()),
                channel_message: None,
                bundle_message: None,
            }),
        };
        let (output, _) = DeprecationReconciler.reconcile(&ctx(), &input, subscription("stable")).await;
        let status = output.unwrap().status.unwrap();
        let rollup = status
            .conditions
            .iter()
            .find(|c| c.type_ == SubscriptionConditionType::SubscriptionDeprecated)
            .unwrap();
        assert_eq!(rollup.message, "package etcd is deprecated");
    }

    #[tokio::test]
    async fn empty_channel_suppresses_channel_deprecation() {
        let input = StageInput {
            install_plan_ref_present: false,
            plan_found: false,
            plan: None,
            catalogs: Vec::new(),
            deprecation: Some(DeprecationInfo {
                package_message: None,
                channel_message: Some("channel stable is deprecated".into()),
                bundle_message: None,
            }),
        };
        let (output, _) = DeprecationReconciler.reconcile(&ctx(), &input, subscription("")).await;
        let status = output.unwrap().status.unwrap();
        assert!(status
            .conditions
            .iter()
            .all(|c| c.type_ != SubscriptionConditionType::SubscriptionChannelDeprecated));
    }

    #[tokio::test]
    async fn multiple_messages_join_with_semicolon() {
        let input = StageInput {
            install_plan_ref_present: false,
            plan_found: false,
            plan: None,
            catalogs: Vec::new(),
            deprecation: Some(DeprecationInfo {
                package_message: Some("package deprecated".into()),
                channel_message: Some("channel deprecated".into()),
                bundle_message: None,
            }),
        };
        let (output, _) = DeprecationReconciler.reconcile(&ctx(), &input, subscription("stable")).await;
        let status = output.unwrap().status.unwrap();
        let rollup = status
            .conditions
            .iter()
            .find(|c| c.type_ == SubscriptionConditionType::SubscriptionDeprecated)
            .unwrap();
        assert_eq!(rollup.message, "package deprecated; channel deprecated");
    }

    #[tokio::test]
    async fn metadata_going_away_removes_conditions() {
        let mut sub = subscription("stable");
        sub.set_condition(SubscriptionCondition {
            type_: SubscriptionConditionType::SubscriptionPackageDeprecated,
            status: ConditionStatus::True,
            reason: "Deprecated".into(),
            message: "package etcd is deprecated".into(),
            last_transition_time: ctx().clock.now(),
        });
        let input = StageInput {
            install_plan_ref_present: false,
            plan_found: false,
            plan: None,
            catalogs: Vec::new(),
            deprecation: None,
        };
        let (output, _) = DeprecationReconciler.reconcile(&ctx(), &input, sub).await;
        assert!(output.unwrap().status.unwrap().conditions.is_empty());
    }
}
