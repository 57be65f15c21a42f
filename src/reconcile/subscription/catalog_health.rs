//! The catalog-health reconciler (§4.4 step 2): rolls the health of every
//! catalog visible to a subscription's namespace up into one
//! `CatalogSourcesUnhealthy` condition and a sorted `status.catalogHealth`
//! list.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::crd::subscription::{SubscriptionCatalogHealth, SubscriptionCondition, SubscriptionConditionType};
use crate::crd::{ConditionStatus, Subscription};

use super::{touch_last_updated, CatalogObservation, ReconcileContext, StageInput, SubscriptionReconciler};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChangeKind {
    Added,
    Deleted,
    Updated,
    None,
}

impl ChangeKind {
    fn reason(self) -> &'static str {
        match self {
            ChangeKind::Added => "CatalogSourcesAdded",
            ChangeKind::Deleted => "CatalogSourcesDeleted",
            ChangeKind::Updated => "CatalogSourcesUpdated",
            ChangeKind::None => "UnhealthyCatalogSourceFound",
        }
    }
}

fn change_kind(previous: &[SubscriptionCatalogHealth], current: &[CatalogObservation]) -> ChangeKind {
    let previous_uids: HashSet<&str> = previous
        .iter()
        .filter_map(|p| p.catalog_source_ref.uid.as_deref())
        .collect();
    let current_uids: HashSet<&str> = current.iter().filter_map(|c| c.reference.uid.as_deref()).collect();

    if current_uids.difference(&previous_uids).next().is_some() {
        return ChangeKind::Added;
    }
    if previous_uids.difference(&current_uids).next().is_some() {
        return ChangeKind::Deleted;
    }
    let health_changed = current.iter().any(|c| {
        previous
            .iter()
            .find(|p| p.catalog_source_ref.uid.as_deref() == c.reference.uid.as_deref())
            .map(|p| p.healthy != c.healthy)
            .unwrap_or(true)
    });
    if health_changed {
        ChangeKind::Updated
    } else {
        ChangeKind::None
    }
}

pub struct CatalogHealthReconciler;

#[async_trait]
impl SubscriptionReconciler for CatalogHealthReconciler {
    async fn reconcile(
        &self,
        ctx: &ReconcileContext,
        input: &StageInput,
        mut subscription: Subscription,
    ) -> (Option<Subscription>, Option<crate::error::ReconcileError>) {
        let now = ctx.clock.now();

        let mut catalogs = input.catalogs.clone();
        catalogs.sort_by(|a, b| {
            (a.reference.namespace.as_deref().unwrap_or(""), a.reference.name.as_str())
                .cmp(&(b.reference.namespace.as_deref().unwrap_or(""), b.reference.name.as_str()))
        });

        let previous_health = subscription
            .status
            .as_ref()
            .map(|s| s.catalog_health.clone())
            .unwrap_or_default();
        let kind = change_kind(&previous_health, &catalogs);
        let membership_changed = !matches!(kind, ChangeKind::None) || previous_health.len() != catalogs.len();

        let new_health: Vec<SubscriptionCatalogHealth> = catalogs
            .iter()
            .map(|c| SubscriptionCatalogHealth {
                catalog_source_ref: c.reference.clone(),
                healthy: c.healthy,
                last_updated: now,
            })
            .collect();

        let targeted = (
            subscription.spec.source_namespace.clone(),
            subscription.spec.source.clone(),
        );
        let targeted_present = catalogs
            .iter()
            .any(|c| c.reference.namespace.as_deref() == Some(targeted.0.as_str()) && c.reference.name == targeted.1);
        let targeted_unhealthy = catalogs.iter().any(|c| {
            !c.healthy && c.reference.namespace.as_deref() == Some(targeted.0.as_str()) && c.reference.name == targeted.1
        });
        let any_unhealthy = catalogs.iter().any(|c| !c.healthy);

        let (status, reason, message) = if catalogs.is_empty() {
            (
                ConditionStatus::True,
                "NoCatalogSourcesFound".to_string(),
                "no catalogsources are visible to this subscription".to_string(),
            )
        } else if !targeted_present {
            (
                ConditionStatus::True,
                format!("targeted catalogsource {}/{} missing", targeted.0, targeted.1),
                "the catalogsource this subscription targets is not visible in its namespace".to_string(),
            )
        } else if any_unhealthy {
            let message = if targeted_unhealthy {
                format!("targeted catalogsource {}/{} unhealthy", targeted.0, targeted.1)
            } else {
                let names = catalogs
                    .iter()
                    .filter(|c| !c.healthy)
                    .map(|c| format!("{}/{}", c.reference.namespace.as_deref().unwrap_or(""), c.reference.name))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("unhealthy catalogsources: {names}")
            };
            (ConditionStatus::True, kind.reason().to_string(), message)
        } else {
            (
                ConditionStatus::False,
                "AllCatalogSourcesHealthy".to_string(),
                "all catalogsources healthy".to_string(),
            )
        };

        if let Some(mutable_status) = subscription.status.as_mut() {
            mutable_status.catalog_health = new_health;
        }

        let condition_changed = subscription.set_condition(SubscriptionCondition {
            type_: SubscriptionConditionType::CatalogSourcesUnhealthy,
            status,
            reason,
            message,
            last_transition_time: now,
        });

        if condition_changed || membership_changed {
            touch_last_updated(&mut subscription, now);
        }

        (Some(subscription), None)
    }
}
