//! The Subscription custom resource (§3, §4.4).

use chrono::{DateTime, Utc};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::common::{ApprovalMode, ConditionStatus, ObjectReference};

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize)]
#[kube(
    group = "operators.example.com",
    version = "v1alpha1",
    kind = "Subscription",
    shortname = "sub",
    namespaced,
    schema = "disabled",
    status = "SubscriptionStatus",
    printcolumn = r#"{"name":"Package", "jsonPath":".spec.package", "type":"string"}"#,
    printcolumn = r#"{"name":"Channel", "jsonPath":".spec.channel", "type":"string"}"#,
    printcolumn = r#"{"name":"State", "jsonPath":".status.state", "type":"string"}"#
)]
pub struct SubscriptionSpec {
    pub package: String,
    #[serde(default)]
    pub channel: String,
    pub source: String,
    #[serde(rename = "sourceNamespace")]
    pub source_namespace: String,
    #[serde(rename = "installPlanApproval")]
    pub install_plan_approval: ApprovalMode,
    #[serde(default, rename = "startingCSV", skip_serializing_if = "Option::is_none")]
    pub starting_csv: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum SubscriptionState {
    #[default]
    None,
    UpgradeAvailable,
    UpgradePending,
    AtLatestKnown,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum SubscriptionConditionType {
    InstallPlanPending,
    InstallPlanFailed,
    InstallPlanMissing,
    CatalogSourcesUnhealthy,
    SubscriptionPackageDeprecated,
    SubscriptionChannelDeprecated,
    SubscriptionBundleDeprecated,
    SubscriptionDeprecated,
}

/// A Subscription condition: exactly one per `type_` exists at a time
/// (invariant 2 in §8); a new computation either overwrites the existing
/// entry of its type, leaves it untouched (reason/status unchanged), or
/// removes it.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SubscriptionCondition {
    #[serde(rename = "type")]
    pub type_: SubscriptionConditionType,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

/// One entry of `status.catalogHealth`. `catalog_source_ref.uid` is the
/// identity used for membership diffing; the list is kept sorted by
/// `(namespace, name)` (invariant 3 in §8).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SubscriptionCatalogHealth {
    #[serde(rename = "catalogSourceRef")]
    pub catalog_source_ref: ObjectReference,
    pub healthy: bool,
    #[serde(rename = "lastUpdated")]
    pub last_updated: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SubscriptionStatus {
    #[serde(default)]
    pub state: SubscriptionState,
    #[serde(default, rename = "currentCSV", skip_serializing_if = "Option::is_none")]
    pub current_csv: Option<String>,
    #[serde(default, rename = "installedCSV", skip_serializing_if = "Option::is_none")]
    pub installed_csv: Option<String>,
    #[serde(default, rename = "installPlanRef", skip_serializing_if = "Option::is_none")]
    pub install_plan_ref: Option<ObjectReference>,
    #[serde(default, rename = "catalogHealth")]
    pub catalog_health: Vec<SubscriptionCatalogHealth>,
    #[serde(default)]
    pub conditions: Vec<SubscriptionCondition>,
    #[serde(default, rename = "lastUpdated", skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Upserts a condition by type: replaces the existing entry of this type
    /// if present, else appends. Returns `true` if the stored set changed.
    pub fn set_condition(&mut self, condition: SubscriptionCondition) -> bool {
        let status = self.status.get_or_insert_with(SubscriptionStatus::default);
        upsert_condition(&mut status.conditions, condition)
    }

    /// Removes any condition of the given type. Returns `true` if something
    /// was removed.
    pub fn remove_condition(&mut self, type_: SubscriptionConditionType) -> bool {
        let Some(status) = self.status.as_mut() else {
            return false;
        };
        let before = status.conditions.len();
        status.conditions.retain(|c| c.type_ != type_);
        status.conditions.len() != before
    }

    pub fn condition(&self, type_: SubscriptionConditionType) -> Option<&SubscriptionCondition> {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.iter().find(|c| c.type_ == type_))
    }
}

/// Upserts `condition` into `conditions` by type. A condition is considered
/// semantically unchanged (and thus not touched) only when both `status` and
/// `reason` are identical to the stored entry; `message`/`last_transition_time`
/// changes alone do not count as a semantic difference for the purposes of
/// deciding whether to advance `lastTransitionTime` upstream, but the stored
/// entry is still replaced so the message stays current.
pub fn upsert_condition(
    conditions: &mut Vec<SubscriptionCondition>,
    condition: SubscriptionCondition,
) -> bool {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        let semantically_changed =
            existing.status != condition.status || existing.reason != condition.reason;
        *existing = condition;
        semantically_changed
    } else {
        conditions.push(condition);
        true
    }
}

pub const SUBSCRIPTION_KIND: &str = "Subscription";
