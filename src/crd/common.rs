//! Value types shared across the CSV, Subscription, InstallPlan and
//! CatalogSource CRDs (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Standard Kubernetes tri-state condition status.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum ConditionStatus {
    #[serde(rename = "True")]
    True,
    #[serde(rename = "False")]
    False,
    #[default]
    #[serde(rename = "Unknown")]
    Unknown,
}

impl ConditionStatus {
    pub fn from_bool(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// A minimal object reference: enough to locate the referenced resource and
/// to compare identity (`uid`) when diffing catalog-health membership.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ObjectReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub kind: String,
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// Whether an install-plan requires a human to approve it before installing.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum ApprovalMode {
    Automatic,
    Manual,
}

/// A descriptor for a custom-resource-definition a CSV owns or requires.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct CrdDescription {
    pub name: String,
    pub version: String,
    pub kind: String,
    #[serde(default, rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// A descriptor for an API-service registration a CSV owns or requires.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ApiServiceDescription {
    pub group: String,
    pub version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Outcome of evaluating a single declared prerequisite (§4.3). The three
/// variants are named to match the requirement-checker contract exactly:
/// `Present` (satisfied), `NotPresent` (absent), `Requirement` (this entry
/// merely records a declared-but-unevaluated requirement, used for
/// requirements the checker reports without a definitive presence check,
/// e.g. a permission rule).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum RequirementOutcome {
    Present,
    NotPresent,
    Requirement,
}

/// One entry of the requirement checker's output (§4.3).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct RequirementStatus {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub status: RequirementOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn now_rfc3339(clock: &dyn crate::clock::Clock) -> DateTime<Utc> {
    clock.now()
}
