//! The InstallPlan custom resource (§3).

use chrono::{DateTime, Utc};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::common::{ApprovalMode, ConditionStatus};

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize)]
#[kube(
    group = "operators.example.com",
    version = "v1alpha1",
    kind = "InstallPlan",
    shortname = "ip",
    namespaced,
    schema = "disabled",
    status = "InstallPlanStatus",
    printcolumn = r#"{"name":"Phase", "jsonPath":".status.phase", "type":"string"}"#
)]
pub struct InstallPlanSpec {
    #[serde(rename = "clusterServiceVersionNames")]
    pub cluster_service_version_names: Vec<String>,
    pub approval: ApprovalMode,
    #[serde(default)]
    pub approved: bool,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum InstallPlanPhase {
    #[default]
    None,
    Planning,
    RequiresApproval,
    Installing,
    Complete,
    Failed,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum StepStatus {
    Unknown,
    NotPresent,
    Present,
    Created,
    Waiting,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct StepResource {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub name: String,
    pub manifest: String,
}

/// One ordered step in the pre-resolved plan. Step order is preserved
/// (invariant in §3).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct InstallPlanStep {
    pub resolving: String,
    pub resource: StepResource,
    pub status: StepStatus,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct InstallPlanCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct InstallPlanStatus {
    #[serde(default)]
    pub phase: InstallPlanPhase,
    #[serde(default)]
    pub plan: Vec<InstallPlanStep>,
    #[serde(default)]
    pub conditions: Vec<InstallPlanCondition>,
}

impl InstallPlanStatus {
    pub fn condition(&self, type_: &str) -> Option<&InstallPlanCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

pub const INSTALLED_CONDITION: &str = "Installed";
