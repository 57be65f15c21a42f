//! The ClusterServiceVersion (CSV) custom resource (§3).

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::DeploymentSpec;
use k8s_openapi::api::rbac::v1::PolicyRule;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::common::{ApiServiceDescription, CrdDescription, RequirementStatus};

/// A single deployment the install strategy must materialize.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct StrategyDeploymentSpec {
    pub name: String,
    pub spec: Box<DeploymentSpec>,
}

/// RBAC a service account needs, scoped either to the CSV's namespace
/// (`permissions`) or cluster-wide (`cluster_permissions`).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct StrategyDeploymentPermissions {
    #[serde(rename = "serviceAccountName")]
    pub service_account_name: String,
    pub rules: Vec<PolicyRule>,
}

/// The deployment-flavored install strategy body (§4.2's "InstallStrategy
/// (Deployment flavor)").
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct StrategyDetailsDeployment {
    #[serde(default)]
    pub deployments: Vec<StrategyDeploymentSpec>,
    #[serde(default)]
    pub permissions: Vec<StrategyDeploymentPermissions>,
    #[serde(default, rename = "clusterPermissions")]
    pub cluster_permissions: Vec<StrategyDeploymentPermissions>,
}

/// The install-strategy envelope embedded in a CSV: a named kind plus its
/// opaque (to everything but the matching executor) payload.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct NamedInstallStrategy {
    pub strategy: String,
    pub spec: StrategyDetailsDeployment,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct CustomResourceDefinitions {
    #[serde(default)]
    pub owned: Vec<CrdDescription>,
    #[serde(default)]
    pub required: Vec<CrdDescription>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ApiServiceDefinitions {
    #[serde(default)]
    pub owned: Vec<ApiServiceDescription>,
    #[serde(default)]
    pub required: Vec<ApiServiceDescription>,
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize)]
#[kube(
    group = "operators.example.com",
    version = "v1alpha1",
    kind = "ClusterServiceVersion",
    shortname = "csv",
    namespaced,
    schema = "disabled",
    status = "ClusterServiceVersionStatus",
    printcolumn = r#"{"name":"Phase", "jsonPath":".status.phase", "type":"string"}"#,
    printcolumn = r#"{"name":"Version", "jsonPath":".spec.version", "type":"string"}"#,
    printcolumn = r#"{"name":"Replaces", "jsonPath":".spec.replaces", "type":"string"}"#,
    printcolumn = r#"{"name":"Reason", "jsonPath":".status.reason", "type":"string"}"#
)]
pub struct ClusterServiceVersionSpec {
    #[serde(rename = "displayName")]
    pub display_name: String,
    pub version: semver::Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<String>,
    pub install: NamedInstallStrategy,
    #[serde(default, rename = "customresourcedefinitions")]
    pub customresourcedefinitions: CustomResourceDefinitions,
    #[serde(default, rename = "apiservicedefinitions")]
    pub apiservicedefinitions: ApiServiceDefinitions,
    #[serde(default, rename = "minKubeVersion", skip_serializing_if = "Option::is_none")]
    pub min_kube_version: Option<String>,
}

/// The CSV's phase, drawn from the state machine in §4.1. Exactly one is set
/// at any observed time (invariant 1 in §8).
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum CsvPhase {
    #[default]
    None,
    Pending,
    InstallReady,
    Installing,
    Succeeded,
    Failed,
    Replacing,
    Deleting,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum CsvReason {
    RequirementsUnknown,
    RequirementsNotMet,
    AllRequirementsMet,
    InvalidStrategy,
    InstallSucceeded,
    InstallCheckFailed,
    ComponentUnhealthy,
    NeedsCertRotation,
    BeingReplaced,
    OwnerConflict,
    Copied,
}

/// One append-only history entry. Unlike Subscription conditions (collapsed
/// to one per type), CSV conditions accumulate as an audit trail of every
/// phase the object has passed through.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct CsvCondition {
    pub phase: CsvPhase,
    pub reason: CsvReason,
    pub message: String,
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
    #[serde(rename = "lastUpdateTime")]
    pub last_update_time: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ClusterServiceVersionStatus {
    #[serde(default)]
    pub phase: CsvPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<CsvReason>,
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "lastUpdateTime", skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
    #[serde(default, rename = "lastTransitionTime", skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default, rename = "requirementStatus")]
    pub requirement_status: Vec<RequirementStatus>,
    #[serde(default)]
    pub conditions: Vec<CsvCondition>,
}

pub const CSV_KIND: &str = "ClusterServiceVersion";
pub const CSV_API_VERSION: &str = "operators.example.com/v1alpha1";
