//! The CatalogSource custom resource (§3).

use chrono::{DateTime, Utc};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum SourceType {
    ConfigMap,
    Grpc,
    InternalCatalog,
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize)]
#[kube(
    group = "operators.example.com",
    version = "v1alpha1",
    kind = "CatalogSource",
    shortname = "catsrc",
    namespaced,
    schema = "disabled",
    status = "CatalogSourceStatus",
    printcolumn = r#"{"name":"Type", "jsonPath":".spec.sourceType", "type":"string"}"#
)]
pub struct CatalogSourceSpec {
    #[serde(rename = "sourceType")]
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, rename = "configMap", skip_serializing_if = "Option::is_none")]
    pub config_map: Option<String>,
}

/// Why a CatalogSource's own status reports unhealthy, distinct from the
/// "is the registry server responding" probe the catalog-health reconciler
/// also consults (§4.4).
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum CatalogSourceStatusReason {
    Connecting,
    ConnectionEstablished,
    CatalogSourceSpecInvalidError,
    Succeeded,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct RegistryServiceStatus {
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CatalogSourceStatus {
    #[serde(default, rename = "lastSync", skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<CatalogSourceStatusReason>,
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "registryServiceStatus", skip_serializing_if = "Option::is_none")]
    pub registry_service_status: Option<RegistryServiceStatus>,
}

impl CatalogSource {
    /// The registry probe used by the catalog-health reconciler: unhealthy
    /// when the spec is flagged invalid, or when the registry server probe
    /// itself reports unhealthy.
    pub fn is_healthy(&self) -> bool {
        let Some(status) = &self.status else {
            return false;
        };
        if matches!(
            status.reason,
            Some(CatalogSourceStatusReason::CatalogSourceSpecInvalidError)
        ) {
            return false;
        }
        status
            .registry_service_status
            .as_ref()
            .map(|s| s.healthy)
            .unwrap_or(false)
    }
}
