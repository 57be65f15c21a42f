//! The install-strategy executor (§4.2): materializes a CSV's deployment
//! flavor install strategy as ServiceAccounts, Roles/RoleBindings and
//! Deployments, and decides whether the result is healthy.
//!
//! Like the requirement checker, the "is this healthy" predicate
//! (`install_check`) is pure over an observed snapshot so the CSV state
//! machine's Installing -> Succeeded / Installing -> Failed edge is
//! testable without a cluster. The `ensure_*` functions perform the actual
//! server-side-apply calls and are the only async, cluster-touching part of
//! this module.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{Api, Patch, PatchParams};
use sha2::{Digest, Sha256};

use crate::crd::csv::{StrategyDeploymentPermissions, StrategyDeploymentSpec, StrategyDetailsDeployment};
use crate::error::{ReconcileError, ReconcileResult};

const FIELD_MANAGER: &str = "lifecycle-core";

/// A hash of a deployment's pod template, stored as a label on the
/// deployment (`olm.example.com/pod-template-hash`) so later reconciles can
/// detect drift without diffing the whole spec.
pub fn pod_template_hash(spec: &DeploymentSpec) -> String {
    let encoded = serde_json::to_vec(&spec.template).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    format!("{:x}", hasher.finalize())[..16].to_string()
}

fn owner_reference(csv_name: &str, csv_uid: &str) -> OwnerReference {
    OwnerReference {
        api_version: crate::crd::csv::CSV_API_VERSION.to_string(),
        kind: crate::crd::csv::CSV_KIND.to_string(),
        name: csv_name.to_string(),
        uid: csv_uid.to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

pub async fn ensure_service_account(
    client: &kube::Client,
    namespace: &str,
    name: &str,
    csv_name: &str,
    csv_uid: &str,
) -> ReconcileResult<ServiceAccount> {
    let api: Api<ServiceAccount> = Api::namespaced(client.clone(), namespace);
    let sa = ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            owner_references: Some(vec![owner_reference(csv_name, csv_uid)]),
            ..Default::default()
        },
        ..Default::default()
    };
    let applied = api
        .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&sa))
        .await
        .map_err(ReconcileError::from)?;
    crate::metrics::record_install_action("service_account");
    Ok(applied)
}

/// Applies one permission entry as a `Role` + `RoleBinding` pair (namespaced
/// permissions) or is skipped by the caller for `clusterPermissions`, which
/// use `ClusterRole`/`ClusterRoleBinding` instead — the spec scopes only
/// namespaced Role/RoleBinding management to this executor (§4.2 Non-goals).
pub async fn ensure_role_and_role_binding(
    client: &kube::Client,
    namespace: &str,
    csv_name: &str,
    csv_uid: &str,
    permission: &StrategyDeploymentPermissions,
) -> ReconcileResult<()> {
    let role_name = format!("{csv_name}-{}", permission.service_account_name);
    let role_api: Api<Role> = Api::namespaced(client.clone(), namespace);
    let role = Role {
        metadata: ObjectMeta {
            name: Some(role_name.clone()),
            namespace: Some(namespace.to_string()),
            owner_references: Some(vec![owner_reference(csv_name, csv_uid)]),
            ..Default::default()
        },
        rules: Some(permission.rules.clone()),
    };
    role_api
        .patch(&role_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&role))
        .await
        .map_err(ReconcileError::from)?;
    crate::metrics::record_install_action("role");

    let binding_api: Api<RoleBinding> = Api::namespaced(client.clone(), namespace);
    let binding = RoleBinding {
        metadata: ObjectMeta {
            name: Some(role_name.clone()),
            namespace: Some(namespace.to_string()),
            owner_references: Some(vec![owner_reference(csv_name, csv_uid)]),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: role_name.clone(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: permission.service_account_name.clone(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    };
    binding_api
        .patch(&role_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&binding))
        .await
        .map_err(ReconcileError::from)?;
    crate::metrics::record_install_action("role_binding");

    Ok(())
}

/// Outcome of materializing one deployment: whether it needed an update and
/// who owned the prior version, for the "takes ownership from a predecessor
/// named in `replaces`" rule (§4.2).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    Unchanged,
    Updated,
    /// The existing deployment is owned by a CSV that isn't this one and
    /// isn't the predecessor this CSV is allowed to take ownership from.
    OwnerConflict { owning_csv: String },
}

pub async fn ensure_deployment(
    client: &kube::Client,
    namespace: &str,
    csv_name: &str,
    csv_uid: &str,
    replaces: Option<&str>,
    existing_owner: Option<(&str, &str)>, // (kind, name) of current controller owner, if any
    spec: &StrategyDeploymentSpec,
) -> ReconcileResult<EnsureOutcome> {
    if let Some((kind, name)) = existing_owner {
        let is_self = kind == crate::crd::csv::CSV_KIND && name == csv_name;
        let is_tolerated_predecessor = replaces == Some(name);
        if !is_self && !is_tolerated_predecessor {
            return Ok(EnsureOutcome::OwnerConflict {
                owning_csv: name.to_string(),
            });
        }
    }

    let hash = pod_template_hash(&spec.spec);
    let mut labels = BTreeMap::new();
    labels.insert("olm.example.com/pod-template-hash".to_string(), hash);
    labels.insert("olm.example.com/owner".to_string(), csv_name.to_string());

    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let deployment = Deployment {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            owner_references: Some(vec![owner_reference(csv_name, csv_uid)]),
            ..Default::default()
        },
        spec: Some((*spec.spec).clone()),
        ..Default::default()
    };

    let before = api.get_opt(&spec.name).await.map_err(ReconcileError::from)?;
    api.patch(
        &spec.name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&deployment),
    )
    .await
    .map_err(ReconcileError::from)?;
    crate::metrics::record_install_action("deployment");

    Ok(match before {
        None => EnsureOutcome::Created,
        Some(previous) => {
            let previous_hash = previous
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get("olm.example.com/pod-template-hash"))
                .cloned();
            if previous_hash.as_deref() == Some(pod_template_hash(&spec.spec).as_str()) {
                EnsureOutcome::Unchanged
            } else {
                EnsureOutcome::Updated
            }
        }
    })
}

/// What the executor observed about one deployment, fed into the pure
/// `install_check` predicate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeploymentObservation {
    pub name: String,
    pub exists: bool,
    pub owned_by_csv: bool,
    pub available_replicas: i32,
    pub desired_replicas: i32,
    pub pod_template_hash_matches: bool,
}

/// Whether an error encountered while applying the install strategy should
/// be retried (transient) or fails the CSV outright (unrecoverable), per
/// §4.2's classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstallErrorClass {
    Transient,
    Unrecoverable,
}

pub fn classify_apply_error(error: &kube::Error) -> InstallErrorClass {
    match error {
        kube::Error::Api(resp) if resp.code == 422 || resp.code == 403 => {
            InstallErrorClass::Unrecoverable
        }
        _ => InstallErrorClass::Transient,
    }
}

/// The deployment-flavor install-check predicate: every declared deployment
/// must exist, be owned by this CSV, have its desired pod template applied,
/// and have `availableReplicas == replicas`.
pub fn install_check(observations: &[DeploymentObservation]) -> (bool, Vec<String>) {
    let mut problems = Vec::new();
    for observation in observations {
        if !observation.exists {
            problems.push(format!("deployment {} does not exist", observation.name));
            continue;
        }
        if !observation.owned_by_csv {
            problems.push(format!("deployment {} is not owned by this CSV", observation.name));
        }
        if !observation.pod_template_hash_matches {
            problems.push(format!(
                "deployment {} has not rolled out the desired pod template",
                observation.name
            ));
        }
        if observation.available_replicas < observation.desired_replicas {
            problems.push(format!(
                "deployment {} has {}/{} replicas available",
                observation.name, observation.available_replicas, observation.desired_replicas
            ));
        }
    }
    (problems.is_empty(), problems)
}

/// Computes the `PolicyRule` coverage used by the requirement checker's
/// permission entries: `required` is covered if some `existing` rule's
/// verbs/resources/apiGroups are a superset.
pub fn rule_is_covered(required: &PolicyRule, existing: &[PolicyRule]) -> bool {
    existing.iter().any(|candidate| {
        is_subset(&required.verbs, &candidate.verbs)
            && is_subset(
                required.api_groups.as_deref().unwrap_or(&[]),
                candidate.api_groups.as_deref().unwrap_or(&[]),
            )
            && is_subset(
                required.resources.as_deref().unwrap_or(&[]),
                candidate.resources.as_deref().unwrap_or(&[]),
            )
    })
}

fn is_subset(needle: &[String], haystack: &[String]) -> bool {
    let wildcard = haystack.iter().any(|item| item == "*");
    wildcard || needle.iter().all(|item| haystack.contains(item) || item == "*")
}

/// True once all deployments, roles/bindings and service accounts named by
/// the strategy have been applied without error — used to decide the
/// Installing -> Installing self-loop vs progressing toward a terminal
/// phase.
pub fn strategy_is_fully_applied(strategy: &StrategyDetailsDeployment, applied_deployments: &[String]) -> bool {
    strategy
        .deployments
        .iter()
        .all(|d| applied_deployments.contains(&d.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(name: &str) -> DeploymentObservation {
        DeploymentObservation {
            name: name.into(),
            exists: true,
            owned_by_csv: true,
            available_replicas: 3,
            desired_replicas: 3,
            pod_template_hash_matches: true,
        }
    }

    #[test]
    fn healthy_deployments_pass_install_check() {
        let (ok, problems) = install_check(&[observation("operator")]);
        assert!(ok);
        assert!(problems.is_empty());
    }

    #[test]
    fn missing_replicas_fail_install_check() {
        let mut unhealthy = observation("operator");
        unhealthy.available_replicas = 1;
        let (ok, problems) = install_check(&[unhealthy]);
        assert!(!ok);
        assert_eq!(problems.len(), 1);
    }

    #[test]
    fn unowned_deployment_fails_install_check() {
        let mut unowned = observation("operator");
        unowned.owned_by_csv = false;
        let (ok, _problems) = install_check(&[unowned]);
        assert!(!ok);
    }

    #[test]
    fn wildcard_rule_covers_anything() {
        let required = PolicyRule {
            verbs: vec!["get".into()],
            api_groups: Some(vec!["".into()]),
            resources: Some(vec!["pods".into()]),
            ..Default::default()
        };
        let existing = PolicyRule {
            verbs: vec!["*".into()],
            api_groups: Some(vec!["*".into()]),
            resources: Some(vec!["*".into()]),
            ..Default::default()
        };
        assert!(rule_is_covered(&required, &[existing]));
    }

    #[test]
    fn missing_verb_is_not_covered() {
        let required = PolicyRule {
            verbs: vec!["delete".into()],
            api_groups: Some(vec!["".into()]),
            resources: Some(vec!["pods".into()]),
            ..Default::default()
        };
        let existing = PolicyRule {
            verbs: vec!["get".into(), "list".into()],
            api_groups: Some(vec!["".into()]),
            resources: Some(vec!["pods".into()]),
            ..Default::default()
        };
        assert!(!rule_is_covered(&required, &[existing]));
    }

    #[test]
    fn pod_template_hash_is_stable_for_identical_specs() {
        let spec = DeploymentSpec {
            replicas: Some(1),
            ..Default::default()
        };
        assert_eq!(pod_template_hash(&spec), pod_template_hash(&spec));
    }
}
