//! The requirement checker (§4.3): evaluates whether a CSV's declared
//! prerequisites exist in the cluster.
//!
//! Split into a pure evaluation function (`check`) over an already-fetched
//! [`RequirementInputs`] snapshot, and an async `observe` that builds that
//! snapshot from the cluster. Keeping `check` pure is what makes the CSV
//! state machine's "Pending -> Pending / Pending -> InstallReady" edge
//! testable without a live API server.

use k8s_openapi::api::rbac::v1::PolicyRule;
use kube::api::{Api, DynamicObject};
use kube::core::GroupVersionKind;

use crate::crd::{
    ApiServiceDescription, CrdDescription, RequirementOutcome, RequirementStatus,
};

/// What's known about one owned-or-required CRD after querying the cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrdPresence {
    pub descriptor: CrdDescription,
    pub present: bool,
    pub uuid: Option<String>,
    /// `Some(other_csv_name)` when the CRD is owned by a different CSV in
    /// the namespace (§4.3: "owned by another non-`replaces` CSV ⇒
    /// conflict").
    pub owned_by: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiServicePresence {
    pub descriptor: ApiServiceDescription,
    pub present: bool,
    pub healthy: bool,
}

/// One declared RBAC rule and whether an existing role bound to the service
/// account already covers it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionRequirement {
    pub service_account_name: String,
    pub rule: PolicyRule,
    pub covered: bool,
}

#[derive(Clone, Debug, Default)]
pub struct RequirementInputs {
    pub owned_crds: Vec<CrdPresence>,
    pub required_crds: Vec<CrdPresence>,
    pub api_services: Vec<ApiServicePresence>,
    pub permissions: Vec<PermissionRequirement>,
}

/// An unresolvable ownership conflict discovered while checking requirements.
/// The CSV state machine decides separately (§4.1) whether this tolerates
/// (conflicting CSV is named in `replaces`) or fails the transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnershipConflict {
    pub crd_name: String,
    pub conflicting_csv: String,
}

fn policy_rule_message(rule: &PolicyRule) -> String {
    format!(
        "verbs {:?} on resources {:?} (apiGroups {:?})",
        rule.verbs, rule.resources.clone().unwrap_or_default(), rule.api_groups.clone().unwrap_or_default()
    )
}

/// Evaluates `inputs` against `replaces` (the predecessor this CSV tolerates
/// owner conflicts with). Returns the aggregate outcome, the per-requirement
/// status list (§4.3's `(allMet, statuses)` contract), and any ownership
/// conflicts that are not tolerated.
pub fn check(
    inputs: &RequirementInputs,
    replaces: Option<&str>,
) -> (bool, Vec<RequirementStatus>, Vec<OwnershipConflict>) {
    let mut all_met = true;
    let mut statuses = Vec::new();
    let mut conflicts = Vec::new();

    for crd in &inputs.required_crds {
        let met = crd.present;
        all_met &= met;
        statuses.push(RequirementStatus {
            group: "apiextensions.k8s.io".into(),
            version: crd.descriptor.version.clone(),
            kind: "CustomResourceDefinition".into(),
            name: crd.descriptor.name.clone(),
            uuid: crd.uuid.clone(),
            status: if met {
                RequirementOutcome::Present
            } else {
                RequirementOutcome::NotPresent
            },
            message: None,
        });
    }

    for crd in &inputs.owned_crds {
        let mut met = crd.present;
        let mut message = None;

        if let Some(owner) = &crd.owned_by {
            if Some(owner.as_str()) != replaces {
                conflicts.push(OwnershipConflict {
                    crd_name: crd.descriptor.name.clone(),
                    conflicting_csv: owner.clone(),
                });
                met = false;
                message = Some(format!("owned by conflicting CSV {owner}"));
            }
        }

        all_met &= met;
        statuses.push(RequirementStatus {
            group: "apiextensions.k8s.io".into(),
            version: crd.descriptor.version.clone(),
            kind: "CustomResourceDefinition".into(),
            name: crd.descriptor.name.clone(),
            uuid: crd.uuid.clone(),
            status: if met {
                RequirementOutcome::Present
            } else {
                RequirementOutcome::NotPresent
            },
            message,
        });
    }

    for api_service in &inputs.api_services {
        let met = api_service.present && api_service.healthy;
        all_met &= met;
        let name = api_service
            .descriptor
            .name
            .clone()
            .unwrap_or_else(|| format!("{}.{}", api_service.descriptor.version, api_service.descriptor.group));
        statuses.push(RequirementStatus {
            group: api_service.descriptor.group.clone(),
            version: api_service.descriptor.version.clone(),
            kind: "APIService".into(),
            name,
            uuid: None,
            status: if met {
                RequirementOutcome::Present
            } else {
                RequirementOutcome::NotPresent
            },
            message: if met {
                None
            } else {
                Some("absent or unhealthy".into())
            },
        });
    }

    for permission in &inputs.permissions {
        all_met &= permission.covered;
        statuses.push(RequirementStatus {
            group: "rbac.authorization.k8s.io".into(),
            version: "v1".into(),
            kind: "PolicyRule".into(),
            name: permission.service_account_name.clone(),
            uuid: None,
            status: RequirementOutcome::Requirement,
            message: Some(if permission.covered {
                format!("covered: {}", policy_rule_message(&permission.rule))
            } else {
                format!("not covered: {}", policy_rule_message(&permission.rule))
            }),
        });
    }

    (all_met, statuses, conflicts)
}

/// Resolves the dynamic-object `Api` handle for a CRD-described custom
/// resource kind, the way the install-strategy executor's `apply` helper
/// resolves arbitrary kinds via discovery.
pub async fn dynamic_api_for(
    client: &kube::Client,
    group: &str,
    version: &str,
    kind: &str,
    namespace: Option<&str>,
) -> kube::Result<Api<DynamicObject>> {
    let gvk = GroupVersionKind {
        group: group.to_string(),
        version: version.to_string(),
        kind: kind.to_string(),
    };
    let (ar, caps) = kube::discovery::pinned_kind(client, &gvk).await?;
    Ok(match (caps.scope, namespace) {
        (kube::discovery::Scope::Namespaced, Some(ns)) => {
            Api::namespaced_with(client.clone(), ns, &ar)
        }
        _ => Api::all_with(client.clone(), &ar),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ApiServiceDescription, CrdDescription};

    fn crd(name: &str) -> CrdDescription {
        CrdDescription {
            name: name.into(),
            version: "v1".into(),
            kind: "Widget".into(),
            display_name: None,
        }
    }

    #[test]
    fn missing_required_crd_is_unmet() {
        let inputs = RequirementInputs {
            required_crds: vec![CrdPresence {
                descriptor: crd("widgets.example.com"),
                present: false,
                uuid: None,
                owned_by: None,
            }],
            ..Default::default()
        };
        let (all_met, statuses, conflicts) = check(&inputs, None);
        assert!(!all_met);
        assert_eq!(statuses[0].status, RequirementOutcome::NotPresent);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn owned_crd_conflict_with_non_predecessor_is_reported() {
        let inputs = RequirementInputs {
            owned_crds: vec![CrdPresence {
                descriptor: crd("widgets.example.com"),
                present: true,
                uuid: Some("abc".into()),
                owned_by: Some("other-csv".into()),
            }],
            ..Default::default()
        };
        let (all_met, _statuses, conflicts) = check(&inputs, Some("predecessor-csv"));
        assert!(!all_met);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflicting_csv, "other-csv");
    }

    #[test]
    fn owned_crd_conflict_tolerated_when_owner_is_named_in_replaces() {
        let inputs = RequirementInputs {
            owned_crds: vec![CrdPresence {
                descriptor: crd("widgets.example.com"),
                present: true,
                uuid: Some("abc".into()),
                owned_by: Some("predecessor-csv".into()),
            }],
            ..Default::default()
        };
        let (all_met, _statuses, conflicts) = check(&inputs, Some("predecessor-csv"));
        assert!(all_met);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn unhealthy_api_service_is_unmet() {
        let inputs = RequirementInputs {
            api_services: vec![ApiServicePresence {
                descriptor: ApiServiceDescription {
                    group: "example.com".into(),
                    version: "v1".into(),
                    kind: "Widget".into(),
                    name: Some("v1.example.com".into()),
                },
                present: true,
                healthy: false,
            }],
            ..Default::default()
        };
        let (all_met, statuses, _) = check(&inputs, None);
        assert!(!all_met);
        assert_eq!(statuses[0].status, RequirementOutcome::NotPresent);
    }

    #[test]
    fn all_requirements_satisfied() {
        let inputs = RequirementInputs {
            required_crds: vec![CrdPresence {
                descriptor: crd("widgets.example.com"),
                present: true,
                uuid: Some("abc".into()),
                owned_by: None,
            }],
            ..Default::default()
        };
        let (all_met, _, conflicts) = check(&inputs, None);
        assert!(all_met);
        assert!(conflicts.is_empty());
    }
}
