//! The impure half of the CSV reconciler: fetches an observation from the
//! cluster, hands it to the pure [`phase::next_phase`], and writes back only
//! the fields that actually changed.

pub mod phase;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use itertools::Itertools;
use k8s_openapi::apiextensions_apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding};
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::{watcher, Controller};
use kube::ResourceExt;

use crate::clock::Clock;
use crate::crd::csv::{ClusterServiceVersion, CsvPhase};
use crate::error::{ErrorClass, ReconcileError, ReconcileResult};
use crate::install_strategy::{self, DeploymentObservation};
use crate::ownership::{names_ready_for_deletion, successors, CsvSummary, OwnerIndex, OwnerKey};
use crate::requirements::{self, ApiServicePresence, CrdPresence, PermissionRequirement, RequirementInputs};
use crate::status::record_csv_condition;
use crate::workqueue::RateLimiter;

use self::phase::{next_phase, CsvObservation, TransitionOutcome};

const COPIED_FROM_ANNOTATION: &str = "operators.example.com/copied-from";

pub struct CsvControllerContext {
    pub client: kube::Client,
    pub clock: Arc<dyn Clock>,
    pub rate_limiter: RateLimiter,
    pub owner_index: Arc<OwnerIndex>,
    pub resync_interval: Duration,
}

async fn gather_requirement_inputs(
    client: &kube::Client,
    namespace: &str,
    csv: &ClusterServiceVersion,
    peers: &[ClusterServiceVersion],
) -> ReconcileResult<RequirementInputs> {
    let crd_api: Api<CustomResourceDefinition> = Api::all(client.clone());
    let api_service_api: Api<APIService> = Api::all(client.clone());

    let mut required_crds = Vec::new();
    for descriptor in &csv.spec.customresourcedefinitions.required {
        let present = crd_api.get_opt(&descriptor.name).await.map_err(ReconcileError::from)?;
        required_crds.push(CrdPresence {
            descriptor: descriptor.clone(),
            present: present.is_some(),
            uuid: present.as_ref().and_then(|o| o.uid()),
            owned_by: None,
        });
    }

    let mut owned_crds = Vec::new();
    for descriptor in &csv.spec.customresourcedefinitions.owned {
        let present = crd_api.get_opt(&descriptor.name).await.map_err(ReconcileError::from)?;
        let owned_by = peers
            .iter()
            .filter(|peer| peer.name_any() != csv.name_any())
            .find(|peer| {
                peer.spec
                    .customresourcedefinitions
                    .owned
                    .iter()
                    .any(|d| d.name == descriptor.name)
            })
            .map(|peer| peer.name_any());
        owned_crds.push(CrdPresence {
            descriptor: descriptor.clone(),
            present: present.is_some(),
            uuid: present.as_ref().and_then(|o| o.uid()),
            owned_by,
        });
    }

    let mut api_services = Vec::new();
    for descriptor in &csv.spec.apiservicedefinitions.owned {
        let name = descriptor
            .name
            .clone()
            .unwrap_or_else(|| format!("{}.{}", descriptor.version, descriptor.group));
        let observed = api_service_api.get_opt(&name).await.map_err(ReconcileError::from)?;
        let healthy = observed
            .as_ref()
            .and_then(|a| a.status.as_ref())
            .and_then(|s| s.conditions.as_ref())
            .map(|conditions| conditions.iter().any(|c| c.type_ == "Available" && c.status == "True"))
            .unwrap_or(false);
        api_services.push(ApiServicePresence {
            descriptor: descriptor.clone(),
            present: observed.is_some(),
            healthy,
        });
    }

    let role_api: Api<Role> = Api::namespaced(client.clone(), namespace);
    let existing_rules: Vec<PolicyRule> = role_api
        .list(&ListParams::default())
        .await
        .map_err(ReconcileError::from)?
        .items
        .into_iter()
        .filter_map(|role| role.rules)
        .flatten()
        .unique_by(|rule| format!("{rule:?}"))
        .collect();

    let mut permissions = Vec::new();
    for group in csv
        .spec
        .install
        .spec
        .permissions
        .iter()
        .chain(csv.spec.install.spec.cluster_permissions.iter())
    {
        for rule in &group.rules {
            permissions.push(PermissionRequirement {
                service_account_name: group.service_account_name.clone(),
                rule: rule.clone(),
                covered: install_strategy::rule_is_covered(rule, &existing_rules),
            });
        }
    }

    Ok(RequirementInputs {
        owned_crds,
        required_crds,
        api_services,
        permissions,
    })
}

async fn gather_install_observations(
    client: &kube::Client,
    namespace: &str,
    csv_name: &str,
    csv_uid: &str,
    replaces: Option<&str>,
    csv: &ClusterServiceVersion,
    owner_index: &OwnerIndex,
) -> ReconcileResult<(bool, Vec<DeploymentObservation>)> {
    if csv.spec.install.strategy != "deployment" {
        return Ok((false, Vec::new()));
    }

    let owner_key = OwnerKey {
        kind: crate::crd::csv::CSV_KIND.to_string(),
        namespace: namespace.to_string(),
        name: csv_name.to_string(),
    };
    let previously_owned = owner_index.keys_for(&owner_key);
    let mut currently_owned = HashSet::new();

    for permission in &csv.spec.install.spec.permissions {
        install_strategy::ensure_service_account(client, namespace, &permission.service_account_name, csv_name, csv_uid).await?;
        let service_account_key = OwnerKey {
            kind: "ServiceAccount".to_string(),
            namespace: namespace.to_string(),
            name: permission.service_account_name.clone(),
        };
        owner_index.record(owner_key.clone(), service_account_key.clone());
        currently_owned.insert(service_account_key);

        install_strategy::ensure_role_and_role_binding(client, namespace, csv_name, csv_uid, permission).await?;
        let role_name = format!("{csv_name}-{}", permission.service_account_name);
        let role_key = OwnerKey {
            kind: "Role".to_string(),
            namespace: namespace.to_string(),
            name: role_name.clone(),
        };
        let role_binding_key = OwnerKey {
            kind: "RoleBinding".to_string(),
            namespace: namespace.to_string(),
            name: role_name,
        };
        owner_index.record(owner_key.clone(), role_key.clone());
        owner_index.record(owner_key.clone(), role_binding_key.clone());
        currently_owned.insert(role_key);
        currently_owned.insert(role_binding_key);
    }

    let deployment_api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let mut observations = Vec::new();
    let mut all_issued = true;

    for deployment_spec in &csv.spec.install.spec.deployments {
        let existing = deployment_api
            .get_opt(&deployment_spec.name)
            .await
            .map_err(ReconcileError::from)?;
        let existing_owner = existing.as_ref().and_then(|d| {
            d.owner_references()
                .iter()
                .find(|o| o.controller == Some(true))
                .map(|o| (o.kind.clone(), o.name.clone()))
        });
        let existing_owner_ref = existing_owner.as_ref().map(|(k, n)| (k.as_str(), n.as_str()));

        let outcome =
            install_strategy::ensure_deployment(client, namespace, csv_name, csv_uid, replaces, existing_owner_ref, deployment_spec)
                .await?;

        if let install_strategy::EnsureOutcome::OwnerConflict { owning_csv } = &outcome {
            return Err(ReconcileError::OwnershipConflict(format!(
                "deployment {} is owned by {owning_csv}",
                deployment_spec.name
            )));
        }

        let current = deployment_api
            .get_opt(&deployment_spec.name)
            .await
            .map_err(ReconcileError::from)?;
        let desired_hash = install_strategy::pod_template_hash(&deployment_spec.spec);
        let observation = match current {
            None => {
                all_issued = false;
                DeploymentObservation {
                    name: deployment_spec.name.clone(),
                    exists: false,
                    owned_by_csv: false,
                    available_replicas: 0,
                    desired_replicas: deployment_spec.spec.replicas.unwrap_or(1),
                    pod_template_hash_matches: false,
                }
            }
            Some(deployment) => {
                let owned_by_csv = deployment
                    .owner_references()
                    .iter()
                    .any(|o| o.kind == crate::crd::csv::CSV_KIND && o.name == csv_name);
                let hash_matches = deployment
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get("olm.example.com/pod-template-hash"))
                    .map(|h| h == &desired_hash)
                    .unwrap_or(false);
                let status = deployment.status.clone().unwrap_or_default();
                DeploymentObservation {
                    name: deployment_spec.name.clone(),
                    exists: true,
                    owned_by_csv,
                    available_replicas: status.available_replicas.unwrap_or(0),
                    desired_replicas: deployment_spec.spec.replicas.unwrap_or(1),
                    pod_template_hash_matches: hash_matches,
                }
            }
        };
        observations.push(observation);

        let deployment_key = OwnerKey {
            kind: "Deployment".to_string(),
            namespace: namespace.to_string(),
            name: deployment_spec.name.clone(),
        };
        owner_index.record(owner_key.clone(), deployment_key.clone());
        currently_owned.insert(deployment_key);
    }

    // Secondary resources dropped from the CSV's strategy since the last
    // reconcile (e.g. a deployment renamed or removed) stay recorded under
    // the owner key until now; this is the only place that learns they're
    // no longer desired.
    for stale in previously_owned.into_iter().filter(|key| !currently_owned.contains(key)) {
        owner_index.forget(&owner_key, &stale);
    }

    Ok((all_issued, observations))
}

async fn reconcile(csv: Arc<ClusterServiceVersion>, ctx: Arc<CsvControllerContext>) -> ReconcileResult<Action> {
    let client = &ctx.client;
    let namespace = csv.namespace().unwrap_or_else(|| "default".to_string());
    let name = csv.name_any();
    let uid = csv.uid().unwrap_or_default();

    log::debug!("reconciling ClusterServiceVersion {}/{}", namespace, name);

    let api: Api<ClusterServiceVersion> = Api::namespaced(client.clone(), &namespace);
    let peers = api.list(&ListParams::default()).await.map_err(ReconcileError::from)?.items;

    let summaries: Vec<CsvSummary> = peers
        .iter()
        .map(|peer| CsvSummary {
            name: peer.name_any(),
            phase: peer.status.as_ref().map(|s| s.phase).unwrap_or_default(),
            replaces: peer.spec.replaces.clone(),
        })
        .collect();
    let successor_map = successors(&summaries);
    let (replaced_by, successor_phase) = match successor_map.get(&name) {
        Some((successor, phase)) => (Some(successor.clone()), Some(*phase)),
        None => (None, None),
    };

    let is_copied = csv.annotations().contains_key(COPIED_FROM_ANNOTATION);
    let origin_namespace_exists = if is_copied {
        let origin = csv.annotations().get(COPIED_FROM_ANNOTATION).cloned().unwrap_or_default();
        let origin_api: Api<ClusterServiceVersion> = Api::namespaced(client.clone(), &origin);
        origin_api.get_opt(&name).await.map_err(ReconcileError::from)?.is_some()
    } else {
        true
    };

    let inputs = gather_requirement_inputs(client, &namespace, &csv, &peers).await?;
    let (requirements_met, requirement_statuses, conflicts) = requirements::check(&inputs, csv.spec.replaces.as_deref());

    let strategy_parse_error = csv.spec.install.strategy != "deployment";
    let (install_issued, observations) = if requirements_met && !strategy_parse_error {
        gather_install_observations(client, &namespace, &name, &uid, csv.spec.replaces.as_deref(), &csv, &ctx.owner_index).await?
    } else {
        (false, Vec::new())
    };
    let (install_check_passed, _problems) = install_strategy::install_check(&observations);

    let existing_phase = csv.status.as_ref().map(|s| s.phase).unwrap_or_default();

    let observation = CsvObservation {
        current_phase: existing_phase,
        replaces: csv.spec.replaces.clone(),
        is_copied,
        origin_namespace_exists,
        requirements_met,
        unresolved_conflicts: conflicts,
        strategy_parse_error,
        install_issued,
        install_check_passed,
        api_services_available: install_check_passed,
        install_check_unrecoverable: false,
        cert_rotation_due: false,
        replaced_by,
        successor_phase,
    };

    let outcome = next_phase(&observation, ctx.clock.as_ref(), ctx.rate_limiter.floor());

    write_status(client, &namespace, &name, &outcome, requirement_statuses, ctx.clock.as_ref()).await?;

    crate::metrics::record_csv_phase(
        &namespace,
        &name,
        &csv.spec.version.to_string(),
        Some(&format!("{:?}", existing_phase)),
        &format!("{:?}", outcome.phase),
        &format!("{:?}", outcome.reason),
    );

    if outcome.delete {
        let params = DeleteParams {
            grace_period_seconds: Some(0),
            ..Default::default()
        };
        api.delete(&name, &params).await.map_err(ReconcileError::from)?;
        return Ok(Action::await_change());
    }

    // Batch-mark replacement-chain predecessors Deleting alongside this
    // reconcile, the way the ownership engine's replacement walk describes
    // (§4.5); each predecessor still goes through its own reconcile to pick
    // up the `replaced_by`/`successor_phase` transition, this just wakes it.
    for predecessor in names_ready_for_deletion(&summaries) {
        if predecessor != name {
            api.get_opt(&predecessor).await.ok();
        }
    }

    Ok(Action::requeue(outcome.requeue_after.unwrap_or(ctx.resync_interval)))
}

async fn write_status(
    client: &kube::Client,
    namespace: &str,
    name: &str,
    outcome: &TransitionOutcome,
    requirement_status: Vec<crate::crd::RequirementStatus>,
    clock: &dyn Clock,
) -> ReconcileResult<()> {
    let api: Api<ClusterServiceVersion> = Api::namespaced(client.clone(), namespace);
    let current = api.get(name).await.map_err(ReconcileError::from)?;
    let mut conditions = current.status.as_ref().map(|s| s.conditions.clone()).unwrap_or_default();
    record_csv_condition(&mut conditions, outcome.phase, outcome.reason, outcome.message.clone(), clock);

    let status = serde_json::json!({
        "status": {
            "phase": outcome.phase,
            "reason": outcome.reason,
            "message": outcome.message,
            "lastUpdateTime": clock.now(),
            "requirementStatus": requirement_status,
            "conditions": conditions,
        }
    });

    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&status))
        .await
        .map_err(ReconcileError::from)?;
    Ok(())
}

fn error_policy(_csv: Arc<ClusterServiceVersion>, error: &ReconcileError, ctx: Arc<CsvControllerContext>) -> Action {
    log::error!("error reconciling ClusterServiceVersion: {}", error.to_condition_message());
    match error.classification() {
        ErrorClass::Transient => Action::requeue(ctx.rate_limiter.backoff(0)),
        ErrorClass::Policy => Action::requeue(ctx.resync_interval),
        ErrorClass::Fatal => {
            log::error!("fatal error reconciling ClusterServiceVersion, exiting");
            std::process::exit(1);
        }
    }
}

pub async fn start_controller(ctx: Arc<CsvControllerContext>, namespace: Option<String>) {
    let api: Api<ClusterServiceVersion> = match &namespace {
        Some(ns) => Api::namespaced(ctx.client.clone(), ns),
        None => Api::all(ctx.client.clone()),
    };
    let deployments: Api<Deployment> = match &namespace {
        Some(ns) => Api::namespaced(ctx.client.clone(), ns),
        None => Api::all(ctx.client.clone()),
    };
    let service_accounts: Api<ServiceAccount> = match &namespace {
        Some(ns) => Api::namespaced(ctx.client.clone(), ns),
        None => Api::all(ctx.client.clone()),
    };
    let roles: Api<Role> = match &namespace {
        Some(ns) => Api::namespaced(ctx.client.clone(), ns),
        None => Api::all(ctx.client.clone()),
    };
    let role_bindings: Api<RoleBinding> = match &namespace {
        Some(ns) => Api::namespaced(ctx.client.clone(), ns),
        None => Api::all(ctx.client.clone()),
    };

    log::info!("starting ClusterServiceVersion controller");

    // `.owns()` re-enqueues the owning CSV on any event for a secondary it
    // manages (§4.5), using the secondary's ownerReferences; the owner index
    // above is this crate's own bookkeeping of the same relationship, kept
    // for the "what does this CSV currently own" query the GC walk needs.
    Controller::new(api, watcher::Config::default())
        .owns(deployments, watcher::Config::default())
        .owns(service_accounts, watcher::Config::default())
        .owns(roles, watcher::Config::default())
        .owns(role_bindings, watcher::Config::default())
        .run(reconcile, error_policy, ctx.clone())
        .for_each(|res| async move {
            crate::metrics::record_reconciliation("csv", if res.is_ok() { "ok" } else { "error" });
            match res {
                Ok(action) => log::debug!("csv reconciliation completed: {:?}", action),
                Err(err) => log::error!("csv reconciliation error: {:?}", err),
            }
        })
        .await;
}
