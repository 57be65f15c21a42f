pub mod catalogsource;
pub mod common;
pub mod csv;
pub mod installplan;
pub mod subscription;

pub use catalogsource::{CatalogSource, CatalogSourceSpec, CatalogSourceStatus};
pub use common::{
    ApiServiceDescription, ApprovalMode, ConditionStatus, CrdDescription, ObjectReference,
    RequirementOutcome, RequirementStatus,
};
pub use csv::{
    ClusterServiceVersion, ClusterServiceVersionSpec, ClusterServiceVersionStatus, CsvCondition,
    CsvPhase, CsvReason, NamedInstallStrategy, StrategyDeploymentPermissions,
    StrategyDeploymentSpec, StrategyDetailsDeployment,
};
pub use installplan::{
    InstallPlan, InstallPlanPhase, InstallPlanSpec, InstallPlanStatus, InstallPlanStep,
};
pub use subscription::{
    Subscription, SubscriptionCatalogHealth, SubscriptionCondition, SubscriptionConditionType,
    SubscriptionSpec, SubscriptionState, SubscriptionStatus,
};
