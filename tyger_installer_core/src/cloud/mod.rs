/// The cloud provider facade (C3).
///
/// A narrow capability set consumed by the step library; isolates every
/// Azure SDK call behind one trait so tests substitute `FakeCloud`
/// instead of talking to a subscription.
use std::collections::BTreeMap;

use async_trait::async_trait;
use failure::Fail;

pub mod fake;
#[cfg(feature = "live")]
pub mod live;

pub use fake::FakeCloud;
#[cfg(feature = "live")]
pub use live::LiveCloud;

/// Azure resource-manager registration state for a resource provider
/// namespace (`Microsoft.Storage`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationState {
    Registered,
    NotRegistered,
    Unregistered,
    Registering,
}

#[derive(Clone, Debug)]
pub struct ResourceGroupRef {
    pub subscription_id: String,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct ManagedIdentity {
    pub id: String,
    pub principal_id: String,
    pub client_id: String,
}

#[derive(Clone, Debug)]
pub struct ClusterSpec {
    pub name: String,
    pub location: String,
    pub kubernetes_version: Option<String>,
    pub system_node_pool: NodePoolSpec,
    pub user_node_pools: Vec<NodePoolSpec>,
    pub tags: BTreeMap<String, String>,
    pub log_analytics_workspace_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct NodePoolSpec {
    pub name: String,
    pub vm_size: String,
    pub min_count: u32,
    pub max_count: u32,
    /// Existing replica count, preserved across updates rather than
    /// reset to a desired-count default.
    pub existing_count: Option<u32>,
    pub labels: BTreeMap<String, String>,
    pub taints: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct Cluster {
    pub name: String,
    pub kubelet_identity_object_id: Option<String>,
    pub oidc_issuer_url: Option<String>,
    pub tags: BTreeMap<String, String>,
    /// `true` when the caller's desired configuration differs only by
    /// a pool shrinking; the orchestrator must not wait for this kind
    /// of update to finish.
    pub only_scale_down: bool,
}

#[derive(Clone, Debug)]
pub struct StorageAccount {
    pub id: String,
    pub name: String,
    pub blob_endpoint: String,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct DatabaseServer {
    pub id: String,
    pub name: String,
    pub fqdn: String,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct DirectoryPrincipal {
    pub object_id: String,
    pub kind: String,
}

#[derive(Clone, Debug)]
pub struct RoleAssignment {
    pub principal_id: String,
    pub role_definition_id: String,
    pub scope: String,
}

#[derive(Clone, Debug)]
pub struct RoleDefinition {
    pub id: String,
    pub actions: Vec<String>,
    pub not_actions: Vec<String>,
}

/// Errors this facade's operations surface, grouped by the kind of
/// recovery a caller can attempt (conflict, transient, authorization,
/// ...); `FakeCloud` and `LiveCloud` both produce them so steps can
/// match on the same variants regardless of mode.
#[derive(Debug, Fail)]
pub enum CloudError {
    #[fail(display = "{} '{}' already used by environment '{}'", _0, _1, _2)]
    Conflict(&'static str, String, String),
    #[fail(display = "{} not found", _0)]
    NotFound(String),
    #[fail(display = "authorization failed for {}", _0)]
    AuthorizationFailed(String),
    #[fail(display = "principal {} not found", _0)]
    PrincipalNotFound(String),
    #[fail(display = "{} returned transient error: {}", _0, _1)]
    Transient(String, String),
    #[fail(display = "{}: {}", _0, _1)]
    Other(String, String),
}

pub type CloudResult<T> = Result<T, CloudError>;

/// The full set of Azure control-plane operations the steps need.
/// Steps depend only on this trait; `FakeCloud` (used by every test
/// and the default build) and `LiveCloud` (gated by the `live`
/// feature) both implement it.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn resource_group_exists(&self, rg: &ResourceGroupRef) -> CloudResult<bool>;
    async fn resource_group_create_or_update(&self, rg: &ResourceGroupRef, location: &str) -> CloudResult<()>;
    async fn resource_group_delete(&self, rg: &ResourceGroupRef) -> CloudResult<()>;
    async fn list_resources_in_group(&self, rg: &ResourceGroupRef) -> CloudResult<Vec<(String, String, BTreeMap<String, String>)>>;
    async fn delete_resource_by_id(&self, id: &str, api_version: &str) -> CloudResult<()>;

    async fn provider_get(&self, namespace: &str) -> CloudResult<RegistrationState>;
    async fn provider_register(&self, namespace: &str) -> CloudResult<()>;
    async fn provider_default_api_version(&self, namespace: &str, resource_type: &str) -> CloudResult<String>;

    async fn identity_create_or_update(&self, name: &str, location: &str, tags: &BTreeMap<String, String>) -> CloudResult<ManagedIdentity>;
    async fn federated_identity_create_or_update(&self, identity: &ManagedIdentity, issuer: &str, subject: &str, audience: &str) -> CloudResult<()>;

    async fn cluster_get(&self, name: &str) -> CloudResult<Option<Cluster>>;
    async fn cluster_create_or_update(&self, spec: &ClusterSpec) -> CloudResult<Cluster>;
    async fn cluster_list_admin_credentials(&self, name: &str) -> CloudResult<Vec<u8>>;
    async fn cluster_list_user_credentials(&self, name: &str) -> CloudResult<Vec<u8>>;

    async fn storage_get(&self, name: &str) -> CloudResult<Option<StorageAccount>>;
    async fn storage_create_or_update(&self, name: &str, location: &str, sku: &str, tags: &BTreeMap<String, String>) -> CloudResult<StorageAccount>;
    async fn storage_list_keys(&self, name: &str) -> CloudResult<String>;
    /// Create a blob container if it does not already exist; conflict-
    /// on-exists is success.
    async fn storage_container_create_if_absent(&self, account_name: &str, container_name: &str) -> CloudResult<()>;

    async fn db_get(&self, server_name: &str) -> CloudResult<Option<DatabaseServer>>;
    async fn db_create_or_update(&self, server_name: &str, location: &str, compute_tier: &str, vm_size: &str, postgres_major_version: &str, storage_gb: u32, backup_retention_days: u32, geo_redundant: bool, tags: &BTreeMap<String, String>) -> CloudResult<DatabaseServer>;
    async fn db_admin_begin_create(&self, server_name: &str, principal_object_id: &str, principal_display_name: &str) -> CloudResult<()>;
    async fn db_firewall_create_or_update(&self, server_name: &str, rule_name: &str, start_ip: &str, end_ip: &str) -> CloudResult<()>;
    async fn db_firewall_delete(&self, server_name: &str, rule_name: &str) -> CloudResult<()>;

    async fn role_assignment_create(&self, scope: &str, role_definition_id: &str, principal_object_id: &str) -> CloudResult<()>;
    /// Remove a role assignment; `NotFound` is treated as success by
    /// callers (the uninstall path's ACR-detach step tolerates it).
    async fn role_assignment_delete(&self, scope: &str, role_definition_id: &str, principal_object_id: &str) -> CloudResult<()>;
    async fn role_assignments_list_for_subscription(&self, principal_object_id: &str) -> CloudResult<Vec<RoleAssignment>>;
    async fn role_definitions_list(&self, scope: &str) -> CloudResult<Vec<RoleDefinition>>;

    async fn tags_create_or_update_at_scope(&self, id: &str, tags: &BTreeMap<String, String>) -> CloudResult<()>;

    /// Identity of whoever is running the installer, read off the
    /// caller's own Azure AD access token (`oid`, `idtyp`, then
    /// `unique_name`/`appid`). Returns `(object_id, display_name,
    /// is_application)`.
    async fn current_caller_identity(&self) -> CloudResult<(String, String, bool)>;
    /// Acquire an access token for `scope`, used by the database step to
    /// authenticate the PostgreSQL AAD admin connection.
    async fn acquire_aad_token(&self, scope: &str) -> CloudResult<String>;

    async fn directory_resolve_principals(&self, object_ids: &[String]) -> CloudResult<Vec<DirectoryPrincipal>>;
    async fn directory_app_get_by_uri(&self, uri: &str) -> CloudResult<Option<String>>;
    async fn directory_app_create_or_update(&self, uri: &str, display_name: &str) -> CloudResult<String>;
}
