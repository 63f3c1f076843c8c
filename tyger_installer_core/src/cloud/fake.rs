/// An in-memory `CloudProvider`, the mode every test and the default
/// (non-`live`) build runs against.
use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    Cluster, ClusterSpec, CloudError, CloudProvider, CloudResult, DatabaseServer, DirectoryPrincipal,
    ManagedIdentity, RegistrationState, ResourceGroupRef, RoleAssignment, RoleDefinition, StorageAccount,
};

#[derive(Default)]
struct State {
    resource_groups: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>,
    providers: BTreeMap<String, RegistrationState>,
    identities: BTreeMap<String, ManagedIdentity>,
    federated: BTreeMap<String, (String, String, String)>,
    clusters: BTreeMap<String, Cluster>,
    storage: BTreeMap<String, StorageAccount>,
    containers: BTreeMap<String, Vec<String>>,
    databases: BTreeMap<String, DatabaseServer>,
    db_firewall_rules: BTreeMap<String, Vec<(String, String, String)>>,
    role_assignments: Vec<RoleAssignment>,
    tags_at_scope: BTreeMap<String, BTreeMap<String, String>>,
    apps: BTreeMap<String, String>,
    forbid_rg_delete: bool,
}

/// `FakeCloud` keeps every resource it has been asked to create, keyed
/// by name, so steps can be exercised end to end (create, then
/// reconcile against the same desired state, then delete) without any
/// network access.
pub struct FakeCloud {
    state: Mutex<State>,
}

impl Default for FakeCloud {
    fn default() -> Self {
        FakeCloud { state: Mutex::new(State::default()) }
    }
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test-only hook: register an id+tags pair as belonging to a
    /// resource group, so `list_resources_in_group`/`delete_resource_by_id`
    /// have something to partition and delete in uninstall tests.
    pub fn register_resource(&self, rg_name: &str, id: &str, tags: BTreeMap<String, String>) {
        self.state.lock().unwrap().resource_groups.entry(rg_name.to_string()).or_default().insert(id.to_string(), tags);
    }

    /// Test-only hook: make `resource_group_delete` fail with
    /// `AuthorizationFailed`, to exercise the uninstall orchestrator's
    /// per-resource-deletion fallback.
    pub fn forbid_resource_group_delete(&self) {
        self.state.lock().unwrap().forbid_rg_delete = true;
    }
}

#[async_trait]
impl CloudProvider for FakeCloud {
    async fn resource_group_exists(&self, rg: &ResourceGroupRef) -> CloudResult<bool> {
        Ok(self.state.lock().unwrap().resource_groups.contains_key(&rg.name))
    }

    async fn resource_group_create_or_update(&self, rg: &ResourceGroupRef, _location: &str) -> CloudResult<()> {
        self.state.lock().unwrap().resource_groups.entry(rg.name.clone()).or_default();
        Ok(())
    }

    async fn resource_group_delete(&self, rg: &ResourceGroupRef) -> CloudResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.forbid_rg_delete {
            return Err(CloudError::AuthorizationFailed(rg.name.clone()));
        }
        state.resource_groups.remove(&rg.name);
        Ok(())
    }

    async fn list_resources_in_group(&self, rg: &ResourceGroupRef) -> CloudResult<Vec<(String, String, BTreeMap<String, String>)>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .resource_groups
            .get(&rg.name)
            .map(|resources| resources.iter().map(|(id, tags)| (id.clone(), "generic".to_string(), tags.clone())).collect())
            .unwrap_or_default())
    }

    async fn delete_resource_by_id(&self, id: &str, _api_version: &str) -> CloudResult<()> {
        let mut state = self.state.lock().unwrap();
        for resources in state.resource_groups.values_mut() {
            resources.remove(id);
        }
        Ok(())
    }

    async fn provider_get(&self, namespace: &str) -> CloudResult<RegistrationState> {
        Ok(self.state.lock().unwrap().providers.get(namespace).copied().unwrap_or(RegistrationState::NotRegistered))
    }

    async fn provider_register(&self, namespace: &str) -> CloudResult<()> {
        self.state.lock().unwrap().providers.insert(namespace.to_string(), RegistrationState::Registered);
        Ok(())
    }

    async fn provider_default_api_version(&self, _namespace: &str, _resource_type: &str) -> CloudResult<String> {
        Ok("2023-01-01".to_string())
    }

    async fn identity_create_or_update(&self, name: &str, _location: &str, _tags: &BTreeMap<String, String>) -> CloudResult<ManagedIdentity> {
        let mut state = self.state.lock().unwrap();
        let identity = state.identities.entry(name.to_string()).or_insert_with(|| ManagedIdentity {
            id: format!("/identities/{}", name),
            principal_id: format!("{}-principal", name),
            client_id: format!("{}-client", name),
        });
        Ok(identity.clone())
    }

    async fn federated_identity_create_or_update(&self, identity: &ManagedIdentity, issuer: &str, subject: &str, audience: &str) -> CloudResult<()> {
        self.state
            .lock()
            .unwrap()
            .federated
            .insert(identity.id.clone(), (issuer.to_string(), subject.to_string(), audience.to_string()));
        Ok(())
    }

    async fn cluster_get(&self, name: &str) -> CloudResult<Option<Cluster>> {
        Ok(self.state.lock().unwrap().clusters.get(name).cloned())
    }

    async fn cluster_create_or_update(&self, spec: &ClusterSpec) -> CloudResult<Cluster> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.clusters.get(&spec.name) {
            if let Some(owner) = existing.tags.get("tyger-environment") {
                if let Some(desired_owner) = spec.tags.get("tyger-environment") {
                    if owner != desired_owner {
                        return Err(CloudError::Conflict("cluster", spec.name.clone(), owner.clone()));
                    }
                }
            }
        }
        // Scale-down-only when the cluster already exists and every
        // user pool's desired bounds are no larger than its current
        // replica count.
        let only_scale_down = state.clusters.contains_key(&spec.name)
            && spec
                .user_node_pools
                .iter()
                .all(|p| p.existing_count.map(|c| p.max_count <= c).unwrap_or(false));
        let cluster = Cluster {
            name: spec.name.clone(),
            kubelet_identity_object_id: Some(format!("{}-kubelet", spec.name)),
            oidc_issuer_url: Some(format!("https://fake-oidc.example/{}", spec.name)),
            tags: spec.tags.clone(),
            only_scale_down,
        };
        state.clusters.insert(spec.name.clone(), cluster.clone());
        Ok(cluster)
    }

    async fn cluster_list_admin_credentials(&self, name: &str) -> CloudResult<Vec<u8>> {
        Ok(format!("apiVersion: v1\nkind: Config\nclusters: [{{name: {}}}]\n", name).into_bytes())
    }

    async fn cluster_list_user_credentials(&self, name: &str) -> CloudResult<Vec<u8>> {
        self.cluster_list_admin_credentials(name).await
    }

    async fn storage_get(&self, name: &str) -> CloudResult<Option<StorageAccount>> {
        Ok(self.state.lock().unwrap().storage.get(name).cloned())
    }

    async fn storage_create_or_update(&self, name: &str, _location: &str, _sku: &str, tags: &BTreeMap<String, String>) -> CloudResult<StorageAccount> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.storage.get(name) {
            if let (Some(owner), Some(desired)) = (existing.tags.get("tyger-environment"), tags.get("tyger-environment")) {
                if owner != desired {
                    return Err(CloudError::Conflict("storage account", name.to_string(), owner.clone()));
                }
            }
        }
        let account = StorageAccount {
            id: format!("/storageAccounts/{}", name),
            name: name.to_string(),
            blob_endpoint: format!("https://{}.blob.core.windows.net/", name),
            tags: tags.clone(),
        };
        state.storage.insert(name.to_string(), account.clone());
        Ok(account)
    }

    async fn storage_list_keys(&self, name: &str) -> CloudResult<String> {
        Ok(format!("{}-fake-key", name))
    }

    async fn storage_container_create_if_absent(&self, account_name: &str, container_name: &str) -> CloudResult<()> {
        let mut state = self.state.lock().unwrap();
        let containers = state.containers.entry(account_name.to_string()).or_default();
        if !containers.iter().any(|c| c == container_name) {
            containers.push(container_name.to_string());
        }
        Ok(())
    }

    async fn db_get(&self, server_name: &str) -> CloudResult<Option<DatabaseServer>> {
        Ok(self.state.lock().unwrap().databases.get(server_name).cloned())
    }

    #[allow(clippy::too_many_arguments)]
    async fn db_create_or_update(
        &self,
        server_name: &str,
        _location: &str,
        _compute_tier: &str,
        _vm_size: &str,
        _postgres_major_version: &str,
        _storage_gb: u32,
        _backup_retention_days: u32,
        _geo_redundant: bool,
        tags: &BTreeMap<String, String>,
    ) -> CloudResult<DatabaseServer> {
        let mut state = self.state.lock().unwrap();
        // Real reconciliation reads existing state and writes only a
        // diff; preserve tags set out-of-band (e.g. `tyger-db-configured`
        // via `tags.createOrUpdateAtScope`) rather than clobbering them.
        let mut merged_tags = state.databases.get(server_name).map(|s| s.tags.clone()).unwrap_or_default();
        for (k, v) in tags {
            merged_tags.insert(k.clone(), v.clone());
        }
        let server = DatabaseServer {
            id: format!("/servers/{}", server_name),
            name: server_name.to_string(),
            fqdn: format!("{}.postgres.database.azure.com", server_name),
            tags: merged_tags,
        };
        state.databases.insert(server_name.to_string(), server.clone());
        Ok(server)
    }

    async fn db_admin_begin_create(&self, _server_name: &str, _principal_object_id: &str, _principal_display_name: &str) -> CloudResult<()> {
        Ok(())
    }

    async fn db_firewall_create_or_update(&self, server_name: &str, rule_name: &str, start_ip: &str, end_ip: &str) -> CloudResult<()> {
        self.state
            .lock()
            .unwrap()
            .db_firewall_rules
            .entry(server_name.to_string())
            .or_default()
            .push((rule_name.to_string(), start_ip.to_string(), end_ip.to_string()));
        Ok(())
    }

    async fn db_firewall_delete(&self, server_name: &str, rule_name: &str) -> CloudResult<()> {
        if let Some(rules) = self.state.lock().unwrap().db_firewall_rules.get_mut(server_name) {
            rules.retain(|(name, _, _)| name != rule_name);
        }
        Ok(())
    }

    async fn role_assignment_create(&self, scope: &str, role_definition_id: &str, principal_object_id: &str) -> CloudResult<()> {
        let mut state = self.state.lock().unwrap();
        let exists = state
            .role_assignments
            .iter()
            .any(|a| a.scope == scope && a.role_definition_id == role_definition_id && a.principal_id == principal_object_id);
        if !exists {
            state.role_assignments.push(RoleAssignment {
                principal_id: principal_object_id.to_string(),
                role_definition_id: role_definition_id.to_string(),
                scope: scope.to_string(),
            });
        }
        Ok(())
    }

    async fn role_assignment_delete(&self, scope: &str, role_definition_id: &str, principal_object_id: &str) -> CloudResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .role_assignments
            .retain(|a| !(a.scope == scope && a.role_definition_id == role_definition_id && a.principal_id == principal_object_id));
        Ok(())
    }

    async fn role_assignments_list_for_subscription(&self, principal_object_id: &str) -> CloudResult<Vec<RoleAssignment>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .role_assignments
            .iter()
            .filter(|a| a.principal_id == principal_object_id)
            .cloned()
            .collect())
    }

    async fn role_definitions_list(&self, _scope: &str) -> CloudResult<Vec<RoleDefinition>> {
        Ok(vec![RoleDefinition {
            id: "owner".to_string(),
            actions: vec!["*".to_string()],
            not_actions: vec![],
        }])
    }

    async fn tags_create_or_update_at_scope(&self, id: &str, tags: &BTreeMap<String, String>) -> CloudResult<()> {
        let mut state = self.state.lock().unwrap();
        state.tags_at_scope.insert(id.to_string(), tags.clone());
        if let Some(server) = state.databases.values_mut().find(|s| s.id == id) {
            for (k, v) in tags {
                server.tags.insert(k.clone(), v.clone());
            }
        }
        if let Some(account) = state.storage.values_mut().find(|a| a.id == id) {
            for (k, v) in tags {
                account.tags.insert(k.clone(), v.clone());
            }
        }
        Ok(())
    }

    async fn directory_resolve_principals(&self, object_ids: &[String]) -> CloudResult<Vec<DirectoryPrincipal>> {
        Ok(object_ids
            .iter()
            .map(|id| DirectoryPrincipal { object_id: id.clone(), kind: "User".to_string() })
            .collect())
    }

    async fn directory_app_get_by_uri(&self, uri: &str) -> CloudResult<Option<String>> {
        Ok(self.state.lock().unwrap().apps.get(uri).cloned())
    }

    async fn directory_app_create_or_update(&self, uri: &str, _display_name: &str) -> CloudResult<String> {
        let mut state = self.state.lock().unwrap();
        let id = state.apps.entry(uri.to_string()).or_insert_with(|| format!("app-{}", uri)).clone();
        Ok(id)
    }

    async fn current_caller_identity(&self) -> CloudResult<(String, String, bool)> {
        Ok(("fake-caller-oid".to_string(), "fake-caller@example.com".to_string(), false))
    }

    async fn acquire_aad_token(&self, _scope: &str) -> CloudResult<String> {
        Ok("fake-aad-token".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resource_group_create_is_idempotent() {
        let cloud = FakeCloud::new();
        let rg = ResourceGroupRef { subscription_id: "sub".into(), name: "abc".into() };
        cloud.resource_group_create_or_update(&rg, "westus").await.unwrap();
        cloud.resource_group_create_or_update(&rg, "westus").await.unwrap();
        assert!(cloud.resource_group_exists(&rg).await.unwrap());
    }

    #[tokio::test]
    async fn storage_conflict_detected_across_environments() {
        let cloud = FakeCloud::new();
        let mut tags_a = BTreeMap::new();
        tags_a.insert("tyger-environment".to_string(), "env-a".to_string());
        cloud.storage_create_or_update("acct", "westus", "Standard_LRS", &tags_a).await.unwrap();

        let mut tags_b = BTreeMap::new();
        tags_b.insert("tyger-environment".to_string(), "env-b".to_string());
        let result = cloud.storage_create_or_update("acct", "westus", "Standard_LRS", &tags_b).await;
        assert!(matches!(result, Err(CloudError::Conflict(_, _, _))));
    }

    #[tokio::test]
    async fn role_assignment_create_is_idempotent() {
        let cloud = FakeCloud::new();
        cloud.role_assignment_create("/scope", "role", "principal").await.unwrap();
        cloud.role_assignment_create("/scope", "role", "principal").await.unwrap();
        let assignments = cloud.role_assignments_list_for_subscription("principal").await.unwrap();
        assert_eq!(assignments.len(), 1);
    }
}
