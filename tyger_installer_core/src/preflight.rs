/// The preflight checker (C6): verifies the installer can succeed
/// before any provisioning work starts. Each rule is checked and
/// reported independently rather than stopping at the first failure,
/// since a single missing permission must not silently block discovery
/// of the others.
use std::collections::BTreeMap;

use crate::cloud::RegistrationState;
use crate::context::RunContext;
use crate::telemetry::{OrchestratorErrorKind, ALREADY_LOGGED_ERROR};

/// One `(scope, action)` pair the caller must be able to perform.
struct RequiredPermission {
    resource_kind: &'static str,
    action: &'static str,
}

const REQUIRED_PERMISSIONS: &[RequiredPermission] = &[
    RequiredPermission { resource_kind: "storage accounts", action: "Microsoft.Storage/storageAccounts/listKeys/action" },
    RequiredPermission { resource_kind: "storage accounts", action: "Microsoft.Storage/storageAccounts/write" },
    RequiredPermission { resource_kind: "clusters", action: "Microsoft.ContainerService/managedClusters/listClusterAdminCredential/action" },
    RequiredPermission { resource_kind: "clusters", action: "Microsoft.ContainerService/managedClusters/listClusterUserCredential/action" },
    RequiredPermission { resource_kind: "clusters", action: "Microsoft.ContainerService/managedClusters/write" },
    RequiredPermission { resource_kind: "attached container registries", action: "Microsoft.Authorization/roleAssignments/write" },
];

/// Claims extracted from the caller's Azure AD access token: `oid`,
/// then `unique_name` (user) or `appid` (service principal), and
/// `idtyp`.
#[derive(Clone)]
pub struct CallerIdentity {
    pub object_id: String,
    pub display_name: String,
    pub is_application: bool,
}

pub async fn run(ctx: &RunContext, caller: &CallerIdentity) -> Result<(), failure::Error> {
    let cloud = &ctx.cloud;
    let mut missing = Vec::new();

    for namespace in required_providers(ctx) {
        match cloud.provider_get(&namespace).await {
            Ok(RegistrationState::Registered) | Ok(RegistrationState::Registering) => {}
            Ok(_) => {
                if let Err(e) = cloud.provider_register(&namespace).await {
                    log::error!("failed to register resource provider {}: {}", namespace, e);
                    missing.push(format!("resource provider {} could not be registered", namespace));
                }
            }
            Err(e) => {
                log::error!("failed to read registration state for {}: {}", namespace, e);
                missing.push(format!("resource provider {} registration state unknown", namespace));
            }
        }
    }

    let assignments = cloud.role_assignments_list_for_subscription(&caller.object_id).await.map_err(|e| failure::format_err!("{}", e))?;
    let scope = format!("/subscriptions/{}", ctx.subscription_id());
    let definitions: BTreeMap<String, Vec<(Vec<String>, Vec<String>)>> = {
        let mut map: BTreeMap<String, Vec<(Vec<String>, Vec<String>)>> = BTreeMap::new();
        for assignment in &assignments {
            if let Ok(defs) = cloud.role_definitions_list(&assignment.scope).await {
                for def in defs {
                    if def.id == assignment.role_definition_id {
                        map.entry(assignment.scope.clone()).or_default().push((def.actions, def.not_actions));
                    }
                }
            }
        }
        map
    };

    for required in REQUIRED_PERMISSIONS {
        let granted = assignments.iter().any(|a| {
            scope.starts_with(&a.scope) || a.scope.starts_with(&scope)
        }) && definitions.values().flatten().any(|(actions, not_actions)| {
            actions.iter().any(|glob| action_glob_matches(glob, required.action)) && !not_actions.iter().any(|glob| action_glob_matches(glob, required.action))
        });
        if !granted {
            log::error!("missing permission: {} on {}", required.action, required.resource_kind);
            missing.push(format!("missing permission: {} on {}", required.action, required.resource_kind));
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(OrchestratorErrorKind::AlreadyLoggedError(ALREADY_LOGGED_ERROR.to_string()).into())
    }
}

fn required_providers(ctx: &RunContext) -> Vec<String> {
    let mut providers = vec!["Microsoft.Storage".to_string(), "Microsoft.ContainerService".to_string()];
    if ctx.config.cloud.as_ref().and_then(|c| c.log_analytics_workspace.as_ref()).is_some() {
        providers.push("Microsoft.OperationsManagement".to_string());
        providers.push("Microsoft.OperationalInsights".to_string());
    }
    providers
}

/// Azure action globs use `*` as a wildcard segment matcher (e.g.
/// `Microsoft.Storage/*/read`); translate to a regex anchor-to-anchor.
fn action_glob_matches(glob: &str, action: &str) -> bool {
    if glob == "*" {
        return true;
    }
    let pattern = format!("^{}$", regex::escape(glob).replace(r"\*", ".*"));
    regex::Regex::new(&pattern).map(|re| re.is_match(action)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildinfo::BuildInfo;
    use crate::cloud::FakeCloud;
    use crate::helm::FakeHelm;
    use std::sync::Arc;
    use tyger_installer_definitions::EnvironmentConfig;

    fn minimal_config() -> EnvironmentConfig {
        serde_yaml::from_str(
            r#"
environmentName: abc
cloud:
  tenantId: tenant
  subscriptionId: sub
  defaultLocation: westus
  compute: { clusters: [{name: abc, apiHost: true, userNodePools: []}], managementPrincipals: [] }
  storage: { logs: { name: abclogs }, buffers: [] }
  database: { serverName: tyger-abc, computeTier: GeneralPurpose, vmSize: Standard_D2s_v3, initialDatabaseSizeGb: 128, backupRetentionDays: 7 }
api:
  domainName: abc.westus.cloudapp.azure.com
  auth: { tenantId: tenant }
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn missing_permissions_yield_already_logged_error() {
        let ctx = RunContext::new(minimal_config(), BuildInfo::release(), Arc::new(FakeCloud::new()), Arc::new(FakeHelm::new()));
        let caller = CallerIdentity { object_id: "caller-oid".into(), display_name: "caller".into(), is_application: false };
        let result = run(&ctx, &caller).await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().to_string(), ALREADY_LOGGED_ERROR);
    }

    #[test]
    fn glob_matching() {
        assert!(action_glob_matches("Microsoft.Storage/*/read", "Microsoft.Storage/storageAccounts/read"));
        assert!(!action_glob_matches("Microsoft.Storage/*/read", "Microsoft.Compute/write"));
        assert!(action_glob_matches("*", "anything"));
    }
}
