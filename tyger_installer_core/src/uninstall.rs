/// Uninstall orchestrator: tears down the Helm releases, then the
/// cloud resources, in roughly reverse dependency order from install.
use crate::cloud::{CloudError, ResourceGroupRef};
use crate::context::RunContext;
use crate::promise::{new_promise, PromiseError};
use crate::telemetry;

const ACR_PULL_ROLE_DEFINITION_ID: &str = "b24988ac-6180-42a0-ab88-20f7382dd24c";

pub async fn run(ctx: &RunContext) -> Result<(), failure::Error> {
    let cloud = ctx.config.cloud.as_ref().ok_or_else(|| failure::err_msg("uninstall requires a cloud target"))?;

    detach_acrs(ctx).await?;

    let rg = ResourceGroupRef { subscription_id: cloud.subscription_id.clone(), name: cloud.resource_group().to_string() };
    let resources = ctx.cloud.list_resources_in_group(&rg).await.map_err(|e| failure::format_err!("{}", e))?;

    let (ours, others): (Vec<_>, Vec<_>) = resources.into_iter().partition(|(_, _, tags)| tags.get("tyger-environment").map(|v| v == &ctx.config.environment_name).unwrap_or(false));

    if others.is_empty() {
        match ctx.cloud.resource_group_delete(&rg).await {
            Ok(()) => return Ok(()),
            Err(CloudError::AuthorizationFailed(_)) => {
                // Fall through to per-resource deletion.
            }
            Err(e) => return Err(failure::format_err!("{}", e)),
        }
    }

    delete_resources_concurrently(ctx, &ours).await
}

async fn detach_acrs(ctx: &RunContext) -> Result<(), failure::Error> {
    let compute = &ctx.config.cloud.as_ref().unwrap().compute;
    for cluster in &compute.clusters {
        let existing = ctx.cloud.cluster_get(&cluster.name).await.map_err(|e| failure::format_err!("{}", e))?;
        let kubelet_object_id = match existing.and_then(|c| c.kubelet_identity_object_id) {
            Some(id) => id,
            None => continue,
        };
        for registry in &compute.private_container_registries {
            let scope = format!("/registries/{}", registry);
            match ctx.cloud.role_assignment_delete(&scope, ACR_PULL_ROLE_DEFINITION_ID, &kubelet_object_id).await {
                Ok(()) => {}
                Err(CloudError::NotFound(_)) => {}
                Err(e) => return Err(failure::format_err!("{}", e)),
            }
        }
    }
    Ok(())
}

async fn delete_resources_concurrently(ctx: &RunContext, resources: &[(String, String, std::collections::BTreeMap<String, String>)]) -> Result<(), failure::Error> {
    for (id, resource_type, _tags) in resources {
        let cloud_client = ctx.cloud.clone();
        let id = id.clone();
        let resource_type = resource_type.clone();
        new_promise(ctx.cancel.clone(), &ctx.group, move |_cancel| async move {
            let (namespace, kind) = resource_type.split_once('/').unwrap_or(("Microsoft.Resources", resource_type.as_str()));
            let api_version = cloud_client.provider_default_api_version(namespace, kind).await.map_err(|e| failure::format_err!("{}", e))?;
            cloud_client.delete_resource_by_id(&id, &api_version).await.map_err(|e| failure::format_err!("{}", e))
        });
    }

    let outcomes = ctx.group.await_all().await;
    let real_errors: Vec<PromiseError> = outcomes.into_iter().filter(|e| !e.is_dependency_failed()).collect();
    telemetry::aggregate(&ctx.errors, &real_errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildinfo::BuildInfo;
    use crate::cloud::FakeCloud;
    use crate::helm::FakeHelm;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn config() -> tyger_installer_definitions::EnvironmentConfig {
        serde_yaml::from_str(
            r#"
environmentName: abc
cloud:
  tenantId: t
  subscriptionId: sub
  defaultLocation: westus
  compute: { clusters: [{name: abc, apiHost: true, userNodePools: [{name: cpunp, vmSize: Standard_DS12_v2, minCount: 0, maxCount: 10}]}], managementPrincipals: [{kind: Group, objectId: g1}], privateContainerRegistries: [myregistry] }
  storage: { logs: { name: abclogs }, buffers: [] }
  database: { serverName: tyger-abc, computeTier: GeneralPurpose, vmSize: Standard_D2s_v3, initialDatabaseSizeGb: 128, backupRetentionDays: 7 }
api:
  domainName: abc.westus.cloudapp.azure.com
  auth: { tenantId: t }
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn deletes_whole_group_when_no_other_resources_present() {
        let cloud = Arc::new(FakeCloud::new());
        let ctx = RunContext::new(config(), BuildInfo::release(), cloud.clone(), Arc::new(FakeHelm::new()));

        let rg = ResourceGroupRef { subscription_id: "sub".into(), name: "abc".into() };
        cloud.resource_group_create_or_update(&rg, "westus").await.unwrap();

        run(&ctx).await.unwrap();
        assert!(!cloud.resource_group_exists(&rg).await.unwrap());
    }

    #[tokio::test]
    async fn falls_back_to_per_resource_delete_when_group_delete_forbidden() {
        let cloud = Arc::new(FakeCloud::new());
        let ctx = RunContext::new(config(), BuildInfo::release(), cloud.clone(), Arc::new(FakeHelm::new()));

        let rg = ResourceGroupRef { subscription_id: "sub".into(), name: "abc".into() };
        cloud.resource_group_create_or_update(&rg, "westus").await.unwrap();
        let mut tags = BTreeMap::new();
        tags.insert("tyger-environment".to_string(), "abc".to_string());
        cloud.register_resource("abc", "/storageAccounts/abclogs", tags);
        cloud.forbid_resource_group_delete();

        run(&ctx).await.unwrap();
    }
}
