/// Storage step: creates or reconciles the logs storage account and
/// every declared buffer storage account, plus their containers.
use tyger_installer_definitions::storage::{StorageAccountConfig, LOGS_CONTAINER};

use crate::cloud::StorageAccount;
use crate::context::RunContext;
use crate::telemetry::OrchestratorErrorKind;

/// Azure's built-in `Storage Blob Data Contributor` role.
const STORAGE_BLOB_DATA_CONTRIBUTOR_ROLE_ID: &str = "ba92f5b4-2d11-453d-a403-e96b0029c9fe";

pub async fn ensure(ctx: &RunContext, account: &StorageAccountConfig, server_identity_principal_id: &str, is_logs_account: bool) -> Result<StorageAccount, failure::Error> {
    let existing = ctx.cloud.storage_get(&account.name).await.map_err(|e| failure::format_err!("{}", e))?;
    if let Some(existing) = &existing {
        if let Some(owner) = existing.tags.get("tyger-environment") {
            if owner != &ctx.config.environment_name {
                return Err(OrchestratorErrorKind::Conflict("storage account".to_string(), account.name.clone(), owner.clone()).into());
            }
        }
    }

    let created = ctx
        .cloud
        .storage_create_or_update(&account.name, account.location(), account.sku(), &ctx.environment_tags())
        .await
        .map_err(|e| failure::format_err!("{}", e))?;

    if is_logs_account {
        ctx.cloud.storage_container_create_if_absent(&account.name, LOGS_CONTAINER).await.map_err(|e| failure::format_err!("{}", e))?;
    }

    ctx.cloud
        .role_assignment_create(&created.id, STORAGE_BLOB_DATA_CONTRIBUTOR_ROLE_ID, server_identity_principal_id)
        .await
        .map_err(|e| failure::format_err!("{}", e))?;

    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildinfo::BuildInfo;
    use crate::cloud::FakeCloud;
    use crate::helm::FakeHelm;
    use std::sync::Arc;

    fn config() -> tyger_installer_definitions::EnvironmentConfig {
        serde_yaml::from_str(
            r#"
environmentName: abc
cloud:
  tenantId: t
  subscriptionId: sub
  defaultLocation: westus
  compute: { clusters: [{name: abc, apiHost: true, userNodePools: []}], managementPrincipals: [] }
  storage: { logs: { name: abclogs }, buffers: [{name: abcbuf1}] }
  database: { serverName: tyger-abc, computeTier: GeneralPurpose, vmSize: Standard_D2s_v3, initialDatabaseSizeGb: 128, backupRetentionDays: 7 }
api:
  domainName: abc.westus.cloudapp.azure.com
  auth: { tenantId: t }
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn creates_logs_account_and_container() {
        let ctx = RunContext::new(config(), BuildInfo::release(), Arc::new(FakeCloud::new()), Arc::new(FakeHelm::new()));
        let mut logs = ctx.config.cloud.as_ref().unwrap().storage.logs.clone();
        logs.normalize("westus");
        let account = ensure(&ctx, &logs, "server-principal", true).await.unwrap();
        assert!(account.blob_endpoint.contains(&logs.name));
    }
}
