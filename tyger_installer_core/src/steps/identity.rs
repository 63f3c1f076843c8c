/// Managed-identity step: creates or reconciles each declared
/// user-assigned managed identity.
use crate::cloud::ManagedIdentity;
use crate::context::RunContext;

pub const TYGER_SERVER_IDENTITY_NAME: &str = "tyger-server";
pub const TYGER_MIGRATION_RUNNER_IDENTITY_NAME: &str = "tyger-migration-runner";

pub async fn ensure(ctx: &RunContext, name: &str) -> Result<ManagedIdentity, failure::Error> {
    let location = ctx.config.cloud.as_ref().map(|c| c.default_location.clone()).unwrap_or_default();
    ctx.cloud
        .identity_create_or_update(name, &location, &ctx.environment_tags())
        .await
        .map_err(|e| failure::format_err!("{}", e))
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
    async fn creates_both_identities() {
        let ctx = RunContext::new(config(), BuildInfo::release(), Arc::new(FakeCloud::new()), Arc::new(FakeHelm::new()));
        let server = ensure(&ctx, TYGER_SERVER_IDENTITY_NAME).await.unwrap();
        let migration = ensure(&ctx, TYGER_MIGRATION_RUNNER_IDENTITY_NAME).await.unwrap();
        assert_ne!(server.client_id, migration.client_id);
    }
}
