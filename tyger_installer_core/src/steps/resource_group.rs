/// Resource-group step: ensure the group exists at `defaultLocation`;
/// create if absent.
use crate::cloud::ResourceGroupRef;
use crate::context::RunContext;

pub async fn ensure(ctx: &RunContext) -> Result<(), failure::Error> {
    let cloud_cfg = ctx.config.cloud.as_ref().ok_or_else(|| failure::err_msg("resource-group step requires a cloud target"))?;
    let rg = ResourceGroupRef { subscription_id: cloud_cfg.subscription_id.clone(), name: ctx.resource_group() };
    if !ctx.cloud.resource_group_exists(&rg).await.map_err(|e| failure::format_err!("{}", e))? {
        ctx.cloud.resource_group_create_or_update(&rg, &cloud_cfg.default_location).await.map_err(|e| failure::format_err!("{}", e))?;
    }
    Ok(())
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
    async fn creates_group_once() {
        let cloud = Arc::new(FakeCloud::new());
        let ctx = RunContext::new(config(), BuildInfo::release(), cloud.clone(), Arc::new(FakeHelm::new()));
        ensure(&ctx).await.unwrap();
        ensure(&ctx).await.unwrap();
        let rg = ResourceGroupRef { subscription_id: "sub".into(), name: "abc".into() };
        assert!(cloud.resource_group_exists(&rg).await.unwrap());
    }
}
