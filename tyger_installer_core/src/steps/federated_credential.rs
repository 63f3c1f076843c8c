/// Federated credential step: wires each cluster's workload-identity
/// OIDC issuer to the managed identities that need to authenticate as
/// it from inside a pod.
use crate::cloud::ManagedIdentity;
use crate::context::RunContext;

pub const AUDIENCE: &str = "api://AzureADTokenExchange";

pub async fn ensure(ctx: &RunContext, identity: &ManagedIdentity, identity_name: &str, oidc_issuer_url: &str) -> Result<(), failure::Error> {
    let subject = format!("system:serviceaccount:tyger:{}", identity_name);
    ctx.cloud
        .federated_identity_create_or_update(identity, oidc_issuer_url, &subject, AUDIENCE)
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
    async fn upserts_federated_credential() {
        let ctx = RunContext::new(config(), BuildInfo::release(), Arc::new(FakeCloud::new()), Arc::new(FakeHelm::new()));
        let identity = ctx.cloud.identity_create_or_update("tyger-server", "westus", &ctx.environment_tags()).await.unwrap();
        ensure(&ctx, &identity, "tyger-server", "https://fake-oidc.example/abc").await.unwrap();
    }
}
