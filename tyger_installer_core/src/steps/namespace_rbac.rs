/// Namespace + RBAC step: ensures the `tyger` namespace exists and
/// binds each management principal to it.
use tyger_installer_definitions::principal::ManagementPrincipal;

use crate::context::RunContext;
use crate::k8s::{K8sClient, RbacSubject, RoleRule};

pub const NAMESPACE: &str = "tyger";
pub const FULL_ACCESS_ROLE: &str = "tyger-full-access";
pub const FULL_ACCESS_BINDING: &str = "tyger-full-access-rolebinding";
pub const NODE_READER_CLUSTER_ROLE: &str = "tyger-node-reader";
pub const NODE_READER_BINDING: &str = "tyger-node-reader-rolebinding";

pub async fn ensure(ctx: &RunContext, principals: &[ManagementPrincipal]) -> Result<(), failure::Error> {
    let k8s = ctx.k8s();
    k8s.namespace_create_if_absent(NAMESPACE).await.map_err(|e| failure::format_err!("{}", e))?;

    let subjects = to_subjects(principals)?;

    let full_access_rule = RoleRule { api_groups: vec!["*".to_string()], resources: vec!["*".to_string()], verbs: vec!["*".to_string()] };
    k8s.role_upsert(NAMESPACE, FULL_ACCESS_ROLE, &[full_access_rule]).await.map_err(|e| failure::format_err!("{}", e))?;
    k8s.role_binding_upsert(NAMESPACE, FULL_ACCESS_BINDING, FULL_ACCESS_ROLE, &subjects).await.map_err(|e| failure::format_err!("{}", e))?;

    let node_reader_rule = RoleRule { api_groups: vec!["".to_string()], resources: vec!["nodes".to_string()], verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()] };
    k8s.cluster_role_upsert(NODE_READER_CLUSTER_ROLE, &[node_reader_rule]).await.map_err(|e| failure::format_err!("{}", e))?;
    k8s.cluster_role_binding_upsert(NODE_READER_BINDING, NODE_READER_CLUSTER_ROLE, &subjects).await.map_err(|e| failure::format_err!("{}", e))?;

    Ok(())
}

fn to_subjects(principals: &[ManagementPrincipal]) -> Result<Vec<RbacSubject>, failure::Error> {
    principals
        .iter()
        .map(|p| {
            let subject = p.to_subject()?;
            Ok(RbacSubject {
                kind: match subject.kind {
                    tyger_installer_definitions::principal::K8sSubjectKind::User => "User".to_string(),
                    tyger_installer_definitions::principal::K8sSubjectKind::Group => "Group".to_string(),
                },
                name: subject.name,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildinfo::BuildInfo;
    use crate::cloud::FakeCloud;
    use crate::helm::FakeHelm;
    use crate::k8s::FakeK8s;
    use std::sync::Arc;
    use tyger_installer_definitions::principal::PrincipalKind;

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
    async fn creates_namespace_roles_and_bindings() {
        let ctx = RunContext::new(config(), BuildInfo::release(), Arc::new(FakeCloud::new()), Arc::new(FakeHelm::new()));
        ctx.set_k8s(Arc::new(FakeK8s::new())).await;
        let principals = vec![ManagementPrincipal { kind: PrincipalKind::Group, object_id: "group-oid".into(), user_principal_name: None }];
        ensure(&ctx, &principals).await.unwrap();
    }
}
