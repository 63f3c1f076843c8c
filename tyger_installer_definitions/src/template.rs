/// A renderer of `tera` templates (jinja style).
///
/// Used to expand the embedded example `EnvironmentConfig` YAML
/// template with concrete values before parsing it.
use std::collections::BTreeMap;
use tera::{Context, Tera};

/// The canonical example configuration, with `{{ Placeholder }}`-style
/// variables:
/// `EnvironmentName, ResourceGroup, TenantId, SubscriptionId,
/// DefaultLocation, Principal{Kind,ObjectId,UserPrincipalName},
/// BufferStorageAccountName, LogsStorageAccountName, DomainName,
/// ApiTenantId`.
pub const EXAMPLE_TEMPLATE: &str = r#"
environmentName: {{ EnvironmentName }}
cloud:
  tenantId: {{ TenantId }}
  subscriptionId: {{ SubscriptionId }}
  defaultLocation: {{ DefaultLocation }}
  resourceGroup: {{ ResourceGroup }}
  compute:
    clusters:
    - name: {{ EnvironmentName }}
      apiHost: true
      userNodePools:
      - name: cpunp
        vmSize: Standard_DS12_v2
        minCount: 0
        maxCount: 10
    managementPrincipals:
    - kind: {{ PrincipalKind }}
      objectId: {{ PrincipalObjectId }}
      {% if PrincipalUserPrincipalName %}userPrincipalName: {{ PrincipalUserPrincipalName }}{% endif %}
  storage:
    logs:
      name: {{ LogsStorageAccountName }}
    buffers:
    - name: {{ BufferStorageAccountName }}
  database:
    serverName: {{ EnvironmentName }}-pg
    computeTier: GeneralPurpose
    vmSize: Standard_D2s_v3
    initialDatabaseSizeGb: 128
    backupRetentionDays: 7
api:
  domainName: {{ DomainName }}
  auth:
    tenantId: {{ ApiTenantId }}
"#;

/// Render `EXAMPLE_TEMPLATE` (or any other template string) with a
/// string-keyed context.
pub fn render(template: &str, values: &BTreeMap<String, String>) -> Result<String, failure::Error> {
    let mut ctx = Context::new();
    for (k, v) in values {
        ctx.insert(k, v);
    }
    let rendered = Tera::one_off(template, &ctx, false)
        .map_err(|e| failure::format_err!("failed to render configuration template: {}", e))?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvironmentConfig;

    #[test]
    fn renders_and_parses_example() {
        let mut values = BTreeMap::new();
        values.insert("EnvironmentName".into(), "abc".into());
        values.insert("ResourceGroup".into(), "abc".into());
        values.insert("TenantId".into(), "tenant".into());
        values.insert("SubscriptionId".into(), "sub".into());
        values.insert("DefaultLocation".into(), "westus".into());
        values.insert("PrincipalKind".into(), "User".into());
        values.insert("PrincipalObjectId".into(), "oid".into());
        values.insert("PrincipalUserPrincipalName".into(), "me@example.com".into());
        values.insert("BufferStorageAccountName".into(), "acc1".into());
        values.insert("LogsStorageAccountName".into(), "acc2".into());
        values.insert("DomainName".into(), "abc.westus.cloudapp.azure.com".into());
        values.insert("ApiTenantId".into(), "tenant".into());

        let rendered = render(EXAMPLE_TEMPLATE, &values).unwrap();
        let cfg: EnvironmentConfig = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(cfg.environment_name, "abc");
        assert_eq!(cfg.cloud.unwrap().storage.logs.name, "acc2");
    }
}
