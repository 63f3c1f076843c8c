/// PostgreSQL step: creates or reconciles the Postgres flexible server,
/// then configures its firewall and database roles.
///
/// The role/firewall/admin setup talks to the server directly over a
/// short-lived SQL connection rather than through the ARM facade, so it
/// gets its own narrow `PostgresAdmin` trait (mirroring C3/C4/C5's
/// fake/live split) instead of growing `CloudProvider` with a
/// connection-oriented operation that doesn't fit its resource-CRUD
/// shape.
use async_trait::async_trait;
use tyger_installer_definitions::database::{DatabaseConfig, AAD_TOKEN_SCOPE, OWNERS_ROLE};

use crate::context::RunContext;
use crate::preflight::CallerIdentity;

const TEMP_FIREWALL_RULE: &str = "tyger-installer-temporary";
const PERMANENT_FIREWALL_RULE: &str = "AllowAllAzureServicesAndResources";
const FIREWALL_RETRY_ATTEMPTS: u32 = 6;

#[async_trait]
pub trait PostgresAdmin: Send + Sync {
    /// Open a connection authenticated with `aad_token` as the
    /// password for `principal_display_name`, then run the fixed
    /// `CREATE ROLE`/`GRANT` sequence.
    async fn configure_roles(&self, fqdn: &str, aad_token: &str, principal_display_name: &str, migration_runner_identity_name: &str) -> Result<(), failure::Error>;
}

pub struct FakePostgresAdmin {
    pub calls: std::sync::Mutex<Vec<(String, String)>>,
}

impl Default for FakePostgresAdmin {
    fn default() -> Self {
        FakePostgresAdmin { calls: std::sync::Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl PostgresAdmin for FakePostgresAdmin {
    async fn configure_roles(&self, fqdn: &str, _aad_token: &str, principal_display_name: &str, _migration_runner_identity_name: &str) -> Result<(), failure::Error> {
        self.calls.lock().unwrap().push((fqdn.to_string(), principal_display_name.to_string()));
        Ok(())
    }
}

#[cfg(feature = "live")]
pub struct LivePostgresAdmin;

#[cfg(feature = "live")]
#[async_trait]
impl PostgresAdmin for LivePostgresAdmin {
    async fn configure_roles(&self, fqdn: &str, aad_token: &str, principal_display_name: &str, migration_runner_identity_name: &str) -> Result<(), failure::Error> {
        let connector = native_tls::TlsConnector::new().map_err(|e| failure::format_err!("tls: {}", e))?;
        let connector = postgres_native_tls::MakeTlsConnector::new(connector);
        let config = format!("host={} port=5432 user={} password={} dbname=postgres sslmode=verify-full", fqdn, principal_display_name, aad_token);
        let (client, connection) = tokio_postgres::connect(&config, connector).await.map_err(|e| failure::format_err!("postgres connect: {}", e))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                log::error!("postgres connection error: {}", e);
            }
        });

        client
            .batch_execute(&format!(
                r#"
                DO $$ BEGIN
                  IF NOT EXISTS (SELECT FROM pg_roles WHERE rolname = '{owners}') THEN
                    CREATE ROLE "{owners}";
                  END IF;
                END $$;
                GRANT "{owners}" TO "{migration_runner}" WITH ADMIN TRUE;
                GRANT "{owners}" TO "{principal}";
                "#,
                owners = OWNERS_ROLE,
                migration_runner = migration_runner_identity_name,
                principal = principal_display_name,
            ))
            .await
            .map_err(|e| failure::format_err!("postgres role setup: {}", e))
    }
}

#[derive(Clone)]
pub struct DatabaseResult {
    pub fqdn: String,
}

pub async fn ensure(
    ctx: &RunContext,
    config: &DatabaseConfig,
    admin: &dyn PostgresAdmin,
    caller: &CallerIdentity,
    aad_token: &str,
    migration_runner_identity_name: &str,
) -> Result<DatabaseResult, failure::Error> {
    let server = ctx
        .cloud
        .db_create_or_update(
            &config.server_name,
            config.location(),
            &config.compute_tier,
            &config.vm_size,
            &config.postgres_major_version().to_string(),
            config.initial_database_size_gb,
            config.backup_retention_days.max(0) as u32,
            config.backup_geo_redundancy,
            &ctx.environment_tags(),
        )
        .await
        .map_err(|e| failure::format_err!("{}", e))?;

    if tyger_installer_definitions::tags::db_already_configured(&server.tags, &ctx.config.environment_name) {
        return Ok(DatabaseResult { fqdn: server.fqdn });
    }

    ctx.cloud
        .db_admin_begin_create(&config.server_name, &caller.object_id, &caller.display_name)
        .await
        .map_err(|e| failure::format_err!("{}", e))?;

    create_firewall_rule_with_retry(ctx, &config.server_name, TEMP_FIREWALL_RULE, "0.0.0.0", "255.255.255.255").await?;

    admin.configure_roles(&server.fqdn, aad_token, &caller.display_name, migration_runner_identity_name).await?;

    create_firewall_rule_with_retry(ctx, &config.server_name, PERMANENT_FIREWALL_RULE, "0.0.0.0", "0.0.0.0").await?;
    ctx.cloud.db_firewall_delete(&config.server_name, TEMP_FIREWALL_RULE).await.map_err(|e| failure::format_err!("{}", e))?;

    let configured_tags = tyger_installer_definitions::tags::db_configured_tags(&ctx.config.environment_name);
    ctx.cloud.tags_create_or_update_at_scope(&server.id, &configured_tags).await.map_err(|e| failure::format_err!("{}", e))?;

    let _ = AAD_TOKEN_SCOPE; // the caller obtains `aad_token` for this scope before calling `ensure`

    Ok(DatabaseResult { fqdn: server.fqdn })
}

async fn create_firewall_rule_with_retry(ctx: &RunContext, server_name: &str, rule_name: &str, start_ip: &str, end_ip: &str) -> Result<(), failure::Error> {
    use crate::cloud::CloudError;
    let mut attempts = 0;
    loop {
        match ctx.cloud.db_firewall_create_or_update(server_name, rule_name, start_ip, end_ip).await {
            Ok(()) => return Ok(()),
            Err(CloudError::Transient(_, _)) if attempts < FIREWALL_RETRY_ATTEMPTS => {
                attempts += 1;
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
            Err(e) => return Err(failure::format_err!("{}", e)),
        }
    }
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
    async fn first_run_configures_roles_second_run_skips() {
        let ctx = RunContext::new(config(), BuildInfo::release(), Arc::new(FakeCloud::new()), Arc::new(FakeHelm::new()));
        let mut db = ctx.config.cloud.as_ref().unwrap().database.clone();
        db.normalize("westus");
        let admin = FakePostgresAdmin::default();
        let caller = CallerIdentity { object_id: "caller-oid".into(), display_name: "caller@example.com".into(), is_application: false };

        ensure(&ctx, &db, &admin, &caller, "fake-token", "tyger-migration-runner").await.unwrap();
        assert_eq!(admin.calls.lock().unwrap().len(), 1);

        ensure(&ctx, &db, &admin, &caller, "fake-token", "tyger-migration-runner").await.unwrap();
        assert_eq!(admin.calls.lock().unwrap().len(), 1, "second run must skip admin/role/firewall setup");
    }
}
