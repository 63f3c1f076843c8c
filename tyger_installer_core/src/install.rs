/// Install orchestrator: the step DAG that brings an environment up to
/// its desired state. Every step after the two gates runs as a Promise
/// (C2), so independent work (clusters, identities, storage accounts,
/// Helm releases) proceeds concurrently and a single failure only stops
/// what genuinely depended on it.
use std::sync::Arc;

use serde_yaml::{Mapping, Value};

use crate::cloud::ManagedIdentity;
use crate::context::RunContext;
use crate::preflight::{self, CallerIdentity};
use crate::promise::{new_promise, new_promise_after, AnyPromise, Promise};
use crate::steps::database::PostgresAdmin;
use crate::steps::{cluster, database, federated_credential, helm_charts, identity, namespace_rbac, resource_group, storage};
use crate::telemetry;
use tyger_installer_definitions::database::AAD_TOKEN_SCOPE;

pub async fn run(ctx: &RunContext, admin: Arc<dyn PostgresAdmin>) -> Result<(), failure::Error> {
    let cloud_cfg = ctx.config.cloud.clone().ok_or_else(|| failure::err_msg("install requires a cloud target"))?;

    // Step 1: resource-group gate.
    resource_group::ensure(ctx).await?;

    // Step 2: preflight gate. An `already-logged-error` here must abort
    // before anything is spawned, same as the resource-group gate.
    let (object_id, display_name, is_application) = ctx.cloud.current_caller_identity().await.map_err(|e| failure::format_err!("{}", e))?;
    let caller = CallerIdentity { object_id, display_name, is_application };
    preflight::run(ctx, &caller).await?;

    // Step 3: cluster + identity promises, all spawned concurrently.
    let registries = cloud_cfg.compute.private_container_registries.clone();
    let mut api_host_cluster: Option<Promise<cluster::ClusterResult>> = None;
    let mut cluster_promises = Vec::new();
    for cluster_cfg in cloud_cfg.compute.clusters.clone() {
        let ctx = ctx.clone();
        let registries = registries.clone();
        let is_api_host = cluster_cfg.api_host;
        let promise = new_promise(ctx.cancel.clone(), &ctx.group, move |_cancel| async move { cluster::ensure(&ctx, &cluster_cfg, &registries).await });
        if is_api_host {
            api_host_cluster = Some(promise.clone());
        }
        cluster_promises.push(promise);
    }
    let api_host_cluster = api_host_cluster.ok_or_else(|| failure::err_msg("compute.clusters must mark exactly one cluster as apiHost"))?;

    let server_identity = spawn_identity(ctx, identity::TYGER_SERVER_IDENTITY_NAME);
    let migration_identity = spawn_identity(ctx, identity::TYGER_MIGRATION_RUNNER_IDENTITY_NAME);

    // Step 4: federated credential per identity, after the API-host
    // cluster (for its OIDC issuer URL) and that identity.
    spawn_federated_credential(ctx, &api_host_cluster, &server_identity, identity::TYGER_SERVER_IDENTITY_NAME);
    spawn_federated_credential(ctx, &api_host_cluster, &migration_identity, identity::TYGER_MIGRATION_RUNNER_IDENTITY_NAME);

    // Step 5: admin kubeconfig, after the API-host cluster; binds `ctx.k8s()`.
    let kubeconfig_ready = {
        let ctx = ctx.clone();
        let api_host_cluster = api_host_cluster.clone();
        new_promise_after::<(), _, _>(ctx.cancel.clone(), &ctx.group, vec![api_host_cluster.erased()], move |_cancel| async move {
            let result = api_host_cluster.resolve().await.map_err(|e| failure::format_err!("{}", e))?;
            // A caller that already bound `ctx.k8s()` ahead of time (the
            // live CLI never does; integration tests use it to seed a
            // `FakeK8s` with state a bare `FakeHelm` install can't
            // produce, like a migration-runner pod's logs) keeps it.
            if ctx.k8s.get().is_none() {
                let raw = ctx.cloud.cluster_list_admin_credentials(&result.cluster.name).await.map_err(|e| failure::format_err!("{}", e))?;
                let client = crate::k8s::client_from_kubeconfig(&raw).await?;
                ctx.set_k8s(client).await;
            }
            Ok(())
        })
    };

    // Steps 6+7: namespace then cluster RBAC, after the kubeconfig.
    // `namespace_rbac::ensure` performs both in one pass (C7.7).
    let principals = cloud_cfg.compute.management_principals.clone();
    let namespace_rbac_ready = {
        let ctx = ctx.clone();
        let kubeconfig_ready = kubeconfig_ready.clone();
        new_promise_after::<(), _, _>(ctx.cancel.clone(), &ctx.group, vec![kubeconfig_ready.erased()], move |_cancel| async move {
            kubeconfig_ready.resolve().await.map_err(|e| failure::format_err!("{}", e))?;
            namespace_rbac::ensure(&ctx, &principals).await
        })
    };

    // Step 8: storage accounts, database, and the Traefik/cert-manager/
    // nvidia-device-plugin Helm releases — all depend on the kubeconfig
    // and the Tyger-server identity, and run in parallel with (7).
    let storage_cfg = cloud_cfg.storage.clone();
    let mut storage_promises = Vec::new();
    for (account, is_logs) in storage_cfg.all_accounts().into_iter().map(|a| a.clone()).zip([true].into_iter().chain(std::iter::repeat(false))) {
        storage_promises.push(spawn_storage(ctx, &kubeconfig_ready, &server_identity, account, is_logs));
    }

    let database_promise = spawn_database(ctx, &kubeconfig_ready, &server_identity, &migration_identity, admin.clone(), &caller, cloud_cfg.database.clone());

    let traefik_ready = spawn_helm(ctx, &kubeconfig_ready, |ctx| Box::pin(async move { helm_charts::install_traefik(&ctx).await }));
    let cert_manager_ready = spawn_helm(ctx, &kubeconfig_ready, |ctx| Box::pin(async move { helm_charts::install_cert_manager(&ctx).await }));
    let nvidia_ready = spawn_helm(ctx, &kubeconfig_ready, |ctx| Box::pin(async move { helm_charts::install_nvidia_device_plugin(&ctx).await }));

    // The Tyger control-plane chart needs every identity's client id,
    // the reconciled storage/database facts, and a cluster ready to
    // receive ingress traffic, so it waits on all of the above.
    spawn_tyger_install(ctx, &server_identity, &migration_identity, &storage_promises, &database_promise, &namespace_rbac_ready, &traefik_ready, &cert_manager_ready, &nvidia_ready);

    // Step 9: await everything and aggregate.
    let errors = ctx.group.await_all().await;
    telemetry::aggregate(&ctx.errors, &errors)
}

fn spawn_identity(ctx: &RunContext, name: &'static str) -> Promise<ManagedIdentity> {
    let ctx = ctx.clone();
    new_promise(ctx.cancel.clone(), &ctx.group, move |_cancel| async move { identity::ensure(&ctx, name).await })
}

fn spawn_federated_credential(ctx: &RunContext, api_host_cluster: &Promise<cluster::ClusterResult>, identity_promise: &Promise<ManagedIdentity>, identity_name: &'static str) {
    let ctx = ctx.clone();
    let api_host_cluster = api_host_cluster.clone();
    let identity_promise = identity_promise.clone();
    let deps: Vec<Arc<dyn AnyPromise>> = vec![api_host_cluster.erased(), identity_promise.erased()];
    new_promise_after::<(), _, _>(ctx.cancel.clone(), &ctx.group, deps, move |_cancel| async move {
        let cluster_result = api_host_cluster.resolve().await.map_err(|e| failure::format_err!("{}", e))?;
        let identity = identity_promise.resolve().await.map_err(|e| failure::format_err!("{}", e))?;
        let oidc_issuer_url = cluster_result.cluster.oidc_issuer_url.ok_or_else(|| failure::err_msg("api-host cluster has no OIDC issuer URL"))?;
        federated_credential::ensure(&ctx, &identity, identity_name, &oidc_issuer_url).await
    });
}

fn spawn_storage(
    ctx: &RunContext,
    kubeconfig_ready: &Promise<()>,
    server_identity: &Promise<ManagedIdentity>,
    account: tyger_installer_definitions::storage::StorageAccountConfig,
    is_logs_account: bool,
) -> Promise<crate::cloud::StorageAccount> {
    let ctx = ctx.clone();
    let kubeconfig_ready = kubeconfig_ready.clone();
    let server_identity = server_identity.clone();
    let deps: Vec<Arc<dyn AnyPromise>> = vec![kubeconfig_ready.erased(), server_identity.erased()];
    new_promise_after(ctx.cancel.clone(), &ctx.group, deps, move |_cancel| async move {
        kubeconfig_ready.resolve().await.map_err(|e| failure::format_err!("{}", e))?;
        let identity = server_identity.resolve().await.map_err(|e| failure::format_err!("{}", e))?;
        storage::ensure(&ctx, &account, &identity.principal_id, is_logs_account).await
    })
}

#[allow(clippy::too_many_arguments)]
fn spawn_database(
    ctx: &RunContext,
    kubeconfig_ready: &Promise<()>,
    server_identity: &Promise<ManagedIdentity>,
    migration_identity: &Promise<ManagedIdentity>,
    admin: Arc<dyn PostgresAdmin>,
    caller: &CallerIdentity,
    config: tyger_installer_definitions::database::DatabaseConfig,
) -> Promise<database::DatabaseResult> {
    let ctx = ctx.clone();
    let kubeconfig_ready = kubeconfig_ready.clone();
    let server_identity = server_identity.clone();
    let migration_identity = migration_identity.clone();
    let caller = caller.clone();
    let deps: Vec<Arc<dyn AnyPromise>> = vec![kubeconfig_ready.erased(), server_identity.erased(), migration_identity.erased()];
    new_promise_after(ctx.cancel.clone(), &ctx.group, deps, move |_cancel| async move {
        kubeconfig_ready.resolve().await.map_err(|e| failure::format_err!("{}", e))?;
        server_identity.resolve().await.map_err(|e| failure::format_err!("{}", e))?;
        migration_identity.resolve().await.map_err(|e| failure::format_err!("{}", e))?;
        let aad_token = ctx.cloud.acquire_aad_token(AAD_TOKEN_SCOPE).await.map_err(|e| failure::format_err!("{}", e))?;
        database::ensure(&ctx, &config, admin.as_ref(), &caller, &aad_token, identity::TYGER_MIGRATION_RUNNER_IDENTITY_NAME).await
    })
}

fn spawn_helm<F>(ctx: &RunContext, kubeconfig_ready: &Promise<()>, body: F) -> Promise<()>
where
    F: FnOnce(RunContext) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), failure::Error>> + Send>> + Send + 'static,
{
    let ctx = ctx.clone();
    let kubeconfig_ready = kubeconfig_ready.clone();
    new_promise_after(ctx.cancel.clone(), &ctx.group, vec![kubeconfig_ready.erased()], move |_cancel| async move {
        kubeconfig_ready.resolve().await.map_err(|e| failure::format_err!("{}", e))?;
        body(ctx).await
    })
}

#[allow(clippy::too_many_arguments)]
fn spawn_tyger_install(
    ctx: &RunContext,
    server_identity: &Promise<ManagedIdentity>,
    migration_identity: &Promise<ManagedIdentity>,
    storage_promises: &[Promise<crate::cloud::StorageAccount>],
    database_promise: &Promise<database::DatabaseResult>,
    namespace_rbac_ready: &Promise<()>,
    traefik_ready: &Promise<()>,
    cert_manager_ready: &Promise<()>,
    nvidia_ready: &Promise<()>,
) {
    let ctx = ctx.clone();
    let server_identity = server_identity.clone();
    let migration_identity = migration_identity.clone();
    let storage_promises = storage_promises.to_vec();
    let database_promise = database_promise.clone();
    let namespace_rbac_ready = namespace_rbac_ready.clone();
    let traefik_ready = traefik_ready.clone();
    let cert_manager_ready = cert_manager_ready.clone();
    let nvidia_ready = nvidia_ready.clone();

    let deps: Vec<Arc<dyn AnyPromise>> = storage_promises
        .iter()
        .map(|p| p.erased())
        .chain([
            server_identity.erased(),
            migration_identity.erased(),
            database_promise.erased(),
            namespace_rbac_ready.erased(),
            traefik_ready.erased(),
            cert_manager_ready.erased(),
            nvidia_ready.erased(),
        ])
        .collect();

    new_promise_after::<(), _, _>(ctx.cancel.clone(), &ctx.group, deps, move |_cancel| async move {
        let server = server_identity.resolve().await.map_err(|e| failure::format_err!("{}", e))?;
        let migration = migration_identity.resolve().await.map_err(|e| failure::format_err!("{}", e))?;
        let mut accounts = Vec::with_capacity(storage_promises.len());
        for p in &storage_promises {
            accounts.push(p.resolve().await.map_err(|e| failure::format_err!("{}", e))?);
        }
        let database = database_promise.resolve().await.map_err(|e| failure::format_err!("{}", e))?;
        namespace_rbac_ready.resolve().await.map_err(|e| failure::format_err!("{}", e))?;

        let computed = computed_tyger_values(&ctx, &server, &migration, &accounts, &database);
        helm_charts::install_tyger(&ctx, &computed).await
    });
}

/// Values the install DAG itself computes rather than the user
/// (identity client ids, storage endpoints, database FQDN) for the
/// Tyger chart's value set.
fn computed_tyger_values(ctx: &RunContext, server: &ManagedIdentity, migration: &ManagedIdentity, storage: &[crate::cloud::StorageAccount], database: &database::DatabaseResult) -> Value {
    let mut identities = Mapping::new();
    identities.insert(Value::from("serverClientId"), Value::from(server.client_id.clone()));
    identities.insert(Value::from("migrationRunnerClientId"), Value::from(migration.client_id.clone()));

    let buffer_endpoints: Vec<Value> = storage.iter().skip(1).map(|a| Value::from(a.blob_endpoint.clone())).collect();
    let logs_endpoint = storage.first().map(|a| a.blob_endpoint.clone()).unwrap_or_default();

    let mut root = Mapping::new();
    root.insert(Value::from("identities"), Value::Mapping(identities));
    root.insert(Value::from("logArchiveEndpoint"), Value::from(logs_endpoint));
    root.insert(Value::from("bufferEndpoints"), Value::Sequence(buffer_endpoints));
    root.insert(Value::from("databaseFqdn"), Value::from(database.fqdn.clone()));
    root.insert(Value::from("apiAppUri"), Value::from(ctx.config.api.auth.api_app_uri().to_string()));
    root.insert(Value::from("cliAppUri"), Value::from(ctx.config.api.auth.cli_app_uri().to_string()));
    Value::Mapping(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildinfo::BuildInfo;
    use crate::cloud::{CloudProvider, FakeCloud};
    use crate::health::FakeHealthChecker;
    use crate::helm::FakeHelm;
    use crate::k8s::{FakeK8s, K8sClient, PodSpec};
    use crate::steps::database::FakePostgresAdmin;
    use std::sync::Arc;

    fn config() -> tyger_installer_definitions::EnvironmentConfig {
        serde_yaml::from_str(
            r#"
environmentName: abc
cloud:
  tenantId: t
  subscriptionId: sub
  defaultLocation: westus
  compute:
    clusters: [{name: abc, apiHost: true, userNodePools: [{name: cpunp, vmSize: Standard_DS12_v2, minCount: 0, maxCount: 10}]}]
    managementPrincipals: [{kind: Group, objectId: group-oid}]
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
    async fn install_dag_completes_and_reconciles_every_resource() {
        let mut env = config();
        env.normalize();

        let cloud = Arc::new(FakeCloud::new());
        let helm = Arc::new(FakeHelm::new());
        let ctx = RunContext::new(env, BuildInfo::release(), cloud.clone(), helm.clone()).with_health(Arc::new(FakeHealthChecker::new()));
        let admin: Arc<dyn database::PostgresAdmin> = Arc::new(FakePostgresAdmin::default());

        // `FakeHelm::install_chart` only records the values it was given;
        // it never actually runs the Tyger chart's migration-runner Job,
        // so the DAG's post-install log scan needs a pod seeded ahead of
        // time. Binding `ctx.k8s()` before `run` starts makes the
        // kubeconfig step reuse this instance instead of building its own.
        let k8s = Arc::new(FakeK8s::new());
        k8s.pod_create(&PodSpec {
            name: "tyger-migration-runner-0".to_string(),
            namespace: "tyger".to_string(),
            image: "n/a".to_string(),
            command: vec![],
            env: Default::default(),
            labels: Default::default(),
        })
        .await
        .unwrap();
        k8s.set_pod_logs("tyger", "tyger-migration-runner-0", "MigrationRunner[UsingMostRecentDatabaseVersion]");
        ctx.set_k8s(k8s).await;

        run(&ctx, admin).await.unwrap();

        assert!(cloud.cluster_get("abc").await.unwrap().is_some());
        assert!(cloud.storage_get("abclogs").await.unwrap().is_some());
        assert!(cloud.storage_get("abcbuf1").await.unwrap().is_some());
        assert!(cloud.db_get("tyger-abc").await.unwrap().is_some());
        assert!(helm.values_for("traefik").is_some());
        assert!(helm.values_for("tyger").is_some());
    }
}
