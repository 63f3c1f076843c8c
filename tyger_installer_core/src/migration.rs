/// Migration controller: drives the server's own `database
/// list-versions`/`database migrate` subcommands from an ephemeral
/// command-host pod and a chained-InitContainer `Job`, rather than
/// reimplementing migration bookkeeping here.
use std::collections::BTreeMap;
use std::time::Duration;

use serde_derive::Deserialize;

use crate::context::RunContext;
use crate::k8s::{JobContainerSpec, PodPhase, PodSpec};

const NAMESPACE: &str = "tyger";
const COMMAND_HOST_POD_PREFIX: &str = "tyger-migration-command-host";
const COMMAND_HOST_WAIT: Duration = Duration::from_secs(5 * 60);
const JOB_POLL_PERIOD: Duration = Duration::from_secs(2);
const LIST_VERSIONS_COMMAND: &str = "/app/tyger.server database list-versions";

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct MigrationVersion {
    pub id: String,
    pub description: String,
    pub state: String,
}

/// `listVersions(all)`: `all = false` trims the result to the suffix
/// after the last `state == "complete"` entry (i.e. only pending/running
/// migrations).
pub async fn list_versions(ctx: &RunContext, all: bool) -> Result<Vec<MigrationVersion>, failure::Error> {
    let pod_name = format!("{}-{}", COMMAND_HOST_POD_PREFIX, std::process::id());
    let k8s = ctx.k8s();

    let spec = PodSpec {
        name: pod_name.clone(),
        namespace: NAMESPACE.to_string(),
        image: ctx.build.migration_runner_image.clone(),
        command: vec!["sleep".to_string(), "infinity".to_string()],
        env: BTreeMap::new(),
        labels: BTreeMap::new(),
    };
    k8s.pod_create(&spec).await.map_err(|e| failure::format_err!("{}", e))?;
    k8s.pod_wait_for_phase(NAMESPACE, &pod_name, PodPhase::Running, COMMAND_HOST_WAIT).await.map_err(|e| failure::format_err!("{}", e))?;

    let command: Vec<String> = LIST_VERSIONS_COMMAND.split_whitespace().map(String::from).collect();
    let (stdout, stderr) = k8s.pod_exec(NAMESPACE, &pod_name, &command).await.map_err(|e| failure::format_err!("{}", e))?;
    k8s.pod_delete(NAMESPACE, &pod_name).await.map_err(|e| failure::format_err!("{}", e))?;

    let mut versions: Vec<MigrationVersion> = serde_json::from_str(&stdout).map_err(|e| failure::format_err!("parsing database list-versions output: {} (stderr: {})", e, stderr))?;

    if !all {
        if let Some(last_complete) = versions.iter().rposition(|v| v.state == "complete") {
            versions = versions.split_off(last_complete + 1);
        }
    }

    Ok(versions)
}

/// `applyMigrations(target, latest, wait)`: `target` pins an explicit
/// version id; `None` with `latest = true` means "every pending
/// version"; `wait` polls the Job to completion at `JOB_POLL_PERIOD`.
pub async fn apply_migrations(ctx: &RunContext, target: Option<&str>, latest: bool, wait: bool) -> Result<(), failure::Error> {
    let pending = list_versions(ctx, false).await?;
    let ids: Vec<String> = match target {
        Some(target_id) => {
            let mut selected: Vec<String> = pending.iter().map(|v| v.id.clone()).take_while(|id| id != target_id).collect();
            if pending.iter().any(|v| &v.id == target_id) {
                selected.push(target_id.to_string());
            } else {
                return Err(failure::format_err!("target migration version '{}' is not a pending migration", target_id));
            }
            selected
        }
        None if latest => pending.iter().map(|v| v.id.clone()).collect(),
        None => return Err(failure::err_msg("applyMigrations requires either a target version or latest=true")),
    };

    if ids.is_empty() {
        return Ok(());
    }

    let containers: Vec<JobContainerSpec> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| JobContainerSpec {
            name: format!("migrate-{}", i),
            image: ctx.build.migration_runner_image.clone(),
            command: vec!["database".to_string(), "migrate".to_string(), "--target-version".to_string(), id.clone()],
        })
        .collect();

    let (init_containers, main_container) = containers.split_at(containers.len() - 1);
    let job_name = format!("tyger-migration-{}", ids.last().unwrap());

    let k8s = ctx.k8s();
    k8s.job_create(NAMESPACE, &job_name, init_containers, &main_container[0]).await.map_err(|e| failure::format_err!("{}", e))?;

    if wait {
        let succeeded = k8s.job_wait_for_completion(NAMESPACE, &job_name, JOB_POLL_PERIOD).await.map_err(|e| failure::format_err!("{}", e))?;
        if !succeeded {
            return Err(failure::format_err!("migration job {} did not complete successfully", job_name));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildinfo::BuildInfo;
    use crate::cloud::FakeCloud;
    use crate::helm::FakeHelm;
    use crate::k8s::FakeK8s;
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

    async fn ctx_with_versions(stdout: &str) -> RunContext {
        let ctx = RunContext::new(config(), BuildInfo::release(), Arc::new(FakeCloud::new()), Arc::new(FakeHelm::new()));
        let k8s = Arc::new(FakeK8s::new());
        k8s.auto_run_pods_matching(COMMAND_HOST_POD_PREFIX);
        let pod_name = format!("{}-{}", COMMAND_HOST_POD_PREFIX, std::process::id());
        k8s.set_exec_response(NAMESPACE, &pod_name, stdout, "");
        ctx.set_k8s(k8s).await;
        ctx
    }

    #[tokio::test]
    async fn list_versions_trims_to_suffix_after_last_complete() {
        let stdout = r#"[{"id":"1","description":"a","state":"complete"},{"id":"2","description":"b","state":"complete"},{"id":"3","description":"c","state":"pending"}]"#;
        let ctx = ctx_with_versions(stdout).await;
        let versions = list_versions(&ctx, false).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].id, "3");
    }

    #[tokio::test]
    async fn list_versions_all_returns_everything() {
        let stdout = r#"[{"id":"1","description":"a","state":"complete"},{"id":"2","description":"b","state":"pending"}]"#;
        let ctx = ctx_with_versions(stdout).await;
        let versions = list_versions(&ctx, true).await.unwrap();
        assert_eq!(versions.len(), 2);
    }

    #[tokio::test]
    async fn apply_migrations_with_latest_chains_all_pending() {
        let stdout = r#"[{"id":"1","description":"a","state":"pending"},{"id":"2","description":"b","state":"pending"}]"#;
        let ctx = ctx_with_versions(stdout).await;
        apply_migrations(&ctx, None, true, true).await.unwrap();
    }

    #[tokio::test]
    async fn apply_migrations_with_no_pending_is_a_noop() {
        let stdout = "[]";
        let ctx = ctx_with_versions(stdout).await;
        apply_migrations(&ctx, None, true, true).await.unwrap();
    }

    #[tokio::test]
    async fn apply_migrations_with_explicit_target_stops_there() {
        let stdout = r#"[{"id":"1","description":"a","state":"pending"},{"id":"2","description":"b","state":"pending"},{"id":"3","description":"c","state":"pending"}]"#;
        let ctx = ctx_with_versions(stdout).await;
        apply_migrations(&ctx, Some("2"), false, true).await.unwrap();
    }

}
