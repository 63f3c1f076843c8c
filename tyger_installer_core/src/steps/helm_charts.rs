/// Helm install steps: installs the cluster add-ons (Traefik,
/// cert-manager, the NVIDIA device plugin) and the Tyger control-plane
/// chart itself, then waits for the server to report healthy.
use std::time::Duration;

use serde_yaml::Value;
use tyger_installer_definitions::config::HelmOverrides;

use crate::context::RunContext;
use crate::helm::{deep_merge, ChartRef};

const HEALTHCHECK_MAX_ATTEMPTS: u32 = 60;
const HEALTHCHECK_POLL_PERIOD: Duration = Duration::from_secs(1);
const MIGRATION_RUNNER_POD_PREFIX: &str = "tyger-migration-runner";

fn traefik_defaults() -> Value {
    serde_yaml::from_str("deployment:\n  replicas: 2\nservice:\n  type: LoadBalancer\n").unwrap()
}

fn cert_manager_defaults() -> Value {
    serde_yaml::from_str("installCRDs: true\n").unwrap()
}

fn nvidia_device_plugin_defaults() -> Value {
    serde_yaml::from_str("tolerations:\n- key: sku\n  operator: Equal\n  value: gpu\n  effect: NoSchedule\n").unwrap()
}

fn tyger_defaults(ctx: &RunContext) -> Value {
    serde_yaml::from_str(&format!(
        "hostname: {}\nauth:\n  tenantId: {}\n",
        ctx.config.api.domain_name, ctx.config.api.auth.tenant_id
    ))
    .unwrap()
}

fn overrides_for<'a>(overrides: Option<&'a HelmOverrides>, pick: impl Fn(&'a HelmOverrides) -> Option<&'a Value>) -> Value {
    overrides.and_then(pick).cloned().unwrap_or(Value::Null)
}

pub async fn install_traefik(ctx: &RunContext) -> Result<(), failure::Error> {
    let overrides = overrides_for(ctx.config.api.helm.as_ref(), |h| h.traefik.as_ref());
    let chart = ChartRef {
        release_name: "traefik".to_string(),
        namespace: "traefik".to_string(),
        chart: "traefik".to_string(),
        repo_url: Some("https://traefik.github.io/charts".to_string()),
        version: Some(ctx.build.traefik_chart_version.clone()),
    };
    let result = ctx.helm.install_chart(&chart, &traefik_defaults(), &overrides, false).await;
    if result.is_err() {
        let events = ctx.k8s().events_list("traefik").await.unwrap_or_default();
        for event in events.iter().filter(|e| e.event_type == "Warning") {
            log::warn!("traefik event: {} {}", event.reason, event.message);
        }
    }
    result.map(|_| ()).map_err(|e| failure::format_err!("{}", e))
}

pub async fn install_cert_manager(ctx: &RunContext) -> Result<(), failure::Error> {
    let overrides = overrides_for(ctx.config.api.helm.as_ref(), |h| h.cert_manager.as_ref());
    let chart = ChartRef {
        release_name: "cert-manager".to_string(),
        namespace: "cert-manager".to_string(),
        chart: "cert-manager".to_string(),
        repo_url: Some("https://charts.jetstack.io".to_string()),
        version: Some(ctx.build.cert_manager_chart_version.clone()),
    };
    ctx.helm.install_chart(&chart, &cert_manager_defaults(), &overrides, false).await.map(|_| ()).map_err(|e| failure::format_err!("{}", e))
}

pub async fn install_nvidia_device_plugin(ctx: &RunContext) -> Result<(), failure::Error> {
    let overrides = overrides_for(ctx.config.api.helm.as_ref(), |h| h.nvidia_device_plugin.as_ref());
    let chart = ChartRef {
        release_name: "nvidia-device-plugin".to_string(),
        namespace: "kube-system".to_string(),
        chart: "nvdp/nvidia-device-plugin".to_string(),
        repo_url: Some("https://nvidia.github.io/k8s-device-plugin".to_string()),
        version: Some(ctx.build.nvidia_device_plugin_chart_version.clone()),
    };
    ctx.helm.install_chart(&chart, &nvidia_device_plugin_defaults(), &overrides, false).await.map(|_| ()).map_err(|e| failure::format_err!("{}", e))
}

/// Installs the Tyger control plane, then waits for `/healthcheck` and
/// scans the migration-runner pod's logs for the version marker. Any
/// values the caller computes per-install (identity client ids) are
/// merged into `defaults` before the call rather than pulled in here.
pub async fn install_tyger(ctx: &RunContext, computed: &Value) -> Result<(), failure::Error> {
    let overrides = overrides_for(ctx.config.api.helm.as_ref(), |h| h.tyger.as_ref());
    let defaults = deep_merge(&tyger_defaults(ctx), computed);
    let chart = ChartRef {
        release_name: "tyger".to_string(),
        namespace: "tyger".to_string(),
        chart: ctx.build.tyger_chart_ref.clone(),
        repo_url: None,
        version: None,
    };
    ctx.helm.install_chart(&chart, &defaults, &overrides, false).await.map_err(|e| failure::format_err!("{}", e))?;

    wait_for_healthcheck(ctx, &ctx.config.api.domain_name).await?;
    scan_migration_runner_logs(ctx).await
}

async fn wait_for_healthcheck(ctx: &RunContext, domain_name: &str) -> Result<(), failure::Error> {
    let url = format!("https://{}/healthcheck", domain_name);
    for attempt in 0..HEALTHCHECK_MAX_ATTEMPTS {
        if ctx.health.check(&url).await {
            return Ok(());
        }
        if attempt + 1 < HEALTHCHECK_MAX_ATTEMPTS {
            tokio::time::sleep(HEALTHCHECK_POLL_PERIOD).await;
        }
    }
    Err(failure::format_err!("{} did not return 200 OK after {} attempts", url, HEALTHCHECK_MAX_ATTEMPTS))
}

async fn scan_migration_runner_logs(ctx: &RunContext) -> Result<(), failure::Error> {
    let k8s = ctx.k8s();
    let pod_name = k8s
        .pod_most_recent("tyger", MIGRATION_RUNNER_POD_PREFIX)
        .await
        .map_err(|e| failure::format_err!("{}", e))?
        .ok_or_else(|| failure::format_err!("no migration-runner pod found in namespace tyger"))?;

    let logs = k8s.pod_logs("tyger", &pod_name).await.map_err(|e| failure::format_err!("{}", e))?;

    if logs.contains("MigrationRunner[NewerDatabaseVersionsExist]") {
        log::warn!("newer database migrations exist; run `tyger database migrations apply`");
        Ok(())
    } else if logs.contains("MigrationRunner[UsingMostRecentDatabaseVersion]") {
        log::debug!("database is up to date");
        Ok(())
    } else {
        Err(failure::format_err!("migration-runner pod {} logs contain neither version marker", pod_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildinfo::BuildInfo;
    use crate::cloud::FakeCloud;
    use crate::health::FakeHealthChecker;
    use crate::helm::FakeHelm;
    use crate::k8s::{FakeK8s, K8sClient, PodSpec};
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
    async fn cert_manager_install_merges_defaults() {
        let helm = Arc::new(FakeHelm::new());
        let ctx = RunContext::new(config(), BuildInfo::release(), Arc::new(FakeCloud::new()), helm.clone());
        ctx.set_k8s(Arc::new(FakeK8s::new())).await;
        install_cert_manager(&ctx).await.unwrap();
        let values = helm.values_for("cert-manager").unwrap();
        assert_eq!(values.get("installCRDs"), Some(&Value::from(true)));
    }

    #[tokio::test]
    async fn traefik_failure_logs_warning_events() {
        let helm = Arc::new(FakeHelm::new());
        helm.fail_next("traefik", 1);
        let ctx = RunContext::new(config(), BuildInfo::release(), Arc::new(FakeCloud::new()), helm);
        let fake_k8s = Arc::new(FakeK8s::new());
        fake_k8s.push_event(
            "traefik",
            crate::k8s::Event { reason: "BackOff".to_string(), message: "container crashed".to_string(), event_type: "Warning".to_string() },
        );
        ctx.set_k8s(fake_k8s).await;
        assert!(install_traefik(&ctx).await.is_err());
    }

    #[tokio::test]
    async fn install_tyger_polls_healthcheck_then_scans_migration_logs() {
        let helm = Arc::new(FakeHelm::new());
        let ctx = RunContext::new(config(), BuildInfo::release(), Arc::new(FakeCloud::new()), helm.clone()).with_health(Arc::new(FakeHealthChecker::new()));
        let fake_k8s = Arc::new(FakeK8s::new());
        fake_k8s
            .pod_create(&PodSpec {
                name: format!("{}-0", MIGRATION_RUNNER_POD_PREFIX),
                namespace: "tyger".to_string(),
                image: "n/a".to_string(),
                command: vec![],
                env: Default::default(),
                labels: Default::default(),
            })
            .await
            .unwrap();
        fake_k8s.set_pod_logs("tyger", &format!("{}-0", MIGRATION_RUNNER_POD_PREFIX), "MigrationRunner[UsingMostRecentDatabaseVersion]");
        ctx.set_k8s(fake_k8s).await;

        install_tyger(&ctx, &Value::Null).await.unwrap();
        assert!(helm.values_for("tyger").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn install_tyger_fails_when_healthcheck_never_succeeds() {
        let helm = Arc::new(FakeHelm::new());
        let health = Arc::new(FakeHealthChecker::new());
        health.mark_unhealthy("https://abc.westus.cloudapp.azure.com/healthcheck");
        let ctx = RunContext::new(config(), BuildInfo::release(), Arc::new(FakeCloud::new()), helm).with_health(health);
        ctx.set_k8s(Arc::new(FakeK8s::new())).await;

        assert!(install_tyger(&ctx, &Value::Null).await.is_err());
    }
}
