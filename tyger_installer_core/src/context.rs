/// The run context threaded through every step and orchestrator.
///
/// Bundles the validated configuration, build-time constants, the
/// facades, and the cancellation/aggregation plumbing the Promise
/// Engine needs into one struct, since this installer's call graph is a
/// DAG of concurrent tasks rather than a single-threaded dispatch.
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tyger_installer_definitions::EnvironmentConfig;

use crate::buildinfo::BuildInfo;
use crate::cloud::CloudProvider;
use crate::health::{HealthChecker, LiveHealthChecker};
use crate::helm::HelmEngine;
use crate::k8s::K8sClient;
use crate::promise::PromiseGroup;
use crate::telemetry::ErrorSink;

#[derive(Clone)]
pub struct RunContext {
    pub config: EnvironmentConfig,
    pub build: BuildInfo,
    pub cloud: Arc<dyn CloudProvider>,
    /// Bound once the API-host cluster's admin kubeconfig has been
    /// retrieved (step 5 of the install DAG); `None` before then and
    /// for the uninstall path's early cloud-only steps.
    pub k8s: Arc<tokio::sync::OnceCell<Arc<dyn K8sClient>>>,
    pub helm: Arc<dyn HelmEngine>,
    pub health: Arc<dyn HealthChecker>,
    pub cancel: CancellationToken,
    pub group: PromiseGroup,
    pub errors: Arc<ErrorSink>,
}

impl RunContext {
    pub fn new(config: EnvironmentConfig, build: BuildInfo, cloud: Arc<dyn CloudProvider>, helm: Arc<dyn HelmEngine>) -> Self {
        RunContext {
            config,
            build,
            cloud,
            k8s: Arc::new(tokio::sync::OnceCell::new()),
            helm,
            health: Arc::new(LiveHealthChecker::new()),
            cancel: CancellationToken::new(),
            group: PromiseGroup::new(),
            errors: Arc::new(ErrorSink::new()),
        }
    }

    /// Swaps the healthcheck facade, e.g. for `FakeHealthChecker` in tests.
    pub fn with_health(mut self, health: Arc<dyn HealthChecker>) -> Self {
        self.health = health;
        self
    }

    pub async fn set_k8s(&self, client: Arc<dyn K8sClient>) {
        // Only the cluster-admin-kubeconfig step ever calls this, once;
        // a second call would be a bug in the install DAG, so surface
        // it loudly rather than silently keep the first client.
        self.k8s.set(client).expect("k8s client already bound for this run");
    }

    pub fn k8s(&self) -> Arc<dyn K8sClient> {
        self.k8s.get().expect("k8s client requested before admin kubeconfig step ran").clone()
    }

    pub fn subscription_id(&self) -> &str {
        self.config.cloud.as_ref().map(|c| c.subscription_id.as_str()).unwrap_or_default()
    }

    pub fn resource_group(&self) -> String {
        self.config.resource_group().unwrap_or_default().to_string()
    }

    pub fn environment_tags(&self) -> std::collections::BTreeMap<String, String> {
        self.config.tags()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::FakeCloud;
    use crate::helm::FakeHelm;
    use crate::k8s::FakeK8s;

    fn minimal_config() -> EnvironmentConfig {
        serde_yaml::from_str(
            r#"
environmentName: abc
cloud:
  tenantId: tenant
  subscriptionId: sub
  defaultLocation: westus
  compute:
    clusters:
    - name: abc
      apiHost: true
      userNodePools: []
    managementPrincipals: []
  storage:
    logs: { name: abclogs }
    buffers: []
  database:
    serverName: tyger-abc
    computeTier: GeneralPurpose
    vmSize: Standard_D2s_v3
    initialDatabaseSizeGb: 128
    backupRetentionDays: 7
api:
  domainName: abc.westus.cloudapp.azure.com
  auth:
    tenantId: tenant
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn k8s_binds_exactly_once() {
        let ctx = RunContext::new(minimal_config(), BuildInfo::release(), Arc::new(FakeCloud::new()), Arc::new(FakeHelm::new()));
        ctx.set_k8s(Arc::new(FakeK8s::new())).await;
        let _ = ctx.k8s();
    }

    #[tokio::test]
    #[should_panic(expected = "requested before")]
    async fn k8s_panics_if_requested_before_bound() {
        let ctx = RunContext::new(minimal_config(), BuildInfo::release(), Arc::new(FakeCloud::new()), Arc::new(FakeHelm::new()));
        let _ = ctx.k8s();
    }
}
