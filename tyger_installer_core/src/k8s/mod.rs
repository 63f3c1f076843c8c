/// The Kubernetes facade (C4).
///
/// Wraps `kube`/`k8s-openapi` behind one trait for namespace, RBAC,
/// pod, and Job lifecycle operations, isolating the rest of the
/// installer from direct API-server calls.
use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use failure::Fail;

pub mod fake;
#[cfg(feature = "live")]
pub mod live;

pub use fake::FakeK8s;
#[cfg(feature = "live")]
pub use live::LiveK8s;

pub const POD_POLL_PERIOD: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

#[derive(Clone, Debug)]
pub struct PodSpec {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct RoleRule {
    pub api_groups: Vec<String>,
    pub resources: Vec<String>,
    pub verbs: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct RbacSubject {
    pub kind: String,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct Event {
    pub reason: String,
    pub message: String,
    pub event_type: String,
}

#[derive(Clone, Debug)]
pub struct JobContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
}

#[derive(Debug, Fail)]
pub enum K8sError {
    #[fail(display = "{}: {}", _0, _1)]
    Other(String, String),
    #[fail(display = "pod {} not found", _0)]
    PodNotFound(String),
    #[fail(display = "timed out waiting for pod {} to reach phase {:?}", _0, _1)]
    WaitTimeout(String, PodPhase),
}

pub type K8sResult<T> = Result<T, K8sError>;

/// `kubeconfig` is raw bytes produced by the cloud facade's
/// `cluster.listClusterAdminCredentials`; each `K8sClient` is bound to
/// one cluster for its lifetime.
#[async_trait]
pub trait K8sClient: Send + Sync {
    async fn namespace_create_if_absent(&self, name: &str) -> K8sResult<()>;

    async fn role_upsert(&self, namespace: &str, name: &str, rules: &[RoleRule]) -> K8sResult<()>;
    async fn role_binding_upsert(&self, namespace: &str, name: &str, role_name: &str, subjects: &[RbacSubject]) -> K8sResult<()>;
    async fn cluster_role_upsert(&self, name: &str, rules: &[RoleRule]) -> K8sResult<()>;
    async fn cluster_role_binding_upsert(&self, name: &str, cluster_role_name: &str, subjects: &[RbacSubject]) -> K8sResult<()>;

    async fn secret_create_or_update(&self, namespace: &str, name: &str, data: &BTreeMap<String, Vec<u8>>) -> K8sResult<()>;

    async fn pod_create(&self, spec: &PodSpec) -> K8sResult<()>;
    async fn pod_get_phase(&self, namespace: &str, name: &str) -> K8sResult<Option<PodPhase>>;
    async fn pod_delete(&self, namespace: &str, name: &str) -> K8sResult<()>;
    async fn pod_wait_for_phase(&self, namespace: &str, name: &str, phase: PodPhase, timeout: Duration) -> K8sResult<()>;
    async fn pod_exec(&self, namespace: &str, name: &str, command: &[String]) -> K8sResult<(String, String)>;
    /// Most recent pod in `namespace` whose name starts with `prefix`
    /// (used by the migration controller and the Tyger install step to
    /// find the latest migration-runner pod).
    async fn pod_most_recent(&self, namespace: &str, prefix: &str) -> K8sResult<Option<String>>;
    async fn pod_logs(&self, namespace: &str, name: &str) -> K8sResult<String>;

    async fn job_create(&self, namespace: &str, name: &str, init_containers: &[JobContainerSpec], main_container: &JobContainerSpec) -> K8sResult<()>;
    async fn job_wait_for_completion(&self, namespace: &str, name: &str, poll: Duration) -> K8sResult<bool>;

    async fn events_list(&self, namespace: &str) -> K8sResult<Vec<Event>>;
}

/// Bind a client to the cluster described by a raw kubeconfig (the
/// admin credentials step 5 of the install DAG retrieves). Built
/// against the real API server only with `--features live`; the
/// default build keeps tests talking to an in-memory `FakeK8s`
/// regardless of the bytes handed in, matching the rest of this
/// facade's fake/live split.
#[cfg(feature = "live")]
pub async fn client_from_kubeconfig(raw: &[u8]) -> Result<std::sync::Arc<dyn K8sClient>, failure::Error> {
    let client = LiveK8s::from_kubeconfig(raw).await.map_err(|e| failure::format_err!("{}", e))?;
    Ok(std::sync::Arc::new(client))
}

#[cfg(not(feature = "live"))]
pub async fn client_from_kubeconfig(_raw: &[u8]) -> Result<std::sync::Arc<dyn K8sClient>, failure::Error> {
    Ok(std::sync::Arc::new(FakeK8s::new()))
}
