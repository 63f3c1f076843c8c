/// An in-memory `K8sClient` exercised by the step library's tests.
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Event, JobContainerSpec, K8sClient, K8sError, K8sResult, PodPhase, PodSpec, RbacSubject, RoleRule};

#[derive(Default)]
struct State {
    namespaces: Vec<String>,
    roles: BTreeMap<(String, String), Vec<RoleRule>>,
    role_bindings: BTreeMap<(String, String), (String, Vec<RbacSubject>)>,
    cluster_roles: BTreeMap<String, Vec<RoleRule>>,
    cluster_role_bindings: BTreeMap<String, (String, Vec<RbacSubject>)>,
    secrets: BTreeMap<(String, String), BTreeMap<String, Vec<u8>>>,
    pods: BTreeMap<(String, String), PodPhase>,
    jobs: BTreeMap<(String, String), bool>,
    events: BTreeMap<String, Vec<Event>>,
    exec_responses: BTreeMap<(String, String), (String, String)>,
    pod_logs: BTreeMap<(String, String), String>,
    /// Name prefixes that should land directly in `Running` on
    /// `pod_create` instead of `Pending`, for tests of code that creates
    /// and immediately waits on an ephemeral pod.
    auto_run_prefixes: Vec<String>,
}

pub struct FakeK8s {
    state: Mutex<State>,
}

impl Default for FakeK8s {
    fn default() -> Self {
        FakeK8s { state: Mutex::new(State::default()) }
    }
}

impl FakeK8s {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: make the next `pod_get_phase`/`pod_wait_for_phase`
    /// call for `(namespace, name)` observe `phase` immediately, as if
    /// the pod had already progressed there.
    pub fn set_pod_phase(&self, namespace: &str, name: &str, phase: PodPhase) {
        self.state.lock().unwrap().pods.insert((namespace.to_string(), name.to_string()), phase);
    }

    pub fn push_event(&self, namespace: &str, event: Event) {
        self.state.lock().unwrap().events.entry(namespace.to_string()).or_default().push(event);
    }

    /// Test hook: make `pod_exec` against `(namespace, name)` return
    /// fixed stdout/stderr instead of the default echo-back response.
    pub fn set_exec_response(&self, namespace: &str, name: &str, stdout: &str, stderr: &str) {
        self.state.lock().unwrap().exec_responses.insert((namespace.to_string(), name.to_string()), (stdout.to_string(), stderr.to_string()));
    }

    /// Test hook: set the log text `pod_logs` returns for `(namespace, name)`.
    pub fn set_pod_logs(&self, namespace: &str, name: &str, logs: &str) {
        self.state.lock().unwrap().pod_logs.insert((namespace.to_string(), name.to_string()), logs.to_string());
    }

    /// Test hook: any pod whose name starts with `prefix` reaches
    /// `Running` immediately on `pod_create` rather than `Pending`.
    pub fn auto_run_pods_matching(&self, prefix: &str) {
        self.state.lock().unwrap().auto_run_prefixes.push(prefix.to_string());
    }

    /// Test hook: override whether a created job reports success.
    pub fn set_job_succeeded(&self, namespace: &str, name: &str, succeeded: bool) {
        self.state.lock().unwrap().jobs.insert((namespace.to_string(), name.to_string()), succeeded);
    }
}

#[async_trait]
impl K8sClient for FakeK8s {
    async fn namespace_create_if_absent(&self, name: &str) -> K8sResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.namespaces.iter().any(|n| n == name) {
            state.namespaces.push(name.to_string());
        }
        Ok(())
    }

    async fn role_upsert(&self, namespace: &str, name: &str, rules: &[RoleRule]) -> K8sResult<()> {
        self.state.lock().unwrap().roles.insert((namespace.to_string(), name.to_string()), rules.to_vec());
        Ok(())
    }

    async fn role_binding_upsert(&self, namespace: &str, name: &str, role_name: &str, subjects: &[RbacSubject]) -> K8sResult<()> {
        self.state
            .lock()
            .unwrap()
            .role_bindings
            .insert((namespace.to_string(), name.to_string()), (role_name.to_string(), subjects.to_vec()));
        Ok(())
    }

    async fn cluster_role_upsert(&self, name: &str, rules: &[RoleRule]) -> K8sResult<()> {
        self.state.lock().unwrap().cluster_roles.insert(name.to_string(), rules.to_vec());
        Ok(())
    }

    async fn cluster_role_binding_upsert(&self, name: &str, cluster_role_name: &str, subjects: &[RbacSubject]) -> K8sResult<()> {
        self.state
            .lock()
            .unwrap()
            .cluster_role_bindings
            .insert(name.to_string(), (cluster_role_name.to_string(), subjects.to_vec()));
        Ok(())
    }

    async fn secret_create_or_update(&self, namespace: &str, name: &str, data: &BTreeMap<String, Vec<u8>>) -> K8sResult<()> {
        self.state.lock().unwrap().secrets.insert((namespace.to_string(), name.to_string()), data.clone());
        Ok(())
    }

    async fn pod_create(&self, spec: &PodSpec) -> K8sResult<()> {
        let mut state = self.state.lock().unwrap();
        let phase = if state.auto_run_prefixes.iter().any(|p| spec.name.starts_with(p.as_str())) { PodPhase::Running } else { PodPhase::Pending };
        state.pods.insert((spec.namespace.clone(), spec.name.clone()), phase);
        Ok(())
    }

    async fn pod_get_phase(&self, namespace: &str, name: &str) -> K8sResult<Option<PodPhase>> {
        Ok(self.state.lock().unwrap().pods.get(&(namespace.to_string(), name.to_string())).copied())
    }

    async fn pod_delete(&self, namespace: &str, name: &str) -> K8sResult<()> {
        self.state.lock().unwrap().pods.remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn pod_wait_for_phase(&self, namespace: &str, name: &str, phase: PodPhase, _timeout: Duration) -> K8sResult<()> {
        let observed = self.pod_get_phase(namespace, name).await?;
        match observed {
            Some(p) if p == phase => Ok(()),
            Some(other) => Err(K8sError::WaitTimeout(name.to_string(), other)),
            None => Err(K8sError::PodNotFound(name.to_string())),
        }
    }

    async fn pod_exec(&self, namespace: &str, name: &str, command: &[String]) -> K8sResult<(String, String)> {
        let state = self.state.lock().unwrap();
        if let Some((stdout, stderr)) = state.exec_responses.get(&(namespace.to_string(), name.to_string())) {
            return Ok((stdout.clone(), stderr.clone()));
        }
        Ok((format!("ran: {}", command.join(" ")), String::new()))
    }

    async fn pod_most_recent(&self, namespace: &str, prefix: &str) -> K8sResult<Option<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .pods
            .keys()
            .filter(|(ns, name)| ns == namespace && name.starts_with(prefix))
            .map(|(_, name)| name.clone())
            .next_back())
    }

    async fn pod_logs(&self, namespace: &str, name: &str) -> K8sResult<String> {
        Ok(self.state.lock().unwrap().pod_logs.get(&(namespace.to_string(), name.to_string())).cloned().unwrap_or_default())
    }

    async fn job_create(&self, namespace: &str, name: &str, _init_containers: &[JobContainerSpec], _main_container: &JobContainerSpec) -> K8sResult<()> {
        self.state.lock().unwrap().jobs.insert((namespace.to_string(), name.to_string()), true);
        Ok(())
    }

    async fn job_wait_for_completion(&self, namespace: &str, name: &str, _poll: Duration) -> K8sResult<bool> {
        Ok(self.state.lock().unwrap().jobs.get(&(namespace.to_string(), name.to_string())).copied().unwrap_or(true))
    }

    async fn events_list(&self, namespace: &str) -> K8sResult<Vec<Event>> {
        Ok(self.state.lock().unwrap().events.get(namespace).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn namespace_create_is_idempotent() {
        let k8s = FakeK8s::new();
        k8s.namespace_create_if_absent("tyger").await.unwrap();
        k8s.namespace_create_if_absent("tyger").await.unwrap();
        assert_eq!(k8s.state.lock().unwrap().namespaces.len(), 1);
    }

    #[tokio::test]
    async fn pod_wait_reflects_injected_phase() {
        let k8s = FakeK8s::new();
        let spec = PodSpec { name: "p".into(), namespace: "tyger".into(), image: "img".into(), command: vec![], env: BTreeMap::new(), labels: BTreeMap::new() };
        k8s.pod_create(&spec).await.unwrap();
        k8s.set_pod_phase("tyger", "p", PodPhase::Running);
        k8s.pod_wait_for_phase("tyger", "p", PodPhase::Running, Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn job_succeeds_by_default_but_can_be_overridden() {
        let k8s = FakeK8s::new();
        let container = JobContainerSpec { name: "main".into(), image: "img".into(), command: vec![] };
        k8s.job_create("tyger", "migrate-1", &[], &container).await.unwrap();
        assert!(k8s.job_wait_for_completion("tyger", "migrate-1", Duration::from_secs(1)).await.unwrap());

        k8s.set_job_succeeded("tyger", "migrate-1", false);
        assert!(!k8s.job_wait_for_completion("tyger", "migrate-1", Duration::from_secs(1)).await.unwrap());
    }
}
