/// The real `K8sClient`, backed by `kube`/`k8s-openapi`.
///
/// Grounded on the `kube::Client` + typed `Api<T>` pattern used
/// throughout `other_examples/manifests/*`. Constructed from the raw
/// kubeconfig bytes the cloud facade returns from
/// `cluster.listClusterAdminCredentials`.
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::api::{Api, AttachParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Config};

use super::{Event, JobContainerSpec, K8sClient, K8sError, K8sResult, PodPhase, PodSpec, RbacSubject, RoleRule};

pub struct LiveK8s {
    client: Client,
}

impl LiveK8s {
    pub async fn from_kubeconfig(raw: &[u8]) -> K8sResult<Self> {
        let kubeconfig: kube::config::Kubeconfig =
            serde_yaml::from_slice(raw).map_err(|e| K8sError::Other("parse kubeconfig".into(), e.to_string()))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &Default::default())
            .await
            .map_err(|e| K8sError::Other("build kube config".into(), e.to_string()))?;
        let client = Client::try_from(config).map_err(|e| K8sError::Other("build kube client".into(), e.to_string()))?;
        Ok(LiveK8s { client })
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn upsert_params() -> PatchParams {
    PatchParams::apply("tyger-installer").force()
}

#[async_trait]
impl K8sClient for LiveK8s {
    async fn namespace_create_if_absent(&self, name: &str) -> K8sResult<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace { metadata: kube::api::ObjectMeta { name: Some(name.to_string()), ..Default::default() }, ..Default::default() };
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
            Err(e) => Err(K8sError::Other("namespace.create".into(), e.to_string())),
        }
    }

    async fn role_upsert(&self, namespace: &str, name: &str, rules: &[RoleRule]) -> K8sResult<()> {
        let api: Api<Role> = Api::namespaced(self.client.clone(), namespace);
        let role = Role {
            metadata: kube::api::ObjectMeta { name: Some(name.to_string()), ..Default::default() },
            rules: Some(rules.iter().map(to_policy_rule).collect()),
        };
        api.patch(name, &upsert_params(), &Patch::Apply(&role))
            .await
            .map(|_| ())
            .map_err(|e| K8sError::Other("role.upsert".into(), e.to_string()))
    }

    async fn role_binding_upsert(&self, namespace: &str, name: &str, role_name: &str, subjects: &[RbacSubject]) -> K8sResult<()> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        let binding = RoleBinding {
            metadata: kube::api::ObjectMeta { name: Some(name.to_string()), ..Default::default() },
            role_ref: k8s_openapi::api::rbac::v1::RoleRef { api_group: "rbac.authorization.k8s.io".to_string(), kind: "Role".to_string(), name: role_name.to_string() },
            subjects: Some(subjects.iter().map(to_k8s_subject).collect()),
        };
        api.patch(name, &upsert_params(), &Patch::Apply(&binding))
            .await
            .map(|_| ())
            .map_err(|e| K8sError::Other("roleBinding.upsert".into(), e.to_string()))
    }

    async fn cluster_role_upsert(&self, name: &str, rules: &[RoleRule]) -> K8sResult<()> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        let role = ClusterRole {
            metadata: kube::api::ObjectMeta { name: Some(name.to_string()), ..Default::default() },
            rules: Some(rules.iter().map(to_policy_rule).collect()),
            ..Default::default()
        };
        api.patch(name, &upsert_params(), &Patch::Apply(&role))
            .await
            .map(|_| ())
            .map_err(|e| K8sError::Other("clusterRole.upsert".into(), e.to_string()))
    }

    async fn cluster_role_binding_upsert(&self, name: &str, cluster_role_name: &str, subjects: &[RbacSubject]) -> K8sResult<()> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        let binding = ClusterRoleBinding {
            metadata: kube::api::ObjectMeta { name: Some(name.to_string()), ..Default::default() },
            role_ref: k8s_openapi::api::rbac::v1::RoleRef { api_group: "rbac.authorization.k8s.io".to_string(), kind: "ClusterRole".to_string(), name: cluster_role_name.to_string() },
            subjects: Some(subjects.iter().map(to_k8s_subject).collect()),
        };
        api.patch(name, &upsert_params(), &Patch::Apply(&binding))
            .await
            .map(|_| ())
            .map_err(|e| K8sError::Other("clusterRoleBinding.upsert".into(), e.to_string()))
    }

    async fn secret_create_or_update(&self, namespace: &str, name: &str, data: &BTreeMap<String, Vec<u8>>) -> K8sResult<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = Secret {
            metadata: kube::api::ObjectMeta { name: Some(name.to_string()), ..Default::default() },
            data: Some(data.iter().map(|(k, v)| (k.clone(), k8s_openapi::ByteString(v.clone()))).collect()),
            ..Default::default()
        };
        api.patch(name, &upsert_params(), &Patch::Apply(&secret))
            .await
            .map(|_| ())
            .map_err(|e| K8sError::Other("secret.createOrUpdate".into(), e.to_string()))
    }

    async fn pod_create(&self, spec: &PodSpec) -> K8sResult<()> {
        let pod = to_pod(spec);
        self.pods(&spec.namespace)
            .create(&PostParams::default(), &pod)
            .await
            .map(|_| ())
            .map_err(|e| K8sError::Other("pod.create".into(), e.to_string()))
    }

    async fn pod_get_phase(&self, namespace: &str, name: &str) -> K8sResult<Option<PodPhase>> {
        match self.pods(namespace).get(name).await {
            Ok(pod) => Ok(Some(parse_phase(pod.status.and_then(|s| s.phase)))),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(K8sError::Other("pod.get".into(), e.to_string())),
        }
    }

    async fn pod_delete(&self, namespace: &str, name: &str) -> K8sResult<()> {
        match self.pods(namespace).delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(K8sError::Other("pod.delete".into(), e.to_string())),
        }
    }

    async fn pod_wait_for_phase(&self, namespace: &str, name: &str, phase: PodPhase, timeout: Duration) -> K8sResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.pod_get_phase(namespace, name).await? {
                Some(p) if p == phase => return Ok(()),
                Some(PodPhase::Failed) if phase != PodPhase::Failed => return Err(K8sError::WaitTimeout(name.to_string(), PodPhase::Failed)),
                _ => {}
            }
            if Instant::now() >= deadline {
                return Err(K8sError::WaitTimeout(name.to_string(), phase));
            }
            tokio::time::sleep(super::POD_POLL_PERIOD).await;
        }
    }

    async fn pod_exec(&self, namespace: &str, name: &str, command: &[String]) -> K8sResult<(String, String)> {
        use futures::AsyncReadExt;
        let mut attached = self
            .pods(namespace)
            .exec(name, command, &AttachParams::default().stdout(true).stderr(true))
            .await
            .map_err(|e| K8sError::Other("pod.exec".into(), e.to_string()))?;
        let mut stdout = String::new();
        if let Some(mut stream) = attached.stdout() {
            stream.read_to_string(&mut stdout).await.map_err(|e| K8sError::Other("pod.exec".into(), e.to_string()))?;
        }
        let mut stderr = String::new();
        if let Some(mut stream) = attached.stderr() {
            stream.read_to_string(&mut stderr).await.map_err(|e| K8sError::Other("pod.exec".into(), e.to_string()))?;
        }
        Ok((stdout, stderr))
    }

    async fn pod_most_recent(&self, namespace: &str, prefix: &str) -> K8sResult<Option<String>> {
        let pods = self.pods(namespace).list(&ListParams::default()).await.map_err(|e| K8sError::Other("pod.list".into(), e.to_string()))?;
        Ok(pods
            .items
            .into_iter()
            .filter_map(|p| p.metadata.name)
            .filter(|n| n.starts_with(prefix))
            .max())
    }

    async fn pod_logs(&self, namespace: &str, name: &str) -> K8sResult<String> {
        self.pods(namespace).logs(name, &Default::default()).await.map_err(|e| K8sError::Other("pod.logs".into(), e.to_string()))
    }

    async fn job_create(&self, namespace: &str, name: &str, init_containers: &[JobContainerSpec], main_container: &JobContainerSpec) -> K8sResult<()> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let job = to_job(name, init_containers, main_container);
        api.create(&PostParams::default(), &job).await.map(|_| ()).map_err(|e| K8sError::Other("job.create".into(), e.to_string()))
    }

    async fn job_wait_for_completion(&self, namespace: &str, name: &str, poll: Duration) -> K8sResult<bool> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        loop {
            let job = api.get(name).await.map_err(|e| K8sError::Other("job.get".into(), e.to_string()))?;
            if let Some(status) = job.status {
                if status.succeeded.unwrap_or(0) >= 1 {
                    return Ok(true);
                }
                if status.failed.unwrap_or(0) >= 1 {
                    return Ok(false);
                }
            }
            tokio::time::sleep(poll).await;
        }
    }

    async fn events_list(&self, namespace: &str) -> K8sResult<Vec<Event>> {
        let api: Api<k8s_openapi::api::core::v1::Event> = Api::namespaced(self.client.clone(), namespace);
        let events = api.list(&ListParams::default()).await.map_err(|e| K8sError::Other("events.list".into(), e.to_string()))?;
        Ok(events
            .items
            .into_iter()
            .map(|e| Event {
                reason: e.reason.unwrap_or_default(),
                message: e.message.unwrap_or_default(),
                event_type: e.type_.unwrap_or_default(),
            })
            .collect())
    }
}

fn to_policy_rule(rule: &RoleRule) -> k8s_openapi::api::rbac::v1::PolicyRule {
    k8s_openapi::api::rbac::v1::PolicyRule {
        api_groups: Some(rule.api_groups.clone()),
        resources: Some(rule.resources.clone()),
        verbs: rule.verbs.clone(),
        ..Default::default()
    }
}

fn to_k8s_subject(s: &RbacSubject) -> k8s_openapi::api::rbac::v1::Subject {
    k8s_openapi::api::rbac::v1::Subject { kind: s.kind.clone(), name: s.name.clone(), api_group: Some("rbac.authorization.k8s.io".to_string()), ..Default::default() }
}

fn to_pod(spec: &PodSpec) -> Pod {
    use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec as ApiPodSpec};
    Pod {
        metadata: kube::api::ObjectMeta { name: Some(spec.name.clone()), namespace: Some(spec.namespace.clone()), labels: Some(spec.labels.clone()), ..Default::default() },
        spec: Some(ApiPodSpec {
            containers: vec![Container {
                name: spec.name.clone(),
                image: Some(spec.image.clone()),
                command: Some(spec.command.clone()),
                env: Some(spec.env.iter().map(|(k, v)| EnvVar { name: k.clone(), value: Some(v.clone()), ..Default::default() }).collect()),
                ..Default::default()
            }],
            restart_policy: Some("Never".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn to_job(name: &str, init_containers: &[JobContainerSpec], main_container: &JobContainerSpec) -> Job {
    use k8s_openapi::api::batch::v1::JobSpec;
    use k8s_openapi::api::core::v1::{Container, PodSpec as ApiPodSpec, PodTemplateSpec};
    let to_container = |c: &JobContainerSpec| Container { name: c.name.clone(), image: Some(c.image.clone()), command: Some(c.command.clone()), ..Default::default() };
    Job {
        metadata: kube::api::ObjectMeta { name: Some(name.to_string()), ..Default::default() },
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                spec: Some(ApiPodSpec {
                    init_containers: Some(init_containers.iter().map(to_container).collect()),
                    containers: vec![to_container(main_container)],
                    restart_policy: Some("Never".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn parse_phase(phase: Option<String>) -> PodPhase {
    match phase.as_deref() {
        Some("Pending") => PodPhase::Pending,
        Some("Running") => PodPhase::Running,
        Some("Succeeded") => PodPhase::Succeeded,
        Some("Failed") => PodPhase::Failed,
        _ => PodPhase::Unknown,
    }
}
