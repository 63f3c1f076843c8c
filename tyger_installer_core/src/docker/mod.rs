/// The Docker variant (C12): a narrower installer path for a single
/// local host, standing in for the Azure cloud target when
/// `EnvironmentConfig.docker` is set instead of `.cloud`. Scoped to
/// three containers only — database, data-plane, control-plane — with
/// no clusters, managed identities, or Postgres server to provision.
///
/// Mirrors the Helm facade's shell-out pattern (`HelmEngine`/`LiveHelm`)
/// rather than inventing a Docker Engine API client: a thin trait
/// wrapping the `docker` CLI, since no maintained pure-Rust Docker
/// client crate is in this crate's dependency set.
use std::time::Duration;

use async_trait::async_trait;
use failure::Fail;
use tyger_installer_definitions::config::DockerConfig;

use crate::buildinfo::BuildInfo;

pub mod fake;
#[cfg(feature = "live")]
pub mod live;

pub use fake::FakeDocker;
#[cfg(feature = "live")]
pub use live::LiveDocker;

const DEFAULT_DATABASE_IMAGE: &str = "postgres:16";
const DEFAULT_CONTROL_PLANE_IMAGE: &str = "tygerregistry.azurecr.io/tyger-server:stable";
const DEFAULT_DATA_PLANE_IMAGE: &str = "tygerregistry.azurecr.io/tyger-worker:stable";

const START_POLL_PERIOD: Duration = Duration::from_millis(500);
const START_POLL_MAX_ATTEMPTS: u32 = 20;

#[derive(Clone, Debug)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: std::collections::BTreeMap<String, String>,
    /// `host_path:container_path` pairs.
    pub volumes: Vec<(String, String)>,
    pub ports: Vec<(u16, u16)>,
}

#[derive(Debug, Fail)]
pub enum DockerError {
    #[fail(display = "container {} failed to start: {}", _0, _1)]
    StartFailed(String, String),
    #[fail(display = "container {} did not become healthy before the deadline", _0)]
    HealthTimeout(String),
}

pub type DockerResult<T> = Result<T, DockerError>;

/// One operation per container lifecycle need (create-or-replace, plus
/// the health check the install flow waits on), matching the cloud
/// path's `CloudProvider::cluster_create_or_update` shape but without
/// any resource-group/identity concepts that don't exist on a single
/// host.
#[async_trait]
pub trait DockerEngine: Send + Sync {
    async fn container_run(&self, spec: &ContainerSpec) -> DockerResult<()>;
    async fn container_remove(&self, name: &str) -> DockerResult<()>;
    async fn container_is_running(&self, name: &str) -> DockerResult<bool>;
}

/// Brings up the three local containers in dependency order: database
/// first (the other two connect to it on the loopback network), then
/// data-plane and control-plane in parallel. Unlike the cloud install
/// DAG (C8) there's no Promise Engine involved — three containers with
/// one real dependency edge don't need a dependency graph, just a
/// sequential `await` followed by a `tokio::try_join!`.
pub async fn run(config: &DockerConfig, build: &BuildInfo, docker: &dyn DockerEngine) -> Result<(), failure::Error> {
    config.verify()?;

    let db_spec = ContainerSpec {
        name: "tyger-db".to_string(),
        image: config.database_image.clone().unwrap_or_else(|| DEFAULT_DATABASE_IMAGE.to_string()),
        env: [("POSTGRES_PASSWORD".to_string(), "tyger".to_string())].into_iter().collect(),
        volumes: vec![(format!("{}/db", config.data_dir), "/var/lib/postgresql/data".to_string())],
        ports: vec![(5432, 5432)],
    };
    docker.container_run(&db_spec).await.map_err(|e| failure::format_err!("{}", e))?;
    wait_for_running(docker, &db_spec.name).await?;

    let data_plane_spec = ContainerSpec {
        name: "tyger-data-plane".to_string(),
        image: config.data_plane_image.clone().unwrap_or_else(|| DEFAULT_DATA_PLANE_IMAGE.to_string()),
        env: Default::default(),
        volumes: vec![(format!("{}/buffers", config.data_dir), "/mnt/buffers".to_string())],
        ports: vec![],
    };
    let control_plane_spec = ContainerSpec {
        name: "tyger-control-plane".to_string(),
        image: config.control_plane_image.clone().unwrap_or_else(|| DEFAULT_CONTROL_PLANE_IMAGE.to_string()),
        env: [("TYGER_INSTALLER_VERSION".to_string(), build.installer_version.clone())].into_iter().collect(),
        volumes: vec![],
        ports: vec![(8080, 80)],
    };

    let (data_plane, control_plane) = tokio::try_join!(docker.container_run(&data_plane_spec), docker.container_run(&control_plane_spec)).map_err(|e| failure::format_err!("{}", e))?;
    let _ = (data_plane, control_plane);

    let (data_plane_up, control_plane_up) = tokio::try_join!(wait_for_running(docker, &data_plane_spec.name), wait_for_running(docker, &control_plane_spec.name))?;
    let _ = (data_plane_up, control_plane_up);

    Ok(())
}

async fn wait_for_running(docker: &dyn DockerEngine, name: &str) -> Result<(), failure::Error> {
    for _ in 0..START_POLL_MAX_ATTEMPTS {
        if docker.container_is_running(name).await.map_err(|e| failure::format_err!("{}", e))? {
            return Ok(());
        }
        tokio::time::sleep(START_POLL_PERIOD).await;
    }
    Err(DockerError::HealthTimeout(name.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_records_running_containers() {
        let docker = FakeDocker::new();
        let spec = ContainerSpec { name: "tyger-db".into(), image: "postgres:14".into(), env: Default::default(), volumes: vec![], ports: vec![] };
        docker.container_run(&spec).await.unwrap();
        assert!(docker.container_is_running("tyger-db").await.unwrap());
        docker.container_remove("tyger-db").await.unwrap();
        assert!(!docker.container_is_running("tyger-db").await.unwrap());
    }

    #[tokio::test]
    async fn run_brings_up_all_three_containers() {
        let docker = FakeDocker::new();
        let config = DockerConfig { data_dir: "/data/tyger".into(), database_image: None, control_plane_image: None, data_plane_image: None };
        run(&config, &BuildInfo::release(), &docker).await.unwrap();
        assert!(docker.container_is_running("tyger-db").await.unwrap());
        assert!(docker.container_is_running("tyger-data-plane").await.unwrap());
        assert!(docker.container_is_running("tyger-control-plane").await.unwrap());
    }

    #[tokio::test]
    async fn rejects_empty_data_dir() {
        let docker = FakeDocker::new();
        let config = DockerConfig { data_dir: "".into(), database_image: None, control_plane_image: None, data_plane_image: None };
        assert!(run(&config, &BuildInfo::release(), &docker).await.is_err());
    }
}
