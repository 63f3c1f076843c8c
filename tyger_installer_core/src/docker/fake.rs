/// An in-memory `DockerEngine`: tracks which container names are
/// "running", no real `docker` binary involved — same role `FakeHelm`
/// plays for the Helm facade.
use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ContainerSpec, DockerEngine, DockerResult};

#[derive(Default)]
pub struct FakeDocker {
    running: Mutex<BTreeSet<String>>,
}

impl FakeDocker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DockerEngine for FakeDocker {
    async fn container_run(&self, spec: &ContainerSpec) -> DockerResult<()> {
        self.running.lock().unwrap().insert(spec.name.clone());
        Ok(())
    }

    async fn container_remove(&self, name: &str) -> DockerResult<()> {
        self.running.lock().unwrap().remove(name);
        Ok(())
    }

    async fn container_is_running(&self, name: &str) -> DockerResult<bool> {
        Ok(self.running.lock().unwrap().contains(name))
    }
}
