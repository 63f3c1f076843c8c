/// The real `DockerEngine`, shelling out to the `docker` binary the
/// same way `LiveHelm` shells out to `helm`.
use async_trait::async_trait;
use tokio::process::Command;

use super::{ContainerSpec, DockerEngine, DockerError, DockerResult};

pub struct LiveDocker;

impl LiveDocker {
    pub fn new() -> Self {
        LiveDocker
    }

    async fn run(&self, args: &[String]) -> Result<String, String> {
        let output = Command::new("docker").args(args).output().await.map_err(|e| e.to_string())?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).into_owned())
        }
    }
}

impl Default for LiveDocker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DockerEngine for LiveDocker {
    async fn container_run(&self, spec: &ContainerSpec) -> DockerResult<()> {
        let _ = self.run(&["rm".to_string(), "-f".to_string(), spec.name.clone()]).await;

        let mut args = vec!["run".to_string(), "-d".to_string(), "--name".to_string(), spec.name.clone(), "--restart".to_string(), "unless-stopped".to_string()];
        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        for (host_path, container_path) in &spec.volumes {
            args.push("-v".to_string());
            args.push(format!("{}:{}", host_path, container_path));
        }
        for (host_port, container_port) in &spec.ports {
            args.push("-p".to_string());
            args.push(format!("{}:{}", host_port, container_port));
        }
        args.push(spec.image.clone());

        self.run(&args).await.map(|_| ()).map_err(|e| DockerError::StartFailed(spec.name.clone(), e))
    }

    async fn container_remove(&self, name: &str) -> DockerResult<()> {
        self.run(&["rm".to_string(), "-f".to_string(), name.to_string()]).await.map(|_| ()).map_err(|e| DockerError::StartFailed(name.to_string(), e))
    }

    async fn container_is_running(&self, name: &str) -> DockerResult<bool> {
        let output = self
            .run(&["inspect".to_string(), "-f".to_string(), "{{.State.Running}}".to_string(), name.to_string()])
            .await
            .unwrap_or_else(|_| "false".to_string());
        Ok(output.trim() == "true")
    }
}
