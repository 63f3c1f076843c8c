/// The real `HelmEngine`, shelling out to the `helm` binary.
///
/// The teacher never invokes an external process; this follows the
/// `tokio::process::Command`-to-CLI-tool idiom used across the pack's
/// infrastructure examples (e.g. shelling out to `kubectl`/`k3d`) since
/// there is no maintained, non-abandoned pure-Rust Helm client crate.
use std::process::Stdio;

use async_trait::async_trait;
use serde_yaml::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{ChartRef, HelmEngine, HelmError, HelmResult, InstallOutcome, CRD_PROPAGATION_BACKOFF, CRD_PROPAGATION_MAX_RETRIES, INSTALL_TIMEOUT};

pub struct LiveHelm {
    kubeconfig_path: String,
}

impl LiveHelm {
    pub fn new(kubeconfig_path: impl Into<String>) -> Self {
        LiveHelm { kubeconfig_path: kubeconfig_path.into() }
    }

    async fn run_helm(&self, args: &[&str], values_yaml: &str) -> Result<String, String> {
        let mut child = Command::new("helm")
            .args(args)
            .arg("-f")
            .arg("-")
            .env("KUBECONFIG", &self.kubeconfig_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| e.to_string())?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(values_yaml.as_bytes()).await;
        }
        let output = child.wait_with_output().await.map_err(|e| e.to_string())?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).into_owned())
        }
    }
}

#[async_trait]
impl HelmEngine for LiveHelm {
    async fn install_chart(&self, chart: &ChartRef, defaults: &Value, overrides: &Value, dry_run: bool) -> HelmResult<InstallOutcome> {
        if let Some(repo_url) = &chart.repo_url {
            let repo_name = chart.chart.split('/').next().unwrap_or(&chart.chart);
            let _ = self.run_helm(&["repo", "add", repo_name, repo_url], "").await;
        }

        let values = super::deep_merge(defaults, overrides);
        let values_yaml = serde_yaml::to_string(&values).map_err(|e| HelmError::InstallFailed(chart.release_name.clone(), e.to_string()))?;

        let mut args: Vec<&str> = vec!["upgrade", "--install", &chart.release_name, &chart.chart, "--namespace", &chart.namespace, "--create-namespace", "--wait", "--wait-for-jobs", "--upgrade-crds"];
        let timeout_str = format!("{}s", INSTALL_TIMEOUT.as_secs());
        args.push("--timeout");
        args.push(&timeout_str);
        if dry_run {
            args.push("--dry-run");
        }
        if let Some(version) = &chart.version {
            args.push("--version");
            args.push(version);
        }

        let mut attempts = 0;
        loop {
            match self.run_helm(&args, &values_yaml).await {
                Ok(manifest) => return Ok(InstallOutcome { manifest, values_yaml }),
                Err(stderr) if stderr.contains("could not find the requested resource") && attempts < CRD_PROPAGATION_MAX_RETRIES => {
                    attempts += 1;
                    tokio::time::sleep(CRD_PROPAGATION_BACKOFF).await;
                }
                Err(stderr) if stderr.contains("could not find the requested resource") => {
                    return Err(HelmError::CrdNotReady(chart.release_name.clone()));
                }
                Err(stderr) => return Err(HelmError::InstallFailed(chart.release_name.clone(), stderr)),
            }
        }
    }
}
