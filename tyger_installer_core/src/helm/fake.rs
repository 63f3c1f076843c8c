/// An in-memory `HelmEngine`: records every (merged-values) install
/// request and always succeeds, so tests can assert on what a step
/// would have installed without a real Helm binary involved.
use std::sync::Mutex;

use async_trait::async_trait;
use serde_yaml::Value;

use super::{ChartRef, HelmEngine, HelmResult, InstallOutcome};

#[derive(Default)]
pub struct FakeHelm {
    installs: Mutex<Vec<(String, Value)>>,
    /// Release names that should fail once before "succeeding" on a
    /// later attempt (used to simulate the CRD-propagation retry path).
    fail_first_n: Mutex<std::collections::HashMap<String, u32>>,
}

impl FakeHelm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, release_name: &str, times: u32) {
        self.fail_first_n.lock().unwrap().insert(release_name.to_string(), times);
    }

    pub fn installed_releases(&self) -> Vec<String> {
        self.installs.lock().unwrap().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn values_for(&self, release_name: &str) -> Option<Value> {
        self.installs.lock().unwrap().iter().find(|(name, _)| name == release_name).map(|(_, v)| v.clone())
    }
}

#[async_trait]
impl HelmEngine for FakeHelm {
    async fn install_chart(&self, chart: &ChartRef, defaults: &Value, overrides: &Value, dry_run: bool) -> HelmResult<InstallOutcome> {
        {
            let mut remaining = self.fail_first_n.lock().unwrap();
            if let Some(count) = remaining.get_mut(&chart.release_name) {
                if *count > 0 {
                    *count -= 1;
                    return Err(super::HelmError::CrdNotReady(chart.release_name.clone()));
                }
            }
        }
        let values = super::deep_merge(defaults, overrides);
        let values_yaml = serde_yaml::to_string(&values).unwrap_or_default();
        if !dry_run {
            self.installs.lock().unwrap().push((chart.release_name.clone(), values.clone()));
        }
        Ok(InstallOutcome { manifest: format!("# fake manifest for {}\n", chart.release_name), values_yaml })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Mapping;

    #[tokio::test]
    async fn records_merged_values() {
        let helm = FakeHelm::new();
        let chart = ChartRef { release_name: "traefik".into(), namespace: "traefik".into(), chart: "traefik/traefik".into(), repo_url: Some("https://traefik.example".into()), version: Some("1.0".into()) };
        let defaults = Value::Mapping(Mapping::new());
        let overrides = Value::Mapping(Mapping::new());
        helm.install_chart(&chart, &defaults, &overrides, false).await.unwrap();
        assert_eq!(helm.installed_releases(), vec!["traefik".to_string()]);
    }

    #[tokio::test]
    async fn fail_next_simulates_crd_race() {
        let helm = FakeHelm::new();
        helm.fail_next("tyger", 1);
        let chart = ChartRef { release_name: "tyger".into(), namespace: "tyger".into(), chart: "oci://example/tyger".into(), repo_url: None, version: None };
        let defaults = Value::Mapping(Mapping::new());
        let overrides = Value::Mapping(Mapping::new());
        assert!(helm.install_chart(&chart, &defaults, &overrides, false).await.is_err());
        assert!(helm.install_chart(&chart, &defaults, &overrides, false).await.is_ok());
    }
}
