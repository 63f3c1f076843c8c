/// The Helm facade (C5).
///
/// A trait wrapping chart installs behind an in-memory fake for tests
/// and a real `tokio::process::Command`-based adapter (builds `helm
/// ...` argv and runs it as a subprocess) for production.
use std::time::Duration;

use async_trait::async_trait;
use failure::Fail;
use serde_yaml::Value;

pub mod fake;
#[cfg(feature = "live")]
pub mod live;

pub use fake::FakeHelm;
#[cfg(feature = "live")]
pub use live::LiveHelm;

pub const INSTALL_TIMEOUT: Duration = Duration::from_secs(120);
pub const CRD_PROPAGATION_MAX_RETRIES: u32 = 30;
pub const CRD_PROPAGATION_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct ChartRef {
    pub release_name: String,
    pub namespace: String,
    pub chart: String,
    /// Set when the chart is pulled from a classic repo (`repoUrl`);
    /// `None` for an OCI reference, which is used as-is.
    pub repo_url: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Fail)]
pub enum HelmError {
    #[fail(display = "helm install of {} failed: {}", _0, _1)]
    InstallFailed(String, String),
    #[fail(display = "server could not find the requested resource (CRD propagation) for {}", _0)]
    CrdNotReady(String),
}

pub type HelmResult<T> = Result<T, HelmError>;

#[derive(Clone, Debug)]
pub struct InstallOutcome {
    pub manifest: String,
    pub values_yaml: String,
}

/// One operation, matching the `installChart(cfg, overrides, dryRun?,
/// customise?)` shape the steps need. `customise` lets a step add
/// values the chart's own overrides never need to know about (e.g. the
/// Tyger step's identity client IDs, computed per install rather than
/// configured by the user).
#[async_trait]
pub trait HelmEngine: Send + Sync {
    async fn install_chart(&self, chart: &ChartRef, defaults: &Value, overrides: &Value, dry_run: bool) -> HelmResult<InstallOutcome>;
}

/// `overrides` wins field-for-field over `defaults`; shared by both
/// facade implementations so the merge itself isn't duplicated per
/// adapter.
pub fn deep_merge(defaults: &Value, overrides: &Value) -> Value {
    match (defaults, overrides) {
        (Value::Mapping(base), Value::Mapping(over)) => {
            let mut merged = base.clone();
            for (k, v) in over {
                let existing = merged.get(k).cloned().unwrap_or(Value::Null);
                merged.insert(k.clone(), deep_merge(&existing, v));
            }
            Value::Mapping(merged)
        }
        (_, Value::Null) => defaults.clone(),
        (_, over) => over.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Mapping;

    #[test]
    fn deep_merge_overrides_win_field_by_field() {
        let mut base = Mapping::new();
        base.insert(Value::from("replicas"), Value::from(1));
        base.insert(Value::from("image"), Value::from("tyger:stable"));

        let mut over = Mapping::new();
        over.insert(Value::from("replicas"), Value::from(3));

        let merged = deep_merge(&Value::Mapping(base), &Value::Mapping(over));
        assert_eq!(merged.get("replicas"), Some(&Value::from(3)));
        assert_eq!(merged.get("image"), Some(&Value::from("tyger:stable")));
    }
}
