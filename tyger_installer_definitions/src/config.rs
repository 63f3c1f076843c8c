/// Root configuration model.
///
/// ```yaml
/// environmentName: abc
/// cloud:
///   tenantId: "...."
///   subscriptionId: "...."
///   defaultLocation: westus
///   compute: { ... }
///   storage: { ... }
///   database: { ... }
/// api:
///   domainName: abc.westus.cloudapp.azure.com
///   auth:
///     tenantId: "...."
///     apiAppUri: "api://tyger-server"
///     cliAppUri: "api://tyger-cli"
/// ```
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::compute::ComputeConfig;
use crate::database::DatabaseConfig;
use crate::storage::StorageConfig;

/// Directory app identifier URI defaults.
pub const DEFAULT_API_APP_URI: &str = "api://tyger-server";
pub const DEFAULT_CLI_APP_URI: &str = "api://tyger-cli";
/// The single fixed OAuth2 permission scope id granting the CLI app
/// access to the server app.
pub const CLI_ACCESS_SCOPE_ID: &str = "6291652f-fd9d-4a31-aa5f-87306c599bb6";

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentConfig {
    #[serde(rename = "environmentName")]
    pub environment_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud: Option<CloudConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<DockerConfig>,

    pub api: ApiConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct CloudConfig {
    #[serde(rename = "tenantId")]
    pub tenant_id: String,

    #[serde(rename = "subscriptionId")]
    pub subscription_id: String,

    #[serde(rename = "defaultLocation")]
    pub default_location: String,

    #[serde(rename = "resourceGroup", default)]
    pub resource_group: Option<String>,

    pub compute: ComputeConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,

    #[serde(rename = "logAnalyticsWorkspace", default, skip_serializing_if = "Option::is_none")]
    pub log_analytics_workspace: Option<String>,
}

impl CloudConfig {
    pub fn resource_group(&self) -> &str {
        self.resource_group.as_deref().unwrap_or_default()
    }

    pub fn normalize(&mut self, environment_name: &str) {
        if self.resource_group.is_none() {
            self.resource_group = Some(environment_name.to_string());
        }
        self.compute.normalize(&self.default_location);
        self.storage.normalize(&self.default_location);
        self.database.normalize(&self.default_location);
    }

    pub fn verify(&self) -> Result<(), failure::Error> {
        if self.tenant_id.trim().is_empty() {
            failure::bail!("cloud.tenantId must not be empty");
        }
        if self.subscription_id.trim().is_empty() {
            failure::bail!("cloud.subscriptionId must not be empty");
        }
        if self.default_location.trim().is_empty() {
            failure::bail!("cloud.defaultLocation must not be empty");
        }
        let re = regex::Regex::new(r"^[a-z][a-z0-9-]{1,23}$").unwrap();
        if !re.is_match(self.resource_group()) {
            failure::bail!("resourceGroup '{}' must match ^[a-z][a-z0-9-]{{1,23}}$", self.resource_group());
        }
        self.compute.verify()?;
        self.storage.verify()?;
        self.database.verify()?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct DockerConfig {
    /// Host directory backing the local data-plane and database volumes.
    #[serde(rename = "dataDir")]
    pub data_dir: String,

    #[serde(rename = "databaseImage", default)]
    pub database_image: Option<String>,

    #[serde(rename = "controlPlaneImage", default)]
    pub control_plane_image: Option<String>,

    #[serde(rename = "dataPlaneImage", default)]
    pub data_plane_image: Option<String>,
}

impl DockerConfig {
    pub fn verify(&self) -> Result<(), failure::Error> {
        if self.data_dir.trim().is_empty() {
            failure::bail!("docker.dataDir must not be empty");
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    #[serde(rename = "domainName")]
    pub domain_name: String,

    pub auth: AuthConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmOverrides>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    #[serde(rename = "tenantId")]
    pub tenant_id: String,

    #[serde(rename = "apiAppUri", default)]
    pub api_app_uri: Option<String>,

    #[serde(rename = "cliAppUri", default)]
    pub cli_app_uri: Option<String>,
}

impl AuthConfig {
    pub fn normalize(&mut self) {
        if self.api_app_uri.is_none() {
            self.api_app_uri = Some(DEFAULT_API_APP_URI.to_string());
        }
        if self.cli_app_uri.is_none() {
            self.cli_app_uri = Some(DEFAULT_CLI_APP_URI.to_string());
        }
    }

    pub fn api_app_uri(&self) -> &str {
        self.api_app_uri.as_deref().unwrap_or(DEFAULT_API_APP_URI)
    }
    pub fn cli_app_uri(&self) -> &str {
        self.cli_app_uri.as_deref().unwrap_or(DEFAULT_CLI_APP_URI)
    }

    pub fn verify(&self) -> Result<(), failure::Error> {
        if self.tenant_id.trim().is_empty() {
            failure::bail!("api.auth.tenantId must not be empty");
        }
        for (label, uri) in [("apiAppUri", self.api_app_uri()), ("cliAppUri", self.cli_app_uri())] {
            if !(uri.starts_with("https://") || uri.starts_with("api://")) {
                failure::bail!("api.auth.{} must be an absolute URI, got '{}'", label, uri);
            }
        }
        Ok(())
    }
}

/// Per-chart value overrides, deep-merged over fixed defaults by the
/// Helm facade.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct HelmOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tyger: Option<serde_yaml::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traefik: Option<serde_yaml::Value>,

    #[serde(rename = "certManager", default, skip_serializing_if = "Option::is_none")]
    pub cert_manager: Option<serde_yaml::Value>,

    #[serde(rename = "nvidiaDevicePlugin", default, skip_serializing_if = "Option::is_none")]
    pub nvidia_device_plugin: Option<serde_yaml::Value>,
}

impl ApiConfig {
    pub fn normalize(&mut self) {
        self.auth.normalize();
    }

    /// Validate `domainName` against the region-dependent form:
    /// `^[A-Za-z]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.<region>\.cloudapp\.azure\.com$`
    /// where `<region>` is the API-host cluster's location.
    pub fn verify(&self, api_host_location: &str) -> Result<(), failure::Error> {
        let pattern = format!(
            r"^[A-Za-z]([A-Za-z0-9-]{{0,61}}[A-Za-z0-9])?\.{}\.cloudapp\.azure\.com$",
            regex::escape(api_host_location)
        );
        let re = regex::Regex::new(&pattern).unwrap();
        if !re.is_match(&self.domain_name) {
            failure::bail!(
                "domain name '{}' does not match the expected <name>.{}.cloudapp.azure.com form",
                self.domain_name,
                api_host_location
            );
        }
        self.auth.verify()?;
        Ok(())
    }
}

impl EnvironmentConfig {
    pub fn normalize(&mut self) {
        if let Some(cloud) = &mut self.cloud {
            cloud.normalize(&self.environment_name);
        }
        self.api.normalize();
    }

    pub fn verify(&self) -> Result<(), failure::Error> {
        let re = regex::Regex::new(r"^[a-z][a-z0-9-]{1,23}$").unwrap();
        if !re.is_match(&self.environment_name) {
            failure::bail!("environmentName '{}' must match ^[a-z][a-z0-9-]{{1,23}}$", self.environment_name);
        }
        match (&self.cloud, &self.docker) {
            (Some(_), None) | (None, Some(_)) => {}
            _ => failure::bail!("exactly one of cloud/docker targets must be configured"),
        }
        if let Some(cloud) = &self.cloud {
            cloud.verify()?;
            let api_host = cloud.compute.api_host_cluster().ok_or_else(|| {
                failure::format_err!("no cluster has apiHost = true")
            })?;
            self.api.verify(api_host.location())?;
        }
        if let Some(docker) = &self.docker {
            docker.verify()?;
        }
        Ok(())
    }

    /// Resource group name for the cloud target (defaults to
    /// `environmentName`).
    pub fn resource_group(&self) -> Option<&str> {
        self.cloud.as_ref().map(|c| c.resource_group())
    }

    pub fn tags(&self) -> BTreeMap<String, String> {
        crate::tags::environment_tags(&self.environment_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{ClusterConfig, NodePoolConfig};
    use crate::database::DatabaseConfig;
    use crate::principal::{ManagementPrincipal, PrincipalKind};
    use crate::storage::{StorageAccountConfig, StorageConfig};

    fn minimal_cloud_env() -> EnvironmentConfig {
        EnvironmentConfig {
            environment_name: "abc".into(),
            cloud: Some(CloudConfig {
                tenant_id: "tenant".into(),
                subscription_id: "sub".into(),
                default_location: "westus".into(),
                resource_group: None,
                compute: ComputeConfig {
                    clusters: vec![ClusterConfig {
                        name: "abc".into(),
                        location: None,
                        kubernetes_version: None,
                        api_host: true,
                        user_node_pools: vec![NodePoolConfig {
                            name: "cpunp".into(),
                            vm_size: "Standard_DS12_v2".into(),
                            min_count: 0,
                            max_count: 10,
                        }],
                    }],
                    management_principals: vec![ManagementPrincipal {
                        kind: PrincipalKind::User,
                        object_id: "oid".into(),
                        user_principal_name: Some("me@example.com".into()),
                    }],
                    private_container_registries: vec![],
                },
                storage: StorageConfig {
                    logs: StorageAccountConfig { name: "acc2".into(), location: None, sku: None },
                    buffers: vec![StorageAccountConfig { name: "acc1".into(), location: None, sku: None }],
                },
                database: DatabaseConfig {
                    server_name: "tyger-abc".into(),
                    location: None,
                    compute_tier: "GeneralPurpose".into(),
                    vm_size: "Standard_D2s_v3".into(),
                    postgres_major_version: None,
                    initial_database_size_gb: 128,
                    backup_retention_days: 7,
                    backup_geo_redundancy: false,
                },
                log_analytics_workspace: None,
            }),
            docker: None,
            api: ApiConfig {
                domain_name: "abc.westus.cloudapp.azure.com".into(),
                auth: AuthConfig { tenant_id: "tenant".into(), api_app_uri: None, cli_app_uri: None },
                helm: None,
            },
        }
    }

    #[test]
    fn minimal_happy_path_normalizes_and_verifies() {
        let mut env = minimal_cloud_env();
        env.normalize();
        env.verify().unwrap();
        assert_eq!(env.resource_group(), Some("abc"));
    }

    #[test]
    fn rejects_mixed_targets() {
        let mut env = minimal_cloud_env();
        env.docker = Some(DockerConfig { data_dir: "/data".into(), ..Default::default() });
        env.normalize();
        assert!(env.verify().is_err());
    }

    #[test]
    fn rejects_domain_mismatched_with_cluster_region() {
        let mut env = minimal_cloud_env();
        env.api.domain_name = "abc.eastus.cloudapp.azure.com".into();
        env.normalize();
        assert!(env.verify().is_err());
    }

    #[test]
    fn idempotent_normalize() {
        let mut env = minimal_cloud_env();
        env.normalize();
        let once = serde_yaml::to_string(&env).unwrap();
        env.normalize();
        let twice = serde_yaml::to_string(&env).unwrap();
        assert_eq!(once, twice);
    }
}
