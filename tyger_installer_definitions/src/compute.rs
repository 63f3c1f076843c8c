/// Cluster and node-pool configuration.
///
/// ```yaml
/// compute:
///   clusters:
///   - name: abc
///     apiHost: true
///     userNodePools:
///     - name: cpunp
///       vmSize: Standard_DS12_v2
///       minCount: 0
///       maxCount: 10
///   managementPrincipals:
///   - kind: User
///     objectId: "...."
///     userPrincipalName: me@example.com
///   privateContainerRegistries: ["myregistry"]
/// ```
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::principal::ManagementPrincipal;

/// Default Kubernetes version used when a `ClusterConfig` doesn't set one.
pub const DEFAULT_KUBERNETES_VERSION: &str = "1.27";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct ComputeConfig {
    pub clusters: Vec<ClusterConfig>,

    #[serde(rename = "managementPrincipals")]
    pub management_principals: Vec<ManagementPrincipal>,

    #[serde(rename = "privateContainerRegistries", default)]
    pub private_container_registries: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    pub name: String,

    #[serde(default)]
    pub location: Option<String>,

    #[serde(rename = "kubernetesVersion", default)]
    pub kubernetes_version: Option<String>,

    #[serde(rename = "apiHost", default)]
    pub api_host: bool,

    #[serde(rename = "userNodePools")]
    pub user_node_pools: Vec<NodePoolConfig>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct NodePoolConfig {
    pub name: String,

    #[serde(rename = "vmSize")]
    pub vm_size: String,

    #[serde(rename = "minCount")]
    pub min_count: u32,

    #[serde(rename = "maxCount")]
    pub max_count: u32,
}

impl NodePoolConfig {
    /// A node pool is GPU-capable iff its VM SKU begins with `Standard_N`
    /// and does not end with `_v4` (the `_v4` N-series SKUs are CPU-only
    /// variants repurposing the N prefix).
    pub fn is_gpu_capable(&self) -> bool {
        self.vm_size.starts_with("Standard_N") && !self.vm_size.ends_with("_v4")
    }

    pub fn verify(&self) -> Result<(), failure::Error> {
        if self.min_count > self.max_count {
            failure::bail!(
                "node pool '{}' has minCount {} > maxCount {}",
                self.name,
                self.min_count,
                self.max_count
            );
        }
        Ok(())
    }
}

impl ClusterConfig {
    pub fn normalize(&mut self, default_location: &str) {
        if self.location.is_none() {
            self.location = Some(default_location.to_string());
        }
        if self.kubernetes_version.is_none() {
            self.kubernetes_version = Some(DEFAULT_KUBERNETES_VERSION.to_string());
        }
    }

    pub fn location(&self) -> &str {
        self.location.as_deref().unwrap_or_default()
    }

    pub fn kubernetes_version(&self) -> &str {
        self.kubernetes_version.as_deref().unwrap_or(DEFAULT_KUBERNETES_VERSION)
    }

    pub fn verify(&self) -> Result<(), failure::Error> {
        if self.user_node_pools.is_empty() {
            failure::bail!("cluster '{}' must have at least one user node pool", self.name);
        }
        for np in &self.user_node_pools {
            np.verify()?;
        }
        Ok(())
    }
}

impl ComputeConfig {
    pub fn normalize(&mut self, default_location: &str) {
        for c in &mut self.clusters {
            c.normalize(default_location);
        }
    }

    pub fn api_host_cluster(&self) -> Option<&ClusterConfig> {
        self.clusters.iter().find(|c| c.api_host)
    }

    pub fn verify(&self) -> Result<(), failure::Error> {
        let mut names = BTreeSet::new();
        for c in &self.clusters {
            if !names.insert(c.name.clone()) {
                failure::bail!("cluster name '{}' is duplicated", c.name);
            }
            c.verify()?;
        }
        let api_hosts = self.clusters.iter().filter(|c| c.api_host).count();
        if api_hosts != 1 {
            failure::bail!("exactly one cluster must have apiHost = true (found {})", api_hosts);
        }
        if self.management_principals.is_empty() {
            failure::bail!("managementPrincipals must be non-empty");
        }
        for p in &self.management_principals {
            p.verify()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_detection() {
        let gpu = NodePoolConfig { name: "gpunp".into(), vm_size: "Standard_NC6".into(), min_count: 0, max_count: 2 };
        assert!(gpu.is_gpu_capable());

        let cpu_in_n_series_v4 = NodePoolConfig { name: "np".into(), vm_size: "Standard_NC6_v4".into(), min_count: 0, max_count: 2 };
        assert!(!cpu_in_n_series_v4.is_gpu_capable());

        let plain_cpu = NodePoolConfig { name: "cpunp".into(), vm_size: "Standard_DS12_v2".into(), min_count: 0, max_count: 10 };
        assert!(!plain_cpu.is_gpu_capable());
    }

    #[test]
    fn exactly_one_api_host_enforced() {
        let mk_cluster = |name: &str, api_host: bool| ClusterConfig {
            name: name.into(),
            location: Some("westus".into()),
            kubernetes_version: None,
            api_host,
            user_node_pools: vec![NodePoolConfig { name: "np".into(), vm_size: "Standard_DS2_v2".into(), min_count: 0, max_count: 1 }],
        };
        let mut cfg = ComputeConfig {
            clusters: vec![mk_cluster("a", true), mk_cluster("b", true)],
            management_principals: vec![],
            private_container_registries: vec![],
        };
        cfg.normalize("westus");
        assert!(cfg.verify().is_err());

        cfg.clusters[1].api_host = false;
        // still fails: no management principals
        assert!(cfg.verify().is_err());
    }
}
