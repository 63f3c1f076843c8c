/// The quick (syntactic) validator (C1).
///
/// Unlike `EnvironmentConfig::verify` (which `bail!`s on the first
/// problem), this entry point never fails fast: it mutates `cfg` in
/// place with `normalize()`, then runs every cross-field rule, logging
/// each violation with `log::error!` and returning `false` if any rule
/// was violated. It never returns an `Err`.
use std::collections::BTreeSet;

use crate::compute::ComputeConfig;
use crate::config::EnvironmentConfig;
use crate::database::{DatabaseConfig, ALLOWED_COMPUTE_TIERS};
use crate::storage::{StorageConfig, ALLOWED_SKUS};

/// Validate and normalize `cfg`. Returns `true` iff no rule was violated.
///
/// Idempotent: calling this twice on the same (already-normalized)
/// config produces the same `cfg` and the same result.
pub fn validate(cfg: &mut EnvironmentConfig) -> bool {
    cfg.normalize();

    let mut ok = true;
    let mut violation = |msg: String| {
        log::error!("{}", msg);
        ok = false;
    };

    let env_re = regex::Regex::new(r"^[a-z][a-z0-9-]{1,23}$").unwrap();
    if !env_re.is_match(&cfg.environment_name) {
        violation(format!(
            "environmentName '{}' must match ^[a-z][a-z0-9-]{{1,23}}$",
            cfg.environment_name
        ));
    }

    match (&cfg.cloud, &cfg.docker) {
        (Some(_), None) | (None, Some(_)) => {}
        (Some(_), Some(_)) => violation("exactly one of cloud/docker targets must be configured (both set)".into()),
        (None, None) => violation("exactly one of cloud/docker targets must be configured (neither set)".into()),
    }

    if let Some(cloud) = &cfg.cloud {
        if cloud.tenant_id.trim().is_empty() {
            violation("cloud.tenantId must not be empty".into());
        }
        if cloud.subscription_id.trim().is_empty() {
            violation("cloud.subscriptionId must not be empty".into());
        }
        if cloud.default_location.trim().is_empty() {
            violation("cloud.defaultLocation must not be empty".into());
        }
        if !env_re.is_match(cloud.resource_group()) {
            violation(format!(
                "resourceGroup '{}' must match ^[a-z][a-z0-9-]{{1,23}}$",
                cloud.resource_group()
            ));
        }

        validate_compute(&cloud.compute, &mut violation);
        validate_storage(&cloud.storage, &mut violation);
        validate_database(&cloud.database, &mut violation);

        if let Some(api_host) = cloud.compute.api_host_cluster() {
            let pattern = format!(
                r"^[A-Za-z]([A-Za-z0-9-]{{0,61}}[A-Za-z0-9])?\.{}\.cloudapp\.azure\.com$",
                regex::escape(api_host.location())
            );
            let domain_re = regex::Regex::new(&pattern).unwrap();
            if !domain_re.is_match(&cfg.api.domain_name) {
                violation(format!(
                    "domain name '{}' does not match the expected <name>.{}.cloudapp.azure.com form",
                    cfg.api.domain_name,
                    api_host.location()
                ));
            }
        }

        if cfg.api.auth.tenant_id.trim().is_empty() {
            violation("api.auth.tenantId must not be empty".into());
        }
        for (label, uri) in [
            ("apiAppUri", cfg.api.auth.api_app_uri()),
            ("cliAppUri", cfg.api.auth.cli_app_uri()),
        ] {
            if !(uri.starts_with("https://") || uri.starts_with("api://")) {
                violation(format!("api.auth.{} must be an absolute URI, got '{}'", label, uri));
            }
        }
    }

    if let Some(docker) = &cfg.docker {
        if docker.data_dir.trim().is_empty() {
            violation("docker.dataDir must not be empty".into());
        }
    }

    ok
}

fn validate_compute(compute: &ComputeConfig, violation: &mut impl FnMut(String)) {
    let mut names = BTreeSet::new();
    for c in &compute.clusters {
        if !names.insert(c.name.clone()) {
            violation(format!("cluster name '{}' is duplicated", c.name));
        }
        if c.user_node_pools.is_empty() {
            violation(format!("cluster '{}' must have at least one user node pool", c.name));
        }
        for np in &c.user_node_pools {
            if np.min_count > np.max_count {
                violation(format!(
                    "node pool '{}' has minCount {} > maxCount {}",
                    np.name, np.min_count, np.max_count
                ));
            }
        }
    }
    let api_hosts = compute.clusters.iter().filter(|c| c.api_host).count();
    if api_hosts != 1 {
        violation(format!("exactly one cluster must have apiHost = true (found {})", api_hosts));
    }
    if compute.management_principals.is_empty() {
        violation("managementPrincipals must be non-empty".into());
    }
    for p in &compute.management_principals {
        if let Err(e) = p.verify() {
            violation(e.to_string());
        }
    }
}

fn validate_storage(storage: &StorageConfig, violation: &mut impl FnMut(String)) {
    if storage.buffers.is_empty() {
        violation("storage.buffers must contain at least one account".into());
    }
    let name_re = regex::Regex::new(r"^[a-z0-9]{3,24}$").unwrap();
    let mut names = BTreeSet::new();
    for acc in storage.all_accounts() {
        if !name_re.is_match(&acc.name) {
            violation(format!("storage account name '{}' must match ^[a-z0-9]{{3,24}}$", acc.name));
        }
        if !ALLOWED_SKUS.contains(&acc.sku()) {
            violation(format!("storage SKU '{}' is not one of the allowed SKUs", acc.sku()));
        }
        if !names.insert(acc.name.clone()) {
            violation(format!("storage account name '{}' is duplicated", acc.name));
        }
    }
}

fn validate_database(db: &DatabaseConfig, violation: &mut impl FnMut(String)) {
    let re = regex::Regex::new(r"^[a-z][a-z0-9-]{2,62}$").unwrap();
    if !re.is_match(&db.server_name) {
        violation(format!("database.serverName '{}' is not a valid PostgreSQL server name", db.server_name));
    }
    if !ALLOWED_COMPUTE_TIERS.contains(&db.compute_tier.as_str()) {
        violation(format!("database computeTier '{}' is not an allowed PostgreSQL SKU tier", db.compute_tier));
    }
    if db.backup_retention_days < 0 {
        violation(format!("backupRetentionDays must be >= 0, got {}", db.backup_retention_days));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml;

    fn parse(yaml: &str) -> EnvironmentConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    const HAPPY: &str = r#"
environmentName: abc
cloud:
  tenantId: t
  subscriptionId: s
  defaultLocation: westus
  compute:
    clusters:
    - name: abc
      apiHost: true
      userNodePools:
      - name: cpunp
        vmSize: Standard_DS12_v2
        minCount: 0
        maxCount: 10
    managementPrincipals:
    - kind: User
      objectId: oid
      userPrincipalName: me@example.com
  storage:
    logs:
      name: acc2
    buffers:
    - name: acc1
  database:
    serverName: tyger-abc
    computeTier: GeneralPurpose
    vmSize: Standard_D2s_v3
    initialDatabaseSizeGb: 128
    backupRetentionDays: 7
api:
  domainName: abc.westus.cloudapp.azure.com
  auth:
    tenantId: t
"#;

    #[test]
    fn happy_path_validates() {
        let mut cfg = parse(HAPPY);
        assert!(validate(&mut cfg));
    }

    #[test]
    fn unknown_field_rejected_at_parse_time() {
        let bad = format!("{}\nbogusField: true\n", HAPPY);
        let parsed: Result<EnvironmentConfig, _> = serde_yaml::from_str(&bad);
        assert!(parsed.is_err());
    }

    #[test]
    fn validate_is_idempotent() {
        let mut cfg = parse(HAPPY);
        assert!(validate(&mut cfg));
        let once = serde_yaml::to_string(&cfg).unwrap();
        assert!(validate(&mut cfg));
        let twice = serde_yaml::to_string(&cfg).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn catches_multiple_violations_in_one_pass() {
        let mut cfg = parse(HAPPY);
        cfg.cloud.as_mut().unwrap().database.backup_retention_days = -1;
        cfg.cloud.as_mut().unwrap().database.compute_tier = "Bogus".into();
        assert!(!validate(&mut cfg));
    }
}
