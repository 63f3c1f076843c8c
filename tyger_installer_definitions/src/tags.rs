/// Tag keys written on every cloud resource the installer creates.
use std::collections::BTreeMap;

/// Tag naming the owning environment. Every cloud resource created by the
/// orchestrator carries this.
pub const ENVIRONMENT_TAG: &str = "tyger-environment";

/// Tag marking that one-time PostgreSQL admin/role/firewall setup ran.
pub const DB_CONFIGURED_TAG: &str = "tyger-db-configured";

/// Build the standard `{ENVIRONMENT_TAG: name}` tag map for a new resource.
pub fn environment_tags(environment_name: &str) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    tags.insert(ENVIRONMENT_TAG.to_string(), environment_name.to_string());
    tags
}

/// Read the environment tag off an arbitrary tag map, if present.
pub fn owning_environment(tags: &BTreeMap<String, String>) -> Option<&str> {
    tags.get(ENVIRONMENT_TAG).map(String::as_str)
}

/// Whether a resource's tags mark it as belonging to `environment_name`.
///
/// A resource with no `tyger-environment` tag at all is not considered a
/// conflict by this check alone (untagged resources are handled by the
/// uninstall partitioning logic in `tyger_installer_core::uninstall`); a
/// resource tagged for a *different* environment is always a conflict.
pub fn conflicts_with(tags: &BTreeMap<String, String>, environment_name: &str) -> bool {
    match owning_environment(tags) {
        Some(owner) => owner != environment_name,
        None => false,
    }
}

pub fn db_configured_tags(environment_name: &str) -> BTreeMap<String, String> {
    let mut tags = environment_tags(environment_name);
    tags.insert(DB_CONFIGURED_TAG.to_string(), environment_name.to_string());
    tags
}

pub fn db_already_configured(tags: &BTreeMap<String, String>, environment_name: &str) -> bool {
    tags.get(DB_CONFIGURED_TAG).map(String::as_str) == Some(environment_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_detection() {
        let tags = environment_tags("abc");
        assert!(!conflicts_with(&tags, "abc"));
        assert!(conflicts_with(&tags, "other"));
        assert!(!conflicts_with(&BTreeMap::new(), "abc"));
    }

    #[test]
    fn db_configured_round_trip() {
        let tags = db_configured_tags("abc");
        assert!(db_already_configured(&tags, "abc"));
        assert!(!db_already_configured(&tags, "other"));
    }
}
