/// Release-time constants (chart references, image tags) collected
/// into a struct injected at `main()` rather than baked in as
/// module-level constants, so tests can construct a `BuildInfo` with
/// arbitrary chart references rather than being pinned to whatever was
/// compiled in.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    /// OCI reference for the Tyger control-plane chart, tag fixed at
    /// release build time.
    pub tyger_chart_ref: String,
    pub traefik_chart_version: String,
    pub cert_manager_chart_version: String,
    pub nvidia_device_plugin_chart_version: String,
    /// Container image used for the migration-runner pod/Job.
    pub migration_runner_image: String,
    pub installer_version: String,
}

impl BuildInfo {
    /// The values baked into a release build.
    pub fn release() -> Self {
        BuildInfo {
            tyger_chart_ref: "oci://tygerregistry.azurecr.io/helm/tyger:stable".to_string(),
            traefik_chart_version: "24.0.0".to_string(),
            cert_manager_chart_version: "1.14.0".to_string(),
            nvidia_device_plugin_chart_version: "0.14.5".to_string(),
            migration_runner_image: "tygerregistry.azurecr.io/tyger-server:stable".to_string(),
            installer_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_build_info_is_non_empty() {
        let info = BuildInfo::release();
        assert!(!info.tyger_chart_ref.is_empty());
        assert!(info.tyger_chart_ref.starts_with("oci://"));
    }
}
