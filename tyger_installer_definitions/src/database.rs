/// PostgreSQL flexible server configuration.
///
/// ```yaml
/// database:
///   serverName: tyger-abc
///   computeTier: GeneralPurpose
///   vmSize: Standard_D2s_v3
///   initialDatabaseSizeGb: 128
///   backupRetentionDays: 7
///   backupGeoRedundancy: false
/// ```
use serde_derive::{Deserialize, Serialize};

pub const DEFAULT_POSTGRES_MAJOR_VERSION: u32 = 14;

/// Allowed PostgreSQL flexible server compute tiers.
pub const ALLOWED_COMPUTE_TIERS: &[&str] = &["Burstable", "GeneralPurpose", "MemoryOptimized"];

/// Fixed role created by the PostgreSQL step.
pub const OWNERS_ROLE: &str = "tyger-owners";
pub const DEFAULT_DATABASE_NAME: &str = "postgres";
pub const DEFAULT_PORT: u16 = 5432;
pub const AAD_TOKEN_SCOPE: &str = "https://ossrdbms-aad.database.windows.net";

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(rename = "serverName")]
    pub server_name: String,

    #[serde(default)]
    pub location: Option<String>,

    #[serde(rename = "computeTier")]
    pub compute_tier: String,

    #[serde(rename = "vmSize")]
    pub vm_size: String,

    #[serde(rename = "postgresMajorVersion", default)]
    pub postgres_major_version: Option<u32>,

    #[serde(rename = "initialDatabaseSizeGb")]
    pub initial_database_size_gb: u32,

    #[serde(rename = "backupRetentionDays")]
    pub backup_retention_days: i64,

    #[serde(rename = "backupGeoRedundancy", default)]
    pub backup_geo_redundancy: bool,
}

impl DatabaseConfig {
    pub fn normalize(&mut self, default_location: &str) {
        if self.location.is_none() {
            self.location = Some(default_location.to_string());
        }
        if self.postgres_major_version.is_none() {
            // 14 is the default version (see DESIGN.md Open Question
            // decision #3).
            self.postgres_major_version = Some(DEFAULT_POSTGRES_MAJOR_VERSION);
        }
    }

    pub fn location(&self) -> &str {
        self.location.as_deref().unwrap_or_default()
    }

    pub fn postgres_major_version(&self) -> u32 {
        self.postgres_major_version.unwrap_or(DEFAULT_POSTGRES_MAJOR_VERSION)
    }

    pub fn verify(&self) -> Result<(), failure::Error> {
        let re = regex::Regex::new(r"^[a-z][a-z0-9-]{2,62}$").unwrap();
        if !re.is_match(&self.server_name) {
            failure::bail!("database.serverName '{}' is not a valid PostgreSQL server name", self.server_name);
        }
        if !ALLOWED_COMPUTE_TIERS.contains(&self.compute_tier.as_str()) {
            failure::bail!("database computeTier '{}' is not an allowed PostgreSQL SKU tier", self.compute_tier);
        }
        if self.backup_retention_days < 0 {
            failure::bail!("backupRetentionDays must be >= 0, got {}", self.backup_retention_days);
        }
        if self.initial_database_size_gb == 0 {
            failure::bail!("initialDatabaseSizeGb must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DatabaseConfig {
        DatabaseConfig {
            server_name: "tyger-abc".into(),
            location: None,
            compute_tier: "GeneralPurpose".into(),
            vm_size: "Standard_D2s_v3".into(),
            postgres_major_version: None,
            initial_database_size_gb: 128,
            backup_retention_days: 7,
            backup_geo_redundancy: false,
        }
    }

    #[test]
    fn default_major_version_is_14() {
        let mut db = sample();
        db.normalize("westus");
        assert_eq!(db.postgres_major_version(), 14);
    }

    #[test]
    fn rejects_negative_retention() {
        let mut db = sample();
        db.backup_retention_days = -1;
        db.normalize("westus");
        assert!(db.verify().is_err());
    }

    #[test]
    fn rejects_bad_compute_tier() {
        let mut db = sample();
        db.compute_tier = "Bogus".into();
        db.normalize("westus");
        assert!(db.verify().is_err());
    }
}
