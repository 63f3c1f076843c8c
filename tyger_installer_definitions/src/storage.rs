/// Storage account configuration: the logs account plus one or more
/// buffer accounts used by the data plane.
///
/// ```yaml
/// storage:
///   logs:
///     name: acc2
///     location: westus
///   buffers:
///   - name: acc1
/// ```
use serde_derive::{Deserialize, Serialize};

pub const DEFAULT_SKU: &str = "Standard_LRS";

pub const ALLOWED_SKUS: &[&str] = &[
    "Standard_LRS",
    "Standard_GRS",
    "Standard_RAGRS",
    "Standard_ZRS",
    "Premium_LRS",
];

/// Fixed blob container created on every logs storage account.
pub const LOGS_CONTAINER: &str = "runs";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    pub logs: StorageAccountConfig,
    pub buffers: Vec<StorageAccountConfig>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct StorageAccountConfig {
    pub name: String,

    #[serde(default)]
    pub location: Option<String>,

    #[serde(default)]
    pub sku: Option<String>,
}

impl StorageAccountConfig {
    pub fn normalize(&mut self, default_location: &str) {
        if self.location.is_none() {
            self.location = Some(default_location.to_string());
        }
        if self.sku.is_none() {
            self.sku = Some(DEFAULT_SKU.to_string());
        }
    }

    pub fn location(&self) -> &str {
        self.location.as_deref().unwrap_or_default()
    }

    pub fn sku(&self) -> &str {
        self.sku.as_deref().unwrap_or(DEFAULT_SKU)
    }

    pub fn verify(&self) -> Result<(), failure::Error> {
        let re = regex::Regex::new(r"^[a-z0-9]{3,24}$").unwrap();
        if !re.is_match(&self.name) {
            failure::bail!("storage account name '{}' must match ^[a-z0-9]{{3,24}}$", self.name);
        }
        if !ALLOWED_SKUS.contains(&self.sku()) {
            failure::bail!("storage SKU '{}' is not one of the allowed SKUs", self.sku());
        }
        Ok(())
    }
}

impl StorageConfig {
    pub fn normalize(&mut self, default_location: &str) {
        self.logs.normalize(default_location);
        for b in &mut self.buffers {
            b.normalize(default_location);
        }
    }

    pub fn verify(&self) -> Result<(), failure::Error> {
        if self.buffers.is_empty() {
            failure::bail!("storage.buffers must contain at least one account");
        }
        self.logs.verify()?;
        for b in &self.buffers {
            b.verify()?;
        }
        let mut names = std::collections::BTreeSet::new();
        names.insert(self.logs.name.clone());
        for b in &self.buffers {
            if !names.insert(b.name.clone()) {
                failure::bail!("storage account name '{}' is duplicated", b.name);
            }
        }
        Ok(())
    }

    /// All accounts (logs first, then buffers), as reconciled by the
    /// storage step (C7.5).
    pub fn all_accounts(&self) -> Vec<&StorageAccountConfig> {
        let mut v = vec![&self.logs];
        v.extend(self.buffers.iter());
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_name() {
        let mut acc = StorageAccountConfig { name: "Has-Upper".into(), location: None, sku: None };
        acc.normalize("westus");
        assert!(acc.verify().is_err());
    }

    #[test]
    fn defaults_sku() {
        let mut acc = StorageAccountConfig { name: "acc1".into(), location: None, sku: None };
        acc.normalize("westus");
        assert_eq!(acc.sku(), DEFAULT_SKU);
    }
}
