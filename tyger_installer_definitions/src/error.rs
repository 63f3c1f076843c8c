/// Error kinds raised while parsing or validating an `EnvironmentConfig`.
///
/// Follows the same `Fail`/`Context` wrapping the rest of this lineage
/// uses: a small enum of named failure shapes plus a thin struct that
/// carries the `Context` so `?` keeps working with `failure::Error`.
use failure::{Backtrace, Context, Fail};
use std::fmt::{self, Display};

#[derive(Debug)]
pub struct ConfigError {
    inner: Context<ConfigErrorKind>,
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ConfigErrorKind {
    #[fail(display = "environmentName '{}' must match ^[a-z][a-z0-9-]{{1,23}}$", _0)]
    InvalidEnvironmentName(String),

    #[fail(display = "resourceGroup '{}' must match ^[a-z][a-z0-9-]{{1,23}}$", _0)]
    InvalidResourceGroupName(String),

    #[fail(display = "storage account name '{}' must match ^[a-z0-9]{{3,24}}$", _0)]
    InvalidStorageAccountName(String),

    #[fail(display = "cluster name '{}' is duplicated", _0)]
    DuplicateClusterName(String),

    #[fail(display = "exactly one cluster must have apiHost = true (found {})", _0)]
    ApiHostCount(usize),

    #[fail(display = "node pool '{}' has minCount {} > maxCount {}", _0, _1, _2)]
    NodePoolCountRange(String, u32, u32),

    #[fail(display = "storage SKU '{}' is not one of the allowed SKUs", _0)]
    InvalidStorageSku(String),

    #[fail(display = "domain name '{}' does not match the expected <name>.{}.cloudapp.azure.com form", _0, _1)]
    InvalidDomainName(String, String),

    #[fail(display = "database computeTier '{}' is not an allowed PostgreSQL SKU tier", _0)]
    InvalidComputeTier(String),

    #[fail(display = "backupRetentionDays must be >= 0, got {}", _0)]
    NegativeBackupRetention(i64),

    #[fail(display = "exactly one of cloud/docker targets must be configured")]
    AmbiguousTarget,

    #[fail(display = "{} must be a non-empty string", _0)]
    MissingField(String),

    #[fail(display = "{} must be an absolute URI, got '{}'", _0, _1)]
    NotAbsoluteUri(String, String),

    #[fail(display = "unknown YAML field(s) encountered while parsing configuration: {}", _0)]
    StrictParseFailure(String),
}

impl Fail for ConfigError {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }
    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}
impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}
impl From<ConfigErrorKind> for ConfigError {
    fn from(kind: ConfigErrorKind) -> ConfigError {
        ConfigError { inner: Context::new(kind) }
    }
}
impl From<Context<ConfigErrorKind>> for ConfigError {
    fn from(inner: Context<ConfigErrorKind>) -> ConfigError {
        ConfigError { inner }
    }
}

pub type Result<T> = std::result::Result<T, failure::Error>;
