#![allow(clippy::too_many_arguments)]

#[macro_use]
extern crate failure;

pub use failure::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Root configuration model and its cloud/API substructures.
pub mod config;
pub use config::{ApiConfig, AuthConfig, CloudConfig, DockerConfig, EnvironmentConfig, HelmOverrides};

/// Cluster and node-pool configuration.
pub mod compute;
pub use compute::{ClusterConfig, ComputeConfig, NodePoolConfig};

/// Storage account configuration.
pub mod storage;
pub use storage::{StorageAccountConfig, StorageConfig};

/// PostgreSQL flexible server configuration.
pub mod database;
pub use database::DatabaseConfig;

/// The polymorphic management-principal -> Kubernetes-subject mapping.
pub mod principal;
pub use principal::{K8sSubject, K8sSubjectKind, ManagementPrincipal, PrincipalKind};

/// Tag keys and helpers enforcing resource-tagging invariants.
pub mod tags;

/// The quick (syntactic) validator (C1).
pub mod validate;
pub use validate::validate;

/// Error kinds for the config layer.
pub mod error;

/// A renderer of embedded `tera` configuration templates.
pub mod template;
