//! Install/uninstall orchestration for the Tyger research-compute
//! service: a promise-graph DAG over a cloud-resource facade
//! (`cloud`), a Kubernetes facade (`k8s`), and a Helm facade (`helm`),
//! plus the narrower single-host Docker variant (`docker`). The CLI
//! binary is a thin wrapper over the entry points re-exported here.

pub mod buildinfo;
pub mod cloud;
pub mod context;
pub mod docker;
pub mod health;
pub mod helm;
pub mod install;
pub mod k8s;
pub mod migration;
pub mod preflight;
pub mod promise;
pub mod steps;
pub mod telemetry;
pub mod uninstall;

pub use buildinfo::BuildInfo;
pub use context::RunContext;
pub use telemetry::{OrchestratorError, OrchestratorErrorKind};
