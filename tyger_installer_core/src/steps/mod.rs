/// The step library (C7): one reconciliation contract per provisioned
/// resource kind, each a thin function over `RunContext` and the
/// `CloudProvider`/`K8sClient`/`HelmEngine` facades. Orchestrators
/// (`install`/`uninstall`) compose these with the Promise Engine;
/// individual steps stay synchronous-looking `async fn`s so they are
/// directly unit-testable against the Fake* facades.
pub mod cluster;
pub mod database;
pub mod federated_credential;
pub mod helm_charts;
pub mod identity;
pub mod namespace_rbac;
pub mod resource_group;
pub mod storage;
