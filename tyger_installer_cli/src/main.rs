//! CLI front-end for the Tyger installer. Everything here is outside
//! the core — logging setup and terminal colouring stay out of
//! `tyger_installer_core` as a deliberate collaborator boundary — this
//! binary just parses arguments, reads the environment config, and
//! hands off to `tyger_installer_core`.
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;

use tyger_installer_core::telemetry::ALREADY_LOGGED_ERROR;
use tyger_installer_core::{install, migration, uninstall, BuildInfo, RunContext};
use tyger_installer_definitions::validate;
use tyger_installer_definitions::EnvironmentConfig;

#[cfg(not(feature = "live"))]
use tyger_installer_core::cloud::FakeCloud;
#[cfg(not(feature = "live"))]
use tyger_installer_core::helm::FakeHelm;
#[cfg(not(feature = "live"))]
use tyger_installer_core::steps::database::FakePostgresAdmin;

#[cfg(feature = "live")]
use tyger_installer_core::cloud::LiveCloud;
#[cfg(feature = "live")]
use tyger_installer_core::helm::LiveHelm;
#[cfg(feature = "live")]
use tyger_installer_core::steps::database::LivePostgresAdmin;

#[derive(Parser)]
#[command(name = "tyger-installer", about = "Install/uninstall orchestrator for the Tyger research-compute service")]
struct Cli {
    /// Path to the environment configuration YAML file.
    #[arg(long, short = 'f')]
    config: PathBuf,

    /// Path to a kubeconfig granting admin access, used for Helm chart
    /// installs once a cluster exists. Defaults to $KUBECONFIG, then
    /// ~/.kube/config, matching `helm`/`kubectl` themselves.
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bring the environment up to its desired state.
    Install,
    /// Tear the environment down.
    Uninstall,
    /// List database migration versions.
    MigrationListVersions {
        /// Include already-applied migrations, not just pending ones.
        #[arg(long)]
        all: bool,
    },
    /// Apply pending database migrations.
    MigrationApply {
        /// Migration id to stop at (applies everything up to and including it).
        #[arg(long)]
        target: Option<String>,
        /// Apply every pending migration.
        #[arg(long)]
        latest: bool,
        /// Block until the migration pods complete.
        #[arg(long)]
        wait: bool,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let rt = tokio::runtime::Runtime::new().expect("failed to start the tokio runtime");
    match rt.block_on(run()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&e);
            ExitCode::FAILURE
        }
    }
}

/// Errors whose message contains a newline go to stderr in red with an
/// "Error:" prefix; single-line errors already went through the
/// structured logger by the time they reach here, except
/// `already-logged-error`, which must never print a second message.
fn print_error(err: &failure::Error) {
    let message = err.to_string();
    if message == ALREADY_LOGGED_ERROR {
        return;
    }
    if message.contains('\n') {
        eprintln!("{} {}", "Error:".red().bold(), message);
    } else {
        log::error!("{}", message);
    }
}

async fn run() -> Result<(), failure::Error> {
    let cli = Cli::parse();

    let raw = std::fs::read_to_string(&cli.config).map_err(|e| failure::format_err!("reading {}: {}", cli.config.display(), e))?;
    let mut config: EnvironmentConfig = serde_yaml::from_str(&raw).map_err(|e| failure::format_err!("parsing {}: {}", cli.config.display(), e))?;

    if !validate::validate(&mut config) {
        failure::bail!("configuration in {} failed validation; see logged errors above", cli.config.display());
    }
    config.verify()?;

    match &cli.command {
        Command::Install => {
            if let Some(docker_config) = config.docker.clone() {
                let docker = build_docker_engine();
                return install_docker(&docker_config, &docker).await;
            }
            let ctx = build_cloud_context(&config, kubeconfig_path(&cli)?);
            let admin = build_postgres_admin();
            install::run(&ctx, admin).await
        }
        Command::Uninstall => {
            if config.docker.is_some() {
                failure::bail!("uninstall is not implemented for the Docker variant; remove the containers directly");
            }
            let ctx = build_cloud_context(&config, kubeconfig_path(&cli)?);
            uninstall::run(&ctx).await
        }
        Command::MigrationListVersions { all } => {
            let ctx = build_cloud_context(&config, kubeconfig_path(&cli)?);
            let versions = migration::list_versions(&ctx, *all).await?;
            for v in versions {
                println!("{}\t{}\t{}", v.id, v.description, v.state);
            }
            Ok(())
        }
        Command::MigrationApply { target, latest, wait } => {
            let ctx = build_cloud_context(&config, kubeconfig_path(&cli)?);
            migration::apply_migrations(&ctx, target.as_deref(), *latest, *wait).await
        }
    }
}

fn kubeconfig_path(cli: &Cli) -> Result<Option<PathBuf>, failure::Error> {
    if let Some(path) = &cli.kubeconfig {
        return Ok(Some(path.clone()));
    }
    if let Ok(path) = std::env::var("KUBECONFIG") {
        return Ok(Some(PathBuf::from(path)));
    }
    Ok(dirs_home().map(|home| home.join(".kube").join("config")))
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(feature = "live")]
fn build_cloud_context(config: &EnvironmentConfig, kubeconfig: Option<PathBuf>) -> RunContext {
    let subscription_id = config.cloud.as_ref().map(|c| c.subscription_id.clone()).unwrap_or_default();
    let cloud = Arc::new(LiveCloud::new(subscription_id).expect("failed to build Azure credential chain"));
    let kubeconfig_path = kubeconfig.map(|p| p.display().to_string()).unwrap_or_default();
    let helm = Arc::new(LiveHelm::new(kubeconfig_path));
    RunContext::new(config.clone(), BuildInfo::release(), cloud, helm)
}

#[cfg(not(feature = "live"))]
fn build_cloud_context(config: &EnvironmentConfig, _kubeconfig: Option<PathBuf>) -> RunContext {
    log::warn!("built without --features live: running against an in-memory demo backend, no real Azure/Kubernetes calls will be made");
    RunContext::new(config.clone(), BuildInfo::release(), Arc::new(FakeCloud::new()), Arc::new(FakeHelm::new()))
}

#[cfg(feature = "live")]
fn build_postgres_admin() -> Arc<dyn tyger_installer_core::steps::database::PostgresAdmin> {
    Arc::new(LivePostgresAdmin)
}

#[cfg(not(feature = "live"))]
fn build_postgres_admin() -> Arc<dyn tyger_installer_core::steps::database::PostgresAdmin> {
    Arc::new(FakePostgresAdmin::default())
}

#[cfg(feature = "live")]
fn build_docker_engine() -> Arc<dyn tyger_installer_core::docker::DockerEngine> {
    Arc::new(tyger_installer_core::docker::LiveDocker::new())
}

#[cfg(not(feature = "live"))]
fn build_docker_engine() -> Arc<dyn tyger_installer_core::docker::DockerEngine> {
    log::warn!("built without --features live: running the Docker variant against an in-memory demo backend");
    Arc::new(tyger_installer_core::docker::FakeDocker::new())
}

async fn install_docker(config: &tyger_installer_definitions::config::DockerConfig, docker: &dyn tyger_installer_core::docker::DockerEngine) -> Result<(), failure::Error> {
    tyger_installer_core::docker::run(config, &BuildInfo::release(), docker).await
}
