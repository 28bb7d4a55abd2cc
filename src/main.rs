//! idcache
//!
//! Resynchronizes the relational cache of the organization directory and
//! answers delegation checks.

use clap::{Parser, Subcommand};
use idcache::{
    access_control::{Capability, DelegateType, normalize_path},
    cache::{CacheReconciler, CacheRepository, connect},
    config::{AppConfig, LogFormat, load_config},
    error::ConfigError,
    mirror::IncrementalMirror,
    scope::ScopeRegistry,
    service::DirectoryService,
    source::{DirectorySource, JsonDirectory, StaticProjectGroups},
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Directory cache - relational mirror and delegated write authority
#[derive(Parser, Debug)]
#[command(name = "idcache")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "IDCACHE_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error), overrides the configuration
    #[arg(long, env = "IDCACHE_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Make the cache match the directory snapshot
    Reset {
        /// JSON snapshot, overrides `directory.snapshot`
        #[arg(long)]
        snapshot: Option<String>,
    },
    /// Print whether a principal may change a resource
    Check {
        /// User login, group or company identifier
        #[arg(long)]
        principal: String,

        /// Path of the resource
        #[arg(long)]
        path: String,

        /// Resource kind (company, group, tree, user)
        #[arg(long, value_parser = parse_kind)]
        kind: DelegateType,

        /// Require an administration grant instead of a write grant
        #[arg(long)]
        admin: bool,
    },
}

fn parse_kind(s: &str) -> Result<DelegateType, String> {
    DelegateType::try_parse(s).ok_or_else(|| format!("unknown resource kind '{}'", s))
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init(),
    }
}

fn snapshot_source(config: &AppConfig, overridden: Option<String>) -> Result<JsonDirectory, ConfigError> {
    overridden
        .or_else(|| config.directory.snapshot.clone())
        .map(|path| JsonDirectory::new(shellexpand::tilde(&path).into_owned()))
        .ok_or_else(|| ConfigError::Missing {
            field: "directory.snapshot".to_string(),
        })
}

async fn reset(config: &AppConfig, snapshot: Option<String>) -> anyhow::Result<()> {
    let source = snapshot_source(config, snapshot)?;
    let pool = connect(&config.database)
        .await
        .inspect_err(|e| error!(error = %e, "Failed to open the cache"))?;

    let snapshot = source
        .snapshot()
        .await
        .inspect_err(|e| error!(error = %e, "Failed to read the directory snapshot"))?;

    let reconciler = CacheReconciler::new(
        pool,
        Arc::new(StaticProjectGroups::from(config)),
        config.database.delete_batch_size,
    );
    let stats = reconciler
        .reset(&snapshot)
        .await
        .inspect_err(|e| error!(error = %e, "Reconciliation failed"))?;

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn check(
    config: &AppConfig,
    principal: &str,
    path: &str,
    kind: DelegateType,
    admin: bool,
) -> anyhow::Result<()> {
    let pool = connect(&config.database)
        .await
        .inspect_err(|e| error!(error = %e, "Failed to open the cache"))?;

    let mirror = Arc::new(IncrementalMirror::new(CacheRepository::new(pool)));
    if let Ok(source) = snapshot_source(config, None) {
        mirror.refresh(&source).await?;
    }
    let service = DirectoryService::new(mirror, ScopeRegistry::new(config.container_scopes()))
        .with_admins(config.system_admins());

    let authorizer = service.authorizer_for(principal).await?;
    let capability = if admin {
        Capability::Admin
    } else {
        Capability::Write
    };
    let decision = authorizer.check(&normalize_path(path), kind, capability);
    println!("{}", decision);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = load_config(args.config.as_deref())?;
    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level, config.logging.format);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting idcache");

    match args.command {
        Command::Reset { snapshot } => reset(&config, snapshot).await,
        Command::Check {
            principal,
            path,
            kind,
            admin,
        } => check(&config, &principal, &path, kind, admin).await,
    }
}
