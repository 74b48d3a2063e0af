use std::sync::{Arc, Mutex};

use clap::Parser;
use copydesk_core::config::CopydeskConfig;
use copydesk_core::CopydeskError;
use copydesk_library::LibraryStore;
use copydesk_providers::{
    ContentGenerator, ImageGenerator, OpenAiGenerator, OpenAiImageGenerator, Publisher,
    RelayPublisher, UnconfiguredGenerator, UnconfiguredImageGenerator, UnconfiguredPublisher,
};
use copydesk_scheduler::{Scheduler, TaskExecutor, TaskStore};
use copydesk_workflow::{StageTable, WorkflowOrchestrator};
use tracing::{error, info, warn};

/// Content pipeline daemon: runs scheduled generate and publish jobs.
#[derive(Debug, Parser)]
#[command(name = "copydesk", version)]
struct Cli {
    /// Config file (defaults to ~/.copydesk/copydesk.toml).
    #[arg(long, env = "COPYDESK_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "copydesk=info,copydesk_scheduler=info,copydesk_workflow=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = CopydeskConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        CopydeskConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let conn = rusqlite::Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    copydesk_library::db::init_db(&conn)?;
    copydesk_workflow::db::init_db(&conn)?;
    copydesk_scheduler::db::init_db(&conn)?;
    info!("database migrations complete");
    let db = Arc::new(Mutex::new(conn));

    let (generator, images) = build_generators(&config);
    let publisher = build_publisher(&config)?;

    let orchestrator =
        WorkflowOrchestrator::new(db.clone(), StageTable::new(generator, images), publisher.clone());
    let tasks = TaskStore::new(db.clone());
    let executor = TaskExecutor::new(tasks.clone(), LibraryStore::new(db), orchestrator, publisher);
    let scheduler = Scheduler::new(tasks, Arc::new(executor), &config.scheduler)?;

    if let Err(e) = scheduler.start().await {
        let e = CopydeskError::from(e);
        error!(code = e.code(), "scheduler failed to start: {e}");
        return Err(e.into());
    }
    let status = scheduler.status()?;
    info!(active_tasks = status.active_task_count, "copydesk running");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    scheduler.stop().await;
    info!("copydesk stopped");
    Ok(())
}

fn build_generators(config: &CopydeskConfig) -> (Arc<dyn ContentGenerator>, Arc<dyn ImageGenerator>) {
    let generator: Arc<dyn ContentGenerator> = match &config.providers.generation {
        Some(generation) => {
            info!(model = %generation.model, "content generator configured");
            Arc::new(OpenAiGenerator::new(
                generation.clone(),
                config.providers.optimization.clone(),
            ))
        }
        None => {
            warn!("no generation provider configured; content runs will fail");
            Arc::new(UnconfiguredGenerator)
        }
    };
    let images: Arc<dyn ImageGenerator> = match &config.providers.image {
        Some(image) => Arc::new(OpenAiImageGenerator::new(image.clone())),
        None => Arc::new(UnconfiguredImageGenerator),
    };
    (generator, images)
}

fn build_publisher(config: &CopydeskConfig) -> anyhow::Result<Arc<dyn Publisher>> {
    Ok(match &config.publisher {
        Some(relay) => {
            info!(endpoint = %relay.endpoint, "publish relay configured");
            Arc::new(RelayPublisher::new(relay.clone())?)
        }
        None => {
            warn!("no publisher configured; publish jobs will fail");
            Arc::new(UnconfiguredPublisher)
        }
    })
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_reads_config_flag() {
        let cli = Cli::parse_from(["copydesk", "--config", "/tmp/c.toml"]);
        assert_eq!(cli.config.as_deref(), Some("/tmp/c.toml"));
    }

    #[test]
    fn defaults_build_unconfigured_collaborators() {
        let config = CopydeskConfig::default();
        let (_generator, _images) = build_generators(&config);
        assert!(build_publisher(&config).is_ok());
    }
}
