use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use aiops_config::{default_state_dir, Settings};
use aiops_executors::{ApiExecutor, SshExecutor, WinrmExecutor};
use aiops_llm::{LlmAnalyzer, NullAnalyzer, OpenAiCompatibleAnalyzer};
use aiops_observability::{canonical_logs_dir_from_root, init_process_logging, ProcessKind};
use aiops_orchestrator::ExecutorSet;
use aiops_persistence::Store;

#[derive(Parser, Debug)]
#[command(name = "aiops-engine")]
#[command(about = "Headless AIOps remediation engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
    #[arg(long, env = "AIOPS_CONFIG", default_value = "aiops.toml")]
    config: PathBuf,
    #[arg(long, env = "AIOPS_STATE_DIR")]
    state_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs the HTTP server, worker pool, and scheduler until interrupted.
    Serve,
    /// Applies pending SQLite migrations and exits.
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let state_dir = cli.state_dir.unwrap_or_else(default_state_dir);
    let logs_dir = canonical_logs_dir_from_root(&state_dir);

    let settings = Settings::load(&cli.config).await?;
    let _log_guard = init_process_logging(ProcessKind::Engine, &logs_dir, settings.log_retention_days)
        .context("initializing structured logging")?;

    match cli.command {
        Command::Serve => serve(settings).await,
        Command::Migrate => migrate(settings).await,
    }
}

async fn migrate(settings: Settings) -> anyhow::Result<()> {
    let store = Store::connect(&settings.database_url).await?;
    store.migrate().await?;
    info!("migrations applied");
    Ok(())
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    let store = Store::connect(&settings.database_url).await?;
    store.migrate().await?;

    let executors = build_executor_set(&settings)?;
    let analyzer = build_analyzer(&settings);

    let addr: SocketAddr = settings.bind_addr.parse().context("invalid AIOPS_BIND_ADDR")?;
    let (state, queue_receiver, audit_receiver) = aiops_server::build_state(store, settings, executors, analyzer);

    info!("starting aiops-engine on http://{addr}");
    aiops_server::serve(addr, state, queue_receiver, audit_receiver).await
}

/// Wires the three step drivers (spec.md §4.7). The SSH driver needs a
/// secret resolver closure so it never holds a decrypted credential longer
/// than the single connection attempt that used it.
fn build_executor_set(settings: &Settings) -> anyhow::Result<ExecutorSet> {
    let master_key = settings.resolve_master_key()?;
    let resolver = Arc::new(move |server: &aiops_persistence::models::ServerCredential| {
        aiops_persistence::secrets::decrypt(&master_key, &server.secret_material_encrypted)
            .unwrap_or_else(|err| {
                tracing::error!(server_id = %server.id, error = %err, "failed to decrypt server credential");
                String::new()
            })
    });

    Ok(ExecutorSet {
        ssh: Arc::new(SshExecutor::new(resolver)),
        winrm: Arc::new(WinrmExecutor::new(true)),
        api: Arc::new(ApiExecutor::new(true)),
    })
}

fn build_analyzer(settings: &Settings) -> Arc<dyn LlmAnalyzer> {
    match &settings.llm_base_url {
        Some(base_url) => {
            let api_key = std::env::var(&settings.llm_api_key_env).ok();
            Arc::new(OpenAiCompatibleAnalyzer::new(
                base_url.clone(),
                api_key,
                settings.llm_model.clone(),
                Duration::from_secs(settings.llm_timeout_seconds),
            ))
        }
        None => Arc::new(NullAnalyzer),
    }
}
