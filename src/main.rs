use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use costmend::config::AppConfig;
use costmend::model::{CostAnomaly, TenantContext, WorkflowState};
use costmend::server::{create_router, AppState};
use costmend::shutdown::{graceful_shutdown, wait_for_shutdown};
use costmend::workflow::{ApprovalDecision, RunStatus};

#[derive(Parser)]
#[command(name = "costmend", about = "Cloud-cost anomaly remediation workflow service")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service
    Serve,
    /// Drive a single synthetic anomaly through the workflow and print the
    /// final state
    Run {
        /// Fixtures directory for the stub evidence providers
        #[arg(long, default_value = "fixtures")]
        fixtures: String,
        #[arg(long, default_value = "tenant-001")]
        tenant: String,
        #[arg(long, default_value = "123456789012")]
        account: String,
        #[arg(long, default_value = "EC2")]
        service: String,
        /// Daily cost delta in dollars
        #[arg(long, default_value_t = 750.0)]
        delta: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Run {
            fixtures,
            tenant,
            account,
            service,
            delta,
        } => run_once(config, fixtures, tenant, account, service, delta).await,
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        "Starting costmend server"
    );

    let state = Arc::new(AppState::new(config.clone())?);

    // Resolve approvals nobody answered within the configured window
    let sweep_state = Arc::clone(&state);
    tokio::spawn(async move {
        run_timeout_sweeper(sweep_state).await;
    });

    let app = create_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        config.server.host, config.server.port
    ))
    .await?;

    tracing::info!("Listening on {}", listener.local_addr()?);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    // Perform graceful shutdown cleanup
    graceful_shutdown(&state).await;

    Ok(())
}

async fn run_timeout_sweeper(state: Arc<AppState>) {
    let interval = std::time::Duration::from_secs(state.config.approval.sweep_interval_secs);
    let timeout = chrono::Duration::seconds(state.config.approval.timeout_secs as i64);

    loop {
        tokio::time::sleep(interval).await;
        match state.engine.expire_timed_out(timeout).await {
            Ok(expired) if !expired.is_empty() => {
                tracing::info!(count = expired.len(), "Expired stale approval requests");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "Approval timeout sweep failed");
            }
        }
    }
}

async fn run_once(
    mut config: AppConfig,
    fixtures: String,
    tenant: String,
    account: String,
    service: String,
    delta: f64,
) -> anyhow::Result<()> {
    use costmend::workflow::InMemoryRunStore;

    config.providers.fixtures_dir = fixtures.into();
    // one-shot runs keep no durable state behind
    let store = Arc::new(InMemoryRunStore::new());
    let engine = AppState::build_engine(&config, store)?;

    let expected_daily_cost = 2400.0;
    let anomaly = CostAnomaly {
        service,
        account_id: account,
        region: "us-east-1".to_string(),
        team: "platform".to_string(),
        expected_daily_cost,
        actual_daily_cost: expected_daily_cost + delta,
        delta_dollars: delta,
        delta_percent: (delta / expected_daily_cost) * 100.0,
        z_score: 3.2,
        ..CostAnomaly::default()
    };

    let state = WorkflowState::new(TenantContext::new(tenant), Some(anomaly));
    let workflow_id = state.workflow_id.clone();

    let mut outcome = engine.start(state).await?;

    // no human at the keyboard here: deny anything that needs approval
    if outcome.status == RunStatus::Suspended {
        tracing::info!(workflow_id = %workflow_id, "Gate requires approval; auto-denying in one-shot mode");
        outcome = engine
            .resume(
                &workflow_id,
                ApprovalDecision {
                    approve: false,
                    by: "cli".to_string(),
                },
            )
            .await?;
    }

    println!("{}", serde_json::to_string_pretty(&outcome.state)?);
    Ok(())
}
