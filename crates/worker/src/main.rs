//! ticketdesk-worker: background job worker for the helpdesk.
//!
//! `run` (the default) polls the job queue until Ctrl-C. The other
//! subcommands are operator tools over the same database.

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use ticketdesk_core::{JobId, TicketId};
use ticketdesk_infra::AppConfig;
use ticketdesk_worker::{Services, build_processor, results_view, source_repository};

// ── CLI ─────────────────────────────────────────────────────────────

/// Background job worker: ticket validation and code analysis.
#[derive(Parser, Debug)]
#[command(name = "ticketdesk-worker", version, about)]
struct Cli {
    /// Database URL (postgres://… or sqlite:…).
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the dispatch loop until Ctrl-C.
    Run,
    /// Enqueue a job for a ticket.
    Enqueue {
        /// Job type tag, e.g. VALIDATE_TICKET or ANALYZE_CODE.
        #[arg(long)]
        job_type: String,
        #[arg(long)]
        ticket_id: TicketId,
    },
    /// Print a job row as JSON.
    Job { id: JobId },
    /// Print the stored results for a ticket as JSON.
    Results { ticket_id: TicketId },
    /// Print job counts per status.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    ticketdesk_observability::init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("invalid configuration")?;
    let services = Services::connect(&cli.database_url)
        .await
        .context("connecting to database")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(services, config).await,
        Command::Enqueue { job_type, ticket_id } => {
            let id = services
                .queue
                .enqueue_tagged(&job_type, &serde_json::json!({ "ticketId": ticket_id.get() }))
                .await?;
            println!("{}", serde_json::json!({ "job_id": id }));
            Ok(())
        }
        Command::Job { id } => {
            let job = services.jobs.get(id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
            Ok(())
        }
        Command::Results { ticket_id } => {
            let validation = services.results.latest_validation(ticket_id).await?;
            let analysis = services.results.latest_analysis(ticket_id).await?;
            let repository = source_repository(&config)?;
            let view = results_view(ticket_id, validation, analysis, repository.as_deref());
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(())
        }
        Command::Stats => {
            let stats = services.jobs.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
    }
}

async fn run(services: Services, config: AppConfig) -> anyhow::Result<()> {
    config.log_summary();

    let processor = build_processor(&services, &config)?;
    processor.start();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown requested; waiting for the current job to finish");

    processor.shutdown().await;
    info!(stats = ?processor.dispatcher().stats(), "worker stopped");
    Ok(())
}
