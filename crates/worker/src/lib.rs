//! Composition root for the ticketdesk job worker.
//!
//! Builds the stores for the configured database, the AI collaborators from
//! the environment, and the job processor that owns the dispatch loop.

use std::sync::Arc;

use anyhow::Context;
use serde_json::{Value, json};
use tracing::{info, warn};

use ticketdesk_ai::{CodeSearcher, ReasoningService, SourceRepository, TicketValidator};
use ticketdesk_core::TicketId;
use ticketdesk_infra::config::SourceRepoConfig;
use ticketdesk_infra::external::{AnthropicClient, BitbucketRepository, GitHubRepository};
use ticketdesk_infra::handlers::{AnalyzeCodeHandler, ValidateTicketHandler};
use ticketdesk_infra::jobs::{
    Dispatcher, DispatcherConfig, HandlerRegistry, JobProcessor, JobQueue, JobStore, JobType,
    PostgresJobStore, SqliteJobStore,
};
use ticketdesk_infra::results::{
    PostgresResultStore, ResultStore, SqliteResultStore, StoredAnalysis, StoredValidation,
};
use ticketdesk_infra::tickets::{PostgresTicketReader, SqliteTicketStore, TicketReader};
use ticketdesk_infra::{AppConfig, Database};

/// Stores backed by one database.
#[derive(Clone)]
pub struct Services {
    pub database: Database,
    pub jobs: Arc<dyn JobStore>,
    pub queue: JobQueue,
    pub tickets: Arc<dyn TicketReader>,
    pub results: Arc<dyn ResultStore>,
}

impl Services {
    /// Connect, create the schema if needed and build the stores.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let database = Database::connect(database_url).await?;
        database.ensure_schema().await?;

        let (jobs, tickets, results): (
            Arc<dyn JobStore>,
            Arc<dyn TicketReader>,
            Arc<dyn ResultStore>,
        ) = match &database {
            Database::Postgres(pool) => (
                Arc::new(PostgresJobStore::new(pool.clone())),
                Arc::new(PostgresTicketReader::new(pool.clone())),
                Arc::new(PostgresResultStore::new(pool.clone())),
            ),
            Database::Sqlite(pool) => (
                Arc::new(SqliteJobStore::new(pool.clone())),
                Arc::new(SqliteTicketStore::new(pool.clone())),
                Arc::new(SqliteResultStore::new(pool.clone())),
            ),
        };

        Ok(Self {
            queue: JobQueue::new(jobs.clone()),
            database,
            jobs,
            tickets,
            results,
        })
    }
}

/// Reasoning client, if an API key is configured.
pub fn reasoning_service(config: &AppConfig) -> anyhow::Result<Option<Arc<dyn ReasoningService>>> {
    let Some(anthropic) = &config.anthropic else {
        return Ok(None);
    };
    let client = AnthropicClient::new(&anthropic.api_key, &anthropic.model)
        .context("building reasoning client")?
        .with_base_url(&anthropic.base_url);
    Ok(Some(Arc::new(client)))
}

/// Source repository client, if one is configured.
pub fn source_repository(config: &AppConfig) -> anyhow::Result<Option<Arc<dyn SourceRepository>>> {
    let repository: Arc<dyn SourceRepository> = match &config.source_repo {
        None => return Ok(None),
        Some(SourceRepoConfig::GitHub { token, owner, repo }) => Arc::new(
            GitHubRepository::new(token, owner, repo).context("building GitHub client")?,
        ),
        Some(SourceRepoConfig::Bitbucket {
            token,
            workspace,
            repo,
        }) => Arc::new(
            BitbucketRepository::new(token, workspace, repo)
                .context("building Bitbucket client")?,
        ),
    };
    Ok(Some(repository))
}

/// Register the job handlers this process can run.
///
/// `ANALYZE_CODE` needs a source repository; without one it is left
/// unregistered and such jobs fail with "no handler".
pub fn build_registry(services: &Services, config: &AppConfig) -> anyhow::Result<HandlerRegistry> {
    let reasoning = reasoning_service(config)?;
    let mut registry = HandlerRegistry::new();

    registry.register(
        JobType::ValidateTicket,
        ValidateTicketHandler::new(
            services.tickets.clone(),
            services.results.clone(),
            TicketValidator::new(reasoning.clone()),
        ),
    );

    match source_repository(config)? {
        Some(repository) => {
            let searcher =
                CodeSearcher::new(repository, reasoning).with_limits(config.search_limits);
            registry.register(
                JobType::AnalyzeCode,
                AnalyzeCodeHandler::new(
                    services.tickets.clone(),
                    services.results.clone(),
                    searcher,
                ),
            );
        }
        None => warn!("no source repository configured; ANALYZE_CODE jobs will fail"),
    }

    Ok(registry)
}

/// Build the lifecycle guard around a dispatcher for `services`.
pub fn build_processor(services: &Services, config: &AppConfig) -> anyhow::Result<JobProcessor> {
    let registry = build_registry(services, config)?;
    let dispatcher = Dispatcher::new(services.jobs.clone(), registry).with_config(
        DispatcherConfig::default()
            .with_name("ticketdesk-worker")
            .with_poll_interval(config.poll_interval)
            .with_handler_timeout(config.handler_timeout),
    );
    info!(backend = services.database.backend(), "job processor built");
    Ok(JobProcessor::new(dispatcher))
}

/// JSON view of a ticket's stored results. Absent results are `null`.
pub fn results_view(
    ticket_id: TicketId,
    validation: Option<StoredValidation>,
    analysis: Option<StoredAnalysis>,
    repository: Option<&dyn SourceRepository>,
) -> Value {
    let analysis = analysis.map(|a| {
        let locations: Vec<Value> = a
            .locations
            .iter()
            .map(|l| {
                json!({
                    "file_path": l.file_path,
                    "start_line": l.start_line,
                    "end_line": l.end_line,
                    "explanation": l.explanation,
                    "url": repository
                        .and_then(|r| r.file_url(&l.file_path, l.start_line, l.end_line)),
                })
            })
            .collect();
        json!({ "locations": locations, "created_at": a.created_at })
    });

    json!({
        "ticket_id": ticket_id,
        "validation": validation,
        "analysis": analysis,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use ticketdesk_ai::CodeLocation;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<&str, &str> = vars.iter().copied().collect();
        AppConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap()
    }

    #[tokio::test]
    async fn analysis_needs_a_repository() {
        let services = Services::connect("sqlite::memory:").await.unwrap();

        let registry = build_registry(&services, &config(&[])).unwrap();
        assert_eq!(registry.job_types(), vec![JobType::ValidateTicket]);

        let registry = build_registry(
            &services,
            &config(&[
                ("GITHUB_TOKEN", "t"),
                ("GITHUB_OWNER", "acme"),
                ("GITHUB_REPO", "desk"),
            ]),
        )
        .unwrap();
        assert_eq!(
            registry.job_types(),
            vec![JobType::AnalyzeCode, JobType::ValidateTicket]
        );
    }

    #[tokio::test]
    async fn enqueue_through_services_then_process() {
        let services = Services::connect("sqlite::memory:").await.unwrap();
        let processor =
            build_processor(&services, &config(&[("JOB_POLL_INTERVAL_MS", "10")])).unwrap();

        let id = services.queue.validate_ticket(TicketId::new(5)).await.unwrap();
        processor.dispatcher().run_once().await.unwrap();

        // Ticket 5 does not exist in the empty tickets table.
        let job = services.jobs.get(id).await.unwrap().unwrap();
        assert_eq!(job.error_message.as_deref(), Some("ticket 5 not found"));
    }

    #[tokio::test]
    async fn results_view_distinguishes_absent_from_empty() {
        let services = Services::connect("sqlite::memory:").await.unwrap();
        let ticket = TicketId::new(9);

        let view = results_view(ticket, None, None, None);
        assert!(view["validation"].is_null());
        assert!(view["analysis"].is_null());

        services.results.upsert_analysis(ticket, &[]).await.unwrap();
        let analysis = services.results.latest_analysis(ticket).await.unwrap();
        let view = results_view(ticket, None, analysis, None);
        assert_eq!(view["analysis"]["locations"], json!([]));

        let location = CodeLocation {
            file_path: "src/app.rs".into(),
            start_line: 4,
            end_line: 8,
            explanation: "entry point".into(),
        };
        services
            .results
            .upsert_analysis(ticket, std::slice::from_ref(&location))
            .await
            .unwrap();
        let repository = GitHubRepository::new("t", "acme", "desk").unwrap();
        let analysis = services.results.latest_analysis(ticket).await.unwrap();
        let view = results_view(ticket, None, analysis, Some(&repository));
        assert_eq!(
            view["analysis"]["locations"][0]["url"],
            "https://github.com/acme/desk/blob/HEAD/src/app.rs#L4-L8"
        );
    }
}
