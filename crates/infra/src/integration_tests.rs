//! Integration tests for the full job pipeline.
//!
//! Tests: Enqueue → JobStore → Dispatcher → Handler → ResultStore
//!
//! Verifies:
//! - Jobs run oldest first and end in exactly one terminal state
//! - Handler failures are recorded and never stop the loop
//! - The lifecycle guard spawns one loop no matter how often it is started
//! - Queued jobs survive a restart of the SQLite-backed worker

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use anyhow::bail;
    use tokio_util::sync::CancellationToken;

    use ticketdesk_ai::{CodeSearcher, TicketValidator};
    use ticketdesk_core::{Ticket, TicketId};

    use crate::db::Database;
    use crate::handlers::testing::{StubReasoning, StubRepository};
    use crate::handlers::{AnalyzeCodeHandler, TicketPayload, ValidateTicketHandler};
    use crate::jobs::{
        Dispatcher, DispatcherConfig, HandlerRegistry, InMemoryJobStore, JobProcessor, JobQueue,
        JobStatus, JobStore, JobType, SqliteJobStore,
    };
    use crate::results::{InMemoryResultStore, ResultStore, SqliteResultStore};
    use crate::tickets::{InMemoryTicketStore, SqliteTicketStore, TicketReader};

    struct Pipeline {
        store: Arc<dyn JobStore>,
        queue: JobQueue,
        dispatcher: Dispatcher,
        results: Arc<dyn ResultStore>,
    }

    fn fast() -> DispatcherConfig {
        DispatcherConfig::default()
            .with_name("integration")
            .with_poll_interval(Duration::from_millis(10))
    }

    fn tickets() -> Arc<InMemoryTicketStore> {
        let tickets = Arc::new(InMemoryTicketStore::new());
        for (id, module) in [(1, "auth"), (2, "billing"), (7, "reports"), (42, "billing")] {
            tickets.insert(Ticket::new(
                TicketId::new(id),
                format!("Ticket number {id}"),
                format!("Something in the {module} module misbehaves for customers"),
                "Works for every customer",
                module,
            ));
        }
        tickets
    }

    fn in_memory_pipeline(
        reasoning: Option<Arc<StubReasoning>>,
        repository: StubRepository,
    ) -> Pipeline {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let results: Arc<dyn ResultStore> = Arc::new(InMemoryResultStore::new());
        let tickets: Arc<dyn TicketReader> = tickets();
        let reasoning = reasoning.map(|r| r as Arc<dyn ticketdesk_ai::ReasoningService>);

        let mut registry = HandlerRegistry::new();
        registry
            .register(
                JobType::ValidateTicket,
                ValidateTicketHandler::new(
                    tickets.clone(),
                    results.clone(),
                    TicketValidator::heuristic(),
                ),
            )
            .register(
                JobType::AnalyzeCode,
                AnalyzeCodeHandler::new(
                    tickets,
                    results.clone(),
                    CodeSearcher::new(Arc::new(repository), reasoning),
                ),
            );

        Pipeline {
            queue: JobQueue::new(store.clone()),
            dispatcher: Dispatcher::new(store.clone(), registry).with_config(fast()),
            store,
            results,
        }
    }

    async fn wait_until(mut done: impl AsyncFnMut() -> bool) {
        for _ in 0..500 {
            if done().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn validate_ticket_job_stores_a_verdict() {
        let p = in_memory_pipeline(None, StubRepository::default());

        let id = p.queue.validate_ticket(TicketId::new(42)).await.unwrap();
        p.dispatcher.run_once().await.unwrap().unwrap();

        let job = p.store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert!(job.processed_at.is_some());
        assert!(job.error_message.is_none());
        assert!(p.results.latest_validation(TicketId::new(42)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn analysis_without_candidates_is_an_empty_success() {
        let reasoning = Arc::new(StubReasoning::replying("[]"));
        let p = in_memory_pipeline(Some(reasoning.clone()), StubRepository::default());

        let id = p.queue.analyze_code(TicketId::new(7)).await.unwrap();
        p.dispatcher.run_once().await.unwrap();

        assert_eq!(p.store.get(id).await.unwrap().unwrap().status, JobStatus::Done);
        let analysis = p.results.latest_analysis(TicketId::new(7)).await.unwrap().unwrap();
        assert!(analysis.locations.is_empty());
        assert_eq!(reasoning.call_count(), 0);
    }

    #[tokio::test]
    async fn handler_failure_is_recorded_and_next_job_runs() {
        let reasoning = Arc::new(StubReasoning::failing("operation timed out after 30s"));
        let repository =
            StubRepository::default().with_file("src/billing/totals.rs", "fn total() {}");
        let p = in_memory_pipeline(Some(reasoning), repository);

        let failing = p.queue.analyze_code(TicketId::new(42)).await.unwrap();
        let next = p.queue.validate_ticket(TicketId::new(1)).await.unwrap();

        p.dispatcher.run_once().await.unwrap();
        p.dispatcher.run_once().await.unwrap();

        let failed = p.store.get(failing).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        let message = failed.error_message.unwrap();
        assert!(message.contains("operation timed out after 30s"), "{message}");
        assert!(message.starts_with("analyzing code for ticket 42"), "{message}");
        assert!(failed.processed_at.is_some());
        assert!(p.results.latest_analysis(TicketId::new(42)).await.unwrap().is_none());

        assert_eq!(p.store.get(next).await.unwrap().unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn repeated_start_spawns_one_loop() {
        let p = in_memory_pipeline(None, StubRepository::default());
        let processor = Arc::new(JobProcessor::new(p.dispatcher.clone()));

        let started: Vec<bool> = (0..3).map(|_| processor.start()).collect();
        assert_eq!(started, vec![true, false, false]);
        assert_eq!(processor.loops_spawned(), 1);
        assert!(processor.is_running());

        // Concurrent starters race on the same latch.
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let processor = processor.clone();
            tasks.push(tokio::spawn(async move { processor.start() }));
        }
        for task in tasks {
            assert!(!task.await.unwrap());
        }
        assert_eq!(processor.loops_spawned(), 1);

        let id = p.queue.validate_ticket(TicketId::new(1)).await.unwrap();
        let store = p.store.clone();
        wait_until(async || store.get(id).await.unwrap().unwrap().status == JobStatus::Done).await;

        processor.shutdown().await;
        assert!(!processor.is_running());
    }

    #[tokio::test]
    async fn jobs_finish_in_enqueue_order() {
        let p = in_memory_pipeline(None, StubRepository::default());
        let first = p.queue.validate_ticket(TicketId::new(1)).await.unwrap();
        let second = p.queue.validate_ticket(TicketId::new(2)).await.unwrap();

        let cancel = CancellationToken::new();
        let run = {
            let dispatcher = p.dispatcher.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { dispatcher.run(cancel).await })
        };

        let store = p.store.clone();
        wait_until(async || store.stats().await.unwrap().done == 2).await;
        cancel.cancel();
        run.await.unwrap();

        let first = p.store.get(first).await.unwrap().unwrap();
        let second = p.store.get(second).await.unwrap().unwrap();
        assert_eq!(first.status, JobStatus::Done);
        assert_eq!(second.status, JobStatus::Done);
        assert!(first.processed_at <= second.processed_at);
    }

    #[tokio::test]
    async fn at_most_one_job_processing_per_loop() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut registry = HandlerRegistry::new();
        {
            let (store, in_flight, peak) = (store.clone(), in_flight.clone(), peak.clone());
            registry.register_fn(JobType::ValidateTicket, move |_: TicketPayload| {
                let (store, in_flight, peak) = (store.clone(), in_flight.clone(), peak.clone());
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    let processing = store.stats().await?.processing;
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    if processing != 1 {
                        bail!("{processing} jobs processing at once");
                    }
                    Ok(())
                }
            });
        }
        let dispatcher = Dispatcher::new(store.clone(), registry).with_config(fast());
        let queue = JobQueue::new(store.clone());
        for id in 0..5 {
            queue.validate_ticket(TicketId::new(id)).await.unwrap();
        }

        while dispatcher.run_once().await.unwrap().is_some() {}

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.done, 5);
        assert_eq!(stats.failed, 0);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unregistered_type_reaches_failed_not_lost() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let dispatcher = Dispatcher::new(store.clone(), HandlerRegistry::new()).with_config(fast());

        let id = store.insert("REINDEX_SEARCH", r#"{"ticketId":3}"#).await.unwrap();
        dispatcher.run_once().await.unwrap();

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error_message.as_deref(),
            Some("no handler for job type REINDEX_SEARCH")
        );
    }

    #[tokio::test]
    async fn sqlite_queue_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("ticketdesk.db").display());
        let ticket = Ticket::new(
            TicketId::new(42),
            "Checkout button greyed out",
            "The checkout button stays disabled after the cart is updated",
            "Button enabled when the cart is valid",
            "checkout",
        );

        // First process: enqueue and exit before the loop ever runs.
        let job_id = {
            let db = Database::connect(&url).await.unwrap();
            db.ensure_schema().await.unwrap();
            let Database::Sqlite(pool) = db else {
                panic!("expected sqlite");
            };
            SqliteTicketStore::new(pool.clone()).upsert(&ticket).await.unwrap();
            let id = JobQueue::new(Arc::new(SqliteJobStore::new(pool.clone())))
                .validate_ticket(ticket.id)
                .await
                .unwrap();
            pool.close().await;
            id
        };

        // Second process: the job is still pending and gets processed.
        let db = Database::connect(&url).await.unwrap();
        db.ensure_schema().await.unwrap();
        let Database::Sqlite(pool) = db else {
            panic!("expected sqlite");
        };
        let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(pool.clone()));
        let results: Arc<dyn ResultStore> = Arc::new(SqliteResultStore::new(pool.clone()));
        let tickets: Arc<dyn TicketReader> = Arc::new(SqliteTicketStore::new(pool));

        assert_eq!(store.get(job_id).await.unwrap().unwrap().status, JobStatus::Pending);

        let mut registry = HandlerRegistry::new();
        registry.register(
            JobType::ValidateTicket,
            ValidateTicketHandler::new(tickets, results.clone(), TicketValidator::heuristic()),
        );
        let dispatcher = Dispatcher::new(store.clone(), registry).with_config(fast());
        let processed = dispatcher.run_once().await.unwrap().unwrap();
        assert_eq!(processed.id, job_id);

        let job = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
        let verdict = results.latest_validation(ticket.id).await.unwrap().unwrap();
        assert!(verdict.is_complete);
    }
}
