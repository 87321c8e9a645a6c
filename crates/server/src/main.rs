//! qna-rs server entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, middleware};
use qna_api::{AppState, auth_middleware, router as api_router};
use qna_common::Config;
use qna_core::{
    CommentService, ConsistencyScanner, DbVoteStore, LoggingReconciliationSink, QuestionService,
    UserService, VoteService, VoteStore,
};
use qna_db::repositories::{
    AnswerRepository, CommentRepository, QuestionRepository, TagRepository, UserRepository,
};
use tokio::{signal, time::MissedTickBehavior};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

/// Run the consistency scanner every `interval_secs` seconds in the background.
fn spawn_consistency_scanner(scanner: ConsistencyScanner, interval_secs: u64) {
    if interval_secs == 0 {
        info!("Consistency scanner disabled");
        return;
    }

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match scanner.run_once().await {
                Ok(summary) if summary.targets_repaired > 0 || summary.candidates_resolved > 0 => {
                    info!(?summary, "Consistency scan repaired drift");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Consistency scan failed"),
            }
        }
    });

    info!(interval_secs, "Consistency scanner started");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qna=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting qna-rs server...");

    // Load configuration
    let config = Config::load()?;

    // Connect to database
    let db = Arc::new(qna_db::init(&config).await?);
    info!("Connected to database");

    // Run migrations
    info!("Running database migrations...");
    qna_db::migrate(&db).await?;
    info!("Migrations completed");

    // Initialize repositories
    let user_repo = UserRepository::new(Arc::clone(&db));
    let question_repo = QuestionRepository::new(Arc::clone(&db));
    let answer_repo = AnswerRepository::new(Arc::clone(&db));
    let comment_repo = CommentRepository::new(Arc::clone(&db));
    let tag_repo = TagRepository::new(Arc::clone(&db));

    // Vote transactions and their reconciliation path
    let vote_store: Arc<dyn VoteStore> = Arc::new(DbVoteStore::new(Arc::clone(&db)));
    let sink = Arc::new(LoggingReconciliationSink::new());
    let vote_service = VoteService::new(vote_store.clone(), sink.clone(), &config.voting);

    let scanner = ConsistencyScanner::new(vote_store, sink, config.voting.scan_batch_size)
        .with_locks(vote_service.target_locks());
    spawn_consistency_scanner(scanner, config.voting.scan_interval_secs);

    // Create app state
    let state = AppState {
        user_service: UserService::new(user_repo),
        question_service: QuestionService::new(
            question_repo.clone(),
            answer_repo.clone(),
            tag_repo,
        ),
        comment_service: CommentService::new(comment_repo, question_repo, answer_repo),
        vote_service,
    };

    // Build router
    let app = Router::new()
        .nest("/api", api_router())
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state);

    // Start server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
