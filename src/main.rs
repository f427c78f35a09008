use axum::{
    routing::{get, patch},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prospect_agent::apollo_client::ApolloClient;
use prospect_agent::config::Config;
use prospect_agent::db::Database;
use prospect_agent::db_storage::PgProspectStore;
use prospect_agent::discovery::{CompositeDiscovery, ExclusionFilter};
use prospect_agent::email_verifier::ZeroBounceVerifier;
use prospect_agent::handlers::{self, AppState};
use prospect_agent::hunter_client::HunterClient;
use prospect_agent::maps_client::MapsClient;
use prospect_agent::merger::FieldMerger;
use prospect_agent::models::SourceId;
use prospect_agent::openai_client::{MessageTemplate, OpenAiClient};
use prospect_agent::orchestrator::SourceOrchestrator;
use prospect_agent::pipeline::Pipeline;
use prospect_agent::scheduler::{Scheduler, SchedulerSettings};
use prospect_agent::scoring::RelevanceScorer;
use prospect_agent::serper_client::SerperClient;
use prospect_agent::sources::{DiscoverySource, SourceClient};
use prospect_agent::store::ProspectStore;
use prospect_agent::website_scraper::WebsiteScraper;

/// Main entry point for the application.
///
/// This function initializes:
/// - Logging and tracing.
/// - Configuration loading.
/// - Database connection and migrations.
/// - The source chain, discovery providers and the processing pipeline.
/// - The scheduler loop, running in the background.
/// - HTTP routes and middleware (CORS, Rate Limiting) for collaborators.
///
/// Ctrl-C stops the scheduler between two cycles and drains the HTTP server.
///
/// # Returns
///
/// * `anyhow::Result<()>` - Ok on clean shutdown, or an error if initialization fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prospect_agent=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database connection pool
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");
    let store: Arc<dyn ProspectStore> = Arc::new(PgProspectStore::new(db.pool.clone()));

    let providers = &config.providers;
    let policy = &config.policy;
    let timeout = policy.source_timeout;

    let serper = Arc::new(SerperClient::new(
        providers.serper_base_url.clone(),
        providers.serper_api_key.clone(),
        timeout,
    ));
    let maps = providers.google_maps_api_key.as_ref().map(|key| {
        Arc::new(MapsClient::new(
            providers.google_maps_base_url.clone(),
            key.clone(),
            timeout,
        ))
    });

    // Source chain, in configured order; sources without credentials are left out
    let mut clients: Vec<Arc<dyn SourceClient>> = Vec::new();
    for source in &policy.source_chain {
        let client: Option<Arc<dyn SourceClient>> = match source {
            SourceId::Apollo => providers.apollo_api_key.as_ref().map(|key| {
                Arc::new(ApolloClient::new(
                    providers.apollo_base_url.clone(),
                    key.clone(),
                    timeout,
                )) as Arc<dyn SourceClient>
            }),
            SourceId::Hunter => providers.hunter_api_key.as_ref().map(|key| {
                Arc::new(HunterClient::new(
                    providers.hunter_base_url.clone(),
                    key.clone(),
                    timeout,
                )) as Arc<dyn SourceClient>
            }),
            SourceId::Website => Some(Arc::new(WebsiteScraper::new(timeout)) as Arc<dyn SourceClient>),
            SourceId::Maps => maps.clone().map(|m| m as Arc<dyn SourceClient>),
            SourceId::Search => Some(serper.clone() as Arc<dyn SourceClient>),
            SourceId::Discovery | SourceId::Verifier | SourceId::Generator => None,
        };
        match client {
            Some(client) => {
                tracing::info!("✓ Source enabled: {}", source);
                clients.push(client);
            }
            None => tracing::warn!("⚠️ Source {} disabled: no API key configured", source),
        }
    }

    let orchestrator = SourceOrchestrator::new(
        clients,
        policy.required_fields.clone(),
        timeout,
        policy.max_source_failures,
    )
    .with_pacing(policy.processing_interval);

    let template = MessageTemplate::new(
        config.targeting.message_template.clone(),
        config.targeting.value_proposition.clone(),
    );
    let mut pipeline = Pipeline::new(
        Arc::clone(&store),
        orchestrator,
        FieldMerger::new(policy.precedence.clone()),
        RelevanceScorer::new(policy.score_weights, policy.min_rating, policy.min_reviews),
        template.clone(),
    )
    .with_targeting(
        config.targeting.service_offered.clone(),
        config.targeting.sector.clone(),
    )
    .with_call_timeout(timeout);

    if let Some(key) = &providers.zerobounce_api_key {
        pipeline = pipeline.with_verifier(Arc::new(ZeroBounceVerifier::new(
            providers.zerobounce_base_url.clone(),
            key.clone(),
            timeout,
        )));
        tracing::info!("✓ Email verification enabled");
    }
    if let Some(key) = &providers.openai_api_key {
        pipeline = pipeline.with_generator(Arc::new(OpenAiClient::new(
            providers.openai_base_url.clone(),
            key.clone(),
            providers.openai_model.clone(),
            template,
            timeout,
        )));
        tracing::info!("✓ AI message generation enabled ({})", providers.openai_model);
    } else {
        tracing::warn!("⚠️ OPENAI_API_KEY not set, outreach messages use the template");
    }

    // Discovery: places search first, search engine second
    let mut discovery_sources: Vec<Arc<dyn DiscoverySource>> = Vec::new();
    if let Some(maps) = maps {
        discovery_sources.push(maps);
    }
    discovery_sources.push(serper);
    let discovery = Arc::new(CompositeDiscovery::new(
        discovery_sources,
        ExclusionFilter::new(config.targeting.excluded_keywords.clone()),
    ));

    let scheduler = Scheduler::new(
        Arc::new(pipeline),
        discovery,
        SchedulerSettings::from_config(&config),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    let app_state = Arc::new(AppState::new(Arc::clone(&store)));

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limiter configuration"))?,
    );

    let protected_routes = Router::new()
        .route("/api/v1/prospects", get(handlers::list_prospects))
        .route("/api/v1/prospects/:id", get(handlers::get_prospect))
        .route("/api/v1/prospects/:id/status", patch(handlers::update_status))
        .route("/api/v1/stats", get(handlers::stats))
        .layer(
            ServiceBuilder::new()
                .layer(RequestBodyLimitLayer::new(64 * 1024))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    let mut server_shutdown = shutdown_rx;
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        tracing::info!("Shutdown requested, finishing the current cycle");
        let _ = shutdown_tx.send(true);
    });

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = server_shutdown.wait_for(|stop| *stop).await;
    })
    .await?;

    scheduler_task.await?;
    db.pool.close().await;
    tracing::info!("Bye");

    Ok(())
}
