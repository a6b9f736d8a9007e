use actix_web::{web, App, HttpServer};
use std::io;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mbti_recommender::app::AppState;
use mbti_recommender::config::Config;
use mbti_recommender::handlers::{admin, behavior, profile, recommendations, system};
use mbti_recommender::profile::ProfileUpdater;
use mbti_recommender::recommend::Recommender;
use mbti_recommender::scoring::llm::OpenAiCompatibleProvider;
use mbti_recommender::scoring::{ScoringEngine, ScoringMode};
use mbti_recommender::store::PgContentStore;
use mbti_recommender::upstream::SohuUpstreamClient;
use mbti_recommender::workers;

#[actix_web::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting mbti-recommender"
    );

    let store = PgContentStore::connect(&config.database_url, config.database_max_connections)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    store
        .migrate()
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    let store: Arc<dyn mbti_recommender::store::ContentStore> = Arc::new(store);

    let upstream = SohuUpstreamClient::new(
        config.upstream_base_url.clone(),
        config.upstream_username.clone(),
        config.upstream_password.clone(),
        config.upstream_timeout_secs,
        config.upstream_max_retries,
    )
    .expect("failed to build upstream HTTP client");
    let upstream: Arc<dyn mbti_recommender::upstream::UpstreamClient> = Arc::new(upstream);

    let llm = OpenAiCompatibleProvider::new(
        config.llm_base_url.clone(),
        config.siliconflow_api_key.clone(),
        config.llm_model.clone(),
        config.llm_temperature,
        config.llm_timeout_secs,
    )
    .expect("failed to build LLM HTTP client");
    let llm: Arc<dyn mbti_recommender::scoring::llm::LlmProvider> = Arc::new(llm);

    let default_mode = ScoringMode::parse(&config.mbti_scoring_mode).unwrap_or(ScoringMode::Random);
    let scoring = Arc::new(ScoringEngine::new(
        store.clone(),
        llm,
        default_mode,
        config.llm_max_tokens,
    ));

    let profile_updater = Arc::new(ProfileUpdater::new(store.clone(), scoring.clone()));
    let work_queue = workers::spawn(
        config.worker_pool_size,
        config.worker_queue_capacity,
        scoring.clone(),
        profile_updater.clone(),
    );
    let recommender = Arc::new(Recommender::new(store.clone(), upstream.clone(), work_queue.clone()));

    let app_state = web::Data::new(AppState {
        store,
        upstream,
        scoring,
        profile_updater,
        recommender,
        work_queue,
    });

    let bind_addr = format!("{}:{}", config.service_host, config.service_port);
    tracing::info!(bind_addr, "binding HTTP server");

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(tracing_actix_web::TracingLogger::default())
            .route("/health", web::get().to(system::health))
            .service(
                web::scope("/api/v1")
                    .route("/system/info", web::get().to(system::info))
                    .route("/system/mbti-scoring-mode", web::get().to(system::get_scoring_mode))
                    .route("/system/mbti-scoring-mode", web::post().to(system::set_scoring_mode))
                    .route("/behavior/record", web::post().to(behavior::record))
                    .route("/behavior/history/{user_id}", web::get().to(behavior::history))
                    .route("/behavior/stats/{user_id}", web::get().to(behavior::stats))
                    .route("/recommendations/{user_id}", web::get().to(recommendations::recommendations))
                    .route(
                        "/recommendations/similar/{content_id}",
                        web::get().to(recommendations::similar),
                    )
                    .route("/mbti/profile/{user_id}", web::get().to(profile::get_profile))
                    .route("/mbti/update/{user_id}", web::post().to(profile::update_profile))
                    .route(
                        "/admin/content/{content_id}/evaluate",
                        web::post().to(admin::evaluate_content),
                    )
                    .route("/admin/content/batch_evaluate", web::post().to(admin::batch_evaluate)),
            )
    })
    .bind(&bind_addr)?
    .run()
    .await
}
