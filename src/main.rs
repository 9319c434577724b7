use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

mod apis;
mod cache;
mod config;
mod embed;
mod error;
mod index;
mod knowledge;
mod llm;
mod rag;
mod search;
mod server;
mod text;

use apis::arxiv::ArxivClient;
use apis::PaperSource;
use cache::KnowledgeCache;
use config::Config;
use knowledge::KnowledgeBase;
use rag::AnswerGenerator;
use server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("Starting {} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let config = Arc::new(config);
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data dir {}", config.data_dir.display()))?;

    let source: Arc<dyn PaperSource> =
        Arc::new(ArxivClient::new(config.arxiv_base_url.clone(), config.arxiv_timeout)?);
    let index = if config.vector_index_enabled {
        index::open(&config.data_dir).await
    } else {
        tracing::info!("Similarity index disabled by configuration");
        None
    };
    let cache = KnowledgeCache::load(&config.cache_file());

    tracing::info!(
        "Initialized source={}, index={}, data_dir={}",
        source.name(),
        index.is_some(),
        config.data_dir.display()
    );

    let knowledge = Arc::new(KnowledgeBase::new(config.clone(), source, index, cache));
    let model = llm::from_config(&config)?;
    let qa = Arc::new(AnswerGenerator::new(knowledge.clone(), model));

    if config.update_interval.is_zero() {
        tracing::info!("Periodic knowledge base updates disabled");
    } else {
        knowledge::spawn_periodic_updates(knowledge.clone(), config.update_interval);
    }

    let app = server::router(AppState {
        config: config.clone(),
        knowledge,
        qa,
    });

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
