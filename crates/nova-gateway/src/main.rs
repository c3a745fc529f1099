//! Gateway process entry point.

use std::sync::Arc;

use anyhow::Context;
use nova_broker::{Broker, ShutdownSignal};
use nova_config::Settings;
use nova_core::{load_scenarios, PersonaCatalog};
use nova_gateway::{router, AppState, FsObjectStore, ObjectStore};
use nova_llm::{LlmProvider, OpenAiCompatProvider, ProviderConfig};
use nova_retrieval::{Embedder, HttpVectorIndex, RetrievalAdapter, VectorIndex};
use nova_session::{RedisSessionStore, SessionStore};
use nova_store::DocumentStore;
use nova_stream::{ResultRouter, StreamHub};
use nova_telemetry::{setup_logging, LogConfig};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env().context("loading settings")?;
    setup_logging(&LogConfig::new(settings.log_level.clone())).context("initializing logging")?;

    info!(org_id = %settings.org_id, "gateway starting");

    let broker = Arc::new(
        Broker::connect(settings.amqp_uri(), settings.worker_prefetch)
            .await
            .context("connecting to broker")?,
    );
    let sessions: Arc<dyn SessionStore> = Arc::new(
        RedisSessionStore::connect(&settings.session_store_url)
            .await
            .context("connecting to session store")?,
    );
    let documents = Arc::new(
        DocumentStore::connect(&settings.mongo_uri, &settings.mongo_db_name())
            .await
            .context("connecting to document store")?,
    );
    documents
        .ensure_indexes()
        .await
        .context("ensuring document store indexes")?;

    let index: Arc<dyn VectorIndex> = Arc::new(HttpVectorIndex::new(settings.vector_base_url()));
    let retrieval = Arc::new(RetrievalAdapter::new(
        index,
        Embedder::new(settings.vector_dim, settings.embeddings_url.clone()),
    ));
    let llm: Arc<dyn LlmProvider> = Arc::new(OpenAiCompatProvider::new({
        let mut config = ProviderConfig::new(&settings.llm_base_url, &settings.llm_model);
        if let Some(api_key) = &settings.llm_api_key {
            config = config.with_api_key(api_key);
        }
        config
    }));
    let objects: Arc<dyn ObjectStore> =
        Arc::new(FsObjectStore::new(settings.object_store_root.clone()));

    let hub = Arc::new(StreamHub::new());
    let shutdown = ShutdownSignal::new();

    // One result router per HTTP node feeds this node's hub.
    let router_task = {
        let router = Arc::new(ResultRouter::new(Arc::clone(&hub)));
        let broker = Arc::clone(&broker);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(err) = router.run(broker, shutdown).await {
                warn!(error = %err, "result router stopped");
            }
        })
    };

    let state = Arc::new(AppState {
        settings: settings.clone(),
        broker,
        hub,
        sessions,
        documents,
        retrieval,
        llm,
        objects,
        personas: PersonaCatalog::load(),
        scenarios: load_scenarios(),
    });

    let listener = tokio::net::TcpListener::bind(&settings.api_bind)
        .await
        .with_context(|| format!("binding {}", settings.api_bind))?;
    info!(bind = %settings.api_bind, "gateway listening");

    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                wait_for_signal().await;
                info!("shutdown signal received");
                shutdown.trigger();
            }
        })
        .await
        .context("serving HTTP")?;

    router_task.abort();
    info!("gateway stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable");
                let _ = ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
