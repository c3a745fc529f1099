//! Worker process entry point: one function per process.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use nova_broker::{Broker, ShutdownSignal, CHAT_QUEUE};
use nova_config::Settings;
use nova_core::{load_scenarios, Function, PersonaCatalog};
use nova_llm::{LlmProvider, OpenAiCompatProvider, ProviderConfig};
use nova_retrieval::{Embedder, HttpVectorIndex, RetrievalAdapter, VectorIndex};
use nova_session::{RedisSessionStore, SessionStore};
use nova_store::DocumentStore;
use nova_telemetry::{setup_logging, LogConfig};
use nova_worker::{
    ChatHandler, ConversationEngine, HybridMemoryManager, RagHandler, SimHandler,
    SimWorkerHandler, TaskHandler, TranslateHandler, WorkerRuntime,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "nova-worker", about = "Nova queue worker, one process per function")]
struct Args {
    /// Function this process serves: assist, galaxy, coach, translate, sim.
    #[arg(long, env = "WORKER_FUNCTION")]
    function: Function,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = Settings::from_env().context("loading settings")?;
    setup_logging(&LogConfig::new(settings.log_level.clone())).context("initializing logging")?;
    settings
        .require_llm_credentials()
        .context("checking credentials")?;

    info!(function = %args.function, "worker starting");

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
    let analytics = Arc::new(
        DocumentStore::connect(&settings.mongo_uri, &settings.mongo_db_name())
            .await
            .context("connecting to document store")?,
    );
    analytics
        .ensure_indexes()
        .await
        .context("ensuring document store indexes")?;

    let llm: Arc<dyn LlmProvider> = Arc::new(OpenAiCompatProvider::new({
        let mut config = ProviderConfig::new(&settings.llm_base_url, &settings.llm_model);
        if let Some(api_key) = &settings.llm_api_key {
            config = config.with_api_key(api_key);
        }
        config
    }));
    let index: Arc<dyn VectorIndex> = Arc::new(HttpVectorIndex::new(settings.vector_base_url()));
    let embedder = Embedder::new(settings.vector_dim, settings.embeddings_url.clone());

    let handler: Arc<dyn TaskHandler> = match args.function {
        Function::Sim | Function::Chat => {
            let memory = HybridMemoryManager::new(
                Arc::clone(&index),
                Embedder::new(settings.vector_dim, settings.embeddings_url.clone()),
                Arc::clone(&llm),
            );
            memory
                .init()
                .await
                .context("ensuring memory collection")?;
            let engine = Arc::new(ConversationEngine::new(
                Arc::clone(&sessions),
                Arc::clone(&llm),
                memory,
                Some(Arc::clone(&analytics)),
                PersonaCatalog::load(),
                load_scenarios(),
                settings.session_ttl,
            ));
            Arc::new(SimWorkerHandler::new(
                SimHandler::new(engine),
                ChatHandler::new(
                    Arc::clone(&sessions),
                    Arc::clone(&llm),
                    settings.session_ttl,
                ),
            ))
        }
        Function::Assist | Function::Galaxy | Function::Coach => {
            let adapter = Arc::new(RetrievalAdapter::new(Arc::clone(&index), embedder));
            Arc::new(RagHandler::new(
                args.function,
                adapter,
                Arc::clone(&llm),
                Some(Arc::clone(&analytics)),
            ))
        }
        Function::Translate => Arc::new(TranslateHandler::new(Arc::clone(&llm))),
    };

    let runtime = Arc::new(
        WorkerRuntime::new(
            Arc::clone(&broker),
            handler,
            settings.handler_timeout,
            settings.session_ttl,
        )
        .with_sessions(Arc::clone(&sessions)),
    );

    let shutdown = ShutdownSignal::new();
    let mut queues = vec![args.function.queue()];
    if args.function == Function::Sim {
        // The simulation worker also consumes the chat-turn queue.
        queues.push(CHAT_QUEUE);
    }
    let consumers = futures::future::try_join_all(
        queues
            .into_iter()
            .map(|queue| Arc::clone(&runtime).run(queue, &shutdown)),
    );
    tokio::pin!(consumers);

    tokio::select! {
        result = &mut consumers => {
            result.context("consumer failed")?;
        }
        () = wait_for_signal() => {
            info!("shutdown signal received, draining in-flight handlers");
            shutdown.trigger();
            tokio::select! {
                result = &mut consumers => { result.context("consumer failed during drain")?; }
                () = tokio::time::sleep(settings.shutdown_grace) => {
                    warn!(
                        grace_secs = settings.shutdown_grace.as_secs(),
                        "drain budget exceeded, exiting"
                    );
                }
            }
        }
    }

    info!("worker stopped");
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
