//! Civic Triage - complaint triage worker and audit CLI

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use civic_ledger::{JournalLedger, JsonRpcLedger, LedgerAdapter};
use civic_oracle::backend::OpenAiBackend;
use civic_oracle::{
    Embedder, HashingEmbedder, LlmBackend, LlmDepartmentClassifier, LlmTextTriage, LlmVisionOracle, OpenAiEmbedder,
    OpenAiTranscriber, Transcriber,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use civic_triage::{
    config::{Args, Command, EmbeddingBackend},
    db::Database,
    orchestrator::{Oracles, TriageOrchestrator},
    service::TriageService,
    similarity::SimilarityIndex,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(&args);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }
    let pipeline = args.load_pipeline_config().map_err(anyhow::Error::msg)?;

    info!("======================================");
    info!("  Civic Triage");
    info!("======================================");
    info!("Database: {:?}", args.database_path);
    info!("Similarity index: {:?}", args.similarity_path);
    info!("LLM endpoint: {}", args.oracle.llm_base_url);
    info!(
        "Ledger: {}",
        args.ledger
            .ledger_rpc_url
            .clone()
            .unwrap_or_else(|| format!("journal {:?}", args.ledger.ledger_journal_path))
    );
    info!("Workers: {}", args.worker_count);
    info!("======================================");

    let db = Arc::new(Database::open(&args.database_path).context("opening database")?);
    let index = Arc::new(
        SimilarityIndex::open(&args.similarity_path, build_embedder(&args)?).context("opening similarity index")?,
    );
    let ledger = build_ledger(&args)?;
    let oracles = build_oracles(&args)?;

    let orchestrator = Arc::new(TriageOrchestrator::new(
        db,
        index,
        ledger,
        oracles,
        pipeline,
        args.evidence_root.clone(),
    ));
    let service = TriageService::new(orchestrator, args.queue_config());

    match args.command {
        Command::Worker => run_worker(&service).await?,
        Command::Analyze { complaint_id } => {
            let outcome = service.analyze_now(complaint_id).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Audit => {
            let report = service.get_audit_report().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.passed() {
                std::process::exit(2);
            }
        }
        Command::Verify { complaint_id } => {
            let report = service.verify_integrity(complaint_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Reanchor => {
            let summary = service.reanchor_pending().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::RetryFailed => {
            let queued = service.retry_failed().await?;
            info!("Waiting for {} retried job(s)", queued.len());
            service.queue().drain().await;
            println!("{}", serde_json::to_string_pretty(&service.queue().stats())?);
        }
    }

    Ok(())
}

fn init_tracing(args: &Args) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "civic_triage={level},civic_oracle={level},civic_ledger={level},warn",
            level = args.log_level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn build_embedder(args: &Args) -> anyhow::Result<Arc<dyn Embedder>> {
    Ok(match args.oracle.embedding_backend {
        EmbeddingBackend::Hashing => Arc::new(HashingEmbedder::new(args.oracle.embedding_dimensions)),
        EmbeddingBackend::Openai => Arc::new(OpenAiEmbedder::new(
            args.oracle.llm_base_url.clone(),
            args.oracle.embedding_model.clone(),
            args.oracle.llm_api_key.clone(),
            args.retry_policy(),
        )?),
    })
}

fn build_ledger(args: &Args) -> anyhow::Result<Arc<dyn LedgerAdapter>> {
    Ok(match args.rpc_ledger_config() {
        Some(config) => Arc::new(JsonRpcLedger::new(config)?),
        None => Arc::new(JournalLedger::open(&args.ledger.ledger_journal_path).context("opening journal ledger")?),
    })
}

fn build_oracles(args: &Args) -> anyhow::Result<Oracles> {
    let base_url = args.oracle.llm_base_url.clone();
    let api_key = args.oracle.llm_api_key.clone();
    let retry = args.retry_policy();

    let text_backend: Arc<dyn LlmBackend> =
        Arc::new(OpenAiBackend::new(base_url.clone(), args.oracle.triage_model.clone(), api_key.clone())?);
    let vision_backend: Arc<dyn LlmBackend> = Arc::new(
        OpenAiBackend::new(base_url.clone(), args.oracle.vision_model.clone(), api_key.clone())?.with_vision(),
    );
    let department_backend: Arc<dyn LlmBackend> =
        Arc::new(OpenAiBackend::new(base_url.clone(), args.department_model(), api_key.clone())?);

    let transcriber: Option<Arc<dyn Transcriber>> = match &args.oracle.transcription_model {
        Some(model) => Some(Arc::new(OpenAiTranscriber::new(
            base_url,
            model.clone(),
            api_key,
            retry.clone(),
        )?)),
        None => {
            warn!("TRANSCRIPTION_MODEL not set, audio evidence will not be transcribed");
            None
        }
    };

    Ok(Oracles {
        text: Arc::new(LlmTextTriage::new(text_backend, retry.clone())),
        vision: Arc::new(LlmVisionOracle::new(vision_backend, retry.clone())),
        departments: Arc::new(LlmDepartmentClassifier::new(department_backend, retry)),
        transcriber,
    })
}

async fn run_worker(service: &TriageService) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = service.queue().spawn_dispatcher(shutdown_rx);

    info!("Worker running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("listening for Ctrl-C")?;

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    if let Err(e) = dispatcher.await {
        error!("Dispatcher task failed: {}", e);
    }

    let stats = service.queue().stats();
    info!(
        completed = stats.completed,
        failed = stats.failed,
        skipped = stats.skipped,
        in_flight = stats.in_flight,
        "Worker stopped"
    );
    Ok(())
}
