//! Configuration for the civic-triage binary
//!
//! CLI arguments and environment variable handling using clap. Every
//! option can also come from the environment or a `.env` file.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use civic_ledger::JsonRpcLedgerConfig;
use civic_oracle::RetryPolicy;

use crate::pipeline::PipelineConfig;
use crate::queue::QueueConfig;

/// Civic Triage - complaint triage and integrity anchoring
#[derive(Parser, Debug, Clone)]
#[command(name = "civic-triage")]
#[command(about = "Background triage, clustering and ledger anchoring for civic complaints")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// SQLite database holding complaints, evidence, clusters and departments
    #[arg(long, env = "DATABASE_PATH", default_value = "civic-triage.db", global = true)]
    pub database_path: PathBuf,

    /// SQLite file for the similarity index
    #[arg(long, env = "SIMILARITY_PATH", default_value = "civic-similarity.db", global = true)]
    pub similarity_path: PathBuf,

    /// Directory that relative evidence paths are resolved against
    #[arg(long, env = "EVIDENCE_ROOT", default_value = ".", global = true)]
    pub evidence_root: PathBuf,

    /// Optional YAML file overriding pipeline tunables
    #[arg(long, env = "PIPELINE_CONFIG", global = true)]
    pub pipeline_config: Option<PathBuf>,

    /// Oracle configuration
    #[command(flatten)]
    pub oracle: OracleArgs,

    /// Ledger configuration
    #[command(flatten)]
    pub ledger: LedgerArgs,

    /// Number of triage worker tasks
    #[arg(long, env = "WORKER_COUNT", default_value = "4", global = true)]
    pub worker_count: usize,

    /// Maximum queued triage jobs
    #[arg(long, env = "QUEUE_SIZE", default_value = "1000", global = true)]
    pub queue_size: usize,

    /// Dispatcher poll interval in milliseconds
    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "5000", global = true)]
    pub poll_interval_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false", global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the job queue and dispatcher until Ctrl-C
    Worker,
    /// Request analysis for a complaint and wait for the result
    Analyze { complaint_id: i64 },
    /// Reconcile ledger anchors against the database (exit code 2 on FAIL)
    Audit,
    /// Check one complaint's digest against the ledger
    Verify { complaint_id: i64 },
    /// Retry anchoring for completed complaints without an anchor
    Reanchor,
    /// Re-request analysis for failed complaints
    RetryFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbeddingBackend {
    /// Local feature hashing, no network
    Hashing,
    /// OpenAI-compatible `/embeddings`
    Openai,
}

/// Model endpoints and call policy
#[derive(Parser, Debug, Clone)]
pub struct OracleArgs {
    /// OpenAI-compatible API base URL (Ollama: http://localhost:11434/v1)
    #[arg(long, env = "LLM_BASE_URL", default_value = "http://localhost:11434/v1", global = true)]
    pub llm_base_url: String,

    /// API key for the model endpoint (optional for local servers)
    #[arg(long, env = "LLM_API_KEY", global = true)]
    pub llm_api_key: Option<String>,

    /// Model for text triage
    #[arg(long, env = "TRIAGE_MODEL", default_value = "llama3.1", global = true)]
    pub triage_model: String,

    /// Multimodal model for evidence checks
    #[arg(long, env = "VISION_MODEL", default_value = "llava", global = true)]
    pub vision_model: String,

    /// Model for department routing (defaults to the triage model)
    #[arg(long, env = "DEPARTMENT_MODEL", global = true)]
    pub department_model: Option<String>,

    /// Speech-to-text model; audio is not transcribed when unset
    #[arg(long, env = "TRANSCRIPTION_MODEL", global = true)]
    pub transcription_model: Option<String>,

    /// Embedding backend for the similarity index
    #[arg(long, env = "EMBEDDING_BACKEND", value_enum, default_value = "hashing", global = true)]
    pub embedding_backend: EmbeddingBackend,

    /// Model for the `openai` embedding backend
    #[arg(long, env = "EMBEDDING_MODEL", default_value = "text-embedding-3-small", global = true)]
    pub embedding_model: String,

    /// Dimensions for the `hashing` embedding backend
    #[arg(long, env = "EMBEDDING_DIMENSIONS", default_value = "256", global = true)]
    pub embedding_dimensions: usize,

    /// Per-attempt oracle timeout in milliseconds
    #[arg(long, env = "ORACLE_TIMEOUT_MS", default_value = "30000", global = true)]
    pub oracle_timeout_ms: u64,

    /// Attempts per oracle call, including the first
    #[arg(long, env = "ORACLE_MAX_ATTEMPTS", default_value = "3", global = true)]
    pub oracle_max_attempts: u32,
}

/// Ledger connection
#[derive(Parser, Debug, Clone)]
pub struct LedgerArgs {
    /// JSON-RPC ledger gateway; when unset a local journal file is used
    #[arg(long, env = "LEDGER_RPC_URL", global = true)]
    pub ledger_rpc_url: Option<String>,

    /// Bearer token for the ledger gateway
    #[arg(long, env = "LEDGER_API_TOKEN", global = true)]
    pub ledger_api_token: Option<String>,

    /// Journal ledger file used without an RPC gateway
    #[arg(long, env = "LEDGER_JOURNAL_PATH", default_value = "civic-ledger.db", global = true)]
    pub ledger_journal_path: PathBuf,

    /// Ledger request timeout in milliseconds
    #[arg(long, env = "LEDGER_TIMEOUT_MS", default_value = "15000", global = true)]
    pub ledger_timeout_ms: u64,
}

impl Args {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.oracle.oracle_max_attempts,
            timeout: Duration::from_millis(self.oracle.oracle_timeout_ms),
            ..Default::default()
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            worker_count: self.worker_count,
            max_queue_size: self.queue_size,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    /// JSON-RPC ledger settings, if a gateway URL is configured
    pub fn rpc_ledger_config(&self) -> Option<JsonRpcLedgerConfig> {
        self.ledger.ledger_rpc_url.as_ref().map(|url| JsonRpcLedgerConfig {
            url: url.clone(),
            api_token: self.ledger.ledger_api_token.clone(),
            timeout: Duration::from_millis(self.ledger.ledger_timeout_ms),
            ..Default::default()
        })
    }

    /// Department model, falling back to the triage model
    pub fn department_model(&self) -> &str {
        self.oracle
            .department_model
            .as_deref()
            .unwrap_or(&self.oracle.triage_model)
    }

    /// Pipeline tunables from `--pipeline-config`, or defaults
    pub fn load_pipeline_config(&self) -> Result<PipelineConfig, String> {
        let config = match &self.pipeline_config {
            Some(path) => {
                let yaml = std::fs::read_to_string(path)
                    .map_err(|e| format!("Cannot read pipeline config {:?}: {}", path, e))?;
                PipelineConfig::from_yaml(&yaml)
                    .map_err(|e| format!("Invalid pipeline config {:?}: {}", path, e))?
            }
            None => PipelineConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("WORKER_COUNT must be at least 1".to_string());
        }
        if self.queue_size == 0 {
            return Err("QUEUE_SIZE must be at least 1".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("POLL_INTERVAL_MS must be positive".to_string());
        }
        if self.oracle.oracle_max_attempts == 0 {
            return Err("ORACLE_MAX_ATTEMPTS must be at least 1".to_string());
        }
        if self.oracle.oracle_timeout_ms == 0 {
            return Err("ORACLE_TIMEOUT_MS must be positive".to_string());
        }
        if let Some(url) = &self.ledger.ledger_rpc_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(format!("LEDGER_RPC_URL must be an http(s) URL, got {}", url));
            }
        }
        self.load_pipeline_config().map(|_| ())
    }
}
