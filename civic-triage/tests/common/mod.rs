//! Shared harness: in-memory stores, scripted oracles, a switchable ledger.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use civic_ledger::{JournalLedger, LedgerAdapter, LedgerError};
use civic_oracle::{
    DepartmentClassifier, DepartmentOption, Embedder, HashingEmbedder, ImageInput, LlmError, OracleError,
    TextTriage, TextTriageOracle, VisionOracle, VisionVerdict,
};
use tempfile::TempDir;

use civic_triage::{
    Complaint, Database, NewComplaint, Oracles, PipelineConfig, QueueConfig, SimilarityIndex, TriageOrchestrator,
    TriageService,
};

/// Text oracle that echoes the complaint back in "English" with scripted scores.
#[derive(Default)]
pub struct ScriptedText {
    scores: Mutex<HashMap<String, (f64, bool)>>,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub delay: Mutex<Option<Duration>>,
}

impl ScriptedText {
    /// Severity and urgency for complaints with this title. Unscripted titles get (6, false).
    pub fn script(&self, title: &str, severity: impl Into<f64>, urgent: bool) {
        self.scores.lock().unwrap().insert(title.to_string(), (severity.into(), urgent));
    }
}

#[async_trait]
impl TextTriageOracle for ScriptedText {
    async fn triage(&self, title: &str, description: &str) -> Result<TextTriage, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(OracleError::Unavailable(LlmError::Timeout(30_000)));
        }
        let (severity, is_urgent) = self
            .scores
            .lock()
            .unwrap()
            .get(title)
            .copied()
            .unwrap_or((6.0, false));
        Ok(TextTriage {
            category: "Roads".to_string(),
            severity,
            translated_title_en: title.to_string(),
            summary_en: description.to_string(),
            detected_language: "en".to_string(),
            is_urgent,
        })
    }
}

/// Vision oracle returning the same verdict for every image, except images
/// whose bytes start with `refuse`, which fail.
pub struct FixedVision {
    pub verdict: VisionVerdict,
    pub refuse: Option<&'static [u8]>,
    pub calls: AtomicUsize,
}

impl FixedVision {
    pub fn relevant(confidence_score: u8) -> Self {
        Self {
            verdict: VisionVerdict {
                is_relevant: true,
                confidence_score,
                detected_text: None,
                remarks: "Matches the description".to_string(),
            },
            refuse: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn refusing(mut self, prefix: &'static [u8]) -> Self {
        self.refuse = Some(prefix);
        self
    }
}

#[async_trait]
impl VisionOracle for FixedVision {
    async fn assess(&self, image: &ImageInput, _description: &str) -> Result<VisionVerdict, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.refuse.is_some_and(|prefix| image.data.starts_with(prefix)) {
            return Err(OracleError::Unavailable(LlmError::Unavailable("vision model overloaded".into())));
        }
        Ok(self.verdict.clone())
    }
}

/// Picks the first offered department.
pub struct FirstDepartment;

#[async_trait]
impl DepartmentClassifier for FirstDepartment {
    async fn classify(&self, _text: &str, departments: &[DepartmentOption]) -> Result<Option<i64>, OracleError> {
        Ok(departments.first().map(|d| d.id))
    }
}

/// Hashing embedder that can be made to fail.
pub struct SwitchableEmbedder {
    inner: HashingEmbedder,
    pub fail: AtomicBool,
}

#[async_trait]
impl Embedder for SwitchableEmbedder {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, OracleError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(OracleError::Unavailable(LlmError::Unavailable("embedding server down".into())));
        }
        self.inner.embed(text).await
    }
}

/// Journal ledger whose writes can be switched off.
pub struct SwitchableLedger {
    inner: JournalLedger,
    pub fail_writes: AtomicBool,
}

#[async_trait]
impl LedgerAdapter for SwitchableLedger {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn anchor(&self, complaint_id: i64, digest: &str) -> Result<String, LedgerError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::Transient("nonce too low".into()));
        }
        self.inner.anchor(complaint_id, digest).await
    }

    async fn verify(&self, complaint_id: i64) -> Result<String, LedgerError> {
        self.inner.verify(complaint_id).await
    }

    async fn enumerate_anchored_ids(&self) -> Result<BTreeSet<i64>, LedgerError> {
        self.inner.enumerate_anchored_ids().await
    }
}

pub struct Harness {
    pub service: TriageService,
    pub orchestrator: Arc<TriageOrchestrator>,
    pub db: Arc<Database>,
    pub ledger: Arc<SwitchableLedger>,
    pub text: Arc<ScriptedText>,
    pub vision: Arc<FixedVision>,
    pub embedder: Arc<SwitchableEmbedder>,
    pub evidence_dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_vision(FixedVision::relevant(8))
    }

    pub fn with_vision(vision: FixedVision) -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let embedder = Arc::new(SwitchableEmbedder {
            inner: HashingEmbedder::new(256),
            fail: AtomicBool::new(false),
        });
        let index = Arc::new(SimilarityIndex::open_in_memory(embedder.clone()).unwrap());
        let ledger = Arc::new(SwitchableLedger {
            inner: JournalLedger::open_in_memory().unwrap(),
            fail_writes: AtomicBool::new(false),
        });
        let text = Arc::new(ScriptedText::default());
        let vision = Arc::new(vision);
        let evidence_dir = tempfile::tempdir().unwrap();

        let oracles = Oracles {
            text: text.clone(),
            vision: vision.clone(),
            departments: Arc::new(FirstDepartment),
            transcriber: None,
        };
        let orchestrator = Arc::new(TriageOrchestrator::new(
            Arc::clone(&db),
            index,
            ledger.clone(),
            oracles,
            PipelineConfig::default(),
            evidence_dir.path(),
        ));
        let service = TriageService::new(
            Arc::clone(&orchestrator),
            QueueConfig {
                worker_count: 4,
                max_queue_size: 64,
                poll_interval: Duration::from_millis(50),
            },
        );

        Self {
            service,
            orchestrator,
            db,
            ledger,
            text,
            vision,
            embedder,
            evidence_dir,
        }
    }

    pub fn file(&self, title: &str, description: &str, location: &str) -> i64 {
        self.service
            .file_complaint(&NewComplaint::new(7, title, description, location))
            .unwrap()
    }

    pub fn complaint(&self, id: i64) -> Complaint {
        self.service.get_complaint(id).unwrap()
    }

    /// Write an evidence file under the evidence root and return its relative path.
    pub fn write_evidence(&self, name: &str, bytes: &[u8]) -> String {
        std::fs::write(self.evidence_dir.path().join(name), bytes).unwrap();
        name.to_string()
    }
}
