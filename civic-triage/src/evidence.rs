//! Evidence verification
//!
//! Each image item is checked for embedded capture metadata (EXIF capture
//! time and geotag) and judged by the vision oracle against the complaint
//! description. The per-item contribution is the oracle confidence minus a
//! staleness penalty when relevant, and a flat 1 otherwise. The aggregate
//! is the mean over image items that could be scored.
//!
//! Failures are per item: an unreadable file or a failed vision call
//! skips that item. Audio items are transcribed best-effort and never
//! scored; documents and video are stored only.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use civic_oracle::{ImageInput, Transcriber, VisionOracle, VisionVerdict};
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::evidence::{self as evidence_db, EvidenceVerification};
use crate::db::Database;
use crate::error::TriageError;
use crate::models::{Complaint, Evidence, FileType};
use crate::pipeline::PipelineConfig;

/// Capture metadata extraction failures
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("No capture metadata present")]
    NoMetadata,

    #[error("Unreadable metadata: {0}")]
    Unreadable(String),

    #[error("Invalid capture timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Geotag and capture time read from an image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureMetadata {
    pub captured_at: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Read EXIF capture time and GPS position from JPEG, TIFF, PNG, WebP or HEIF bytes.
pub fn extract_capture_metadata(bytes: &[u8]) -> Result<CaptureMetadata, MetadataError> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .map_err(|e| match e {
            exif::Error::NotFound(_) => MetadataError::NoMetadata,
            other => MetadataError::Unreadable(other.to_string()),
        })?;

    let captured_at = match exif
        .get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)
        .or_else(|| exif.get_field(exif::Tag::DateTime, exif::In::PRIMARY))
    {
        Some(field) => Some(parse_exif_datetime(&field.value)?),
        None => None,
    };

    let latitude = gps_coordinate(&exif, exif::Tag::GPSLatitude, exif::Tag::GPSLatitudeRef, b'S');
    let longitude = gps_coordinate(&exif, exif::Tag::GPSLongitude, exif::Tag::GPSLongitudeRef, b'W');

    if captured_at.is_none() && latitude.is_none() && longitude.is_none() {
        return Err(MetadataError::NoMetadata);
    }

    Ok(CaptureMetadata {
        captured_at,
        latitude,
        longitude,
    })
}

fn parse_exif_datetime(value: &exif::Value) -> Result<DateTime<Utc>, MetadataError> {
    let raw = match value {
        exif::Value::Ascii(parts) => parts
            .first()
            .ok_or_else(|| MetadataError::InvalidTimestamp("empty".to_string()))?,
        _ => return Err(MetadataError::InvalidTimestamp("not ASCII".to_string())),
    };
    let parsed = exif::DateTime::from_ascii(raw).map_err(|e| MetadataError::InvalidTimestamp(e.to_string()))?;

    // Camera clocks carry no zone; read them as UTC
    NaiveDate::from_ymd_opt(i32::from(parsed.year), u32::from(parsed.month), u32::from(parsed.day))
        .and_then(|date| {
            date.and_hms_opt(
                u32::from(parsed.hour),
                u32::from(parsed.minute),
                u32::from(parsed.second),
            )
        })
        .map(|naive| naive.and_utc())
        .ok_or_else(|| MetadataError::InvalidTimestamp(String::from_utf8_lossy(raw).into_owned()))
}

fn gps_coordinate(exif: &exif::Exif, tag: exif::Tag, ref_tag: exif::Tag, negative_ref: u8) -> Option<f64> {
    let field = exif.get_field(tag, exif::In::PRIMARY)?;
    let degrees = match &field.value {
        exif::Value::Rational(parts) if parts.len() >= 3 => {
            parts[0].to_f64() + parts[1].to_f64() / 60.0 + parts[2].to_f64() / 3600.0
        }
        _ => return None,
    };
    if !degrees.is_finite() {
        return None;
    }

    let negative = match exif.get_field(ref_tag, exif::In::PRIMARY).map(|f| &f.value) {
        Some(exif::Value::Ascii(parts)) => parts
            .first()
            .and_then(|p| p.first())
            .is_some_and(|c| c.to_ascii_uppercase() == negative_ref),
        _ => false,
    };
    Some(if negative { -degrees } else { degrees })
}

/// Penalty for evidence captured more than `window_days` before `now`.
pub fn staleness_penalty(
    captured_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window_days: i64,
    penalty: f64,
) -> f64 {
    match captured_at {
        Some(captured) if now - captured > Duration::days(window_days) => penalty,
        _ => 0.0,
    }
}

/// Contribution of one judged image: penalized confidence floored at 1, or 1 if irrelevant.
pub fn item_contribution(verdict: &VisionVerdict, penalty: f64) -> f64 {
    if verdict.is_relevant {
        (f64::from(verdict.confidence_score) - penalty).max(1.0)
    } else {
        1.0
    }
}

/// Result of verifying a complaint's evidence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvidenceReport {
    /// Mean contribution over scored image items; `None` if none were scored
    pub aggregate: Option<f64>,
    pub scored: usize,
    pub skipped: usize,
    pub transcribed: usize,
}

/// Scores image evidence and transcribes audio
pub struct EvidenceVerifier {
    db: Arc<Database>,
    vision: Arc<dyn VisionOracle>,
    transcriber: Option<Arc<dyn Transcriber>>,
    storage_root: PathBuf,
    staleness_days: i64,
    staleness_penalty: f64,
}

impl EvidenceVerifier {
    pub fn new(
        db: Arc<Database>,
        vision: Arc<dyn VisionOracle>,
        storage_root: impl Into<PathBuf>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            db,
            vision,
            transcriber: None,
            storage_root: storage_root.into(),
            staleness_days: config.staleness_days,
            staleness_penalty: config.staleness_penalty,
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    fn resolve(&self, file_path: &str) -> PathBuf {
        let path = Path::new(file_path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.storage_root.join(path)
        }
    }

    /// Verify every evidence item of a complaint as of `now`.
    pub async fn verify(&self, complaint: &Complaint, now: DateTime<Utc>) -> Result<EvidenceReport, TriageError> {
        let items = self
            .db
            .with_conn(|conn| evidence_db::list_for_complaint(conn, complaint.id))?;

        let images: Vec<&Evidence> = items.iter().filter(|e| e.file_type == FileType::Image).collect();
        let audio: Vec<&Evidence> = items.iter().filter(|e| e.file_type == FileType::Audio).collect();

        let results = join_all(
            images
                .iter()
                .map(|item| self.score_image(item, &complaint.description, now)),
        )
        .await;

        let mut contributions = Vec::with_capacity(results.len());
        for result in results {
            if let Some(contribution) = result? {
                contributions.push(contribution);
            }
        }

        let mut transcribed = 0;
        if let Some(transcriber) = &self.transcriber {
            for item in audio {
                if self.transcribe(transcriber.as_ref(), item).await? {
                    transcribed += 1;
                }
            }
        }

        let aggregate = if contributions.is_empty() {
            None
        } else {
            Some(contributions.iter().sum::<f64>() / contributions.len() as f64)
        };

        let report = EvidenceReport {
            aggregate,
            scored: contributions.len(),
            skipped: images.len() - contributions.len(),
            transcribed,
        };
        info!(
            complaint_id = complaint.id,
            scored = report.scored,
            skipped = report.skipped,
            aggregate = ?report.aggregate,
            "Evidence verified"
        );
        Ok(report)
    }

    /// Score one image. `Ok(None)` means the item was skipped.
    async fn score_image(
        &self,
        item: &Evidence,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>, TriageError> {
        let path = self.resolve(&item.file_path);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(evidence_id = item.id, path = %path.display(), error = %e, "Evidence file unreadable, skipping");
                return Ok(None);
            }
        };

        let metadata = match extract_capture_metadata(&bytes) {
            Ok(metadata) => metadata,
            Err(MetadataError::NoMetadata) => CaptureMetadata::default(),
            Err(e) => {
                debug!(evidence_id = item.id, error = %e, "Capture metadata ignored");
                CaptureMetadata::default()
            }
        };
        let penalty = staleness_penalty(metadata.captured_at, now, self.staleness_days, self.staleness_penalty);

        let image = ImageInput::from_path_bytes(&item.file_path, bytes);
        let verdict = match self.vision.assess(&image, description).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(evidence_id = item.id, error = %e, "Vision check failed, skipping item");
                return Ok(None);
            }
        };

        let contribution = item_contribution(&verdict, penalty);
        let verification = EvidenceVerification {
            is_valid: Some(verdict.is_relevant),
            remarks: Some(verdict.remarks.clone()),
            detected_text: verdict.detected_text.clone(),
            latitude: metadata.latitude,
            longitude: metadata.longitude,
            captured_at: metadata.captured_at,
            score: Some(contribution),
        };
        self.db
            .with_conn(|conn| evidence_db::record_verification(conn, item.id, &verification))?;

        debug!(
            evidence_id = item.id,
            relevant = verdict.is_relevant,
            confidence = verdict.confidence_score,
            penalty,
            contribution,
            "Image scored"
        );
        Ok(Some(contribution))
    }

    async fn transcribe(&self, transcriber: &dyn Transcriber, item: &Evidence) -> Result<bool, TriageError> {
        if item.transcript.is_some() {
            return Ok(false);
        }
        let path = self.resolve(&item.file_path);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(evidence_id = item.id, error = %e, "Audio file unreadable");
                return Ok(false);
            }
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());

        match transcriber.transcribe(&bytes, &file_name).await {
            Ok(text) => {
                self.db
                    .with_conn(|conn| evidence_db::record_transcript(conn, item.id, &text))?;
                Ok(true)
            }
            Err(e) => {
                warn!(evidence_id = item.id, error = %e, "Transcription failed");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::complaints;
    use crate::models::{NewComplaint, NewEvidence};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use civic_oracle::{LlmError, OracleError};

    /// Judges every image relevant at a fixed confidence, except images whose
    /// bytes start with `refuse`, for which the call fails.
    struct MarkerVision {
        confidence: u8,
        refuse: &'static [u8],
    }

    #[async_trait]
    impl VisionOracle for MarkerVision {
        async fn assess(&self, image: &ImageInput, _description: &str) -> Result<VisionVerdict, OracleError> {
            if image.data.starts_with(self.refuse) {
                return Err(OracleError::Unavailable(LlmError::Timeout(30_000)));
            }
            Ok(verdict(true, self.confidence))
        }
    }

    struct Fixture {
        db: Arc<Database>,
        dir: tempfile::TempDir,
        complaint: Complaint,
    }

    impl Fixture {
        fn new() -> Self {
            let db = Arc::new(Database::open_in_memory().unwrap());
            let complaint = db
                .with_conn(|conn| {
                    let id = complaints::insert_complaint(
                        conn,
                        &NewComplaint::new(3, "Flooded underpass", "Knee-deep water", "Ward 2, Indore"),
                    )?;
                    complaints::require_complaint(conn, id)
                })
                .unwrap();
            Self {
                db,
                dir: tempfile::tempdir().unwrap(),
                complaint,
            }
        }

        fn attach(&self, name: &str, bytes: &[u8]) -> i64 {
            std::fs::write(self.dir.path().join(name), bytes).unwrap();
            let input = NewEvidence {
                complaint_id: self.complaint.id,
                file_type: FileType::Image,
                file_path: name.to_string(),
                file_hash: civic_ledger::sha256_hex(name.as_bytes()),
            };
            self.db
                .with_conn(|conn| evidence_db::insert_evidence(conn, &input))
                .unwrap()
        }

        fn verifier(&self, confidence: u8) -> EvidenceVerifier {
            let vision = Arc::new(MarkerVision {
                confidence,
                refuse: b"BROKEN",
            });
            EvidenceVerifier::new(
                Arc::clone(&self.db),
                vision,
                self.dir.path(),
                &PipelineConfig::default(),
            )
        }

        fn score_of(&self, evidence_id: i64) -> Option<f64> {
            self.db
                .with_conn(|conn| evidence_db::list_for_complaint(conn, self.complaint.id))
                .unwrap()
                .into_iter()
                .find(|e| e.id == evidence_id)
                .and_then(|e| e.score)
        }
    }

    /// Little-endian TIFF whose Exif IFD holds only DateTimeOriginal.
    fn tiff_with_capture_time(timestamp: &str) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"II*\0");
        bytes.extend_from_slice(&8u32.to_le_bytes());
        // IFD0: ExifIFDPointer -> 26
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&0x8769u16.to_le_bytes());
        bytes.extend_from_slice(&4u16.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&26u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        // Exif IFD: DateTimeOriginal, ASCII[20] at 44
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&0x9003u16.to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&20u32.to_le_bytes());
        bytes.extend_from_slice(&44u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(bytes.len(), 44);
        bytes.extend_from_slice(timestamp.as_bytes());
        bytes.push(0);
        bytes
    }

    fn verdict(is_relevant: bool, confidence_score: u8) -> VisionVerdict {
        VisionVerdict {
            is_relevant,
            confidence_score,
            detected_text: None,
            remarks: String::new(),
        }
    }

    #[test]
    fn test_extracts_capture_time_from_tiff() {
        let metadata = extract_capture_metadata(&tiff_with_capture_time("2024:01:15 10:30:00")).unwrap();
        assert_eq!(
            metadata.captured_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap())
        );
        assert!(metadata.latitude.is_none());
    }

    #[test]
    fn test_plain_bytes_have_no_metadata() {
        assert!(extract_capture_metadata(b"not an image at all").is_err());
    }

    #[test]
    fn test_staleness_window() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(staleness_penalty(Some(now - Duration::days(31)), now, 30, 3.0), 3.0);
        assert_eq!(staleness_penalty(Some(now - Duration::days(29)), now, 30, 3.0), 0.0);
        assert_eq!(staleness_penalty(None, now, 30, 3.0), 0.0);
    }

    #[test]
    fn test_item_contribution_rules() {
        assert_eq!(item_contribution(&verdict(true, 8), 0.0), 8.0);
        assert_eq!(item_contribution(&verdict(true, 8), 3.0), 5.0);
        assert_eq!(item_contribution(&verdict(true, 2), 3.0), 1.0);
        assert_eq!(item_contribution(&verdict(false, 10), 0.0), 1.0);
    }

    #[tokio::test]
    async fn test_failed_vision_call_skips_only_that_item() {
        let fx = Fixture::new();
        let good = fx.attach("good.jpg", b"plain photo bytes");
        let bad = fx.attach("bad.jpg", b"BROKEN photo bytes");

        let report = fx.verifier(8).verify(&fx.complaint, Utc::now()).await.unwrap();
        assert_eq!(report.aggregate, Some(8.0));
        assert_eq!(report.scored, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(fx.score_of(good), Some(8.0));
        assert_eq!(fx.score_of(bad), None);
    }

    #[tokio::test]
    async fn test_stale_capture_time_is_penalized() {
        let fx = Fixture::new();
        let stale = fx.attach("old.tiff", &tiff_with_capture_time("2024:01:15 10:30:00"));
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        let report = fx.verifier(8).verify(&fx.complaint, now).await.unwrap();
        assert_eq!(report.aggregate, Some(5.0));
        assert_eq!(fx.score_of(stale), Some(5.0));

        let recorded = fx
            .db
            .with_conn(|conn| evidence_db::list_for_complaint(conn, fx.complaint.id))
            .unwrap();
        assert_eq!(
            recorded[0].captured_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_fresh_capture_time_is_not_penalized() {
        let fx = Fixture::new();
        fx.attach("new.tiff", &tiff_with_capture_time("2024:02:20 08:00:00"));
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        let report = fx.verifier(8).verify(&fx.complaint, now).await.unwrap();
        assert_eq!(report.aggregate, Some(8.0));
    }
}
