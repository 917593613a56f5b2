//! Domain types for complaints, evidence, clusters and departments.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use civic_oracle::TextTriage;
use serde::{Deserialize, Serialize};

/// Progress of the background triage job.
///
/// `pending -> processing -> completed | failed`; only an explicit
/// re-trigger moves a complaint back to `processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Processing => "processing",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AnalysisStatus::Pending),
            "processing" => Ok(AnalysisStatus::Processing),
            "completed" => Ok(AnalysisStatus::Completed),
            "failed" => Ok(AnalysisStatus::Failed),
            other => Err(format!("unknown analysis status: {}", other)),
        }
    }
}

/// Case status, owned by officials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplaintStatus {
    Submitted,
    UnderReview,
    Investigating,
    Resolved,
    Rejected,
}

impl ComplaintStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplaintStatus::Submitted => "SUBMITTED",
            ComplaintStatus::UnderReview => "UNDER_REVIEW",
            ComplaintStatus::Investigating => "INVESTIGATING",
            ComplaintStatus::Resolved => "RESOLVED",
            ComplaintStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for ComplaintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComplaintStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBMITTED" => Ok(ComplaintStatus::Submitted),
            "UNDER_REVIEW" => Ok(ComplaintStatus::UnderReview),
            "INVESTIGATING" => Ok(ComplaintStatus::Investigating),
            "RESOLVED" => Ok(ComplaintStatus::Resolved),
            "REJECTED" => Ok(ComplaintStatus::Rejected),
            other => Err(format!("unknown complaint status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Audio,
    Document,
    Video,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Image => "image",
            FileType::Audio => "audio",
            FileType::Document => "document",
            FileType::Video => "video",
        }
    }
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(FileType::Image),
            "audio" => Ok(FileType::Audio),
            "document" => Ok(FileType::Document),
            "video" => Ok(FileType::Video),
            other => Err(format!("unknown file type: {}", other)),
        }
    }
}

/// A filed grievance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Complaint {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub title_en: Option<String>,
    pub summary_en: Option<String>,
    pub detected_language: Option<String>,
    pub category: Option<String>,
    pub status: ComplaintStatus,
    /// Always within 1..=10
    pub severity_score: u8,
    pub location: String,
    pub filed_at: DateTime<Utc>,
    pub department_id: Option<i64>,
    pub cluster_id: Option<i64>,
    pub analysis_status: AnalysisStatus,
    /// Text-oracle result kept for retries of a failed job
    pub cached_triage: Option<TextTriage>,
    pub manifest_digest: Option<String>,
    pub anchor_ref: Option<String>,
    pub is_deleted: bool,
}

/// Input for filing a complaint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewComplaint {
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub location: String,
    /// Citizen's own estimate; replaced by triage
    #[serde(default = "default_severity")]
    pub severity_score: u8,
    #[serde(default)]
    pub department_id: Option<i64>,
    #[serde(default)]
    pub filed_at: Option<DateTime<Utc>>,
}

fn default_severity() -> u8 {
    1
}

impl NewComplaint {
    pub fn new(
        user_id: i64,
        title: impl Into<String>,
        description: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            title: title.into(),
            description: description.into(),
            location: location.into(),
            severity_score: default_severity(),
            department_id: None,
            filed_at: None,
        }
    }
}

/// A file attached to a complaint. Bytes live in external storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub id: i64,
    pub complaint_id: i64,
    pub file_type: FileType,
    pub file_path: String,
    /// Unique across the whole system
    pub file_hash: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub captured_at: Option<DateTime<Utc>>,
    pub is_valid: Option<bool>,
    pub remarks: Option<String>,
    pub detected_text: Option<String>,
    pub transcript: Option<String>,
    /// Contribution to the evidence aggregate, when scored
    pub score: Option<f64>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvidence {
    pub complaint_id: i64,
    pub file_type: FileType,
    pub file_path: String,
    pub file_hash: String,
}

/// A detected hotspot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseCluster {
    pub id: i64,
    pub name: String,
    pub category: Option<String>,
    pub location_zone: String,
    pub avg_severity: f64,
    pub complaint_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub id: i64,
    pub name: String,
    pub description: String,
}

/// Epoch seconds to UTC, clamping unrepresentable values to the epoch.
pub(crate) fn from_epoch(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_status_round_trip() {
        for status in [
            AnalysisStatus::Pending,
            AnalysisStatus::Processing,
            AnalysisStatus::Completed,
            AnalysisStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<AnalysisStatus>().unwrap(), status);
        }
        assert!("done".parse::<AnalysisStatus>().is_err());
    }

    #[test]
    fn test_complaint_status_serde_matches_db_form() {
        let json = serde_json::to_string(&ComplaintStatus::UnderReview).unwrap();
        assert_eq!(json, "\"UNDER_REVIEW\"");
        assert_eq!("UNDER_REVIEW".parse::<ComplaintStatus>().unwrap(), ComplaintStatus::UnderReview);
    }
}
