//! Subjects and the official-facing update path
//!
//! Authentication happens upstream; this module only sees a resolved
//! subject. Officials may edit complaints routed to their own department,
//! super admins may edit any complaint, citizens none. Updates carry only
//! whitelisted fields.

use serde::{Deserialize, Serialize};

use crate::error::TriageError;
use crate::models::{Complaint, ComplaintStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Citizen,
    Official,
    SuperAdmin,
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: i64,
    pub role: Role,
    #[serde(default)]
    pub department_id: Option<i64>,
}

impl Subject {
    pub fn new(id: i64, role: Role, department_id: Option<i64>) -> Self {
        Self { id, role, department_id }
    }
}

/// Typed partial update. Unknown fields are rejected at deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComplaintUpdate {
    #[serde(default)]
    pub status: Option<ComplaintStatus>,
    #[serde(default)]
    pub severity_score: Option<u8>,
}

impl ComplaintUpdate {
    pub fn validate(&self) -> Result<(), TriageError> {
        if self.status.is_none() && self.severity_score.is_none() {
            return Err(TriageError::InvalidUpdate("no updatable fields given".to_string()));
        }
        if let Some(severity) = self.severity_score {
            if !(1..=10).contains(&severity) {
                return Err(TriageError::InvalidUpdate(format!(
                    "severity_score must be within 1..=10, got {}",
                    severity
                )));
            }
        }
        Ok(())
    }
}

/// Department-scoped permission check for official edits.
pub fn authorize_update(subject: &Subject, complaint: &Complaint) -> Result<(), TriageError> {
    match subject.role {
        Role::SuperAdmin => Ok(()),
        Role::Citizen => Err(TriageError::Forbidden("citizens cannot update complaints".to_string())),
        Role::Official => match (subject.department_id, complaint.department_id) {
            (Some(own), Some(assigned)) if own == assigned => Ok(()),
            (None, _) => Err(TriageError::Forbidden(format!(
                "official {} has no department",
                subject.id
            ))),
            _ => Err(TriageError::Forbidden(format!(
                "complaint {} is not routed to department {:?}",
                complaint.id, subject.department_id
            ))),
        },
    }
}
