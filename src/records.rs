//! Row entities for the tracking product.
//!
//! Plain records mapping 1:1 to backend table columns. They carry no
//! behavior beyond construction; all reads and writes go through the
//! data client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline stage of a tracked application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Saved,
    Applied,
    Interviewing,
    Offer,
    Rejected,
}

/// One tracked job application, as stored in the `job_applications`
/// table. Captured postings from the companion process land here too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobApplication {
    /// Row UUID.
    pub id: String,
    /// Owning user UUID (row-level security key).
    pub user_id: String,
    /// Company name.
    pub company: String,
    /// Role title.
    pub role: String,
    /// Posting URL, when captured from one.
    pub url: Option<String>,
    /// Current pipeline stage.
    pub status: ApplicationStatus,
    /// Free-form notes.
    pub notes: Option<String>,
    /// When the user actually applied, if they have.
    pub applied_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobApplication {
    /// New saved posting owned by the given user.
    pub fn new(
        user_id: impl Into<String>,
        company: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            company: company.into(),
            role: role.into(),
            url: None,
            status: ApplicationStatus::Saved,
            notes: None,
            applied_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────
