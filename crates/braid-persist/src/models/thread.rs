use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use braid_types::GenerationSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub status: ThreadStatus,
    pub settings: GenerationSettings,
    /// Tip of the most recently active branch; the default parent for the
    /// next submission.
    pub current_leaf_id: Option<String>,
    /// Present while a generation is in flight on this thread.
    pub active_stream: Option<ActiveStream>,
    pub created_at: DateTime<Utc>,
    /// Normalized to "now" by the store on every mutation; clients cannot
    /// skew it.
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    Active,
    Archived,
}

/// The stream id recorded on a thread, with the client session that started
/// it. A viewing client compares `client_id` against its own session to
/// decide whether it should resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveStream {
    pub stream_id: String,
    pub client_id: Option<String>,
}
