use camino::Utf8PathBuf;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Status of a task line in the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocStatus {
    Todo,
    Done,
    Cancelled,
}

impl DocStatus {
    /// The reminder store has no cancelled state; cancelled maps to done.
    pub fn to_rem(self) -> RemStatus {
        match self {
            DocStatus::Todo => RemStatus::Todo,
            DocStatus::Done | DocStatus::Cancelled => RemStatus::Done,
        }
    }

    pub fn is_open(self) -> bool {
        self == DocStatus::Todo
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemStatus {
    #[default]
    Todo,
    Done,
}

/// Resolve the document status after the reminder side won a status compare.
/// A cancelled document task is never reanimated by the reminder side.
pub fn doc_status_after_rem_win(current: DocStatus, winner: RemStatus) -> DocStatus {
    match (current, winner) {
        (DocStatus::Cancelled, _) => DocStatus::Cancelled,
        (_, RemStatus::Done) => DocStatus::Done,
        (_, RemStatus::Todo) => DocStatus::Todo,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Reminder stores rank priorities lower-is-higher.
    pub fn rem_rank(self) -> i64 {
        match self {
            Priority::High => 1,
            Priority::Medium => 5,
            Priority::Low => 9,
        }
    }

    /// Inverse of [`Priority::rem_rank`]; 0 means unset. Ranks 6-8 fall into
    /// the medium bucket.
    pub fn from_rem_rank(rank: i64) -> Option<Priority> {
        match rank {
            r if r <= 0 => None,
            1 => Some(Priority::High),
            r if r >= 9 => Some(Priority::Low),
            _ => Some(Priority::Medium),
        }
    }
}

/// A task line collected from a Markdown vault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocTask {
    pub uuid: Arc<str>,
    pub vault_id: String,
    pub vault_name: String,
    pub vault_path: Utf8PathBuf,
    /// Vault-relative path of the containing file.
    pub file_path: Utf8PathBuf,
    /// 1-based.
    pub line_number: usize,
    pub block_id: Option<String>,
    pub status: DocStatus,
    pub description: String,
    pub due_date: Option<NaiveDate>,
    pub completion_date: Option<NaiveDate>,
    pub priority: Option<Priority>,
    pub tags: Vec<String>,
    pub raw_line: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl DocTask {
    pub fn absolute_path(&self) -> Utf8PathBuf {
        self.vault_path.join(&self.file_path)
    }

    /// Freshness timestamp used by the per-field winner rule.
    pub fn freshness(&self) -> DateTime<Utc> {
        self.modified_at.max(self.created_at)
    }
}

/// A record collected from the reminder store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemTask {
    pub uuid: Arc<str>,
    /// The reminder store's native identifier.
    pub item_id: String,
    pub list_id: String,
    pub list_name: String,
    pub status: RemStatus,
    pub title: String,
    pub due_date: Option<NaiveDate>,
    pub priority: Option<Priority>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Snapshot of the paired field values at last sync, kept inside the link
/// for diff display and next-run comparisons. Readers tolerate missing keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkFields {
    #[serde(default)]
    pub doc_title: Option<String>,
    #[serde(default)]
    pub rem_title: Option<String>,
    #[serde(default)]
    pub doc_due: Option<NaiveDate>,
    #[serde(default)]
    pub rem_due: Option<NaiveDate>,
    #[serde(default)]
    pub doc_status: Option<DocStatus>,
    #[serde(default)]
    pub rem_status: Option<RemStatus>,
    #[serde(default)]
    pub doc_priority: Option<Priority>,
    #[serde(default)]
    pub rem_priority: Option<Priority>,
    #[serde(default)]
    pub title_similarity: Option<f64>,
    #[serde(default)]
    pub due_equal: Option<bool>,
    #[serde(default)]
    pub date_distance_days: Option<i64>,
}

impl LinkFields {
    pub fn snapshot(doc: &DocTask, rem: &RemTask) -> LinkFields {
        LinkFields {
            doc_title: Some(doc.description.clone()),
            rem_title: Some(rem.title.clone()),
            doc_due: doc.due_date,
            rem_due: rem.due_date,
            doc_status: Some(doc.status),
            rem_status: Some(rem.status),
            doc_priority: doc.priority,
            rem_priority: rem.priority,
            title_similarity: None,
            due_equal: Some(doc.due_date == rem.due_date),
            date_distance_days: match (doc.due_date, rem.due_date) {
                (Some(d), Some(r)) => Some((d - r).num_days().abs()),
                _ => None,
            },
        }
    }
}

/// A persistent pairing between one document task and one reminder task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLink {
    pub doc_uuid: Arc<str>,
    pub rem_uuid: Arc<str>,
    /// Similarity at creation time.
    pub score: f64,
    pub vault_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_synced: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fields: LinkFields,
}

impl SyncLink {
    pub fn new(doc: &DocTask, rem: &RemTask, score: f64, now: DateTime<Utc>) -> SyncLink {
        SyncLink {
            doc_uuid: doc.uuid.clone(),
            rem_uuid: rem.uuid.clone(),
            score,
            vault_id: doc.vault_id.clone(),
            created_at: now,
            last_synced: None,
            fields: LinkFields::snapshot(doc, rem),
        }
    }
}
