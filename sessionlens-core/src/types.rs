//! Core domain types for sessionlens
//!
//! These are the response shapes the UI layer deserializes by name, so the
//! serialized field names are part of the contract and stay snake_case.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Transcript** | An append-only JSONL log of conversational turns, written by Claude Code |
//! | **Message** | One user or assistant turn, optionally linked to a parent turn |
//! | **Session** | The set of messages sharing a session identifier, plus a derived summary |
//! | **Branch** | Multiple children of one parent message, produced by edits/retries |

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================
// Messages
// ============================================

/// Author of a conversational turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

/// One conversational turn from a transcript.
///
/// `parent_uuid` is a lookup-only edge into the session's message forest;
/// branches occur when a turn is edited or retried, producing multiple
/// children of one parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub uuid: String,
    pub parent_uuid: Option<String>,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub model: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub timestamp: DateTime<Utc>,

    /// Cache-read tokens feed the per-model usage buckets but are not part
    /// of the message contract.
    #[serde(skip)]
    pub(crate) cache_read_tokens: u64,

    /// Whether the turn carried at least one tool_use content block.
    #[serde(skip)]
    pub(crate) is_tool_call: bool,
}

impl Message {
    /// input + output tokens, absent fields treated as 0.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.unwrap_or(0) + self.output_tokens.unwrap_or(0)
    }
}

// ============================================
// Sessions
// ============================================

/// Derived summary over the messages sharing a `session_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub project_path: String,
    pub project_name: String,
    /// Content of the earliest user message, trimmed and truncated.
    pub first_message: String,
    pub message_count: u32,
    /// Sum of input + output tokens over the session's messages.
    pub total_tokens: u64,
    /// Most recently seen non-null model.
    pub model: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    /// Wall-clock span of the session.
    pub fn duration(&self) -> chrono::Duration {
        self.last_activity - self.started_at
    }
}

/// Per-project rollup for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub project_path: String,
    pub project_name: String,
    pub session_count: u32,
    pub message_count: u32,
    pub last_activity: DateTime<Utc>,
}

// ============================================
// Statistics
// ============================================

/// One calendar-day activity bucket.
///
/// Days are bucketed by the UTC calendar date so two machines looking at the
/// same transcripts always agree on the buckets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyActivity {
    pub date: NaiveDate,
    pub message_count: u32,
    pub session_count: u32,
    pub tool_call_count: u32,
}

/// Accumulated token counts for one model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
}

/// The session with the largest `last_activity - started_at` span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongestSession {
    pub session_id: String,
    pub duration_secs: i64,
    pub message_count: u32,
    pub timestamp: DateTime<Utc>,
}

/// Top-level usage statistics snapshot.
///
/// The `*_today` counters are computed relative to the current UTC day at
/// query time and are never cached across a day boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeStats {
    pub total_sessions: u32,
    pub total_messages: u32,
    /// Completion time of the aggregation this snapshot came from.
    pub last_computed: DateTime<Utc>,
    pub first_session_date: Option<NaiveDate>,
    /// Ascending by date, one entry per day.
    pub daily_activity: Vec<DailyActivity>,
    /// One entry per distinct model string observed.
    pub model_usage: BTreeMap<String, ModelUsage>,
    pub longest_session: Option<LongestSession>,
    pub tokens_today: u64,
    pub messages_today: u32,
    pub sessions_today: u32,
}

impl ClaudeStats {
    /// Total input + output tokens across all models.
    pub fn total_tokens(&self) -> u64 {
        self.model_usage
            .values()
            .map(|m| m.input_tokens + m.output_tokens)
            .sum()
    }

    /// The model with the most output tokens.
    pub fn primary_model(&self) -> Option<&str> {
        self.model_usage
            .iter()
            .max_by_key(|(_, usage)| usage.output_tokens)
            .map(|(model, _)| model.as_str())
    }
}
