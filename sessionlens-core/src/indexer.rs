//! Transcript line parsing and session indexing
//!
//! Each raw line is decoded independently and permissively: unknown fields
//! are ignored, optional fields default when missing, and a line missing a
//! required field (`uuid`, `sessionId`, `timestamp`, a `user`/`assistant`
//! `type`) is discarded and counted, never aborting the stream.
//!
//! The index is an arena of messages addressed by uuid with an explicit
//! parent/children map built alongside ingestion. `parent_uuid` forms a
//! forest per session (branches come from edited/retried turns); the index
//! never assumes a single linear chain.

use crate::types::{Message, Role, Session};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

/// First-message previews are trimmed to this many characters.
const PREVIEW_MAX_CHARS: usize = 100;

// ============================================
// Raw JSONL record types (serde deserialization)
// ============================================

/// One line of a transcript as the producer writes it.
///
/// Uses `#[serde(default)]` liberally so required-field checks happen in
/// [`parse_line`], per line, not per file.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawRecord {
    uuid: Option<String>,
    parent_uuid: Option<String>,
    session_id: Option<String>,
    #[serde(rename = "type")]
    record_type: Option<String>,
    timestamp: Option<String>,
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawMessage {
    model: Option<String>,
    content: Option<serde_json::Value>,
    usage: Option<RawUsage>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    cache_read_input_tokens: Option<u64>,
}

/// Extract text content from the `message.content` field.
///
/// Content is either a plain string or an array of content blocks; `text`
/// blocks are joined with newlines. Returns whether any block was a
/// `tool_use` so the aggregator can count tool calls.
fn extract_content(content: &serde_json::Value) -> (String, bool) {
    if let Some(text) = content.as_str() {
        return (text.to_string(), false);
    }

    if let Some(blocks) = content.as_array() {
        let mut texts = Vec::new();
        let mut has_tool_use = false;
        for block in blocks {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                        texts.push(t);
                    }
                }
                Some("tool_use") => has_tool_use = true,
                _ => {}
            }
        }
        return (texts.join("\n"), has_tool_use);
    }

    (String::new(), false)
}

/// Parse one raw line into a [`Message`].
///
/// Returns `None` for anything that is not a well-formed `user`/`assistant`
/// record carrying `uuid`, `sessionId`, and an RFC 3339 `timestamp`.
pub fn parse_line(line: &str) -> Option<Message> {
    let raw: RawRecord = serde_json::from_str(line).ok()?;

    let uuid = raw.uuid?;
    let session_id = raw.session_id?;
    let role: Role = raw.record_type.as_deref()?.parse().ok()?;
    let timestamp = raw
        .timestamp
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())?
        .with_timezone(&Utc);

    let (content, model, input_tokens, output_tokens, cache_read_tokens, is_tool_call) =
        match raw.message {
            Some(msg) => {
                let (content, is_tool_call) = msg
                    .content
                    .as_ref()
                    .map(extract_content)
                    .unwrap_or_default();
                let (input, output, cache_read) = msg
                    .usage
                    .map(|u| {
                        (
                            u.input_tokens,
                            u.output_tokens,
                            u.cache_read_input_tokens.unwrap_or(0),
                        )
                    })
                    .unwrap_or((None, None, 0));
                (content, msg.model, input, output, cache_read, is_tool_call)
            }
            None => (String::new(), None, None, None, 0, false),
        };

    Some(Message {
        uuid,
        parent_uuid: raw.parent_uuid,
        session_id,
        role,
        content,
        model,
        input_tokens,
        output_tokens,
        timestamp,
        cache_read_tokens,
        is_tool_call,
    })
}

/// Collapse whitespace and truncate for session listings.
fn preview(content: &str) -> String {
    let s = content.trim().replace('\n', " ");
    if s.chars().count() <= PREVIEW_MAX_CHARS {
        s
    } else {
        let mut out: String = s.chars().take(PREVIEW_MAX_CHARS).collect();
        out.push_str("...");
        out
    }
}

fn project_name_of(project_path: &str) -> String {
    project_path
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or(project_path)
        .to_string()
}

// ============================================
// Session index
// ============================================

/// Session summary plus the bookkeeping needed to keep it correct as
/// messages arrive in file order rather than strict timestamp order.
#[derive(Debug, Clone)]
struct SessionEntry {
    summary: Session,
    /// Timestamp of the user message currently backing `first_message`.
    first_user_at: Option<DateTime<Utc>>,
    /// Timestamp of the message currently backing `model`.
    model_at: Option<DateTime<Utc>>,
}

impl SessionEntry {
    fn new(msg: &Message, project_path: &str) -> Self {
        Self {
            summary: Session {
                id: msg.session_id.clone(),
                project_path: project_path.to_string(),
                project_name: project_name_of(project_path),
                first_message: String::new(),
                message_count: 0,
                total_tokens: 0,
                model: None,
                started_at: msg.timestamp,
                last_activity: msg.timestamp,
            },
            first_user_at: None,
            model_at: None,
        }
    }

    fn observe(&mut self, msg: &Message) {
        let s = &mut self.summary;
        s.message_count += 1;
        s.total_tokens += msg.total_tokens();
        s.started_at = s.started_at.min(msg.timestamp);
        s.last_activity = s.last_activity.max(msg.timestamp);

        if msg.role == Role::User && self.first_user_at.map_or(true, |t| msg.timestamp < t) {
            self.first_user_at = Some(msg.timestamp);
            s.first_message = preview(&msg.content);
        }

        if msg.model.is_some() && self.model_at.map_or(true, |t| msg.timestamp >= t) {
            self.model_at = Some(msg.timestamp);
            s.model = msg.model.clone();
        }
    }
}

/// Arena of messages plus the derived per-session summaries.
///
/// Messages are addressed by stable uuids through side tables; the
/// parent/children edges are lookup-only, never owned references.
#[derive(Debug, Default)]
pub struct SessionIndex {
    messages: Vec<Message>,
    by_uuid: HashMap<String, usize>,
    by_session: HashMap<String, Vec<usize>>,
    children: HashMap<String, Vec<String>>,
    sessions: HashMap<String, SessionEntry>,
    discarded: u64,
}

impl SessionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and index one raw line. Blank lines are ignored; anything else
    /// that fails to parse bumps the discard counter.
    pub fn ingest_line(&mut self, project_path: &str, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match parse_line(line) {
            Some(msg) => self.insert(project_path, msg),
            None => {
                self.discarded += 1;
                tracing::debug!(project = %project_path, "Discarded malformed transcript line");
            }
        }
    }

    /// Index a parsed message and fold it into its session summary.
    pub fn insert(&mut self, project_path: &str, msg: Message) {
        let idx = self.messages.len();

        if let Some(parent) = &msg.parent_uuid {
            self.children
                .entry(parent.clone())
                .or_default()
                .push(msg.uuid.clone());
        }
        self.by_uuid.insert(msg.uuid.clone(), idx);
        self.by_session
            .entry(msg.session_id.clone())
            .or_default()
            .push(idx);

        self.sessions
            .entry(msg.session_id.clone())
            .or_insert_with(|| SessionEntry::new(&msg, project_path))
            .observe(&msg);

        self.messages.push(msg);
    }

    /// Fold another index (typically a per-project partial) into this one.
    pub fn merge(&mut self, other: SessionIndex) {
        let base = self.messages.len();
        self.discarded += other.discarded;

        for (uuid, idx) in other.by_uuid {
            self.by_uuid.insert(uuid, base + idx);
        }
        for (sid, idxs) in other.by_session {
            self.by_session
                .entry(sid)
                .or_default()
                .extend(idxs.into_iter().map(|i| base + i));
        }
        for (parent, kids) in other.children {
            self.children.entry(parent).or_default().extend(kids);
        }
        for (sid, entry) in other.sessions {
            match self.sessions.entry(sid) {
                std::collections::hash_map::Entry::Vacant(v) => {
                    v.insert(entry);
                }
                std::collections::hash_map::Entry::Occupied(mut o) => {
                    let cur = o.get_mut();
                    let s = &entry.summary;
                    cur.summary.message_count += s.message_count;
                    cur.summary.total_tokens += s.total_tokens;
                    cur.summary.started_at = cur.summary.started_at.min(s.started_at);
                    cur.summary.last_activity = cur.summary.last_activity.max(s.last_activity);
                    if entry
                        .first_user_at
                        .map_or(false, |t| cur.first_user_at.map_or(true, |c| t < c))
                    {
                        cur.first_user_at = entry.first_user_at;
                        cur.summary.first_message = s.first_message.clone();
                    }
                    if entry
                        .model_at
                        .map_or(false, |t| cur.model_at.map_or(true, |c| t >= c))
                    {
                        cur.model_at = entry.model_at;
                        cur.summary.model = s.model.clone();
                    }
                }
            }
        }
        self.messages.extend(other.messages);
    }

    /// Raise a session's `last_activity` to the transcript file's mtime when
    /// that is newer than any message timestamp (the file keeps growing
    /// between timestamped records while the session is live).
    pub fn bump_last_activity(&mut self, session_id: &str, mtime: DateTime<Utc>) {
        if let Some(entry) = self.sessions.get_mut(session_id) {
            if mtime > entry.summary.last_activity {
                entry.summary.last_activity = mtime;
            }
        }
    }

    /// Number of lines that failed required-field or JSON decoding.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// All indexed messages, in ingestion order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// All session summaries, unordered.
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values().map(|e| &e.summary)
    }

    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id).map(|e| &e.summary)
    }

    pub fn message(&self, uuid: &str) -> Option<&Message> {
        self.by_uuid.get(uuid).map(|&i| &self.messages[i])
    }

    /// A session's messages linearized by timestamp, ties broken by uuid.
    ///
    /// `parent_uuid` is preserved on each message so a caller can
    /// reconstruct branches.
    pub fn session_messages(&self, session_id: &str) -> Option<Vec<&Message>> {
        let idxs = self.by_session.get(session_id)?;
        let mut msgs: Vec<&Message> = idxs.iter().map(|&i| &self.messages[i]).collect();
        msgs.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.uuid.cmp(&b.uuid))
        });
        Some(msgs)
    }

    /// Root messages of a session's forest (no parent, or parent not indexed).
    pub fn thread_roots(&self, session_id: &str) -> Vec<&Message> {
        let Some(idxs) = self.by_session.get(session_id) else {
            return vec![];
        };
        let mut roots: Vec<&Message> = idxs
            .iter()
            .map(|&i| &self.messages[i])
            .filter(|m| {
                m.parent_uuid
                    .as_deref()
                    .map_or(true, |p| !self.by_uuid.contains_key(p))
            })
            .collect();
        roots.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.uuid.cmp(&b.uuid))
        });
        roots
    }

    /// Children of a message, ordered by timestamp then uuid. More than one
    /// child means the conversation branched at that turn.
    pub fn thread_children(&self, uuid: &str) -> Vec<&Message> {
        let Some(kids) = self.children.get(uuid) else {
            return vec![];
        };
        let mut msgs: Vec<&Message> = kids.iter().filter_map(|u| self.message(u)).collect();
        msgs.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.uuid.cmp(&b.uuid))
        });
        msgs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(uuid: &str, parent: Option<&str>, sid: &str, role: &str, ts: &str) -> String {
        let parent = parent
            .map(|p| format!("\"parentUuid\":\"{}\",", p))
            .unwrap_or_default();
        format!(
            "{{\"uuid\":\"{}\",{}\"sessionId\":\"{}\",\"type\":\"{}\",\"timestamp\":\"{}\",\
             \"message\":{{\"role\":\"{}\",\"content\":\"hello\"}}}}",
            uuid, parent, sid, role, ts, role
        )
    }

    #[test]
    fn test_parse_line_requires_fields() {
        // Missing uuid
        assert!(parse_line(
            "{\"sessionId\":\"s\",\"type\":\"user\",\"timestamp\":\"2026-01-01T00:00:00Z\"}"
        )
        .is_none());
        // Missing timestamp
        assert!(parse_line("{\"uuid\":\"u\",\"sessionId\":\"s\",\"type\":\"user\"}").is_none());
        // Non-message record type
        assert!(parse_line(
            "{\"uuid\":\"u\",\"sessionId\":\"s\",\"type\":\"summary\",\"timestamp\":\"2026-01-01T00:00:00Z\"}"
        )
        .is_none());
        // Not JSON at all
        assert!(parse_line("not json").is_none());

        let msg = parse_line(&line("u1", None, "s1", "user", "2026-01-01T00:00:00Z")).unwrap();
        assert_eq!(msg.uuid, "u1");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "hello");
    }

    #[test]
    fn test_parse_line_block_content_and_usage() {
        let raw = r#"{
            "uuid": "a1",
            "parentUuid": "u1",
            "sessionId": "s1",
            "type": "assistant",
            "timestamp": "2026-01-01T00:00:05Z",
            "extraField": {"ignored": true},
            "message": {
                "role": "assistant",
                "model": "claude-opus-4",
                "content": [
                    {"type": "text", "text": "working on it"},
                    {"type": "tool_use", "id": "t1", "name": "Bash", "input": {}}
                ],
                "usage": {"input_tokens": 120, "output_tokens": 340, "cache_read_input_tokens": 7}
            }
        }"#;
        let msg = parse_line(raw).unwrap();
        assert_eq!(msg.content, "working on it");
        assert_eq!(msg.model.as_deref(), Some("claude-opus-4"));
        assert_eq!(msg.input_tokens, Some(120));
        assert_eq!(msg.output_tokens, Some(340));
        assert_eq!(msg.cache_read_tokens, 7);
        assert!(msg.is_tool_call);
        assert_eq!(msg.parent_uuid.as_deref(), Some("u1"));
    }

    #[test]
    fn test_malformed_lines_are_counted_not_fatal() {
        let mut index = SessionIndex::new();
        index.ingest_line("/p", &line("u1", None, "s1", "user", "2026-01-01T00:00:00Z"));
        index.ingest_line("/p", "{\"uuid\": \"broken\"");
        index.ingest_line("/p", &line("a1", Some("u1"), "s1", "assistant", "2026-01-01T00:00:05Z"));
        index.ingest_line("/p", "");

        assert_eq!(index.message_count(), 2);
        assert_eq!(index.discarded(), 1);
        assert_eq!(index.session("s1").unwrap().message_count, 2);
    }

    #[test]
    fn test_session_summary_fields() {
        let mut index = SessionIndex::new();
        // Out of file order on purpose: the assistant line lands first.
        index.ingest_line(
            "/home/dev/alpha",
            r#"{"uuid":"a1","parentUuid":"u1","sessionId":"s1","type":"assistant","timestamp":"2026-01-01T00:10:00Z","message":{"role":"assistant","model":"claude-opus-4","content":"done","usage":{"input_tokens":120,"output_tokens":340}}}"#,
        );
        index.ingest_line(
            "/home/dev/alpha",
            &line("u1", None, "s1", "user", "2026-01-01T00:00:00Z"),
        );

        let s = index.session("s1").unwrap();
        assert_eq!(s.project_name, "alpha");
        assert_eq!(s.first_message, "hello");
        assert_eq!(s.message_count, 2);
        assert_eq!(s.total_tokens, 460);
        assert_eq!(s.model.as_deref(), Some("claude-opus-4"));
        assert_eq!(s.started_at.to_rfc3339(), "2026-01-01T00:00:00+00:00");
        assert_eq!(s.last_activity.to_rfc3339(), "2026-01-01T00:10:00+00:00");
    }

    #[test]
    fn test_model_is_most_recent_non_null() {
        let mut index = SessionIndex::new();
        index.ingest_line(
            "/p",
            r#"{"uuid":"a1","sessionId":"s1","type":"assistant","timestamp":"2026-01-01T00:00:00Z","message":{"model":"claude-sonnet-4","content":"x"}}"#,
        );
        index.ingest_line(
            "/p",
            r#"{"uuid":"a2","sessionId":"s1","type":"assistant","timestamp":"2026-01-01T01:00:00Z","message":{"model":"claude-opus-4","content":"y"}}"#,
        );
        index.ingest_line(
            "/p",
            &line("u9", None, "s1", "user", "2026-01-01T02:00:00Z"),
        );

        assert_eq!(
            index.session("s1").unwrap().model.as_deref(),
            Some("claude-opus-4")
        );
    }

    #[test]
    fn test_branching_children_are_indexed() {
        let mut index = SessionIndex::new();
        index.ingest_line("/p", &line("u1", None, "s1", "user", "2026-01-01T00:00:00Z"));
        // Two children of u1: a retry branch.
        index.ingest_line(
            "/p",
            &line("a1", Some("u1"), "s1", "assistant", "2026-01-01T00:01:00Z"),
        );
        index.ingest_line(
            "/p",
            &line("a2", Some("u1"), "s1", "assistant", "2026-01-01T00:02:00Z"),
        );

        let roots = index.thread_roots("s1");
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].uuid, "u1");

        let kids = index.thread_children("u1");
        assert_eq!(kids.len(), 2);
        assert_eq!(kids[0].uuid, "a1");
        assert_eq!(kids[1].uuid, "a2");

        // Linearized view still contains all three, timestamp-ordered.
        let msgs = index.session_messages("s1").unwrap();
        let uuids: Vec<&str> = msgs.iter().map(|m| m.uuid.as_str()).collect();
        assert_eq!(uuids, vec!["u1", "a1", "a2"]);
    }

    #[test]
    fn test_linearize_tie_break_by_uuid() {
        let mut index = SessionIndex::new();
        index.ingest_line("/p", &line("b", None, "s1", "user", "2026-01-01T00:00:00Z"));
        index.ingest_line("/p", &line("a", None, "s1", "user", "2026-01-01T00:00:00Z"));

        let msgs = index.session_messages("s1").unwrap();
        let uuids: Vec<&str> = msgs.iter().map(|m| m.uuid.as_str()).collect();
        assert_eq!(uuids, vec!["a", "b"]);
    }

    #[test]
    fn test_preview_truncates_and_collapses() {
        let long = "x".repeat(250);
        let p = preview(&long);
        assert_eq!(p.chars().count(), 103);
        assert!(p.ends_with("..."));

        assert_eq!(preview("  multi\nline  "), "multi line");
    }

    #[test]
    fn test_merge_combines_partials() {
        let mut a = SessionIndex::new();
        a.ingest_line("/p", &line("u1", None, "s1", "user", "2026-01-01T00:00:00Z"));
        a.ingest_line("/p", "garbage");

        let mut b = SessionIndex::new();
        b.ingest_line(
            "/p",
            &line("a1", Some("u1"), "s1", "assistant", "2026-01-01T00:05:00Z"),
        );
        b.ingest_line("/q", &line("u2", None, "s2", "user", "2026-01-02T00:00:00Z"));

        a.merge(b);
        assert_eq!(a.message_count(), 3);
        assert_eq!(a.discarded(), 1);
        assert_eq!(a.session("s1").unwrap().message_count, 2);
        assert_eq!(a.session("s2").unwrap().project_path, "/q");
        assert_eq!(a.thread_children("u1").len(), 1);
        // Cross-partial lookup still resolves through the rebased arena.
        assert_eq!(a.message("a1").unwrap().session_id, "s1");
    }
}
