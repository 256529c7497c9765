//! Read-side facade over the snapshot cache.
//!
//! Every operation resolves against one snapshot, so values returned from a
//! single call are mutually consistent even if transcripts change mid-query.

use crate::aggregator::StatsAggregator;
use crate::config::StatsConfig;
use crate::error::{Error, Result};
use crate::store::TranscriptStore;
use crate::types::{ClaudeStats, Message, ProjectSummary, Session};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub struct QueryService {
    aggregator: Arc<StatsAggregator>,
}

impl QueryService {
    pub fn new(store: TranscriptStore) -> Self {
        Self {
            aggregator: Arc::new(StatsAggregator::new(store)),
        }
    }

    pub fn with_config(store: TranscriptStore, config: &StatsConfig) -> Self {
        Self {
            aggregator: Arc::new(StatsAggregator::with_wait_timeout(
                store,
                Duration::from_secs(config.snapshot_wait_secs),
            )),
        }
    }

    pub fn aggregator(&self) -> &Arc<StatsAggregator> {
        &self.aggregator
    }

    /// The `limit` most recently active sessions across all projects,
    /// newest first. A non-positive limit yields an empty list.
    pub fn recent_sessions(&self, limit: i64) -> Result<Vec<Session>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let snap = self.aggregator.snapshot()?;
        let mut sessions: Vec<Session> = snap.index().sessions().cloned().collect();
        sessions.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.id.cmp(&b.id))
        });
        sessions.truncate(limit as usize);
        Ok(sessions)
    }

    /// All sessions for one project path, newest first. An unknown project
    /// is an empty list, not an error.
    pub fn project_sessions(&self, project_path: &str) -> Result<Vec<Session>> {
        let snap = self.aggregator.snapshot()?;
        let mut sessions: Vec<Session> = snap
            .index()
            .sessions()
            .filter(|s| s.project_path == project_path)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(sessions)
    }

    /// Every message of one session in conversational order.
    pub fn session_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let snap = self.aggregator.snapshot()?;
        let msgs = snap
            .index()
            .session_messages(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        Ok(msgs.into_iter().cloned().collect())
    }

    /// Aggregate usage statistics relative to the current UTC day.
    pub fn stats(&self) -> Result<ClaudeStats> {
        Ok(self.aggregator.snapshot()?.stats())
    }

    /// Per-project rollup of session and message counts, most recently
    /// active project first.
    pub fn project_overview(&self) -> Result<Vec<ProjectSummary>> {
        let snap = self.aggregator.snapshot()?;
        let mut by_project: BTreeMap<String, ProjectSummary> = BTreeMap::new();
        for session in snap.index().sessions() {
            let entry = by_project
                .entry(session.project_path.clone())
                .or_insert_with(|| ProjectSummary {
                    project_path: session.project_path.clone(),
                    project_name: session.project_name.clone(),
                    session_count: 0,
                    message_count: 0,
                    last_activity: session.last_activity,
                });
            entry.session_count += 1;
            entry.message_count += session.message_count;
            entry.last_activity = entry.last_activity.max(session.last_activity);
        }
        let mut projects: Vec<ProjectSummary> = by_project.into_values().collect();
        projects.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.project_path.cmp(&b.project_path))
        });
        Ok(projects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn msg_line(uuid: &str, sid: &str, role: &str, ts: &str) -> String {
        format!(
            "{{\"uuid\":\"{}\",\"sessionId\":\"{}\",\"type\":\"{}\",\"timestamp\":\"{}\",\"message\":{{\"content\":\"hi\"}}}}",
            uuid, sid, role, ts
        )
    }

    fn write_transcript(root: &std::path::Path, encoded: &str, name: &str, lines: &[String]) {
        let dir = root.join(encoded);
        std::fs::create_dir_all(&dir).unwrap();
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        for line in lines {
            writeln!(f, "{}", line).unwrap();
        }
    }

    fn fixture_service(tmp: &TempDir) -> QueryService {
        write_transcript(
            tmp.path(),
            "-home-dev-alpha",
            "s1.jsonl",
            &[
                msg_line("u1", "s1", "user", "2026-03-01T10:00:00Z"),
                msg_line("a1", "s1", "assistant", "2026-03-01T10:05:00Z"),
            ],
        );
        write_transcript(
            tmp.path(),
            "-home-dev-beta",
            "s2.jsonl",
            &[msg_line("u2", "s2", "user", "2026-03-02T09:00:00Z")],
        );
        QueryService::new(TranscriptStore::with_root(tmp.path().to_path_buf()))
    }

    #[test]
    fn test_recent_sessions_orders_and_limits() {
        let tmp = TempDir::new().unwrap();
        let service = fixture_service(&tmp);

        let all = service.recent_sessions(10).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "s2");
        assert_eq!(all[1].id, "s1");

        let one = service.recent_sessions(1).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].id, "s2");

        assert!(service.recent_sessions(0).unwrap().is_empty());
        assert!(service.recent_sessions(-3).unwrap().is_empty());
    }

    #[test]
    fn test_project_sessions_unknown_is_empty() {
        let tmp = TempDir::new().unwrap();
        let service = fixture_service(&tmp);

        let alpha = service.project_sessions("/home/dev/alpha").unwrap();
        assert_eq!(alpha.len(), 1);
        assert_eq!(alpha[0].id, "s1");

        assert!(service.project_sessions("/no/such/project").unwrap().is_empty());
    }

    #[test]
    fn test_session_messages_unknown_is_error() {
        let tmp = TempDir::new().unwrap();
        let service = fixture_service(&tmp);

        let msgs = service.session_messages("s1").unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].uuid, "u1");

        match service.session_messages("ghost") {
            Err(Error::SessionNotFound(id)) => assert_eq!(id, "ghost"),
            other => panic!("expected SessionNotFound, got {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn test_project_overview_rolls_up() {
        let tmp = TempDir::new().unwrap();
        let service = fixture_service(&tmp);

        let projects = service.project_overview().unwrap();
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0].project_path, "/home/dev/beta");
        assert_eq!(projects[0].session_count, 1);
        assert_eq!(projects[1].project_path, "/home/dev/alpha");
        assert_eq!(projects[1].message_count, 2);
        assert_eq!(projects[1].project_name, "alpha");
    }

    #[test]
    fn test_stats_reflects_all_projects() {
        let tmp = TempDir::new().unwrap();
        let service = fixture_service(&tmp);

        let stats = service.stats().unwrap();
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.total_messages, 3);
    }
}
