//! Statistics aggregation with an invalidate/recompute snapshot cache
//!
//! ## Cache state machine
//!
//! ```text
//!            new/modified files detected
//!   ┌─────────────────────────────────────────┐
//!   ▼                                         │
//! stale ──query──► computing ──fold ok──► fresh
//!   ▲                  │
//!   └────fold error────┘   (previous snapshot keeps serving)
//! ```
//!
//! At most one fold runs at a time; queries arriving while one is in flight
//! wait on the condvar and attach to its result. A finished fold is swapped
//! in as one `Arc`, so readers never observe a partially updated snapshot.
//!
//! Project directories are scanned in parallel; all writes into the shared
//! index happen in the single merging thread.

use crate::error::{Error, Result};
use crate::indexer::SessionIndex;
use crate::store::{RawLineIter, TranscriptFile, TranscriptStore};
use crate::types::{ClaudeStats, DailyActivity, LongestSession, ModelUsage};
use chrono::{DateTime, NaiveDate, Utc};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// What a snapshot was computed from, for invalidation checks.
#[derive(Debug, Clone, Copy)]
struct SourceStamp {
    modified_at: DateTime<Utc>,
    size_bytes: u64,
}

/// One fully folded view of all transcripts: the message index plus the
/// precomputed statistics. Immutable once published.
#[derive(Debug)]
pub struct UsageSnapshot {
    computed_at: DateTime<Utc>,
    index: SessionIndex,
    daily_activity: BTreeMap<NaiveDate, DailyActivity>,
    /// Per-day input+output token totals, for `tokens_today`.
    daily_tokens: BTreeMap<NaiveDate, u64>,
    model_usage: BTreeMap<String, ModelUsage>,
    longest_session: Option<LongestSession>,
    first_session_date: Option<NaiveDate>,
    sources: HashMap<PathBuf, SourceStamp>,
}

impl UsageSnapshot {
    /// The indexed messages and session summaries this snapshot was folded from.
    pub fn index(&self) -> &SessionIndex {
        &self.index
    }

    pub fn computed_at(&self) -> DateTime<Utc> {
        self.computed_at
    }

    /// Statistics relative to the current UTC day.
    pub fn stats(&self) -> ClaudeStats {
        self.stats_at(Utc::now())
    }

    /// Statistics with the "today" counters computed relative to `now`.
    ///
    /// The counters are derived at query time so a snapshot that survives a
    /// UTC day boundary never reports yesterday's numbers as today's.
    pub fn stats_at(&self, now: DateTime<Utc>) -> ClaudeStats {
        let today = now.date_naive();
        let today_activity = self.daily_activity.get(&today);

        ClaudeStats {
            total_sessions: self.index.sessions().count() as u32,
            total_messages: self.index.message_count() as u32,
            last_computed: self.computed_at,
            first_session_date: self.first_session_date,
            daily_activity: self.daily_activity.values().cloned().collect(),
            model_usage: self.model_usage.clone(),
            longest_session: self.longest_session.clone(),
            tokens_today: self.daily_tokens.get(&today).copied().unwrap_or(0),
            messages_today: today_activity.map(|a| a.message_count).unwrap_or(0),
            sessions_today: today_activity.map(|a| a.session_count).unwrap_or(0),
        }
    }
}

/// Fold an index into a snapshot. Runs once per recompute, single-threaded.
fn fold(
    index: SessionIndex,
    sources: HashMap<PathBuf, SourceStamp>,
    computed_at: DateTime<Utc>,
) -> UsageSnapshot {
    let mut daily_activity: BTreeMap<NaiveDate, DailyActivity> = BTreeMap::new();
    let mut daily_tokens: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    let mut model_usage: BTreeMap<String, ModelUsage> = BTreeMap::new();

    for msg in index.messages() {
        let day = msg.timestamp.date_naive();
        let bucket = daily_activity.entry(day).or_insert_with(|| DailyActivity {
            date: day,
            message_count: 0,
            session_count: 0,
            tool_call_count: 0,
        });
        bucket.message_count += 1;
        if msg.is_tool_call {
            bucket.tool_call_count += 1;
        }

        *daily_tokens.entry(day).or_insert(0) += msg.total_tokens();

        // A message without a model contributes to no usage bucket.
        if let Some(model) = &msg.model {
            let usage = model_usage.entry(model.clone()).or_default();
            usage.input_tokens += msg.input_tokens.unwrap_or(0);
            usage.output_tokens += msg.output_tokens.unwrap_or(0);
            usage.cache_read_tokens += msg.cache_read_tokens;
        }
    }

    let mut first_session_date: Option<NaiveDate> = None;
    let mut longest_session: Option<LongestSession> = None;

    for session in index.sessions() {
        let day = session.started_at.date_naive();
        let bucket = daily_activity.entry(day).or_insert_with(|| DailyActivity {
            date: day,
            message_count: 0,
            session_count: 0,
            tool_call_count: 0,
        });
        bucket.session_count += 1;

        first_session_date = Some(first_session_date.map_or(day, |d| d.min(day)));

        let duration = session.duration();
        let candidate = LongestSession {
            session_id: session.id.clone(),
            duration_secs: duration.num_seconds(),
            message_count: session.message_count,
            timestamp: session.started_at,
        };
        // Longest span wins; ties go to the earliest start, then id, so the
        // choice is deterministic across recomputes.
        let replace = match &longest_session {
            None => true,
            Some(best) => {
                candidate.duration_secs > best.duration_secs
                    || (candidate.duration_secs == best.duration_secs
                        && (candidate.timestamp < best.timestamp
                            || (candidate.timestamp == best.timestamp
                                && candidate.session_id < best.session_id)))
            }
        };
        if replace {
            longest_session = Some(candidate);
        }
    }

    UsageSnapshot {
        computed_at,
        index,
        daily_activity,
        daily_tokens,
        model_usage,
        longest_session,
        first_session_date,
        sources,
    }
}

/// Scan one project's transcripts into a partial index.
fn scan_project(project_path: &str, files: &[TranscriptFile]) -> SessionIndex {
    let mut index = SessionIndex::new();

    for file in files {
        let before = index.message_count();
        let iter = match RawLineIter::open(&file.path, 0) {
            Ok(it) => it,
            Err(e) => {
                tracing::warn!(
                    path = %file.path.display(),
                    error = %e,
                    "Skipping unreadable transcript"
                );
                continue;
            }
        };

        for line in iter {
            index.ingest_line(project_path, &line);
        }

        // Sessions touched by this file inherit its mtime when newer; the
        // file keeps growing between timestamped records while live.
        let touched: HashSet<String> = index.messages()[before..]
            .iter()
            .map(|m| m.session_id.clone())
            .collect();
        for sid in touched {
            index.bump_last_activity(&sid, file.modified_at);
        }
    }

    index
}

fn snapshot_is_current(snap: &UsageSnapshot, files: &[TranscriptFile]) -> bool {
    if files.len() != snap.sources.len() {
        return false;
    }
    files.iter().all(|f| {
        snap.sources
            .get(&f.path)
            .map_or(false, |s| s.modified_at >= f.modified_at && s.size_bytes == f.size_bytes)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheState {
    Stale,
    Computing,
    Fresh,
}

#[derive(Debug)]
struct CacheInner {
    state: CacheState,
    snapshot: Option<Arc<UsageSnapshot>>,
}

/// Owns the snapshot cache and coordinates recomputation.
///
/// Constructed at startup, torn down with the process; the cache is never a
/// hidden global.
pub struct StatsAggregator {
    store: TranscriptStore,
    inner: Mutex<CacheInner>,
    cond: Condvar,
    wait_timeout: Duration,
    #[cfg(test)]
    fail_next_discover: std::sync::atomic::AtomicBool,
    #[cfg(test)]
    fail_next_rebuild: std::sync::atomic::AtomicBool,
}

impl StatsAggregator {
    pub fn new(store: TranscriptStore) -> Self {
        Self::with_wait_timeout(store, DEFAULT_WAIT_TIMEOUT)
    }

    /// Bound how long a query waits for an in-flight fold before falling
    /// back to the last fresh snapshot. The fold itself always runs to
    /// completion in the thread that started it.
    pub fn with_wait_timeout(store: TranscriptStore, wait_timeout: Duration) -> Self {
        Self {
            store,
            inner: Mutex::new(CacheInner {
                state: CacheState::Stale,
                snapshot: None,
            }),
            cond: Condvar::new(),
            wait_timeout,
            #[cfg(test)]
            fail_next_discover: std::sync::atomic::AtomicBool::new(false),
            #[cfg(test)]
            fail_next_rebuild: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &TranscriptStore {
        &self.store
    }

    /// Mark the cache stale so the next query recomputes.
    pub fn invalidate(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.state == CacheState::Fresh {
            inner.state = CacheState::Stale;
        }
        Ok(())
    }

    /// Current snapshot, recomputing first if the cache is stale.
    ///
    /// Concurrent callers attach to an in-flight fold rather than starting a
    /// duplicate one. If a fold fails, the previous fresh snapshot (if any)
    /// is served and the cache reverts to stale for the next query.
    pub fn snapshot(&self) -> Result<Arc<UsageSnapshot>> {
        let deadline = Instant::now() + self.wait_timeout;

        loop {
            let mut inner = self.lock()?;
            match inner.state {
                CacheState::Fresh => {
                    let snap = inner.snapshot.clone().ok_or_else(|| {
                        Error::Aggregation("fresh cache with no snapshot".to_string())
                    })?;
                    drop(inner);

                    // A discovery error must not unseat a servable snapshot.
                    let files = match self.discover_sources() {
                        Ok(files) => files,
                        Err(e) => {
                            tracing::warn!(
                                error = %e,
                                "Transcript discovery failed, serving cached snapshot"
                            );
                            return Ok(snap);
                        }
                    };
                    if snapshot_is_current(&snap, &files) {
                        return Ok(snap);
                    }

                    let mut inner = self.lock()?;
                    if inner.state == CacheState::Fresh {
                        tracing::debug!("Transcript data changed, invalidating snapshot");
                        inner.state = CacheState::Stale;
                    }
                }
                CacheState::Computing => {
                    let now = Instant::now();
                    if now >= deadline {
                        // Abandon waiting; the fold finishes in its thread.
                        return match &inner.snapshot {
                            Some(snap) => Ok(snap.clone()),
                            None => Err(Error::Aggregation(
                                "timed out waiting for aggregation".to_string(),
                            )),
                        };
                    }
                    let (guard, _) = self
                        .cond
                        .wait_timeout(inner, deadline - now)
                        .map_err(|_| Error::Aggregation("cache lock poisoned".to_string()))?;
                    drop(guard);
                }
                CacheState::Stale => {
                    inner.state = CacheState::Computing;
                    drop(inner);

                    let result = self.rebuild();
                    let mut inner = self.lock()?;
                    match result {
                        Ok(snapshot) => {
                            let snap = Arc::new(snapshot);
                            inner.snapshot = Some(snap.clone());
                            inner.state = CacheState::Fresh;
                            self.cond.notify_all();
                            return Ok(snap);
                        }
                        Err(e) => {
                            inner.state = CacheState::Stale;
                            self.cond.notify_all();
                            tracing::warn!(error = %e, "Aggregation failed");
                            return match &inner.snapshot {
                                Some(snap) => Ok(snap.clone()),
                                None => Err(e),
                            };
                        }
                    }
                }
            }
        }
    }

    /// Discovery with a test-only failure hook, so the serve-stale behavior
    /// of the cache can be exercised.
    fn discover_sources(&self) -> Result<Vec<TranscriptFile>> {
        #[cfg(test)]
        if self
            .fail_next_discover
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            return Err(Error::Aggregation("discovery failed".to_string()));
        }
        self.store.discover()
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheInner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Aggregation("cache lock poisoned".to_string()))
    }

    /// Full rescan and fold. Scanning fans out per project; the merge into
    /// one index and the fold are single-threaded.
    fn rebuild(&self) -> Result<UsageSnapshot> {
        #[cfg(test)]
        if self
            .fail_next_rebuild
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            return Err(Error::Aggregation("scan failed".to_string()));
        }

        let started = Instant::now();
        let files = self.store.discover()?;

        let mut by_project: BTreeMap<String, Vec<TranscriptFile>> = BTreeMap::new();
        for file in &files {
            by_project
                .entry(file.project_path.clone())
                .or_default()
                .push(file.clone());
        }

        let partials: Vec<SessionIndex> = by_project
            .par_iter()
            .map(|(project, files)| scan_project(project, files))
            .collect();

        let mut index = SessionIndex::new();
        for partial in partials {
            index.merge(partial);
        }

        let sources = files
            .iter()
            .map(|f| {
                (
                    f.path.clone(),
                    SourceStamp {
                        modified_at: f.modified_at,
                        size_bytes: f.size_bytes,
                    },
                )
            })
            .collect();

        let snapshot = fold(index, sources, Utc::now());
        tracing::info!(
            files = files.len(),
            messages = snapshot.index.message_count(),
            sessions = snapshot.index.sessions().count(),
            discarded = snapshot.index.discarded(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Aggregation complete"
        );
        Ok(snapshot)
    }
}
