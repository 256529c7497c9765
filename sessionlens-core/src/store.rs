//! Transcript file discovery and raw line access
//!
//! Claude Code writes one directory per project under `~/.claude/projects/`,
//! named with the dash-encoded absolute project path
//! (`/Users/a/dev/x` → `-Users-a-dev-x`), and one `*.jsonl` transcript per
//! session inside it. Transcripts are append-only and owned by the producer;
//! this module only ever reads them.
//!
//! ## Error Handling
//!
//! - **Missing directories**: empty result, not a failure.
//! - **Unreadable files**: logged and skipped by callers.
//! - **Partially written files**: [`RawLineIter`] yields only complete lines;
//!   an incomplete trailing line is deferred to the next read.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Encode a project path to the transcript directory name.
///
/// `/Users/a/dev/x` → `-Users-a-dev-x`
pub fn encode_project_path(path: &str) -> String {
    path.replace('/', "-")
}

/// Decode a transcript directory name back to the original project path.
///
/// `-Users-a-dev-x` → `/Users/a/dev/x`
///
/// The encoding is lossy for paths that contain literal dashes; decoding
/// assumes every dash was a separator, which is what the producer assumes
/// when it resolves directories.
pub fn decode_project_path(encoded: &str) -> String {
    if encoded.starts_with('-') {
        encoded.replacen('-', "/", 1).replace('-', "/")
    } else {
        encoded.replace('-', "/")
    }
}

/// One discovered transcript file.
#[derive(Debug, Clone)]
pub struct TranscriptFile {
    /// Path to the `.jsonl` file
    pub path: PathBuf,
    /// Decoded project path the transcript belongs to
    pub project_path: String,
    /// File size in bytes at discovery time
    pub size_bytes: u64,
    /// Last modification time at discovery time
    pub modified_at: DateTime<Utc>,
}

/// Locates transcript files and yields their raw line records.
///
/// Pure read access; the store never writes into the transcript tree.
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    projects_dir: PathBuf,
}

impl TranscriptStore {
    /// Create a store rooted at the default projects directory
    /// (`~/.claude/projects`), honoring a config override.
    pub fn from_config(config: &crate::config::ClaudeConfig) -> Result<Self> {
        let projects_dir = config
            .projects_dir()
            .ok_or_else(|| Error::Config("could not determine home directory".to_string()))?;
        Ok(Self { projects_dir })
    }

    /// Create a store rooted at a specific projects directory (for testing).
    pub fn with_root(projects_dir: PathBuf) -> Self {
        Self { projects_dir }
    }

    /// The projects directory this store scans.
    pub fn projects_dir(&self) -> &Path {
        &self.projects_dir
    }

    /// Discover all transcript files across all projects.
    ///
    /// A missing projects directory yields an empty vec. Results are sorted
    /// by path so repeated scans of unchanged data are identical.
    pub fn discover(&self) -> Result<Vec<TranscriptFile>> {
        if !self.projects_dir.exists() {
            tracing::debug!(
                dir = %self.projects_dir.display(),
                "Projects directory missing, nothing to scan"
            );
            return Ok(vec![]);
        }

        let pattern = self.projects_dir.join("*/*.jsonl");
        self.glob_files(&pattern)
    }

    /// Discover transcript files for one project path.
    ///
    /// An unknown project yields an empty vec.
    pub fn discover_project(&self, project_path: &str) -> Result<Vec<TranscriptFile>> {
        let dir = self.projects_dir.join(encode_project_path(project_path));
        if !dir.exists() {
            return Ok(vec![]);
        }

        let pattern = dir.join("*.jsonl");
        self.glob_files(&pattern)
    }

    fn glob_files(&self, pattern: &Path) -> Result<Vec<TranscriptFile>> {
        let pattern_str = pattern.to_string_lossy();
        let entries = glob::glob(&pattern_str)
            .map_err(|e| Error::Aggregation(format!("invalid glob pattern: {}", e)))?;

        let mut files = Vec::new();
        for entry in entries.flatten() {
            let metadata = match std::fs::metadata(&entry) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(path = %entry.display(), error = %e, "Skipping unreadable file");
                    continue;
                }
            };

            let project_path = entry
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .map(decode_project_path)
                .unwrap_or_default();

            files.push(TranscriptFile {
                path: entry,
                project_path,
                size_bytes: metadata.len(),
                modified_at: metadata
                    .modified()
                    .ok()
                    .map(DateTime::from)
                    .unwrap_or_else(Utc::now),
            });
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }
}

/// Lazy iterator over the complete lines of one transcript file.
///
/// Lines are yielded oldest-first. An incomplete trailing line (no `\n`,
/// still being appended by the producer) is not yielded; [`RawLineIter::offset`]
/// stops before it so the next read can resume there.
pub struct RawLineIter {
    reader: BufReader<File>,
    offset: u64,
    done: bool,
}

impl RawLineIter {
    /// Open a transcript, resuming from `start_offset` bytes in.
    pub fn open(path: &Path, start_offset: u64) -> std::io::Result<Self> {
        let mut file = File::open(path)?;
        if start_offset > 0 {
            file.seek(SeekFrom::Start(start_offset))?;
        }
        Ok(Self {
            reader: BufReader::new(file),
            offset: start_offset,
            done: false,
        })
    }

    /// Byte offset consumed through the last complete line.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Iterator for RawLineIter {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.done {
            return None;
        }

        let mut buf = Vec::new();
        match self.reader.read_until(b'\n', &mut buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(n) => {
                if buf.last() != Some(&b'\n') {
                    // Incomplete trailing line: leave it for the next read.
                    self.done = true;
                    return None;
                }
                self.offset += n as u64;
                let mut line = String::from_utf8_lossy(&buf).into_owned();
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                Some(line)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Read error in transcript, stopping");
                self.done = true;
                None
            }
        }
    }
}
