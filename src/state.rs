//! Run state and persistence
//!
//! The orchestrator's durable memory: which stages have completed, the last
//! recorded failure and the accumulated resource usage, persisted after
//! every mutation with an atomic temp-write-then-rename so a crash between
//! stages loses at most the in-flight stage's work.
//!
//! One orchestrator invocation owns a run namespace at a time; concurrent
//! runs against the same book id are not supported.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::TokenUsage;
use crate::error::StorageError;

/// Ordered units of work within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Content,
    Cover,
    Assembly,
}

impl Stage {
    /// Fixed execution order.
    pub const ALL: [Stage; 3] = [Stage::Content, Stage::Cover, Stage::Assembly];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Content => "content",
            Stage::Cover => "cover",
            Stage::Assembly => "assembly",
        };
        write!(f, "{name}")
    }
}

/// The failure a run halted on, kept so a resumed run reports consistent
/// history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageFailureRecord {
    pub stage: Stage,
    pub message: String,
}

/// Persistent record of one run's progress. Stage flags are monotonic: the
/// orchestrator sets them on success and never clears them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    pub content_done: bool,
    pub cover_done: bool,
    pub assembly_done: bool,
    pub completed: bool,

    #[serde(default)]
    pub error: Option<StageFailureRecord>,

    /// Resource units consumed so far, keyed by backend name.
    #[serde(default)]
    pub usage: BTreeMap<String, TokenUsage>,
}

impl RunState {
    pub fn stage_done(&self, stage: Stage) -> bool {
        match stage {
            Stage::Content => self.content_done,
            Stage::Cover => self.cover_done,
            Stage::Assembly => self.assembly_done,
        }
    }

    pub fn mark_done(&mut self, stage: Stage) {
        match stage {
            Stage::Content => self.content_done = true,
            Stage::Cover => self.cover_done = true,
            Stage::Assembly => self.assembly_done = true,
        }
    }

    /// Merge newly incurred usage into the per-backend totals.
    pub fn record_usage(&mut self, backend: &str, delta: TokenUsage) {
        if delta.is_zero() {
            return;
        }
        self.usage
            .entry(backend.to_string())
            .or_default()
            .merge(delta);
    }

    /// Load persisted state, or a fresh default when no file exists yet. A
    /// file that cannot be parsed is a storage error, not a silent restart.
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| StorageError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| StorageError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        write_json_atomic(path, self)
    }
}

/// Serialize to a temp file in the target directory and rename over the
/// destination, so a crash mid-write never leaves a partial file.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp =
        tempfile::NamedTempFile::new_in(dir).map_err(|source| StorageError::Write {
            path: path.to_path_buf(),
            source,
        })?;

    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Write {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, source),
    })?;

    tmp.write_all(&bytes).map_err(|source| StorageError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    tmp.persist(path).map_err(|e| StorageError::Write {
        path: path.to_path_buf(),
        source: e.error,
    })?;

    Ok(())
}

/// Resolves the storage layout: one namespace per run under the output
/// root, plus the cross-run cost file beside the namespaces.
#[derive(Debug, Clone)]
pub struct RunPaths {
    output_root: PathBuf,
    run_dir: PathBuf,
}

impl RunPaths {
    pub fn new(output_root: &Path, book_id: &str) -> Self {
        Self {
            output_root: output_root.to_path_buf(),
            run_dir: output_root.join(book_id),
        }
    }

    pub fn ensure_run_dir(&self) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.run_dir).map_err(|source| StorageError::CreateDir {
            path: self.run_dir.clone(),
            source,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn manuscript(&self) -> PathBuf {
        self.run_dir.join("manuscript.md")
    }

    pub fn cover_image(&self) -> PathBuf {
        self.run_dir.join("cover.png")
    }

    pub fn interior_pdf(&self) -> PathBuf {
        self.run_dir.join("interior.pdf")
    }

    pub fn cover_pdf(&self) -> PathBuf {
        self.run_dir.join("cover.pdf")
    }

    pub fn run_state(&self) -> PathBuf {
        self.run_dir.join("run_state.json")
    }

    pub fn manifest(&self) -> PathBuf {
        self.run_dir.join("manifest.json")
    }

    /// Cross-run cumulative cost file, outside any single run's namespace.
    pub fn cumulative_costs(&self) -> PathBuf {
        self.output_root.join("cost_summary.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_when_file_absent() {
        let dir = tempfile::tempdir().unwrap();
        let state = RunState::load(&dir.path().join("run_state.json")).unwrap();
        assert!(!state.content_done && !state.completed);
        assert!(state.usage.is_empty());
    }

    #[test]
    fn roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_state.json");

        let mut state = RunState::default();
        state.mark_done(Stage::Content);
        state.record_usage("mock-llm", TokenUsage::new(10, 20));
        state.error = Some(StageFailureRecord {
            stage: Stage::Cover,
            message: "connection refused".into(),
        });
        state.save(&path).unwrap();

        let loaded = RunState::load(&path).unwrap();
        assert!(loaded.content_done);
        assert!(!loaded.cover_done);
        assert_eq!(loaded.usage["mock-llm"], TokenUsage::new(10, 20));
        assert_eq!(loaded.error.as_ref().unwrap().stage, Stage::Cover);
    }

    #[test]
    fn atomic_write_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_state.json");

        // A long first write followed by a short second write: if the second
        // write were in place rather than a rename, trailing bytes of the
        // first would corrupt it.
        let mut state = RunState::default();
        for i in 0..50 {
            state.record_usage(&format!("backend-{i}"), TokenUsage::new(i, i));
        }
        state.save(&path).unwrap();

        let short = RunState::default();
        short.save(&path).unwrap();

        let loaded = RunState::load(&path).unwrap();
        assert!(loaded.usage.is_empty());

        // no stray temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "run_state.json")
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn corrupt_state_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_state.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            RunState::load(&path),
            Err(StorageError::Corrupt { .. })
        ));
    }

    #[test]
    fn paths_layout() {
        let paths = RunPaths::new(Path::new("output"), "book-1");
        assert_eq!(paths.run_dir(), Path::new("output/book-1"));
        assert_eq!(paths.manuscript(), Path::new("output/book-1/manuscript.md"));
        assert_eq!(
            paths.cumulative_costs(),
            Path::new("output/cost_summary.json")
        );
    }
}
