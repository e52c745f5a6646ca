use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::PilotResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: i64,
    pub run_id: String,
    pub scenario: String,
    /// `round`, `item`, `interrupt` or `end`.
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

/// Append-only JSON-lines log of one run.
pub struct RunHistory {
    pub run_id: String,
    scenario: String,
    file_path: PathBuf,
}

impl RunHistory {
    /// `dir` overrides the default data directory.
    pub fn new(scenario: &str, dir: Option<&Path>) -> Self {
        let run_id = uuid::Uuid::new_v4().to_string();
        let dir = dir.map(Path::to_path_buf).unwrap_or_else(default_dir);
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!(path = %dir.display(), "cannot create history dir: {e}");
        }
        let file_path = dir.join(format!("run_{scenario}_{run_id}.jsonl"));
        Self {
            run_id,
            scenario: scenario.to_string(),
            file_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn entry(
        &self,
        kind: &str,
        round: Option<u32>,
        detail: Option<serde_json::Value>,
    ) -> HistoryEntry {
        HistoryEntry {
            ts: chrono::Utc::now().timestamp_millis(),
            run_id: self.run_id.clone(),
            scenario: self.scenario.clone(),
            kind: kind.to_string(),
            round,
            detail,
        }
    }

    pub fn append(&self, entry: &HistoryEntry) -> PilotResult<()> {
        let line = serde_json::to_string(entry)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        writeln!(file, "{line}")?;
        tracing::debug!(
            path = %self.file_path.display(),
            kind = %entry.kind,
            "history entry appended"
        );
        Ok(())
    }

    /// Like [`Self::append`] but only logs failures; history never stops a run.
    pub fn record(&self, kind: &str, round: Option<u32>, detail: Option<serde_json::Value>) {
        if let Err(e) = self.append(&self.entry(kind, round, detail)) {
            tracing::warn!(path = %self.file_path.display(), "history write failed: {e}");
        }
    }
}

/// `<data dir>/gamepilot/history`, or the current directory.
fn default_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("gamepilot").join("history"))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}
