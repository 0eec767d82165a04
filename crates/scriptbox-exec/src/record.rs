//! Per-run audit record.
//!
//! The sandbox emits one record per run whether it succeeded or failed;
//! hosts persist or log it as they see fit.

use serde::{Deserialize, Serialize};

use scriptbox_core::hash::Hash256;
use scriptbox_core::id::RunId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,

    /// blake3 of the script text.
    pub script_hash: Hash256,

    /// Engine version string for provenance.
    pub engine_version: String,

    pub outcome: Outcome,

    /// Error kind when the run failed (`SyntaxError`, `ZeroDivisionError`, ...).
    pub error_kind: Option<String>,

    pub rows: usize,
    pub columns: usize,
    pub log_lines: usize,

    /// Milliseconds since Unix epoch (UTC).
    pub started_ms: u64,
    pub finished_ms: u64,
}

impl RunRecord {
    pub fn new(id: RunId, script_hash: Hash256, started_ms: u64) -> Self {
        Self {
            id,
            script_hash,
            engine_version: crate::VERSION.to_string(),
            outcome: Outcome::Failed,
            error_kind: None,
            rows: 0,
            columns: 0,
            log_lines: 0,
            started_ms,
            finished_ms: started_ms,
        }
    }

    pub fn succeed(mut self, finished_ms: u64, rows: usize, columns: usize, log_lines: usize) -> Self {
        self.outcome = Outcome::Succeeded;
        self.finished_ms = finished_ms;
        self.rows = rows;
        self.columns = columns;
        self.log_lines = log_lines;
        self
    }

    pub fn fail(mut self, finished_ms: u64, kind: impl Into<String>) -> Self {
        self.outcome = Outcome::Failed;
        self.finished_ms = finished_ms;
        self.error_kind = Some(kind.into());
        self
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.finished_ms.saturating_sub(self.started_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptbox_core::hash::hash_str;

    #[test]
    fn record_serializes_outcome_in_snake_case() {
        let r = RunRecord::new(RunId::new(), hash_str("x = 1"), 10).fail(25, "NameError");
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["outcome"], "failed");
        assert_eq!(v["error_kind"], "NameError");
        assert_eq!(r.elapsed_ms(), 15);
    }
}
