//! Rejection Log
//!
//! Structured records of every candidate the safety validator turned down,
//! kept for offline debugging of prompts and models.

use crate::safety_guardrails::ViolationKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedCandidate {
    pub run_id: Uuid,
    pub sql: String,
    pub violation_kind: ViolationKind,
    pub iteration_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl RejectedCandidate {
    pub fn new(run_id: Uuid, sql: &str, violation_kind: ViolationKind, iteration_count: u32) -> Self {
        Self {
            run_id,
            sql: sql.to_string(),
            violation_kind,
            iteration_count,
            timestamp: Utc::now(),
        }
    }
}

/// Receives rejected candidates. Implementations must not fail or block the caller.
pub trait RejectionSink: Send + Sync {
    fn record(&self, candidate: &RejectedCandidate);
}

/// Emits each rejection as a tracing event and keeps the most recent ones in
/// memory, optionally appending them to a JSON-lines file.
pub struct RejectionLogger {
    writer: Option<JsonlWriter>,
    recent: Mutex<VecDeque<RejectedCandidate>>,
    max_in_memory: usize,
}

impl RejectionLogger {
    pub fn new(log_file: Option<PathBuf>, max_in_memory: usize) -> Self {
        let writer = log_file.and_then(|path| {
            let path_display = path.display().to_string();
            match JsonlWriter::spawn(path) {
                Ok(writer) => Some(writer),
                Err(e) => {
                    warn!("Rejection log {} disabled: {}", path_display, e);
                    None
                }
            }
        });

        Self {
            writer,
            recent: Mutex::new(VecDeque::new()),
            max_in_memory,
        }
    }

    pub fn in_memory(max_in_memory: usize) -> Self {
        Self::new(None, max_in_memory)
    }

    /// Snapshot of the retained records, oldest first.
    pub fn recent(&self) -> Vec<RejectedCandidate> {
        match self.recent.lock() {
            Ok(logs) => logs.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    fn remember(&self, candidate: &RejectedCandidate) {
        if self.max_in_memory == 0 {
            return;
        }
        let mut logs = match self.recent.lock() {
            Ok(logs) => logs,
            Err(poisoned) => poisoned.into_inner(),
        };
        logs.push_back(candidate.clone());
        while logs.len() > self.max_in_memory {
            logs.pop_front();
        }
    }
}

impl RejectionSink for RejectionLogger {
    fn record(&self, candidate: &RejectedCandidate) {
        warn!(
            target: "query_staff::rejections",
            run_id = %candidate.run_id,
            sql = %candidate.sql,
            violation_kind = %candidate.violation_kind,
            iteration_count = candidate.iteration_count,
            timestamp = %candidate.timestamp.to_rfc3339(),
            "Candidate rejected"
        );

        self.remember(candidate);

        if let Some(ref writer) = self.writer {
            match serde_json::to_string(candidate) {
                Ok(line) => writer.send(line),
                Err(e) => warn!("Failed to serialize rejection record: {}", e),
            }
        }
    }
}

/// Appends lines to a file on its own thread, so recording never waits on disk.
/// Dropping the writer flushes what was queued.
struct JsonlWriter {
    sender: Mutex<Option<Sender<String>>>,
    thread: Option<JoinHandle<()>>,
}

impl JsonlWriter {
    fn spawn(path: PathBuf) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("rejection-log".to_string())
            .spawn(move || write_lines(&path, receiver))?;
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            thread: Some(thread),
        })
    }

    fn send(&self, line: String) {
        let sender = match self.sender.lock() {
            Ok(sender) => sender,
            Err(poisoned) => poisoned.into_inner(),
        };
        let delivered = match *sender {
            Some(ref sender) => sender.send(line).is_ok(),
            None => false,
        };
        if !delivered {
            warn!("Rejection log writer stopped; record kept in memory only");
        }
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        match self.sender.get_mut() {
            Ok(sender) => drop(sender.take()),
            Err(poisoned) => drop(poisoned.into_inner().take()),
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Rejection log writer panicked");
            }
        }
    }
}

fn write_lines(path: &Path, lines: Receiver<String>) {
    let file = match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => file,
        Err(e) => {
            warn!("Failed to open rejection log {}: {}", path.display(), e);
            return;
        }
    };

    let mut out = BufWriter::new(file);
    for line in lines {
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            warn!("Failed to append rejection log: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_ring_is_bounded() {
        let logger = RejectionLogger::in_memory(2);
        let run_id = Uuid::new_v4();
        for i in 0..3 {
            logger.record(&RejectedCandidate::new(run_id, &format!("SELECT {}", i), ViolationKind::MissingBound, i));
        }
        let recent = logger.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].sql, "SELECT 1");
        assert_eq!(recent[1].iteration_count, 2);
    }

    #[test]
    fn test_jsonl_file_is_appended() {
        let path = std::env::temp_dir().join(format!("query-staff-rejections-{}.jsonl", Uuid::new_v4()));
        let logger = RejectionLogger::new(Some(path.clone()), 0);
        let run_id = Uuid::new_v4();
        logger.record(&RejectedCandidate::new(run_id, "DELETE FROM employees", ViolationKind::NotASelect, 0));
        logger.record(&RejectedCandidate::new(run_id, "SELECT * FROM employees", ViolationKind::MissingBound, 1));

        assert!(logger.recent().is_empty());
        drop(logger);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: RejectedCandidate = serde_json::from_str(lines[0]).unwrap();
        let second: RejectedCandidate = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(first.sql, "DELETE FROM employees");
        assert_eq!(second.violation_kind, ViolationKind::MissingBound);
        assert_eq!(second.iteration_count, 1);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_unwritable_file_does_not_panic() {
        let logger = RejectionLogger::new(Some(PathBuf::from("/nonexistent-dir/rejections.jsonl")), 4);
        logger.record(&RejectedCandidate::new(Uuid::new_v4(), "DROP TABLE x", ViolationKind::NotASelect, 0));
        assert_eq!(logger.recent().len(), 1);
    }

    #[test]
    fn test_queued_records_are_flushed_in_order_on_drop() {
        let path = std::env::temp_dir().join(format!("query-staff-rejections-{}.jsonl", Uuid::new_v4()));
        let logger = RejectionLogger::new(Some(path.clone()), 0);
        let run_id = Uuid::new_v4();
        for i in 0..50 {
            logger.record(&RejectedCandidate::new(run_id, "SELECT * FROM employees", ViolationKind::MissingBound, i));
        }
        drop(logger);

        let content = std::fs::read_to_string(&path).unwrap();
        let counts: Vec<u32> = content
            .lines()
            .map(|line| serde_json::from_str::<RejectedCandidate>(line).unwrap().iteration_count)
            .collect();
        assert_eq!(counts, (0..50).collect::<Vec<u32>>());

        std::fs::remove_file(&path).ok();
    }
}
