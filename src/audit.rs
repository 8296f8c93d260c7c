// Audit Store - bounded ring of evaluation evidence. FIFO eviction, O(1)
// lookup by audit ID, linear iteration for post-hoc verification.
// Appends and reads are short critical sections behind one mutex, so
// contention stays bounded under concurrent handlers.

use crate::errors::GovernanceError;
use crate::models::AssessmentKind;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Durable evidence that one governance evaluation occurred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: String,
    pub timestamp: DateTime<Utc>,
    pub action_reviewed: String,
    pub assessment: AssessmentKind,
    pub relevant_principle_ids: Vec<String>,
    pub s_series_triggered: bool,
}

/// Allocate a fresh audit identifier: `gov-` + 12 hex characters.
pub fn new_audit_id() -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("gov-{}", hex::encode(bytes))
}

#[derive(Default)]
struct AuditInner {
    /// Append order; front is the oldest record.
    order: VecDeque<String>,
    by_id: HashMap<String, AuditRecord>,
}

/// Bounded audit ring with optional JSONL write-through.
pub struct AuditStore {
    inner: Mutex<AuditInner>,
    capacity: usize,
    log_path: Option<PathBuf>,
}

impl AuditStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(AuditInner::default()),
            capacity: capacity.max(1),
            log_path: None,
        }
    }

    /// Open a store backed by an append-only JSONL file, replaying what is
    /// already there (newest `capacity` records win). A truncated final
    /// line from an interrupted writer is skipped. Rotation is external.
    pub fn open(path: &Path, capacity: usize) -> Result<Self, GovernanceError> {
        let store = Self {
            inner: Mutex::new(AuditInner::default()),
            capacity: capacity.max(1),
            log_path: Some(path.to_path_buf()),
        };

        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                GovernanceError::Config(format!("cannot read audit log {}: {e}", path.display()))
            })?;
            for (lineno, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<AuditRecord>(line) {
                    Ok(record) => store.insert(record),
                    Err(e) => {
                        warn!(line = lineno + 1, error = %e, "skipping unreadable audit line");
                    }
                }
            }
        }
        Ok(store)
    }

    /// Append a record, evicting FIFO past capacity, and write it through
    /// to the log when one is configured. The write-through failing is an
    /// error: the caller must not claim an audit ID it cannot evidence.
    pub fn append(&self, record: AuditRecord) -> Result<(), GovernanceError> {
        if let Some(path) = &self.log_path {
            let line = serde_json::to_string(&record)
                .map_err(|e| GovernanceError::Internal(e.to_string()))?;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    GovernanceError::Internal(format!(
                        "cannot append audit log {}: {e}",
                        path.display()
                    ))
                })?;
            writeln!(file, "{line}")
                .map_err(|e| GovernanceError::Internal(format!("audit append: {e}")))?;
        }
        self.insert(record);
        Ok(())
    }

    fn insert(&self, record: AuditRecord) {
        let mut inner = self.inner.lock();
        if inner.by_id.contains_key(&record.audit_id) {
            // Replayed duplicate (log + ring); keep the first occurrence.
            return;
        }
        inner.order.push_back(record.audit_id.clone());
        inner.by_id.insert(record.audit_id.clone(), record);
        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.by_id.remove(&evicted);
            }
        }
    }

    pub fn get(&self, audit_id: &str) -> Option<AuditRecord> {
        self.inner.lock().by_id.get(audit_id).cloned()
    }

    /// All retained records in append order (oldest first).
    pub fn snapshot(&self) -> Vec<AuditRecord> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.by_id.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, action: &str) -> AuditRecord {
        AuditRecord {
            audit_id: id.to_string(),
            timestamp: Utc::now(),
            action_reviewed: action.to_string(),
            assessment: AssessmentKind::Proceed,
            relevant_principle_ids: vec!["const-s-x".into()],
            s_series_triggered: false,
        }
    }

    #[test]
    fn test_audit_id_shape() {
        let id = new_audit_id();
        assert!(id.starts_with("gov-"));
        assert_eq!(id.len(), 4 + 12);
        assert!(id[4..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(new_audit_id(), new_audit_id());
    }

    #[test]
    fn test_fifo_eviction_preserves_order() {
        let store = AuditStore::new(3);
        for i in 0..5 {
            store.append(record(&format!("gov-{i:012x}"), "action")).unwrap();
        }
        assert_eq!(store.len(), 3);
        let ids: Vec<String> = store.snapshot().iter().map(|r| r.audit_id.clone()).collect();
        assert_eq!(ids, vec!["gov-000000000002", "gov-000000000003", "gov-000000000004"]);
        // Evicted records are gone from the id map too.
        assert!(store.get("gov-000000000000").is_none());
        assert!(store.get("gov-000000000004").is_some());
    }

    #[test]
    fn test_concurrent_appends_retain_every_record() {
        use std::sync::Arc;
        let store = Arc::new(AuditStore::new(1024));
        let mut handles = Vec::new();
        for t in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    store
                        .append(record(&format!("gov-{t:02}{i:010x}"), "concurrent"))
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 400);
    }

    #[test]
    fn test_jsonl_round_trip_tolerates_truncated_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let store = AuditStore::open(&path, 16).unwrap();
        store.append(record("gov-aaaaaaaaaaaa", "add jwt auth")).unwrap();
        store.append(record("gov-bbbbbbbbbbbb", "rotate keys")).unwrap();
        drop(store);

        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{\"audit_id\":\"gov-cccccccccccc\",\"times");
        std::fs::write(&path, content).unwrap();

        let reloaded = AuditStore::open(&path, 16).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.get("gov-aaaaaaaaaaaa").is_some());
        assert!(reloaded.get("gov-cccccccccccc").is_none());
    }

    #[test]
    fn test_capacity_bounds_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let store = AuditStore::open(&path, 64).unwrap();
            for i in 0..10 {
                store.append(record(&format!("gov-{i:012x}"), "a")).unwrap();
            }
        }
        let reloaded = AuditStore::open(&path, 4).unwrap();
        assert_eq!(reloaded.len(), 4);
        // Newest records survive the bounded replay.
        assert!(reloaded.get("gov-000000000009").is_some());
        assert!(reloaded.get("gov-000000000000").is_none());
    }
}
