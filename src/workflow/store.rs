use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::model::WorkflowState;

/// Marker left on a checkpoint while the run waits at the approval gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub requested_at: DateTime<Utc>,
}

/// Durable snapshot of one run, keyed by `workflow_id`. The state plus the
/// pending marker is everything needed to resume at the gate after a process
/// restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub state: WorkflowState,
    pub pending: Option<PendingApproval>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn completed_stage(state: WorkflowState) -> Self {
        Self {
            state,
            pending: None,
            updated_at: Utc::now(),
        }
    }

    pub fn suspended(state: WorkflowState) -> Self {
        Self {
            state,
            pending: Some(PendingApproval {
                requested_at: Utc::now(),
            }),
            updated_at: Utc::now(),
        }
    }
}

/// Persistence for run checkpoints. `claim_pending` must atomically consume
/// the pending marker so that two resume attempts can never both commit.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()>;

    async fn load(&self, workflow_id: &str) -> Result<Option<Checkpoint>>;

    /// Take the pending-approval marker off a suspended run. Returns the
    /// checkpoint if this call consumed the marker; `None` when the run
    /// exists but is not awaiting approval (already resumed, or never
    /// suspended).
    async fn claim_pending(&self, workflow_id: &str) -> Result<Option<Checkpoint>>;

    /// All known run states, for the inspection API.
    async fn list(&self) -> Result<Vec<WorkflowState>>;

    /// Workflow ids suspended since before `cutoff`, for timeout sweeps.
    async fn pending_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>>;
}

/// In-memory store. Not durable; used by tests and one-shot CLI runs.
#[derive(Default)]
pub struct InMemoryRunStore {
    inner: Mutex<HashMap<String, Checkpoint>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut inner = self.inner.lock().expect("run store lock");
        inner.insert(checkpoint.state.workflow_id.clone(), checkpoint);
        Ok(())
    }

    async fn load(&self, workflow_id: &str) -> Result<Option<Checkpoint>> {
        let inner = self.inner.lock().expect("run store lock");
        Ok(inner.get(workflow_id).cloned())
    }

    async fn claim_pending(&self, workflow_id: &str) -> Result<Option<Checkpoint>> {
        let mut inner = self.inner.lock().expect("run store lock");
        match inner.get_mut(workflow_id) {
            Some(checkpoint) if checkpoint.pending.is_some() => {
                checkpoint.pending = None;
                Ok(Some(checkpoint.clone()))
            }
            Some(_) => Ok(None),
            None => Err(AppError::Store(format!("unknown workflow {workflow_id}"))),
        }
    }

    async fn list(&self) -> Result<Vec<WorkflowState>> {
        let inner = self.inner.lock().expect("run store lock");
        Ok(inner.values().map(|c| c.state.clone()).collect())
    }

    async fn pending_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let inner = self.inner.lock().expect("run store lock");
        Ok(inner
            .values()
            .filter(|c| {
                c.pending
                    .as_ref()
                    .map(|p| p.requested_at < cutoff)
                    .unwrap_or(false)
            })
            .map(|c| c.state.workflow_id.clone())
            .collect())
    }
}

/// File-backed store: one JSON document per run under `base_dir`. Writes go
/// through a temp file plus rename so a crash mid-write leaves the previous
/// checkpoint intact. A process-wide mutex serializes claim operations.
pub struct FileRunStore {
    base_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileRunStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn path_for(&self, workflow_id: &str) -> PathBuf {
        // ids are uuids; reject anything that could escape the directory
        self.base_dir.join(format!("{workflow_id}.json"))
    }

    fn valid_id(workflow_id: &str) -> bool {
        !workflow_id.is_empty()
            && workflow_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
    }

    // caller holds `write_lock`
    fn write_checkpoint(&self, path: &Path, checkpoint: &Checkpoint) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    // reads need no lock: writes land via atomic rename
    fn read_checkpoint(&self, path: &Path) -> Result<Option<Checkpoint>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let checkpoint = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::Store(format!("corrupt checkpoint {}: {e}", path.display())))?;
        Ok(Some(checkpoint))
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        if !Self::valid_id(&checkpoint.state.workflow_id) {
            return Err(AppError::Store(format!(
                "invalid workflow id {:?}",
                checkpoint.state.workflow_id
            )));
        }
        let path = self.path_for(&checkpoint.state.workflow_id);
        let _guard = self.write_lock.lock().expect("file store lock");
        self.write_checkpoint(&path, &checkpoint)
    }

    async fn load(&self, workflow_id: &str) -> Result<Option<Checkpoint>> {
        if !Self::valid_id(workflow_id) {
            return Ok(None);
        }
        self.read_checkpoint(&self.path_for(workflow_id))
    }

    async fn claim_pending(&self, workflow_id: &str) -> Result<Option<Checkpoint>> {
        if !Self::valid_id(workflow_id) {
            return Err(AppError::Store(format!("unknown workflow {workflow_id}")));
        }
        let path = self.path_for(workflow_id);

        // read-check-clear under the same lock that guards writes
        let _guard = self.write_lock.lock().expect("file store lock");
        let mut checkpoint = match self.read_checkpoint(&path)? {
            Some(c) => c,
            None => return Err(AppError::Store(format!("unknown workflow {workflow_id}"))),
        };
        if checkpoint.pending.is_none() {
            return Ok(None);
        }
        checkpoint.pending = None;
        checkpoint.updated_at = Utc::now();
        self.write_checkpoint(&path, &checkpoint)?;
        Ok(Some(checkpoint))
    }

    async fn list(&self) -> Result<Vec<WorkflowState>> {
        let mut states = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(states),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(checkpoint) = self.read_checkpoint(&path)? {
                states.push(checkpoint.state);
            }
        }
        Ok(states)
    }

    async fn pending_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(checkpoint) = self.read_checkpoint(&path)? {
                let stale = checkpoint
                    .pending
                    .as_ref()
                    .map(|p| p.requested_at < cutoff)
                    .unwrap_or(false);
                if stale {
                    ids.push(checkpoint.state.workflow_id);
                }
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TenantContext;

    fn state() -> WorkflowState {
        WorkflowState::new(TenantContext::new("t"), None)
    }

    #[tokio::test]
    async fn memory_store_claims_pending_exactly_once() {
        let store = InMemoryRunStore::new();
        let s = state();
        let id = s.workflow_id.clone();
        store.save(Checkpoint::suspended(s)).await.unwrap();

        let first = store.claim_pending(&id).await.unwrap();
        assert!(first.is_some());

        let second = store.claim_pending(&id).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn memory_store_errors_on_unknown_id() {
        let store = InMemoryRunStore::new();
        let err = store.claim_pending("nope").await;
        assert!(matches!(err, Err(AppError::Store(_))));
    }

    #[tokio::test]
    async fn file_store_round_trips_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path());
        let s = state();
        let id = s.workflow_id.clone();

        store.save(Checkpoint::suspended(s)).await.unwrap();

        let loaded = store.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded.state.workflow_id, id);
        assert!(loaded.pending.is_some());

        // survives a "restart": a second store over the same directory
        let reopened = FileRunStore::new(dir.path());
        let claimed = reopened.claim_pending(&id).await.unwrap();
        assert!(claimed.is_some());
        let again = reopened.claim_pending(&id).await.unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn file_store_lists_pending_by_age() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path());
        let s = state();
        let id = s.workflow_id.clone();
        store.save(Checkpoint::suspended(s)).await.unwrap();

        let future = Utc::now() + chrono::Duration::hours(1);
        let stale = store.pending_older_than(future).await.unwrap();
        assert_eq!(stale, vec![id]);

        let past = Utc::now() - chrono::Duration::hours(1);
        let fresh = store.pending_older_than(past).await.unwrap();
        assert!(fresh.is_empty());
    }

    #[tokio::test]
    async fn file_store_rejects_traversal_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path());
        assert!(store.load("../etc/passwd").await.unwrap().is_none());
    }
}
