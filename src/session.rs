//! Session lifecycle management.
//!
//! Each session owns an exclusive subtree of the shared filesystem:
//!
//! ```text
//! SHARED_ROOT/sessions/<uuid>/input/    client-written capture files
//! SHARED_ROOT/sessions/<uuid>/output/   roi_<idx>.jpg, golden_<idx>.jpg
//! ```
//!
//! The input and output directories exist for the full lifetime of an Active
//! session; destruction is atomic from the registry's point of view (the
//! entry is removed first, the directory is removed best-effort after).
//! A periodic reaper removes idle sessions older than the configured TTL;
//! sessions with in-flight inspections are never reaped.

use crate::error::{AoiError, AppResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    Active,
    Closed,
}

/// One registered session.
pub struct Session {
    pub id: Uuid,
    pub product_id: String,
    pub client_info: Option<String>,
    pub created_at: DateTime<Utc>,
    root: PathBuf,
    in_flight: AtomicUsize,
    last_access: Mutex<DateTime<Utc>>,
}

impl Session {
    pub fn input_dir(&self) -> PathBuf {
        self.root.join("input")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn touch(&self) {
        if let Ok(mut at) = self.last_access.lock() {
            *at = Utc::now();
        }
    }

    fn last_access(&self) -> DateTime<Utc> {
        self.last_access
            .lock()
            .map(|at| *at)
            .unwrap_or(self.created_at)
    }

    fn in_use(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }
}

/// RAII marker for an in-flight inspection; the session cannot be reaped
/// while one exists.
pub struct InspectionGuard {
    session: Arc<Session>,
}

impl InspectionGuard {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for InspectionGuard {
    fn drop(&mut self) {
        self.session.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.session.touch();
    }
}

/// Summary row for the read-only session listing.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub product_id: String,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub in_flight: usize,
}

/// The session registry.
pub struct SessionManager {
    sessions_root: PathBuf,
    ttl: Duration,
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(sessions_root: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            sessions_root: sessions_root.into(),
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a session and its directory pair.
    pub fn create(&self, product_id: &str, client_info: Option<String>) -> AppResult<Arc<Session>> {
        let id = Uuid::new_v4();
        let root = self.sessions_root.join(id.to_string());
        std::fs::create_dir_all(root.join("input"))?;
        std::fs::create_dir_all(root.join("output"))?;

        let session = Arc::new(Session {
            id,
            product_id: product_id.to_string(),
            client_info,
            created_at: Utc::now(),
            root,
            in_flight: AtomicUsize::new(0),
            last_access: Mutex::new(Utc::now()),
        });
        self.write_registry()?.insert(id, session.clone());
        tracing::info!(session = %id, product = product_id, "session created");
        Ok(session)
    }

    /// Looks up an Active session.
    pub fn get(&self, id: Uuid) -> AppResult<Arc<Session>> {
        self.read_registry()?
            .get(&id)
            .cloned()
            .ok_or(AoiError::SessionUnknown(id))
    }

    /// Marks the start of an inspection; the returned guard keeps the
    /// session alive until dropped.
    pub fn begin_inspection(&self, id: Uuid) -> AppResult<InspectionGuard> {
        let session = self.get(id)?;
        session.touch();
        session.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(InspectionGuard { session })
    }

    /// Destroys a session: the registry entry goes first (atomically), the
    /// directory removal is best-effort.
    pub fn destroy(&self, id: Uuid) -> AppResult<()> {
        let session = self
            .write_registry()?
            .remove(&id)
            .ok_or(AoiError::SessionUnknown(id))?;
        if let Err(err) = std::fs::remove_dir_all(session.root()) {
            tracing::warn!(session = %id, error = %err, "session directory removal failed");
        }
        tracing::info!(session = %id, "session destroyed");
        Ok(())
    }

    pub fn list(&self) -> AppResult<Vec<SessionSummary>> {
        let mut rows: Vec<SessionSummary> = self
            .read_registry()?
            .values()
            .map(|s| SessionSummary {
                session_id: s.id,
                product_id: s.product_id.clone(),
                created_at: s.created_at,
                status: SessionStatus::Active,
                in_flight: s.in_flight.load(Ordering::SeqCst),
            })
            .collect();
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }

    pub fn count(&self) -> usize {
        self.read_registry().map(|m| m.len()).unwrap_or(0)
    }

    /// Removes idle sessions past the TTL plus orphaned session directories
    /// left behind by earlier runs. Returns how many were removed.
    pub fn reap_expired(&self) -> usize {
        let now = Utc::now();
        let ttl = match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => ttl,
            Err(_) => return 0,
        };

        let expired: Vec<Uuid> = match self.read_registry() {
            Ok(map) => map
                .values()
                .filter(|s| !s.in_use() && now - s.last_access() > ttl)
                .map(|s| s.id)
                .collect(),
            Err(_) => Vec::new(),
        };

        let mut removed = 0;
        for id in expired {
            match self.destroy(id) {
                Ok(()) => {
                    tracing::info!(session = %id, "reaped expired session");
                    removed += 1;
                }
                Err(err) => tracing::warn!(session = %id, error = %err, "reap failed"),
            }
        }
        removed += self.reap_orphan_dirs();
        removed
    }

    /// Directories under the session root with no registry entry (previous
    /// process lifetime) are removed once older than the TTL by mtime.
    fn reap_orphan_dirs(&self) -> usize {
        let Ok(entries) = std::fs::read_dir(&self.sessions_root) else {
            return 0;
        };
        let known: Vec<Uuid> = self
            .read_registry()
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default();

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(id) = Uuid::parse_str(&name) else {
                continue;
            };
            if known.contains(&id) {
                continue;
            }
            let age_ok = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|mtime| mtime.elapsed().ok())
                .map(|age| age > self.ttl)
                .unwrap_or(false);
            if age_ok {
                match std::fs::remove_dir_all(entry.path()) {
                    Ok(()) => {
                        tracing::info!(session = %id, "reaped orphaned session directory");
                        removed += 1;
                    }
                    Err(err) => {
                        tracing::warn!(session = %id, error = %err, "orphan removal failed")
                    }
                }
            }
        }
        removed
    }

    fn read_registry(
        &self,
    ) -> AppResult<std::sync::RwLockReadGuard<'_, HashMap<Uuid, Arc<Session>>>> {
        self.sessions
            .read()
            .map_err(|_| AoiError::Internal("session registry poisoned".to_string()))
    }

    fn write_registry(
        &self,
    ) -> AppResult<std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Arc<Session>>>> {
        self.sessions
            .write()
            .map_err(|_| AoiError::Internal("session registry poisoned".to_string()))
    }
}

/// Spawns the periodic reaper. Runs once immediately, then on the interval.
pub fn spawn_reaper(
    manager: Arc<SessionManager>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = manager.reap_expired();
            if removed > 0 {
                tracing::info!(removed, "session reaper pass completed");
            }
        }
    })
}
