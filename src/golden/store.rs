//! Persistent per-product per-ROI golden sample directories.
//!
//! Layout: `PRODUCTS_ROOT/<product>/golden_rois/roi_<idx>/` containing
//!
//! - `best_golden.jpg`: the designated best reference (exactly one after
//!   any successful update),
//! - `<ts>_golden_sample.jpg`: zero or more alternate candidates,
//! - `original_<ts>_old_best.jpg`: zero or more backups of former bests.
//!
//! All mutations on one `(product, idx)` directory are serialized through a
//! per-directory async mutex; reads are not blocked by other reads and
//! observe a consistent point-in-time set. The promotion rename sequence is
//! two-phase so that a failure at any step leaves the pre-promotion
//! `best_golden.jpg` intact.

use crate::error::{AoiError, AppResult};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Mutex as AsyncMutex;

/// Filename of the designated best reference.
pub const BEST_NAME: &str = "best_golden.jpg";

const ALTERNATE_SUFFIX: &str = "_golden_sample.jpg";
const BACKUP_PREFIX: &str = "original_";
const BACKUP_SUFFIX: &str = "_old_best.jpg";
const PROMOTING_SUFFIX: &str = ".promoting";

/// Role a file plays inside a golden directory, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleRole {
    Best,
    Alternate,
    Backup,
}

impl SampleRole {
    fn classify(name: &str) -> Option<Self> {
        if name == BEST_NAME {
            Some(Self::Best)
        } else if name.starts_with(BACKUP_PREFIX) && name.ends_with(BACKUP_SUFFIX) {
            Some(Self::Backup)
        } else if name.ends_with(ALTERNATE_SUFFIX) {
            Some(Self::Alternate)
        } else {
            // Temp files from interrupted promotions and foreign files are
            // invisible to the store.
            None
        }
    }
}

/// One file of a golden directory.
#[derive(Debug, Clone)]
pub struct GoldenSample {
    pub name: String,
    pub role: SampleRole,
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size: u64,
}

/// The store mediating all golden directory access.
pub struct GoldenStore {
    products_root: PathBuf,
    locks: std::sync::Mutex<HashMap<(String, u32), Arc<AsyncMutex<()>>>>,
}

impl GoldenStore {
    pub fn new(products_root: impl Into<PathBuf>) -> Self {
        Self {
            products_root: products_root.into(),
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Directory of one ROI's golden library.
    pub fn roi_dir(&self, product_id: &str, idx: u32) -> PathBuf {
        self.products_root
            .join(product_id)
            .join("golden_rois")
            .join(format!("roi_{idx}"))
    }

    /// The per-`(product, idx)` mutex serializing mutations.
    pub fn lock_for(&self, product_id: &str, idx: u32) -> Arc<AsyncMutex<()>> {
        let key = (product_id.to_string(), idx);
        match self.locks.lock() {
            Ok(mut map) => map.entry(key).or_default().clone(),
            // A poisoned registry only ever holds Arc handles; recover the
            // entry rather than taking the whole store down.
            Err(poisoned) => poisoned.into_inner().entry(key).or_default().clone(),
        }
    }

    /// Lists a golden directory: best first, then alternates by modification
    /// time ascending (name as tiebreak), then backups.
    pub fn list(&self, product_id: &str, idx: u32) -> AppResult<Vec<GoldenSample>> {
        let dir = self.roi_dir(product_id, idx);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut samples = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(role) = SampleRole::classify(&name) else {
                continue;
            };
            let metadata = entry.metadata()?;
            samples.push(GoldenSample {
                role,
                path: dir.join(&name),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                size: metadata.len(),
                name,
            });
        }
        samples.sort_by(|a, b| {
            rank(a.role)
                .cmp(&rank(b.role))
                .then(a.modified.cmp(&b.modified))
                .then(a.name.cmp(&b.name))
        });
        Ok(samples)
    }

    /// The matcher's candidate set: the best plus the alternates, in match
    /// order. Backups are never candidates.
    pub fn candidates(&self, product_id: &str, idx: u32) -> AppResult<Vec<GoldenSample>> {
        Ok(self
            .list(product_id, idx)?
            .into_iter()
            .filter(|s| s.role != SampleRole::Backup)
            .collect())
    }

    /// Products under the root that carry at least one golden directory.
    pub fn list_products(&self) -> AppResult<Vec<String>> {
        let mut products = Vec::new();
        if !self.products_root.is_dir() {
            return Ok(products);
        }
        for entry in std::fs::read_dir(&self.products_root)? {
            let entry = entry?;
            if entry.path().join("golden_rois").is_dir() {
                products.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        products.sort();
        Ok(products)
    }

    /// ROI indices of a product that have golden directories.
    pub fn list_rois(&self, product_id: &str) -> AppResult<Vec<u32>> {
        let root = self.products_root.join(product_id).join("golden_rois");
        let mut indices = Vec::new();
        if !root.is_dir() {
            return Ok(indices);
        }
        for entry in std::fs::read_dir(&root)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some(idx) = name.strip_prefix("roi_").and_then(|s| s.parse().ok()) {
                indices.push(idx);
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    /// Reads one sample's bytes.
    pub async fn read_sample(&self, product_id: &str, idx: u32, name: &str) -> AppResult<Vec<u8>> {
        let sample = self.find(product_id, idx, name)?;
        Ok(std::fs::read(sample.path)?)
    }

    /// Adds a sample. `as_best` replaces the current best (backing it up
    /// first); otherwise the upload becomes a timestamped alternate.
    /// Returns the stored filename.
    pub async fn upload(
        &self,
        product_id: &str,
        idx: u32,
        bytes: &[u8],
        as_best: bool,
    ) -> AppResult<String> {
        let lock = self.lock_for(product_id, idx);
        let _guard = lock.lock().await;
        let dir = self.roi_dir(product_id, idx);
        std::fs::create_dir_all(&dir)?;

        if as_best {
            let best = dir.join(BEST_NAME);
            if best.is_file() {
                let backup = dir.join(unique_backup_name(&dir));
                std::fs::rename(&best, &backup)?;
            }
            write_atomic(&dir, BEST_NAME, bytes)?;
            Ok(BEST_NAME.to_string())
        } else {
            let name = unique_alternate_name(&dir);
            write_atomic(&dir, &name, bytes)?;
            Ok(name)
        }
    }

    /// Promotes a named alternate to best, backing up the displaced best.
    pub async fn promote(&self, product_id: &str, idx: u32, name: &str) -> AppResult<()> {
        let lock = self.lock_for(product_id, idx);
        let _guard = lock.lock().await;
        let sample = self.find(product_id, idx, name)?;
        if sample.role != SampleRole::Alternate {
            return Err(AoiError::GoldenStore(format!(
                "'{name}' is not an alternate candidate"
            )));
        }
        let dir = self.roi_dir(product_id, idx);
        self.promote_locked(&dir, name)?;
        Ok(())
    }

    /// Restores a named backup into the best slot, backing up the displaced
    /// best. This is the only way a former best comes back.
    pub async fn restore(&self, product_id: &str, idx: u32, name: &str) -> AppResult<()> {
        let lock = self.lock_for(product_id, idx);
        let _guard = lock.lock().await;
        let sample = self.find(product_id, idx, name)?;
        if sample.role != SampleRole::Backup {
            return Err(AoiError::GoldenStore(format!("'{name}' is not a backup")));
        }
        let dir = self.roi_dir(product_id, idx);
        self.promote_locked(&dir, name)?;
        Ok(())
    }

    /// Deletes a named alternate or backup. The best and the last remaining
    /// file are protected.
    pub async fn delete(&self, product_id: &str, idx: u32, name: &str) -> AppResult<()> {
        let lock = self.lock_for(product_id, idx);
        let _guard = lock.lock().await;
        let samples = self.list(product_id, idx)?;
        let sample = samples
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| AoiError::GoldenNotFound(format!("{product_id}/roi_{idx}/{name}")))?;
        if sample.role == SampleRole::Best {
            return Err(AoiError::GoldenStore(
                "refusing to delete best_golden.jpg; promote or restore a replacement instead"
                    .to_string(),
            ));
        }
        if samples.len() == 1 {
            return Err(AoiError::GoldenStore(
                "refusing to delete the last remaining golden file".to_string(),
            ));
        }
        std::fs::remove_file(&sample.path)?;
        Ok(())
    }

    /// Two-phase promotion of `candidate_name` into the best slot. Must be
    /// called with the directory mutex held. On any failure the previous
    /// `best_golden.jpg` is left (or put back) in place.
    pub(crate) fn promote_locked(&self, dir: &Path, candidate_name: &str) -> AppResult<PathBuf> {
        let candidate = dir.join(candidate_name);
        let best = dir.join(BEST_NAME);
        let temp = dir.join(format!("{candidate_name}{PROMOTING_SUFFIX}"));

        // Phase 1: move the incoming candidate aside under a temp name that
        // the store does not classify, so an interrupted promotion never
        // yields two best-class files.
        std::fs::rename(&candidate, &temp)
            .map_err(|err| AoiError::PromotionFailed(format!("stage candidate: {err}")))?;

        // Phase 2a: back up the current best.
        let backup = dir.join(unique_backup_name(dir));
        if best.is_file() {
            if let Err(err) = std::fs::rename(&best, &backup) {
                let _ = std::fs::rename(&temp, &candidate);
                return Err(AoiError::PromotionFailed(format!("backup best: {err}")));
            }
        }

        // Phase 2b: land the candidate in the best slot.
        if let Err(err) = std::fs::rename(&temp, &best) {
            // Roll back so the pre-promotion best survives.
            let _ = std::fs::rename(&backup, &best);
            let _ = std::fs::rename(&temp, &candidate);
            return Err(AoiError::PromotionFailed(format!("land candidate: {err}")));
        }

        tracing::info!(
            candidate = candidate_name,
            backup = %backup.display(),
            "golden promotion completed"
        );
        Ok(best)
    }

    fn find(&self, product_id: &str, idx: u32, name: &str) -> AppResult<GoldenSample> {
        self.list(product_id, idx)?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| AoiError::GoldenNotFound(format!("{product_id}/roi_{idx}/{name}")))
    }
}

fn rank(role: SampleRole) -> u8 {
    match role {
        SampleRole::Best => 0,
        SampleRole::Alternate => 1,
        SampleRole::Backup => 2,
    }
}

fn unique_backup_name(dir: &Path) -> String {
    let mut ts = chrono::Utc::now().timestamp();
    loop {
        let name = format!("{BACKUP_PREFIX}{ts}{BACKUP_SUFFIX}");
        if !dir.join(&name).exists() {
            return name;
        }
        ts += 1;
    }
}

fn unique_alternate_name(dir: &Path) -> String {
    let mut ts = chrono::Utc::now().timestamp();
    loop {
        let name = format!("{ts}{ALTERNATE_SUFFIX}");
        if !dir.join(&name).exists() {
            return name;
        }
        ts += 1;
    }
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> AppResult<()> {
    let temp = dir.join(format!(".upload_{name}"));
    std::fs::write(&temp, bytes)?;
    std::fs::rename(&temp, dir.join(name))?;
    Ok(())
}
