//! Path projection between the server-local shared tree and the client mount.
//!
//! The server reads and writes `shared_root`-relative paths using its own
//! absolute prefix; every path that leaves the server in a response is
//! rewritten to the configured client mount prefix. The projection is a pure
//! string replacement at the boundary: symlinks are never resolved, and paths
//! outside the shared tree pass through unchanged.

use std::path::Path;

/// Rewrites server-local paths to client-visible ones.
#[derive(Debug, Clone)]
pub struct PathProjector {
    shared_root: String,
    client_prefix: String,
}

impl PathProjector {
    pub fn new(shared_root: &Path, client_prefix: &str) -> Self {
        Self {
            shared_root: shared_root.to_string_lossy().into_owned(),
            client_prefix: client_prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Projects one path. `SHARED_ROOT/<rest>` becomes
    /// `CLIENT_MOUNT_PREFIX/<rest>` character-for-character; anything else is
    /// returned verbatim.
    pub fn project(&self, path: &Path) -> String {
        let raw = path.to_string_lossy();
        match raw.strip_prefix(&self.shared_root) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => {
                format!("{}{}", self.client_prefix, rest)
            }
            _ => raw.into_owned(),
        }
    }
}
