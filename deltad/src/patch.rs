use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ocidelta::image_reference::basename;

/// Per-patch-path locks coalescing concurrent computations of the same
/// (base, target) pair: at most one task runs the compute path, the rest
/// block and then fall through the cache. Entries are inserted once and
/// never evicted; the map is bounded by the set of image-pair basenames
/// ever requested.
#[derive(Debug, Default)]
pub struct PatchLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PatchLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding a patch path, inserting it on first use.
    pub fn lock_for(&self, path: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().expect("patch lock map poisoned");
        map.entry(path.to_string()).or_default().clone()
    }
}

/// Name of the raw (uncompressed) patch for a base/target pair, derived
/// from the reference basenames.
pub fn patch_filename(base_ref: &str, target_ref: &str) -> String {
    format!(
        "delta-patch-from-{}-to-{}",
        basename(base_ref),
        basename(target_ref)
    )
}

/// Path of the compressed patch file, which doubles as the cache key.
pub fn patch_path(dir: &Path, base_ref: &str, target_ref: &str) -> PathBuf {
    dir.join(format!("{}.zst", patch_filename(base_ref, target_ref)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_path_uses_reference_basenames() {
        let path = patch_path(
            Path::new("/tmp"),
            "docker.io/library/alpine:3.15.10",
            "docker.io/library/alpine:latest",
        );
        assert_eq!(
            path,
            Path::new("/tmp/delta-patch-from-alpine:3.15.10-to-alpine:latest.zst")
        );
    }

    #[test]
    fn same_path_shares_one_lock() {
        let locks = PatchLocks::new();
        let a = locks.lock_for("/tmp/p.zst");
        let b = locks.lock_for("/tmp/p.zst");
        let c = locks.lock_for("/tmp/other.zst");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
