//! Snapshot gateway: resolve an image's rootfs into mounts and run work
//! against a materialized mountpoint with guaranteed cleanup.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::process;
use crate::runtime::{
    image_chain_id, ContentStore, ImageRecord, ImageService, Mount, SnapshotKind, Snapshotter,
};
use crate::{Error, Result};

/// Prepare a writable snapshot of an image's rootfs under `key`.
///
/// Any stale snapshot under the same key is removed first, and the image is
/// unpacked if it is not already. The caller must eventually remove `key`.
pub async fn prepare_snapshot(
    content: &dyn ContentStore,
    snapshotter: &dyn Snapshotter,
    images: &dyn ImageService,
    image: &ImageRecord,
    key: &str,
) -> Result<Vec<Mount>> {
    ensure_unpacked(images, image).await?;
    remove_stale(snapshotter, key).await?;
    let chain = image_chain_id(content, image).await?;
    snapshotter.prepare(key, &chain.to_string()).await
}

/// Prepare a read-only view of an image's rootfs under `key`, with the same
/// stale-key and unpack handling as [`prepare_snapshot`].
pub async fn view_snapshot(
    content: &dyn ContentStore,
    snapshotter: &dyn Snapshotter,
    images: &dyn ImageService,
    image: &ImageRecord,
    key: &str,
) -> Result<Vec<Mount>> {
    ensure_unpacked(images, image).await?;
    remove_stale(snapshotter, key).await?;
    let chain = image_chain_id(content, image).await?;
    snapshotter.view(key, &chain.to_string()).await
}

/// Mounts of an image's tip snapshot without mutating it.
///
/// An active tip is returned live with an empty cleanup key; otherwise a
/// uniquely named view is created and its key returned for removal. Callers
/// treat an empty key as nothing-to-remove.
pub async fn view_or_mounts(
    content: &dyn ContentStore,
    snapshotter: &dyn Snapshotter,
    image: &ImageRecord,
) -> Result<(Vec<Mount>, String)> {
    let chain = image_chain_id(content, image).await?.to_string();
    let info = snapshotter.stat(&chain).await?;
    if info.kind == SnapshotKind::Active {
        Ok((snapshotter.mounts(&chain).await?, String::new()))
    } else {
        let key = format!("{}-view-{}", chain, unix_nanos());
        let mounts = snapshotter.view(&key, &chain).await?;
        Ok((mounts, key))
    }
}

/// Remove a snapshot, swallowing not-found and logging any other failure.
/// An empty key means there is nothing to remove.
pub async fn remove_quietly(snapshotter: &dyn Snapshotter, key: &str) {
    if key.is_empty() {
        return;
    }
    match snapshotter.remove(key).await {
        Ok(()) => debug!(key, "removed snapshot"),
        Err(Error::NotFound(_)) => {}
        Err(e) => warn!(key, error = %e, "failed to remove snapshot"),
    }
}

/// Run `body` against a directory holding the given mounts.
///
/// A single bind mount runs directly on its source directory. Other mount
/// types are materialized into a temporary directory with the system mount
/// tool and unmounted again when the guard drops, on success, error, or
/// panic; an unmount failure is logged and never masks the body's outcome.
pub async fn with_temp_mount<F, Fut, T>(mounts: &[Mount], body: F) -> Result<T>
where
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mount = match mounts {
        [mount] => mount,
        other => {
            return Err(Error::MountFailed(format!(
                "expected exactly one mount, got {}",
                other.len()
            )))
        }
    };

    if mount.fstype == "bind" {
        return body(mount.source.clone()).await;
    }

    let mut guard = TempMount::new()?;
    let source = mount.source.display().to_string();
    let target = guard.path().display().to_string();
    let mut args = vec!["mount", "-t", mount.fstype.as_str()];
    let options = mount.options.join(",");
    if !options.is_empty() {
        args.extend(["-o", options.as_str()]);
    }
    args.extend([source.as_str(), target.as_str()]);
    process::run_capture(&args, None)
        .await
        .map_err(|e| Error::MountFailed(e.to_string()))?;
    guard.mounted = true;

    body(guard.path().to_path_buf()).await
}

struct TempMount {
    dir: tempfile::TempDir,
    mounted: bool,
}

impl TempMount {
    fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
            mounted: false,
        })
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Drop for TempMount {
    fn drop(&mut self) {
        if !self.mounted {
            return;
        }
        let status = std::process::Command::new("umount")
            .arg(self.dir.path())
            .status();
        match status {
            Ok(status) if status.success() => {}
            Ok(status) => warn!(path = %self.dir.path().display(), %status, "umount failed"),
            Err(e) => warn!(path = %self.dir.path().display(), error = %e, "could not run umount"),
        }
    }
}

async fn ensure_unpacked(images: &dyn ImageService, image: &ImageRecord) -> Result<()> {
    if !images.is_unpacked(&image.name).await? {
        images.unpack(&image.name).await?;
    }
    Ok(())
}

async fn remove_stale(snapshotter: &dyn Snapshotter, key: &str) -> Result<()> {
    match snapshotter.remove(key).await {
        Ok(()) => {
            debug!(key, "removed stale snapshot");
            Ok(())
        }
        Err(Error::NotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_mounts_run_on_their_source() {
        let dir = tempfile::tempdir().unwrap();
        let mounts = vec![Mount {
            fstype: "bind".to_string(),
            source: dir.path().to_path_buf(),
            options: vec![],
        }];
        let seen = with_temp_mount(&mounts, |root| async move { Ok(root) })
            .await
            .unwrap();
        assert_eq!(seen, dir.path());
    }

    #[tokio::test]
    async fn multiple_mounts_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mount = Mount {
            fstype: "bind".to_string(),
            source: dir.path().to_path_buf(),
            options: vec![],
        };
        let err = with_temp_mount(&[mount.clone(), mount], |_| async move { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MountFailed(_)));
    }

    #[tokio::test]
    async fn body_errors_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let mounts = vec![Mount {
            fstype: "bind".to_string(),
            source: dir.path().to_path_buf(),
            options: vec![],
        }];
        let err = with_temp_mount(&mounts, |_| async move {
            Err::<(), _>(Error::PatchApplyFailed("boom".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::PatchApplyFailed(_)));
    }
}
