//! Client-side patch application: decompress the received delta, replay it
//! onto a writable copy of the base rootfs, and synthesize the absolute
//! layer describing the patched tree.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::info;

use crate::manifest::CONTENT_REF;
use crate::models::{self, Descriptor};
use crate::process;
use crate::runtime::{get_or_pull, DiffService, ImageService, Mount, Runtime};
use crate::snapshot::{self, remove_quietly, with_temp_mount};
use crate::{Error, Result};

/// Reference of the image whose rootfs is empty, the pivot for absolute
/// layer synthesis. Any image with an empty rootfs works here.
pub const EMPTY_IMAGE_REF: &str = "docker.io/jprotogtwi/blank-canvas:latest";

/// Tunables for the patch application pipeline.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub differ_bin: String,
    pub compressor_bin: String,
    pub empty_image_ref: String,
    /// Content-store reference label for the synthesized layer.
    pub layer_ref: String,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            differ_bin: "rsync".to_string(),
            compressor_bin: "zstd".to_string(),
            empty_image_ref: EMPTY_IMAGE_REF.to_string(),
            layer_ref: CONTENT_REF.to_string(),
        }
    }
}

/// Decompress a received `.zst` patch next to itself, returning the raw
/// patch path.
pub async fn decompress_patch(opts: &ApplyOptions, compressed: &Path) -> Result<PathBuf> {
    let compressed_str = compressed.display().to_string();
    let raw = compressed_str
        .strip_suffix(".zst")
        .map(PathBuf::from)
        .ok_or_else(|| {
            Error::PatchApplyFailed(format!("patch file {} has no .zst suffix", compressed_str))
        })?;

    let args = [
        opts.compressor_bin.as_str(),
        "-d",
        "-f",
        "-q",
        compressed_str.as_str(),
    ];
    process::run_capture(&args, None)
        .await
        .map_err(|e| Error::PatchApplyFailed(e.to_string()))?;

    if !raw.exists() {
        return Err(Error::PatchApplyFailed(format!(
            "decompressed patch {} is missing",
            raw.display()
        )));
    }
    Ok(raw)
}

/// Replay a raw patch onto a writable snapshot of the base image and return
/// the descriptor of the absolute layer describing the patched rootfs.
pub async fn apply_patch(
    rt: &dyn Runtime,
    base_ref: &str,
    patch: &Path,
    opts: &ApplyOptions,
) -> Result<Descriptor> {
    let base = rt.images().get(base_ref).await?;
    let mounts_from =
        snapshot::prepare_snapshot(rt.content(), rt.snapshotter(), rt.images(), &base, "from")
            .await?;
    let result = patch_and_diff(rt, &mounts_from, patch, opts).await;
    remove_quietly(rt.snapshotter(), "from").await;
    result
}

async fn patch_and_diff(
    rt: &dyn Runtime,
    mounts_from: &[Mount],
    patch: &Path,
    opts: &ApplyOptions,
) -> Result<Descriptor> {
    with_temp_mount(mounts_from, |from_root| async move {
        let start = Instant::now();
        let read_batch = format!("--read-batch={}", patch.display());
        let root_arg = format!("{}/", from_root.display());
        let args = [
            opts.differ_bin.as_str(),
            "-aH",
            "-v",
            "--partial",
            "--delete",
            read_batch.as_str(),
            "--checksum",
            "--no-i-r",
            "--one-file-system",
            root_arg.as_str(),
        ];
        process::run_capture(&args, None)
            .await
            .map_err(|e| Error::PatchApplyFailed(e.to_string()))?;
        info!(elapsed = ?start.elapsed(), root = %from_root.display(), "delta patch applied");

        // The diff against an empty rootfs is an absolute layer describing
        // the whole patched tree, decoupled from the base's layer chain.
        let empty = get_or_pull(rt.images(), &opts.empty_image_ref).await?;
        let mounts_empty = snapshot::view_snapshot(
            rt.content(),
            rt.snapshotter(),
            rt.images(),
            &empty,
            "empty",
        )
        .await?;

        let start = Instant::now();
        let layer = rt
            .differ()
            .compare(
                &mounts_empty,
                mounts_from,
                models::MEDIA_TYPE_OCI_LAYER_GZIP,
                &opts.layer_ref,
            )
            .await;
        remove_quietly(rt.snapshotter(), "empty").await;
        let layer = layer?;
        info!(elapsed = ?start.elapsed(), digest = %layer.digest, size = layer.size, "absolute layer created");
        Ok(layer)
    })
    .await
}
