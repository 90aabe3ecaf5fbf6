//! The delta service: computes compressed binary patches between two image
//! rootfs trees and streams them in 32 KiB chunks, and serves
//! platform-selected manifests for reassembly on the client.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use deltadiff_api::deltadiff::delta_diff_service_server::DeltaDiffService;
use deltadiff_api::deltadiff::{
    CalcImageDiffsRequest, CalculateDeltaDiffsResponse, ManifestRequest, ManifestResponse,
};

use ocidelta::manifest;
use ocidelta::process;
use ocidelta::runtime::{get_or_pull, ContentStore, ImageRecord, Mount, Runtime};
use ocidelta::snapshot::{self, remove_quietly, with_temp_mount};
use ocidelta::{Error, Result};

use crate::config::DeltadConfig;
use crate::patch::{self, PatchLocks};

/// Upper bound on a single streamed delta chunk.
pub const CHUNK_SIZE: usize = 32 * 1024;

pub struct DeltaService<R> {
    runtime: Arc<R>,
    config: DeltadConfig,
    locks: PatchLocks,
}

impl<R: Runtime + 'static> DeltaService<R> {
    pub fn new(runtime: Arc<R>, config: DeltadConfig) -> Self {
        Self {
            runtime,
            config,
            locks: PatchLocks::new(),
        }
    }

    /// Compute and compress the patch for a (base, target) pair. Called with
    /// the per-path lock held; the compressed file appearing at `compressed`
    /// is what unblocks coalesced requests.
    async fn create_patch(
        &self,
        base_ref: &str,
        target_ref: &str,
        compressed: &Path,
    ) -> Result<()> {
        let rt = &*self.runtime;
        let base = get_or_pull(rt.images(), base_ref).await?;
        let target = get_or_pull(rt.images(), target_ref).await?;

        let (mounts_base, base_key) =
            snapshot::view_or_mounts(rt.content(), rt.snapshotter(), &base).await?;
        let result = self
            .create_patch_with_base(&mounts_base, &target, base_ref, target_ref, compressed)
            .await;
        remove_quietly(rt.snapshotter(), &base_key).await;
        result
    }

    async fn create_patch_with_base(
        &self,
        mounts_base: &[Mount],
        target: &ImageRecord,
        base_ref: &str,
        target_ref: &str,
        compressed: &Path,
    ) -> Result<()> {
        let rt = &*self.runtime;
        let (mounts_target, target_key) =
            snapshot::view_or_mounts(rt.content(), rt.snapshotter(), target).await?;
        let result = self
            .run_differ(mounts_base, &mounts_target, base_ref, target_ref, compressed)
            .await;
        remove_quietly(rt.snapshotter(), &target_key).await;
        result
    }

    async fn run_differ(
        &self,
        mounts_base: &[Mount],
        mounts_target: &[Mount],
        base_ref: &str,
        target_ref: &str,
        compressed: &Path,
    ) -> Result<()> {
        let config = &self.config;
        let raw_name = patch::patch_filename(base_ref, target_ref);

        with_temp_mount(mounts_base, |from_root| async move {
            with_temp_mount(mounts_target, |to_root| async move {
                let start = Instant::now();

                let write_batch = format!("--only-write-batch={}", raw_name);
                let block_size = format!("--block-size={}", config.block_size);
                let to_arg = format!("{}/", to_root.display());
                let from_arg = format!("{}/", from_root.display());
                let args = [
                    config.differ_bin.as_str(),
                    "-aH",
                    "-v",
                    "--partial",
                    "--delete",
                    write_batch.as_str(),
                    block_size.as_str(),
                    "--no-i-r",
                    "--one-file-system",
                    to_arg.as_str(),
                    from_arg.as_str(),
                ];
                process::run_capture(&args, Some(&config.patch_dir))
                    .await
                    .map_err(|e| Error::PatchCreationFailed(e.to_string()))?;

                let raw_path = config.patch_dir.join(&raw_name);
                let level = format!("-{}", config.compression_level);
                let out_arg = compressed.display().to_string();
                let in_arg = raw_path.display().to_string();
                let args = [
                    config.compressor_bin.as_str(),
                    "-f",
                    "-q",
                    level.as_str(),
                    "-o",
                    out_arg.as_str(),
                    in_arg.as_str(),
                ];
                process::run_capture(&args, Some(&config.patch_dir))
                    .await
                    .map_err(|e| Error::PatchCreationFailed(e.to_string()))?;

                info!(
                    elapsed = ?start.elapsed(),
                    patch = %compressed.display(),
                    "delta patch created"
                );
                Ok(())
            })
            .await
        })
        .await
    }
}

#[tonic::async_trait]
impl<R: Runtime + 'static> DeltaDiffService for DeltaService<R> {
    type CalculateDeltaDiffsStream =
        ReceiverStream<std::result::Result<CalculateDeltaDiffsResponse, Status>>;

    async fn calculate_delta_diffs(
        &self,
        request: Request<CalcImageDiffsRequest>,
    ) -> std::result::Result<Response<Self::CalculateDeltaDiffsStream>, Status> {
        let request = request.into_inner();
        let base_ref = request.image1.map(|i| i.reference).unwrap_or_default();
        let target_ref = request.image2.map(|i| i.reference).unwrap_or_default();
        info!(base = %base_ref, target = %target_ref, "CalculateDeltaDiffs was called");

        if base_ref.is_empty() || target_ref.is_empty() {
            return Err(Status::invalid_argument("image references are required"));
        }

        let compressed = patch::patch_path(&self.config.patch_dir, &base_ref, &target_ref);
        let lock = self.locks.lock_for(&compressed.display().to_string());
        let guard = lock.lock().await;

        if compressed.exists() {
            // Cache hit: the patch can be streamed without holding the lock.
            drop(guard);
            info!(patch = %compressed.display(), "patch file already exists, streaming");
        } else {
            let result = self.create_patch(&base_ref, &target_ref, &compressed).await;
            drop(guard);
            result.map_err(|e| {
                Status::invalid_argument(format!("creating delta patch: {}", e))
            })?;
        }

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(stream_patch_file(compressed, tx));
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn get_manifest(
        &self,
        request: Request<ManifestRequest>,
    ) -> std::result::Result<Response<ManifestResponse>, Status> {
        let request = request.into_inner();
        let reference = request.image.map(|i| i.reference).unwrap_or_default();
        info!(image = %reference, os = %request.os, arch = %request.arch, "GetManifest was called");

        if reference.is_empty() {
            return Err(Status::invalid_argument("image reference is required"));
        }

        let rt = &*self.runtime;
        let image = get_or_pull(rt.images(), &reference)
            .await
            .map_err(|e| Status::invalid_argument(format!("resolving image: {}", e)))?;

        let manifest =
            manifest::load_platform(rt.content(), &image.target, &request.os, &request.arch)
                .await
                .map_err(|e| Status::invalid_argument(format!("loading manifest: {}", e)))?;

        let config_desc = manifest
            .config_descriptor()
            .map_err(|e| Status::invalid_argument(format!("reading config descriptor: {}", e)))?;
        let image_config = rt
            .content()
            .read_blob(&config_desc.digest)
            .await
            .map_err(|e| Status::invalid_argument(format!("reading image config blob: {}", e)))?;

        let manifest_bytes = manifest
            .to_wire()
            .map_err(|e| Status::invalid_argument(format!("encoding manifest: {}", e)))?;

        Ok(Response::new(ManifestResponse {
            manifest: manifest_bytes,
            image_config,
        }))
    }
}

/// Push a patch file over the stream in chunks, preserving order. A client
/// going away mid-stream stops the read without disturbing the cache.
async fn stream_patch_file(
    path: PathBuf,
    tx: mpsc::Sender<std::result::Result<CalculateDeltaDiffsResponse, Status>>,
) {
    let start = Instant::now();
    let mut file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            let _ = tx
                .send(Err(Status::invalid_argument(format!(
                    "reading delta patch file: {}",
                    e
                ))))
                .await;
            return;
        }
    };

    let mut sent = 0u64;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match file.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                sent += n as u64;
                let chunk = CalculateDeltaDiffsResponse {
                    delta_diff: buf[..n].to_vec(),
                };
                if tx.send(Ok(chunk)).await.is_err() {
                    warn!(patch = %path.display(), "client went away mid-stream");
                    return;
                }
            }
            Err(e) => {
                let _ = tx
                    .send(Err(Status::invalid_argument(format!(
                        "reading delta patch file: {}",
                        e
                    ))))
                    .await;
                return;
            }
        }
    }
    info!(
        bytes = sent,
        elapsed = ?start.elapsed(),
        patch = %path.display(),
        "delta patch streamed"
    );
}
