//! Contracts the delta pipeline consumes from the container runtime:
//! content-addressed blob storage, snapshots, image records, and layer
//! diffing. `local` provides a directory-backed implementation of all four;
//! `registry` pulls images from an OCI registry into a content store.

pub mod local;
pub mod registry;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::digest::OciDigest;
use crate::manifest;
use crate::models::{Descriptor, Rootfs};
use crate::{Error, Result};

/// Metadata the content store keeps next to a blob.
#[derive(Debug, Clone)]
pub struct BlobInfo {
    pub digest: OciDigest,
    pub size: u64,
    pub labels: BTreeMap<String, String>,
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Read a blob by digest. Fails with `NotFound` when absent.
    async fn read_blob(&self, digest: &OciDigest) -> Result<Vec<u8>>;

    /// Write a blob under a reference label. Writes are idempotent per
    /// digest; labels are merged into any the blob already carries.
    async fn write_blob(
        &self,
        reference: &str,
        data: &[u8],
        desc: &Descriptor,
        labels: BTreeMap<String, String>,
    ) -> Result<()>;

    async fn info(&self, digest: &OciDigest) -> Result<BlobInfo>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotKind {
    View,
    Active,
    Committed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub name: String,
    pub parent: Option<String>,
    pub kind: SnapshotKind,
}

/// A runtime mount descriptor, materialized into a filesystem path by the
/// snapshot gateway.
#[derive(Debug, Clone)]
pub struct Mount {
    pub fstype: String,
    pub source: PathBuf,
    pub options: Vec<String>,
}

#[async_trait]
pub trait Snapshotter: Send + Sync {
    async fn stat(&self, key: &str) -> Result<SnapshotInfo>;

    /// Create a writable snapshot on top of `parent` (a chain-ID, or empty
    /// for no parent).
    async fn prepare(&self, key: &str, parent: &str) -> Result<Vec<Mount>>;

    /// Create a read-only snapshot on top of `parent`.
    async fn view(&self, key: &str, parent: &str) -> Result<Vec<Mount>>;

    async fn mounts(&self, key: &str) -> Result<Vec<Mount>>;

    async fn remove(&self, key: &str) -> Result<()>;
}

/// An image registered with the image service: a name bound to the
/// descriptor of its manifest (or manifest list).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub name: String,
    pub target: Descriptor,
}

#[async_trait]
pub trait ImageService: Send + Sync {
    async fn get(&self, name: &str) -> Result<ImageRecord>;

    async fn list(&self) -> Result<Vec<ImageRecord>>;

    /// Register an image. Re-registering a name replaces its target.
    async fn create(&self, image: ImageRecord) -> Result<ImageRecord>;

    /// Pull an image from its registry and unpack it.
    async fn pull(&self, reference: &str) -> Result<ImageRecord>;

    async fn is_unpacked(&self, name: &str) -> Result<bool>;

    /// Materialize the image's layer chain as committed snapshots.
    async fn unpack(&self, name: &str) -> Result<()>;
}

#[async_trait]
pub trait DiffService: Send + Sync {
    /// Write the difference between two mounted trees to the content store
    /// as a layer blob labelled with its uncompressed digest, and return its
    /// descriptor.
    async fn compare(
        &self,
        lower: &[Mount],
        upper: &[Mount],
        media_type: &str,
        reference: &str,
    ) -> Result<Descriptor>;
}

/// The runtime collaborators a pipeline step needs, bundled.
pub trait Runtime: Send + Sync {
    fn content(&self) -> &dyn ContentStore;
    fn snapshotter(&self) -> &dyn Snapshotter;
    fn images(&self) -> &dyn ImageService;
    fn differ(&self) -> &dyn DiffService;
}

#[derive(Deserialize)]
struct ConfigRootfs {
    rootfs: Rootfs,
}

/// Ordered rootfs diff-IDs of an image, resolved through its manifest and
/// config for the current platform.
pub async fn rootfs_diff_ids(
    content: &dyn ContentStore,
    image: &ImageRecord,
) -> Result<Vec<OciDigest>> {
    let manifest = manifest::load_platform(
        content,
        &image.target,
        std::env::consts::OS,
        std::env::consts::ARCH,
    )
    .await?;
    let config_desc = manifest.config_descriptor()?;
    let data = content.read_blob(&config_desc.digest).await?;
    let config: ConfigRootfs =
        serde_json::from_slice(&data).map_err(|e| Error::Malformed(e.to_string()))?;
    Ok(config.rootfs.diff_ids)
}

/// The chain-ID keying an image's fully unpacked snapshot.
pub async fn image_chain_id(
    content: &dyn ContentStore,
    image: &ImageRecord,
) -> Result<OciDigest> {
    let diff_ids = rootfs_diff_ids(content, image).await?;
    crate::digest::chain_id(&diff_ids)
        .ok_or_else(|| Error::Malformed(format!("image {} has no layers", image.name)))
}

/// Fetch an image from the local store, pulling it when absent.
pub async fn get_or_pull(images: &dyn ImageService, reference: &str) -> Result<ImageRecord> {
    match images.get(reference).await {
        Ok(image) => Ok(image),
        Err(Error::NotFound(_)) => {
            info!(reference, "image not found locally, pulling");
            images.pull(reference).await
        }
        Err(e) => Err(e),
    }
}
