//! Directory-backed runtime: content-addressed blobs with label sidecars,
//! image records in a single JSON registry, and plain-directory snapshots
//! mounted as binds. Layer blobs are `tar+gzip`; the diff service computes
//! the uncompressed diff-ID and the compressed digest in one streaming pass.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};

use crate::digest::{chain_id, OciDigest};
use crate::manifest;
use crate::models::{self, Descriptor};
use crate::runtime::registry::RegistryClient;
use crate::runtime::{
    BlobInfo, ContentStore, DiffService, ImageRecord, ImageService, Mount, Runtime, SnapshotInfo,
    SnapshotKind, Snapshotter,
};
use crate::{Error, Result};

pub struct LocalRuntime {
    root: PathBuf,
    // Guards read-modify-write cycles on images.json
    images_lock: Mutex<()>,
}

impl LocalRuntime {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("blobs"))?;
        fs::create_dir_all(root.join("labels"))?;
        fs::create_dir_all(root.join("snapshots"))?;
        Ok(Self {
            root,
            images_lock: Mutex::new(()),
        })
    }

    fn blob_path(&self, digest: &OciDigest) -> PathBuf {
        self.root.join("blobs").join(digest.to_string())
    }

    fn label_path(&self, digest: &OciDigest) -> PathBuf {
        self.root.join("labels").join(format!("{}.json", digest))
    }

    fn images_path(&self) -> PathBuf {
        self.root.join("images.json")
    }

    fn snapshot_dir(&self, key: &str) -> PathBuf {
        self.root.join("snapshots").join(escape_key(key))
    }

    fn read_labels(&self, digest: &OciDigest) -> Result<BTreeMap<String, String>> {
        let path = self.label_path(digest);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }

    fn read_images(&self) -> Result<BTreeMap<String, Descriptor>> {
        let path = self.images_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }

    fn write_images(&self, records: &BTreeMap<String, Descriptor>) -> Result<()> {
        fs::write(self.images_path(), serde_json::to_vec(records)?)?;
        Ok(())
    }

    fn new_snapshot(&self, key: &str, parent: &str, kind: SnapshotKind) -> Result<Vec<Mount>> {
        if key.is_empty() {
            return Err(Error::SnapshotFailed("snapshot key is empty".to_string()));
        }
        let dir = self.snapshot_dir(key);
        if dir.exists() {
            return Err(Error::SnapshotFailed(format!(
                "snapshot {} already exists",
                key
            )));
        }
        let fs_dir = dir.join("fs");
        fs::create_dir_all(&fs_dir)?;

        if !parent.is_empty() {
            let parent_fs = self.snapshot_dir(parent).join("fs");
            if !parent_fs.exists() {
                let _ = fs::remove_dir_all(&dir);
                return Err(Error::SnapshotFailed(format!(
                    "parent snapshot {} does not exist",
                    parent
                )));
            }
            copy_tree(&parent_fs, &fs_dir)?;
        }

        let info = SnapshotInfo {
            name: key.to_string(),
            parent: (!parent.is_empty()).then(|| parent.to_string()),
            kind,
        };
        fs::write(dir.join("info.json"), serde_json::to_vec(&info)?)?;
        Ok(vec![snapshot_mount(fs_dir, kind)])
    }

    fn unpack_layers(&self, image: &ImageRecord, layers: &[Descriptor], diff_ids: &[OciDigest]) -> Result<()> {
        if layers.len() != diff_ids.len() {
            return Err(Error::Malformed(format!(
                "image {}: {} layers but {} diff-IDs",
                image.name,
                layers.len(),
                diff_ids.len()
            )));
        }

        let mut parent: Option<String> = None;
        for (i, layer) in layers.iter().enumerate() {
            let chain = chain_id(&diff_ids[..=i])
                .ok_or_else(|| Error::Malformed(format!("image {} has no layers", image.name)))?
                .to_string();
            let dir = self.snapshot_dir(&chain);
            if dir.join("info.json").exists() {
                parent = Some(chain);
                continue;
            }

            let fs_dir = dir.join("fs");
            fs::create_dir_all(&fs_dir)?;
            if let Some(parent_key) = &parent {
                copy_tree(&self.snapshot_dir(parent_key).join("fs"), &fs_dir)?;
            }

            let data = fs::read(self.blob_path(&layer.digest))
                .map_err(|_| Error::NotFound(format!("layer blob {}", layer.digest)))?;
            apply_layer(&data, &layer.media_type, &fs_dir)?;

            let info = SnapshotInfo {
                name: chain.clone(),
                parent: parent.clone(),
                kind: SnapshotKind::Committed,
            };
            fs::write(dir.join("info.json"), serde_json::to_vec(&info)?)?;
            parent = Some(chain);
        }
        Ok(())
    }
}

impl Runtime for LocalRuntime {
    fn content(&self) -> &dyn ContentStore {
        self
    }

    fn snapshotter(&self) -> &dyn Snapshotter {
        self
    }

    fn images(&self) -> &dyn ImageService {
        self
    }

    fn differ(&self) -> &dyn DiffService {
        self
    }
}

#[async_trait]
impl ContentStore for LocalRuntime {
    async fn read_blob(&self, digest: &OciDigest) -> Result<Vec<u8>> {
        let path = self.blob_path(digest);
        if !path.exists() {
            return Err(Error::NotFound(format!("blob {}", digest)));
        }
        Ok(fs::read(path)?)
    }

    async fn write_blob(
        &self,
        _reference: &str,
        data: &[u8],
        desc: &Descriptor,
        labels: BTreeMap<String, String>,
    ) -> Result<()> {
        let computed = OciDigest::from_bytes(data);
        if computed != desc.digest {
            return Err(Error::Malformed(format!(
                "blob digest mismatch: declared {}, computed {}",
                desc.digest, computed
            )));
        }
        fs::write(self.blob_path(&desc.digest), data)?;

        let mut merged = self.read_labels(&desc.digest)?;
        merged.extend(labels);
        fs::write(self.label_path(&desc.digest), serde_json::to_vec(&merged)?)?;
        Ok(())
    }

    async fn info(&self, digest: &OciDigest) -> Result<BlobInfo> {
        let meta = fs::metadata(self.blob_path(digest))
            .map_err(|_| Error::NotFound(format!("blob {}", digest)))?;
        Ok(BlobInfo {
            digest: digest.clone(),
            size: meta.len(),
            labels: self.read_labels(digest)?,
        })
    }
}

#[async_trait]
impl Snapshotter for LocalRuntime {
    async fn stat(&self, key: &str) -> Result<SnapshotInfo> {
        let path = self.snapshot_dir(key).join("info.json");
        if !path.exists() {
            return Err(Error::NotFound(format!("snapshot {}", key)));
        }
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }

    async fn prepare(&self, key: &str, parent: &str) -> Result<Vec<Mount>> {
        self.new_snapshot(key, parent, SnapshotKind::Active)
    }

    async fn view(&self, key: &str, parent: &str) -> Result<Vec<Mount>> {
        self.new_snapshot(key, parent, SnapshotKind::View)
    }

    async fn mounts(&self, key: &str) -> Result<Vec<Mount>> {
        let info = self.stat(key).await?;
        Ok(vec![snapshot_mount(
            self.snapshot_dir(key).join("fs"),
            info.kind,
        )])
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let dir = self.snapshot_dir(key);
        if !dir.exists() {
            return Err(Error::NotFound(format!("snapshot {}", key)));
        }
        fs::remove_dir_all(dir)?;
        Ok(())
    }
}

#[async_trait]
impl ImageService for LocalRuntime {
    async fn get(&self, name: &str) -> Result<ImageRecord> {
        let _guard = self.images_lock.lock().expect("image registry lock poisoned");
        let records = self.read_images()?;
        let target = records
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("image {}", name)))?;
        Ok(ImageRecord {
            name: name.to_string(),
            target,
        })
    }

    async fn list(&self) -> Result<Vec<ImageRecord>> {
        let _guard = self.images_lock.lock().expect("image registry lock poisoned");
        let records = self.read_images()?;
        Ok(records
            .into_iter()
            .map(|(name, target)| ImageRecord { name, target })
            .collect())
    }

    async fn create(&self, image: ImageRecord) -> Result<ImageRecord> {
        let _guard = self.images_lock.lock().expect("image registry lock poisoned");
        let mut records = self.read_images()?;
        records.insert(image.name.clone(), image.target.clone());
        self.write_images(&records)?;
        Ok(image)
    }

    async fn pull(&self, reference: &str) -> Result<ImageRecord> {
        let target = RegistryClient::new().pull(self, reference).await?;
        let record = self
            .create(ImageRecord {
                name: reference.to_string(),
                target,
            })
            .await?;
        self.unpack(&record.name).await?;
        Ok(record)
    }

    async fn is_unpacked(&self, name: &str) -> Result<bool> {
        let image = self.get(name).await?;
        let chain = super::image_chain_id(self, &image).await?;
        Ok(self.stat(&chain.to_string()).await.is_ok())
    }

    async fn unpack(&self, name: &str) -> Result<()> {
        let image = self.get(name).await?;
        let manifest = manifest::load_platform(
            self,
            &image.target,
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
        .await?;
        let layers = manifest.layers()?;
        let diff_ids = super::rootfs_diff_ids(self, &image).await?;
        self.unpack_layers(&image, &layers, &diff_ids)
    }
}

#[async_trait]
impl DiffService for LocalRuntime {
    async fn compare(
        &self,
        lower: &[Mount],
        upper: &[Mount],
        media_type: &str,
        reference: &str,
    ) -> Result<Descriptor> {
        let lower_dir = bind_source(lower)?;
        let upper_dir = bind_source(upper)?;

        let mut compressed = Vec::new();
        let diff_id = {
            let encoder = GzEncoder::new(&mut compressed, Compression::default());
            let hashing = HashingWriter::new(encoder);
            let mut builder = tar::Builder::new(hashing);
            builder.follow_symlinks(false);
            append_changes(&mut builder, lower_dir, upper_dir, Path::new(""))?;
            let hashing = builder.into_inner()?;
            let (encoder, diff_id) = hashing.finish();
            encoder.finish()?;
            diff_id
        };

        let desc = Descriptor {
            media_type: media_type.to_string(),
            digest: OciDigest::from_bytes(&compressed),
            size: compressed.len() as i64,
            platform: None,
            annotations: None,
        };
        let mut labels = BTreeMap::new();
        labels.insert(models::UNCOMPRESSED_LABEL.to_string(), diff_id.to_string());
        self.write_blob(reference, &compressed, &desc, labels).await?;
        Ok(desc)
    }
}

/// A writer wrapper that digests bytes as they pass through, so the layer
/// tar is hashed uncompressed while being compressed downstream.
struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        HashingWriter {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn finish(self) -> (W, OciDigest) {
        let digest = format!("sha256:{}", hex::encode(self.hasher.finalize()))
            .parse()
            .expect("hex digest always parses");
        (self.inner, digest)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn escape_key(key: &str) -> String {
    key.replace('/', "_")
}

fn snapshot_mount(fs_dir: PathBuf, kind: SnapshotKind) -> Mount {
    let options = match kind {
        SnapshotKind::View => vec!["ro".to_string()],
        _ => vec!["rw".to_string()],
    };
    Mount {
        fstype: "bind".to_string(),
        source: fs_dir,
        options,
    }
}

/// The directory behind a single bind mount; the only mount shape this
/// runtime produces.
fn bind_source(mounts: &[Mount]) -> Result<&Path> {
    match mounts {
        [m] if m.fstype == "bind" => Ok(&m.source),
        [m] => Err(Error::MountFailed(format!(
            "unsupported mount type {}",
            m.fstype
        ))),
        other => Err(Error::MountFailed(format!(
            "expected exactly one mount, got {}",
            other.len()
        ))),
    }
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let dst = to.join(entry.file_name());
        if file_type.is_dir() {
            copy_tree(&entry.path(), &dst)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(target, &dst)?;
        } else {
            fs::copy(entry.path(), &dst)?;
        }
    }
    Ok(())
}

/// Extract a layer blob onto a directory. `.wh.` whiteout entries delete
/// their victim instead of unpacking.
fn apply_layer(data: &[u8], media_type: &str, dir: &Path) -> Result<()> {
    let reader: Box<dyn Read + '_> = if media_type.ends_with("gzip") {
        Box::new(GzDecoder::new(data))
    } else {
        Box::new(data)
    };
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string);

        if let Some(victim) = name.as_deref().and_then(|n| n.strip_prefix(".wh.")) {
            let parent = dir.join(path.parent().unwrap_or(Path::new("")));
            if victim == ".wh..opq" {
                clear_dir(&parent)?;
                continue;
            }
            let target = parent.join(victim);
            match fs::symlink_metadata(&target) {
                Ok(meta) if meta.is_dir() => fs::remove_dir_all(&target)?,
                Ok(_) => fs::remove_file(&target)?,
                Err(_) => {}
            }
            continue;
        }

        entry.unpack_in(dir)?;
    }
    Ok(())
}

fn clear_dir(dir: &Path) -> io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Walk the upper tree against the lower tree, appending added and changed
/// entries to the tar and whiteouts for entries the upper tree dropped.
fn append_changes<W: Write>(
    builder: &mut tar::Builder<W>,
    lower_root: &Path,
    upper_root: &Path,
    rel: &Path,
) -> Result<()> {
    let upper_dir = upper_root.join(rel);
    let mut names: Vec<String> = Vec::new();
    for entry in fs::read_dir(&upper_dir)? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();

    for name in &names {
        let rel_path = rel.join(name);
        let upper_path = upper_root.join(&rel_path);
        let lower_path = lower_root.join(&rel_path);
        let upper_meta = fs::symlink_metadata(&upper_path)?;
        let lower_meta = fs::symlink_metadata(&lower_path).ok();
        let lower_is_dir = lower_meta.as_ref().map(|m| m.is_dir()).unwrap_or(false);

        if upper_meta.is_dir() {
            if !lower_is_dir {
                if lower_meta.is_some() {
                    append_whiteout(builder, rel, name)?;
                }
                builder.append_path_with_name(&upper_path, &rel_path)?;
            }
            append_changes(builder, lower_root, upper_root, &rel_path)?;
        } else if lower_is_dir {
            append_whiteout(builder, rel, name)?;
            builder.append_path_with_name(&upper_path, &rel_path)?;
        } else if entry_differs(&lower_path, &upper_path)? {
            builder.append_path_with_name(&upper_path, &rel_path)?;
        }
    }

    // entries present only in the lower tree are deletions
    let lower_dir = lower_root.join(rel);
    if lower_dir.is_dir() {
        let mut removed: Vec<String> = Vec::new();
        for entry in fs::read_dir(&lower_dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if fs::symlink_metadata(upper_dir.join(&name)).is_err() {
                removed.push(name);
            }
        }
        removed.sort();
        for name in &removed {
            append_whiteout(builder, rel, name)?;
        }
    }
    Ok(())
}

fn append_whiteout<W: Write>(builder: &mut tar::Builder<W>, rel: &Path, name: &str) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(0o644);
    header.set_size(0);
    builder.append_data(&mut header, rel.join(format!(".wh.{}", name)), io::empty())?;
    Ok(())
}

fn entry_differs(lower: &Path, upper: &Path) -> io::Result<bool> {
    let upper_meta = fs::symlink_metadata(upper)?;
    let lower_meta = match fs::symlink_metadata(lower) {
        Ok(meta) => meta,
        Err(_) => return Ok(true),
    };
    if lower_meta.file_type() != upper_meta.file_type() {
        return Ok(true);
    }
    if upper_meta.file_type().is_symlink() {
        return Ok(fs::read_link(lower)? != fs::read_link(upper)?);
    }
    if lower_meta.len() != upper_meta.len() {
        return Ok(true);
    }
    Ok(fs::read(lower)? != fs::read(upper)?)
}
