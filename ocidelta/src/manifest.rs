//! In-memory manifest mutation.
//!
//! Manifests are held as generic JSON documents (key to raw value) so that
//! unknown and vendor-specific fields survive a rewrite byte-for-byte. Only
//! the fields the rewrite touches (`config`, `layers`, `rootfs.diff_ids`) are
//! re-encoded.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::digest::OciDigest;
use crate::models::{self, Descriptor};
use crate::runtime::ContentStore;
use crate::{Error, Result};

const GC_REF_PREFIX: &str = "containerd.io/gc.ref.content";

/// Content-store reference label for blobs written while rewriting a
/// manifest around a synthesized layer.
pub const CONTENT_REF: &str = "delta-rebase";

/// A manifest that can be mutated.
#[derive(Debug)]
pub struct Manifest {
    document: BTreeMap<String, Box<RawValue>>,
    desc: Descriptor,
}

/// Transport form of a manifest: the raw JSON document plus its descriptor,
/// BSON-encoded for the RPC payload.
#[derive(Serialize, Deserialize)]
struct WireManifest {
    document: Vec<u8>,
    desc: Descriptor,
}

impl Manifest {
    /// Load a manifest in-memory for easy interaction.
    pub async fn load(store: &dyn ContentStore, desc: &Descriptor) -> Result<Self> {
        let data = store.read_blob(&desc.digest).await?;
        Ok(Self {
            document: parse_object(&data)?,
            desc: desc.clone(),
        })
    }

    /// Load the manifest for a specific platform out of a manifest list.
    ///
    /// Picks the first child whose `platform.os` equals `os` and whose
    /// `platform.architecture` equals `arch` case-insensitively.
    pub async fn load_from_list(
        store: &dyn ContentStore,
        index: &Descriptor,
        os: &str,
        arch: &str,
    ) -> Result<Self> {
        let data = store.read_blob(&index.digest).await?;
        let document = parse_object(&data)?;
        let manifests = document
            .get("manifests")
            .ok_or_else(|| Error::Malformed("manifest list without manifests".to_string()))?;
        let children: Vec<Descriptor> = serde_json::from_str(manifests.get())
            .map_err(|e| Error::Malformed(e.to_string()))?;

        for child in &children {
            if let Some(platform) = &child.platform {
                if platform.os == os && platform.architecture.eq_ignore_ascii_case(arch) {
                    return Self::load(store, child).await;
                }
            }
        }
        Err(Error::NotFoundForPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        })
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.desc
    }

    pub fn document(&self) -> &BTreeMap<String, Box<RawValue>> {
        &self.document
    }

    /// Descriptor of the image config this manifest references.
    pub fn config_descriptor(&self) -> Result<Descriptor> {
        self.descriptor_field("config")
    }

    /// Ordered layer descriptors of this manifest.
    pub fn layers(&self) -> Result<Vec<Descriptor>> {
        let raw = self
            .document
            .get("layers")
            .ok_or_else(|| Error::Malformed("manifest without layers".to_string()))?;
        serde_json::from_str(raw.get()).map_err(|e| Error::Malformed(e.to_string()))
    }

    fn descriptor_field(&self, key: &str) -> Result<Descriptor> {
        let raw = self
            .document
            .get(key)
            .ok_or_else(|| Error::Malformed(format!("manifest without {}", key)))?;
        serde_json::from_str(raw.get()).map_err(|e| Error::Malformed(e.to_string()))
    }

    /// Rewrite this manifest so its single layer is `layer` and its config
    /// references the layer's diff-ID.
    ///
    /// The layer's media type is normalized to the parent manifest family.
    /// The diff-ID comes from the uncompressed-digest label the differ
    /// attached to the layer blob. Config and manifest are written back to
    /// the content store; the manifest carries GC anchoring labels so the
    /// referenced blobs survive until an image refers to them.
    pub async fn replace_with_layer(
        &mut self,
        store: &dyn ContentStore,
        mut layer: Descriptor,
        image_config: Option<&[u8]>,
    ) -> Result<()> {
        // These rewrites can be done on Docker images or OCI images. Make
        // sure the new layer uses the content type the manifest family
        // expects.
        layer.media_type = match self.desc.media_type.as_str() {
            models::MEDIA_TYPE_DOCKER_MANIFEST => models::MEDIA_TYPE_DOCKER_LAYER_GZIP.to_string(),
            models::MEDIA_TYPE_OCI_MANIFEST => models::MEDIA_TYPE_OCI_LAYER_GZIP.to_string(),
            other => return Err(Error::UnsupportedMediaType(other.to_string())),
        };

        // The diff-ID for the new layer, recorded by the differ.
        let info = store.info(&layer.digest).await?;
        let diff_id = info
            .labels
            .get(models::UNCOMPRESSED_LABEL)
            .ok_or(Error::MissingDiffId)?;
        let diff_id: OciDigest = diff_id.parse()?;

        // Patch the config and store it in the content store.
        let config_desc = self.config_descriptor()?;
        let config_desc = patch_image_config(store, &config_desc, &diff_id, image_config).await?;
        self.document
            .insert("config".to_string(), to_raw(&config_desc)?);

        // The patched rootfs is one consolidated layer, not an append.
        let layers = vec![layer];
        self.document.insert("layers".to_string(), to_raw(&layers)?);

        // Labels that tell the garbage collector not to delete the content
        // this manifest references.
        let mut labels = BTreeMap::new();
        labels.insert(format!("{}.0", GC_REF_PREFIX), config_desc.digest.to_string());
        for (i, layer) in layers.iter().enumerate() {
            labels.insert(
                format!("{}.{}", GC_REF_PREFIX, i + 1),
                layer.digest.to_string(),
            );
        }

        let data = serde_json::to_vec(&self.document)?;
        let mut desc = self.desc.clone();
        desc.digest = OciDigest::from_bytes(&data);
        desc.size = data.len() as i64;
        store.write_blob(CONTENT_REF, &data, &desc, labels).await?;

        self.desc = desc;
        Ok(())
    }

    /// Encode this manifest for the RPC payload.
    pub fn to_wire(&self) -> Result<Vec<u8>> {
        let wire = WireManifest {
            document: serde_json::to_vec(&self.document)?,
            desc: self.desc.clone(),
        };
        bson::to_vec(&wire).map_err(|e| Error::Malformed(e.to_string()))
    }

    /// Decode a manifest received over the RPC.
    pub fn from_wire(data: &[u8]) -> Result<Self> {
        let wire: WireManifest =
            bson::from_slice(data).map_err(|e| Error::Malformed(e.to_string()))?;
        Ok(Self {
            document: parse_object(&wire.document)?,
            desc: wire.desc,
        })
    }
}

/// Load a manifest, descending into a manifest list for the given platform
/// when the descriptor names one.
pub async fn load_platform(
    store: &dyn ContentStore,
    desc: &Descriptor,
    os: &str,
    arch: &str,
) -> Result<Manifest> {
    if models::is_manifest_list(&desc.media_type) {
        Manifest::load_from_list(store, desc, os, arch).await
    } else {
        Manifest::load(store, desc).await
    }
}

/// Rewrite an image config so `rootfs.diff_ids` holds exactly the new
/// layer's diff-ID, and write it to the content store. Unknown fields, both
/// top-level and inside `rootfs`, are preserved verbatim.
async fn patch_image_config(
    store: &dyn ContentStore,
    config: &Descriptor,
    diff_id: &OciDigest,
    image_config: Option<&[u8]>,
) -> Result<Descriptor> {
    let data = match image_config {
        Some(p) => p.to_vec(),
        None => store.read_blob(&config.digest).await?,
    };

    let mut document = parse_object(&data)?;
    let rootfs = document
        .get("rootfs")
        .ok_or_else(|| Error::Malformed("image config without rootfs".to_string()))?;
    let mut rootfs: BTreeMap<String, Box<RawValue>> = parse_object(rootfs.get().as_bytes())?;

    // Truncate any pre-existing diff-IDs; the base's layer chain is gone.
    rootfs.insert("diff_ids".to_string(), to_raw(&vec![diff_id.clone()])?);
    document.insert("rootfs".to_string(), to_raw(&rootfs)?);

    let data = serde_json::to_vec(&document)?;
    let mut desc = config.clone();
    desc.digest = OciDigest::from_bytes(&data);
    desc.size = data.len() as i64;
    store
        .write_blob(CONTENT_REF, &data, &desc, BTreeMap::new())
        .await?;
    Ok(desc)
}

fn parse_object(data: &[u8]) -> Result<BTreeMap<String, Box<RawValue>>> {
    let text = std::str::from_utf8(data).map_err(|e| Error::Malformed(e.to_string()))?;
    serde_json::from_str(text).map_err(|e| Error::Malformed(e.to_string()))
}

fn to_raw<T: Serialize>(value: &T) -> Result<Box<RawValue>> {
    Ok(RawValue::from_string(serde_json::to_string(value)?)?)
}
