//! Client-side image assembly: rewrite the target manifest around the
//! synthesized layer and register the result in the local image store.

use tracing::info;

use crate::manifest::Manifest;
use crate::models::Descriptor;
use crate::runtime::{ImageRecord, ImageService, Runtime};
use crate::Result;

/// Rewrite `manifest` to carry `layer` as its only layer, register the
/// mutated manifest as `target_ref`, and unpack the new image. A failed
/// unpack is fatal.
pub async fn assemble_image(
    rt: &dyn Runtime,
    manifest: &mut Manifest,
    layer: Descriptor,
    image_config: &[u8],
    target_ref: &str,
) -> Result<ImageRecord> {
    manifest
        .replace_with_layer(rt.content(), layer, Some(image_config))
        .await?;

    let record = rt
        .images()
        .create(ImageRecord {
            name: target_ref.to_string(),
            target: manifest.descriptor().clone(),
        })
        .await?;

    rt.images().unpack(&record.name).await?;
    info!(image = %record.name, digest = %record.target.digest, "registered patched image");
    Ok(record)
}
