use std::path::PathBuf;

use config::{Config, Environment, File};
use serde::Deserialize;

use ocidelta::apply::{ApplyOptions, EMPTY_IMAGE_REF};
use ocidelta::manifest::CONTENT_REF;
use ocidelta::{Error, Result};

/// Client configuration: defaults, then an optional `config/deltactl` file,
/// then `DELTACTL_`-prefixed environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct DeltactlConfig {
    /// Root directory of the local image runtime state.
    pub runtime_root: PathBuf,
    /// Directory the received patch files are written to.
    pub patch_dir: PathBuf,
    pub differ_bin: String,
    pub compressor_bin: String,
    /// Reference of an image whose rootfs is empty, the pivot for absolute
    /// layer synthesis.
    pub empty_image_ref: String,
    /// Content-store reference label for the synthesized layer.
    pub layer_ref: String,
}

impl DeltactlConfig {
    pub fn load() -> Result<Self> {
        let builder = Config::builder()
            .set_default("runtime_root", "/var/lib/deltadiff")
            .and_then(|b| b.set_default("patch_dir", "/tmp"))
            .and_then(|b| b.set_default("differ_bin", "rsync"))
            .and_then(|b| b.set_default("compressor_bin", "zstd"))
            .and_then(|b| b.set_default("empty_image_ref", EMPTY_IMAGE_REF))
            .and_then(|b| b.set_default("layer_ref", CONTENT_REF))
            .map_err(|e| Error::InvalidArgument(format!("configuration: {}", e)))?;

        let config = builder
            .add_source(File::with_name("config/deltactl").required(false))
            .add_source(Environment::with_prefix("DELTACTL"))
            .build()
            .map_err(|e| Error::InvalidArgument(format!("configuration: {}", e)))?;

        config
            .try_deserialize()
            .map_err(|e| Error::InvalidArgument(format!("configuration: {}", e)))
    }

    pub fn apply_options(&self) -> ApplyOptions {
        ApplyOptions {
            differ_bin: self.differ_bin.clone(),
            compressor_bin: self.compressor_bin.clone(),
            empty_image_ref: self.empty_image_ref.clone(),
            layer_ref: self.layer_ref.clone(),
        }
    }
}
