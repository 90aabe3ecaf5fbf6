use std::path::PathBuf;

use config::{Config, Environment, File};
use serde::Deserialize;

use ocidelta::{Error, Result};

/// Server configuration: defaults, then an optional `config/deltad` file,
/// then `DELTAD_`-prefixed environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct DeltadConfig {
    /// Root directory of the local image runtime state.
    pub runtime_root: PathBuf,
    /// Directory holding raw and compressed patch files (the patch cache).
    pub patch_dir: PathBuf,
    /// Differ block size, tuned for small-file rootfs density.
    pub block_size: u32,
    /// Compressor level for the streamed patch.
    pub compression_level: u32,
    pub differ_bin: String,
    pub compressor_bin: String,
}

impl DeltadConfig {
    pub fn load() -> Result<Self> {
        let builder = Config::builder()
            .set_default("runtime_root", "/var/lib/deltadiff")
            .and_then(|b| b.set_default("patch_dir", "/tmp"))
            .and_then(|b| b.set_default("block_size", 382))
            .and_then(|b| b.set_default("compression_level", 9))
            .and_then(|b| b.set_default("differ_bin", "rsync"))
            .and_then(|b| b.set_default("compressor_bin", "zstd"))
            .map_err(|e| Error::InvalidArgument(format!("configuration: {}", e)))?;

        let config = builder
            .add_source(File::with_name("config/deltad").required(false))
            .add_source(Environment::with_prefix("DELTAD"))
            .build()
            .map_err(|e| Error::InvalidArgument(format!("configuration: {}", e)))?;

        config
            .try_deserialize()
            .map_err(|e| Error::InvalidArgument(format!("configuration: {}", e)))
    }
}

impl Default for DeltadConfig {
    fn default() -> Self {
        Self {
            runtime_root: PathBuf::from("/var/lib/deltadiff"),
            patch_dir: PathBuf::from("/tmp"),
            block_size: 382,
            compression_level: 9,
            differ_bin: "rsync".to_string(),
            compressor_bin: "zstd".to_string(),
        }
    }
}
