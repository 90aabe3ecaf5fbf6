use miette::Diagnostic;
use thiserror::Error;

pub mod apply;
pub mod assemble;
pub mod digest;
pub mod image_reference;
pub mod manifest;
pub mod models;
pub mod process;
pub mod runtime;
pub mod snapshot;

// Re-export the types most callers need
pub use digest::OciDigest;
pub use image_reference::ImageReference;
pub use manifest::Manifest;
pub use models::Descriptor;

#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("no manifest found for platform {os}/{arch}")]
    NotFoundForPlatform { os: String, arch: String },

    #[error("pull failed: {0}")]
    PullFailed(String),

    #[error("mount failed: {0}")]
    MountFailed(String),

    #[error("snapshot operation failed: {0}")]
    SnapshotFailed(String),

    #[error("creating delta patch failed: {0}")]
    PatchCreationFailed(String),

    #[error("applying delta patch failed: {0}")]
    PatchApplyFailed(String),

    #[error("stream aborted: {0}")]
    StreamAborted(String),

    #[error("layer blob carries no uncompressed digest label")]
    MissingDiffId,

    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("exec {command}: {message}")]
    Subprocess { command: String, message: String },

    #[error(transparent)]
    Digest(#[from] digest::DigestError),

    #[error(transparent)]
    Reference(#[from] image_reference::ImageReferenceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
