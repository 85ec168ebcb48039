use std::fmt;
use std::path::PathBuf;

use mcbridge_protocol::TransferMode;

/// Suffix that asks for a source to be resolved recursively.
pub const RECURSIVE_SUFFIX: &str = "...";

/// One object-level unit of work, resolved by the producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferDescriptor {
    pub mode: TransferMode,
    /// Local file: the upload source or the download target.
    pub local: PathBuf,
    pub bucket: String,
    pub key: String,
    /// Byte size known at resolution time.
    pub size: u64,
    /// Path the `.ok`/`.err` marker suffix is appended to.
    pub marker_base: PathBuf,
}

impl TransferDescriptor {
    /// Human-readable source locator.
    pub fn source(&self) -> String {
        match self.mode {
            TransferMode::Put => self.local.display().to_string(),
            TransferMode::Get => format!("{}/{}", self.bucket, self.key),
        }
    }

    /// Human-readable destination locator.
    pub fn destination(&self) -> String {
        match self.mode {
            TransferMode::Put => format!("{}/{}", self.bucket, self.key),
            TransferMode::Get => self.local.display().to_string(),
        }
    }
}

impl fmt::Display for TransferDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.mode, self.source(), self.destination())
    }
}

/// Terminal resolution failure. Fatal to the whole session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} is a folder. Folder cannot be copied, use the `...` suffix")]
    IsFolder(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("failed to resolve {source_path}: {message}")]
    Other {
        source_path: String,
        message: String,
    },
}

/// Item carried by the producer channel: a descriptor, or the single
/// error that terminates the stream.
pub type DescriptorResult = Result<TransferDescriptor, ResolveError>;

/// Where upload markers are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MarkerLocation {
    /// Beside the local file (`/data/a.bin` -> `/data/a.bin.ok`).
    #[default]
    BesideLocal,
    /// Under a fixed directory, joined with the object key.
    Directory(PathBuf),
}

/// A fully specified transfer request, as handed to the producer.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub mode: TransferMode,
    pub bucket: String,
    /// Source/destination pairs, in request order.
    pub pairs: Vec<(String, String)>,
    /// Prepended to every remote key.
    pub key_prefix: String,
    pub upload_markers: MarkerLocation,
}

/// How the executor disposed of one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Transferred(u64),
    /// Already present at the destination; counted as success.
    Skipped(u64),
}

impl Outcome {
    pub fn bytes(self) -> u64 {
        match self {
            Outcome::Transferred(n) | Outcome::Skipped(n) => n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(mode: TransferMode) -> TransferDescriptor {
        TransferDescriptor {
            mode,
            local: PathBuf::from("/data/a.bin"),
            bucket: "render-user".into(),
            key: "jobs/a.bin".into(),
            size: 100,
            marker_base: PathBuf::from("/data/a.bin"),
        }
    }

    #[test]
    fn locators_follow_direction() {
        let put = descriptor(TransferMode::Put);
        assert_eq!(put.source(), "/data/a.bin");
        assert_eq!(put.destination(), "render-user/jobs/a.bin");

        let get = descriptor(TransferMode::Get);
        assert_eq!(get.source(), "render-user/jobs/a.bin");
        assert_eq!(get.destination(), "/data/a.bin");
        assert_eq!(get.to_string(), "get render-user/jobs/a.bin -> /data/a.bin");
    }

    #[test]
    fn folder_error_mentions_suffix() {
        let err = ResolveError::IsFolder("/data/job".into());
        assert!(err.to_string().contains("`...`"));
    }

    #[test]
    fn outcome_bytes() {
        assert_eq!(Outcome::Transferred(5).bytes(), 5);
        assert_eq!(Outcome::Skipped(7).bytes(), 7);
    }
}
