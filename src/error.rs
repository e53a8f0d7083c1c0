use thiserror::Error;

/// Fatal load/save failures. Raised through [`anyhow::Error`]; callers that
/// need to distinguish kinds use `err.downcast_ref::<PackageError>()`.
///
/// Ancillary-table failures (depends, thumbnails, import/export GUIDs,
/// texture allocations) are not represented here: they are logged through
/// `tracing` and the table is dropped.
#[derive(Debug, Error)]
pub enum PackageError {
    /// The first four bytes match neither byte order of the signature tag.
    #[error("bad package signature tag {tag:#010x}")]
    BadSignature { tag: u32 },

    /// Legacy version below the supported window, or a build-gated branch
    /// explicitly refusing the file.
    #[error("unsupported package version: {reason}")]
    UnsupportedVersion { reason: String },

    /// Structurally inconsistent data. Carries the first inconsistent offset.
    #[error("malformed package data at offset {offset:#x}: {reason}")]
    Format { offset: u64, reason: String },

    /// An external object serializer failed. One aggregated error is raised
    /// per load, naming the first offending export.
    #[error("failed to deserialize export {export_index}: {reason}")]
    ObjectDeserialize { export_index: usize, reason: String },
}

impl PackageError {
    pub fn unsupported(reason: impl Into<String>) -> anyhow::Error {
        PackageError::UnsupportedVersion { reason: reason.into() }.into()
    }

    pub fn format(offset: u64, reason: impl Into<String>) -> anyhow::Error {
        PackageError::Format { offset, reason: reason.into() }.into()
    }
}
