//! Crate-wide error taxonomy.
//!
//! Every fallible public operation returns [`crate::Result`]. The policy is
//! fail-fast: no retries, no degraded modes. Variants identify the failing
//! stage so that a caller aborting on error still gets a useful diagnostic.

use ash::vk;

/// Errors produced by device setup, resource allocation, and GPU submission.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Device memory allocation failed, typically out-of-memory.
    #[error("device memory allocation failed: {0}")]
    AllocationFailure(vk::Result),

    /// No device memory type satisfies both the resource's type bitmask and
    /// the requested property flags.
    #[error("no memory type in bitmask {type_bits:#x} supports {flags:?}")]
    UnsupportedMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    /// Queue submission or the subsequent wait failed.
    #[error("queue submission failed: {0}")]
    SubmissionFailure(vk::Result),

    /// The physical device lacks a required extension, feature, or property.
    #[error("unsupported device: {0}")]
    UnsupportedDevice(&'static str),

    /// A mesh or build request carried zero triangles.
    #[error("geometry contains no triangles")]
    EmptyGeometry,

    /// Mesh attribute or index data is internally inconsistent.
    #[error("malformed mesh: {0}")]
    MalformedMesh(String),

    /// SPIR-V bytecode was missing, empty, or not a multiple of four bytes.
    #[error("failed to load {role} shader: {reason}")]
    ShaderLoadFailure {
        role: &'static str,
        reason: &'static str,
    },

    /// A buffer allocation or upload was requested with zero bytes, or an
    /// upload exceeds the destination buffer.
    #[error("invalid buffer or upload size")]
    InvalidSize,

    /// Any other Vulkan error.
    #[error(transparent)]
    Vulkan(#[from] vk::Result),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
