//! Merge several skinned meshes into one mesh with a single skeleton,
//! material list and LOD chain.

/// Error definitions
pub mod error;
/// Skinned mesh data model: skeleton, LODs, sections and vertices
pub mod mesh;
/// Skeleton unification, section grouping and buffer assembly
pub mod merge;

#[cfg(test)]
pub(crate) mod test_util;

pub use error::{MergeError, MergeResult};
pub use merge::job::{MAX_GPU_SKIN_BONES, MergeJob};
pub use merge::{MergeOutput, MergeState, ResourceUploader, SkinnedMeshMerger, merge_meshes};
