use rootcause::Report;
use thiserror::Error;

use crate::mesh::{BoneIndex, SkeletonError};

/// Reasons a merge can fail.
///
/// Structural and capacity failures abort the whole merge; nothing partially
/// merged is ever handed back.
#[derive(Error, Debug, PartialEq)]
pub enum MergeError {
    #[error("no input meshes were given")]
    NoInputs,
    #[error(
        "no LOD left to merge: inputs share {common_lods} LOD(s) and {strip_top_lods} were stripped"
    )]
    NoCommonLods {
        common_lods: usize,
        strip_top_lods: usize,
    },
    #[error("input mesh {mesh} has an empty skeleton")]
    EmptySkeleton { mesh: usize },
    #[error("input mesh {mesh} (root {found}) shares no bone with the merged skeleton (root {expected})")]
    IncompatibleRoot {
        mesh: usize,
        expected: String,
        found: String,
    },
    #[error(
        "section {section} of mesh {mesh} (LOD {lod}) needs {bones} bones, over the limit of {limit}"
    )]
    SectionExceedsBoneLimit {
        mesh: usize,
        lod: usize,
        section: usize,
        bones: usize,
        limit: usize,
    },
    #[error("section {section} of mesh {mesh} (LOD {lod}) lies outside the LOD buffers")]
    SectionOutOfRange {
        mesh: usize,
        lod: usize,
        section: usize,
    },
    #[error(
        "index {index} in section {section} of mesh {mesh} (LOD {lod}) is outside the section's vertices"
    )]
    IndexOutOfSection {
        mesh: usize,
        lod: usize,
        section: usize,
        index: u32,
    },
    #[error("vertex bone slot {slot} in section {section} of mesh {mesh} (LOD {lod}) is not in its bone map")]
    BoneSlotOutOfRange {
        mesh: usize,
        lod: usize,
        section: usize,
        slot: u8,
    },
    #[error("section {section} of mesh {mesh} references bone {bone}, which its skeleton does not have")]
    UnknownBone {
        mesh: usize,
        section: usize,
        bone: BoneIndex,
    },
    #[error("section {section} of mesh {mesh} uses material slot {material_index}, which does not exist")]
    UnknownMaterial {
        mesh: usize,
        section: usize,
        material_index: u16,
    },
    #[error("merged skeleton is invalid: {0}")]
    InvalidSkeleton(#[from] SkeletonError),
    #[error("bone limit {0} is outside the supported range 1..=256")]
    InvalidBoneLimit(usize),
    #[error("resource upload failed: {0}")]
    Upload(String),
}

impl MergeError {
    /// Whether the failure comes from the bone-per-section limit.
    pub fn is_capacity(&self) -> bool {
        matches!(self, MergeError::SectionExceedsBoneLimit { .. })
    }
}

pub type MergeResult<T> = Result<T, Report<MergeError>>;
