//! Caller-supplied merge configuration.

use bon::Builder;
use glam::Affine2;

use crate::error::MergeError;
use crate::mesh::{MAX_TEXCOORDS, Skeleton, SkinnedMesh};

/// Largest bone map a single draw can address.
///
/// Older hardware may need a lower limit, set through
/// [`MergeJob::max_bones_per_section`].
pub const MAX_GPU_SKIN_BONES: usize = 256;

/// Explicit output-section assignment for one input mesh.
///
/// Indexed by the mesh's material slot. Sections whose slot maps to a group id
/// are only ever merged with sections carrying the same id, regardless of
/// material; a `None` slot falls back to grouping by material.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionMapping {
    pub group_ids: Vec<Option<u32>>,
}

impl SectionMapping {
    pub fn new(group_ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            group_ids: group_ids.into_iter().map(Some).collect(),
        }
    }

    pub fn group_for(&self, material_index: u16) -> Option<u32> {
        self.group_ids.get(material_index as usize).copied().flatten()
    }
}

/// Per-channel UV transforms for one input mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UvTransforms {
    pub channels: [Option<Affine2>; MAX_TEXCOORDS],
}

impl UvTransforms {
    pub fn channel(mut self, channel: usize, transform: Affine2) -> Self {
        if let Some(slot) = self.channels.get_mut(channel) {
            *slot = Some(transform);
        }
        self
    }

    pub fn is_identity(&self) -> bool {
        self.channels.iter().all(Option::is_none)
    }
}

/// Which bones a reference-pose override touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OverrideMode {
    BoneOnly,
    ChildrenOnly,
    BoneAndChildren,
}

impl OverrideMode {
    pub fn includes_bone(self) -> bool {
        matches!(self, OverrideMode::BoneOnly | OverrideMode::BoneAndChildren)
    }

    pub fn includes_children(self) -> bool {
        matches!(
            self,
            OverrideMode::ChildrenOnly | OverrideMode::BoneAndChildren
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoneOverride {
    pub bone_name: String,
    pub mode: OverrideMode,
}

/// Bind poses to take from `source` instead of the merged inputs.
#[derive(Debug, Clone)]
pub struct RefPoseOverride<'a> {
    pub source: &'a Skeleton,
    pub overrides: Vec<BoneOverride>,
}

/// Everything one merge needs. Lives only for the duration of the merge.
#[derive(Builder, Debug, Clone)]
pub struct MergeJob<'a> {
    /// Input meshes in priority order.
    meshes: Vec<&'a SkinnedMesh>,
    /// One entry per input mesh; missing entries group by material.
    #[builder(default)]
    section_mappings: Vec<SectionMapping>,
    /// One entry per input mesh; missing entries leave UVs untouched.
    #[builder(default)]
    uv_transforms: Vec<UvTransforms>,
    /// Number of highest-detail LODs to drop from the output.
    #[builder(default)]
    strip_top_lods: usize,
    #[builder(default)]
    ref_pose_overrides: Vec<RefPoseOverride<'a>>,
    #[builder(default = MAX_GPU_SKIN_BONES)]
    max_bones_per_section: usize,
}

impl<'a> MergeJob<'a> {
    pub fn meshes(&self) -> &[&'a SkinnedMesh] {
        &self.meshes
    }

    pub fn strip_top_lods(&self) -> usize {
        self.strip_top_lods
    }

    pub fn ref_pose_overrides(&self) -> &[RefPoseOverride<'a>] {
        &self.ref_pose_overrides
    }

    pub fn max_bones_per_section(&self) -> usize {
        self.max_bones_per_section
    }

    /// Explicit group id for a section of `mesh` using `material_index`.
    pub fn group_id(&self, mesh: usize, material_index: u16) -> Option<u32> {
        self.section_mappings
            .get(mesh)
            .and_then(|mapping| mapping.group_for(material_index))
    }

    pub fn uv_transforms(&self, mesh: usize) -> Option<&UvTransforms> {
        self.uv_transforms
            .get(mesh)
            .filter(|transforms| !transforms.is_identity())
    }

    /// Number of LODs every input has, before stripping.
    pub fn common_lod_count(&self) -> usize {
        self.meshes
            .iter()
            .map(|mesh| mesh.lods.len())
            .min()
            .unwrap_or(0)
    }

    /// Number of LODs the merge will produce.
    pub fn output_lod_count(&self) -> usize {
        self.common_lod_count().saturating_sub(self.strip_top_lods)
    }

    pub fn validate(&self) -> Result<(), MergeError> {
        // Vertex influence slots are stored as u8.
        if self.max_bones_per_section == 0 || self.max_bones_per_section > MAX_GPU_SKIN_BONES {
            return Err(MergeError::InvalidBoneLimit(self.max_bones_per_section));
        }
        if self.meshes.is_empty() {
            return Err(MergeError::NoInputs);
        }
        Ok(())
    }
}
