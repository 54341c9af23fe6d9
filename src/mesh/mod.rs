//! In-memory skinned mesh asset: skeleton, LOD chain, sections and materials.

pub mod skeleton;
pub mod vertex;

use std::ops::Range;

use glam::{Mat4, Vec3};

pub use skeleton::{Bone, BoneIndex, BoneTransform, Skeleton, SkeletonError};
pub use vertex::{
    Color, MAX_INFLUENCES_PER_STREAM, MAX_TEXCOORDS, MAX_TOTAL_INFLUENCES, SkinWeights,
    SkinnedVertex, WEIGHT_SCALE,
};

/// Stable identity of a material asset.
///
/// Only equality is ever inspected; no property of the material is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MaterialHandle(pub u64);

/// Axis-aligned bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    /// Inverted box that any `union` or `extend` replaces.
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        points.into_iter().fold(Self::EMPTY, |mut bounds, point| {
            bounds.extend(point);
            bounds
        })
    }

    pub fn extend(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Named attachment point relative to a bone.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Socket {
    pub name: String,
    pub bone_name: String,
    pub relative_transform: BoneTransform,
}

/// A run of triangles sharing one material and one bone map.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Section {
    /// Slot in the owning mesh's material list.
    pub material_index: u16,
    /// Skeleton bones this section's vertices may reference, addressed by slot.
    pub bone_map: Vec<BoneIndex>,
    pub base_vertex: u32,
    pub num_vertices: u32,
    pub base_index: u32,
    pub num_triangles: u32,
}

impl Section {
    /// `None` when the end does not fit in `usize`.
    pub fn vertex_range(&self) -> Option<Range<usize>> {
        let start = self.base_vertex as usize;
        let end = start.checked_add(self.num_vertices as usize)?;
        Some(start..end)
    }

    pub fn index_range(&self) -> Option<Range<usize>> {
        let start = self.base_index as usize;
        let count = (self.num_triangles as usize).checked_mul(3)?;
        Some(start..start.checked_add(count)?)
    }
}

/// One level of detail.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LodModel {
    pub sections: Vec<Section>,
    pub vertices: Vec<SkinnedVertex>,
    pub indices: Vec<u32>,
    /// Union of all section bone maps, ascending.
    pub active_bone_indices: Vec<BoneIndex>,
    /// Active bones plus all their ancestors, ascending.
    pub required_bones: Vec<BoneIndex>,
    /// UV channels in use, at most [`MAX_TEXCOORDS`].
    pub num_tex_coords: u32,
    /// 4, or 8 when the LOD uses extra bone influences.
    pub max_bone_influences: u32,
    /// Box around every vertex of this LOD.
    #[cfg_attr(feature = "serde", serde(default))]
    pub bounds: BoundingBox,
}

impl LodModel {
    /// Vertices of one section, or `None` if its range is outside the buffer.
    pub fn section_vertices(&self, section: &Section) -> Option<&[SkinnedVertex]> {
        self.vertices.get(section.vertex_range()?)
    }

    /// Indices of one section, or `None` if its range is outside the buffer.
    pub fn section_indices(&self, section: &Section) -> Option<&[u32]> {
        self.indices.get(section.index_range()?)
    }
}

/// A complete skinned mesh asset.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SkinnedMesh {
    pub skeleton: Skeleton,
    pub lods: Vec<LodModel>,
    pub materials: Vec<MaterialHandle>,
    pub sockets: Vec<Socket>,
    pub bounds: BoundingBox,
    pub has_vertex_colors: bool,
    /// When false, UVs are stored at half precision.
    pub full_precision_uvs: bool,
    /// One per skeleton bone, derived from the bind pose.
    #[cfg_attr(feature = "serde", serde(default))]
    pub inverse_bind_matrices: Vec<Mat4>,
}

impl SkinnedMesh {
    /// Material handle used by a section of this mesh.
    pub fn section_material(&self, section: &Section) -> Option<MaterialHandle> {
        self.materials.get(section.material_index as usize).copied()
    }

    pub fn find_socket(&self, name: &str) -> Option<&Socket> {
        self.sockets.iter().find(|socket| socket.name == name)
    }
}
