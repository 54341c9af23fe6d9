//! Small mesh fixtures shared by the unit tests.

use glam::{Vec2, Vec3};

use crate::mesh::{
    BoneIndex, BoneTransform, BoundingBox, LodModel, MAX_INFLUENCES_PER_STREAM, MaterialHandle,
    Section, Skeleton, SkinWeights, SkinnedMesh, SkinnedVertex,
};

/// Build a skeleton from `(name, parent)` pairs; bone `i` sits at `x = i`.
pub fn skeleton(bones: &[(&str, Option<BoneIndex>)]) -> Skeleton {
    let mut skeleton = Skeleton::new();
    for (i, (name, parent)) in bones.iter().enumerate() {
        skeleton.push(
            *name,
            *parent,
            BoneTransform::from_translation(Vec3::new(i as f32, 0.0, 0.0)),
        );
    }
    skeleton
}

/// A LOD with one triangle per section.
///
/// Vertex `v` of each section is fully weighted to slot `v % bone_map.len()`.
pub fn triangle_lod(sections: &[(u16, Vec<BoneIndex>)]) -> LodModel {
    let mut lod = LodModel {
        num_tex_coords: 1,
        max_bone_influences: MAX_INFLUENCES_PER_STREAM as u32,
        ..Default::default()
    };
    for (material_index, bone_map) in sections {
        let base_vertex = lod.vertices.len() as u32;
        let base_index = lod.indices.len() as u32;
        for v in 0..3u32 {
            let slot = (v as usize % bone_map.len().max(1)) as u8;
            let n = (base_vertex + v) as f32;
            let mut vertex = SkinnedVertex {
                position: Vec3::new(n, v as f32, 0.0),
                skin: SkinWeights::from_pairs(&[(slot, 255)]),
                ..Default::default()
            };
            vertex.uvs[0] = Vec2::new(0.25 * v as f32, 0.5);
            lod.vertices.push(vertex);
        }
        lod.indices
            .extend([base_vertex, base_vertex + 1, base_vertex + 2]);
        lod.sections.push(Section {
            material_index: *material_index,
            bone_map: bone_map.clone(),
            base_vertex,
            num_vertices: 3,
            base_index,
            num_triangles: 1,
        });
    }
    lod
}

pub fn mesh(
    bones: &[(&str, Option<BoneIndex>)],
    materials: &[u64],
    lods: Vec<LodModel>,
) -> SkinnedMesh {
    let bounds = BoundingBox::from_points(
        lods.iter()
            .flat_map(|lod| lod.vertices.iter().map(|v| v.position)),
    );
    let skeleton = skeleton(bones);
    SkinnedMesh {
        inverse_bind_matrices: skeleton.inverse_bind_matrices(),
        skeleton,
        lods,
        materials: materials.iter().copied().map(MaterialHandle).collect(),
        bounds,
        full_precision_uvs: true,
        ..Default::default()
    }
}

pub fn single_bone_mesh() -> SkinnedMesh {
    mesh(&[("root", None)], &[1], vec![triangle_lod(&[(0, vec![0])])])
}

/// A one-bone mesh with `count` identical LODs.
pub fn lods_only(count: usize) -> SkinnedMesh {
    mesh(
        &[("root", None)],
        &[1],
        (0..count).map(|_| triangle_lod(&[(0, vec![0])])).collect(),
    )
}
