//! Building the vertex and index buffers of a merged LOD.

use glam::Vec2;
use half::f16;
use itertools::Itertools;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::error::MergeError;
use crate::merge::grouper::{Contributor, OutputSectionSpec};
use crate::merge::job::MergeJob;
use crate::mesh::{
    BoneIndex, BoundingBox, Color, LodModel, MAX_TEXCOORDS, MAX_TOTAL_INFLUENCES, Section,
    Skeleton, SkinWeights, SkinnedVertex,
};

/// Output-wide settings shared by every section of one LOD.
#[derive(Debug, Clone, Copy)]
pub struct AssemblyContext<'j, 'a> {
    pub job: &'j MergeJob<'a>,
    pub lod: usize,
    /// UV channels the output carries.
    pub num_tex_coords: usize,
    /// Whether the output carries a color stream.
    pub has_vertex_colors: bool,
    /// When false, UVs are rounded to half precision.
    pub full_precision_uvs: bool,
}

/// Buffers of one output section.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledSection {
    pub vertices: Vec<SkinnedVertex>,
    /// Relative to the section's first vertex.
    pub indices: Vec<u32>,
    pub bounds: BoundingBox,
    /// This section's contribution to the LOD's active bones.
    pub active_bones: Vec<BoneIndex>,
}

/// Rewrite bone slots through a contributor's table, keeping every weight in place.
///
/// A slot whose bone was dropped from the merged skeleton is pointed at the
/// vertex's strongest surviving influence, or at the root when none survive.
fn remap_skin(skin: &SkinWeights, contributor: &Contributor) -> Result<SkinWeights, u8> {
    let lookup = |slot: u8| -> Result<Option<u16>, u8> {
        contributor
            .slot_remap
            .get(slot as usize)
            .copied()
            .ok_or(slot)
    };

    let mut fallback: Option<(u16, u8)> = None;
    for i in 0..MAX_TOTAL_INFLUENCES {
        let weight = skin.weights[i];
        if weight == 0 {
            continue;
        }
        if let Some(slot) = lookup(skin.bones[i])? {
            if fallback.is_none_or(|(_, best)| weight > best) {
                fallback = Some((slot, weight));
            }
        }
    }
    let fallback = fallback
        .map(|(slot, _)| slot)
        .or(contributor.fallback_slot)
        .unwrap_or(0);

    let mut result = *skin;
    for i in 0..MAX_TOTAL_INFLUENCES {
        let slot = if skin.weights[i] == 0 {
            lookup(skin.bones[i]).ok().flatten().unwrap_or(0)
        } else {
            lookup(skin.bones[i])?.unwrap_or(fallback)
        };
        result.bones[i] = slot as u8;
    }
    Ok(result)
}

fn quantize_uv(uv: Vec2) -> Vec2 {
    Vec2::new(
        f16::from_f32(uv.x).to_f32(),
        f16::from_f32(uv.y).to_f32(),
    )
}

/// Concatenate the vertices and indices of every contributor of `spec`.
pub fn assemble_section(
    spec: &OutputSectionSpec,
    ctx: &AssemblyContext<'_, '_>,
) -> Result<AssembledSection, MergeError> {
    let mut vertices = Vec::new();
    let mut indices = Vec::new();
    let mut bounds = BoundingBox::EMPTY;

    for contributor in &spec.contributors {
        let mesh = ctx.job.meshes()[contributor.mesh];
        let out_of_range = || MergeError::SectionOutOfRange {
            mesh: contributor.mesh,
            lod: ctx.lod,
            section: contributor.section,
        };
        let lod = mesh.lods.get(ctx.lod).ok_or_else(out_of_range)?;
        let section = lod
            .sections
            .get(contributor.section)
            .ok_or_else(out_of_range)?;
        let vertex_range = section.vertex_range().ok_or_else(out_of_range)?;
        let source_vertices = lod.section_vertices(section).ok_or_else(out_of_range)?;
        let source_indices = lod.section_indices(section).ok_or_else(out_of_range)?;

        let uv_transforms = ctx.job.uv_transforms(contributor.mesh);
        let source_uv_channels = (lod.num_tex_coords as usize).min(MAX_TEXCOORDS);
        let fill_color = ctx.has_vertex_colors && !mesh.has_vertex_colors;

        let running = vertices.len() as u32;
        for vertex in source_vertices {
            let mut merged = *vertex;

            for (channel, uv) in merged.uvs.iter_mut().enumerate() {
                if channel >= source_uv_channels || channel >= ctx.num_tex_coords {
                    *uv = Vec2::ZERO;
                    continue;
                }
                if let Some(transform) = uv_transforms.and_then(|t| t.channels[channel].as_ref()) {
                    *uv = transform.transform_point2(*uv);
                }
                if !ctx.full_precision_uvs {
                    *uv = quantize_uv(*uv);
                }
            }

            if fill_color {
                merged.color = Color::WHITE;
            }

            merged.skin = remap_skin(&vertex.skin, contributor).map_err(|slot| {
                MergeError::BoneSlotOutOfRange {
                    mesh: contributor.mesh,
                    lod: ctx.lod,
                    section: contributor.section,
                    slot,
                }
            })?;

            bounds.extend(merged.position);
            vertices.push(merged);
        }

        for &index in source_indices {
            if !vertex_range.contains(&(index as usize)) {
                return Err(MergeError::IndexOutOfSection {
                    mesh: contributor.mesh,
                    lod: ctx.lod,
                    section: contributor.section,
                    index,
                });
            }
            indices.push(index - section.base_vertex + running);
        }

        trace!(
            mesh = contributor.mesh,
            section = contributor.section,
            vertices = source_vertices.len(),
            "appended contributor"
        );
    }

    Ok(AssembledSection {
        vertices,
        indices,
        bounds,
        active_bones: spec.bone_map.clone(),
    })
}

/// Assemble every output section of one LOD and lay them out in one buffer.
///
/// `material_slots[i]` is the merged material slot of `specs[i]`. Each
/// section collects its bones separately; the LOD-wide active and required
/// bone sets are reduced afterwards in section order.
pub fn build_lod(
    specs: &[OutputSectionSpec],
    material_slots: &[u16],
    skeleton: &Skeleton,
    max_bone_influences: u32,
    ctx: &AssemblyContext<'_, '_>,
) -> Result<LodModel, MergeError> {
    #[cfg(feature = "parallel")]
    let assembled: Vec<AssembledSection> = specs
        .par_iter()
        .map(|spec| assemble_section(spec, ctx))
        .collect::<Result<_, _>>()?;
    #[cfg(not(feature = "parallel"))]
    let assembled: Vec<AssembledSection> = specs
        .iter()
        .map(|spec| assemble_section(spec, ctx))
        .collect::<Result<_, _>>()?;

    let mut lod = LodModel {
        num_tex_coords: ctx.num_tex_coords as u32,
        max_bone_influences,
        ..Default::default()
    };

    for ((spec, section), &material_index) in specs.iter().zip(&assembled).zip(material_slots) {
        let base_vertex = lod.vertices.len() as u32;
        let base_index = lod.indices.len() as u32;
        lod.vertices.extend_from_slice(&section.vertices);
        lod.bounds = lod.bounds.union(&section.bounds);
        lod.indices
            .extend(section.indices.iter().map(|index| index + base_vertex));
        lod.sections.push(Section {
            material_index,
            bone_map: spec.bone_map.clone(),
            base_vertex,
            num_vertices: section.vertices.len() as u32,
            base_index,
            num_triangles: (section.indices.len() / 3) as u32,
        });
    }

    lod.active_bone_indices = assembled
        .iter()
        .flat_map(|section| section.active_bones.iter().copied())
        .sorted_unstable()
        .dedup()
        .collect();
    lod.required_bones = skeleton.with_ancestors(lod.active_bone_indices.iter().copied());

    debug!(
        lod = ctx.lod,
        sections = lod.sections.len(),
        vertices = lod.vertices.len(),
        indices = lod.indices.len(),
        "built LOD"
    );

    Ok(lod)
}

#[cfg(test)]
mod test {
    use glam::Affine2;

    use super::*;
    use crate::merge::grouper::{SectionKey, group_sections};
    use crate::merge::job::UvTransforms;
    use crate::merge::skeleton::unify_skeletons;
    use crate::mesh::{MaterialHandle, SkinnedMesh};
    use crate::test_util::{mesh, triangle_lod};

    fn contributor(slot_remap: Vec<Option<u16>>, fallback_slot: Option<u16>) -> Contributor {
        Contributor {
            mesh: 0,
            section: 0,
            slot_remap,
            fallback_slot,
        }
    }

    #[test]
    fn slots_rewritten_weights_kept_in_place() {
        let skin = SkinWeights::from_pairs(&[(1, 200), (0, 55)]);
        let remapped = remap_skin(&skin, &contributor(vec![Some(7), Some(3)], None)).unwrap();
        assert_eq!(&remapped.bones[..2], &[3, 7]);
        assert_eq!(remapped.weights, skin.weights);
    }

    #[test]
    fn dropped_slot_falls_back_to_strongest_survivor() {
        let skin = SkinWeights::from_pairs(&[(0, 100), (1, 90), (2, 65)]);
        let table = vec![None, Some(4), Some(5)];
        let remapped = remap_skin(&skin, &contributor(table, Some(9))).unwrap();
        assert_eq!(&remapped.bones[..3], &[4, 4, 5]);
        assert_eq!(remapped.weights, skin.weights);
    }

    #[test]
    fn all_dropped_falls_back_to_root() {
        let skin = SkinWeights::from_pairs(&[(0, 255)]);
        let remapped = remap_skin(&skin, &contributor(vec![None], Some(2))).unwrap();
        assert_eq!(remapped.bones[0], 2);
    }

    #[test]
    fn weighted_slot_outside_bone_map_is_rejected() {
        let skin = SkinWeights::from_pairs(&[(0, 155), (3, 100)]);
        assert_eq!(
            remap_skin(&skin, &contributor(vec![Some(0)], None)),
            Err(3)
        );
    }

    fn assemble(
        meshes: &[&SkinnedMesh],
        job_uv: Vec<UvTransforms>,
        full_precision_uvs: bool,
    ) -> LodModel {
        let job = MergeJob::builder()
            .meshes(meshes.to_vec())
            .uv_transforms(job_uv)
            .build();
        let skeletons: Vec<_> = meshes.iter().map(|m| &m.skeleton).collect();
        let unified = unify_skeletons(&skeletons);
        let specs = group_sections(0, &job, &unified).unwrap();
        let ctx = AssemblyContext {
            job: &job,
            lod: 0,
            num_tex_coords: 1,
            has_vertex_colors: meshes.iter().any(|m| m.has_vertex_colors),
            full_precision_uvs,
        };
        let slots: Vec<u16> = (0..specs.len() as u16).collect();
        build_lod(&specs, &slots, &unified.skeleton, 4, &ctx).unwrap()
    }

    const BONES: &[(&str, Option<BoneIndex>)] = &[("root", None), ("a", Some(0)), ("b", Some(1))];

    #[test]
    fn indices_are_rebased_per_contributor() {
        let a = mesh(BONES, &[1], vec![triangle_lod(&[(0, vec![0, 1]), (0, vec![2])])]);
        let b = mesh(BONES, &[1], vec![triangle_lod(&[(0, vec![1])])]);
        let lod = assemble(&[&a, &b], Vec::new(), true);

        assert_eq!(lod.sections.len(), 1);
        assert_eq!(lod.vertices.len(), 9);
        assert_eq!(lod.indices, vec![0, 1, 2, 3, 4, 5, 6, 7, 8]);
        let section = &lod.sections[0];
        for &index in lod.section_indices(section).unwrap() {
            assert!(section.vertex_range().unwrap().contains(&(index as usize)));
        }
        assert_eq!(section.bone_map, vec![0, 1, 2]);
        // Third contributor's bone 1 lives in output slot 1.
        assert_eq!(lod.vertices[6].skin.bones[0], 1);
        assert_eq!(lod.active_bone_indices, vec![0, 1, 2]);
    }

    #[test]
    fn second_section_offsets_into_lod_buffer() {
        let a = mesh(BONES, &[1, 2], vec![triangle_lod(&[(0, vec![0]), (1, vec![2])])]);
        let lod = assemble(&[&a], Vec::new(), true);
        assert_eq!(lod.sections.len(), 2);
        assert_eq!(lod.sections[1].base_vertex, 3);
        assert_eq!(lod.sections[1].base_index, 3);
        assert_eq!(lod.bounds, a.bounds);
        assert_eq!(&lod.indices[3..], &[3, 4, 5]);
        assert_eq!(lod.active_bone_indices, vec![0, 2]);
        assert_eq!(lod.required_bones, vec![0, 1, 2]);
    }

    #[test]
    fn colors_filled_when_missing() {
        let mut a = mesh(BONES, &[1], vec![triangle_lod(&[(0, vec![0])])]);
        a.has_vertex_colors = true;
        for vertex in &mut a.lods[0].vertices {
            vertex.color = Color([10, 20, 30, 40]);
        }
        let mut b = mesh(BONES, &[1], vec![triangle_lod(&[(0, vec![0])])]);
        for vertex in &mut b.lods[0].vertices {
            vertex.color = Color([0, 0, 0, 0]);
        }
        let lod = assemble(&[&a, &b], Vec::new(), true);
        assert_eq!(lod.vertices[0].color, Color([10, 20, 30, 40]));
        assert_eq!(lod.vertices[3].color, Color::WHITE);
    }

    #[test]
    fn uv_transform_applies_to_one_input() {
        let a = mesh(BONES, &[1], vec![triangle_lod(&[(0, vec![0])])]);
        let b = mesh(BONES, &[1], vec![triangle_lod(&[(0, vec![0])])]);
        let shift = UvTransforms::default().channel(
            0,
            Affine2::from_scale_angle_translation(Vec2::splat(0.5), 0.0, Vec2::new(0.5, 0.0)),
        );
        let lod = assemble(&[&a, &b], vec![UvTransforms::default(), shift], true);
        assert_eq!(lod.vertices[1].uvs[0], Vec2::new(0.25, 0.5));
        assert_eq!(lod.vertices[4].uvs[0], Vec2::new(0.625, 0.25));
    }

    #[test]
    fn half_precision_uvs_are_quantized() {
        let mut a = mesh(BONES, &[1], vec![triangle_lod(&[(0, vec![0])])]);
        a.lods[0].vertices[0].uvs[0] = Vec2::new(0.1, 0.3);
        let lod = assemble(&[&a], Vec::new(), false);
        let uv = lod.vertices[0].uvs[0];
        assert_eq!(uv, quantize_uv(Vec2::new(0.1, 0.3)));
        assert!((uv.x - 0.1).abs() < 1e-3);
    }

    #[test]
    fn index_outside_section_is_rejected() {
        let mut a = mesh(BONES, &[1], vec![triangle_lod(&[(0, vec![0]), (0, vec![1])])]);
        a.lods[0].indices[1] = 4;
        let job = MergeJob::builder().meshes(vec![&a]).build();
        let spec = OutputSectionSpec {
            key: SectionKey::ByMaterial(MaterialHandle(1)),
            material: MaterialHandle(1),
            bone_map: vec![0],
            contributors: vec![contributor(vec![Some(0)], None)],
            over_limit: false,
        };
        let ctx = AssemblyContext {
            job: &job,
            lod: 0,
            num_tex_coords: 1,
            has_vertex_colors: false,
            full_precision_uvs: true,
        };
        assert_eq!(
            assemble_section(&spec, &ctx),
            Err(MergeError::IndexOutOfSection {
                mesh: 0,
                lod: 0,
                section: 0,
                index: 4
            })
        );
    }

    #[test]
    fn section_past_the_vertex_buffer_is_rejected() {
        let mut a = mesh(BONES, &[1], vec![triangle_lod(&[(0, vec![0])])]);
        a.lods[0].sections[0].base_vertex = u32::MAX;
        let job = MergeJob::builder().meshes(vec![&a]).build();
        let skeletons = [&a.skeleton];
        let unified = unify_skeletons(&skeletons);
        let specs = group_sections(0, &job, &unified).unwrap();
        let ctx = AssemblyContext {
            job: &job,
            lod: 0,
            num_tex_coords: 1,
            has_vertex_colors: false,
            full_precision_uvs: true,
        };
        assert_eq!(
            build_lod(&specs, &[0], &unified.skeleton, 4, &ctx),
            Err(MergeError::SectionOutOfRange {
                mesh: 0,
                lod: 0,
                section: 0
            })
        );
    }
}
