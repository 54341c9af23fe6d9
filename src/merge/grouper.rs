//! Planning the output sections of one LOD.

use tracing::{debug, warn};

use crate::error::MergeError;
use crate::merge::bone_map::merge_bone_maps;
use crate::merge::job::MergeJob;
use crate::merge::skeleton::UnifiedSkeleton;
use crate::mesh::{BoneIndex, MaterialHandle};

/// What input sections must share to end up in the same output section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKey {
    ByMaterial(MaterialHandle),
    /// Caller-supplied group id; takes precedence over material identity.
    ByGroup(u32),
}

/// An input section folded into an output section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contributor {
    pub mesh: usize,
    pub section: usize,
    /// Input bone-map slot → slot in the output bone map. `None` where the
    /// bone was dropped from the merged skeleton.
    pub slot_remap: Vec<Option<u16>>,
    /// Output slot of the root bone, present when any slot was dropped.
    pub fallback_slot: Option<u16>,
}

/// Plan for one output section.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSectionSpec {
    pub key: SectionKey,
    pub material: MaterialHandle,
    /// Merged-skeleton bones, in slot order.
    pub bone_map: Vec<BoneIndex>,
    /// In input enumeration order.
    pub contributors: Vec<Contributor>,
    /// Set when a single contributor's bones alone exceed the limit.
    pub over_limit: bool,
}

/// One input section's bone map expressed in merged-skeleton space.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RemappedSection {
    bone_map: Vec<BoneIndex>,
    slots: Vec<Option<u16>>,
    fallback_slot: Option<u16>,
}

fn remap_section_bones(
    unified: &UnifiedSkeleton,
    job: &MergeJob<'_>,
    mesh: usize,
    section: usize,
    bone_map: &[BoneIndex],
) -> Result<RemappedSection, MergeError> {
    let skeleton_len = job.meshes()[mesh].skeleton.len();

    let mut valid = Vec::with_capacity(bone_map.len());
    let mut positions = Vec::with_capacity(bone_map.len());
    for &bone in bone_map {
        if bone as usize >= skeleton_len {
            return Err(MergeError::UnknownBone {
                mesh,
                section,
                bone,
            });
        }
        match unified.remap(mesh, bone) {
            Some(merged) => {
                positions.push(Some(valid.len()));
                valid.push(merged);
            }
            None => positions.push(None),
        }
    }

    // Dedup in case two input bones resolved to the same merged bone.
    let (mut merged_map, table) = merge_bone_maps(&[], &valid);
    let slots = positions
        .iter()
        .map(|position| position.map(|p| table[p]))
        .collect::<Vec<_>>();

    let fallback_slot = if slots.iter().any(Option::is_none) {
        let (with_root, root_slot) = merge_bone_maps(&merged_map, &[0]);
        merged_map = with_root;
        Some(root_slot[0])
    } else {
        None
    };

    Ok(RemappedSection {
        bone_map: merged_map,
        slots,
        fallback_slot,
    })
}

/// Group the sections of every input's LOD `lod` into output sections.
///
/// Sections sharing a [`SectionKey`] are merged as long as the combined bone
/// map stays within the job's limit; otherwise a new output section starts.
/// Output sections come out in first-seen order and keep their contributors
/// in input order.
pub fn group_sections(
    lod: usize,
    job: &MergeJob<'_>,
    unified: &UnifiedSkeleton,
) -> Result<Vec<OutputSectionSpec>, MergeError> {
    let limit = job.max_bones_per_section();
    let mut specs: Vec<OutputSectionSpec> = Vec::new();

    for (mesh_index, mesh) in job.meshes().iter().enumerate() {
        let Some(lod_model) = mesh.lods.get(lod) else {
            continue;
        };

        for (section_index, section) in lod_model.sections.iter().enumerate() {
            let material = mesh
                .section_material(section)
                .ok_or(MergeError::UnknownMaterial {
                    mesh: mesh_index,
                    section: section_index,
                    material_index: section.material_index,
                })?;
            let key = match job.group_id(mesh_index, section.material_index) {
                Some(group) => SectionKey::ByGroup(group),
                None => SectionKey::ByMaterial(material),
            };

            let remapped =
                remap_section_bones(unified, job, mesh_index, section_index, &section.bone_map)?;

            if remapped.bone_map.len() > limit {
                warn!(
                    mesh = mesh_index,
                    section = section_index,
                    lod,
                    bones = remapped.bone_map.len(),
                    limit,
                    "section bone map exceeds the bone limit on its own"
                );
                specs.push(OutputSectionSpec {
                    key,
                    material,
                    contributors: vec![Contributor {
                        mesh: mesh_index,
                        section: section_index,
                        slot_remap: remapped.slots,
                        fallback_slot: remapped.fallback_slot,
                    }],
                    bone_map: remapped.bone_map,
                    over_limit: true,
                });
                continue;
            }

            let placed = specs
                .iter_mut()
                .filter(|spec| spec.key == key && !spec.over_limit)
                .find_map(|spec| {
                    let (merged, table) = merge_bone_maps(&spec.bone_map, &remapped.bone_map);
                    (merged.len() <= limit).then_some((spec, merged, table))
                });

            match placed {
                Some((spec, merged, table)) => {
                    spec.bone_map = merged;
                    spec.contributors.push(Contributor {
                        mesh: mesh_index,
                        section: section_index,
                        slot_remap: remapped
                            .slots
                            .iter()
                            .map(|slot| slot.map(|s| table[s as usize]))
                            .collect(),
                        fallback_slot: remapped.fallback_slot.map(|s| table[s as usize]),
                    });
                }
                None => specs.push(OutputSectionSpec {
                    key,
                    material,
                    contributors: vec![Contributor {
                        mesh: mesh_index,
                        section: section_index,
                        slot_remap: remapped.slots,
                        fallback_slot: remapped.fallback_slot,
                    }],
                    bone_map: remapped.bone_map,
                    over_limit: false,
                }),
            }
        }
    }

    debug!(lod, sections = specs.len(), "grouped sections");
    Ok(specs)
}
