//! Building one skeleton out of several.

use tracing::{debug, trace, warn};

use crate::error::MergeError;
use crate::merge::job::RefPoseOverride;
use crate::mesh::{BoneIndex, Skeleton};

/// A bone that could not be placed in the merged skeleton because its parent
/// was missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedBone {
    /// Position of the owning skeleton in the input list.
    pub mesh: usize,
    pub bone: BoneIndex,
    pub name: String,
}

/// Result of [`unify_skeletons`].
#[derive(Debug, Clone)]
pub struct UnifiedSkeleton {
    pub skeleton: Skeleton,
    /// Per input: original bone index → merged bone index.
    ///
    /// Empty for skipped (empty) inputs, `None` for dropped bones. Every
    /// input root maps to the merged root.
    pub remaps: Vec<Vec<Option<BoneIndex>>>,
    /// Per input: how many of its bones were already in the merged skeleton
    /// by name.
    pub shared_bones: Vec<usize>,
    pub dropped: Vec<DroppedBone>,
}

impl UnifiedSkeleton {
    /// Merged index of a bone of input `mesh`.
    pub fn remap(&self, mesh: usize, bone: BoneIndex) -> Option<BoneIndex> {
        self.remaps
            .get(mesh)
            .and_then(|table| table.get(bone as usize))
            .copied()
            .flatten()
    }

    /// Whether input `mesh` shares at least one bone, by name, with the
    /// merged skeleton.
    pub fn root_compatible(&self, mesh: usize) -> bool {
        self.shared_bones.get(mesh).is_some_and(|&count| count > 0)
    }

    /// Apply reference-pose overrides and check the ordering invariants.
    pub fn finish(mut self, overrides: &[RefPoseOverride<'_>]) -> Result<Self, MergeError> {
        apply_ref_pose_overrides(&mut self.skeleton, overrides);
        self.skeleton.validate()?;
        Ok(self)
    }
}

/// Union of all input skeletons, keyed by bone name.
///
/// The first non-empty skeleton is taken as-is. The roots of later skeletons
/// are taken to be the merged root whatever their name. Their other bones that
/// are not yet present are appended under their parent's merged equivalent. A
/// bone whose parent cannot be found is dropped; its vertices fall back to
/// other influences during assembly.
pub fn unify_skeletons(inputs: &[&Skeleton]) -> UnifiedSkeleton {
    let mut remaps = Vec::with_capacity(inputs.len());
    let mut shared_bones = Vec::with_capacity(inputs.len());
    let mut dropped = Vec::new();

    let Some(base) = inputs.iter().position(|skeleton| !skeleton.is_empty()) else {
        return UnifiedSkeleton {
            skeleton: Skeleton::new(),
            remaps: inputs.iter().map(|_| Vec::new()).collect(),
            shared_bones: vec![0; inputs.len()],
            dropped,
        };
    };

    let mut merged = inputs[base].clone();

    for (mesh, input) in inputs.iter().enumerate() {
        if input.is_empty() {
            debug!(mesh, "skipping empty skeleton");
            remaps.push(Vec::new());
            shared_bones.push(0);
            continue;
        }
        if mesh == base {
            remaps.push((0..input.len()).map(|i| Some(i as BoneIndex)).collect());
            shared_bones.push(input.len());
            continue;
        }

        let mut shared = 0;
        let mut table: Vec<Option<BoneIndex>> = Vec::with_capacity(input.len());
        for (index, bone) in input.bones().iter().enumerate() {
            let existing = merged.find_bone(&bone.name);
            if existing.is_some() {
                shared += 1;
            }

            if index == 0 {
                if existing != Some(0) {
                    debug!(
                        mesh,
                        root = bone.name.as_str(),
                        "root name differs, using the merged root"
                    );
                }
                table.push(Some(0));
                continue;
            }

            if let Some(existing) = existing {
                table.push(Some(existing));
                continue;
            }

            // Parents precede children, so the parent is already in `table`.
            let parent = bone
                .parent
                .filter(|&parent| (parent as usize) < index)
                .and_then(|parent| table[parent as usize]);

            match parent {
                Some(parent) => {
                    let new_index = merged.push(bone.name.clone(), Some(parent), bone.bind_pose);
                    trace!(mesh, bone = bone.name.as_str(), new_index, "added bone");
                    table.push(Some(new_index));
                }
                None => {
                    warn!(
                        mesh,
                        bone = bone.name.as_str(),
                        "dropping bone whose parent is not in the merged skeleton"
                    );
                    dropped.push(DroppedBone {
                        mesh,
                        bone: index as BoneIndex,
                        name: bone.name.clone(),
                    });
                    table.push(None);
                }
            }
        }
        remaps.push(table);
        shared_bones.push(shared);
    }

    debug!(
        bones = merged.len(),
        dropped = dropped.len(),
        "unified skeletons"
    );

    UnifiedSkeleton {
        skeleton: merged,
        remaps,
        shared_bones,
        dropped,
    }
}

/// Replace bind poses with those of same-named bones in each override source.
///
/// Descendants are taken from the merged hierarchy. Bones missing from the
/// override source keep their pose.
pub fn apply_ref_pose_overrides(skeleton: &mut Skeleton, overrides: &[RefPoseOverride<'_>]) {
    for pose_override in overrides {
        for bone_override in &pose_override.overrides {
            let Some(bone) = skeleton.find_bone(&bone_override.bone_name) else {
                warn!(
                    bone = bone_override.bone_name.as_str(),
                    "reference pose override names a bone that is not in the merged skeleton"
                );
                continue;
            };

            let mut targets = Vec::new();
            if bone_override.mode.includes_bone() {
                targets.push(bone);
            }
            if bone_override.mode.includes_children() {
                targets.extend(skeleton.descendants_of(bone));
            }

            for target in targets {
                let name = &skeleton.bones()[target as usize].name;
                let Some(pose) = pose_override
                    .source
                    .find_bone(name)
                    .and_then(|source| pose_override.source.bone(source))
                    .map(|source| source.bind_pose)
                else {
                    trace!(bone = name.as_str(), "override source has no such bone");
                    continue;
                };
                skeleton.set_bind_pose(target, pose);
            }
        }
    }
}
