//! Joint hierarchy stored as an append-only arena.
//!
//! Bones are kept in a flat `Vec` where every bone's parent precedes it, with a
//! name→index lookup kept next to the arena. Nothing links bones by reference,
//! so the hierarchy cannot form a cycle.

use std::collections::HashMap;

use glam::{Mat4, Quat, Vec3};
use thiserror::Error;

/// Index of a bone inside a [`Skeleton`].
pub type BoneIndex = u16;

/// Errors reported by [`Skeleton::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SkeletonError {
    #[error("bone {index} ({name}) has parent {parent}, which does not precede it")]
    ParentNotBeforeChild {
        index: usize,
        name: String,
        parent: usize,
    },
    #[error("bone {index} ({name}) has no parent but is not the root")]
    SecondRoot { index: usize, name: String },
    #[error("root bone {name} declares parent {parent}")]
    RootHasParent { name: String, parent: usize },
    #[error("bone name {name} appears at both {first} and {second}")]
    DuplicateName {
        name: String,
        first: usize,
        second: usize,
    },
    #[error("skeleton has {count} bones, more than a bone index can address")]
    TooManyBones { count: usize },
}

/// Local bind-pose transform of a bone relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoneTransform {
    pub rotation: Quat,
    pub translation: Vec3,
    pub scale: Vec3,
}

impl BoneTransform {
    pub const IDENTITY: Self = Self {
        rotation: Quat::IDENTITY,
        translation: Vec3::ZERO,
        scale: Vec3::ONE,
    };

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

impl Default for BoneTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A single joint.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bone {
    pub name: String,
    /// `None` only for the root, which always sits at index 0.
    pub parent: Option<BoneIndex>,
    pub bind_pose: BoneTransform,
}

/// Reference skeleton of a skinned mesh.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "Vec<Bone>", into = "Vec<Bone>"))]
pub struct Skeleton {
    bones: Vec<Bone>,
    name_to_index: HashMap<String, BoneIndex>,
}

impl PartialEq for Skeleton {
    fn eq(&self, other: &Self) -> bool {
        self.bones == other.bones
    }
}

impl From<Vec<Bone>> for Skeleton {
    fn from(bones: Vec<Bone>) -> Self {
        let mut name_to_index = HashMap::with_capacity(bones.len());
        for (index, bone) in bones.iter().enumerate() {
            // First occurrence wins so lookups stay stable on malformed input.
            name_to_index
                .entry(bone.name.clone())
                .or_insert(index as BoneIndex);
        }
        Self {
            bones,
            name_to_index,
        }
    }
}

impl From<Skeleton> for Vec<Bone> {
    fn from(skeleton: Skeleton) -> Self {
        skeleton.bones
    }
}

impl Skeleton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn bone(&self, index: BoneIndex) -> Option<&Bone> {
        self.bones.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn root(&self) -> Option<&Bone> {
        self.bones.first()
    }

    pub fn find_bone(&self, name: &str) -> Option<BoneIndex> {
        self.name_to_index.get(name).copied()
    }

    pub fn parent_of(&self, index: BoneIndex) -> Option<BoneIndex> {
        self.bone(index).and_then(|bone| bone.parent)
    }

    /// Append a bone and return its index.
    ///
    /// The caller is responsible for `parent` already being present; use
    /// [`Skeleton::validate`] to check a finished skeleton.
    pub fn push(
        &mut self,
        name: impl Into<String>,
        parent: Option<BoneIndex>,
        bind_pose: BoneTransform,
    ) -> BoneIndex {
        let name = name.into();
        let index = self.bones.len() as BoneIndex;
        self.name_to_index.entry(name.clone()).or_insert(index);
        self.bones.push(Bone {
            name,
            parent,
            bind_pose,
        });
        index
    }

    pub fn set_bind_pose(&mut self, index: BoneIndex, bind_pose: BoneTransform) {
        if let Some(bone) = self.bones.get_mut(index as usize) {
            bone.bind_pose = bind_pose;
        }
    }

    /// All transitive children of `ancestor`, in index order.
    pub fn descendants_of(&self, ancestor: BoneIndex) -> Vec<BoneIndex> {
        // Parents precede children, so one forward pass marks the whole subtree.
        let mut in_subtree = vec![false; self.bones.len()];
        let mut result = Vec::new();
        if let Some(flag) = in_subtree.get_mut(ancestor as usize) {
            *flag = true;
        }
        for (index, bone) in self.bones.iter().enumerate().skip(ancestor as usize + 1) {
            if let Some(parent) = bone.parent {
                if in_subtree.get(parent as usize).copied().unwrap_or(false) {
                    in_subtree[index] = true;
                    result.push(index as BoneIndex);
                }
            }
        }
        result
    }

    /// Check parent-before-child ordering, a single root at index 0, and
    /// unique names.
    pub fn validate(&self) -> Result<(), SkeletonError> {
        if self.bones.len() > BoneIndex::MAX as usize + 1 {
            return Err(SkeletonError::TooManyBones {
                count: self.bones.len(),
            });
        }

        let mut seen: HashMap<&str, usize> = HashMap::with_capacity(self.bones.len());
        for (index, bone) in self.bones.iter().enumerate() {
            if let Some(first) = seen.insert(bone.name.as_str(), index) {
                return Err(SkeletonError::DuplicateName {
                    name: bone.name.clone(),
                    first,
                    second: index,
                });
            }

            match (index, bone.parent) {
                (0, Some(parent)) => {
                    return Err(SkeletonError::RootHasParent {
                        name: bone.name.clone(),
                        parent: parent as usize,
                    });
                }
                (0, None) => {}
                (_, None) => {
                    return Err(SkeletonError::SecondRoot {
                        index,
                        name: bone.name.clone(),
                    });
                }
                (_, Some(parent)) if parent as usize >= index => {
                    return Err(SkeletonError::ParentNotBeforeChild {
                        index,
                        name: bone.name.clone(),
                        parent: parent as usize,
                    });
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Bind pose of every bone in component (skeleton root) space.
    pub fn component_space_transforms(&self) -> Vec<Mat4> {
        let mut result: Vec<Mat4> = Vec::with_capacity(self.bones.len());
        for bone in &self.bones {
            let local = bone.bind_pose.to_mat4();
            let world = match bone.parent {
                Some(parent) if (parent as usize) < result.len() => result[parent as usize] * local,
                _ => local,
            };
            result.push(world);
        }
        result
    }

    /// Matrices taking component-space positions into each bone's bind space.
    pub fn inverse_bind_matrices(&self) -> Vec<Mat4> {
        self.component_space_transforms()
            .into_iter()
            .map(|m| m.inverse())
            .collect()
    }

    /// Add every ancestor of the given bones and return the set sorted ascending.
    pub fn with_ancestors(&self, bones: impl IntoIterator<Item = BoneIndex>) -> Vec<BoneIndex> {
        let mut required = vec![false; self.bones.len()];
        for bone in bones {
            let mut current = Some(bone);
            while let Some(index) = current {
                match required.get_mut(index as usize) {
                    Some(flag) if !*flag => *flag = true,
                    _ => break,
                }
                current = self.parent_of(index);
            }
        }
        required
            .iter()
            .enumerate()
            .filter_map(|(index, &flag)| flag.then_some(index as BoneIndex))
            .collect()
    }
}
