//! Skinned vertex layout.

use glam::{Vec2, Vec3, Vec4};

/// Maximum number of UV channels a vertex carries.
pub const MAX_TEXCOORDS: usize = 4;

/// Influence slots available when a LOD uses extra bone influences.
pub const MAX_TOTAL_INFLUENCES: usize = 8;

/// Influence slots available without extra bone influences.
pub const MAX_INFLUENCES_PER_STREAM: usize = 4;

/// Sum of all influence weights of a vertex.
pub const WEIGHT_SCALE: u32 = 255;

/// RGBA8 vertex color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Color(pub [u8; 4]);

impl Color {
    pub const WHITE: Self = Self([255, 255, 255, 255]);
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

/// Per-vertex bone influences.
///
/// `bones[i]` is a slot in the owning section's bone map, never a skeleton
/// index. Weights are 0–255 fixed point and sum to [`WEIGHT_SCALE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SkinWeights {
    pub bones: [u8; MAX_TOTAL_INFLUENCES],
    pub weights: [u8; MAX_TOTAL_INFLUENCES],
}

impl SkinWeights {
    /// Build from `(slot, weight)` pairs; extra pairs beyond the slot count are ignored.
    pub fn from_pairs(pairs: &[(u8, u8)]) -> Self {
        let mut result = Self::default();
        for (i, &(bone, weight)) in pairs.iter().take(MAX_TOTAL_INFLUENCES).enumerate() {
            result.bones[i] = bone;
            result.weights[i] = weight;
        }
        result
    }

    /// Slot holding the largest weight, first one on ties.
    pub fn dominant_slot(&self) -> Option<usize> {
        self.weights
            .iter()
            .enumerate()
            .filter(|(_, w)| **w > 0)
            .fold(None, |best: Option<(usize, u8)>, (i, &w)| match best {
                Some((_, best_w)) if best_w >= w => best,
                _ => Some((i, w)),
            })
            .map(|(i, _)| i)
    }

    pub fn total_weight(&self) -> u32 {
        self.weights.iter().map(|w| *w as u32).sum()
    }

    /// Number of slots, counted from the front, needed to hold every non-zero weight.
    pub fn used_slots(&self) -> usize {
        self.weights
            .iter()
            .rposition(|w| *w > 0)
            .map_or(0, |last| last + 1)
    }
}

/// A GPU-skinned vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SkinnedVertex {
    pub position: Vec3,
    pub tangent_x: Vec3,
    /// Normal in `xyz`, bitangent sign in `w`.
    pub tangent_z: Vec4,
    pub uvs: [Vec2; MAX_TEXCOORDS],
    pub color: Color,
    pub skin: SkinWeights,
}

impl Default for SkinnedVertex {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            tangent_x: Vec3::X,
            tangent_z: Vec4::new(0.0, 0.0, 1.0, 1.0),
            uvs: [Vec2::ZERO; MAX_TEXCOORDS],
            color: Color::WHITE,
            skin: SkinWeights::default(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dominant_slot_prefers_first_on_tie() {
        let skin = SkinWeights::from_pairs(&[(3, 100), (1, 155), (2, 155)]);
        assert_eq!(skin.dominant_slot(), Some(1));
        assert_eq!(SkinWeights::default().dominant_slot(), None);
    }

    #[test]
    fn used_slots_counts_trailing_weights() {
        let skin = SkinWeights::from_pairs(&[(0, 200), (1, 0), (2, 0), (3, 0), (4, 55)]);
        assert_eq!(skin.used_slots(), 5);
        assert_eq!(skin.total_weight(), 255);
        assert_eq!(SkinWeights::default().used_slots(), 0);
    }
}
