//! Merging section bone maps.

use crate::mesh::BoneIndex;

/// Merge `source` into a copy of `target`.
///
/// Returns the grown map together with a table, one entry per `source` slot,
/// giving the slot that bone occupies in the grown map. Neither input is
/// modified, so callers can try a merge and throw the result away when it
/// grows past their limit.
pub fn merge_bone_maps(target: &[BoneIndex], source: &[BoneIndex]) -> (Vec<BoneIndex>, Vec<u16>) {
    let mut merged = target.to_vec();
    let remap = source
        .iter()
        .map(|&bone| match merged.iter().position(|&existing| existing == bone) {
            Some(slot) => slot as u16,
            None => {
                merged.push(bone);
                (merged.len() - 1) as u16
            }
        })
        .collect();
    (merged, remap)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn overlapping_maps() {
        let target = [0, 1, 2];
        let (merged, remap) = merge_bone_maps(&target, &[2, 3, 4]);
        assert_eq!(merged, vec![0, 1, 2, 3, 4]);
        assert_eq!(remap, vec![2, 3, 4]);
        assert_eq!(target, [0, 1, 2]);
    }

    #[test]
    fn unsorted_target_keeps_its_order() {
        let (merged, remap) = merge_bone_maps(&[7, 3], &[3, 9, 7]);
        assert_eq!(merged, vec![7, 3, 9]);
        assert_eq!(remap, vec![1, 2, 0]);
    }

    #[test]
    fn empty_target() {
        let (merged, remap) = merge_bone_maps(&[], &[5, 1]);
        assert_eq!(merged, vec![5, 1]);
        assert_eq!(remap, vec![0, 1]);

        let (merged, remap) = merge_bone_maps(&[4], &[]);
        assert_eq!(merged, vec![4]);
        assert!(remap.is_empty());
    }
}
