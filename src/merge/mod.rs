//! Merging several skinned meshes into one.
//!
//! [`SkinnedMeshMerger`] drives the whole process: the skeletons are unified
//! once, then for each LOD shared by every input the sections are grouped
//! ([`grouper`]) and their buffers rebuilt ([`assembler`]). Finally the
//! mesh-wide data (bounds, sockets, materials, inverse bind matrices) is
//! combined.

pub mod assembler;
pub mod bone_map;
pub mod grouper;
pub mod job;
pub mod skeleton;

use rootcause::Report;
use tracing::{debug, trace};

use crate::error::{MergeError, MergeResult};
use crate::mesh::{
    BoneIndex, BoundingBox, MAX_INFLUENCES_PER_STREAM, MAX_TEXCOORDS, MaterialHandle, Skeleton,
    SkinnedMesh, Socket,
};

use self::assembler::{AssemblyContext, build_lod};
use self::grouper::group_sections;
use self::job::MergeJob;
use self::skeleton::{DroppedBone, UnifiedSkeleton, unify_skeletons};

/// Progress of a [`SkinnedMeshMerger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Idle,
    SkeletonMerged,
    /// Building the given output LOD.
    PerLodProcessing(usize),
    Finalizing,
    Done,
    Failed,
}

/// Everything a successful merge produces.
#[derive(Debug, Clone)]
pub struct MergeOutput {
    pub mesh: SkinnedMesh,
    /// Per input mesh: original bone index → merged bone index.
    pub bone_remaps: Vec<Vec<Option<BoneIndex>>>,
    /// Bones left out of the merged skeleton. Vertices weighted to them were
    /// moved onto other influences.
    pub dropped_bones: Vec<DroppedBone>,
}

/// Receiver of the finished mesh, typically something that creates GPU buffers.
pub trait ResourceUploader {
    type Error: std::fmt::Display;

    fn upload(&mut self, mesh: &SkinnedMesh) -> Result<(), Self::Error>;
}

/// Single-use driver for one [`MergeJob`].
#[derive(Debug)]
pub struct SkinnedMeshMerger<'a> {
    job: MergeJob<'a>,
    state: MergeState,
}

impl<'a> SkinnedMeshMerger<'a> {
    pub fn new(job: MergeJob<'a>) -> Self {
        Self {
            job,
            state: MergeState::Idle,
        }
    }

    pub fn state(&self) -> MergeState {
        self.state
    }

    pub fn job(&self) -> &MergeJob<'a> {
        &self.job
    }

    /// Run the merge. On failure the merger ends up in [`MergeState::Failed`].
    pub fn merge(&mut self) -> MergeResult<MergeOutput> {
        self.run().map_err(Report::new)
    }

    /// Run the merge and hand the result to `uploader` exactly once.
    pub fn merge_and_upload<U: ResourceUploader>(
        &mut self,
        uploader: &mut U,
    ) -> MergeResult<MergeOutput> {
        let output = self.merge()?;
        uploader.upload(&output.mesh).map_err(|e| {
            self.state = MergeState::Failed;
            Report::new(MergeError::Upload(e.to_string()))
        })?;
        Ok(output)
    }

    fn set_state(&mut self, state: MergeState) {
        trace!(from = ?self.state, to = ?state, "merge state");
        self.state = state;
    }

    fn run(&mut self) -> Result<MergeOutput, MergeError> {
        let result = self.run_stages();
        if result.is_err() {
            self.set_state(MergeState::Failed);
        }
        result
    }

    fn run_stages(&mut self) -> Result<MergeOutput, MergeError> {
        self.job.validate()?;
        let unified = self.merge_skeletons()?;
        self.set_state(MergeState::SkeletonMerged);

        let job = &self.job;
        let lod_count = job.output_lod_count();
        if lod_count == 0 {
            return Err(MergeError::NoCommonLods {
                common_lods: job.common_lod_count(),
                strip_top_lods: job.strip_top_lods(),
            });
        }

        let has_vertex_colors = job.meshes().iter().any(|mesh| mesh.has_vertex_colors);
        let full_precision_uvs = job.meshes().iter().any(|mesh| mesh.full_precision_uvs);
        let mut materials: Vec<MaterialHandle> = Vec::new();
        let mut lods = Vec::with_capacity(lod_count);

        for lod in 0..lod_count {
            self.set_state(MergeState::PerLodProcessing(lod));
            let job = &self.job;
            let source_lod = lod + job.strip_top_lods();

            let specs = group_sections(source_lod, job, &unified)?;
            if let Some(spec) = specs.iter().find(|spec| spec.over_limit) {
                let contributor = &spec.contributors[0];
                return Err(MergeError::SectionExceedsBoneLimit {
                    mesh: contributor.mesh,
                    lod: source_lod,
                    section: contributor.section,
                    bones: spec.bone_map.len(),
                    limit: job.max_bones_per_section(),
                });
            }

            let material_slots: Vec<u16> = specs
                .iter()
                .map(|spec| {
                    let slot = materials
                        .iter()
                        .position(|material| *material == spec.material)
                        .unwrap_or_else(|| {
                            materials.push(spec.material);
                            materials.len() - 1
                        });
                    slot as u16
                })
                .collect();

            let source_lods = job.meshes().iter().map(|mesh| &mesh.lods[source_lod]);
            let num_tex_coords = source_lods
                .clone()
                .map(|lod| lod.num_tex_coords as usize)
                .max()
                .unwrap_or(1)
                .clamp(1, MAX_TEXCOORDS);
            let max_bone_influences = source_lods
                .map(|lod| lod.max_bone_influences)
                .max()
                .unwrap_or(0)
                .max(MAX_INFLUENCES_PER_STREAM as u32);

            let ctx = AssemblyContext {
                job,
                lod: source_lod,
                num_tex_coords,
                has_vertex_colors,
                full_precision_uvs,
            };
            lods.push(build_lod(
                &specs,
                &material_slots,
                &unified.skeleton,
                max_bone_influences,
                &ctx,
            )?);
        }

        self.set_state(MergeState::Finalizing);
        let job = &self.job;

        let bounds = job
            .meshes()
            .iter()
            .fold(BoundingBox::EMPTY, |bounds, mesh| bounds.union(&mesh.bounds));

        let mut sockets: Vec<Socket> = Vec::new();
        for mesh in job.meshes() {
            for socket in &mesh.sockets {
                if sockets.iter().any(|s| s.name == socket.name) {
                    debug!(socket = socket.name.as_str(), "skipping duplicate socket");
                    continue;
                }
                sockets.push(socket.clone());
            }
        }

        let UnifiedSkeleton {
            skeleton,
            remaps,
            dropped,
            ..
        } = unified;

        let mesh = SkinnedMesh {
            inverse_bind_matrices: skeleton.inverse_bind_matrices(),
            skeleton,
            lods,
            materials,
            sockets,
            bounds,
            has_vertex_colors,
            full_precision_uvs,
        };

        debug!(
            bones = mesh.skeleton.len(),
            lods = mesh.lods.len(),
            materials = mesh.materials.len(),
            "merge finished"
        );
        self.set_state(MergeState::Done);

        Ok(MergeOutput {
            mesh,
            bone_remaps: remaps,
            dropped_bones: dropped,
        })
    }

    fn merge_skeletons(&self) -> Result<UnifiedSkeleton, MergeError> {
        let skeletons: Vec<_> = self
            .job
            .meshes()
            .iter()
            .map(|mesh| &mesh.skeleton)
            .collect();

        if let Some(mesh) = skeletons.iter().position(|skeleton| skeleton.is_empty()) {
            return Err(MergeError::EmptySkeleton { mesh });
        }

        let unified = unify_skeletons(&skeletons);
        if let Some(mesh) = (0..skeletons.len()).find(|&mesh| !unified.root_compatible(mesh)) {
            let name = |skeleton: &Skeleton| {
                skeleton
                    .root()
                    .map(|bone| bone.name.clone())
                    .unwrap_or_default()
            };
            return Err(MergeError::IncompatibleRoot {
                mesh,
                expected: name(&unified.skeleton),
                found: name(skeletons[mesh]),
            });
        }

        unified.finish(self.job.ref_pose_overrides())
    }
}

/// Merge the job's meshes in one call.
pub fn merge_meshes(job: MergeJob<'_>) -> MergeResult<MergeOutput> {
    SkinnedMeshMerger::new(job).merge()
}
