use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use rootcause::prelude::*;
use thiserror::Error;
use tracing::info;

use skelmerge::merge::job::{BoneOverride, OverrideMode, RefPoseOverride};
use skelmerge::mesh::SkinnedMesh;
use skelmerge::{MAX_GPU_SKIN_BONES, MergeJob, SkinnedMeshMerger};

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to read {}", .0.display())]
    Read(PathBuf),
    #[error("failed to write {}", .0.display())]
    Write(PathBuf),
    #[error("invalid override {0:?}, expected BONE=bone|children|both")]
    InvalidOverride(String),
    #[error("--override given without --pose-source")]
    MissingPoseSource,
    #[error("merge failed")]
    Merge,
}

/// Merge JSON-encoded skinned meshes into a single mesh.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Where to write the merged mesh
    #[clap(short, long)]
    output: PathBuf,

    /// Optional file receiving the per-input bone remap tables
    #[clap(long)]
    remaps: Option<PathBuf>,

    /// Number of highest-detail LODs to leave out
    #[clap(long, default_value_t = 0)]
    strip_top_lods: usize,

    /// Maximum bones a single section may reference
    #[clap(long, default_value_t = MAX_GPU_SKIN_BONES)]
    max_bones: usize,

    /// Mesh whose skeleton supplies overridden bind poses
    #[clap(long)]
    pose_source: Option<PathBuf>,

    /// Bind pose override, as BONE=bone|children|both
    #[clap(long = "override")]
    overrides: Vec<String>,

    /// Input meshes, highest priority first
    inputs: Vec<PathBuf>,
}

fn read_mesh(path: &Path) -> Result<SkinnedMesh, Report<CliError>> {
    let file = File::open(path).context(CliError::Read(path.to_path_buf()))?;
    serde_json::from_reader(BufReader::new(file)).context(CliError::Read(path.to_path_buf()))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), Report<CliError>> {
    let file = File::create(path).context(CliError::Write(path.to_path_buf()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value).context(CliError::Write(path.to_path_buf()))?;
    writer.flush().context(CliError::Write(path.to_path_buf()))
}

fn parse_override(text: &str) -> Result<BoneOverride, Report<CliError>> {
    let invalid = || Report::new(CliError::InvalidOverride(text.to_string()));
    let (bone_name, mode) = text.rsplit_once('=').ok_or_else(invalid)?;
    let mode = match mode {
        "bone" => OverrideMode::BoneOnly,
        "children" => OverrideMode::ChildrenOnly,
        "both" => OverrideMode::BoneAndChildren,
        _ => return Err(invalid()),
    };
    Ok(BoneOverride {
        bone_name: bone_name.to_string(),
        mode,
    })
}

fn main() -> Result<(), Report<CliError>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let meshes = args
        .inputs
        .iter()
        .map(|path| read_mesh(path))
        .collect::<Result<Vec<_>, _>>()?;

    let pose_source = args.pose_source.as_deref().map(read_mesh).transpose()?;
    let overrides = args
        .overrides
        .iter()
        .map(|text| parse_override(text))
        .collect::<Result<Vec<_>, _>>()?;
    let ref_pose_overrides = match (&pose_source, overrides.is_empty()) {
        (_, true) => Vec::new(),
        (Some(source), false) => vec![RefPoseOverride {
            source: &source.skeleton,
            overrides,
        }],
        (None, false) => return Err(Report::new(CliError::MissingPoseSource)),
    };

    let job = MergeJob::builder()
        .meshes(meshes.iter().collect())
        .strip_top_lods(args.strip_top_lods)
        .max_bones_per_section(args.max_bones)
        .ref_pose_overrides(ref_pose_overrides)
        .build();

    let output = SkinnedMeshMerger::new(job).merge().context(CliError::Merge)?;

    for dropped in &output.dropped_bones {
        info!(
            mesh = dropped.mesh,
            bone = dropped.name.as_str(),
            "bone dropped from merged skeleton"
        );
    }
    info!(
        bones = output.mesh.skeleton.len(),
        lods = output.mesh.lods.len(),
        "writing {}",
        args.output.display()
    );

    write_json(&args.output, &output.mesh)?;
    if let Some(path) = &args.remaps {
        write_json(path, &output.bone_remaps)?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unreadable_input_keeps_the_path_and_the_cause() {
        let path = std::env::temp_dir().join("skelmerge-no-such-mesh.json");
        let err = read_mesh(&path).unwrap_err();
        assert!(matches!(err.current_context(), CliError::Read(p) if *p == path));
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn override_modes() {
        assert_eq!(
            parse_override("spine=both").unwrap().mode,
            OverrideMode::BoneAndChildren
        );
        let err = parse_override("spine=all").unwrap_err();
        assert!(matches!(err.current_context(), CliError::InvalidOverride(_)));
    }
}
