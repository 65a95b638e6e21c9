//! Copy a structure set from one series onto another.
//!
//! The contours are moved with a rigid transform and the result is written as
//! a new RTSTRUCT that references the target series. Source images are not
//! needed; only the source directory's RTSTRUCT is read.

use crate::contour::transform_structure_set;
use crate::error::{Error, Result};
use crate::transform::{RigidTransform, RigidTransformParams};
use crate::volume_loader::{VolumeLoader, VolumeLoaderError};
use crate::writer::{ReferencedSeries, SeriesIdentity, StructureSetWriter};

use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOutcome {
    pub output_path: PathBuf,
    pub sop_instance_uid: String,
    pub series_uid: String,
    pub roi_count: usize,
    pub contour_count: usize,
}

/// Transform the RTSTRUCT found in `source_dir` by `params` and write it to
/// `output_path`, attached to the image series in `target_dir`.
///
/// # Errors
///
/// [`Error::MissingStructureSet`] if `source_dir` holds no readable RTSTRUCT,
/// [`Error::NoImageFiles`] if `target_dir` holds no image series.
pub fn copy_structure_set(
    source_dir: impl AsRef<Path>,
    target_dir: impl AsRef<Path>,
    params: &RigidTransformParams,
    output_path: impl AsRef<Path>,
    size_heuristic: bool,
) -> Result<CopyOutcome> {
    let (source_dir, target_dir, output_path) =
        (source_dir.as_ref(), target_dir.as_ref(), output_path.as_ref());

    let scan = match VolumeLoader::scan_directory(source_dir, size_heuristic, &mut |_, _| {}) {
        Ok(scan) => scan,
        Err(VolumeLoaderError::NoImageFiles) => return Err(Error::MissingStructureSet),
        Err(err) => return Err(err.into()),
    };
    if scan.structure_sets.len() > 1 {
        warn!(
            "{} RTSTRUCT files in {}; copying the first",
            scan.structure_sets.len(),
            source_dir.display()
        );
    }
    let rtss = scan
        .structure_sets
        .first()
        .ok_or(Error::MissingStructureSet)?;
    let source = VolumeLoader::load_structure_set(rtss)?;

    let target = VolumeLoader::load_from_directory(target_dir, size_heuristic, &mut |_, _| {})?;

    let transform = RigidTransform::build(params);
    let moved = transform_structure_set(&source, &transform);

    let identity = SeriesIdentity::for_output(&target.template);
    let referenced = ReferencedSeries::from_dataset(&target);
    let sop_instance_uid = StructureSetWriter::new(&identity, &target.template)
        .with_label(source.label.as_str())
        .write(&moved, Some(&referenced), output_path)?;

    info!(
        "Copied {} ROI(s) from {} onto series {}",
        moved.roi_count(),
        rtss.display(),
        referenced.series_uid
    );
    Ok(CopyOutcome {
        output_path: output_path.to_path_buf(),
        sop_instance_uid,
        series_uid: identity.series_uid,
        roi_count: moved.roi_count(),
        contour_count: moved.contour_count(),
    })
}
