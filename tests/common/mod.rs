//! Synthetic DICOM datasets written with the crate's own writers.
#![allow(dead_code)]

use std::path::Path;

use dicom::core::VR;
use dicom::object::InMemDicomObject;
use dicom_dictionary_std::tags;
use nalgebra::{Point3, Vector3};
use ndarray::Array3;
use tempfile::TempDir;

use dicom_rigid::attributes::DicomAttributesMut;
use dicom_rigid::frame::SpatialFrame;
use dicom_rigid::structure_set::{Roi, StructureSet, box_contour};
use dicom_rigid::volume::Volume;
use dicom_rigid::writer::{DicomSeriesWriter, ReferencedSeries, SeriesIdentity, StructureSetWriter};

pub const RTSS_FILE: &str = "rtss.dcm";

pub struct Fixture {
    pub dir: TempDir,
    pub identity: SeriesIdentity,
    pub series: ReferencedSeries,
}

impl Fixture {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

pub fn patient_template() -> InMemDicomObject {
    let mut obj = InMemDicomObject::new_empty();
    obj.put_text(tags::PATIENT_NAME, VR::PN, "Phantom^Box");
    obj.put_text(tags::PATIENT_ID, VR::LO, "PHANTOM-001");
    obj.put_text(tags::MODALITY, VR::CS, "CT");
    obj
}

/// Voxel value at integer index (x, y, z). Integral, so it survives the
/// u16 rescale unchanged.
pub fn ramp(x: usize, y: usize, z: usize) -> f32 {
    (x + 20 * y + 400 * z) as f32
}

pub fn ct_volume(size: (usize, usize, usize), origin: Point3<f64>) -> Volume {
    let frame = SpatialFrame::axis_aligned(size, Vector3::repeat(1.0), origin)
        .expect("valid frame");
    let (nx, ny, nz) = size;
    let data = Array3::from_shape_fn((nz, ny, nx), |(z, y, x)| ramp(x, y, z));
    Volume::new(data, frame).expect("volume matches frame")
}

/// A single box ROI on the middle slice.
pub fn box_structure_set(cx: f64, cy: f64, z: f64) -> StructureSet {
    StructureSet::new("PHANTOM").with_roi(
        Roi::new(1, "BOX")
            .with_color([255, 0, 0])
            .with_contour(box_contour(cx, cy, z, 2.0)),
    )
}

/// Write `volume` as a CT series into a new temporary directory, plus an
/// RTSTRUCT for `ss` when given.
pub fn write_fixture(volume: &Volume, ss: Option<&StructureSet>) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let template = patient_template();
    let identity = SeriesIdentity::for_output(&template);
    let series = DicomSeriesWriter::new(&identity, &template, &template)
        .with_series_description("Synthetic CT")
        .with_series_number(1)
        .write(volume, dir.path(), &|| false, &mut |_, _| {})
        .expect("series written");
    if let Some(ss) = ss {
        StructureSetWriter::new(&identity, &template)
            .write(ss, Some(&series), &dir.path().join(RTSS_FILE))
            .expect("structure set written");
    }
    Fixture {
        dir,
        identity,
        series,
    }
}

/// The 20x20x3 phantom at the origin with a box ROI centered at (cx, 10, 1).
pub fn phantom(cx: f64) -> Fixture {
    write_fixture(
        &ct_volume((20, 20, 3), Point3::origin()),
        Some(&box_structure_set(cx, 10.0, 1.0)),
    )
}
