mod common;

use dicom::object::open_file;
use dicom_dictionary_std::tags;
use nalgebra::{Point3, Vector3};

use dicom_rigid::attributes::DicomAttributes;
use dicom_rigid::rtss_copier::copy_structure_set;
use dicom_rigid::{Error, RigidTransformParams, StructureSet};

#[test]
fn copy_references_the_target_series() {
    let source = common::phantom(10.0);
    let target = common::write_fixture(
        &common::ct_volume((20, 20, 4), Point3::new(0.0, 0.0, -1.0)),
        None,
    );
    let out = tempfile::tempdir().unwrap();
    let path = out.path().join("copied.dcm");

    let params = RigidTransformParams::translation(1.0, -2.0, 0.0);
    let outcome = copy_structure_set(source.path(), target.path(), &params, &path, true).unwrap();
    assert_eq!(outcome.roi_count, 1);
    assert_eq!(outcome.contour_count, 1);

    let obj = open_file(&path).unwrap();
    assert_eq!(
        obj.string(tags::FRAME_OF_REFERENCE_UID).unwrap(),
        target.identity.frame_of_reference_uid
    );
    assert_eq!(obj.string(tags::STUDY_INSTANCE_UID).unwrap(), target.identity.study_uid);
    assert_eq!(obj.string(tags::SERIES_INSTANCE_UID).unwrap(), outcome.series_uid);

    let copied = StructureSet::from_dataset(&obj).unwrap();
    let original = StructureSet::from_dataset(
        &open_file(source.path().join(common::RTSS_FILE)).unwrap(),
    )
    .unwrap();
    let roi = copied.roi_by_name("BOX").unwrap();
    assert_eq!(roi.color, Some([255, 0, 0]));
    for (moved, before) in roi.contours[0]
        .points
        .iter()
        .zip(&original.rois[0].contours[0].points)
    {
        assert!((moved - before - Vector3::new(1.0, -2.0, 0.0)).norm() < 1e-9);
    }

    // Contours on z = 1 sit on the target's third slice (z = -1, 0, 1, 2).
    let (_, referenced) = &roi.contours[0].referenced_images[0];
    assert_eq!(referenced, &target.series.slices[2].sop_instance_uid);
}

#[test]
fn rotation_about_center_is_applied_to_contours() {
    let source = common::phantom(12.0);
    let target = common::phantom(10.0);
    let out = tempfile::tempdir().unwrap();
    let path = out.path().join("rotated.dcm");

    let params = RigidTransformParams::default()
        .with_rotation(0.0, 0.0, 90.0)
        .with_center(Point3::new(10.0, 10.0, 1.0));
    copy_structure_set(source.path(), target.path(), &params, &path, true).unwrap();

    let copied = StructureSet::from_dataset(&open_file(&path).unwrap()).unwrap();
    let mean = copied.rois[0].contours[0].mean_point().unwrap();
    // (12, 10) turns a quarter around (10, 10) to (10, 12).
    assert!((mean - Point3::new(10.0, 12.0, 1.0)).norm() < 1e-6);
}

#[test]
fn source_without_structure_set_is_rejected() {
    let source = common::write_fixture(&common::ct_volume((8, 8, 2), Point3::origin()), None);
    let target = common::phantom(10.0);
    let out = tempfile::tempdir().unwrap();
    let result = copy_structure_set(
        source.path(),
        target.path(),
        &RigidTransformParams::default(),
        out.path().join("never.dcm"),
        true,
    );
    assert!(matches!(result, Err(Error::MissingStructureSet)));
    assert!(!out.path().join("never.dcm").exists());
}
