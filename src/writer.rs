//! DICOM output: one file per image slice, one RTSTRUCT per structure set.
//!
//! All files of one run share a [`SeriesIdentity`]. Image slices are numbered
//! along the stack normal of the output grid, never by input file order.

use crate::attributes::{DicomAttributes, DicomAttributesMut, generate_uid};
use crate::enums::StackOrder;
use crate::error::{Error, Result};
use crate::origin_resolver::{SliceRecord, sort_stack};
use crate::structure_set::{Contour, StructureSet};
use crate::volume::Volume;
use crate::volume_loader::LoadedDataset;

use dicom::{
    core::{DataElement, PrimitiveValue, Tag, VR},
    object::{FileMetaTableBuilder, InMemDicomObject},
};
use dicom_dictionary_std::{tags, uids};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

/// Patient and study level attributes carried over from the reference series.
const PATIENT_STUDY_TAGS: [Tag; 11] = [
    tags::PATIENT_NAME,
    tags::PATIENT_ID,
    tags::PATIENT_BIRTH_DATE,
    tags::PATIENT_SEX,
    tags::STUDY_DATE,
    tags::STUDY_TIME,
    tags::STUDY_ID,
    tags::STUDY_DESCRIPTION,
    tags::ACCESSION_NUMBER,
    tags::REFERRING_PHYSICIAN_NAME,
    tags::PATIENT_POSITION,
];

/// Storage SOP class for an image series of `modality`; CT unless MR or PT.
fn storage_class_for(modality: &str) -> &'static str {
    match modality {
        "MR" => uids::MR_IMAGE_STORAGE,
        "PT" => uids::POSITRON_EMISSION_TOMOGRAPHY_IMAGE_STORAGE,
        _ => uids::CT_IMAGE_STORAGE,
    }
}

/// Series / study / frame-of-reference identity shared by every file of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesIdentity {
    pub series_uid: String,
    pub study_uid: String,
    pub frame_of_reference_uid: String,
}

impl SeriesIdentity {
    /// Fresh series in the study and frame of reference of `reference`.
    ///
    /// Study and frame-of-reference UIDs missing from `reference` are generated.
    pub fn for_output(reference: &InMemDicomObject) -> Self {
        Self {
            series_uid: generate_uid(),
            study_uid: reference
                .string(tags::STUDY_INSTANCE_UID)
                .unwrap_or_else(generate_uid),
            frame_of_reference_uid: reference
                .string(tags::FRAME_OF_REFERENCE_UID)
                .unwrap_or_else(generate_uid),
        }
    }
}

/// One slice an RTSTRUCT can point at.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferencedSlice {
    pub sop_instance_uid: String,
    pub instance_number: i32,
    pub position: Point3<f64>,
    /// Position projected on the series stack normal.
    pub projection: f64,
}

/// An image series as seen from a structure set.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferencedSeries {
    pub series_uid: String,
    pub sop_class_uid: String,
    pub normal: Vector3<f64>,
    /// Slices in instance order.
    pub slices: Vec<ReferencedSlice>,
}

impl ReferencedSeries {
    /// The series a loaded dataset was read from.
    pub fn from_dataset(dataset: &LoadedDataset) -> Self {
        let normal = dataset.volume.frame().stack_normal();
        let slices = dataset
            .slices
            .iter()
            .enumerate()
            .map(|(i, slice)| ReferencedSlice {
                sop_instance_uid: slice.sop_instance_uid.clone(),
                instance_number: i as i32 + 1,
                position: slice.position,
                projection: slice.position.coords.dot(&normal),
            })
            .collect();
        Self {
            series_uid: dataset
                .template
                .string(tags::SERIES_INSTANCE_UID)
                .unwrap_or_default(),
            sop_class_uid: dataset
                .template
                .string(tags::SOP_CLASS_UID)
                .unwrap_or_else(|| storage_class_for(&dataset.modality).to_string()),
            normal,
            slices,
        }
    }

    /// Slice closest to `point` along the stack normal.
    pub fn nearest(&self, point: &Point3<f64>) -> Option<&ReferencedSlice> {
        let projection = point.coords.dot(&self.normal);
        self.slices.iter().min_by(|a, b| {
            (a.projection - projection)
                .abs()
                .total_cmp(&(b.projection - projection).abs())
        })
    }
}

/// Linear mapping from stored `u16` values to output values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rescale {
    pub slope: f64,
    pub intercept: f64,
}

impl Rescale {
    /// Integral data whose range fits 16 bits keeps slope 1; anything else is
    /// spread over the full `u16` range.
    pub fn for_range(min: f32, max: f32, integral: bool) -> Self {
        let span = f64::from(max) - f64::from(min);
        let slope = if span <= 0.0 || (integral && span <= f64::from(u16::MAX)) {
            1.0
        } else {
            span / f64::from(u16::MAX)
        };
        Self {
            slope,
            intercept: f64::from(min),
        }
    }

    pub fn store(&self, value: f32) -> u16 {
        ((f64::from(value) - self.intercept) / self.slope)
            .round()
            .clamp(0.0, f64::from(u16::MAX)) as u16
    }
}

pub struct DicomSeriesWriter<'a> {
    identity: &'a SeriesIdentity,
    patient_template: &'a InMemDicomObject,
    modality_template: &'a InMemDicomObject,
    series_description: String,
    series_number: i32,
    order: StackOrder,
}

impl<'a> DicomSeriesWriter<'a> {
    /// `patient_template` supplies patient/study attributes (the fixed series);
    /// `modality_template` supplies Modality and SOP class (the moving series).
    pub fn new(
        identity: &'a SeriesIdentity,
        patient_template: &'a InMemDicomObject,
        modality_template: &'a InMemDicomObject,
    ) -> Self {
        Self {
            identity,
            patient_template,
            modality_template,
            series_description: "Rigid Transformed Image".to_string(),
            series_number: 100,
            order: StackOrder::Ascending,
        }
    }

    pub fn with_series_description(mut self, description: impl Into<String>) -> Self {
        self.series_description = description.into();
        self
    }

    pub fn with_series_number(mut self, number: i32) -> Self {
        self.series_number = number;
        self
    }

    pub fn with_order(mut self, order: StackOrder) -> Self {
        self.order = order;
        self
    }

    /// Write `volume` as `slice_0001.dcm`, `slice_0002.dcm`, ... into `dir`.
    ///
    /// `cancelled` is polled before each slice; `progress` receives
    /// (written, total) after each one.
    pub fn write(
        &self,
        volume: &Volume,
        dir: &Path,
        cancelled: &dyn Fn() -> bool,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<ReferencedSeries> {
        let frame = volume.frame();
        let (columns, rows, depth) = frame.size();
        let too_large = |_| {
            Error::write_failure(dir, format!("{columns}x{rows} slices exceed 65535 pixels per side"))
        };
        let (rows_u16, columns_u16) = (
            u16::try_from(rows).map_err(too_large)?,
            u16::try_from(columns).map_err(too_large)?,
        );
        fs::create_dir_all(dir).map_err(|err| Error::write_failure(dir, err))?;

        let orientation = frame.orientation_cosines();
        let records: Vec<SliceRecord> = (0..depth)
            .map(|k| {
                SliceRecord::new(format!("slice {k}"))
                    .with_position(frame.slice_position(k))
                    .with_orientation(orientation)
            })
            .collect();
        let stack = sort_stack(&records)?;
        let ordered = stack.ordered(self.order);

        let (min, max) = volume.value_range().unwrap_or((0.0, 0.0));
        let integral = volume.data().par_iter().all(|v| v.fract() == 0.0);
        let rescale = Rescale::for_range(min, max, integral);
        let window_center = (f64::from(min) + f64::from(max)) / 2.0;
        let window_width = (f64::from(max) - f64::from(min)).max(1.0);

        let modality = self
            .modality_template
            .string(tags::MODALITY)
            .unwrap_or_else(|| "CT".to_string());
        let sop_class_uid = self
            .modality_template
            .string(tags::SOP_CLASS_UID)
            .filter(|uid| uid != uids::RT_STRUCTURE_SET_STORAGE)
            .unwrap_or_else(|| storage_class_for(&modality).to_string());
        let spacing = frame.spacing();

        let mut slices = Vec::with_capacity(depth);
        for (n, &k) in ordered.iter().enumerate() {
            if cancelled() {
                return Err(Error::Cancelled);
            }
            let instance_number = n as i32 + 1;
            let path = dir.join(format!("slice_{instance_number:04}.dcm"));
            let position = frame.slice_position(k);
            let projection = position.coords.dot(&stack.normal);
            let sop_instance_uid = generate_uid();

            let mut obj = InMemDicomObject::new_empty();
            copy_attributes(self.patient_template, &mut obj, &PATIENT_STUDY_TAGS);
            obj.put_text(tags::SOP_CLASS_UID, VR::UI, &sop_class_uid);
            obj.put_text(tags::SOP_INSTANCE_UID, VR::UI, &sop_instance_uid);
            obj.put_text(tags::STUDY_INSTANCE_UID, VR::UI, &self.identity.study_uid);
            obj.put_text(tags::SERIES_INSTANCE_UID, VR::UI, &self.identity.series_uid);
            obj.put_text(
                tags::FRAME_OF_REFERENCE_UID,
                VR::UI,
                &self.identity.frame_of_reference_uid,
            );
            obj.put_text(tags::MODALITY, VR::CS, &modality);
            obj.put_text(tags::SERIES_DESCRIPTION, VR::LO, &self.series_description);
            obj.put_integer(tags::SERIES_NUMBER, i64::from(self.series_number));
            obj.put_integer(tags::INSTANCE_NUMBER, i64::from(instance_number));
            obj.put_decimals(
                tags::IMAGE_POSITION_PATIENT,
                &[position.x, position.y, position.z],
            );
            obj.put_decimals(tags::IMAGE_ORIENTATION_PATIENT, &orientation);
            obj.put_decimals(tags::PIXEL_SPACING, &[spacing.y, spacing.x]);
            obj.put_decimal(tags::SLICE_THICKNESS, spacing.z);
            obj.put_decimal(tags::SLICE_LOCATION, projection);
            obj.put_u16(tags::SAMPLES_PER_PIXEL, 1);
            obj.put_text(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2");
            obj.put_u16(tags::ROWS, rows_u16);
            obj.put_u16(tags::COLUMNS, columns_u16);
            obj.put_u16(tags::BITS_ALLOCATED, 16);
            obj.put_u16(tags::BITS_STORED, 16);
            obj.put_u16(tags::HIGH_BIT, 15);
            obj.put_u16(tags::PIXEL_REPRESENTATION, 0);
            obj.put_decimal(tags::RESCALE_INTERCEPT, rescale.intercept);
            obj.put_decimal(tags::RESCALE_SLOPE, rescale.slope);
            obj.put_decimal(tags::WINDOW_CENTER, window_center);
            obj.put_decimal(tags::WINDOW_WIDTH, window_width);

            let slice = volume
                .slice(k)
                .ok_or_else(|| Error::write_failure(&path, format!("slice {k} out of range")))?;
            let pixels: Vec<u16> = slice.iter().map(|v| rescale.store(*v)).collect();
            obj.put(DataElement::new(
                tags::PIXEL_DATA,
                VR::OW,
                PrimitiveValue::U16(pixels.into()),
            ));

            write_dataset(obj, &sop_class_uid, &sop_instance_uid, &path)?;
            debug!("Wrote {}", path.display());

            slices.push(ReferencedSlice {
                sop_instance_uid,
                instance_number,
                position,
                projection,
            });
            progress(n + 1, depth);
        }

        info!(
            "Wrote {} slice(s) of series {} to {}",
            slices.len(),
            self.identity.series_uid,
            dir.display()
        );
        Ok(ReferencedSeries {
            series_uid: self.identity.series_uid.clone(),
            sop_class_uid,
            normal: stack.normal,
            slices,
        })
    }
}

pub struct StructureSetWriter<'a> {
    identity: &'a SeriesIdentity,
    patient_template: &'a InMemDicomObject,
    label: String,
    series_number: i32,
}

impl<'a> StructureSetWriter<'a> {
    pub fn new(identity: &'a SeriesIdentity, patient_template: &'a InMemDicomObject) -> Self {
        Self {
            identity,
            patient_template,
            label: "RTSTRUCT".to_string(),
            series_number: 100,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_series_number(mut self, number: i32) -> Self {
        self.series_number = number;
        self
    }

    /// Write `ss` to `path` and return the new SOP Instance UID.
    ///
    /// With `referenced`, every contour points at the slice nearest to it
    /// along the stack normal; without it, ContourImageSequence is left out.
    pub fn write(
        &self,
        ss: &StructureSet,
        referenced: Option<&ReferencedSeries>,
        path: &Path,
    ) -> Result<String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| Error::write_failure(parent, err))?;
        }
        let sop_instance_uid = generate_uid();
        let for_uid = &self.identity.frame_of_reference_uid;

        let mut obj = InMemDicomObject::new_empty();
        copy_attributes(self.patient_template, &mut obj, &PATIENT_STUDY_TAGS);
        obj.put_text(tags::SOP_CLASS_UID, VR::UI, uids::RT_STRUCTURE_SET_STORAGE);
        obj.put_text(tags::SOP_INSTANCE_UID, VR::UI, &sop_instance_uid);
        obj.put_text(tags::STUDY_INSTANCE_UID, VR::UI, &self.identity.study_uid);
        obj.put_text(tags::SERIES_INSTANCE_UID, VR::UI, &self.identity.series_uid);
        obj.put_text(tags::FRAME_OF_REFERENCE_UID, VR::UI, for_uid);
        obj.put_text(tags::MODALITY, VR::CS, "RTSTRUCT");
        obj.put_integer(tags::SERIES_NUMBER, i64::from(self.series_number));
        obj.put_integer(tags::INSTANCE_NUMBER, 1);
        obj.put_text(tags::STRUCTURE_SET_LABEL, VR::SH, &self.label);
        obj.put_text(tags::STRUCTURE_SET_NAME, VR::LO, &ss.label);
        obj.put_text(tags::STRUCTURE_SET_DATE, VR::DA, "");
        obj.put_text(tags::STRUCTURE_SET_TIME, VR::TM, "");

        obj.put_sequence(
            tags::REFERENCED_FRAME_OF_REFERENCE_SEQUENCE,
            vec![self.referenced_frame(referenced)],
        );

        let roi_items = ss
            .rois
            .iter()
            .map(|roi| {
                let mut item = InMemDicomObject::new_empty();
                item.put_integer(tags::ROI_NUMBER, i64::from(roi.number));
                item.put_text(tags::REFERENCED_FRAME_OF_REFERENCE_UID, VR::UI, for_uid);
                item.put_text(tags::ROI_NAME, VR::LO, &roi.name);
                item.put_text(tags::ROI_GENERATION_ALGORITHM, VR::CS, "SEMIAUTOMATIC");
                item
            })
            .collect();
        obj.put_sequence(tags::STRUCTURE_SET_ROI_SEQUENCE, roi_items);

        let contour_items = ss
            .rois
            .iter()
            .map(|roi| {
                let mut item = InMemDicomObject::new_empty();
                if let Some(color) = roi.color {
                    item.put_integers(
                        tags::ROI_DISPLAY_COLOR,
                        &color.map(i64::from),
                    );
                }
                let contours = roi
                    .contours
                    .iter()
                    .enumerate()
                    .map(|(i, contour)| contour_item(contour, i + 1, referenced))
                    .collect();
                item.put_sequence(tags::CONTOUR_SEQUENCE, contours);
                item.put_integer(tags::REFERENCED_ROI_NUMBER, i64::from(roi.number));
                item
            })
            .collect();
        obj.put_sequence(tags::ROI_CONTOUR_SEQUENCE, contour_items);

        let observations = ss
            .rois
            .iter()
            .enumerate()
            .map(|(i, roi)| {
                let mut item = InMemDicomObject::new_empty();
                item.put_integer(tags::OBSERVATION_NUMBER, i as i64 + 1);
                item.put_integer(tags::REFERENCED_ROI_NUMBER, i64::from(roi.number));
                item.put_text(
                    tags::RTROI_INTERPRETED_TYPE,
                    VR::CS,
                    roi.interpreted_type.as_deref().unwrap_or(""),
                );
                item.put_text(tags::ROI_INTERPRETER, VR::PN, "");
                item
            })
            .collect();
        obj.put_sequence(tags::RTROI_OBSERVATIONS_SEQUENCE, observations);

        write_dataset(
            obj,
            uids::RT_STRUCTURE_SET_STORAGE,
            &sop_instance_uid,
            path,
        )?;
        info!(
            "Wrote structure set with {} ROI(s) to {}",
            ss.roi_count(),
            path.display()
        );
        Ok(sop_instance_uid)
    }

    fn referenced_frame(&self, referenced: Option<&ReferencedSeries>) -> InMemDicomObject {
        let mut series = InMemDicomObject::new_empty();
        series.put_text(
            tags::SERIES_INSTANCE_UID,
            VR::UI,
            referenced.map_or(&self.identity.series_uid, |r| &r.series_uid),
        );
        if let Some(referenced) = referenced {
            let images = referenced
                .slices
                .iter()
                .filter(|slice| !slice.sop_instance_uid.is_empty())
                .map(|slice| image_reference(&referenced.sop_class_uid, &slice.sop_instance_uid))
                .collect();
            series.put_sequence(tags::CONTOUR_IMAGE_SEQUENCE, images);
        }

        let mut study = InMemDicomObject::new_empty();
        study.put_text(tags::REFERENCED_SOP_CLASS_UID, VR::UI, uids::DETACHED_STUDY_MANAGEMENT);
        study.put_text(tags::REFERENCED_SOP_INSTANCE_UID, VR::UI, &self.identity.study_uid);
        study.put_sequence(tags::RT_REFERENCED_SERIES_SEQUENCE, vec![series]);

        let mut frame = InMemDicomObject::new_empty();
        frame.put_text(
            tags::FRAME_OF_REFERENCE_UID,
            VR::UI,
            &self.identity.frame_of_reference_uid,
        );
        frame.put_sequence(tags::RT_REFERENCED_STUDY_SEQUENCE, vec![study]);
        frame
    }
}

fn contour_item(
    contour: &Contour,
    number: usize,
    referenced: Option<&ReferencedSeries>,
) -> InMemDicomObject {
    let mut item = InMemDicomObject::new_empty();
    let nearest = referenced.and_then(|series| {
        let slice = series.nearest(&contour.mean_point()?)?;
        (!slice.sop_instance_uid.is_empty()).then(|| (series, slice))
    });
    if let Some((series, slice)) = nearest {
        item.put_sequence(
            tags::CONTOUR_IMAGE_SEQUENCE,
            vec![image_reference(&series.sop_class_uid, &slice.sop_instance_uid)],
        );
    }
    item.put_text(tags::CONTOUR_GEOMETRIC_TYPE, VR::CS, &contour.geometric_type);
    item.put_integer(tags::NUMBER_OF_CONTOUR_POINTS, contour.points.len() as i64);
    item.put_integer(tags::CONTOUR_NUMBER, number as i64);
    let data: Vec<f64> = contour
        .points
        .iter()
        .flat_map(|p| [p.x, p.y, p.z])
        .collect();
    item.put_decimals(tags::CONTOUR_DATA, &data);
    item
}

fn image_reference(sop_class_uid: &str, sop_instance_uid: &str) -> InMemDicomObject {
    let mut item = InMemDicomObject::new_empty();
    item.put_text(tags::REFERENCED_SOP_CLASS_UID, VR::UI, sop_class_uid);
    item.put_text(tags::REFERENCED_SOP_INSTANCE_UID, VR::UI, sop_instance_uid);
    item
}

fn copy_attributes(from: &InMemDicomObject, to: &mut InMemDicomObject, tags: &[Tag]) {
    for tag in tags {
        if let Ok(element) = from.element(*tag) {
            to.put(element.clone());
        }
    }
}

/// Wrap `obj` with an Explicit VR Little Endian file meta group and write it.
pub(crate) fn write_dataset(
    obj: InMemDicomObject,
    sop_class_uid: &str,
    sop_instance_uid: &str,
    path: &Path,
) -> Result<()> {
    let file = obj
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                .media_storage_sop_class_uid(sop_class_uid)
                .media_storage_sop_instance_uid(sop_instance_uid),
        )
        .map_err(|err| Error::write_failure(path, err))?;
    file.write_to_file(path)
        .map_err(|err| Error::write_failure(path, err))
}

/// Paths of the `slice_*.dcm` files in `dir`, sorted by name.
pub fn slice_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("slice_") && name.ends_with(".dcm"))
        })
        .collect();
    files.sort();
    Ok(files)
}
