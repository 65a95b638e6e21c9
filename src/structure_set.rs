//! RT structure set model.
//!
//! Contours are kept as absolute physical points, exactly as stored in
//! ContourData. Nothing here is derived from an image grid.

use crate::attributes::DicomAttributes;
use crate::error::{Error, Result};

use dicom::object::InMemDicomObject;
use dicom_dictionary_std::tags;
use nalgebra::Point3;
use tracing::warn;

/// One closed (or open) polyline on one slice.
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    pub points: Vec<Point3<f64>>,
    pub geometric_type: String,
    /// SOP Instance UIDs of the image(s) this contour was drawn on.
    pub referenced_images: Vec<(String, String)>,
}

impl Contour {
    pub fn closed_planar(points: Vec<Point3<f64>>) -> Self {
        Self {
            points,
            geometric_type: "CLOSED_PLANAR".to_string(),
            referenced_images: Vec::new(),
        }
    }

    /// Mean of the contour points.
    pub fn mean_point(&self) -> Option<Point3<f64>> {
        if self.points.is_empty() {
            return None;
        }
        let sum = self
            .points
            .iter()
            .fold(nalgebra::Vector3::zeros(), |acc, p| acc + p.coords);
        Some(Point3::from(sum / self.points.len() as f64))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Roi {
    pub number: i32,
    pub name: String,
    pub color: Option<[u8; 3]>,
    pub interpreted_type: Option<String>,
    pub contours: Vec<Contour>,
}

impl Roi {
    pub fn new(number: i32, name: impl Into<String>) -> Self {
        Self {
            number,
            name: name.into(),
            color: None,
            interpreted_type: None,
            contours: Vec::new(),
        }
    }

    pub fn with_color(mut self, color: [u8; 3]) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_contour(mut self, contour: Contour) -> Self {
        self.contours.push(contour);
        self
    }

    pub fn point_count(&self) -> usize {
        self.contours.iter().map(|c| c.points.len()).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructureSet {
    pub label: String,
    pub frame_of_reference_uid: Option<String>,
    pub rois: Vec<Roi>,
}

impl StructureSet {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn with_roi(mut self, roi: Roi) -> Self {
        self.rois.push(roi);
        self
    }

    pub fn roi_count(&self) -> usize {
        self.rois.len()
    }

    pub fn contour_count(&self) -> usize {
        self.rois.iter().map(|r| r.contours.len()).sum()
    }

    pub fn point_count(&self) -> usize {
        self.rois.iter().map(Roi::point_count).sum()
    }

    /// Every contour point of every ROI.
    pub fn points(&self) -> impl Iterator<Item = &Point3<f64>> {
        self.rois
            .iter()
            .flat_map(|roi| roi.contours.iter())
            .flat_map(|contour| contour.points.iter())
    }

    pub fn roi_by_name(&self, name: &str) -> Option<&Roi> {
        self.rois.iter().find(|roi| roi.name == name)
    }

    /// Parse the ROI geometry out of an RTSTRUCT dataset.
    ///
    /// ROI names and colors are joined from StructureSetROISequence and
    /// RTROIObservationsSequence through the ROI number. Contours whose point
    /// data is not a multiple of three are rejected.
    pub fn from_dataset(obj: &InMemDicomObject) -> Result<Self> {
        let modality = obj.string(tags::MODALITY);
        if modality.as_deref().is_some_and(|m| m != "RTSTRUCT") {
            return Err(Error::InvalidStructureSet(format!(
                "modality is {}",
                modality.unwrap_or_default()
            )));
        }

        let mut rois: Vec<Roi> = obj
            .sequence(tags::STRUCTURE_SET_ROI_SEQUENCE)
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let number = item.int(tags::ROI_NUMBER).unwrap_or(i as i32 + 1);
                let name = item
                    .string(tags::ROI_NAME)
                    .unwrap_or_else(|| format!("ROI_{number}"));
                Roi::new(number, name)
            })
            .collect();

        for observation in obj.sequence(tags::RTROI_OBSERVATIONS_SEQUENCE) {
            let Some(number) = observation.int(tags::REFERENCED_ROI_NUMBER) else {
                continue;
            };
            if let Some(roi) = rois.iter_mut().find(|r| r.number == number) {
                roi.interpreted_type = observation.string(tags::RTROI_INTERPRETED_TYPE);
            }
        }

        for roi_contour in obj.sequence(tags::ROI_CONTOUR_SEQUENCE) {
            let number = roi_contour.int(tags::REFERENCED_ROI_NUMBER);
            let color = roi_contour
                .floats(tags::ROI_DISPLAY_COLOR)
                .filter(|c| c.len() == 3)
                .map(|c| display_color(&c))
                .transpose()?;

            let contours = roi_contour
                .sequence(tags::CONTOUR_SEQUENCE)
                .iter()
                .map(parse_contour)
                .collect::<Result<Vec<_>>>()?;

            let index = match number.and_then(|n| rois.iter().position(|r| r.number == n)) {
                Some(index) => index,
                None => {
                    let number = number.unwrap_or(rois.len() as i32 + 1);
                    warn!("ROI contour {number} has no StructureSetROISequence entry");
                    rois.push(Roi::new(number, format!("ROI_{number}")));
                    rois.len() - 1
                }
            };
            let roi = &mut rois[index];
            roi.color = color.or(roi.color);
            roi.contours.extend(contours);
        }

        let frame_of_reference_uid = obj
            .string(tags::FRAME_OF_REFERENCE_UID)
            .or_else(|| {
                obj.sequence(tags::REFERENCED_FRAME_OF_REFERENCE_SEQUENCE)
                    .iter()
                    .find_map(|item| item.string(tags::FRAME_OF_REFERENCE_UID))
            });

        Ok(Self {
            label: obj
                .string(tags::STRUCTURE_SET_LABEL)
                .unwrap_or_else(|| "RTSTRUCT".to_string()),
            frame_of_reference_uid,
            rois,
        })
    }
}

/// ROIDisplayColor as RGB; components outside 0..=255 are rejected.
fn display_color(values: &[f64]) -> Result<[u8; 3]> {
    let mut rgb = [0u8; 3];
    for (channel, value) in rgb.iter_mut().zip(values) {
        *channel = u8::try_from(value.round() as i64).map_err(|_| {
            Error::InvalidStructureSet(format!("ROI display color component {value} out of range"))
        })?;
    }
    Ok(rgb)
}

fn parse_contour(item: &InMemDicomObject) -> Result<Contour> {
    let data = item.floats(tags::CONTOUR_DATA).unwrap_or_default();
    if data.len() % 3 != 0 {
        return Err(Error::InvalidStructureSet(format!(
            "ContourData holds {} values, not a multiple of 3",
            data.len()
        )));
    }
    let points = data
        .chunks_exact(3)
        .map(|xyz| Point3::new(xyz[0], xyz[1], xyz[2]))
        .collect();
    let referenced_images = item
        .sequence(tags::CONTOUR_IMAGE_SEQUENCE)
        .iter()
        .filter_map(|image| {
            Some((
                image.string(tags::REFERENCED_SOP_CLASS_UID)?,
                image.string(tags::REFERENCED_SOP_INSTANCE_UID)?,
            ))
        })
        .collect();
    Ok(Contour {
        points,
        geometric_type: item
            .string(tags::CONTOUR_GEOMETRIC_TYPE)
            .unwrap_or_else(|| "CLOSED_PLANAR".to_string()),
        referenced_images,
    })
}

/// Square contour on plane `z`, centered at `(cx, cy)`.
pub fn box_contour(cx: f64, cy: f64, z: f64, half_width: f64) -> Contour {
    Contour::closed_planar(vec![
        Point3::new(cx - half_width, cy - half_width, z),
        Point3::new(cx + half_width, cy - half_width, z),
        Point3::new(cx + half_width, cy + half_width, z),
        Point3::new(cx - half_width, cy + half_width, z),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::DicomAttributesMut;
    use dicom::core::VR;

    fn contour_item(points: &[f64]) -> InMemDicomObject {
        let mut item = InMemDicomObject::new_empty();
        item.put_text(tags::CONTOUR_GEOMETRIC_TYPE, VR::CS, "CLOSED_PLANAR");
        item.put_integer(tags::NUMBER_OF_CONTOUR_POINTS, (points.len() / 3) as i64);
        item.put_decimals(tags::CONTOUR_DATA, points);
        item
    }

    fn rtstruct(points: &[f64]) -> InMemDicomObject {
        let mut roi = InMemDicomObject::new_empty();
        roi.put_integer(tags::ROI_NUMBER, 4);
        roi.put_text(tags::ROI_NAME, VR::LO, "GTV");

        let mut roi_contour = InMemDicomObject::new_empty();
        roi_contour.put_integer(tags::REFERENCED_ROI_NUMBER, 4);
        roi_contour.put_decimals(tags::ROI_DISPLAY_COLOR, &[255.0, 128.0, 0.0]);
        roi_contour.put_sequence(tags::CONTOUR_SEQUENCE, vec![contour_item(points)]);

        let mut obj = InMemDicomObject::new_empty();
        obj.put_text(tags::MODALITY, VR::CS, "RTSTRUCT");
        obj.put_sequence(tags::STRUCTURE_SET_ROI_SEQUENCE, vec![roi]);
        obj.put_sequence(tags::ROI_CONTOUR_SEQUENCE, vec![roi_contour]);
        obj
    }

    #[test]
    fn parses_rois_and_contours() {
        let ss = StructureSet::from_dataset(&rtstruct(&[0.0, 0.0, 1.0, 2.0, 0.0, 1.0, 2.0, 2.0, 1.0]))
            .unwrap();
        assert_eq!(ss.roi_count(), 1);
        let roi = ss.roi_by_name("GTV").unwrap();
        assert_eq!(roi.number, 4);
        assert_eq!(roi.color, Some([255, 128, 0]));
        assert_eq!(roi.contours[0].points.len(), 3);
        assert_eq!(roi.contours[0].points[2], Point3::new(2.0, 2.0, 1.0));
    }

    #[test]
    fn out_of_range_display_color_is_rejected() {
        let mut obj = rtstruct(&[0.0, 0.0, 1.0]);
        let mut roi_contour = obj.sequence(tags::ROI_CONTOUR_SEQUENCE)[0].clone();
        roi_contour.put_decimals(tags::ROI_DISPLAY_COLOR, &[300.0, 0.0, 0.0]);
        obj.put_sequence(tags::ROI_CONTOUR_SEQUENCE, vec![roi_contour]);
        assert!(matches!(
            StructureSet::from_dataset(&obj),
            Err(Error::InvalidStructureSet(_))
        ));
    }

    #[test]
    fn rejects_ragged_contour_data() {
        let result = StructureSet::from_dataset(&rtstruct(&[0.0, 1.0, 2.0, 3.0]));
        assert!(matches!(result, Err(Error::InvalidStructureSet(_))));
    }

    #[test]
    fn rejects_image_modality() {
        let mut obj = InMemDicomObject::new_empty();
        obj.put_text(tags::MODALITY, VR::CS, "CT");
        assert!(StructureSet::from_dataset(&obj).is_err());
    }

    #[test]
    fn box_contour_mean_is_center() {
        let contour = box_contour(10.0, -4.0, 2.0, 3.0);
        assert_eq!(contour.mean_point(), Some(Point3::new(10.0, -4.0, 2.0)));
    }
}
