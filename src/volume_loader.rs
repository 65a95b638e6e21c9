use crate::attributes::DicomAttributes;
use crate::frame::SpatialFrame;
use crate::origin_resolver::{SliceRecord, SortedStack, sort_stack};
use crate::structure_set::StructureSet;
use crate::volume::Volume;

use dicom::{
    object::{InMemDicomObject, OpenFileOptions, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::{tags, uids};
use nalgebra::{Matrix3, Point3, Vector3};
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Number of progress steps reported while classifying files.
const CLASSIFY_CHUNKS: usize = 8;

/// Relative spread of slice gaps tolerated before warning.
const SPACING_TOLERANCE: f64 = 0.01;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No image files (CT/MR/PT) found")]
    NoImageFiles,

    #[error("No slice carries usable ImagePositionPatient/ImageOrientationPatient")]
    NoSpatialInfo,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Missing spacing information")]
    MissingSpacing,

    #[error("Pixel data error: {0}")]
    PixelData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    StructureSet,
}

/// Content-based classification of a file header.
///
/// RTSTRUCT is recognized by SOP Class UID (or Modality as a fallback);
/// images by Modality CT, MR or PT. Anything else is ignored.
pub fn classify(header: &InMemDicomObject) -> Option<FileKind> {
    if header.string(tags::SOP_CLASS_UID).as_deref() == Some(uids::RT_STRUCTURE_SET_STORAGE) {
        return Some(FileKind::StructureSet);
    }
    match header.string(tags::MODALITY).as_deref() {
        Some("RTSTRUCT") => Some(FileKind::StructureSet),
        Some("CT" | "MR" | "PT") => Some(FileKind::Image),
        _ => None,
    }
}

/// Files whose size occurs exactly once in the directory.
///
/// Image slices of one series tend to share a size, so a unique size hints at
/// an RTSTRUCT. This only orders candidates; classification always reads the
/// header.
pub fn rtss_size_candidates(files: &[(PathBuf, u64)]) -> HashSet<PathBuf> {
    if files.len() == 1 {
        return files.iter().map(|(path, _)| path.clone()).collect();
    }
    let mut counts: HashMap<u64, usize> = HashMap::new();
    for (_, size) in files {
        *counts.entry(*size).or_default() += 1;
    }
    if counts.len() < 2 {
        return HashSet::new();
    }
    files
        .iter()
        .filter(|(_, size)| counts.get(size) == Some(&1))
        .map(|(path, _)| path.clone())
        .collect()
}

/// Header of one image file.
#[derive(Debug, Clone)]
pub struct ImageHeader {
    pub path: PathBuf,
    pub header: InMemDicomObject,
}

/// Identity and placement of one loaded slice, in stack order.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceInfo {
    pub sop_instance_uid: String,
    pub position: Point3<f64>,
}

/// Result of classifying every regular file of a directory.
#[derive(Debug, Default)]
pub struct DirectoryScan {
    pub images: Vec<ImageHeader>,
    /// RTSTRUCT files, size-heuristic candidates first.
    pub structure_sets: Vec<PathBuf>,
    pub total_files: usize,
}

/// Shape reported by `get_data_summary` and the dataset-loaded event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetSummary {
    pub loaded: bool,
    pub modality: String,
    /// Voxel counts (x, y, z).
    pub size: (usize, usize, usize),
    pub spacing: [f64; 3],
    pub origin: [f64; 3],
    pub slice_count: usize,
    pub file_count: usize,
    pub total_files: usize,
    pub has_structure_set: bool,
    pub roi_count: usize,
}

/// A directory loaded as a volume plus optional structure set.
#[derive(Debug, Clone)]
pub struct LoadedDataset {
    pub volume: Volume,
    pub structure_set: Option<StructureSet>,
    /// Header of the first slice along the stack normal, without pixel data.
    pub template: InMemDicomObject,
    /// Slices in the order of `volume`'s z axis.
    pub slices: Vec<SliceInfo>,
    pub modality: String,
    /// Image files in the series that was used.
    pub file_count: usize,
    /// Regular files seen in the directory.
    pub total_files: usize,
    pub rtss_path: Option<PathBuf>,
}

impl LoadedDataset {
    /// Dataset built in memory, with an empty header template.
    pub fn new(volume: Volume, structure_set: Option<StructureSet>) -> Self {
        let depth = volume.dim().0;
        let slices = (0..depth)
            .map(|k| SliceInfo {
                sop_instance_uid: String::new(),
                position: volume.frame().slice_position(k),
            })
            .collect();
        Self {
            volume,
            structure_set,
            template: InMemDicomObject::new_empty(),
            slices,
            modality: "CT".to_string(),
            file_count: depth,
            total_files: depth,
            rtss_path: None,
        }
    }

    pub fn summary(&self) -> DatasetSummary {
        let frame = self.volume.frame();
        let spacing = frame.spacing();
        let origin = frame.origin();
        DatasetSummary {
            loaded: true,
            modality: self.modality.clone(),
            size: frame.size(),
            spacing: [spacing.x, spacing.y, spacing.z],
            origin: [origin.x, origin.y, origin.z],
            slice_count: self.volume.dim().0,
            file_count: self.file_count,
            total_files: self.total_files,
            has_structure_set: self.structure_set.is_some(),
            roi_count: self.structure_set.as_ref().map_or(0, StructureSet::roi_count),
        }
    }
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load the image series (and RTSTRUCT, if any) found in `path`.
    ///
    /// Progress goes through `progress` as (percent, message). The directory
    /// is not searched recursively.
    ///
    /// # Errors
    ///
    /// [`VolumeLoaderError::NoImageFiles`] when nothing classifies as an
    /// image, [`VolumeLoaderError::NoSpatialInfo`] when no slice can be placed
    /// in space. A broken RTSTRUCT is logged and skipped.
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        size_heuristic: bool,
        progress: &mut dyn FnMut(u8, &str),
    ) -> Result<LoadedDataset, VolumeLoaderError> {
        let path = path.as_ref();
        info!("Loading directory {}", path.display());
        progress(0, "Scanning directory");

        let scan = Self::scan_directory(path, size_heuristic, progress)?;
        let DirectoryScan {
            images,
            structure_sets,
            total_files,
        } = scan;

        let images = Self::select_series(images)?;
        let file_count = images.len();

        progress(50, "Loading image series");
        let (volume, template, slices) = Self::load_series(images)?;
        let modality = template
            .string(tags::MODALITY)
            .unwrap_or_else(|| "CT".to_string());
        info!(
            "Loaded {} volume {:?} from {} file(s)",
            modality,
            volume.frame().size(),
            file_count
        );

        if structure_sets.len() > 1 {
            warn!(
                "{} RTSTRUCT files found; using {}",
                structure_sets.len(),
                structure_sets[0].display()
            );
        }
        let rtss_path = structure_sets.into_iter().next();
        let structure_set = match &rtss_path {
            Some(rtss) => {
                progress(80, "Loading structure set");
                match Self::load_structure_set(rtss) {
                    Ok(ss) => {
                        info!(
                            "Loaded structure set with {} ROI(s), {} contour(s)",
                            ss.roi_count(),
                            ss.contour_count()
                        );
                        Some(ss)
                    }
                    Err(err) => {
                        warn!("Ignoring structure set {}: {err}", rtss.display());
                        None
                    }
                }
            }
            None => None,
        };

        progress(100, "Dataset loaded");
        Ok(LoadedDataset {
            volume,
            structure_set,
            template,
            slices,
            modality,
            file_count,
            total_files,
            rtss_path,
        })
    }

    /// Classify every regular file of `path` by its header.
    ///
    /// Only an empty directory is an error here; a scan with no images is
    /// rejected when a series is selected from it.
    pub fn scan_directory(
        path: &Path,
        size_heuristic: bool,
        progress: &mut dyn FnMut(u8, &str),
    ) -> Result<DirectoryScan, VolumeLoaderError> {
        let mut files: Vec<(PathBuf, u64)> = fs::read_dir(path)?
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let metadata = entry.metadata().ok()?;
                metadata.is_file().then(|| (entry.path(), metadata.len()))
            })
            .collect();
        files.sort();

        let total_files = files.len();
        if total_files == 0 {
            return Err(VolumeLoaderError::NoImageFiles);
        }
        progress(10, &format!("Found {total_files} files"));

        let suspected = if size_heuristic {
            rtss_size_candidates(&files)
        } else {
            HashSet::new()
        };

        let chunk_size = total_files.div_ceil(CLASSIFY_CHUNKS).max(1);
        let mut classified = Vec::with_capacity(total_files);
        let mut done = 0;
        for chunk in files.chunks(chunk_size) {
            classified.extend(
                chunk
                    .par_iter()
                    .filter_map(|(file, _)| Self::read_header(file).map(|h| (file.clone(), h)))
                    .filter_map(|(file, header)| classify(&header).map(|kind| (file, kind, header)))
                    .collect::<Vec<_>>(),
            );
            done += chunk.len();
            let percent = 10 + (40 * done / total_files) as u8;
            progress(percent, &format!("Classified {done}/{total_files} files"));
        }

        let mut scan = DirectoryScan {
            total_files,
            ..DirectoryScan::default()
        };
        for (path, kind, header) in classified {
            match kind {
                FileKind::Image => scan.images.push(ImageHeader { path, header }),
                FileKind::StructureSet => scan.structure_sets.push(path),
            }
        }
        scan.structure_sets
            .sort_by_key(|path| (!suspected.contains(path), path.clone()));

        info!(
            "Classified {} image file(s) and {} RTSTRUCT file(s) out of {}",
            scan.images.len(),
            scan.structure_sets.len(),
            total_files
        );
        Ok(scan)
    }

    fn read_header(path: &Path) -> Option<InMemDicomObject> {
        match OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(path)
        {
            Ok(obj) => Some(obj.into_inner()),
            Err(err) => {
                debug!("Skipping {}: {err}", path.display());
                None
            }
        }
    }

    /// Keep the series with the most files.
    fn select_series(images: Vec<ImageHeader>) -> Result<Vec<ImageHeader>, VolumeLoaderError> {
        let mut by_series: HashMap<String, Vec<ImageHeader>> = HashMap::new();
        for image in images {
            let uid = image
                .header
                .string(tags::SERIES_INSTANCE_UID)
                .unwrap_or_default();
            by_series.entry(uid).or_default().push(image);
        }
        if by_series.len() > 1 {
            warn!(
                "{} image series in directory; using the one with the most files",
                by_series.len()
            );
        }
        by_series
            .into_iter()
            .max_by(|(uid_a, a), (uid_b, b)| a.len().cmp(&b.len()).then(uid_b.cmp(uid_a)))
            .map(|(_, images)| images)
            .ok_or(VolumeLoaderError::NoImageFiles)
    }

    /// Decode a single series into a volume ordered along its stack normal.
    ///
    /// Returns the volume, the pixel-less header of its first slice and the
    /// per-slice identities in volume order.
    pub fn load_series(
        images: Vec<ImageHeader>,
    ) -> Result<(Volume, InMemDicomObject, Vec<SliceInfo>), VolumeLoaderError> {
        let records: Vec<SliceRecord> = images
            .iter()
            .map(|image| {
                let mut record = SliceRecord::new(&image.path);
                record.position = image.header.point(tags::IMAGE_POSITION_PATIENT);
                record.orientation = image.header.cosines(tags::IMAGE_ORIENTATION_PATIENT);
                record.instance_number = image.header.int(tags::INSTANCE_NUMBER);
                record
            })
            .collect();

        let stack = sort_stack(&records).map_err(|_| VolumeLoaderError::NoSpatialInfo)?;
        let first = &images[stack.order[0]].header;

        let rows = first.int(tags::ROWS).unwrap_or(0) as usize;
        let columns = first.int(tags::COLUMNS).unwrap_or(0) as usize;
        let pixel_spacing = first
            .floats(tags::PIXEL_SPACING)
            .filter(|values| values.len() >= 2)
            .ok_or(VolumeLoaderError::MissingSpacing)?;
        // PixelSpacing is (row spacing, column spacing): y first.
        let (dy, dx) = (pixel_spacing[0], pixel_spacing[1]);
        let dz = Self::slice_spacing(&stack, first);

        let slices: Vec<Array2<f32>> = stack
            .order
            .par_iter()
            .map(|&index| Self::decode_image(&images[index].path))
            .collect::<Result<_, _>>()?;
        if slices.iter().any(|slice| slice.dim() != (rows, columns)) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }

        let direction = Matrix3::from_columns(&[stack.row, stack.column, stack.normal]);
        let frame = SpatialFrame::new(
            (columns, rows, slices.len()),
            Vector3::new(dx, dy, dz),
            stack.origin,
            direction,
        )
        .ok_or(VolumeLoaderError::MissingSpacing)?;

        let volume = Volume::new(Self::build_volume_array(&slices, rows, columns), frame)?;

        let slice_infos = stack
            .order
            .iter()
            .map(|&index| SliceInfo {
                sop_instance_uid: images[index]
                    .header
                    .string(tags::SOP_INSTANCE_UID)
                    .unwrap_or_default(),
                position: records[index].position.unwrap_or(stack.origin),
            })
            .collect();

        let mut template = first.clone();
        template.remove_element(tags::PIXEL_DATA);
        Ok((volume, template, slice_infos))
    }

    /// Mean projected gap; SliceThickness (or 1 mm) for a single slice.
    fn slice_spacing(stack: &SortedStack, first: &InMemDicomObject) -> f64 {
        let fallback = first
            .float(tags::SLICE_THICKNESS)
            .filter(|t| *t > 0.0)
            .unwrap_or(1.0);
        let (Some(mean), Some((lo, hi))) = (stack.mean_spacing(), stack.spacing_range()) else {
            return fallback;
        };
        if mean <= f64::EPSILON {
            warn!("Slices share one position; falling back to {fallback} mm spacing");
            return fallback;
        }
        if hi - lo > SPACING_TOLERANCE * mean {
            warn!("Non-uniform slice spacing: min={lo:.3} max={hi:.3} mean={mean:.3}");
        }
        mean
    }

    /// Decode the first frame of `path` with the modality LUT applied.
    pub fn decode_image(path: &Path) -> Result<Array2<f32>, VolumeLoaderError> {
        let dicom_object = open_file(path)?;
        let pixel_data = dicom_object
            .decode_pixel_data()
            .map_err(|err| VolumeLoaderError::PixelData(err.to_string()))?;
        let options = ConvertOptions::new()
            .with_modality_lut(ModalityLutOption::Default)
            .with_voi_lut(VoiLutOption::Identity);
        pixel_data
            .to_ndarray_with_options::<f32>(&options)
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
            .map_err(|err| VolumeLoaderError::PixelData(err.to_string()))
    }

    fn build_volume_array(images: &[Array2<f32>], height: usize, width: usize) -> Array3<f32> {
        let depth = images.len();
        let mut volume = Array3::<f32>::zeros((depth, height, width));

        for (i, image) in images.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(image);
        }

        volume
    }

    /// Read and parse an RTSTRUCT file.
    pub fn load_structure_set(path: &Path) -> crate::error::Result<StructureSet> {
        let obj = open_file(path).map_err(VolumeLoaderError::from)?;
        StructureSet::from_dataset(&obj)
    }
}
