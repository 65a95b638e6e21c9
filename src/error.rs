//! Error types shared by the registration pipeline.

use crate::volume_loader::VolumeLoaderError;

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("No image files (CT/MR/PT) found in directory")]
    NoImageFiles,

    #[error("No slice carries usable ImagePositionPatient/ImageOrientationPatient")]
    NoSpatialInfo,

    #[error("Both fixed and moving datasets must carry a structure set")]
    MissingStructureSet,

    #[error("Structure set contains no contour points")]
    EmptyContours,

    #[error("Resampling failed: {0}")]
    ResamplingFailure(String),

    #[error("Failed to write {}: {message}", path.display())]
    WriteFailure { path: PathBuf, message: String },

    #[error("A transform execution is already running")]
    Busy,

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Fixed and moving datasets must be loaded first")]
    NotLoaded,

    #[error("Invalid structure set: {0}")]
    InvalidStructureSet(String),

    #[error("Load error: {0}")]
    Load(VolumeLoaderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<VolumeLoaderError> for Error {
    fn from(err: VolumeLoaderError) -> Self {
        match err {
            VolumeLoaderError::NoImageFiles => Error::NoImageFiles,
            VolumeLoaderError::NoSpatialInfo => Error::NoSpatialInfo,
            other => Error::Load(other),
        }
    }
}

impl Error {
    pub(crate) fn write_failure(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Error::WriteFailure {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
