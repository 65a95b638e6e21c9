//! # DICOM rigid registration library
//!
//! This crate moves one DICOM image series and its RT structure set onto the
//! coordinate system of another series with a rigid transform.

//!
//! This library is part of the dicom-rs ecosystem and builds on its
//! components to read slice headers, decode pixel data and write new series.
//! A registration works on two datasets, each loaded from a directory:
//!  - Fixed: the reference grid and patient/study identity
//!  - Moving: the image and structure set that get transformed
//!
//! Loading re-derives the volume origin from the slice positions projected
//! on the stack normal instead of trusting any single file. The transform is
//! either entered by hand or estimated from the centroids of both structure
//! sets. Executing it resamples the moving image into the fixed grid (in
//! parallel using rayon) and transforms every contour point analytically.
//! All files written by one execution share Series, Study and Frame of
//! Reference UIDs.
//!
//! DICOM files are assumed to have the following attributes:
//!   - ImagePositionPatient and ImageOrientationPatient on every slice
//!   - No multiframe (always the first frame is used)
//!   - One RTSTRUCT per directory (further ones are ignored with a warning)
//!
//! # Examples
//!
//! ## Registering two series by their structure centroids
//!
//! Load a planning CT as fixed and a follow-up CT as moving, estimate the
//! translation between their contours and write the moved image series and
//! structure set into `out/`.
//!
//! ```no_run
//! # use dicom_rigid::{ExecuteRequest, RegistrationSession, Role, SessionConfig};
//! let session = RegistrationSession::new(SessionConfig::default());
//! session
//!     .load_directory("planning_ct", Role::Fixed)
//!     .expect("should have loaded the fixed series");
//! session
//!     .load_directory("followup_ct", Role::Moving)
//!     .expect("should have loaded the moving series");
//! let params = session
//!     .estimate_from_centroids()
//!     .expect("both series should carry a structure set");
//! println!("translation: ({}, {}, {})", params.tx, params.ty, params.tz);
//! session
//!     .execute(ExecuteRequest::new("out"))
//!     .expect("should have written the transformed series");
//! ```

pub mod attributes;
pub mod centroid;
pub mod config;
pub mod contour;
pub mod enums;
pub mod error;
pub mod events;
pub mod frame;
mod interpolator;
pub mod origin_resolver;
pub mod resampler;
pub mod rtss_copier;
pub mod session;
pub mod structure_set;
pub mod transform;
pub mod volume;
pub mod volume_loader;
pub mod writer;

pub use config::SessionConfig;
pub use enums::{CentroidStrategy, Interpolation, Role, SessionState, StackOrder};
pub use error::{Error, Result};
pub use events::{EventSink, SessionEvent};
pub use frame::SpatialFrame;
pub use session::{ExecuteOutcome, ExecuteRequest, RegistrationSession};
pub use structure_set::StructureSet;
pub use transform::{RigidTransform, RigidTransformParams};
pub use volume::Volume;
pub use volume_loader::{DatasetSummary, LoadedDataset, VolumeLoader};
