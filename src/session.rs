//! Registration session: load two datasets, settle on a rigid transform,
//! write the moved image series and structure set.
//!
//! The session is shared as `Arc<RegistrationSession>`; state sits behind a
//! lock that is never held while events are emitted, so sinks may call back
//! into the session.

use crate::centroid::CentroidEstimator;
use crate::config::SessionConfig;
use crate::contour::transform_structure_set;
use crate::enums::{Role, SessionState};
use crate::error::{Error, Result};
use crate::events::{EventSink, NullSink, SessionEvent};
use crate::resampler::{GridResampler, VolumeResampler};
use crate::transform::{RigidTransform, RigidTransformParams};
use crate::volume_loader::{DatasetSummary, LoadedDataset, VolumeLoader};
use crate::writer::{DicomSeriesWriter, ReferencedSeries, SeriesIdentity, StructureSetWriter};

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// What `execute` should produce, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteRequest {
    pub output_dir: PathBuf,
    pub output_image: bool,
    pub output_rtss: bool,
}

impl ExecuteRequest {
    /// Image and structure set into `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            output_image: true,
            output_rtss: true,
        }
    }

    pub fn with_image(mut self, enabled: bool) -> Self {
        self.output_image = enabled;
        self
    }

    pub fn with_rtss(mut self, enabled: bool) -> Self {
        self.output_rtss = enabled;
        self
    }
}

/// Files produced by a successful `execute`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteOutcome {
    pub identity: SeriesIdentity,
    pub image_dir: Option<PathBuf>,
    pub slices_written: usize,
    pub rtss_path: Option<PathBuf>,
}

struct Inner {
    fixed: Option<Arc<LoadedDataset>>,
    moving: Option<Arc<LoadedDataset>>,
    params: RigidTransformParams,
    state: SessionState,
}

impl Inner {
    fn slot(&mut self, role: Role) -> &mut Option<Arc<LoadedDataset>> {
        match role {
            Role::Fixed => &mut self.fixed,
            Role::Moving => &mut self.moving,
        }
    }

    fn loaded_state(&self) -> SessionState {
        match (self.fixed.is_some(), self.moving.is_some()) {
            (true, true) => SessionState::BothLoaded,
            (true, false) => SessionState::FixedLoaded,
            (false, true) => SessionState::MovingLoaded,
            (false, false) => SessionState::Empty,
        }
    }
}

/// Clears the busy flag when an execution ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct RegistrationSession {
    config: SessionConfig,
    inner: RwLock<Inner>,
    sink: Arc<dyn EventSink>,
    resampler: Arc<dyn VolumeResampler>,
    busy: AtomicBool,
    cancelled: AtomicBool,
}

impl Default for RegistrationSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl RegistrationSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                fixed: None,
                moving: None,
                params: RigidTransformParams::default(),
                state: SessionState::Empty,
            }),
            sink: Arc::new(NullSink),
            resampler: Arc::new(GridResampler),
            busy: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn with_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn with_resampler(mut self, resampler: impl VolumeResampler + 'static) -> Self {
        self.resampler = Arc::new(resampler);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.read().state
    }

    pub fn parameters(&self) -> RigidTransformParams {
        self.read().params
    }

    pub fn dataset(&self, role: Role) -> Option<Arc<LoadedDataset>> {
        let inner = self.read();
        match role {
            Role::Fixed => inner.fixed.clone(),
            Role::Moving => inner.moving.clone(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Ask a running `execute` to stop at the next slice boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Summary of the dataset loaded for `role`; `loaded == false` if none.
    pub fn get_data_summary(&self, role: Role) -> DatasetSummary {
        self.dataset(role)
            .map(|dataset| dataset.summary())
            .unwrap_or_default()
    }

    /// Load `path` as the fixed or moving dataset.
    ///
    /// On failure the previously loaded dataset and the session state are
    /// kept, so the caller can retry with another directory.
    pub fn load_directory(&self, path: impl AsRef<Path>, role: Role) -> Result<DatasetSummary> {
        let path = path.as_ref();
        if self.is_busy() {
            return Err(Error::Busy);
        }
        let loaded = VolumeLoader::load_from_directory(
            path,
            self.config.size_heuristic,
            &mut |percent, message| {
                self.emit(SessionEvent::progress(
                    percent,
                    format!("{} image: {message}", role.label()),
                ))
            },
        );

        match loaded {
            Ok(dataset) => {
                let summary = dataset.summary();
                {
                    let mut inner = self.write();
                    *inner.slot(role) = Some(Arc::new(dataset));
                    inner.state = inner.loaded_state();
                }
                info!(
                    "Loaded {} dataset from {}",
                    role.label(),
                    path.display()
                );
                self.emit(SessionEvent::DatasetLoaded {
                    role,
                    summary: summary.clone(),
                });
                self.emit(SessionEvent::finished(
                    true,
                    format!("Loaded {} image from {}", role.label(), path.display()),
                ));
                Ok(summary)
            }
            Err(err) => {
                let err = Error::from(err);
                warn!("Loading {} failed: {err}", path.display());
                self.emit(SessionEvent::finished(false, err.to_string()));
                Err(err)
            }
        }
    }

    /// Set the transform by hand.
    pub fn set_transform_parameters(&self, params: RigidTransformParams) -> Result<()> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        let mut inner = self.write();
        inner.params = params;
        if inner.fixed.is_some() && inner.moving.is_some() {
            inner.state = SessionState::ParamsSet;
        }
        info!(
            "Transform parameters t=({}, {}, {}) r=({}, {}, {})",
            params.tx, params.ty, params.tz, params.rx, params.ry, params.rz
        );
        Ok(())
    }

    /// Derive a pure translation from the structure-set centroids.
    pub fn estimate_from_centroids(&self) -> Result<RigidTransformParams> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        let (fixed, moving) = {
            let inner = self.read();
            (inner.fixed.clone(), inner.moving.clone())
        };
        let estimated = match (fixed, moving) {
            (Some(fixed), Some(moving)) => {
                CentroidEstimator::new(self.config.centroid_strategy)
                    .with_z_offset_warning(self.config.z_offset_warning_mm)
                    .estimate_translation(&fixed, &moving)
            }
            _ => Err(Error::MissingStructureSet),
        };

        match estimated {
            Ok(params) => {
                {
                    let mut inner = self.write();
                    inner.params = params;
                    inner.state = SessionState::ParamsSet;
                }
                self.emit(SessionEvent::finished(
                    true,
                    format!(
                        "Estimated translation ({:.3}, {:.3}, {:.3})",
                        params.tx, params.ty, params.tz
                    ),
                ));
                Ok(params)
            }
            Err(err) => {
                warn!("Centroid estimation failed: {err}");
                self.emit(SessionEvent::finished(false, err.to_string()));
                Err(err)
            }
        }
    }

    /// Resample the moving image into the fixed grid and transform the moving
    /// structure set, then write both.
    ///
    /// A second call while one is running fails with [`Error::Busy`]. On
    /// failure the session moves to [`SessionState::Error`] and keeps its
    /// datasets and parameters.
    pub fn execute(&self, request: ExecuteRequest) -> Result<ExecuteOutcome> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Rejecting execute: another run is in progress");
            return Err(Error::Busy);
        }
        let _guard = BusyGuard(&self.busy);
        self.cancelled.store(false, Ordering::Release);

        let (fixed, moving, params) = {
            let mut inner = self.write();
            let (Some(fixed), Some(moving)) = (inner.fixed.clone(), inner.moving.clone()) else {
                drop(inner);
                self.emit(SessionEvent::finished(false, Error::NotLoaded.to_string()));
                return Err(Error::NotLoaded);
            };
            inner.state = SessionState::Executing;
            (fixed, moving, inner.params)
        };

        let result = self.run(&fixed, &moving, &params, &request);

        match &result {
            Ok(outcome) => {
                self.write().state = SessionState::Done;
                info!(
                    "Execution finished: {} slice(s), structure set {}",
                    outcome.slices_written,
                    if outcome.rtss_path.is_some() { "written" } else { "skipped" }
                );
                self.emit(SessionEvent::finished(
                    true,
                    format!("Output written to {}", request.output_dir.display()),
                ));
            }
            Err(err) => {
                self.write().state = SessionState::Error;
                error!("Execution failed: {err}");
                self.emit(SessionEvent::finished(false, err.to_string()));
            }
        }
        result
    }

    /// Run [`execute`](Self::execute) on tokio's blocking pool.
    pub fn execute_in_background(
        self: &Arc<Self>,
        request: ExecuteRequest,
    ) -> JoinHandle<Result<ExecuteOutcome>> {
        let session = Arc::clone(self);
        tokio::task::spawn_blocking(move || session.execute(request))
    }

    fn run(
        &self,
        fixed: &LoadedDataset,
        moving: &LoadedDataset,
        params: &RigidTransformParams,
        request: &ExecuteRequest,
    ) -> Result<ExecuteOutcome> {
        let moving_ss = match (request.output_rtss, moving.structure_set.as_ref()) {
            (true, None) => {
                warn!("Moving dataset has no structure set; writing the image only");
                None
            }
            (true, ss) => ss,
            (false, _) => None,
        };

        self.emit(SessionEvent::progress(0, "Preparing transform"));
        let transform = RigidTransform::build(params);
        let identity = SeriesIdentity::for_output(&fixed.template);

        let output_dir = &request.output_dir;
        fs::create_dir_all(output_dir).map_err(|err| Error::write_failure(output_dir, err))?;
        let staging = if self.config.staged_writes {
            Some(
                tempfile::Builder::new()
                    .prefix(".staging-")
                    .tempdir_in(output_dir)
                    .map_err(|err| Error::write_failure(output_dir, err))?,
            )
        } else {
            None
        };
        let work_dir = staging
            .as_ref()
            .map_or(output_dir.as_path(), |staging| staging.path());

        let mut produced: Vec<PathBuf> = Vec::new();
        let mut referenced: Option<ReferencedSeries> = None;

        if request.output_image {
            self.emit(SessionEvent::progress(10, "Resampling moving image"));
            let resampled = self
                .resampler
                .resample_image(&moving.volume, fixed.volume.frame(), &transform)?;

            self.emit(SessionEvent::progress(40, "Writing image series"));
            let image_dir = work_dir.join(&self.config.image_dir_name);
            let series = DicomSeriesWriter::new(&identity, &fixed.template, &moving.template)
                .with_series_description(self.config.series_description.as_str())
                .with_series_number(self.config.series_number)
                .with_order(self.config.instance_order)
                .write(
                    &resampled,
                    &image_dir,
                    &|| self.cancelled.load(Ordering::Acquire),
                    &mut |written, total| {
                        let percent = 40 + (40 * written / total.max(1)) as u8;
                        self.emit(SessionEvent::progress(
                            percent,
                            format!("Wrote slice {written}/{total}"),
                        ))
                    },
                )?;
            produced.push(image_dir);
            referenced = Some(series);
        }

        if let Some(ss) = moving_ss {
            if self.cancelled.load(Ordering::Acquire) {
                return Err(Error::Cancelled);
            }
            self.emit(SessionEvent::progress(80, "Transforming structure set"));
            let moved = transform_structure_set(ss, &transform);
            let rtss_path = work_dir.join(&self.config.rtss_file_name);
            StructureSetWriter::new(&identity, &fixed.template)
                .with_label(ss.label.as_str())
                .with_series_number(self.config.series_number)
                .write(&moved, referenced.as_ref(), &rtss_path)?;
            produced.push(rtss_path);
        }

        if let Some(staging) = &staging {
            commit(staging.path(), &produced, output_dir)?;
        }
        self.emit(SessionEvent::progress(100, "Transform complete"));

        let image_dir = request
            .output_image
            .then(|| output_dir.join(&self.config.image_dir_name));
        let rtss_path = moving_ss.map(|_| output_dir.join(&self.config.rtss_file_name));
        Ok(ExecuteOutcome {
            identity,
            image_dir,
            slices_written: referenced.map_or(0, |series| series.slices.len()),
            rtss_path,
        })
    }

    fn emit(&self, event: SessionEvent) {
        self.sink.emit(event);
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Move every staged entry into `output_dir`, replacing what is there.
fn commit(staging: &Path, produced: &[PathBuf], output_dir: &Path) -> Result<Vec<PathBuf>> {
    produced
        .iter()
        .map(|staged| {
            let relative = staged.strip_prefix(staging).unwrap_or(staged);
            let target = output_dir.join(relative);
            if target.is_dir() {
                fs::remove_dir_all(&target).map_err(|err| Error::write_failure(&target, err))?;
            } else if target.exists() {
                fs::remove_file(&target).map_err(|err| Error::write_failure(&target, err))?;
            }
            fs::rename(staged, &target).map_err(|err| Error::write_failure(&target, err))?;
            info!("Committed {}", target.display());
            Ok(target)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::Interpolation;
    use crate::frame::SpatialFrame;
    use crate::structure_set::{Roi, StructureSet, box_contour};
    use crate::volume::Volume;
    use nalgebra::{Point3, Vector3};
    use ndarray::Array3;
    use std::sync::Mutex;

    fn dataset(roi_center_x: Option<f64>) -> LoadedDataset {
        let frame = SpatialFrame::axis_aligned((20, 20, 3), Vector3::repeat(1.0), Point3::origin())
            .unwrap();
        let volume = Volume::new(Array3::zeros((3, 20, 20)), frame).unwrap();
        let ss = roi_center_x.map(|x| {
            StructureSet::new("ss")
                .with_roi(Roi::new(1, "box").with_contour(box_contour(x, 10.0, 1.0, 2.0)))
        });
        LoadedDataset::new(volume, ss)
    }

    fn session_with(fixed: LoadedDataset, moving: LoadedDataset) -> RegistrationSession {
        let session = RegistrationSession::default();
        {
            let mut inner = session.write();
            inner.fixed = Some(Arc::new(fixed));
            inner.moving = Some(Arc::new(moving));
            inner.state = inner.loaded_state();
        }
        session
    }

    #[test]
    fn starts_empty() {
        let session = RegistrationSession::default();
        assert_eq!(session.state(), SessionState::Empty);
        assert!(!session.get_data_summary(Role::Fixed).loaded);
    }

    #[test]
    fn estimate_requires_both_structure_sets() {
        let session = session_with(dataset(Some(10.0)), dataset(None));
        assert!(matches!(
            session.estimate_from_centroids(),
            Err(Error::MissingStructureSet)
        ));
        assert_eq!(session.state(), SessionState::BothLoaded);
    }

    #[test]
    fn estimate_sets_parameters() {
        let session = session_with(dataset(Some(10.0)), dataset(Some(15.0)));
        let params = session.estimate_from_centroids().unwrap();
        assert!((params.tx + 5.0).abs() < 1e-9);
        assert_eq!((params.rx, params.ry, params.rz), (0.0, 0.0, 0.0));
        assert_eq!(session.state(), SessionState::ParamsSet);
        assert_eq!(session.parameters(), params);
    }

    #[test]
    fn empty_contours_are_reported() {
        let mut moving = dataset(None);
        moving.structure_set = Some(StructureSet::new("empty").with_roi(Roi::new(1, "none")));
        let session = session_with(dataset(Some(10.0)), moving);
        assert!(matches!(session.estimate_from_centroids(), Err(Error::EmptyContours)));
    }

    #[test]
    fn execute_without_data_is_not_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let session = RegistrationSession::default();
        assert!(matches!(
            session.execute(ExecuteRequest::new(dir.path())),
            Err(Error::NotLoaded)
        ));
        assert!(!session.is_busy());
    }

    struct FailingResampler;

    impl VolumeResampler for FailingResampler {
        fn resample(
            &self,
            _source: &Volume,
            _target: &SpatialFrame,
            _transform: &RigidTransform,
            _interpolation: Interpolation,
            _default_value: f32,
        ) -> Result<Volume> {
            Err(Error::ResamplingFailure("target grid rejected".into()))
        }
    }

    #[test]
    fn failed_execute_keeps_datasets_and_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = Arc::clone(&events);
        let session = RegistrationSession::default()
            .with_resampler(FailingResampler)
            .with_sink(move |event: SessionEvent| sink_events.lock().unwrap().push(event));
        {
            let mut inner = session.write();
            inner.fixed = Some(Arc::new(dataset(Some(10.0))));
            inner.moving = Some(Arc::new(dataset(Some(12.0))));
            inner.state = inner.loaded_state();
        }

        let result = session.execute(ExecuteRequest::new(dir.path()));
        assert!(matches!(result, Err(Error::ResamplingFailure(_))));
        assert_eq!(session.state(), SessionState::Error);
        assert!(session.dataset(Role::Moving).is_some());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(matches!(
            events.lock().unwrap().last(),
            Some(SessionEvent::ProcessFinished { success: false, .. })
        ));
    }

    #[test]
    fn moving_without_structure_set_writes_image_only() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with(dataset(Some(10.0)), dataset(None));
        session
            .set_transform_parameters(RigidTransformParams::translation(-2.0, 0.0, 0.0))
            .unwrap();

        let outcome = session.execute(ExecuteRequest::new(dir.path())).unwrap();
        assert_eq!(outcome.rtss_path, None);
        assert_eq!(outcome.slices_written, 3);
        let image_dir = outcome.image_dir.unwrap();
        assert_eq!(fs::read_dir(&image_dir).unwrap().count(), 3);
        assert!(!dir.path().join(&session.config().rtss_file_name).exists());
        assert_eq!(session.state(), SessionState::Done);
    }

    #[test]
    fn commit_replaces_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("stage");
        fs::create_dir_all(staging.join("img")).unwrap();
        fs::write(staging.join("img").join("new.dcm"), b"new").unwrap();
        fs::create_dir_all(dir.path().join("img")).unwrap();
        fs::write(dir.path().join("img").join("old.dcm"), b"old").unwrap();

        let committed = commit(&staging, &[staging.join("img")], dir.path()).unwrap();
        assert_eq!(committed, vec![dir.path().join("img")]);
        assert!(dir.path().join("img").join("new.dcm").exists());
        assert!(!dir.path().join("img").join("old.dcm").exists());
    }
}
