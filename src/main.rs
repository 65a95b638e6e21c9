//! Command line front end: register a moving DICOM series onto a fixed one,
//! or copy a structure set between series.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use futures::channel::mpsc;
use nalgebra::Point3;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dicom_rigid::{
    CentroidStrategy, ExecuteRequest, RegistrationSession, RigidTransformParams, Role,
    SessionConfig, SessionEvent, StackOrder, rtss_copier,
};

#[derive(Parser, Debug)]
#[command(author, about, version, long_about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resample the moving series into the fixed grid and move its contours.
    Register(RegisterArgs),
    /// Transform the RTSTRUCT of one directory onto the series of another.
    CopyRtss(CopyArgs),
}

#[derive(Args, Debug)]
struct RegisterArgs {
    /// directory of the reference series
    #[arg(long)]
    fixed: PathBuf,

    /// directory of the series to move
    #[arg(long)]
    moving: PathBuf,

    /// output directory; transformed_image/ and transformed_rtss.dcm land here
    #[arg(short, long)]
    output: PathBuf,

    /// estimate the translation from the structure set centroids
    #[arg(long)]
    centroid: bool,

    /// weight contour centroids by their area instead of averaging points
    #[arg(long, requires = "centroid")]
    area_weighted: bool,

    #[command(flatten)]
    transform: TransformArgs,

    /// skip the image series
    #[arg(long)]
    no_image: bool,

    /// skip the structure set
    #[arg(long)]
    no_rtss: bool,

    /// write straight into the output directory instead of staging first
    #[arg(long)]
    no_staging: bool,

    /// number output slices from the top of the stack down
    #[arg(long)]
    descending: bool,

    /// classify every file by its header instead of trying small files first as RTSTRUCT
    #[arg(long)]
    no_size_hint: bool,
}

#[derive(Args, Debug)]
struct CopyArgs {
    /// directory holding the RTSTRUCT to copy
    #[arg(long)]
    source: PathBuf,

    /// directory of the series the copy should reference
    #[arg(long)]
    target: PathBuf,

    /// path of the new RTSTRUCT file
    #[arg(short, long)]
    output: PathBuf,

    #[command(flatten)]
    transform: TransformArgs,

    /// classify every file by its header instead of trying small files first as RTSTRUCT
    #[arg(long)]
    no_size_hint: bool,
}

#[derive(Args, Debug)]
struct TransformArgs {
    /// translation along x in mm
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    tx: f64,
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    ty: f64,
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    tz: f64,

    /// rotation about x in degrees
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    rx: f64,
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    ry: f64,
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    rz: f64,

    /// rotation center as x,y,z in mm
    #[arg(
        long,
        value_delimiter = ',',
        num_args = 3,
        allow_negative_numbers = true,
        value_names = ["X", "Y", "Z"]
    )]
    center: Option<Vec<f64>>,
}

impl TransformArgs {
    fn params(&self) -> RigidTransformParams {
        let params = RigidTransformParams::translation(self.tx, self.ty, self.tz)
            .with_rotation(self.rx, self.ry, self.rz);
        match self.center.as_deref() {
            Some([x, y, z]) => params.with_center(Point3::new(*x, *y, *z)),
            _ => params,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Register(args) => register(args).await,
        Command::CopyRtss(args) => copy_rtss(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn register(args: RegisterArgs) -> Result<(), Box<dyn std::error::Error>> {
    let strategy = if args.area_weighted {
        CentroidStrategy::AreaWeighted
    } else {
        CentroidStrategy::PointAverage
    };
    let order = if args.descending {
        StackOrder::Descending
    } else {
        StackOrder::Ascending
    };
    let config = SessionConfig::default()
        .with_centroid_strategy(strategy)
        .with_staged_writes(!args.no_staging)
        .with_instance_order(order)
        .with_size_heuristic(!args.no_size_hint);

    let (tx, mut rx) = mpsc::unbounded::<SessionEvent>();
    let reporter = tokio::spawn(async move {
        while let Some(event) = rx.next().await {
            match event {
                SessionEvent::ProgressUpdated { percent, message } => {
                    info!("[{percent:>3}%] {message}")
                }
                SessionEvent::DatasetLoaded { role, summary } => info!(
                    "{} dataset: {} {:?} spacing {:?} origin {:?}, {} ROI(s)",
                    role.label(),
                    summary.modality,
                    summary.size,
                    summary.spacing,
                    summary.origin,
                    summary.roi_count
                ),
                SessionEvent::ProcessFinished { success: false, message } => warn!("{message}"),
                SessionEvent::ProcessFinished { .. } => {}
            }
        }
    });

    let session = std::sync::Arc::new(RegistrationSession::new(config).with_sink(tx));
    session.load_directory(&args.fixed, Role::Fixed)?;
    session.load_directory(&args.moving, Role::Moving)?;

    if args.centroid {
        session.estimate_from_centroids()?;
    } else {
        session.set_transform_parameters(args.transform.params())?;
    }

    let request = ExecuteRequest::new(&args.output)
        .with_image(!args.no_image)
        .with_rtss(!args.no_rtss);
    let outcome = session.execute_in_background(request).await??;
    info!(
        "Series {} written ({} slice(s))",
        outcome.identity.series_uid, outcome.slices_written
    );

    // Closing the channel lets the reporter drain and finish.
    drop(session);
    reporter.await?;
    Ok(())
}

fn copy_rtss(args: CopyArgs) -> Result<(), Box<dyn std::error::Error>> {
    let outcome = rtss_copier::copy_structure_set(
        &args.source,
        &args.target,
        &args.transform.params(),
        &args.output,
        !args.no_size_hint,
    )?;
    info!(
        "Wrote {} with {} ROI(s), {} contour(s)",
        outcome.output_path.display(),
        outcome.roi_count,
        outcome.contour_count
    );
    Ok(())
}
