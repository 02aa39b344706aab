//! One end-to-end run: find the photograph, solve it, annotate it.

use std::path::PathBuf;

use log::info;
use thiserror::Error;

use crate::config::Config;
use crate::constellations::{ConstellationError, ConstellationGeometry};
use crate::input::find_input_image;
use crate::render::{SceneComposer, SceneReport};
use crate::solve::{SolveError, SolveJobClient, SolveService, SubmissionJob};
use crate::wcs::{Wcs, WcsError};

/// Errors that end a run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// No photograph given and none found.
    #[error("no file matching *starphoto*.{{png,jpg,jpeg}} in {}", .0.display())]
    NoInputImage(PathBuf),
    /// Reading the photograph, creating the output directory or writing the solution failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being done.
        context: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The solving service did not produce a solution.
    #[error(transparent)]
    Solve(#[from] SolveError),
    /// The downloaded solution is not a usable TAN header.
    #[error("invalid solution: {0}")]
    Solution(#[from] WcsError),
    /// Constellation data could not be loaded.
    #[error(transparent)]
    Constellations(#[from] ConstellationError),
    /// The photograph could not be decoded.
    #[error("failed to decode photograph: {0}")]
    Image(#[from] image::ImageError),
}

fn io_error(context: String) -> impl FnOnce(std::io::Error) -> PipelineError {
    move |source| PipelineError::Io { context, source }
}

/// What a completed run produced.
#[derive(Debug)]
pub struct RunReport {
    /// The solved photograph.
    pub image: PathBuf,
    /// The finished submission.
    pub job: SubmissionJob,
    /// Where the solution was written.
    pub solution: PathBuf,
    /// The decoded solution.
    pub wcs: Wcs,
    /// Outcome of both views.
    pub scene: SceneReport,
}

/// Run the whole pipeline against `service`.
///
/// Every step up to decoding the photograph is fatal. The two views are attempted
/// independently and their outcomes are reported in [`RunReport::scene`].
pub fn run<S: SolveService>(config: &Config, service: S) -> Result<RunReport, PipelineError> {
    let image_path = match &config.image {
        Some(path) => path.clone(),
        None => find_input_image(&config.dir)
            .map_err(io_error(format!("failed to list {}", config.dir.display())))?
            .ok_or_else(|| PipelineError::NoInputImage(config.dir.clone()))?,
    };
    info!("Using photograph {}.", image_path.display());

    let bytes = std::fs::read(&image_path)
        .map_err(io_error(format!("failed to read {}", image_path.display())))?;
    let file_name = image_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "starphoto.jpg".to_string());

    let output_dir = config.output_dir();
    std::fs::create_dir_all(output_dir)
        .map_err(io_error(format!("failed to create {}", output_dir.display())))?;

    let client = SolveJobClient::new(service).with_policy(config.poll_policy());
    let (job, solution) =
        client.solve(&config.api_key, &bytes, &file_name, &config.visibility())?;

    let solution_path = config.solution_path();
    std::fs::write(&solution_path, &solution)
        .map_err(io_error(format!("failed to write {}", solution_path.display())))?;
    info!("Saved solution to {}.", solution_path.display());

    let wcs = Wcs::from_fits_bytes(&solution)?;
    info!(
        "Solution centered on RA {:.3}, Dec {:.3} at {:.2} arcsec/pixel.",
        wcs.crval.x,
        wcs.crval.y,
        wcs.pixel_scale() * 3600.
    );

    let constellations = ConstellationGeometry::load(&config.constellations)?;
    let photograph = image::open(&image_path)?.to_rgb8();

    let scene = SceneComposer::new(&photograph, &wcs, &constellations)
        .compose(&config.camera_view_path(), &config.sky_view_path());

    Ok(RunReport {
        image: image_path,
        job,
        solution: solution_path,
        wcs,
        scene,
    })
}
