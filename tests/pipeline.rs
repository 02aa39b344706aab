use std::cell::Cell;
use std::path::Path;

use approx::assert_abs_diff_eq;
use clap::Parser;
use image::{Rgb, RgbImage};
use nalgebra::{Matrix2, Vector2};

use skygrid::solve::{JobId, JobStatus, Session, SubmissionId, Visibility};
use skygrid::{Config, PipelineError, SolveError, SolveService, Wcs, pipeline};

const WIDTH: u32 = 1200;
const HEIGHT: u32 = 900;
/// Pixel scale of the small photograph, degrees per pixel.
const SCALE: f64 = 0.01;

/// Solves every upload with a fixed transform after a few polls.
struct ScriptedSolver {
    solution: Vec<u8>,
    polls_until_done: usize,
    polls: Cell<usize>,
}

impl ScriptedSolver {
    fn new(wcs: &Wcs, polls_until_done: usize) -> Self {
        Self {
            solution: wcs.to_header().to_bytes(),
            polls_until_done,
            polls: Cell::new(0),
        }
    }
}

impl SolveService for ScriptedSolver {
    fn authenticate(&self, api_key: &str) -> Result<Session, SolveError> {
        match api_key {
            "key" => Ok(Session::new("session")),
            _ => Err(SolveError::LoginRejected("bad apikey".into())),
        }
    }

    fn submit(
        &self,
        _session: &Session,
        image: &[u8],
        file_name: &str,
        _visibility: &Visibility,
    ) -> Result<SubmissionId, SolveError> {
        assert!(!image.is_empty());
        assert_eq!(file_name, "orion_starphoto.png");
        Ok(SubmissionId(1))
    }

    fn submission_jobs(
        &self,
        _session: &Session,
        _submission: SubmissionId,
    ) -> Result<Vec<JobId>, SolveError> {
        self.polls.set(self.polls.get() + 1);
        Ok(vec![JobId(2)])
    }

    fn job_status(&self, _session: &Session, _job: JobId) -> Result<JobStatus, SolveError> {
        Ok(if self.polls.get() < self.polls_until_done {
            JobStatus::Pending
        } else {
            JobStatus::Success
        })
    }

    fn fetch_solution(&self, _session: &Session, _job: JobId) -> Result<Vec<u8>, SolveError> {
        Ok(self.solution.clone())
    }
}

/// Centered on Orion's belt, slightly rotated and mirrored like a camera.
fn orion_wcs(width: u32, height: u32, scale: f64) -> Wcs {
    let angle = 12f64.to_radians();
    Wcs::new(
        Vector2::new(width as f64 / 2., height as f64 / 2.),
        Vector2::new(83., -5.),
        Matrix2::new(
            -scale * angle.cos(),
            scale * angle.sin(),
            -scale * angle.sin(),
            -scale * angle.cos(),
        ),
    )
    .unwrap()
}

fn write_photograph(dir: &Path, width: u32, height: u32) {
    let photograph = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x / 5 % 200) as u8, (y / 5 % 200) as u8, 30])
    });
    photograph.save(dir.join("orion_starphoto.png")).unwrap();
    std::fs::write(dir.join("notes.txt"), "not a photograph").unwrap();
}

fn config(dir: &Path, api_key: &str) -> Config {
    let constellations = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data/orion.json");
    Config::try_parse_from([
        "skygrid",
        "--api-key",
        api_key,
        "--dir",
        dir.to_str().unwrap(),
        "--constellations",
        constellations.to_str().unwrap(),
        "--poll-interval",
        "0",
    ])
    .unwrap()
}

#[test]
fn annotates_orion() {
    let dir = tempfile::tempdir().unwrap();
    write_photograph(dir.path(), WIDTH, HEIGHT);
    let wcs = orion_wcs(WIDTH, HEIGHT, SCALE);
    let solver = ScriptedSolver::new(&wcs, 3);

    let report = pipeline::run(&config(dir.path(), "key"), &solver).unwrap();
    assert_eq!(solver.polls.get(), 3);
    assert_eq!(report.job.job_id, Some(JobId(2)));

    let solution = std::fs::read(dir.path().join("wcs.fits")).unwrap();
    let solved = Wcs::from_fits_bytes(&solution).unwrap();
    assert_abs_diff_eq!(solved.crval, wcs.crval, epsilon = 1e-9);
    assert_abs_diff_eq!(solved.cd, wcs.cd, epsilon = 1e-12);

    let camera = report.scene.camera.unwrap();
    assert_eq!((camera.width, camera.height), (WIDTH, HEIGHT));
    assert!(camera.grid_lines > 0);
    // Orion's head lies more than half a frame above the photograph, the Big Dipper is far away.
    assert_eq!(camera.constellation_lines, 4);
    assert_eq!(
        image::image_dimensions(dir.path().join("result_original_orient.jpg")).unwrap(),
        (WIDTH, HEIGHT)
    );

    let sky = report.scene.sky.unwrap();
    assert!(sky.width > WIDTH && sky.height > HEIGHT);
    assert!(sky.constellation_lines >= 4);
    assert_eq!(
        image::image_dimensions(dir.path().join("result_normalized.jpg")).unwrap(),
        (sky.width, sky.height)
    );
}

/// A 12 megapixel camera frame with all of Orion in view. Too slow for unoptimized builds.
#[test]
#[cfg_attr(debug_assertions, ignore)]
fn annotates_full_frame_orion() {
    let (width, height) = (4000, 3000);
    let dir = tempfile::tempdir().unwrap();
    write_photograph(dir.path(), width, height);
    let solver = ScriptedSolver::new(&orion_wcs(width, height, 0.007), 1);

    let report = pipeline::run(&config(dir.path(), "key"), &solver).unwrap();

    let camera = report.scene.camera.unwrap();
    assert_eq!((camera.width, camera.height), (width, height));
    assert_eq!(camera.constellation_lines, 5);
    assert_eq!(
        image::image_dimensions(dir.path().join("result_original_orient.jpg")).unwrap(),
        (width, height)
    );

    let sky = report.scene.sky.unwrap();
    assert!(sky.width > width && sky.height > height);
    assert_eq!(sky.constellation_lines, 5);
}

#[test]
fn rejected_login_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_photograph(dir.path(), WIDTH, HEIGHT);
    let solver = ScriptedSolver::new(&orion_wcs(WIDTH, HEIGHT, SCALE), 1);

    let result = pipeline::run(&config(dir.path(), "wrong"), &solver);
    assert!(matches!(
        result,
        Err(PipelineError::Solve(SolveError::LoginRejected(_)))
    ));
    assert_eq!(solver.polls.get(), 0);
    assert!(!dir.path().join("wcs.fits").exists());
    assert!(!dir.path().join("result_original_orient.jpg").exists());
}

#[test]
fn missing_constellation_data_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write_photograph(dir.path(), WIDTH, HEIGHT);
    let solver = ScriptedSolver::new(&orion_wcs(WIDTH, HEIGHT, SCALE), 1);
    let mut config = config(dir.path(), "key");
    config.constellations = dir.path().join("missing.json").to_string_lossy().into_owned();

    let result = pipeline::run(&config, &solver);
    assert!(matches!(result, Err(PipelineError::Constellations(_))));
    assert!(dir.path().join("wcs.fits").exists());
    assert!(!dir.path().join("result_normalized.jpg").exists());
}
