//! Command line configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use log::LevelFilter;

use crate::constellations::CONSTELLATION_LINES_URL;
use crate::nova::{NOVA_API_URL, NOVA_BASE_URL};
use crate::render::{CAMERA_VIEW_FILE, SKY_VIEW_FILE};
use crate::solve::{MAX_POLL_ATTEMPTS, POLL_INTERVAL, PollPolicy, Visibility};

/// Name of the solution file written next to the views.
pub const SOLUTION_FILE: &str = "wcs.fits";

fn parse_interval(s: &str) -> Result<Duration, String> {
    let seconds: f64 = s
        .parse()
        .map_err(|_| format!("invalid number of seconds: {s}"))?;
    Duration::try_from_secs_f64(seconds).map_err(|e| e.to_string())
}

/// Solve a photograph of the night sky and annotate it with a coordinate grid and
/// constellation figures.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct Config {
    /// Photograph to solve. Searched for in `--dir` if not given.
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Directory searched for a file named like `*starphoto*.{png,jpg,jpeg}`
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    /// Where the solution and both views are written. Defaults to `--dir`.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// astrometry.net API key
    #[arg(long, env = "ASTROMETRY_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// API root of the solving service
    #[arg(long, default_value = NOVA_API_URL)]
    pub api_url: String,

    /// Site root of the solving service, used to download solutions
    #[arg(long, default_value = NOVA_BASE_URL)]
    pub base_url: String,

    /// Constellation lines as GeoJSON, a URL or a local path
    #[arg(long, default_value = CONSTELLATION_LINES_URL)]
    pub constellations: String,

    /// Seconds to wait before each status poll
    #[arg(long, default_value = "5", value_parser = parse_interval)]
    pub poll_interval: Duration,

    /// Number of status polls before giving up
    #[arg(long, default_value_t = MAX_POLL_ATTEMPTS)]
    pub max_attempts: usize,

    /// Do not list the submission publicly
    #[arg(long, default_value_t = false)]
    pub private: bool,

    /// More log output, repeat for trace
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, default_value_t = false, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Config {
    /// Polling schedule for the solve.
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: self.poll_interval,
            max_attempts: self.max_attempts,
        }
    }

    /// Sharing flags for the upload.
    pub fn visibility(&self) -> Visibility {
        Visibility {
            publicly_visible: !self.private,
            ..Visibility::default()
        }
    }

    /// Output directory.
    pub fn output_dir(&self) -> &Path {
        self.output_dir.as_deref().unwrap_or(&self.dir)
    }

    /// Path of the downloaded solution.
    pub fn solution_path(&self) -> PathBuf {
        self.output_dir().join(SOLUTION_FILE)
    }

    /// Path of the camera view.
    pub fn camera_view_path(&self) -> PathBuf {
        self.output_dir().join(CAMERA_VIEW_FILE)
    }

    /// Path of the sky view.
    pub fn sky_view_path(&self) -> PathBuf {
        self.output_dir().join(SKY_VIEW_FILE)
    }

    /// Log level from the verbosity flags.
    pub fn log_level(&self) -> LevelFilter {
        match (self.quiet, self.verbose) {
            (true, _) => LevelFilter::Warn,
            (false, 0) => LevelFilter::Info,
            (false, 1) => LevelFilter::Debug,
            (false, _) => LevelFilter::Trace,
        }
    }
}
