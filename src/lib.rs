#![warn(missing_docs)]

//! Annotate a photograph of the night sky with a celestial coordinate grid and constellation
//! figures. \
//! The photograph is plate solved by [nova.astrometry.net](https://nova.astrometry.net), which
//! returns a TAN (optionally TAN-SIP) world coordinate system. That transform is then used to draw
//! right ascension meridians, declination parallels and constellation lines onto two views.
//!
//! ## Interface
//! A full run is a single call to [`pipeline::run`] with a [`Config`] and a [`SolveService`],
//! usually [`NovaService`]. The steps are also usable on their own:
//! - [`SolveJobClient`] drives login, upload, polling and download against any [`SolveService`].
//! - [`Wcs`] parses the solution and maps between pixel and sky coordinates.
//! - [`GridOverlayBuilder`] turns a transform and a canvas size into visible polylines.
//! - [`SceneComposer`] rasterizes the camera view and the north-up sky view.
//!
//! Example:
//! ```no_run
//! use skygrid::{ConstellationGeometry, SceneComposer, Wcs};
//!
//! let wcs = Wcs::from_fits_bytes(&std::fs::read("wcs.fits")?)?;
//! let constellations = ConstellationGeometry::load("constellations.lines.json")?;
//! let photograph = image::open("starphoto.jpg")?.to_rgb8();
//! let report = SceneComposer::new(&photograph, &wcs, &constellations)
//!     .compose("camera.jpg".as_ref(), "sky.jpg".as_ref());
//! assert!(report.camera.is_ok());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Grid
//! - Meridians every 15° of right ascension, parallels every 10° of declination.
//! - Lines are restricted to the sky footprint of the canvas, padded by 10°.
//!   A footprint crossing RA 0 uses the full RA range.
//! - Constellation lines are kept when at least one vertex falls within half a canvas of it.
//!
//! Points that cannot be projected are masked, never drawn. A feature whose transform fails is
//! skipped and counted in [`OverlayStats`].

pub mod config;
pub mod constellations;
pub mod fits;
pub mod input;
pub mod nova;
pub mod overlay;
pub mod pipeline;
pub mod projector;
pub mod render;
pub mod solve;
pub mod wcs;

pub use config::Config;
pub use constellations::{ConstellationGeometry, ConstellationLine};
pub use nova::NovaService;
pub use overlay::{GridOverlayBuilder, Overlay, OverlayStats, Polyline};
pub use pipeline::{PipelineError, RunReport};
pub use projector::{CoordinateProjector, ProjectionWindow, SkyTransform};
pub use render::{SceneComposer, SceneReport};
pub use solve::{SolveError, SolveJobClient, SolveService};
pub use wcs::Wcs;
