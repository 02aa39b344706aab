//! Coordinate grid and constellation figures as pixel-space polylines.
//!
//! The builder is independent of the frame it draws into: it only sees a
//! [`CoordinateProjector`] and the pixel size of the canvas. The same code therefore serves the
//! camera frame of the photograph and the north-up frame derived from its solution.

use std::fmt;

use log::debug;
use nalgebra::Vector2;
use ndarray::{Array1, Array2, Zip};
use thiserror::Error;

use crate::constellations::{ConstellationGeometry, ConstellationLine};
use crate::projector::{CoordinateProjector, PointOutcome, ProjectionWindow, SkyTransform};

/// RA spacing of meridians, in degrees.
pub const RA_STEP: f64 = 15.;
/// Dec spacing of parallels, in degrees.
pub const DEC_STEP: f64 = 10.;
/// Samples along each grid line.
pub const GRID_SAMPLES: usize = 100;

/// What a polyline represents.
#[derive(Clone, Debug, PartialEq)]
pub enum FeatureKind {
    /// Line of constant RA, in degrees.
    Meridian(f64),
    /// Line of constant Dec, in degrees.
    Parallel(f64),
    /// Vertex chain of the named constellation.
    Constellation(String),
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureKind::Meridian(ra) => write!(f, "meridian RA={ra}"),
            FeatureKind::Parallel(dec) => write!(f, "parallel Dec={dec}"),
            FeatureKind::Constellation(name) => write!(f, "constellation {name}"),
        }
    }
}

/// A feature whose projection failed numerically.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("projection of {kind} failed at vertex {vertex}")]
pub struct FeatureError {
    /// The feature that was dropped.
    pub kind: FeatureKind,
    /// Index of the failing vertex.
    pub vertex: usize,
}

/// Pixel-space points with a validity mask. Only edges between two valid points are drawn.
#[derive(Clone, Debug, PartialEq)]
pub struct Polyline {
    /// What the line represents.
    pub kind: FeatureKind,
    /// Points, shape `(n, 2)`.
    pub points: Array2<f64>,
    /// Validity of each point.
    pub valid: Array1<bool>,
}

impl Polyline {
    /// Number of valid points.
    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|v| **v).count()
    }

    /// Consecutive pairs of valid points.
    pub fn edges(&self) -> impl Iterator<Item = (Vector2<f64>, Vector2<f64>)> + '_ {
        let point = move |i: usize| Vector2::new(self.points[[i, 0]], self.points[[i, 1]]);
        (1..self.valid.len())
            .filter(move |&i| self.valid[i - 1] && self.valid[i])
            .map(move |i| (point(i - 1), point(i)))
    }
}

/// Counts of what happened to each feature during a build.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OverlayStats {
    /// Features turned into polylines.
    pub emitted: usize,
    /// Features outside the frame or without valid points.
    pub culled: usize,
    /// Features dropped because the transform failed.
    pub failed: usize,
}

/// Everything drawn on top of one frame.
#[derive(Clone, Debug, Default)]
pub struct Overlay {
    /// Meridians and parallels.
    pub grid: Vec<Polyline>,
    /// Constellation figures.
    pub constellations: Vec<Polyline>,
    /// Per-feature outcome counts.
    pub stats: OverlayStats,
}

/// Builds grid lines and constellation figures for one frame.
pub struct GridOverlayBuilder<'a, T> {
    projector: &'a CoordinateProjector<T>,
    width: f64,
    height: f64,
    window: ProjectionWindow,
}

impl<'a, T: SkyTransform> GridOverlayBuilder<'a, T> {
    /// Builder for a canvas of `width` x `height` pixels.
    /// The celestial window is the padded footprint of the canvas.
    pub fn new(projector: &'a CoordinateProjector<T>, width: f64, height: f64) -> Self {
        let window = projector.footprint(width, height);
        Self {
            projector,
            width,
            height,
            window,
        }
    }

    /// Replace the celestial window.
    pub fn with_window(mut self, window: ProjectionWindow) -> Self {
        self.window = window;
        self
    }

    /// The celestial window grid lines are generated for.
    pub fn window(&self) -> ProjectionWindow {
        self.window
    }

    /// RA values of the meridians: multiples of [`RA_STEP`] from the floor of the window up to one
    /// step past its end, never beyond 360.
    pub fn meridian_values(&self) -> Vec<f64> {
        let start = (self.window.ra_min / RA_STEP).floor() * RA_STEP;
        let end = (self.window.ra_max / RA_STEP).floor() * RA_STEP + RA_STEP;
        steps(start, end, RA_STEP)
            .filter(|ra| *ra <= 360.)
            .collect()
    }

    /// Dec values of the parallels, analogous to [`meridian_values`](Self::meridian_values).
    pub fn parallel_values(&self) -> Vec<f64> {
        let start = (self.window.dec_min / DEC_STEP).floor() * DEC_STEP;
        let end = (self.window.dec_max / DEC_STEP).floor() * DEC_STEP + DEC_STEP;
        steps(start, end, DEC_STEP)
            .filter(|dec| (-90.0..=90.).contains(dec))
            .collect()
    }

    /// The meridian at `ra`, sampled across the window's Dec range.
    ///
    /// Points are kept when finite and within one frame width left or right of the frame.
    /// Returns `Ok(None)` if no point is kept.
    pub fn meridian(&self, ra: f64) -> Result<Option<Polyline>, FeatureError> {
        let decs = Array1::linspace(self.window.dec_min, self.window.dec_max, GRID_SAMPLES);
        let world = decs.iter().map(|dec| Vector2::new(ra, *dec));
        self.grid_line(FeatureKind::Meridian(ra), world)
    }

    /// The parallel at `dec`, sampled across the window's RA range.
    pub fn parallel(&self, dec: f64) -> Result<Option<Polyline>, FeatureError> {
        let ras = Array1::linspace(self.window.ra_min, self.window.ra_max, GRID_SAMPLES);
        let world = ras.iter().map(|ra| Vector2::new(*ra, dec));
        self.grid_line(FeatureKind::Parallel(dec), world)
    }

    /// A constellation line, or `Ok(None)` if it does not come near the frame.
    ///
    /// A kept line retains all of its finite vertices, including those off the frame.
    pub fn constellation(
        &self,
        line: &ConstellationLine,
    ) -> Result<Option<Polyline>, FeatureError> {
        let Some((dec_min, dec_max)) = line.dec_range() else {
            return Ok(None);
        };
        if !self.window.overlaps_dec(dec_min, dec_max) {
            return Ok(None);
        }

        let kind = FeatureKind::Constellation(line.name.clone());
        let world = line.vertices.iter().map(|v| Vector2::new(v[0], v[1]));
        let (points, finite) = self.project(&kind, world)?;
        if !finite.iter().any(|v| *v) {
            return Ok(None);
        }

        let (w, h) = (self.width, self.height);
        let near_frame = Zip::from(points.rows()).and(&finite).fold(false, |acc, p, ok| {
            acc || (*ok && p[0] > -0.5 * w && p[0] < 1.5 * w && p[1] > -0.5 * h && p[1] < 1.5 * h)
        });
        if !near_frame {
            return Ok(None);
        }

        Ok(Some(Polyline {
            kind,
            points,
            valid: finite,
        }))
    }

    /// Build the complete overlay. Features that fail are skipped and counted.
    pub fn build(&self, constellations: &ConstellationGeometry) -> Overlay {
        let mut overlay = Overlay::default();

        let grid = self
            .meridian_values()
            .into_iter()
            .map(|ra| self.meridian(ra))
            .chain(self.parallel_values().into_iter().map(|dec| self.parallel(dec)));
        overlay.grid = collect_features(grid, &mut overlay.stats);

        let figures = constellations
            .lines()
            .iter()
            .map(|line| self.constellation(line));
        overlay.constellations = collect_features(figures, &mut overlay.stats);

        debug!(
            "Overlay: {} grid lines, {} constellation lines, {:?}.",
            overlay.grid.len(),
            overlay.constellations.len(),
            overlay.stats
        );
        overlay
    }

    fn grid_line(
        &self,
        kind: FeatureKind,
        world: impl Iterator<Item = Vector2<f64>>,
    ) -> Result<Option<Polyline>, FeatureError> {
        let (points, finite) = self.project(&kind, world)?;
        let w = self.width;
        let mut valid = finite;
        Zip::from(&mut valid)
            .and(points.rows())
            .for_each(|ok, p| *ok = *ok && p[0] > -w && p[0] < 2. * w);

        if !valid.iter().any(|v| *v) {
            return Ok(None);
        }
        Ok(Some(Polyline {
            kind,
            points,
            valid,
        }))
    }

    /// Project a vertex sequence. Non-finite results are masked, transform errors fail the feature.
    fn project(
        &self,
        kind: &FeatureKind,
        world: impl Iterator<Item = Vector2<f64>>,
    ) -> Result<(Array2<f64>, Array1<bool>), FeatureError> {
        let mut points = Vec::new();
        let mut valid = Vec::new();
        for (vertex, w) in world.enumerate() {
            match self.projector.project_point(w) {
                PointOutcome::Valid(p) => {
                    points.extend([p.x, p.y]);
                    valid.push(true);
                }
                PointOutcome::Invalid => {
                    points.extend([f64::NAN, f64::NAN]);
                    valid.push(false);
                }
                PointOutcome::Failed => {
                    return Err(FeatureError {
                        kind: kind.clone(),
                        vertex,
                    });
                }
            }
        }
        let n = valid.len();
        let points = Array2::from_shape_vec((n, 2), points)
            .unwrap_or_else(|_| Array2::from_elem((n, 2), f64::NAN));
        Ok((points, Array1::from(valid)))
    }
}

fn steps(start: f64, end: f64, step: f64) -> impl Iterator<Item = f64> {
    let count = ((end - start) / step).round().max(0.) as usize;
    (0..=count).map(move |i| start + i as f64 * step)
}

/// Skip-and-continue aggregation of per-feature results.
fn collect_features(
    results: impl Iterator<Item = Result<Option<Polyline>, FeatureError>>,
    stats: &mut OverlayStats,
) -> Vec<Polyline> {
    let mut lines = Vec::new();
    for result in results {
        match result {
            Ok(Some(line)) => {
                stats.emitted += 1;
                lines.push(line);
            }
            Ok(None) => stats.culled += 1,
            Err(e) => {
                debug!("Skipping feature: {e}");
                stats.failed += 1;
            }
        }
    }
    lines
}
