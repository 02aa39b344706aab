//! Bidirectional mapping between image pixels and celestial coordinates with validity tracking.

use itertools::Itertools;
use log::{debug, warn};
use nalgebra::Vector2;
use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::wcs::{Wcs, WcsError};

/// Padding added around the corner footprint, in degrees.
pub const FOOTPRINT_MARGIN: f64 = 10.;

/// A pixel/world transform pair.
///
/// An `Err` or any non-finite component in the output marks the point as invalid.
pub trait SkyTransform {
    /// Pixel `(x, y)` to world `(RA, Dec)` in degrees.
    fn pixel_to_world(&self, pixel: Vector2<f64>) -> Result<Vector2<f64>, WcsError>;
    /// World `(RA, Dec)` in degrees to pixel `(x, y)`.
    fn world_to_pixel(&self, world: Vector2<f64>) -> Result<Vector2<f64>, WcsError>;
}

impl SkyTransform for Wcs {
    fn pixel_to_world(&self, pixel: Vector2<f64>) -> Result<Vector2<f64>, WcsError> {
        Ok(Wcs::pixel_to_world(self, pixel))
    }

    fn world_to_pixel(&self, world: Vector2<f64>) -> Result<Vector2<f64>, WcsError> {
        Ok(Wcs::world_to_pixel(self, world))
    }
}

impl<T: SkyTransform + ?Sized> SkyTransform for &T {
    fn pixel_to_world(&self, pixel: Vector2<f64>) -> Result<Vector2<f64>, WcsError> {
        (**self).pixel_to_world(pixel)
    }

    fn world_to_pixel(&self, world: Vector2<f64>) -> Result<Vector2<f64>, WcsError> {
        (**self).world_to_pixel(world)
    }
}

/// Result of transforming a single point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointOutcome {
    /// Finite image of the point.
    Valid(Vector2<f64>),
    /// The transform produced no finite result.
    Invalid,
    /// The transform reported an error.
    Failed,
}

impl PointOutcome {
    fn from_result(result: Result<Vector2<f64>, WcsError>) -> Self {
        match result {
            Ok(p) if p.iter().all(|v| v.is_finite()) => PointOutcome::Valid(p),
            Ok(_) => PointOutcome::Invalid,
            Err(e) => {
                debug!("Transform failed: {e}");
                PointOutcome::Failed
            }
        }
    }

    /// The point, if valid.
    pub fn valid(self) -> Option<Vector2<f64>> {
        match self {
            PointOutcome::Valid(p) => Some(p),
            _ => None,
        }
    }
}

/// Celestial bounding box of an image footprint, in degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectionWindow {
    /// Lower RA bound.
    pub ra_min: f64,
    /// Upper RA bound.
    pub ra_max: f64,
    /// Lower Dec bound.
    pub dec_min: f64,
    /// Upper Dec bound.
    pub dec_max: f64,
}

impl ProjectionWindow {
    /// The whole celestial sphere.
    pub fn full_sky() -> Self {
        Self {
            ra_min: 0.,
            ra_max: 360.,
            dec_min: -90.,
            dec_max: 90.,
        }
    }

    /// Window spanning a set of world coordinates, padded by `margin` degrees and clamped to
    /// the sky.
    ///
    /// If the points span more than 180° of RA they are taken to straddle the RA = 0 seam and
    /// the RA range is widened to `[0, 360]`.
    pub fn around(points: &[Vector2<f64>], margin: f64) -> Option<Self> {
        let (ra_min, ra_max) = points.iter().map(|p| p.x).minmax().into_option()?;
        let (dec_min, dec_max) = points.iter().map(|p| p.y).minmax().into_option()?;
        let (ra_min, ra_max) = if ra_max - ra_min > 180. {
            (0., 360.)
        } else {
            ((ra_min - margin).max(0.), (ra_max + margin).min(360.))
        };
        Some(Self {
            ra_min,
            ra_max,
            dec_min: (dec_min - margin).max(-90.),
            dec_max: (dec_max + margin).min(90.),
        })
    }

    /// Whether a Dec interval overlaps the window.
    pub fn overlaps_dec(&self, dec_min: f64, dec_max: f64) -> bool {
        dec_max >= self.dec_min && dec_min <= self.dec_max
    }
}

/// Projects point sequences through a [`SkyTransform`], carrying validity masks instead of
/// failing.
#[derive(Clone, Debug)]
pub struct CoordinateProjector<T> {
    transform: T,
}

impl<T: SkyTransform> CoordinateProjector<T> {
    /// Wrap a transform.
    pub fn new(transform: T) -> Self {
        Self { transform }
    }

    /// The wrapped transform.
    pub fn transform(&self) -> &T {
        &self.transform
    }

    /// Project one world coordinate to pixels.
    pub fn project_point(&self, world: Vector2<f64>) -> PointOutcome {
        PointOutcome::from_result(self.transform.world_to_pixel(world))
    }

    /// Map one pixel to world coordinates.
    pub fn unproject_point(&self, pixel: Vector2<f64>) -> PointOutcome {
        PointOutcome::from_result(self.transform.pixel_to_world(pixel))
    }

    /// Project world coordinates of shape `(n, 2)` to pixels.
    ///
    /// Invalid points are `NaN` in the output and `false` in the mask.
    pub fn project(&self, world: ArrayView2<f64>) -> (Array2<f64>, Array1<bool>) {
        map_rows(world, |p| self.project_point(p))
    }

    /// Map pixels of shape `(n, 2)` to world coordinates.
    pub fn unproject(&self, pixels: ArrayView2<f64>) -> (Array2<f64>, Array1<bool>) {
        map_rows(pixels, |p| self.unproject_point(p))
    }

    /// Celestial window covered by an image of `width` x `height` pixels.
    ///
    /// Falls back to the full sky if any corner cannot be mapped.
    pub fn footprint(&self, width: f64, height: f64) -> ProjectionWindow {
        let corners = [
            Vector2::new(0., 0.),
            Vector2::new(width, 0.),
            Vector2::new(width, height),
            Vector2::new(0., height),
        ];
        let world: Option<Vec<_>> = corners
            .iter()
            .map(|c| self.unproject_point(*c).valid())
            .collect();

        match world.and_then(|w| ProjectionWindow::around(&w, FOOTPRINT_MARGIN)) {
            Some(window) => {
                debug!("Footprint window: {window:?}");
                window
            }
            None => {
                warn!("Could not map image corners to the sky, using the full sky.");
                ProjectionWindow::full_sky()
            }
        }
    }
}

fn map_rows<F>(points: ArrayView2<f64>, mut f: F) -> (Array2<f64>, Array1<bool>)
where
    F: FnMut(Vector2<f64>) -> PointOutcome,
{
    let n = points.len_of(Axis(0));
    let mut out = Array2::from_elem((n, 2), f64::NAN);
    let mut mask = Array1::from_elem(n, false);
    for (i, row) in points.axis_iter(Axis(0)).enumerate() {
        if let PointOutcome::Valid(p) = f(Vector2::new(row[0], row[1])) {
            out[[i, 0]] = p.x;
            out[[i, 1]] = p.y;
            mask[i] = true;
        }
    }
    (out, mask)
}
