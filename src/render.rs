//! Rasterization of the two annotated views of a solved photograph.
//!
//! - The camera view keeps the photograph exactly as shot and draws the overlay in its pixel frame.
//! - The sky view reprojects the photograph into the north-up frame of its solution
//!   ([`Wcs::north_up`]) and draws the overlay in that frame.
//!
//! Both views use the same [`GridOverlayBuilder`]; only the transform and canvas size differ.

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage, imageops};
use imageproc::drawing::draw_antialiased_line_segment_mut;
use imageproc::pixelops::interpolate;
use log::{error, info};
use nalgebra::Vector2;
use thiserror::Error;

use crate::constellations::ConstellationGeometry;
use crate::overlay::{GridOverlayBuilder, Overlay, OverlayStats, Polyline};
use crate::projector::{CoordinateProjector, SkyTransform};
use crate::wcs::{Wcs, WcsError};

/// Default file name of the camera view.
pub const CAMERA_VIEW_FILE: &str = "result_original_orient.jpg";
/// Default file name of the sky view.
pub const SKY_VIEW_FILE: &str = "result_normalized.jpg";
/// Border around the sky view, in pixels.
pub const SKY_VIEW_PADDING: u32 = 15;

const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);

/// Errors while rendering or writing a view.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Encoding or writing the output failed.
    #[error("failed to write image: {0}")]
    Image(#[from] image::ImageError),
    /// The frame of the view could not be derived.
    #[error("failed to set up frame: {0}")]
    Frame(#[from] WcsError),
    /// The source image has no pixels.
    #[error("source image is empty")]
    EmptyImage,
}

/// How a family of polylines is stroked.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineStyle {
    /// Stroke color.
    pub color: Rgb<u8>,
    /// Opacity in `[0, 1]`.
    pub alpha: f32,
    /// Stroke width in pixels.
    pub width: f32,
    /// Dash and gap lengths in pixels, solid if `None`.
    pub dash: Option<(f32, f32)>,
}

impl LineStyle {
    /// Faint solid grid of the camera view.
    pub const CAMERA_GRID: Self = Self {
        color: Rgb([255, 255, 255]),
        alpha: 0.2,
        width: 0.5,
        dash: None,
    };
    /// Dotted grid of the sky view.
    pub const SKY_GRID: Self = Self {
        color: Rgb([255, 255, 255]),
        alpha: 0.3,
        width: 1.,
        dash: Some((1.5, 2.5)),
    };
    /// Constellation figures.
    pub const CONSTELLATION: Self = Self {
        color: Rgb([0, 255, 255]),
        alpha: 0.8,
        width: 1.5,
        dash: None,
    };
}

/// The two views.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    /// Photograph as shot.
    Camera,
    /// Photograph reprojected north up.
    Sky,
}

/// A rendered view, not yet written.
#[derive(Clone, Debug)]
pub struct RenderedView {
    /// Which view this is.
    pub view: View,
    /// The final raster.
    pub image: RgbImage,
    /// Grid lines drawn.
    pub grid_lines: usize,
    /// Constellation lines drawn.
    pub constellation_lines: usize,
    /// Feature outcome counts.
    pub stats: OverlayStats,
}

/// A view written to disk.
#[derive(Clone, Debug)]
pub struct ViewReport {
    /// Which view this is.
    pub view: View,
    /// Output file.
    pub path: PathBuf,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Grid lines drawn.
    pub grid_lines: usize,
    /// Constellation lines drawn.
    pub constellation_lines: usize,
}

/// Result of rendering and writing one view.
pub type ViewOutcome = Result<ViewReport, RenderError>;

/// Outcome of [`SceneComposer::compose`]. Each view succeeds or fails on its own.
#[derive(Debug)]
pub struct SceneReport {
    /// The camera view.
    pub camera: ViewOutcome,
    /// The sky view.
    pub sky: ViewOutcome,
}

/// Combines a photograph, its solution and constellation data into annotated views.
pub struct SceneComposer<'a> {
    image: &'a RgbImage,
    wcs: &'a Wcs,
    constellations: &'a ConstellationGeometry,
    sky_padding: u32,
}

impl<'a> SceneComposer<'a> {
    /// Composer for one photograph.
    pub fn new(
        image: &'a RgbImage,
        wcs: &'a Wcs,
        constellations: &'a ConstellationGeometry,
    ) -> Self {
        Self {
            image,
            wcs,
            constellations,
            sky_padding: SKY_VIEW_PADDING,
        }
    }

    /// Set the border around the sky view.
    pub fn with_sky_padding(mut self, padding: u32) -> Self {
        self.sky_padding = padding;
        self
    }

    /// The photograph at its native size and orientation with the overlay in camera pixels.
    pub fn render_camera_view(&self) -> Result<RenderedView, RenderError> {
        let (width, height) = self.image.dimensions();
        if width == 0 || height == 0 {
            return Err(RenderError::EmptyImage);
        }
        let mut canvas = self.image.clone();
        let projector = CoordinateProjector::new(self.wcs);
        let overlay = draw_overlay(
            &mut canvas,
            &projector,
            self.constellations,
            LineStyle::CAMERA_GRID,
        );
        Ok(rendered(View::Camera, canvas, &overlay))
    }

    /// The photograph reprojected north up, with the overlay in the same frame and a border.
    pub fn render_sky_view(&self) -> Result<RenderedView, RenderError> {
        let (width, height) = self.image.dimensions();
        if width == 0 || height == 0 {
            return Err(RenderError::EmptyImage);
        }
        let (native, native_width, native_height) = self.wcs.north_up(width, height)?;

        let mut canvas = reproject(self.image, self.wcs, &native, native_width, native_height);
        let projector = CoordinateProjector::new(&native);
        let overlay = draw_overlay(
            &mut canvas,
            &projector,
            self.constellations,
            LineStyle::SKY_GRID,
        );
        let canvas = pad(&canvas, self.sky_padding);
        Ok(rendered(View::Sky, canvas, &overlay))
    }

    /// Render both views and write them. A failing view does not prevent the other one.
    pub fn compose(&self, camera_path: &Path, sky_path: &Path) -> SceneReport {
        info!("Generating the camera view.");
        let camera = self
            .render_camera_view()
            .and_then(|view| write_view(view, camera_path));
        log_outcome(&camera);

        info!("Generating the sky view.");
        let sky = self
            .render_sky_view()
            .and_then(|view| write_view(view, sky_path));
        log_outcome(&sky);

        SceneReport { camera, sky }
    }
}

fn rendered(view: View, image: RgbImage, overlay: &Overlay) -> RenderedView {
    RenderedView {
        view,
        image,
        grid_lines: overlay.grid.len(),
        constellation_lines: overlay.constellations.len(),
        stats: overlay.stats,
    }
}

fn write_view(view: RenderedView, path: &Path) -> Result<ViewReport, RenderError> {
    view.image.save(path)?;
    Ok(ViewReport {
        view: view.view,
        path: path.to_path_buf(),
        width: view.image.width(),
        height: view.image.height(),
        grid_lines: view.grid_lines,
        constellation_lines: view.constellation_lines,
    })
}

fn log_outcome(outcome: &ViewOutcome) {
    match outcome {
        Ok(report) => info!(
            "Wrote {} ({}x{}, {} constellation lines).",
            report.path.display(),
            report.width,
            report.height,
            report.constellation_lines
        ),
        Err(e) => error!("View failed: {e}"),
    }
}

/// Build the overlay for the whole canvas and draw it.
fn draw_overlay<T: SkyTransform>(
    canvas: &mut RgbImage,
    projector: &CoordinateProjector<T>,
    constellations: &ConstellationGeometry,
    grid_style: LineStyle,
) -> Overlay {
    let (width, height) = canvas.dimensions();
    let overlay =
        GridOverlayBuilder::new(projector, width as f64, height as f64).build(constellations);

    for line in &overlay.grid {
        draw_polyline(canvas, line, &grid_style);
    }
    for line in &overlay.constellations {
        draw_polyline(canvas, line, &LineStyle::CONSTELLATION);
    }
    overlay
}

/// Stroke every valid edge of a polyline.
pub fn draw_polyline(canvas: &mut RgbImage, polyline: &Polyline, style: &LineStyle) {
    for (a, b) in polyline.edges() {
        draw_segment(canvas, a, b, style);
    }
}

/// Stroke one segment, clipped to the canvas.
pub fn draw_segment(canvas: &mut RgbImage, a: Vector2<f64>, b: Vector2<f64>, style: &LineStyle) {
    let (width, height) = canvas.dimensions();
    let Some((a, b)) = clip_segment(a, b, width as f64, height as f64) else {
        return;
    };

    match style.dash {
        None => stroke(canvas, a, b, style),
        Some((on, off)) => {
            let length = (b - a).norm();
            let period = (on + off) as f64;
            if length == 0. || period <= 0. {
                return stroke(canvas, a, b, style);
            }
            let direction = (b - a) / length;
            let mut start = 0.;
            while start < length {
                let end = (start + on as f64).min(length);
                stroke(canvas, a + direction * start, a + direction * end, style);
                start += period;
            }
        }
    }
}

fn stroke(canvas: &mut RgbImage, a: Vector2<f64>, b: Vector2<f64>, style: &LineStyle) {
    let strokes = style.width.ceil().max(1.) as usize;
    let alpha = style.alpha * style.width.min(strokes as f32) / strokes as f32;
    let d = b - a;
    let normal = if d.norm() > 0. {
        Vector2::new(-d.y, d.x) / d.norm()
    } else {
        Vector2::zeros()
    };

    for k in 0..strokes {
        let offset = normal * (k as f64 - (strokes - 1) as f64 / 2.);
        let (p, q) = (a + offset, b + offset);
        draw_antialiased_line_segment_mut(
            canvas,
            (p.x.round() as i32, p.y.round() as i32),
            (q.x.round() as i32, q.y.round() as i32),
            style.color,
            |line, background, weight| interpolate(line, background, weight * alpha),
        );
    }
}

/// Clip a segment to `[0, width - 1] x [0, height - 1]` (Liang-Barsky).
pub fn clip_segment(
    a: Vector2<f64>,
    b: Vector2<f64>,
    width: f64,
    height: f64,
) -> Option<(Vector2<f64>, Vector2<f64>)> {
    if !a.iter().chain(b.iter()).all(|v| v.is_finite()) {
        return None;
    }
    let d = b - a;
    let (x_max, y_max) = (width - 1., height - 1.);
    let mut t0: f64 = 0.;
    let mut t1: f64 = 1.;

    for (p, q) in [
        (-d.x, a.x),
        (d.x, x_max - a.x),
        (-d.y, a.y),
        (d.y, y_max - a.y),
    ] {
        if p == 0. {
            if q < 0. {
                return None;
            }
        } else {
            let t = q / p;
            if p < 0. {
                t0 = t0.max(t);
            } else {
                t1 = t1.min(t);
            }
        }
    }

    (t0 <= t1).then(|| (a + d * t0, a + d * t1))
}

/// Resample `source` (solved by `source_wcs`) onto a `width` x `height` canvas in the frame of
/// `target_wcs`. Nearest neighbour; pixels outside the photograph are black.
pub fn reproject(
    source: &RgbImage,
    source_wcs: &Wcs,
    target_wcs: &Wcs,
    width: u32,
    height: u32,
) -> RgbImage {
    let (w, h) = (source.width() as f64, source.height() as f64);
    RgbImage::from_fn(width, height, |x, y| {
        let world = target_wcs.pixel_to_world(Vector2::new(x as f64, y as f64));
        let p = source_wcs.world_to_pixel(world).map(f64::round);
        if p.x >= 0. && p.y >= 0. && p.x < w && p.y < h {
            *source.get_pixel(p.x as u32, p.y as u32)
        } else {
            BACKGROUND
        }
    })
}

fn pad(image: &RgbImage, padding: u32) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(
        image.width() + 2 * padding,
        image.height() + 2 * padding,
        BACKGROUND,
    );
    imageops::replace(&mut canvas, image, padding as i64, padding as i64);
    canvas
}
