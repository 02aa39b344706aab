//! Gnomonic (TAN) World Coordinate System with optional SIP distortion,
//! as written by astrometry.net into its `wcs.fits` solution files.
//!
//! Pixel coordinates are 0-based with `y` growing downwards (image rows). World coordinates are
//! `(RA, Dec)` in degrees with RA normalized to `[0, 360)`.

use nalgebra::{DMatrix, Matrix2, Vector2};
use thiserror::Error;

use crate::fits::{FitsError, FitsHeader, FitsValue};

/// Iterations used to invert SIP distortions when the header carries no inverse polynomials.
const SIP_INVERSE_ITERATIONS: usize = 20;
/// Samples per image edge when measuring the reprojected extent of an image.
const EDGE_SAMPLES: usize = 32;
/// Highest SIP polynomial order accepted from a header.
const MAX_SIP_ORDER: i64 = 9;
/// Largest allowed growth of a derived frame relative to the source image.
const MAX_FRAME_GROWTH: f64 = 4.;

/// Errors while building or deriving a [`Wcs`].
#[derive(Error, Debug)]
pub enum WcsError {
    /// A mandatory keyword is absent.
    #[error("missing WCS keyword {0}")]
    MissingKeyword(String),
    /// Only `RA---TAN` / `DEC--TAN` (optionally `-SIP`) are supported.
    #[error("unsupported projection {0:?}")]
    UnsupportedProjection(String),
    /// The linear part of the transform cannot be inverted.
    #[error("CD matrix is singular")]
    SingularMatrix,
    /// A SIP `*_ORDER` keyword is negative or implausibly large.
    #[error("{keyword} = {order} is outside 0..={max}", max = MAX_SIP_ORDER)]
    InvalidSipOrder {
        /// The order keyword.
        keyword: String,
        /// Its value.
        order: i64,
    },
    /// A derived frame has no finite or reasonable extent.
    #[error("degenerate frame: {0}")]
    DegenerateFrame(String),
    /// The header itself could not be read.
    #[error(transparent)]
    Fits(#[from] FitsError),
}

/// Simple Imaging Polynomial distortion.
///
/// Coefficient `(p, q)` multiplies `u^p v^q`, where `(u, v)` are pixel offsets from `crpix`.
#[derive(Clone, Debug, PartialEq)]
pub struct Sip {
    /// Forward distortion of `u`.
    pub a: DMatrix<f64>,
    /// Forward distortion of `v`.
    pub b: DMatrix<f64>,
    /// Inverse distortion of `u`, if provided.
    pub ap: Option<DMatrix<f64>>,
    /// Inverse distortion of `v`, if provided.
    pub bp: Option<DMatrix<f64>>,
}

impl Sip {
    fn forward(&self, uv: Vector2<f64>) -> Vector2<f64> {
        uv + Vector2::new(polynomial(&self.a, uv), polynomial(&self.b, uv))
    }

    fn inverse(&self, uv: Vector2<f64>) -> Vector2<f64> {
        if let (Some(ap), Some(bp)) = (&self.ap, &self.bp) {
            return uv + Vector2::new(polynomial(ap, uv), polynomial(bp, uv));
        }

        let mut guess = uv;
        for _ in 0..SIP_INVERSE_ITERATIONS {
            guess = uv - Vector2::new(polynomial(&self.a, guess), polynomial(&self.b, guess));
        }
        guess
    }

    fn from_header(header: &FitsHeader) -> Result<Self, WcsError> {
        let a = read_polynomial(header, "A")?.ok_or(WcsError::MissingKeyword("A_ORDER".into()))?;
        let b = read_polynomial(header, "B")?.ok_or(WcsError::MissingKeyword("B_ORDER".into()))?;
        Ok(Sip {
            a,
            b,
            ap: read_polynomial(header, "AP")?,
            bp: read_polynomial(header, "BP")?,
        })
    }

    fn write_header(&self, header: &mut FitsHeader) {
        write_polynomial(header, "A", &self.a);
        write_polynomial(header, "B", &self.b);
        if let Some(ap) = &self.ap {
            write_polynomial(header, "AP", ap);
        }
        if let Some(bp) = &self.bp {
            write_polynomial(header, "BP", bp);
        }
    }
}

fn polynomial(coefficients: &DMatrix<f64>, uv: Vector2<f64>) -> f64 {
    let mut sum = 0.;
    for p in 0..coefficients.nrows() {
        for q in 0..coefficients.ncols() {
            let c = coefficients[(p, q)];
            if c != 0. {
                sum += c * uv.x.powi(p as i32) * uv.y.powi(q as i32);
            }
        }
    }
    sum
}

fn read_polynomial(header: &FitsHeader, prefix: &str) -> Result<Option<DMatrix<f64>>, WcsError> {
    let keyword = format!("{prefix}_ORDER");
    let Some(order) = header.get_i64(&keyword)? else {
        return Ok(None);
    };
    if !(0..=MAX_SIP_ORDER).contains(&order) {
        return Err(WcsError::InvalidSipOrder { keyword, order });
    }
    let order = order as usize;
    let mut coefficients = DMatrix::zeros(order + 1, order + 1);
    for p in 0..=order {
        for q in 0..=order - p {
            if let Some(c) = header.get_f64(&format!("{prefix}_{p}_{q}"))? {
                coefficients[(p, q)] = c;
            }
        }
    }
    Ok(Some(coefficients))
}

fn write_polynomial(header: &mut FitsHeader, prefix: &str, coefficients: &DMatrix<f64>) {
    let order = coefficients.nrows().saturating_sub(1);
    header.insert(&format!("{prefix}_ORDER"), FitsValue::Integer(order as i64));
    for p in 0..=order {
        for q in 0..=order - p {
            let c = coefficients[(p, q)];
            if c != 0. {
                header.insert(&format!("{prefix}_{p}_{q}"), FitsValue::Float(c));
            }
        }
    }
}

/// Relevant data for WCS transformations from FITS headers.
#[derive(Clone, Debug, PartialEq)]
pub struct Wcs {
    /// Reference pixel, 1-based as in FITS.
    pub crpix: Vector2<f64>,
    /// Coordinate value at `crpix`, in degrees.
    pub crval: Vector2<f64>,
    /// Linear transformation matrix, degrees per pixel.
    pub cd: Matrix2<f64>,
    /// Optional polynomial distortion.
    pub sip: Option<Sip>,
    cd_inv: Matrix2<f64>,
}

impl Wcs {
    /// Create a new undistorted instance.
    pub fn new(
        crpix: Vector2<f64>,
        crval: Vector2<f64>,
        cd: Matrix2<f64>,
    ) -> Result<Self, WcsError> {
        let cd_inv = cd.try_inverse().ok_or(WcsError::SingularMatrix)?;
        Ok(Self {
            crpix,
            crval,
            cd,
            sip: None,
            cd_inv,
        })
    }

    /// Attach SIP distortion terms.
    pub fn with_sip(mut self, sip: Sip) -> Self {
        self.sip = Some(sip);
        self
    }

    /// Build the transform from the keywords of a FITS header.
    ///
    /// The linear part is read from `CDi_j`, falling back to `CDELTi` combined with `PCi_j`.
    pub fn from_header(header: &FitsHeader) -> Result<Self, WcsError> {
        let ctype1 = header
            .get_str("CTYPE1")?
            .ok_or(WcsError::MissingKeyword("CTYPE1".into()))?;
        let ctype2 = header
            .get_str("CTYPE2")?
            .ok_or(WcsError::MissingKeyword("CTYPE2".into()))?;
        if !ctype1.starts_with("RA---TAN") {
            return Err(WcsError::UnsupportedProjection(ctype1.to_string()));
        }
        if !ctype2.starts_with("DEC--TAN") {
            return Err(WcsError::UnsupportedProjection(ctype2.to_string()));
        }
        let has_sip = ctype1.ends_with("-SIP");

        let required = |keyword: &str| -> Result<f64, WcsError> {
            header
                .get_f64(keyword)?
                .ok_or_else(|| WcsError::MissingKeyword(keyword.to_string()))
        };

        let crpix = Vector2::new(required("CRPIX1")?, required("CRPIX2")?);
        let crval = Vector2::new(required("CRVAL1")?, required("CRVAL2")?);

        let cd = if header.get("CD1_1").is_some() {
            let optional = |keyword: &str| header.get_f64(keyword).map(|v| v.unwrap_or(0.));
            Matrix2::new(
                required("CD1_1")?,
                optional("CD1_2")?,
                optional("CD2_1")?,
                required("CD2_2")?,
            )
        } else {
            let pc = |keyword: &str, default: f64| {
                header.get_f64(keyword).map(|v| v.unwrap_or(default))
            };
            let cdelt =
                Matrix2::from_diagonal(&Vector2::new(required("CDELT1")?, required("CDELT2")?));
            cdelt
                * Matrix2::new(
                    pc("PC1_1", 1.)?,
                    pc("PC1_2", 0.)?,
                    pc("PC2_1", 0.)?,
                    pc("PC2_2", 1.)?,
                )
        };

        let wcs = Self::new(crpix, crval, cd)?;
        if has_sip {
            Ok(wcs.with_sip(Sip::from_header(header)?))
        } else {
            Ok(wcs)
        }
    }

    /// Parse a FITS byte stream and build the transform from its primary header.
    pub fn from_fits_bytes(bytes: &[u8]) -> Result<Self, WcsError> {
        Self::from_header(&FitsHeader::from_bytes(bytes)?)
    }

    /// Write the transform as FITS header keywords.
    pub fn to_header(&self) -> FitsHeader {
        let mut header = FitsHeader::default();
        header.insert("SIMPLE", FitsValue::Boolean(true));
        header.insert("BITPIX", FitsValue::Integer(8));
        header.insert("NAXIS", FitsValue::Integer(0));
        let suffix = if self.sip.is_some() { "-SIP" } else { "" };
        header.insert("CTYPE1", FitsValue::String(format!("RA---TAN{suffix}")));
        header.insert("CTYPE2", FitsValue::String(format!("DEC--TAN{suffix}")));
        header.insert("CRVAL1", FitsValue::Float(self.crval.x));
        header.insert("CRVAL2", FitsValue::Float(self.crval.y));
        header.insert("CRPIX1", FitsValue::Float(self.crpix.x));
        header.insert("CRPIX2", FitsValue::Float(self.crpix.y));
        header.insert("CD1_1", FitsValue::Float(self.cd.m11));
        header.insert("CD1_2", FitsValue::Float(self.cd.m12));
        header.insert("CD2_1", FitsValue::Float(self.cd.m21));
        header.insert("CD2_2", FitsValue::Float(self.cd.m22));
        if let Some(sip) = &self.sip {
            sip.write_header(&mut header);
        }
        header
    }

    /// Transforms from pixel to sky coordinate space.
    pub fn pixel_to_world(&self, pixel: Vector2<f64>) -> Vector2<f64> {
        let mut offset = pixel + Vector2::new(1., 1.) - self.crpix;
        if let Some(sip) = &self.sip {
            offset = sip.forward(offset);
        }
        let iwc = (self.cd * offset).map(f64::to_radians);

        let (ra0, dec0) = (self.crval.x.to_radians(), self.crval.y.to_radians());
        let denom = dec0.cos() - iwc.y * dec0.sin();
        let ra = ra0 + iwc.x.atan2(denom);
        let dec = (dec0.sin() + iwc.y * dec0.cos()).atan2(iwc.x.hypot(denom));

        Vector2::new(ra.to_degrees().rem_euclid(360.), dec.to_degrees())
    }

    /// Transforms from sky coordinate to pixel space.
    ///
    /// Points 90° or more away from the tangent point have no gnomonic image and yield `NaN`.
    pub fn world_to_pixel(&self, world_coordinate: Vector2<f64>) -> Vector2<f64> {
        let (ra0, dec0) = (self.crval.x.to_radians(), self.crval.y.to_radians());
        let (ra, dec) = (world_coordinate.x.to_radians(), world_coordinate.y.to_radians());
        let dra = ra - ra0;

        let cos_c = dec0.sin() * dec.sin() + dec0.cos() * dec.cos() * dra.cos();
        if !(cos_c > 0.) {
            return Vector2::new(f64::NAN, f64::NAN);
        }
        let iwc = Vector2::new(
            dec.cos() * dra.sin() / cos_c,
            (dec0.cos() * dec.sin() - dec0.sin() * dec.cos() * dra.cos()) / cos_c,
        )
        .map(f64::to_degrees);

        let mut offset = self.cd_inv * iwc;
        if let Some(sip) = &self.sip {
            offset = sip.inverse(offset);
        }
        offset + self.crpix - Vector2::new(1., 1.)
    }

    /// Approximate pixel scale in degrees per pixel.
    pub fn pixel_scale(&self) -> f64 {
        self.cd.determinant().abs().sqrt()
    }

    /// Sky position of the center of an image of the given size.
    pub fn field_center(&self, width: u32, height: u32) -> Vector2<f64> {
        self.pixel_to_world(Vector2::new(width as f64 / 2., height as f64 / 2.))
    }

    /// Derive the transform-native frame of an image: same tangent point and pixel scale,
    /// no distortion, north up and east to the left.
    ///
    /// Returns the derived transform and the pixel size of a canvas that contains the whole
    /// source image of `width` x `height` pixels after reprojection.
    pub fn north_up(&self, width: u32, height: u32) -> Result<(Wcs, u32, u32), WcsError> {
        let scale = self.pixel_scale();
        let cd = Matrix2::new(-scale, 0., 0., -scale);
        let mut native = Wcs::new(Vector2::new(1., 1.), self.crval, cd)?;

        let (w, h) = (width as f64, height as f64);
        let edge = |t: f64| -> [Vector2<f64>; 4] {
            [
                Vector2::new(t * w, 0.),
                Vector2::new(w, t * h),
                Vector2::new((1. - t) * w, h),
                Vector2::new(0., (1. - t) * h),
            ]
        };

        let mut min = Vector2::repeat(f64::INFINITY);
        let mut max = Vector2::repeat(f64::NEG_INFINITY);
        for i in 0..EDGE_SAMPLES {
            for pixel in edge(i as f64 / EDGE_SAMPLES as f64) {
                let p = native.world_to_pixel(self.pixel_to_world(pixel));
                if !p.iter().all(|v| v.is_finite()) {
                    return Err(WcsError::DegenerateFrame(format!(
                        "image edge point {pixel:?} has no native position"
                    )));
                }
                min = min.inf(&p);
                max = max.sup(&p);
            }
        }

        let size = max - min;
        let limit = MAX_FRAME_GROWTH * w.max(h);
        if size.x > limit || size.y > limit {
            return Err(WcsError::DegenerateFrame(format!(
                "native frame of {:.0}x{:.0} pixels is too large",
                size.x, size.y
            )));
        }

        native.crpix -= min;
        Ok((native, size.x.ceil() as u32 + 1, size.y.ceil() as u32 + 1))
    }
}
