//! Constellation figures as line features in the d3-celestial GeoJSON layout.
//!
//! Each feature carries a `MultiLineString` geometry whose coordinates are `[RA, Dec]` pairs in
//! degrees. d3-celestial stores RA as a longitude in `(-180, 180]`, which the transforms accept as
//! is.

use std::path::Path;
use std::time::Duration;

use itertools::Itertools;
use log::info;
use serde::Deserialize;
use thiserror::Error;

/// Default source of the constellation line data.
pub const CONSTELLATION_LINES_URL: &str =
    "https://raw.githubusercontent.com/ofrohn/d3-celestial/master/data/constellations.lines.json";

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors while loading constellation data.
#[derive(Error, Debug)]
pub enum ConstellationError {
    /// The document is not the expected GeoJSON.
    #[error("invalid constellation data: {0}")]
    Json(#[from] serde_json::Error),
    /// Reading a local file failed.
    #[error("failed to read constellation data: {0}")]
    Io(#[from] std::io::Error),
    /// Downloading failed.
    #[error("failed to download constellation data: {0}")]
    Http(#[from] reqwest::Error),
}

/// One vertex chain of a constellation figure.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstellationLine {
    /// Constellation abbreviation, e.g. `Ori`.
    pub name: String,
    /// Ordered `[RA, Dec]` vertices in degrees.
    pub vertices: Vec<[f64; 2]>,
}

impl ConstellationLine {
    /// Smallest and largest declination of the chain.
    pub fn dec_range(&self) -> Option<(f64, f64)> {
        self.vertices.iter().map(|v| v[1]).minmax().into_option()
    }
}

/// All constellation lines of a catalog. Loaded once and shared read-only.
#[derive(Clone, Debug, Default)]
pub struct ConstellationGeometry {
    lines: Vec<ConstellationLine>,
}

#[derive(Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Deserialize)]
struct Feature {
    #[serde(default)]
    id: Option<String>,
    geometry: Geometry,
}

#[derive(Deserialize)]
struct Geometry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: serde_json::Value,
}

impl ConstellationGeometry {
    /// Build from already parsed lines.
    pub fn new(lines: Vec<ConstellationLine>) -> Self {
        Self { lines }
    }

    /// Parse a GeoJSON feature collection. Features that are not `MultiLineString`s are ignored.
    pub fn from_slice(json: &[u8]) -> Result<Self, ConstellationError> {
        let collection: FeatureCollection = serde_json::from_slice(json)?;
        let mut lines = Vec::new();
        for feature in collection.features {
            if feature.geometry.kind != "MultiLineString" {
                continue;
            }
            let chains: Vec<Vec<[f64; 2]>> = serde_json::from_value(feature.geometry.coordinates)?;
            let name = feature.id.unwrap_or_default();
            lines.extend(
                chains
                    .into_iter()
                    .filter(|c| !c.is_empty())
                    .map(|vertices| ConstellationLine {
                        name: name.clone(),
                        vertices,
                    }),
            );
        }
        Ok(Self { lines })
    }

    /// Read a GeoJSON file from disk.
    pub fn from_path(path: &Path) -> Result<Self, ConstellationError> {
        let geometry = Self::from_slice(&std::fs::read(path)?)?;
        info!(
            "Loaded {} constellation lines from {}.",
            geometry.len(),
            path.display()
        );
        Ok(geometry)
    }

    /// Download a GeoJSON document.
    pub fn fetch(url: &str) -> Result<Self, ConstellationError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        let bytes = client.get(url).send()?.error_for_status()?.bytes()?;
        let geometry = Self::from_slice(&bytes)?;
        info!("Loaded {} constellation lines from {url}.", geometry.len());
        Ok(geometry)
    }

    /// Load from a URL (`http://` or `https://`) or a local path.
    pub fn load(source: &str) -> Result<Self, ConstellationError> {
        if source.starts_with("http://") || source.starts_with("https://") {
            Self::fetch(source)
        } else {
            Self::from_path(Path::new(source))
        }
    }

    /// The lines in catalog order.
    pub fn lines(&self) -> &[ConstellationLine] {
        &self.lines
    }

    /// Number of lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether there are no lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
