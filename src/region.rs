//! Named polygon regions, grouped by source file.
//!
//! A `RegionFile` is an ordered `name -> polygon` mapping; `RegionSet` holds an ordered list of
//! them. The "at most one region per file" contract from the config schema is enforced by
//! construction: resolution returns a single `Option<&str>` per file, not a set.

use std::path::Path;

use geo::Polygon;

use crate::errors::{ConfigError, ConfigResult};
use crate::geomath::point_in_polygon;

/// One named polygon region within a region file.
#[derive(Debug, Clone)]
pub struct Region {
    pub name: String,
    pub polygon: Polygon<f64>,
}

/// An ordered collection of named regions loaded from a single KML (or equivalent) source.
#[derive(Debug, Clone, Default)]
pub struct RegionFile {
    pub source: String,
    regions: Vec<Region>,
}

impl RegionFile {
    pub fn new(source: impl Into<String>, regions: Vec<Region>) -> Self {
        Self { source: source.into(), regions }
    }

    /// Empty region file: every point resolves to `None` for this slot.
    pub fn empty(source: impl Into<String>) -> Self {
        Self { source: source.into(), regions: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn region_names(&self) -> impl Iterator<Item = &str> {
        self.regions.iter().map(|r| r.name.as_str())
    }

    /// The first region (in declared order) containing the point, or `None`.
    pub fn resolve(&self, lat: f64, lon: f64) -> Option<&str> {
        self.regions
            .iter()
            .find(|r| point_in_polygon(lat, lon, &r.polygon))
            .map(|r| r.name.as_str())
    }

    /// Parse a KML document's `Placemark`/`Polygon` elements into named regions. Only the
    /// exterior boundary of each placemark's polygon is used; inner boundaries (holes) and
    /// non-polygon geometry are ignored, which is sufficient for the closed-ring regions this
    /// crate operates on (full KML fidelity is an external-adapter concern, not this crate's).
    pub fn load_kml(path: &Path) -> ConfigResult<Self> {
        let mut reader = kml::KmlReader::<_, f64>::from_path(path).map_err(|e| ConfigError::MalformedRegionFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let kml_doc = reader.read().map_err(|e| ConfigError::MalformedRegionFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut regions = Vec::new();
        collect_placemarks(&kml_doc, &mut regions);

        Ok(Self {
            source: path.display().to_string(),
            regions,
        })
    }
}

fn collect_placemarks(kml: &kml::Kml<f64>, out: &mut Vec<Region>) {
    use kml::Kml;
    match kml {
        Kml::KmlDocument(doc) => {
            for child in &doc.elements {
                collect_placemarks(child, out);
            }
        }
        Kml::Document { elements, .. } => {
            for child in elements {
                collect_placemarks(child, out);
            }
        }
        Kml::Folder { elements, .. } => {
            for child in elements {
                collect_placemarks(child, out);
            }
        }
        Kml::Placemark(placemark) => {
            let name = placemark.name.clone().unwrap_or_else(|| "unnamed".to_string());
            if let Some(geometry) = &placemark.geometry {
                if let Some(polygon) = polygon_from_kml_geometry(geometry) {
                    out.push(Region { name, polygon });
                }
            }
        }
        _ => {}
    }
}

fn polygon_from_kml_geometry(geometry: &kml::types::Geometry<f64>) -> Option<Polygon<f64>> {
    use kml::types::Geometry;
    match geometry {
        Geometry::Polygon(poly) => Some(polygon_from_kml_ring(&poly.outer)),
        Geometry::MultiGeometry(multi) => multi.geometries.iter().find_map(polygon_from_kml_geometry),
        _ => None,
    }
}

fn polygon_from_kml_ring(ring: &kml::types::LinearRing<f64>) -> Polygon<f64> {
    let coords: Vec<(f64, f64)> = ring
        .coords
        .iter()
        .map(|c| (c.y, c.x)) // kml stores (lon, lat, alt); we want (lat, lon)
        .collect();
    crate::geomath::polygon_from_lat_lon(&coords)
}

/// Ordered collection of region files; resolves a point into a parallel vector of region
/// names (or `None`), one entry per file.
#[derive(Debug, Clone, Default)]
pub struct RegionSet {
    files: Vec<RegionFile>,
}

impl RegionSet {
    pub fn new(files: Vec<RegionFile>) -> Self {
        Self { files }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn file(&self, index: usize) -> Option<&RegionFile> {
        self.files.get(index)
    }

    /// Index of a region file by its declared source name, used to resolve
    /// `transition_regions`/`regions` conditions that name a file.
    pub fn index_of(&self, source: &str) -> Option<usize> {
        self.files.iter().position(|f| f.source == source)
    }

    /// Resolve a point against every file, producing one `Option<String>` slot per file.
    pub fn resolve(&self, lat: f64, lon: f64) -> Vec<Option<String>> {
        self.files.iter().map(|f| f.resolve(lat, lon).map(str::to_string)).collect()
    }

    pub fn all_region_names(&self) -> impl Iterator<Item = &str> {
        self.files.iter().flat_map(|f| f.region_names())
    }
}
