//! Domain definitions: the named geographic grids that products live on.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::BoundingBox;

/// Coordinate reference system descriptor of a domain grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crs {
    /// Authority code, e.g. "EPSG:2193"
    pub epsg: String,
    /// Grid mapping name, e.g. "transverse_mercator"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Projection parameters (central meridian, false easting, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, f64>,
}

impl Crs {
    pub fn epsg(code: impl Into<String>) -> Self {
        Self {
            epsg: code.into(),
            name: None,
            parameters: BTreeMap::new(),
        }
    }
}

/// Regular grid geometry: origin, square cell size and dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    /// X coordinate of the first column
    pub start_x: f64,
    /// Y coordinate of the first row
    pub start_y: f64,
    /// Cell size in CRS units (metres for projected grids)
    pub cell_size: f64,
    pub n_rows: usize,
    pub n_cols: usize,
}

impl GridGeometry {
    /// Cell coordinates along each axis: `(x, y)`.
    pub fn coords(&self) -> (Vec<f64>, Vec<f64>) {
        let x = (0..self.n_cols)
            .map(|i| self.start_x + i as f64 * self.cell_size)
            .collect();
        let y = (0..self.n_rows)
            .map(|j| self.start_y + j as f64 * self.cell_size)
            .collect();
        (x, y)
    }

    /// Bounding box spanned by the cell coordinates.
    pub fn extent(&self) -> BoundingBox {
        let last_x = self.start_x + self.n_cols.saturating_sub(1) as f64 * self.cell_size;
        let last_y = self.start_y + self.n_rows.saturating_sub(1) as f64 * self.cell_size;

        BoundingBox::new(
            self.start_x.min(last_x),
            self.start_y.min(last_y),
            self.start_x.max(last_x),
            self.start_y.max(last_y),
        )
    }

    /// Total number of grid cells.
    pub fn len(&self) -> usize {
        self.n_rows * self.n_cols
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0 || self.n_cols == 0
    }
}

/// A named domain. Immutable once products have been stored against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    /// Short code, e.g. "AKL"
    pub id: String,
    pub geometry: GridGeometry,
    pub crs: Crs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn akl() -> GridGeometry {
        GridGeometry {
            start_x: 1_627_000.0,
            start_y: 5_854_000.0,
            cell_size: 2000.0,
            n_rows: 128,
            n_cols: 128,
        }
    }

    #[test]
    fn test_coords() {
        let (x, y) = akl().coords();
        assert_eq!(x.len(), 128);
        assert_eq!(y.len(), 128);
        assert_eq!(x[0], 1_627_000.0);
        assert_eq!(x[1], 1_629_000.0);
        assert_eq!(y[127], 5_854_000.0 + 127.0 * 2000.0);
    }

    #[test]
    fn test_extent() {
        let bbox = akl().extent();
        assert_eq!(bbox.min_x, 1_627_000.0);
        assert_eq!(bbox.max_x, 1_627_000.0 + 127.0 * 2000.0);
        assert_eq!(bbox.max_y, 5_854_000.0 + 127.0 * 2000.0);
        assert_eq!(akl().len(), 128 * 128);
    }

    #[test]
    fn test_empty_geometry() {
        let mut g = akl();
        g.n_cols = 0;
        assert!(g.is_empty());
        let (x, _) = g.coords();
        assert!(x.is_empty());
        assert_eq!(g.extent().min_x, g.start_x);
    }

    #[test]
    fn test_domain_serde() {
        let domain = Domain {
            id: "AKL".to_string(),
            geometry: akl(),
            crs: Crs::epsg("EPSG:2193"),
            description: None,
        };
        let json = serde_json::to_value(&domain).unwrap();
        assert!(json["crs"].get("parameters").is_none());
        let back: Domain = serde_json::from_value(json).unwrap();
        assert_eq!(back, domain);
    }
}
