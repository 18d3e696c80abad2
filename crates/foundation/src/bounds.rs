//! Geographic bounding boxes in WGS84 degrees.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Axis-aligned lon/lat box. Serialized as `[min_lon, min_lat, max_lon, max_lat]`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(into = "[f64; 4]", try_from = "[f64; 4]")]
pub struct GeoBounds {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoundsError {
    NotFinite,
    LongitudeOutOfRange(f64),
    LatitudeOutOfRange(f64),
    Inverted,
}

impl fmt::Display for BoundsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundsError::NotFinite => write!(f, "bbox values must be finite numbers"),
            BoundsError::LongitudeOutOfRange(v) => {
                write!(f, "longitude {v} is outside [-180, 180]")
            }
            BoundsError::LatitudeOutOfRange(v) => write!(f, "latitude {v} is outside [-90, 90]"),
            BoundsError::Inverted => write!(f, "bbox minimum exceeds maximum"),
        }
    }
}

impl std::error::Error for BoundsError {}

impl GeoBounds {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self, BoundsError> {
        let values = [min_lon, min_lat, max_lon, max_lat];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(BoundsError::NotFinite);
        }
        for lon in [min_lon, max_lon] {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(BoundsError::LongitudeOutOfRange(lon));
            }
        }
        for lat in [min_lat, max_lat] {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(BoundsError::LatitudeOutOfRange(lat));
            }
        }
        if min_lon > max_lon || min_lat > max_lat {
            return Err(BoundsError::Inverted);
        }
        Ok(GeoBounds {
            min: [min_lon, min_lat],
            max: [max_lon, max_lat],
        })
    }

    pub fn world() -> Self {
        GeoBounds {
            min: [-180.0, -90.0],
            max: [180.0, 90.0],
        }
    }

    /// Smallest box containing every point, or `None` for an empty iterator.
    pub fn from_points<I>(points: I) -> Result<Option<Self>, BoundsError>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut acc: Option<[f64; 4]> = None;
        for (lon, lat) in points {
            acc = Some(match acc {
                None => [lon, lat, lon, lat],
                Some([a, b, c, d]) => [a.min(lon), b.min(lat), c.max(lon), d.max(lat)],
            });
        }
        acc.map(Self::try_from).transpose()
    }

    pub fn min_lon(&self) -> f64 {
        self.min[0]
    }

    pub fn min_lat(&self) -> f64 {
        self.min[1]
    }

    pub fn max_lon(&self) -> f64 {
        self.max[0]
    }

    pub fn max_lat(&self) -> f64 {
        self.max[1]
    }

    pub fn width(&self) -> f64 {
        self.max[0] - self.min[0]
    }

    pub fn height(&self) -> f64 {
        self.max[1] - self.min[1]
    }

    /// (lon, lat) midpoint.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min[0] + self.max[0]) / 2.0,
            (self.min[1] + self.max[1]) / 2.0,
        )
    }

    /// Coarse camera zoom level that frames the box, from its larger side in degrees.
    pub fn suggested_zoom(&self) -> u8 {
        let extent = self.width().max(self.height());
        const STEPS: [(f64, u8); 9] = [
            (180.0, 1),
            (90.0, 2),
            (45.0, 3),
            (20.0, 4),
            (10.0, 5),
            (5.0, 6),
            (2.0, 7),
            (1.0, 8),
            (0.5, 9),
        ];
        STEPS
            .iter()
            .find(|(threshold, _)| extent > *threshold)
            .map(|(_, zoom)| *zoom)
            .unwrap_or(10)
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.min[0], self.min[1], self.max[0], self.max[1]]
    }
}

impl From<GeoBounds> for [f64; 4] {
    fn from(b: GeoBounds) -> Self {
        b.to_array()
    }
}

impl TryFrom<[f64; 4]> for GeoBounds {
    type Error = BoundsError;

    fn try_from(v: [f64; 4]) -> Result<Self, Self::Error> {
        GeoBounds::new(v[0], v[1], v[2], v[3])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_and_inverted() {
        assert_eq!(
            GeoBounds::new(-181.0, 0.0, 0.0, 1.0),
            Err(BoundsError::LongitudeOutOfRange(-181.0))
        );
        assert_eq!(
            GeoBounds::new(0.0, -91.0, 1.0, 1.0),
            Err(BoundsError::LatitudeOutOfRange(-91.0))
        );
        assert_eq!(
            GeoBounds::new(10.0, 0.0, 5.0, 1.0),
            Err(BoundsError::Inverted)
        );
        assert_eq!(
            GeoBounds::new(f64::NAN, 0.0, 5.0, 1.0),
            Err(BoundsError::NotFinite)
        );
    }

    #[test]
    fn center_and_zoom() {
        let b = GeoBounds::new(10.0, 40.0, 12.0, 41.0).unwrap();
        assert_eq!(b.center(), (11.0, 40.5));
        // Larger side is 2 degrees: not > 2, so falls to the "> 1" step.
        assert_eq!(b.suggested_zoom(), 8);
        assert_eq!(GeoBounds::world().suggested_zoom(), 1);

        let tiny = GeoBounds::new(0.0, 0.0, 0.1, 0.1).unwrap();
        assert_eq!(tiny.suggested_zoom(), 10);
    }

    #[test]
    fn from_points_covers_all() {
        let b = GeoBounds::from_points([(1.0, 2.0), (-3.0, 5.0), (4.0, -1.0)])
            .unwrap()
            .unwrap();
        assert_eq!(b.to_array(), [-3.0, -1.0, 4.0, 5.0]);
        assert!(GeoBounds::from_points(std::iter::empty()).unwrap().is_none());
    }

    #[test]
    fn serde_uses_flat_array_and_validates() {
        let b = GeoBounds::new(-1.0, -2.0, 3.0, 4.0).unwrap();
        assert_eq!(serde_json::to_string(&b).unwrap(), "[-1.0,-2.0,3.0,4.0]");
        assert!(serde_json::from_str::<GeoBounds>("[5.0,0.0,1.0,1.0]").is_err());
    }
}
