//! Extent extraction from the documents layers are built from.

use foundation::GeoBounds;
use serde_json::Value;

use crate::CatalogError;
use crate::model::LayerExtent;

#[derive(Debug, Clone, PartialEq)]
pub struct GeoJsonSummary {
    pub extent: Option<LayerExtent>,
    pub feature_count: usize,
}

/// Validate a GeoJSON document and compute its extent.
///
/// A top-level `bbox` member wins; otherwise every position under a
/// `coordinates` member is folded in. Feature `properties` are never scanned.
pub fn summarize_geojson(doc: &Value) -> Result<GeoJsonSummary, CatalogError> {
    let obj = doc
        .as_object()
        .ok_or_else(|| CatalogError::Invalid("GeoJSON must be a JSON object".to_string()))?;
    let typ = obj
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| CatalogError::Invalid("GeoJSON is missing 'type'".to_string()))?;

    let feature_count = match typ {
        "FeatureCollection" => obj
            .get("features")
            .and_then(|f| f.as_array())
            .map(|f| f.len())
            .ok_or_else(|| {
                CatalogError::Invalid("FeatureCollection without 'features' array".to_string())
            })?,
        "Feature" | "Point" | "MultiPoint" | "LineString" | "MultiLineString" | "Polygon"
        | "MultiPolygon" | "GeometryCollection" => 1,
        other => {
            return Err(CatalogError::Invalid(format!(
                "unsupported GeoJSON type: {other}"
            )));
        }
    };

    let bounds = match declared_bbox(obj.get("bbox")) {
        Some(b) => Some(b),
        None => {
            let mut points = Vec::new();
            walk(doc, &mut points);
            GeoBounds::from_points(points).map_err(|e| CatalogError::Invalid(e.to_string()))?
        }
    };

    Ok(GeoJsonSummary {
        extent: bounds.map(LayerExtent::from_bounds),
        feature_count,
    })
}

/// Extent advertised by a TileJSON document; world bounds and zoom 1 when absent.
pub fn tilejson_extent(doc: &Value) -> Result<LayerExtent, CatalogError> {
    let bbox = match doc.get("bounds").and_then(numbers) {
        Some(v) if v.len() >= 4 => GeoBounds::new(v[0], v[1], v[2], v[3])
            .map_err(|e| CatalogError::Invalid(e.to_string()))?,
        Some(_) => return Err(CatalogError::Invalid("TileJSON bounds needs 4 numbers".into())),
        None => GeoBounds::world(),
    };
    let center = doc.get("center").and_then(numbers).unwrap_or_default();
    let (center_lon, center_lat) = match center.as_slice() {
        [lon, lat, ..] => (*lon, *lat),
        _ => bbox.center(),
    };
    let zoom_level = center
        .get(2)
        .map(|z| z.round().clamp(0.0, 24.0) as u8)
        .unwrap_or(1);

    Ok(LayerExtent {
        bbox,
        center_lon,
        center_lat,
        zoom_level,
    })
}

/// Extent used for map services we do not introspect (WMS).
pub fn world_extent() -> LayerExtent {
    LayerExtent {
        bbox: GeoBounds::world(),
        center_lon: 0.0,
        center_lat: 0.0,
        zoom_level: 1,
    }
}

fn numbers(v: &Value) -> Option<Vec<f64>> {
    v.as_array()?.iter().map(|n| n.as_f64()).collect()
}

fn declared_bbox(v: Option<&Value>) -> Option<GeoBounds> {
    let v = numbers(v?)?;
    match v.len() {
        4 => GeoBounds::new(v[0], v[1], v[2], v[3]).ok(),
        // [minx, miny, minz, maxx, maxy, maxz]
        6 => GeoBounds::new(v[0], v[1], v[3], v[4]).ok(),
        _ => None,
    }
}

fn walk(v: &Value, out: &mut Vec<(f64, f64)>) {
    match v {
        Value::Object(map) => {
            for (key, child) in map {
                match key.as_str() {
                    "coordinates" => positions(child, out),
                    "properties" | "bbox" => {}
                    _ => walk(child, out),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, out);
            }
        }
        _ => {}
    }
}

fn positions(v: &Value, out: &mut Vec<(f64, f64)>) {
    let Some(items) = v.as_array() else {
        return;
    };
    match (items.first().and_then(Value::as_f64), items.get(1).and_then(Value::as_f64)) {
        (Some(lon), Some(lat)) => out.push((lon, lat)),
        _ => {
            for item in items {
                positions(item, out);
            }
        }
    }
}
