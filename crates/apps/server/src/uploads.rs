//! Data attached to a layer: uploaded files, remote source URLs and file
//! downloads.

use std::path::Path;

use axum::body::Body;
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use catalog::extent::{summarize_geojson, tilejson_extent, world_extent};
use catalog::{LayerExtent, LayerFile, LayerView};
use foundation::LayerId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::auth::{CurrentUser, MaybeUser};
use crate::error::{ApiError, ApiForm, ApiPath};
use crate::AppState;

pub const ALLOWED_EXTENSIONS: &[&str] = &[".geojson", ".json", ".shp", ".gpkg", ".kml", ".kmz", ".zip"];

/// Cap on remote documents read while classifying a source URL.
const MAX_SOURCE_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct SourceMetadata {
    pub processed_format: Option<String>,
    pub bbox: Option<foundation::GeoBounds>,
    pub center_lon: Option<f64>,
    pub center_lat: Option<f64>,
    pub zoom_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_count: Option<usize>,
}

impl SourceMetadata {
    fn new(view: &LayerView, feature_count: Option<usize>) -> Self {
        Self {
            processed_format: view.processed_format.clone(),
            bbox: view.bbox,
            center_lon: view.center_lon,
            center_lat: view.center_lat,
            zoom_level: view.zoom_level,
            feature_count,
        }
    }
}

/// Lowercased extension with its dot, if it is one we accept.
pub fn allowed_extension(filename: &str) -> Option<String> {
    let ext = Path::new(filename).extension()?.to_str()?.to_ascii_lowercase();
    let ext = format!(".{ext}");
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Final path component with anything outside `[A-Za-z0-9._-]` replaced.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

pub async fn upload_file(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<LayerId>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ApiError> {
    let previous = state.catalog.writable_layer(&user, &id).await?;
    let mut multipart = multipart?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let ext = allowed_extension(&filename).ok_or_else(|| {
            ApiError::Unprocessable(format!(
                "File type not supported. Allowed: {}",
                ALLOWED_EXTENSIONS.join(", ")
            ))
        })?;
        let bytes = field.bytes().await?;
        upload = Some((filename, ext, bytes));
        break;
    }
    let (filename, ext, bytes) =
        upload.ok_or_else(|| ApiError::Unprocessable("Missing file field".to_string()))?;

    tokio::fs::create_dir_all(&state.config.upload_dir)
        .await
        .map_err(|e| {
            warn!(dir = %state.config.upload_dir.display(), error = %e, "cannot create upload dir");
            ApiError::Internal
        })?;
    let path = state
        .config
        .upload_dir
        .join(format!("{id}_{}", sanitize_filename(&filename)));
    let path_str = path.to_string_lossy().to_string();
    tokio::fs::write(&path, &bytes).await.map_err(|e| {
        warn!(path = %path_str, error = %e, "cannot write upload");
        ApiError::Internal
    })?;

    let summary = if ext == ".geojson" || ext == ".json" {
        let parsed = serde_json::from_slice::<Value>(&bytes)
            .map_err(|e| e.to_string())
            .and_then(|doc| summarize_geojson(&doc).map_err(|e| e.to_string()));
        match parsed {
            Ok(summary) => Some(summary),
            Err(reason) => {
                discard(&path_str).await;
                return Err(ApiError::Unprocessable(format!(
                    "File processing failed: {reason}"
                )));
            }
        }
    } else {
        None
    };

    let file = LayerFile {
        path: path_str.clone(),
        size: bytes.len() as u64,
        format: ext,
    };
    let extent = summary.as_ref().and_then(|s| s.extent.clone());
    let view = match state.catalog.attach_file(&user, &id, file, extent).await {
        Ok(view) => view,
        Err(e) => {
            discard(&path_str).await;
            return Err(e.into());
        }
    };
    if let Some(old) = previous.file.filter(|f| f.path != path_str) {
        discard(&old.path).await;
    }

    info!(layer_id = %id, path = %path_str, size = bytes.len(), "layer file uploaded");
    let metadata = SourceMetadata::new(&view, summary.map(|s| s.feature_count));
    Ok(Json(json!({
        "message": "File uploaded and processed successfully",
        "metadata": metadata,
        "layer": view,
    })))
}

async fn discard(path: &str) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!(path, error = %e, "could not remove stored file");
    }
}

/// How a remote source is interpreted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Wms,
    TileJson,
    GeoJson,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Wms => "wms",
            SourceKind::TileJson => "tilejson",
            SourceKind::GeoJson => "geojson",
        }
    }

    /// Classify by URL alone. `None` means the content type decides.
    pub fn from_url(url: &str) -> Option<Self> {
        let lower = url.to_ascii_lowercase();
        if lower.contains("wms") {
            Some(SourceKind::Wms)
        } else if lower.contains("tilejson") || lower.contains("mbtiles") {
            Some(SourceKind::TileJson)
        } else if lower.contains("geojson") {
            Some(SourceKind::GeoJson)
        } else {
            None
        }
    }

    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let lower = content_type.to_ascii_lowercase();
        if lower.contains("json") {
            Some(SourceKind::GeoJson)
        } else if lower.contains("xml") {
            Some(SourceKind::Wms)
        } else {
            None
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UrlForm {
    pub url: String,
}

pub async fn add_url(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<LayerId>,
    ApiForm(form): ApiForm<UrlForm>,
) -> Result<Json<Value>, ApiError> {
    state.catalog.writable_layer(&user, &id).await?;

    let url = form.url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ApiError::BadRequest(
            "Invalid URL: only http(s) URLs are allowed".to_string(),
        ));
    }

    let kind = match SourceKind::from_url(url) {
        Some(kind) => kind,
        None => {
            let content_type = head_content_type(&state.http, url).await?;
            SourceKind::from_content_type(&content_type)
                .ok_or_else(|| ApiError::Unprocessable("Unsupported URL format".to_string()))?
        }
    };

    let mut feature_count = None;
    let extent: Option<LayerExtent> = match kind {
        SourceKind::Wms => Some(world_extent()),
        SourceKind::TileJson => {
            let doc = fetch_json(&state.http, url).await?;
            Some(tilejson_extent(&doc).map_err(|e| invalid_url(e.to_string()))?)
        }
        SourceKind::GeoJson => {
            let doc = fetch_json(&state.http, url).await?;
            let summary = summarize_geojson(&doc).map_err(|e| invalid_url(e.to_string()))?;
            feature_count = Some(summary.feature_count);
            summary.extent
        }
    };

    let view = state
        .catalog
        .attach_source(&user, &id, url, kind.as_str(), extent)
        .await?;
    info!(layer_id = %id, kind = kind.as_str(), "layer source url attached");
    let metadata = SourceMetadata::new(&view, feature_count);
    Ok(Json(json!({
        "message": "URL added successfully",
        "metadata": metadata,
        "layer": view,
    })))
}

fn invalid_url(reason: impl std::fmt::Display) -> ApiError {
    ApiError::BadRequest(format!("Invalid URL: {reason}"))
}

async fn head_content_type(http: &reqwest::Client, url: &str) -> Result<String, ApiError> {
    let resp = http.head(url).send().await.map_err(invalid_url)?;
    if !resp.status().is_success() {
        return Err(invalid_url(format!("upstream HTTP {}", resp.status().as_u16())));
    }
    Ok(resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string())
}

async fn fetch_json(http: &reqwest::Client, url: &str) -> Result<Value, ApiError> {
    let resp = http.get(url).send().await.map_err(invalid_url)?;
    if !resp.status().is_success() {
        return Err(invalid_url(format!("upstream HTTP {}", resp.status().as_u16())));
    }
    let bytes = resp.bytes().await.map_err(invalid_url)?;
    if bytes.len() > MAX_SOURCE_BYTES {
        return Err(invalid_url(format!(
            "document too large (max {MAX_SOURCE_BYTES} bytes)"
        )));
    }
    serde_json::from_slice(&bytes).map_err(invalid_url)
}

fn content_type_for(format: &str) -> &'static str {
    match format {
        ".geojson" | ".json" => "application/geo+json",
        ".kml" => "application/vnd.google-earth.kml+xml",
        ".kmz" => "application/vnd.google-earth.kmz",
        ".zip" => "application/zip",
        ".gpkg" => "application/geopackage+sqlite3",
        _ => "application/octet-stream",
    }
}

pub async fn download_file(
    State(state): State<AppState>,
    user: MaybeUser,
    ApiPath(id): ApiPath<LayerId>,
) -> Result<Response, ApiError> {
    let layer = state.catalog.record_download(user.user(), &id).await?;
    let file = layer
        .file
        .ok_or_else(|| ApiError::NotFound("File not found".to_string()))?;
    let bytes = tokio::fs::read(&file.path).await.map_err(|e| {
        warn!(layer_id = %id, path = %file.path, error = %e, "stored file unreadable");
        ApiError::NotFound("File not found".to_string())
    })?;

    let name = Path::new(&file.path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("layer");
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&file.format)),
    );
    if let Ok(v) = HeaderValue::from_str(&format!("attachment; filename=\"{name}\"")) {
        headers.insert(header::CONTENT_DISPOSITION, v);
    }
    Ok((headers, Body::from(bytes)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_are_checked_case_insensitively() {
        assert_eq!(allowed_extension("Rivers.GeoJSON").as_deref(), Some(".geojson"));
        assert_eq!(allowed_extension("parcels.gpkg").as_deref(), Some(".gpkg"));
        assert_eq!(allowed_extension("run.exe"), None);
        assert_eq!(allowed_extension("noext"), None);
    }

    #[test]
    fn filenames_lose_directories_and_odd_characters() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\maps\\my map.kml"), "my_map.kml");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename(""), "upload");
    }

    #[test]
    fn urls_classify_by_name_then_content_type() {
        assert_eq!(
            SourceKind::from_url("https://maps.example/geoserver/wms?service=WMS"),
            Some(SourceKind::Wms)
        );
        assert_eq!(
            SourceKind::from_url("https://tiles.example/v3/roads.tilejson"),
            Some(SourceKind::TileJson)
        );
        assert_eq!(
            SourceKind::from_url("https://data.example/rivers.geojson"),
            Some(SourceKind::GeoJson)
        );
        assert_eq!(SourceKind::from_url("https://data.example/layer"), None);

        assert_eq!(
            SourceKind::from_content_type("application/geo+json; charset=utf-8"),
            Some(SourceKind::GeoJson)
        );
        assert_eq!(
            SourceKind::from_content_type("text/xml"),
            Some(SourceKind::Wms)
        );
        assert_eq!(SourceKind::from_content_type("image/png"), None);
    }
}
