//! Camera registry lookups: district membership and camera locations.
//!
//! The registry is an external service. Every call is bounded by a timeout and
//! any failure aborts the request that needed it.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{StatsError, StatsResult};
use crate::models::{CameraLocation, GeoPoint};

const SERVICE: &str = "camera registry";

#[async_trait]
pub trait CameraDirectory: Send + Sync {
    /// Camera ids in `district`. Unknown or empty districts are `NotFound`.
    async fn cameras_in_district(&self, district: &str) -> StatsResult<BTreeSet<String>>;

    /// Every camera that has a known location.
    async fn cameras(&self) -> StatsResult<Vec<CameraLocation>>;

    async fn locations(&self) -> StatsResult<LocationIndex> {
        Ok(LocationIndex::from(self.cameras().await?))
    }
}

/// camera id -> location
#[derive(Debug, Clone, Default)]
pub struct LocationIndex {
    locations: HashMap<String, GeoPoint>,
}

impl LocationIndex {
    pub fn resolve(&self, camera_id: &str) -> Option<&GeoPoint> {
        self.locations.get(camera_id)
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

impl From<Vec<CameraLocation>> for LocationIndex {
    fn from(cameras: Vec<CameraLocation>) -> Self {
        Self {
            locations: cameras.into_iter().map(|c| (c.camera_id, c.loc)).collect(),
        }
    }
}

fn district_not_found(district: &str) -> StatsError {
    StatsError::NotFound(format!("District not found or has no cameras: {}", district))
}

// ============================================================================
// HTTP registry
// ============================================================================

#[derive(Deserialize)]
struct CameraRef {
    #[serde(rename = "_id")]
    id: String,
}

/// Talks to the camera service for districts and to the location feed for
/// coordinates.
pub struct HttpCameraDirectory {
    client: reqwest::Client,
    service_url: Url,
    locations_url: String,
}

impl HttpCameraDirectory {
    pub fn new(service_url: &str, locations_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building camera registry client")?;
        let service_url = Url::parse(service_url)
            .with_context(|| format!("invalid camera service URL {}", service_url))?;
        if service_url.cannot_be_a_base() {
            bail!("camera service URL {} cannot carry a path", service_url);
        }
        Ok(Self {
            client,
            service_url,
            locations_url: locations_url.to_string(),
        })
    }
}

/// `{base}/cameras/district/{district}`, with the district as a single
/// percent-encoded path segment.
fn district_url(base: &Url, district: &str) -> StatsResult<Url> {
    // dot segments would be dropped and address the parent resource
    if matches!(district, "" | "." | "..") {
        return Err(district_not_found(district));
    }
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| StatsError::upstream(SERVICE, "service URL cannot carry a path"))?
        .pop_if_empty()
        .extend(["cameras", "district", district]);
    Ok(url)
}

#[async_trait]
impl CameraDirectory for HttpCameraDirectory {
    async fn cameras_in_district(&self, district: &str) -> StatsResult<BTreeSet<String>> {
        let url = district_url(&self.service_url, district)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StatsError::upstream(SERVICE, e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(district_not_found(district));
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(StatsError::upstream(SERVICE, format!("{} - {}", status, text)));
        }

        let cameras: Vec<CameraRef> = response
            .json()
            .await
            .map_err(|e| StatsError::upstream(SERVICE, e))?;
        let ids: BTreeSet<String> = cameras.into_iter().map(|c| c.id).collect();
        debug!(district, cameras = ids.len(), "resolved district");

        if ids.is_empty() {
            return Err(district_not_found(district));
        }
        Ok(ids)
    }

    async fn cameras(&self) -> StatsResult<Vec<CameraLocation>> {
        let response = self
            .client
            .get(&self.locations_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| StatsError::upstream(SERVICE, e))?;

        let raw: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| StatsError::upstream(SERVICE, e))?;
        let total = raw.len();

        let cameras: Vec<CameraLocation> = raw
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();
        if cameras.len() < total {
            warn!(
                skipped = total - cameras.len(),
                "location feed entries without a usable location"
            );
        }
        Ok(cameras)
    }
}

// ============================================================================
// Static registry
// ============================================================================

/// Registry loaded from a JSON file, for offline deployments:
///
/// ```json
/// { "cameras": [{"_id": "C1", "loc": {"type": "Point", "coordinates": [106.7, 10.8]}}],
///   "districts": {"District 1": ["C1"]} }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StaticDirectory {
    #[serde(default)]
    cameras: Vec<CameraLocation>,
    #[serde(default)]
    districts: HashMap<String, Vec<String>>,
}

impl StaticDirectory {
    pub fn new(cameras: Vec<CameraLocation>, districts: HashMap<String, Vec<String>>) -> Self {
        Self { cameras, districts }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading camera file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parsing camera file {}", path.display()))
    }
}

#[async_trait]
impl CameraDirectory for StaticDirectory {
    async fn cameras_in_district(&self, district: &str) -> StatsResult<BTreeSet<String>> {
        self.districts
            .get(district)
            .filter(|ids| !ids.is_empty())
            .map(|ids| ids.iter().cloned().collect())
            .ok_or_else(|| district_not_found(district))
    }

    async fn cameras(&self) -> StatsResult<Vec<CameraLocation>> {
        Ok(self.cameras.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lng: f64, lat: f64) -> GeoPoint {
        GeoPoint {
            kind: "Point".into(),
            coordinates: [lng, lat],
        }
    }

    #[tokio::test]
    async fn test_static_district_lookup() {
        let dir = StaticDirectory::new(
            vec![],
            HashMap::from([
                ("D1".to_string(), vec!["C1".to_string(), "C2".to_string()]),
                ("Empty".to_string(), vec![]),
            ]),
        );

        let ids = dir.cameras_in_district("D1").await.unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["C1", "C2"]);
        assert!(matches!(
            dir.cameras_in_district("Empty").await,
            Err(StatsError::NotFound(_))
        ));
        assert!(matches!(
            dir.cameras_in_district("Nowhere").await,
            Err(StatsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_location_index() {
        let dir = StaticDirectory::new(
            vec![CameraLocation {
                camera_id: "C2".into(),
                loc: point(106.7, 10.8),
            }],
            HashMap::new(),
        );
        let index = dir.locations().await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.resolve("C2"), Some(&point(106.7, 10.8)));
        assert_eq!(index.resolve("C1"), None);
    }

    #[test]
    fn test_district_url_encodes_segment() {
        let base = Url::parse("http://registry:8002/").unwrap();
        assert_eq!(
            district_url(&base, "District 1").unwrap().as_str(),
            "http://registry:8002/cameras/district/District%201"
        );

        let url = district_url(&base, "a/b?c=d#e").unwrap();
        assert_eq!(url.path(), "/cameras/district/a%2Fb%3Fc=d%23e");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
        assert_eq!(url.path_segments().unwrap().count(), 3);

        let nested = Url::parse("http://gateway/registry?token=x").unwrap();
        let url = district_url(&nested, "D1").unwrap();
        assert_eq!(url.path(), "/registry/cameras/district/D1");
        assert_eq!(url.query(), None);

        assert!(matches!(district_url(&base, ".."), Err(StatsError::NotFound(_))));
        assert!(matches!(district_url(&base, "."), Err(StatsError::NotFound(_))));
    }

    #[test]
    fn test_http_directory_rejects_bad_base() {
        assert!(HttpCameraDirectory::new("not a url", "http://x/locations", Duration::from_secs(1)).is_err());
        assert!(HttpCameraDirectory::new("mailto:a@b", "http://x/locations", Duration::from_secs(1)).is_err());
        assert!(HttpCameraDirectory::new("http://x/", "http://x/locations", Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_static_file_format() {
        let json = r#"{
            "cameras": [{"_id": "C1", "loc": {"type": "Point", "coordinates": [1.0, 2.0]}}],
            "districts": {"D1": ["C1"]}
        }"#;
        let dir: StaticDirectory = serde_json::from_str(json).unwrap();
        assert_eq!(dir.cameras.len(), 1);
        assert_eq!(dir.districts["D1"], vec!["C1"]);
    }
}
