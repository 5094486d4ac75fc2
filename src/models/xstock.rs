//! Remote dataset addressing and the weather geo-index document.

use crate::utils::{canonical_coordinate, extract_href};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Metadata column -> allowed values. A building is kept only when every
/// listed column holds one of its allowed values.
pub type MetadataFilters = BTreeMap<String, Vec<serde_json::Value>>;

/// The 4-tuple identifying one published dataset release.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetKey {
    pub dataset_type: String,
    pub weather_source: String,
    pub year_of_publication: i64,
    pub release: i64,
}

impl DatasetKey {
    pub fn new(dataset_type: impl Into<String>, weather_source: impl Into<String>, year_of_publication: i64, release: i64) -> Self {
        DatasetKey {
            dataset_type: dataset_type.into(),
            weather_source: weather_source.into(),
            year_of_publication,
            release,
        }
    }

    /// `{year}/{type}_{weather}_release_{release}` below the dataset root.
    pub fn url_segment(&self) -> String {
        format!(
            "{}/{}_{}_release_{}",
            self.year_of_publication, self.dataset_type, self.weather_source, self.release
        )
    }

    pub fn simulation_id(&self, bldg_id: i64, upgrade: i64) -> String {
        format!(
            "{}_{}_{}_release_{}_{}_{}",
            self.dataset_type, self.weather_source, self.year_of_publication, self.release, bldg_id, upgrade
        )
    }
}

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} release {}",
            self.dataset_type, self.weather_source, self.year_of_publication, self.release
        )
    }
}

/// Remote documents the fetcher knows how to address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Metadata,
    DataDictionary,
    UpgradeDictionary,
    SpatialTract,
    TimeSeries { bldg_id: i64, upgrade: i64, county: String },
    Model { bldg_id: i64, upgrade: i64 },
    WeatherIndex,
    Schedule,
}

impl Artifact {
    /// Path relative to the dataset URL; `None` for artifacts living outside the release.
    pub fn relative_path(&self) -> Option<String> {
        let path = match self {
            Artifact::Metadata => "metadata/metadata.parquet".to_string(),
            Artifact::DataDictionary => "data_dictionary.tsv".to_string(),
            Artifact::UpgradeDictionary => "upgrade_dictionary.tsv".to_string(),
            Artifact::SpatialTract => "geographic_information/spatial_tract_lookup_table.csv".to_string(),
            Artifact::TimeSeries { bldg_id, upgrade, county } => format!(
                "timeseries_individual_buildings/by_county/upgrade={upgrade}/county={county}/{bldg_id}-{upgrade}.parquet"
            ),
            Artifact::Model { bldg_id, upgrade } => {
                format!("building_energy_models/bldg{bldg_id:07}-up{upgrade:02}.osm.gz")
            }
            Artifact::WeatherIndex | Artifact::Schedule => return None,
        };
        Some(path)
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Artifact::WeatherIndex => f.write_str("weather geo-index"),
            Artifact::Schedule => f.write_str("schedule reference table"),
            other => f.write_str(&other.relative_path().unwrap_or_default()),
        }
    }
}

/// EnergyPlus weather geo-index (GeoJSON `FeatureCollection`).
#[derive(Debug, Clone, Deserialize)]
pub struct GeoIndex {
    pub features: Vec<GeoFeature>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeoFeature {
    pub geometry: GeoPoint,
    pub properties: GeoProperties,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeoPoint {
    /// `[longitude, latitude]`
    pub coordinates: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeoProperties {
    pub title: String,
    /// HTML anchor pointing at the EPW file.
    #[serde(default)]
    pub epw: Option<String>,
    #[serde(default)]
    pub ddy: Option<String>,
}

/// One station of the geo-index, flattened.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherRecord {
    pub title: String,
    pub latitude: f64,
    pub longitude: f64,
    pub epw_url: Option<String>,
    pub ddy_url: Option<String>,
}

impl WeatherRecord {
    /// Coordinate pair in the form used for matching against building metadata.
    pub fn coordinate_key(&self) -> (String, String) {
        (self.latitude.to_string(), self.longitude.to_string())
    }

    /// `USA_CA_Los.Angeles.Intl.AP.722950_TMY3` -> `TMY3`
    pub fn provider(&self) -> &str {
        self.title.rsplit('_').next().unwrap_or_default()
    }
}

impl GeoIndex {
    /// Stations published by `provider`, with anchor targets extracted.
    pub fn records(&self, provider: &str) -> Vec<WeatherRecord> {
        self.features
            .iter()
            .filter_map(|feature| {
                let (longitude, latitude) = match feature.geometry.coordinates.as_slice() {
                    [lon, lat, ..] => (*lon, *lat),
                    _ => return None,
                };
                let record = WeatherRecord {
                    title: feature.properties.title.clone(),
                    latitude,
                    longitude,
                    epw_url: feature.properties.epw.as_deref().and_then(extract_href),
                    ddy_url: feature.properties.ddy.as_deref().and_then(extract_href),
                };
                record.provider().eq_ignore_ascii_case(provider).then_some(record)
            })
            .collect()
    }
}

/// Normalized `(latitude, longitude)` pair for a metadata coordinate pair.
pub fn coordinate_key(latitude: &str, longitude: &str) -> Option<(String, String)> {
    Some((canonical_coordinate(latitude)?, canonical_coordinate(longitude)?))
}

/// One requested building of a neighborhood, as listed in the request CSV.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NeighborhoodMember {
    pub dataset_type: String,
    pub weather_source: String,
    pub year_of_publication: i64,
    pub release: i64,
    pub bldg_id: i64,
    pub upgrade: i64,
}

impl NeighborhoodMember {
    pub fn dataset_key(&self) -> DatasetKey {
        DatasetKey::new(
            self.dataset_type.clone(),
            self.weather_source.clone(),
            self.year_of_publication,
            self.release,
        )
    }

    pub fn simulation_id(&self) -> String {
        self.dataset_key().simulation_id(self.bldg_id, self.upgrade)
    }
}
