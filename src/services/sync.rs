use crate::client::DatasetFetcher;
use crate::db::models::{self as dbm, BuildingRef};
use crate::db::store::Store;
use crate::error::{Error, Result};
use crate::frame::{Frame, Value};
use crate::models::xstock::{Artifact, DatasetKey, MetadataFilters};
use crate::schema;
use crate::services::schedule;
use crate::services::weather::{self, StationTriple, WeatherResolution};
use crate::utils::normalize_column_name;
use diesel::prelude::*;
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashSet};

const METADATA_KEY: [&str; 3] = ["bldg_id", "dataset_id", "upgrade"];
const DATA_DICTIONARY_KEY: [&str; 3] = ["dataset_id", "field_location", "field_name"];
const UPGRADE_DICTIONARY_KEY: [&str; 2] = ["dataset_id", "upgrade_id"];
const SPATIAL_TRACT_KEY: [&str; 2] = ["dataset_id", "nhgis_tract_gisjoin"];
const TIMESERIES_KEY: [&str; 2] = ["metadata_id", "timestamp"];
const SCHEDULE_KEY: [&str; 4] = ["metadata_id", "day_index", "hour", "minute"];

/// What one synchronization run did. Non-fatal conditions are recorded here.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub dataset_id: i64,
    /// The filters matched nothing; only the dataset and dictionary were written.
    pub no_matching_buildings: bool,
    pub buildings: usize,
    pub upgrades: usize,
    pub tracts: usize,
    pub weather: WeatherResolution,
    pub timeseries_rows: usize,
    pub models: usize,
    pub schedule_rows: usize,
}

/// Mirror one dataset release into the store.
pub fn synchronize(
    store: &Store,
    fetcher: &DatasetFetcher,
    key: &DatasetKey,
    filters: Option<&MetadataFilters>,
    weather_provider: &str,
) -> Result<SyncReport> {
    info!("Synchronizing dataset {}", key);
    let mut report = SyncReport {
        dataset_id: upsert_dataset(store, key)?,
        ..SyncReport::default()
    };
    info!("Dataset {} has id {}", key, report.dataset_id);

    let entries = sync_data_dictionary(store, fetcher, key, report.dataset_id)?;
    info!("Data dictionary: {} field(s)", entries);

    let buildings = sync_metadata(store, fetcher, key, report.dataset_id, filters)?;
    if buildings.is_empty() {
        warn!("No buildings of {} match the filters; skipping dataset-dependent tables", key);
        report.no_matching_buildings = true;
        return Ok(report);
    }
    report.buildings = buildings.len();
    info!("Metadata: {} building(s)", buildings.len());

    report.upgrades = sync_upgrade_dictionary(store, fetcher, key, report.dataset_id, &buildings)?;
    info!("Upgrade dictionary: {} upgrade(s)", report.upgrades);

    report.tracts = sync_spatial_tracts(store, fetcher, key, report.dataset_id, &buildings)?;
    info!("Spatial tracts: {} tract(s)", report.tracts);

    report.weather = sync_weather(store, fetcher, report.dataset_id, &buildings, weather_provider)?;

    for (i, building) in buildings.iter().enumerate() {
        report.timeseries_rows += sync_timeseries(store, fetcher, key, building)?;
        sync_model(store, fetcher, key, building)?;
        report.models += 1;
        debug!("Per-building artifacts: {}/{} (bldg {})", i + 1, buildings.len(), building.bldg_id);
    }
    info!(
        "Per-building artifacts: {} time series row(s), {} model(s)",
        report.timeseries_rows, report.models
    );

    report.schedule_rows = sync_schedule(store, fetcher, &buildings)?;
    info!("Schedule: {} row(s)", report.schedule_rows);

    info!("Dataset {} synchronized", key);
    Ok(report)
}

fn upsert_dataset(store: &Store, key: &DatasetKey) -> Result<i64> {
    use schema::dataset::dsl as D;

    let new_row = dbm::NewDataset {
        dataset_type: &key.dataset_type,
        weather_source: &key.weather_source,
        year_of_publication: key.year_of_publication,
        release: key.release,
    };
    store.run("upsert dataset", |conn| {
        diesel::insert_into(D::dataset)
            .values(&new_row)
            .on_conflict((D::dataset_type, D::weather_source, D::year_of_publication, D::release))
            .do_nothing()
            .execute(conn)?;
        D::dataset
            .filter(D::dataset_type.eq(new_row.dataset_type))
            .filter(D::weather_source.eq(new_row.weather_source))
            .filter(D::year_of_publication.eq(new_row.year_of_publication))
            .filter(D::release.eq(new_row.release))
            .select(D::id)
            .first(conn)
    })
}

/// Normalise, tag and store a remote table, adding any columns the store lacks.
fn store_frame(store: &Store, table: &str, frame: &Frame, key: &[&str]) -> Result<usize> {
    store.ensure_columns(table, &frame.columns)?;
    store.upsert(table, frame, Some(key), false)
}

fn sync_data_dictionary(store: &Store, fetcher: &DatasetFetcher, key: &DatasetKey, dataset_id: i64) -> Result<usize> {
    let artifact = Artifact::DataDictionary;
    let mut frame = fetcher.fetch_frame(key, &artifact)?;
    frame.normalize_column_names();
    for column in ["field_location", "field_name"] {
        frame.require_column(&artifact.to_string(), column)?;
    }
    frame.set_constant("dataset_id", Value::Integer(dataset_id));
    store_frame(store, "data_dictionary", &frame, &DATA_DICTIONARY_KEY)?;
    Ok(frame.len())
}

/// Keep rows whose value in every filtered column is on that column's allow-list.
pub fn apply_filters(frame: &mut Frame, filters: &MetadataFilters) -> Result<()> {
    let mut resolved = Vec::with_capacity(filters.len());
    for (column, allowed) in filters {
        let idx = frame
            .column_index(column)
            .or_else(|| frame.column_index(&normalize_column_name(column)))
            .ok_or_else(|| Error::InvalidFilter(format!("unknown metadata column '{}'", column)))?;
        resolved.push((idx, allowed));
    }
    frame.retain(|row| {
        resolved
            .iter()
            .all(|(idx, allowed)| allowed.iter().any(|v| row[*idx].matches(v)))
    });
    Ok(())
}

fn sync_metadata(
    store: &Store,
    fetcher: &DatasetFetcher,
    key: &DatasetKey,
    dataset_id: i64,
    filters: Option<&MetadataFilters>,
) -> Result<Vec<BuildingRef>> {
    use schema::metadata::dsl as M;

    let artifact = Artifact::Metadata;
    let mut frame = fetcher.fetch_frame(key, &artifact)?;
    frame.normalize_column_names();
    let fetched = frame.len();
    if let Some(filters) = filters {
        apply_filters(&mut frame, filters)?;
        info!("Metadata filters kept {} of {} row(s)", frame.len(), fetched);
    }
    if frame.is_empty() {
        return Ok(Vec::new());
    }

    let bldg_idx = frame.require_column(&artifact.to_string(), "bldg_id")?;
    let upgrade_idx = frame.require_column(&artifact.to_string(), "upgrade")?;
    let wanted: HashSet<(i64, i64)> = frame
        .rows
        .iter()
        .filter_map(|row| Some((row[bldg_idx].as_i64()?, row[upgrade_idx].as_i64()?)))
        .collect();

    frame.set_constant("dataset_id", Value::Integer(dataset_id));
    store_frame(store, "metadata", &frame, &METADATA_KEY)?;

    let mut buildings: Vec<BuildingRef> = store.run("read synchronized buildings", |conn| {
        M::metadata
            .filter(M::dataset_id.eq(dataset_id))
            .order(M::id)
            .select(BuildingRef::as_select())
            .load(conn)
    })?;
    buildings.retain(|b| wanted.contains(&(b.bldg_id, b.upgrade)));
    Ok(buildings)
}

fn sync_upgrade_dictionary(
    store: &Store,
    fetcher: &DatasetFetcher,
    key: &DatasetKey,
    dataset_id: i64,
    buildings: &[BuildingRef],
) -> Result<usize> {
    let artifact = Artifact::UpgradeDictionary;
    let mut frame = fetcher.fetch_frame(key, &artifact)?;
    frame.normalize_column_names();
    let idx = frame.require_column(&artifact.to_string(), "upgrade_id")?;
    let upgrades: BTreeSet<i64> = buildings.iter().map(|b| b.upgrade).collect();
    frame.retain(|row| row[idx].as_i64().is_some_and(|u| upgrades.contains(&u)));
    if frame.is_empty() {
        return Ok(0);
    }
    frame.set_constant("dataset_id", Value::Integer(dataset_id));
    store_frame(store, "upgrade_dictionary", &frame, &UPGRADE_DICTIONARY_KEY)?;
    Ok(frame.len())
}

fn sync_spatial_tracts(
    store: &Store,
    fetcher: &DatasetFetcher,
    key: &DatasetKey,
    dataset_id: i64,
    buildings: &[BuildingRef],
) -> Result<usize> {
    let artifact = Artifact::SpatialTract;
    let mut frame = fetcher.fetch_frame(key, &artifact)?;
    frame.normalize_column_names();
    frame.require_column(&artifact.to_string(), "nhgis_tract_gisjoin")?;

    let occupied: HashSet<(&str, &str)> = buildings
        .iter()
        .filter_map(|b| Some((b.in_nhgis_county_gisjoin.as_deref()?, b.in_nhgis_puma_gisjoin.as_deref()?)))
        .collect();
    let county = frame.column_index("nhgis_county_gisjoin");
    let puma = frame.column_index("nhgis_puma_gisjoin");
    let flags: Vec<Value> = frame
        .rows
        .iter()
        .map(|row| {
            let hit = match (county, puma) {
                (Some(c), Some(p)) => match (&row[c], &row[p]) {
                    (Value::Text(c), Value::Text(p)) => occupied.contains(&(c.as_str(), p.as_str())),
                    _ => false,
                },
                _ => false,
            };
            Value::Integer(i64::from(hit))
        })
        .collect();
    frame.set_constant("has_building", Value::Integer(0));
    let idx = frame.require_column(&artifact.to_string(), "has_building")?;
    for (row, flag) in frame.rows.iter_mut().zip(flags) {
        row[idx] = flag;
    }
    frame.set_constant("dataset_id", Value::Integer(dataset_id));
    store_frame(store, "spatial_tract", &frame, &SPATIAL_TRACT_KEY)?;
    Ok(frame.len())
}

fn sync_weather(
    store: &Store,
    fetcher: &DatasetFetcher,
    dataset_id: i64,
    buildings: &[BuildingRef],
    provider: &str,
) -> Result<WeatherResolution> {
    use schema::weather::dsl as W;

    let triples: BTreeSet<StationTriple> = buildings
        .iter()
        .filter_map(|b| {
            Some(StationTriple {
                latitude: b.in_weather_file_latitude.clone()?,
                longitude: b.in_weather_file_longitude.clone()?,
                station: b.in_weather_file_tmy3.clone()?,
            })
        })
        .collect();
    let records = fetcher.fetch_weather_index(provider)?;
    let resolution = weather::partition(&triples, &records);

    if !resolution.unknown.is_empty() {
        warn!(
            "{}/{} weather station(s) not found in the geo-index: {}",
            resolution.unknown.len(),
            resolution.total(),
            resolution.unknown.iter().map(|t| t.station.as_str()).collect::<Vec<_>>().join(", ")
        );
    }
    if !resolution.ambiguous.is_empty() {
        warn!(
            "{}/{} weather station(s) are ambiguous: {}",
            resolution.ambiguous.len(),
            resolution.total(),
            resolution.ambiguous.iter().map(|t| t.station.as_str()).collect::<Vec<_>>().join(", ")
        );
    }

    for station in &resolution.resolved {
        let epw = station.record.epw_url.as_deref().map(|url| fetcher.fetch_text(url)).transpose()?;
        let ddy = station.record.ddy_url.as_deref().map(|url| fetcher.fetch_text(url)).transpose()?;
        let row = dbm::NewWeather {
            dataset_id,
            weather_file_tmy3: station.triple.station.clone(),
            weather_file_latitude: station.triple.latitude.clone(),
            weather_file_longitude: station.triple.longitude.clone(),
            energyplus_title: Some(station.record.title.clone()),
            epw_url: station.record.epw_url.clone(),
            ddy_url: station.record.ddy_url.clone(),
            epw,
            ddy,
        };
        store.run("upsert weather", |conn| {
            diesel::insert_into(W::weather)
                .values(&row)
                .on_conflict((W::dataset_id, W::weather_file_tmy3, W::weather_file_latitude, W::weather_file_longitude))
                .do_update()
                .set(&row)
                .execute(conn)
        })?;
        debug!("Stored weather for {}", station.triple.station);
    }
    info!(
        "Weather: {} resolved, {} unknown, {} ambiguous",
        resolution.resolved.len(),
        resolution.unknown.len(),
        resolution.ambiguous.len()
    );
    Ok(resolution)
}

fn sync_timeseries(store: &Store, fetcher: &DatasetFetcher, key: &DatasetKey, building: &BuildingRef) -> Result<usize> {
    let county = building.county.clone().ok_or_else(|| {
        Error::decode(
            Artifact::Metadata.to_string(),
            format!("building {} upgrade {} has no county", building.bldg_id, building.upgrade),
        )
    })?;
    let artifact = Artifact::TimeSeries {
        bldg_id: building.bldg_id,
        upgrade: building.upgrade,
        county,
    };
    let mut frame = fetcher.fetch_frame(key, &artifact)?;
    frame.normalize_column_names();
    frame.require_column(&artifact.to_string(), "timestamp")?;
    frame.set_constant("metadata_id", Value::Integer(building.metadata_id));
    store_frame(store, "timeseries", &frame, &TIMESERIES_KEY)?;
    Ok(frame.len())
}

fn sync_model(store: &Store, fetcher: &DatasetFetcher, key: &DatasetKey, building: &BuildingRef) -> Result<()> {
    use schema::model::dsl as Mo;

    let row = dbm::NewModel {
        metadata_id: building.metadata_id,
        osm: fetcher.fetch_model(key, building.bldg_id, building.upgrade)?,
    };
    store.run("upsert model", |conn| {
        diesel::insert_into(Mo::model)
            .values(&row)
            .on_conflict(Mo::metadata_id)
            .do_update()
            .set(Mo::osm.eq(&row.osm))
            .execute(conn)
    })?;
    Ok(())
}

fn sync_schedule(store: &Store, fetcher: &DatasetFetcher, buildings: &[BuildingRef]) -> Result<usize> {
    let mut frame = schedule::materialize(&fetcher.fetch_schedule()?)?;
    frame.set_constant("metadata_id", Value::Integer(0));
    store.ensure_columns("schedule", &frame.columns)?;

    let mut written = 0;
    for building in buildings {
        frame.set_constant("metadata_id", Value::Integer(building.metadata_id));
        store.upsert("schedule", &frame, Some(&SCHEDULE_KEY[..]), false)?;
        written += frame.len();
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::{fetcher, MemoryTransport};
    use crate::db::store::SchemaSource;
    use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
    use arrow::datatypes::{Field, Schema};
    use arrow::record_batch::RecordBatch;
    use diesel::sql_types::{BigInt, Nullable, Text};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use parquet::arrow::ArrowWriter;
    use std::collections::BTreeMap;
    use std::io::Write;
    use std::sync::Arc;

    const RELEASE: &str = "https://data.test/root/2021/resstock_tmy3_release_1";

    #[derive(Debug, QueryableByName)]
    struct Count {
        #[diesel(sql_type = BigInt)]
        n: i64,
    }

    #[derive(Debug, QueryableByName)]
    struct Upgrade {
        #[diesel(sql_type = BigInt)]
        upgrade: i64,
    }

    #[derive(Debug, QueryableByName)]
    struct Tract {
        #[diesel(sql_type = Text)]
        nhgis_tract_gisjoin: String,
        #[diesel(sql_type = BigInt)]
        has_building: i64,
    }

    #[derive(Debug, QueryableByName)]
    struct WeatherRow {
        #[diesel(sql_type = Text)]
        weather_file_tmy3: String,
        #[diesel(sql_type = Nullable<Text>)]
        ddy: Option<String>,
    }

    fn key() -> DatasetKey {
        DatasetKey::new("resstock", "tmy3", 2021, 1)
    }

    fn parquet(columns: Vec<(&str, ArrayRef)>) -> Vec<u8> {
        let schema = Arc::new(Schema::new(
            columns
                .iter()
                .map(|(name, array)| Field::new(*name, array.data_type().clone(), true))
                .collect::<Vec<_>>(),
        ));
        let batch = RecordBatch::try_new(schema.clone(), columns.into_iter().map(|(_, a)| a).collect()).unwrap();
        let mut buf = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buf, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
        buf
    }

    fn gzip(text: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    /// Three buildings, each published for upgrades 0, 1 and 2.
    fn release_transport() -> MemoryTransport {
        let mut t = MemoryTransport::default();
        let bldg: Vec<i64> = vec![1, 1, 1, 2, 2, 2, 3, 3, 3];
        let upgrade: Vec<i64> = vec![0, 1, 2, 0, 1, 2, 0, 1, 2];
        let county = |b: &i64| if *b == 3 { "G0600590" } else { "G0600370" };
        let lat = |b: &i64| if *b == 3 { "40.0" } else { "33.93" };
        let lon = |b: &i64| if *b == 3 { "-100.0" } else { "-118.4" };
        let station = |b: &i64| if *b == 3 { "USA_NE_Nowhere" } else { "USA_CA_Los.Angeles.Intl.AP.722950" };
        t.insert(
            format!("{RELEASE}/metadata/metadata.parquet"),
            parquet(vec![
                ("bldg_id", Arc::new(Int64Array::from(bldg.clone())) as ArrayRef),
                ("upgrade", Arc::new(Int64Array::from(upgrade))),
                ("in.county", Arc::new(StringArray::from(bldg.iter().map(county).collect::<Vec<_>>()))),
                ("in.nhgis_county_gisjoin", Arc::new(StringArray::from(bldg.iter().map(county).collect::<Vec<_>>()))),
                ("in.nhgis_puma_gisjoin", Arc::new(StringArray::from(vec!["G06003701"; 9]))),
                ("in.weather_file_latitude", Arc::new(StringArray::from(bldg.iter().map(lat).collect::<Vec<_>>()))),
                ("in.weather_file_longitude", Arc::new(StringArray::from(bldg.iter().map(lon).collect::<Vec<_>>()))),
                ("in.weather_file_TMY3", Arc::new(StringArray::from(bldg.iter().map(station).collect::<Vec<_>>()))),
                ("in.sqft", Arc::new(Float64Array::from(vec![1200.0, 1200.0, 1200.0, 800.0, 800.0, 800.0, f64::NAN, f64::NAN, f64::NAN]))),
            ]),
        );
        t.insert(
            format!("{RELEASE}/data_dictionary.tsv"),
            "Field Location\tField Name\tField Description\nmetadata\tbldg_id\tBuilding id\nmetadata\tin.county\tCounty\n",
        );
        t.insert(
            format!("{RELEASE}/upgrade_dictionary.tsv"),
            "upgrade_id\tupgrade_name\n0\tBaseline\n1\tHeat pump\n2\tEnvelope\n",
        );
        t.insert(
            format!("{RELEASE}/geographic_information/spatial_tract_lookup_table.csv"),
            "nhgis_tract_gisjoin,nhgis_county_gisjoin,nhgis_puma_gisjoin\nG0600370101110,G0600370,G06003701\nG0600590001101,G0600590,G06005901\n",
        );
        let geojson = std::fs::read_to_string("tests/data/master.geojson").unwrap();
        t.insert("https://data.test/master.geojson", geojson);
        t.insert(
            "https://example.test/weather/USA_CA_Los.Angeles.Intl.AP.722950_TMY3.epw",
            "LOCATION,Los Angeles Intl Arpt,CA,USA,TMY3,722950,33.93,-118.40,-8.0,30.0\n",
        );
        t.insert(
            "https://example.test/weather/USA_CA_Los.Angeles.Intl.AP.722950_TMY3.ddy",
            vec![b'!', b' ', b'2', b'0', 0xB0, b'C', b'\n'],
        );
        for b in 1..=3 {
            for u in 0..=2 {
                let county = if b == 3 { "G0600590" } else { "G0600370" };
                t.insert(
                    format!("{RELEASE}/timeseries_individual_buildings/by_county/upgrade={u}/county={county}/{b}-{u}.parquet"),
                    parquet(vec![
                        ("timestamp", Arc::new(StringArray::from(vec!["2018-01-01 00:15:00", "2018-01-01 00:30:00"])) as ArrayRef),
                        ("out.electricity.total.energy_consumption", Arc::new(Float64Array::from(vec![0.5, 0.25]))),
                    ]),
                );
                t.insert(
                    format!("{RELEASE}/building_energy_models/bldg{b:07}-up{u:02}.osm.gz"),
                    gzip(&format!("OS:Version,\n  {{bldg-{b}-{u}}}, 3.2.1;\n")),
                );
            }
        }
        t.insert("https://data.test/8760.csv", "Occupants,Lighting Interior\n0.5,0.1\n0.6,0.2\n");
        t
    }

    fn fresh_store(dir: &tempfile::TempDir) -> Store {
        let store = Store::new(dir.path().join("xstock.db"));
        store.bootstrap(&SchemaSource::Embedded, false, false).unwrap();
        store
    }

    fn count(store: &Store, sql: &str) -> i64 {
        store.query::<Count>(sql).unwrap()[0].n
    }

    fn baseline_only() -> MetadataFilters {
        BTreeMap::from([("upgrade".to_string(), vec![serde_json::json!(0)])])
    }

    #[test]
    fn filtered_sync_keeps_only_matching_upgrade() {
        let dir = tempfile::tempdir().unwrap();
        let store = fresh_store(&dir);
        let filters = baseline_only();
        let report = synchronize(&store, &fetcher(release_transport()), &key(), Some(&filters), "TMY3").unwrap();

        assert!(!report.no_matching_buildings);
        assert_eq!(report.buildings, 3);
        let upgrades: Vec<Upgrade> = store.query("SELECT upgrade FROM metadata").unwrap();
        assert_eq!(upgrades.len(), 3);
        assert!(upgrades.iter().all(|u| u.upgrade == 0));
        assert_eq!(count(&store, "SELECT COUNT(*) AS n FROM upgrade_dictionary"), 1);
        assert_eq!(count(&store, "SELECT COUNT(*) AS n FROM upgrade_dictionary WHERE upgrade_id = 0"), 1);
        assert_eq!(count(&store, "SELECT COUNT(*) AS n FROM data_dictionary"), 2);
        assert_eq!(count(&store, "SELECT COUNT(*) AS n FROM metadata WHERE in_sqft IS NULL"), 1);
    }

    #[test]
    fn sync_fills_dependent_tables() {
        let dir = tempfile::tempdir().unwrap();
        let store = fresh_store(&dir);
        let filters = baseline_only();
        let report = synchronize(&store, &fetcher(release_transport()), &key(), Some(&filters), "TMY3").unwrap();

        let tracts: Vec<Tract> = store
            .query("SELECT nhgis_tract_gisjoin, has_building FROM spatial_tract ORDER BY nhgis_tract_gisjoin")
            .unwrap();
        assert_eq!(tracts.len(), 2);
        assert_eq!((tracts[0].nhgis_tract_gisjoin.as_str(), tracts[0].has_building), ("G0600370101110", 1));
        assert_eq!(tracts[1].has_building, 0);

        assert_eq!(report.weather.resolved.len(), 1);
        assert_eq!(report.weather.unknown.len(), 1);
        let weather: Vec<WeatherRow> = store.query("SELECT weather_file_tmy3, ddy FROM weather").unwrap();
        assert_eq!(weather.len(), 1);
        assert_eq!(weather[0].weather_file_tmy3, "USA_CA_Los.Angeles.Intl.AP.722950");
        assert_eq!(weather[0].ddy.as_deref(), Some("! 20°C\n"));

        assert_eq!(report.timeseries_rows, 6);
        assert_eq!(count(&store, "SELECT COUNT(*) AS n FROM timeseries"), 6);
        assert_eq!(count(&store, "SELECT COUNT(*) AS n FROM model WHERE osm LIKE 'OS:Version%'"), 3);
        assert_eq!(report.schedule_rows, 3 * 8);
        assert_eq!(count(&store, "SELECT COUNT(*) AS n FROM schedule WHERE occupants = 0.6 AND hour = 1"), 3 * 4);
    }

    #[test]
    fn resync_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = fresh_store(&dir);
        let filters = baseline_only();
        for _ in 0..2 {
            synchronize(&store, &fetcher(release_transport()), &key(), Some(&filters), "TMY3").unwrap();
        }
        assert_eq!(count(&store, "SELECT COUNT(*) AS n FROM dataset"), 1);
        assert_eq!(count(&store, "SELECT COUNT(*) AS n FROM metadata"), 3);
        assert_eq!(count(&store, "SELECT COUNT(*) AS n FROM timeseries"), 6);
        assert_eq!(count(&store, "SELECT COUNT(*) AS n FROM schedule"), 24);
    }

    #[test]
    fn empty_filter_result_is_a_warning_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = fresh_store(&dir);
        let filters: MetadataFilters = BTreeMap::from([("in.county".to_string(), vec![serde_json::json!("G9999999")])]);
        let report = synchronize(&store, &fetcher(release_transport()), &key(), Some(&filters), "TMY3").unwrap();

        assert!(report.no_matching_buildings);
        assert_eq!(count(&store, "SELECT COUNT(*) AS n FROM dataset"), 1);
        assert_eq!(count(&store, "SELECT COUNT(*) AS n FROM data_dictionary"), 2);
        assert_eq!(count(&store, "SELECT COUNT(*) AS n FROM metadata"), 0);
        assert_eq!(count(&store, "SELECT COUNT(*) AS n FROM upgrade_dictionary"), 0);
    }

    #[test]
    fn empty_metadata_release_is_a_warning_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = fresh_store(&dir);
        let mut transport = release_transport();
        transport.insert(
            format!("{RELEASE}/metadata/metadata.parquet"),
            parquet(vec![
                ("bldg_id", Arc::new(Int64Array::from(Vec::<i64>::new())) as ArrayRef),
                ("upgrade", Arc::new(Int64Array::from(Vec::<i64>::new()))),
            ]),
        );
        let report = synchronize(&store, &fetcher(transport), &key(), None, "TMY3").unwrap();

        assert!(report.no_matching_buildings);
        assert_eq!(count(&store, "SELECT COUNT(*) AS n FROM metadata"), 0);
    }

    #[test]
    fn filters_are_a_conjunction() {
        let mut frame = Frame::new(vec!["upgrade".into(), "in_county".into()]);
        for (u, c) in [(0, "A"), (0, "B"), (1, "A"), (1, "B")] {
            frame.rows.push(vec![Value::Integer(u), Value::Text(c.into())]);
        }
        let filters: MetadataFilters = BTreeMap::from([
            ("upgrade".to_string(), vec![serde_json::json!(0), serde_json::json!(1)]),
            ("in.county".to_string(), vec![serde_json::json!("B")]),
        ]);
        apply_filters(&mut frame, &filters).unwrap();
        assert_eq!(frame.len(), 2);
        assert!(frame.rows.iter().all(|r| r[1] == Value::Text("B".into())));
    }

    #[test]
    fn unknown_filter_column_is_rejected() {
        let mut frame = Frame::new(vec!["upgrade".into()]);
        let filters: MetadataFilters = BTreeMap::from([("in.nope".to_string(), vec![serde_json::json!(1)])]);
        assert!(matches!(apply_filters(&mut frame, &filters), Err(Error::InvalidFilter(_))));
    }

    #[test]
    fn missing_model_aborts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = fresh_store(&dir);
        let mut transport = release_transport();
        transport
            .responses
            .remove(&format!("{RELEASE}/building_energy_models/bldg0000002-up00.osm.gz"));
        let filters = baseline_only();
        let err = synchronize(&store, &fetcher(transport), &key(), Some(&filters), "TMY3").unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
    }
}
