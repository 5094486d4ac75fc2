//! Diesel row structs for the fixed-schema tables.

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Double, Nullable, Text};
use serde::Serialize;

use crate::schema;

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::dataset)]
pub struct NewDataset<'a> {
    pub dataset_type: &'a str,
    pub weather_source: &'a str,
    pub year_of_publication: i64,
    pub release: i64,
}

/// Key and join columns of a synchronized building, re-read after the metadata upsert.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable)]
#[diesel(table_name = schema::metadata)]
pub struct BuildingRef {
    #[diesel(column_name = id)]
    pub metadata_id: i64,
    pub bldg_id: i64,
    pub upgrade: i64,
    #[diesel(column_name = in_county)]
    pub county: Option<String>,
    pub in_nhgis_county_gisjoin: Option<String>,
    pub in_nhgis_puma_gisjoin: Option<String>,
    pub in_weather_file_latitude: Option<String>,
    pub in_weather_file_longitude: Option<String>,
    pub in_weather_file_tmy3: Option<String>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = schema::weather)]
#[diesel(treat_none_as_null = true)]
pub struct NewWeather {
    pub dataset_id: i64,
    pub weather_file_tmy3: String,
    pub weather_file_latitude: String,
    pub weather_file_longitude: String,
    pub energyplus_title: Option<String>,
    pub epw_url: Option<String>,
    pub ddy_url: Option<String>,
    pub epw: Option<String>,
    pub ddy: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::model)]
pub struct NewModel {
    pub metadata_id: i64,
    pub osm: String,
}

/// One hourly profile row; serializes with the parenthesised CityLearn CSV headers.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, AsChangeset, Serialize)]
#[diesel(table_name = schema::citylearn_energyplus_simulation_result)]
#[diesel(primary_key(metadata_id, month, hour, day_type))]
#[diesel(treat_none_as_null = true)]
pub struct SimulationResult {
    #[serde(skip_serializing)]
    pub metadata_id: i64,
    #[serde(rename = "Month")]
    pub month: i64,
    #[serde(rename = "Hour")]
    pub hour: i64,
    #[serde(rename = "Day Type")]
    pub day_type: String,
    #[serde(rename = "Daylight Savings Status")]
    pub daylight_savings_status: Option<i64>,
    #[serde(rename = "Equipment Electric Power (kWh)")]
    pub equipment_electric_power: Option<f64>,
    #[serde(rename = "Indoor Temperature (C)")]
    pub indoor_temperature: Option<f64>,
    #[serde(rename = "Indoor Relative Humidity (%)")]
    pub indoor_relative_humidity: Option<f64>,
    #[serde(rename = "Average Unmet Cooling Setpoint Difference (C)")]
    pub average_unmet_cooling_setpoint_difference: Option<f64>,
    #[serde(rename = "Average Unmet Heating Setpoint Difference (C)")]
    pub average_unmet_heating_setpoint_difference: Option<f64>,
    #[serde(rename = "DHW Heating (kWh)")]
    pub dhw_heating: Option<f64>,
    #[serde(rename = "Cooling Load (kWh)")]
    pub cooling_load: Option<f64>,
    #[serde(rename = "Heating Load (kWh)")]
    pub heating_load: Option<f64>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::citylearn_building_attributes)]
pub struct NewBuildingAttributes {
    pub metadata_id: i64,
    pub attributes: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::citylearn_building_state_action_space)]
pub struct NewStateActionSpace {
    pub metadata_id: i64,
    pub state_action_space: String,
}

/// Inputs the orchestrator needs for one building; the model is absent until synchronized.
#[derive(Debug, Clone, Queryable)]
pub struct SimulationInput {
    pub metadata_id: i64,
    pub dataset_id: i64,
    pub climate_zone: Option<String>,
    pub pv_system_size: Option<String>,
    pub weather_file_tmy3: Option<String>,
    pub weather_file_latitude: Option<String>,
    pub weather_file_longitude: Option<String>,
    pub osm: Option<String>,
}

/// A requested neighborhood member joined with its stored CityLearn documents.
#[derive(Debug, Clone, Queryable)]
pub struct NeighborhoodBuilding {
    pub metadata_id: i64,
    pub dataset_id: i64,
    pub weather_file_tmy3: Option<String>,
    pub weather_file_latitude: Option<String>,
    pub weather_file_longitude: Option<String>,
    pub attributes: String,
    pub state_action_space: String,
}

/// One long-format row of the engine result projection.
#[derive(Debug, Clone, PartialEq, QueryableByName)]
pub struct RawResultRow {
    #[diesel(sql_type = BigInt)]
    pub month: i64,
    #[diesel(sql_type = BigInt)]
    pub hour: i64,
    #[diesel(sql_type = Text)]
    pub day_type: String,
    #[diesel(sql_type = Nullable<BigInt>)]
    pub dst: Option<i64>,
    #[diesel(sql_type = Text)]
    pub label: String,
    #[diesel(sql_type = Nullable<Double>)]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, QueryableByName)]
pub struct TableColumn {
    #[diesel(sql_type = Text)]
    pub name: String,
}

/// A whole row of a wide table encoded by SQLite's `json_array`.
#[derive(Debug, Clone, QueryableByName)]
pub struct JsonRow {
    #[diesel(sql_type = Text)]
    pub row_json: String,
}
