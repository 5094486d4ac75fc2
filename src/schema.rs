//! Handwritten Diesel declarations for the fixed part of the store schema.
//!
//! Wide tables (metadata, dictionaries, time series, schedule) only declare
//! their key and join columns here; the remaining columns are added at
//! synchronization time and are written through the generic upsert.

diesel::table! {
    dataset (id) {
        id -> BigInt,
        dataset_type -> Text,
        weather_source -> Text,
        year_of_publication -> BigInt,
        release -> BigInt,
    }
}

diesel::table! {
    metadata (id) {
        id -> BigInt,
        bldg_id -> BigInt,
        dataset_id -> BigInt,
        upgrade -> BigInt,
        in_county -> Nullable<Text>,
        in_nhgis_county_gisjoin -> Nullable<Text>,
        in_nhgis_puma_gisjoin -> Nullable<Text>,
        in_weather_file_latitude -> Nullable<Text>,
        in_weather_file_longitude -> Nullable<Text>,
        in_weather_file_tmy3 -> Nullable<Text>,
        in_ashrae_iecc_climate_zone_2004 -> Nullable<Text>,
        in_pv_system_size -> Nullable<Text>,
    }
}

diesel::table! {
    upgrade_dictionary (id) {
        id -> BigInt,
        dataset_id -> BigInt,
        upgrade_id -> BigInt,
    }
}

diesel::table! {
    spatial_tract (id) {
        id -> BigInt,
        dataset_id -> BigInt,
        nhgis_tract_gisjoin -> Text,
        nhgis_county_gisjoin -> Nullable<Text>,
        nhgis_puma_gisjoin -> Nullable<Text>,
        has_building -> BigInt,
    }
}

diesel::table! {
    weather (id) {
        id -> BigInt,
        dataset_id -> BigInt,
        weather_file_tmy3 -> Text,
        weather_file_latitude -> Text,
        weather_file_longitude -> Text,
        energyplus_title -> Nullable<Text>,
        epw_url -> Nullable<Text>,
        ddy_url -> Nullable<Text>,
        epw -> Nullable<Text>,
        ddy -> Nullable<Text>,
    }
}

diesel::table! {
    timeseries (metadata_id, timestamp) {
        metadata_id -> BigInt,
        timestamp -> Text,
    }
}

diesel::table! {
    model (metadata_id) {
        metadata_id -> BigInt,
        osm -> Text,
    }
}

diesel::table! {
    schedule (metadata_id, day_index, hour, minute) {
        metadata_id -> BigInt,
        day_index -> BigInt,
        hour -> BigInt,
        minute -> BigInt,
    }
}

diesel::table! {
    citylearn_energyplus_simulation_result (metadata_id, month, hour, day_type) {
        metadata_id -> BigInt,
        #[sql_name = "Month"]
        month -> BigInt,
        #[sql_name = "Hour"]
        hour -> BigInt,
        #[sql_name = "Day Type"]
        day_type -> Text,
        #[sql_name = "Daylight Savings Status"]
        daylight_savings_status -> Nullable<BigInt>,
        #[sql_name = "Equipment Electric Power [kWh]"]
        equipment_electric_power -> Nullable<Double>,
        #[sql_name = "Indoor Temperature [C]"]
        indoor_temperature -> Nullable<Double>,
        #[sql_name = "Indoor Relative Humidity [%]"]
        indoor_relative_humidity -> Nullable<Double>,
        #[sql_name = "Average Unmet Cooling Setpoint Difference [C]"]
        average_unmet_cooling_setpoint_difference -> Nullable<Double>,
        #[sql_name = "Average Unmet Heating Setpoint Difference [C]"]
        average_unmet_heating_setpoint_difference -> Nullable<Double>,
        #[sql_name = "DHW Heating [kWh]"]
        dhw_heating -> Nullable<Double>,
        #[sql_name = "Cooling Load [kWh]"]
        cooling_load -> Nullable<Double>,
        #[sql_name = "Heating Load [kWh]"]
        heating_load -> Nullable<Double>,
    }
}

diesel::table! {
    citylearn_building_attributes (metadata_id) {
        metadata_id -> BigInt,
        attributes -> Text,
    }
}

diesel::table! {
    citylearn_building_state_action_space (metadata_id) {
        metadata_id -> BigInt,
        state_action_space -> Text,
    }
}

diesel::joinable!(metadata -> dataset (dataset_id));
diesel::joinable!(upgrade_dictionary -> dataset (dataset_id));
diesel::joinable!(spatial_tract -> dataset (dataset_id));
diesel::joinable!(weather -> dataset (dataset_id));
diesel::joinable!(timeseries -> metadata (metadata_id));
diesel::joinable!(model -> metadata (metadata_id));
diesel::joinable!(schedule -> metadata (metadata_id));
diesel::joinable!(citylearn_energyplus_simulation_result -> metadata (metadata_id));
diesel::joinable!(citylearn_building_attributes -> metadata (metadata_id));
diesel::joinable!(citylearn_building_state_action_space -> metadata (metadata_id));

diesel::allow_tables_to_appear_in_same_query!(
    dataset,
    metadata,
    upgrade_dictionary,
    spatial_tract,
    weather,
    timeseries,
    model,
    schedule,
    citylearn_energyplus_simulation_result,
    citylearn_building_attributes,
    citylearn_building_state_action_space,
);
