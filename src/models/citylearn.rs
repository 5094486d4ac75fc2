//! Documents consumed by the CityLearn environment.
//!
//! Notes
//! - Field names follow CityLearn's `building_attributes.json`, hence the renames.
//! - Templates are compiled in from `templates/`; perturbation is seeded so the
//!   same seed always yields the same document.

use crate::error::Result;
use crate::utils::leading_number;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const ATTRIBUTES_TEMPLATE: &str = include_str!("../../templates/building_attributes.json");
const STATE_ACTION_TEMPLATE: &str = include_str!("../../templates/building_state_action_space.json");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingAttributes {
    #[serde(rename = "File_Name")]
    pub file_name: Option<String>,
    #[serde(rename = "Building_Type")]
    pub building_type: i64,
    #[serde(rename = "Climate_Zone")]
    pub climate_zone: Option<String>,
    #[serde(rename = "Solar_Power_Installed(kW)")]
    pub solar_power_installed: f64,
    #[serde(rename = "Battery")]
    pub battery: Battery,
    #[serde(rename = "Heat_Pump")]
    pub heat_pump: HeatPump,
    #[serde(rename = "Electric_Water_Heater")]
    pub electric_water_heater: ElectricWaterHeater,
    #[serde(rename = "Chilled_Water_Tank")]
    pub chilled_water_tank: StorageTank,
    #[serde(rename = "DHW_Tank")]
    pub dhw_tank: StorageTank,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Battery {
    pub capacity: f64,
    pub efficiency: f64,
    pub capacity_loss_coefficient: f64,
    pub loss_coefficient: f64,
    pub nominal_power: f64,
    pub power_efficiency_curve: Vec<[f64; 2]>,
    pub capacity_power_curve: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatPump {
    pub nominal_power: f64,
    pub technical_efficiency: f64,
    pub t_target_heating: f64,
    pub t_target_cooling: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectricWaterHeater {
    pub nominal_power: f64,
    pub efficiency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageTank {
    pub capacity: f64,
    pub loss_coefficient: f64,
}

impl BuildingAttributes {
    pub fn template() -> Result<Self> {
        Ok(serde_json::from_str(ATTRIBUTES_TEMPLATE)?)
    }

    /// Template values, perturbed when a seed is given.
    pub fn derive(seed: Option<u64>) -> Result<Self> {
        let mut attributes = Self::template()?;
        if let Some(seed) = seed {
            attributes.perturb(&mut StdRng::seed_from_u64(seed));
        }
        Ok(attributes)
    }

    fn perturb(&mut self, rng: &mut StdRng) {
        self.solar_power_installed *= rng.random_range(0..=10) as f64;
        self.battery.capacity *= rng.random_range(0..=2) as f64;
        self.heat_pump.technical_efficiency = rng.random_range(0.2..0.3);
        self.heat_pump.t_target_heating = rng.random_range(47..=50) as f64;
        self.heat_pump.t_target_cooling = rng.random_range(7..=10) as f64;
        self.electric_water_heater.efficiency = rng.random_range(0.9..1.0);
        self.chilled_water_tank.loss_coefficient = rng.random_range(0.002..0.01);
        self.dhw_tank.loss_coefficient = rng.random_range(0.002..0.01);
    }

    /// Stamp building-specific values taken from the store.
    ///
    /// The installed PV size overrides the template solar capacity; a missing
    /// or `None` size means no PV at all.
    pub fn for_building(mut self, simulation_id: &str, climate_zone: Option<&str>, pv_system_size: Option<&str>) -> Self {
        self.file_name = Some(format!("Building_{}.csv", simulation_id));
        self.climate_zone = climate_zone.map(str::to_string);
        self.solar_power_installed = pv_system_size.and_then(leading_number).unwrap_or(0.0);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateActionSpace {
    pub states: BTreeMap<String, bool>,
    pub actions: BTreeMap<String, bool>,
}

impl StateActionSpace {
    pub fn template() -> Result<Self> {
        Ok(serde_json::from_str(STATE_ACTION_TEMPLATE)?)
    }

    /// Enable storage and generation flags exactly when the matching capacity is positive.
    pub fn derive(attributes: &BuildingAttributes) -> Result<Self> {
        let mut space = Self::template()?;
        let solar = attributes.solar_power_installed > 0.0;
        let cooling = attributes.chilled_water_tank.capacity > 0.0;
        let dhw = attributes.dhw_tank.capacity > 0.0;
        let electrical = attributes.battery.capacity > 0.0;

        space.states.insert("solar_gen".to_string(), solar);
        space.states.insert("cooling_storage_soc".to_string(), cooling);
        space.states.insert("dhw_storage_soc".to_string(), dhw);
        space.states.insert("electrical_storage_soc".to_string(), electrical);
        space.actions.insert("cooling_storage".to_string(), cooling);
        space.actions.insert("dhw_storage".to_string(), dhw);
        space.actions.insert("electrical_storage".to_string(), electrical);
        Ok(space)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_gives_identical_documents() {
        let a = serde_json::to_string(&BuildingAttributes::derive(Some(42)).unwrap()).unwrap();
        let b = serde_json::to_string(&BuildingAttributes::derive(Some(42)).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_seeds_differ() {
        let a = BuildingAttributes::derive(Some(42)).unwrap();
        let b = BuildingAttributes::derive(Some(7)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn unseeded_is_template() {
        assert_eq!(BuildingAttributes::derive(None).unwrap(), BuildingAttributes::template().unwrap());
    }

    #[test]
    fn perturbed_values_stay_in_range() {
        let template = BuildingAttributes::template().unwrap();
        for seed in 0..50 {
            let a = BuildingAttributes::derive(Some(seed)).unwrap();
            let solar_factor = a.solar_power_installed / template.solar_power_installed;
            assert!((0.0..=10.0).contains(&solar_factor) && solar_factor.fract() == 0.0);
            assert!((0.2..0.3).contains(&a.heat_pump.technical_efficiency));
            assert!((47.0..=50.0).contains(&a.heat_pump.t_target_heating));
            assert!((7.0..=10.0).contains(&a.heat_pump.t_target_cooling));
            assert!((0.9..1.0).contains(&a.electric_water_heater.efficiency));
            assert!((0.002..0.01).contains(&a.dhw_tank.loss_coefficient));
            assert_eq!(a.dhw_tank.capacity, template.dhw_tank.capacity);
        }
    }

    #[test]
    fn serializes_with_citylearn_keys() {
        let attributes = BuildingAttributes::derive(None)
            .unwrap()
            .for_building("resstock_tmy3_2021_release_1_100_0", Some("3B"), Some("4.0 kWDC"));
        let json = serde_json::to_value(&attributes).unwrap();
        assert_eq!(json["File_Name"], "Building_resstock_tmy3_2021_release_1_100_0.csv");
        assert_eq!(json["Climate_Zone"], "3B");
        assert_eq!(json["Solar_Power_Installed(kW)"], 4.0);
        assert!(json["Heat_Pump"]["t_target_heating"].is_number());
    }

    #[test]
    fn missing_pv_means_no_solar() {
        let attributes = BuildingAttributes::derive(None).unwrap().for_building("x", None, Some("None"));
        assert_eq!(attributes.solar_power_installed, 0.0);
        let space = StateActionSpace::derive(&attributes).unwrap();
        assert!(!space.states["solar_gen"]);
    }

    #[test]
    fn capability_flags_follow_capacities() {
        for seed in 0..30 {
            let attributes = BuildingAttributes::derive(Some(seed)).unwrap();
            let space = StateActionSpace::derive(&attributes).unwrap();
            assert_eq!(space.states["solar_gen"], attributes.solar_power_installed > 0.0);
            assert_eq!(space.states["cooling_storage_soc"], attributes.chilled_water_tank.capacity > 0.0);
            assert_eq!(space.states["dhw_storage_soc"], attributes.dhw_tank.capacity > 0.0);
            assert_eq!(space.states["electrical_storage_soc"], attributes.battery.capacity > 0.0);
            assert_eq!(space.actions["cooling_storage"], attributes.chilled_water_tank.capacity > 0.0);
            assert_eq!(space.actions["dhw_storage"], attributes.dhw_tank.capacity > 0.0);
            assert_eq!(space.actions["electrical_storage"], attributes.battery.capacity > 0.0);
        }
    }

    #[test]
    fn zero_capacity_disables_storage() {
        let mut attributes = BuildingAttributes::template().unwrap();
        attributes.battery.capacity = 0.0;
        attributes.chilled_water_tank.capacity = 0.0;
        let space = StateActionSpace::derive(&attributes).unwrap();
        assert!(!space.actions["electrical_storage"]);
        assert!(!space.actions["cooling_storage"]);
        assert!(space.actions["dhw_storage"]);
    }
}
